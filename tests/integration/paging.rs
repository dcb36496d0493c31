// tests/integration/paging.rs

use crate::common::{FakeDirectory, ScriptedDirectory, user};
use dirsync::ldap::{DirectoryEntry, DirectoryError, PageCursor, PagedSearch, SearchRequest};
use futures_util::StreamExt;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn entry(n: u32) -> DirectoryEntry {
    DirectoryEntry::new(format!("CN=E{n},DC=playpen,DC=local")).with("cn", [format!("E{n}")])
}

async fn drain<C>(search: &mut PagedSearch<'_, C>) -> Vec<String>
where
    C: dirsync::ldap::DirectoryConnection + ?Sized,
{
    let mut dns = Vec::new();
    while let Some(entry) = assert_ok!(search.next_entry().await) {
        dns.push(entry.dn().to_string());
    }
    dns
}

#[tokio::test]
async fn test_one_fetch_per_nonempty_cookie() {
    let mut dir = ScriptedDirectory::default()
        .page(vec![entry(1), entry(2)], b"c1")
        .page(vec![entry(3)], b"c2")
        .page(vec![entry(4)], b"");

    let mut search = PagedSearch::new(&mut dir, SearchRequest::new("(cn=*)"));
    let dns = drain(&mut search).await;
    assert_eq!(search.cursor(), &PageCursor::Exhausted);
    assert_eq!(search.pages_fetched(), 3);

    assert_eq!(dns.len(), 4);
    assert_eq!(
        dir.search_cookies(),
        vec![Vec::new(), b"c1".to_vec(), b"c2".to_vec()]
    );
}

#[tokio::test]
async fn test_empty_result_needs_one_fetch() {
    let mut dir = ScriptedDirectory::default().page(Vec::new(), b"");

    let mut search = PagedSearch::new(&mut dir, SearchRequest::new("(cn=nobody)"));
    assert!(assert_ok!(search.next_entry().await).is_none());
    assert!(assert_ok!(search.next_entry().await).is_none());

    assert_eq!(dir.search_cookies().len(), 1);
}

#[tokio::test]
async fn test_fetch_failure_is_terminal() {
    let mut dir = ScriptedDirectory::default()
        .page(vec![entry(1)], b"more")
        .failing_page(DirectoryError::Protocol("bad control".to_string()))
        .page(vec![entry(2)], b"");

    let mut search = PagedSearch::new(&mut dir, SearchRequest::new("(cn=*)"));
    assert!(assert_ok!(search.next_entry().await).is_some());

    let err = assert_err!(search.next_entry().await);
    assert!(matches!(err, DirectoryError::Protocol(_)));
    let err = assert_err!(search.next_entry().await);
    assert!(matches!(err, DirectoryError::Aborted));

    assert_eq!(dir.search_cookies().len(), 2);
}

#[tokio::test]
async fn test_rewind_reissues_every_request() {
    let entries = vec![
        user("Joe Bloggs", "1", "joe@bloggs.com"),
        user("Ann Smith", "2", "ann@smith.com"),
        user("Bob Jones", "3", "bob@jones.com"),
    ];
    let mut dir = FakeDirectory::new(entries);

    let request = SearchRequest::new("(objectClass=user)").page_size(2);
    let mut search = PagedSearch::new(&mut dir, request);
    let first = drain(&mut search).await;
    search.rewind();
    assert_eq!(search.cursor(), &PageCursor::NotStarted);
    let second = drain(&mut search).await;

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    assert_eq!(
        dir.searches(),
        vec![Vec::new(), b"2".to_vec(), Vec::new(), b"2".to_vec()]
    );
}

#[tokio::test]
async fn test_cancelled_search_fetches_nothing() {
    let mut dir = FakeDirectory::new(vec![user("Joe Bloggs", "1", "joe@bloggs.com")]);
    let token = CancellationToken::new();
    token.cancel();

    let mut search = PagedSearch::new(&mut dir, SearchRequest::new("(objectClass=user)"))
        .with_cancellation(token);
    let err = assert_err!(search.next_entry().await);
    assert!(matches!(err, DirectoryError::Cancelled));

    assert!(dir.searches().is_empty());
}

#[tokio::test]
async fn test_stream_ends_after_error() {
    let mut dir = ScriptedDirectory::default()
        .page(vec![entry(1), entry(2)], b"next")
        .failing_page(DirectoryError::Search {
            code: 53,
            message: "unwilling to perform".to_string(),
        });

    let items: Vec<_> = PagedSearch::new(&mut dir, SearchRequest::new("(cn=*)"))
        .into_stream()
        .collect()
        .await;

    assert_eq!(items.len(), 3);
    assert!(items[0].is_ok());
    assert!(items[1].is_ok());
    assert!(matches!(items[2], Err(DirectoryError::Search { code: 53, .. })));
}
