// tests/integration/sync.rs

use crate::common::{BASE_DN, Call, FailingStore, FakeDirectory, options, temp_store, user};
use dirsync::ldap::{DirectoryEntry, DirectoryError};
use dirsync::models::SyncRecord;
use dirsync::store::{RecordStore, SaveOutcome};
use dirsync::sync::{DirectorySyncEngine, FieldMapping, SyncError};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn three_users() -> Vec<DirectoryEntry> {
    vec![
        user("Joe Bloggs", "123", "joe@bloggs.com"),
        user("Ann Smith", "456", "ann@smith.com"),
        user("Bob Jones", "789", "bob@jones.com"),
    ]
}

#[tokio::test]
async fn test_full_sync_maps_fields() {
    let (_dir, store) = temp_store();
    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(three_users()), store, options());

    let report = assert_ok!(engine.sync_all().await);
    assert_eq!((report.created, report.updated, report.deleted), (3, 0, 0));
    assert_eq!(report.failed, 0);
    assert!(!report.cancelled);

    let joe = assert_ok!(engine.store().find_by_guid("123").await).expect("joe");
    assert_eq!(joe.guid.as_deref(), Some("123"));
    assert_eq!(joe.field("FirstName"), Some("Joe"));
    assert_eq!(joe.field("Surname"), Some("Bloggs"));
    assert_eq!(joe.field("Email"), Some("joe@bloggs.com"));
    assert_eq!(joe.dn.as_deref(), Some("CN=Joe Bloggs,CN=Users,DC=playpen,DC=local"));
    assert!(joe.last_synced.is_some());

    // страница 2, три пользователя
    assert_eq!(engine.connection().searches().len(), 2);
}

#[tokio::test]
async fn test_second_full_sync_is_idempotent() {
    let (_dir, store) = temp_store();
    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(three_users()), store, options());

    assert_ok!(engine.sync_all().await);
    let mut before = assert_ok!(engine.store().records().await);

    let report = assert_ok!(engine.sync_all().await);
    assert_eq!((report.created, report.updated, report.deleted), (0, 3, 0));

    let mut after = assert_ok!(engine.store().records().await);
    assert_eq!(after.len(), 3);
    before.sort_by_key(|r| r.id);
    after.sort_by_key(|r| r.id);
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(b.id, a.id);
        assert_eq!(b.guid, a.guid);
        assert_eq!(b.fields, a.fields);
    }
}

#[tokio::test]
async fn test_destructive_deletes_only_absent_guid_records() {
    let (_dir, store) = temp_store();
    let mut local = SyncRecord::new();
    local.set_field("Email", "local@example.com");
    assert_ok!(store.save(&local).await);

    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(three_users()), store, options());
    assert_ok!(engine.sync_all().await);

    let (mut directory, store) = engine.into_parts();
    directory.set_entries(three_users().into_iter().take(2).collect());

    // Не destructive: ничего не удаляется
    let mut engine = DirectorySyncEngine::new(directory, store, options());
    let report = assert_ok!(engine.sync_all().await);
    assert_eq!(report.deleted, 0);
    assert_eq!(assert_ok!(engine.store().records().await).len(), 4);

    let (directory, store) = engine.into_parts();
    let mut destructive = options();
    destructive.destructive = true;
    let mut engine = DirectorySyncEngine::new(directory, store, destructive);
    let report = assert_ok!(engine.sync_all().await);

    assert_eq!(report.deleted, 1);
    assert!(assert_ok!(engine.store().find_by_guid("789").await).is_none());
    assert!(assert_ok!(engine.store().find_by_guid("123").await).is_some());
    let records = assert_ok!(engine.store().records().await);
    assert_eq!(records.len(), 3);
    assert!(records.iter().any(|r| r.id == local.id));
}

#[tokio::test]
async fn test_reset_missing_attributes() {
    let (_dir, store) = temp_store();
    let mut existing = SyncRecord::with_guid("123");
    existing.set_field("Special", "I should be removed because LDAP said so");
    assert_ok!(store.save(&existing).await);

    let mut opts = options();
    opts.field_mappings.push(FieldMapping::text("specialattribute", "Special"));

    let directory = FakeDirectory::new(vec![user("Joe Bloggs", "123", "joe@bloggs.com")]);
    let mut engine = DirectorySyncEngine::new(directory, store, opts.clone());
    assert_ok!(engine.sync_all().await);
    let record = assert_ok!(engine.store().find_by_guid("123").await).expect("record");
    assert_eq!(record.id, existing.id);
    assert_eq!(record.field("Special"), Some("I should be removed because LDAP said so"));

    let (directory, store) = engine.into_parts();
    opts.reset_missing_attributes = true;
    let mut engine = DirectorySyncEngine::new(directory, store, opts);
    assert_ok!(engine.sync_all().await);
    let record = assert_ok!(engine.store().find_by_guid("123").await).expect("record");
    assert_eq!(record.field("Special"), None);
    assert_eq!(record.field("FirstName"), Some("Joe"));
}

#[tokio::test]
async fn test_thumbnail_reset_and_unchanged_digest() {
    let (_dir, store) = temp_store();
    let mut opts = options();
    opts.reset_missing_attributes = true;
    opts.field_mappings.push(FieldMapping::blob("thumbnailphoto", "ProfileImage"));

    let photo = vec![0xFFu8, 0xD8, 0xFF, 0xE0, 1, 2, 3];
    let with_photo =
        user("Joe Bloggs", "456", "joe@bloggs.com").with_binary("thumbnailPhoto", photo.clone());
    let mut engine =
        DirectorySyncEngine::new(FakeDirectory::new(vec![with_photo]), store, opts.clone());

    assert_ok!(engine.sync_all().await);
    let first = assert_ok!(engine.store().find_by_guid("456").await).expect("record");
    let asset = first.asset("ProfileImage").expect("photo stored").clone();
    assert_eq!(asset.bytes, photo);

    assert_ok!(engine.sync_all().await);
    let second = assert_ok!(engine.store().find_by_guid("456").await).expect("record");
    assert_eq!(second.asset("ProfileImage"), Some(&asset));

    let (mut directory, store) = engine.into_parts();
    directory.set_entries(vec![user("Joe Bloggs", "456", "joe@bloggs.com")]);
    let mut engine = DirectorySyncEngine::new(directory, store, opts);
    assert_ok!(engine.sync_all().await);
    let third = assert_ok!(engine.store().find_by_guid("456").await).expect("record");
    assert!(third.asset("ProfileImage").is_none());
}

#[tokio::test]
async fn test_entry_without_guid_is_skipped() {
    let (_dir, store) = temp_store();
    let no_guid = DirectoryEntry::new(format!("CN=Ghost,CN=Users,{BASE_DN}"))
        .with("objectClass", ["user"])
        .with("mail", ["ghost@example.com"]);
    let mut entries = three_users();
    entries.insert(1, no_guid);

    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(entries), store, options());
    let report = assert_ok!(engine.sync_all().await);

    assert_eq!(report.created, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(assert_ok!(engine.store().records().await).len(), 3);
}

#[tokio::test]
async fn test_persistence_failure_counted_and_never_deleted() {
    let (_dir, inner) = temp_store();
    let mut existing = SyncRecord::with_guid("456");
    existing.set_field("Email", "old@smith.com");
    assert_ok!(inner.save(&existing).await);

    let store = FailingStore {
        inner,
        reject_guid: "456".to_string(),
    };
    let mut opts = options();
    opts.destructive = true;
    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(three_users()), store, opts);

    let report = assert_ok!(engine.sync_all().await);
    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.deleted, 0);

    let kept = assert_ok!(engine.store().find_by_guid("456").await).expect("kept");
    assert_eq!(kept.field("Email"), Some("old@smith.com"));
}

#[tokio::test]
async fn test_search_failure_aborts_run_but_keeps_persisted_entries() {
    let (_dir, store) = temp_store();
    let mut directory = FakeDirectory::new(three_users());
    directory.fail_search_at = Some(1);
    let mut opts = options();
    opts.destructive = true;

    let mut engine = DirectorySyncEngine::new(directory, store, opts);
    let err = assert_err!(engine.sync_all().await);
    assert!(matches!(
        err,
        SyncError::Directory(DirectoryError::Search { code: 51, .. })
    ));

    assert_eq!(assert_ok!(engine.store().records().await).len(), 2);
}

#[tokio::test]
async fn test_cancelled_run_skips_deletions() {
    let (_dir, store) = temp_store();
    assert_ok!(store.save(&SyncRecord::with_guid("stale")).await);

    let token = CancellationToken::new();
    token.cancel();
    let mut opts = options();
    opts.destructive = true;
    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(three_users()), store, opts)
        .with_cancellation(token);

    let report = assert_ok!(engine.sync_all().await);
    assert!(report.cancelled);
    assert_eq!((report.created, report.deleted), (0, 0));
    assert!(assert_ok!(engine.store().find_by_guid("stale").await).is_some());
    assert!(engine.connection().searches().is_empty());
}

#[tokio::test]
async fn test_sync_one_by_email() {
    let (_dir, store) = temp_store();
    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(three_users()), store, options());

    let synced = assert_ok!(engine.sync_one("ann@smith.com").await);
    assert_eq!(synced.outcome, SaveOutcome::Created);
    assert_eq!(synced.record.field("FirstName"), Some("Ann"));
    assert_eq!(assert_ok!(engine.store().records().await).len(), 1);

    let filters: Vec<&str> = engine
        .connection()
        .calls
        .iter()
        .filter_map(|call| match call {
            Call::Search { filter, .. } => Some(filter.as_str()),
            Call::Read { .. } => None,
        })
        .collect();
    assert_eq!(filters, vec!["(&(objectClass=user)(mail=ann@smith.com))"]);

    let again = assert_ok!(engine.sync_one("ann@smith.com").await);
    assert_eq!(again.outcome, SaveOutcome::Updated);
    assert_eq!(again.record.id, synced.record.id);
}

#[tokio::test]
async fn test_sync_one_unknown_email_writes_nothing() {
    let (_dir, store) = temp_store();
    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(three_users()), store, options());

    let err = assert_err!(engine.sync_one("nobody@example.com").await);
    assert_eq!(err.to_string(), "No user found in LDAP for email nobody@example.com");
    assert!(assert_ok!(engine.store().records().await).is_empty());

    let err = assert_err!(engine.sync_one("  ").await);
    assert!(matches!(err, SyncError::MissingEmail));
}

#[tokio::test]
async fn test_search_locations_are_walked_in_order() {
    let (_dir, store) = temp_store();
    let outside = DirectoryEntry::new(format!("CN=Zed Other,OU=Elsewhere,{BASE_DN}"))
        .with("objectClass", ["user"])
        .with("objectGUID", ["999"])
        .with("mail", ["zed@other.com"]);
    let mut entries = three_users();
    entries.push(outside);

    let mut opts = options();
    opts.search_bases = vec![Some(format!("CN=Users,{BASE_DN}"))];
    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(entries), store, opts);
    let report = assert_ok!(engine.sync_all().await);
    assert_eq!(report.created, 3);
    assert!(assert_ok!(engine.store().find_by_guid("999").await).is_none());

    let (directory, store) = engine.into_parts();
    let mut opts = options();
    opts.search_bases = vec![
        Some(format!("CN=Users,{BASE_DN}")),
        Some(format!("OU=Elsewhere,{BASE_DN}")),
    ];
    let mut engine = DirectorySyncEngine::new(directory, store, opts);
    let report = assert_ok!(engine.sync_all().await);
    assert_eq!((report.created, report.updated), (1, 3));
}

#[tokio::test]
async fn test_migrate_links_records_by_email() {
    let (_dir, store) = temp_store();
    let mut local = SyncRecord::new();
    local.set_field("Email", "Joe@Bloggs.com");
    assert_ok!(store.save(&local).await);

    let mut engine = DirectorySyncEngine::new(FakeDirectory::new(three_users()), store, options());
    let report = assert_ok!(engine.migrate_existing().await);
    assert_eq!(report.migrated, 1);

    let linked = assert_ok!(engine.store().find_by_guid("123").await).expect("linked");
    assert_eq!(linked.id, local.id);

    // Уже привязаны: второй проход ничего не меняет
    let report = assert_ok!(engine.migrate_existing().await);
    assert_eq!(report.migrated, 0);

    let report = assert_ok!(engine.sync_all().await);
    assert_eq!((report.created, report.updated), (2, 1));
}
