// tests/integration/common.rs

use async_trait::async_trait;
use dirsync::ldap::{
    Attributes, DirectoryConnection, DirectoryEntry, DirectoryError, Filter, PageCursor,
    RangeFragment, SearchPage, SearchRequest,
};
use dirsync::models::{GroupMembership, LocalGroup, SyncRecord};
use dirsync::store::{RadDbStore, RecordStore, SaveOutcome, StoreError};
use dirsync::sync::SyncOptions;
use std::collections::VecDeque;
use tempfile::TempDir;
use uuid::Uuid;

pub const BASE_DN: &str = "DC=playpen,DC=local";

/// Запросы, которые получил каталог, по порядку
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Search { filter: String, cookie: Vec<u8> },
    Read { dn: String, attributes: Vec<String> },
}

/// Каталог в памяти: страницы по cookie-смещениям, простые фильтры,
/// длинные атрибуты режутся на куски `;range=`.
pub struct FakeDirectory {
    entries: Vec<DirectoryEntry>,
    /// Значений в куске; `None` не режет
    pub max_values: Option<usize>,
    pub calls: Vec<Call>,
    /// Уронить n-й поиск (с нуля) с кодом результата
    pub fail_search_at: Option<usize>,
}

impl FakeDirectory {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self {
            entries,
            max_values: None,
            calls: Vec::new(),
            fail_search_at: None,
        }
    }

    pub fn with_max_values(mut self, max: usize) -> Self {
        self.max_values = Some(max);
        self
    }

    pub fn set_entries(&mut self, entries: Vec<DirectoryEntry>) {
        self.entries = entries;
    }

    pub fn searches(&self) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Search { cookie, .. } => Some(cookie.clone()),
                Call::Read { .. } => None,
            })
            .collect()
    }

    pub fn reads(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::Read { .. }))
            .count()
    }

    fn project(&self, entry: &DirectoryEntry, attributes: &Attributes) -> DirectoryEntry {
        let names: Vec<String> = match attributes {
            Attributes::All => entry.attribute_names().map(str::to_string).collect(),
            Attributes::Only(names) => names.clone(),
        };

        let mut out = DirectoryEntry::new(entry.dn());
        for name in names {
            if let Some(values) = entry.get(&name) {
                match self.max_values {
                    Some(max) if values.len() > max => {
                        let key = format!("{};range=0-{}", name.to_ascii_lowercase(), max - 1);
                        out.insert(&key, values[..max].to_vec());
                    }
                    _ => out.insert(&name, values.to_vec()),
                }
            }
            if let Some(values) = entry.binary(&name) {
                out.insert_binary(&name, values.to_vec());
            }
        }
        out
    }
}

pub fn matches(filter: &Filter, entry: &DirectoryEntry) -> bool {
    match filter {
        Filter::Equality(attr, value) => entry
            .get(attr)
            .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value))),
        Filter::Present(attr) => entry.has(attr),
        Filter::And(items) => items.iter().all(|f| matches(f, entry)),
        Filter::Or(items) => items.iter().any(|f| matches(f, entry)),
        Filter::Not(inner) => !matches(inner, entry),
        _ => false,
    }
}

fn under_base(dn: &str, base: &str) -> bool {
    dn.to_ascii_lowercase().ends_with(&base.to_ascii_lowercase())
}

#[async_trait]
impl DirectoryConnection for FakeDirectory {
    async fn search(
        &mut self,
        request: &SearchRequest,
        cursor: &PageCursor,
    ) -> Result<SearchPage, DirectoryError> {
        let index = self.searches().len();
        self.calls.push(Call::Search {
            filter: request.filter.clone(),
            cookie: cursor.cookie().to_vec(),
        });
        if self.fail_search_at == Some(index) {
            return Err(DirectoryError::Search {
                code: 51,
                message: "busy".to_string(),
            });
        }
        if cursor.is_exhausted() {
            return Err(DirectoryError::Protocol("search past last page".to_string()));
        }

        let filter = Filter::parse(&request.filter)
            .map_err(|e| DirectoryError::Search { code: 87, message: e.to_string() })?;
        let offset: usize = match cursor {
            PageCursor::InProgress(cookie) => String::from_utf8_lossy(cookie)
                .parse()
                .map_err(|_| DirectoryError::Protocol("bad cookie".to_string()))?,
            _ => 0,
        };

        let base = request.base_dn.as_deref().unwrap_or(BASE_DN);
        let matching: Vec<&DirectoryEntry> = self
            .entries
            .iter()
            .filter(|e| under_base(e.dn(), base) && matches(&filter, e))
            .collect();

        let size = request.page_size.max(1) as usize;
        let end = (offset + size).min(matching.len());
        let entries = matching[offset.min(end)..end]
            .iter()
            .map(|e| self.project(e, &request.attributes))
            .collect();

        let cookie = if end < matching.len() {
            end.to_string().into_bytes()
        } else {
            Vec::new()
        };

        Ok(SearchPage {
            entries,
            next: PageCursor::from_cookie(cookie),
        })
    }

    async fn read_entry(
        &mut self,
        dn: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>, DirectoryError> {
        self.calls.push(Call::Read {
            dn: dn.to_string(),
            attributes: attributes.to_vec(),
        });

        let Some(entry) = self.entries.iter().find(|e| e.dn().eq_ignore_ascii_case(dn)) else {
            return Ok(None);
        };

        let mut out = DirectoryEntry::new(entry.dn());
        for name in attributes {
            let Some(fragment) = RangeFragment::parse(name) else {
                if let Some(values) = entry.get(name) {
                    out.insert(name, values.to_vec());
                }
                continue;
            };
            let Some(values) = entry.get(&fragment.base) else {
                continue;
            };

            let low = fragment.low as usize;
            let requested_end = match fragment.high {
                Some(high) => high as usize + 1,
                None => values.len(),
            };
            let end = requested_end.min(values.len());
            let chunk = values[low.min(end)..end].to_vec();
            let key = if end >= values.len() {
                format!("{};range={}-*", fragment.base, low)
            } else {
                format!("{};range={}-{}", fragment.base, low, end - 1)
            };
            out.insert(&key, chunk);
        }
        Ok(Some(out))
    }
}

/// Отдаёт заготовленные страницы и ответы, записывая вызовы
#[derive(Default)]
pub struct ScriptedDirectory {
    pub pages: VecDeque<Result<SearchPage, DirectoryError>>,
    pub reads: VecDeque<Option<DirectoryEntry>>,
    pub calls: Vec<Call>,
}

impl ScriptedDirectory {
    pub fn page(mut self, entries: Vec<DirectoryEntry>, cookie: &[u8]) -> Self {
        self.pages.push_back(Ok(SearchPage {
            entries,
            next: PageCursor::from_cookie(cookie.to_vec()),
        }));
        self
    }

    pub fn failing_page(mut self, error: DirectoryError) -> Self {
        self.pages.push_back(Err(error));
        self
    }

    pub fn read(mut self, reply: Option<DirectoryEntry>) -> Self {
        self.reads.push_back(reply);
        self
    }

    pub fn search_cookies(&self) -> Vec<Vec<u8>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Search { cookie, .. } => Some(cookie.clone()),
                Call::Read { .. } => None,
            })
            .collect()
    }

    pub fn read_requests(&self) -> Vec<Vec<String>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Read { attributes, .. } => Some(attributes.clone()),
                Call::Search { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl DirectoryConnection for ScriptedDirectory {
    async fn search(
        &mut self,
        request: &SearchRequest,
        cursor: &PageCursor,
    ) -> Result<SearchPage, DirectoryError> {
        self.calls.push(Call::Search {
            filter: request.filter.clone(),
            cookie: cursor.cookie().to_vec(),
        });
        self.pages
            .pop_front()
            .unwrap_or_else(|| Err(DirectoryError::Protocol("no scripted page left".to_string())))
    }

    async fn read_entry(
        &mut self,
        dn: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>, DirectoryError> {
        self.calls.push(Call::Read {
            dn: dn.to_string(),
            attributes: attributes.to_vec(),
        });
        Ok(self.reads.pop_front().flatten())
    }
}

/// `RadDbStore`, который не сохраняет запись с одним GUID
pub struct FailingStore {
    pub inner: RadDbStore,
    pub reject_guid: String,
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn find_by_guid(&self, guid: &str) -> Result<Option<SyncRecord>, StoreError> {
        self.inner.find_by_guid(guid).await
    }

    async fn find_unlinked_by_email(
        &self,
        field: &str,
        email: &str,
    ) -> Result<Option<SyncRecord>, StoreError> {
        self.inner.find_unlinked_by_email(field, email).await
    }

    async fn records(&self) -> Result<Vec<SyncRecord>, StoreError> {
        self.inner.records().await
    }

    async fn save(&self, record: &SyncRecord) -> Result<SaveOutcome, StoreError> {
        if record.guid.as_deref() == Some(self.reject_guid.as_str()) {
            return Err(StoreError::Serialization("disk full".to_string()));
        }
        self.inner.save(record).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn memberships(&self, record: Uuid) -> Result<Vec<GroupMembership>, StoreError> {
        self.inner.memberships(record).await
    }

    async fn add_membership(
        &self,
        record: Uuid,
        membership: GroupMembership,
    ) -> Result<(), StoreError> {
        self.inner.add_membership(record, membership).await
    }

    async fn remove_membership(&self, record: Uuid, group: &str) -> Result<(), StoreError> {
        self.inner.remove_membership(record, group).await
    }

    async fn find_group(&self, code: &str) -> Result<Option<LocalGroup>, StoreError> {
        self.inner.find_group(code).await
    }

    async fn create_group(&self, group: &LocalGroup) -> Result<(), StoreError> {
        self.inner.create_group(group).await
    }
}

pub fn temp_store() -> (TempDir, RadDbStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = RadDbStore::open(dir.path().join("records.rdb"), &[42u8; 32]).expect("open store");
    (dir, store)
}

pub fn options() -> SyncOptions {
    SyncOptions {
        users_filter: "(objectClass=user)".to_string(),
        page_size: 2,
        ..SyncOptions::default()
    }
}

pub fn user(cn: &str, guid: &str, email: &str) -> DirectoryEntry {
    let (first, last) = cn.split_once(' ').unwrap_or((cn, ""));
    DirectoryEntry::new(format!("CN={cn},CN=Users,{BASE_DN}"))
        .with("objectClass", ["top", "person", "user"])
        .with("objectGUID", [guid])
        .with("givenName", [first])
        .with("sn", [last])
        .with("mail", [email])
}

pub fn group_dn(n: u32) -> String {
    format!("CN=Group{n},CN=Users,{BASE_DN}")
}
