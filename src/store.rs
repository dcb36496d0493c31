// src/store.rs

use crate::models::{GroupMembership, LocalGroup, SyncRecord};
use crate::raddb::{MasterKey, RadDB, RadDbError, WriteOp};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

const ALL_RECORDS_INDEX: &str = "all_records_index";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("DB error: {0}")]
    Db(#[from] RadDbError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
}

/// Хранилище записей, групп и членства.
///
/// Каждый вызов атомарен: при ошибке хранилище остаётся как было.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_guid(&self, guid: &str) -> Result<Option<SyncRecord>, StoreError>;

    /// Запись без GUID, у которой `field` равно `email` (без учёта регистра)
    async fn find_unlinked_by_email(
        &self,
        field: &str,
        email: &str,
    ) -> Result<Option<SyncRecord>, StoreError>;

    async fn records(&self) -> Result<Vec<SyncRecord>, StoreError>;

    async fn records_with_guid(&self) -> Result<Vec<SyncRecord>, StoreError> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| r.guid.is_some())
            .collect())
    }

    async fn save(&self, record: &SyncRecord) -> Result<SaveOutcome, StoreError>;

    /// Удалить запись и её членство в группах
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    async fn memberships(&self, record: Uuid) -> Result<Vec<GroupMembership>, StoreError>;

    /// Ничего не делает, если связь с группой уже есть (с любым флагом)
    async fn add_membership(
        &self,
        record: Uuid,
        membership: GroupMembership,
    ) -> Result<(), StoreError>;

    async fn remove_membership(&self, record: Uuid, group: &str) -> Result<(), StoreError>;

    async fn find_group(&self, code: &str) -> Result<Option<LocalGroup>, StoreError>;

    async fn create_group(&self, group: &LocalGroup) -> Result<(), StoreError>;
}

// === Бэкенд RadDB ===

/// `RecordStore` поверх зашифрованного файла [`RadDB`].
///
/// Ключи: `record:{id}`, `guid_index:{guid}`, `all_records_index`,
/// `group:{code}`, `membership:{record_id}`.
pub struct RadDbStore {
    db: RwLock<RadDB>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl RadDbStore {
    pub fn open<P: AsRef<Path>>(path: P, key: &MasterKey) -> Result<Self, StoreError> {
        let db = RadDB::open(path, key)?;
        Ok(Self {
            db: RwLock::new(db),
        })
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let db = self.db.read().await;
        match db.get(key)? {
            Some(data) => {
                let obj = bincode::deserialize(&data)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<SyncRecord>, StoreError> {
        self.load(&format!("record:{id}")).await
    }

    async fn record_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.load(ALL_RECORDS_INDEX).await?.unwrap_or_default())
    }
}

#[async_trait]
impl RecordStore for RadDbStore {
    async fn find_by_guid(&self, guid: &str) -> Result<Option<SyncRecord>, StoreError> {
        let id: Option<Uuid> = self.load(&format!("guid_index:{guid}")).await?;
        match id {
            Some(id) => self.get_record(id).await,
            None => Ok(None),
        }
    }

    async fn find_unlinked_by_email(
        &self,
        field: &str,
        email: &str,
    ) -> Result<Option<SyncRecord>, StoreError> {
        for id in self.record_ids().await? {
            if let Some(record) = self.get_record(id).await? {
                let matches = record
                    .field(field)
                    .is_some_and(|value| value.eq_ignore_ascii_case(email));
                if record.guid.is_none() && matches {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    async fn records(&self) -> Result<Vec<SyncRecord>, StoreError> {
        let mut records = Vec::new();
        for id in self.record_ids().await? {
            if let Some(record) = self.get_record(id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn save(&self, record: &SyncRecord) -> Result<SaveOutcome, StoreError> {
        let previous = self.get_record(record.id).await?;

        let mut ops = Vec::new();
        if let Some(guid) = &record.guid {
            let owner: Option<Uuid> = self.load(&format!("guid_index:{guid}")).await?;
            if owner.is_some_and(|owner| owner != record.id) {
                return Err(StoreError::AlreadyExists(format!(
                    "record with GUID {guid} already exists"
                )));
            }
            ops.push(WriteOp::Set(format!("guid_index:{guid}"), encode(&record.id)?));
        }

        // GUID сменился: удаляем старый индекс
        if let Some(old_guid) = previous.as_ref().and_then(|p| p.guid.as_ref()) {
            if record.guid.as_ref() != Some(old_guid) {
                ops.push(WriteOp::Remove(format!("guid_index:{old_guid}")));
            }
        }

        let outcome = if previous.is_some() {
            SaveOutcome::Updated
        } else {
            let mut ids = self.record_ids().await?;
            ids.push(record.id);
            ops.push(WriteOp::Set(ALL_RECORDS_INDEX.to_string(), encode(&ids)?));
            SaveOutcome::Created
        };

        let mut stored = record.clone();
        if outcome == SaveOutcome::Updated {
            stored.touch();
        }
        ops.push(WriteOp::Set(format!("record:{}", record.id), encode(&stored)?));

        self.db.write().await.apply(ops)?;
        Ok(outcome)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let record = self
            .get_record(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("record {id}")))?;

        let mut ids = self.record_ids().await?;
        ids.retain(|existing| *existing != id);

        let mut ops = vec![
            WriteOp::Remove(format!("record:{id}")),
            WriteOp::Remove(format!("membership:{id}")),
            WriteOp::Set(ALL_RECORDS_INDEX.to_string(), encode(&ids)?),
        ];
        if let Some(guid) = &record.guid {
            ops.push(WriteOp::Remove(format!("guid_index:{guid}")));
        }

        self.db.write().await.apply(ops)?;
        Ok(())
    }

    async fn memberships(&self, record: Uuid) -> Result<Vec<GroupMembership>, StoreError> {
        Ok(self
            .load(&format!("membership:{record}"))
            .await?
            .unwrap_or_default())
    }

    async fn add_membership(
        &self,
        record: Uuid,
        membership: GroupMembership,
    ) -> Result<(), StoreError> {
        if self.find_group(&membership.group).await?.is_none() {
            return Err(StoreError::NotFound(format!("group {}", membership.group)));
        }

        let mut current = self.memberships(record).await?;
        if current.iter().any(|m| m.group == membership.group) {
            return Ok(());
        }
        current.push(membership);

        self.db
            .write()
            .await
            .set(format!("membership:{record}"), encode(&current)?)?;
        Ok(())
    }

    async fn remove_membership(&self, record: Uuid, group: &str) -> Result<(), StoreError> {
        let mut current = self.memberships(record).await?;
        let before = current.len();
        current.retain(|m| m.group != group);
        if current.len() == before {
            return Ok(());
        }

        self.db
            .write()
            .await
            .set(format!("membership:{record}"), encode(&current)?)?;
        Ok(())
    }

    async fn find_group(&self, code: &str) -> Result<Option<LocalGroup>, StoreError> {
        self.load(&format!("group:{code}")).await
    }

    async fn create_group(&self, group: &LocalGroup) -> Result<(), StoreError> {
        if self.find_group(&group.code).await?.is_some() {
            return Err(StoreError::AlreadyExists(format!(
                "group with code {} already exists",
                group.code
            )));
        }
        self.db
            .write()
            .await
            .set(format!("group:{}", group.code), encode(group)?)?;
        Ok(())
    }
}
