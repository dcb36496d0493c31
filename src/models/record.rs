// src/models/record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

// ========================================
// Asset: содержимое blob-поля
// ========================================

/// Сохранённый blob (например, фото) и его SHA-256 для проверки изменений
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub digest: String,
    pub bytes: Vec<u8>,
}

impl Asset {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let digest = hex::encode(Sha256::digest(&bytes));
        Self { digest, bytes }
    }
}

// ========================================
// SyncRecord: локальная копия записи каталога
// ========================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncRecord {
    /// Ключ в хранилище
    pub id: Uuid,
    /// Идентификатор в каталоге (`objectGUID`). `None` у локальных записей
    pub guid: Option<String>,
    pub dn: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub assets: BTreeMap<String, Asset>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced: Option<DateTime<Utc>>,
}

impl SyncRecord {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            guid: None,
            dn: None,
            fields: BTreeMap::new(),
            assets: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            last_synced: None,
        }
    }

    /// Новая запись только с идентификатором каталога
    pub fn with_guid(guid: impl Into<String>) -> Self {
        Self {
            guid: Some(guid.into()),
            ..Self::new()
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// `true`, если значение изменилось
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.fields.get(name) == Some(&value) {
            return false;
        }
        self.fields.insert(name.to_string(), value);
        true
    }

    /// `true`, если значение было удалено
    pub fn clear_field(&mut self, name: &str) -> bool {
        self.fields.remove(name).is_some()
    }

    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.get(name)
    }

    /// Сохраняет `bytes`, если asset с тем же хэшем ещё не лежит
    pub fn set_asset(&mut self, name: &str, bytes: Vec<u8>) -> bool {
        let asset = Asset::from_bytes(bytes);
        if self.assets.get(name).is_some_and(|a| a.digest == asset.digest) {
            return false;
        }
        self.assets.insert(name.to_string(), asset);
        true
    }

    pub fn clear_asset(&mut self, name: &str) -> bool {
        self.assets.remove(name).is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for SyncRecord {
    fn default() -> Self {
        Self::new()
    }
}
