// src/models/group.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Локальная группа, ссылки на неё идут по `code`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LocalGroup {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl LocalGroup {
    pub fn new(code: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

/// Связь записи с группой.
///
/// Синхронизация добавляет и удаляет только связи из каталога,
/// локальные связи она не трогает.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    pub group: String,
    pub directory_managed: bool,
}

impl GroupMembership {
    pub fn directory(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            directory_managed: true,
        }
    }

    pub fn local(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            directory_managed: false,
        }
    }
}

/// DN группы каталога и код локальной группы
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GroupMapping {
    pub dn: String,
    pub group: String,
}
