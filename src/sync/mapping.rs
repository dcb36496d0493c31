// src/sync/mapping.rs

use crate::ldap::DirectoryEntry;
use crate::models::SyncRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    /// Бинарное содержимое, хранится как asset (фото и т.п.)
    Blob,
}

/// Пара `attribute -> field` из упорядоченной таблицы маппинга
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldMapping {
    pub attribute: String,
    pub field: String,
    #[serde(default)]
    pub kind: FieldKind,
}

impl FieldMapping {
    pub fn text(attribute: &str, field: &str) -> Self {
        Self {
            attribute: attribute.to_ascii_lowercase(),
            field: field.to_string(),
            kind: FieldKind::Text,
        }
    }

    pub fn blob(attribute: &str, field: &str) -> Self {
        Self {
            kind: FieldKind::Blob,
            ..Self::text(attribute, field)
        }
    }
}

pub fn default_mappings() -> Vec<FieldMapping> {
    vec![
        FieldMapping::text("givenname", "FirstName"),
        FieldMapping::text("sn", "Surname"),
        FieldMapping::text("mail", "Email"),
    ]
}

/// Копирует атрибуты `entry` в `record` в порядке таблицы.
/// Возвращает число реально изменённых полей.
pub fn apply_mappings(
    record: &mut SyncRecord,
    entry: &DirectoryEntry,
    mappings: &[FieldMapping],
    reset_missing: bool,
) -> usize {
    let mut changed = 0;

    for mapping in mappings {
        let updated = match mapping.kind {
            FieldKind::Text => match entry.first(&mapping.attribute) {
                Some(value) => record.set_field(&mapping.field, value),
                None if reset_missing => record.clear_field(&mapping.field),
                None => false,
            },
            FieldKind::Blob => {
                let bytes = entry
                    .binary(&mapping.attribute)
                    .and_then(|values| values.first().cloned())
                    .or_else(|| {
                        entry
                            .first(&mapping.attribute)
                            .map(|value| value.as_bytes().to_vec())
                    });
                match bytes {
                    Some(bytes) => record.set_asset(&mapping.field, bytes),
                    None if reset_missing => record.clear_asset(&mapping.field),
                    None => false,
                }
            }
        };
        if updated {
            changed += 1;
        }
    }

    changed
}
