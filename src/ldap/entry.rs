// src/ldap/entry.rs

use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Объект каталога в том виде, в каком его вернул поиск.
///
/// Имена атрибутов регистронезависимы и хранятся в нижнем регистре. Значения
/// не в UTF-8 (фото, сырые идентификаторы) лежат в отдельной бинарной карте.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DirectoryEntry {
    dn: String,
    pub(crate) attributes: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    pub(crate) binary: BTreeMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Self::default()
        }
    }

    /// Builder для атрибутов, в основном для тестов
    pub fn with<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.insert(name, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_binary(mut self, name: &str, value: Vec<u8>) -> Self {
        self.insert_binary(name, vec![value]);
        self
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        self.attributes.contains_key(&key) || self.binary.contains_key(&key)
    }

    pub fn binary(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.binary
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    /// Заменяет значения `name`
    pub fn insert(&mut self, name: &str, values: Vec<String>) {
        self.attributes.insert(name.to_ascii_lowercase(), values);
    }

    /// Дописывает значения в `name`, порядок сохраняется
    pub fn extend(&mut self, name: &str, values: Vec<String>) {
        self.attributes
            .entry(name.to_ascii_lowercase())
            .or_default()
            .extend(values);
    }

    pub fn insert_binary(&mut self, name: &str, values: Vec<Vec<u8>>) {
        self.binary.insert(name.to_ascii_lowercase(), values);
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

/// Текстовая форма сырого 16-байтного GUID (`objectGUID`).
///
/// Active Directory хранит первые три группы в little-endian.
pub fn guid_from_bytes(bytes: &[u8]) -> Option<String> {
    Uuid::from_slice_le(bytes).ok().map(|guid| guid.to_string())
}
