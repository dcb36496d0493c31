// src/ldap/mod.rs

pub mod asn1;
pub mod client;
pub mod control;
pub mod cursor;
pub mod entry;
pub mod filter;
pub mod paged;
pub mod range;
pub mod tls;

pub use client::LdapDirectory;
pub use cursor::PageCursor;
pub use entry::DirectoryEntry;
pub use filter::Filter;
pub use paged::PagedSearch;
pub use range::{RangeFragment, resolve_ranged_attributes};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Ошибка транспорта или bind
    #[error("directory connection error: {0}")]
    Connection(String),
    /// Сервер отклонил запрос
    #[error("directory search failed (result code {code}): {message}")]
    Search { code: u32, message: String },
    /// Контрол постраничной выдачи отсутствует или битый
    #[error("directory protocol error: {0}")]
    Protocol(String),
    #[error("directory search cancelled")]
    Cancelled,
    #[error("directory search aborted after an earlier failure")]
    Aborted,
}

/// Какие атрибуты должен вернуть поиск
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Attributes {
    #[default]
    All,
    Only(Vec<String>),
}

impl Attributes {
    /// Список атрибутов в том виде, какой ждёт протокол
    pub fn to_request(&self) -> Vec<String> {
        match self {
            Attributes::All => vec!["*".to_string()],
            Attributes::Only(names) => names.clone(),
        }
    }
}

/// Параметры одного логического (многостраничного) поиска
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Корень поиска; при `None` берётся base DN соединения
    pub base_dn: Option<String>,
    pub filter: String,
    pub attributes: Attributes,
    /// Не больше максимального размера страницы сервера, иначе сервер
    /// может молча обрезать выдачу.
    pub page_size: u32,
}

impl SearchRequest {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            base_dn: None,
            filter: filter.into(),
            attributes: Attributes::All,
            page_size: 250,
        }
    }

    pub fn base_dn(mut self, base_dn: Option<String>) -> Self {
        self.base_dn = base_dn;
        self
    }

    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Страница сырых записей и курсор на следующую
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub entries: Vec<DirectoryEntry>,
    pub next: PageCursor,
}

/// Привязанное соединение с сервером каталога.
///
/// Состояние пагинации относится к одному запросу, поэтому реализация
/// обслуживает один поиск за раз (`&mut self`).
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Получить одну страницу. Один сетевой запрос на вызов
    async fn search(
        &mut self,
        request: &SearchRequest,
        cursor: &PageCursor,
    ) -> Result<SearchPage, DirectoryError>;

    /// Прочитать одну запись (scope base), только `attributes`
    async fn read_entry(
        &mut self,
        dn: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>, DirectoryError>;
}
