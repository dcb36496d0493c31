// src/ldap/cursor.rs

/// Позиция постраничного поиска.
///
/// `NotStarted` и `Exhausted` различаются: сервер отдаёт только cookie,
/// и пустой cookie значит, что страниц больше нет.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageCursor {
    #[default]
    NotStarted,
    InProgress(Vec<u8>),
    Exhausted,
}

impl PageCursor {
    /// Курсор после страницы с `cookie`
    pub fn from_cookie(cookie: Vec<u8>) -> Self {
        if cookie.is_empty() {
            PageCursor::Exhausted
        } else {
            PageCursor::InProgress(cookie)
        }
    }

    /// Cookie для следующего запроса (пустой для первой страницы)
    pub fn cookie(&self) -> &[u8] {
        match self {
            PageCursor::InProgress(cookie) => cookie,
            _ => &[],
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, PageCursor::Exhausted)
    }
}
