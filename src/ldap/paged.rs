// src/ldap/paged.rs

use crate::ldap::range::resolve_ranged_attributes;
use crate::ldap::{DirectoryConnection, DirectoryEntry, DirectoryError, PageCursor, SearchRequest};
use futures_util::Stream;
use futures_util::stream;
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ленивый проход вперёд по всем записям одного поиска.
///
/// Страницы запрашиваются, когда буфер пустеет. После ошибки поиск
/// завершён; `rewind` начинает заново и повторяет все запросы.
pub struct PagedSearch<'a, C: ?Sized> {
    connection: &'a mut C,
    request: SearchRequest,
    resolve_ranges: bool,
    cancel: Option<CancellationToken>,
    cursor: PageCursor,
    buffer: VecDeque<DirectoryEntry>,
    failed: bool,
    pages: usize,
}

impl<'a, C> PagedSearch<'a, C>
where
    C: DirectoryConnection + ?Sized,
{
    pub fn new(connection: &'a mut C, request: SearchRequest) -> Self {
        Self {
            connection,
            request,
            resolve_ranges: false,
            cancel: None,
            cursor: PageCursor::NotStarted,
            buffer: VecDeque::new(),
            failed: false,
            pages: 0,
        }
    }

    /// Собирать `;range=` атрибуты перед выдачей записей
    pub fn resolve_ranged_attributes(mut self, enabled: bool) -> Self {
        self.resolve_ranges = enabled;
        self
    }

    /// Проверяется перед каждой страницей
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Сколько страниц получено с (пере)запуска поиска
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    pub async fn next_entry(&mut self) -> Result<Option<DirectoryEntry>, DirectoryError> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Ok(Some(entry));
            }
            if self.failed {
                return Err(DirectoryError::Aborted);
            }
            if self.cursor.is_exhausted() {
                return Ok(None);
            }
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                self.failed = true;
                return Err(DirectoryError::Cancelled);
            }

            if let Err(e) = self.fetch_page().await {
                self.failed = true;
                self.buffer.clear();
                return Err(e);
            }
        }
    }

    /// Назад в `NotStarted`. Следующий вызов повторит весь поиск
    pub fn rewind(&mut self) {
        self.cursor = PageCursor::NotStarted;
        self.buffer.clear();
        self.failed = false;
        self.pages = 0;
    }

    async fn fetch_page(&mut self) -> Result<(), DirectoryError> {
        let page = self.connection.search(&self.request, &self.cursor).await?;
        self.pages += 1;

        debug!(
            filter = %self.request.filter,
            page = self.pages,
            entries = page.entries.len(),
            more = !page.next.is_exhausted(),
            "fetched search page"
        );

        for entry in page.entries {
            let entry = if self.resolve_ranges {
                resolve_ranged_attributes(&mut *self.connection, entry).await?
            } else {
                entry
            };
            self.buffer.push_back(entry);
        }

        // Страница без cookie завершает поиск, даже если cookie не было вовсе
        self.cursor = match page.next {
            PageCursor::NotStarted => PageCursor::Exhausted,
            next => next,
        };
        Ok(())
    }

    /// Поиск как `Stream`, который заканчивается после первой ошибки
    pub fn into_stream(self) -> impl Stream<Item = Result<DirectoryEntry, DirectoryError>> + 'a
    where
        C: 'a,
    {
        stream::unfold(Some(self), |state| async move {
            let mut search = state?;
            match search.next_entry().await {
                Ok(Some(entry)) => Some((Ok(entry), Some(search))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
