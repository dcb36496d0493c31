// src/sync/mod.rs

pub mod groups;
pub mod mapping;

pub use groups::{GroupMembershipReconciler, MembershipPlan, ReconcileOutcome};
pub use mapping::{FieldKind, FieldMapping, apply_mappings};

use crate::config::AppConfig;
use crate::ldap::filter::FilterError;
use crate::ldap::{
    Attributes, DirectoryConnection, DirectoryEntry, DirectoryError, Filter, PagedSearch,
    SearchRequest,
};
use crate::models::{GroupMapping, SyncRecord};
use crate::store::{RecordStore, SaveOutcome, StoreError};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Ошибка соединения или поиска. Прерывает прогон
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("entry {dn} has no {attribute} value")]
    MissingIdentifier { dn: String, attribute: String },
    #[error("failed to persist record for {dn}: {source}")]
    Persistence {
        dn: String,
        guid: String,
        source: StoreError,
    },
    #[error("failed to reconcile groups for {dn}: {source}")]
    Reconciliation { dn: String, source: StoreError },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid users filter: {0}")]
    Filter(#[from] FilterError),
    #[error("an email address is required")]
    MissingEmail,
    #[error("No user found in LDAP for email {0}")]
    NotFound(String),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Directory(DirectoryError::Cancelled))
    }
}

// === Параметры ===

/// Настройки движка, обычно из [`AppConfig`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub page_size: u32,
    pub resolve_ranged_attributes: bool,
    pub users_filter: String,
    /// `None` ищет от base DN соединения
    pub search_bases: Vec<Option<String>>,
    pub guid_attribute: String,
    pub email_attribute: String,
    pub email_field: String,
    pub member_of_attribute: String,
    pub reset_missing_attributes: bool,
    pub destructive: bool,
    pub field_mappings: Vec<FieldMapping>,
    pub group_mappings: Vec<GroupMapping>,
    pub default_group: Option<String>,
}

impl SyncOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let sync = &config.sync;
        Self {
            page_size: config.ldap.page_size,
            resolve_ranged_attributes: config.ldap.resolve_ranged_attributes,
            users_filter: sync.users_filter.clone(),
            search_bases: config.users_search_bases(),
            guid_attribute: sync.guid_attribute.to_ascii_lowercase(),
            email_attribute: sync.email_attribute.to_ascii_lowercase(),
            email_field: sync.email_field.clone(),
            member_of_attribute: sync.member_of_attribute.to_ascii_lowercase(),
            reset_missing_attributes: sync.reset_missing_attributes,
            destructive: sync.destructive,
            field_mappings: sync.field_mappings.clone(),
            group_mappings: sync.group_mappings.clone(),
            default_group: sync.default_group.clone(),
        }
    }

    /// Атрибуты, которые запрашивает любой поиск синхронизации
    pub fn requested_attributes(&self) -> Vec<String> {
        let mut names = vec![
            self.guid_attribute.clone(),
            self.email_attribute.clone(),
            self.member_of_attribute.clone(),
        ];
        for mapping in &self.field_mappings {
            let name = mapping.attribute.to_ascii_lowercase();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    fn request(&self, filter: String, base_dn: Option<String>) -> SearchRequest {
        SearchRequest::new(filter)
            .base_dn(base_dn)
            .attributes(Attributes::Only(self.requested_attributes()))
            .page_size(self.page_size)
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// === Отчёты ===

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Пропущенные или не сохранённые записи
    pub failed: usize,
    pub group_failures: usize,
    pub cancelled: bool,
    pub duration: Duration,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Done. Created {} records. Updated {} records. Deleted {} records. \
             Duration: {:.2} seconds",
            self.created,
            self.updated,
            self.deleted,
            self.duration.as_secs_f64()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Done. Migrated {} records. Duration: {:.2} seconds",
            self.migrated,
            self.duration.as_secs_f64()
        )
    }
}

/// Результат синхронизации одной записи
#[derive(Debug, Clone)]
pub struct SingleSync {
    pub entry: DirectoryEntry,
    pub record: SyncRecord,
    pub outcome: SaveOutcome,
}

// === Обработка одной записи ===

struct Processed {
    record: SyncRecord,
    outcome: SaveOutcome,
    groups: Result<ReconcileOutcome, StoreError>,
}

/// Общая обработка записи для всех режимов синхронизации
struct EntryProcessor<'a, S: ?Sized> {
    store: &'a S,
    options: &'a SyncOptions,
    reconciler: &'a GroupMembershipReconciler,
}

impl<S> EntryProcessor<'_, S>
where
    S: RecordStore + ?Sized,
{
    async fn process(&self, entry: &DirectoryEntry) -> Result<Processed, SyncError> {
        let dn = entry.dn();
        let guid = entry
            .first(&self.options.guid_attribute)
            .filter(|guid| !guid.is_empty())
            .ok_or_else(|| SyncError::MissingIdentifier {
                dn: dn.to_string(),
                attribute: self.options.guid_attribute.clone(),
            })?;

        let persistence = |source: StoreError| SyncError::Persistence {
            dn: dn.to_string(),
            guid: guid.to_string(),
            source,
        };

        let mut record = self
            .store
            .find_by_guid(guid)
            .await
            .map_err(persistence)?
            .unwrap_or_else(|| SyncRecord::with_guid(guid));

        record.dn = Some(dn.to_string());
        let changed = apply_mappings(
            &mut record,
            entry,
            &self.options.field_mappings,
            self.options.reset_missing_attributes,
        );
        record.last_synced = Some(Utc::now());

        let outcome = self.store.save(&record).await.map_err(persistence)?;
        match outcome {
            SaveOutcome::Created => info!(%guid, dn, "Created new record {}", record.id),
            SaveOutcome::Updated => {
                info!(%guid, dn, changed, "Updated existing record {}", record.id)
            }
        }

        let member_of = entry.get(&self.options.member_of_attribute);
        let groups = if member_of.is_some() || self.reconciler.has_default_group() {
            self.reconciler
                .reconcile(self.store, record.id, member_of)
                .await
        } else {
            Ok(ReconcileOutcome::default())
        };

        Ok(Processed {
            record,
            outcome,
            groups,
        })
    }
}

// === Движок ===

pub struct DirectorySyncEngine<C, S> {
    connection: C,
    store: S,
    options: SyncOptions,
    reconciler: GroupMembershipReconciler,
    cancel: Option<CancellationToken>,
}

impl<C, S> DirectorySyncEngine<C, S>
where
    C: DirectoryConnection,
    S: RecordStore,
{
    pub fn new(connection: C, store: S, options: SyncOptions) -> Self {
        let reconciler = GroupMembershipReconciler::new(
            options.group_mappings.clone(),
            options.default_group.clone(),
        );
        Self {
            connection,
            store,
            options,
            reconciler,
            cancel: None,
        }
    }

    /// Проверяется между страницами и между записями
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn into_parts(self) -> (C, S) {
        (self.connection, self.store)
    }

    /// Полная синхронизация по всем местам поиска пользователей.
    ///
    /// Ошибки отдельных записей считаются и логируются. Ошибка каталога
    /// прерывает прогон и возвращается после записи итогов в лог.
    pub async fn sync_all(&mut self) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let mut report = SyncReport::default();
        let mut seen = HashSet::new();

        info!(
            destructive = self.options.destructive,
            bases = self.options.search_bases.len(),
            "starting full directory sync"
        );

        match self.walk_users(&mut report, &mut seen).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                warn!("sync cancelled, {} entries already persisted", seen.len());
                report.cancelled = true;
            }
            Err(e) => {
                report.duration = started.elapsed();
                error!(error = %e, "sync aborted");
                info!(failed = report.failed, "{report}");
                return Err(e);
            }
        }

        if self.options.destructive && !report.cancelled {
            self.sweep(&seen, &mut report).await;
        }

        report.duration = started.elapsed();
        info!(
            failed = report.failed,
            group_failures = report.group_failures,
            cancelled = report.cancelled,
            "{report}"
        );
        Ok(report)
    }

    async fn walk_users(
        &mut self,
        report: &mut SyncReport,
        seen: &mut HashSet<String>,
    ) -> Result<(), SyncError> {
        let processor = EntryProcessor {
            store: &self.store,
            options: &self.options,
            reconciler: &self.reconciler,
        };

        for base in &self.options.search_bases {
            let request = self
                .options
                .request(self.options.users_filter.clone(), base.clone());
            let mut search = PagedSearch::new(&mut self.connection, request)
                .resolve_ranged_attributes(self.options.resolve_ranged_attributes);
            if let Some(token) = &self.cancel {
                search = search.with_cancellation(token.clone());
            }

            while let Some(entry) = search.next_entry().await? {
                match processor.process(&entry).await {
                    Ok(processed) => {
                        if let Some(guid) = processed.record.guid {
                            seen.insert(guid);
                        }
                        match processed.outcome {
                            SaveOutcome::Created => report.created += 1,
                            SaveOutcome::Updated => report.updated += 1,
                        }
                        if let Err(e) = processed.groups {
                            error!(dn = entry.dn(), error = %e, "group reconciliation failed");
                            report.group_failures += 1;
                        }
                    }
                    Err(SyncError::Persistence { dn, guid, source }) => {
                        // Всё равно отмечаем: ошибка записи не должна привести к удалению
                        error!(%dn, %guid, error = %source, "failed to persist record");
                        seen.insert(guid);
                        report.failed += 1;
                    }
                    Err(e) => {
                        warn!(dn = entry.dn(), error = %e, "skipping entry");
                        report.failed += 1;
                    }
                }

                if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                    return Err(DirectoryError::Cancelled.into());
                }
            }
            debug!(base = ?base, pages = search.pages_fetched(), "search location done");
        }

        Ok(())
    }

    /// Удаляет записи с GUID, которых не было в этом прогоне
    async fn sweep(&self, seen: &HashSet<String>, report: &mut SyncReport) {
        let records = match self.store.records_with_guid().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "cannot enumerate records, skipping deletions");
                return;
            }
        };

        for record in records {
            let Some(guid) = record.guid.as_deref() else {
                continue;
            };
            if seen.contains(guid) {
                continue;
            }
            match self.store.delete(record.id).await {
                Ok(()) => {
                    warn!(%guid, "Deleted record {} not found in directory", record.id);
                    report.deleted += 1;
                }
                Err(e) => error!(%guid, error = %e, "failed to delete record {}", record.id),
            }
        }
    }

    /// Синхронизировать одного пользователя по `email`
    pub async fn sync_one(&mut self, email: &str) -> Result<SingleSync, SyncError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SyncError::MissingEmail);
        }

        let filter = Filter::parse(&self.options.users_filter)?
            .and(Filter::equality(&self.options.email_attribute, email));

        let Some(entry) = self.find_first(filter.to_string()).await? else {
            warn!("No user found in LDAP for email {email}");
            return Err(SyncError::NotFound(email.to_string()));
        };

        let processor = EntryProcessor {
            store: &self.store,
            options: &self.options,
            reconciler: &self.reconciler,
        };
        let processed = processor.process(&entry).await?;
        processed.groups.map_err(|source| SyncError::Reconciliation {
            dn: entry.dn().to_string(),
            source,
        })?;

        Ok(SingleSync {
            entry,
            record: processed.record,
            outcome: processed.outcome,
        })
    }

    async fn find_first(&mut self, filter: String) -> Result<Option<DirectoryEntry>, SyncError> {
        for base in &self.options.search_bases {
            let request = self.options.request(filter.clone(), base.clone());
            let mut search = PagedSearch::new(&mut self.connection, request)
                .resolve_ranged_attributes(self.options.resolve_ranged_attributes);
            if let Some(entry) = search.next_entry().await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Привязывает локальные записи без GUID к пользователям каталога
    /// с тем же email.
    pub async fn migrate_existing(&mut self) -> Result<MigrationReport, SyncError> {
        let started = Instant::now();
        let mut report = MigrationReport::default();

        let filter = Filter::parse(&self.options.users_filter)?
            .and(Filter::Present(self.options.email_attribute.clone()));

        for base in &self.options.search_bases {
            let request = self.options.request(filter.to_string(), base.clone());
            let mut search = PagedSearch::new(&mut self.connection, request);
            if let Some(token) = &self.cancel {
                search = search.with_cancellation(token.clone());
            }

            while let Some(entry) = search.next_entry().await? {
                let (Some(email), Some(guid)) = (
                    entry.first(&self.options.email_attribute),
                    entry.first(&self.options.guid_attribute),
                ) else {
                    continue;
                };

                match link_record(&self.store, &self.options.email_field, email, guid, entry.dn())
                    .await
                {
                    Ok(true) => report.migrated += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(dn = entry.dn(), error = %e, "failed to migrate record");
                        report.failed += 1;
                    }
                }
            }
        }

        report.duration = started.elapsed();
        info!(failed = report.failed, "{report}");
        Ok(report)
    }
}

async fn link_record<S>(
    store: &S,
    email_field: &str,
    email: &str,
    guid: &str,
    dn: &str,
) -> Result<bool, StoreError>
where
    S: RecordStore + ?Sized,
{
    if store.find_by_guid(guid).await?.is_some() {
        return Ok(false);
    }
    let Some(mut record) = store.find_unlinked_by_email(email_field, email).await? else {
        return Ok(false);
    };

    record.guid = Some(guid.to_string());
    record.dn = Some(dn.to_string());
    store.save(&record).await?;
    info!(%guid, %email, "Migrated record {} to directory user {dn}", record.id);
    Ok(true)
}
