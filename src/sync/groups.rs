// src/sync/groups.rs

use crate::models::{GroupMapping, GroupMembership};
use crate::store::{RecordStore, StoreError};
use std::collections::BTreeSet;
use tracing::{debug, warn};
use uuid::Uuid;

/// Изменения связей одной записи
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MembershipPlan {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl MembershipPlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: usize,
    pub removed: usize,
    /// Группы из маппинга, которых нет локально
    pub skipped: usize,
}

/// Приводит связи записи с группами (из каталога) в соответствие
/// с атрибутом членства.
#[derive(Debug, Clone, Default)]
pub struct GroupMembershipReconciler {
    mappings: Vec<GroupMapping>,
    default_group: Option<String>,
}

impl GroupMembershipReconciler {
    pub fn new(mappings: Vec<GroupMapping>, default_group: Option<String>) -> Self {
        Self {
            mappings,
            default_group: default_group.filter(|code| !code.is_empty()),
        }
    }

    pub fn has_default_group(&self) -> bool {
        self.default_group.is_some()
    }

    /// Коды локальных групп для переданных DN групп
    pub fn target_groups(&self, member_of: &[String]) -> BTreeSet<String> {
        let mut target: BTreeSet<String> = self
            .mappings
            .iter()
            .filter(|mapping| member_of.iter().any(|dn| dn.eq_ignore_ascii_case(&mapping.dn)))
            .map(|mapping| mapping.group.clone())
            .collect();
        target.extend(self.default_group.iter().cloned());
        target
    }

    /// Считает изменения, не трогая хранилище.
    ///
    /// `member_of == None`: у записи нет атрибута членства. Тогда только
    /// добавляется группа по умолчанию, ничего не удаляется.
    pub fn plan(
        &self,
        member_of: Option<&[String]>,
        current: &[GroupMembership],
    ) -> MembershipPlan {
        let target = match member_of {
            Some(dns) => self.target_groups(dns),
            None => self.default_group.iter().cloned().collect(),
        };

        // Любая существующая связь блокирует добавление, флаг локальной не меняется
        let add = target
            .iter()
            .filter(|code| !current.iter().any(|m| &m.group == *code))
            .cloned()
            .collect();

        let remove = match member_of {
            Some(_) => current
                .iter()
                .filter(|m| m.directory_managed && !target.contains(&m.group))
                .map(|m| m.group.clone())
                .collect(),
            None => Vec::new(),
        };

        MembershipPlan { add, remove }
    }

    pub async fn reconcile<S>(
        &self,
        store: &S,
        record: Uuid,
        member_of: Option<&[String]>,
    ) -> Result<ReconcileOutcome, StoreError>
    where
        S: RecordStore + ?Sized,
    {
        let current = store.memberships(record).await?;
        let plan = self.plan(member_of, &current);
        let mut outcome = ReconcileOutcome::default();

        if plan.is_empty() {
            return Ok(outcome);
        }

        for code in plan.add {
            if store.find_group(&code).await?.is_none() {
                warn!(%record, group = %code, "mapped group does not exist locally, skipping");
                outcome.skipped += 1;
                continue;
            }
            store
                .add_membership(record, GroupMembership::directory(code.as_str()))
                .await?;
            debug!(%record, group = %code, "added directory-managed membership");
            outcome.added += 1;
        }

        for code in plan.remove {
            store.remove_membership(record, &code).await?;
            debug!(%record, group = %code, "removed directory-managed membership");
            outcome.removed += 1;
        }

        Ok(outcome)
    }
}
