/// Client group store: the working copies of every group this client knows.
///
/// Ledger contents only change through operations: every entity mutation
/// builds an `Operation` and appends it to the group's pending log. Reads
/// go through the evaluation cache and return materialized groups; the raw
/// log is never handed to readers.
///
/// All mutators take `&mut self`, so a group's `(base, operations)` pair is
/// always replaced as one unit. Callers sharing the store across threads
/// wrap the whole store in a single `Mutex`.
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::sync::cache::{CacheStats, EvaluationCache};
use crate::sync::config::SyncConfig;
use crate::sync::ids::{IdGenerator, OpHash, UuidGenerator};
use crate::sync::limits::{check_log_limits, LogLimitStatus};
use crate::sync::model::{
    ClientGroup, ClientGroupChanges, Group, Member, MemberChanges, Transaction,
    TransactionChanges,
};
use crate::sync::ops::{now_ms, OpError, Operation, OperationPayload};
use crate::sync::reconcile::{on_server_update, ReconcileOutcome, ServerUpdate};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No group id given and no current group selected")]
    NoCurrentGroup,

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Group {0} already has a working copy")]
    GroupExists(String),

    #[error("Pending log for {0} is full; sync before editing further")]
    LogFull(String),

    #[error("Invalid operation: {0}")]
    Op(#[from] OpError),
}

/// Sync bookkeeping for one group, without exposing the log itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub lastchanged: i64,
    pub lastsync: Option<i64>,
    pub pending: usize,
    pub syncing: usize,
    pub limit: LogLimitStatus,
}

// ---------------------------------------------------------------------------
// ClientGroupStore
// ---------------------------------------------------------------------------

pub struct ClientGroupStore {
    groups: BTreeMap<String, ClientGroup>,
    current_id: Option<String>,
    user_id: Option<String>,
    config: SyncConfig,
    cache: EvaluationCache,
    ids: Box<dyn IdGenerator>,
}

impl Default for ClientGroupStore {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl ClientGroupStore {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_id_generator(config, Box::new(UuidGenerator))
    }

    pub fn with_id_generator(config: SyncConfig, ids: Box<dyn IdGenerator>) -> Self {
        ClientGroupStore {
            groups: BTreeMap::new(),
            current_id: None,
            user_id: None,
            cache: EvaluationCache::new(config.cache_capacity),
            config,
            ids,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Signed-in user, used to attribute new transactions.
    pub fn set_user(&mut self, user_id: Option<String>) {
        self.user_id = user_id;
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.groups.contains_key(id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // -----------------------------------------------------------------------
    // Group lifecycle
    // -----------------------------------------------------------------------

    pub fn switch_to(&mut self, id: Option<&str>) {
        self.current_id = id.map(str::to_string);
    }

    /// Create a working copy for a locally created group and select it.
    /// Returns the group id (generated when `group.id` is empty).
    ///
    /// An id that already has a working copy is refused, since replacing it
    /// would discard that copy's unsynced operations; `remove` it first.
    pub fn add(&mut self, mut group: Group) -> Result<String, StoreError> {
        if group.id.is_empty() {
            group.id = self.ids.group_id();
        }
        if self.groups.contains_key(&group.id) {
            log::warn!("refusing to replace existing working copy {}", group.id);
            return Err(StoreError::GroupExists(group.id));
        }
        if group.timestamp == 0 {
            group.timestamp = now_ms();
        }
        let id = group.id.clone();
        let client = ClientGroup::new(group, now_ms());

        self.groups.insert(id.clone(), client);
        self.cache.ensure_capacity(self.groups.len());
        self.current_id = Some(id.clone());

        log::info!("group {} added", id);
        Ok(id)
    }

    /// Remove a group (the current one when `id` is `None`). Always clears the
    /// current selection.
    pub fn remove(&mut self, id: Option<&str>) -> Option<ClientGroup> {
        let id = id.map(str::to_string).or_else(|| self.current_id.clone());
        self.current_id = None;

        let id = id?;
        self.cache.invalidate(&id);
        let removed = self.groups.remove(&id);
        if removed.is_some() {
            log::info!("group {} removed", id);
        }
        removed
    }

    /// Edit working-copy metadata (options, online flag).
    pub fn edit(&mut self, id: Option<&str>, changes: &ClientGroupChanges) -> Result<(), StoreError> {
        let id = self.resolve_id(id)?;
        let group = self
            .groups
            .get_mut(&id)
            .ok_or_else(|| StoreError::UnknownGroup(id.clone()))?;
        changes.apply_to(group);
        Ok(())
    }

    /// Drop every group shared with the server, e.g. on sign-out. Local-only
    /// groups are kept. Returns how many were removed.
    pub fn remove_online_groups(&mut self) -> usize {
        let online: Vec<String> = self
            .groups
            .values()
            .filter(|g| g.online)
            .map(|g| g.id.clone())
            .collect();

        for id in &online {
            self.groups.remove(id);
            self.cache.invalidate(id);
        }
        if let Some(current) = &self.current_id {
            if !self.groups.contains_key(current) {
                self.current_id = None;
            }
        }

        log::info!("removed {} online groups", online.len());
        online.len()
    }

    // -----------------------------------------------------------------------
    // Entity mutations, each appends exactly one operation
    // -----------------------------------------------------------------------

    pub fn add_member(&mut self, id: Option<&str>, mut member: Member) -> Result<OpHash, StoreError> {
        if member.uid.is_empty() {
            member.uid = self.ids.member_id();
        }
        self.append(id, OperationPayload::InsertMember(member))
    }

    pub fn remove_member(&mut self, id: Option<&str>, member_id: &str) -> Result<OpHash, StoreError> {
        self.append(id, OperationPayload::RemoveMember(member_id.to_string()))
    }

    pub fn edit_member(
        &mut self,
        id: Option<&str>,
        member_id: &str,
        changes: MemberChanges,
    ) -> Result<OpHash, StoreError> {
        self.append(
            id,
            OperationPayload::ModifyMember {
                id: member_id.to_string(),
                changes,
            },
        )
    }

    /// Record a new transaction. Fills in a missing id, timestamp and creator,
    /// and bumps the group's `lastchanged`.
    pub fn new_transaction(
        &mut self,
        id: Option<&str>,
        mut tx: Transaction,
    ) -> Result<OpHash, StoreError> {
        let group_id = self.resolve_id(id)?;
        if !self.groups.contains_key(&group_id) {
            return Err(StoreError::UnknownGroup(group_id));
        }

        if tx.id.is_empty() {
            tx.id = self.ids.transaction_id();
        }
        if tx.timestamp == 0 {
            tx.timestamp = now_ms();
        }
        if tx.creator.is_empty() {
            if let Some(user) = &self.user_id {
                tx.creator = user.clone();
            }
        }

        let hash = self.append(Some(&group_id), OperationPayload::InsertTransaction(tx))?;
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.lastchanged = now_ms();
        }
        Ok(hash)
    }

    pub fn edit_transaction(
        &mut self,
        id: Option<&str>,
        transaction_id: &str,
        changes: TransactionChanges,
    ) -> Result<OpHash, StoreError> {
        self.append(
            id,
            OperationPayload::ModifyTransaction {
                id: transaction_id.to_string(),
                changes,
            },
        )
    }

    /// Swap a locally minted member id for the one the server issued.
    pub fn change_member_id(
        &mut self,
        id: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<OpHash, StoreError> {
        self.append(
            id,
            OperationPayload::ChangeMemberId {
                from: from.to_string(),
                to: to.to_string(),
            },
        )
    }

    fn append(&mut self, id: Option<&str>, payload: OperationPayload) -> Result<OpHash, StoreError> {
        let id = self.resolve_id(id)?;
        let group = self
            .groups
            .get_mut(&id)
            .ok_or_else(|| StoreError::UnknownGroup(id.clone()))?;

        match check_log_limits(group.operations.len(), &self.config.log_limits) {
            LogLimitStatus::HardCapReached if !payload.name().is_member_op() => {
                return Err(StoreError::LogFull(id));
            }
            LogLimitStatus::Ok => {}
            _ => {
                log::warn!(
                    "group {} has {} unsynced ops",
                    id,
                    group.operations.len()
                );
            }
        }

        let op = Operation::create(payload)?;
        let hash = op.hash.clone();
        log::debug!("group {}: appended {} {}", id, op.name(), hash);
        group.push_operation(op);
        Ok(hash)
    }

    fn resolve_id(&self, id: Option<&str>) -> Result<String, StoreError> {
        id.map(str::to_string)
            .or_else(|| self.current_id.clone())
            .ok_or(StoreError::NoCurrentGroup)
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Merge an inbound server snapshot. See `reconcile::on_server_update`.
    pub fn on_server_update(&mut self, update: ServerUpdate) -> ReconcileOutcome {
        let outcome = on_server_update(self, update);
        if let ReconcileOutcome::Applied { created: true, .. } = outcome {
            self.cache.ensure_capacity(self.groups.len());
        }
        outcome
    }

    /// Hand the current pending log to the transport. The ops stay pending
    /// until a server snapshot acknowledges their hashes.
    pub fn begin_sync(&mut self, id: &str) -> Result<Vec<Arc<Operation>>, StoreError> {
        let group = self
            .groups
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownGroup(id.to_string()))?;
        group.syncing_operations = group.operations.as_ref().clone();
        Ok(group.syncing_operations.clone())
    }

    pub fn pending_hashes(&self, id: &str) -> Vec<OpHash> {
        self.groups
            .get(id)
            .map(ClientGroup::pending_hashes)
            .unwrap_or_default()
    }

    pub fn sync_status(&self, id: &str) -> Option<SyncStatus> {
        self.groups.get(id).map(|g| SyncStatus {
            lastchanged: g.lastchanged,
            lastsync: g.lastsync,
            pending: g.operations.len(),
            syncing: g.syncing_operations.len(),
            limit: check_log_limits(g.operations.len(), &self.config.log_limits),
        })
    }

    pub(crate) fn groups_mut(&mut self) -> &mut BTreeMap<String, ClientGroup> {
        &mut self.groups
    }

    pub(crate) fn groups(&self) -> &BTreeMap<String, ClientGroup> {
        &self.groups
    }

    pub(crate) fn restore_parts(&mut self, groups: Vec<ClientGroup>, current_id: Option<String>) {
        self.cache.clear();
        self.groups = groups.into_iter().map(|g| (g.id.clone(), g)).collect();
        self.current_id = current_id.filter(|id| self.groups.contains_key(id));
        self.cache.ensure_capacity(self.groups.len());
    }

    // -----------------------------------------------------------------------
    // Getters, all materialized through the evaluation cache
    // -----------------------------------------------------------------------

    fn materialize(&self, client: &ClientGroup) -> Option<Arc<Group>> {
        match self.cache.evaluate(
            &client.id,
            client.base.as_ref(),
            &client.operations,
            self.config.reference_policy,
        ) {
            Ok(group) => group,
            Err(e) => {
                log::error!("group {} failed to evaluate: {}", client.id, e);
                None
            }
        }
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<Group>> {
        self.groups.get(id).and_then(|g| self.materialize(g))
    }

    pub fn current(&self) -> Option<Arc<Group>> {
        self.current_id.as_deref().and_then(|id| self.by_id(id))
    }

    /// Every materializable group, most recently changed first.
    pub fn all(&self) -> Vec<Arc<Group>> {
        let mut clients: Vec<&ClientGroup> = self.groups.values().collect();
        clients.sort_by(|a, b| b.lastchanged.cmp(&a.lastchanged));
        clients
            .into_iter()
            .filter_map(|g| self.materialize(g))
            .collect()
    }

    pub fn member_by_id(&self, group_id: Option<&str>, member_id: &str) -> Option<Member> {
        let id = self.resolve_id(group_id).ok()?;
        self.by_id(&id)?.member(member_id).cloned()
    }

    /// Members of a group that are not soft-deleted.
    pub fn active_members_of(&self, group_id: Option<&str>) -> Vec<Member> {
        let group = match self.resolve_id(group_id).ok().and_then(|id| self.by_id(&id)) {
            Some(g) => g,
            None => return Vec::new(),
        };
        group.active_members().cloned().collect()
    }

    pub fn active_members(&self) -> Vec<Member> {
        self.active_members_of(None)
    }

    /// Join link for the current group; only online groups can be shared.
    pub fn current_share_link(&self) -> Option<String> {
        let id = self.current_id.as_deref()?;
        let client = self.groups.get(id)?;
        let group = self.materialize(client)?;
        if !(client.online || group.online) {
            return None;
        }
        Some(format!(
            "{}/#/join?id={}",
            self.config.share_origin.trim_end_matches('/'),
            group.id
        ))
    }

    pub fn log_status(&self, id: &str) -> Option<LogLimitStatus> {
        self.groups
            .get(id)
            .map(|g| check_log_limits(g.operations.len(), &self.config.log_limits))
    }
}

impl std::fmt::Debug for ClientGroupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientGroupStore")
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .field("current_id", &self.current_id)
            .field("cache", &self.cache)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
