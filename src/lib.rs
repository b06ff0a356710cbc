//! # Ledger Sync
//!
//! **Offline-first synchronization core for shared expense ledgers.**
//!
//! Collaborators edit a group ledger while offline; every edit becomes a
//! content-addressed operation appended to a pending log that sits on top of
//! the last server snapshot. Reads replay the log over the snapshot, and each
//! server push replaces the snapshot and trims the operations the server has
//! already accepted, without ever losing an edit that has not synced yet.
//!
//! ## Quick Start
//!
//! ```rust
//! use ledger_sync::sync::{ClientGroupStore, Group, Member, SyncConfig};
//!
//! let mut store = ClientGroupStore::new(SyncConfig::default());
//! store.add(Group::new("g1", "Road trip")).unwrap();
//! store.add_member(None, Member::new("m1", "Alice")).unwrap();
//!
//! let group = store.current().unwrap();
//! assert_eq!(group.members["m1"].name, "Alice");
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`sync`] | Operation log, evaluator, evaluation cache, reconciler, client store |
//! | [`storage`] | Snapshot persistence contract |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `debug-logs` | No | Per-operation trace logging during evaluation |

// ── Public modules ──────────────────────────────────────────────────────────

/// Operation-log sync engine: operations, evaluation, caching, reconciliation
/// and the client group store.
pub mod sync;

/// Persistence contract and store snapshots.
pub mod storage;

// ── Re-exports for convenience ──────────────────────────────────────────────

pub use sync::{
    evaluate, ClientGroup, ClientGroupStore, EvalError, Group, Member, OpHash, Operation,
    OperationPayload, ReconcileOutcome, ReferencePolicy, ServerUpdate, StoreError, SyncConfig,
    Transaction,
};

pub use storage::{MemorySnapshotStore, SnapshotStore, StorageError, StoreSnapshot};

// ── Library metadata ────────────────────────────────────────────────────────

/// Ledger Sync version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string.
pub fn version() -> &'static str {
    VERSION
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Participant;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().contains('.'));
    }

    #[test]
    fn test_offline_edit_then_sync_cycle() {
        let mut store = ClientGroupStore::new(SyncConfig::default());
        store.add(Group::new("g1", "Flat")).unwrap();
        let alice = store.add_member(None, Member::new("local-a", "Alice")).unwrap();
        let mut tx = Transaction::new("t1");
        tx.creditors = vec![Participant::new("local-a", 30.0)];
        store.new_transaction(None, tx).unwrap();

        // Server accepted the member only and issued its own id for her.
        let present = Group::new("g1", "Flat").with_member(Member::new("local-a", "Alice"));
        store.on_server_update(ServerUpdate::new(present, vec![alice], 10));
        store.change_member_id(None, "local-a", "srv-a").unwrap();

        let group = store.current().unwrap();
        assert_eq!(store.pending_hashes("g1").len(), 2);
        assert!(group.members.contains_key("srv-a"));
        assert_eq!(group.transactions[0].creditors[0].uid, "srv-a");
    }
}
