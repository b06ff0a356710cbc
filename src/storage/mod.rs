//! Persistence contract for the client group store.
//!
//! Durable storage is owned by the application (IndexedDB on web, SQLite on
//! mobile). The core only defines what gets saved (a `StoreSnapshot` of every
//! working copy with its base and pending log) and the trait the
//! application implements to save and load it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::config::SyncConfig;
use crate::sync::model::ClientGroup;
use crate::sync::store::ClientGroupStore;

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Snapshot encode failed: {0}")]
    Encode(String),
    #[error("Snapshot decode failed: {0}")]
    Decode(String),
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    /// Backend failure reported by an application `SnapshotStore`.
    #[error("Storage I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// StoreSnapshot
// ---------------------------------------------------------------------------

/// Everything needed to rebuild a `ClientGroupStore` across sessions.
/// The evaluation cache is not persisted; it refills on first read.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoreSnapshot {
    pub version: u32,
    pub current_id: Option<String>,
    pub groups: Vec<ClientGroup>,
}

impl StoreSnapshot {
    pub fn capture(store: &ClientGroupStore) -> Self {
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            current_id: store.current_id().map(str::to_string),
            groups: store.groups().values().cloned().collect(),
        }
    }

    /// Rebuild a store. Pending ops whose stored hash no longer matches their
    /// payload are discarded with a warning.
    pub fn restore(self, config: SyncConfig) -> ClientGroupStore {
        let mut groups = self.groups;
        for group in &mut groups {
            let ops: Vec<_> = group
                .operations
                .iter()
                .filter(|op| match op.verify_hash() {
                    Ok(true) => true,
                    _ => {
                        log::warn!("group {}: discarding corrupt op {}", group.id, op.hash);
                        false
                    }
                })
                .cloned()
                .collect();
            if ops.len() != group.operations.len() {
                group.operations = std::sync::Arc::new(ops);
            }
        }

        let mut store = ClientGroupStore::new(config);
        store.restore_parts(groups, self.current_id);
        store
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StorageError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: StoreSnapshot =
            serde_json::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::Version {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Snapshot storage contract (app implements)
// ---------------------------------------------------------------------------

/// Durable home for the store snapshot.
pub trait SnapshotStore {
    /// Load the last saved snapshot, `None` on first run.
    fn load(&self) -> Result<Option<StoreSnapshot>>;

    fn save(&mut self, snapshot: &StoreSnapshot) -> Result<()>;

    /// Wipe persisted state (sign-out).
    fn clear(&mut self) -> Result<()>;
}

/// In-memory `SnapshotStore` holding the encoded bytes, for tests and for
/// shells without durable storage.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    bytes: Option<Vec<u8>>,
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<StoreSnapshot>> {
        self.bytes
            .as_deref()
            .map(StoreSnapshot::from_bytes)
            .transpose()
    }

    fn save(&mut self, snapshot: &StoreSnapshot) -> Result<()> {
        self.bytes = Some(snapshot.to_bytes()?);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.bytes = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::model::{Group, Member, Participant, Transaction};
    use crate::sync::ops::OperationPayload;

    fn populated_store() -> ClientGroupStore {
        let mut store = ClientGroupStore::default();
        store.add(Group::new("g1", "Trip").with_member(Member::new("a", "A"))).unwrap();
        store.add_member(None, Member::new("b", "B")).unwrap();
        let mut tx = Transaction::new("t1");
        tx.creditors = vec![Participant::new("a", 12.0)];
        tx.debtors = vec![Participant::new("b", 12.0)];
        store.new_transaction(None, tx).unwrap();
        store
    }

    #[test]
    fn test_snapshot_roundtrip_through_memory_store() {
        let store = populated_store();
        let mut backend = MemorySnapshotStore::default();
        assert!(backend.load().unwrap().is_none());

        backend.save(&StoreSnapshot::capture(&store)).unwrap();
        let restored = backend
            .load()
            .unwrap()
            .unwrap()
            .restore(SyncConfig::default());

        assert_eq!(restored.current_id(), Some("g1"));
        assert_eq!(restored.pending_hashes("g1"), store.pending_hashes("g1"));
        assert_eq!(*restored.current().unwrap(), *store.current().unwrap());

        backend.clear().unwrap();
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn test_restore_discards_corrupt_ops() {
        let store = populated_store();
        let mut snapshot = StoreSnapshot::capture(&store);
        let mut ops = snapshot.groups[0].operations.as_ref().clone();
        let mut tampered = ops[0].as_ref().clone();
        tampered.payload = OperationPayload::InsertMember(Member::new("b", "Mallory"));
        ops[0] = std::sync::Arc::new(tampered);
        snapshot.groups[0].operations = std::sync::Arc::new(ops);

        let restored = snapshot.restore(SyncConfig::default());
        assert_eq!(restored.pending_hashes("g1").len(), 1);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut snapshot = StoreSnapshot::capture(&populated_store());
        snapshot.version = SNAPSHOT_VERSION + 1;
        let bytes = snapshot.to_bytes().unwrap();
        let err = StoreSnapshot::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, StorageError::Version { .. }));
    }

    /// Backend whose medium is gone, like a revoked IndexedDB quota.
    struct UnavailableStore;

    impl SnapshotStore for UnavailableStore {
        fn load(&self) -> Result<Option<StoreSnapshot>> {
            Err(StorageError::Io("database closed".into()))
        }

        fn save(&mut self, _snapshot: &StoreSnapshot) -> Result<()> {
            Err(StorageError::Io("quota exceeded".into()))
        }

        fn clear(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_backend_io_errors_propagate() {
        let mut backend = UnavailableStore;
        let err = backend
            .save(&StoreSnapshot::capture(&populated_store()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Storage I/O error: quota exceeded");
        assert!(matches!(backend.load(), Err(StorageError::Io(_))));
    }

    #[test]
    fn test_restore_drops_dangling_current_id() {
        let mut snapshot = StoreSnapshot::capture(&populated_store());
        snapshot.current_id = Some("gone".into());
        let restored = snapshot.restore(SyncConfig::default());
        assert_eq!(restored.current_id(), None);
    }
}
