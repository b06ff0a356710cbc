/// Reconciliation of inbound server snapshots with local pending logs.
///
/// The server reports its materialized group (`present`) together with the
/// hashes of every operation it has already folded into that snapshot. The
/// client adopts `present` as its new base and keeps only the pending ops
/// whose hashes the server has not seen, in their original order.
///
/// Applying the same update twice leaves the store unchanged after the
/// first application, so duplicate or replayed deliveries are harmless.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::sync::ids::OpHash;
use crate::sync::model::{ClientGroup, Group};
use crate::sync::store::ClientGroupStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Server update decode failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Inbound server push: `{ id, present, operations, timestamp }`.
///
/// `id` and `present` are optional on the wire; an update missing either is
/// dropped without touching the store.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ServerUpdate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub present: Option<Group>,
    /// Hashes of operations already incorporated into `present`.
    #[serde(default)]
    pub operations: Vec<OpHash>,
    #[serde(default)]
    pub timestamp: i64,
}

impl ServerUpdate {
    pub fn new(present: Group, operations: Vec<OpHash>, timestamp: i64) -> Self {
        ServerUpdate {
            id: Some(present.id.clone()),
            present: Some(present),
            operations,
            timestamp,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        serde_json::from_str(json).map_err(|e| SyncError::Decode(e.to_string()))
    }
}

/// What a reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Update lacked an id or snapshot; nothing changed.
    Dropped,
    Applied {
        /// A new working copy was created for a previously unknown group.
        created: bool,
        /// Local pending ops the server had already incorporated.
        acknowledged: usize,
        /// Local pending ops still awaiting the server.
        remaining: usize,
    },
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Merge one server update into the store.
pub fn on_server_update(store: &mut ClientGroupStore, update: ServerUpdate) -> ReconcileOutcome {
    let (id, present) = match (update.id, update.present) {
        (Some(id), Some(present)) if !id.is_empty() => (id, present),
        _ => {
            log::warn!("dropping server update without group id or snapshot");
            return ReconcileOutcome::Dropped;
        }
    };
    let timestamp = update.timestamp;
    let server_ops = acknowledged_set(&update.operations);

    let groups = store.groups_mut();
    let created = !groups.contains_key(&id);
    let group = groups
        .entry(id.clone())
        .or_insert_with(|| ClientGroup::server_stub(id.clone(), timestamp));

    let before = group.operations.len();
    let unsynced: Vec<_> = group
        .operations
        .iter()
        .filter(|op| !server_ops.contains(&op.hash))
        .cloned()
        .collect();
    let remaining = unsynced.len();

    group
        .syncing_operations
        .retain(|op| !server_ops.contains(&op.hash));
    group.base = Some(Arc::new(present));
    group.operations = Arc::new(unsynced);
    group.lastsync = Some(timestamp);

    log::info!(
        "group {} reconciled: {} acknowledged, {} pending{}",
        id,
        before - remaining,
        remaining,
        if created { " (new)" } else { "" }
    );

    ReconcileOutcome::Applied {
        created,
        acknowledged: before - remaining,
        remaining,
    }
}

/// Server hashes in canonical lowercase form. Entries that are not a
/// 32-byte hex digest cannot name any local op and are ignored.
fn acknowledged_set(hashes: &[OpHash]) -> HashSet<OpHash> {
    hashes
        .iter()
        .filter_map(|h| match OpHash::from_hex(h.as_str()) {
            Ok(canonical) => Some(canonical),
            Err(e) => {
                log::debug!("ignoring malformed op hash {:?}: {}", h, e);
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::config::SyncConfig;
    use crate::sync::model::{Member, Participant, Transaction};

    fn store_with_three_pending() -> (ClientGroupStore, Vec<OpHash>) {
        let mut store = ClientGroupStore::new(SyncConfig::default());
        store.add(Group::new("g1", "Trip")).unwrap();
        let h1 = store.add_member(None, Member::new("a", "A")).unwrap();
        let h2 = store.add_member(None, Member::new("b", "B")).unwrap();
        let h3 = store.add_member(None, Member::new("c", "C")).unwrap();
        (store, vec![h1, h2, h3])
    }

    fn server_group_with(uids: &[&str]) -> Group {
        uids.iter()
            .fold(Group::new("g1", "Trip"), |g, uid| g.with_member(Member::new(*uid, *uid)))
    }

    #[test]
    fn test_convergence_keeps_only_unacknowledged() {
        let (mut store, hashes) = store_with_three_pending();
        let update = ServerUpdate::new(
            server_group_with(&["a", "b"]),
            vec![hashes[0].clone(), hashes[1].clone()],
            100,
        );

        let outcome = store.on_server_update(update);
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                created: false,
                acknowledged: 2,
                remaining: 1
            }
        );
        assert_eq!(store.pending_hashes("g1"), vec![hashes[2].clone()]);

        let group = store.by_id("g1").unwrap();
        assert_eq!(group.members.len(), 3);
        assert_eq!(store.sync_status("g1").unwrap().lastsync, Some(100));
    }

    #[test]
    fn test_unacknowledged_order_preserved() {
        let (mut store, hashes) = store_with_three_pending();
        let update = ServerUpdate::new(server_group_with(&["b"]), vec![hashes[1].clone()], 5);
        store.on_server_update(update);
        assert_eq!(
            store.pending_hashes("g1"),
            vec![hashes[0].clone(), hashes[2].clone()]
        );
    }

    #[test]
    fn test_idempotent() {
        let (mut store, hashes) = store_with_three_pending();
        let update = ServerUpdate::new(
            server_group_with(&["a"]),
            vec![hashes[0].clone()],
            7,
        );

        store.on_server_update(update.clone());
        let pending = store.pending_hashes("g1");
        let group = store.by_id("g1").unwrap();

        let second = store.on_server_update(update);
        assert_eq!(
            second,
            ReconcileOutcome::Applied {
                created: false,
                acknowledged: 0,
                remaining: 2
            }
        );
        assert_eq!(store.pending_hashes("g1"), pending);
        assert_eq!(*store.by_id("g1").unwrap(), *group);
    }

    #[test]
    fn test_acknowledged_hash_never_resurfaces() {
        let (mut store, hashes) = store_with_three_pending();
        store.on_server_update(ServerUpdate::new(
            server_group_with(&["a", "b", "c"]),
            hashes.clone(),
            9,
        ));
        assert!(store.pending_hashes("g1").is_empty());

        // An out-of-order older snapshot that acknowledges nothing cannot
        // bring them back either.
        store.on_server_update(ServerUpdate::new(server_group_with(&[]), vec![], 3));
        assert!(store.pending_hashes("g1").is_empty());
    }

    #[test]
    fn test_unknown_group_creates_online_stub() {
        let mut store = ClientGroupStore::default();
        let mut present = Group::new("remote", "Shared");
        present.members.insert("x".into(), Member::new("x", "X"));

        let outcome = store.on_server_update(ServerUpdate::new(present, vec![], 42));
        assert!(matches!(
            outcome,
            ReconcileOutcome::Applied { created: true, .. }
        ));

        let status = store.sync_status("remote").unwrap();
        assert_eq!(status.lastchanged, 42);
        assert_eq!(status.lastsync, Some(42));
        assert_eq!(status.pending, 0);
        assert_eq!(store.by_id("remote").unwrap().members.len(), 1);

        // Shared groups are cleaned up with the session.
        assert_eq!(store.remove_online_groups(), 1);
    }

    #[test]
    fn test_malformed_update_dropped() {
        let (mut store, hashes) = store_with_three_pending();
        let before = store.by_id("g1").unwrap();

        let missing_present = ServerUpdate {
            id: Some("g1".into()),
            present: None,
            operations: hashes.clone(),
            timestamp: 1,
        };
        assert_eq!(store.on_server_update(missing_present), ReconcileOutcome::Dropped);

        let missing_id = ServerUpdate {
            id: None,
            present: Some(Group::new("g1", "")),
            operations: hashes.clone(),
            timestamp: 1,
        };
        assert_eq!(store.on_server_update(missing_id), ReconcileOutcome::Dropped);

        assert_eq!(store.pending_hashes("g1"), hashes);
        assert!(Arc::ptr_eq(&before, &store.by_id("g1").unwrap()));
        assert_eq!(store.sync_status("g1").unwrap().lastsync, None);
    }

    #[test]
    fn test_syncing_operations_trimmed() {
        let (mut store, hashes) = store_with_three_pending();
        store.begin_sync("g1").unwrap();
        store.on_server_update(ServerUpdate::new(
            server_group_with(&["a"]),
            vec![hashes[0].clone()],
            2,
        ));
        assert_eq!(store.sync_status("g1").unwrap().syncing, 2);
    }

    #[test]
    fn test_pending_change_member_id_applies_on_new_base() {
        let mut store = ClientGroupStore::default();
        store.add(Group::new("g1", "")).unwrap();
        let insert = store.add_member(None, Member::new("local-1", "Alice")).unwrap();
        let mut tx = Transaction::new("t1");
        tx.creditors = vec![Participant::new("local-1", 10.0)];
        tx.timestamp = 1;
        let tx_hash = store.new_transaction(None, tx.clone()).unwrap();
        store.change_member_id(None, "local-1", "server-42").unwrap();

        // Server has accepted the member and the transaction, not the rename.
        let present = Group::new("g1", "")
            .with_member(Member::new("local-1", "Alice"))
            .with_transaction(tx);
        store.on_server_update(ServerUpdate::new(present, vec![insert, tx_hash], 50));

        let group = store.by_id("g1").unwrap();
        assert_eq!(store.pending_hashes("g1").len(), 1);
        assert!(group.members.contains_key("server-42"));
        assert_eq!(group.transactions[0].creditors[0].uid, "server-42");
    }

    #[test]
    fn test_uppercase_hashes_acknowledge_and_garbage_is_ignored() {
        let (mut store, hashes) = store_with_three_pending();
        let shouted = OpHash::from(hashes[0].as_str().to_ascii_uppercase().as_str());
        let update = ServerUpdate::new(
            server_group_with(&["a"]),
            vec![shouted, OpHash::from("not-a-hash"), OpHash::from("abcd")],
            4,
        );

        let outcome = store.on_server_update(update);
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                created: false,
                acknowledged: 1,
                remaining: 2
            }
        );
        assert_eq!(
            store.pending_hashes("g1"),
            vec![hashes[1].clone(), hashes[2].clone()]
        );
    }

    #[test]
    fn test_from_json_wire_shape() {
        let json = r#"{
            "id": "g1",
            "present": {"id": "g1", "members": [{"uid": "m1", "name": "Alice"}]},
            "operations": ["aa"],
            "timestamp": 1700000000000
        }"#;
        let update = ServerUpdate::from_json(json).unwrap();
        assert_eq!(update.id.as_deref(), Some("g1"));
        assert_eq!(update.present.as_ref().unwrap().members["m1"].name, "Alice");
        assert_eq!(update.operations, vec![OpHash::from("aa")]);

        let partial = ServerUpdate::from_json(r#"{"timestamp": 1}"#).unwrap();
        assert!(partial.id.is_none());

        assert!(ServerUpdate::from_json("not json").is_err());
    }
}
