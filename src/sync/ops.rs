/// Operation record and payload types.
///
/// Every local edit to a group is an immutable operation appended to the
/// group's pending log. Operations are content-addressed: the hash depends
/// only on the operation name and its payload, so the same logical edit
/// always hashes identically and can be matched against the hash list a
/// server snapshot reports as already incorporated.
///
/// - Payload: typed variant per operation kind, validated at construction
/// - Canonical bytes: CBOR via ciborium
/// - Hash: hex(BLAKE3("LS-OP" || name || 0x00 || cbor(payload)))
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::ids::OpHash;
use crate::sync::limits::MAX_OP_PAYLOAD_BYTES;
use crate::sync::model::{Member, MemberChanges, Participant, Transaction, TransactionChanges};

/// Domain separator for operation hashes.
const OP_HASH_DOMAIN: &[u8] = b"LS-OP";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum OpError {
    #[error("Payload exceeds max size ({size} > {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("CBOR encoding failed: {0}")]
    CborEncode(String),

    #[error("{op}: missing {field}")]
    MissingField { op: OperationName, field: &'static str },

    #[error("{0}: change set is empty")]
    EmptyChanges(OperationName),

    #[error("change_member_id: source and target are both {0:?}")]
    SameMemberId(String),

    #[error("{op}: non-finite amount for {uid:?}")]
    InvalidAmount { op: OperationName, uid: String },

    #[error("Operation name {name} does not match payload kind {payload}")]
    NameMismatch {
        name: OperationName,
        payload: OperationName,
    },

    #[error("Unknown operation name: {0}")]
    UnknownName(String),
}

// ---------------------------------------------------------------------------
// OperationName
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationName {
    InsertMember,
    RemoveMember,
    ModifyMember,
    InsertTransaction,
    ModifyTransaction,
    ChangeMemberId,
}

impl OperationName {
    /// Returns true for ops that touch the member map. These stay accepted
    /// once the pending log reaches its hard cap, so membership and id
    /// reconciliation are never blocked.
    pub fn is_member_op(&self) -> bool {
        matches!(
            self,
            OperationName::InsertMember
                | OperationName::RemoveMember
                | OperationName::ModifyMember
                | OperationName::ChangeMemberId
        )
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationName::InsertMember => "insert_member",
            OperationName::RemoveMember => "remove_member",
            OperationName::ModifyMember => "modify_member",
            OperationName::InsertTransaction => "insert_transaction",
            OperationName::ModifyTransaction => "modify_transaction",
            OperationName::ChangeMemberId => "change_member_id",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OpError> {
        match s {
            "insert_member" => Ok(OperationName::InsertMember),
            "remove_member" => Ok(OperationName::RemoveMember),
            "modify_member" => Ok(OperationName::ModifyMember),
            "insert_transaction" => Ok(OperationName::InsertTransaction),
            "modify_transaction" => Ok(OperationName::ModifyTransaction),
            "change_member_id" => Ok(OperationName::ChangeMemberId),
            other => Err(OpError::UnknownName(other.to_string())),
        }
    }
}

impl std::fmt::Display for OperationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Typed payload, one variant per operation name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "name", content = "data", rename_all = "snake_case")]
pub enum OperationPayload {
    InsertMember(Member),
    /// Uid of the member to soft-delete.
    RemoveMember(String),
    ModifyMember { id: String, changes: MemberChanges },
    InsertTransaction(Transaction),
    ModifyTransaction { id: String, changes: TransactionChanges },
    ChangeMemberId { from: String, to: String },
}

impl OperationPayload {
    pub fn name(&self) -> OperationName {
        match self {
            OperationPayload::InsertMember(_) => OperationName::InsertMember,
            OperationPayload::RemoveMember(_) => OperationName::RemoveMember,
            OperationPayload::ModifyMember { .. } => OperationName::ModifyMember,
            OperationPayload::InsertTransaction(_) => OperationName::InsertTransaction,
            OperationPayload::ModifyTransaction { .. } => OperationName::ModifyTransaction,
            OperationPayload::ChangeMemberId { .. } => OperationName::ChangeMemberId,
        }
    }

    /// Reject payloads that could never apply meaningfully.
    pub fn validate(&self) -> Result<(), OpError> {
        let op = self.name();
        match self {
            OperationPayload::InsertMember(member) => {
                require(op, "uid", &member.uid)?;
            }
            OperationPayload::RemoveMember(uid) => {
                require(op, "uid", uid)?;
            }
            OperationPayload::ModifyMember { id, changes } => {
                require(op, "id", id)?;
                if changes.is_empty() {
                    return Err(OpError::EmptyChanges(op));
                }
            }
            OperationPayload::InsertTransaction(tx) => {
                require(op, "id", &tx.id)?;
                check_participants(op, tx.participants())?;
            }
            OperationPayload::ModifyTransaction { id, changes } => {
                require(op, "id", id)?;
                if changes.is_empty() {
                    return Err(OpError::EmptyChanges(op));
                }
                check_participants(op, changes.participants())?;
            }
            OperationPayload::ChangeMemberId { from, to } => {
                require(op, "from", from)?;
                require(op, "to", to)?;
                if from == to {
                    return Err(OpError::SameMemberId(from.clone()));
                }
            }
        }
        Ok(())
    }
}

fn require(op: OperationName, field: &'static str, value: &str) -> Result<(), OpError> {
    if value.trim().is_empty() {
        return Err(OpError::MissingField { op, field });
    }
    Ok(())
}

fn check_participants<'a>(
    op: OperationName,
    participants: impl Iterator<Item = &'a Participant>,
) -> Result<(), OpError> {
    for p in participants {
        require(op, "participant uid", &p.uid)?;
        if !p.amount.is_finite() {
            return Err(OpError::InvalidAmount {
                op,
                uid: p.uid.clone(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Immutable, content-addressed edit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Operation {
    pub payload: OperationPayload,
    pub hash: OpHash,
    /// Wall clock timestamp in milliseconds. Not hashed.
    pub created_at: i64,
}

impl Operation {
    /// Validate, hash and timestamp a payload.
    pub fn create(payload: OperationPayload) -> Result<Self, OpError> {
        payload.validate()?;
        let hash = compute_hash(&payload)?;
        Ok(Operation {
            payload,
            hash,
            created_at: now_ms(),
        })
    }

    /// Like `create`, but also checks a caller-supplied operation name
    /// against the payload kind.
    pub fn from_parts(name: &str, payload: OperationPayload) -> Result<Self, OpError> {
        let name = OperationName::parse(name)?;
        if name != payload.name() {
            return Err(OpError::NameMismatch {
                name,
                payload: payload.name(),
            });
        }
        Self::create(payload)
    }

    pub fn name(&self) -> OperationName {
        self.payload.name()
    }

    /// Recompute the hash and compare. Used when loading a persisted log.
    pub fn verify_hash(&self) -> Result<bool, OpError> {
        Ok(compute_hash(&self.payload)? == self.hash)
    }
}

/// Content hash of a payload.
pub fn compute_hash(payload: &OperationPayload) -> Result<OpHash, OpError> {
    let bytes = cbor_encode(payload)?;
    if bytes.len() > MAX_OP_PAYLOAD_BYTES {
        return Err(OpError::PayloadTooLarge {
            size: bytes.len(),
            max: MAX_OP_PAYLOAD_BYTES,
        });
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(OP_HASH_DOMAIN);
    hasher.update(payload.name().as_str().as_bytes());
    hasher.update(&[0u8]);
    hasher.update(&bytes);
    Ok(OpHash::from_digest(hasher.finalize().as_bytes()))
}

// ---------------------------------------------------------------------------
// CBOR helpers
// ---------------------------------------------------------------------------

/// CBOR-encode a value to bytes.
pub fn cbor_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, OpError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| OpError::CborEncode(e.to_string()))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Current time in milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_alice() -> OperationPayload {
        OperationPayload::InsertMember(Member::new("m1", "Alice"))
    }

    #[test]
    fn test_same_payload_same_hash() {
        let a = Operation::create(insert_alice()).unwrap();
        let b = Operation::create(insert_alice()).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.name(), OperationName::InsertMember);
    }

    #[test]
    fn test_different_payload_different_hash() {
        let a = Operation::create(insert_alice()).unwrap();
        let b = Operation::create(OperationPayload::InsertMember(Member::new("m1", "Alicia")))
            .unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_hash_ignores_created_at() {
        let mut a = Operation::create(insert_alice()).unwrap();
        a.created_at += 10_000;
        assert!(a.verify_hash().unwrap());
    }

    #[test]
    fn test_verify_detects_tampered_payload() {
        let mut op = Operation::create(insert_alice()).unwrap();
        op.payload = OperationPayload::InsertMember(Member::new("m1", "Mallory"));
        assert!(!op.verify_hash().unwrap());
    }

    #[test]
    fn test_name_separates_hash_domains() {
        // Same string argument, different operation kind.
        let remove = Operation::create(OperationPayload::RemoveMember("m1".into())).unwrap();
        let modify = Operation::create(OperationPayload::ModifyMember {
            id: "m1".into(),
            changes: MemberChanges {
                removed: Some(true),
                ..Default::default()
            },
        })
        .unwrap();
        assert_ne!(remove.hash, modify.hash);
    }

    #[test]
    fn test_empty_ids_rejected() {
        let err = Operation::create(OperationPayload::RemoveMember("  ".into())).unwrap_err();
        assert!(matches!(err, OpError::MissingField { field: "uid", .. }));

        let err =
            Operation::create(OperationPayload::InsertTransaction(Transaction::default()))
                .unwrap_err();
        assert!(matches!(err, OpError::MissingField { field: "id", .. }));
    }

    #[test]
    fn test_empty_changes_rejected() {
        let err = Operation::create(OperationPayload::ModifyTransaction {
            id: "t1".into(),
            changes: TransactionChanges::default(),
        })
        .unwrap_err();
        assert!(matches!(
            err,
            OpError::EmptyChanges(OperationName::ModifyTransaction)
        ));
    }

    #[test]
    fn test_change_member_id_same_target_rejected() {
        let err = Operation::create(OperationPayload::ChangeMemberId {
            from: "a".into(),
            to: "a".into(),
        })
        .unwrap_err();
        assert!(matches!(err, OpError::SameMemberId(_)));
    }

    #[test]
    fn test_non_finite_amount_rejected() {
        let mut tx = Transaction::new("t1");
        tx.debtors = vec![Participant::new("m1", f64::NAN)];
        let err = Operation::create(OperationPayload::InsertTransaction(tx)).unwrap_err();
        match err {
            OpError::InvalidAmount { uid, .. } => assert_eq!(uid, "m1"),
            other => panic!("Expected InvalidAmount, got: {:?}", other),
        }
    }

    #[test]
    fn test_payload_too_large_rejected() {
        let member = Member::new("m1", "x".repeat(MAX_OP_PAYLOAD_BYTES + 1));
        let err = Operation::create(OperationPayload::InsertMember(member)).unwrap_err();
        match err {
            OpError::PayloadTooLarge { size, max } => {
                assert!(size > max);
                assert_eq!(max, MAX_OP_PAYLOAD_BYTES);
            }
            other => panic!("Expected PayloadTooLarge, got: {:?}", other),
        }
    }

    #[test]
    fn test_from_parts_checks_name() {
        assert!(Operation::from_parts("insert_member", insert_alice()).is_ok());

        let err = Operation::from_parts("remove_member", insert_alice()).unwrap_err();
        assert!(matches!(err, OpError::NameMismatch { .. }));

        let err = Operation::from_parts("drop_table", insert_alice()).unwrap_err();
        assert!(matches!(err, OpError::UnknownName(_)));
    }

    #[test]
    fn test_payload_wire_shape() {
        let op = Operation::create(OperationPayload::ChangeMemberId {
            from: "local-1".into(),
            to: "server-42".into(),
        })
        .unwrap();
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["payload"]["name"], "change_member_id");
        assert_eq!(v["payload"]["data"]["from"], "local-1");
        assert_eq!(v["hash"], op.hash.as_str());
    }

    #[test]
    fn test_name_as_str_parse_agree() {
        for name in [
            OperationName::InsertMember,
            OperationName::RemoveMember,
            OperationName::ModifyMember,
            OperationName::InsertTransaction,
            OperationName::ModifyTransaction,
            OperationName::ChangeMemberId,
        ] {
            assert_eq!(OperationName::parse(name.as_str()).unwrap(), name);
        }
        assert!(OperationName::ChangeMemberId.is_member_op());
        assert!(!OperationName::InsertTransaction.is_member_op());
    }
}
