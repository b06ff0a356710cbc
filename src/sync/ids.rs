/// Identity types for the operation-log sync engine.
///
/// - `OpHash`: content-derived operation identifier (hex BLAKE3)
/// - `IdGenerator`: seam for the external identifier service
/// - `UuidGenerator`: default generator backed by random v4 UUIDs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix carried by identifiers minted on this device before the server
/// has issued a canonical one.
pub const LOCAL_ID_PREFIX: &str = "local-";

// ---------------------------------------------------------------------------
// OpHash
// ---------------------------------------------------------------------------

/// Content-derived operation identifier: hex(BLAKE3(domain || name || payload)).
///
/// Serialized as a plain string so it matches the hash list the server
/// reports for already-accepted operations.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpHash(String);

impl OpHash {
    /// Wrap a raw 32-byte digest.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        OpHash(hex::encode(digest))
    }

    /// Accept a hash string as reported by the server.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(OpHash(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OpHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..12).unwrap_or(&self.0);
        write!(f, "OpHash({}..)", short)
    }
}

impl fmt::Display for OpHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OpHash {
    fn from(s: &str) -> Self {
        OpHash(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// IdGenerator
// ---------------------------------------------------------------------------

/// Source of unique identifiers for locally created entities.
///
/// Uniqueness is the implementor's contract; collisions are not detected here.
pub trait IdGenerator: Send + Sync {
    fn group_id(&self) -> String;
    fn member_id(&self) -> String;
    fn transaction_id(&self) -> String;
}

/// Default generator. Groups and members get the `local-` prefix so a later
/// `change_member_id` can swap them for server-issued ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn group_id(&self) -> String {
        format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4().simple())
    }

    fn member_id(&self) -> String {
        format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4().simple())
    }

    fn transaction_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Whether an id was minted locally and still awaits a server-issued one.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
