/// Ledger data model: the materialized `Group` aggregate and its entities.
///
/// `members` is always a uid-keyed map once inside the crate. Inbound JSON may
/// carry it either as a map or as an array of members; both are normalized
/// here, once, during deserialization.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::sync::ids::OpHash;
use crate::sync::ops::Operation;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_MEMBER_ROLE: &str = "collaborator";

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Member {
    pub uid: String,
    pub name: String,
    pub role: String,
    /// Soft-delete flag. Removed members stay in the map so historical
    /// transactions keep resolving.
    pub removed: bool,
}

impl Default for Member {
    fn default() -> Self {
        Member {
            uid: String::new(),
            name: String::new(),
            role: DEFAULT_MEMBER_ROLE.to_string(),
            removed: false,
        }
    }
}

impl Member {
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Member {
            uid: uid.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Field-level changes for `modify_member`. Unset fields are left alone.
///
/// The uid is deliberately absent: renames go through `change_member_id`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct MemberChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

impl MemberChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.role.is_none() && self.removed.is_none()
    }

    pub fn apply_to(&self, member: &mut Member) {
        if let Some(name) = &self.name {
            member.name = name.clone();
        }
        if let Some(role) = &self.role {
            member.role = role.clone();
        }
        if let Some(removed) = self.removed {
            member.removed = removed;
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// One creditor or debtor line of a transaction.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Participant {
    pub uid: String,
    pub amount: f64,
}

impl Participant {
    pub fn new(uid: impl Into<String>, amount: f64) -> Self {
        Participant {
            uid: uid.into(),
            amount,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Transaction {
    pub id: String,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
    pub creditors: Vec<Participant>,
    pub debtors: Vec<Participant>,
    pub currency: String,
    pub creator: String,
    pub category: String,
    pub total_fee: f64,
    pub service_fee_rate: f64,
    pub splitmode: String,
    pub splitmode_creditors: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timezone: String,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            id: String::new(),
            timestamp: 0,
            creditors: Vec::new(),
            debtors: Vec::new(),
            currency: DEFAULT_CURRENCY.to_string(),
            creator: String::new(),
            category: String::new(),
            total_fee: 0.0,
            service_fee_rate: 0.0,
            splitmode: "average".to_string(),
            splitmode_creditors: "amount".to_string(),
            kind: "expenses".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

impl Transaction {
    pub fn new(id: impl Into<String>) -> Self {
        Transaction {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Every participant line, creditors first.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.creditors.iter().chain(self.debtors.iter())
    }
}

/// Field-level changes for `modify_transaction`. Unset fields are left alone.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct TransactionChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creditors: Option<Vec<Participant>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debtors: Option<Vec<Participant>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_fee: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_fee_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splitmode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub splitmode_creditors: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl TransactionChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Participant lines introduced by this change set.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.creditors
            .iter()
            .flatten()
            .chain(self.debtors.iter().flatten())
    }

    pub fn apply_to(&self, tx: &mut Transaction) {
        if let Some(v) = self.timestamp {
            tx.timestamp = v;
        }
        if let Some(v) = &self.creditors {
            tx.creditors = v.clone();
        }
        if let Some(v) = &self.debtors {
            tx.debtors = v.clone();
        }
        if let Some(v) = &self.currency {
            tx.currency = v.clone();
        }
        if let Some(v) = &self.creator {
            tx.creator = v.clone();
        }
        if let Some(v) = &self.category {
            tx.category = v.clone();
        }
        if let Some(v) = self.total_fee {
            tx.total_fee = v;
        }
        if let Some(v) = self.service_fee_rate {
            tx.service_fee_rate = v;
        }
        if let Some(v) = &self.splitmode {
            tx.splitmode = v.clone();
        }
        if let Some(v) = &self.splitmode_creditors {
            tx.splitmode_creditors = v.clone();
        }
        if let Some(v) = &self.kind {
            tx.kind = v.clone();
        }
        if let Some(v) = &self.timezone {
            tx.timezone = v.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GroupOptions {
    pub multiple_currencies: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        GroupOptions {
            multiple_currencies: true,
        }
    }
}

/// The materialized ledger aggregate.
///
/// Budgets, currency records and activities are carried through opaquely:
/// no operation touches them, they only ever come from the base snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub options: GroupOptions,
    pub timestamp: i64,
    pub budgets: Vec<Value>,
    #[serde(deserialize_with = "deserialize_members")]
    pub members: BTreeMap<String, Member>,
    pub main_currency: String,
    pub currency_records: Vec<Value>,
    pub transactions: Vec<Transaction>,
    pub activities: Vec<Value>,
    pub online: bool,
}

impl Group {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Group {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style member insertion, keyed by the member's uid.
    pub fn with_member(mut self, member: Member) -> Self {
        self.members.insert(member.uid.clone(), member);
        self
    }

    pub fn with_transaction(mut self, tx: Transaction) -> Self {
        self.transactions.push(tx);
        self
    }

    pub fn member(&self, uid: &str) -> Option<&Member> {
        self.members.get(uid)
    }

    /// Members not soft-deleted, in uid order.
    pub fn active_members(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| !m.removed)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MembersRepr {
    Map(BTreeMap<String, Member>),
    List(Vec<Member>),
}

/// Accept `members` as either `{uid: Member}` or `[Member]`.
///
/// Map entries with an empty uid inherit their key; list entries must carry
/// their own uid.
fn deserialize_members<'de, D>(deserializer: D) -> Result<BTreeMap<String, Member>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = MembersRepr::deserialize(deserializer)?;
    normalize_members(repr).map_err(serde::de::Error::custom)
}

fn normalize_members(repr: MembersRepr) -> Result<BTreeMap<String, Member>, String> {
    match repr {
        MembersRepr::Map(map) => Ok(map
            .into_iter()
            .map(|(key, mut member)| {
                if member.uid.is_empty() {
                    member.uid = key.clone();
                }
                (key, member)
            })
            .collect()),
        MembersRepr::List(list) => {
            let mut members = BTreeMap::new();
            for member in list {
                if member.uid.is_empty() {
                    return Err("member in list form is missing a uid".to_string());
                }
                members.insert(member.uid.clone(), member);
            }
            Ok(members)
        }
    }
}

// ---------------------------------------------------------------------------
// ClientGroup
// ---------------------------------------------------------------------------

/// Options shared with every collaborator of a group.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SharedGroupOptions {
    pub public: bool,
}

impl Default for SharedGroupOptions {
    fn default() -> Self {
        SharedGroupOptions { public: true }
    }
}

/// Device-local preferences, never synced.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct LocalGroupOptions {
    pub hidden: bool,
}

/// Client-side working copy of one group: a base snapshot plus the ordered
/// log of edits the server has not acknowledged yet.
///
/// `base` and `operations` are swapped wholesale (never edited in place), so
/// their `Arc` identities double as the evaluation cache key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClientGroup {
    pub id: String,
    pub base: Option<Arc<Group>>,
    /// Each op is shared by pointer, so installing a longer log copies
    /// pointers and never the payloads.
    pub operations: Arc<Vec<Arc<Operation>>>,
    /// Operations handed to the transport and not yet acknowledged.
    #[serde(default)]
    pub syncing_operations: Vec<Arc<Operation>>,
    pub lastchanged: i64,
    #[serde(default)]
    pub lastsync: Option<i64>,
    #[serde(default)]
    pub options: SharedGroupOptions,
    #[serde(default)]
    pub local_options: LocalGroupOptions,
    #[serde(default)]
    pub online: bool,
}

impl ClientGroup {
    /// Working copy for a locally created group.
    pub fn new(base: Group, now: i64) -> Self {
        ClientGroup {
            id: base.id.clone(),
            online: base.online,
            base: Some(Arc::new(base)),
            operations: Arc::new(Vec::new()),
            syncing_operations: Vec::new(),
            lastchanged: now,
            lastsync: None,
            options: SharedGroupOptions::default(),
            local_options: LocalGroupOptions::default(),
        }
    }

    /// Placeholder for a group first seen through a server push; the base is
    /// filled in by the reconciliation that created it.
    pub fn server_stub(id: impl Into<String>, timestamp: i64) -> Self {
        ClientGroup {
            id: id.into(),
            base: None,
            operations: Arc::new(Vec::new()),
            syncing_operations: Vec::new(),
            lastchanged: timestamp,
            lastsync: None,
            options: SharedGroupOptions::default(),
            local_options: LocalGroupOptions::default(),
            online: true,
        }
    }

    /// Append one operation, installing a fresh log.
    pub(crate) fn push_operation(&mut self, op: Operation) {
        let mut next = Vec::with_capacity(self.operations.len() + 1);
        next.extend(self.operations.iter().map(Arc::clone));
        next.push(Arc::new(op));
        self.operations = Arc::new(next);
    }

    pub fn pending_hashes(&self) -> Vec<OpHash> {
        self.operations.iter().map(|op| op.hash.clone()).collect()
    }
}

/// Metadata edits to a working copy (not to the ledger contents, which only
/// change through operations).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ClientGroupChanges {
    pub options: Option<SharedGroupOptions>,
    pub local_options: Option<LocalGroupOptions>,
    pub online: Option<bool>,
    pub lastchanged: Option<i64>,
}

impl ClientGroupChanges {
    pub fn apply_to(&self, group: &mut ClientGroup) {
        if let Some(options) = &self.options {
            group.options = options.clone();
        }
        if let Some(local) = &self.local_options {
            group.local_options = local.clone();
        }
        if let Some(online) = self.online {
            group.online = online;
        }
        if let Some(ts) = self.lastchanged {
            group.lastchanged = ts;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
