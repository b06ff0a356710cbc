/// Evaluator. Materializes a `Group` from a base snapshot and an ordered
/// operation log.
///
/// Evaluation is pure: the result depends only on `(base, operations,
/// policy)`. The base is cloned into a private workspace and never mutated.
///
/// **Member identity:** while evaluating, members live in an arena of slots
/// and transactions refer to slots, not uids. An alias table maps the current
/// uid to its slot, so `change_member_id` is a single alias-table rewrite no
/// matter how many transactions reference the member. Uids are rendered back
/// into creditor/debtor lines once, when the workspace is materialized.
use std::borrow::Borrow;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::sync::config::ReferencePolicy;
use crate::sync::model::{Group, Member, Participant, Transaction};
use crate::sync::ops::{Operation, OperationName, OperationPayload};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("{op} targets unknown id {target:?}")]
    DanglingReference { op: OperationName, target: String },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Materialize `base` with `operations` applied in order.
///
/// Returns `Ok(None)` when there is no base to build on. Under
/// `ReferencePolicy::Lenient` this never fails. Accepts owned or shared
/// (`Arc<Operation>`) logs.
pub fn evaluate<O: Borrow<Operation>>(
    base: Option<&Group>,
    operations: &[O],
    policy: ReferencePolicy,
) -> Result<Option<Group>, EvalError> {
    let base = match base {
        Some(b) => b,
        None => return Ok(None),
    };

    let mut ws = Workspace::from_group(base);
    for op in operations {
        let op: &Operation = op.borrow();
        #[cfg(feature = "debug-logs")]
        log::trace!("evaluate {}: applying {} {}", base.id, op.name(), op.hash);

        if let Err(e) = ws.apply(&op.payload) {
            match policy {
                ReferencePolicy::Strict => return Err(e),
                ReferencePolicy::Lenient => {
                    log::debug!("evaluate {}: skipped op {}: {}", base.id, op.hash, e);
                }
            }
        }
    }
    Ok(Some(ws.materialize()))
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

type SlotId = usize;

/// One member identity. `member` is `None` for uids that only appear in
/// transactions. `forward` is set when another slot took over this slot's
/// uid; references to this slot then render as the forwarded slot.
#[derive(Debug)]
struct Slot {
    uid: String,
    member: Option<Member>,
    forward: Option<SlotId>,
}

#[derive(Debug)]
struct WorkTransaction {
    tx: Transaction,
    creditors: Vec<SlotId>,
    debtors: Vec<SlotId>,
}

struct Workspace {
    /// Base with `members` and `transactions` moved out into the arena.
    shell: Group,
    slots: Vec<Slot>,
    /// Current uid -> slot. Always points at a root (unforwarded) slot.
    alias: BTreeMap<String, SlotId>,
    transactions: Vec<WorkTransaction>,
}

impl Workspace {
    fn from_group(base: &Group) -> Self {
        let mut shell = base.clone();
        let members = std::mem::take(&mut shell.members);
        let transactions = std::mem::take(&mut shell.transactions);

        let mut ws = Workspace {
            shell,
            slots: Vec::with_capacity(members.len()),
            alias: BTreeMap::new(),
            transactions: Vec::with_capacity(transactions.len()),
        };

        for (uid, member) in members {
            let slot = ws.slot_for(&uid);
            ws.slots[slot].member = Some(member);
        }
        for tx in transactions {
            ws.push_transaction(tx);
        }
        ws
    }

    fn apply(&mut self, payload: &OperationPayload) -> Result<(), EvalError> {
        let op = payload.name();
        match payload {
            OperationPayload::InsertMember(member) => {
                let slot = self.slot_for(&member.uid);
                self.slots[slot].member = Some(member.clone());
            }
            OperationPayload::RemoveMember(uid) => {
                self.member_mut(op, uid)?.removed = true;
            }
            OperationPayload::ModifyMember { id, changes } => {
                changes.apply_to(self.member_mut(op, id)?);
            }
            OperationPayload::InsertTransaction(tx) => {
                self.push_transaction(tx.clone());
            }
            OperationPayload::ModifyTransaction { id, changes } => {
                let index = self
                    .transactions
                    .iter()
                    .position(|w| w.tx.id == *id)
                    .ok_or_else(|| dangling(op, id))?;
                changes.apply_to(&mut self.transactions[index].tx);
                if let Some(creditors) = &changes.creditors {
                    let slots = self.resolve_all(creditors);
                    self.transactions[index].creditors = slots;
                }
                if let Some(debtors) = &changes.debtors {
                    let slots = self.resolve_all(debtors);
                    self.transactions[index].debtors = slots;
                }
            }
            OperationPayload::ChangeMemberId { from, to } => {
                self.rename(op, from, to)?;
            }
        }
        Ok(())
    }

    /// Slot currently named `uid`, creating an empty one if none exists.
    fn slot_for(&mut self, uid: &str) -> SlotId {
        if let Some(&slot) = self.alias.get(uid) {
            return slot;
        }
        let slot = self.slots.len();
        self.slots.push(Slot {
            uid: uid.to_string(),
            member: None,
            forward: None,
        });
        self.alias.insert(uid.to_string(), slot);
        slot
    }

    fn resolve_all(&mut self, participants: &[Participant]) -> Vec<SlotId> {
        participants.iter().map(|p| self.slot_for(&p.uid)).collect()
    }

    fn push_transaction(&mut self, tx: Transaction) {
        let creditors = self.resolve_all(&tx.creditors);
        let debtors = self.resolve_all(&tx.debtors);
        self.transactions.push(WorkTransaction {
            tx,
            creditors,
            debtors,
        });
    }

    fn member_mut(&mut self, op: OperationName, uid: &str) -> Result<&mut Member, EvalError> {
        let slot = *self.alias.get(uid).ok_or_else(|| dangling(op, uid))?;
        self.slots[slot]
            .member
            .as_mut()
            .ok_or_else(|| dangling(op, uid))
    }

    /// Move the name `from` onto `to`. If `to` already names a slot, the
    /// `from` slot takes it over and the old slot is forwarded, so every
    /// reference to either identity renders as `to` from now on.
    fn rename(&mut self, op: OperationName, from: &str, to: &str) -> Result<(), EvalError> {
        let moved = self.alias.remove(from).ok_or_else(|| dangling(op, from))?;

        if let Some(displaced) = self.alias.remove(to) {
            self.slots[displaced].forward = Some(moved);
            if self.slots[moved].member.is_none() {
                self.slots[moved].member = self.slots[displaced].member.take();
            } else {
                self.slots[displaced].member = None;
            }
        }

        self.slots[moved].uid = to.to_string();
        self.alias.insert(to.to_string(), moved);
        Ok(())
    }

    fn root(&self, mut slot: SlotId) -> SlotId {
        while let Some(next) = self.slots[slot].forward {
            slot = next;
        }
        slot
    }

    fn render(&self, lines: &mut [Participant], slots: &[SlotId]) {
        for (line, &slot) in lines.iter_mut().zip(slots) {
            let root = self.root(slot);
            if line.uid != self.slots[root].uid {
                line.uid = self.slots[root].uid.clone();
            }
        }
    }

    fn materialize(self) -> Group {
        let mut group = self.shell.clone();

        for (uid, &slot) in &self.alias {
            if let Some(member) = &self.slots[slot].member {
                let mut member = member.clone();
                member.uid = uid.clone();
                group.members.insert(uid.clone(), member);
            }
        }

        group.transactions = self
            .transactions
            .iter()
            .map(|w| {
                let mut tx = w.tx.clone();
                self.render(&mut tx.creditors, &w.creditors);
                self.render(&mut tx.debtors, &w.debtors);
                tx
            })
            .collect();

        group
    }
}

fn dangling(op: OperationName, target: &str) -> EvalError {
    EvalError::DanglingReference {
        op,
        target: target.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
