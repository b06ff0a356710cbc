#![no_main]
use libfuzzer_sys::fuzz_target;
use arbitrary::Arbitrary;

use ledger_sync::sync::{
    evaluate, Group, Member, MemberChanges, Operation, OperationPayload, Participant,
    ReferencePolicy, Transaction, TransactionChanges,
};

/// Fuzz the evaluator with arbitrary operation logs.
///
/// Uids are drawn from a small pool so renames, removals and transaction
/// references collide often.

#[derive(Arbitrary, Debug)]
enum Step {
    Insert { uid: u8, removed: bool },
    Remove { uid: u8 },
    Rename { uid: u8, name: u8 },
    Pay { tx: u8, creditor: u8, debtor: u8, amount: u16 },
    Repoint { tx: u8, debtor: u8 },
    ChangeId { from: u8, to: u8 },
}

#[derive(Arbitrary, Debug)]
struct EvalInput {
    with_base: bool,
    strict: bool,
    steps: Vec<Step>,
}

fn uid(n: u8) -> String {
    format!("m{}", n % 6)
}

fn tx_id(n: u8) -> String {
    format!("t{}", n % 4)
}

fn payload(step: &Step) -> OperationPayload {
    match *step {
        Step::Insert { uid: u, removed } => {
            let mut m = Member::new(uid(u), uid(u));
            m.removed = removed;
            OperationPayload::InsertMember(m)
        }
        Step::Remove { uid: u } => OperationPayload::RemoveMember(uid(u)),
        Step::Rename { uid: u, name } => OperationPayload::ModifyMember {
            id: uid(u),
            changes: MemberChanges {
                name: Some(format!("n{}", name)),
                ..Default::default()
            },
        },
        Step::Pay { tx, creditor, debtor, amount } => {
            let mut t = Transaction::new(tx_id(tx));
            t.timestamp = 1;
            t.creditors = vec![Participant::new(uid(creditor), amount as f64)];
            t.debtors = vec![Participant::new(uid(debtor), amount as f64)];
            OperationPayload::InsertTransaction(t)
        }
        Step::Repoint { tx, debtor } => OperationPayload::ModifyTransaction {
            id: tx_id(tx),
            changes: TransactionChanges {
                debtors: Some(vec![Participant::new(uid(debtor), 1.0)]),
                ..Default::default()
            },
        },
        Step::ChangeId { from, to } => OperationPayload::ChangeMemberId {
            from: uid(from),
            to: uid(to),
        },
    }
}

fuzz_target!(|input: EvalInput| {
    if input.steps.len() > 200 {
        return;
    }

    let ops: Vec<Operation> = input
        .steps
        .iter()
        .filter_map(|s| Operation::create(payload(s)).ok())
        .collect();

    let base = Group::new("g1", "fuzz").with_member(Member::new("m0", "zero"));
    let base = input.with_base.then_some(&base);
    let policy = if input.strict {
        ReferencePolicy::Strict
    } else {
        ReferencePolicy::Lenient
    };

    let first = evaluate(base, &ops, policy);
    let second = evaluate(base, &ops, policy);
    assert_eq!(first, second, "evaluation must be deterministic");

    if policy == ReferencePolicy::Lenient {
        assert!(first.is_ok(), "lenient evaluation never fails");
    }

    if let Ok(Some(group)) = first {
        // Every member is keyed by its own uid
        for (key, member) in &group.members {
            assert_eq!(key, &member.uid);
        }
    }
});
