//! Property-based tests using proptest
//!
//! Transaction change sets, history cursor behaviour, tags and wire
//! decoding under randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use std::sync::Arc;
use table_session::engine::{
    AttributeChange, AttributeDelta, AttributeName, CommandContext, CommandHistory,
    TransactionalState, Value,
};
use table_session::protocol::message::Envelope;
use table_session::protocol::tag::{is_valid_tag, TagGenerator};

#[derive(Debug, Clone)]
enum Op {
    Set(u8, i64),
    Remove(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, -3i64..3).prop_map(|(k, v)| Op::Set(k, v)),
        (0u8..6).prop_map(Op::Remove),
    ]
}

fn key(k: u8) -> AttributeName {
    AttributeName::application(format!("k{k}"))
}

fn apply(state: &mut TransactionalState, op: &Op) {
    match op {
        Op::Set(k, v) => {
            let name = key(*k);
            if state.contains_attribute(&name) {
                state.set_attribute(name, Value::Integer(*v)).unwrap();
            } else {
                state.add_attribute(name, Value::Integer(*v)).unwrap();
            }
        }
        Op::Remove(k) => {
            let name = key(*k);
            if state.contains_attribute(&name) {
                state.remove_attribute(&name).unwrap();
            }
        }
    }
}

fn snapshot(state: &TransactionalState) -> Vec<(AttributeName, Value)> {
    state
        .attributes()
        .map(|(name, value)| (name.clone(), (**value).clone()))
        .collect()
}

// Property: the change set names exactly the attributes whose final value
// differs from the committed one; round trips to the same value vanish.
proptest! {
    #[test]
    fn prop_change_set_matches_net_difference(
        initial in prop::collection::vec(op(), 0..12),
        ops in prop::collection::vec(op(), 0..24),
    ) {
        let mut state = TransactionalState::new();
        state.begin_transaction().unwrap();
        for op in &initial {
            apply(&mut state, op);
        }
        state.prepare_to_commit_transaction().unwrap();
        state.commit_transaction().unwrap();
        let before = snapshot(&state);

        state.begin_transaction().unwrap();
        for op in &ops {
            apply(&mut state, op);
        }
        state.prepare_to_commit_transaction().unwrap();
        let changes = state.attribute_changes().unwrap();
        let after = snapshot(&state);

        for change in &changes {
            let old = before.iter().find(|(n, _)| n == change.name()).map(|(_, v)| v);
            let new = after.iter().find(|(n, _)| n == change.name()).map(|(_, v)| v);
            prop_assert_ne!(old, new);
            prop_assert_eq!(change.old_value().map(|v| &**v), old);
            prop_assert_eq!(change.new_value().map(|v| &**v), new);
        }
        let differing = (0u8..6)
            .filter(|k| {
                let name = key(*k);
                before.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
                    != after.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
            })
            .count();
        prop_assert_eq!(changes.len(), differing);

        state.rollback_transaction().unwrap();
        prop_assert_eq!(snapshot(&state), before);
    }
}

// Property: adding after any number of undos drops exactly the redo branch.
proptest! {
    #[test]
    fn prop_history_add_truncates_redo_branch(total in 1usize..20, undos in 0usize..20) {
        let mut history = CommandHistory::new();
        let entry = |sequence: u64| {
            let change = AttributeChange::Added {
                name: AttributeName::application(format!("e{sequence}")),
                new_value: Arc::new(Value::Integer(sequence as i64)),
            };
            let command = Arc::new(AttributeDelta::from_changes("entry", [&change]));
            (command, CommandContext { sequence, issued_at_ms: 0 })
        };

        for sequence in 0..total as u64 {
            let (command, context) = entry(sequence);
            history.add(command, context);
        }
        let undone = undos.min(total);
        for _ in 0..undos {
            history.undo();
        }
        prop_assert_eq!(history.can_redo(), undone > 0);

        let (command, context) = entry(1000);
        history.add(command, context);
        prop_assert_eq!(history.len(), total - undone + 1);
        prop_assert!(!history.can_redo());
        prop_assert!(history.can_undo());
    }
}

// Property: generated tags always stay within the valid range
proptest! {
    #[test]
    fn prop_tags_stay_in_range(draws in 1usize..3000) {
        let tags = TagGenerator::new();
        for _ in 0..draws {
            prop_assert!(is_valid_tag(tags.next_tag()));
        }
    }
}

// Property: decoding arbitrary bytes never panics
proptest! {
    #[test]
    fn prop_envelope_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Envelope::decode(&data);
    }
}
