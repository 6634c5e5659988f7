//! Property-based tests for the transcript budget
//!
//! Arbitrary sequences of appends and evictions must keep:
//! - the running total equal to the sum of stored lengths
//! - the total within budget after an eviction pass, or the transcript empty
//! - survivors as an untouched suffix of the pre-eviction turns
//! - assistant turns preceded by the user turn of the same exchange

use super::*;
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Op {
    User(String),
    Assistant(String),
    Evict,
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-z ]{0,40}",
        1 => "[a-z]{60,250}",
        1 => "[\u{e0}-\u{ff}\u{1f600}-\u{1f64f}]{0,20}",
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_text().prop_map(Op::User),
        3 => arb_text().prop_map(Op::Assistant),
        2 => Just(Op::Evict),
    ]
}

fn stored_sum(store: &TranscriptStore) -> usize {
    store.all_turns().iter().map(|t| t.content().chars().count()).sum()
}

/// Apply an op the way the controller does: assistant turns reuse the
/// current exchange index and are only added after a user turn.
fn apply(store: &mut TranscriptStore, op: &Op) {
    match op {
        Op::User(text) => {
            store.append_user_turn(text.clone());
        }
        Op::Assistant(text) => {
            if store.turn_counter() > 0 {
                store.append_assistant_turn(store.turn_counter(), text.clone());
            }
        }
        Op::Evict => {
            store.evict_if_over_budget();
        }
    }
}

proptest! {
    #[test]
    fn prop_total_matches_stored_content(
        budget in 0usize..400,
        ops in proptest::collection::vec(arb_op(), 0..60),
    ) {
        let mut store = TranscriptStore::new(budget);
        for op in &ops {
            apply(&mut store, op);
            prop_assert_eq!(store.total_len(), stored_sum(&store));
        }
    }

    #[test]
    fn prop_eviction_respects_budget(
        budget in 0usize..400,
        ops in proptest::collection::vec(arb_op(), 0..60),
    ) {
        let mut store = TranscriptStore::new(budget);
        for op in &ops {
            apply(&mut store, op);
        }

        let before = store.total_len();
        let report = store.evict_if_over_budget();

        if before <= budget {
            prop_assert!(report.is_empty());
            prop_assert_eq!(store.total_len(), before);
        } else {
            prop_assert!(report.turns_removed >= 1);
            prop_assert!(store.is_empty() || store.total_len() <= store.eviction_floor());
            prop_assert_eq!(report.chars_released, before - store.total_len());
        }
    }

    #[test]
    fn prop_eviction_removes_only_from_front(
        budget in 0usize..400,
        ops in proptest::collection::vec(arb_op(), 0..60),
    ) {
        let mut store = TranscriptStore::new(budget);
        for op in &ops {
            apply(&mut store, op);
        }

        let before = store.all_turns().to_vec();
        let report = store.evict_if_over_budget();
        let after = store.all_turns();

        prop_assert_eq!(after.len() + report.turns_removed, before.len());
        prop_assert_eq!(after, &before[report.turns_removed..]);
    }

    #[test]
    fn prop_eviction_is_idempotent(
        budget in 0usize..400,
        ops in proptest::collection::vec(arb_op(), 0..60),
    ) {
        let mut store = TranscriptStore::new(budget);
        for op in &ops {
            apply(&mut store, op);
        }

        store.evict_if_over_budget();
        let settled = store.all_turns().to_vec();
        let total = store.total_len();

        prop_assert!(store.evict_if_over_budget().is_empty());
        prop_assert_eq!(store.all_turns(), settled.as_slice());
        prop_assert_eq!(store.total_len(), total);
    }

    #[test]
    fn prop_assistant_turns_follow_their_user_turn(
        budget in 0usize..400,
        ops in proptest::collection::vec(arb_op(), 0..60),
    ) {
        let mut store = TranscriptStore::new(budget);
        // Every user index ever appended, including ones evicted later
        let mut seen_users = HashSet::new();

        for op in &ops {
            apply(&mut store, op);
            if let Some(last) = store.last_turn() {
                match (op, last.role()) {
                    (Op::User(_), TurnRole::User) => {
                        seen_users.insert(last.index());
                    }
                    (Op::Assistant(_), TurnRole::Assistant) => {
                        prop_assert!(seen_users.contains(&last.index()));
                    }
                    _ => {}
                }
            }
        }

        let turns = store.all_turns();
        for (pos, turn) in turns.iter().enumerate() {
            if turn.role() == TurnRole::Assistant {
                if let Some(user_pos) = turns
                    .iter()
                    .position(|t| t.role() == TurnRole::User && t.index() == turn.index())
                {
                    prop_assert!(user_pos < pos);
                }
            }
        }
    }

    #[test]
    fn prop_counter_counts_user_inputs(
        ops in proptest::collection::vec(arb_op(), 0..60),
    ) {
        let mut store = TranscriptStore::new(50);
        for op in &ops {
            apply(&mut store, op);
        }
        let users = ops.iter().filter(|op| matches!(op, Op::User(_))).count() as u64;
        prop_assert_eq!(store.turn_counter(), users);
    }
}
