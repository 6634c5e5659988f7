//! Rolling conversation transcript
//!
//! Holds the ordered turns of one session together with a running character
//! total and the exchange counter. Characters stand in for tokens: the total
//! is compared against a character budget, and once it goes over, the oldest
//! turns are dropped until the total is back under 90% of the budget. Draining
//! below the trigger point means a conversation sitting near the limit does
//! not evict again on every exchange.

#[cfg(test)]
mod proptests;

use crate::llm::{ChatMessage, ChatRole};
use serde::Serialize;

/// Eviction drains the transcript to `NUMERATOR / DENOMINATOR` of the budget
const FLOOR_NUMERATOR: u128 = 9;
const FLOOR_DENOMINATOR: u128 = 10;

/// Author of a stored turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl From<TurnRole> for ChatRole {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::User => ChatRole::User,
            TurnRole::Assistant => ChatRole::Assistant,
        }
    }
}

/// One stored message. The user question and the assistant answer of an
/// exchange carry the same `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    index: u64,
    role: TurnRole,
    content: String,
    #[serde(skip)]
    len: usize,
}

impl Turn {
    fn new(index: u64, role: TurnRole, content: String) -> Self {
        let len = char_len(&content);
        Self {
            index,
            role,
            content,
            len,
        }
    }

    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[must_use]
    pub fn role(&self) -> TurnRole {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Length counted against the budget
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn to_message(&self) -> ChatMessage {
        ChatMessage::new(self.role.into(), self.content.clone())
    }
}

/// Budget length of a text: Unicode scalar values, not bytes
#[must_use]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// What one eviction pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub turns_removed: usize,
    pub chars_released: usize,
}

impl EvictionReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns_removed == 0
    }
}

/// Session transcript with a character budget
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    turns: Vec<Turn>,
    total_len: usize,
    turn_counter: u64,
    max_context_len: usize,
}

impl TranscriptStore {
    #[must_use]
    pub fn new(max_context_len: usize) -> Self {
        Self {
            turns: Vec::new(),
            total_len: 0,
            turn_counter: 0,
            max_context_len,
        }
    }

    /// Start a new exchange. Returns its index, which the matching
    /// assistant turn must reuse.
    pub fn append_user_turn(&mut self, text: impl Into<String>) -> u64 {
        self.turn_counter += 1;
        self.push(Turn::new(self.turn_counter, TurnRole::User, text.into()));
        self.turn_counter
    }

    /// Record the answer for exchange `index`
    pub fn append_assistant_turn(&mut self, index: u64, text: impl Into<String>) {
        self.push(Turn::new(index, TurnRole::Assistant, text.into()));
    }

    fn push(&mut self, turn: Turn) {
        self.total_len += turn.len();
        self.turns.push(turn);
    }

    /// Drop the oldest turns once the total exceeds the budget.
    ///
    /// Nothing happens at or below the budget. Above it, turns leave from
    /// the front one at a time until the total is at or below the eviction
    /// floor or the transcript is empty. This may remove the turn that was
    /// just appended.
    pub fn evict_if_over_budget(&mut self) -> EvictionReport {
        if self.total_len <= self.max_context_len {
            return EvictionReport::default();
        }

        let floor = self.eviction_floor();
        let mut remaining = self.total_len;
        let mut count = 0;
        for turn in &self.turns {
            if remaining <= floor {
                break;
            }
            remaining -= turn.len();
            count += 1;
        }

        self.turns.drain(..count);
        let report = EvictionReport {
            turns_removed: count,
            chars_released: self.total_len - remaining,
        };
        self.total_len = remaining;
        report
    }

    /// Total the transcript is drained to once eviction fires
    #[must_use]
    pub fn eviction_floor(&self) -> usize {
        let floor = self.max_context_len as u128 * FLOOR_NUMERATOR / FLOOR_DENOMINATOR;
        usize::try_from(floor).unwrap_or(usize::MAX)
    }

    /// Role/content pairs of every turn, oldest first
    #[must_use]
    pub fn snapshot_for_provider(&self) -> Vec<ChatMessage> {
        self.turns.iter().map(Turn::to_message).collect()
    }

    /// Every stored turn, oldest first
    #[must_use]
    pub fn all_turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    #[must_use]
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    #[must_use]
    pub fn max_context_len(&self) -> usize {
        self.max_context_len
    }

    /// Number of exchanges started, including evicted ones
    #[must_use]
    pub fn turn_counter(&self) -> u64 {
        self.turn_counter
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
