//! Per-persona episodic memory.
//!
//! Each persona exclusively owns a [`MemoryStore`] with three tiers:
//! a short-term FIFO of recent entries, a long-term store of consolidated
//! entries ranked by importance, and a volatile working set rebuilt for each
//! think. Consolidation merges similar short-term entries into long-term
//! storage, after which decay erodes old entries until they are evicted.

mod queue;
mod store;

pub use queue::{FlushJob, FlushKind, PersistQueue};
pub use store::{MemoryStats, MemoryStore, DECAY_FLOOR};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The kind of a memory entry, used for scoring bonuses and merge gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// A prompt or response from a conversation turn.
    Interaction,
    /// Extracted insight or domain fact.
    Knowledge,
    /// Self-descriptive memory (identity, habits).
    Personal,
    /// Emotionally charged memory.
    Emotional,
    /// Recognized behavioral pattern.
    Pattern,
}

impl MemoryKind {
    /// Relevance multiplier applied during retrieval scoring.
    pub fn score_bonus(&self) -> f64 {
        match self {
            MemoryKind::Emotional => 1.15,
            MemoryKind::Pattern => 1.10,
            MemoryKind::Personal => 1.05,
            MemoryKind::Interaction | MemoryKind::Knowledge => 1.0,
        }
    }
}

/// A single memory entry. Immutable once written, except for `decay`,
/// which only ever decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    /// Importance weight in [0, 1].
    pub weight: f64,
    /// Remaining strength in [0, 1]; fresh entries start at 1.0.
    pub decay: f64,
    pub kind: MemoryKind,
    /// Free-form context captured at write time.
    pub context: HashMap<String, Value>,
}

impl MemoryEntry {
    pub fn new(
        content: impl Into<String>,
        kind: MemoryKind,
        weight: f64,
        tags: Vec<String>,
        context: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            tags,
            weight: weight.clamp(0.0, 1.0),
            decay: 1.0,
            kind,
            context,
        }
    }

    /// Combined importance used for consolidation ordering and eviction.
    pub fn importance(&self) -> f64 {
        self.weight * self.decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bonuses() {
        assert_eq!(MemoryKind::Emotional.score_bonus(), 1.15);
        assert_eq!(MemoryKind::Pattern.score_bonus(), 1.10);
        assert_eq!(MemoryKind::Personal.score_bonus(), 1.05);
        assert_eq!(MemoryKind::Interaction.score_bonus(), 1.0);
    }

    #[test]
    fn test_entry_weight_clamped() {
        let entry = MemoryEntry::new("x", MemoryKind::Knowledge, 1.5, vec![], HashMap::new());
        assert_eq!(entry.weight, 1.0);
        assert_eq!(entry.decay, 1.0);
        assert_eq!(entry.importance(), 1.0);
    }
}
