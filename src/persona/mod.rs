//! Personas: parameterized agents with a trait profile and private memory.
//!
//! A persona owns its memory exclusively; no two personas share state. The
//! think pipeline in [`pipeline`] turns a prompt plus context into a model
//! request shaped by the persona's traits, and writes what it learned back
//! into memory.

mod pipeline;
mod prompt;

pub use pipeline::{LexicalAnalyzer, ResponseAnalyzer, ThinkingResult};
pub use prompt::{build_system_message, build_user_prompt};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;
use crate::memory::{MemoryKind, MemoryStore};
use crate::traits::{merge, BaseSchema, TraitOverlay, TraitProfile, TraitValue};

/// One turn of prior conversation carried into a think.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything a persona sees besides the prompt itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkingContext {
    pub topic: String,
    pub project_context: HashMap<String, serde_json::Value>,
    pub board_context: HashMap<String, serde_json::Value>,
    pub conversation_history: Vec<ConversationTurn>,
    /// Explicit emotional state; when empty it is inferred from the
    /// conversation.
    pub emotional_state: String,
    /// Focus tag selecting a response modifier ("analysis", ...).
    pub focus: String,
}

/// A parameterized agent: identity, immutable trait profile, owned memory.
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: String,
    pub traits: TraitProfile,
    pub memory: MemoryStore,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    analyzer: Arc<dyn ResponseAnalyzer>,
}

impl Persona {
    /// Build a persona from an already merged trait profile. Memory is
    /// seeded with the persona's core identity.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        traits: TraitProfile,
    ) -> Self {
        let id = id.into();
        let name = name.into();
        let mut memory = MemoryStore::new(id.clone());
        memory.seed_from_traits(&traits);
        memory.update_context("persona_name", json!(name.clone()));
        let now = Utc::now();
        Self {
            id,
            name,
            description: description.into(),
            traits,
            memory,
            created_at: now,
            updated_at: now,
            analyzer: Arc::new(LexicalAnalyzer),
        }
    }

    /// Rebuild a persona from persisted state without reseeding memory.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: String,
        name: String,
        description: String,
        traits: TraitProfile,
        memory: MemoryStore,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            description,
            traits,
            memory,
            created_at,
            updated_at,
            analyzer: Arc::new(LexicalAnalyzer),
        }
    }

    /// Build a persona from a JSON trait overlay against the built-in base
    /// schema.
    pub fn from_overlay_json(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        overlay_json: &str,
    ) -> Result<Self> {
        let overlay = TraitOverlay::from_json(overlay_json)?;
        let traits = merge(&BaseSchema::builtin(), &overlay)?;
        Ok(Self::new(id, name, description, traits))
    }

    /// Swap in a custom response analyzer strategy.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn ResponseAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub(crate) fn analyzer(&self) -> &dyn ResponseAnalyzer {
        self.analyzer.as_ref()
    }

    /// Apply memory limits from configuration, preserving contents.
    pub fn configure_memory(&mut self, short_term_limit: usize, long_term_limit: usize, decay_rate: f64) {
        self.memory.short_term_limit = short_term_limit;
        self.memory.long_term_limit = long_term_limit;
        self.memory.decay_rate = decay_rate;
    }

    /// Replace the trait profile after a revalidated update, leaving a
    /// personal memory of the change.
    pub fn update_traits(&mut self, overlay_json: &str) -> Result<()> {
        let overlay = TraitOverlay::from_json(overlay_json)?;
        let traits = merge(&BaseSchema::builtin(), &overlay)?;
        self.traits = traits;
        self.updated_at = Utc::now();
        self.memory.add(
            "My personality traits were updated",
            MemoryKind::Personal,
            0.7,
            vec!["personality".into(), "update".into()],
            HashMap::from([("event".into(), json!("traits_update"))]),
        );
        log::info!("persona traits updated persona_id={}", self.id);
        Ok(())
    }

    /// A copy of this persona with ±1 jitter on every scale trait and a
    /// fresh, reseeded memory that remembers its origin.
    pub fn clone_as(&self, new_id: impl Into<String>, new_name: impl Into<String>) -> Persona {
        let mut traits = self.traits.clone();
        let mut rng = rand::thread_rng();
        for value in traits.core_dimensions.values_mut() {
            if let TraitValue::Scale(n) = value {
                let jitter: i64 = rng.gen_range(-1..=1);
                *value = TraitValue::Scale((*n + jitter).clamp(1, 10));
            }
        }

        let mut clone = Persona::new(new_id, new_name, self.description.clone(), traits);
        clone.memory.add(
            format!("I am a variation of {} with similar but unique traits", self.name),
            MemoryKind::Personal,
            0.8,
            vec!["identity".into(), "origin".into()],
            HashMap::from([("original_persona".into(), json!(self.id))]),
        );
        clone
    }

    /// Summary of the persona for front-ends: key traits, communication
    /// style, expertise, and memory counters.
    pub fn profile(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "persona_type": self.traits.persona_type,
            "core_traits": {
                "creativity": self.traits.get_scale("core_dimensions", "creativity"),
                "analytical": self.traits.get_scale("core_dimensions", "analytical"),
                "optimism": self.traits.get_scale("core_dimensions", "optimism"),
                "risk_tolerance": self.traits.get_scale("core_dimensions", "risk_tolerance"),
                "empathy": self.traits.get_scale("core_dimensions", "empathy"),
                "assertiveness": self.traits.get_scale("core_dimensions", "assertiveness"),
            },
            "communication_style": {
                "formality": self.traits.get_choice("communication_style", "formality"),
                "directness": self.traits.get_choice("communication_style", "directness"),
                "verbosity": self.traits.get_choice("communication_style", "verbosity"),
            },
            "expertise_areas": self.traits.expertise_areas,
            "memory_stats": self.memory.stats(),
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}
