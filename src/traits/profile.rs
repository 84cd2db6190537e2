//! The merged, immutable trait profile and its contextual modifiers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{EmotionalTriggers, SpeakingPatterns, TraitModifier, TraitValue};

/// A merged view of a persona's personality: every slot of the base schema
/// resolved to a concrete value, plus the overlay's pass-through blocks.
///
/// Profiles are immutable after [`merge`](super::merge); contextual
/// adjustment goes through [`apply_modifier`](Self::apply_modifier), which
/// returns an adjusted copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraitProfile {
    pub persona_type: String,
    pub core_dimensions: HashMap<String, TraitValue>,
    pub communication_style: HashMap<String, TraitValue>,
    pub biases_and_tendencies: HashMap<String, TraitValue>,
    pub response_patterns: HashMap<String, TraitValue>,
    pub decision_making: HashMap<String, TraitValue>,
    pub temporal_orientation: HashMap<String, TraitValue>,
    pub learning_style: HashMap<String, TraitValue>,
    pub custom_traits: HashMap<String, TraitValue>,
    pub expertise_areas: Vec<String>,
    pub speaking_patterns: SpeakingPatterns,
    pub emotional_triggers: EmotionalTriggers,
    pub response_modifiers: HashMap<String, TraitModifier>,
}

impl TraitProfile {
    /// Look up a category map by name.
    pub fn category(&self, name: &str) -> Option<&HashMap<String, TraitValue>> {
        match name {
            "core_dimensions" => Some(&self.core_dimensions),
            "communication_style" => Some(&self.communication_style),
            "biases_and_tendencies" => Some(&self.biases_and_tendencies),
            "response_patterns" => Some(&self.response_patterns),
            "decision_making" => Some(&self.decision_making),
            "temporal_orientation" => Some(&self.temporal_orientation),
            "learning_style" => Some(&self.learning_style),
            "custom_traits" => Some(&self.custom_traits),
            _ => None,
        }
    }

    pub(crate) fn category_mut(
        &mut self,
        name: &str,
    ) -> Option<&mut HashMap<String, TraitValue>> {
        match name {
            "core_dimensions" => Some(&mut self.core_dimensions),
            "communication_style" => Some(&mut self.communication_style),
            "biases_and_tendencies" => Some(&mut self.biases_and_tendencies),
            "response_patterns" => Some(&mut self.response_patterns),
            "decision_making" => Some(&mut self.decision_making),
            "temporal_orientation" => Some(&mut self.temporal_orientation),
            "learning_style" => Some(&mut self.learning_style),
            "custom_traits" => Some(&mut self.custom_traits),
            _ => None,
        }
    }

    /// Numeric trait accessor. Returns the schema midpoint 5 when the slot
    /// is missing or non-numeric.
    pub fn get_scale(&self, category: &str, name: &str) -> i64 {
        self.category(category)
            .and_then(|c| c.get(name))
            .and_then(TraitValue::as_scale)
            .unwrap_or(5)
    }

    /// String trait accessor. Returns `""` when the slot is missing or
    /// non-string.
    pub fn get_choice(&self, category: &str, name: &str) -> String {
        self.category(category)
            .and_then(|c| c.get(name))
            .and_then(TraitValue::as_text)
            .unwrap_or("")
            .to_string()
    }

    /// Whether a response modifier is defined for the given context tag.
    pub fn has_modifier(&self, context: &str) -> bool {
        self.response_modifiers.contains_key(context)
    }

    /// Return a copy of this profile with the overrides for `context`
    /// applied. Each override lands in whichever category already defines
    /// the key (core dimensions, communication style, then response
    /// patterns); unknown keys are ignored. The receiver is not mutated,
    /// and reapplying the same context is a no-op on the result.
    pub fn apply_modifier(&self, context: &str) -> TraitProfile {
        let Some(modifier) = self.response_modifiers.get(context) else {
            return self.clone();
        };
        let modifier = modifier.clone();
        let mut adjusted = self.clone();
        for (key, value) in modifier {
            for category in ["core_dimensions", "communication_style", "response_patterns"] {
                let map = adjusted.category_mut(category).expect("known category");
                if map.contains_key(&key) {
                    map.insert(key.clone(), value.clone());
                    break;
                }
            }
        }
        adjusted
    }
}
