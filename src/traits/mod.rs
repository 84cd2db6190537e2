//! Personality trait model.
//!
//! A persona's personality is described in two layers: a *base schema*
//! defining every trait slot (its kind, valid range or options, and default)
//! plus cross-slot constraint rules, and a persona-specific *overlay*
//! supplying values for some of those slots together with expertise areas,
//! speaking patterns, and contextual response modifiers. [`merge`] combines
//! the two into an immutable [`TraitProfile`], validating every slot and
//! constraint on the way.

mod profile;

pub use profile::TraitProfile;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Trait values and slot definitions
// ---------------------------------------------------------------------------

/// A single trait value: a 1–10 scale or an enumerated choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraitValue {
    /// Numeric scale value.
    Scale(i64),
    /// Enumerated string value.
    Text(String),
}

impl TraitValue {
    pub fn as_scale(&self) -> Option<i64> {
        match self {
            TraitValue::Scale(n) => Some(*n),
            TraitValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TraitValue::Text(s) => Some(s),
            TraitValue::Scale(_) => None,
        }
    }
}

/// The kind of a trait slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraitKind {
    /// Integer scale, bounded by `range`.
    Scale,
    /// String choice from `options`.
    Enum,
}

/// Definition of one trait slot in the base schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitDefinition {
    pub kind: TraitKind,
    /// Inclusive `[min, max]` for scale slots.
    #[serde(default)]
    pub range: Option<[i64; 2]>,
    /// Valid values for enum slots.
    #[serde(default)]
    pub options: Vec<String>,
    pub default: TraitValue,
    #[serde(default)]
    pub description: String,
}

impl TraitDefinition {
    fn scale(default: i64, description: &str) -> Self {
        Self {
            kind: TraitKind::Scale,
            range: Some([1, 10]),
            options: Vec::new(),
            default: TraitValue::Scale(default),
            description: description.to_string(),
        }
    }

    fn choice(options: &[&str], default: &str, description: &str) -> Self {
        Self {
            kind: TraitKind::Enum,
            range: None,
            options: options.iter().map(|s| s.to_string()).collect(),
            default: TraitValue::Text(default.to_string()),
            description: description.to_string(),
        }
    }
}

/// A cross-slot constraint over numeric core traits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintRule {
    pub traits: Vec<String>,
    #[serde(default)]
    pub min_total: Option<i64>,
    #[serde(default)]
    pub max_total: Option<i64>,
    #[serde(default)]
    pub description: String,
}

// ---------------------------------------------------------------------------
// Base schema
// ---------------------------------------------------------------------------

/// The base trait schema: slot definitions per category plus constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseSchema {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub core_dimensions: HashMap<String, TraitDefinition>,
    #[serde(default)]
    pub communication_style: HashMap<String, TraitDefinition>,
    #[serde(default)]
    pub biases_and_tendencies: HashMap<String, TraitDefinition>,
    #[serde(default)]
    pub response_patterns: HashMap<String, TraitDefinition>,
    #[serde(default)]
    pub decision_making: HashMap<String, TraitDefinition>,
    #[serde(default)]
    pub temporal_orientation: HashMap<String, TraitDefinition>,
    #[serde(default)]
    pub learning_style: HashMap<String, TraitDefinition>,
    #[serde(default)]
    pub constraints: Vec<ConstraintRule>,
}

impl BaseSchema {
    /// The compiled-in default schema. Personas can be built from a JSON
    /// overlay alone against this schema; deployments with custom trait
    /// vocabularies load their own.
    pub fn builtin() -> Self {
        let mut core = HashMap::new();
        core.insert("creativity".into(), TraitDefinition::scale(5, "Novel idea generation"));
        core.insert("analytical".into(), TraitDefinition::scale(5, "Systematic, logical reasoning"));
        core.insert("optimism".into(), TraitDefinition::scale(5, "Positive outlook"));
        core.insert("risk_tolerance".into(), TraitDefinition::scale(5, "Comfort with uncertainty"));
        core.insert("empathy".into(), TraitDefinition::scale(5, "Orientation toward others"));
        core.insert("assertiveness".into(), TraitDefinition::scale(5, "Willingness to take a position"));
        core.insert("emotional_stability".into(), TraitDefinition::scale(5, "Evenness under pressure"));

        let mut communication = HashMap::new();
        communication.insert(
            "formality".into(),
            TraitDefinition::choice(&["formal", "professional", "casual"], "professional", "Register"),
        );
        communication.insert(
            "directness".into(),
            TraitDefinition::choice(&["direct", "balanced", "diplomatic"], "balanced", "Bluntness"),
        );
        communication.insert(
            "verbosity".into(),
            TraitDefinition::choice(
                &["terse", "concise", "balanced", "detailed", "verbose"],
                "balanced",
                "Response length",
            ),
        );

        let mut biases = HashMap::new();
        biases.insert("confirmation_bias".into(), TraitDefinition::scale(5, "Preference for confirming evidence"));
        biases.insert("recency_bias".into(), TraitDefinition::scale(5, "Weight given to recent events"));

        let mut response = HashMap::new();
        response.insert("question_tendency".into(), TraitDefinition::scale(5, "Propensity to probe with questions"));
        response.insert("example_usage".into(), TraitDefinition::scale(5, "Use of examples and analogies"));
        response.insert("contrarian_level".into(), TraitDefinition::scale(5, "Challenge to assumptions"));
        response.insert("solution_orientation".into(), TraitDefinition::scale(5, "Focus on actionable next steps"));

        let mut decision = HashMap::new();
        decision.insert("data_vs_intuition".into(), TraitDefinition::scale(5, "Evidence-driven vs gut-driven"));
        decision.insert("speed_vs_thoroughness".into(), TraitDefinition::scale(5, "Fast calls vs exhaustive review"));

        let mut temporal = HashMap::new();
        temporal.insert("future_focus".into(), TraitDefinition::scale(5, "Orientation toward long-term outcomes"));

        let mut learning = HashMap::new();
        learning.insert("experimentation".into(), TraitDefinition::scale(5, "Appetite for trying things"));

        Self {
            version: "1".into(),
            description: "Built-in boardroom trait schema".into(),
            core_dimensions: core,
            communication_style: communication,
            biases_and_tendencies: biases,
            response_patterns: response,
            decision_making: decision,
            temporal_orientation: temporal,
            learning_style: learning,
            constraints: vec![ConstraintRule {
                traits: vec!["creativity".into(), "analytical".into()],
                min_total: Some(4),
                max_total: Some(18),
                description: "creativity and analytical must stay in balance".into(),
            }],
        }
    }

    fn category(&self, name: &str) -> Option<&HashMap<String, TraitDefinition>> {
        match name {
            "core_dimensions" => Some(&self.core_dimensions),
            "communication_style" => Some(&self.communication_style),
            "biases_and_tendencies" => Some(&self.biases_and_tendencies),
            "response_patterns" => Some(&self.response_patterns),
            "decision_making" => Some(&self.decision_making),
            "temporal_orientation" => Some(&self.temporal_orientation),
            "learning_style" => Some(&self.learning_style),
            _ => None,
        }
    }
}

/// All merge-able category names, in presentation order.
pub(crate) const CATEGORIES: [&str; 7] = [
    "core_dimensions",
    "communication_style",
    "biases_and_tendencies",
    "response_patterns",
    "decision_making",
    "temporal_orientation",
    "learning_style",
];

// ---------------------------------------------------------------------------
// Overlay
// ---------------------------------------------------------------------------

/// Language patterns a persona leans on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakingPatterns {
    pub common_phrases: Vec<String>,
    pub avoids_phrases: Vec<String>,
    pub favorite_analogies: Vec<String>,
    pub favorite_frameworks: Vec<String>,
}

/// What energizes and frustrates a persona.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionalTriggers {
    pub energizers: Vec<String>,
    pub frustrations: Vec<String>,
}

/// Sparse overrides applied on top of the merged profile for one context tag.
pub type TraitModifier = HashMap<String, TraitValue>;

/// A persona-specific trait overlay, typically loaded from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraitOverlay {
    pub persona_type: String,
    pub name: String,
    pub description: String,
    pub core_dimensions: HashMap<String, TraitValue>,
    pub communication_style: HashMap<String, TraitValue>,
    pub biases_and_tendencies: HashMap<String, TraitValue>,
    pub response_patterns: HashMap<String, TraitValue>,
    pub decision_making: HashMap<String, TraitValue>,
    pub temporal_orientation: HashMap<String, TraitValue>,
    pub learning_style: HashMap<String, TraitValue>,
    pub expertise_areas: Vec<String>,
    pub custom_traits: HashMap<String, TraitValue>,
    pub speaking_patterns: SpeakingPatterns,
    pub emotional_triggers: EmotionalTriggers,
    /// Context tag → sparse trait overrides (e.g. "excited", "analysis").
    pub response_modifiers: HashMap<String, TraitModifier>,
}

impl TraitOverlay {
    /// Parse an overlay from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::TraitConstraint(format!("overlay parse failed: {e}")))
    }

    fn category(&self, name: &str) -> Option<&HashMap<String, TraitValue>> {
        match name {
            "core_dimensions" => Some(&self.core_dimensions),
            "communication_style" => Some(&self.communication_style),
            "biases_and_tendencies" => Some(&self.biases_and_tendencies),
            "response_patterns" => Some(&self.response_patterns),
            "decision_making" => Some(&self.decision_making),
            "temporal_orientation" => Some(&self.temporal_orientation),
            "learning_style" => Some(&self.learning_style),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Merge & validation
// ---------------------------------------------------------------------------

/// Merge an overlay onto the base schema, producing a validated, immutable
/// trait profile. For each slot defined in the base, the overlay value wins
/// when present (type-checked against the slot definition), otherwise the
/// slot default applies. Expertise, speaking patterns, triggers, modifiers,
/// and custom traits pass through verbatim.
pub fn merge(base: &BaseSchema, overlay: &TraitOverlay) -> Result<TraitProfile> {
    let mut profile = TraitProfile {
        persona_type: overlay.persona_type.clone(),
        expertise_areas: overlay.expertise_areas.clone(),
        custom_traits: overlay.custom_traits.clone(),
        speaking_patterns: overlay.speaking_patterns.clone(),
        emotional_triggers: overlay.emotional_triggers.clone(),
        response_modifiers: overlay.response_modifiers.clone(),
        ..TraitProfile::default()
    };

    for category in CATEGORIES {
        let defs = base.category(category).expect("known category");
        let overrides = overlay.category(category).expect("known category");
        let target = profile.category_mut(category).expect("known category");
        for (slot, def) in defs {
            let value = match overrides.get(slot) {
                Some(v) => {
                    validate_value(v, def, slot)?;
                    v.clone()
                }
                None => def.default.clone(),
            };
            target.insert(slot.clone(), value);
        }
    }

    validate_constraints(base, &profile)?;
    Ok(profile)
}

/// Validate a single value against its slot definition.
fn validate_value(value: &TraitValue, def: &TraitDefinition, slot: &str) -> Result<()> {
    match def.kind {
        TraitKind::Scale => {
            let n = value.as_scale().ok_or_else(|| {
                Error::TraitConstraint(format!("trait {slot} must be numeric"))
            })?;
            if let Some([min, max]) = def.range {
                if n < min || n > max {
                    return Err(Error::TraitConstraint(format!(
                        "trait {slot} value {n} is outside [{min}, {max}]"
                    )));
                }
            }
        }
        TraitKind::Enum => {
            let s = value.as_text().ok_or_else(|| {
                Error::TraitConstraint(format!("trait {slot} must be a string"))
            })?;
            if !def.options.iter().any(|o| o == s) {
                return Err(Error::TraitConstraint(format!(
                    "trait {slot} value '{s}' is not one of {:?}",
                    def.options
                )));
            }
        }
    }
    Ok(())
}

/// Validate every cross-slot constraint rule against the merged profile.
fn validate_constraints(base: &BaseSchema, profile: &TraitProfile) -> Result<()> {
    for rule in &base.constraints {
        let total: i64 = rule
            .traits
            .iter()
            .filter_map(|name| profile.core_dimensions.get(name))
            .filter_map(TraitValue::as_scale)
            .sum();
        if let Some(max) = rule.max_total {
            if total > max {
                return Err(Error::TraitConstraint(format!(
                    "{}: total {total} exceeds max {max}",
                    rule.description
                )));
            }
        }
        if let Some(min) = rule.min_total {
            if total < min {
                return Err(Error::TraitConstraint(format!(
                    "{}: total {total} below min {min}",
                    rule.description
                )));
            }
        }
    }
    Ok(())
}
