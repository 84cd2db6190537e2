//! The persona think pipeline.
//!
//! One think runs: state gating → contextual trait modifiers → memory
//! retrieval → prompt assembly → trait-derived model parameters → backend
//! call → response post-processing → memory write. Every model interaction
//! is recorded in the interaction log, successes and failures alike.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;

use crate::error::{Error, Result};
use crate::llms::{GenerationRequest, GenerationResponse, ModelBackend, TokenUsage};
use crate::memory::MemoryKind;
use crate::storage::{InteractionLogEntry, InteractionLogger, LogOutcome};
use crate::traits::TraitProfile;

use super::{build_system_message, build_user_prompt, Persona, ThinkingContext};

/// How many trailing conversation turns are scanned for emotional cues.
const EMOTION_SCAN_TURNS: usize = 3;

/// How many memories a think retrieves.
const RETRIEVAL_LIMIT: usize = 5;

/// The outcome of one persona think.
#[derive(Debug, Clone)]
pub struct ThinkingResult {
    pub content: String,
    /// "Logical", "Intuitive", or "Mixed".
    pub reasoning_tag: String,
    pub confidence: f64,
    pub emotional_tone: String,
    /// The state the persona thought under.
    pub emotional_state: String,
    pub insights: Vec<String>,
    pub questions: Vec<String>,
    pub recommendations: Vec<String>,
    /// Ids of the memories retrieved for this think.
    pub memories_used: Vec<String>,
    /// Core trait name → normalized influence in [0, 1].
    pub traits_influence: HashMap<String, f64>,
    pub usage: TokenUsage,
    pub tokens_used: u32,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Response analysis strategy
// ---------------------------------------------------------------------------

/// Strategy for extracting structure from a raw model response. The
/// contract is loose on purpose: each method returns some subset of the
/// response's non-empty lines.
pub trait ResponseAnalyzer: Send + Sync {
    fn insights(&self, content: &str) -> Vec<String>;
    fn questions(&self, content: &str) -> Vec<String>;
    fn recommendations(&self, content: &str) -> Vec<String>;
}

/// Default keyword-based analyzer.
pub struct LexicalAnalyzer;

impl LexicalAnalyzer {
    fn lines_matching(content: &str, predicate: impl Fn(&str) -> bool) -> Vec<String> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && predicate(&line.to_lowercase()))
            .map(str::to_string)
            .collect()
    }
}

impl ResponseAnalyzer for LexicalAnalyzer {
    fn insights(&self, content: &str) -> Vec<String> {
        Self::lines_matching(content, |l| {
            l.contains("key insight") || l.contains("important") || l.contains("crucial")
        })
    }

    fn questions(&self, content: &str) -> Vec<String> {
        Self::lines_matching(content, |l| l.contains('?'))
    }

    fn recommendations(&self, content: &str) -> Vec<String> {
        Self::lines_matching(content, |l| {
            l.contains("recommend") || l.contains("suggest") || l.contains("should")
        })
    }
}

// ---------------------------------------------------------------------------
// Think
// ---------------------------------------------------------------------------

impl Persona {
    /// Run the full think pipeline for one prompt. Memory writes land in
    /// this persona's own store; the caller owns flushing them to
    /// persistence.
    pub async fn think(
        &mut self,
        backend: &dyn ModelBackend,
        logger: Option<&InteractionLogger>,
        session_id: Option<&str>,
        prompt: &str,
        context: &ThinkingContext,
    ) -> Result<ThinkingResult> {
        if prompt.trim().is_empty() {
            return Err(Error::BadInput("prompt cannot be empty".into()));
        }

        log::debug!(
            "persona thinking started persona_id={} prompt_len={}",
            self.id,
            prompt.len()
        );

        let emotional_state = self.determine_emotional_state(context);
        let working_traits = self.contextual_traits(context, &emotional_state);

        self.memory.rebuild_working(prompt);
        let memories = self.memory.retrieve(prompt, RETRIEVAL_LIMIT);
        let memories_used: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();

        let system_msg =
            build_system_message(&self.name, &self.description, &working_traits, &emotional_state);
        let user_prompt =
            build_user_prompt(prompt, context, &memories, &working_traits, &emotional_state);

        let request = GenerationRequest {
            prompt: user_prompt,
            system_msg: Some(system_msg),
            temperature: derive_temperature(&working_traits),
            max_tokens: derive_max_tokens(&working_traits),
            model: None,
            context: context.project_context.clone(),
        };

        let response = match backend.generate(&request).await {
            Ok(resp) => resp,
            Err(err) => {
                if let Some(logger) = logger {
                    logger.append(self.log_entry(
                        &request,
                        session_id,
                        &err.to_string(),
                        backend.model_info().name,
                        0,
                        0,
                        LogOutcome::Failed,
                    ));
                }
                log::warn!("persona think failed persona_id={} error={err}", self.id);
                return Err(err);
            }
        };

        let result = self.post_process(&response, &working_traits, memories_used, &emotional_state);

        self.store_interaction(prompt, &result, context, &emotional_state);

        if let Some(logger) = logger {
            logger.append(self.log_entry(
                &request,
                session_id,
                &response.content,
                response.model.clone(),
                response.tokens_used,
                response.duration_ms,
                LogOutcome::Ok,
            ));
        }

        log::debug!(
            "persona thinking completed persona_id={} tokens={} confidence={:.2}",
            self.id,
            result.tokens_used,
            result.confidence
        );
        Ok(result)
    }

    /// Resolve the state to think under: the explicit state when given,
    /// otherwise the first trigger found in the recent conversation.
    fn determine_emotional_state(&self, context: &ThinkingContext) -> String {
        if !context.emotional_state.is_empty() {
            return context.emotional_state.clone();
        }

        let recent = context
            .conversation_history
            .iter()
            .rev()
            .take(EMOTION_SCAN_TURNS);
        for turn in recent {
            let content = turn.content.to_lowercase();
            for energizer in &self.traits.emotional_triggers.energizers {
                if content.contains(&energizer.to_lowercase()) {
                    return "excited".into();
                }
            }
            for frustration in &self.traits.emotional_triggers.frustrations {
                if content.contains(&frustration.to_lowercase()) {
                    return "frustrated".into();
                }
            }
        }
        "neutral".into()
    }

    /// Apply contextual modifiers: emotional state first, then focus.
    fn contextual_traits(&self, context: &ThinkingContext, emotional_state: &str) -> TraitProfile {
        let mut traits = self.traits.apply_modifier(emotional_state);
        if !context.focus.is_empty() && traits.has_modifier(&context.focus) {
            traits = traits.apply_modifier(&context.focus);
        }
        traits
    }

    /// Turn a raw model response into a [`ThinkingResult`].
    fn post_process(
        &self,
        response: &GenerationResponse,
        traits: &TraitProfile,
        memories_used: Vec<String>,
        emotional_state: &str,
    ) -> ThinkingResult {
        let analyzer = self.analyzer();
        ThinkingResult {
            reasoning_tag: reasoning_tag(&response.content),
            confidence: derive_confidence(&response.content, traits),
            emotional_tone: emotional_tone(&response.content, traits),
            emotional_state: emotional_state.to_string(),
            insights: analyzer.insights(&response.content),
            questions: analyzer.questions(&response.content),
            recommendations: analyzer.recommendations(&response.content),
            memories_used,
            traits_influence: traits_influence(traits),
            usage: response.usage,
            tokens_used: response.tokens_used,
            duration_ms: response.duration_ms,
            content: response.content.clone(),
        }
    }

    /// Write the turn back into memory: the exchange as interactions, each
    /// insight as knowledge, and the session context keys.
    fn store_interaction(
        &mut self,
        prompt: &str,
        result: &ThinkingResult,
        context: &ThinkingContext,
        emotional_state: &str,
    ) {
        let memory_context = HashMap::from([
            ("topic".to_string(), json!(context.topic)),
            ("emotional_state".to_string(), json!(emotional_state)),
            ("confidence".to_string(), json!(result.confidence)),
            ("focus".to_string(), json!(context.focus)),
        ]);

        self.memory.add(
            format!("Question: {prompt}"),
            MemoryKind::Interaction,
            0.8,
            vec!["interaction".into(), "question".into(), context.topic.clone()],
            memory_context.clone(),
        );
        self.memory.add(
            format!("Response: {}", result.content),
            MemoryKind::Interaction,
            0.8,
            vec!["interaction".into(), "response".into(), context.topic.clone()],
            memory_context.clone(),
        );
        for insight in &result.insights {
            self.memory.add(
                insight.clone(),
                MemoryKind::Knowledge,
                0.9,
                vec!["insight".into(), "knowledge".into(), context.topic.clone()],
                memory_context.clone(),
            );
        }

        self.memory
            .update_context("last_interaction_time", json!(Utc::now().to_rfc3339()));
        self.memory.update_context("last_topic", json!(context.topic));
        self.memory
            .update_context("last_emotional_state", json!(emotional_state));
    }

    #[allow(clippy::too_many_arguments)]
    fn log_entry(
        &self,
        request: &GenerationRequest,
        session_id: Option<&str>,
        response: &str,
        model_name: String,
        tokens_used: u32,
        duration_ms: u64,
        outcome: LogOutcome,
    ) -> InteractionLogEntry {
        InteractionLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            persona_id: Some(self.id.clone()),
            session_id: session_id.map(str::to_string),
            prompt: request.prompt.clone(),
            system_message: request.system_msg.clone().unwrap_or_default(),
            response: response.to_string(),
            model_name,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tokens_used,
            duration_ms,
            context: request.context.clone(),
            created_at: Utc::now(),
            outcome,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait-derived parameters & post-processing helpers
// ---------------------------------------------------------------------------

/// Temperature from the working traits: creativity pushes it up,
/// analytical thinking pulls it down, risk tolerance nudges it up.
pub fn derive_temperature(traits: &TraitProfile) -> f64 {
    let creativity = traits.get_scale("core_dimensions", "creativity") as f64 / 10.0;
    let analytical = traits.get_scale("core_dimensions", "analytical") as f64 / 10.0;
    let risk = traits.get_scale("core_dimensions", "risk_tolerance") as f64 / 10.0;
    (0.7 + creativity * 0.3 - analytical * 0.2 + risk * 0.1).clamp(0.1, 1.0)
}

/// Completion budget from the verbosity trait.
pub fn derive_max_tokens(traits: &TraitProfile) -> u32 {
    match traits.get_choice("communication_style", "verbosity").as_str() {
        "terse" => 250,
        "concise" => 350,
        "detailed" => 750,
        "verbose" => 1000,
        _ => 500,
    }
}

fn reasoning_tag(content: &str) -> String {
    let lower = content.to_lowercase();
    if lower.contains("because") || lower.contains("therefore") || lower.contains("given that") {
        "Logical".into()
    } else if lower.contains("i feel") || lower.contains("intuitively") {
        "Intuitive".into()
    } else {
        "Mixed".into()
    }
}

fn derive_confidence(content: &str, traits: &TraitProfile) -> f64 {
    let mut confidence = 0.7;
    if content.len() > 200 {
        confidence += 0.1;
    }
    let assertiveness = traits.get_scale("core_dimensions", "assertiveness");
    let stability = traits.get_scale("core_dimensions", "emotional_stability");
    confidence += (assertiveness + stability) as f64 / 20.0 - 0.5;
    confidence.clamp(0.1, 1.0)
}

fn emotional_tone(content: &str, traits: &TraitProfile) -> String {
    let lower = content.to_lowercase();
    if lower.contains("excited") || lower.contains("amazing") {
        return "enthusiastic".into();
    }
    if lower.contains("concerned") || lower.contains("worried") {
        return "cautious".into();
    }
    if lower.contains("confident") || lower.contains("certain") {
        return "confident".into();
    }

    let optimism = traits.get_scale("core_dimensions", "optimism");
    if optimism >= 7 {
        "optimistic".into()
    } else if optimism <= 3 {
        "realistic".into()
    } else {
        "balanced".into()
    }
}

fn traits_influence(traits: &TraitProfile) -> HashMap<String, f64> {
    ["creativity", "analytical", "optimism", "risk_tolerance", "empathy"]
        .into_iter()
        .map(|name| {
            (
                name.to_string(),
                traits.get_scale("core_dimensions", name) as f64 / 10.0,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::backend::testing::{MockBackend, Script};
    use crate::persona::ConversationTurn;
    use crate::traits::{merge, BaseSchema, TraitOverlay};

    fn profile(json: &str) -> TraitProfile {
        merge(
            &BaseSchema::builtin(),
            &TraitOverlay::from_json(json).unwrap(),
        )
        .unwrap()
    }

    fn persona(json: &str) -> Persona {
        Persona::from_overlay_json("p1", "Ada", "a strategist", json).unwrap()
    }

    #[test]
    fn test_temperature_formula() {
        let traits = profile(
            r#"{"core_dimensions": {"creativity": 9, "analytical": 5, "risk_tolerance": 5}}"#,
        );
        // 0.7 + 0.27 - 0.10 + 0.05
        assert!((derive_temperature(&traits) - 0.92).abs() < 1e-9);
    }

    #[test]
    fn test_temperature_clamped_under_pathological_traits() {
        let low = profile(
            r#"{"core_dimensions": {"creativity": 1, "analytical": 10, "risk_tolerance": 1}}"#,
        );
        assert!(derive_temperature(&low) >= 0.1);

        let high = profile(
            r#"{"core_dimensions": {"creativity": 10, "analytical": 1, "risk_tolerance": 10}}"#,
        );
        assert!(derive_temperature(&high) <= 1.0);
    }

    #[test]
    fn test_max_tokens_by_verbosity() {
        for (verbosity, expected) in [
            ("terse", 250),
            ("concise", 350),
            ("balanced", 500),
            ("detailed", 750),
            ("verbose", 1000),
        ] {
            let traits = profile(&format!(
                r#"{{"communication_style": {{"verbosity": "{verbosity}"}}}}"#
            ));
            assert_eq!(derive_max_tokens(&traits), expected, "{verbosity}");
        }
    }

    #[test]
    fn test_reasoning_tag() {
        assert_eq!(reasoning_tag("This works because of X."), "Logical");
        assert_eq!(reasoning_tag("Intuitively, this feels off."), "Intuitive");
        assert_eq!(reasoning_tag("Plain statement."), "Mixed");
    }

    #[test]
    fn test_confidence_formula_and_clamp() {
        let traits = profile(
            r#"{"core_dimensions": {"assertiveness": 5, "emotional_stability": 5}}"#,
        );
        // Short response: 0.7 + 0 + 0.5 - 0.5 = 0.7
        assert!((derive_confidence("short", &traits) - 0.7).abs() < 1e-9);
        // Long response adds 0.1.
        let long = "x".repeat(201);
        assert!((derive_confidence(&long, &traits) - 0.8).abs() < 1e-9);

        let timid = profile(
            r#"{"core_dimensions": {"assertiveness": 1, "emotional_stability": 1}}"#,
        );
        assert!(derive_confidence("short", &timid) >= 0.1);
    }

    #[test]
    fn test_emotional_tone_cues_and_fallback() {
        let traits = profile(r#"{"core_dimensions": {"optimism": 8}}"#);
        assert_eq!(emotional_tone("This is amazing news", &traits), "enthusiastic");
        assert_eq!(emotional_tone("I am worried about churn", &traits), "cautious");
        assert_eq!(emotional_tone("I am certain of this", &traits), "confident");
        assert_eq!(emotional_tone("Plain text", &traits), "optimistic");

        let gloomy = profile(r#"{"core_dimensions": {"optimism": 2}}"#);
        assert_eq!(emotional_tone("Plain text", &gloomy), "realistic");
    }

    #[test]
    fn test_lexical_analyzer_contract() {
        let content = "The key insight is margins matter.\n\nWhy now?\nI recommend waiting.\nFiller.";
        let analyzer = LexicalAnalyzer;
        let insights = analyzer.insights(content);
        let questions = analyzer.questions(content);
        let recommendations = analyzer.recommendations(content);

        assert_eq!(insights, vec!["The key insight is margins matter."]);
        assert_eq!(questions, vec!["Why now?"]);
        assert_eq!(recommendations, vec!["I recommend waiting."]);
        // Contract: outputs are a subset of the non-empty input lines.
        for line in insights.iter().chain(&questions).chain(&recommendations) {
            assert!(content.lines().any(|l| l.trim() == line));
        }
    }

    #[tokio::test]
    async fn test_think_empty_prompt_rejected() {
        let mut p = persona("{}");
        let backend = MockBackend::ok("hi");
        let err = p
            .think(&backend, None, None, "   ", &ThinkingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_think_writes_memory_and_context() {
        let mut p = persona("{}");
        let backend = MockBackend::ok(
            "The key insight is pricing drives churn because of elasticity.\nWe should test it.",
        );
        let context = ThinkingContext {
            topic: "pricing".into(),
            ..Default::default()
        };

        let before = p.memory.short_term.len();
        let result = p
            .think(&backend, None, Some("s1"), "Should we raise prices?", &context)
            .await
            .unwrap();

        assert_eq!(result.reasoning_tag, "Logical");
        assert_eq!(result.insights.len(), 1);
        assert_eq!(result.recommendations.len(), 1);
        // Question + response + one insight.
        assert_eq!(p.memory.short_term.len(), before + 3);
        assert_eq!(
            p.memory.get_context("last_topic"),
            Some(&serde_json::json!("pricing"))
        );
        assert_eq!(
            p.memory.get_context("last_emotional_state"),
            Some(&serde_json::json!("neutral"))
        );
    }

    #[tokio::test]
    async fn test_think_emotional_state_from_triggers() {
        let mut p = persona(
            r#"{"emotional_triggers": {"energizers": ["bold ideas"], "frustrations": ["red tape"]}}"#,
        );
        let backend = MockBackend::ok("fine");

        let excited_ctx = ThinkingContext {
            conversation_history: vec![ConversationTurn {
                speaker: "Grace".into(),
                content: "Here are some Bold Ideas for scaling.".into(),
                timestamp: Utc::now(),
            }],
            ..Default::default()
        };
        let result = p
            .think(&backend, None, None, "thoughts?", &excited_ctx)
            .await
            .unwrap();
        assert_eq!(result.emotional_state, "excited");

        let explicit_ctx = ThinkingContext {
            emotional_state: "focused".into(),
            ..excited_ctx
        };
        let result = p
            .think(&backend, None, None, "thoughts?", &explicit_ctx)
            .await
            .unwrap();
        assert_eq!(result.emotional_state, "focused");
    }

    #[tokio::test]
    async fn test_think_only_scans_recent_turns() {
        let mut p = persona(
            r#"{"emotional_triggers": {"frustrations": ["scope creep"]}}"#,
        );
        let backend = MockBackend::ok("fine");

        let mut history = vec![ConversationTurn {
            speaker: "old".into(),
            content: "early scope creep complaint".into(),
            timestamp: Utc::now(),
        }];
        for i in 0..3 {
            history.push(ConversationTurn {
                speaker: format!("s{i}"),
                content: "calm neutral remark".into(),
                timestamp: Utc::now(),
            });
        }
        let context = ThinkingContext {
            conversation_history: history,
            ..Default::default()
        };
        let result = p.think(&backend, None, None, "hm?", &context).await.unwrap();
        // The trigger sits outside the 3-turn window.
        assert_eq!(result.emotional_state, "neutral");
    }

    #[tokio::test]
    async fn test_think_backend_error_propagates() {
        let mut p = persona("{}");
        let backend = MockBackend::scripted(vec![Script::FatalError("401".into())]);
        let err = p
            .think(&backend, None, None, "hi there", &ThinkingContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendFatal { .. }));
    }

    #[tokio::test]
    async fn test_think_uses_modified_traits_for_parameters() {
        // The "analysis" focus modifier forces verbosity terse; the request
        // should carry 250 max_tokens.
        let mut p = Persona::from_overlay_json(
            "p1",
            "Ada",
            "",
            r#"{"response_modifiers": {"analysis": {"verbosity": "terse"}}}"#,
        )
        .unwrap();
        let backend = MockBackend::ok("ok");
        let context = ThinkingContext {
            focus: "analysis".into(),
            ..Default::default()
        };
        p.think(&backend, None, None, "assess this", &context)
            .await
            .unwrap();
        // The persona's own profile is untouched by the modifier.
        assert_eq!(
            p.traits.get_choice("communication_style", "verbosity"),
            "balanced"
        );
    }
}
