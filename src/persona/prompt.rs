//! Prompt assembly: system message and user prompt construction from the
//! persona's working traits.

use std::fmt::Write;

use crate::memory::MemoryEntry;
use crate::traits::TraitProfile;

use super::ThinkingContext;

/// Build the system message defining who the persona is and how it should
/// behave. High-salience core traits (>= 8 or <= 3) get explicit lines;
/// midrange traits stay implicit.
pub fn build_system_message(
    name: &str,
    description: &str,
    traits: &TraitProfile,
    emotional_state: &str,
) -> String {
    let mut msg = String::new();

    let _ = writeln!(msg, "You are {name}, {description}.\n");
    msg.push_str("## Your Personality:\n");

    let formality = traits.get_choice("communication_style", "formality");
    let directness = traits.get_choice("communication_style", "directness");
    let verbosity = traits.get_choice("communication_style", "verbosity");
    let _ = writeln!(msg, "- Communication: {formality}, {directness}, {verbosity}");

    let creativity = traits.get_scale("core_dimensions", "creativity");
    let analytical = traits.get_scale("core_dimensions", "analytical");
    let optimism = traits.get_scale("core_dimensions", "optimism");
    let risk_tolerance = traits.get_scale("core_dimensions", "risk_tolerance");

    if creativity >= 8 {
        msg.push_str("- You are highly creative and innovative\n");
    }
    if analytical >= 8 {
        msg.push_str("- You are deeply analytical and logical\n");
    }
    if optimism >= 8 {
        msg.push_str("- You maintain a very positive outlook\n");
    } else if optimism <= 3 {
        msg.push_str("- You tend toward skepticism and caution\n");
    }
    if risk_tolerance >= 8 {
        msg.push_str("- You embrace uncertainty and calculated risks\n");
    }

    if !traits.expertise_areas.is_empty() {
        let _ = writeln!(msg, "- Your expertise: {}", traits.expertise_areas.join(", "));
    }

    let phrases = &traits.speaking_patterns.common_phrases;
    if !phrases.is_empty() {
        let shown = phrases.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
        let _ = writeln!(msg, "- You often say things like: {shown}");
    }
    let avoided = &traits.speaking_patterns.avoids_phrases;
    if !avoided.is_empty() {
        let shown = avoided.iter().take(2).cloned().collect::<Vec<_>>().join(", ");
        let _ = writeln!(msg, "- You avoid saying: {shown}");
    }

    let _ = writeln!(msg, "\n## Current State: {emotional_state}");

    msg.push_str("\n## Instructions:\n");
    msg.push_str("- Stay true to your personality traits and communication style\n");
    msg.push_str("- Use your expertise and experience to provide valuable insights\n");
    msg.push_str("- Be authentic to your character while being helpful\n");
    if traits.get_scale("response_patterns", "question_tendency") >= 7 {
        msg.push_str("- Ask probing questions to better understand the situation\n");
    }
    if traits.get_scale("response_patterns", "example_usage") >= 7 {
        msg.push_str("- Use relevant examples and analogies to illustrate your points\n");
    }

    msg
}

/// Build the user prompt block: conversation so far, retrieved memories,
/// project context, the topic, and trait-keyed response guidance.
pub fn build_user_prompt(
    prompt: &str,
    context: &ThinkingContext,
    memories: &[MemoryEntry],
    traits: &TraitProfile,
    emotional_state: &str,
) -> String {
    let mut out = String::new();

    if !context.conversation_history.is_empty() {
        out.push_str("## Recent Conversation:\n");
        for turn in &context.conversation_history {
            let _ = writeln!(out, "{}: {}", turn.speaker, turn.content);
        }
        out.push('\n');
    }

    if !memories.is_empty() {
        out.push_str("## Relevant Context from Memory:\n");
        for memory in memories {
            let _ = writeln!(out, "- {}", memory.content);
        }
        out.push('\n');
    }

    if !context.project_context.is_empty() {
        out.push_str("## Project Context:\n");
        let mut keys: Vec<&String> = context.project_context.keys().collect();
        keys.sort();
        for key in keys {
            let _ = writeln!(out, "{key}: {}", render(&context.project_context[key]));
        }
        out.push('\n');
    }

    out.push_str("## Current Question/Topic:\n");
    out.push_str(prompt);
    out.push_str("\n\n");

    out.push_str(&response_guidance(traits, emotional_state));
    out
}

/// Trait-keyed response guidance appended to every prompt.
fn response_guidance(traits: &TraitProfile, emotional_state: &str) -> String {
    let mut out = String::from("## Response Guidance:\n");

    if traits.get_scale("response_patterns", "contrarian_level") >= 7 {
        out.push_str("- Challenge assumptions and explore alternative perspectives\n");
    }
    if traits.get_scale("response_patterns", "solution_orientation") >= 7 {
        out.push_str("- Focus on actionable solutions and next steps\n");
    }

    let data_vs_intuition = traits.get_scale("decision_making", "data_vs_intuition");
    if data_vs_intuition >= 8 {
        out.push_str("- Support your points with data and evidence\n");
    } else if data_vs_intuition <= 3 {
        out.push_str("- Trust your instincts and share intuitive insights\n");
    }

    match emotional_state {
        "excited" => {
            out.push_str("- You're feeling energized and enthusiastic about this topic\n")
        }
        "frustrated" => {
            out.push_str("- You're feeling frustrated and may be more direct than usual\n")
        }
        "focused" => out.push_str("- You're in deep focus mode and thinking systematically\n"),
        _ => {}
    }

    out
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
