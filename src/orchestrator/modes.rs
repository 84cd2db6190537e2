//! Mode-specific prompt construction.
//!
//! Each analysis mode frames the project topic differently before it
//! reaches the persona pipelines. Comparison and evaluation pull their
//! structure from the request's config map.

use std::fmt::Write;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::session::{AnalysisMode, AnalysisRequest};

/// Default rubric when an evaluation request names no criteria.
const DEFAULT_CRITERIA: [&str; 4] = ["feasibility", "impact", "risk", "cost"];

/// Build the topic prompt a persona receives for this mode.
pub fn topic_prompt(request: &AnalysisRequest, topic: &str) -> Result<String> {
    match request.mode {
        AnalysisMode::Discussion => Ok(format!(
            "The board is discussing: {topic}\n\n\
             Share your perspective. Engage with what the other members have \
             said so far, agree or push back where your experience points \
             elsewhere, and move the discussion forward."
        )),
        AnalysisMode::Simulation => Ok(format!(
            "Step into this scenario: {topic}\n\n\
             Act it out from your own vantage point. Describe what you would \
             do, what you expect to happen, and where it could go wrong."
        )),
        AnalysisMode::Analysis => Ok(format!(
            "Analyze the following: {topic}\n\n\
             Break it down systematically: the core problem, the forces at \
             play, the options available, and what you see that others might \
             miss."
        )),
        AnalysisMode::Comparison => {
            let options = string_list(request.config.get("options"));
            if options.len() < 2 {
                return Err(Error::BadInput(
                    "comparison mode needs at least two named options".into(),
                ));
            }
            let mut prompt = format!("Compare the following options for: {topic}\n\n");
            for (i, option) in options.iter().enumerate() {
                let _ = writeln!(prompt, "Option {}: {option}", i + 1);
            }
            prompt.push_str(
                "\nWeigh them against each other, name the trade-offs, and \
                 state which one you would back and why.",
            );
            Ok(prompt)
        }
        AnalysisMode::Evaluation => {
            let mut criteria = string_list(request.config.get("criteria"));
            if criteria.is_empty() {
                criteria = DEFAULT_CRITERIA.iter().map(|s| s.to_string()).collect();
            }
            let mut prompt = format!("Evaluate the following: {topic}\n\n");
            prompt.push_str("Score each criterion from 1 to 10, one line per criterion, as \"<criterion>: <score>/10\", then justify your scores:\n");
            for criterion in &criteria {
                let _ = writeln!(prompt, "- {criterion}");
            }
            Ok(prompt)
        }
        AnalysisMode::Prediction => Ok(format!(
            "Forecast the outcome of: {topic}\n\n\
             State your prediction, the key assumptions behind it, and what \
             would change your mind. If you can, end with a line of the form \
             \"Probability: NN%\" for the outcome you consider most likely."
        )),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(mode: AnalysisMode) -> AnalysisRequest {
        AnalysisRequest::new("proj", "board", mode)
    }

    #[test]
    fn test_every_mode_embeds_topic() {
        for mode in [
            AnalysisMode::Discussion,
            AnalysisMode::Simulation,
            AnalysisMode::Analysis,
            AnalysisMode::Evaluation,
            AnalysisMode::Prediction,
        ] {
            let prompt = topic_prompt(&request(mode), "expanding to Europe").unwrap();
            assert!(prompt.contains("expanding to Europe"), "{mode}");
        }
    }

    #[test]
    fn test_comparison_requires_two_options() {
        let mut req = request(AnalysisMode::Comparison);
        assert!(topic_prompt(&req, "t").is_err());

        req.config.insert("options".into(), json!(["build"]));
        assert!(topic_prompt(&req, "t").is_err());

        req.config.insert("options".into(), json!(["build", "buy"]));
        let prompt = topic_prompt(&req, "platform strategy").unwrap();
        assert!(prompt.contains("Option 1: build"));
        assert!(prompt.contains("Option 2: buy"));
    }

    #[test]
    fn test_evaluation_uses_config_or_default_criteria() {
        let mut req = request(AnalysisMode::Evaluation);
        let prompt = topic_prompt(&req, "t").unwrap();
        for criterion in DEFAULT_CRITERIA {
            assert!(prompt.contains(criterion));
        }

        req.config
            .insert("criteria".into(), json!(["team fit", "urgency"]));
        let prompt = topic_prompt(&req, "t").unwrap();
        assert!(prompt.contains("team fit"));
        assert!(!prompt.contains("feasibility"));
    }

    #[test]
    fn test_prediction_asks_for_probability() {
        let prompt = topic_prompt(&request(AnalysisMode::Prediction), "churn").unwrap();
        assert!(prompt.contains("Probability: NN%"));
    }
}
