//! Uniform request/response contract over heterogeneous model backends.
//!
//! Every provider maps its own wire format to [`GenerationResponse`]; the
//! rest of the engine sees only this contract plus the [`ModelBackend`]
//! capability in [`backend`].

pub mod backend;
pub mod providers;
pub mod retry;

pub use backend::{BackendRegistry, BackendStatus, ModelBackend, SharedBackend};
pub use retry::RetryBackend;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Hard ceiling on a single completion, independent of model limits.
pub const MAX_TOKENS_CEILING: u32 = 32_768;

/// Flat token overhead added to request estimates for message framing.
const REQUEST_TOKEN_OVERHEAD: u32 = 50;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A provider-agnostic generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_msg: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Overrides the provider's configured model when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Caller context carried through to the interaction log.
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

/// Detailed token accounting for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A provider-agnostic generation response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    pub tokens_used: u32,
    pub model: String,
    /// Wall-clock call duration in milliseconds.
    pub duration_ms: u64,
    pub finish_reason: String,
    pub usage: TokenUsage,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Model info & cost
// ---------------------------------------------------------------------------

/// Static facts about a backend's model, including pricing attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    /// Maximum completion tokens the model accepts.
    pub max_tokens: u32,
    pub context_size: u32,
    /// Input price per 1k tokens, USD.
    pub cost_per_1k: f64,
    /// Completion tokens cost this multiple of the input price.
    pub completion_cost_multiplier: f64,
    pub capabilities: Vec<String>,
}

impl ModelInfo {
    /// Dollar cost of a call given its token usage. Pricing differences
    /// between prompt and completion tokens are model attributes, not
    /// call-site constants.
    pub fn cost_of(&self, usage: &TokenUsage) -> f64 {
        let input = (usage.prompt_tokens as f64 / 1000.0) * self.cost_per_1k;
        let output = (usage.completion_tokens as f64 / 1000.0)
            * self.cost_per_1k
            * self.completion_cost_multiplier;
        input + output
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a request against the contract bounds.
pub fn validate_request(req: &GenerationRequest) -> Result<()> {
    if req.prompt.trim().is_empty() {
        return Err(Error::BadInput("prompt cannot be empty".into()));
    }
    if !(0.0..=2.0).contains(&req.temperature) {
        return Err(Error::BadInput(format!(
            "temperature {} must be between 0 and 2",
            req.temperature
        )));
    }
    if req.max_tokens == 0 {
        return Err(Error::BadInput("max_tokens must be positive".into()));
    }
    if req.max_tokens > MAX_TOKENS_CEILING {
        return Err(Error::BadInput(format!(
            "max_tokens {} exceeds ceiling {MAX_TOKENS_CEILING}",
            req.max_tokens
        )));
    }
    Ok(())
}

/// Validate a request against a concrete model's limits.
pub fn validate_for_model(req: &GenerationRequest, info: &ModelInfo) -> Result<()> {
    validate_request(req)?;
    if req.max_tokens > info.max_tokens {
        return Err(Error::BadInput(format!(
            "max_tokens {} exceeds model limit {} for {}",
            req.max_tokens, info.max_tokens, info.name
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Token estimation
// ---------------------------------------------------------------------------

/// Rough token estimate: ~4 characters per token for English text.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() / 4) as u32
}

/// Estimate the total prompt-side tokens for a request.
pub fn estimate_request_tokens(req: &GenerationRequest) -> u32 {
    let mut total = estimate_tokens(&req.prompt);
    if let Some(system) = &req.system_msg {
        total += estimate_tokens(system);
    }
    total + REQUEST_TOKEN_OVERHEAD
}

/// Timeout applied by providers to each HTTP call.
pub fn call_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
