//! Concrete model backends.
//!
//! Each provider translates the uniform [`GenerationRequest`] into its own
//! wire format and maps the reply back into the uniform
//! [`GenerationResponse`], so the rest of the engine never sees a
//! provider-specific shape.
//!
//! [`GenerationRequest`]: crate::llms::GenerationRequest
//! [`GenerationResponse`]: crate::llms::GenerationResponse

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::llms::SharedBackend;

/// Build a backend by provider name from the LLM configuration.
pub fn build_backend(provider: &str, config: &LlmConfig) -> Result<SharedBackend> {
    let timeout = crate::llms::call_timeout(config.timeout_secs);
    match provider {
        "openai" => Ok(Arc::new(OpenAiBackend::new(config.openai.clone(), timeout)?)),
        "anthropic" => Ok(Arc::new(AnthropicBackend::new(
            config.anthropic.clone(),
            timeout,
        )?)),
        "gemini" | "google" => {
            Ok(Arc::new(GeminiBackend::new(config.gemini.clone(), timeout)?))
        }
        other => Err(Error::Config(format!("unsupported provider: {other}"))),
    }
}
