//! Anthropic messages backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::llms::{
    validate_for_model, GenerationRequest, GenerationResponse, ModelBackend, ModelInfo,
    TokenUsage,
};

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: String,
    content: Vec<ContentBlock>,
    model: String,
    #[serde(default)]
    stop_reason: String,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    message: String,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend for the Anthropic messages API.
pub struct AnthropicBackend {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(mut config: ProviderConfig, timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("Anthropic API key is required".into()));
        }
        if config.base_url.is_empty() {
            config.base_url = "https://api.anthropic.com".into();
        }
        if config.model.is_empty() {
            config.model = DEFAULT_MODEL.into();
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { config, http })
    }

    fn build_wire_request(&self, req: &GenerationRequest) -> MessagesRequest {
        MessagesRequest {
            model: req.model.clone().unwrap_or_else(|| self.config.model.clone()),
            messages: vec![WireMessage {
                role: "user".into(),
                content: req.prompt.clone(),
            }],
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            system: req.system_msg.clone(),
            stream: false,
        }
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResponse> {
        validate_for_model(req, &self.model_info())?;
        let wire = self.build_wire_request(req);
        let url = format!("{}/v1/messages", self.config.base_url);

        log::debug!(
            "anthropic call model={} max_tokens={}",
            wire.model,
            wire.max_tokens
        );

        let started = Instant::now();
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&wire)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(e) => format!(
                    "Anthropic API error ({}): {}",
                    e.error.kind, e.error.message
                ),
                Err(_) => format!("HTTP {status}: {body}"),
            };
            return Err(Error::from_http_status(status, message));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            Error::BackendFatal {
                message: format!("failed to parse Anthropic response: {e}"),
                status: None,
            }
        })?;
        let content: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();
        if content.is_empty() {
            return Err(Error::BackendFatal {
                message: "no text content in Anthropic response".into(),
                status: None,
            });
        }

        let total = parsed.usage.input_tokens + parsed.usage.output_tokens;
        Ok(GenerationResponse {
            content,
            tokens_used: total,
            model: parsed.model,
            duration_ms: started.elapsed().as_millis() as u64,
            finish_reason: parsed.stop_reason,
            usage: TokenUsage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
                total_tokens: total,
            },
            metadata: [("id".to_string(), json!(parsed.id))].into(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        let (max_tokens, context_size, cost_per_1k) = match self.config.model.as_str() {
            m if m.starts_with("claude-3-opus") => (4_096, 200_000, 0.015),
            m if m.starts_with("claude-3-5-sonnet") => (8_192, 200_000, 0.003),
            m if m.starts_with("claude-3-sonnet") => (4_096, 200_000, 0.003),
            m if m.starts_with("claude-3-haiku") => (4_096, 200_000, 0.00025),
            _ => (4_096, 200_000, 0.003),
        };
        ModelInfo {
            name: self.config.model.clone(),
            provider: "anthropic".into(),
            max_tokens,
            context_size,
            cost_per_1k,
            completion_cost_multiplier: 3.0,
            capabilities: vec!["chat".into(), "completion".into(), "system_messages".into()],
        }
    }

    fn validate_config(&self) -> Result<()> {
        if self.config.api_key.is_empty() {
            return Err(Error::Config("API key is required".into()));
        }
        if self.config.base_url.is_empty() {
            return Err(Error::Config("base URL is required".into()));
        }
        if self.config.model.is_empty() {
            return Err(Error::Config("model is required".into()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(model: &str) -> AnthropicBackend {
        AnthropicBackend::new(
            ProviderConfig {
                api_key: "sk-ant-test".into(),
                base_url: String::new(),
                model: model.into(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_filled() {
        let b = backend("");
        assert_eq!(b.config.model, DEFAULT_MODEL);
        assert_eq!(b.config.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn test_wire_request_uses_system_field() {
        let b = backend("claude-3-5-sonnet-20241022");
        let req = GenerationRequest {
            prompt: "Evaluate this plan".into(),
            system_msg: Some("You are a skeptic.".into()),
            temperature: 0.6,
            max_tokens: 400,
            ..Default::default()
        };
        let wire = b.build_wire_request(&req);
        assert_eq!(wire.system.as_deref(), Some("You are a skeptic."));
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, "user");
        assert!(!wire.stream);
    }

    #[test]
    fn test_model_table_and_output_pricing() {
        let info = backend("claude-3-opus-20240229").model_info();
        assert_eq!(info.cost_per_1k, 0.015);
        assert_eq!(info.completion_cost_multiplier, 3.0);

        let usage = TokenUsage {
            prompt_tokens: 1000,
            completion_tokens: 1000,
            total_tokens: 2000,
        };
        // 0.015 input + 0.045 output
        assert!((info.cost_of(&usage) - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_model_limit_enforced() {
        let b = backend("claude-3-haiku-20240307");
        let req = GenerationRequest {
            prompt: "hi".into(),
            temperature: 0.5,
            max_tokens: 8_192, // haiku caps at 4096
            ..Default::default()
        };
        let err = futures::executor::block_on(b.generate(&req)).unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }
}
