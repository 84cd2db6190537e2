//! OpenAI chat-completions backend.

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

const DEFAULT_MODEL: &str = "gpt-4o";

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: String,
    model: String,
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default, rename = "type")]
    kind: String,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend for the OpenAI chat completions API.
pub struct OpenAiBackend {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(mut config: ProviderConfig, timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("OpenAI API key is required".into()));
        }
        if config.base_url.is_empty() {
            config.base_url = "https://api.openai.com/v1".into();
        }
        if config.model.is_empty() {
            config.model = DEFAULT_MODEL.into();
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { config, http })
    }

    fn model_for(&self, req: &GenerationRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.config.model.clone())
    }

    fn build_wire_request(&self, req: &GenerationRequest) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(system) = &req.system_msg {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".into(),
            content: req.prompt.clone(),
        });
        ChatRequest {
            model: self.model_for(req),
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResponse> {
        validate_for_model(req, &self.model_info())?;
        let wire = self.build_wire_request(req);
        let url = format!("{}/chat/completions", self.config.base_url);

        log::debug!(
            "openai call model={} max_tokens={} temperature={:.2}",
            wire.model,
            wire.max_tokens,
            wire.temperature
        );

        let started = Instant::now();
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&wire)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(e) => format!("OpenAI API error ({}): {}", e.error.kind, e.error.message),
                Err(_) => format!("HTTP {status}: {body}"),
            };
            return Err(Error::from_http_status(status, message));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            Error::BackendFatal {
                message: format!("failed to parse OpenAI response: {e}"),
                status: None,
            }
        })?;
        let choice = parsed.choices.into_iter().next().ok_or(Error::BackendFatal {
            message: "no choices in OpenAI response".into(),
            status: None,
        })?;

        Ok(GenerationResponse {
            content: choice.message.content,
            tokens_used: parsed.usage.total_tokens,
            model: parsed.model,
            duration_ms: started.elapsed().as_millis() as u64,
            finish_reason: choice.finish_reason,
            usage: TokenUsage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
            metadata: [("id".to_string(), json!(parsed.id))].into(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        let (max_tokens, context_size, cost_per_1k) = match self.config.model.as_str() {
            "gpt-4" => (8_192, 8_192, 0.03),
            "gpt-4-32k" => (32_768, 32_768, 0.06),
            "gpt-4-turbo" => (4_096, 128_000, 0.01),
            "gpt-4o" => (4_096, 128_000, 0.005),
            "gpt-4o-mini" => (4_096, 128_000, 0.0005),
            "gpt-3.5-turbo" => (4_096, 16_385, 0.0005),
            "gpt-3.5-turbo-instruct" => (4_096, 16_385, 0.001),
            _ => (4_096, 8_192, 0.02),
        };
        ModelInfo {
            name: self.config.model.clone(),
            provider: "openai".into(),
            max_tokens,
            context_size,
            cost_per_1k,
            completion_cost_multiplier: 2.0,
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
        "openai"
    }
}
