//! Google Gemini backend.

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

const DEFAULT_MODEL: &str = "gemini-1.5-pro";

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
    top_p: f64,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    #[serde(default)]
    finish_reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    message: String,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend for the Gemini generateContent API.
pub struct GeminiBackend {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(mut config: ProviderConfig, timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("Gemini API key is required".into()));
        }
        if config.base_url.is_empty() {
            config.base_url = "https://generativelanguage.googleapis.com".into();
        }
        if config.model.is_empty() {
            config.model = DEFAULT_MODEL.into();
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { config, http })
    }

    fn build_wire_request(&self, req: &GenerationRequest) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: "user".into(),
                parts: vec![Part {
                    text: req.prompt.clone(),
                }],
            }],
            system_instruction: req.system_msg.as_ref().map(|s| Content {
                role: String::new(),
                parts: vec![Part { text: s.clone() }],
            }),
            generation_config: GenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_tokens,
                top_p: 0.95,
                top_k: 40,
            },
        }
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResponse> {
        validate_for_model(req, &self.model_info())?;
        let wire = self.build_wire_request(req);
        let model = req.model.clone().unwrap_or_else(|| self.config.model.clone());
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.base_url, model, self.config.api_key
        );

        log::debug!(
            "gemini call model={model} max_tokens={}",
            wire.generation_config.max_output_tokens
        );

        let started = Instant::now();
        let resp = self.http.post(&url).json(&wire).send().await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(e) => format!("Gemini API error ({}): {}", e.error.code, e.error.message),
                Err(_) => format!("HTTP {status}: {body}"),
            };
            return Err(Error::from_http_status(status, message));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            Error::BackendFatal {
                message: format!("failed to parse Gemini response: {e}"),
                status: None,
            }
        })?;
        let candidate = parsed.candidates.into_iter().next().ok_or(Error::BackendFatal {
            message: "no candidates in Gemini response".into(),
            status: None,
        })?;
        let content: String = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();

        Ok(GenerationResponse {
            content,
            tokens_used: parsed.usage_metadata.total_token_count,
            model,
            duration_ms: started.elapsed().as_millis() as u64,
            finish_reason: candidate.finish_reason,
            usage: TokenUsage {
                prompt_tokens: parsed.usage_metadata.prompt_token_count,
                completion_tokens: parsed.usage_metadata.candidates_token_count,
                total_tokens: parsed.usage_metadata.total_token_count,
            },
            metadata: [("provider".to_string(), json!("gemini"))].into(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        let (max_tokens, context_size, cost_per_1k) = match self.config.model.as_str() {
            "gemini-1.5-pro" => (8_192, 2_097_152, 0.0035),
            "gemini-1.5-flash" => (8_192, 1_048_576, 0.00035),
            "gemini-1.0-pro" | "gemini-pro" => (2_048, 32_768, 0.0005),
            _ => (2_048, 32_768, 0.0035),
        };
        ModelInfo {
            name: self.config.model.clone(),
            provider: "gemini".into(),
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
        "gemini"
    }
}
