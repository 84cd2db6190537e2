//! Retry wrapper for model backends.
//!
//! Wraps any backend with exponential backoff on transient failures.
//! Non-retryable errors propagate on first occurrence. Cancellation is
//! handled by the caller dropping the `generate` future (the orchestrator
//! races every backend call against the session's cancellation token), so
//! both in-flight HTTP calls and backoff sleeps stop immediately.

use async_trait::async_trait;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::Result;

use super::{GenerationRequest, GenerationResponse, ModelBackend, ModelInfo, SharedBackend};

/// A backend decorated with a retry policy.
pub struct RetryBackend {
    inner: SharedBackend,
    policy: RetryConfig,
}

impl RetryBackend {
    pub fn new(inner: SharedBackend, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }

    /// Delay before retry attempt `n` (1-based): `base · factor^(n-1)`,
    /// capped at the policy maximum.
    fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = self.policy.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.policy.base_delay_ms as f64 * factor) as u64;
        std::time::Duration::from_millis(millis.min(self.policy.max_delay_ms))
    }
}

#[async_trait]
impl ModelBackend for RetryBackend {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResponse> {
        let mut last_err = None;

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                let delay = self.delay_for_attempt(attempt);
                log::debug!(
                    "retrying backend call provider={} attempt={}/{} delay_ms={}",
                    self.inner.name(),
                    attempt + 1,
                    self.policy.max_retries + 1,
                    delay.as_millis()
                );
                sleep(delay).await;
            }

            match self.inner.generate(req).await {
                Ok(resp) => {
                    if attempt > 0 {
                        log::info!(
                            "backend call succeeded after retries provider={} attempts={}",
                            self.inner.name(),
                            attempt + 1
                        );
                    }
                    return Ok(resp);
                }
                Err(err) if err.is_retryable() => {
                    log::warn!(
                        "backend call failed, will retry provider={} attempt={} error={err}",
                        self.inner.name(),
                        attempt + 1
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.expect("at least one attempt was made"))
    }

    fn model_info(&self) -> ModelInfo {
        self.inner.model_info()
    }

    fn validate_config(&self) -> Result<()> {
        self.inner.validate_config()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
