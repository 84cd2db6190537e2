//! The `ModelBackend` capability and the provider registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{GenerationRequest, GenerationResponse, ModelInfo};

/// Capability contract every model backend implements. Implementations must
/// be safe under concurrent `generate` calls; provider rate limits surface
/// as retryable errors.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Produce a completion for the request. Implementations validate the
    /// request against their model limits before calling out.
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResponse>;

    /// Static facts about the backing model.
    fn model_info(&self) -> ModelInfo;

    /// Check the backend's own configuration.
    fn validate_config(&self) -> Result<()>;

    /// Stable provider name ("openai", "anthropic", ...).
    fn name(&self) -> &str;
}

/// Shared handle to a backend.
pub type SharedBackend = Arc<dyn ModelBackend>;

/// Health probe outcome for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    pub name: String,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_check: DateTime<Utc>,
    pub model: ModelInfo,
}

/// Registry of named backends with a default selection.
///
/// The first successfully registered backend becomes the default until
/// [`set_default`](Self::set_default) chooses another.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its name, validating its configuration.
    pub fn register(&mut self, backend: SharedBackend) -> Result<()> {
        backend.validate_config()?;
        let name = backend.name().to_string();
        log::info!("model backend registered provider={name}");
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.backends.insert(name, backend);
        Ok(())
    }

    /// Look up a backend by name; an empty name resolves the default.
    pub fn get(&self, name: &str) -> Result<SharedBackend> {
        let name = if name.is_empty() {
            self.default.as_deref().ok_or(Error::NotFound {
                kind: "backend",
                id: "<default>".into(),
            })?
        } else {
            name
        };
        self.backends.get(name).cloned().ok_or(Error::NotFound {
            kind: "backend",
            id: name.to_string(),
        })
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(Error::NotFound {
                kind: "backend",
                id: name.into(),
            });
        }
        self.default = Some(name.to_string());
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Probe one backend with a tiny request under a 10s deadline.
    pub async fn check(&self, name: &str) -> BackendStatus {
        let last_check = Utc::now();
        let backend = match self.get(name) {
            Ok(b) => b,
            Err(e) => {
                return BackendStatus {
                    name: name.to_string(),
                    available: false,
                    error: Some(e.to_string()),
                    last_check,
                    model: ModelInfo {
                        name: String::new(),
                        provider: String::new(),
                        max_tokens: 0,
                        context_size: 0,
                        cost_per_1k: 0.0,
                        completion_cost_multiplier: 1.0,
                        capabilities: vec![],
                    },
                };
            }
        };

        let probe = GenerationRequest {
            prompt: "Hello".into(),
            temperature: 0.1,
            max_tokens: 10,
            ..Default::default()
        };
        let outcome =
            tokio::time::timeout(Duration::from_secs(10), backend.generate(&probe)).await;
        let error = match outcome {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("health probe timed out".to_string()),
        };
        if let Some(err) = &error {
            log::warn!("backend health check failed provider={name} error={err}");
        }

        BackendStatus {
            name: backend.name().to_string(),
            available: error.is_none(),
            error,
            last_check,
            model: backend.model_info(),
        }
    }

    /// Probe every registered backend.
    pub async fn check_all(&self) -> Vec<BackendStatus> {
        let mut statuses = Vec::with_capacity(self.backends.len());
        for name in self.names() {
            statuses.push(self.check(&name).await);
        }
        statuses
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockBackend;
    use super::*;

    #[tokio::test]
    async fn test_registry_default_is_first_registered() {
        let mut registry = BackendRegistry::new();
        let mut a = MockBackend::ok("a");
        a.name = "alpha".into();
        let mut b = MockBackend::ok("b");
        b.name = "beta".into();
        registry.register(Arc::new(a)).unwrap();
        registry.register(Arc::new(b)).unwrap();

        assert_eq!(registry.get("").unwrap().name(), "alpha");
        registry.set_default("beta").unwrap();
        assert_eq!(registry.get("").unwrap().name(), "beta");
    }

    #[tokio::test]
    async fn test_registry_unknown_lookup_fails() {
        let registry = BackendRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(Error::NotFound { kind: "backend", .. })
        ));
        assert!(registry.get("").is_err());
    }

    #[tokio::test]
    async fn test_health_check_reports_failures() {
        let mut registry = BackendRegistry::new();
        registry
            .register(Arc::new(MockBackend::scripted(vec![
                super::testing::Script::FatalError("no auth".into()),
            ])))
            .unwrap();

        let status = registry.check("mock").await;
        assert!(!status.available);
        assert!(status.error.unwrap().contains("no auth"));
    }

    #[tokio::test]
    async fn test_health_check_ok() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(MockBackend::ok("hi"))).unwrap();
        let status = registry.check("mock").await;
        assert!(status.available);
        assert_eq!(status.model.provider, "mock");
    }
}
