//! Engine configuration.
//!
//! All knobs the engine consumes at construction time, with serde defaults
//! matching the documented values. File and environment merging is the
//! caller's concern; every type here derives `Deserialize` so any loader
//! can produce a [`Config`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub analysis: AnalysisConfig,
    pub memory: MemoryConfig,
    pub log: LogConfig,
}

/// SQLite database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file.
    pub path: String,
    /// Use write-ahead logging.
    pub enable_wal: bool,
    /// Enforce foreign keys.
    pub enable_foreign_keys: bool,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "boardroom.db".to_string(),
            enable_wal: true,
            enable_foreign_keys: true,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Language-model settings shared by every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider used when a request names none.
    pub default_provider: String,
    /// Model used when a request names none.
    pub default_model: String,
    /// Per-call deadline in seconds.
    pub timeout_secs: u64,
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub gemini: ProviderConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            default_model: "gpt-4o".to_string(),
            timeout_secs: 30,
            openai: ProviderConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                ..ProviderConfig::default()
            },
            anthropic: ProviderConfig {
                base_url: "https://api.anthropic.com".to_string(),
                ..ProviderConfig::default()
            },
            gemini: ProviderConfig {
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                ..ProviderConfig::default()
            },
        }
    }
}

/// Settings for one concrete provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Backend retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Semaphore size for concurrent persona pipelines.
    pub max_concurrent: usize,
    /// Mode used when a request omits one.
    pub default_mode: String,
    /// Per-session deadline in seconds.
    pub timeout_secs: u64,
    /// Drain window after cancellation, in milliseconds.
    pub grace_period_ms: u64,
    /// Upper bound on discussion rounds.
    pub max_rounds: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            default_mode: "discussion".to_string(),
            timeout_secs: 300,
            grace_period_ms: 2_000,
            max_rounds: 3,
        }
    }
}

/// Memory capacity and decay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub short_term_limit: usize,
    pub long_term_limit: usize,
    /// Per-consolidation decay multiplier.
    pub decay_rate: f64,
    /// Days to retain interaction logs.
    pub retention_days: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_limit: 50,
            long_term_limit: 200,
            decay_rate: 0.95,
            retention_days: 90,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Check ranges that would otherwise surface as confusing runtime
    /// failures deep inside the engine.
    pub fn validate(&self) -> Result<()> {
        if self.analysis.max_concurrent == 0 {
            return Err(Error::Config("analysis.max_concurrent must be >= 1".into()));
        }
        if self.analysis.max_rounds == 0 {
            return Err(Error::Config("analysis.max_rounds must be >= 1".into()));
        }
        if self.memory.short_term_limit == 0 || self.memory.long_term_limit == 0 {
            return Err(Error::Config("memory limits must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.memory.decay_rate) {
            return Err(Error::Config("memory.decay_rate must be in [0, 1]".into()));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(Error::Config("retry.backoff_factor must be >= 1.0".into()));
        }
        if self.llm.timeout_secs == 0 || self.analysis.timeout_secs == 0 {
            return Err(Error::Config("timeouts must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analysis.max_concurrent, 5);
        assert_eq!(config.analysis.default_mode, "discussion");
        assert_eq!(config.memory.short_term_limit, 50);
        assert_eq!(config.memory.long_term_limit, 200);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.analysis.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.memory.decay_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"analysis": {"max_concurrent": 8}}"#).unwrap();
        assert_eq!(config.analysis.max_concurrent, 8);
        assert_eq!(config.analysis.default_mode, "discussion");
        assert_eq!(config.memory.decay_rate, 0.95);
    }
}
