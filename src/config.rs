// SPDX-License-Identifier: MIT

//! Settings - YAML file plus environment overrides
//!
//! ```yaml
//! retry:
//!   max_attempts: 3
//!   retry_delay_ms: 500
//! runtime:
//!   max_blocking_threads: 8
//! generation:
//!   temperature: 0.7
//!   max_output_tokens: 128
//! models:
//!   primary: gpt-3.5-turbo
//!   secondary: gemini-1.5-pro
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::flow::RetryPolicy;
use crate::model::GenerationConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range or unparsable
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retry: RetryPolicy,
    pub runtime: RuntimeSettings,
    pub generation: GenerationConfig,
    pub models: ModelSettings,
}

/// Scheduler and blocking pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Scheduler threads; `None` uses one per core
    pub worker_threads: Option<usize>,
    /// Upper bound on concurrently running blocking node bodies
    pub max_blocking_threads: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_blocking_threads: 16,
        }
    }
}

/// Model names used by the demo commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub primary: String,
    pub secondary: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            primary: "gpt-3.5-turbo".to_string(),
            secondary: "gemini-1.5-pro".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            runtime: RuntimeSettings::default(),
            generation: GenerationConfig {
                temperature: Some(0.7),
                max_output_tokens: Some(128),
            },
            models: ModelSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (or defaults), apply environment overrides,
    /// and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                log::info!("Loading settings from {}", path.display());
                Self::parse_yaml(&fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a YAML string
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `AGENTFLOW_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AGENTFLOW_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_number("AGENTFLOW_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("AGENTFLOW_RETRY_DELAY_MS") {
            self.retry.retry_delay =
                Duration::from_millis(parse_number("AGENTFLOW_RETRY_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("AGENTFLOW_MAX_BLOCKING_THREADS") {
            self.runtime.max_blocking_threads =
                parse_number("AGENTFLOW_MAX_BLOCKING_THREADS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if self.runtime.max_blocking_threads == 0 {
            return Err(ConfigError::invalid(
                "runtime.max_blocking_threads",
                "must be at least 1",
            ));
        }
        if self.runtime.worker_threads == Some(0) {
            return Err(ConfigError::invalid(
                "runtime.worker_threads",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.retry.max_attempts, 1);
        assert_eq!(settings.retry.retry_delay, Duration::ZERO);
        assert_eq!(settings.runtime.max_blocking_threads, 16);
        assert_eq!(settings.generation.max_output_tokens, Some(128));
        assert_eq!(settings.models.primary, "gpt-3.5-turbo");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
retry:
  max_attempts: 3
  retry_delay_ms: 500
models:
  secondary: gemini-2.5-pro
"#;
        let settings = Settings::parse_yaml(yaml).unwrap();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.retry_delay, Duration::from_millis(500));
        assert_eq!(settings.models.primary, "gpt-3.5-turbo");
        assert_eq!(settings.models.secondary, "gemini-2.5-pro");
        assert_eq!(settings.runtime, RuntimeSettings::default());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            Settings::parse_yaml("retry: [1, 2]"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env_of(&[
                ("AGENTFLOW_MAX_ATTEMPTS", "4"),
                ("AGENTFLOW_RETRY_DELAY_MS", " 250 "),
                ("AGENTFLOW_MAX_BLOCKING_THREADS", "2"),
            ]))
            .unwrap();

        assert_eq!(settings.retry, RetryPolicy::new(4, Duration::from_millis(250)));
        assert_eq!(settings.runtime.max_blocking_threads, 2);
    }

    #[test]
    fn test_env_override_unparsable() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(env_of(&[("AGENTFLOW_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("AGENTFLOW_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "retry.max_attempts"
        ));

        let mut settings = Settings::default();
        settings.runtime.max_blocking_threads = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Settings::load(Some(Path::new("/nonexistent/agentflow.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
