//! Processor configuration.
//!
//! JSON で読み込む。省略したフィールドはデフォルト値になる。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Number of workers, i.e. the maximum number of handlers running at once.
    pub concurrency: usize,

    pub retry: RetryConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff curve. See `RetryPolicy` for the formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 3_600_000,
            jitter: 0.1,
        }
    }
}

impl ProcessorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: ProcessorConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        let retry = &self.retry;
        if retry.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must be positive".into(),
            ));
        }
        if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0, got {}",
                retry.multiplier
            )));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                retry.max_delay_ms, retry.base_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter must be within [0, 1], got {}",
                retry.jitter
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        ProcessorConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = ProcessorConfig::from_json(r#"{"concurrency": 3}"#).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.retry, RetryConfig::default());

        let config = ProcessorConfig::from_json(r#"{"retry": {"jitter": 0.0}}"#).unwrap();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.retry.jitter, 0.0);
        assert_eq!(config.retry.base_delay_ms, 2_000);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = ProcessorConfig::from_json(r#"{"concurrency": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_delay_bounds() {
        let err =
            ProcessorConfig::from_json(r#"{"retry": {"base_delay_ms": 10, "max_delay_ms": 5}}"#)
                .unwrap_err();
        assert!(err.to_string().contains("max_delay_ms"));
    }

    #[test]
    fn rejects_zero_base_delay() {
        let err = ProcessorConfig::from_json(r#"{"retry": {"base_delay_ms": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("base_delay_ms"));
    }

    #[test]
    fn rejects_out_of_range_jitter() {
        let err = ProcessorConfig::from_json(r#"{"retry": {"jitter": 1.5}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ProcessorConfig::from_json("{concurrency").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"concurrency": 4, "retry": {{"multiplier": 3.0}}}}"#).unwrap();

        let config = ProcessorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retry.multiplier, 3.0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ProcessorConfig::from_file("/nonexistent/spindle.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
