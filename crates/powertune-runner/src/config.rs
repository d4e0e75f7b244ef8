use crate::error::{Result, TunerError};
use crate::schedule::Schedule;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = ".powertune/config.yaml";
pub const DEFAULT_TOKEN_PATH: &str = ".powertune/token.json";
pub const ENDPOINT_ENV: &str = "POWERTUNE_ENDPOINT";
pub const API_KEY_ENV: &str = "POWERTUNE_API_KEY";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TunerConfig {
    /// Base URL of the tuning backend.
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    24
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_token_path() -> PathBuf {
    PathBuf::from(DEFAULT_TOKEN_PATH)
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            poll_interval_secs: default_poll_interval_secs(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            token_path: default_token_path(),
        }
    }
}

impl TunerConfig {
    /// Read `path` if it exists, apply environment overrides, then validate.
    /// A missing file is fine as long as the environment supplies an endpoint.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::from_yaml(
                &fs::read_to_string(path)
                    .map_err(|e| TunerError::Config(format!("{}: {}", path.display(), e)))?,
            )?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| TunerError::Config(e.to_string()))
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|s| !s.trim().is_empty()) {
            self.endpoint = endpoint;
        }
        if let Some(key) = lookup(API_KEY_ENV).filter(|s| !s.trim().is_empty()) {
            self.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.endpoint.trim().is_empty() {
            problems.push(format!(
                "endpoint is required (set it in {} or {})",
                DEFAULT_CONFIG_PATH, ENDPOINT_ENV
            ));
        } else if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            problems.push(format!("endpoint must be an http(s) URL: {}", self.endpoint));
        }
        if self.poll_interval_secs == 0 {
            problems.push("poll_interval_secs must be > 0".to_string());
        }
        if self.max_attempts == 0 {
            problems.push("max_attempts must be > 0".to_string());
        }
        if self.request_timeout_secs == 0 {
            problems.push("request_timeout_secs must be > 0".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(TunerError::Config(problems.join("; ")))
        }
    }

    pub fn schedule(&self) -> Schedule {
        Schedule::new(Duration::from_secs(self.poll_interval_secs), self.max_attempts)
    }
}

/// Starting point written by `powertune init`.
pub const CONFIG_TEMPLATE: &str = "\
# Base URL of the power tuning backend (REQUIRED unless POWERTUNE_ENDPOINT is set)
endpoint: ''
# Sent as x-api-key when present (POWERTUNE_API_KEY overrides)
api_key: null
poll_interval_secs: 5
max_attempts: 24
request_timeout_secs: 30
token_path: .powertune/token.json
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fills_defaults() {
        let config = TunerConfig::from_yaml("endpoint: https://tuner.example.com\n").expect("parse");
        assert_eq!(config.endpoint, "https://tuner.example.com");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_attempts, 24);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.token_path, PathBuf::from(DEFAULT_TOKEN_PATH));
        config.validate().expect("valid");
        let schedule = config.schedule();
        assert_eq!(schedule.interval(), Duration::from_secs(5));
        assert_eq!(schedule.max_ticks(), 24);
    }

    #[test]
    fn template_parses_and_needs_endpoint() {
        let config = TunerConfig::from_yaml(CONFIG_TEMPLATE).expect("template parses");
        let err = config.validate().expect_err("endpoint missing");
        assert!(err.to_string().contains("endpoint is required"), "{}", err);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config =
            TunerConfig::from_yaml("endpoint: https://file.example.com\napi_key: a\n").expect("parse");
        config.apply_env(|key| match key {
            ENDPOINT_ENV => Some("https://env.example.com".to_string()),
            API_KEY_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.endpoint, "https://env.example.com");
        assert_eq!(config.api_key.as_deref(), Some("a"));
    }

    #[test]
    fn validate_reports_all_problems() {
        let config = TunerConfig {
            endpoint: "ftp://x".to_string(),
            poll_interval_secs: 0,
            max_attempts: 0,
            ..TunerConfig::default()
        };
        let msg = config.validate().expect_err("invalid").to_string();
        assert!(msg.contains("http(s)"), "{}", msg);
        assert!(msg.contains("poll_interval_secs"), "{}", msg);
        assert!(msg.contains("max_attempts"), "{}", msg);
    }
}
