//! Environment-derived engine configuration.
//!
//! Mirrors the deployment surface: service endpoints and credentials come
//! from environment variables with safe defaults, the retry budget and
//! share TTL are tunable without code changes.

use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::RetryPolicy;

/// Base URL and credential for one downstream AI service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Endpoint base URL.
    pub base_url: String,
    /// Bearer credential.
    pub api_key: String,
}

impl ServiceSettings {
    /// Creates settings from explicit values.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn from_env(url_key: &str, api_key_key: &str) -> Self {
        Self {
            base_url: env_or(url_key, ""),
            api_key: env_or(api_key_key, ""),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Describe service endpoint.
    pub describer: ServiceSettings,
    /// Prompt service endpoint.
    pub prompter: ServiceSettings,
    /// Image-edit service endpoint.
    pub editor: ServiceSettings,
    /// Root directory for the local blob store.
    pub storage_root: PathBuf,
    /// Path of the frame asset PNG.
    pub frame_path: PathBuf,
    /// Per-stage retry policy.
    pub retry: RetryPolicy,
    /// Lifetime of presigned URLs handed to collaborators.
    pub share_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            describer: ServiceSettings::default(),
            prompter: ServiceSettings::default(),
            editor: ServiceSettings::default(),
            storage_root: PathBuf::from("/data"),
            frame_path: PathBuf::from("static/frame.png"),
            retry: RetryPolicy::default(),
            share_ttl: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    /// Reads configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_attempts = parse_env("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts);
        let backoff_seconds = parse_env("RETRY_BACKOFF_SECONDS", 1.0_f64);
        let share_seconds = parse_env("SHARE_TTL_SECONDS", defaults.share_ttl.as_secs());

        Self {
            describer: ServiceSettings::from_env("DESCRIBER_URL", "DESCRIBER_API_KEY"),
            prompter: ServiceSettings::from_env("PROMPTER_URL", "PROMPTER_API_KEY"),
            editor: ServiceSettings::from_env("IMAGE_EDITOR_URL", "IMAGE_EDITOR_API_KEY"),
            storage_root: PathBuf::from(env_or("LOCAL_PATH", "/data")),
            frame_path: PathBuf::from(env_or("FRAME_PATH", "static/frame.png")),
            retry: RetryPolicy::new()
                .with_max_attempts(max_attempts)
                .with_backoff(Duration::from_secs_f64(backoff_seconds.max(0.0))),
            share_ttl: Duration::from_secs(share_seconds),
        }
    }

    /// Overrides the storage root.
    #[must_use]
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Overrides the frame asset path.
    #[must_use]
    pub fn with_frame_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.frame_path = path.into();
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
