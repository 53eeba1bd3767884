use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Minimum time to wait for an experiment to report `AllInjected`.
pub const MIN_INJECTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Namespace experiments and their target pods live in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Directory holding `<template-id>.yaml` manifest templates.
    /// Bundled templates are used when unset.
    #[serde(default)]
    pub template_dir: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_injection_timeout_secs")]
    pub injection_timeout_secs: u64,

    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Upper bound for a single control-plane call outside of a wait
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_injection_timeout_secs() -> u64 {
    MIN_INJECTION_TIMEOUT.as_secs()
}

fn default_recovery_timeout_secs() -> u64 {
    120
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load from `CHAOS_*` environment variables, reading `.env` first.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    fn from_env() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("CHAOS"))
            .build()?;

        let settings: Config = config
            .try_deserialize()
            .unwrap_or_else(|_| Config::default());

        Ok(settings)
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Injection wait, never below [`MIN_INJECTION_TIMEOUT`]
    pub fn injection_timeout(&self) -> Duration {
        Duration::from_secs(self.injection_timeout_secs).max(MIN_INJECTION_TIMEOUT)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            template_dir: None,
            poll_interval_ms: default_poll_interval_ms(),
            injection_timeout_secs: default_injection_timeout_secs(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
