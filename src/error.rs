//! Error types for chaos experiment orchestration

use std::time::Duration;

use thiserror::Error;

use crate::chaos::Condition;

pub type ChaosResult<T> = Result<T, ChaosError>;

#[derive(Debug, Error)]
pub enum ChaosError {
    // ---- Definition errors ----
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Manifest is not valid YAML: {0}")]
    ManifestFormat(#[from] serde_yaml::Error),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid experiment: {0}")]
    InvalidExperiment(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ---- Transport errors ----
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Request to the control plane timed out after {0:?}")]
    RequestTimeout(Duration),

    // ---- Verification errors ----
    #[error("No pods match selector '{selector}' in namespace {namespace}")]
    NoTargets { selector: String, namespace: String },

    // ---- Wait errors ----
    #[error("Experiment {id} did not reach {condition} within {waited:?}")]
    Timeout {
        id: String,
        condition: Condition,
        waited: Duration,
    },

    #[error("Wait for {condition} on experiment {id} was cancelled")]
    Cancelled { id: String, condition: Condition },

    // ---- Lifecycle errors ----
    #[error("Experiment not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChaosError {
    pub fn invalid_manifest(msg: &str) -> Self {
        Self::InvalidManifest(msg.to_string())
    }

    pub fn invalid_experiment(msg: &str) -> Self {
        Self::InvalidExperiment(msg.to_string())
    }

    pub fn internal(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }

    /// True when the failure came from talking to the control plane and the
    /// same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Kubernetes(_) | Self::RequestTimeout(_))
    }

    /// True when the API server answered 404 for the resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kubernetes(kube::Error::Api(ae)) if ae.code == 404)
    }
}
