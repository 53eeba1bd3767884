//! Status conditions reported by Chaos Mesh on experiment resources

use serde::{Deserialize, Serialize};

use crate::error::ChaosResult;

/// Conditions the controller sets on a chaos resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// Pods matching the selector were found
    Selected,
    /// The fault is active on every selected pod
    AllInjected,
    /// The fault has been removed from every selected pod
    AllRecovered,
    Paused,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Selected => "Selected",
            Condition::AllInjected => "AllInjected",
            Condition::AllRecovered => "AllRecovered",
            Condition::Paused => "Paused",
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of `status.conditions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The `status` block of a chaos resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaosStatus {
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

impl ChaosStatus {
    /// Extract the status block from a resource as returned by the API server.
    /// A resource the controller has not reconciled yet has no status.
    pub fn from_resource(resource: &serde_json::Value) -> ChaosResult<Self> {
        match resource.get("status") {
            Some(status) if !status.is_null() => Ok(serde_json::from_value(status.clone())?),
            _ => Ok(Self::default()),
        }
    }

    pub fn is_true(&self, condition: Condition) -> bool {
        self.conditions
            .iter()
            .find(|c| c.type_ == condition.as_str())
            .map(|c| c.status == "True")
            .unwrap_or(false)
    }

    pub fn phase(&self) -> ExperimentPhase {
        if self.is_true(Condition::Paused) {
            ExperimentPhase::Paused
        } else if self.is_true(Condition::Selected) && self.is_true(Condition::AllInjected) {
            ExperimentPhase::Running
        } else if self.is_true(Condition::AllRecovered) {
            ExperimentPhase::Finished
        } else {
            ExperimentPhase::Unknown
        }
    }

    /// First condition message, if the controller reported one
    pub fn message(&self) -> Option<&str> {
        self.conditions.iter().find_map(|c| c.message.as_deref())
    }
}

/// Coarse phase derived from the condition set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentPhase {
    Running,
    Paused,
    Finished,
    Unknown,
}

impl std::fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExperimentPhase::Running => write!(f, "running"),
            ExperimentPhase::Paused => write!(f, "paused"),
            ExperimentPhase::Finished => write!(f, "finished"),
            ExperimentPhase::Unknown => write!(f, "unknown"),
        }
    }
}
