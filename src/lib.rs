//! chaos-harness
//!
//! Fault-injection orchestration for test networks running on Kubernetes
//! with Chaos Mesh installed.

pub mod chaos;
pub mod config;
pub mod error;
pub mod k8s;
pub mod telemetry;

pub use chaos::{ChaosClient, Condition, Experiment, ExperimentHandle, ExperimentPhase};
pub use config::Config;
pub use error::{ChaosError, ChaosResult};
