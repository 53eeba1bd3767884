//! Chaos experiment orchestration over Chaos Mesh
//!
//! An [`Experiment`] is rendered into a custom-resource manifest, created on
//! the cluster, checked against the pods it selects and then polled until
//! Chaos Mesh reports it injected. [`ChaosClient`] keeps track of everything
//! it created so it can be stopped again:
//! - Pod faults (kill, failure, container kill)
//! - Network faults (delay, loss, partition, corruption, duplication, bandwidth)
//! - IO, DNS, stress, time and HTTP faults

mod client;
mod conditions;
mod listener;
mod manifest;
mod poller;
mod registry;
mod targets;
mod types;

pub use client::{ChaosClient, PAUSE_ANNOTATION};
pub use conditions::{ChaosStatus, Condition, ExperimentPhase, StatusCondition};
pub use listener::ChaosListener;
pub use manifest::{Manifest, ManifestRenderer, BUILTIN_TEMPLATES};
pub use poller::{ConditionPoller, PollState};
pub use registry::LifecycleRegistry;
pub use targets::{label_query, resolve_selectors, verify_targets, SelectorSide, TargetSelector};
pub use types::*;
