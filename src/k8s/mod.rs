//! Kubernetes integration
//!
//! The orchestrator talks to the cluster through the [`ControlPlane`] trait;
//! [`K8sClient`] implements it on top of kube-rs.

mod client;
mod control_plane;

pub use client::{chaos_api_resource, targetable_pod_names, K8sClient};
#[cfg(test)]
pub use control_plane::MockControlPlane;
pub use control_plane::{with_deadline, ControlPlane};
