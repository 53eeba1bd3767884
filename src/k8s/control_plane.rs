//! The subset of the Kubernetes API the orchestrator depends on

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::chaos::ResourceKind;
use crate::error::{ChaosError, ChaosResult};

/// Custom-resource and pod operations against the cluster.
///
/// Chaos resources live at
/// `/apis/chaos-mesh.org/v1alpha1/namespaces/<namespace>/<plural>/<name>`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create a chaos resource from a rendered manifest
    async fn create_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        manifest: &serde_json::Value,
    ) -> ChaosResult<()>;

    /// Read a chaos resource, including its `status` block
    async fn get_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> ChaosResult<serde_json::Value>;

    async fn delete_resource(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> ChaosResult<()>;

    /// Apply a JSON merge patch to a chaos resource
    async fn patch_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> ChaosResult<()>;

    /// Names of the pods in `namespace` matching `label_selector`, leaving out
    /// pods that already completed
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> ChaosResult<Vec<String>>;
}

/// Bound a control-plane call by `limit`
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> ChaosResult<T>
where
    F: Future<Output = ChaosResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ChaosError::RequestTimeout(limit))?
}
