//! Kubernetes client wrapper backing the orchestrator

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    discovery::ApiResource,
    Client, Config,
};
use tracing::{debug, info, instrument};

use super::control_plane::ControlPlane;
use crate::chaos::{ResourceKind, CHAOS_API_GROUP, CHAOS_API_VERSION};
use crate::error::ChaosResult;

/// Describe a Chaos Mesh kind for dynamic API access
pub fn chaos_api_resource(kind: ResourceKind) -> ApiResource {
    ApiResource {
        group: CHAOS_API_GROUP.to_string(),
        version: CHAOS_API_VERSION.to_string(),
        api_version: ResourceKind::api_version(),
        kind: kind.as_str().to_string(),
        plural: kind.plural().to_string(),
    }
}

/// Names of pods a fault can still land on. Pods that ran to completion
/// (`Succeeded` or `Failed`) are skipped.
pub fn targetable_pod_names(pods: impl IntoIterator<Item = Pod>) -> Vec<String> {
    pods.into_iter()
        .filter(|pod| {
            let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
            !matches!(phase, Some("Succeeded") | Some("Failed"))
        })
        .filter_map(|pod| pod.metadata.name)
        .collect()
}

/// Wrapper around kube::Client speaking to Chaos Mesh resources and pods
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a K8sClient using the default kubeconfig or in-cluster config
    #[instrument(skip_all)]
    pub async fn new() -> ChaosResult<Self> {
        let config = Config::infer().await.map_err(kube::Error::InferConfig)?;
        let client = Client::try_from(config)?;

        info!("Connected to Kubernetes cluster");

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Get the inner kube Client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn chaos_api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &chaos_api_resource(kind))
    }
}

#[async_trait]
impl ControlPlane for K8sClient {
    #[instrument(skip(self, manifest), fields(kind = %kind))]
    async fn create_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        manifest: &serde_json::Value,
    ) -> ChaosResult<()> {
        let obj: DynamicObject = serde_json::from_value(manifest.clone())?;
        let created = self
            .chaos_api(kind, namespace)
            .create(&PostParams::default(), &obj)
            .await?;
        info!(
            name = %created.metadata.name.as_deref().unwrap_or("unknown"),
            "Created {}", kind
        );
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %kind))]
    async fn get_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> ChaosResult<serde_json::Value> {
        let obj = self.chaos_api(kind, namespace).get(name).await?;
        Ok(serde_json::to_value(obj)?)
    }

    #[instrument(skip(self), fields(kind = %kind))]
    async fn delete_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> ChaosResult<()> {
        self.chaos_api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        info!(name, "Deleted {}", kind);
        Ok(())
    }

    #[instrument(skip(self, patch), fields(kind = %kind))]
    async fn patch_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> ChaosResult<()> {
        self.chaos_api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        debug!(name, "Patched {}", kind);
        Ok(())
    }

    /// List live pods with a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> ChaosResult<Vec<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await?;
        let total = list.items.len();
        let names = targetable_pod_names(list.items);
        if names.len() < total {
            debug!(
                "Skipped {} completed pod(s) matching '{}'",
                total - names.len(),
                label_selector
            );
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_chaos_api_resource() {
        let ar = chaos_api_resource(ResourceKind::NetworkChaos);
        assert_eq!(ar.group, "chaos-mesh.org");
        assert_eq!(ar.version, "v1alpha1");
        assert_eq!(ar.api_version, "chaos-mesh.org/v1alpha1");
        assert_eq!(ar.kind, "NetworkChaos");
        assert_eq!(ar.plural, "networkchaos");

        let ar = chaos_api_resource(ResourceKind::IOChaos);
        assert_eq!(ar.plural, "iochaos");
    }

    fn pod(name: &str, phase: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: phase.map(|p| PodStatus {
                phase: Some(p.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_completed_pods_are_not_targets() {
        let names = targetable_pod_names(vec![
            pod("geth-0", Some("Running")),
            pod("geth-init", Some("Succeeded")),
            pod("geth-crashed", Some("Failed")),
            pod("geth-1", Some("Pending")),
            pod("geth-2", None),
        ]);
        assert_eq!(names, vec!["geth-0", "geth-1", "geth-2"]);

        let none = targetable_pod_names(vec![
            pod("job-a", Some("Succeeded")),
            pod("job-b", Some("Failed")),
        ]);
        assert!(none.is_empty());
    }

    #[test]
    fn test_manifest_converts_to_dynamic_object() {
        let manifest = serde_json::json!({
            "apiVersion": "chaos-mesh.org/v1alpha1",
            "kind": "PodChaos",
            "metadata": {"name": "podchaos-0a1b2c3d", "namespace": "chaos"},
            "spec": {"action": "pod-kill", "mode": "one"}
        });
        let obj: DynamicObject = serde_json::from_value(manifest).unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("podchaos-0a1b2c3d"));
        assert_eq!(obj.data["spec"]["action"], "pod-kill");
    }
}
