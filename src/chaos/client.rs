//! Chaos experiment orchestrator
//!
//! Submits experiments as Chaos Mesh resources, waits on their status
//! conditions and tracks them until they are stopped.

use std::sync::Arc;
use std::time::Duration;

use metrics::increment_counter;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::conditions::{ChaosStatus, Condition, ExperimentPhase};
use super::listener::{ChaosListener, Listeners};
use super::manifest::ManifestRenderer;
use super::poller::ConditionPoller;
use super::registry::LifecycleRegistry;
use super::targets::{resolve_selectors, verify_targets};
use super::types::*;
use crate::config::{Config, MIN_INJECTION_TIMEOUT};
use crate::error::{ChaosError, ChaosResult};
use crate::k8s::{with_deadline, ControlPlane, K8sClient};

/// Annotation Chaos Mesh reads to suspend an experiment
pub const PAUSE_ANNOTATION: &str = "experiment.chaos-mesh.org/pause";

/// Generate `<plural>-<8 hex chars>`
fn experiment_id(kind: ResourceKind) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", kind.plural(), &suffix[..8])
}

/// Chaos Mesh orchestrator
///
/// Clones share the control plane, the renderer, the registry and the
/// listeners.
pub struct ChaosClient<C = K8sClient> {
    control_plane: Arc<C>,
    renderer: Arc<ManifestRenderer>,
    registry: Arc<LifecycleRegistry>,
    listeners: Listeners,
    config: Config,
}

impl<C> Clone for ChaosClient<C> {
    fn clone(&self) -> Self {
        Self {
            control_plane: self.control_plane.clone(),
            renderer: self.renderer.clone(),
            registry: self.registry.clone(),
            listeners: self.listeners.clone(),
            config: self.config.clone(),
        }
    }
}

impl ChaosClient<K8sClient> {
    /// Connect to the cluster from kubeconfig or the in-cluster environment
    pub async fn connect(config: Config) -> ChaosResult<Self> {
        let k8s = K8sClient::new().await?;
        Ok(Self::new(k8s, config))
    }
}

impl<C: ControlPlane> ChaosClient<C> {
    pub fn new(control_plane: C, config: Config) -> Self {
        let renderer = ManifestRenderer::from_config(&config);
        Self {
            control_plane: Arc::new(control_plane),
            renderer: Arc::new(renderer),
            registry: Arc::new(LifecycleRegistry::new()),
            listeners: Listeners::default(),
            config,
        }
    }

    pub fn with_renderer(mut self, renderer: ManifestRenderer) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    /// Register a listener for lifecycle events of every experiment this
    /// client (or any clone of it) handles
    pub fn add_listener(&self, listener: Arc<dyn ChaosListener>) {
        self.listeners.add(listener);
        debug!("{} chaos listener(s) registered", self.listeners.len());
    }

    pub fn with_listener(self, listener: Arc<dyn ChaosListener>) -> Self {
        self.add_listener(listener);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    /// Tracked experiments in submission order
    pub fn experiments(&self) -> Vec<ExperimentHandle> {
        self.registry.handles()
    }

    pub fn get(&self, id: &str) -> Option<ExperimentHandle> {
        self.registry.get(id)
    }

    fn handle(&self, id: &str) -> ChaosResult<ExperimentHandle> {
        self.registry
            .get(id)
            .ok_or_else(|| ChaosError::NotFound(id.to_string()))
    }

    /// Submit with the configured injection timeout
    pub async fn submit_default(&self, experiment: &Experiment) -> ChaosResult<String> {
        self.submit(experiment, self.config.injection_timeout()).await
    }

    /// Create the experiment and block until Chaos Mesh reports every target
    /// injected. The create call and pod verification are each bounded by
    /// `timeout`; the injection wait never lasts less than 60 seconds.
    ///
    /// Once the resource is created it stays registered even if a later step
    /// fails, so it can still be removed with [`stop`](Self::stop).
    #[instrument(skip(self, experiment), fields(kind = %experiment.resource_kind()))]
    pub async fn submit(&self, experiment: &Experiment, timeout: Duration) -> ChaosResult<String> {
        let kind = experiment.resource_kind();
        let result = self.submit_inner(experiment, timeout).await;
        match &result {
            Ok(id) => {
                increment_counter!("chaos_experiments_submitted_total", "kind" => kind.as_str());
                info!("Experiment {} is active", id);
            }
            Err(e) => {
                increment_counter!("chaos_experiments_failed_total", "kind" => kind.as_str());
                error!("Failed to submit {} experiment: {}", kind, e);
            }
        }
        result
    }

    async fn submit_inner(&self, experiment: &Experiment, timeout: Duration) -> ChaosResult<String> {
        experiment.validate()?;

        let kind = experiment.resource_kind();
        let id = experiment_id(kind);
        let base = ExperimentBase {
            name: id.clone(),
            namespace: self.config.namespace.clone(),
        };

        let manifest = self.renderer.render(experiment, &base)?;
        let selectors = resolve_selectors(&manifest)?;

        info!(
            "Creating {} '{}' in {} from template {}",
            kind,
            id,
            base.namespace,
            experiment.template_id()
        );
        let duration = experiment.duration()?;
        let created = with_deadline(
            timeout,
            self.control_plane
                .create_resource(kind, &base.namespace, &manifest),
        )
        .await;
        if let Err(e) = created {
            self.listeners
                .notify(|l| l.on_creation_failed(experiment, &e));
            return Err(e);
        }

        let handle = ExperimentHandle::new(&id, kind, &base.namespace, duration);
        self.registry.register(handle.clone());
        self.listeners.notify(|l| l.on_created(&handle));

        with_deadline(
            timeout,
            verify_targets(self.control_plane.as_ref(), &base.namespace, &selectors),
        )
        .await?;

        let timeout = timeout.max(MIN_INJECTION_TIMEOUT);
        ConditionPoller::new(self.control_plane.as_ref(), self.config.poll_interval())
            .wait(
                &handle,
                Condition::AllInjected,
                timeout,
                &CancellationToken::new(),
            )
            .await?;

        self.registry.set_state(&id, ExperimentState::Active);
        if let Some(active) = self.registry.get(&id) {
            self.listeners.notify(|l| l.on_started(&active));
        }
        Ok(id)
    }

    /// Poll until `condition` is `True` on a tracked experiment
    pub async fn wait_for_condition(
        &self,
        id: &str,
        condition: Condition,
        timeout: Duration,
    ) -> ChaosResult<()> {
        self.wait_for_condition_with_cancel(id, condition, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`wait_for_condition`](Self::wait_for_condition), returning
    /// [`ChaosError::Cancelled`] once `cancel` fires. The resource is left
    /// untouched.
    #[instrument(skip(self, cancel))]
    pub async fn wait_for_condition_with_cancel(
        &self,
        id: &str,
        condition: Condition,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ChaosResult<()> {
        let handle = self.handle(id)?;
        ConditionPoller::new(self.control_plane.as_ref(), self.config.poll_interval())
            .wait(&handle, condition, timeout, cancel)
            .await?;
        Ok(())
    }

    pub async fn wait_for_all_recovered(&self, id: &str, timeout: Duration) -> ChaosResult<()> {
        self.wait_for_condition(id, Condition::AllRecovered, timeout)
            .await
    }

    /// Delete the experiment's resource and forget it.
    ///
    /// A resource the API server no longer has counts as stopped. Any other
    /// delete failure keeps the entry as `DeleteFailed` so a later call can
    /// retry.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: &str) -> ChaosResult<()> {
        let handle = self.handle(id)?;

        let deleted = with_deadline(
            self.config.request_timeout(),
            self.control_plane
                .delete_resource(handle.resource_kind, &handle.namespace, &handle.id),
        )
        .await;

        match deleted {
            Ok(()) => {
                self.registry.remove(id);
                increment_counter!("chaos_experiments_stopped_total", "kind" => handle.resource_kind.as_str());
                info!("Stopped {} {}", handle.resource_kind, id);
                self.listeners.notify(|l| l.on_ended(&handle));
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                self.registry.remove(id);
                warn!("{} {} was already gone", handle.resource_kind, id);
                self.listeners.notify(|l| l.on_ended(&handle));
                Ok(())
            }
            Err(e) => {
                self.registry.set_state(id, ExperimentState::DeleteFailed);
                error!("Failed to delete {} {}: {}", handle.resource_kind, id, e);
                Err(e)
            }
        }
    }

    /// Stop every tracked experiment in submission order, halting at the
    /// first failure. Entries after the failing one are not attempted.
    #[instrument(skip(self))]
    pub async fn stop_all(&self) -> ChaosResult<()> {
        let handles = self.registry.handles();
        info!("Stopping {} experiment(s)", handles.len());

        for handle in handles {
            match self.stop(&handle.id).await {
                Ok(()) | Err(ChaosError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Current phase derived from the resource's status conditions
    #[instrument(skip(self))]
    pub async fn status(&self, id: &str) -> ChaosResult<ExperimentPhase> {
        let handle = self.handle(id)?;
        let resource = with_deadline(
            self.config.request_timeout(),
            self.control_plane
                .get_resource(handle.resource_kind, &handle.namespace, &handle.id),
        )
        .await?;
        let status = ChaosStatus::from_resource(&resource)?;
        if let Some(message) = status.message() {
            info!("{} status: {}", id, message);
        }
        let phase = status.phase();
        if phase == ExperimentPhase::Unknown {
            self.listeners.notify(|l| l.on_status_unknown(&handle));
        }
        Ok(phase)
    }

    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str) -> ChaosResult<()> {
        let handle = self.set_pause_annotation(id, json!("true")).await?;
        self.listeners.notify(|l| l.on_paused(&handle));
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, id: &str) -> ChaosResult<()> {
        // null removes the key under merge-patch semantics
        let handle = self
            .set_pause_annotation(id, serde_json::Value::Null)
            .await?;
        self.listeners.notify(|l| l.on_resumed(&handle));
        Ok(())
    }

    async fn set_pause_annotation(
        &self,
        id: &str,
        value: serde_json::Value,
    ) -> ChaosResult<ExperimentHandle> {
        let handle = self.handle(id)?;
        let patch = json!({
            "metadata": {"annotations": {PAUSE_ANNOTATION: value}}
        });
        with_deadline(
            self.config.request_timeout(),
            self.control_plane.patch_resource(
                handle.resource_kind,
                &handle.namespace,
                &handle.id,
                &patch,
            ),
        )
        .await?;
        info!("Set {}={} on {}", PAUSE_ANNOTATION, value, id);
        Ok(handle)
    }
}
