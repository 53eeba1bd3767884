//! In-memory control plane for integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chaos_harness::chaos::{ResourceKind, PAUSE_ANNOTATION};
use chaos_harness::k8s::ControlPlane;
use chaos_harness::{ChaosError, ChaosResult};
use kube::error::ErrorResponse;
use parking_lot::Mutex;
use serde_json::{json, Value};

type Key = (ResourceKind, String, String);

#[derive(Default)]
struct Stored {
    manifest: Value,
    reads: u32,
    recovered: bool,
}

struct FakePod {
    name: String,
    labels: BTreeMap<String, String>,
    completed: bool,
}

#[derive(Default)]
struct State {
    resources: HashMap<Key, Stored>,
    pods: Vec<FakePod>,
    /// Reads a resource needs before it reports `AllInjected`
    inject_after: u32,
    failing_deletes: HashSet<String>,
    /// Latency of every create call
    create_delay: Duration,
    deleted: Vec<String>,
}

/// Cluster double. Clones share state so a test can inspect what the
/// client did.
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<State>>,
}

pub fn api_error(code: u16, reason: &str) -> ChaosError {
    ChaosError::Kubernetes(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pod(self, name: &str, labels: &[(&str, &str)]) -> Self {
        self.push_pod(name, labels, false);
        self
    }

    /// A pod that ran to completion; listed by the API but not targetable
    pub fn with_completed_pod(self, name: &str, labels: &[(&str, &str)]) -> Self {
        self.push_pod(name, labels, true);
        self
    }

    fn push_pod(&self, name: &str, labels: &[(&str, &str)], completed: bool) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state.lock().pods.push(FakePod {
            name: name.to_string(),
            labels,
            completed,
        });
    }

    pub fn create_delay(self, delay: Duration) -> Self {
        self.state.lock().create_delay = delay;
        self
    }

    pub fn inject_after(self, reads: u32) -> Self {
        self.state.lock().inject_after = reads;
        self
    }

    pub fn fail_delete(&self, name: &str) {
        self.state.lock().failing_deletes.insert(name.to_string());
    }

    pub fn heal_delete(&self, name: &str) {
        self.state.lock().failing_deletes.remove(name);
    }

    pub fn recover(&self, name: &str) {
        let mut state = self.state.lock();
        for ((_, _, n), stored) in state.resources.iter_mut() {
            if n == name {
                stored.recovered = true;
            }
        }
    }

    pub fn manifest(&self, name: &str) -> Option<Value> {
        let state = self.state.lock();
        state
            .resources
            .iter()
            .find(|((_, _, n), _)| n == name)
            .map(|(_, stored)| stored.manifest.clone())
    }

    pub fn resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }
}

fn matches(labels: &BTreeMap<String, String>, query: &str) -> bool {
    query.split(',').map(str::trim).all(|clause| {
        match clause.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => false,
        }
    })
}

fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn status_of(stored: &Stored, inject_after: u32) -> Value {
    let flag = |b: bool| if b { "True" } else { "False" };
    let paused = stored.manifest["metadata"]["annotations"][PAUSE_ANNOTATION] == "true";
    let injected = stored.reads >= inject_after && !stored.recovered;
    json!({"conditions": [
        {"type": "Selected", "status": "True"},
        {"type": "AllInjected", "status": flag(injected)},
        {"type": "AllRecovered", "status": flag(stored.recovered)},
        {"type": "Paused", "status": flag(paused)}
    ]})
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        manifest: &Value,
    ) -> ChaosResult<()> {
        let delay = self.state.lock().create_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let name = manifest["metadata"]["name"]
            .as_str()
            .ok_or_else(|| api_error(422, "Invalid"))?
            .to_string();
        let key = (kind, namespace.to_string(), name);
        let mut state = self.state.lock();
        if state.resources.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.resources.insert(
            key,
            Stored {
                manifest: manifest.clone(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn get_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> ChaosResult<Value> {
        let mut state = self.state.lock();
        let inject_after = state.inject_after;
        let stored = state
            .resources
            .get_mut(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        stored.reads += 1;
        let mut resource = stored.manifest.clone();
        resource["status"] = status_of(stored, inject_after);
        Ok(resource)
    }

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> ChaosResult<()> {
        let mut state = self.state.lock();
        if state.failing_deletes.contains(name) {
            return Err(api_error(500, "InternalError"));
        }
        state
            .resources
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn patch_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> ChaosResult<()> {
        let mut state = self.state.lock();
        let stored = state
            .resources
            .get_mut(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        merge(&mut stored.manifest, patch);
        Ok(())
    }

    async fn list_pods(&self, _namespace: &str, label_selector: &str) -> ChaosResult<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .pods
            .iter()
            .filter(|pod| !pod.completed && matches(&pod.labels, label_selector))
            .map(|pod| pod.name.clone())
            .collect())
    }
}
