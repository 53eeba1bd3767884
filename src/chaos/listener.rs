//! Lifecycle notifications
//!
//! Listeners registered on a [`ChaosClient`](super::ChaosClient) hear about
//! every experiment it creates, pauses, resumes and stops. Dashboards and
//! annotators hook in here.

use std::sync::Arc;

use parking_lot::RwLock;

use super::types::{Experiment, ExperimentHandle};
use crate::error::ChaosError;

/// Receives experiment lifecycle events. Every method defaults to a no-op.
///
/// Callbacks run inline on the task driving the client, so they should return
/// quickly.
pub trait ChaosListener: Send + Sync {
    /// The resource was accepted by the API server
    fn on_created(&self, _handle: &ExperimentHandle) {}

    /// The API server refused or never answered the create call
    fn on_creation_failed(&self, _experiment: &Experiment, _error: &ChaosError) {}

    /// `AllInjected` was observed
    fn on_started(&self, _handle: &ExperimentHandle) {}

    fn on_paused(&self, _handle: &ExperimentHandle) {}

    fn on_resumed(&self, handle: &ExperimentHandle) {
        self.on_started(handle)
    }

    /// The resource was deleted, or was already gone
    fn on_ended(&self, _handle: &ExperimentHandle) {}

    /// A status read found no recognizable condition set
    fn on_status_unknown(&self, _handle: &ExperimentHandle) {}
}

/// Listener set shared by clones of a client
#[derive(Default, Clone)]
pub(crate) struct Listeners {
    inner: Arc<RwLock<Vec<Arc<dyn ChaosListener>>>>,
}

impl Listeners {
    pub fn add(&self, listener: Arc<dyn ChaosListener>) {
        self.inner.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Call `f` on every listener, outside the lock
    pub fn notify(&self, f: impl Fn(&dyn ChaosListener)) {
        let listeners = self.inner.read().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}
