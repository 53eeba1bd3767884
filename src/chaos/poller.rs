//! Condition polling
//!
//! Reads a chaos resource on a fixed interval until a status condition turns
//! `True`, the deadline passes, or the caller cancels. Read errors count as
//! "not yet" and never end the wait early.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::conditions::{ChaosStatus, Condition};
use super::types::ExperimentHandle;
use crate::error::{ChaosError, ChaosResult};
use crate::k8s::ControlPlane;

/// Where a wait ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling,
    Satisfied,
    TimedOut,
    Cancelled,
}

pub struct ConditionPoller<'a, C: ?Sized> {
    control_plane: &'a C,
    interval: Duration,
}

impl<'a, C: ControlPlane + ?Sized> ConditionPoller<'a, C> {
    pub fn new(control_plane: &'a C, interval: Duration) -> Self {
        Self {
            control_plane,
            interval,
        }
    }

    /// Block until `condition` is `True` on the experiment's resource.
    /// Returns the number of status reads it took.
    pub async fn wait(
        &self,
        handle: &ExperimentHandle,
        condition: Condition,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ChaosResult<u32> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut state = PollState::Polling;
        let mut attempts = 0u32;

        info!(
            "Waiting up to {:?} for {} on {} {}",
            timeout, condition, handle.resource_kind, handle.id
        );

        while state == PollState::Polling {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                state = PollState::TimedOut;
                break;
            }

            attempts += 1;
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    state = PollState::Cancelled;
                    break;
                }
                read = tokio::time::timeout(
                    remaining,
                    self.control_plane
                        .get_resource(handle.resource_kind, &handle.namespace, &handle.id),
                ) => read,
            };

            match read {
                Ok(Ok(resource)) => match ChaosStatus::from_resource(&resource) {
                    Ok(status) if status.is_true(condition) => {
                        state = PollState::Satisfied;
                        break;
                    }
                    Ok(status) => debug!(
                        attempt = attempts,
                        phase = %status.phase(),
                        "{} not yet {}",
                        handle.id,
                        condition
                    ),
                    Err(e) => warn!(attempt = attempts, "Unreadable status on {}: {}", handle.id, e),
                },
                Ok(Err(e)) => {
                    warn!(attempt = attempts, "Status read for {} failed: {}", handle.id, e)
                }
                Err(_) => {
                    state = PollState::TimedOut;
                    break;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                state = PollState::TimedOut;
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => state = PollState::Cancelled,
                _ = tokio::time::sleep(self.interval.min(remaining)) => {}
            }
        }

        let waited = started.elapsed();
        metrics::histogram!("chaos_condition_wait_seconds", waited.as_secs_f64());

        match state {
            PollState::Satisfied => {
                info!(
                    "{} reached {} after {} poll(s) in {:?}",
                    handle.id, condition, attempts, waited
                );
                Ok(attempts)
            }
            PollState::Cancelled => {
                warn!("Wait for {} on {} cancelled", condition, handle.id);
                Err(ChaosError::Cancelled {
                    id: handle.id.clone(),
                    condition,
                })
            }
            PollState::TimedOut | PollState::Polling => Err(ChaosError::Timeout {
                id: handle.id.clone(),
                condition,
                waited,
            }),
        }
    }
}
