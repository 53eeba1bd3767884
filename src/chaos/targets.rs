//! Target resolution
//!
//! Turns the selector clauses of a rendered manifest into pod label queries
//! and checks that each of them matches at least one running pod.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::manifest::{Manifest, SelectorSpec, TargetField};
use crate::error::{ChaosError, ChaosResult};
use crate::k8s::ControlPlane;

/// Which selector clause of the manifest a query came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorSide {
    /// `spec.selector`
    Source,
    /// `spec.target.selector`
    Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSelector {
    pub side: SelectorSide,
    /// Label query in `key=value, key=value` form
    pub query: String,
}

/// Serialize a label map into a pod-list label selector
pub fn label_query(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn selector_query(selector: &SelectorSpec, clause: &str) -> ChaosResult<String> {
    let labels = selector.label_selectors.as_ref().ok_or_else(|| {
        ChaosError::InvalidManifest(format!("{} has no labelSelectors", clause))
    })?;
    if labels.is_empty() {
        return Err(ChaosError::InvalidManifest(format!(
            "{} has an empty labelSelectors map",
            clause
        )));
    }
    Ok(label_query(labels))
}

/// Extract the label queries of every selector clause in `manifest`
pub fn resolve_selectors(manifest: &serde_json::Value) -> ChaosResult<Vec<TargetSelector>> {
    let manifest = Manifest::parse(manifest)?;
    let mut selectors = Vec::with_capacity(2);

    if let Some(selector) = &manifest.spec.selector {
        selectors.push(TargetSelector {
            side: SelectorSide::Source,
            query: selector_query(selector, "spec.selector")?,
        });
    }

    if let Some(TargetField::Pods(target)) = &manifest.spec.target {
        selectors.push(TargetSelector {
            side: SelectorSide::Target,
            query: selector_query(&target.selector, "spec.target.selector")?,
        });
    }

    if selectors.is_empty() {
        return Err(ChaosError::InvalidManifest(format!(
            "{} {} has no pod selector",
            manifest.kind, manifest.metadata.name
        )));
    }

    Ok(selectors)
}

/// Fail unless every selector matches at least one pod in `namespace`
pub async fn verify_targets<C: ControlPlane + ?Sized>(
    control_plane: &C,
    namespace: &str,
    selectors: &[TargetSelector],
) -> ChaosResult<()> {
    for selector in selectors {
        let pods = control_plane.list_pods(namespace, &selector.query).await?;
        if pods.is_empty() {
            warn!(
                "Selector '{}' ({:?}) matches no pods in {}",
                selector.query, selector.side, namespace
            );
            return Err(ChaosError::NoTargets {
                selector: selector.query.clone(),
                namespace: namespace.to_string(),
            });
        }
        info!(
            "Selector '{}' ({:?}) matches {} pod(s): {}",
            selector.query,
            selector.side,
            pods.len(),
            pods.join(", ")
        );
    }
    Ok(())
}
