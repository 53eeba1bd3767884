//! Manifest rendering
//!
//! Experiments are rendered through YAML templates (one per template id)
//! and converted to the JSON documents the API server accepts.

use std::collections::BTreeMap;
use std::path::Path;

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::Deserialize;
use tracing::debug;

use super::types::{Experiment, ExperimentBase};
use crate::config::Config;
use crate::error::{ChaosError, ChaosResult};

const TEMPLATE_EXTENSION: &str = ".yaml";

/// Templates shipped with the crate, keyed by template id
pub const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("pod-kill", include_str!("../../templates/pod-kill.yaml")),
    ("pod-failure", include_str!("../../templates/pod-failure.yaml")),
    ("container-kill", include_str!("../../templates/container-kill.yaml")),
    ("network-delay", include_str!("../../templates/network-delay.yaml")),
    ("network-loss", include_str!("../../templates/network-loss.yaml")),
    ("network-partition", include_str!("../../templates/network-partition.yaml")),
    ("network-corruption", include_str!("../../templates/network-corruption.yaml")),
    ("network-duplication", include_str!("../../templates/network-duplication.yaml")),
    (
        "network-bandwidth-limit",
        include_str!("../../templates/network-bandwidth-limit.yaml"),
    ),
    ("io-delay", include_str!("../../templates/io-delay.yaml")),
    ("io-fault", include_str!("../../templates/io-fault.yaml")),
    ("dns-chaos", include_str!("../../templates/dns-chaos.yaml")),
    ("stress", include_str!("../../templates/stress.yaml")),
    ("time-shift", include_str!("../../templates/time-shift.yaml")),
    ("http-abort", include_str!("../../templates/http-abort.yaml")),
];

fn builtin_source(name: &str) -> Option<&'static str> {
    let id = name.strip_suffix(TEMPLATE_EXTENSION)?;
    BUILTIN_TEMPLATES
        .iter()
        .find(|(template_id, _)| *template_id == id)
        .map(|(_, source)| *source)
}

/// Renders experiments into Chaos Mesh manifests
pub struct ManifestRenderer {
    env: Environment<'static>,
}

impl Default for ManifestRenderer {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ManifestRenderer {
    /// Renderer backed by the bundled templates
    pub fn builtin() -> Self {
        Self::with_loader(|name| Ok(builtin_source(name).map(str::to_string)))
    }

    /// Renderer reading `<template-id>.yaml` files from `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self::with_loader(minijinja::path_loader(dir))
    }

    pub fn from_config(config: &Config) -> Self {
        match &config.template_dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::builtin(),
        }
    }

    fn with_loader<F>(loader: F) -> Self
    where
        F: Fn(&str) -> Result<Option<String>, minijinja::Error> + Send + Sync + 'static,
    {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_loader(loader);
        Self { env }
    }

    /// Render `experiment` under `base` into a JSON manifest
    pub fn render(
        &self,
        experiment: &Experiment,
        base: &ExperimentBase,
    ) -> ChaosResult<serde_json::Value> {
        let template_id = experiment.template_id();
        let template = self
            .env
            .get_template(&format!("{}{}", template_id, TEMPLATE_EXTENSION))
            .map_err(|e| match e.kind() {
                ErrorKind::TemplateNotFound => ChaosError::TemplateNotFound(template_id.to_string()),
                _ => ChaosError::Template(e),
            })?;

        let mut context = match experiment.params()? {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(ChaosError::Internal(format!(
                    "experiment parameters must be an object, got {}",
                    other
                )))
            }
        };
        context.insert("name".to_string(), base.name.clone().into());
        context.insert("namespace".to_string(), base.namespace.clone().into());

        let rendered = template.render(minijinja::Value::from_serialize(&context))?;
        debug!(template = template_id, name = %base.name, "Rendered manifest:\n{}", rendered);

        let manifest: serde_json::Value = serde_yaml::from_str(&rendered)?;

        let parsed = Manifest::parse(&manifest)?;
        if parsed.kind != experiment.resource_kind().as_str() {
            return Err(ChaosError::InvalidManifest(format!(
                "template {} produced kind {}, expected {}",
                template_id,
                parsed.kind,
                experiment.resource_kind()
            )));
        }

        Ok(manifest)
    }
}

/// Typed view of the parts of a rendered manifest the orchestrator reads
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: ManifestSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestSpec {
    #[serde(default)]
    pub selector: Option<SelectorSpec>,
    #[serde(default)]
    pub target: Option<TargetField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSpec {
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub label_selectors: Option<BTreeMap<String, String>>,
}

/// `spec.target` is a second pod selector on NetworkChaos and a
/// request/response phase name on HTTPChaos.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TargetField {
    Pods(TargetSpec),
    Phase(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetSpec {
    #[serde(default)]
    pub mode: Option<String>,
    pub selector: SelectorSpec,
}

impl Manifest {
    pub fn parse(value: &serde_json::Value) -> ChaosResult<Self> {
        Self::deserialize(value).map_err(|e| ChaosError::InvalidManifest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::types::*;

    fn base(name: &str) -> ExperimentBase {
        ExperimentBase {
            name: name.to_string(),
            namespace: "chaos-test".to_string(),
        }
    }

    #[test]
    fn test_render_pod_kill() {
        let renderer = ManifestRenderer::builtin();
        let exp = Experiment::PodKill(PodKill {
            target: PodTarget::label("app", "chainlink-0"),
            grace_period: Some(0),
            duration: None,
        });

        let manifest = renderer.render(&exp, &base("podchaos-0a1b2c3d")).unwrap();

        assert_eq!(manifest["apiVersion"], "chaos-mesh.org/v1alpha1");
        assert_eq!(manifest["kind"], "PodChaos");
        assert_eq!(manifest["metadata"]["name"], "podchaos-0a1b2c3d");
        assert_eq!(manifest["metadata"]["namespace"], "chaos-test");
        assert_eq!(manifest["spec"]["action"], "pod-kill");
        assert_eq!(manifest["spec"]["mode"], "all");
        assert_eq!(manifest["spec"]["gracePeriod"], 0);
        assert!(manifest["spec"].get("duration").is_none());
        assert_eq!(manifest["spec"]["selector"]["namespaces"][0], "chaos-test");
        assert_eq!(
            manifest["spec"]["selector"]["labelSelectors"]["app"],
            "chainlink-0"
        );
    }

    #[test]
    fn test_render_network_delay() {
        let renderer = ManifestRenderer::builtin();
        let exp = Experiment::NetworkDelay(NetworkDelay {
            target: PodTarget::label("app", "geth").with_mode(SelectorMode::Fixed(2)),
            latency: "200ms".to_string(),
            jitter: Some("50ms".to_string()),
            correlation: None,
            direction: Direction::Both,
            duration: Some("60s".to_string()),
        });

        let manifest = renderer.render(&exp, &base("networkchaos-00ff00ff")).unwrap();

        assert_eq!(manifest["kind"], "NetworkChaos");
        assert_eq!(manifest["spec"]["action"], "delay");
        assert_eq!(manifest["spec"]["mode"], "fixed");
        assert_eq!(manifest["spec"]["value"], "2");
        assert_eq!(manifest["spec"]["direction"], "both");
        assert_eq!(manifest["spec"]["duration"], "60s");
        assert_eq!(manifest["spec"]["delay"]["latency"], "200ms");
        assert_eq!(manifest["spec"]["delay"]["jitter"], "50ms");
        assert!(manifest["spec"]["delay"].get("correlation").is_none());
    }

    #[test]
    fn test_render_partition_has_both_sides() {
        let renderer = ManifestRenderer::builtin();
        let exp = Experiment::NetworkPartition(NetworkPartition {
            from: PodTarget::label("app", "node-1"),
            to: PodTarget::label("app", "node-2").with_mode(SelectorMode::One),
            direction: Direction::Both,
            duration: Some("2m".to_string()),
        });

        let manifest = renderer.render(&exp, &base("networkchaos-12345678")).unwrap();

        assert_eq!(manifest["spec"]["action"], "partition");
        assert_eq!(manifest["spec"]["selector"]["labelSelectors"]["app"], "node-1");
        assert_eq!(manifest["spec"]["target"]["mode"], "one");
        assert_eq!(
            manifest["spec"]["target"]["selector"]["labelSelectors"]["app"],
            "node-2"
        );
    }

    #[test]
    fn test_render_every_builtin_variant() {
        let renderer = ManifestRenderer::builtin();
        let target = || PodTarget::label("app.kubernetes.io/instance", "node");
        let experiments: Vec<Experiment> = vec![
            PodFailure { target: target(), duration: Some("30s".into()) }.into(),
            ContainerKill {
                target: target(),
                container_names: vec!["node".into()],
                duration: None,
            }
            .into(),
            NetworkLoss {
                target: target(),
                loss: "25".into(),
                correlation: Some("50".into()),
                direction: Direction::To,
                duration: None,
            }
            .into(),
            NetworkCorruption {
                target: target(),
                corrupt: "10".into(),
                correlation: None,
                direction: Direction::From,
                duration: None,
            }
            .into(),
            NetworkDuplication {
                target: target(),
                duplicate: "10".into(),
                correlation: None,
                direction: Direction::To,
                duration: None,
            }
            .into(),
            NetworkBandwidthLimit {
                target: target(),
                rate: "1mbps".into(),
                limit: 20000,
                buffer: 10000,
                direction: Direction::To,
                duration: None,
            }
            .into(),
            IoDelay {
                target: target(),
                volume_path: "/data".into(),
                path: Some("/data/**/*".into()),
                delay: "100ms".into(),
                percent: 50,
                methods: vec!["READ".into()],
                duration: None,
            }
            .into(),
            IoFault {
                target: target(),
                volume_path: "/data".into(),
                path: None,
                errno: 5,
                percent: 100,
                methods: vec![],
                duration: None,
            }
            .into(),
            DnsChaos {
                target: target(),
                action: DnsAction::Random,
                patterns: vec!["google.com".into()],
                duration: None,
            }
            .into(),
            Stress {
                target: target(),
                cpu: Some(CpuStressor { workers: 1, load: 80 }),
                memory: Some(MemoryStressor { workers: 1, size: "256MB".into() }),
                duration: Some("1m".into()),
            }
            .into(),
            TimeShift {
                target: target(),
                time_offset: "-10m".into(),
                clock_ids: vec!["CLOCK_REALTIME".into()],
                duration: None,
            }
            .into(),
            HttpAbort {
                target: target(),
                port: 8080,
                method: Some("GET".into()),
                path: Some("/api/*".into()),
                duration: None,
            }
            .into(),
        ];

        for exp in experiments {
            let manifest = renderer
                .render(&exp, &base("exp-00000000"))
                .unwrap_or_else(|e| panic!("{} failed to render: {}", exp.template_id(), e));
            assert_eq!(manifest["kind"], exp.resource_kind().as_str());
            assert_eq!(
                manifest["spec"]["selector"]["labelSelectors"]["app.kubernetes.io/instance"],
                "node",
                "{} selector",
                exp.template_id()
            );
            Manifest::parse(&manifest).unwrap();
        }
    }

    #[test]
    fn test_stress_manifest_fields() {
        let renderer = ManifestRenderer::builtin();
        let exp = Experiment::Stress(Stress {
            target: PodTarget::label("app", "db"),
            cpu: Some(CpuStressor { workers: 2, load: 90 }),
            memory: None,
            duration: None,
        });
        let manifest = renderer.render(&exp, &base("stresschaos-aa")).unwrap();
        assert_eq!(manifest["spec"]["stressors"]["cpu"]["workers"], 2);
        assert_eq!(manifest["spec"]["stressors"]["cpu"]["load"], 90);
        assert!(manifest["spec"]["stressors"].get("memory").is_none());
    }

    #[test]
    fn test_http_target_is_a_phase() {
        let renderer = ManifestRenderer::builtin();
        let exp = Experiment::HttpAbort(HttpAbort {
            target: PodTarget::label("app", "api"),
            port: 80,
            method: None,
            path: None,
            duration: None,
        });
        let manifest = renderer.render(&exp, &base("httpchaos-aa")).unwrap();
        let parsed = Manifest::parse(&manifest).unwrap();
        assert!(matches!(parsed.spec.target, Some(TargetField::Phase(ref p)) if p == "Request"));
    }

    #[test]
    fn test_template_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ManifestRenderer::from_dir(dir.path());
        let exp = Experiment::PodFailure(PodFailure {
            target: PodTarget::label("app", "x"),
            duration: None,
        });
        let err = renderer.render(&exp, &base("podchaos-1")).unwrap_err();
        assert!(matches!(err, ChaosError::TemplateNotFound(ref id) if id == "pod-failure"));
    }

    #[test]
    fn test_undefined_field_is_a_template_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pod-failure.yaml"),
            "kind: PodChaos\nmetadata:\n  name: {{ name }}\n  namespace: {{ namespace }}\nspec:\n  action: {{ no_such_field }}\n",
        )
        .unwrap();
        let renderer = ManifestRenderer::from_dir(dir.path());
        let exp = Experiment::PodFailure(PodFailure {
            target: PodTarget::label("app", "x"),
            duration: None,
        });
        let err = renderer.render(&exp, &base("podchaos-1")).unwrap_err();
        assert!(matches!(err, ChaosError::Template(_)));
    }

    #[test]
    fn test_invalid_yaml_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pod-failure.yaml"),
            "kind: PodChaos\nspec: [unclosed\n",
        )
        .unwrap();
        let renderer = ManifestRenderer::from_dir(dir.path());
        let exp = Experiment::PodFailure(PodFailure {
            target: PodTarget::label("app", "x"),
            duration: None,
        });
        let err = renderer.render(&exp, &base("podchaos-1")).unwrap_err();
        assert!(matches!(err, ChaosError::ManifestFormat(_)));
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pod-failure.yaml"),
            "apiVersion: chaos-mesh.org/v1alpha1\nkind: NetworkChaos\nmetadata:\n  name: {{ name }}\n  namespace: {{ namespace }}\nspec:\n  action: pod-failure\n",
        )
        .unwrap();
        let renderer = ManifestRenderer::from_dir(dir.path());
        let exp = Experiment::PodFailure(PodFailure {
            target: PodTarget::label("app", "x"),
            duration: None,
        });
        let err = renderer.render(&exp, &base("podchaos-1")).unwrap_err();
        assert!(matches!(err, ChaosError::InvalidManifest(_)));
    }
}
