//! Experiment model: fault kinds, pod targets and tracked handles

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChaosError, ChaosResult};

/// API group served by the Chaos Mesh controller
pub const CHAOS_API_GROUP: &str = "chaos-mesh.org";
pub const CHAOS_API_VERSION: &str = "v1alpha1";

/// Chaos Mesh custom resource kind created by an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    PodChaos,
    NetworkChaos,
    IOChaos,
    TimeChaos,
    StressChaos,
    DNSChaos,
    HTTPChaos,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::PodChaos => "PodChaos",
            ResourceKind::NetworkChaos => "NetworkChaos",
            ResourceKind::IOChaos => "IOChaos",
            ResourceKind::TimeChaos => "TimeChaos",
            ResourceKind::StressChaos => "StressChaos",
            ResourceKind::DNSChaos => "DNSChaos",
            ResourceKind::HTTPChaos => "HTTPChaos",
        }
    }

    /// Plural used in the resource path; also the prefix of experiment ids
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::PodChaos => "podchaos",
            ResourceKind::NetworkChaos => "networkchaos",
            ResourceKind::IOChaos => "iochaos",
            ResourceKind::TimeChaos => "timechaos",
            ResourceKind::StressChaos => "stresschaos",
            ResourceKind::DNSChaos => "dnschaos",
            ResourceKind::HTTPChaos => "httpchaos",
        }
    }

    pub fn api_version() -> String {
        format!("{}/{}", CHAOS_API_GROUP, CHAOS_API_VERSION)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity assigned to an experiment at submission time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentBase {
    pub name: String,
    pub namespace: String,
}

/// How many of the selected pods a fault applies to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "value", rename_all = "kebab-case")]
pub enum SelectorMode {
    One,
    #[default]
    All,
    Fixed(u32),
    FixedPercent(u32),
    RandomMaxPercent(u32),
}

impl SelectorMode {
    fn validate(&self) -> ChaosResult<()> {
        match self {
            SelectorMode::Fixed(0) => Err(ChaosError::invalid_experiment(
                "fixed mode needs at least one pod",
            )),
            SelectorMode::FixedPercent(p) | SelectorMode::RandomMaxPercent(p) if *p > 100 => {
                Err(ChaosError::InvalidExperiment(format!(
                    "mode percentage {} is above 100",
                    p
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Pods a fault is applied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PodTarget {
    #[serde(flatten)]
    pub mode: SelectorMode,
    pub label_selectors: BTreeMap<String, String>,
}

impl PodTarget {
    /// Every pod carrying `key=value`
    pub fn label(key: &str, value: &str) -> Self {
        Self {
            mode: SelectorMode::All,
            label_selectors: BTreeMap::from([(key.to_string(), value.to_string())]),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.label_selectors
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_mode(mut self, mode: SelectorMode) -> Self {
        self.mode = mode;
        self
    }

    fn validate(&self) -> ChaosResult<()> {
        if self.label_selectors.is_empty() {
            return Err(ChaosError::invalid_experiment(
                "target needs at least one label selector",
            ));
        }
        if self.label_selectors.keys().any(|k| k.trim().is_empty()) {
            return Err(ChaosError::invalid_experiment("label selector key is empty"));
        }
        self.mode.validate()
    }
}

/// Direction of network traffic affected by a network fault
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    To,
    From,
    Both,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::To => write!(f, "to"),
            Direction::From => write!(f, "from"),
            Direction::Both => write!(f, "both"),
        }
    }
}

// ---- PodChaos ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodKill {
    pub target: PodTarget,
    /// Grace period in seconds before the pod is killed
    #[serde(default)]
    pub grace_period: Option<i64>,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodFailure {
    pub target: PodTarget,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerKill {
    pub target: PodTarget,
    pub container_names: Vec<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

// ---- NetworkChaos ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDelay {
    pub target: PodTarget,
    /// Latency to add (e.g. "100ms")
    pub latency: String,
    #[serde(default)]
    pub jitter: Option<String>,
    #[serde(default)]
    pub correlation: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkLoss {
    pub target: PodTarget,
    /// Loss percentage (e.g. "25")
    pub loss: String,
    #[serde(default)]
    pub correlation: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub duration: Option<String>,
}

/// Cuts traffic between two independent groups of pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPartition {
    pub from: PodTarget,
    pub to: PodTarget,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkCorruption {
    pub target: PodTarget,
    /// Corruption percentage
    pub corrupt: String,
    #[serde(default)]
    pub correlation: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDuplication {
    pub target: PodTarget,
    /// Duplication percentage
    pub duplicate: String,
    #[serde(default)]
    pub correlation: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkBandwidthLimit {
    pub target: PodTarget,
    /// Rate limit (e.g. "1mbps")
    pub rate: String,
    #[serde(default = "default_bandwidth_bytes")]
    pub limit: u32,
    #[serde(default = "default_bandwidth_bytes")]
    pub buffer: u32,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub duration: Option<String>,
}

fn default_bandwidth_bytes() -> u32 {
    10000
}

// ---- IOChaos ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoDelay {
    pub target: PodTarget,
    /// Mount point of the volume to inject into
    pub volume_path: String,
    /// Glob of affected files; every file under the volume when unset
    #[serde(default)]
    pub path: Option<String>,
    pub delay: String,
    #[serde(default = "default_io_percent")]
    pub percent: u32,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoFault {
    pub target: PodTarget,
    pub volume_path: String,
    #[serde(default)]
    pub path: Option<String>,
    /// errno returned by the faulted syscalls (5 = EIO)
    #[serde(default = "default_errno")]
    pub errno: u32,
    #[serde(default = "default_io_percent")]
    pub percent: u32,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

fn default_io_percent() -> u32 {
    100
}

fn default_errno() -> u32 {
    5
}

// ---- DNSChaos ----

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DnsAction {
    #[default]
    Error,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsChaos {
    pub target: PodTarget,
    #[serde(default)]
    pub action: DnsAction,
    /// Domain patterns to fault (e.g. "google.com", "chaos-mesh.*")
    pub patterns: Vec<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

// ---- StressChaos ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStressor {
    pub workers: u32,
    /// Load per worker, 0-100
    pub load: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStressor {
    pub workers: u32,
    /// Memory to occupy per worker (e.g. "256MB")
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stress {
    pub target: PodTarget,
    #[serde(default)]
    pub cpu: Option<CpuStressor>,
    #[serde(default)]
    pub memory: Option<MemoryStressor>,
    #[serde(default)]
    pub duration: Option<String>,
}

// ---- TimeChaos ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeShift {
    pub target: PodTarget,
    /// Clock offset, may be negative (e.g. "-10m")
    pub time_offset: String,
    #[serde(default)]
    pub clock_ids: Vec<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

// ---- HTTPChaos ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpAbort {
    pub target: PodTarget,
    /// Port the target serves HTTP on
    pub port: u16,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

/// A fault-injection experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Experiment {
    PodKill(PodKill),
    PodFailure(PodFailure),
    ContainerKill(ContainerKill),
    NetworkDelay(NetworkDelay),
    NetworkLoss(NetworkLoss),
    NetworkPartition(NetworkPartition),
    NetworkCorruption(NetworkCorruption),
    NetworkDuplication(NetworkDuplication),
    NetworkBandwidthLimit(NetworkBandwidthLimit),
    IoDelay(IoDelay),
    IoFault(IoFault),
    DnsChaos(DnsChaos),
    Stress(Stress),
    TimeShift(TimeShift),
    HttpAbort(HttpAbort),
}

macro_rules! impl_from_variant {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Experiment {
                fn from(v: $variant) -> Self {
                    Experiment::$variant(v)
                }
            }
        )*
    };
}

impl_from_variant!(
    PodKill,
    PodFailure,
    ContainerKill,
    NetworkDelay,
    NetworkLoss,
    NetworkPartition,
    NetworkCorruption,
    NetworkDuplication,
    NetworkBandwidthLimit,
    IoDelay,
    IoFault,
    DnsChaos,
    Stress,
    TimeShift,
    HttpAbort,
);

impl Experiment {
    /// Custom resource kind this experiment creates
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Experiment::PodKill(_) | Experiment::PodFailure(_) | Experiment::ContainerKill(_) => {
                ResourceKind::PodChaos
            }
            Experiment::NetworkDelay(_)
            | Experiment::NetworkLoss(_)
            | Experiment::NetworkPartition(_)
            | Experiment::NetworkCorruption(_)
            | Experiment::NetworkDuplication(_)
            | Experiment::NetworkBandwidthLimit(_) => ResourceKind::NetworkChaos,
            Experiment::IoDelay(_) | Experiment::IoFault(_) => ResourceKind::IOChaos,
            Experiment::DnsChaos(_) => ResourceKind::DNSChaos,
            Experiment::Stress(_) => ResourceKind::StressChaos,
            Experiment::TimeShift(_) => ResourceKind::TimeChaos,
            Experiment::HttpAbort(_) => ResourceKind::HTTPChaos,
        }
    }

    /// Name of the manifest template that renders this experiment
    pub fn template_id(&self) -> &'static str {
        match self {
            Experiment::PodKill(_) => "pod-kill",
            Experiment::PodFailure(_) => "pod-failure",
            Experiment::ContainerKill(_) => "container-kill",
            Experiment::NetworkDelay(_) => "network-delay",
            Experiment::NetworkLoss(_) => "network-loss",
            Experiment::NetworkPartition(_) => "network-partition",
            Experiment::NetworkCorruption(_) => "network-corruption",
            Experiment::NetworkDuplication(_) => "network-duplication",
            Experiment::NetworkBandwidthLimit(_) => "network-bandwidth-limit",
            Experiment::IoDelay(_) => "io-delay",
            Experiment::IoFault(_) => "io-fault",
            Experiment::DnsChaos(_) => "dns-chaos",
            Experiment::Stress(_) => "stress",
            Experiment::TimeShift(_) => "time-shift",
            Experiment::HttpAbort(_) => "http-abort",
        }
    }

    /// Pod groups selected by this experiment, source side first
    pub fn targets(&self) -> Vec<&PodTarget> {
        match self {
            Experiment::PodKill(e) => vec![&e.target],
            Experiment::PodFailure(e) => vec![&e.target],
            Experiment::ContainerKill(e) => vec![&e.target],
            Experiment::NetworkDelay(e) => vec![&e.target],
            Experiment::NetworkLoss(e) => vec![&e.target],
            Experiment::NetworkPartition(e) => vec![&e.from, &e.to],
            Experiment::NetworkCorruption(e) => vec![&e.target],
            Experiment::NetworkDuplication(e) => vec![&e.target],
            Experiment::NetworkBandwidthLimit(e) => vec![&e.target],
            Experiment::IoDelay(e) => vec![&e.target],
            Experiment::IoFault(e) => vec![&e.target],
            Experiment::DnsChaos(e) => vec![&e.target],
            Experiment::Stress(e) => vec![&e.target],
            Experiment::TimeShift(e) => vec![&e.target],
            Experiment::HttpAbort(e) => vec![&e.target],
        }
    }

    pub fn duration_str(&self) -> Option<&str> {
        let duration = match self {
            Experiment::PodKill(e) => &e.duration,
            Experiment::PodFailure(e) => &e.duration,
            Experiment::ContainerKill(e) => &e.duration,
            Experiment::NetworkDelay(e) => &e.duration,
            Experiment::NetworkLoss(e) => &e.duration,
            Experiment::NetworkPartition(e) => &e.duration,
            Experiment::NetworkCorruption(e) => &e.duration,
            Experiment::NetworkDuplication(e) => &e.duration,
            Experiment::NetworkBandwidthLimit(e) => &e.duration,
            Experiment::IoDelay(e) => &e.duration,
            Experiment::IoFault(e) => &e.duration,
            Experiment::DnsChaos(e) => &e.duration,
            Experiment::Stress(e) => &e.duration,
            Experiment::TimeShift(e) => &e.duration,
            Experiment::HttpAbort(e) => &e.duration,
        };
        duration.as_deref()
    }

    /// Parsed injection duration; `None` runs until the experiment is stopped
    pub fn duration(&self) -> ChaosResult<Option<Duration>> {
        self.duration_str().map(parse_duration).transpose()
    }

    /// Fault parameters as the template context sees them
    pub fn params(&self) -> ChaosResult<serde_json::Value> {
        let value = match self {
            Experiment::PodKill(e) => serde_json::to_value(e),
            Experiment::PodFailure(e) => serde_json::to_value(e),
            Experiment::ContainerKill(e) => serde_json::to_value(e),
            Experiment::NetworkDelay(e) => serde_json::to_value(e),
            Experiment::NetworkLoss(e) => serde_json::to_value(e),
            Experiment::NetworkPartition(e) => serde_json::to_value(e),
            Experiment::NetworkCorruption(e) => serde_json::to_value(e),
            Experiment::NetworkDuplication(e) => serde_json::to_value(e),
            Experiment::NetworkBandwidthLimit(e) => serde_json::to_value(e),
            Experiment::IoDelay(e) => serde_json::to_value(e),
            Experiment::IoFault(e) => serde_json::to_value(e),
            Experiment::DnsChaos(e) => serde_json::to_value(e),
            Experiment::Stress(e) => serde_json::to_value(e),
            Experiment::TimeShift(e) => serde_json::to_value(e),
            Experiment::HttpAbort(e) => serde_json::to_value(e),
        }?;
        Ok(value)
    }

    /// Reject definitions Chaos Mesh would refuse or silently ignore
    pub fn validate(&self) -> ChaosResult<()> {
        for target in self.targets() {
            target.validate()?;
        }
        self.duration()?;

        match self {
            Experiment::ContainerKill(e) if e.container_names.is_empty() => Err(
                ChaosError::invalid_experiment("container-kill needs at least one container name"),
            ),
            Experiment::NetworkDelay(e) => {
                parse_duration(&e.latency)?;
                if let Some(jitter) = &e.jitter {
                    parse_duration(jitter)?;
                }
                check_optional_percentage("correlation", e.correlation.as_deref())
            }
            Experiment::NetworkLoss(e) => {
                check_percentage("loss", &e.loss)?;
                check_optional_percentage("correlation", e.correlation.as_deref())
            }
            Experiment::NetworkCorruption(e) => {
                check_percentage("corrupt", &e.corrupt)?;
                check_optional_percentage("correlation", e.correlation.as_deref())
            }
            Experiment::NetworkDuplication(e) => {
                check_percentage("duplicate", &e.duplicate)?;
                check_optional_percentage("correlation", e.correlation.as_deref())
            }
            Experiment::NetworkBandwidthLimit(e) if e.rate.trim().is_empty() => {
                Err(ChaosError::invalid_experiment("bandwidth rate is empty"))
            }
            Experiment::IoDelay(e) => {
                parse_duration(&e.delay)?;
                check_io(&e.volume_path, e.percent)
            }
            Experiment::IoFault(e) => check_io(&e.volume_path, e.percent),
            Experiment::DnsChaos(e) if e.patterns.is_empty() => Err(
                ChaosError::invalid_experiment("dns-chaos needs at least one domain pattern"),
            ),
            Experiment::Stress(e) => {
                if e.cpu.is_none() && e.memory.is_none() {
                    return Err(ChaosError::invalid_experiment(
                        "stress needs a cpu or memory stressor",
                    ));
                }
                match &e.cpu {
                    Some(cpu) if cpu.load > 100 => Err(ChaosError::InvalidExperiment(format!(
                        "cpu load {} is above 100",
                        cpu.load
                    ))),
                    _ => Ok(()),
                }
            }
            Experiment::TimeShift(e) => {
                parse_duration(e.time_offset.trim_start_matches('-'))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn check_percentage(field: &str, value: &str) -> ChaosResult<()> {
    let parsed: f64 = value.trim().parse().map_err(|_| {
        ChaosError::InvalidExperiment(format!("{} '{}' is not a number", field, value))
    })?;
    if !(0.0..=100.0).contains(&parsed) {
        return Err(ChaosError::InvalidExperiment(format!(
            "{} {} must be between 0 and 100",
            field, value
        )));
    }
    Ok(())
}

fn check_optional_percentage(field: &str, value: Option<&str>) -> ChaosResult<()> {
    value.map_or(Ok(()), |v| check_percentage(field, v))
}

fn check_io(volume_path: &str, percent: u32) -> ChaosResult<()> {
    if volume_path.trim().is_empty() {
        return Err(ChaosError::invalid_experiment("io fault needs a volume path"));
    }
    if percent > 100 {
        return Err(ChaosError::InvalidExperiment(format!(
            "io percent {} is above 100",
            percent
        )));
    }
    Ok(())
}

/// Parse a Chaos Mesh duration such as `"30s"`, `"250ms"` or `"1h30m"`
pub fn parse_duration(input: &str) -> ChaosResult<Duration> {
    let invalid = || ChaosError::InvalidExperiment(format!("invalid duration '{}'", input));

    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        let part = Duration::try_from_secs_f64(value * seconds_per_unit).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
    }

    Ok(total)
}

/// Lifecycle state of a registered experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    /// Resource created, injection not yet confirmed
    Pending,
    /// `AllInjected` observed
    Active,
    /// A stop attempt failed; the resource may still exist
    DeleteFailed,
}

impl std::fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExperimentState::Pending => write!(f, "pending"),
            ExperimentState::Active => write!(f, "active"),
            ExperimentState::DeleteFailed => write!(f, "delete_failed"),
        }
    }
}

/// A submitted experiment tracked by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentHandle {
    pub id: String,
    pub resource_kind: ResourceKind,
    pub namespace: String,
    pub state: ExperimentState,
    pub created_at: DateTime<Utc>,
    /// Injection duration requested by the experiment
    #[serde(default)]
    pub duration: Option<Duration>,
}

impl ExperimentHandle {
    pub fn new(
        id: &str,
        resource_kind: ResourceKind,
        namespace: &str,
        duration: Option<Duration>,
    ) -> Self {
        Self {
            id: id.to_string(),
            resource_kind,
            namespace: namespace.to_string(),
            state: ExperimentState::Pending,
            created_at: Utc::now(),
            duration,
        }
    }

    /// When Chaos Mesh is expected to recover the fault on its own. `None` for
    /// open-ended experiments and for ends past the calendar range.
    pub fn expected_end(&self) -> Option<DateTime<Utc>> {
        let duration = chrono::Duration::from_std(self.duration?).ok()?;
        self.created_at.checked_add_signed(duration)
    }
}
