// ABOUTME: Pipeline stage configuration and per-kind stage options.
// ABOUTME: Options under `with:` are parsed eagerly so malformed stages fail at load.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::model::{ApplicationKind, StageKind};

/// One configured pipeline stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawStageConfig")]
pub struct StageConfig {
    pub name: StageKind,
    pub id: Option<String>,
    pub desc: Option<String>,
    /// Explicit prerequisites. Empty means the previous stage in the list.
    pub requires: Vec<String>,
    /// How many times a failed execution is retried before giving up.
    pub retries: u32,
    pub options: StageOptions,
}

#[derive(Debug, Deserialize)]
struct RawStageConfig {
    name: StageKind,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    retries: u32,
    #[serde(default)]
    with: Option<serde_yaml::Value>,
}

/// Typed options for the stage kinds that take any.
#[derive(Debug, Clone)]
pub enum StageOptions {
    None,
    Wait(WaitStageOptions),
    WaitApproval(WaitApprovalStageOptions),
    PrimaryRollout(PrimaryRolloutStageOptions),
    CanaryRollout(CanaryRolloutStageOptions),
    BaselineRollout(BaselineRolloutStageOptions),
    TrafficRouting(TrafficRoutingStageOptions),
    Promote(PromoteStageOptions),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitStageOptions {
    #[serde(default = "default_wait_duration", with = "humantime_serde")]
    pub duration: Duration,
}

impl Default for WaitStageOptions {
    fn default() -> Self {
        WaitStageOptions {
            duration: default_wait_duration(),
        }
    }
}

fn default_wait_duration() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitApprovalStageOptions {
    /// Users allowed to approve. Empty means anyone.
    #[serde(default)]
    pub approvers: Vec<String>,
    /// How often queued approvals are checked. Never below
    /// `MIN_APPROVAL_POLL_INTERVAL`.
    #[serde(
        default = "default_approval_poll_interval",
        deserialize_with = "deserialize_poll_interval"
    )]
    pub poll_interval: Duration,
}

/// Lowest accepted `poll_interval`.
pub const MIN_APPROVAL_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl WaitApprovalStageOptions {
    /// `poll_interval` raised to `MIN_APPROVAL_POLL_INTERVAL`.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_APPROVAL_POLL_INTERVAL)
    }
}

fn deserialize_poll_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let interval: Duration = humantime_serde::deserialize(deserializer)?;
    Ok(interval.max(MIN_APPROVAL_POLL_INTERVAL))
}

impl Default for WaitApprovalStageOptions {
    fn default() -> Self {
        WaitApprovalStageOptions {
            approvers: Vec::new(),
            poll_interval: default_approval_poll_interval(),
        }
    }
}

fn default_approval_poll_interval() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrimaryRolloutStageOptions {
    #[serde(default)]
    pub add_variant_label_to_selector: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanaryRolloutStageOptions {
    pub replicas: Replicas,
    #[serde(default = "default_canary_suffix")]
    pub suffix: String,
    #[serde(default)]
    pub create_service: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaselineRolloutStageOptions {
    pub replicas: Replicas,
    #[serde(default = "default_baseline_suffix")]
    pub suffix: String,
    #[serde(default)]
    pub create_service: bool,
}

fn default_canary_suffix() -> String {
    "canary".to_string()
}

fn default_baseline_suffix() -> String {
    "baseline".to_string()
}

/// Percentages of traffic routed to each variant. Must sum to 100.
#[derive(Debug, Clone, Deserialize)]
pub struct TrafficRoutingStageOptions {
    #[serde(default)]
    pub primary: u32,
    #[serde(default)]
    pub canary: u32,
    #[serde(default)]
    pub baseline: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromoteStageOptions {
    pub percent: u32,
}

/// A replica count, either absolute ("3") or relative to the primary ("20%").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replicas {
    pub value: u32,
    pub is_percentage: bool,
}

impl Replicas {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let (digits, is_percentage) = match s.strip_suffix('%') {
            Some(d) => (d, true),
            None => (s, false),
        };
        let value: u32 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid replicas value: {s:?}"))?;
        if is_percentage && value > 100 {
            return Err(format!("replicas percentage must be at most 100%, got {value}%"));
        }
        Ok(Replicas {
            value,
            is_percentage,
        })
    }

    /// Resolve against the primary's replica count (`None` means unset, i.e. 1).
    /// Percentages round up so a non-zero share never yields zero pods.
    pub fn calculate(&self, total: Option<u32>) -> u32 {
        if !self.is_percentage {
            return self.value;
        }
        let total = total.unwrap_or(1) as u64;
        (total * self.value as u64).div_ceil(100) as u32
    }
}

impl fmt::Display for Replicas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_percentage {
            write!(f, "{}%", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

impl<'de> Deserialize<'de> for Replicas {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Entry {
            Number(u32),
            Text(String),
        }
        match Entry::deserialize(deserializer)? {
            Entry::Number(value) => Ok(Replicas {
                value,
                is_percentage: false,
            }),
            Entry::Text(s) => Replicas::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

impl TryFrom<RawStageConfig> for StageConfig {
    type Error = String;

    fn try_from(raw: RawStageConfig) -> Result<Self, Self::Error> {
        let options = parse_options(raw.name, raw.with)?;
        Ok(StageConfig {
            name: raw.name,
            id: raw.id,
            desc: raw.desc,
            requires: raw.requires,
            retries: raw.retries,
            options,
        })
    }
}

fn parse_options(kind: StageKind, with: Option<serde_yaml::Value>) -> Result<StageOptions, String> {
    fn typed<T: serde::de::DeserializeOwned + Default>(
        kind: StageKind,
        with: Option<serde_yaml::Value>,
    ) -> Result<T, String> {
        match with {
            None => Ok(T::default()),
            Some(v) => serde_yaml::from_value(v).map_err(|e| format!("stage {kind}: {e}")),
        }
    }
    fn required<T: serde::de::DeserializeOwned>(
        kind: StageKind,
        with: Option<serde_yaml::Value>,
    ) -> Result<T, String> {
        let v = with.ok_or_else(|| format!("stage {kind} requires options under `with`"))?;
        serde_yaml::from_value(v).map_err(|e| format!("stage {kind}: {e}"))
    }

    let options = match kind {
        StageKind::Wait => StageOptions::Wait(typed(kind, with)?),
        StageKind::WaitApproval => StageOptions::WaitApproval(typed(kind, with)?),
        StageKind::K8sPrimaryRollout => StageOptions::PrimaryRollout(typed(kind, with)?),
        StageKind::K8sCanaryRollout => StageOptions::CanaryRollout(required(kind, with)?),
        StageKind::K8sBaselineRollout => StageOptions::BaselineRollout(required(kind, with)?),
        StageKind::K8sTrafficRouting => {
            let opts: TrafficRoutingStageOptions = required(kind, with)?;
            if opts.primary + opts.canary + opts.baseline != 100 {
                return Err(format!(
                    "stage {kind}: traffic percentages must sum to 100, got {}",
                    opts.primary + opts.canary + opts.baseline
                ));
            }
            StageOptions::TrafficRouting(opts)
        }
        StageKind::LambdaPromote => {
            let opts: PromoteStageOptions = required(kind, with)?;
            if opts.percent > 100 {
                return Err(format!("stage {kind}: percent must be at most 100"));
            }
            StageOptions::Promote(opts)
        }
        _ => StageOptions::None,
    };
    Ok(options)
}

impl StageConfig {
    /// Whether this stage kind can run for the given application kind.
    pub(crate) fn name_fits(&self, kind: ApplicationKind) -> bool {
        match self.name {
            StageKind::Wait | StageKind::WaitApproval => true,
            StageKind::Rollback => false,
            StageKind::LambdaSync | StageKind::LambdaCanaryRollout | StageKind::LambdaPromote => {
                kind == ApplicationKind::Lambda
            }
            _ => kind == ApplicationKind::Kubernetes,
        }
    }

    pub fn wait_options(&self) -> Option<&WaitStageOptions> {
        match &self.options {
            StageOptions::Wait(o) => Some(o),
            _ => None,
        }
    }

    pub fn wait_approval_options(&self) -> Option<&WaitApprovalStageOptions> {
        match &self.options {
            StageOptions::WaitApproval(o) => Some(o),
            _ => None,
        }
    }

    pub fn primary_rollout_options(&self) -> Option<&PrimaryRolloutStageOptions> {
        match &self.options {
            StageOptions::PrimaryRollout(o) => Some(o),
            _ => None,
        }
    }

    pub fn canary_rollout_options(&self) -> Option<&CanaryRolloutStageOptions> {
        match &self.options {
            StageOptions::CanaryRollout(o) => Some(o),
            _ => None,
        }
    }

    pub fn baseline_rollout_options(&self) -> Option<&BaselineRolloutStageOptions> {
        match &self.options {
            StageOptions::BaselineRollout(o) => Some(o),
            _ => None,
        }
    }

    pub fn traffic_routing_options(&self) -> Option<&TrafficRoutingStageOptions> {
        match &self.options {
            StageOptions::TrafficRouting(o) => Some(o),
            _ => None,
        }
    }

    pub fn promote_options(&self) -> Option<&PromoteStageOptions> {
        match &self.options {
            StageOptions::Promote(o) => Some(o),
            _ => None,
        }
    }
}
