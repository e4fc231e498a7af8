// ABOUTME: Traffic split between the primary and secondary versions of a function.
// ABOUTME: Stored encoded in deployment metadata so rollback can restore it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionTraffic {
    pub version: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingTrafficConfig {
    pub primary: VersionTraffic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<VersionTraffic>,
}

impl RoutingTrafficConfig {
    /// All traffic on `version`.
    pub fn single(version: &str) -> Self {
        Self {
            primary: VersionTraffic {
                version: version.to_string(),
                percent: 100.0,
            },
            secondary: None,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Route `percent` of traffic to `version`, leaving the rest on the version
/// that served before it.
pub fn configure_traffic_routing(cfg: &mut RoutingTrafficConfig, version: &str, percent: u32) {
    let previous = std::mem::replace(
        &mut cfg.primary,
        VersionTraffic {
            version: version.to_string(),
            percent: f64::from(percent),
        },
    );
    let rest = f64::from(100 - percent.min(100));
    if previous.version != version {
        cfg.secondary = Some(VersionTraffic {
            version: previous.version,
            percent: rest,
        });
    } else if let Some(secondary) = cfg.secondary.as_mut() {
        secondary.percent = rest;
    }
}
