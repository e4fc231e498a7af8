// ABOUTME: K8S_TRAFFIC_ROUTING: point the application's service at one variant.
// ABOUTME: Routing is by pod selector, so exactly one variant takes all traffic.

use std::collections::BTreeMap;

use super::{
    BASELINE_VARIANT, CANARY_VARIANT, PRIMARY_VARIANT, StageRun, VARIANT_LABEL,
};
use super::variant::find_manifests;
use crate::config::TrafficRoutingStageOptions;
use crate::model::StageStatus;
use crate::provider::kubernetes::KIND_SERVICE;

fn selected_variant(opts: &TrafficRoutingStageOptions) -> Option<&'static str> {
    match (opts.primary, opts.canary, opts.baseline) {
        (100, _, _) => Some(PRIMARY_VARIANT),
        (_, 100, _) => Some(CANARY_VARIANT),
        (_, _, 100) => Some(BASELINE_VARIANT),
        _ => None,
    }
}

impl StageRun<'_> {
    pub(super) async fn ensure_traffic_routing(&self) -> StageStatus {
        let lp = self.lp();
        let Some(opts) = self
            .input
            .stage_config
            .as_ref()
            .and_then(|c| c.traffic_routing_options())
        else {
            lp.error(&format!("Malformed configuration for stage {}", self.stage_name()));
            return StageStatus::Failure;
        };
        let Some(variant) = selected_variant(opts) else {
            lp.error("Traffic routing by pod selector requires one variant to receive 100% of traffic");
            return StageStatus::Failure;
        };

        let manifests = match self.load_target_manifests().await {
            Ok(m) => m,
            Err(e) => {
                lp.error(&format!("Failed while loading manifests ({e})"));
                return StageStatus::Failure;
            }
        };
        let service_name = self.source.config.input.service.as_deref();
        let Some(mut service) = find_manifests(KIND_SERVICE, service_name, &manifests)
            .into_iter()
            .next()
        else {
            lp.error("Unable to find any service manifest for traffic routing");
            return StageStatus::Failure;
        };

        let selector = BTreeMap::from([(VARIANT_LABEL.to_string(), variant.to_string())]);
        if let Err(e) = service.add_string_map_values(&selector, &["spec", "selector"]) {
            lp.error(&format!("Unable to update the service selector ({e})"));
            return StageStatus::Failure;
        }
        self.annotate(
            std::slice::from_mut(&mut service),
            PRIMARY_VARIANT,
            self.input.target_dsp.revision(),
        );

        lp.info(&format!(
            "Routing all traffic of service {} to the {variant} variant",
            service.key.name
        ));
        match self.apply_manifests(std::slice::from_ref(&service)).await {
            Ok(()) => StageStatus::Success,
            Err(_) => StageStatus::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_variant_must_take_all_traffic() {
        let opts = |primary, canary, baseline| TrafficRoutingStageOptions {
            primary,
            canary,
            baseline,
        };
        assert_eq!(selected_variant(&opts(100, 0, 0)), Some(PRIMARY_VARIANT));
        assert_eq!(selected_variant(&opts(0, 100, 0)), Some(CANARY_VARIANT));
        assert_eq!(selected_variant(&opts(0, 0, 100)), Some(BASELINE_VARIANT));
        assert_eq!(selected_variant(&opts(80, 20, 0)), None);
    }
}
