// ABOUTME: Applies manifests and deletes resources with one stage log line per resource.
// ABOUTME: Deleting an already-absent resource counts as deleted.

use std::collections::BTreeMap;

use super::{
    ANNOTATION_APPLICATION, ANNOTATION_COMMIT_HASH, ANNOTATION_MANAGED_BY,
    ANNOTATION_ORIGINAL_API_VERSION, ANNOTATION_RESOURCE_KEY, MANAGED_BY_CONVEYOR, StageError,
    StageRun, VARIANT_LABEL,
};
use crate::backoff::{Backoff, Retry};
use crate::provider::kubernetes::{ApplyError, Manifest, ResourceKey};
use crate::types::CommitHash;

impl StageRun<'_> {
    /// Stamp every manifest with ownership, variant, and source commit.
    pub(super) fn annotate(&self, manifests: &mut [Manifest], variant: &str, commit: &CommitHash) {
        for m in manifests {
            let annotations = BTreeMap::from([
                (ANNOTATION_MANAGED_BY.to_string(), MANAGED_BY_CONVEYOR.to_string()),
                (
                    ANNOTATION_APPLICATION.to_string(),
                    self.input.deployment.application_id.to_string(),
                ),
                (VARIANT_LABEL.to_string(), variant.to_string()),
                (
                    ANNOTATION_ORIGINAL_API_VERSION.to_string(),
                    m.key.api_version.clone(),
                ),
                (ANNOTATION_RESOURCE_KEY.to_string(), m.key.to_string()),
                (ANNOTATION_COMMIT_HASH.to_string(), commit.to_string()),
            ]);
            m.add_annotations(&annotations);
        }
    }

    pub(super) async fn apply_manifests(&self, manifests: &[Manifest]) -> Result<(), StageError> {
        let lp = self.lp();
        match self.namespace() {
            Some(ns) => lp.info(&format!(
                "Start applying {} manifests to \"{ns}\" namespace",
                manifests.len()
            )),
            None => lp.info(&format!("Start applying {} manifests", manifests.len())),
        }
        for m in manifests {
            self.checkpoint()?;
            if let Err(e) = self.apply_with_retry(m).await {
                lp.error(&format!(
                    "Failed to apply manifest: {} ({e})",
                    m.key.readable()
                ));
                return Err(e);
            }
            lp.success(&format!("- applied manifest: {}", m.key.readable()));
        }
        lp.success(&format!(
            "Successfully applied {} manifests",
            manifests.len()
        ));
        Ok(())
    }

    /// Apply one manifest, retrying transient failures with exponential
    /// backoff. A stop signal ends the waits.
    async fn apply_with_retry(&self, m: &Manifest) -> Result<(), StageError> {
        let (attempts, base) = self.input.clients.apply_retry();
        let mut retry = Retry::new(
            attempts,
            Backoff::Exponential {
                base,
                max: base.saturating_mul(8),
            },
        );
        let mut last = None;
        while retry
            .wait_next(async {
                self.sig.stopped().await;
            })
            .await
        {
            match self.applier.apply(m).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && retry.calls() < attempts => {
                    self.lp().info(&format!(
                        "Retrying to apply manifest: {} ({e})",
                        m.key.readable()
                    ));
                    tracing::warn!(resource = %m.key, attempt = retry.calls(), error = %e, "failed to apply manifest, retrying");
                    last = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        match last {
            Some(e) if !self.sig.is_stopped() => Err(e.into()),
            _ => Err(StageError::Stopped(self.sig.signal())),
        }
    }

    pub(super) async fn delete_resources(&self, keys: &[ResourceKey]) -> Result<(), StageError> {
        let lp = self.lp();
        if keys.is_empty() {
            lp.info("No resources to delete");
            return Ok(());
        }

        lp.info(&format!("Start deleting {} resources", keys.len()));
        let mut deleted = 0;
        for key in keys {
            self.checkpoint()?;
            match self.applier.delete(key).await {
                Ok(()) => {
                    lp.success(&format!("- deleted resource: {}", key.readable()));
                    deleted += 1;
                }
                Err(ApplyError::NotFound) => {
                    lp.info(&format!("- no resource {} to delete", key.readable()));
                    deleted += 1;
                }
                Err(e) => {
                    lp.error(&format!(
                        "- unable to delete resource: {} ({e})",
                        key.readable()
                    ));
                }
            }
        }

        if deleted < keys.len() {
            lp.info(&format!("Deleted {deleted}/{} resources", keys.len()));
            return Err(StageError::Incomplete(keys.len() - deleted));
        }
        lp.success(&format!("Successfully deleted {} resources", keys.len()));
        Ok(())
    }
}
