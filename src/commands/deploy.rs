// ABOUTME: Deploy command implementation.
// ABOUTME: Plans and runs one deployment with an in-process store, cancelling on Ctrl-C.

use conveyor::cache::MemoryCache;
use conveyor::controller::{CommandQueue, Controller, ControllerContext};
use conveyor::error::{Error, Result};
use conveyor::executor::{ProviderClients, default_registry};
use conveyor::filestore::{FileLogStore, LocalFileStore};
use conveyor::model::DeploymentStatus;
use conveyor::output::Output;
use conveyor::planner::default_planners;
use conveyor::provider::kubernetes::{Kubectl, Manifest};
use conveyor::store::{DeploymentStore, InMemoryDeploymentStore};
use std::sync::Arc;

use super::Workspace;
use crate::cli::DeployArgs;

pub async fn deploy(args: DeployArgs, mut output: Output) -> Result<()> {
    output.start_timer();
    let ws = Workspace::prepare(&args).await?;
    let id = ws.deployment.id.clone();

    let store = Arc::new(InMemoryDeploymentStore::new());
    store.add_deployment(&ws.deployment).await?;
    let logs = Arc::new(FileLogStore::new(Arc::new(LocalFileStore::new(
        ws.agent.workspace_dir.join("logs"),
    ))));
    let cache: MemoryCache<Vec<Manifest>> =
        MemoryCache::bounded(ws.agent.manifest_cache_capacity, ws.agent.cache_ttl());
    let registry = default_registry().map_err(conveyor::controller::ControllerError::from)?;
    let ctx = ControllerContext {
        store: store.clone(),
        registry: Arc::new(registry),
        repo: ws.repo.clone(),
        log_store: logs.clone(),
        app_manifests_cache: Arc::new(cache),
        clients: Arc::new(
            ProviderClients::new()
                .with_applier(Arc::new(
                    Kubectl::new(&ws.agent.kubectl_path).with_timeout(ws.agent.kubectl_timeout),
                ))
                .with_apply_retry(ws.agent.apply_retries, ws.agent.apply_backoff),
        ),
        commands: Arc::new(CommandQueue::new()),
        persist_retries: ws.agent.persist_retries,
        persist_backoff: ws.agent.persist_backoff,
    };
    let controller = Controller::new(ctx, default_planners());

    output.progress(&format!(
        "Deploying {} at {}",
        ws.deployment.application_name,
        ws.deployment.short_commit_hash()
    ));

    let run = controller.run_deployment(&id);
    tokio::pin!(run);
    let report = tokio::select! {
        r = &mut run => r,
        _ = tokio::signal::ctrl_c() => {
            output.progress("Cancelling deployment...");
            controller.cancel(&id);
            run.await
        }
    }?;

    let d = &report.deployment;
    output.progress(&format!("{} (version {})", d.summary, d.version));
    for stage in &d.stages {
        output.stage(stage);
        if let Ok(blocks) = logs.stage_logs(&d.id, &stage.id, stage.retried_count).await {
            for b in blocks {
                output.stage_log(stage.id.as_str(), &b.log);
            }
        }
    }
    for w in &report.warnings {
        output.progress(&format!("Warning: {}", w.message));
    }

    if d.status != DeploymentStatus::Success {
        return Err(Error::DeploymentFailed(format!(
            "{} ({})",
            d.status, d.status_description
        )));
    }
    output.success(&format!("Deployment {} succeeded", d.id));
    Ok(())
}
