// ABOUTME: Plan command: prints the stage graph a deployment would run.
// ABOUTME: Nothing is persisted and no provider is contacted.

use conveyor::cache::MemoryCache;
use conveyor::controller::ControllerError;
use conveyor::executor::{DeploySourceProvider, MemoryLogStore, StageLogPersister};
use conveyor::planner::{PlannerInput, default_planners};
use conveyor::provider::kubernetes::Manifest;
use conveyor::error::Result;
use conveyor::output::Output;
use conveyor::types::StageId;
use std::sync::Arc;

use super::Workspace;
use crate::cli::DeployArgs;

pub async fn plan(args: DeployArgs, output: &Output) -> Result<()> {
    let ws = Workspace::prepare(&args).await?;
    let d = &ws.deployment;
    let planner = default_planners().get(d.kind)?;

    let lp = StageLogPersister::new(
        d.id.clone(),
        StageId::new("planner"),
        0,
        Arc::new(MemoryLogStore::new()),
    );
    let running_app_dir = match &d.running_commit_hash {
        Some(commit) => {
            let running = DeploySourceProvider::new(
                ws.repo.clone(),
                "running",
                commit.clone(),
                d.app_path.clone(),
            );
            let source = running.get(&lp).await.map_err(|source| {
                ControllerError::DeploySource {
                    deployment: d.id.clone(),
                    source,
                }
            })?;
            Some(source.app_dir.clone())
        }
        None => None,
    };

    let input = PlannerInput {
        deployment: Arc::new(d.clone()),
        most_recent_successful_commit: d.running_commit_hash.clone(),
        config: ws.config.clone(),
        app_dir: ws.app_dir.clone(),
        running_app_dir,
        app_manifests_cache: Arc::new(MemoryCache::<Vec<Manifest>>::new()),
    };
    let out = planner.plan(&input).await?;

    output.progress(&format!(
        "Plan for {} at {} (version {})",
        d.application_name,
        d.short_commit_hash(),
        out.version
    ));
    for stage in &out.stages {
        output.stage(stage);
    }
    output.success(&out.summary);
    Ok(())
}
