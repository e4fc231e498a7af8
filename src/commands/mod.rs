// ABOUTME: Command handlers for the conveyor CLI.
// ABOUTME: Shared helpers resolve the repository, commits, and application config.

mod deploy;
mod init;
mod plan;

pub use deploy::deploy;
pub use init::init;
pub use plan::plan;

use chrono::Utc;
use conveyor::config::{AgentConfig, DeploymentConfig};
use conveyor::error::Result;
use conveyor::model::{Commit, Deployment, SyncStrategy, Trigger};
use conveyor::repo::{GitRepo, Repo, StaticRepo};
use conveyor::types::{ApplicationId, CommitHash};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::{DeployArgs, Strategy};

/// Commit used for a repository that is not under version control.
const UNVERSIONED_COMMIT: &str = "0000000";

/// Everything resolved from the command line before planning.
pub(crate) struct Workspace {
    pub agent: AgentConfig,
    pub repo: Arc<dyn Repo>,
    pub app_dir: PathBuf,
    pub config: DeploymentConfig,
    pub deployment: Deployment,
}

impl Workspace {
    pub async fn prepare(args: &DeployArgs) -> Result<Self> {
        let agent = match &args.config {
            Some(path) => AgentConfig::load(path)?,
            None => AgentConfig::default(),
        };

        let (repo, commit, running): (Arc<dyn Repo>, CommitHash, Option<CommitHash>) =
            if args.no_git {
                let commit = if args.commit == "HEAD" {
                    CommitHash::new(UNVERSIONED_COMMIT)?
                } else {
                    CommitHash::new(&args.commit)?
                };
                let running = args
                    .running_commit
                    .as_deref()
                    .map(CommitHash::new)
                    .transpose()?;
                (Arc::new(StaticRepo::new(&args.repo)), commit, running)
            } else {
                let git = GitRepo::new(&args.repo, &agent.workspace_dir);
                let commit = CommitHash::new(&git.resolve(&args.commit).await?)?;
                let running = match &args.running_commit {
                    Some(rev) => Some(CommitHash::new(&git.resolve(rev).await?)?),
                    None => None,
                };
                (Arc::new(git), commit, running)
            };

        let app_dir = args.repo.join(&args.app_path);
        let config = DeploymentConfig::discover(&app_dir)?;
        let app_id = args
            .app_id
            .clone()
            .unwrap_or_else(|| app_name(&app_dir, &args.repo));

        let now = Utc::now();
        let trigger = Trigger {
            commit: Commit {
                hash: commit,
                message: String::new(),
                author: String::new(),
                branch: String::new(),
                created_at: now,
            },
            commander: env::var("USER").unwrap_or_default(),
            timestamp: now,
            sync_strategy: match args.strategy {
                Strategy::Auto => SyncStrategy::Auto,
                Strategy::QuickSync => SyncStrategy::QuickSync,
                Strategy::Pipeline => SyncStrategy::Pipeline,
            },
        };
        let mut deployment = Deployment::new(
            ApplicationId::new(app_id.clone()),
            app_id,
            config.kind,
            args.app_path.clone(),
            trigger,
        );
        deployment.running_commit_hash = running;
        if let Some(provider) = &config.input.cloud_provider {
            deployment.cloud_provider = provider.clone();
        }

        Ok(Self {
            agent,
            repo,
            app_dir,
            config,
            deployment,
        })
    }
}

fn app_name(app_dir: &Path, repo: &Path) -> String {
    let dir = app_dir.canonicalize().unwrap_or_else(|_| app_dir.to_path_buf());
    dir.file_name()
        .or_else(|| repo.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "app".to_string())
}
