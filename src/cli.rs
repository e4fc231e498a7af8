// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Progressive delivery of Kubernetes and serverless applications")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final result
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a template .conveyor.yaml into the application directory
    Init {
        #[arg(long, value_enum, default_value_t = AppKind::Kubernetes)]
        kind: AppKind,

        /// Directory to write into
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the stages a deployment would run, without running them
    Plan(DeployArgs),

    /// Plan and run a deployment to completion
    Deploy(DeployArgs),
}

#[derive(Args, Clone)]
pub struct DeployArgs {
    /// Repository holding the application
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Application directory, relative to the repository root
    #[arg(long, default_value = ".")]
    pub app_path: String,

    /// Application id; defaults to the application directory name
    #[arg(long)]
    pub app_id: Option<String>,

    /// Revision to deploy
    #[arg(long, default_value = "HEAD")]
    pub commit: String,

    /// Revision currently running, used for diffing and rollback
    #[arg(long)]
    pub running_commit: Option<String>,

    /// Treat the repository as a plain directory instead of a git checkout
    #[arg(long)]
    pub no_git: bool,

    #[arg(long, value_enum, default_value_t = Strategy::Auto)]
    pub strategy: Strategy,

    /// Agent configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AppKind {
    Kubernetes,
    Lambda,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    Auto,
    QuickSync,
    Pipeline,
}
