mod commands;
mod config;
mod mapping_file;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tree_sync::{Credentials, Instance, Mapping, Role, SyncOptions};
use tree_sync_git::Git2Transport;
use tree_sync_gitlab::{GitLabClient, GitLabConfig};

use crate::config::{AppConfig, InstanceConfig, Overrides, PullMirror};

#[derive(Parser)]
#[command(name = "tree-sync")]
#[command(about = "Replicate groups and projects between GitLab instances")]
struct Cli {
    /// Instance configuration file (defaults to ~/.config/tree-sync/instances.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log every remote call
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy every mapped group and project to the destination
    Sync {
        /// JSON mapping of source paths to destination paths
        #[arg(long)]
        mapping: PathBuf,
        #[command(flatten)]
        flags: RunFlags,
    },
    /// Report whether the destination can pull-mirror natively
    Probe {
        #[command(flatten)]
        flags: RunFlags,
    },
    /// Validate a mapping file and print its compiled path filters
    Check {
        #[arg(long)]
        mapping: PathBuf,
    },
}

#[derive(Args)]
struct RunFlags {
    /// Walk the source per mapped path instead of listing it
    #[arg(long)]
    big_source: bool,
    /// Walk the destination per mapped path instead of listing it
    #[arg(long)]
    big_destination: bool,
    /// Assume the destination license covers pull mirroring
    #[arg(long, conflicts_with = "no_pull_mirror")]
    force_pull_mirror: bool,
    /// Always copy repositories with git
    #[arg(long)]
    no_pull_mirror: bool,
    /// Maximum concurrent remote calls
    #[arg(long)]
    concurrency: Option<usize>,
}

impl RunFlags {
    fn overrides(&self) -> Overrides {
        let pull_mirror = if self.force_pull_mirror {
            Some(PullMirror::ForceAvailable)
        } else if self.no_pull_mirror {
            Some(PullMirror::ForceUnavailable)
        } else {
            None
        };
        Overrides {
            big_source: self.big_source,
            big_destination: self.big_destination,
            pull_mirror,
            concurrency: self.concurrency,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli_path: Option<&PathBuf>, flags: &RunFlags) -> Result<AppConfig> {
    let mut config = config::load_config(cli_path.map(PathBuf::as_path))?;
    config.apply(&flags.overrides());
    Ok(config)
}

/// Authenticate against one configured instance.
async fn connect(role: Role, entry: &InstanceConfig) -> Result<(Arc<Instance>, Credentials)> {
    let token = entry.token()?;
    let client = GitLabClient::new(GitLabConfig {
        url: entry.url.clone(),
        token: token.clone(),
    });
    let instance = Instance::connect(role, entry.scale(), Arc::new(client))
        .await
        .with_context(|| format!("failed to connect to {role} {}", entry.url))?;
    Ok((Arc::new(instance), Credentials::token(token)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Sync { mapping, flags } => {
            let file = mapping_file::load(&mapping)?;
            let config = load_config(cli.config.as_ref(), &flags)?;

            let (source, destination) = tokio::try_join!(
                connect(Role::Source, &config.source),
                connect(Role::Destination, &config.destination),
            )?;
            let (source, source_credentials) = source;
            let (destination, destination_credentials) = destination;

            let mut options = SyncOptions::new(source_credentials, destination_credentials);
            options.concurrency = config.run.concurrency;
            options.mirror_override = config.run.pull_mirror.into();
            options.scratch_dir = config.run.scratch_dir.clone();

            commands::sync::run(
                source,
                destination,
                Arc::new(Mapping::from_file(file)),
                Arc::new(Git2Transport::new()),
                &options,
            )
            .await
        }
        Command::Probe { flags } => {
            let config = load_config(cli.config.as_ref(), &flags)?;
            let (destination, _) = connect(Role::Destination, &config.destination).await?;
            commands::probe::run(&destination, config.run.pull_mirror.into()).await
        }
        Command::Check { mapping } => {
            let file = mapping_file::load(&mapping)?;
            commands::check::run(file)
        }
    }
}
