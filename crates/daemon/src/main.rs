#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Process bootstrap: logging setup, configuration,
//! cluster credential loading, repository clone, and the Manager's
//! discovery loop. Any unhandled error here terminates the process with a
//! nonzero status, fail-fast on startup.

mod config;
mod error;
mod manager;
mod watcher;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use dump_adapters::{GitRepository, KubeClusterClient, Policy, SopsLikeCypher};
use dump_core::traits::Cypher;
use dump_core::FieldPathSet;

use config::Config;
use error::DaemonError;
use manager::Manager;

const POLICY_FILE_NAME: &str = ".sops.yaml";

#[derive(Parser)]
#[command(name = "dumpd")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Decrypt a single committed file against `.sops.yaml` and print its
    /// plaintext to stdout. A tooling boundary, not part of the watch loop.
    Decrypt {
        /// Path to the encrypted file, relative to the worktree root.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Command::Decrypt { path }) => decrypt(&path).await,
        None => run().await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "fatal error during startup or control loop");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), DaemonError> {
    let config = Config::load()?;
    let root = std::env::current_dir()?;

    tracing::info!(url = %config.repository_url, "resetting worktree and cloning repository");
    dump_core::file_manager::reset_current_directory(&root)?;
    GitRepository::bootstrap(&root, &config.repository_url).await?;
    let repository: Arc<dyn dump_core::traits::Repository> = Arc::new(GitRepository::new(root.clone()));

    tracing::info!("connecting to cluster");
    let cluster: Arc<dyn dump_core::traits::ClusterClient> = Arc::new(KubeClusterClient::new().await?);

    let policy = Policy::load(&root.join(POLICY_FILE_NAME))?;
    let cypher: Arc<dyn dump_core::traits::Cypher> = Arc::new(SopsLikeCypher::new(policy));

    let field_filters = Arc::new(load_field_filters(&config.field_filters_path)?);

    let manager = Arc::new(Manager::new(cluster, repository, cypher, field_filters, root, config.refresh_interval));

    if let Err(e) = manager.manage().await {
        tracing::error!(error = %e, "manager control loop failed fatally");
        std::process::exit(1);
    }
    Ok(())
}

/// `dumpd decrypt <path>`: reads the encrypted file from disk and writes
/// its plaintext to stdout. Resolves `.sops.yaml` from the current
/// directory exactly as the watch loop does.
async fn decrypt(path: &Path) -> Result<(), DaemonError> {
    let root = std::env::current_dir()?;
    let policy = Policy::load(&root.join(POLICY_FILE_NAME))?;
    let cypher = SopsLikeCypher::new(policy);

    let plaintext = cypher.decrypt(path)?;
    std::io::stdout().write_all(&plaintext)?;
    Ok(())
}

fn load_field_filters(path: &PathBuf) -> Result<FieldPathSet, DaemonError> {
    let bytes = std::fs::read(path)?;
    let raw: serde_yaml::Value = serde_yaml::from_slice(&bytes)?;
    let json = serde_json::to_value(&raw).map_err(|e| DaemonError::Config(format!("invalid field filter policy: {e}")))?;
    Ok(FieldPathSet::from_json(&json))
}
