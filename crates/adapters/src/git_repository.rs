//! `Repository` backed by the `git` binary.
//!
//! Every mutation is serialized under one mutex held for the whole
//! add→diff→commit→push sequence, so two concurrent Watchers never
//! interleave worktree state. The liveness gate (deciding whether a push
//! actually advanced the remote) is resolved by inspecting `--cached`
//! diffs per path before committing, not by trusting git's exit code
//! alone — an empty commit is a git error, not a "nothing happened".

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use dump_core::traits::{Repository, RepositoryError};

pub struct GitRepository {
    root: PathBuf,
    lock: Mutex<()>,
}

impl GitRepository {
    pub fn new(root: PathBuf) -> Self {
        Self { root, lock: Mutex::new(()) }
    }

    /// Clones `url` into `root` if it doesn't already contain a `.git`
    /// directory, then points `include.path` at the shared `.gitconfig`
    /// so commits carry a consistent author identity.
    pub async fn bootstrap(root: &Path, url: &str) -> Result<(), RepositoryError> {
        if !root.join(".git").exists() {
            run_git(root.parent().unwrap_or(root), "clone", &[url, &root.to_string_lossy()]).await?;
        }
        run_git(root, "config", &["--local", "include.path", "../.gitconfig"]).await?;
        Ok(())
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, RepositoryError> {
        run_git(&self.root, args[0], &args[1..]).await
    }
}

#[async_trait]
impl Repository for GitRepository {
    async fn add_commit_and_push(&self, message: &str, paths: &[PathBuf]) -> Result<bool, RepositoryError> {
        if paths.is_empty() {
            return Ok(false);
        }
        let _guard = self.lock.lock().await;

        let path_args: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        let path_refs: Vec<&str> = path_args.iter().map(String::as_str).collect();

        let mut add_args = vec!["add"];
        add_args.extend(path_refs.iter().copied());
        self.run(&add_args).await?;

        // `git diff --cached --quiet` exits 1 when there is a staged
        // difference, 0 when the index matches HEAD for those paths.
        let has_staged_changes = has_cached_diff(&self.root, &path_refs).await?;

        if !has_staged_changes {
            let mut checkout_args = vec!["checkout", "HEAD", "--"];
            checkout_args.extend(path_refs.iter().copied());
            self.run(&checkout_args).await?;
            return Ok(false);
        }

        self.run(&["commit", "-m", message]).await?;
        let output = self.run(&["push"]).await?;
        Ok(output.status.success())
    }
}

async fn has_cached_diff(root: &Path, paths: &[&str]) -> Result<bool, RepositoryError> {
    let mut args = vec!["diff", "--cached", "--quiet", "--"];
    args.extend(paths.iter().copied());
    let status = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(&args)
        .status()
        .await
        .map_err(RepositoryError::Io)?;
    // exit code 1 means "differences found", 0 means "no differences".
    // Any other code is a real git failure.
    match status.code() {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        _ => Err(RepositoryError::CommandFailed { command: "diff", message: format!("unexpected exit: {status}") }),
    }
}

async fn run_git(root: &Path, subcommand: &str, args: &[&str]) -> Result<std::process::Output, RepositoryError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .arg(subcommand)
        .args(args)
        .output()
        .await
        .map_err(RepositoryError::Io)?;

    if !output.status.success() {
        return Err(RepositoryError::CommandFailed {
            command: subcommand_name(subcommand),
            message: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}

fn subcommand_name(subcommand: &str) -> &'static str {
    match subcommand {
        "add" => "add",
        "commit" => "commit",
        "push" => "push",
        "checkout" => "checkout",
        "clone" => "clone",
        "config" => "config",
        "diff" => "diff",
        _ => "git",
    }
}
