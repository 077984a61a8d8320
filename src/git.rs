//! Git plumbing through the `git` CLI.
//!
//! - [`is_accessible`]: `git ls-remote --heads` probe, never an error.
//! - [`clone_full`]: full clone of the default (or requested) branch.
//! - [`clone_shallow`]: depth-1 single-branch clone of one ref.
//! - [`WorkingCopy`]: job-scoped directory removed on drop, whatever the
//!   outcome of the job.
//!
//! Credentials are injected into HTTP(S) URLs as `user:token@host` and
//! scrubbed from any error text. `GIT_TERMINAL_PROMPT=0` keeps git from
//! blocking on a password prompt.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;

use repolens_core::models::RepositoryRef;

/// Build the URL git is invoked with.
///
/// For `http`/`https` URLs with a token, the token becomes the password and
/// the username falls back to `default_username`. Any other URL (local
/// paths, `file://`, `ssh`) is returned unchanged.
pub fn authenticated_url(repo: &RepositoryRef, default_username: &str) -> Result<String> {
    let token = match repo.token.as_deref() {
        Some(t) if !t.is_empty() => t,
        _ => return Ok(repo.url.clone()),
    };
    let mut url = match reqwest::Url::parse(&repo.url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => url,
        _ => return Ok(repo.url.clone()),
    };
    let username = repo
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .unwrap_or(default_username);
    url.set_username(username)
        .map_err(|_| anyhow::anyhow!("Cannot set username on {}", repo.url))?;
    url.set_password(Some(token))
        .map_err(|_| anyhow::anyhow!("Cannot set credentials on {}", repo.url))?;
    Ok(url.to_string())
}

/// Replace the token in `text` so it can be logged.
pub fn redact(text: &str, token: Option<&str>) -> String {
    match token {
        Some(t) if !t.is_empty() => text.replace(t, "***"),
        _ => text.to_string(),
    }
}

fn git() -> Command {
    let mut cmd = Command::new("git");
    cmd.env("GIT_TERMINAL_PROMPT", "0").kill_on_drop(true);
    cmd
}

async fn run(mut cmd: Command, what: &str, token: Option<&str>) -> Result<String> {
    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", what))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", what, redact(stderr.trim(), token));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Whether the remote exists and the credentials can list its heads.
///
/// Authentication, network and not-found failures are logged and reported
/// as `false`.
pub async fn is_accessible(repo: &RepositoryRef, default_username: &str) -> bool {
    let url = match authenticated_url(repo, default_username) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(repo = %repo.url, error = %e, "Invalid repository URL");
            return false;
        }
    };

    let mut cmd = git();
    cmd.args(["ls-remote", "--heads"]).arg(&url);

    match run(cmd, "ls-remote", repo.token.as_deref()).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(repo = %repo.url, error = %e, "Repository is not accessible");
            false
        }
    }
}

/// Full clone of `repo` into `dest`. `dest` must not exist yet.
pub async fn clone_full(repo: &RepositoryRef, default_username: &str, dest: &Path) -> Result<()> {
    let url = authenticated_url(repo, default_username)?;

    let mut cmd = git();
    cmd.arg("clone");
    if let Some(branch) = &repo.branch {
        cmd.args(["--branch", branch]);
    }
    cmd.arg(&url).arg(dest);

    run(cmd, "clone", repo.token.as_deref())
        .await
        .with_context(|| format!("Failed to clone {}", repo.url))?;
    Ok(())
}

/// Depth-1, single-branch clone of `git_ref` into `dest`.
pub async fn clone_shallow(
    repo: &RepositoryRef,
    default_username: &str,
    git_ref: &str,
    dest: &Path,
) -> Result<()> {
    let url = authenticated_url(repo, default_username)?;

    let mut cmd = git();
    cmd.args(["clone", "--depth", "1", "--single-branch", "--branch", git_ref])
        .arg(&url)
        .arg(dest);

    run(cmd, "clone", repo.token.as_deref())
        .await
        .with_context(|| format!("Failed to fetch {} at {}", repo.url, git_ref))?;
    Ok(())
}

/// The commit checked out in `repo_dir`.
pub async fn head_commit(repo_dir: &Path) -> Result<String> {
    let mut cmd = git();
    cmd.args(["rev-parse", "HEAD"]).current_dir(repo_dir);
    let out = run(cmd, "rev-parse HEAD", None).await?;
    Ok(out.trim().to_string())
}

/// A job-scoped scratch directory holding one checkout.
///
/// The directory (and everything under it) is deleted when the value is
/// dropped, on success, error and task cancellation alike.
pub struct WorkingCopy {
    dir: TempDir,
}

impl WorkingCopy {
    /// Create an empty job directory under `parent` (the OS temp dir when
    /// `None`).
    pub fn create(parent: Option<&Path>, job_id: &str) -> Result<Self> {
        let prefix = format!("repolens-{}-", job_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .with_context(|| "Failed to create job working directory")?;
        Ok(Self { dir })
    }

    /// Where the checkout lives (a child of the job directory, so git
    /// creates it itself).
    pub fn checkout_path(&self) -> PathBuf {
        self.dir.path().join("repo")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
