//! Source-hosting access for delta sync and context assembly.
//!
//! [`ContentSource`] is the seam delta sync reads file content through.
//! Two implementations:
//!
//! - [`GitLabClient`]: GitLab v4 REST API. Resolves a branch to a commit
//!   and downloads raw files at that commit. Also lists merge-request and
//!   commit diffs for building change-sets.
//! - [`ShallowCheckout`]: a depth-1 single-branch clone of the target ref
//!   in a job-scoped directory, read from disk.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use repolens_core::changeset::FileDiff;
use repolens_core::models::RepositoryRef;

use crate::git::{self, WorkingCopy};

/// Read access to repository content at an immutable commit.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Resolve a branch or tag to a commit id.
    async fn resolve_commit(&self, git_ref: &str) -> Result<String>;

    /// Raw content of `path` at `commit`. `Ok(None)` when the file does not
    /// exist there.
    async fn fetch_file(&self, path: &str, commit: &str) -> Result<Option<String>>;
}

// ============ GitLab ============

/// Client for one GitLab project.
pub struct GitLabClient {
    client: reqwest::Client,
    api_url: String,
    project: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct CommitResponse {
    id: String,
}

#[derive(Deserialize)]
struct MergeRequestChanges {
    #[serde(default)]
    changes: Vec<FileDiff>,
}

impl GitLabClient {
    /// `project` is the numeric id or the `group/name` path.
    pub fn new(api_url: &str, project: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            token,
        })
    }

    /// `{api_url}/api/v4/projects/{project}/{segments...}` with every
    /// segment percent-encoded (`/` included).
    pub fn project_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .with_context(|| format!("Invalid hosting API URL: {}", self.api_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Hosting API URL cannot be a base: {}", self.api_url))?
            .pop_if_empty()
            .extend(["api", "v4", "projects", self.project.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.header("PRIVATE-TOKEN", token),
            None => request,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GitLab request failed: {}", url.path()))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GitLab API error {} for {}", status, url.path());
        }
        Ok(response.json().await?)
    }

    /// File changes of a merge request.
    pub async fn merge_request_changes(&self, iid: u64) -> Result<Vec<FileDiff>> {
        let iid = iid.to_string();
        let url = self.project_url(&["merge_requests", &iid, "changes"])?;
        let changes: MergeRequestChanges = self.get_json(url).await?;
        Ok(changes.changes)
    }

    /// File changes introduced by one commit.
    pub async fn commit_diff(&self, sha: &str) -> Result<Vec<FileDiff>> {
        let mut url = self.project_url(&["repository", "commits", sha, "diff"])?;
        url.query_pairs_mut().append_pair("per_page", "100");
        self.get_json(url).await
    }
}

#[async_trait]
impl ContentSource for GitLabClient {
    async fn resolve_commit(&self, git_ref: &str) -> Result<String> {
        let url = self.project_url(&["repository", "commits", git_ref])?;
        let commit: CommitResponse = self.get_json(url).await?;
        Ok(commit.id)
    }

    async fn fetch_file(&self, path: &str, commit: &str) -> Result<Option<String>> {
        let mut url = self.project_url(&["repository", "files", path, "raw"])?;
        url.query_pairs_mut().append_pair("ref", commit);

        let response = self
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {} at {}", path, commit))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            status => bail!("GitLab API error {} fetching {}", status, path),
        }
    }
}

// ============ Shallow clone ============

/// Content read from a depth-1 clone of one ref.
///
/// The clone lives in a [`WorkingCopy`] and is removed when this value is
/// dropped.
pub struct ShallowCheckout {
    copy: WorkingCopy,
    commit: String,
}

impl ShallowCheckout {
    pub async fn fetch(
        repo: &RepositoryRef,
        default_username: &str,
        git_ref: &str,
        work_dir: Option<&Path>,
        job_id: &str,
    ) -> Result<Self> {
        let copy = WorkingCopy::create(work_dir, job_id)?;
        git::clone_shallow(repo, default_username, git_ref, &copy.checkout_path()).await?;
        let commit = git::head_commit(&copy.checkout_path()).await?;
        Ok(Self { copy, commit })
    }

    pub fn root(&self) -> PathBuf {
        self.copy.checkout_path()
    }
}

/// Join a repository-relative path, refusing anything that escapes `root`.
fn resolve_inside(root: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Some(root.join(relative))
    } else {
        None
    }
}

#[async_trait]
impl ContentSource for ShallowCheckout {
    async fn resolve_commit(&self, _git_ref: &str) -> Result<String> {
        Ok(self.commit.clone())
    }

    async fn fetch_file(&self, path: &str, _commit: &str) -> Result<Option<String>> {
        let full = match resolve_inside(&self.root(), path) {
            Some(full) => full,
            None => bail!("Path escapes the checkout: {}", path),
        };
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", full.display())),
        }
    }
}
