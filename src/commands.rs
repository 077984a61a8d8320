//! CLI command handlers. Each `run_*` wires a [`IndexingService`] from the
//! configuration, performs one operation and prints the outcome.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use repolens_core::changeset::{ChangeSet, FileDiff};
use repolens_core::models::RepositoryRef;

use crate::config::Config;
use crate::db;
use crate::delta::DeltaRequest;
use crate::embedding::create_embedder;
use crate::hosting::GitLabClient;
use crate::job::{new_job_id, JobReport};
use crate::migrate;
use crate::readiness::Readiness;
use crate::service::IndexingService;
use crate::sqlite_store::SqliteStore;

/// Open the database, run migrations and build the service.
pub async fn open_service(config: &Config) -> Result<IndexingService> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteStore::new(pool, config.embedding.dims);
    let embedder = create_embedder(&config.embedding)?;
    Ok(IndexingService::new(Arc::new(store), embedder, config.clone()))
}

/// Repository reference with a token from `token_env`, or from the
/// configured hosting token variable.
pub fn repository_ref(
    config: &Config,
    url: &str,
    username: Option<String>,
    token_env: Option<&str>,
    branch: Option<String>,
) -> RepositoryRef {
    let token = match token_env {
        Some(var) => std::env::var(var).ok().filter(|t| !t.is_empty()),
        None => config.hosting.token(),
    };
    RepositoryRef {
        url: url.to_string(),
        username,
        token,
        branch,
    }
}

fn gitlab(config: &Config, project: &str, token: Option<String>) -> Result<GitLabClient> {
    let api_url = config
        .hosting
        .api_url
        .as_deref()
        .context("hosting.api_url must be set for this command")?;
    GitLabClient::new(api_url, project, token.or_else(|| config.hosting.token()))
}

fn print_report(report: &JobReport) {
    println!("{:?} {}", report.kind, report.repo_url);
    println!("  job: {}", report.job_id);
    println!("  files indexed: {}", report.files_indexed);
    println!("  entries written: {}", report.entries_written);
    if report.entries_deleted > 0 {
        println!("  entries deleted: {}", report.entries_deleted);
    }
    if report.chunks_skipped > 0 {
        println!("  chunks skipped: {}", report.chunks_skipped);
    }
    println!("ok");
}

pub async fn run_ingest(config: &Config, repo: RepositoryRef, job_id: Option<String>) -> Result<()> {
    let service = open_service(config).await?;
    let job_id = job_id.unwrap_or_else(new_job_id);
    let report = service.ingest_async(repo, &job_id).await??;
    print_report(&report);
    Ok(())
}

/// Where a delta sync's change-set comes from.
pub enum ChangeSource {
    /// Paths given on the command line.
    Explicit {
        updated: Vec<String>,
        deleted: Vec<String>,
    },
    /// The diff of a merge request.
    MergeRequest(u64),
}

pub async fn run_sync(
    config: &Config,
    repo: RepositoryRef,
    project: String,
    git_ref: String,
    changes: ChangeSource,
) -> Result<()> {
    let changes = match changes {
        ChangeSource::Explicit { updated, deleted } => ChangeSet::new(updated, deleted),
        ChangeSource::MergeRequest(iid) => {
            let client = gitlab(config, &project, repo.token.clone())?;
            ChangeSet::from_diffs(&client.merge_request_changes(iid).await?)
        }
    };
    if changes.is_empty() {
        println!("Nothing to sync.");
        return Ok(());
    }

    let service = open_service(config).await?;
    let request = DeltaRequest {
        repo,
        project: Some(project),
        git_ref,
        changes,
    };
    let report = service.sync_delta_async(request, &new_job_id()).await??;
    print_report(&report);
    Ok(())
}

pub async fn run_ready(config: &Config, repo: RepositoryRef) -> Result<()> {
    let service = open_service(config).await?;
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match service.ensure_ready(&repo, &cancel).await? {
        Readiness::AlreadyIndexed => println!("ready: {} (already indexed)", repo.url),
        Readiness::Indexed { polls } => println!("ready: {} (after {} polls)", repo.url, polls),
        Readiness::TimedOut { polls } => {
            println!("not ready: {} (gave up after {} polls)", repo.url, polls)
        }
        Readiness::Cancelled { .. } => bail!("Wait for {} cancelled", repo.url),
    }
    Ok(())
}

/// Where the diffs for a context bundle come from.
pub enum DiffSource {
    MergeRequest(u64),
    Commit(String),
}

pub async fn run_context(
    config: &Config,
    repo_url: &str,
    project: &str,
    source: DiffSource,
) -> Result<()> {
    let client = gitlab(config, project, None)?;
    let diffs: Vec<FileDiff> = match source {
        DiffSource::MergeRequest(iid) => client.merge_request_changes(iid).await?,
        DiffSource::Commit(sha) => client.commit_diff(&sha).await?,
    };
    let service = open_service(config).await?;
    println!("{}", service.assemble_context(&diffs, repo_url).await);
    Ok(())
}

pub async fn run_search(config: &Config, repo_url: &str, query: &str, limit: usize) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Search query must not be empty");
    }
    let service = open_service(config).await?;
    let vector = service.embedder().embed(query).await?;
    let results = service
        .store()
        .find_similar(&vector, limit, Some(repo_url))
        .await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, result.distance, result.entry.file_path);
        let excerpt: String = result.entry.content.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", result.entry.id);
        println!();
    }
    Ok(())
}

pub async fn run_status(config: &Config, repo_url: &str) -> Result<()> {
    let service = open_service(config).await?;
    let count = service.store().count_by_repository(repo_url).await?;
    println!("{}", repo_url);
    println!("  entries: {}", count);
    Ok(())
}
