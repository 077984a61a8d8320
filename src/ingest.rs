//! Full ingestion pipeline.
//!
//! `Validate → Fetch → Chunk & filter → Embed → Replace → Done`, with
//! `Failed` reachable from every step:
//!
//! 1. `git ls-remote` the repository; inaccessible means `Failed` with no
//!    side effects.
//! 2. Full clone into a job-scoped [`WorkingCopy`].
//! 3. Walk the checkout: keep allow-listed extensions, drop excluded globs,
//!    oversized, unreadable and blank files, chunk the rest. Multi-part
//!    files get `(Part k/n)` display paths.
//! 4. Embed every chunk through the (retrying) embedder. Under the
//!    default `abort` policy one exhausted chunk fails the job before the
//!    store is touched.
//! 5. `replace_all` the repository's entries in one transaction.
//!
//! The working copy is removed on every exit path.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use repolens_core::chunk::{split_text, ChunkingConfig};
use repolens_core::embedding::Embedder;
use repolens_core::models::{part_path, path_extension, IndexEntry, RepositoryRef};
use repolens_core::store::IndexStore;

use crate::config::{Config, EmbeddingFailurePolicy, IngestConfig};
use crate::embedding::warm_up;
use crate::error::JobError;
use crate::git::{self, WorkingCopy};
use crate::job::{JobKind, JobReport, JobState};

/// Progress is logged every this many embedded chunks.
pub const PROGRESS_EVERY: usize = 10;

/// One chunk awaiting its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    /// Display path, with a part suffix for multi-part files.
    pub path: String,
    pub content: String,
}

/// Chunk one file's text into pending chunks with display paths.
pub fn chunk_file(path: &str, text: &str, chunking: &ChunkingConfig) -> Vec<PendingChunk> {
    let segments = split_text(text, chunking);
    let total = segments.len();
    segments
        .into_iter()
        .enumerate()
        .filter(|(_, s)| !s.trim().is_empty())
        .map(|(i, content)| PendingChunk {
            path: part_path(path, i, total),
            content,
        })
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Repository-relative paths (with `/` separators) of the files to index,
/// sorted.
pub fn collect_files(root: &Path, ingest: &IngestConfig) -> Result<Vec<(String, PathBuf)>> {
    let include: HashSet<String> = ingest
        .include_extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();
    let exclude = build_globset(&ingest.exclude_globs)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude.is_match(&rel_str) {
            continue;
        }
        match path_extension(&rel_str) {
            Some(ext) if include.contains(&ext) => {}
            _ => continue,
        }
        match entry.metadata() {
            Ok(meta) if meta.len() > ingest.max_file_bytes => {
                tracing::debug!(path = %rel_str, bytes = meta.len(), "Skipping oversized file");
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %rel_str, error = %e, "Skipping file without metadata");
                continue;
            }
        }

        files.push((rel_str, path.to_path_buf()));
    }

    Ok(files)
}

/// Read and chunk the collected files. Unreadable and blank files are
/// skipped. Returns the chunks and the number of files that produced any.
pub fn read_and_chunk(
    files: &[(String, PathBuf)],
    chunking: &ChunkingConfig,
) -> (Vec<PendingChunk>, usize) {
    let mut chunks = Vec::new();
    let mut files_indexed = 0;

    for (rel, full) in files {
        let text = match std::fs::read_to_string(full) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %rel, error = %e, "Skipping unreadable file");
                continue;
            }
        };
        if text.trim().is_empty() {
            continue;
        }
        let file_chunks = chunk_file(rel, &text, chunking);
        if !file_chunks.is_empty() {
            files_indexed += 1;
            chunks.extend(file_chunks);
        }
    }

    (chunks, files_indexed)
}

/// Embed `chunks` into entries of `repo_url`.
///
/// Under [`EmbeddingFailurePolicy::Abort`] the first failure ends the batch;
/// under `SkipChunk` the chunk is counted in `report.chunks_skipped`, and
/// the batch still fails if no chunk embedded at all.
pub async fn embed_chunks(
    chunks: Vec<PendingChunk>,
    repo_url: &str,
    embedder: &dyn Embedder,
    policy: EmbeddingFailurePolicy,
    report: &mut JobReport,
    cancel: &CancellationToken,
) -> Result<Vec<IndexEntry>, JobError> {
    let total = chunks.len();
    let mut entries = Vec::with_capacity(total);
    let mut last_error = None;

    for (i, chunk) in chunks.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let embedded = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            result = embedder.embed(&chunk.content) => result,
        };

        match embedded {
            Ok(vector) => {
                entries.push(IndexEntry::new(repo_url, &chunk.path, &chunk.content, vector));
            }
            Err(e) => match policy {
                EmbeddingFailurePolicy::Abort => {
                    tracing::error!(
                        job_id = %report.job_id,
                        repo = repo_url,
                        path = %chunk.path,
                        error = %e,
                        "Embedding failed, aborting batch"
                    );
                    return Err(JobError::Embedding(e));
                }
                EmbeddingFailurePolicy::SkipChunk => {
                    tracing::warn!(
                        job_id = %report.job_id,
                        repo = repo_url,
                        path = %chunk.path,
                        error = %e,
                        "Embedding failed, skipping chunk"
                    );
                    report.chunks_skipped += 1;
                    last_error = Some(e);
                }
            },
        }

        let done = i + 1;
        if done % PROGRESS_EVERY == 0 || done == total {
            tracing::info!(
                job_id = %report.job_id,
                repo = repo_url,
                done,
                total,
                "Embedding progress"
            );
        }
    }

    // Every chunk skipped: keep the existing index rather than emptying it.
    if entries.is_empty() {
        if let Some(e) = last_error {
            tracing::error!(
                job_id = %report.job_id,
                repo = repo_url,
                skipped = report.chunks_skipped,
                "Every chunk failed to embed"
            );
            return Err(JobError::Embedding(e));
        }
    }

    Ok(entries)
}

/// Run a full ingestion of `repo`.
///
/// Returns the final report on success; the error is the terminal cause
/// otherwise. The store is only written in the last step.
pub async fn ingest_repository(
    repo: &RepositoryRef,
    job_id: &str,
    store: &dyn IndexStore,
    embedder: &dyn Embedder,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<JobReport, JobError> {
    let mut report = JobReport::new(job_id, &repo.url, JobKind::Ingest);
    let default_username = &config.ingest.default_username;

    report.enter(JobState::Validating);
    if !git::is_accessible(repo, default_username).await {
        return Err(JobError::Inaccessible(repo.url.clone()));
    }

    report.enter(JobState::Fetching);
    let copy = WorkingCopy::create(config.ingest.work_dir.as_deref(), job_id)
        .map_err(JobError::fetch)?;
    let checkout = copy.checkout_path();
    tokio::select! {
        _ = cancel.cancelled() => return Err(JobError::Cancelled),
        cloned = git::clone_full(repo, default_username, &checkout) => {
            cloned.map_err(JobError::fetch)?
        }
    }

    report.enter(JobState::Chunking);
    let ingest = config.ingest.clone();
    let chunking = config.chunking.clone();
    let (chunks, files_indexed) = tokio::task::spawn_blocking(move || {
        collect_files(&checkout, &ingest).map(|files| read_and_chunk(&files, &chunking))
    })
    .await
    .map_err(|e| JobError::fetch(e.into()))?
    .map_err(JobError::fetch)?;
    drop(copy);
    report.files_indexed = files_indexed;
    tracing::info!(
        job_id,
        repo = %repo.url,
        files = files_indexed,
        chunks = chunks.len(),
        "Repository chunked"
    );

    report.enter(JobState::Embedding);
    if config.embedding.warm_up && !chunks.is_empty() {
        warm_up(embedder).await;
    }
    let entries = embed_chunks(
        chunks,
        &repo.url,
        embedder,
        config.ingest.on_embedding_failure,
        &mut report,
        cancel,
    )
    .await?;

    report.enter(JobState::Replacing);
    store
        .replace_all(&repo.url, &entries)
        .await
        .map_err(JobError::store)?;
    report.entries_written = entries.len();

    report.enter(JobState::Done);
    tracing::info!(
        job_id,
        repo = %repo.url,
        files = report.files_indexed,
        entries = report.entries_written,
        skipped = report.chunks_skipped,
        "Ingestion complete"
    );
    Ok(report)
}
