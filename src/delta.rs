//! Incremental (delta) index synchronization.
//!
//! Given a [`ChangeSet`], only the affected entries change:
//!
//! 1. Entries under every deleted **and** updated path are removed by path
//!    prefix, which also clears their `(Part k/n)` variants.
//! 2. With no updated paths the sync stops there.
//! 3. The target ref is resolved to a commit id; on failure the raw ref is
//!    used.
//! 4. Each updated path with a non-binary extension is fetched at that
//!    commit, chunked and embedded. Missing, blank and unreadable files
//!    are skipped.
//! 5. The new entries are bulk-inserted.
//!
//! Deletes and the insert are separate store operations. Exclusion
//! against concurrent jobs on the same repository comes from the job
//! service's per-repository lock.

use anyhow::{bail, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use repolens_core::changeset::ChangeSet;
use repolens_core::context::has_skipped_extension;
use repolens_core::embedding::Embedder;
use repolens_core::models::RepositoryRef;
use repolens_core::store::IndexStore;

use crate::config::{Config, DeltaMode};
use crate::error::JobError;
use crate::hosting::{ContentSource, GitLabClient, ShallowCheckout};
use crate::ingest::{chunk_file, embed_chunks, PendingChunk};
use crate::job::{JobKind, JobReport, JobState};

/// Everything needed to apply one change-set.
#[derive(Debug, Clone)]
pub struct DeltaRequest {
    pub repo: RepositoryRef,
    /// Hosting project id or path; required in `api` mode.
    pub project: Option<String>,
    /// Branch or tag the changes landed on.
    pub git_ref: String,
    pub changes: ChangeSet,
}

/// Remove the entries of every changed path. Returns the number removed.
pub async fn clear_changed_paths(
    store: &dyn IndexStore,
    repo_url: &str,
    changes: &ChangeSet,
) -> Result<u64, JobError> {
    let mut removed = 0;
    for path in changes.paths_to_clear() {
        removed += store
            .delete_by_path_prefix(repo_url, path)
            .await
            .map_err(JobError::store)?;
    }
    Ok(removed)
}

/// Resolve `git_ref` to a commit, falling back to the ref itself.
pub async fn resolve_ref(source: &dyn ContentSource, git_ref: &str) -> String {
    match source.resolve_commit(git_ref).await {
        Ok(commit) => commit,
        Err(e) => {
            tracing::warn!(git_ref, error = %e, "Could not resolve ref to a commit, using the ref");
            git_ref.to_string()
        }
    }
}

/// Fetch and chunk the updated paths at `commit`.
pub async fn fetch_updated(
    source: &dyn ContentSource,
    changes: &ChangeSet,
    commit: &str,
    config: &Config,
    report: &mut JobReport,
) -> Vec<PendingChunk> {
    let mut chunks = Vec::new();

    for path in &changes.updated {
        if has_skipped_extension(path, &config.delta.skip_extensions) {
            tracing::debug!(path = %path, "Skipping binary-looking file");
            continue;
        }
        let text = match source.fetch_file(path, commit).await {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::debug!(path = %path, commit, "File missing or empty at commit");
                continue;
            }
            Err(e) => {
                tracing::warn!(job_id = %report.job_id, path = %path, error = %e, "Skipping file");
                continue;
            }
        };
        let file_chunks = chunk_file(path, &text, &config.chunking);
        if !file_chunks.is_empty() {
            report.files_indexed += 1;
            chunks.extend(file_chunks);
        }
    }

    chunks
}

/// Clear every changed path. The returned report is already `Done` when
/// there is nothing to re-index.
async fn begin_delta(
    job_id: &str,
    repo_url: &str,
    changes: &ChangeSet,
    store: &dyn IndexStore,
) -> Result<JobReport, JobError> {
    let mut report = JobReport::new(job_id, repo_url, JobKind::Delta);
    report.entries_deleted = clear_changed_paths(store, repo_url, changes).await?;
    tracing::info!(
        job_id,
        repo = repo_url,
        updated = changes.updated.len(),
        deleted = changes.deleted.len(),
        removed = report.entries_deleted,
        "Cleared changed paths"
    );
    if changes.updated.is_empty() {
        report.enter(JobState::Done);
    }
    Ok(report)
}

/// Apply `changes` with content read from `source`.
#[allow(clippy::too_many_arguments)]
pub async fn apply_delta(
    repo_url: &str,
    changes: &ChangeSet,
    git_ref: &str,
    source: &dyn ContentSource,
    store: &dyn IndexStore,
    embedder: &dyn Embedder,
    config: &Config,
    job_id: &str,
    cancel: &CancellationToken,
) -> Result<JobReport, JobError> {
    let mut report = begin_delta(job_id, repo_url, changes, store).await?;
    if report.state.is_terminal() {
        return Ok(report);
    }
    index_updated(repo_url, changes, git_ref, source, store, embedder, config, &mut report, cancel)
        .await?;
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn index_updated(
    repo_url: &str,
    changes: &ChangeSet,
    git_ref: &str,
    source: &dyn ContentSource,
    store: &dyn IndexStore,
    embedder: &dyn Embedder,
    config: &Config,
    report: &mut JobReport,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    report.enter(JobState::Fetching);
    let commit = resolve_ref(source, git_ref).await;
    let chunks = fetch_updated(source, changes, &commit, config, report).await;

    report.enter(JobState::Embedding);
    let entries = embed_chunks(
        chunks,
        repo_url,
        embedder,
        config.ingest.on_embedding_failure,
        report,
        cancel,
    )
    .await?;

    report.enter(JobState::Replacing);
    if !entries.is_empty() {
        store
            .insert_entries(&entries)
            .await
            .map_err(JobError::store)?;
    }
    report.entries_written = entries.len();
    report.enter(JobState::Done);
    Ok(())
}

/// Open the content source configured by `delta.mode`.
pub async fn open_source(
    request: &DeltaRequest,
    config: &Config,
    job_id: &str,
) -> Result<Box<dyn ContentSource>> {
    match config.delta.mode {
        DeltaMode::Api => {
            let api_url = match &config.hosting.api_url {
                Some(url) => url,
                None => bail!("hosting.api_url is required for delta.mode = \"api\""),
            };
            let project = match &request.project {
                Some(project) => project,
                None => bail!("A hosting project is required for delta.mode = \"api\""),
            };
            let token = request.repo.token.clone().or_else(|| config.hosting.token());
            Ok(Box::new(GitLabClient::new(api_url, project, token)?))
        }
        DeltaMode::ShallowClone => {
            let work_dir: Option<PathBuf> = config.ingest.work_dir.clone();
            let checkout = ShallowCheckout::fetch(
                &request.repo,
                &config.ingest.default_username,
                &request.git_ref,
                work_dir.as_deref(),
                job_id,
            )
            .await?;
            Ok(Box::new(checkout))
        }
    }
}

/// Run one delta sync job.
pub async fn sync_delta(
    request: &DeltaRequest,
    job_id: &str,
    store: &dyn IndexStore,
    embedder: &dyn Embedder,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<JobReport, JobError> {
    let repo_url = request.repo.url.as_str();
    let mut report = begin_delta(job_id, repo_url, &request.changes, store).await?;
    if report.state.is_terminal() {
        return Ok(report);
    }

    report.enter(JobState::Fetching);
    let source = tokio::select! {
        _ = cancel.cancelled() => return Err(JobError::Cancelled),
        opened = open_source(request, config, job_id) => opened.map_err(JobError::fetch)?,
    };

    index_updated(
        repo_url,
        &request.changes,
        &request.git_ref,
        source.as_ref(),
        store,
        embedder,
        config,
        &mut report,
        cancel,
    )
    .await?;

    tracing::info!(
        job_id,
        repo = repo_url,
        files = report.files_indexed,
        entries = report.entries_written,
        "Delta sync complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use async_trait::async_trait;
    use repolens_core::embedding::EmbeddingError;
    use repolens_core::models::IndexEntry;
    use repolens_core::store::memory::InMemoryStore;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        fn model_name(&self) -> &str {
            "const"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.0, 1.0])
        }
    }

    /// In-memory content at a single commit, recording every request.
    struct FakeSource {
        commit: Option<String>,
        files: HashMap<String, String>,
        fetches: Mutex<Vec<(String, String)>>,
    }

    impl FakeSource {
        fn new(commit: Option<&str>, files: &[(&str, &str)]) -> Self {
            Self {
                commit: commit.map(str::to_string),
                files: files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect(),
                fetches: Mutex::new(Vec::new()),
            }
        }

        fn fetches(&self) -> Vec<(String, String)> {
            self.fetches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentSource for FakeSource {
        async fn resolve_commit(&self, git_ref: &str) -> Result<String> {
            match &self.commit {
                Some(commit) => Ok(commit.clone()),
                None => bail!("unknown ref {}", git_ref),
            }
        }

        async fn fetch_file(&self, path: &str, commit: &str) -> Result<Option<String>> {
            self.fetches
                .lock()
                .unwrap()
                .push((path.to_string(), commit.to_string()));
            Ok(self.files.get(path).cloned())
        }
    }

    fn config() -> Config {
        parse_config("[db]\npath = \"unused.sqlite\"\n[chunking]\nmax_tokens = 4\noverlap_tokens = 0\nmin_chunk_tokens = 1\n").unwrap()
    }

    async fn seeded() -> (InMemoryStore, IndexEntry) {
        let store = InMemoryStore::new(2);
        let untouched = IndexEntry::new("repo", "src/C.java", "class C {}", vec![1.0, 0.0]);
        store
            .replace_all(
                "repo",
                &[
                    IndexEntry::new("repo", "src/A.java (Part 1/2)", "old a one", vec![1.0, 0.0]),
                    IndexEntry::new("repo", "src/A.java (Part 2/2)", "old a two", vec![1.0, 0.0]),
                    IndexEntry::new("repo", "src/B.java", "class B {}", vec![1.0, 0.0]),
                    untouched.clone(),
                ],
            )
            .await
            .unwrap();
        (store, untouched)
    }

    async fn run(
        store: &InMemoryStore,
        changes: &ChangeSet,
        source: &FakeSource,
    ) -> Result<JobReport, JobError> {
        apply_delta(
            "repo",
            changes,
            "main",
            source,
            store,
            &ConstEmbedder,
            &config(),
            "job",
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_updates_a_removes_b_keeps_c() {
        let (store, untouched) = seeded().await;
        let source = FakeSource::new(Some("abc123"), &[("src/A.java", "class A {}")]);
        let changes = ChangeSet::new(["src/A.java"], ["src/B.java"]);

        let report = run(&store, &changes, &source).await.unwrap();
        assert_eq!(report.entries_deleted, 3);
        assert_eq!(report.entries_written, 1);
        assert_eq!(report.state, JobState::Done);

        let entries = store.find_by_repository("repo").await.unwrap();
        let a: Vec<&IndexEntry> = entries
            .iter()
            .filter(|e| e.file_path.starts_with("src/A.java"))
            .collect();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "class A {}");
        assert!(!entries.iter().any(|e| e.file_path.starts_with("src/B.java")));
        assert!(entries.contains(&untouched));
        assert_eq!(source.fetches(), vec![("src/A.java".to_string(), "abc123".to_string())]);
    }

    #[tokio::test]
    async fn test_pure_deletion_fetches_nothing() {
        let (store, _) = seeded().await;
        let source = FakeSource::new(Some("abc123"), &[]);
        let changes = ChangeSet::new(Vec::<String>::new(), ["src/A.java"]);

        let report = run(&store, &changes, &source).await.unwrap();
        assert_eq!(report.entries_deleted, 2);
        assert!(source.fetches().is_empty());
        assert_eq!(store.count_by_repository("repo").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unresolvable_ref_falls_back_to_ref() {
        let (store, _) = seeded().await;
        let source = FakeSource::new(None, &[("src/D.java", "class D {}")]);
        let changes = ChangeSet::new(["src/D.java"], Vec::<String>::new());

        run(&store, &changes, &source).await.unwrap();
        assert_eq!(source.fetches(), vec![("src/D.java".to_string(), "main".to_string())]);
        assert_eq!(store.count_by_repository("repo").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_binary_and_missing_files_add_nothing() {
        let (store, _) = seeded().await;
        let source = FakeSource::new(Some("abc123"), &[("docs/logo.png", "\u{89}PNG")]);
        let changes = ChangeSet::new(["docs/logo.png", "src/B.java"], Vec::<String>::new());

        let report = run(&store, &changes, &source).await.unwrap();
        // B was cleared as an updated path but no longer exists at the commit.
        assert_eq!(report.entries_deleted, 1);
        assert_eq!(report.entries_written, 0);
        assert_eq!(source.fetches(), vec![("src/B.java".to_string(), "abc123".to_string())]);
    }

    #[tokio::test]
    async fn test_multi_part_update_gets_part_suffixes() {
        let store = InMemoryStore::new(2);
        let source = FakeSource::new(Some("c1"), &[("src/Long.java", "a b c d e f g h")]);
        let changes = ChangeSet::new(["src/Long.java"], Vec::<String>::new());

        run(&store, &changes, &source).await.unwrap();
        let mut paths: Vec<String> = store
            .find_by_repository("repo")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.file_path)
            .collect();
        paths.sort();
        assert_eq!(
            paths,
            vec!["src/Long.java (Part 1/2)", "src/Long.java (Part 2/2)"]
        );
    }

    #[tokio::test]
    async fn test_api_mode_requires_hosting_settings() {
        let request = DeltaRequest {
            repo: RepositoryRef::new("https://gitlab.example.com/g/app.git"),
            project: Some("g/app".to_string()),
            git_ref: "main".to_string(),
            changes: ChangeSet::default(),
        };
        let err = open_source(&request, &config(), "job").await.err().unwrap();
        assert!(err.to_string().contains("hosting.api_url"));
    }

    #[tokio::test]
    async fn test_sync_delta_deletions_need_no_content_source() {
        let (store, untouched) = seeded().await;
        let request = DeltaRequest {
            repo: RepositoryRef::new("repo"),
            project: None,
            git_ref: "main".to_string(),
            changes: ChangeSet::new(Vec::<String>::new(), ["src/A.java", "src/B.java"]),
        };

        // api mode without hosting.api_url: opening a source would fail.
        let report = sync_delta(
            &request,
            "job",
            &store,
            &ConstEmbedder,
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.entries_deleted, 3);
        assert_eq!(report.state, JobState::Done);
        assert_eq!(store.find_by_repository("repo").await.unwrap(), vec![untouched]);
    }

    #[tokio::test]
    async fn test_sync_delta_reports_unopenable_source() {
        let (store, _) = seeded().await;
        let request = DeltaRequest {
            repo: RepositoryRef::new("repo"),
            project: None,
            git_ref: "main".to_string(),
            changes: ChangeSet::new(["src/A.java"], Vec::<String>::new()),
        };

        let err = sync_delta(
            &request,
            "job",
            &store,
            &ConstEmbedder,
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JobError::Fetch(_)));
        assert_eq!(store.count_by_repository("repo").await.unwrap(), 2);
    }
}
