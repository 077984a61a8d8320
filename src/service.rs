//! Job service: the entry points collaborators call.
//!
//! [`IndexingService`] owns the store, the embedder and the configuration
//! and runs ingestion and delta sync as background tokio tasks:
//!
//! - at most `jobs.max_concurrent` jobs run at once (a [`Semaphore`]);
//! - jobs for the same repository run one at a time (a per-repository
//!   [`Mutex`] kept in a [`DashMap`]), jobs for different repositories
//!   run concurrently;
//! - every finished job is broadcast as a [`JobEvent`], which the
//!   readiness gate uses to wake early.
//!
//! The service is cheap to clone; clones share all state.

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use repolens_core::changeset::FileDiff;
use repolens_core::context::{self, CONTEXT_RETRIEVAL_FAILED};
use repolens_core::embedding::Embedder;
use repolens_core::models::RepositoryRef;
use repolens_core::store::IndexStore;

use crate::config::Config;
use crate::delta::{self, DeltaRequest};
use crate::error::JobError;
use crate::ingest;
use crate::job::{JobEvent, JobKind, JobReport};
use crate::readiness::{self, Readiness};

const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct IndexingService {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    config: Arc<Config>,
    permits: Arc<Semaphore>,
    repo_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    events: broadcast::Sender<JobEvent>,
    shutdown: CancellationToken,
}

impl IndexingService {
    pub fn new(store: Arc<dyn IndexStore>, embedder: Arc<dyn Embedder>, config: Config) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            embedder,
            permits: Arc::new(Semaphore::new(config.jobs.max_concurrent.max(1))),
            config: Arc::new(config),
            repo_locks: Arc::new(DashMap::new()),
            events,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Receive an event for every job that finishes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Cancel every running and queued job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn repo_lock(&self, repo_url: &str) -> Arc<Mutex<()>> {
        self.repo_locks
            .entry(repo_url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `job` on a background task under the repository lock and a
    /// worker permit, then broadcast its outcome.
    pub(crate) fn spawn_job<F>(
        &self,
        repo_url: &str,
        job_id: &str,
        kind: JobKind,
        job: F,
    ) -> JoinHandle<Result<JobReport, JobError>>
    where
        F: Future<Output = Result<JobReport, JobError>> + Send + 'static,
    {
        let lock = self.repo_lock(repo_url);
        let repo_locks = self.repo_locks.clone();
        let permits = self.permits.clone();
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let repo_url = repo_url.to_string();
        let job_id = job_id.to_string();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => Err(JobError::Cancelled),
                outcome = async {
                    // Repository lock first so queued jobs do not hold permits.
                    let _guard = lock.lock().await;
                    let _permit = permits.acquire_owned().await.map_err(|_| JobError::Cancelled)?;
                    tracing::info!(job_id = %job_id, repo = %repo_url, ?kind, "Job started");
                    job.await
                } => outcome,
            };

            // Forget the lock once no other job holds or awaits it.
            drop(lock);
            repo_locks.remove_if(&repo_url, |_, lock| Arc::strong_count(lock) == 1);

            match &outcome {
                Ok(report) => tracing::info!(
                    job_id = %job_id,
                    repo = %repo_url,
                    ?kind,
                    entries = report.entries_written,
                    "Job finished"
                ),
                Err(e) => tracing::error!(
                    job_id = %job_id,
                    repo = %repo_url,
                    ?kind,
                    error = %e,
                    "Job failed"
                ),
            }

            // No receivers is fine.
            let _ = events.send(JobEvent {
                job_id,
                repo_url,
                kind,
                outcome: outcome.clone(),
            });
            outcome
        })
    }

    /// Start a full ingestion of `repo` in the background.
    pub fn ingest_async(
        &self,
        repo: RepositoryRef,
        job_id: &str,
    ) -> JoinHandle<Result<JobReport, JobError>> {
        let store = self.store.clone();
        let embedder = self.embedder.clone();
        let config = self.config.clone();
        let cancel = self.shutdown.child_token();
        let id = job_id.to_string();
        let url = repo.url.clone();

        self.spawn_job(&url, job_id, JobKind::Ingest, async move {
            ingest::ingest_repository(&repo, &id, store.as_ref(), embedder.as_ref(), &config, &cancel)
                .await
        })
    }

    /// Start a delta sync in the background.
    pub fn sync_delta_async(
        &self,
        request: DeltaRequest,
        job_id: &str,
    ) -> JoinHandle<Result<JobReport, JobError>> {
        let store = self.store.clone();
        let embedder = self.embedder.clone();
        let config = self.config.clone();
        let cancel = self.shutdown.child_token();
        let id = job_id.to_string();
        let url = request.repo.url.clone();

        self.spawn_job(&url, job_id, JobKind::Delta, async move {
            delta::sync_delta(&request, &id, store.as_ref(), embedder.as_ref(), &config, &cancel)
                .await
        })
    }

    /// Block until `repo` has index entries, ingesting it on demand.
    ///
    /// `cancel` only ends this wait; a triggered ingestion keeps running.
    pub async fn ensure_ready(
        &self,
        repo: &RepositoryRef,
        cancel: &CancellationToken,
    ) -> Result<Readiness> {
        let events = self.subscribe();
        let service = self.clone();
        let trigger_repo = repo.clone();
        readiness::ensure_ready(
            &repo.url,
            self.store.as_ref(),
            Some(events),
            move || {
                let job_id = crate::job::new_job_id();
                // Detached: the job outlives this wait.
                drop(service.ingest_async(trigger_repo, &job_id));
            },
            &self.config.readiness,
            cancel,
        )
        .await
    }

    /// Context bundle for `diffs`, or a sentinel string.
    ///
    /// Never fails: retrieval errors are logged and rendered as
    /// [`CONTEXT_RETRIEVAL_FAILED`].
    pub async fn assemble_context(&self, diffs: &[FileDiff], repo_url: &str) -> String {
        let options = self.config.context_options();
        match context::assemble_context(
            diffs,
            repo_url,
            self.embedder.as_ref(),
            self.store.as_ref(),
            &options,
        )
        .await
        {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::error!(repo = repo_url, error = %format!("{:#}", e), "Context retrieval failed");
                CONTEXT_RETRIEVAL_FAILED.to_string()
            }
        }
    }
}
