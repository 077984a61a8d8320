//! Readiness gate: block until a repository has at least one index entry.
//!
//! The gate probes the store once. If the repository is empty it fires the
//! supplied trigger (normally an asynchronous ingestion) and then makes up
//! to `max_attempts` poll queries. Between polls it waits for whichever
//! comes first:
//!
//! - the poll interval elapsing,
//! - a [`JobEvent`] for the same repository,
//! - cancellation of the caller's token.
//!
//! Reaching the ceiling is not an error: the caller proceeds with reduced
//! context. Cancelling the wait never touches the triggered job, which
//! keeps running on its own task.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use repolens_core::store::IndexStore;

use crate::config::ReadinessConfig;
use crate::job::JobEvent;

/// Result of [`ensure_ready`]. `polls` counts queries after the initial
/// probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Entries existed at the first probe; nothing was triggered.
    AlreadyIndexed,
    /// Entries appeared after `polls` poll queries.
    Indexed { polls: u32 },
    /// The ceiling was reached without entries.
    TimedOut { polls: u32 },
    /// The caller cancelled the wait.
    Cancelled { polls: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::AlreadyIndexed | Readiness::Indexed { .. })
    }
}

/// Wait up to `interval`, returning early on a job event for `repo_url`.
///
/// A closed channel degrades to plain sleeping.
async fn wait_tick(
    events: &mut Option<broadcast::Receiver<JobEvent>>,
    repo_url: &str,
    interval: Duration,
) {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);

    loop {
        let rx = match events.as_mut() {
            Some(rx) => rx,
            None => {
                sleep.as_mut().await;
                return;
            }
        };
        let closed = tokio::select! {
            _ = sleep.as_mut() => return,
            msg = rx.recv() => match msg {
                Ok(event) if event.repo_url == repo_url => {
                    tracing::debug!(repo = repo_url, job_id = %event.job_id, "Job finished, polling early");
                    return;
                }
                Ok(_) => false,
                Err(RecvError::Lagged(_)) => return,
                Err(RecvError::Closed) => true,
            },
        };
        if closed {
            *events = None;
        }
    }
}

/// Ensure `repo_url` has index entries, triggering ingestion if needed.
///
/// Subscribe `events` before calling so a job that finishes between the
/// trigger and the first wait is not missed. Only the initial probe's
/// error is returned; failed polls are logged and count as attempts.
pub async fn ensure_ready<F>(
    repo_url: &str,
    store: &dyn IndexStore,
    events: Option<broadcast::Receiver<JobEvent>>,
    trigger: F,
    settings: &ReadinessConfig,
    cancel: &CancellationToken,
) -> Result<Readiness>
where
    F: FnOnce(),
{
    if store.count_by_repository(repo_url).await? > 0 {
        return Ok(Readiness::AlreadyIndexed);
    }

    tracing::info!(repo = repo_url, "Repository not indexed, triggering ingestion");
    trigger();

    let mut events = events;
    let interval = settings.poll_interval();

    for attempt in 1..=settings.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(repo = repo_url, attempt, "Readiness wait cancelled");
                return Ok(Readiness::Cancelled { polls: attempt - 1 });
            }
            _ = wait_tick(&mut events, repo_url, interval) => {}
        }

        match store.count_by_repository(repo_url).await {
            Ok(n) if n > 0 => {
                tracing::info!(repo = repo_url, attempt, entries = n, "Repository is ready");
                return Ok(Readiness::Indexed { polls: attempt });
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(repo = repo_url, attempt, error = %e, "Readiness poll failed"),
        }

        if attempt % 6 == 0 {
            tracing::info!(
                repo = repo_url,
                attempt,
                max_attempts = settings.max_attempts,
                "Still waiting for ingestion"
            );
        }
    }

    tracing::warn!(
        repo = repo_url,
        max_attempts = settings.max_attempts,
        "Gave up waiting for ingestion, continuing without index"
    );
    Ok(Readiness::TimedOut {
        polls: settings.max_attempts,
    })
}
