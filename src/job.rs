//! Job bookkeeping shared by ingestion, delta sync and the job service.

use serde::Serialize;

use crate::error::JobError;

/// Where a job is in its pipeline.
///
/// Full ingestion walks `Validating → Fetching → Chunking → Embedding →
/// Replacing → Done`; delta sync uses `Fetching → Embedding → Replacing →
/// Done`. `Failed` is reachable from every state.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Validating,
    Fetching,
    Chunking,
    Embedding,
    Replacing,
    Done,
    Failed(JobError),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Validating => "validating",
            JobState::Fetching => "fetching",
            JobState::Chunking => "chunking",
            JobState::Embedding => "embedding",
            JobState::Replacing => "replacing",
            JobState::Done => "done",
            JobState::Failed(_) => "failed",
        }
    }
}

/// Kind of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingest,
    Delta,
}

/// Outcome counters of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: String,
    pub repo_url: String,
    pub kind: JobKind,
    pub state: JobState,
    pub files_indexed: usize,
    pub entries_written: usize,
    pub entries_deleted: u64,
    pub chunks_skipped: usize,
}

impl JobReport {
    pub fn new(job_id: &str, repo_url: &str, kind: JobKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            repo_url: repo_url.to_string(),
            kind,
            state: JobState::Queued,
            files_indexed: 0,
            entries_written: 0,
            entries_deleted: 0,
            chunks_skipped: 0,
        }
    }

    /// Record and log a state transition.
    pub fn enter(&mut self, state: JobState) {
        tracing::debug!(
            job_id = %self.job_id,
            repo = %self.repo_url,
            from = self.state.label(),
            to = state.label(),
            "Job state transition"
        );
        self.state = state;
    }
}

/// Broadcast when a job reaches a terminal state.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: String,
    pub repo_url: String,
    pub kind: JobKind,
    pub outcome: Result<JobReport, JobError>,
}

impl JobEvent {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A fresh job identifier.
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
