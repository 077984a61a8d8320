//! Terminal failure causes of background jobs.

use repolens_core::embedding::EmbeddingError;
use thiserror::Error;

/// Why a job ended in [`JobState::Failed`](crate::job::JobState::Failed).
///
/// Transport and store errors carry the rendered `anyhow` chain so the
/// value stays `Clone` and can be broadcast to waiters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// Validation failed; nothing was fetched or written.
    #[error("repository {0} is not accessible")]
    Inaccessible(String),

    /// Clone, API or file fetch failed.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// An embedding was exhausted under the abort policy.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// The index store rejected a read or write.
    #[error("index store error: {0}")]
    Store(String),

    /// The job was cancelled before it finished.
    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    pub fn fetch(err: anyhow::Error) -> Self {
        JobError::Fetch(format!("{:#}", err))
    }

    pub fn store(err: anyhow::Error) -> Self {
        JobError::Store(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_fetch_keeps_context_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("exit status 128"))
            .context("Failed to clone repo")
            .unwrap_err();
        assert_eq!(
            JobError::fetch(err).to_string(),
            "fetch failed: Failed to clone repo: exit status 128"
        );
    }

    #[test]
    fn test_embedding_error_is_transparent() {
        let err: JobError = EmbeddingError::Fatal("401".to_string()).into();
        assert_eq!(err.to_string(), "embedding failed: 401");
    }
}
