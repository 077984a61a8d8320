//! Core data types shared by the indexing and retrieval pipeline.
//!
//! An [`IndexEntry`] is the unit of storage: one chunk of one file of one
//! repository, together with its embedding vector. Files that were split
//! into several chunks carry a `(Part k/n)` suffix on their display path.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One stored chunk of repository content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Opaque unique identifier (UUID v4).
    pub id: String,
    /// Canonical URL of the owning repository.
    pub repo_url: String,
    /// Repository-relative path, possibly suffixed with `(Part k/n)`.
    pub file_path: String,
    /// Chunk body. Never blank.
    pub content: String,
    /// Embedding vector of the configured dimension.
    pub embedding: Vec<f32>,
    /// Unix seconds at which the entry was built.
    pub indexed_at: i64,
}

impl IndexEntry {
    pub fn new(repo_url: &str, file_path: &str, content: &str, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            repo_url: repo_url.to_string(),
            file_path: file_path.to_string(),
            content: content.to_string(),
            embedding,
            indexed_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// An [`IndexEntry`] returned by a nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    /// Cosine distance to the query vector (`0.0` = same direction).
    pub distance: f32,
}

/// A repository the caller wants indexed, with optional credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Branch to clone. `None` means the remote's default branch.
    #[serde(default)]
    pub branch: Option<String>,
}

impl RepositoryRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Display path for chunk `index` (0-based) of a file split into `total` parts.
///
/// Single-chunk files keep their plain path.
///
/// ```rust
/// use repolens_core::models::part_path;
///
/// assert_eq!(part_path("src/Foo.java", 0, 1), "src/Foo.java");
/// assert_eq!(part_path("src/Foo.java", 1, 3), "src/Foo.java (Part 2/3)");
/// ```
pub fn part_path(path: &str, index: usize, total: usize) -> String {
    if total <= 1 {
        path.to_string()
    } else {
        format!("{} (Part {}/{})", path, index + 1, total)
    }
}

/// Lowercased extension of a repository path, if any.
pub fn path_extension(path: &str) -> Option<String> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
