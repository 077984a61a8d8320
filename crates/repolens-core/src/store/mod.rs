//! Index storage abstraction.
//!
//! The [`IndexStore`] trait is the only shared mutable resource of the
//! pipeline. It maps `(repository, file path)` to chunk content and vector
//! and supports nearest-neighbour queries, per-repository listing and
//! scoped deletion. Entries are never updated in place: an update is a
//! delete followed by an insert.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`find_by_repository`](IndexStore::find_by_repository) | List every entry of a repository |
//! | [`count_by_repository`](IndexStore::count_by_repository) | Existence probe |
//! | [`find_similar`](IndexStore::find_similar) | k nearest entries, optionally scoped |
//! | [`replace_all`](IndexStore::replace_all) | Atomic delete-all + bulk insert |
//! | [`delete_by_path_prefix`](IndexStore::delete_by_path_prefix) | Remove a file and its parts |
//! | [`insert_entries`](IndexStore::insert_entries) | Bulk insert without deleting |

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{IndexEntry, ScoredEntry};

/// Persistent mapping from `(repository, path)` to content and vector.
///
/// An empty result is a valid answer; a failed query is an `Err`.
/// Implementations must be `Send + Sync` so jobs on different tasks can
/// share one store.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// All entries of a repository, in insertion order.
    async fn find_by_repository(&self, repo_url: &str) -> Result<Vec<IndexEntry>>;

    /// Number of entries of a repository.
    async fn count_by_repository(&self, repo_url: &str) -> Result<usize>;

    /// The `k` entries closest to `query`, by ascending cosine distance.
    ///
    /// With `repo_url = None` the search spans every repository.
    async fn find_similar(
        &self,
        query: &[f32],
        k: usize,
        repo_url: Option<&str>,
    ) -> Result<Vec<ScoredEntry>>;

    /// Delete every entry of `repo_url`, then insert `entries`, as one
    /// atomic step. Readers see either the old set or the new set.
    async fn replace_all(&self, repo_url: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Delete every entry of `repo_url` whose path starts with `path_prefix`.
    ///
    /// Returns the number of entries removed.
    async fn delete_by_path_prefix(&self, repo_url: &str, path_prefix: &str) -> Result<u64>;

    /// Insert entries without touching existing ones.
    async fn insert_entries(&self, entries: &[IndexEntry]) -> Result<()>;
}

/// Reject entries that would break the storage invariants: blank content,
/// a vector of the wrong dimension, or (when `repo_url` is given) an entry
/// owned by another repository.
pub fn validate_entries(entries: &[IndexEntry], dims: usize, repo_url: Option<&str>) -> Result<()> {
    for entry in entries {
        if entry.content.trim().is_empty() {
            bail!("Refusing to store blank content for {}", entry.file_path);
        }
        if entry.embedding.len() != dims {
            bail!(
                "Embedding for {} has {} dimensions, expected {}",
                entry.file_path,
                entry.embedding.len(),
                dims
            );
        }
        if let Some(repo) = repo_url {
            if entry.repo_url != repo {
                bail!(
                    "Entry for {} belongs to {}, not {}",
                    entry.file_path,
                    entry.repo_url,
                    repo
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entries() {
        let good = IndexEntry::new("r", "a.rs", "fn a() {}", vec![0.0; 2]);
        assert!(validate_entries(&[good.clone()], 2, Some("r")).is_ok());

        let blank = IndexEntry::new("r", "a.rs", "  \n", vec![0.0; 2]);
        assert!(validate_entries(&[blank], 2, None).is_err());

        assert!(validate_entries(&[good.clone()], 3, None).is_err());
        assert!(validate_entries(&[good], 2, Some("other")).is_err());
    }
}
