//! In-memory [`IndexStore`] implementation for tests and embedding.
//!
//! Entries live in a `Vec` behind a `std::sync::RwLock`. Every mutation
//! takes the write lock once, so `replace_all` is atomic with respect to
//! readers. Similarity search is brute-force cosine distance.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{IndexEntry, ScoredEntry};

use super::{validate_entries, IndexStore};

/// In-memory store holding vectors of a fixed dimension.
pub struct InMemoryStore {
    dims: usize,
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(Vec::new()),
        }
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn find_by_repository(&self, repo_url: &str) -> Result<Vec<IndexEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .iter()
            .filter(|e| e.repo_url == repo_url)
            .cloned()
            .collect())
    }

    async fn count_by_repository(&self, repo_url: &str) -> Result<usize> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.iter().filter(|e| e.repo_url == repo_url).count())
    }

    async fn find_similar(
        &self,
        query: &[f32],
        k: usize,
        repo_url: Option<&str>,
    ) -> Result<Vec<ScoredEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut scored: Vec<ScoredEntry> = entries
            .iter()
            .filter(|e| repo_url.map_or(true, |r| e.repo_url == r))
            .map(|e| ScoredEntry {
                distance: cosine_distance(query, &e.embedding),
                entry: e.clone(),
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }

    async fn replace_all(&self, repo_url: &str, entries: &[IndexEntry]) -> Result<()> {
        validate_entries(entries, self.dims, Some(repo_url))?;
        let mut stored = self.entries.write().map_err(poisoned)?;
        stored.retain(|e| e.repo_url != repo_url);
        stored.extend(entries.iter().cloned());
        Ok(())
    }

    async fn delete_by_path_prefix(&self, repo_url: &str, path_prefix: &str) -> Result<u64> {
        let mut stored = self.entries.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|e| !(e.repo_url == repo_url && e.file_path.starts_with(path_prefix)));
        Ok((before - stored.len()) as u64)
    }

    async fn insert_entries(&self, entries: &[IndexEntry]) -> Result<()> {
        validate_entries(entries, self.dims, None)?;
        let mut stored = self.entries.write().map_err(poisoned)?;
        stored.extend(entries.iter().cloned());
        Ok(())
    }
}
