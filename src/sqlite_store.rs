//! SQLite-backed [`IndexStore`] implementation.
//!
//! Entries live in the `index_entries` table with the vector stored as a
//! little-endian f32 BLOB. Nearest-neighbour queries load the candidate
//! vectors and rank them in-process by cosine distance, ascending.
//!
//! The pool runs in WAL mode, so `replace_all` (delete + insert in one
//! transaction) is invisible to readers until it commits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use repolens_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use repolens_core::models::{IndexEntry, ScoredEntry};
use repolens_core::store::{validate_entries, IndexStore};

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_entry(row: &SqliteRow) -> IndexEntry {
    let blob: Vec<u8> = row.get("embedding");
    IndexEntry {
        id: row.get("id"),
        repo_url: row.get("repo_url"),
        file_path: row.get("file_path"),
        content: row.get("content"),
        embedding: blob_to_vec(&blob),
        indexed_at: row.get("indexed_at"),
    }
}

async fn insert_entry<'e, E>(executor: E, entry: &IndexEntry) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO index_entries (id, repo_url, file_path, content, embedding, dims, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.repo_url)
    .bind(&entry.file_path)
    .bind(&entry.content)
    .bind(vec_to_blob(&entry.embedding))
    .bind(entry.embedding.len() as i64)
    .bind(entry.indexed_at)
    .execute(executor)
    .await
    .with_context(|| format!("Failed to insert entry for {}", entry.file_path))?;
    Ok(())
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn find_by_repository(&self, repo_url: &str) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            "SELECT id, repo_url, file_path, content, embedding, indexed_at FROM index_entries WHERE repo_url = ? ORDER BY rowid",
        )
        .bind(repo_url)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_entry).collect())
    }

    async fn count_by_repository(&self, repo_url: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE repo_url = ?")
            .bind(repo_url)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn find_similar(
        &self,
        query: &[f32],
        k: usize,
        repo_url: Option<&str>,
    ) -> Result<Vec<ScoredEntry>> {
        let rows = match repo_url {
            Some(repo) => {
                sqlx::query(
                    "SELECT id, repo_url, file_path, content, embedding, indexed_at FROM index_entries WHERE repo_url = ?",
                )
                .bind(repo)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, repo_url, file_path, content, embedding, indexed_at FROM index_entries",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut scored: Vec<ScoredEntry> = rows
            .iter()
            .map(|row| {
                let entry = row_to_entry(row);
                ScoredEntry {
                    distance: cosine_distance(query, &entry.embedding),
                    entry,
                }
            })
            .collect();

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);

        Ok(scored)
    }

    async fn replace_all(&self, repo_url: &str, entries: &[IndexEntry]) -> Result<()> {
        validate_entries(entries, self.dims, Some(repo_url))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM index_entries WHERE repo_url = ?")
            .bind(repo_url)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            insert_entry(&mut *tx, entry).await?;
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit index replacement for {}", repo_url))?;
        Ok(())
    }

    async fn delete_by_path_prefix(&self, repo_url: &str, path_prefix: &str) -> Result<u64> {
        // substr comparison keeps `%` and `_` in paths literal.
        let result = sqlx::query(
            "DELETE FROM index_entries WHERE repo_url = ? AND substr(file_path, 1, length(?)) = ?",
        )
        .bind(repo_url)
        .bind(path_prefix)
        .bind(path_prefix)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_entries(&self, entries: &[IndexEntry]) -> Result<()> {
        validate_entries(entries, self.dims, None)?;

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            insert_entry(&mut *tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
