//! Context assembly: turn a change-set into a deduplicated retrieval bundle.
//!
//! For every changed file the diff markup is stripped, the clean text is
//! chunked, each chunk is embedded as `"File: <path>\n<chunk>"` and the
//! `top_k` nearest entries of the same repository are collected. Results
//! are deduplicated on `(file_path, content)` and rendered as
//!
//! ```text
//! File: <path>
//! Code:
//! <content>
//! ```
//!
//! blocks separated by a blank line, in first-retrieved order. When nothing
//! is found the bundle is the [`NO_CONTEXT_FOUND`] sentinel, never an empty
//! string.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::changeset::FileDiff;
use crate::chunk::{split_text, ChunkingConfig};
use crate::embedding::Embedder;
use crate::models::{path_extension, IndexEntry};
use crate::store::IndexStore;

/// Bundle returned when no related entries exist.
pub const NO_CONTEXT_FOUND: &str = "No existing contextual files found in the database.";

/// Bundle returned when retrieval itself failed.
pub const CONTEXT_RETRIEVAL_FAILED: &str = "Context retrieval failed.";

/// Retrieval parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ContextOptions {
    /// Nearest entries fetched per chunk query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Chunking applied to the cleaned diff text.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Extensions (lowercase, no dot) of files never embedded.
    #[serde(default = "default_skip_extensions")]
    pub skip_extensions: Vec<String>,
}

fn default_top_k() -> usize {
    5
}

/// Binary-looking extensions skipped by delta sync and context assembly.
pub fn default_skip_extensions() -> Vec<String> {
    [
        "png", "jpg", "jpeg", "gif", "ico", "svg", "bmp", "webp", "jar", "class", "zip", "gz",
        "tar", "pdf", "exe", "dll", "so", "dylib", "bin", "woff", "woff2", "ttf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            chunking: ChunkingConfig::default(),
            skip_extensions: default_skip_extensions(),
        }
    }
}

/// Whether `path` has one of the `skip` extensions.
pub fn has_skipped_extension(path: &str, skip: &[String]) -> bool {
    match path_extension(path) {
        Some(ext) => skip.iter().any(|s| s.eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

/// Strip diff-only markup from a unified diff.
///
/// Removes `+`/`-` line prefixes, hunk headers (`@@ ... @@`, keeping any
/// trailing section text), "no newline" markers and file headers that
/// precede the first hunk.
pub fn clean_diff(diff: &str) -> String {
    let mut out = Vec::new();
    let mut in_hunk = false;

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("@@") {
            in_hunk = true;
            let tail = rest.find("@@").map(|i| &rest[i + 2..]).unwrap_or("");
            let tail = tail.trim();
            if !tail.is_empty() {
                out.push(tail.to_string());
            }
            continue;
        }
        if !in_hunk
            && (line.starts_with("diff --git")
                || line.starts_with("index ")
                || line.starts_with("--- ")
                || line.starts_with("+++ "))
        {
            continue;
        }
        if line.starts_with("\\ ") {
            continue;
        }
        let body = line
            .strip_prefix('+')
            .or_else(|| line.strip_prefix('-'))
            .unwrap_or(line);
        out.push(body.to_string());
    }

    out.join("\n").trim().to_string()
}

/// Render entries as the context bundle, or the sentinel when empty.
pub fn format_bundle(entries: &[IndexEntry]) -> String {
    if entries.is_empty() {
        return NO_CONTEXT_FOUND.to_string();
    }
    entries
        .iter()
        .map(|e| format!("File: {}\nCode:\n{}", e.file_path, e.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Collect the entries related to `diffs`, deduplicated on path + content.
pub async fn related_entries(
    diffs: &[FileDiff],
    repo_url: &str,
    embedder: &dyn Embedder,
    store: &dyn IndexStore,
    options: &ContextOptions,
) -> Result<Vec<IndexEntry>> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut unique = Vec::new();

    for diff in diffs {
        if diff.deleted_file {
            continue;
        }
        let text = match diff.diff.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => continue,
        };
        let path = match diff.path() {
            Some(p) => p,
            None => continue,
        };
        if has_skipped_extension(path, &options.skip_extensions) {
            tracing::debug!(path, "Skipping binary-looking file in context assembly");
            continue;
        }

        let clean = clean_diff(text);
        for segment in split_text(&clean, &options.chunking) {
            let query = format!("File: {}\n{}", path, segment);
            let vector = embedder
                .embed(&query)
                .await
                .with_context(|| format!("Failed to embed diff of {}", path))?;
            let hits = store
                .find_similar(&vector, options.top_k, Some(repo_url))
                .await?;
            for hit in hits {
                let key = (hit.entry.file_path.clone(), hit.entry.content.clone());
                if seen.insert(key) {
                    unique.push(hit.entry);
                }
            }
        }
    }

    Ok(unique)
}

/// Build the formatted context bundle for `diffs`.
pub async fn assemble_context(
    diffs: &[FileDiff],
    repo_url: &str,
    embedder: &dyn Embedder,
    store: &dyn IndexStore,
    options: &ContextOptions,
) -> Result<String> {
    let entries = related_entries(diffs, repo_url, embedder, store, options).await?;
    tracing::debug!(repo = repo_url, related = entries.len(), "Assembled context");
    Ok(format_bundle(&entries))
}
