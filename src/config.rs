//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] validates cross-field invariants after parsing.
//!
//! ```toml
//! [db]
//! path = "./data/repolens.sqlite"
//!
//! [chunking]
//! max_tokens = 512
//! overlap_tokens = 100
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [ingest]
//! on_embedding_failure = "abort"
//!
//! [delta]
//! mode = "api"
//!
//! [hosting]
//! api_url = "https://gitlab.com"
//! ```

use anyhow::{Context, Result};
use repolens_core::chunk::ChunkingConfig;
use repolens_core::context::{default_skip_extensions, ContextOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub delta: DeltaConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub hosting: HostingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Provider base URL. Defaults per provider when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_true")]
    pub warm_up: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            url: None,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            warm_up: true,
        }
    }
}

impl EmbeddingConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}

/// What full ingestion does when a chunk's embedding is exhausted.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingFailurePolicy {
    /// Fail the whole job; the stored index is left untouched.
    #[default]
    Abort,
    /// Log and drop the chunk, keep going.
    SkipChunk,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// File extensions (no dot, case-insensitive) that are indexed.
    #[serde(default = "default_include_extensions")]
    pub include_extensions: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub on_embedding_failure: EmbeddingFailurePolicy,
    /// Username sent with a token when the caller gives none.
    #[serde(default = "default_username")]
    pub default_username: String,
    /// Parent of job-scoped working copies. OS temp dir when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_extensions: default_include_extensions(),
            exclude_globs: default_exclude_globs(),
            max_file_bytes: default_max_file_bytes(),
            on_embedding_failure: EmbeddingFailurePolicy::default(),
            default_username: default_username(),
            work_dir: None,
        }
    }
}

fn default_include_extensions() -> Vec<String> {
    [
        "java", "kt", "kts", "scala", "groovy", "rs", "go", "py", "rb", "php", "js", "jsx", "ts",
        "tsx", "c", "h", "cc", "cpp", "hpp", "cs", "swift", "m", "sql", "sh", "xml", "yml", "yaml",
        "toml", "json", "properties", "gradle", "md", "html", "css", "scss", "vue",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_exclude_globs() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ]
}
fn default_max_file_bytes() -> u64 {
    1_000_000
}
fn default_username() -> String {
    "oauth2".to_string()
}

/// How delta sync reads the content of updated files.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMode {
    /// Raw files from the hosting API at a resolved commit.
    #[default]
    Api,
    /// Depth-1 single-branch clone of the target ref.
    ShallowClone,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeltaConfig {
    #[serde(default)]
    pub mode: DeltaMode,
    #[serde(default = "default_skip_extensions")]
    pub skip_extensions: Vec<String>,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            mode: DeltaMode::default(),
            skip_extensions: default_skip_extensions(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReadinessConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_attempts: default_poll_attempts(),
        }
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_poll_attempts() -> u32 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostingConfig {
    /// Base URL of the GitLab instance, e.g. `https://gitlab.com`.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token_env: default_token_env(),
        }
    }
}

impl HostingConfig {
    /// The API token, if the configured environment variable is set.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

fn default_token_env() -> String {
    "GITLAB_TOKEN".to_string()
}

impl Config {
    /// Retrieval parameters for context assembly.
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            top_k: self.retrieval.top_k,
            chunking: self.chunking.clone(),
            skip_extensions: self.delta.skip_extensions.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    if config.chunking.max_chunks == 0 {
        anyhow::bail!("chunking.max_chunks must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.max_attempts == 0 {
        anyhow::bail!("embedding.max_attempts must be >= 1");
    }

    if config.readiness.max_attempts == 0 {
        anyhow::bail!("readiness.max_attempts must be >= 1");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.jobs.max_concurrent == 0 {
        anyhow::bail!("jobs.max_concurrent must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(config.chunking, ChunkingConfig::default());
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(config.embedding.max_attempts, 3);
        assert_eq!(config.embedding.backoff_base(), Duration::from_secs(5));
        assert_eq!(config.ingest.on_embedding_failure, EmbeddingFailurePolicy::Abort);
        assert_eq!(config.ingest.default_username, "oauth2");
        assert_eq!(config.delta.mode, DeltaMode::Api);
        assert!(config.delta.skip_extensions.contains(&"png".to_string()));
        assert_eq!(config.readiness.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.readiness.max_attempts, 120);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.jobs.max_concurrent, 4);
        assert_eq!(config.hosting.token_env, "GITLAB_TOKEN");
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = parse_config(
            r#"
            [db]
            path = "x.sqlite"

            [chunking]
            max_tokens = 64
            overlap_tokens = 8

            [ingest]
            on_embedding_failure = "skip_chunk"
            include_extensions = ["rs"]

            [delta]
            mode = "shallow_clone"

            [retrieval]
            top_k = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_tokens, 64);
        assert_eq!(config.chunking.min_chunk_tokens, 5);
        assert_eq!(
            config.ingest.on_embedding_failure,
            EmbeddingFailurePolicy::SkipChunk
        );
        assert_eq!(config.ingest.include_extensions, vec!["rs".to_string()]);
        assert_eq!(config.delta.mode, DeltaMode::ShallowClone);
        assert_eq!(config.context_options().top_k, 3);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            "[chunking]\nmax_tokens = 0",
            "[chunking]\nmax_tokens = 10\noverlap_tokens = 10",
            "[chunking]\nmax_chunks = 0",
            "[embedding]\nprovider = \"magic\"",
            "[embedding]\ndims = 0",
            "[embedding]\nmax_attempts = 0",
            "[readiness]\nmax_attempts = 0",
            "[retrieval]\ntop_k = 0",
            "[jobs]\nmax_concurrent = 0",
            "[delta]\nmode = \"rsync\"",
        ];
        for case in cases {
            let doc = format!("[db]\npath = \"x.sqlite\"\n{}\n", case);
            assert!(parse_config(&doc).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/repolens.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/repolens.example.toml")).unwrap();
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.hosting.token_env, "GITLAB_TOKEN");
        assert!(config.ingest.include_extensions.contains(&"java".to_string()));
    }
}
