//! Embedding providers and the retrying wrapper.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`DisabledEmbedder`]**: always fails; used when `embedding.provider = "disabled"`.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on an Ollama instance.
//! - **[`OpenAiEmbedder`]**: `POST {url}/v1/embeddings` with `OPENAI_API_KEY`.
//!
//! Providers make exactly one HTTP call per `embed` and classify the
//! failure: HTTP 429, 5xx and network errors are
//! [`EmbeddingError::Retryable`], other 4xx and malformed bodies are
//! [`EmbeddingError::Fatal`]. Retrying is the job of [`ResilientEmbedder`].
//!
//! # Retry Strategy
//!
//! [`ResilientEmbedder`] makes up to `max_attempts` calls. After failed
//! attempt `n` it sleeps `base_delay * n` (linear: 5s, 10s, ... with the
//! default base). Fatal errors are returned immediately. When every
//! attempt fails the result is [`EmbeddingError::Exhausted`] carrying the
//! last underlying error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use repolens_core::embedding::{check_dims, Embedder, EmbeddingError};

use crate::config::EmbeddingConfig;

/// Text embedded by [`warm_up`].
pub const WARM_UP_TEXT: &str = "model warmup test";

/// Build the provider named by `config.provider`, wrapped with retry.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let policy = RetryPolicy::from_config(config);
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        "ollama" => Arc::new(ResilientEmbedder::new(OllamaEmbedder::new(config)?, policy)),
        "openai" => Arc::new(ResilientEmbedder::new(OpenAiEmbedder::new(config)?, policy)),
        "disabled" => Arc::new(DisabledEmbedder::new(config.dims)),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(embedder)
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Map a non-success HTTP status to an [`EmbeddingError`].
pub fn classify_status(provider: &str, status: u16, body: &str) -> EmbeddingError {
    let message = format!("{} API error {}: {}", provider, status, body);
    if status == 429 || (500..600).contains(&status) {
        EmbeddingError::Retryable(message)
    } else {
        EmbeddingError::Fatal(message)
    }
}

async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, EmbeddingError> {
    let response = request
        .send()
        .await
        .map_err(|e| EmbeddingError::Retryable(format!("{} connection error: {}", provider, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(provider, status.as_u16(), &body));
    }

    response
        .json()
        .await
        .map_err(|e| EmbeddingError::Fatal(format!("{} returned invalid JSON: {}", provider, e)))
}

fn json_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|items| items.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

// ============ Disabled ============

/// Provider that refuses every request.
pub struct DisabledEmbedder {
    dims: usize,
}

impl DisabledEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Fatal(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Ollama ============

/// Embedding provider backed by an Ollama instance
/// (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http_client(config)?,
            url: url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body);
        let json = post_json("Ollama", request).await?;
        let vector = parse_ollama_response(&json)?;
        check_dims(&vector, self.dims)?;
        Ok(vector)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .and_then(json_vector)
        .ok_or_else(|| {
            EmbeddingError::Fatal("Invalid Ollama response: missing embeddings array".to_string())
        })
}

// ============ OpenAI ============

/// Embedding provider using the OpenAI embeddings API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    /// # Errors
    ///
    /// Fails if `OPENAI_API_KEY` is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            client: http_client(config)?,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = post_json("OpenAI", request).await?;
        let vector = parse_openai_response(&json)?;
        check_dims(&vector, self.dims)?;
        Ok(vector)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    json.get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(json_vector)
        .ok_or_else(|| {
            EmbeddingError::Fatal("Invalid OpenAI response: missing data[0].embedding".to_string())
        })
}

// ============ Retry ============

/// Bounded linear-backoff retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.backoff_base(),
        }
    }

    /// Sleep after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Wraps an [`Embedder`] with bounded retry.
pub struct ResilientEmbedder<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: Embedder> ResilientEmbedder<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

/// Issue one embedding call to absorb model cold-start latency.
///
/// Failures are logged and reported as `false`; they never abort a batch.
pub async fn warm_up(embedder: &dyn Embedder) -> bool {
    match embedder.embed(WARM_UP_TEXT).await {
        Ok(_) => {
            tracing::debug!(model = embedder.model_name(), "Embedding model warmed up");
            true
        }
        Err(e) => {
            tracing::warn!(model = embedder.model_name(), error = %e, "Embedding warm-up failed");
            false
        }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for ResilientEmbedder<E> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut last = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.inner.embed(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Embedding attempt failed"
                    );
                    last = Some(e);
                }
            }
            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay_after(attempt)).await;
            }
        }

        Err(EmbeddingError::Exhausted {
            attempts: self.policy.max_attempts,
            last: Box::new(
                last.unwrap_or_else(|| EmbeddingError::Fatal("no attempts made".to_string())),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails with the scripted errors, then succeeds.
    struct ScriptedEmbedder {
        failures: Mutex<Vec<EmbeddingError>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedEmbedder {
        fn new(failures: Vec<EmbeddingError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Embedder for ScriptedEmbedder {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.lock().unwrap().push(Instant::now());
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(vec![1.0, 0.0])
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn transient(n: usize) -> Vec<EmbeddingError> {
        (0..n)
            .map(|i| EmbeddingError::Retryable(format!("timeout {}", i + 1)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_linear_backoff() {
        let embedder = ResilientEmbedder::new(ScriptedEmbedder::new(transient(2)), RetryPolicy::default());

        let vector = embedder.embed("fn main() {}").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);

        let calls = embedder.inner().call_times();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(5));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error() {
        let embedder = ResilientEmbedder::new(ScriptedEmbedder::new(transient(5)), RetryPolicy::default());
        let start = Instant::now();

        let err = embedder.embed("x").await.unwrap_err();
        assert_eq!(
            err,
            EmbeddingError::Exhausted {
                attempts: 3,
                last: Box::new(EmbeddingError::Retryable("timeout 3".to_string())),
            }
        );
        assert_eq!(embedder.inner().call_times().len(), 3);
        // No sleep after the final attempt.
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_are_not_retried() {
        let embedder = ResilientEmbedder::new(
            ScriptedEmbedder::new(vec![EmbeddingError::Fatal("401".to_string())]),
            RetryPolicy::default(),
        );
        let err = embedder.embed("x").await.unwrap_err();
        assert_eq!(err, EmbeddingError::Fatal("401".to_string()));
        assert_eq!(embedder.inner().call_times().len(), 1);
    }

    #[tokio::test]
    async fn test_warm_up_failure_is_not_fatal() {
        let disabled = DisabledEmbedder::new(3);
        assert!(!warm_up(&disabled).await);

        let ok = ScriptedEmbedder::new(vec![]);
        assert!(warm_up(&ok).await);
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status("Ollama", 429, "").is_retryable());
        assert!(classify_status("Ollama", 503, "").is_retryable());
        assert!(!classify_status("Ollama", 400, "bad").is_retryable());
        assert!(!classify_status("OpenAI", 401, "").is_retryable());
    }

    #[test]
    fn test_parse_responses() {
        let ollama = serde_json::json!({ "embeddings": [[0.5, -1.0]] });
        assert_eq!(parse_ollama_response(&ollama).unwrap(), vec![0.5, -1.0]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());

        let openai = serde_json::json!({ "data": [{ "index": 0, "embedding": [0.25, 0.75] }] });
        assert_eq!(parse_openai_response(&openai).unwrap(), vec![0.25, 0.75]);
        assert!(parse_openai_response(&serde_json::json!({ "data": [] })).is_err());
    }

    #[test]
    fn test_create_embedder_by_provider() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            dims: 4,
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        assert_eq!(embedder.dims(), 4);

        let ollama = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(ollama.model_name(), "nomic-embed-text");

        let unknown = EmbeddingConfig {
            provider: "magic".to_string(),
            ..Default::default()
        };
        assert!(create_embedder(&unknown).is_err());
    }
}
