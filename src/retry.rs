//! Retry coordinator
//!
//! Wraps any `Provider` by composition with exponential backoff, honoring a
//! provider-supplied `Retry-After` when present and giving up immediately on
//! non-retryable failures (`AuthFailed`, `QuotaExceeded`, `InvalidRequest`, ...).

use std::time::Duration;

use thiserror::Error;

use crate::embedder::{CancelToken, Embedding, Provider, ProviderError};

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// `0` means "never retry" and is distinguished from "unset" at the config-merge
    /// layer (§9: `Option`-based override, not a bare default-if-zero check).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{0}")]
    Exhausted(#[source] ProviderError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl RetryError {
    pub fn suggestion(&self) -> &'static str {
        match self {
            RetryError::Exhausted(e) | RetryError::Provider(e) => e.suggestion(),
        }
    }
}

/// Backoff for attempt `n` (0-indexed): `base * 2^n`, capped at `max_delay`, optionally
/// overridden entirely by a provider-supplied `Retry-After`.
fn backoff_for_attempt(cfg: &RetryConfig, attempt: u32, retry_after: Option<u64>) -> Duration {
    if let Some(secs) = retry_after {
        return Duration::from_secs(secs).min(cfg.max_delay);
    }
    let scaled = cfg.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    scaled.min(cfg.max_delay)
}

/// Sleeps for `dur`, returning early with `ProviderError::Cancelled` if `cancel` trips
/// first (§5: "interruptible sleep").
async fn interruptible_sleep(dur: Duration, cancel: &CancelToken) -> Result<(), ProviderError> {
    let sleep = tokio::time::sleep(dur);
    tokio::pin!(sleep);
    let poll_interval = Duration::from_millis(50).min(dur);
    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        tokio::select! {
            _ = &mut sleep => return Ok(()),
            _ = tokio::time::sleep(poll_interval) => {
                if sleep.is_elapsed() {
                    return Ok(());
                }
            }
        }
    }
}

/// Retries a provider operation according to `RetryConfig`, preserving the final
/// failure's cause in `RetryError::Exhausted` rather than swallowing it.
async fn with_retry<T, F, Fut>(cfg: &RetryConfig, cancel: &CancelToken, mut op: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() => return Err(RetryError::Provider(e)),
            Err(e) => {
                if attempt >= cfg.max_retries {
                    return Err(RetryError::Exhausted(e));
                }
                let delay = backoff_for_attempt(cfg, attempt, e.retry_after_secs());
                interruptible_sleep(delay, cancel).await.map_err(RetryError::Provider)?;
                attempt += 1;
            }
        }
    }
}

/// A `Provider` that retries transient failures from an inner provider.
pub struct RetryingProvider {
    inner: Box<dyn Provider>,
    config: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Box<dyn Provider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait::async_trait]
impl Provider for RetryingProvider {
    async fn embed_one(&self, text: &str, cancel: &CancelToken) -> Result<Embedding, ProviderError> {
        with_retry(&self.config, cancel, || self.inner.embed_one(text, cancel))
            .await
            .map_err(|e| match e {
                RetryError::Exhausted(inner) | RetryError::Provider(inner) => inner,
            })
    }

    async fn embed_many(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Embedding>, ProviderError> {
        with_retry(&self.config, cancel, || self.inner.embed_many(texts, cancel))
            .await
            .map_err(|e| match e {
                RetryError::Exhausted(inner) | RetryError::Provider(inner) => inner,
            })
    }

    async fn health(&self) -> Result<(), ProviderError> {
        self.inner.health().await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn context_size(&self) -> usize {
        self.inner.context_size()
    }
}
