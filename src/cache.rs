//! Embedding cache
//!
//! Wraps any `Provider` by composition, not inheritance: `CachingProvider` holds a
//! `Box<dyn Provider>` and is itself a `Provider`, so callers can stack it transparently
//! in front of the retry coordinator or any backend.

use std::sync::Mutex;

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::embedder::{CancelToken, Embedding, Provider, ProviderError};

/// Hit/miss counters exposed for `pommel status`/`pommel doctor`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    cache: LruCache<String, Embedding>,
    stats: CacheStats,
}

/// Bounded LRU cache keyed by exact chunk text, fronting any embedding provider.
///
/// Keying is exact-text, not semantic or normalized: identical chunk content across
/// files (a common case for generated code, vendored copies, or boilerplate) shares one
/// cache entry and one provider call.
pub struct CachingProvider {
    inner: Mutex<Inner>,
    provider: Box<dyn Provider>,
}

impl CachingProvider {
    pub fn new(provider: Box<dyn Provider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            inner: Mutex::new(Inner {
                cache: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
            provider,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("cache lock poisoned").stats
    }

    fn get(&self, key: &str) -> Option<Embedding> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        match inner.cache.get(key).cloned() {
            Some(v) => {
                inner.stats.hits += 1;
                Some(v)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    fn put(&self, key: String, value: Embedding) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.cache.put(key, value);
    }
}

#[async_trait::async_trait]
impl Provider for CachingProvider {
    async fn embed_one(&self, text: &str, cancel: &CancelToken) -> Result<Embedding, ProviderError> {
        if let Some(hit) = self.get(text) {
            return Ok(hit);
        }
        let embedding = self.provider.embed_one(text, cancel).await?;
        self.put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    async fn embed_many(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Embedding>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Option<Embedding>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<(usize, String)> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match self.get(text) {
                Some(hit) => results.push(Some(hit)),
                None => {
                    results.push(None);
                    misses.push((i, text.clone()));
                }
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|(_, t)| t.clone()).collect();
            let fetched = self.provider.embed_many(&miss_texts, cancel).await?;
            if fetched.len() != misses.len() {
                return Err(ProviderError::InvalidResponse(format!(
                    "provider returned {} embeddings for {} inputs",
                    fetched.len(),
                    misses.len()
                )));
            }
            for ((idx, text), embedding) in misses.into_iter().zip(fetched.into_iter()) {
                self.put(text, embedding.clone());
                results[idx] = Some(embedding);
            }
        }

        Ok(results.into_iter().map(|r| r.expect("every slot filled")).collect())
    }

    async fn health(&self) -> Result<(), ProviderError> {
        self.provider.health().await
    }

    fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    fn context_size(&self) -> usize {
        self.provider.context_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Provider for CountingProvider {
        async fn embed_one(&self, text: &str, _cancel: &CancelToken) -> Result<Embedding, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Embedding::new(vec![text.len() as f32]))
        }

        async fn embed_many(
            &self,
            texts: &[String],
            _cancel: &CancelToken,
        ) -> Result<Vec<Embedding>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| Embedding::new(vec![t.len() as f32])).collect())
        }

        async fn health(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        fn model_name(&self) -> &str {
            "counting"
        }

        fn dimensions(&self) -> usize {
            1
        }

        fn context_size(&self) -> usize {
            1000
        }
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_provider_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachingProvider::new(
            Box::new(CountingProvider { calls: calls.clone() }),
            10,
        );
        let cancel = CancelToken::new();

        cache.embed_one("hello", &cancel).await.unwrap();
        cache.embed_one("hello", &cancel).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_cache_eviction_at_capacity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachingProvider::new(
            Box::new(CountingProvider { calls: calls.clone() }),
            1,
        );
        let cancel = CancelToken::new();

        cache.embed_one("a", &cancel).await.unwrap();
        cache.embed_one("b", &cancel).await.unwrap();
        // "a" was evicted when "b" was inserted (capacity 1)
        cache.embed_one("a", &cancel).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_embed_many_mixes_hits_and_misses_preserving_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachingProvider::new(
            Box::new(CountingProvider { calls: calls.clone() }),
            10,
        );
        let cancel = CancelToken::new();

        cache.embed_one("aa", &cancel).await.unwrap();
        let batch = vec!["aa".to_string(), "bbb".to_string(), "c".to_string()];
        let results = cache.embed_many(&batch, &cancel).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_slice(), &[2.0]);
        assert_eq!(results[1].as_slice(), &[3.0]);
        assert_eq!(results[2].as_slice(), &[1.0]);
        // one call for the initial single embed, one for the batch of two misses
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_embed_many_empty_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = CachingProvider::new(Box::new(CountingProvider { calls: calls.clone() }), 10);
        let out = cache.embed_many(&[], &CancelToken::new()).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
