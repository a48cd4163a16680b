//! Text-to-vector embedding with ordered fallback.
//!
//! [`EmbeddingChain`] walks a fixed list of providers: remote HTTP backends
//! first, the deterministic [`local::HashEmbeddingProvider`] last. A call
//! starts at the currently pinned provider, advances on failure, and pins
//! to whichever provider succeeds so later calls skip the dead upstreams.
//! Providers that have failed `max_failures` consecutive times are skipped
//! outright — except the last one, which is never skipped, so `embed`
//! cannot fail for lack of a provider, only when every link errors.
//!
//! Successful results land in a bounded FIFO cache keyed by a hash of
//! `(text, length)`.

pub mod local;
pub mod remote;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

/// Trait for embedding backends. Implementations produce vectors of exactly
/// `dimension()` width.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. Implementations may override for batched
    /// inference; the default embeds sequentially.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Per-provider health snapshot, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub consecutive_failures: u32,
    pub pinned: bool,
    pub skipped: bool,
}

/// Bounded FIFO cache of embedding results.
struct EmbeddingCache {
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl EmbeddingCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: Vec<f32>) {
        if self.capacity == 0 || self.entries.contains_key(&key) {
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }
}

/// Ordered provider chain with sticky pinning and a result cache.
pub struct EmbeddingChain {
    providers: Vec<Box<dyn EmbeddingProvider>>,
    /// Index of the provider that last succeeded; calls start here.
    /// Atomic so concurrent embeds cannot race on which link is current.
    pinned: AtomicUsize,
    failures: Vec<AtomicU32>,
    max_failures: u32,
    cache: Mutex<EmbeddingCache>,
    batch_concurrency: usize,
    dimension: usize,
}

impl EmbeddingChain {
    /// Build a chain from explicit providers. All must agree on dimension,
    /// and the list must end with a provider that cannot fail (the caller
    /// is expected to append the local hash fallback).
    pub fn new(
        providers: Vec<Box<dyn EmbeddingProvider>>,
        max_failures: u32,
        cache_size: usize,
        batch_concurrency: usize,
    ) -> Result<Self> {
        let Some(first) = providers.first() else {
            return Err(EngineError::validation("embedding chain must not be empty"));
        };
        let dimension = first.dimension();
        for p in &providers {
            if p.dimension() != dimension {
                return Err(EngineError::validation(format!(
                    "provider '{}' has dimension {}, chain expects {dimension}",
                    p.name(),
                    p.dimension()
                )));
            }
        }
        let failures = providers.iter().map(|_| AtomicU32::new(0)).collect();
        Ok(Self {
            providers,
            pinned: AtomicUsize::new(0),
            failures,
            max_failures,
            cache: Mutex::new(EmbeddingCache::new(cache_size)),
            batch_concurrency: batch_concurrency.max(1),
            dimension,
        })
    }

    /// Build the chain described by config: remote providers in order, with
    /// a local hash fallback appended if the config did not end with one.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut providers: Vec<Box<dyn EmbeddingProvider>> = Vec::new();
        for pc in &config.providers {
            match pc.kind.as_str() {
                "openai" => providers.push(Box::new(remote::OpenAiProvider::new(
                    pc,
                    config.dimension,
                    config.request_timeout_secs,
                )?)),
                "ollama" => providers.push(Box::new(remote::OllamaProvider::new(
                    pc,
                    config.dimension,
                    config.request_timeout_secs,
                )?)),
                "local" => providers.push(Box::new(local::HashEmbeddingProvider::new(
                    config.dimension,
                ))),
                other => {
                    return Err(EngineError::validation(format!(
                        "unknown embedding provider kind: {other}"
                    )))
                }
            }
        }
        let has_local_tail = config
            .providers
            .last()
            .map(|p| p.kind == "local")
            .unwrap_or(false);
        if !has_local_tail {
            providers.push(Box::new(local::HashEmbeddingProvider::new(
                config.dimension,
            )));
        }
        Self::new(
            providers,
            config.max_failures,
            config.cache_size,
            config.batch_concurrency,
        )
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text, consulting the cache first.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = cache_key(text);
        if let Some(hit) = self.cache.lock().expect("cache mutex poisoned").get(&key) {
            return Ok(hit);
        }

        let vector = self.embed_uncached(text).await?;
        self.cache
            .lock()
            .expect("cache mutex poisoned")
            .insert(key, vector.clone());
        Ok(vector)
    }

    /// Embed many texts with bounded provider concurrency, preserving input
    /// order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Materializing the futures up front keeps the combined future Send,
        // which a lazy iterator adapter here defeats.
        let futures: Vec<_> = texts.iter().map(|t| self.embed(t)).collect();
        stream::iter(futures)
            .buffered(self.batch_concurrency)
            .try_collect()
            .await
    }

    async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>> {
        let start = self.pinned.load(Ordering::Acquire).min(self.providers.len() - 1);
        let last_index = self.providers.len() - 1;
        let mut attempted = 0usize;
        let mut last_error: Option<EngineError> = None;

        for i in start..self.providers.len() {
            let provider = &self.providers[i];
            let failure_count = self.failures[i].load(Ordering::Relaxed);
            // The final link is the always-available fallback; never skip it.
            if i != last_index && failure_count >= self.max_failures {
                tracing::debug!(provider = provider.name(), failures = failure_count, "skipping failed provider");
                continue;
            }

            attempted += 1;
            match provider.embed(text).await {
                Ok(vector) => {
                    self.failures[i].store(0, Ordering::Relaxed);
                    self.pinned.store(i, Ordering::Release);
                    return Ok(l2_normalize(vector));
                }
                Err(e) => {
                    self.failures[i].fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(provider = provider.name(), error = %e, "embedding provider failed");
                    last_error = Some(e);
                }
            }
        }

        Err(EngineError::ChainExhausted {
            attempted,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no provider attempted".to_string()),
        })
    }

    /// Failure counters and pin position, for diagnostics.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let pinned = self.pinned.load(Ordering::Acquire);
        let last_index = self.providers.len() - 1;
        self.providers
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let consecutive_failures = self.failures[i].load(Ordering::Relaxed);
                ProviderStatus {
                    name: p.name().to_string(),
                    consecutive_failures,
                    pinned: i == pinned,
                    skipped: i != last_index && consecutive_failures >= self.max_failures,
                }
            })
            .collect()
    }

    /// Reset failure counters and re-pin to the head of the chain.
    pub fn reset(&self) {
        for f in &self.failures {
            f.store(0, Ordering::Relaxed);
        }
        self.pinned.store(0, Ordering::Release);
    }
}

/// Scale a vector to unit length. The stored-distance-to-cosine conversion
/// assumes unit vectors, and remote backends do not all normalize their
/// output. Zero vectors pass through unchanged.
fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Cache key: SHA-256 over the text plus its length.
fn cache_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(text.len().to_le_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Test provider returning a fixed spike vector; can be toggled to fail.
    struct FixedProvider {
        name: &'static str,
        spike: usize,
        failing: AtomicBool,
        calls: std::sync::Arc<AtomicU32>,
    }

    impl FixedProvider {
        fn new(name: &'static str, spike: usize) -> Self {
            Self {
                name,
                spike,
                failing: AtomicBool::new(false),
                calls: std::sync::Arc::new(AtomicU32::new(0)),
            }
        }

        fn failing(name: &'static str, spike: usize) -> Self {
            let p = Self::new(name, spike);
            p.failing.store(true, Ordering::Relaxed);
            p
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn dimension(&self) -> usize {
            8
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.failing.load(Ordering::Relaxed) {
                return Err(EngineError::Provider {
                    provider: self.name.to_string(),
                    message: "forced failure".into(),
                });
            }
            let mut v = vec![0.0f32; 8];
            v[self.spike] = 1.0;
            Ok(v)
        }
    }

    fn chain(providers: Vec<Box<dyn EmbeddingProvider>>) -> EmbeddingChain {
        EmbeddingChain::new(providers, 3, 100, 2).unwrap()
    }

    #[tokio::test]
    async fn healthy_first_provider_is_used() {
        let chain = chain(vec![
            Box::new(FixedProvider::new("a", 0)),
            Box::new(FixedProvider::new("b", 1)),
        ]);
        let v = chain.embed("hello").await.unwrap();
        assert_eq!(v[0], 1.0);
    }

    #[tokio::test]
    async fn failure_advances_and_pins_to_next() {
        let chain = chain(vec![
            Box::new(FixedProvider::failing("a", 0)),
            Box::new(FixedProvider::new("b", 1)),
        ]);

        // First call falls through to b.
        let v = chain.embed("hello").await.unwrap();
        assert_eq!(v[1], 1.0);

        // Chain is now pinned to b; a is not probed again.
        let status = chain.provider_status();
        assert!(status[1].pinned);
        let v = chain.embed("world").await.unwrap();
        assert_eq!(v[1], 1.0);
        assert_eq!(status[0].consecutive_failures, 1);
    }

    #[tokio::test]
    async fn exhausted_chain_returns_aggregated_error() {
        let chain = chain(vec![
            Box::new(FixedProvider::failing("a", 0)),
            Box::new(FixedProvider::failing("b", 1)),
        ]);
        let err = chain.embed("hello").await.unwrap_err();
        match err {
            EngineError::ChainExhausted { attempted, last } => {
                assert_eq!(attempted, 2);
                assert!(last.contains("forced failure"));
            }
            other => panic!("expected ChainExhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn persistent_failures_skip_provider_but_never_the_last() {
        let a = Box::new(FixedProvider::failing("a", 0));
        let b = Box::new(FixedProvider::failing("b", 1));
        let chain = EmbeddingChain::new(vec![a, b], 2, 100, 2).unwrap();

        // Drive provider a past max_failures.
        for _ in 0..3 {
            let _ = chain.embed("x").await;
            chain.pinned.store(0, Ordering::Release);
        }

        let status = chain.provider_status();
        assert!(status[0].skipped);
        // The last provider keeps being attempted no matter how often it fails.
        assert!(!status[1].skipped);
        assert!(status[1].consecutive_failures >= 2);
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let a = FixedProvider::new("a", 0);
        a.failing.store(true, Ordering::Relaxed);
        let chain = chain(vec![Box::new(a), Box::new(FixedProvider::new("b", 1))]);

        let _ = chain.embed("x").await.unwrap();
        chain.reset();
        assert_eq!(chain.provider_status()[0].consecutive_failures, 0);
        assert!(chain.provider_status()[0].pinned);
    }

    #[tokio::test]
    async fn cache_avoids_repeat_provider_calls() {
        let a = FixedProvider::new("a", 0);
        let calls = a.calls.clone();
        let chain = chain(vec![Box::new(a)]);

        let first = chain.embed("same text").await.unwrap();
        let second = chain.embed("same text").await.unwrap();
        assert_eq!(first, second);

        // Only the first call reached the provider.
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cache_evicts_fifo() {
        let mut cache = EmbeddingCache::new(2);
        cache.insert("a".into(), vec![1.0]);
        cache.insert("b".into(), vec![2.0]);
        cache.insert("c".into(), vec![3.0]);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let chain = chain(vec![Box::new(FixedProvider::new("a", 0))]);
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        let vectors = chain.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        for v in vectors {
            assert_eq!(v.len(), 8);
        }
    }

    #[tokio::test]
    async fn batch_future_is_send_across_tasks() {
        let chain = std::sync::Arc::new(chain(vec![Box::new(FixedProvider::new("a", 0))]));
        let texts: Vec<String> = (0..3).map(|i| format!("text {i}")).collect();
        // Spawning requires the whole batch future to be Send.
        let handle = tokio::spawn(async move { chain.embed_batch(&texts).await });
        let vectors = handle.await.unwrap().unwrap();
        assert_eq!(vectors.len(), 3);
    }

    #[tokio::test]
    async fn provider_output_is_normalized_to_unit_length() {
        struct Loud;
        #[async_trait]
        impl EmbeddingProvider for Loud {
            fn name(&self) -> &str {
                "loud"
            }
            fn dimension(&self) -> usize {
                8
            }
            async fn embed(&self, _t: &str) -> Result<Vec<f32>> {
                // Same direction as a unit spike, but norm 2.
                let mut v = vec![0.0f32; 8];
                v[0] = 2.0;
                Ok(v)
            }
        }
        let chain = chain(vec![Box::new(Loud)]);
        let v = chain.embed("x").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn mismatched_provider_dimensions_rejected() {
        struct Wide;
        #[async_trait]
        impl EmbeddingProvider for Wide {
            fn name(&self) -> &str {
                "wide"
            }
            fn dimension(&self) -> usize {
                16
            }
            async fn embed(&self, _t: &str) -> Result<Vec<f32>> {
                Ok(vec![0.0; 16])
            }
        }
        let result = EmbeddingChain::new(
            vec![Box::new(FixedProvider::new("a", 0)), Box::new(Wide)],
            3,
            10,
            2,
        );
        assert!(result.is_err());
    }
}
