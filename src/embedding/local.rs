//! Deterministic local fallback embedding.
//!
//! Hashes tokens into a fixed-width vector and L2-normalizes the result.
//! The output is nowhere near a learned model's quality, but it is
//! deterministic, dependency-free, and never fails — which is exactly what
//! the last link of the provider chain needs.

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::error::Result;

/// Token-hashing embedding provider. Always succeeds.
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let h = fnv1a_64(token.as_bytes());
            let idx = (h % self.dimension as u64) as usize;
            // A second hash decides the sign so common tokens don't all
            // pile up positive mass in low dimensions.
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &str {
        "local-hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

/// Lower-cased alphanumeric runs.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// FNV-1a, inlined for stability across Rust releases (std's hasher makes
/// no such guarantee).
fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let provider = HashEmbeddingProvider::new(384);
        let a = provider.embed("the quick brown fox").await.unwrap();
        let b = provider.embed("the quick brown fox").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn embedding_is_normalized() {
        let provider = HashEmbeddingProvider::new(384);
        let v = provider.embed("some text with several words").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_texts_differ() {
        let provider = HashEmbeddingProvider::new(384);
        let a = provider.embed("rust borrow checker").await.unwrap();
        let b = provider.embed("python garbage collector").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn empty_text_is_zero_vector() {
        let provider = HashEmbeddingProvider::new(16);
        let v = provider.embed("").await.unwrap();
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn fnv_matches_known_vector() {
        // Reference value for "a" from the FNV-1a specification.
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
    }
}
