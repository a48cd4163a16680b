#![allow(dead_code)]

use std::sync::Arc;

use mnemo::config::SyncConfig;
use mnemo::embedding::local::HashEmbeddingProvider;
use mnemo::embedding::EmbeddingChain;
use mnemo::store::{LocalStore, Record, Source};
use mnemo::sync::SyncPipeline;

pub const DIM: usize = 384;

/// Open a fresh in-memory store with schema applied.
pub fn test_store() -> Arc<LocalStore> {
    Arc::new(LocalStore::in_memory(DIM).unwrap())
}

/// Deterministic embedding with a spike at position `seed`. Distinct seeds
/// produce orthogonal vectors.
pub fn test_embedding(seed: u8) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed as usize % DIM] = 1.0;
    v
}

/// An embedding with high cosine similarity to `base`.
pub fn similar_embedding(base: &[f32]) -> Vec<f32> {
    let mut v = base.to_vec();
    for i in 0..5 {
        v[(i * 37) % DIM] += 0.05;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// A knowledge record with a spiked embedding.
pub fn test_record(content: &str, seed: u8) -> Record {
    Record::new(content, test_embedding(seed), Source::Knowledge)
}

/// A chain with only the deterministic local provider.
pub fn test_chain() -> Arc<EmbeddingChain> {
    Arc::new(
        EmbeddingChain::new(vec![Box::new(HashEmbeddingProvider::new(DIM))], 3, 1000, 4)
            .unwrap(),
    )
}

/// A pipeline over a fresh in-memory store with default sync settings.
/// Returns the store too so tests can inspect what the pipeline wrote.
pub fn test_pipeline() -> (Arc<LocalStore>, SyncPipeline) {
    let store = test_store();
    let pipeline = SyncPipeline::new(store.clone(), test_chain(), SyncConfig::default()).unwrap();
    (store, pipeline)
}
