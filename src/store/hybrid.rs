//! Reciprocal Rank Fusion of the vector and lexical search legs.
//!
//! Both legs are asked for more candidates than the caller wants so the
//! fused ordering has enough overlap to work with. Fusion scores depend
//! only on each leg's rank order, never on its raw score scale, so the
//! cosine and BM25 legs can be combined without normalization. Raw scores
//! are kept on the hits for display and used only to break exact ties.

use std::collections::HashMap;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::store::{Filter, LocalStore, SearchHit, SearchOptions, TextSearchOptions};

/// Parameters for one hybrid search call.
#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub top_k: usize,
    pub filter: Filter,
    pub rrf_k: usize,
    pub vector_weight: f64,
    pub fts_weight: f64,
    /// Floor on cosine similarity for the vector leg.
    pub similarity_threshold: f64,
}

impl HybridOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            top_k: config.default_top_k,
            filter: Filter::default(),
            rrf_k: config.rrf_k,
            vector_weight: config.vector_weight,
            fts_weight: config.fts_weight,
            similarity_threshold: config.similarity_threshold,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Drop the lexical leg; ranking comes from vectors alone.
    pub fn semantic_only(mut self) -> Self {
        self.fts_weight = 0.0;
        self
    }

    /// Drop the vector leg; ranking comes from FTS alone.
    pub fn lexical_only(mut self) -> Self {
        self.vector_weight = 0.0;
        self
    }
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

/// Run both search legs against the store and fuse the results.
///
/// A leg with zero weight is skipped entirely. Legs run over a widened
/// candidate pool of `max(2 * top_k, 20)` so ids that rank mid-list on
/// both legs can still beat ids that rank high on only one.
pub fn hybrid_search(
    store: &LocalStore,
    query_text: &str,
    query_vector: &[f32],
    options: &HybridOptions,
) -> Result<Vec<SearchHit>> {
    let candidates = (options.top_k * 2).max(20);

    let vector_hits = if options.vector_weight > 0.0 {
        store.search(
            query_vector,
            &SearchOptions {
                top_k: candidates,
                threshold: options.similarity_threshold,
                filter: options.filter.clone(),
            },
        )?
    } else {
        Vec::new()
    };

    let fts_hits = if options.fts_weight > 0.0 {
        store.search_text(
            query_text,
            &TextSearchOptions {
                top_k: candidates,
                filter: options.filter.clone(),
            },
        )?
    } else {
        Vec::new()
    };

    let mut fused = rrf_fuse(
        vector_hits,
        fts_hits,
        options.rrf_k,
        options.vector_weight,
        options.fts_weight,
    );
    fused.truncate(options.top_k);
    Ok(fused)
}

/// Fuse two ranked lists with weighted Reciprocal Rank Fusion.
///
/// Each id scores `sum(weight / (k + rank))` over the legs that returned
/// it, with rank starting at 1. Ties on the fused score break toward the
/// higher weighted raw score, then lexicographic id for determinism.
pub fn rrf_fuse(
    vector_hits: Vec<SearchHit>,
    fts_hits: Vec<SearchHit>,
    k: usize,
    vector_weight: f64,
    fts_weight: f64,
) -> Vec<SearchHit> {
    struct Fused {
        hit: SearchHit,
        rrf: f64,
        raw: f64,
    }

    let mut by_id: HashMap<String, Fused> = HashMap::new();

    for (rank, hit) in vector_hits.into_iter().enumerate() {
        let contribution = vector_weight / (k + rank + 1) as f64;
        let raw = vector_weight * hit.score;
        let vector_score = hit.vector_score.or(Some(hit.score));
        let entry = by_id.entry(hit.id.clone()).or_insert(Fused {
            hit,
            rrf: 0.0,
            raw: 0.0,
        });
        entry.rrf += contribution;
        entry.raw += raw;
        entry.hit.vector_score = vector_score;
    }

    for (rank, hit) in fts_hits.into_iter().enumerate() {
        let contribution = fts_weight / (k + rank + 1) as f64;
        let raw = fts_weight * hit.score;
        let fts_score = hit.fts_score.or(Some(hit.score));
        let entry = by_id.entry(hit.id.clone()).or_insert(Fused {
            hit,
            rrf: 0.0,
            raw: 0.0,
        });
        entry.rrf += contribution;
        entry.raw += raw;
        entry.hit.fts_score = fts_score;
    }

    let mut fused: Vec<Fused> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.rrf
            .partial_cmp(&a.rrf)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.raw
                    .partial_cmp(&a.raw)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.hit.id.cmp(&b.hit.id))
    });

    fused
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            let mut hit = f.hit;
            hit.score = f.rrf;
            hit.fused_rank = Some(i + 1);
            hit
        })
        .collect()
}
