mod helpers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use helpers::{test_chain, test_embedding, test_record, test_store};
use mnemo::config::{MnemoConfig, SyncConfig};
use mnemo::decay::DecayView;
use mnemo::error::{EngineError, Result};
use mnemo::facade::{BackendMode, MemoryEngine, RemoteStore, SearchRequest};
use mnemo::store::types::{RecordMetadata, Source};
use mnemo::store::{LocalStore, Record, SearchHit};
use mnemo::sync::SyncPipeline;

/// Remote backend with scriptable behavior.
struct FakeRemote {
    hits: Vec<SearchHit>,
    delay: Duration,
    fail: bool,
}

impl FakeRemote {
    fn returning(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            delay: Duration::ZERO,
            fail: false,
        }
    }

    fn slow(hits: Vec<SearchHit>, delay: Duration) -> Self {
        Self {
            hits,
            delay,
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            hits: Vec::new(),
            delay: Duration::ZERO,
            fail: true,
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchHit>> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(EngineError::Provider {
                provider: "remote-store".into(),
                message: "connection refused".into(),
            });
        }
        Ok(self.hits.clone())
    }

    async fn upsert(&self, _record: &Record) -> Result<()> {
        if self.fail {
            return Err(EngineError::Provider {
                provider: "remote-store".into(),
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn delete(&self, _id: &str) -> Result<bool> {
        Ok(true)
    }
}

fn remote_hit(id: &str, content: &str, score: f64) -> SearchHit {
    SearchHit {
        id: id.to_string(),
        content: content.to_string(),
        metadata: RecordMetadata::new(Source::Knowledge),
        score,
        vector_score: None,
        fts_score: None,
        fused_rank: None,
    }
}

fn engine_with(
    store: Arc<LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    mode: BackendMode,
    mut config: MnemoConfig,
) -> MemoryEngine {
    config.facade.remote_timeout_ms = 200;
    let chain = test_chain();
    let pipeline =
        Arc::new(SyncPipeline::new(store.clone(), chain.clone(), SyncConfig::default()).unwrap());
    MemoryEngine::from_parts(store, chain, pipeline, remote, mode, config)
}

async fn seed_local(engine: &MemoryEngine, content: &str, seed: u8) -> String {
    let record = Record::new(content, test_embedding(seed), Source::Knowledge);
    engine.upsert(&record).await.unwrap();
    record.id
}

#[tokio::test]
async fn timed_out_remote_leg_yields_local_results() {
    let store = test_store();
    let remote = FakeRemote::slow(
        vec![remote_hit("r1", "remote result", 0.9)],
        Duration::from_secs(5),
    );
    let engine = engine_with(
        store,
        Some(Arc::new(remote)),
        BackendMode::Hybrid,
        MnemoConfig::default(),
    );

    seed_local(&engine, "local memory about retrieval", 1).await;

    let response = engine
        .search(&SearchRequest {
            query: "memory retrieval".to_string(),
            top_k: Some(10),
            ..Default::default()
        })
        .await
        .unwrap();

    // The slow leg contributed nothing, but the call still succeeded.
    assert_eq!(response.unavailable, vec!["remote".to_string()]);
    assert!(response.hits.iter().all(|h| h.id != "r1"));
    assert!(!response.hits.is_empty());
}

#[tokio::test]
async fn failed_remote_leg_is_not_fatal_in_hybrid_mode() {
    let store = test_store();
    let engine = engine_with(
        store,
        Some(Arc::new(FakeRemote::failing())),
        BackendMode::Hybrid,
        MnemoConfig::default(),
    );

    seed_local(&engine, "still searchable locally", 2).await;

    let response = engine
        .search(&SearchRequest {
            query: "searchable locally".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.unavailable, vec!["remote".to_string()]);
    assert!(!response.hits.is_empty());
}

#[tokio::test]
async fn remote_failure_is_fatal_in_remote_only_mode() {
    let store = test_store();
    let engine = engine_with(
        store,
        Some(Arc::new(FakeRemote::failing())),
        BackendMode::Remote,
        MnemoConfig::default(),
    );

    let result = engine
        .search(&SearchRequest {
            query: "anything".to_string(),
            ..Default::default()
        })
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn merged_results_deduplicate_across_backends() {
    let store = test_store();
    // The remote copy of the same content carries a higher score.
    let remote = FakeRemote::returning(vec![remote_hit(
        "remote-copy",
        "The Rust Borrow Checker",
        10.0,
    )]);
    let engine = engine_with(
        store,
        Some(Arc::new(remote)),
        BackendMode::Hybrid,
        MnemoConfig::default(),
    );

    seed_local(&engine, "the rust borrow checker", 3).await;

    let response = engine
        .search(&SearchRequest {
            query: "rust borrow checker".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let copies: Vec<&SearchHit> = response
        .hits
        .iter()
        .filter(|h| h.content.to_lowercase().starts_with("the rust borrow"))
        .collect();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].id, "remote-copy");
}

#[tokio::test]
async fn record_access_raises_confidence_of_decayed_memory() {
    let store = test_store();
    let engine = engine_with(store, None, BackendMode::Local, MnemoConfig::default());

    let id = seed_local(&engine, "a fact worth reinforcing", 4).await;

    // Backdate the last access so real decay has occurred.
    let old = Utc::now() - ChronoDuration::days(14);
    engine
        .store()
        .apply_access(&DecayView {
            id: id.clone(),
            confidence: 1.0,
            access_count: 0,
            created_at: old,
            last_accessed: old,
        })
        .unwrap();

    let before = engine.store().decay_view(&id).unwrap().unwrap();
    assert!(engine.record_access(&id).unwrap());
    let after = engine.store().decay_view(&id).unwrap().unwrap();

    assert_eq!(after.access_count, before.access_count + 1);
    assert!(after.last_accessed > before.last_accessed);
    // Reinforcement recovers part of the decayed confidence; with 14 days
    // elapsed at a 7-day half-life, current is 0.25 and the stored value
    // afterwards must exceed it.
    assert!(after.confidence > 0.25);
    assert!(after.confidence <= 1.0);
}

#[tokio::test]
async fn cleanup_removes_only_fully_decayed_memories() {
    let store = test_store();
    let engine = engine_with(store, None, BackendMode::Local, MnemoConfig::default());

    let fresh = seed_local(&engine, "fresh memory", 5).await;
    let stale = seed_local(&engine, "stale memory", 6).await;

    // 60 days at a 7-day half-life puts confidence near 0.003, well under
    // the 0.05 cleanup threshold.
    let old = Utc::now() - ChronoDuration::days(60);
    engine
        .store()
        .apply_access(&DecayView {
            id: stale.clone(),
            confidence: 1.0,
            access_count: 0,
            created_at: old,
            last_accessed: old,
        })
        .unwrap();

    let report = engine.cleanup().unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.removed, 1);
    assert!(engine.store().get(&fresh).unwrap().is_some());
    assert!(engine.store().get(&stale).unwrap().is_none());
}

#[tokio::test]
async fn rag_context_respects_token_budget() {
    let store = test_store();
    let engine = engine_with(store, None, BackendMode::Local, MnemoConfig::default());

    for i in 0..5u8 {
        let content = format!("note {i}: {}", "rust async runtime details ".repeat(10));
        let record = Record::new(content, test_embedding(i), Source::Knowledge);
        engine.upsert(&record).await.unwrap();
    }

    let context = engine.get_rag_context("rust async runtime", 120).await.unwrap();
    assert!(context.used_tokens <= 120);
    assert!(!context.chunks.is_empty());
    assert_eq!(context.token_budget, 120);
}

#[tokio::test]
async fn remote_mirror_failure_keeps_local_write() {
    let store = test_store();
    let engine = engine_with(
        store,
        Some(Arc::new(FakeRemote::failing())),
        BackendMode::Hybrid,
        MnemoConfig::default(),
    );

    let record = test_record("written despite remote failure", 7);
    engine.upsert(&record).await.unwrap();
    assert!(engine.store().get(&record.id).unwrap().is_some());
}
