//! Unified engine façade.
//!
//! [`MemoryEngine`] is the one entry point consumers hold: it owns the
//! store, the embedding chain, and the sync pipeline, and fans a search
//! out across the configured backends. Each search leg runs under its own
//! timeout; a slow or failed leg contributes nothing instead of failing
//! the call, except in remote-only mode where the remote leg is all there
//! is. Every public method returns plain serializable types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::MnemoConfig;
use crate::decay;
use crate::embedding::EmbeddingChain;
use crate::error::{EngineError, Result};
use crate::store::hybrid::{self, HybridOptions};
use crate::store::{Filter, LocalStore, Record, SearchHit, StoreStats};
use crate::sync::watcher::{self, WatcherHandle};
use crate::sync::{SyncPipeline, SyncReport};

// ── Backend selection ─────────────────────────────────────────────────────

/// Which backends a query or write touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Local,
    Remote,
    Hybrid,
}

impl FromStr for BackendMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(EngineError::validation(format!(
                "unknown facade mode: {other}"
            ))),
        }
    }
}

// ── Remote backend ────────────────────────────────────────────────────────

/// A search/write backend reachable over the network.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;
    async fn upsert(&self, record: &Record) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// JSON-over-HTTP remote store client.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct RemoteSearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct RemoteSearchResponse {
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct RemoteDeleteResponse {
    deleted: bool,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Provider {
                provider: "remote-store".into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| remote_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EngineError::Provider {
                provider: "remote-store".into(),
                message: format!("HTTP {status}: {detail}"),
            });
        }
        response.json().await.map_err(remote_error)
    }
}

fn remote_error(e: reqwest::Error) -> EngineError {
    EngineError::Provider {
        provider: "remote-store".into(),
        message: e.to_string(),
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let response: RemoteSearchResponse = self
            .post("/search", &RemoteSearchRequest { query, top_k })
            .await?;
        Ok(response.hits)
    }

    async fn upsert(&self, record: &Record) -> Result<()> {
        let _: serde_json::Value = self.post("/upsert", record).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let response: RemoteDeleteResponse =
            self.post("/delete", &serde_json::json!({ "id": id })).await?;
        Ok(response.deleted)
    }
}

// ── Request / response types ──────────────────────────────────────────────

/// Caller-facing search parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filter: Filter,
}

/// Merged search result with degradation notes.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Legs that timed out or failed and contributed nothing.
    pub unavailable: Vec<String>,
}

/// Context assembled for retrieval-augmented prompting.
#[derive(Debug, Serialize)]
pub struct RagContext {
    pub chunks: Vec<SearchHit>,
    /// Rough token estimate of the included chunks.
    pub used_tokens: usize,
    pub token_budget: usize,
}

/// Result of a cleanup pass.
#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub examined: usize,
    pub removed: usize,
}

// ── Engine ────────────────────────────────────────────────────────────────

/// The engine façade. Constructed once at startup and shared by handle;
/// there is no global instance.
pub struct MemoryEngine {
    store: Arc<LocalStore>,
    chain: Arc<EmbeddingChain>,
    pipeline: Arc<SyncPipeline>,
    remote: Option<Arc<dyn RemoteStore>>,
    mode: BackendMode,
    config: MnemoConfig,
}

impl MemoryEngine {
    /// Build an engine from config: open the store, assemble the chain,
    /// and connect the remote backend if the mode calls for one.
    pub fn new(config: MnemoConfig) -> anyhow::Result<Self> {
        let mode = BackendMode::from_str(&config.facade.mode)?;
        let store = Arc::new(LocalStore::open(
            config.resolved_db_path(),
            config.embedding.dimension,
        )?);
        let chain = Arc::new(EmbeddingChain::from_config(&config.embedding)?);
        let pipeline = Arc::new(SyncPipeline::new(
            store.clone(),
            chain.clone(),
            config.sync.clone(),
        )?);

        let remote: Option<Arc<dyn RemoteStore>> = match (&config.facade.remote_url, mode) {
            (Some(url), BackendMode::Remote | BackendMode::Hybrid) => Some(Arc::new(
                HttpRemoteStore::new(url, Duration::from_millis(config.facade.remote_timeout_ms))?,
            )),
            (None, BackendMode::Remote) => {
                anyhow::bail!("facade mode is 'remote' but no remote_url is configured")
            }
            _ => None,
        };

        Ok(Self {
            store,
            chain,
            pipeline,
            remote,
            mode,
            config,
        })
    }

    /// Same engine wired to caller-supplied parts. Used by tests and by
    /// embedders that manage their own store lifetime.
    pub fn from_parts(
        store: Arc<LocalStore>,
        chain: Arc<EmbeddingChain>,
        pipeline: Arc<SyncPipeline>,
        remote: Option<Arc<dyn RemoteStore>>,
        mode: BackendMode,
        config: MnemoConfig,
    ) -> Self {
        Self {
            store,
            chain,
            pipeline,
            remote,
            mode,
            config,
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn chain(&self) -> &Arc<EmbeddingChain> {
        &self.chain
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    // ── Search ────────────────────────────────────────────────────────────

    /// Search the configured backends and merge. Each leg races its own
    /// timeout; losing legs are reported in `unavailable`, never as errors
    /// — except in remote-only mode, where a remote failure is the call's
    /// failure.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let top_k = request.top_k.unwrap_or(self.config.search.default_top_k);
        let mut unavailable = Vec::new();

        let local_leg = async {
            if self.mode == BackendMode::Remote {
                return None;
            }
            Some(self.local_search(request, top_k).await)
        };

        let remote_leg = async {
            let remote = self.remote.as_ref()?;
            if self.mode == BackendMode::Local {
                return None;
            }
            let timeout = Duration::from_millis(self.config.facade.remote_timeout_ms);
            // The race discards a late result; it does not cancel the
            // request on the wire.
            match tokio::time::timeout(timeout, remote.search(&request.query, top_k)).await {
                Ok(result) => Some(result),
                Err(_) => Some(Err(EngineError::Timeout {
                    leg: "remote",
                    millis: self.config.facade.remote_timeout_ms,
                })),
            }
        };

        let (local_result, remote_result) = tokio::join!(local_leg, remote_leg);

        let local_hits = match local_result {
            Some(Ok(hits)) => hits,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "local search leg failed");
                unavailable.push("local".to_string());
                Vec::new()
            }
            None => Vec::new(),
        };

        let remote_hits = match remote_result {
            Some(Ok(hits)) => hits,
            Some(Err(e)) => {
                if self.mode == BackendMode::Remote {
                    return Err(e);
                }
                tracing::warn!(error = %e, "remote search leg failed");
                unavailable.push("remote".to_string());
                Vec::new()
            }
            None => Vec::new(),
        };

        let mut hits = self.merge_dedup(local_hits, remote_hits);
        hits.truncate(top_k);
        Ok(SearchResponse { hits, unavailable })
    }

    async fn local_search(&self, request: &SearchRequest, top_k: usize) -> Result<Vec<SearchHit>> {
        let millis = self.config.facade.local_timeout_ms;

        // The timeout covers query embedding too; a stalled provider must
        // not hold the leg open past its deadline.
        let leg = async {
            let query_vector = self.chain.embed(&request.query).await?;

            let store = self.store.clone();
            let options = HybridOptions::from_config(&self.config.search)
                .with_top_k(top_k)
                .with_filter(request.filter.clone());
            let query_text = request.query.clone();

            tokio::task::spawn_blocking(move || {
                hybrid::hybrid_search(&store, &query_text, &query_vector, &options)
            })
            .await
            .map_err(|join_error| {
                EngineError::validation(format!("local search task failed: {join_error}"))
            })?
        };

        match tokio::time::timeout(Duration::from_millis(millis), leg).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                leg: "local",
                millis,
            }),
        }
    }

    /// Merge two hit lists, deduplicating by a normalized content prefix.
    /// The higher-scored duplicate wins; on a score tie the local copy does.
    fn merge_dedup(&self, local: Vec<SearchHit>, remote: Vec<SearchHit>) -> Vec<SearchHit> {
        let prefix_len = self.config.facade.dedup_prefix_len;
        let mut merged: Vec<(SearchHit, bool)> = Vec::new();

        for (hits, is_local) in [(local, true), (remote, false)] {
            for hit in hits {
                let key = dedup_key(&hit.content, prefix_len);
                match merged
                    .iter_mut()
                    .find(|(existing, _)| dedup_key(&existing.content, prefix_len) == key)
                {
                    Some((existing, existing_local)) => {
                        let replace = hit.score > existing.score
                            || (hit.score == existing.score && is_local && !*existing_local);
                        if replace {
                            *existing = hit;
                            *existing_local = is_local;
                        }
                    }
                    None => merged.push((hit, is_local)),
                }
            }
        }

        let mut hits: Vec<SearchHit> = merged.into_iter().map(|(h, _)| h).collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }

    // ── Writes ────────────────────────────────────────────────────────────

    /// Store a record locally, then mirror it to the remote best-effort.
    /// In remote-only mode the remote write is the write.
    pub async fn upsert(&self, record: &Record) -> Result<()> {
        if self.mode == BackendMode::Remote {
            let remote = self.require_remote()?;
            return remote.upsert(record).await;
        }

        self.store.upsert(record)?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.upsert(record).await {
                tracing::warn!(id = %record.id, error = %e, "remote mirror write failed");
            }
        }
        Ok(())
    }

    pub async fn upsert_batch(&self, records: &[Record]) -> Result<usize> {
        if self.mode == BackendMode::Remote {
            let remote = self.require_remote()?;
            for record in records {
                remote.upsert(record).await?;
            }
            return Ok(records.len());
        }

        let count = self.store.upsert_batch(records)?;
        if let Some(remote) = &self.remote {
            for record in records {
                if let Err(e) = remote.upsert(record).await {
                    tracing::warn!(id = %record.id, error = %e, "remote mirror write failed");
                }
            }
        }
        Ok(count)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        if self.mode == BackendMode::Remote {
            let remote = self.require_remote()?;
            return remote.delete(id).await;
        }

        let deleted = self.store.delete(id)?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(id).await {
                tracing::warn!(id, error = %e, "remote mirror delete failed");
            }
        }
        Ok(deleted)
    }

    pub fn delete_by_filter(&self, filter: &Filter) -> Result<usize> {
        self.store.delete_by_filter(filter)
    }

    fn require_remote(&self) -> Result<&Arc<dyn RemoteStore>> {
        self.remote.as_ref().ok_or_else(|| {
            EngineError::validation("remote mode requires a configured remote backend")
        })
    }

    // ── Inbound operations ────────────────────────────────────────────────

    /// Index a project tree into the store.
    pub async fn index(&self, project_path: &Path) -> Result<SyncReport> {
        self.pipeline.full_sync(project_path).await
    }

    /// Re-sync a project tree, touching only changed files.
    pub async fn sync(&self, project_path: &Path) -> Result<SyncReport> {
        self.pipeline.incremental_sync(project_path).await
    }

    /// Watch a project tree and index debounced changes until stopped.
    pub fn watch(&self, project_path: &Path) -> Result<WatcherHandle> {
        watcher::watch(
            self.pipeline.clone(),
            project_path,
            Duration::from_millis(self.config.sync.debounce_ms),
        )
    }

    /// Assemble search hits into a token-budgeted context block, ordered
    /// by combined similarity, confidence, and recency.
    pub async fn get_rag_context(&self, query: &str, token_budget: usize) -> Result<RagContext> {
        let request = SearchRequest {
            query: query.to_string(),
            top_k: Some(self.config.search.default_top_k * 2),
            filter: Filter::default(),
        };
        let response = self.search(&request).await?;

        let now = chrono::Utc::now();
        let mut scored: Vec<(f64, SearchHit)> = response
            .hits
            .into_iter()
            .map(|hit| {
                let similarity = hit.vector_score.unwrap_or(0.0);
                let score = match self.store.decay_view(&hit.id) {
                    Ok(Some(view)) => decay::relevance(&self.config.decay, &view, similarity, now),
                    _ => similarity,
                };
                (score, hit)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut chunks = Vec::new();
        let mut used_tokens = 0usize;
        for (_, hit) in scored {
            let cost = estimate_tokens(&hit.content);
            if used_tokens + cost > token_budget {
                continue;
            }
            used_tokens += cost;
            chunks.push(hit);
        }

        Ok(RagContext {
            chunks,
            used_tokens,
            token_budget,
        })
    }

    /// Reinforce a memory: recover part of its decayed confidence and bump
    /// its access count. Returns false for an unknown id.
    pub fn record_access(&self, id: &str) -> Result<bool> {
        let Some(view) = self.store.decay_view(id)? else {
            return Ok(false);
        };
        let updated = decay::record_access(&self.config.decay, &view, chrono::Utc::now());
        self.store.apply_access(&updated)?;
        Ok(true)
    }

    /// Remove memories whose decayed confidence has fallen below the
    /// cleanup threshold. On-demand only; the engine runs no sweeper.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        let now = chrono::Utc::now();
        let views = self.store.decay_views()?;
        let examined = views.len();
        let mut removed = 0usize;

        for view in views {
            if decay::should_cleanup(&self.config.decay, &view, now) {
                if self.store.delete(&view.id)? {
                    removed += 1;
                }
            }
        }

        tracing::info!(examined, removed, "cleanup pass complete");
        Ok(CleanupReport { examined, removed })
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }
}

/// Lower-cased character prefix used as the dedup key.
fn dedup_key(content: &str, prefix_len: usize) -> String {
    content.chars().take(prefix_len).collect::<String>().to_lowercase()
}

/// Rough token count: four characters per token.
fn estimate_tokens(content: &str) -> usize {
    content.len().div_ceil(4)
}
