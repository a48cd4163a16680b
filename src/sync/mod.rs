//! File-to-store synchronization.
//!
//! The pipeline turns project files into chunked, embedded records and
//! keeps the `tracked_files` table as its picture of what is already
//! indexed. Full sync walks the tree; incremental sync diffs the walk
//! against the tracked set and only touches files that were added,
//! modified, or deleted since the last pass.
//!
//! Per-file failures are isolated: one unreadable or oversized file is
//! reported and skipped, never aborting the rest of the run.

pub mod chunk;
pub mod watcher;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::embedding::EmbeddingChain;
use crate::error::{EngineError, Result};
use crate::store::types::{Filter, Record, RecordMetadata, Source};
use crate::store::{LocalStore, TrackedFile};

/// What happened to a single file during a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// File content was unchanged; nothing was re-embedded.
    Unchanged,
    /// File was (re-)chunked, embedded, and stored.
    Indexed,
    /// File was skipped by size, extension, or ignore rules.
    Skipped,
}

/// Aggregate result of one sync pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    pub indexed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub deleted: usize,
    /// Files that errored, with the error message. Never fatal to the pass.
    pub failures: Vec<(String, String)>,
}

impl SyncReport {
    pub fn record(&mut self, outcome: IndexOutcome) {
        match outcome {
            IndexOutcome::Indexed => self.indexed += 1,
            IndexOutcome::Unchanged => self.unchanged += 1,
            IndexOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// A watcher-observed filesystem change, after debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Modified,
    Removed,
}

/// Chunks, embeds, and stores project files.
pub struct SyncPipeline {
    store: Arc<LocalStore>,
    chain: Arc<EmbeddingChain>,
    config: SyncConfig,
    ignore: GlobSet,
}

impl SyncPipeline {
    pub fn new(
        store: Arc<LocalStore>,
        chain: Arc<EmbeddingChain>,
        config: SyncConfig,
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignore {
            let glob = Glob::new(pattern).map_err(|e| {
                EngineError::validation(format!("bad ignore pattern '{pattern}': {e}"))
            })?;
            builder.add(glob);
        }
        let ignore = builder
            .build()
            .map_err(|e| EngineError::validation(format!("ignore globset: {e}")))?;

        Ok(Self {
            store,
            chain,
            config,
            ignore,
        })
    }

    // ── Sync passes ───────────────────────────────────────────────────────

    /// Index every eligible file under `project_path`.
    pub async fn full_sync(&self, project_path: &Path) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for path in self.walk(project_path) {
            match self.index_file(project_path, &path).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to index file");
                    report
                        .failures
                        .push((path.display().to_string(), e.to_string()));
                }
            }
        }
        tracing::info!(
            project = %project_path.display(),
            indexed = report.indexed,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failures = report.failures.len(),
            "full sync complete"
        );
        Ok(report)
    }

    /// Diff the current tree against the tracked set and only process
    /// added, modified, and deleted files.
    pub async fn incremental_sync(&self, project_path: &Path) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let project_key = project_path.display().to_string();
        let tracked = self.store.tracked_files(&project_key)?;

        let mut seen: HashSet<String> = HashSet::new();
        for path in self.walk(project_path) {
            let key = path.display().to_string();
            seen.insert(key.clone());

            // mtime+size fast path: skip the hash entirely when filesystem
            // metadata says the file has not moved.
            if let Some(prior) = tracked.iter().find(|t| t.file_path == key) {
                if let Ok(meta) = std::fs::metadata(&path) {
                    let mtime = file_mtime(&meta);
                    if prior.mtime == mtime && prior.size == meta.len() {
                        report.unchanged += 1;
                        continue;
                    }
                }
            }

            match self.index_file(project_path, &path).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to index file");
                    report.failures.push((key, e.to_string()));
                }
            }
        }

        // Anything tracked but no longer present on disk is gone.
        for stale in tracked.iter().filter(|t| !seen.contains(&t.file_path)) {
            match self.remove_file(Path::new(&stale.file_path)) {
                Ok(()) => report.deleted += 1,
                Err(e) => report.failures.push((stale.file_path.clone(), e.to_string())),
            }
        }

        tracing::info!(
            project = %project_key,
            indexed = report.indexed,
            unchanged = report.unchanged,
            deleted = report.deleted,
            "incremental sync complete"
        );
        Ok(report)
    }

    /// Apply one debounced watcher event.
    pub async fn apply_change(
        &self,
        project_path: &Path,
        path: &Path,
        kind: ChangeKind,
    ) -> Result<IndexOutcome> {
        match kind {
            ChangeKind::Modified => self.index_file(project_path, path).await,
            ChangeKind::Removed => {
                self.remove_file(path)?;
                Ok(IndexOutcome::Indexed)
            }
        }
    }

    // ── Per-file operations ───────────────────────────────────────────────

    /// Chunk, embed, and store a single file. Unchanged content (same whole
    /// file hash) refreshes the tracked entry and skips the embedding work.
    pub async fn index_file(&self, project_path: &Path, path: &Path) -> Result<IndexOutcome> {
        if !self.is_eligible(path) {
            return Ok(IndexOutcome::Skipped);
        }

        let meta = std::fs::metadata(path)
            .map_err(|e| EngineError::sync(path.display().to_string(), e.to_string()))?;
        if meta.len() > self.config.max_file_size {
            tracing::debug!(path = %path.display(), size = meta.len(), "skipping oversized file");
            return Ok(IndexOutcome::Skipped);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::sync(path.display().to_string(), e.to_string()))?;
        let file_key = path.display().to_string();
        let project_key = project_path.display().to_string();
        let hash = chunk::content_hash(&content);

        let tracked = TrackedFile {
            file_path: file_key.clone(),
            project_path: project_key.clone(),
            content_hash: hash.clone(),
            mtime: file_mtime(&meta),
            size: meta.len(),
        };

        if self.store.exists_by_hash(&hash)? {
            // Same bytes already indexed (possibly under an old mtime).
            self.store.track_file(&tracked)?;
            return Ok(IndexOutcome::Unchanged);
        }

        let chunks = chunk::chunk_text(&content, self.config.chunk_size, self.config.chunk_overlap);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.chain.embed_batch(&texts).await?;

        let total = chunks.len();
        let records: Vec<Record> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(c, embedding)| {
                let mut metadata = RecordMetadata::new(Source::File);
                metadata.project_path = Some(project_key.clone());
                metadata.file_path = Some(file_key.clone());
                metadata.content_hash = Some(hash.clone());
                metadata.chunk_index = Some(c.index as u32);
                metadata.total_chunks = Some(total as u32);
                Record {
                    id: c.id,
                    content: c.content,
                    embedding,
                    metadata,
                    confidence: None,
                }
            })
            .collect();

        // Old chunks of this path (different hash, possibly different count)
        // go first so no stale tail survives a shrinking file.
        self.store.delete_by_filter(&Filter {
            file_path: Some(file_key.clone()),
            ..Filter::default()
        })?;
        self.store.upsert_batch(&records)?;
        self.store.track_file(&tracked)?;

        tracing::debug!(path = %file_key, chunks = total, "indexed file");
        Ok(IndexOutcome::Indexed)
    }

    /// Drop a file's chunks and its tracked entry.
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        let file_key = path.display().to_string();
        self.store.delete_by_filter(&Filter {
            file_path: Some(file_key.clone()),
            ..Filter::default()
        })?;
        self.store.untrack_file(&file_key)?;
        tracing::debug!(path = %file_key, "removed file from index");
        Ok(())
    }

    // ── Eligibility ───────────────────────────────────────────────────────

    /// Eligible means: not ignored and has an indexable extension.
    pub fn is_eligible(&self, path: &Path) -> bool {
        if self.ignore.is_match(path) {
            return false;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.config.extensions.iter().any(|e| e == ext)
    }

    fn walk(&self, root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.ignore.is_match(e.path()))
            .filter_map(|entry| entry.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| self.is_eligible(p))
            .collect()
    }
}

fn file_mtime(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::local::HashEmbeddingProvider;

    fn pipeline(config: SyncConfig) -> SyncPipeline {
        let store = Arc::new(LocalStore::in_memory(64).unwrap());
        let chain = Arc::new(
            EmbeddingChain::new(vec![Box::new(HashEmbeddingProvider::new(64))], 3, 100, 2)
                .unwrap(),
        );
        SyncPipeline::new(store, chain, config).unwrap()
    }

    #[test]
    fn eligibility_respects_extensions_and_ignores() {
        let p = pipeline(SyncConfig::default());
        assert!(p.is_eligible(Path::new("/proj/src/main.rs")));
        assert!(p.is_eligible(Path::new("/proj/README.md")));
        assert!(!p.is_eligible(Path::new("/proj/image.png")));
        assert!(!p.is_eligible(Path::new("/proj/Makefile")));
        assert!(!p.is_eligible(Path::new("/proj/node_modules/pkg/index.js")));
        assert!(!p.is_eligible(Path::new("/proj/.git/config")));
    }

    #[tokio::test]
    async fn full_sync_indexes_then_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() { println!(\"hi\"); }").unwrap();
        std::fs::write(dir.path().join("b.md"), "# notes\nsome text").unwrap();
        std::fs::write(dir.path().join("c.png"), [0u8, 1, 2]).unwrap();

        let p = pipeline(SyncConfig::default());
        let report = p.full_sync(dir.path()).await.unwrap();
        assert_eq!(report.indexed, 2);
        assert!(report.failures.is_empty());

        // Second pass sees identical hashes.
        let report = p.full_sync(dir.path()).await.unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(report.unchanged, 2);
    }

    #[tokio::test]
    async fn reindex_replaces_stale_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.md");
        let long: String = "lorem ipsum dolor sit amet ".repeat(100);
        std::fs::write(&file, &long).unwrap();

        let mut config = SyncConfig::default();
        config.chunk_size = 200;
        config.chunk_overlap = 50;
        let p = pipeline(config);

        p.full_sync(dir.path()).await.unwrap();
        let before = p.store.stats().unwrap().total_records;
        assert!(before > 1);

        // Shrink the file; old chunk count must not survive.
        std::fs::write(&file, "short now").unwrap();
        p.full_sync(dir.path()).await.unwrap();
        assert_eq!(p.store.stats().unwrap().total_records, 1);
    }

    #[tokio::test]
    async fn incremental_sync_drops_deleted_files() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("keep.rs");
        let gone = dir.path().join("gone.rs");
        std::fs::write(&keep, "fn keep() {}").unwrap();
        std::fs::write(&gone, "fn gone() {}").unwrap();

        let p = pipeline(SyncConfig::default());
        p.full_sync(dir.path()).await.unwrap();
        assert_eq!(p.store.stats().unwrap().total_records, 2);

        std::fs::remove_file(&gone).unwrap();
        let report = p.incremental_sync(dir.path()).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(p.store.stats().unwrap().total_records, 1);
        assert!(p
            .store
            .tracked_file(&gone.display().to_string())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn oversized_files_are_skipped_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(64)).unwrap();

        let mut config = SyncConfig::default();
        config.max_file_size = 16;
        let p = pipeline(config);

        let report = p.full_sync(dir.path()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn remove_file_clears_chunks_and_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "fn a() {}").unwrap();

        let p = pipeline(SyncConfig::default());
        p.full_sync(dir.path()).await.unwrap();
        p.remove_file(&file).unwrap();
        assert_eq!(p.store.stats().unwrap().total_records, 0);
    }
}
