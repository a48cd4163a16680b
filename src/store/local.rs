//! Durable vector + full-text record store.
//!
//! [`LocalStore`] is the single writer for persisted records. Every upsert
//! and delete runs inside a transaction spanning the `records` table, the
//! FTS5 index, and the vec0 index — after a successful call all three
//! reflect the record, after a failed one none do. The connection sits
//! behind a mutex, so concurrent writers to the same id cannot interleave
//! partial updates.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::decay::DecayView;
use crate::error::{EngineError, Result};
use crate::store::types::{Filter, Record, RecordMetadata, SearchHit, Source, StoreStats};
use crate::store::{bytes_to_embedding, embedding_to_bytes, l2_to_cosine};

/// Options for cosine-similarity search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Results below this similarity are dropped.
    pub threshold: f64,
    pub filter: Filter,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            threshold: 0.0,
            filter: Filter::default(),
        }
    }
}

/// Options for lexical (FTS5 BM25) search.
#[derive(Debug, Clone)]
pub struct TextSearchOptions {
    pub top_k: usize,
    pub filter: Filter,
}

impl Default for TextSearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            filter: Filter::default(),
        }
    }
}

/// State of one project file as of the last successful sync.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub file_path: String,
    pub project_path: String,
    pub content_hash: String,
    /// Seconds since epoch, from filesystem metadata.
    pub mtime: i64,
    pub size: u64,
}

/// SQLite-backed record store: metadata table + FTS5 + vec0, one mutex'd
/// connection.
pub struct LocalStore {
    conn: Mutex<Connection>,
    dimension: usize,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open (or create) an on-disk store.
    pub fn open(path: impl Into<PathBuf>, dimension: usize) -> anyhow::Result<Self> {
        let path = path.into();
        let conn = crate::db::open_database(&path, dimension)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
            db_path: Some(path),
        })
    }

    /// Open an in-memory store (tests, throwaway sessions).
    pub fn in_memory(dimension: usize) -> anyhow::Result<Self> {
        let conn = crate::db::open_memory_database(dimension)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
            db_path: None,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(EngineError::validation(format!(
                "embedding dimension {} does not match store dimension {}",
                embedding.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn check_record(&self, record: &Record) -> Result<()> {
        self.check_dimension(&record.embedding)?;
        if let Some(c) = record.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(EngineError::validation(format!(
                    "initial confidence {c} is outside [0, 1]"
                )));
            }
        }
        Ok(())
    }

    // ── Write path ────────────────────────────────────────────────────────

    /// Insert or replace a record. All-or-nothing across metadata, FTS, and
    /// vector index; a same-id overwrite removes the stale index entries
    /// first.
    pub fn upsert(&self, record: &Record) -> Result<()> {
        self.check_record(record)?;
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        upsert_in_tx(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert many records in one transaction. Returns the count written.
    /// Any single failure rolls back the whole batch.
    pub fn upsert_batch(&self, records: &[Record]) -> Result<usize> {
        for record in records {
            self.check_record(record)?;
        }
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        for record in records {
            upsert_in_tx(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Delete a record by id. Returns `false` if no such record existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let deleted = delete_in_tx(&tx, id)?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Delete every record matching the filter. Returns the count removed.
    ///
    /// An empty filter is rejected — wiping the store must be explicit.
    pub fn delete_by_filter(&self, filter: &Filter) -> Result<usize> {
        if filter.is_empty() {
            return Err(EngineError::validation(
                "delete_by_filter requires at least one filter field",
            ));
        }
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;

        let (where_sql, where_params) = filter.to_sql("records");
        let ids: Vec<String> = {
            let sql = format!("SELECT records.id FROM records WHERE {where_sql}");
            let mut stmt = tx.prepare(&sql)?;
            let ids = stmt
                .query_map(params_from_iter(where_params.iter()), |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        for id in &ids {
            delete_in_tx(&tx, id)?;
        }
        tx.commit()?;
        Ok(ids.len())
    }

    // ── Read path ─────────────────────────────────────────────────────────

    /// Fetch a full record, including its embedding and current confidence.
    pub fn get(&self, id: &str) -> Result<Option<Record>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let row = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS}, confidence FROM records WHERE id = ?1"),
                params![id],
                |row| {
                    let (id, content, metadata) = row_to_content_and_meta(row)?;
                    let confidence: f64 = row.get(RECORD_COLUMN_COUNT)?;
                    Ok((id, content, metadata, confidence))
                },
            )
            .optional()?;

        let Some((id, content, metadata, confidence)) = row else {
            return Ok(None);
        };

        let embedding: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM records_vec WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(Some(Record {
            id,
            content,
            embedding: embedding.as_deref().map(bytes_to_embedding).unwrap_or_default(),
            metadata,
            confidence: Some(confidence),
        }))
    }

    /// Cosine-similarity top-K search with optional metadata filter.
    ///
    /// KNN runs against the vec0 index first; metadata filtering happens on
    /// the candidates, so the index is asked for extra rows when a filter is
    /// present. A selective filter can starve the initial pool, so the pool
    /// is widened and the query retried until enough hits survive or the
    /// whole index has been scanned.
    pub fn search(&self, query: &[f32], options: &SearchOptions) -> Result<Vec<SearchHit>> {
        self.check_dimension(query)?;
        let conn = self.conn.lock().expect("store mutex poisoned");

        let total: usize =
            conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get::<_, i64>(0))? as usize;
        let mut candidates = if options.filter.is_empty() {
            options.top_k
        } else {
            options.top_k * 4
        };

        loop {
            let neighbors: Vec<(String, f64)> = {
                let mut stmt = conn.prepare(
                    "SELECT id, distance FROM records_vec \
                     WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
                )?;
                let neighbors = stmt
                    .query_map(
                        params![embedding_to_bytes(query), candidates as i64],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                neighbors
            };

            let ids: Vec<&str> = neighbors.iter().map(|(id, _)| id.as_str()).collect();
            let rows = fetch_rows(&conn, &ids)?;

            let mut hits = Vec::new();
            for (id, distance) in &neighbors {
                let Some((content, metadata)) = rows.get(id.as_str()) else {
                    continue;
                };
                if !options.filter.matches(metadata) {
                    continue;
                }
                let similarity = l2_to_cosine(*distance);
                if similarity < options.threshold {
                    continue;
                }
                hits.push(SearchHit {
                    id: id.clone(),
                    content: content.clone(),
                    metadata: metadata.clone(),
                    score: similarity,
                    vector_score: Some(similarity),
                    fts_score: None,
                    fused_rank: None,
                });
                if hits.len() >= options.top_k {
                    break;
                }
            }

            let exhausted = neighbors.len() >= total;
            if hits.len() >= options.top_k || options.filter.is_empty() || exhausted {
                return Ok(hits);
            }
            candidates = (candidates * 4).min(total);
        }
    }

    /// Lexical BM25 search with optional metadata filter.
    pub fn search_text(&self, query: &str, options: &TextSearchOptions) -> Result<Vec<SearchHit>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().expect("store mutex poisoned");

        let (filter_sql, filter_params) = options.filter.to_sql("r");
        let filter_clause = if filter_sql.is_empty() {
            String::new()
        } else {
            format!("AND {filter_sql}")
        };

        let sql = format!(
            "SELECT {RECORD_COLUMNS_ALIASED}, records_fts.rank \
             FROM records_fts \
             JOIN records r ON r.rowid = records_fts.rowid \
             WHERE records_fts MATCH ? {filter_clause} \
             ORDER BY records_fts.rank LIMIT ?"
        );

        let limit = options.top_k as i64;
        let mut bindings: Vec<&dyn rusqlite::types::ToSql> = vec![&escaped];
        for p in &filter_params {
            bindings.push(p);
        }
        bindings.push(&limit);

        let mut stmt = conn.prepare(&sql)?;
        let hits = stmt
            .query_map(bindings.as_slice(), |row| {
                let (id, content, metadata) = row_to_content_and_meta(row)?;
                let rank: f64 = row.get(RECORD_COLUMN_COUNT)?;
                // FTS5 rank is negative (more negative = better); negate for
                // a higher-is-better score.
                let score = -rank;
                Ok(SearchHit {
                    id,
                    content,
                    metadata,
                    score,
                    vector_score: None,
                    fts_score: Some(score),
                    fused_rank: None,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    /// Whether any record carries this whole-file content hash.
    pub fn exists_by_hash(&self, hash: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let found: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM records WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// First record id carrying this content hash, if any.
    pub fn get_id_by_hash(&self, hash: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let id = conn
            .query_row(
                "SELECT id FROM records WHERE content_hash = ?1 LIMIT 1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Store-level statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().expect("store mutex poisoned");

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
        let tracked: i64 =
            conn.query_row("SELECT COUNT(*) FROM tracked_files", [], |r| r.get(0))?;

        let mut by_source = HashMap::new();
        for s in ["file", "conversation", "knowledge", "session_summary"] {
            by_source.insert(s.to_string(), 0u64);
        }
        let mut stmt = conn.prepare("SELECT source, COUNT(*) FROM records GROUP BY source")?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (source, count) in rows {
            by_source.insert(source, count as u64);
        }

        let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = self
            .db_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStats {
            total_records: total as u64,
            by_source,
            tracked_files: tracked as u64,
            db_size_bytes,
            oldest_record: oldest,
            newest_record: newest,
        })
    }

    // ── Decay bookkeeping ─────────────────────────────────────────────────

    /// Decay snapshot for one record.
    pub fn decay_view(&self, id: &str) -> Result<Option<DecayView>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let view = conn
            .query_row(
                "SELECT id, confidence, access_count, created_at, last_accessed \
                 FROM records WHERE id = ?1",
                params![id],
                row_to_decay_view,
            )
            .optional()?;
        Ok(view)
    }

    /// Decay snapshots for every record — used by on-demand cleanup.
    pub fn decay_views(&self) -> Result<Vec<DecayView>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, confidence, access_count, created_at, last_accessed FROM records",
        )?;
        let views = stmt
            .query_map([], row_to_decay_view)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(views)
    }

    /// Persist the outcome of a reinforcement event.
    pub fn apply_access(&self, view: &DecayView) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE records SET confidence = ?1, access_count = ?2, last_accessed = ?3, \
             updated_at = ?4 WHERE id = ?5",
            params![
                view.confidence,
                view.access_count,
                view.last_accessed.to_rfc3339(),
                Utc::now().to_rfc3339(),
                view.id,
            ],
        )?;
        Ok(())
    }

    // ── Tracked files (sync pipeline state) ───────────────────────────────

    pub fn track_file(&self, file: &TrackedFile) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO tracked_files (file_path, project_path, content_hash, mtime, size) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                file.file_path,
                file.project_path,
                file.content_hash,
                file.mtime,
                file.size as i64,
            ],
        )?;
        Ok(())
    }

    pub fn untrack_file(&self, file_path: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let rows = conn.execute(
            "DELETE FROM tracked_files WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(rows > 0)
    }

    pub fn tracked_files(&self, project_path: &str) -> Result<Vec<TrackedFile>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT file_path, project_path, content_hash, mtime, size \
             FROM tracked_files WHERE project_path = ?1",
        )?;
        let files = stmt
            .query_map(params![project_path], |row| {
                Ok(TrackedFile {
                    file_path: row.get(0)?,
                    project_path: row.get(1)?,
                    content_hash: row.get(2)?,
                    mtime: row.get(3)?,
                    size: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    pub fn tracked_file(&self, file_path: &str) -> Result<Option<TrackedFile>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let file = conn
            .query_row(
                "SELECT file_path, project_path, content_hash, mtime, size \
                 FROM tracked_files WHERE file_path = ?1",
                params![file_path],
                |row| {
                    Ok(TrackedFile {
                        file_path: row.get(0)?,
                        project_path: row.get(1)?,
                        content_hash: row.get(2)?,
                        mtime: row.get(3)?,
                        size: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(file)
    }
}

// ── SQL helpers ───────────────────────────────────────────────────────────

const RECORD_COLUMNS: &str = "id, content, source, project_path, file_path, session_id, \
     category, content_hash, chunk_index, total_chunks, created_at, updated_at";

const RECORD_COLUMNS_ALIASED: &str =
    "r.id, r.content, r.source, r.project_path, r.file_path, r.session_id, \
     r.category, r.content_hash, r.chunk_index, r.total_chunks, r.created_at, r.updated_at";

const RECORD_COLUMN_COUNT: usize = 12;

fn row_to_content_and_meta(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(String, String, RecordMetadata)> {
    let id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let source_str: String = row.get(2)?;
    let source = source_str.parse::<Source>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    let metadata = RecordMetadata {
        source,
        project_path: row.get(3)?,
        file_path: row.get(4)?,
        session_id: row.get(5)?,
        category: row.get(6)?,
        content_hash: row.get(7)?,
        chunk_index: row.get(8)?,
        total_chunks: row.get(9)?,
        created_at: parse_timestamp(row, 10)?,
        updated_at: parse_timestamp(row, 11)?,
    };
    Ok((id, content, metadata))
}

fn row_to_decay_view(row: &rusqlite::Row<'_>) -> rusqlite::Result<DecayView> {
    let created_at = parse_timestamp(row, 3)?;
    let last_accessed: Option<String> = row.get(4)?;
    let last_accessed = last_accessed
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(created_at);
    Ok(DecayView {
        id: row.get(0)?,
        confidence: row.get(1)?,
        access_count: row.get(2)?,
        created_at,
        last_accessed,
    })
}

fn parse_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// Insert a record inside an open transaction, replacing any previous entry
/// with the same id across all three tables.
fn upsert_in_tx(tx: &Transaction<'_>, record: &Record) -> Result<()> {
    delete_in_tx(tx, &record.id)?;

    tx.execute(
        &format!(
            "INSERT INTO records ({RECORD_COLUMNS}, confidence, access_count, last_accessed) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, NULL)"
        ),
        params![
            record.id,
            record.content,
            record.metadata.source.as_str(),
            record.metadata.project_path,
            record.metadata.file_path,
            record.metadata.session_id,
            record.metadata.category,
            record.metadata.content_hash,
            record.metadata.chunk_index,
            record.metadata.total_chunks,
            record.metadata.created_at.to_rfc3339(),
            record.metadata.updated_at.to_rfc3339(),
            record.confidence.unwrap_or(1.0),
        ],
    )?;
    let rowid = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO records_fts (rowid, content, id, source) VALUES (?1, ?2, ?3, ?4)",
        params![rowid, record.content, record.id, record.metadata.source.as_str()],
    )?;

    tx.execute(
        "INSERT INTO records_vec (id, embedding) VALUES (?1, ?2)",
        params![record.id, embedding_to_bytes(&record.embedding)],
    )?;

    Ok(())
}

/// Remove a record from all three tables inside an open transaction.
/// Returns `false` if the id was absent.
fn delete_in_tx(tx: &Transaction<'_>, id: &str) -> Result<bool> {
    let existing: Option<(i64, String, String)> = tx
        .query_row(
            "SELECT rowid, content, source FROM records WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((rowid, content, source)) = existing else {
        return Ok(false);
    };

    // FTS5 external content tables require the special 'delete' insert.
    tx.execute(
        "INSERT INTO records_fts(records_fts, rowid, content, id, source) \
         VALUES('delete', ?1, ?2, ?3, ?4)",
        params![rowid, content, id, source],
    )?;
    tx.execute("DELETE FROM records_vec WHERE id = ?1", params![id])?;
    tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
    Ok(true)
}

/// Escape a user query for FTS5 MATCH syntax.
///
/// Wraps each whitespace-delimited word in double quotes and joins with
/// spaces so FTS5 treats them as individual terms (implicit AND).
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let clean = word.replace('"', "");
            format!("\"{clean}\"")
        })
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" ")
}

/// Batch-fetch content + metadata for candidate ids.
fn fetch_rows(
    conn: &Connection,
    ids: &[&str],
) -> Result<HashMap<String, (String, RecordMetadata)>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(ids.iter()), row_to_content_and_meta)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut map = HashMap::new();
    for (id, content, metadata) in rows {
        map.insert(id, (content, metadata));
    }
    Ok(map)
}
