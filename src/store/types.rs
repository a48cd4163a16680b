//! Core record type definitions.
//!
//! Defines [`Source`] (where a record came from), [`RecordMetadata`],
//! [`Record`] (a full stored unit), [`Filter`] (conjunctive equality over
//! metadata fields), and [`SearchHit`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// A chunk of a project file, produced by the sync pipeline.
    File,
    /// A conversation turn.
    Conversation,
    /// Extracted knowledge.
    Knowledge,
    /// A condensed summary of a whole session.
    SessionSummary,
}

impl Source {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Conversation => "conversation",
            Self::Knowledge => "knowledge",
            Self::SessionSummary => "session_summary",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "conversation" => Ok(Self::Conversation),
            "knowledge" => Ok(Self::Knowledge),
            "session_summary" => Ok(Self::SessionSummary),
            _ => Err(format!("unknown source: {s}")),
        }
    }
}

/// Closed metadata schema carried by every record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// SHA-256 of the whole source file, shared by all its chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordMetadata {
    /// Metadata for a non-file record created now.
    pub fn new(source: Source) -> Self {
        let now = Utc::now();
        Self {
            source,
            project_path: None,
            file_path: None,
            session_id: None,
            category: None,
            content_hash: None,
            chunk_index: None,
            total_chunks: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Unit of storage: content plus its embedding and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
    /// Confidence at insert time, in `[0, 1]`. `None` means 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Record {
    /// A record with a fresh UUID v7 id and full confidence.
    pub fn new(content: impl Into<String>, embedding: Vec<f32>, source: Source) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            content: content.into(),
            embedding,
            metadata: RecordMetadata::new(source),
            confidence: None,
        }
    }

    /// Same record with a caller-supplied initial confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Conjunctive equality filter over record metadata.
///
/// Every set field must match; unset fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.project_path.is_none()
            && self.file_path.is_none()
            && self.session_id.is_none()
    }

    /// Build the SQL WHERE fragment and its parameters, prefixing each
    /// column with `alias`.
    pub(crate) fn to_sql(&self, alias: &str) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(source) = self.source {
            clauses.push(format!("{alias}.source = ?"));
            params.push(source.as_str().to_string());
        }
        if let Some(ref p) = self.project_path {
            clauses.push(format!("{alias}.project_path = ?"));
            params.push(p.clone());
        }
        if let Some(ref p) = self.file_path {
            clauses.push(format!("{alias}.file_path = ?"));
            params.push(p.clone());
        }
        if let Some(ref s) = self.session_id {
            clauses.push(format!("{alias}.session_id = ?"));
            params.push(s.clone());
        }
        (clauses.join(" AND "), params)
    }

    /// In-memory predicate mirror of [`Filter::to_sql`], used to post-filter
    /// KNN candidates.
    pub(crate) fn matches(&self, meta: &RecordMetadata) -> bool {
        if let Some(source) = self.source {
            if meta.source != source {
                return false;
            }
        }
        if let Some(ref p) = self.project_path {
            if meta.project_path.as_deref() != Some(p.as_str()) {
                return false;
            }
        }
        if let Some(ref p) = self.file_path {
            if meta.file_path.as_deref() != Some(p.as_str()) {
                return false;
            }
        }
        if let Some(ref s) = self.session_id {
            if meta.session_id.as_deref() != Some(s.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A single search result. `score` is normalized so higher is better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: RecordMetadata,
    pub score: f64,
    /// Cosine similarity, when the vector leg saw this id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    /// Lexical relevance, when the FTS leg saw this id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fts_score: Option<f64>,
    /// Position after rank fusion (1 = best), set by hybrid search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fused_rank: Option<usize>,
}

/// Store-level statistics.
#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub by_source: std::collections::HashMap<String, u64>,
    pub tracked_files: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_record: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_record: Option<String>,
}
