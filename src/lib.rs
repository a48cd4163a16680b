//! Local-first memory and retrieval engine.
//!
//! Mnemo stores text as embedded, full-text-indexed records in a single
//! SQLite file and retrieves them with hybrid search: a vector k-NN leg
//! and a BM25 leg fused by Reciprocal Rank Fusion. Memories carry a
//! confidence that decays over time and is reinforced by access, so the
//! store forgets what nothing touches. A sync pipeline keeps project
//! files indexed incrementally, driven by a debounced filesystem watcher.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with FTS5 for keyword search and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for vector search
//! - **Embeddings**: ordered provider chain (OpenAI- and Ollama-compatible
//!   HTTP backends) ending in a deterministic local hash fallback
//! - **Search**: hybrid vector + BM25 merged via Reciprocal Rank Fusion
//! - **Lifecycle**: half-life confidence decay with access reinforcement
//!   and on-demand cleanup
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization, schema, and migrations
//! - [`decay`] — Pure confidence decay and reinforcement functions
//! - [`embedding`] — Embedding provider chain with fallback and caching
//! - [`store`] — Transactional record store and hybrid search
//! - [`sync`] — File chunking, incremental indexing, and the watcher
//! - [`facade`] — The [`facade::MemoryEngine`] entry point tying it together

pub mod config;
pub mod db;
pub mod decay;
pub mod embedding;
pub mod error;
pub mod facade;
pub mod store;
pub mod sync;

pub use config::MnemoConfig;
pub use error::{EngineError, Result};
pub use facade::MemoryEngine;
