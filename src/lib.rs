//! # Context Index
//!
//! Document-type-aware indexing and vector retrieval for AI context tools.
//!
//! Source code, Markdown, and issue-tracker records are chunked along their
//! own structure, embedded through a pluggable provider layer, and written to
//! a vector store. A SQLite registry tracks one content hash and the exact
//! set of vector ids per document, so re-indexing only touches what changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌─────────────┐
//! │ discovery │──▶│  chunk  │──▶│ embedding│──▶│ vector store│
//! └───────────┘   └─────────┘   └──────────┘   └──────┬──────┘
//!        index manager ──────── registry (SQLite)     │
//!                                                     ▼
//!                          query ──▶ embed ──▶ search + rank
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and validation |
//! | [`models`] | Core data types |
//! | [`detect`] | Document kind and language detection |
//! | [`chunk`] | Structure-aware chunking |
//! | [`embedding`] | Embedding providers and the provider manager |
//! | [`store`] | Vector-store trait, filters, and backends |
//! | [`registry`] | Document-index registry |
//! | [`discovery`] | Glob-based file discovery |
//! | [`index`] | Index manager |
//! | [`search`] | Search and ranking |
//! | [`engine`] | Facade over indexing and search |
//! | [`progress`] | Progress reporting sinks |
//! | [`stats`] | Statistics and performance counters |

pub mod chunk;
pub mod config;
pub mod detect;
pub mod discovery;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod models;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod search;
pub mod stats;
pub mod store;

pub use engine::Engine;
pub use error::{IndexError, Result};
