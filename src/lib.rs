//! Docseek - semantic search over document chunks
//!
//! Embeds chunks with a content-appropriate local model, stores them in a
//! durable HNSW index backed by SQLite metadata, and answers natural-language
//! queries with explained, optionally re-ranked results.

pub mod chunk;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod models;
pub mod query;
pub mod search;
pub mod storage;
pub mod store;

pub use engine::Engine;
pub use error::{DocseekError, Result};
