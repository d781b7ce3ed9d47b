//! Content chunks handed over by the ingestion pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Arbitrary key/value metadata attached to a chunk
pub type Metadata = HashMap<String, serde_json::Value>;

/// A unit of extracted document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Globally unique chunk id
    pub id: String,
    /// Owning file id; may be omitted in ingestion input
    #[serde(default)]
    pub file_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(
        id: impl Into<String>,
        file_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            file_id: file_id.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
