/// Static catalog of embedding models the manager can load
use serde::{Deserialize, Serialize};
use std::fmt;

/// Performance/memory tier of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Balanced,
    Accurate,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelTier::Fast => "fast",
            ModelTier::Balanced => "balanced",
            ModelTier::Accurate => "accurate",
        };
        f.write_str(name)
    }
}

/// Immutable description of an embedding model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub id: &'static str,
    /// Output vector length
    pub dimensions: usize,
    /// Maximum input length in tokens
    pub max_tokens: usize,
    pub tier: ModelTier,
    /// Approximate resident size once loaded
    pub memory_mb: u64,
}

impl ModelDescriptor {
    /// Input budget in characters, assuming 3 characters per token
    pub fn max_chars(&self) -> usize {
        self.max_tokens * 3
    }
}

pub const DEFAULT_MODEL_ID: &str = "all-MiniLM-L6-v2";

/// Catalog entries, fastest first
pub const CATALOG: &[ModelDescriptor] = &[
    ModelDescriptor {
        id: "all-MiniLM-L6-v2",
        dimensions: 384,
        max_tokens: 256,
        tier: ModelTier::Fast,
        memory_mb: 90,
    },
    ModelDescriptor {
        id: "all-MiniLM-L12-v2",
        dimensions: 384,
        max_tokens: 256,
        tier: ModelTier::Balanced,
        memory_mb: 120,
    },
    ModelDescriptor {
        id: "bge-small-en-v1.5",
        dimensions: 384,
        max_tokens: 512,
        tier: ModelTier::Accurate,
        memory_mb: 130,
    },
    ModelDescriptor {
        id: "bge-base-en-v1.5",
        dimensions: 768,
        max_tokens: 512,
        tier: ModelTier::Accurate,
        memory_mb: 440,
    },
];

/// Look up a model by id
pub fn find(id: &str) -> Option<&'static ModelDescriptor> {
    CATALOG.iter().find(|m| m.id.eq_ignore_ascii_case(id))
}

/// All catalog ids
pub fn ids() -> Vec<&'static str> {
    CATALOG.iter().map(|m| m.id).collect()
}

/// First model of `tier` producing `dimensions`-length vectors
pub fn for_tier(tier: ModelTier, dimensions: usize) -> Option<&'static ModelDescriptor> {
    CATALOG
        .iter()
        .find(|m| m.tier == tier && m.dimensions == dimensions)
}
