//! Content heuristics used to pick an embedding model tier
//!
//! Every path returns a tier; callers resolve it against the catalog and fall
//! back to the default model, so selection never fails.

use super::catalog::ModelTier;
use crate::chunk::Metadata;
use crate::error::{DocseekError, Result};
use regex::Regex;

const TECHNICAL_TERMS: &[&str] = &[
    "algorithm",
    "api",
    "architecture",
    "compiler",
    "database",
    "embedding",
    "encryption",
    "framework",
    "gradient",
    "kernel",
    "latency",
    "neural",
    "optimization",
    "protocol",
    "regression",
    "runtime",
    "tensor",
    "throughput",
    "vector",
];

/// Content features extracted by [`ContentClassifier`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentProfile {
    pub has_code: bool,
    pub has_formula: bool,
    pub has_table: bool,
    pub technical_terms: usize,
    pub length: usize,
}

/// Pre-compiled patterns for content classification
pub struct ContentClassifier {
    code: Regex,
    formula: Regex,
    table: Regex,
    technical: Regex,
}

impl ContentClassifier {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| DocseekError::Config(format!("Invalid classifier pattern: {}", e)))
        };

        Ok(Self {
            code: compile(
                r"(?m)^\s*(fn|def|class|function|import|package|public|private|#include)\b|=>|\)\s*\{|;\s*$",
            )?,
            formula: compile(
                r"\\(frac|sum|int|sqrt)\b|[∑∫√∂∆]|\b[a-zA-Z]\w*\s*=\s*[-+]?[\w(]+\s*[-+*/^]\s*[\w(]",
            )?,
            table: compile(r"(?m)^\s*\|.*\|.*\|\s*$|(?m)^[^\t\n]*\t[^\t\n]*\t")?,
            technical: compile(&format!(r"(?i)\b({})s?\b", TECHNICAL_TERMS.join("|")))?,
        })
    }

    pub fn profile(&self, content: &str) -> ContentProfile {
        ContentProfile {
            has_code: self.code.is_match(content),
            has_formula: self.formula.is_match(content),
            has_table: self.table.is_match(content),
            technical_terms: self.technical.find_iter(content).count(),
            length: content.chars().count(),
        }
    }

    /// Recommend a tier from the content and any declared metadata
    pub fn recommend(&self, content: &str, metadata: Option<&Metadata>) -> ModelTier {
        if let Some(tier) = metadata.and_then(tier_from_metadata) {
            return tier;
        }
        tier_from_profile(&self.profile(content))
    }
}

fn tier_from_metadata(metadata: &Metadata) -> Option<ModelTier> {
    let declared = |key: &str| {
        metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_ascii_lowercase())
    };

    if let Some(content_type) = declared("content_type").or_else(|| declared("type")) {
        match content_type.as_str() {
            "code" | "source" | "source_code" => return Some(ModelTier::Accurate),
            "table" | "spreadsheet" | "csv" => return Some(ModelTier::Balanced),
            _ => {}
        }
    }

    match declared("complexity").as_deref() {
        Some("high") => Some(ModelTier::Accurate),
        Some("medium") => Some(ModelTier::Balanced),
        Some("low") => Some(ModelTier::Fast),
        _ => None,
    }
}

fn tier_from_profile(profile: &ContentProfile) -> ModelTier {
    if profile.has_code || profile.has_formula {
        ModelTier::Accurate
    } else if profile.has_table || profile.technical_terms >= 3 || profile.length > 2000 {
        ModelTier::Balanced
    } else if profile.technical_terms >= 1 && profile.length > 500 {
        ModelTier::Balanced
    } else {
        ModelTier::Fast
    }
}
