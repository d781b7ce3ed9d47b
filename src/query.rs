//! Query understanding: intent, entities, keywords, expansion and complexity

use crate::error::{DocseekError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been", "between",
    "but", "by", "can", "could", "define", "describe", "did", "do", "does", "explain", "for",
    "from", "had", "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my",
    "of", "on", "or", "our", "should", "so", "some", "tell", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "to", "using", "versus", "vs",
    "was", "we", "were", "what", "when", "where", "which", "who", "why", "will", "with", "would",
    "you", "your",
];

/// What the user is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryIntent {
    Search,
    Question,
    Comparison,
    Definition,
    HowTo,
    Explanation,
}

impl QueryIntent {
    pub fn semantic_type(self) -> SemanticType {
        match self {
            QueryIntent::HowTo => SemanticType::Procedural,
            QueryIntent::Comparison => SemanticType::Comparative,
            QueryIntent::Definition | QueryIntent::Explanation => SemanticType::Conceptual,
            QueryIntent::Search | QueryIntent::Question => SemanticType::Factual,
        }
    }

    /// Boilerplate terms appended to the query for this intent
    fn expansion_terms(self) -> Option<&'static str> {
        match self {
            QueryIntent::Definition => Some("meaning concept explanation"),
            QueryIntent::HowTo => Some("steps guide tutorial"),
            QueryIntent::Comparison => Some("difference comparison versus"),
            QueryIntent::Explanation => Some("reason cause explanation"),
            QueryIntent::Question => Some("answer information"),
            QueryIntent::Search => None,
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryIntent::Search => "SEARCH",
            QueryIntent::Question => "QUESTION",
            QueryIntent::Comparison => "COMPARISON",
            QueryIntent::Definition => "DEFINITION",
            QueryIntent::HowTo => "HOW_TO",
            QueryIntent::Explanation => "EXPLANATION",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Factual,
    Conceptual,
    Procedural,
    Comparative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    Simple,
    Medium,
    Complex,
}

impl fmt::Display for QueryComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryComplexity::Simple => write!(f, "simple"),
            QueryComplexity::Medium => write!(f, "medium"),
            QueryComplexity::Complex => write!(f, "complex"),
        }
    }
}

/// Score a query: keywords + 2 per entity, +2 for long queries, +3 for comparisons and explanations
pub fn score_complexity(
    keywords: usize,
    entities: usize,
    query_len: usize,
    intent: QueryIntent,
) -> QueryComplexity {
    let mut score = keywords + 2 * entities;
    if query_len > 50 {
        score += 2;
    }
    if matches!(intent, QueryIntent::Comparison | QueryIntent::Explanation) {
        score += 3;
    }

    match score {
        0..=3 => QueryComplexity::Simple,
        4..=7 => QueryComplexity::Medium,
        _ => QueryComplexity::Complex,
    }
}

/// A query after understanding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedQuery {
    pub original: String,
    pub expanded: Option<String>,
    pub intent: QueryIntent,
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    pub semantic_type: SemanticType,
}

impl ProcessedQuery {
    /// Text to embed: the expansion when present
    pub fn embedding_text(&self) -> &str {
        self.expanded.as_deref().unwrap_or(&self.original)
    }

    pub fn complexity(&self) -> QueryComplexity {
        score_complexity(
            self.keywords.len(),
            self.entities.len(),
            self.original.chars().count(),
            self.intent,
        )
    }
}

/// Rule-based query analyzer with pre-compiled patterns
pub struct QueryProcessor {
    /// Tested in order; first match wins
    intent_patterns: Vec<(QueryIntent, Regex)>,
    quoted: Regex,
    capitalized: Regex,
    symbolic: Regex,
    stop_words: HashSet<&'static str>,
}

impl QueryProcessor {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| DocseekError::Config(format!("Invalid query pattern: {}", e)))
        };

        let intent_patterns = vec![
            (
                QueryIntent::Definition,
                compile(
                    r"(?i)^\s*(what\s+(is|are)\s+(a|an|the)?\b|define\b|definition\s+of\b|meaning\s+of\b|what\s+does\s+.+\s+mean\b)",
                )?,
            ),
            (
                QueryIntent::Comparison,
                compile(
                    r"(?i)\b(vs\.?|versus|compare[ds]?|comparison|differences?\s+between|differ(s|ent|ence)?|better\s+than|pros\s+and\s+cons)\b",
                )?,
            ),
            (
                QueryIntent::HowTo,
                compile(
                    r"(?i)^\s*(how\s+(to|do\s+i|do\s+you|can\s+i|should\s+i)\b|steps?\s+(to|for)\b|guide\s+(to|for)\b|tutorial\b)",
                )?,
            ),
            (
                QueryIntent::Explanation,
                compile(
                    r"(?i)^\s*(why\b|explain\b|describe\b|reasons?\s+for\b|how\s+(does|do)\s+.+\s+work\b)",
                )?,
            ),
            (
                QueryIntent::Question,
                compile(
                    r"(?i)^\s*(who|what|when|where|which|whose|is|are|can|could|does|do|did|should|will|would|how)\b|\?\s*$",
                )?,
            ),
        ];

        Ok(Self {
            intent_patterns,
            quoted: compile(r#""([^"]+)"|“([^”]+)”"#)?,
            capitalized: compile(r"\b[A-Z][A-Za-z0-9]*(?:\s+[A-Z][A-Za-z0-9]*)*\b")?,
            symbolic: compile(r"\b[A-Za-z0-9]+(?:[-_./][A-Za-z0-9]+)+\b|\b[A-Za-z]*\d[A-Za-z0-9]*\b")?,
            stop_words: STOP_WORDS.iter().copied().collect(),
        })
    }

    pub fn process(&self, query: &str) -> ProcessedQuery {
        let original = query.trim().to_string();
        let intent = self.detect_intent(&original);
        let entities = self.extract_entities(&original);
        let keywords = self.extract_keywords(&original);
        let expanded = intent
            .expansion_terms()
            .map(|terms| format!("{} {}", original, terms));

        ProcessedQuery {
            expanded,
            intent,
            semantic_type: intent.semantic_type(),
            entities,
            keywords,
            original,
        }
    }

    pub fn detect_intent(&self, query: &str) -> QueryIntent {
        self.intent_patterns
            .iter()
            .find(|(_, pattern)| pattern.is_match(query))
            .map(|(intent, _)| *intent)
            .unwrap_or(QueryIntent::Search)
    }

    /// Quoted phrases, capitalized word runs and symbol-bearing tokens
    pub fn extract_entities(&self, query: &str) -> Vec<String> {
        let mut entities = Vec::new();

        for caps in self.quoted.captures_iter(query) {
            if let Some(phrase) = caps.get(1).or_else(|| caps.get(2)) {
                entities.push(phrase.as_str().trim().to_string());
            }
        }

        for found in self.capitalized.find_iter(query) {
            let words: Vec<&str> = found
                .as_str()
                .split_whitespace()
                .skip_while(|w| self.is_stop_word(w))
                .collect();
            if !words.is_empty() {
                entities.push(words.join(" "));
            }
        }

        for found in self.symbolic.find_iter(query) {
            if found.as_str().len() > 1 {
                entities.push(found.as_str().to_string());
            }
        }

        dedup(entities.into_iter().filter(|e| !e.is_empty()))
    }

    pub fn extract_keywords(&self, query: &str) -> Vec<String> {
        let cleaned: String = query
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();

        dedup(
            cleaned
                .split_whitespace()
                .filter(|w| w.chars().count() > 2 && !self.stop_words.contains(w))
                .map(str::to_string),
        )
    }

    fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word.to_lowercase().as_str())
    }
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> QueryProcessor {
        QueryProcessor::new().unwrap()
    }

    #[test]
    fn test_definition_intent() {
        let q = processor().process("What is a neural network?");
        assert_eq!(q.intent, QueryIntent::Definition);
        assert_eq!(q.semantic_type, SemanticType::Conceptual);
        assert_eq!(q.keywords, vec!["neural", "network"]);
        assert_eq!(
            q.expanded.as_deref(),
            Some("What is a neural network? meaning concept explanation")
        );
    }

    #[test]
    fn test_how_to_intent() {
        let q = processor().process("how to train a model");
        assert_eq!(q.intent, QueryIntent::HowTo);
        assert_eq!(q.semantic_type, SemanticType::Procedural);
        assert_eq!(q.keywords, vec!["train", "model"]);
    }

    #[test]
    fn test_intent_order() {
        let p = processor();
        assert_eq!(
            p.detect_intent("how is rust different from go"),
            QueryIntent::Comparison
        );
        assert_eq!(p.detect_intent("postgres vs mysql"), QueryIntent::Comparison);
        assert_eq!(
            p.detect_intent("why does the cache miss"),
            QueryIntent::Explanation
        );
        assert_eq!(
            p.detect_intent("how does garbage collection work"),
            QueryIntent::Explanation
        );
        assert_eq!(p.detect_intent("where are logs stored"), QueryIntent::Question);
        assert_eq!(p.detect_intent("hnsw graph layers"), QueryIntent::Search);
    }

    #[test]
    fn test_search_intent_has_no_expansion() {
        let q = processor().process("  vector database indexing  ");
        assert_eq!(q.original, "vector database indexing");
        assert_eq!(q.intent, QueryIntent::Search);
        assert!(q.expanded.is_none());
        assert_eq!(q.embedding_text(), "vector database indexing");
    }

    #[test]
    fn test_entity_extraction() {
        let entities = processor()
            .extract_entities(r#"What does "attention mask" mean in GPT-4 and Hugging Face v1.5"#);

        assert!(entities.contains(&"attention mask".to_string()));
        assert!(entities.contains(&"GPT-4".to_string()));
        assert!(entities.contains(&"Hugging Face".to_string()));
        assert!(entities.contains(&"v1.5".to_string()));
        assert!(!entities.contains(&"What".to_string()));
    }

    #[test]
    fn test_entities_deduplicated() {
        let entities = processor().extract_entities("Rust and Rust again");
        assert_eq!(entities.iter().filter(|e| *e == "Rust").count(), 1);
    }

    #[test]
    fn test_keywords_strip_punctuation_and_short_words() {
        let keywords = processor().extract_keywords("Is an API's latency, or API throughput, ok?");
        assert_eq!(keywords, vec!["apis", "latency", "api", "throughput"]);
    }

    #[test]
    fn test_complexity_scoring() {
        assert_eq!(
            score_complexity(2, 0, 20, QueryIntent::Search),
            QueryComplexity::Simple
        );
        assert_eq!(
            score_complexity(5, 2, 20, QueryIntent::Search),
            QueryComplexity::Complex
        );
        assert_eq!(
            score_complexity(2, 0, 60, QueryIntent::Search),
            QueryComplexity::Medium
        );
        assert_eq!(
            score_complexity(1, 0, 10, QueryIntent::Comparison),
            QueryComplexity::Medium
        );
    }
}
