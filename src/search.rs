//! Search handler: query understanding, retrieval, enhancement and history

use crate::config::Config;
use crate::error::{DocseekError, Result};
use crate::models::{truncate_chars, ModelManager};
use crate::query::{ProcessedQuery, QueryComplexity, QueryIntent, QueryProcessor};
use crate::store::{Filters, SearchResult, VectorStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SNIPPET_WINDOW: usize = 50;
const SNIPPET_STRIDE: usize = 10;
const SNIPPET_HEAD_CHARS: usize = 200;
const MAX_SUGGESTIONS: usize = 3;

/// A search call
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    /// Falls back to `search.default_top_k`
    pub top_k: Option<usize>,
    /// Falls back to the store threshold
    pub threshold: Option<f32>,
    pub filters: Option<Filters>,
    pub rerank: bool,
    /// Search only entries embedded by this model; by default every model present is searched
    pub model: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters
            .get_or_insert_with(Filters::new)
            .insert(key.into(), value);
        self
    }

    pub fn rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A hit with explanation, snippet, confidence and related chunks
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedSearchResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub relevance_reason: String,
    pub snippet: String,
    pub confidence: f32,
    pub related_chunks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchStats {
    pub total_results: usize,
    pub search_time_ms: u64,
    pub query_complexity: QueryComplexity,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub processed_query: ProcessedQuery,
    pub results: Vec<EnhancedSearchResult>,
    pub stats: SearchStats,
    pub suggestions: Vec<String>,
}

/// One entry of the bounded query history
#[derive(Debug, Clone, Serialize)]
pub struct QueryRecord {
    pub query: String,
    pub intent: QueryIntent,
    pub result_count: usize,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate handler statistics since start (or the last clear)
#[derive(Debug, Clone, Serialize)]
pub struct HandlerStats {
    pub total_queries: u64,
    pub average_latency_ms: f64,
    pub intent_distribution: BTreeMap<String, u64>,
    pub history_len: usize,
}

#[derive(Debug, Clone)]
pub struct SearchHandlerConfig {
    pub default_top_k: usize,
    pub history_limit: usize,
    pub related_chunks: usize,
}

impl SearchHandlerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_top_k: config.search.default_top_k,
            history_limit: config.search.history_limit,
            related_chunks: config.search.related_chunks,
        }
    }
}

impl Default for SearchHandlerConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            history_limit: 100,
            related_chunks: 2,
        }
    }
}

#[derive(Default)]
struct History {
    recent: VecDeque<QueryRecord>,
    total_queries: u64,
    total_time: Duration,
    intents: BTreeMap<QueryIntent, u64>,
}

/// Turns text queries into enriched, ranked results
pub struct SearchHandler {
    models: Arc<ModelManager>,
    store: Arc<VectorStore>,
    processor: QueryProcessor,
    config: SearchHandlerConfig,
    history: Mutex<History>,
}

impl SearchHandler {
    pub fn new(
        models: Arc<ModelManager>,
        store: Arc<VectorStore>,
        config: SearchHandlerConfig,
    ) -> Result<Self> {
        Ok(Self {
            models,
            store,
            processor: QueryProcessor::new()?,
            config,
            history: Mutex::new(History::default()),
        })
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        if request.query.trim().is_empty() {
            return Err(DocseekError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        let start = Instant::now();
        let processed = self.processor.process(&request.query);
        debug!(
            "Processed query: intent={}, keywords={:?}, entities={:?}",
            processed.intent, processed.keywords, processed.entities
        );

        let top_k = request.top_k.unwrap_or(self.config.default_top_k);
        let raw = self.retrieve(&processed, &request, top_k).await?;

        let enhancements = raw.into_iter().map(|r| self.enhance(r, &processed));
        let mut results = futures::future::join_all(enhancements).await;

        if request.rerank {
            rerank(&mut results);
        }

        let suggestions = suggest(&processed, results.len());
        let elapsed = start.elapsed();

        let stats = SearchStats {
            total_results: results.len(),
            search_time_ms: elapsed.as_millis() as u64,
            query_complexity: processed.complexity(),
        };

        self.record(&processed, results.len(), elapsed).await;
        info!(
            "Search \"{}\" returned {} results in {}ms",
            processed.original, stats.total_results, stats.search_time_ms
        );

        Ok(SearchResponse {
            processed_query: processed,
            results,
            stats,
            suggestions,
        })
    }

    /// Recent queries, oldest first
    pub async fn history(&self) -> Vec<QueryRecord> {
        self.history.lock().await.recent.iter().cloned().collect()
    }

    pub async fn stats(&self) -> HandlerStats {
        let history = self.history.lock().await;
        let average_latency_ms = if history.total_queries == 0 {
            0.0
        } else {
            history.total_time.as_secs_f64() * 1000.0 / history.total_queries as f64
        };

        HandlerStats {
            total_queries: history.total_queries,
            average_latency_ms,
            intent_distribution: history
                .intents
                .iter()
                .map(|(intent, count)| (intent.to_string(), *count))
                .collect(),
            history_len: history.recent.len(),
        }
    }

    pub async fn clear_history(&self) {
        *self.history.lock().await = History::default();
    }

    /// Embed the query once per model space and merge the per-space hits by score
    ///
    /// A space whose query embedding fails is skipped; if every space fails
    /// the first error is returned.
    async fn retrieve(
        &self,
        query: &ProcessedQuery,
        request: &SearchRequest,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let spaces = match &request.model {
            Some(model) => vec![model.clone()],
            None => {
                let present = self.store.models().await?;
                if present.is_empty() {
                    vec![self.models.default_model().id.to_string()]
                } else {
                    present
                }
            }
        };

        let lookups = spaces.iter().map(|model| async move {
            let vector = self
                .models
                .embed_exact(query.embedding_text(), model)
                .await?;
            self.store
                .search_model(
                    &vector,
                    model,
                    top_k,
                    request.threshold,
                    request.filters.as_ref(),
                )
                .await
        });
        let outcomes = futures::future::join_all(lookups).await;

        let mut merged = Vec::new();
        let mut first_error = None;
        let mut searched = 0;
        for (model, outcome) in spaces.iter().zip(outcomes) {
            match outcome {
                Ok(hits) => {
                    searched += 1;
                    merged.extend(hits);
                }
                Err(e) => {
                    warn!("Skipping {} vectors for this query: {}", model, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if searched == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        merged.truncate(top_k);
        Ok(merged)
    }

    async fn enhance(&self, result: SearchResult, query: &ProcessedQuery) -> EnhancedSearchResult {
        let related_chunks = self.related_chunks(&result).await;

        EnhancedSearchResult {
            relevance_reason: relevance_reason(&result, query),
            snippet: build_snippet(&result.content, query),
            confidence: confidence(&result, query),
            related_chunks,
            result,
        }
    }

    /// Other chunks of the same file near `result`; failures yield an empty list
    async fn related_chunks(&self, result: &SearchResult) -> Vec<String> {
        if self.config.related_chunks == 0 {
            return Vec::new();
        }

        let candidates = self.config.related_chunks * 3;
        match self
            .store
            .find_similar(Some(&result.file_id), Some(&result.chunk_id), candidates)
            .await
        {
            Ok(similar) => similar
                .into_iter()
                .filter(|s| s.file_id == result.file_id && s.chunk_id != result.chunk_id)
                .take(self.config.related_chunks)
                .map(|s| s.chunk_id)
                .collect(),
            Err(e) => {
                warn!("Related chunk lookup failed for {}: {}", result.chunk_id, e);
                Vec::new()
            }
        }
    }

    async fn record(&self, query: &ProcessedQuery, result_count: usize, elapsed: Duration) {
        let mut history = self.history.lock().await;
        history.recent.push_back(QueryRecord {
            query: query.original.clone(),
            intent: query.intent,
            result_count,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
        while history.recent.len() > self.config.history_limit {
            history.recent.pop_front();
        }
        history.total_queries += 1;
        history.total_time += elapsed;
        *history.intents.entry(query.intent).or_insert(0) += 1;
    }
}

fn keyword_matches(content_lower: &str, query: &ProcessedQuery) -> usize {
    query
        .keywords
        .iter()
        .filter(|k| content_lower.contains(k.as_str()))
        .count()
}

fn entity_matches(content_lower: &str, query: &ProcessedQuery) -> usize {
    query
        .entities
        .iter()
        .filter(|e| content_lower.contains(&e.to_lowercase()))
        .count()
}

pub fn relevance_reason(result: &SearchResult, query: &ProcessedQuery) -> String {
    let content = result.content.to_lowercase();
    let keywords = keyword_matches(&content, query);
    let entities = entity_matches(&content, query);

    let mut parts = Vec::new();
    if keywords > 0 {
        parts.push(format!(
            "{} keyword match{}",
            keywords,
            if keywords == 1 { "" } else { "es" }
        ));
    }
    if entities > 0 {
        parts.push(format!(
            "{} entit{}",
            entities,
            if entities == 1 { "y" } else { "ies" }
        ));
    }
    parts.push(format!(
        "{}% semantic similarity",
        (result.score * 100.0).round() as u32
    ));
    parts.join(", ")
}

/// Best 50-word window by keyword/entity hits, or the head of the content
pub fn build_snippet(content: &str, query: &ProcessedQuery) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let keywords: HashSet<&str> = query.keywords.iter().map(String::as_str).collect();
    let entities: Vec<String> = query.entities.iter().map(|e| e.to_lowercase()).collect();

    let last_start = words.len().saturating_sub(SNIPPET_WINDOW);
    let mut best: Option<(usize, usize)> = None;

    for start in (0..=last_start).step_by(SNIPPET_STRIDE) {
        let end = (start + SNIPPET_WINDOW).min(words.len());
        let window = &words[start..end];

        let keyword_hits = window
            .iter()
            .filter(|w| {
                let normalized: String = w
                    .to_lowercase()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect();
                keywords.contains(normalized.as_str())
            })
            .count();
        let text = window.join(" ").to_lowercase();
        let entity_hits = entities
            .iter()
            .map(|e| text.matches(e.as_str()).count())
            .sum::<usize>();

        let score = keyword_hits + entity_hits;
        if score > 0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((start, score));
        }
    }

    match best {
        Some((start, _)) => {
            let end = (start + SNIPPET_WINDOW).min(words.len());
            let mut snippet = words[start..end].join(" ");
            if start > 0 {
                snippet.insert_str(0, "...");
            }
            if end < words.len() {
                snippet.push_str("...");
            }
            snippet
        }
        None => {
            let head = truncate_chars(content.trim(), SNIPPET_HEAD_CHARS);
            if head.len() < content.trim().len() {
                format!("{}...", head.trim_end())
            } else {
                head.to_string()
            }
        }
    }
}

/// Raw score boosted by exact entity matches, penalized for short weak hits
pub fn confidence(result: &SearchResult, query: &ProcessedQuery) -> f32 {
    let exact_entities = query
        .entities
        .iter()
        .filter(|e| result.content.contains(e.as_str()))
        .count();

    let mut confidence = (result.score + 0.1 * exact_entities as f32).min(1.0);
    if result.content.chars().count() < 100 && result.score < 0.9 {
        confidence *= 0.8;
    }
    confidence
}

/// Rewards longer content and multiple sentences, in [0, 1]
pub fn content_quality(content: &str) -> f32 {
    let length = (content.chars().count() as f32 / 500.0).min(1.0) * 0.7;
    let sentences = content
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();
    let structure = match sentences {
        0 => 0.0,
        1 => 0.15,
        _ => 0.3,
    };
    (length + structure).min(1.0)
}

pub fn rerank_score(result: &EnhancedSearchResult) -> f32 {
    0.6 * result.confidence + 0.3 * result.result.score + 0.1 * content_quality(&result.result.content)
}

fn rerank(results: &mut [EnhancedSearchResult]) {
    results.sort_by(|a, b| {
        rerank_score(b)
            .partial_cmp(&rerank_score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

pub fn suggest(query: &ProcessedQuery, result_count: usize) -> Vec<String> {
    let Some(top) = query.keywords.first() else {
        return Vec::new();
    };

    let mut suggestions = Vec::new();
    if query.intent == QueryIntent::Search {
        suggestions.push(format!("what is {}", top));
        suggestions.push(format!("how to use {}", top));
        suggestions.push(format!("{} examples", top));
    }
    if result_count < 3 && query.keywords.len() >= 2 {
        suggestions.push(format!("{} {}", top, query.keywords[1]));
        suggestions.push(format!("{} guide", top));
    }
    if result_count == 0 {
        suggestions.push(top.clone());
    }

    let mut seen = HashSet::new();
    suggestions.retain(|s| seen.insert(s.clone()));
    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}
