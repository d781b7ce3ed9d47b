//! Vector store: ANN index plus durable metadata
//!
//! The SQLite row store is the source of truth for content and vectors. The
//! HNSW graph is a rebuildable acceleration structure keyed by the same
//! integer ids; deletions only touch the rows and the in-memory map, so the
//! graph may hold stale ids until [`VectorStore::optimize`] rebuilds it.
//!
//! Every entry records the model that embedded it. Vectors from different
//! models share one graph but not one space, so model-restricted searches
//! only score entries of that model.

mod filter;

pub use filter::{matches_filters, Filters};

use crate::chunk::{Chunk, Metadata};
use crate::config::Config;
use crate::error::{DocseekError, Result};
use crate::index::{AnnIndex, HnswParams, IndexError};
use crate::storage::{Database, StorageLayout};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Upper bound on ANN candidates fetched per query
const MAX_CANDIDATES: usize = 100;
/// Threshold used when looking for neighbours of a stored chunk
const SIMILAR_THRESHOLD: f32 = 0.1;

/// One stored chunk with its vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Store-assigned id shared with the ANN graph
    pub id: u64,
    pub chunk_id: String,
    pub file_id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: Metadata,
    /// Creation time, unix milliseconds
    pub timestamp: i64,
    /// Catalog id of the model that produced `vector`
    pub model: String,
}

/// A chunk paired with its embedding, ready to be stored
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub model: String,
    pub vector: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, model: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            chunk,
            model: model.into(),
            vector,
        }
    }
}

/// A scored hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub file_id: String,
    pub content: String,
    /// Similarity in [0, 1]
    pub score: f32,
    pub metadata: Metadata,
    /// Raw cosine distance reported by the graph
    pub distance: f32,
}

/// Vector store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub vector_count: usize,
    pub file_count: usize,
    pub memory_estimate_bytes: u64,
    pub search_count: u64,
    pub avg_search_latency_ms: f64,
    /// Points in the ANN graph, stale ones included
    pub index_points: usize,
    /// Graph points with no live entry; reclaimed by `optimize`
    pub dangling_count: usize,
    /// Bytes under the data directory
    pub disk_usage_bytes: u64,
}

/// Settings for [`VectorStore`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub dimensions: usize,
    pub similarity_threshold: f32,
    pub hnsw: HnswParams,
    pub auto_save: bool,
    pub search_timeout: Duration,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>, dimensions: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            dimensions,
            similarity_threshold: 0.3,
            hnsw: HnswParams::default(),
            auto_save: true,
            search_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            data_dir: config.data_dir()?,
            dimensions: config.index.dimensions,
            similarity_threshold: config.index.similarity_threshold,
            hnsw: HnswParams {
                m: config.index.hnsw_m,
                ef_construction: config.index.hnsw_ef_construction,
                ef_search: config.index.hnsw_ef_search,
                max_elements: config.index.max_elements,
            },
            auto_save: config.storage.auto_save,
            search_timeout: config.search_timeout(),
        })
    }
}

struct StoreState {
    layout: StorageLayout,
    db: Database,
    index: Arc<AnnIndex>,
    entries: HashMap<u64, VectorEntry>,
    by_chunk: HashMap<String, u64>,
    /// Live entry count per embedding model
    models: BTreeMap<String, usize>,
    next_id: u64,
}

impl StoreState {
    fn insert_entry(&mut self, entry: VectorEntry) {
        if let Some(previous) = self.by_chunk.insert(entry.chunk_id.clone(), entry.id) {
            if previous != entry.id {
                self.forget(previous);
            }
        }
        *self.models.entry(entry.model.clone()).or_insert(0) += 1;
        self.entries.insert(entry.id, entry);
    }

    /// Drop an entry from the live maps, leaving `by_chunk` to the caller
    fn forget(&mut self, id: u64) -> Option<VectorEntry> {
        let entry = self.entries.remove(&id)?;
        if let Some(count) = self.models.get_mut(&entry.model) {
            *count -= 1;
            if *count == 0 {
                self.models.remove(&entry.model);
            }
        }
        Some(entry)
    }

    fn rebuild_index(&self, params: HnswParams, dimensions: usize) -> Result<AnnIndex> {
        let mut live: Vec<&VectorEntry> = self.entries.values().collect();
        live.sort_by_key(|e| e.id);
        let index = AnnIndex::build(
            dimensions,
            params,
            live.iter().map(|e| (e.id, e.vector.as_slice())),
        )?;
        Ok(index)
    }
}

/// Durable ANN index with metadata, filtering and maintenance
pub struct VectorStore {
    config: StoreConfig,
    state: RwLock<Option<StoreState>>,
    search_count: AtomicU64,
    search_micros: AtomicU64,
}

impl VectorStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
            search_count: AtomicU64::new(0),
            search_micros: AtomicU64::new(0),
        }
    }

    /// Open the metadata store, load rows, then load or rebuild the ANN index
    pub async fn init(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let layout = StorageLayout::create(self.config.data_dir.clone())?;
        let db = Database::new(&layout.database_path())?;

        let rows = db.load_entries()?;
        if let Some(bad) = rows.iter().find(|e| e.vector.len() != self.config.dimensions) {
            return Err(DocseekError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: bad.vector.len(),
            });
        }
        let db_max_id = rows.iter().map(|e| e.id).max();

        let mut state = StoreState {
            layout,
            db,
            index: Arc::new(AnnIndex::new(self.config.dimensions, self.config.hnsw)),
            entries: HashMap::with_capacity(rows.len()),
            by_chunk: HashMap::with_capacity(rows.len()),
            models: BTreeMap::new(),
            next_id: 0,
        };
        for entry in rows {
            state.insert_entry(entry);
        }

        let index = match AnnIndex::load(&state.layout.index_dir()) {
            Ok((index, manifest))
                if manifest.dimension == self.config.dimensions && manifest.max_id >= db_max_id =>
            {
                info!(
                    "Loaded HNSW index with {} points ({} live entries)",
                    index.len(),
                    state.entries.len()
                );
                Some(index)
            }
            Ok((_, manifest)) => {
                warn!(
                    "Persisted index is stale (dimension {}, max id {:?}; rows max id {:?}), rebuilding from metadata",
                    manifest.dimension, manifest.max_id, db_max_id
                );
                None
            }
            Err(IndexError::IndexNotFound(_)) if state.entries.is_empty() => {
                Some(AnnIndex::new(self.config.dimensions, self.config.hnsw))
            }
            Err(e) => {
                warn!("Failed to load persisted index ({}), rebuilding from metadata", e);
                None
            }
        };

        let rebuilt = index.is_none();
        let index = match index {
            Some(index) => index,
            None => state.rebuild_index(self.config.hnsw, self.config.dimensions)?,
        };

        // Stale graph points keep their ids, so new ids start above both sets
        state.next_id = db_max_id.max(index.max_id()).map_or(0, |id| id + 1);
        state.index = Arc::new(index);

        if rebuilt && self.config.auto_save && !state.entries.is_empty() {
            persist(&state).await?;
        }

        info!(
            "Vector store ready at {} ({} vectors, next id {})",
            state.layout.base_path().display(),
            state.entries.len(),
            state.next_id
        );
        *guard = Some(state);
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Store embedded chunks for `file_id`, replacing any entry with the same chunk id
    ///
    /// Returns the ids assigned, in input order.
    pub async fn add(&self, file_id: &str, chunks: Vec<EmbeddedChunk>) -> Result<Vec<u64>> {
        let mut guard = self.state.write().await;
        let state = ready_mut(&mut guard)?;

        for item in &chunks {
            self.check_vector(&item.vector)?;
            if item.chunk.id.is_empty() {
                return Err(DocseekError::InvalidInput("Chunk id cannot be empty".to_string()));
            }
            if item.model.is_empty() {
                return Err(DocseekError::InvalidInput("Model id cannot be empty".to_string()));
            }
        }
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let base_id = state.next_id;
        let entries: Vec<VectorEntry> = chunks
            .into_iter()
            .enumerate()
            .map(|(offset, item)| VectorEntry {
                id: base_id + offset as u64,
                chunk_id: item.chunk.id,
                file_id: file_id.to_string(),
                vector: item.vector,
                content: item.chunk.content,
                metadata: item.chunk.metadata,
                timestamp,
                model: item.model,
            })
            .collect();

        state.db.upsert_entries(&entries)?;

        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        state.next_id += entries.len() as u64;
        for entry in entries {
            state.index.insert(entry.id, &entry.vector)?;
            state.insert_entry(entry);
        }

        debug!("Added {} vectors for file {}", ids.len(), file_id);

        // The rows are committed; a failed dump is rebuilt from them at next init
        if self.config.auto_save {
            if let Err(e) = persist(state).await {
                warn!("Failed to persist index after add: {}", e);
            }
        }
        Ok(ids)
    }

    /// Nearest stored chunks to `query` across every model, best first
    ///
    /// Over-fetches from the graph to survive filtering, drops stale ids,
    /// candidates below the threshold, and candidates failing `filters`.
    pub async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: Option<f32>,
        filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>> {
        self.search_in(query, None, top_k, threshold, filters).await
    }

    /// Like [`search`](Self::search), scoring only entries embedded by `model`
    pub async fn search_model(
        &self,
        query: &[f32],
        model: &str,
        top_k: usize,
        threshold: Option<f32>,
        filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>> {
        self.search_in(query, Some(model), top_k, threshold, filters)
            .await
    }

    async fn search_in(
        &self,
        query: &[f32],
        model: Option<&str>,
        top_k: usize,
        threshold: Option<f32>,
        filters: Option<&Filters>,
    ) -> Result<Vec<SearchResult>> {
        let guard = self.state.read().await;
        let state = ready(&guard)?;
        self.check_vector(query)?;

        let start = Instant::now();
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);

        let in_space = model.map_or(state.entries.len(), |m| {
            state.models.get(m).copied().unwrap_or(0)
        });
        if top_k == 0 || in_space == 0 {
            self.record_search(start.elapsed());
            return Ok(Vec::new());
        }

        // Other models' points compete for graph slots, so widen the net per model present
        let spaces = if model.is_some() { state.models.len().max(1) } else { 1 };
        let candidates = top_k
            .saturating_mul(2)
            .min(MAX_CANDIDATES)
            .saturating_mul(spaces);
        let neighbors = self
            .query_index(Arc::clone(&state.index), query.to_vec(), candidates)
            .await?;

        let mut results: Vec<(u64, SearchResult)> = neighbors
            .into_iter()
            .filter_map(|neighbor| {
                let entry = state.entries.get(&neighbor.id)?;
                if model.map_or(false, |m| entry.model != m) {
                    return None;
                }
                let score = neighbor.similarity();
                if score < threshold {
                    return None;
                }
                if let Some(filters) = filters {
                    if !matches_filters(&entry.metadata, filters) {
                        return None;
                    }
                }
                Some((
                    entry.id,
                    SearchResult {
                        chunk_id: entry.chunk_id.clone(),
                        file_id: entry.file_id.clone(),
                        content: entry.content.clone(),
                        score,
                        metadata: entry.metadata.clone(),
                        distance: neighbor.distance,
                    },
                ))
            })
            .collect();

        results.sort_by(|(id_a, a), (id_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(id_a.cmp(id_b))
        });
        results.truncate(top_k);

        self.record_search(start.elapsed());
        Ok(results.into_iter().map(|(_, r)| r).collect())
    }

    /// Chunks similar to a stored reference chunk, excluding the reference itself
    ///
    /// The reference is the first entry matching `chunk_id` and/or `file_id`.
    /// Only entries embedded by the reference's model are compared. No
    /// reference means an empty result.
    pub async fn find_similar(
        &self,
        file_id: Option<&str>,
        chunk_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let reference = {
            let guard = self.state.read().await;
            let state = ready(&guard)?;
            if file_id.is_none() && chunk_id.is_none() {
                return Ok(Vec::new());
            }

            state
                .entries
                .values()
                .filter(|e| chunk_id.map_or(true, |c| e.chunk_id == c))
                .filter(|e| file_id.map_or(true, |f| e.file_id == f))
                .min_by_key(|e| e.id)
                .map(|e| (e.chunk_id.clone(), e.model.clone(), e.vector.clone()))
        };

        let Some((reference_chunk, model, vector)) = reference else {
            return Ok(Vec::new());
        };

        let mut results = self
            .search_model(
                &vector,
                &model,
                top_k.saturating_add(1),
                Some(SIMILAR_THRESHOLD),
                None,
            )
            .await?;
        results.retain(|r| r.chunk_id != reference_chunk);
        results.truncate(top_k);
        Ok(results)
    }

    /// Delete every entry of `file_id` from the rows and the live map
    ///
    /// The graph keeps the stale points until the next `optimize`.
    pub async fn remove_by_file_id(&self, file_id: &str) -> Result<usize> {
        let mut guard = self.state.write().await;
        let state = ready_mut(&mut guard)?;

        let removed = state.db.delete_by_file_id(file_id)?;

        let stale: Vec<u64> = state
            .entries
            .values()
            .filter(|e| e.file_id == file_id)
            .map(|e| e.id)
            .collect();
        for id in stale {
            if let Some(entry) = state.forget(id) {
                state.by_chunk.remove(&entry.chunk_id);
            }
        }

        info!("Removed {} vectors for file {}", removed, file_id);
        Ok(removed)
    }

    /// Rebuild the graph from live entries only, returning how many stale points were dropped
    pub async fn optimize(&self) -> Result<usize> {
        let mut guard = self.state.write().await;
        let state = ready_mut(&mut guard)?;

        let before = state.index.len();
        let index = state.rebuild_index(self.config.hnsw, self.config.dimensions)?;
        let reclaimed = before.saturating_sub(index.len());
        state.index = Arc::new(index);

        info!(
            "Optimized index: {} live points, {} stale points reclaimed",
            state.entries.len(),
            reclaimed
        );

        if self.config.auto_save {
            if let Err(e) = persist(state).await {
                warn!("Failed to persist index after optimize: {}", e);
            }
        }
        Ok(reclaimed)
    }

    /// Persist the ANN graph to disk
    pub async fn save(&self) -> Result<()> {
        let guard = self.state.read().await;
        let state = ready(&guard)?;
        persist(state).await
    }

    /// Wipe rows, graph, persisted files, id counter and statistics
    pub async fn clear(&self) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = ready_mut(&mut guard)?;

        state.db.clear()?;
        AnnIndex::remove_files(&state.layout.index_dir())?;
        state.index = Arc::new(AnnIndex::new(self.config.dimensions, self.config.hnsw));
        state.entries.clear();
        state.by_chunk.clear();
        state.models.clear();
        state.next_id = 0;

        self.search_count.store(0, Ordering::SeqCst);
        self.search_micros.store(0, Ordering::SeqCst);

        info!("Cleared vector store");
        Ok(())
    }

    /// Stored entry for `chunk_id`
    pub async fn get(&self, chunk_id: &str) -> Result<Option<VectorEntry>> {
        let guard = self.state.read().await;
        let state = ready(&guard)?;
        Ok(state
            .by_chunk
            .get(chunk_id)
            .and_then(|id| state.entries.get(id))
            .cloned())
    }

    /// Number of live entries
    pub async fn len(&self) -> Result<usize> {
        let guard = self.state.read().await;
        Ok(ready(&guard)?.entries.len())
    }

    /// Models with at least one live entry, sorted
    pub async fn models(&self) -> Result<Vec<String>> {
        let guard = self.state.read().await;
        Ok(ready(&guard)?.models.keys().cloned().collect())
    }

    /// Distinct file ids with at least one live entry, sorted
    pub async fn file_ids(&self) -> Result<Vec<String>> {
        let guard = self.state.read().await;
        let state = ready(&guard)?;
        let mut ids: Vec<String> = state
            .entries
            .values()
            .map(|e| e.file_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let guard = self.state.read().await;
        let state = ready(&guard)?;

        let file_count = state
            .entries
            .values()
            .map(|e| e.file_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let entry_bytes: usize = state
            .entries
            .values()
            .map(|e| {
                e.vector.len() * std::mem::size_of::<f32>()
                    + e.content.len()
                    + e.chunk_id.len()
                    + e.file_id.len()
                    + std::mem::size_of::<VectorEntry>()
            })
            .sum();
        let params = state.index.params();
        let graph_bytes = state.index.len()
            * (self.config.dimensions * std::mem::size_of::<f32>()
                + params.m * 2 * std::mem::size_of::<usize>());

        let search_count = self.search_count.load(Ordering::SeqCst);
        let avg_search_latency_ms = if search_count == 0 {
            0.0
        } else {
            self.search_micros.load(Ordering::SeqCst) as f64 / search_count as f64 / 1000.0
        };

        Ok(StoreStats {
            vector_count: state.entries.len(),
            file_count,
            memory_estimate_bytes: (entry_bytes + graph_bytes) as u64,
            search_count,
            avg_search_latency_ms,
            index_points: state.index.len(),
            dangling_count: state.index.len().saturating_sub(state.entries.len()),
            disk_usage_bytes: state.layout.disk_usage()?,
        })
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(DocseekError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: vector.len(),
            });
        }
        if vector.iter().all(|v| *v == 0.0) || vector.iter().any(|v| !v.is_finite()) {
            return Err(DocseekError::InvalidInput(
                "Vector must be finite with non-zero norm".to_string(),
            ));
        }
        Ok(())
    }

    async fn query_index(
        &self,
        index: Arc<AnnIndex>,
        query: Vec<f32>,
        k: usize,
    ) -> Result<Vec<crate::index::Neighbor>> {
        let task = tokio::task::spawn_blocking(move || index.search(&query, k));
        match tokio::time::timeout(self.config.search_timeout, task).await {
            Err(_) => Err(DocseekError::Timeout {
                operation: "index search",
                after_ms: self.config.search_timeout.as_millis() as u64,
            }),
            Ok(Err(join_error)) => Err(DocseekError::Other(join_error.into())),
            Ok(Ok(result)) => Ok(result?),
        }
    }

    fn record_search(&self, elapsed: Duration) {
        self.search_count.fetch_add(1, Ordering::SeqCst);
        self.search_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::SeqCst);
    }
}

fn ready(state: &Option<StoreState>) -> Result<&StoreState> {
    state.as_ref().ok_or(DocseekError::NotInitialized {
        component: "vector store",
    })
}

fn ready_mut(state: &mut Option<StoreState>) -> Result<&mut StoreState> {
    state.as_mut().ok_or(DocseekError::NotInitialized {
        component: "vector store",
    })
}

/// Dump the graph on the blocking pool
async fn persist(state: &StoreState) -> Result<()> {
    let index = Arc::clone(&state.index);
    let dir = state.layout.index_dir();
    let manifest = tokio::task::spawn_blocking(move || index.save(&dir))
        .await
        .map_err(|e| DocseekError::Other(e.into()))??;
    debug!("Persisted index: {} points", manifest.point_count);
    Ok(())
}
