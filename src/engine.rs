//! Engine: owns the model manager, vector store and search handler
//!
//! Built once per process from a [`Config`]; callers share the components
//! through the `Arc`s it hands out.

use crate::chunk::Chunk;
use crate::config::Config;
use crate::error::{DocseekError, Result};
use crate::models::{backend_from_name, InferenceBackend, ModelManager, ModelManagerConfig, ModelStats};
use crate::search::{HandlerStats, SearchHandler, SearchHandlerConfig};
use crate::store::{EmbeddedChunk, StoreConfig, StoreStats, VectorStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Combined statistics of all components
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub models: ModelStats,
    pub store: StoreStats,
    pub search: HandlerStats,
}

pub struct Engine {
    models: Arc<ModelManager>,
    store: Arc<VectorStore>,
    search: Arc<SearchHandler>,
}

impl Engine {
    /// Initialize every component against `backend`
    pub async fn open(config: &Config, backend: Arc<dyn InferenceBackend>) -> Result<Self> {
        let models = Arc::new(ModelManager::new(
            backend,
            ModelManagerConfig::from_config(config),
        )?);
        models.init().await?;

        let store = Arc::new(VectorStore::new(StoreConfig::from_config(config)?));
        store.init().await?;

        let search = Arc::new(SearchHandler::new(
            Arc::clone(&models),
            Arc::clone(&store),
            SearchHandlerConfig::from_config(config),
        )?);

        info!("Engine ready (backend: {})", config.models.backend);
        Ok(Self {
            models,
            store,
            search,
        })
    }

    /// Open with the backend named in `models.backend`
    pub async fn open_default(config: &Config) -> Result<Self> {
        let backend = backend_from_name(&config.models.backend).ok_or_else(|| {
            DocseekError::Config(format!(
                "Unknown inference backend: {}",
                config.models.backend
            ))
        })?;
        Self::open(config, backend).await
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn search(&self) -> &Arc<SearchHandler> {
        &self.search
    }

    /// Embed and store the chunks of one file, returning how many were stored
    ///
    /// Each chunk gets its own model; chunks sharing a model are embedded as
    /// one batch. Every stored entry records its model so queries are compared
    /// within one embedding space. Nothing is written unless every chunk embeds.
    pub async fn add_chunks(&self, file_id: &str, chunks: Vec<Chunk>) -> Result<usize> {
        if file_id.is_empty() {
            return Err(DocseekError::InvalidInput("File id cannot be empty".to_string()));
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut groups: BTreeMap<&'static str, Vec<Chunk>> = BTreeMap::new();
        for mut chunk in chunks {
            let model = self
                .models
                .select_model(&chunk.content, None, Some(&chunk.metadata));
            chunk.file_id = file_id.to_string();
            groups.entry(model).or_default().push(chunk);
        }

        let mut embedded = Vec::new();
        for (model, group) in groups {
            let texts: Vec<String> = group.iter().map(|c| c.content.clone()).collect();
            let vectors = self.models.embed_batch_tagged(&texts, Some(model)).await?;
            debug!("Embedded {} chunks of {} with {}", group.len(), file_id, model);

            // A chunk that fell back is stored under the model that actually embedded it
            embedded.extend(
                group
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, (used, vector))| EmbeddedChunk::new(chunk, used, vector)),
            );
        }

        let ids = self.store.add(file_id, embedded).await?;
        info!("Indexed {} chunks for file {}", ids.len(), file_id);
        Ok(ids.len())
    }

    pub async fn remove_file(&self, file_id: &str) -> Result<usize> {
        self.store.remove_by_file_id(file_id).await
    }

    pub async fn optimize(&self) -> Result<usize> {
        self.store.optimize().await
    }

    pub async fn save(&self) -> Result<()> {
        self.store.save().await
    }

    /// Wipe the store and the query history
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        self.search.clear_history().await;
        Ok(())
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            models: self.models.stats().await,
            store: self.store.stats().await?,
            search: self.search.stats().await,
        })
    }
}
