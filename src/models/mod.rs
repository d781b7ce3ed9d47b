//! Model manager: picks and runs embedding models
//!
//! Architecture:
//! - Static catalog of models grouped into fast/balanced/accurate tiers
//! - ContentClassifier heuristics to pick a tier per piece of content
//! - InferenceBackend trait for the runtime that actually computes vectors
//! - Bounded set of loaded models with usage statistics and eviction

mod backend;
pub mod catalog;
mod selector;

pub use backend::{from_name as backend_from_name, FastEmbedBackend, InferenceBackend, InferenceError};
pub use catalog::{ModelDescriptor, ModelTier, DEFAULT_MODEL_ID};
pub use selector::{ContentClassifier, ContentProfile};

use crate::chunk::Metadata;
use crate::config::Config;
use crate::error::{DocseekError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Runtime settings for [`ModelManager`]
#[derive(Debug, Clone)]
pub struct ModelManagerConfig {
    pub default_model: String,
    /// Vector length the downstream store accepts
    pub dimensions: usize,
    pub max_loaded_models: usize,
    pub batch_size: usize,
    pub inference_timeout: Duration,
    pub adaptive_selection: bool,
}

impl ModelManagerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_model: config.models.default_model.clone(),
            dimensions: config.index.dimensions,
            max_loaded_models: config.models.max_loaded_models,
            batch_size: config.models.batch_size,
            inference_timeout: config.inference_timeout(),
            adaptive_selection: config.models.adaptive_selection,
        }
    }
}

impl Default for ModelManagerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A model the backend has loaded
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub descriptor: &'static ModelDescriptor,
    pub usage_count: u64,
    pub total_latency: Duration,
    /// Calls currently running against this model; eviction skips models with any
    pub in_flight: usize,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedModel {
    fn new(descriptor: &'static ModelDescriptor) -> Self {
        Self {
            descriptor,
            usage_count: 0,
            total_latency: Duration::ZERO,
            in_flight: 0,
            loaded_at: Utc::now(),
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.usage_count == 0 {
            0.0
        } else {
            self.total_latency.as_secs_f64() * 1000.0 / self.usage_count as f64
        }
    }
}

/// Model manager statistics
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub backend: String,
    pub loaded_models: Vec<String>,
    pub usage_counts: BTreeMap<String, u64>,
    pub avg_latency_ms: BTreeMap<String, f64>,
    pub estimated_memory_mb_by_tier: BTreeMap<String, u64>,
}

#[derive(Default)]
struct ManagerState {
    initialized: bool,
    loaded: HashMap<&'static str, LoadedModel>,
}

/// Selects, loads, evicts and runs embedding models
///
/// All bookkeeping happens under one async mutex; inference itself runs on
/// the blocking pool outside the lock so batch sub-requests overlap.
pub struct ModelManager {
    backend: Arc<dyn InferenceBackend>,
    classifier: ContentClassifier,
    default_model: &'static ModelDescriptor,
    config: ModelManagerConfig,
    state: Mutex<ManagerState>,
}

impl ModelManager {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: ModelManagerConfig) -> Result<Self> {
        let default_model = catalog::find(&config.default_model).ok_or_else(|| {
            DocseekError::ModelNotFound {
                id: config.default_model.clone(),
            }
        })?;

        if config.max_loaded_models == 0 || config.batch_size == 0 {
            return Err(DocseekError::Config(
                "max_loaded_models and batch_size must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            backend,
            classifier: ContentClassifier::new()?,
            default_model,
            config,
            state: Mutex::new(ManagerState::default()),
        })
    }

    /// Load the default model; every other operation requires this first
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }

        self.load_into(&mut state, self.default_model).await?;
        state.initialized = true;

        info!(
            "Model manager ready (backend: {}, default: {})",
            self.backend.name(),
            self.default_model.id
        );
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    pub fn default_model(&self) -> &'static ModelDescriptor {
        self.default_model
    }

    /// Pick a model id for `content`
    ///
    /// A valid `hint` wins. Otherwise the content heuristics choose a tier and
    /// the first catalog model of that tier matching the target dimensionality
    /// is used, defaulting to the default model.
    pub fn select_model(
        &self,
        content: &str,
        hint: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> &'static str {
        if let Some(hint) = hint {
            match catalog::find(hint) {
                Some(descriptor) => return descriptor.id,
                None => warn!("Ignoring unknown model hint: {}", hint),
            }
        }

        if !self.config.adaptive_selection {
            return self.default_model.id;
        }

        let tier = self.classifier.recommend(content, metadata);
        let selected = catalog::for_tier(tier, self.config.dimensions)
            .map(|d| d.id)
            .unwrap_or(self.default_model.id);

        debug!("Selected model {} (tier {})", selected, tier);
        selected
    }

    /// Embed a single text, falling back to the default model once on failure
    pub async fn embed(&self, text: &str, model_id: Option<&str>) -> Result<Vec<f32>> {
        self.embed_tagged(text, model_id)
            .await
            .map(|(_, vector)| vector)
    }

    /// Like [`embed`](Self::embed), also returning the model that produced the vector
    pub async fn embed_tagged(
        &self,
        text: &str,
        model_id: Option<&str>,
    ) -> Result<(&'static str, Vec<f32>)> {
        self.ensure_initialized().await?;
        let requested = self.resolve(model_id)?;

        match self.embed_with(requested, text).await {
            Ok(vector) => Ok((requested.id, vector)),
            Err(e) if requested.id != self.default_model.id && is_inference_failure(&e) => {
                warn!(
                    "Embedding with {} failed ({}), retrying once with {}",
                    requested.id, e, self.default_model.id
                );
                let vector = self.embed_with(self.default_model, text).await?;
                Ok((self.default_model.id, vector))
            }
            Err(e) => Err(e),
        }
    }

    /// Embed with exactly `model_id`; a failure is returned, never retried elsewhere
    ///
    /// For query vectors that must land in the space of stored entries.
    pub async fn embed_exact(&self, text: &str, model_id: &str) -> Result<Vec<f32>> {
        self.ensure_initialized().await?;
        let model = self.resolve(Some(model_id))?;
        self.embed_with(model, text).await
    }

    /// Embed many texts in fixed-size sub-batches; output order matches input order
    pub async fn embed_batch(
        &self,
        texts: &[String],
        model_id: Option<&str>,
    ) -> Result<Vec<Vec<f32>>> {
        let tagged = self.embed_batch_tagged(texts, model_id).await?;
        Ok(tagged.into_iter().map(|(_, vector)| vector).collect())
    }

    /// Batch form of [`embed_tagged`](Self::embed_tagged)
    ///
    /// Fallback is decided per text, so one batch may mix models.
    pub async fn embed_batch_tagged(
        &self,
        texts: &[String],
        model_id: Option<&str>,
    ) -> Result<Vec<(&'static str, Vec<f32>)>> {
        self.ensure_initialized().await?;
        self.resolve(model_id)?;

        let mut vectors = Vec::with_capacity(texts.len());
        for sub_batch in texts.chunks(self.config.batch_size) {
            let calls = sub_batch.iter().map(|text| self.embed_tagged(text, model_id));
            vectors.extend(futures::future::try_join_all(calls).await?);
            debug!("Embedded sub-batch of {} texts", sub_batch.len());
        }
        Ok(vectors)
    }

    pub async fn stats(&self) -> ModelStats {
        let state = self.state.lock().await;

        let mut loaded_models: Vec<String> =
            state.loaded.keys().map(|id| id.to_string()).collect();
        loaded_models.sort();

        let mut usage_counts = BTreeMap::new();
        let mut avg_latency_ms = BTreeMap::new();
        let mut estimated_memory_mb_by_tier = BTreeMap::new();
        for model in state.loaded.values() {
            usage_counts.insert(model.descriptor.id.to_string(), model.usage_count);
            avg_latency_ms.insert(model.descriptor.id.to_string(), model.avg_latency_ms());
            *estimated_memory_mb_by_tier
                .entry(model.descriptor.tier.to_string())
                .or_insert(0) += model.descriptor.memory_mb;
        }

        ModelStats {
            backend: self.backend.name().to_string(),
            loaded_models,
            usage_counts,
            avg_latency_ms,
            estimated_memory_mb_by_tier,
        }
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if self.state.lock().await.initialized {
            Ok(())
        } else {
            Err(DocseekError::NotInitialized {
                component: "model manager",
            })
        }
    }

    fn resolve(&self, model_id: Option<&str>) -> Result<&'static ModelDescriptor> {
        match model_id {
            None => Ok(self.default_model),
            Some(id) => catalog::find(id).ok_or_else(|| DocseekError::ModelNotFound {
                id: id.to_string(),
            }),
        }
    }

    /// One inference attempt against one model, no fallback
    async fn embed_with(&self, model: &'static ModelDescriptor, text: &str) -> Result<Vec<f32>> {
        let input = truncate_chars(text, model.max_chars()).to_string();
        self.acquire(model).await?;

        let start = Instant::now();
        let result = self.infer(model, input).await;
        self.release(model, start.elapsed(), result.is_ok()).await;

        result
    }

    async fn infer(&self, model: &'static ModelDescriptor, input: String) -> Result<Vec<f32>> {
        let backend = Arc::clone(&self.backend);
        let task = tokio::task::spawn_blocking(move || backend.embed(model.id, &[input]));

        let unavailable = |reason: String| DocseekError::InferenceUnavailable {
            model: model.id.to_string(),
            reason,
        };

        let mut vectors = match tokio::time::timeout(self.config.inference_timeout, task).await {
            Err(_) => {
                return Err(unavailable(format!(
                    "timed out after {}ms",
                    self.config.inference_timeout.as_millis()
                )))
            }
            Ok(Err(join_error)) => return Err(unavailable(join_error.to_string())),
            Ok(Ok(Err(e))) => return Err(unavailable(e.to_string())),
            Ok(Ok(Ok(vectors))) => vectors,
        };

        let vector = vectors
            .pop()
            .ok_or_else(|| unavailable("backend returned no vector".to_string()))?;

        if vector.len() != model.dimensions {
            return Err(DocseekError::DimensionMismatch {
                expected: model.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Ensure `model` is loaded and mark one call in flight
    async fn acquire(&self, model: &'static ModelDescriptor) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.loaded.contains_key(model.id) {
            self.load_into(&mut state, model).await?;
        }
        if let Some(loaded) = state.loaded.get_mut(model.id) {
            loaded.in_flight += 1;
        }
        Ok(())
    }

    async fn release(&self, model: &'static ModelDescriptor, elapsed: Duration, success: bool) {
        let mut state = self.state.lock().await;
        if let Some(loaded) = state.loaded.get_mut(model.id) {
            loaded.in_flight = loaded.in_flight.saturating_sub(1);
            if success {
                loaded.usage_count += 1;
                loaded.total_latency += elapsed;
            }
        }
    }

    async fn load_into(
        &self,
        state: &mut ManagerState,
        model: &'static ModelDescriptor,
    ) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let task = tokio::task::spawn_blocking(move || backend.load(model));

        let outcome = tokio::time::timeout(self.config.inference_timeout, task).await;
        let reason = match outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(join_error)) => Some(join_error.to_string()),
            Err(_) => Some("model load timed out".to_string()),
        };
        if let Some(reason) = reason {
            return Err(DocseekError::InferenceUnavailable {
                model: model.id.to_string(),
                reason,
            });
        }

        self.evict_for_new_model(state);
        state.loaded.insert(model.id, LoadedModel::new(model));
        info!("Loaded model {} ({} tier)", model.id, model.tier);
        Ok(())
    }

    /// Free room for one more model: least-used idle non-default model goes first
    fn evict_for_new_model(&self, state: &mut ManagerState) {
        while state.loaded.len() >= self.config.max_loaded_models {
            let victim = state
                .loaded
                .values()
                .filter(|m| m.descriptor.id != self.default_model.id && m.in_flight == 0)
                .min_by_key(|m| m.usage_count)
                .map(|m| m.descriptor.id);

            match victim {
                Some(id) => {
                    state.loaded.remove(id);
                    self.backend.unload(id);
                    info!("Evicted model {}", id);
                }
                None => {
                    warn!(
                        "No idle model to evict, exceeding cap of {} loaded models",
                        self.config.max_loaded_models
                    );
                    break;
                }
            }
        }
    }
}

fn is_inference_failure(error: &DocseekError) -> bool {
    matches!(
        error,
        DocseekError::InferenceUnavailable { .. } | DocseekError::DimensionMismatch { .. }
    )
}

/// Longest prefix of `text` holding at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
