/// Inference backend trait and FastEmbed implementation
use super::catalog::ModelDescriptor;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum InferenceError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Model not loaded: {0}")]
    NotLoaded(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Unsupported model: {0}")]
    Unsupported(String),
}

/// Capability to turn text into vectors with a named model
///
/// Calls block; the model manager runs them on the blocking pool.
pub trait InferenceBackend: Send + Sync {
    /// Make `model` ready for inference (may download weights)
    fn load(&self, model: &ModelDescriptor) -> Result<(), InferenceError>;

    /// Release resources held for `model_id`
    fn unload(&self, model_id: &str);

    /// Embed `texts` with an already loaded model, one vector per text in order
    fn embed(&self, model_id: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError>;

    /// Backend name for stats and logs
    fn name(&self) -> &str;
}

/// FastEmbed backend for local ONNX inference
///
/// Models are downloaded on first load to the fastembed cache directory.
pub struct FastEmbedBackend {
    models: RwLock<HashMap<String, Arc<TextEmbedding>>>,
}

impl FastEmbedBackend {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    fn fastembed_model(model_id: &str) -> Result<EmbeddingModel, InferenceError> {
        match model_id {
            "all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
            "all-MiniLM-L12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
            "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
            other => Err(InferenceError::Unsupported(other.to_string())),
        }
    }

    fn get(&self, model_id: &str) -> Result<Arc<TextEmbedding>, InferenceError> {
        let models = self
            .models
            .read()
            .map_err(|_| InferenceError::GenerationError("model table poisoned".to_string()))?;
        models
            .get(model_id)
            .cloned()
            .ok_or_else(|| InferenceError::NotLoaded(model_id.to_string()))
    }
}

impl Default for FastEmbedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for FastEmbedBackend {
    fn load(&self, model: &ModelDescriptor) -> Result<(), InferenceError> {
        if self.get(model.id).is_ok() {
            return Ok(());
        }

        let embedding_model = Self::fastembed_model(model.id)?;

        tracing::info!(
            "Initializing embedding model: {} ({}D, ~{}MB download if not cached)",
            model.id,
            model.dimensions,
            model.memory_mb
        );

        let init_options =
            InitOptions::new(embedding_model).with_show_download_progress(false);
        let text_embedding = TextEmbedding::try_new(init_options)
            .map_err(|e| InferenceError::InitializationError(e.to_string()))?;

        let mut models = self
            .models
            .write()
            .map_err(|_| InferenceError::InitializationError("model table poisoned".to_string()))?;
        models.insert(model.id.to_string(), Arc::new(text_embedding));
        Ok(())
    }

    fn unload(&self, model_id: &str) {
        if let Ok(mut models) = self.models.write() {
            models.remove(model_id);
        }
    }

    fn embed(&self, model_id: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.get(model_id)?;
        let embeddings = model
            .embed(texts.to_vec(), None)
            .map_err(|e| InferenceError::GenerationError(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(InferenceError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }

    fn name(&self) -> &str {
        "fastembed"
    }
}

/// Construct the backend named in configuration
pub fn from_name(name: &str) -> Option<Arc<dyn InferenceBackend>> {
    match name {
        "fastembed" => Some(Arc::new(FastEmbedBackend::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog;

    #[test]
    fn test_catalog_models_are_supported() {
        for id in catalog::ids() {
            assert!(FastEmbedBackend::fastembed_model(id).is_ok(), "{}", id);
        }
    }

    #[test]
    fn test_embed_without_load_fails() {
        let backend = FastEmbedBackend::new();
        let result = backend.embed("all-MiniLM-L6-v2", &["hello".to_string()]);
        assert!(matches!(result, Err(InferenceError::NotLoaded(_))));
    }

    #[test]
    fn test_from_name() {
        assert!(from_name("fastembed").is_some());
        assert!(from_name("openai").is_none());
    }

    #[test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    fn test_load_and_embed() {
        let backend = FastEmbedBackend::new();
        let model = catalog::find(catalog::DEFAULT_MODEL_ID).unwrap();
        backend.load(model).unwrap();

        let texts = vec!["First sentence.".to_string(), "Second one.".to_string()];
        let embeddings = backend.embed(model.id, &texts).unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);
    }
}
