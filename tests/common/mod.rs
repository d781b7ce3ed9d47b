//! Shared helpers for integration tests
#![allow(dead_code)]

use docseek::config::Config;
use docseek::models::{catalog, InferenceBackend, InferenceError, ModelDescriptor};
use std::path::Path;

pub const DIMS: usize = 384;

/// Deterministic pseudo-random vector; distinct seeds are near-orthogonal
pub fn random_vector(seed: u64, dims: usize) -> Vec<f32> {
    let mut state = seed.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (0..dims)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 40) as f32 / (1u64 << 24) as f32 - 0.5
        })
        .collect()
}

/// Bag-of-words feature hashing: texts sharing words get similar vectors
pub struct HashingBackend;

impl HashingBackend {
    pub fn vector(text: &str, dims: usize) -> Vec<f32> {
        let mut vector = vec![0.0; dims];
        vector[0] = 0.01;
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in token.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            vector[(hash % dims as u64) as usize] += 1.0;
        }
        vector
    }
}

impl InferenceBackend for HashingBackend {
    fn load(&self, _model: &ModelDescriptor) -> Result<(), InferenceError> {
        Ok(())
    }

    fn unload(&self, _model_id: &str) {}

    fn embed(&self, model_id: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
        let dims = catalog::find(model_id)
            .ok_or_else(|| InferenceError::Unsupported(model_id.to_string()))?
            .dimensions;
        Ok(texts.iter().map(|t| Self::vector(t, dims)).collect())
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config
}
