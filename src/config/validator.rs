use super::parse_duration;
use crate::config::Config;
use crate::error::{DocseekError, Result, ValidationError};
use crate::models::catalog;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_models(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_search(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DocseekError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_models(config: &Config, errors: &mut Vec<ValidationError>) {
        let models = &config.models;

        match catalog::find(&models.default_model) {
            Some(descriptor) if descriptor.dimensions != config.index.dimensions => {
                errors.push(ValidationError::new(
                    "models.default_model",
                    format!(
                        "Model {} produces {}-dimensional vectors but index.dimensions is {}",
                        descriptor.id, descriptor.dimensions, config.index.dimensions
                    ),
                ));
            }
            Some(_) => {}
            None => {
                errors.push(ValidationError::new(
                    "models.default_model",
                    format!(
                        "Unknown model '{}', expected one of {:?}",
                        models.default_model,
                        catalog::ids()
                    ),
                ));
            }
        }

        let valid_backends = ["fastembed"];
        if !valid_backends.contains(&models.backend.as_str()) {
            errors.push(ValidationError::new(
                "models.backend",
                format!(
                    "Backend must be one of {:?}, got '{}'",
                    valid_backends, models.backend
                ),
            ));
        }

        if models.max_loaded_models == 0 {
            errors.push(ValidationError::new(
                "models.max_loaded_models",
                "At least one model must be loadable",
            ));
        }

        if models.batch_size == 0 {
            errors.push(ValidationError::new(
                "models.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if parse_duration(&models.inference_timeout).is_none() {
            errors.push(ValidationError::new(
                "models.inference_timeout",
                format!("Invalid duration format: {}", models.inference_timeout),
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        let index = &config.index;

        if index.dimensions == 0 {
            errors.push(ValidationError::new(
                "index.dimensions",
                "Vector dimension must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&index.similarity_threshold) {
            errors.push(ValidationError::new(
                "index.similarity_threshold",
                format!(
                    "Threshold must be between 0.0 and 1.0, got {}",
                    index.similarity_threshold
                ),
            ));
        }

        if index.max_elements == 0 {
            errors.push(ValidationError::new(
                "index.max_elements",
                "Max elements must be greater than 0",
            ));
        }

        if index.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if index.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if parse_duration(&index.search_timeout).is_none() {
            errors.push(ValidationError::new(
                "index.search_timeout",
                format!("Invalid duration format: {}", index.search_timeout),
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.search.default_top_k == 0 {
            errors.push(ValidationError::new(
                "search.default_top_k",
                "Default top_k must be greater than 0",
            ));
        }

        if config.search.history_limit == 0 {
            errors.push(ValidationError::new(
                "search.history_limit",
                "History limit must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = Config::default();
        config.index.similarity_threshold = 1.5;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_default_model_dimension_mismatch() {
        let mut config = Config::default();
        config.models.default_model = "bge-base-en-v1.5".to_string();

        match ConfigValidator::validate(&config) {
            Err(DocseekError::ConfigValidation { errors }) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].path, "models.default_model");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.models.default_model = "gpt-embed".to_string();
        config.models.batch_size = 0;
        config.index.search_timeout = "soon".to_string();

        match ConfigValidator::validate(&config) {
            Err(DocseekError::ConfigValidation { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
