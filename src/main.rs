use docseek::chunk::Chunk;
use docseek::cli::{Cli, Commands, ConfigAction, ModelsAction};
use docseek::config::{Config, ConfigValidator};
use docseek::engine::Engine;
use docseek::error::{DocseekError, Result};
use docseek::models::{self, catalog, ModelManager, ModelManagerConfig};
use docseek::search::SearchRequest;
use docseek::store::Filters;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Config { action } => cmd_config(cli.config, cli.profile, action),
        Commands::Models { action } => cmd_models(cli.config, cli.profile, action),
        command => {
            let config = load_config(cli.config, cli.profile)?;
            let rt = tokio::runtime::Runtime::new()
                .map_err(|e| DocseekError::io(e, "Failed to create tokio runtime"))?;
            rt.block_on(run(config, command))
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "docseek=debug" } else { "docseek=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: Config, command: Commands) -> Result<()> {
    let engine = Engine::open_default(&config).await?;

    match command {
        Commands::Add { file_id, input } => cmd_add(&engine, &file_id, &input).await,
        Commands::Search {
            query,
            top_k,
            threshold,
            filters,
            rerank,
            model,
            json,
        } => {
            let mut request = SearchRequest::new(query).rerank(rerank);
            request.top_k = top_k;
            request.threshold = threshold;
            request.model = model;
            if !filters.is_empty() {
                request.filters = Some(filters.into_iter().collect::<Filters>());
            }
            cmd_search(&engine, request, json).await
        }
        Commands::Similar {
            file_id,
            chunk_id,
            top_k,
        } => {
            let results = engine
                .store()
                .find_similar(file_id.as_deref(), chunk_id.as_deref(), top_k)
                .await?;
            if results.is_empty() {
                println!("No similar chunks found");
            }
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "{}. {} ({}) score {:.3}",
                    rank + 1,
                    result.chunk_id,
                    result.file_id,
                    result.score
                );
            }
            Ok(())
        }
        Commands::Remove { file_id } => {
            let removed = engine.remove_file(&file_id).await?;
            println!("✓ Removed {} chunks of {}", removed, file_id);
            Ok(())
        }
        Commands::Optimize => {
            let reclaimed = engine.optimize().await?;
            println!("✓ Index rebuilt, {} stale points reclaimed", reclaimed);
            Ok(())
        }
        Commands::Save => {
            engine.save().await?;
            println!("✓ Index saved");
            Ok(())
        }
        Commands::Clear { yes } => {
            if !yes {
                println!("This deletes every indexed chunk. Re-run with --yes to confirm.");
                return Ok(());
            }
            engine.clear().await?;
            println!("✓ Store cleared");
            Ok(())
        }
        Commands::Stats { json } => cmd_stats(&engine, json).await,
        Commands::Models { .. } | Commands::Config { .. } => Ok(()),
    }
}

async fn cmd_add(engine: &Engine, file_id: &str, input: &Path) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .map_err(|e| DocseekError::io(e, format!("Failed to read chunks file: {:?}", input)))?;
    let chunks: Vec<Chunk> = serde_json::from_str(&content)
        .map_err(|e| DocseekError::json(e, format!("Invalid chunks file: {:?}", input)))?;

    let stored = engine.add_chunks(file_id, chunks).await?;
    println!("✓ Indexed {} chunks for {}", stored, file_id);
    Ok(())
}

async fn cmd_search(engine: &Engine, request: SearchRequest, json: bool) -> Result<()> {
    let response = engine.search().search(request).await?;

    if json {
        let out = serde_json::to_string_pretty(&response)
            .map_err(|e| DocseekError::json(e, "Failed to serialize search response"))?;
        println!("{}", out);
        return Ok(());
    }

    let query = &response.processed_query;
    println!(
        "Intent: {} ({:?}), complexity: {}, {} results in {}ms",
        query.intent,
        query.semantic_type,
        response.stats.query_complexity,
        response.stats.total_results,
        response.stats.search_time_ms
    );

    for (rank, result) in response.results.iter().enumerate() {
        println!(
            "\n{}. [{}] {} (score {:.3}, confidence {:.3})",
            rank + 1,
            result.result.file_id,
            result.result.chunk_id,
            result.result.score,
            result.confidence
        );
        println!("   {}", result.relevance_reason);
        println!("   {}", result.snippet);
        if !result.related_chunks.is_empty() {
            println!("   Related: {}", result.related_chunks.join(", "));
        }
    }

    if !response.suggestions.is_empty() {
        println!("\nTry also:");
        for suggestion in &response.suggestions {
            println!("  - {}", suggestion);
        }
    }
    Ok(())
}

async fn cmd_stats(engine: &Engine, json: bool) -> Result<()> {
    let stats = engine.stats().await?;

    if json {
        let out = serde_json::to_string_pretty(&stats)
            .map_err(|e| DocseekError::json(e, "Failed to serialize stats"))?;
        println!("{}", out);
        return Ok(());
    }

    println!("Docseek Status");
    println!("==============");
    println!("\nStore:");
    println!("  Vectors: {}", stats.store.vector_count);
    println!("  Files: {}", stats.store.file_count);
    println!(
        "  Index points: {} ({} stale)",
        stats.store.index_points, stats.store.dangling_count
    );
    println!(
        "  Memory estimate: {:.1} MB",
        stats.store.memory_estimate_bytes as f64 / (1024.0 * 1024.0)
    );

    println!("\nModels (backend: {}):", stats.models.backend);
    for model in &stats.models.loaded_models {
        println!(
            "  {} - {} calls, {:.1}ms avg",
            model,
            stats.models.usage_counts.get(model).copied().unwrap_or(0),
            stats.models.avg_latency_ms.get(model).copied().unwrap_or(0.0)
        );
    }

    println!("\nSearch:");
    println!("  Queries: {}", stats.search.total_queries);
    println!("  Avg latency: {:.1}ms", stats.search.average_latency_ms);
    for (intent, count) in &stats.search.intent_distribution {
        println!("  {}: {}", intent, count);
    }
    Ok(())
}

fn cmd_models(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ModelsAction,
) -> Result<()> {
    let config = load_config(config_path, profile)?;

    match action {
        ModelsAction::List => {
            for model in catalog::CATALOG {
                let marker = if model.id == config.models.default_model {
                    " (default)"
                } else {
                    ""
                };
                println!(
                    "{}{} - {}, {} dims, {} tokens, ~{}MB",
                    model.id, marker, model.tier, model.dimensions, model.max_tokens, model.memory_mb
                );
            }
        }
        ModelsAction::Select { text } => {
            let backend = models::backend_from_name(&config.models.backend).ok_or_else(|| {
                DocseekError::Config(format!(
                    "Unknown inference backend: {}",
                    config.models.backend
                ))
            })?;
            let manager = ModelManager::new(backend, ModelManagerConfig::from_config(&config))?;
            let selected = manager.select_model(&text, None, None);
            let profile = models::ContentClassifier::new()?.profile(&text);

            println!("Selected model: {}", selected);
            println!(
                "  code: {}, formula: {}, table: {}, technical terms: {}, length: {}",
                profile.has_code,
                profile.has_formula,
                profile.has_table,
                profile.technical_terms,
                profile.length
            );
        }
    }
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DocseekError::io(e, format!("Failed to create config directory: {:?}", parent))
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'docseek config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}
