//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "docseek",
    version,
    author = "neur0map",
    about = "Semantic search over document chunks with adaptive embedding models",
    long_about = "Docseek embeds document chunks with a content-appropriate local model, keeps them in a \
                  durable HNSW index backed by SQLite metadata, and answers natural-language queries with \
                  explained, re-rankable results."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/docseek/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed and index the chunks of one file
    Add {
        /// File id the chunks belong to
        #[arg(long)]
        file_id: String,

        /// JSON array of chunks: [{"id": ..., "content": ..., "metadata": {...}}]
        input: PathBuf,
    },

    /// Search indexed chunks
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum similarity in [0, 1]
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Exact-match metadata filter (repeatable)
        #[arg(short, long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, serde_json::Value)>,

        /// Re-rank results by confidence and content quality
        #[arg(long)]
        rerank: bool,

        /// Embed the query with this model
        #[arg(short, long)]
        model: Option<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Find chunks similar to a stored chunk
    Similar {
        #[arg(long)]
        file_id: Option<String>,

        #[arg(long)]
        chunk_id: Option<String>,

        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },

    /// Remove every chunk of a file
    Remove {
        file_id: String,
    },

    /// Rebuild the index from live entries
    Optimize,

    /// Persist the index to disk
    Save,

    /// Delete every stored chunk
    Clear {
        /// Skip the confirmation notice
        #[arg(long)]
        yes: bool,
    },

    /// Show engine statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Inspect embedding models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// List catalog models
    List,

    /// Show which model would embed the given text
    Select {
        text: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Parse `key=value`; the value is read as JSON when possible, else as a string
pub fn parse_filter(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty filter key in '{}'", raw));
    }

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
