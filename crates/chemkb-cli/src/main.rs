//! chemkb CLI - Command-line interface
//!
//! Usage:
//!   chemkb ingest <pdf>
//!   chemkb query <pdf> <question> [-k N]
//!   chemkb property <substance> <property>
//!   chemkb cache list
//!   chemkb cache clear

use std::path::PathBuf;

use anyhow::Context;
use chemkb_core::{lookup_property, AppConfig, LoggingConfig};
use chemkb_rag::{CacheManager, KnowledgeBase};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "local-embeddings")]
const EMBEDDING_HELP: &str = "Chemical engineering knowledge base CLI

Embeddings default to the pretrained all-MiniLM-L6-v2 sentence-transformer
(fastembed, downloaded on first use). Set EMBEDDING_PROVIDER to hashing,
ollama or openai to use another provider.";

#[cfg(not(feature = "local-embeddings"))]
const EMBEDDING_HELP: &str = "Chemical engineering knowledge base CLI

Embeddings default to a local hashing embedder: deterministic and offline,
but lexical only. For semantic retrieval with the pretrained all-MiniLM-L6-v2
model, build with `--features local-embeddings` (it becomes the default) or
set EMBEDDING_PROVIDER to ollama or openai.";

#[derive(Parser)]
#[command(name = "chemkb")]
#[command(about = "Chemical engineering knowledge base CLI")]
#[command(long_about = EMBEDDING_HELP)]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a document into the knowledge base cache
    Ingest {
        /// Path to the document
        path: PathBuf,
    },
    /// Ingest a document (cached) and retrieve the chunks closest to a question
    Query {
        /// Path to the document
        path: PathBuf,
        /// Question to ask
        question: String,
        /// Number of chunks to return
        #[arg(short, long)]
        k: Option<usize>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look up a tabulated physical property
    Property {
        /// Substance name (e.g. water)
        substance: String,
        /// Property name (e.g. density or density_kg_m3)
        property: String,
    },
    /// Inspect or clear the document cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached documents
    List,
    /// Remove every cached document
    Clear,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?
            .with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Ingest { path } => {
            let mut kb = KnowledgeBase::from_config(&config)?;
            let report = kb.ingest(&path).await?;

            println!("Document:  {}", report.path.display());
            println!("Key:       {}", report.key);
            println!("Pages:     {}", report.page_count);
            println!("Chunks:    {}", report.chunk_count);
            println!("Extracted: {}", report.extracted_at.format("%Y-%m-%d %H:%M:%S"));
            println!("From cache: {}", report.from_cache);
            if let Some(previous) = &report.replaced {
                println!("Replaced:  {previous}");
            }
            for warning in &report.warnings {
                println!("Warning:   {warning}");
            }
        }
        Commands::Query {
            path,
            question,
            k,
            json,
        } => {
            let mut kb = KnowledgeBase::from_config(&config)?;
            kb.ingest(&path).await?;

            let k = k.unwrap_or(kb.default_top_k());
            let results = kb.query(&question, k).await?;
            info!(results = results.len(), "Retrieved chunks");

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No relevant content found.");
            } else {
                for (rank, result) in results.iter().enumerate() {
                    let page = result
                        .page
                        .map(|p| format!("page {p}"))
                        .unwrap_or_else(|| "no page".to_string());
                    println!(
                        "#{} distance={:.4} [{}, {}]",
                        rank + 1,
                        result.distance,
                        page,
                        result.kind
                    );
                    println!("{}\n", result.chunk_text.trim());
                }
            }
        }
        Commands::Property {
            substance,
            property,
        } => {
            let entry = lookup_property(&substance, &property)?;
            println!("{} {} = {} {}", entry.substance, entry.property, entry.value, entry.unit);
        }
        Commands::Cache { action } => {
            let cache = CacheManager::new(&config.knowledge_base.cache_dir);
            match action {
                CacheAction::List => {
                    let entries = cache.entries()?;
                    if entries.is_empty() {
                        println!("Cache is empty ({})", cache.dir().display());
                    }
                    for entry in entries {
                        println!(
                            "{}  {}  {} pages  {} chunks  {}  {}",
                            entry.key.get(..12).unwrap_or(&entry.key),
                            entry.source.display(),
                            entry.page_count,
                            entry.chunk_count,
                            entry.model_id,
                            entry.created_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                CacheAction::Clear => {
                    let removed = cache.clear()?;
                    println!("Removed {removed} cache files from {}", cache.dir().display());
                }
            }
        }
    }

    Ok(())
}
