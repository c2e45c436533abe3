use anyhow::Context;
use clap::{Parser, Subcommand};
use semdex_embed::{EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider};
use semdex_index::{IndexConfig, IndexManager, SearchHit, SyncOutcome};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Dimension of the `--offline` hash embedder.
const OFFLINE_DIMENSIONS: usize = 256;

/// Maintain and query incremental semantic indices over directories of text.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file, applied before SEMDEX_* environment variables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Documents root (overrides configuration)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Index store directory (overrides configuration)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Embed with the in-process hash embedder instead of the HTTP service
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync all collections, then keep watching for changes until Ctrl-C
    Serve,
    /// Bring one collection, or all of them, up to date and exit
    Sync {
        /// Collection name; all collections when omitted
        collection: Option<String>,
    },
    /// Nearest chunks to a text or a raw query vector
    Search {
        collection: String,
        /// Query text, embedded with the configured provider
        #[arg(long, conflicts_with = "vector", required_unless_present = "vector")]
        text: Option<String>,
        /// Query vector (comma-separated floats)
        #[arg(long, value_delimiter = ',')]
        vector: Option<Vec<f32>>,
        /// Number of results
        #[arg(short, default_value_t = 5)]
        k: usize,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show index health
    Status {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<IndexConfig> {
    let config = match &args.config {
        Some(path) => IndexConfig::from_toml_file(path)?,
        None => IndexConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(root) = &args.root {
        config.root_dir = root.clone();
    }
    if let Some(store) = &args.store {
        config.store_dir = store.clone();
    }
    Ok(config)
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let provider: Arc<dyn EmbeddingProvider> = if args.offline {
        Arc::new(HashEmbeddingProvider::new(OFFLINE_DIMENSIONS)?)
    } else {
        Arc::new(HttpEmbeddingProvider::new(&config.embedding)?)
    };
    let manager = IndexManager::builder(config)
        .with_provider(Arc::clone(&provider))
        .build()
        .context("starting index manager")?;

    match args.command {
        Commands::Serve => {
            manager.initialize().await?;
            println!(
                "Watching {} (Ctrl-C to stop)",
                manager.config().root_dir.display()
            );
            tokio::signal::ctrl_c().await?;
            manager.shutdown().await?;
            Ok(())
        }

        Commands::Sync { collection } => {
            let outcomes = match collection {
                Some(name) => {
                    let outcome = manager.sync_collection(&name).await;
                    vec![(name, outcome)]
                }
                None => manager.sync_all().await?,
            };
            let mut failures = 0;
            for (name, outcome) in &outcomes {
                println!("{name}: {}", describe(outcome));
                if outcome.is_failure() {
                    failures += 1;
                }
            }
            manager.shutdown().await?;
            if failures > 0 {
                anyhow::bail!("{failures} of {} collections failed to sync", outcomes.len());
            }
            Ok(())
        }

        Commands::Search {
            collection,
            text,
            vector,
            k,
            format,
        } => {
            let query = match (text, vector) {
                (Some(text), _) => provider
                    .embed_text(&text)
                    .await
                    .context("embedding query text")?,
                (None, Some(vector)) if !vector.is_empty() => vector,
                _ => anyhow::bail!("Query vector cannot be empty"),
            };

            let hits = manager.search(&collection, &query, k).await;
            print_hits(&hits, &format)?;
            manager.shutdown().await?;
            Ok(())
        }

        Commands::Status { format } => {
            let health = manager.get_health_status().await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&health)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Indices:  {}", health.total_indices);
                    println!("Chunks:   {}", health.total_chunks);
                    println!("Resident: {}", health.resident_collections.join(", "));
                    if format == OutputFormat::Full {
                        for c in &health.collections {
                            println!(
                                "  {} | {} chunks | {}",
                                c.name,
                                c.chunks,
                                if c.resident { "resident" } else { "on disk" }
                            );
                        }
                    }
                }
            }
            Ok(())
        }
    }
}

fn describe(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::InFlight => "already in progress".to_string(),
        SyncOutcome::Unchanged => "unchanged".to_string(),
        SyncOutcome::ManifestOnly => "files changed, chunks unchanged".to_string(),
        SyncOutcome::Incremental { added, deleted } => {
            format!("incremental update (+{added} / -{deleted} chunks)")
        }
        SyncOutcome::Rebuilt { chunks } => format!("rebuilt ({chunks} chunks)"),
        SyncOutcome::Removed => "removed".to_string(),
        SyncOutcome::Failed(err) => format!("FAILED: {err}"),
    }
}

fn print_hits(hits: &[SearchHit], format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(hits)?),
        OutputFormat::Summary => {
            println!("Found {} chunks:", hits.len());
            for hit in hits {
                let preview: String = hit.text.chars().take(80).collect();
                println!("  {:.4} | {} | {}", hit.distance, hit.source_file, preview.replace('\n', " "));
            }
        }
        OutputFormat::Full => {
            for hit in hits {
                println!("Distance: {:.4}", hit.distance);
                println!("File: {}", hit.source_file);
                println!("Content:\n{}", hit.text);
                println!("---");
            }
        }
    }
    Ok(())
}
