use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use hala_ai::config::Config;
use hala_ai::embedding::{self, EmbeddingProvider};
use hala_ai::llm::ProviderRegistry;
use hala_ai::logging;
use hala_ai::pipeline::{JourneyRequest, JourneyService};
use hala_ai::server::HalaService;
use hala_ai::source::postgres::PgSourceStore;
use hala_ai::sync::{SyncMode, SyncService};
use hala_ai::vector::postgres::PgVectorStore;
use hala_ai::vector::VectorStore;
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "hala", version, about = "Knowledge sync and RAG journey generation for Hala")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Skip automatic vector store migration on startup
    #[arg(long)]
    skip_migrate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio (default)
    Serve,
    /// Run vector store migrations and exit
    Migrate,
    /// Sync source records into the vector store
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Generate or validate a journey from the command line
    Journey {
        #[command(subcommand)]
        action: JourneyAction,
    },
    /// List configured LLM providers and whether they respond
    Providers,
}

#[derive(Subcommand)]
enum SyncAction {
    /// Clear both collections and re-embed every live record
    Full,
    /// Sync records changed since the last run
    Incremental,
    /// Run incremental syncs on an interval until Ctrl-C
    Watch {
        /// Seconds between runs (default: sync.poll_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Show document counts and watermarks per collection
    Stats,
    /// Re-sync one KnowledgeReference by ID
    Ref { id: String },
    /// Re-sync one JourneyTemplate by ID
    Template { id: String },
}

#[derive(Subcommand)]
enum JourneyAction {
    /// Run the full pipeline and print the response
    Generate {
        prompt: String,
        /// Response language: id or en
        #[arg(long, default_value = "id")]
        language: String,
        /// LLM provider to use instead of the configured default
        #[arg(long)]
        provider: Option<String>,
    },
    /// Check an input without generating
    Validate {
        prompt: String,
        #[arg(long, default_value = "id")]
        language: String,
        /// Sanitization only
        #[arg(long)]
        fast: bool,
    },
}

async fn create_vector_store(config: &Config, run_migrations: bool) -> Result<Arc<PgVectorStore>> {
    let store = PgVectorStore::new(config.vector_url(), run_migrations).await?;
    tracing::info!("Vector store initialized");
    Ok(Arc::new(store))
}

async fn create_sync_service(
    config: &Config,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<SyncService> {
    let source = PgSourceStore::connect(&config.database_url, config.sync.language.clone()).await?;
    tracing::info!(language = ?config.sync.language, "Source database connected");
    Ok(SyncService::new(Arc::new(source), vectors, embedder, &config.sync))
}

async fn create_journey_service(
    config: &Config,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<JourneyService> {
    let registry = Arc::new(ProviderRegistry::from_config(&config.llm)?);
    tracing::info!(
        default_provider = registry.default_name(),
        providers = ?registry.names(),
        "LLM providers ready"
    );
    let service = JourneyService::new(embedder, vectors, registry, &config.pipeline, &config.llm)?;
    Ok(service)
}

fn sync_progress() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{pos}/{len}] {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// One sync run with a progress bar on stderr.
async fn run_sync(sync: SyncService, mode: SyncMode) -> Result<()> {
    let pb = sync_progress();
    let sync = sync.with_progress(pb.clone());
    let stats = sync.sync_all(mode).await;
    pb.finish_and_clear();
    print_json(&stats?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // 3. Initialize logging FIRST (before any other output)
    // stdout is reserved for JSON-RPC and JSON results
    logging::init_logging(&config);

    let run_migrations = !cli.skip_migrate;

    match cli.command {
        Some(Commands::Migrate) => {
            tracing::info!("Running vector store migrations...");
            create_vector_store(&config, true).await?;
            println!("Migrations completed successfully.");
        }

        Some(Commands::Sync { action }) => {
            let vectors: Arc<dyn VectorStore> = create_vector_store(&config, run_migrations).await?;
            let embedder = embedding::create_provider(&config.embedding).await?;
            let sync = create_sync_service(&config, vectors, embedder).await?;

            match action {
                SyncAction::Full => run_sync(sync, SyncMode::Full).await?,
                SyncAction::Incremental => run_sync(sync, SyncMode::Incremental).await?,
                SyncAction::Watch { interval } => {
                    let every = Duration::from_secs(interval.unwrap_or(config.sync.poll_interval_secs).max(1));
                    let shutdown = async {
                        if let Err(e) = tokio::signal::ctrl_c().await {
                            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                        }
                    };
                    sync.watch(every, shutdown).await?;
                }
                SyncAction::Ref { id } => {
                    let outcome = sync.sync_knowledge_reference(&id).await?;
                    print_json(&serde_json::json!({"id": id, "outcome": outcome}))?;
                }
                SyncAction::Template { id } => {
                    let outcome = sync.sync_journey_template(&id).await?;
                    print_json(&serde_json::json!({"id": id, "outcome": outcome}))?;
                }
                SyncAction::Stats => print_json(&sync.collection_stats().await?)?,
            }
        }

        Some(Commands::Journey { action }) => {
            let vectors: Arc<dyn VectorStore> = create_vector_store(&config, run_migrations).await?;
            let embedder = embedding::create_provider(&config.embedding).await?;
            let journeys = create_journey_service(&config, vectors, embedder).await?;

            match action {
                JourneyAction::Generate { prompt, language, provider } => {
                    let mut request = JourneyRequest::new(prompt).with_language(language);
                    if let Some(provider) = provider {
                        request = request.with_provider(provider);
                    }
                    let response = journeys.generate(&request).await;
                    print_json(&response)?;
                    if !response.is_success() {
                        std::process::exit(1);
                    }
                }
                JourneyAction::Validate { prompt, language, fast } => {
                    let request = JourneyRequest::new(prompt).with_language(language);
                    let report = journeys.validate(&request, fast).await;
                    print_json(&report)?;
                    if !report.is_valid {
                        std::process::exit(1);
                    }
                }
            }
        }

        Some(Commands::Providers) => {
            let registry = ProviderRegistry::from_config(&config.llm)?;
            print_json(&serde_json::json!({
                "default_provider": registry.default_name(),
                "providers": registry.statuses().await,
            }))?;
        }

        Some(Commands::Serve) | None => {
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                "hala server starting"
            );

            // 4. Stores
            let vectors: Arc<dyn VectorStore> = create_vector_store(&config, run_migrations).await?;

            // 5. Embedding provider shared by sync and retrieval
            let embedder = embedding::create_provider(&config.embedding).await?;
            tracing::info!(model = embedder.model_name(), dimension = embedder.dimension(), "Embedding provider ready");

            // 6. Journey pipeline; scope embeddings are computed up front
            let journeys = create_journey_service(&config, Arc::clone(&vectors), Arc::clone(&embedder)).await?;
            if let Err(e) = journeys.warm_up().await {
                tracing::warn!(error = %e, "Scope embeddings not ready, will retry on first request");
            }

            let sync = create_sync_service(&config, vectors, embedder).await?;

            // 7. Serve via stdio transport
            let service = HalaService::new(Arc::new(journeys), Arc::new(sync));
            let server = service.serve(rmcp::transport::io::stdio()).await?;

            tracing::info!("hala server running, awaiting tool calls via stdio");

            // 8. Wait for shutdown (client disconnects or signal)
            server.waiting().await?;

            tracing::info!("hala server stopped");
        }
    }

    Ok(())
}
