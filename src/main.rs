// src/main.rs
// Loupe server CLI

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use loupe::api::ws::{ChatState, ws_chat_handler};
use loupe::cache::CacheService;
use loupe::chat::ChatOrchestrator;
use loupe::config::EnvConfig;
use loupe::context::ContextAssembler;
use loupe::db;
use loupe::db::{ConfigStore, MessageStore, ModelCatalog, UsageRecorder};
use loupe::embeddings::EmbeddingClient;
use loupe::llm::ProviderAdapter;
use loupe::search::{HybridSearch, StaticAnalyzer};
use loupe::settings::SettingsService;
use loupe::summarize::Summarizer;
use loupe::tools::{ToolRegistry, register_builtin_tools};
use loupe::vector::VectorStore;
use loupe::worker::{EmbeddingWorker, ingest_document};

#[derive(Parser)]
#[command(name = "loupe", version, about = "Code-aware chat orchestration server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat server
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1:8087", env = "LOUPE_BIND")]
        bind: String,
        /// Root directory containing project repositories
        #[arg(long, default_value = "repos", env = "LOUPE_REPO_ROOT")]
        repo_root: PathBuf,
    },
    /// Index a directory of source files into a project
    Index {
        /// Project id to index into
        #[arg(long)]
        project_id: i64,
        /// Directory to walk
        path: PathBuf,
    },
    /// Validate environment configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let env = EnvConfig::load();

    match cli.command {
        Command::Check => {
            let validation = env.validate();
            println!("{}", validation.report());
            if !validation.is_valid() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Index { project_id, path } => index_command(&env, project_id, &path).await,
        Command::Serve { bind, repo_root } => serve(&env, &bind, repo_root).await,
    }
}

async fn serve(env: &EnvConfig, bind: &str, repo_root: PathBuf) -> Result<()> {
    let validation = env.validate();
    for line in validation.report().lines() {
        info!("{}", line);
    }
    if !validation.is_valid() {
        bail!("configuration invalid; run `loupe check` for details");
    }

    let database_url = env
        .database_url
        .as_deref()
        .context("DATABASE_URL is required")?;
    let pool = db::connect(database_url).await?;
    db::init_schema(&pool).await?;

    let cache = Arc::new(CacheService::new());
    let catalog = ModelCatalog::new(pool.clone());
    let store = Arc::new(ConfigStore::new(pool.clone()));
    let usage = UsageRecorder::new(pool.clone(), catalog.clone());

    let vector_store = Arc::new(VectorStore::from_config(&env.vector, pool.clone()).await?);
    vector_store.initialize().await?;
    info!(backend = vector_store.backend_name(), "Vector store ready");

    let embeddings = EmbeddingClient::from_config(&env.api_keys, cache.clone()).map(Arc::new);
    if embeddings.is_none() {
        warn!("No embedding provider configured; semantic search disabled");
    }

    // Adapter starts from the stored configuration (or defaults)
    let provider = env
        .default_provider
        .unwrap_or(loupe::llm::Provider::OpenAi);
    let model = env
        .default_model
        .clone()
        .unwrap_or_else(|| provider.default_model().to_string());
    let adapter = Arc::new(ProviderAdapter::new(
        loupe::llm::AdapterSettings::new(provider, model),
        env.api_keys.clone(),
        catalog.clone(),
        Some(usage.clone()),
    )?);

    let settings = Arc::new(SettingsService::new(
        store.clone(),
        catalog.clone(),
        adapter.clone(),
        env.api_keys.has_azure(),
    ));
    settings.initialize_defaults().await?;
    let current = settings.get_current().await;
    if let Err(e) = adapter.reconfigure(current.adapter_settings()).await {
        warn!("Could not apply stored configuration to the adapter: {}", e);
    }

    let search_weights = store
        .get_all()
        .await
        .ok()
        .and_then(|values| values.get("search_weights").cloned())
        .unwrap_or(serde_json::Value::Null);
    let search = Arc::new(
        HybridSearch::new(
            pool.clone(),
            vector_store.clone(),
            embeddings.clone(),
            StaticAnalyzer::new(env.analyzer_cmd.clone()),
            repo_root.clone(),
        )
        .with_weight_overrides(&search_weights)
        .with_cache(cache.clone()),
    );

    let summarizer = Arc::new(Summarizer::new(Some(adapter.clone())));
    let assembler = ContextAssembler::new(summarizer);

    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools);
    info!(tools = tools.len(), "Tool registry ready");

    let orchestrator = Arc::new(ChatOrchestrator::new(
        pool.clone(),
        MessageStore::new(pool.clone()),
        search,
        assembler,
        adapter,
        Arc::new(tools),
        settings,
        catalog,
        Some(usage),
        repo_root,
    ));

    // Background embedding worker
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = EmbeddingWorker::new(pool.clone(), embeddings, vector_store, shutdown_rx);
    let worker_handle = tokio::spawn(worker.run());

    let state = ChatState {
        orchestrator,
        auth_token: env.auth_token.clone(),
    };
    if state.auth_token.is_none() {
        warn!("LOUPE_AUTH_TOKEN is not set; the chat channel accepts any client");
    }

    let app = axum::Router::new()
        .route("/ws/chat/{session_id}", axum::routing::get(ws_chat_handler))
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("Listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;
    Ok(())
}

async fn index_command(env: &EnvConfig, project_id: i64, path: &PathBuf) -> Result<()> {
    let database_url = env
        .database_url
        .as_deref()
        .context("DATABASE_URL is required")?;
    let pool = db::connect(database_url).await?;
    db::init_schema(&pool).await?;
    let vector_store = VectorStore::from_config(&env.vector, pool.clone()).await?;
    vector_store.initialize().await?;

    let mut indexed = 0usize;
    let mut chunks = 0usize;
    for entry in walk_source_files(path)? {
        let Ok(content) = std::fs::read_to_string(&entry) else {
            continue;
        };
        let relative = entry
            .strip_prefix(path)
            .unwrap_or(&entry)
            .to_string_lossy()
            .to_string();
        let language = language_for(&entry);
        chunks += ingest_document(&pool, &vector_store, project_id, &relative, &content, language)
            .await?;
        indexed += 1;
    }

    println!(
        "Indexed {} files ({} chunks queued); the embedding worker will pick them up",
        indexed, chunks
    );
    Ok(())
}

fn walk_source_files(root: &PathBuf) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if !name.starts_with('.') && name != "target" && name != "node_modules" {
                    stack.push(path);
                }
            } else if language_for(&path).is_some() || name.ends_with(".md") {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

fn language_for(path: &std::path::Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "rs" => Some("rust"),
        "py" => Some("python"),
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" => Some("javascript"),
        "go" => Some("go"),
        _ => None,
    }
}
