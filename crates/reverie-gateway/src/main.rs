//! Composition root: wires storage, the embedding/LLM providers, and the
//! three background engines (gardener, scheduler, proactive evaluator)
//! into one process, then runs them until shutdown. No HTTP/WS surface —
//! the agent's outer loop, channel adapters, and skill loader are external
//! collaborators per the memory substrate's own scope.

mod anthropic;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reverie_core::config::ReverieConfig;
use reverie_core::llm::LlmProvider;
use reverie_embed::{CachedEmbedder, EmbeddingProvider, TfIdfEmbedder};
use reverie_extract::{FactExtractor, SessionSummarizer};
use reverie_gardener::GardenerEngine;
use reverie_memory::MemoryManager;
use reverie_proactive::ProactiveEngine;
use reverie_relations::RelationsManager;
use reverie_scheduler::{ChannelRegistry, SchedulerEngine, SystemTimezoneResolver};
use reverie_storage::StorageEngine;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::anthropic::AnthropicProvider;

#[derive(Parser, Debug)]
#[command(name = "reverie-gateway", about = "Runs the memory substrate and its background maintenance loops")]
struct Cli {
    /// Path to reverie.toml. Defaults to ~/.reverie/reverie.toml.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "reverie_gateway=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ReverieConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        ReverieConfig::default()
    });

    let storage = Arc::new(StorageEngine::open(&config.database.path)?);
    info!(path = %config.database.path, "storage opened");

    let embedder = build_embedder(&config);
    let llm = build_llm(&config);

    let memory = Arc::new(MemoryManager::new(
        storage.clone(),
        embedder.clone(),
        Some(llm.clone()),
        config.llm.model.clone(),
        config.memory.clone(),
    ));

    let relations = Arc::new(RelationsManager::new(
        storage.clone(),
        embedder.clone(),
        Some(llm.clone()),
        config.llm.model.clone(),
        config.relations.clone(),
    ));
    memory.set_relation_detector(relations.clone());

    let extractor = Arc::new(FactExtractor::new(
        llm.clone(),
        config.llm.model.clone(),
        embedder.clone(),
        memory.clone(),
    ));
    let summarizer = Arc::new(SessionSummarizer::new(
        llm.clone(),
        config.llm.model.clone(),
        embedder.clone(),
        storage.clone(),
    ));
    // Constructed for the outer agent loop (an external collaborator) to
    // drive per-turn extraction and session-close summarization; this
    // binary itself only runs the background engines below.
    let _ = (&extractor, &summarizer);

    let gardener = GardenerEngine::new(
        storage.clone(),
        memory.clone(),
        embedder.clone(),
        Some(llm.clone()),
        config.llm.model.clone(),
        config.gardener.clone(),
    );

    let channels = ChannelRegistry::new();
    warn!("no channel adapters registered; fired scheduled items will fail delivery until one is wired in");
    let timezone = Arc::new(SystemTimezoneResolver::new());
    let scheduler = SchedulerEngine::new(storage.clone(), channels, timezone, config.scheduler.clone());
    let scheduler_handle = scheduler.handle();
    scheduler.recover_on_startup(now_ms())?;

    let proactive = ProactiveEngine::new(
        storage.clone(),
        scheduler_handle,
        llm.clone(),
        config.llm.model.clone(),
        config.proactive.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let gardener_task = tokio::spawn(gardener.run(shutdown_rx.clone()));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let proactive_task = tokio::spawn(proactive.run(shutdown_rx.clone()));

    info!("reverie-gateway running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(gardener_task, scheduler_task, proactive_task);
    info!("reverie-gateway stopped");
    Ok(())
}

fn build_embedder(config: &ReverieConfig) -> Arc<dyn EmbeddingProvider> {
    if config.embedding.model != "local-tfidf" {
        warn!(
            model = %config.embedding.model,
            "this binary only ships the local TF-IDF embedder; falling back to it"
        );
    }
    let tfidf = TfIdfEmbedder::new(config.embedding.dimensions);
    Arc::new(CachedEmbedder::new(tfidf, config.embedding.cache_max_entries, config.embedding.cache_max_bytes))
}

fn build_llm(config: &ReverieConfig) -> Arc<dyn LlmProvider> {
    if config.llm.api_key.is_none() {
        warn!("no LLM API key configured; calls that depend on the LLM will fail and be discarded by their callers");
    }
    Arc::new(AnthropicProvider::new(
        config.llm.api_key.clone().unwrap_or_default(),
        config.llm.base_url.clone(),
    ))
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
