//! Three tick tiers on one timer: light (decay only), deep (every N light
//! ticks: full decay, summarization, pruning, behavioral inference,
//! archival), and sleep (nightly: NREM + REM dreaming).

use std::sync::Arc;

use reverie_core::config::GardenerConfig;
use reverie_core::llm::LlmProvider;
use reverie_embed::EmbeddingProvider;
use reverie_memory::MemoryManager;
use reverie_relations::RelationGraph;
use reverie_storage::StorageEngine;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::archive::run_archive_pass;
use crate::behavioral::infer_active_users;
use crate::error::Result;
use crate::fusion::run_nrem;
use crate::rem::run_rem;

/// Sessions must sit idle this long before they're eligible for
/// summarization — long enough that a user isn't mid-conversation.
const SESSION_IDLE_MS: i64 = 2 * 3_600 * 1000;
const SESSION_MIN_MESSAGES: u64 = 4;

pub struct GardenerEngine {
    storage: Arc<StorageEngine>,
    memory: Arc<MemoryManager>,
    graph: RelationGraph,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Option<Arc<dyn LlmProvider>>,
    llm_model: String,
    config: GardenerConfig,
    /// Light ticks elapsed since the last deep tick.
    light_ticks_since_deep: u64,
    /// Calendar day (days since epoch) the sleep tick last ran, so it
    /// fires at most once per day even if the process stays up for weeks.
    last_sleep_day: Option<i64>,
}

impl GardenerEngine {
    pub fn new(
        storage: Arc<StorageEngine>,
        memory: Arc<MemoryManager>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Option<Arc<dyn LlmProvider>>,
        llm_model: String,
        config: GardenerConfig,
    ) -> Self {
        let graph = RelationGraph::new(storage.clone());
        Self {
            storage,
            memory,
            graph,
            embedder,
            llm,
            llm_model,
            config,
            light_ticks_since_deep: 0,
            last_sleep_day: None,
        }
    }

    /// Runs the light tick: decay over the bounded rolling window only.
    #[instrument(skip(self))]
    fn light_tick(&self) -> Result<()> {
        let decayed = self.memory.process_decay()?;
        info!(decayed, "light tick complete");
        Ok(())
    }

    /// Runs the deep tick: full decay sweep, session summarization,
    /// orphan relation pruning, behavioral inference, and archival.
    #[instrument(skip(self))]
    async fn deep_tick(&self, now_ms: i64) -> Result<()> {
        let decayed = self.memory.process_full_decay()?;

        let summarized = self.summarize_completed_sessions(now_ms).await?;

        let archive_report = run_archive_pass(
            &self.storage,
            &self.graph,
            self.config.archive_utility_threshold,
            self.config.archive_min_age_days,
            self.config.archive_max_per_run,
            now_ms,
        )?;

        let behavioral_updates = infer_active_users(&self.storage)?;

        info!(
            decayed,
            summarized,
            archived = archive_report.archived,
            relations_pruned = archive_report.relations_pruned,
            hard_deleted = archive_report.hard_deleted,
            behavioral_updates,
            "deep tick complete"
        );
        Ok(())
    }

    async fn summarize_completed_sessions(&self, now_ms: i64) -> Result<usize> {
        let Some(llm) = &self.llm else {
            return Ok(0);
        };
        let cutoff = now_ms - SESSION_IDLE_MS;
        let sessions = self.storage.list_sessions_needing_summary(cutoff, SESSION_MIN_MESSAGES)?;
        let summarizer = reverie_extract::SessionSummarizer::new(
            llm.clone(),
            self.llm_model.clone(),
            self.embedder.clone(),
            self.storage.clone(),
        );

        let mut summarized = 0;
        for session in sessions {
            match summarizer.summarize_if_eligible(&session.user_id, &session.id).await {
                Ok(true) => summarized += 1,
                Ok(false) => {}
                Err(e) => error!(session_id = %session.id, error = %e, "session summarization failed"),
            }
        }
        Ok(summarized)
    }

    /// Runs the sleep tick: NREM consolidation then REM exploration, then
    /// the hard-deletion sweep. NREM and REM are isolated from each other
    /// — one failing never affects the other's result.
    #[instrument(skip(self))]
    async fn sleep_tick(&self, now_ms: i64) -> Result<()> {
        let memories = self.storage.list_all_latest_memories()?;

        let Some(llm) = &self.llm else {
            info!("sleep tick skipped: no LLM provider configured");
            return Ok(());
        };

        let nrem_report = match run_nrem(
            llm.as_ref(),
            &self.llm_model,
            self.embedder.as_ref(),
            &self.storage,
            &self.graph,
            memories.clone(),
            self.config.min_cluster_size,
            now_ms,
        )
        .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "NREM consolidation failed");
                Default::default()
            }
        };

        let rem_report = run_rem(llm.as_ref(), &self.llm_model, &self.graph, &memories, now_ms).await;

        info!(
            clusters_found = nrem_report.clusters_found,
            fused = nrem_report.fused,
            pairs_considered = rem_report.pairs_considered,
            proposed = rem_report.proposed,
            "sleep tick complete"
        );
        Ok(())
    }

    fn days_since_epoch(now_ms: i64) -> i64 {
        now_ms / (24 * 3_600 * 1000)
    }

    /// Drives the three tick tiers off a single light-tick interval timer
    /// until `shutdown` signals true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("gardener engine started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.config.light_tick_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_ms = chrono_now_ms();
                    if let Err(e) = self.light_tick() {
                        error!(error = %e, "light tick failed");
                    }
                    self.light_ticks_since_deep += 1;

                    let deep_due = self.light_ticks_since_deep * self.config.light_tick_secs >= self.config.deep_tick_secs;
                    if deep_due {
                        self.light_ticks_since_deep = 0;
                        if let Err(e) = self.deep_tick(now_ms).await {
                            error!(error = %e, "deep tick failed");
                        }
                    }

                    let today = Self::days_since_epoch(now_ms);
                    if self.last_sleep_day != Some(today) {
                        self.last_sleep_day = Some(today);
                        if let Err(e) = self.sleep_tick(now_ms).await {
                            error!(error = %e, "sleep tick failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("gardener engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn chrono_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
