//! Background gap-scan loop: one timer drives a heuristic sweep over every
//! active user, a single triage call per user, and enqueueing onto the
//! scheduler for whatever the triage call decided deserves a nudge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use reverie_core::config::ProactiveConfig;
use reverie_core::llm::LlmProvider;
use reverie_core::types::{
    BoardStatus, ScheduledItem, ScheduledItemKind, ScheduledItemSource, ScheduledItemStatus,
};
use reverie_core::Id;
use reverie_scheduler::SchedulerHandle;
use reverie_storage::StorageEngine;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::heuristics::{scan_behavioral_anomaly, scan_stale_goals, scan_unresolved_threads, GapSignal};
use crate::triage::{triage_signals, TriagedNudge};

/// How many of a user's most recent session summaries are considered for
/// the unresolved-thread heuristic per sweep.
const RECENT_SUMMARIES_LIMIT: usize = 10;

pub struct ProactiveEngine {
    storage: Arc<StorageEngine>,
    scheduler: SchedulerHandle,
    llm: Arc<dyn LlmProvider>,
    llm_model: String,
    config: ProactiveConfig,
}

impl ProactiveEngine {
    pub fn new(
        storage: Arc<StorageEngine>,
        scheduler: SchedulerHandle,
        llm: Arc<dyn LlmProvider>,
        llm_model: String,
        config: ProactiveConfig,
    ) -> Self {
        Self { storage, scheduler, llm, llm_model, config }
    }

    /// Collects this user's `GapSignal`s from the three heuristics. Pure
    /// read path — no mutation, safe to call outside the tick loop too.
    pub fn collect_signals(&self, user_id: &str, now_ms: i64) -> Result<Vec<GapSignal>> {
        let profile = self.storage.get_dynamic_profile(user_id)?;
        let patterns = self.storage.get_behavioral_patterns(user_id)?;
        let summaries = self.storage.list_session_summaries(user_id, RECENT_SUMMARIES_LIMIT)?;
        let scheduled = self.scheduler.list_for_user(user_id)?;

        let mut signals = scan_stale_goals(user_id, &profile, now_ms);
        signals.extend(scan_behavioral_anomaly(user_id, &patterns));
        signals.extend(scan_unresolved_threads(&summaries, &scheduled, now_ms));
        Ok(signals)
    }

    /// Runs the full sweep for one user: collect signals, triage, enqueue.
    /// Returns the number of nudges enqueued.
    #[instrument(skip(self))]
    async fn evaluate_user(&self, user_id: &str, now_ms: i64) -> Result<usize> {
        let signals = self.collect_signals(user_id, now_ms)?;
        if signals.is_empty() {
            return Ok(0);
        }

        let nudges = triage_signals(self.llm.as_ref(), &self.llm_model, &signals).await;
        let mut enqueued = 0;
        for nudge in nudges {
            self.enqueue_nudge(user_id, nudge, now_ms)?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    fn enqueue_nudge(&self, user_id: &str, nudge: TriagedNudge, now_ms: i64) -> Result<()> {
        let mut context = HashMap::new();
        context.insert("source".to_string(), json!("proactive_evaluator"));
        context.insert("gapType".to_string(), json!(nudge.signal.gap_type.to_string()));
        context.insert("urgency".to_string(), json!(nudge.urgency));

        let item = ScheduledItem {
            id: Id::new().to_string(),
            user_id: user_id.to_string(),
            session_id: None,
            source: ScheduledItemSource::Agent,
            kind: ScheduledItemKind::Nudge,
            item_type: "proactive_nudge".to_string(),
            message: nudge.message,
            context: Some(context),
            trigger_at: now_ms,
            status: ScheduledItemStatus::Pending,
            board_status: BoardStatus::Scheduled,
            recurring: None,
            source_memory_id: None,
            task_config: None,
            depends_on: vec![],
            priority: 0,
            labels: vec![],
            goal_id: None,
            result: None,
            fired_at: None,
            acted_at: None,
            created_at: now_ms,
            updated_at: now_ms,
            attempts: 0,
        };
        self.scheduler.enqueue(&item)?;
        Ok(())
    }

    /// Runs one sweep across every user with at least one session. A
    /// single user's heuristic or triage failure never aborts the rest.
    #[instrument(skip(self))]
    pub async fn run_sweep(&self, now_ms: i64) -> Result<usize> {
        let user_ids = self.storage.list_active_user_ids()?;
        let mut total_enqueued = 0;
        for user_id in user_ids {
            match self.evaluate_user(&user_id, now_ms).await {
                Ok(n) => total_enqueued += n,
                Err(e) => error!(user_id = %user_id, error = %e, "proactive evaluation failed for user"),
            }
        }
        Ok(total_enqueued)
    }

    /// Drives the sweep off `evaluation_interval_secs` until `shutdown`
    /// signals true. A no-op loop (still listening for shutdown) when the
    /// evaluator is disabled in config.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("proactive evaluator disabled, idling until shutdown");
            let _ = shutdown.changed().await;
            return;
        }

        info!("proactive evaluator started");
        let mut interval = tokio::time::interval(StdDuration::from_secs(self.config.evaluation_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_ms = chrono_now_ms();
                    match self.run_sweep(now_ms).await {
                        Ok(enqueued) => info!(enqueued, "proactive sweep complete"),
                        Err(e) => error!(error = %e, "proactive sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("proactive evaluator shutting down");
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reverie_core::llm::{ChatRequest, ChatResponse, ProviderError};
    use reverie_core::types::DynamicProfile;

    struct StubLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn name(&self) -> &str {
            "stub"
        }
        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(ChatResponse { content: self.response.clone(), tokens_in: 1, tokens_out: 1 })
        }
    }

    fn engine(storage: Arc<StorageEngine>, response: &str) -> ProactiveEngine {
        let scheduler = SchedulerHandle::new(storage.clone());
        let llm = Arc::new(StubLlm { response: response.to_string() });
        ProactiveEngine::new(storage, scheduler, llm, "test-model".to_string(), ProactiveConfig::default())
    }

    #[tokio::test]
    async fn stale_goal_signal_is_triaged_and_enqueued() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let now_ms = 1_700_000_000_000;
        storage
            .set_dynamic_profile(
                "u1",
                &DynamicProfile {
                    recent_topics: vec![],
                    active_projects: vec!["launch".to_string()],
                    current_mood: None,
                    last_interaction_at: Some(now_ms - 10 * 24 * 3_600 * 1000),
                },
            )
            .unwrap();
        storage
            .insert_session(&reverie_core::types::Session {
                id: "s1".to_string(),
                user_id: "u1".to_string(),
                source: "telegram".to_string(),
                created_at: now_ms,
            })
            .unwrap();

        let response = r#"{"items": [{"index": 0, "action": "nudge", "message": "how's launch going?", "urgency": "medium"}]}"#;
        let engine = engine(storage.clone(), response);
        let enqueued = engine.run_sweep(now_ms).await.unwrap();
        assert_eq!(enqueued, 1);

        let items = storage.list_scheduled_items_for_user("u1").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, ScheduledItemSource::Agent);
        assert_eq!(items[0].kind, ScheduledItemKind::Nudge);
        assert_eq!(items[0].message, "how's launch going?");
        let ctx = items[0].context.as_ref().unwrap();
        assert_eq!(ctx.get("source").unwrap(), "proactive_evaluator");
        assert_eq!(ctx.get("gapType").unwrap(), "stale_goal");
    }

    #[tokio::test]
    async fn user_with_no_signals_enqueues_nothing() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        storage
            .insert_session(&reverie_core::types::Session {
                id: "s1".to_string(),
                user_id: "u1".to_string(),
                source: "telegram".to_string(),
                created_at: 1_700_000_000_000,
            })
            .unwrap();

        let engine = engine(storage.clone(), "irrelevant");
        let enqueued = engine.run_sweep(1_700_000_000_000).await.unwrap();
        assert_eq!(enqueued, 0);
    }
}
