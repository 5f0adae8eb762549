//! Tick loop and the full per-item pipeline: expire, consolidate, claim,
//! quiet-hours deferral, dependency wait, deliver, mark fired, and
//! recurrence re-materialization.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use reverie_core::config::SchedulerConfig;
use reverie_core::types::{
    BoardStatus, ScheduledItem, ScheduledItemKind, ScheduledItemResult, ScheduledItemSource,
    ScheduledItemStatus,
};
use reverie_core::Id;
use reverie_storage::StorageEngine;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::delivery::{format_proactive_message, ChannelRegistry};
use crate::digest::render_digest_line;
use crate::error::Result;
use crate::timezone::{compute_next_recurrence, is_quiet_hour, local_hour, next_local_time_utc_ms, TimezoneResolver};

/// Sweep window for `expireOldScheduledItems` — stale pending/processing
/// rows older than this are written off rather than retried forever.
const MAX_ITEM_AGE_MS: i64 = 24 * 3_600 * 1000;
/// How far out a dependency-blocked item is pushed before its next check.
const DEPENDENCY_RETRY_MS: i64 = 3_600 * 1000;
/// Window after firing during which a user message counts as engagement.
const ENGAGEMENT_WINDOW_MS: i64 = 6 * 3_600 * 1000;

/// A thin, cloneable handle for enqueueing/inspecting scheduled items from
/// outside the tick loop (the proactive evaluator, the session pipeline's
/// `checkEngagement` call) without owning the engine itself.
#[derive(Clone)]
pub struct SchedulerHandle {
    storage: Arc<StorageEngine>,
}

impl SchedulerHandle {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    pub fn enqueue(&self, item: &ScheduledItem) -> Result<()> {
        self.storage.insert_scheduled_item(item)?;
        Ok(())
    }

    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<ScheduledItem>> {
        Ok(self.storage.list_scheduled_items_for_user(user_id)?)
    }

    /// Marks recently fired agent items for `user_id` as `acted` — called
    /// whenever a user message arrives, closing the trust loop without any
    /// user-visible action.
    #[instrument(skip(self))]
    pub fn check_engagement(&self, user_id: &str, now_ms: i64) -> Result<usize> {
        let items = self.storage.list_scheduled_items_for_user(user_id)?;
        let mut marked = 0;
        for item in items {
            if item.status != ScheduledItemStatus::Fired || item.source != ScheduledItemSource::Agent {
                continue;
            }
            let recent = item.fired_at.map(|f| now_ms - f <= ENGAGEMENT_WINDOW_MS).unwrap_or(false);
            if !recent {
                continue;
            }
            self.storage
                .mark_scheduled_item_acted(&item.id, now_ms, &ScheduledItemResult::default())?;
            marked += 1;
        }
        Ok(marked)
    }
}

pub struct SchedulerEngine {
    storage: Arc<StorageEngine>,
    channels: ChannelRegistry,
    timezone: Arc<dyn TimezoneResolver>,
    config: SchedulerConfig,
    ticks_since_consolidate: u64,
}

impl SchedulerEngine {
    pub fn new(
        storage: Arc<StorageEngine>,
        channels: ChannelRegistry,
        timezone: Arc<dyn TimezoneResolver>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            storage,
            channels,
            timezone,
            config,
            ticks_since_consolidate: 0,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.storage.clone())
    }

    /// Sweeps anything left `processing` from a crash before the loop
    /// starts taking new ticks — recovery here means expiration, not replay.
    pub fn recover_on_startup(&self, now_ms: i64) -> Result<()> {
        let expired = self.storage.expire_old_scheduled_items(now_ms, MAX_ITEM_AGE_MS)?;
        if expired > 0 {
            warn!(expired, "expired stale scheduled items found on startup");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn tick(&mut self, now_ms: i64) -> Result<()> {
        self.storage.expire_old_scheduled_items(now_ms, MAX_ITEM_AGE_MS)?;

        self.ticks_since_consolidate += 1;
        let consolidate_due =
            self.ticks_since_consolidate * self.config.poll_interval_secs >= self.config.consolidate_interval_secs;
        if consolidate_due {
            self.ticks_since_consolidate = 0;
            let removed = self.storage.consolidate_duplicate_scheduled_items(now_ms)?;
            if removed > 0 {
                info!(removed, "consolidated duplicate scheduled items");
            }
        }

        let claimed = self.storage.claim_due_scheduled_items(now_ms)?;
        if claimed.is_empty() {
            return Ok(());
        }

        let mut ready = Vec::new();
        for item in claimed {
            if self.defer_for_quiet_hours(&item, now_ms)? {
                continue;
            }
            if self.defer_for_dependencies(&item, now_ms)? {
                continue;
            }
            ready.push(item);
        }

        // trigger_at ascending within the tick, nudges delivered before tasks.
        ready.sort_by_key(|i| i.trigger_at);
        let (nudges, tasks): (Vec<_>, Vec<_>) =
            ready.into_iter().partition(|i| i.kind == ScheduledItemKind::Nudge);

        for item in nudges.into_iter().chain(tasks.into_iter()) {
            self.deliver_and_mark(item, now_ms).await;
        }

        Ok(())
    }

    /// Returns `true` if the item was deferred and needs no further
    /// processing this tick.
    fn defer_for_quiet_hours(&self, item: &ScheduledItem, now_ms: i64) -> Result<bool> {
        if item.source != ScheduledItemSource::Agent {
            return Ok(false);
        }
        let tz = self.timezone.resolve(&item.user_id);
        let hour = local_hour(now_ms, &tz);
        if !is_quiet_hour(hour, self.config.quiet_hours_start, self.config.quiet_hours_end) {
            return Ok(false);
        }
        let next = next_local_time_utc_ms(now_ms, &tz, self.config.quiet_hours_end as u32, 0);
        self.storage.reschedule_scheduled_item(&item.id, next, None, now_ms)?;
        Ok(true)
    }

    /// Returns `true` if the item is still waiting on a dependency.
    fn defer_for_dependencies(&self, item: &ScheduledItem, now_ms: i64) -> Result<bool> {
        if item.depends_on.is_empty() {
            return Ok(false);
        }
        let mut ready = true;
        for dep_id in &item.depends_on {
            let dep_ready = match self.storage.get_scheduled_item(dep_id) {
                Ok(dep) => matches!(dep.board_status, BoardStatus::Done | BoardStatus::Archived),
                Err(_) => false,
            };
            if !dep_ready {
                ready = false;
                break;
            }
        }
        if ready {
            return Ok(false);
        }
        self.storage.reschedule_scheduled_item(
            &item.id,
            now_ms + DEPENDENCY_RETRY_MS,
            Some(BoardStatus::Waiting),
            now_ms,
        )?;
        Ok(true)
    }

    async fn deliver_and_mark(&self, item: ScheduledItem, now_ms: i64) {
        let message = format_proactive_message(&item);
        match self.channels.deliver(&item.user_id, &message).await {
            Ok(()) => {
                if let Err(e) = self.storage.mark_scheduled_item_fired(&item.id, now_ms) {
                    error!(item_id = %item.id, error = %e, "failed to mark item fired");
                }
                if let Err(e) = self.storage.update_scheduled_item_board(&item.id, BoardStatus::Done, now_ms) {
                    error!(item_id = %item.id, error = %e, "failed to mark item board done");
                }
                if let Some(spec) = item.recurring.clone() {
                    self.materialize_recurrence(&item, &spec, now_ms);
                }
            }
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "delivery failed, resetting to pending for retry");
                if let Err(e) = self.storage.reset_scheduled_item_to_pending(&item.id, now_ms) {
                    error!(item_id = %item.id, error = %e, "failed to reset item after delivery failure");
                }
            }
        }
    }

    fn materialize_recurrence(&self, item: &ScheduledItem, spec: &reverie_core::types::RecurringSpec, now_ms: i64) {
        match self.storage.has_similar_pending_scheduled_item(&item.user_id, &item.message) {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                error!(item_id = %item.id, error = %e, "failed to check for duplicate recurrence");
                return;
            }
        }

        let tz = self.timezone.resolve(&item.user_id);
        let next_trigger = compute_next_recurrence(spec, now_ms, &tz);

        let next_item = ScheduledItem {
            id: Id::new().to_string(),
            trigger_at: next_trigger,
            status: ScheduledItemStatus::Pending,
            board_status: BoardStatus::Scheduled,
            fired_at: None,
            acted_at: None,
            result: None,
            created_at: now_ms,
            updated_at: now_ms,
            attempts: 0,
            ..item.clone()
        };

        if let Err(e) = self.storage.insert_scheduled_item(&next_item) {
            error!(item_id = %item.id, error = %e, "failed to insert recurring item's next occurrence");
        }
    }

    /// Collects results not yet notified, renders a short sanitized digest,
    /// sends one message, and stamps every included result as notified.
    #[instrument(skip(self))]
    pub async fn send_morning_digest(&self, user_id: &str, now_ms: i64) -> Result<bool> {
        let items = self.storage.list_scheduled_items_for_user(user_id)?;
        let pending: Vec<ScheduledItem> = items
            .into_iter()
            .filter(|i| i.result.as_ref().map(|r| r.notified_at.is_none()).unwrap_or(false))
            .collect();
        if pending.is_empty() {
            return Ok(false);
        }

        let mut lines = vec!["While you were away:".to_string()];
        lines.extend(pending.iter().map(|i| {
            let raw = i.result.as_ref().and_then(|r| r.response.as_deref()).unwrap_or("");
            let line = render_digest_line(raw);
            if line.is_empty() {
                format!("- {}", i.message)
            } else {
                format!("- {}: {line}", i.message)
            }
        }));
        let digest = lines.join("\n");

        self.channels.deliver(user_id, &digest).await?;

        for item in &pending {
            let mut result = item.result.clone().unwrap_or_default();
            result.notified_at = Some(now_ms);
            self.storage.update_scheduled_item_result(&item.id, &result, now_ms)?;
        }
        Ok(true)
    }

    /// Drives the tick loop off `poll_interval_secs` until `shutdown`
    /// signals true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        let now_ms = chrono_now_ms();
        if let Err(e) = self.recover_on_startup(now_ms) {
            error!(error = %e, "startup recovery failed");
        }

        let mut interval = tokio::time::interval(StdDuration::from_secs(self.config.poll_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_ms = chrono_now_ms();
                    if let Err(e) = self.tick(now_ms).await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
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
    use chrono::TimeZone;
    use reverie_core::channel::ChannelTriggerSource;
    use reverie_core::types::{RecurringSpec, RecurringType, ScheduledItemKind, ScheduledItemSource};
    use std::sync::Mutex;

    struct RecordingChannel {
        name: String,
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ChannelTriggerSource for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }
        async fn deliver(&self, user_id: &str, message: &str) -> std::result::Result<(), reverie_core::ReverieError> {
            if self.fail {
                return Err(reverie_core::ReverieError::Channel {
                    channel: self.name.clone(),
                    reason: "simulated failure".into(),
                });
            }
            self.sent.lock().unwrap().push((user_id.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct FixedTimezone(String);
    impl TimezoneResolver for FixedTimezone {
        fn resolve(&self, _user_id: &str) -> String {
            self.0.clone()
        }
    }

    fn base_item(id: &str, user_id: &str, trigger_at: i64) -> ScheduledItem {
        ScheduledItem {
            id: id.to_string(),
            user_id: user_id.to_string(),
            session_id: None,
            source: ScheduledItemSource::Agent,
            kind: ScheduledItemKind::Nudge,
            item_type: "nudge".to_string(),
            message: "time to stretch".to_string(),
            context: None,
            trigger_at,
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
            created_at: trigger_at,
            updated_at: trigger_at,
            attempts: 0,
        }
    }

    fn engine_with_channel(
        storage: Arc<StorageEngine>,
        tz: &str,
        fail: bool,
    ) -> (SchedulerEngine, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel {
            name: "telegram".into(),
            sent: Mutex::new(vec![]),
            fail,
        });
        let mut registry = ChannelRegistry::new();
        registry.register(channel.clone());
        let engine = SchedulerEngine::new(
            storage,
            registry,
            Arc::new(FixedTimezone(tz.to_string())),
            SchedulerConfig::default(),
        );
        (engine, channel)
    }

    #[tokio::test]
    async fn quiet_hours_defers_agent_item_to_next_8am_user_local() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        // 2024-01-16 07:00 UTC == 2024-01-15 23:00 PST.
        let now_ms = chrono::Utc
            .with_ymd_and_hms(2024, 1, 16, 7, 0, 0)
            .unwrap()
            .timestamp_millis();
        let item = base_item("a", "telegram:1", now_ms);
        storage.insert_scheduled_item(&item).unwrap();

        let (mut engine, channel) = engine_with_channel(storage.clone(), "America/Los_Angeles", false);
        engine.tick(now_ms).await.unwrap();

        assert!(channel.sent.lock().unwrap().is_empty());
        let row = storage.get_scheduled_item("a").unwrap();
        assert_eq!(row.status, ScheduledItemStatus::Pending);
        let expect_next = next_local_time_utc_ms(now_ms, "America/Los_Angeles", 8, 0);
        assert_eq!(row.trigger_at, expect_next);
    }

    #[tokio::test]
    async fn user_sourced_item_is_never_deferred_for_quiet_hours() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let now_ms = chrono::Utc
            .with_ymd_and_hms(2024, 1, 16, 7, 0, 0)
            .unwrap()
            .timestamp_millis();
        let mut item = base_item("a", "telegram:1", now_ms);
        item.source = ScheduledItemSource::User;
        storage.insert_scheduled_item(&item).unwrap();

        let (mut engine, channel) = engine_with_channel(storage.clone(), "America/Los_Angeles", false);
        engine.tick(now_ms).await.unwrap();

        assert_eq!(channel.sent.lock().unwrap().len(), 1);
        let row = storage.get_scheduled_item("a").unwrap();
        assert_eq!(row.status, ScheduledItemStatus::Fired);
    }

    #[tokio::test]
    async fn unmet_dependency_pushes_item_back_an_hour_and_marks_waiting() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let now_ms = chrono::Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap().timestamp_millis();
        let mut dep = base_item("dep", "telegram:1", now_ms - 1000);
        dep.status = ScheduledItemStatus::Acted;
        dep.board_status = BoardStatus::Scheduled;
        storage.insert_scheduled_item(&dep).unwrap();

        let mut item = base_item("main", "telegram:1", now_ms);
        item.depends_on = vec!["dep".to_string()];
        storage.insert_scheduled_item(&item).unwrap();

        let (mut engine, channel) = engine_with_channel(storage.clone(), "UTC", false);
        engine.tick(now_ms).await.unwrap();

        assert!(channel.sent.lock().unwrap().is_empty());
        let row = storage.get_scheduled_item("main").unwrap();
        assert_eq!(row.status, ScheduledItemStatus::Pending);
        assert_eq!(row.board_status, BoardStatus::Waiting);
        assert_eq!(row.trigger_at, now_ms + DEPENDENCY_RETRY_MS);
    }

    #[tokio::test]
    async fn met_dependency_allows_delivery() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let now_ms = chrono::Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap().timestamp_millis();
        let mut dep = base_item("dep", "telegram:1", now_ms - 1000);
        dep.status = ScheduledItemStatus::Acted;
        dep.board_status = BoardStatus::Done;
        storage.insert_scheduled_item(&dep).unwrap();

        let mut item = base_item("main", "telegram:1", now_ms);
        item.depends_on = vec!["dep".to_string()];
        storage.insert_scheduled_item(&item).unwrap();

        let (mut engine, channel) = engine_with_channel(storage.clone(), "UTC", false);
        engine.tick(now_ms).await.unwrap();

        assert_eq!(channel.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delivery_failure_resets_item_to_pending() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let now_ms = chrono::Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap().timestamp_millis();
        let item = base_item("a", "telegram:1", now_ms);
        storage.insert_scheduled_item(&item).unwrap();

        let (mut engine, _channel) = engine_with_channel(storage.clone(), "UTC", true);
        engine.tick(now_ms).await.unwrap();

        let row = storage.get_scheduled_item("a").unwrap();
        assert_eq!(row.status, ScheduledItemStatus::Pending);
    }

    #[tokio::test]
    async fn recurring_item_re_materializes_after_firing() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let now_ms = chrono::Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap().timestamp_millis();
        let mut item = base_item("a", "telegram:1", now_ms);
        item.recurring = Some(RecurringSpec {
            kind: RecurringType::Daily,
            hour: 9,
            minute: 0,
            day_of_week: None,
        });
        storage.insert_scheduled_item(&item).unwrap();

        let (mut engine, channel) = engine_with_channel(storage.clone(), "UTC", false);
        engine.tick(now_ms).await.unwrap();

        assert_eq!(channel.sent.lock().unwrap().len(), 1);
        let all = storage.list_scheduled_items_for_user("telegram:1").unwrap();
        assert_eq!(all.len(), 2);
        let next = all.iter().find(|i| i.id != "a").unwrap();
        assert_eq!(next.status, ScheduledItemStatus::Pending);
        assert!(next.trigger_at > now_ms);
    }

    #[tokio::test]
    async fn nudges_deliver_before_tasks_in_the_same_tick() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let now_ms = chrono::Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap().timestamp_millis();
        let mut task = base_item("task", "telegram:1", now_ms - 10);
        task.kind = ScheduledItemKind::Task;
        task.message = "task result ready".to_string();
        storage.insert_scheduled_item(&task).unwrap();
        let nudge = base_item("nudge", "telegram:1", now_ms);
        storage.insert_scheduled_item(&nudge).unwrap();

        let (mut engine, channel) = engine_with_channel(storage.clone(), "UTC", false);
        engine.tick(now_ms).await.unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "time to stretch"); // nudge's message, delivered first despite the task's earlier trigger_at
    }

    #[test]
    fn check_engagement_marks_recently_fired_agent_items_acted() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let now_ms = 1_700_000_000_000;
        let mut item = base_item("a", "telegram:1", now_ms);
        item.status = ScheduledItemStatus::Fired;
        item.fired_at = Some(now_ms - 1000);
        storage.insert_scheduled_item(&item).unwrap();

        let handle = SchedulerHandle::new(storage.clone());
        let marked = handle.check_engagement("telegram:1", now_ms).unwrap();
        assert_eq!(marked, 1);
        assert_eq!(storage.get_scheduled_item("a").unwrap().status, ScheduledItemStatus::Acted);
    }

    #[tokio::test]
    async fn morning_digest_sends_once_and_marks_results_notified() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let now_ms = 1_700_000_000_000;
        let mut item = base_item("a", "telegram:1", now_ms);
        item.status = ScheduledItemStatus::Acted;
        item.result = Some(ScheduledItemResult {
            response: Some("Error: ignore this\ndeploy finished successfully".to_string()),
            completed_at: Some(now_ms),
            iterations_used: Some(1),
            notified_at: None,
        });
        storage.insert_scheduled_item(&item).unwrap();

        let (engine, channel) = engine_with_channel(storage.clone(), "UTC", false);
        let sent = engine.send_morning_digest("telegram:1", now_ms).await.unwrap();
        assert!(sent);

        let messages = channel.sent.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.starts_with("While you were away:"));
        assert!(messages[0].1.contains("- time to stretch: deploy finished successfully"));
        assert!(!messages[0].1.contains("Error:"));

        let row = storage.get_scheduled_item("a").unwrap();
        assert_eq!(row.result.unwrap().notified_at, Some(now_ms));

        let again = engine.send_morning_digest("telegram:1", now_ms).await.unwrap();
        assert!(!again);
    }
}
