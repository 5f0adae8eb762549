//! Channel resolution and proactive-message formatting for the tick
//! pipeline's delivery step.

use std::collections::HashMap;
use std::sync::Arc;

use reverie_core::channel::ChannelTriggerSource;
use reverie_core::types::{ScheduledItem, ScheduledItemKind};

use crate::error::{Result, SchedulerError};

/// Routes a delivery to the right channel adapter by the prefix of the
/// user id (`telegram:12345` → the `telegram` channel). Mirrors a plain
/// by-name lookup table rather than anything more elaborate — the registry
/// itself does no retry or backoff, that's the adapter's job.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn ChannelTriggerSource>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self { channels: HashMap::new() }
    }

    pub fn register(&mut self, channel: Arc<dyn ChannelTriggerSource>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    fn resolve(&self, user_id: &str) -> Option<&Arc<dyn ChannelTriggerSource>> {
        let prefix = user_id.split(':').next().unwrap_or(user_id);
        self.channels.get(prefix)
    }

    pub async fn deliver(&self, user_id: &str, message: &str) -> Result<()> {
        let channel = self.resolve(user_id).ok_or_else(|| SchedulerError::NoChannel {
            user_id: user_id.to_string(),
        })?;
        channel.deliver(user_id, message).await?;
        Ok(())
    }
}

/// Which proactive surface an agent-sourced item should be attributed to.
/// Purely a classification label for formatting — not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProactiveSource {
    InnerThoughts,
    GapScanner,
    TaskResult,
}

fn context_str<'a>(item: &'a ScheduledItem, key: &str) -> Option<&'a str> {
    item.context.as_ref()?.get(key)?.as_str()
}

/// Task-result items are always attributed to the task regardless of
/// context; everything else is classified by the originating gap type.
pub fn classify_source(item: &ScheduledItem) -> ProactiveSource {
    if item.kind == ScheduledItemKind::Task {
        return ProactiveSource::TaskResult;
    }
    if context_str(item, "source") == Some("proactive_evaluator") {
        if context_str(item, "gapType") == Some("unresolved_thread") {
            return ProactiveSource::InnerThoughts;
        }
        return ProactiveSource::GapScanner;
    }
    ProactiveSource::GapScanner
}

/// Renders the message actually sent to the user. User-sourced items are
/// delivered verbatim; agent-sourced items get a short classification
/// marker so the recipient can tell a nudge from a task result at a glance.
pub fn format_proactive_message(item: &ScheduledItem) -> String {
    use reverie_core::types::ScheduledItemSource;

    if item.source == ScheduledItemSource::User {
        return item.message.clone();
    }

    match classify_source(item) {
        ProactiveSource::InnerThoughts => format!("💭 {}", item.message),
        ProactiveSource::TaskResult => format!("✅ {}", item.message),
        ProactiveSource::GapScanner => item.message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::types::{BoardStatus, ScheduledItemSource, ScheduledItemStatus};
    use serde_json::json;

    fn item(kind: ScheduledItemKind, context: Option<serde_json::Value>) -> ScheduledItem {
        ScheduledItem {
            id: "x".into(),
            user_id: "telegram:1".into(),
            session_id: None,
            source: ScheduledItemSource::Agent,
            kind,
            item_type: "nudge".into(),
            message: "check in on the deploy".into(),
            context: context.map(|v| serde_json::from_value(v).unwrap()),
            trigger_at: 0,
            status: ScheduledItemStatus::Processing,
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
            created_at: 0,
            updated_at: 0,
            attempts: 0,
        }
    }

    #[test]
    fn task_result_classification_overrides_context() {
        let i = item(ScheduledItemKind::Task, Some(json!({"source": "proactive_evaluator", "gapType": "unresolved_thread"})));
        assert_eq!(classify_source(&i), ProactiveSource::TaskResult);
    }

    #[test]
    fn unresolved_thread_gap_maps_to_inner_thoughts() {
        let i = item(ScheduledItemKind::Nudge, Some(json!({"source": "proactive_evaluator", "gapType": "unresolved_thread"})));
        assert_eq!(classify_source(&i), ProactiveSource::InnerThoughts);
    }

    #[test]
    fn other_proactive_gaps_map_to_gap_scanner() {
        let i = item(ScheduledItemKind::Nudge, Some(json!({"source": "proactive_evaluator", "gapType": "stale_goal"})));
        assert_eq!(classify_source(&i), ProactiveSource::GapScanner);
    }

    #[test]
    fn registry_routes_by_user_id_prefix() {
        let registry = ChannelRegistry::new();
        assert!(registry.resolve("telegram:123").is_none());
    }
}
