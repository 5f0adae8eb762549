//! Pure heuristics over a user's active goals, behavioral patterns, and
//! session summaries: no LLM calls, no side effects, just `GapSignal`s.

use std::collections::HashMap;

use reverie_core::types::{BehavioralPatterns, BoardStatus, DynamicProfile, ScheduledItem, SessionSummary};
use serde_json::{json, Value};

/// A project is flagged stale once this long has passed since the user's
/// last interaction with no corresponding activity.
const STALE_GOAL_THRESHOLD_MS: i64 = 7 * 24 * 3_600 * 1000;
const STALE_GOAL_HIGH_MS: i64 = 21 * 24 * 3_600 * 1000;

/// Affect divergence (|valence - smoothed_valence| + |arousal - smoothed_arousal|)
/// past which a sudden shift counts as an anomaly worth a signal.
const AFFECT_DIVERGENCE_LOW: f64 = 0.3;
const AFFECT_DIVERGENCE_HIGH: f64 = 0.6;

/// A session summary younger than this with no scheduled item referencing
/// its session is treated as an unresolved thread.
const UNRESOLVED_THREAD_WINDOW_MS: i64 = 48 * 3_600 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapType {
    StaleGoal,
    BehavioralAnomaly,
    UnresolvedThread,
}

impl std::fmt::Display for GapType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StaleGoal => "stale_goal",
            Self::BehavioralAnomaly => "behavioral_anomaly",
            Self::UnresolvedThread => "unresolved_thread",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// A detected gap between the user's stated goals/baseline behavior and
/// their recent activity. Produced by pure heuristics, consumed by the
/// triage LLM call.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GapSignal {
    pub gap_type: GapType,
    pub severity: Severity,
    pub description: String,
    pub context: HashMap<String, Value>,
    pub source_id: String,
}

/// Flags active projects with no recent interaction. One signal per stale
/// project rather than one aggregate, so the triage call can act on each
/// independently.
pub fn scan_stale_goals(user_id: &str, profile: &DynamicProfile, now_ms: i64) -> Vec<GapSignal> {
    let Some(last_interaction_at) = profile.last_interaction_at else {
        return Vec::new();
    };
    let idle_ms = now_ms - last_interaction_at;
    if idle_ms < STALE_GOAL_THRESHOLD_MS || profile.active_projects.is_empty() {
        return Vec::new();
    }

    let severity = if idle_ms >= STALE_GOAL_HIGH_MS { Severity::High } else { Severity::Medium };
    let idle_days = idle_ms / (24 * 3_600 * 1000);

    profile
        .active_projects
        .iter()
        .map(|project| GapSignal {
            gap_type: GapType::StaleGoal,
            severity,
            description: format!("no activity on \"{project}\" in {idle_days} days"),
            context: HashMap::from([
                ("goal".to_string(), json!(project)),
                ("idleDays".to_string(), json!(idle_days)),
            ]),
            source_id: format!("{user_id}:{project}"),
        })
        .collect()
}

/// Flags a sudden divergence between the raw affect reading and its
/// smoothed baseline — the same signal the gardener's behavioral inference
/// already tracks, just read here rather than recomputed.
pub fn scan_behavioral_anomaly(user_id: &str, patterns: &BehavioralPatterns) -> Vec<GapSignal> {
    if patterns.last_analyzed_count == 0 {
        return Vec::new();
    }
    let divergence = (patterns.affect_state.valence - patterns.smoothed_affect.valence).abs()
        + (patterns.affect_state.arousal - patterns.smoothed_affect.arousal).abs();
    if divergence < AFFECT_DIVERGENCE_LOW {
        return Vec::new();
    }

    let severity = if divergence >= AFFECT_DIVERGENCE_HIGH { Severity::High } else { Severity::Low };
    vec![GapSignal {
        gap_type: GapType::BehavioralAnomaly,
        severity,
        description: "recent messages show a marked shift from the user's usual tone".to_string(),
        context: HashMap::from([
            ("valence".to_string(), json!(patterns.affect_state.valence)),
            ("smoothedValence".to_string(), json!(patterns.smoothed_affect.valence)),
            ("arousal".to_string(), json!(patterns.affect_state.arousal)),
            ("smoothedArousal".to_string(), json!(patterns.smoothed_affect.arousal)),
        ]),
        source_id: user_id.to_string(),
    }]
}

/// Flags recent session summaries with no scheduled item following up on
/// them — a conversation that trailed off without a nudge, task, or
/// reminder ever getting attached to it.
pub fn scan_unresolved_threads(
    summaries: &[SessionSummary],
    scheduled: &[ScheduledItem],
    now_ms: i64,
) -> Vec<GapSignal> {
    let mut signals = Vec::new();
    for summary in summaries {
        if now_ms - summary.created_at > UNRESOLVED_THREAD_WINDOW_MS {
            continue;
        }
        let has_followup = scheduled.iter().any(|item| {
            item.session_id.as_deref() == Some(summary.session_id.as_str())
                && !matches!(item.board_status, BoardStatus::Archived)
        });
        if has_followup {
            continue;
        }
        signals.push(GapSignal {
            gap_type: GapType::UnresolvedThread,
            severity: Severity::Low,
            description: format!("session left without follow-up: {}", summary.summary),
            context: HashMap::from([
                ("sessionId".to_string(), json!(summary.session_id)),
                ("topics".to_string(), json!(summary.topics)),
            ]),
            source_id: summary.session_id.clone(),
        });
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::types::AffectState;

    fn profile(active_projects: Vec<&str>, idle_ms: i64, now_ms: i64) -> DynamicProfile {
        DynamicProfile {
            recent_topics: vec![],
            active_projects: active_projects.into_iter().map(String::from).collect(),
            current_mood: None,
            last_interaction_at: Some(now_ms - idle_ms),
        }
    }

    #[test]
    fn fresh_project_produces_no_signal() {
        let now_ms = 1_000_000_000_000;
        let p = profile(vec!["launch"], 3_600_000, now_ms);
        assert!(scan_stale_goals("u1", &p, now_ms).is_empty());
    }

    #[test]
    fn stale_project_produces_signal_per_project() {
        let now_ms = 1_000_000_000_000;
        let p = profile(vec!["launch", "garden"], 10 * 24 * 3_600 * 1000, now_ms);
        let signals = scan_stale_goals("u1", &p, now_ms);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].severity, Severity::Medium);
    }

    #[test]
    fn very_stale_project_is_high_severity() {
        let now_ms = 1_000_000_000_000;
        let p = profile(vec!["launch"], 25 * 24 * 3_600 * 1000, now_ms);
        let signals = scan_stale_goals("u1", &p, now_ms);
        assert_eq!(signals[0].severity, Severity::High);
    }

    #[test]
    fn stable_affect_produces_no_anomaly() {
        let patterns = BehavioralPatterns {
            affect_state: AffectState { valence: 0.2, arousal: 0.3 },
            smoothed_affect: AffectState { valence: 0.25, arousal: 0.28 },
            last_analyzed_count: 10,
            ..Default::default()
        };
        assert!(scan_behavioral_anomaly("u1", &patterns).is_empty());
    }

    #[test]
    fn diverging_affect_produces_anomaly() {
        let patterns = BehavioralPatterns {
            affect_state: AffectState { valence: -0.8, arousal: 0.9 },
            smoothed_affect: AffectState { valence: 0.2, arousal: 0.2 },
            last_analyzed_count: 10,
            ..Default::default()
        };
        let signals = scan_behavioral_anomaly("u1", &patterns);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].severity, Severity::High);
    }

    #[test]
    fn unanalyzed_user_produces_no_anomaly() {
        let patterns = BehavioralPatterns::default();
        assert!(scan_behavioral_anomaly("u1", &patterns).is_empty());
    }

    fn summary(session_id: &str, created_at: i64) -> SessionSummary {
        SessionSummary {
            session_id: session_id.to_string(),
            user_id: "u1".to_string(),
            summary: "discussed the new pricing page".to_string(),
            topics: vec!["pricing".to_string()],
            message_count: 12,
            duration_ms: 600_000,
            embedding: None,
            created_at,
        }
    }

    #[test]
    fn recent_session_without_followup_is_unresolved() {
        let now_ms = 1_000_000_000_000;
        let summaries = vec![summary("s1", now_ms - 3_600_000)];
        let signals = scan_unresolved_threads(&summaries, &[], now_ms);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].source_id, "s1");
    }

    #[test]
    fn old_session_is_not_flagged() {
        let now_ms = 1_000_000_000_000;
        let summaries = vec![summary("s1", now_ms - 72 * 3_600 * 1000)];
        assert!(scan_unresolved_threads(&summaries, &[], now_ms).is_empty());
    }

    #[test]
    fn session_with_active_followup_is_not_flagged() {
        use reverie_core::types::{
            ScheduledItemKind, ScheduledItemSource, ScheduledItemStatus,
        };
        let now_ms = 1_000_000_000_000;
        let summaries = vec![summary("s1", now_ms - 3_600_000)];
        let followup = ScheduledItem {
            id: "x".into(),
            user_id: "u1".into(),
            session_id: Some("s1".into()),
            source: ScheduledItemSource::Agent,
            kind: ScheduledItemKind::Nudge,
            item_type: "nudge".into(),
            message: "".into(),
            context: None,
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
        assert!(scan_unresolved_threads(&summaries, &[followup], now_ms).is_empty());
    }
}
