//! Incremental behavioral-pattern inference. Each run only looks at
//! messages past the user's `last_analyzed_count` cursor and folds them
//! into the existing running aggregates — never a full recompute.

use std::collections::HashSet;

use reverie_core::types::{AffectState, BehavioralPatterns, MessageRole, SessionMessage};
use reverie_storage::StorageEngine;
use tracing::instrument;

use crate::error::Result;

const EXPERTISE_VOCABULARY: &[&str] = &[
    "rust", "python", "javascript", "typescript", "kubernetes", "docker", "sql", "react",
    "postgres", "terraform", "golang", "aws", "graphql", "linux", "api",
];
const MAX_EXPERTISE_AREAS: usize = 20;
const SMOOTHING_ALPHA: f64 = 0.3;

struct BatchStats {
    active_hours: HashSet<u8>,
    expertise_hits: HashSet<String>,
    avg_length: f64,
    avg_valence: f64,
    avg_arousal: f64,
    topic_switch_rate: f64,
    messages_per_session: f64,
    user_message_count: usize,
}

fn hour_of_day(created_at_ms: i64) -> u8 {
    let secs = created_at_ms / 1000;
    (((secs % 86_400) + 86_400) % 86_400 / 3600) as u8
}

fn score_affect(text: &str) -> (f64, f64) {
    let lower = text.to_ascii_lowercase();
    let positive = ["thanks", "great", "love", "awesome", "good", "happy"];
    let negative = ["hate", "angry", "frustrated", "bad", "annoyed", "sad"];

    let pos_hits = positive.iter().filter(|w| lower.contains(*w)).count() as f64;
    let neg_hits = negative.iter().filter(|w| lower.contains(*w)).count() as f64;
    let valence = ((pos_hits - neg_hits) / 3.0).clamp(-1.0, 1.0);

    let exclamations = text.matches('!').count() as f64;
    let caps_words = text.split_whitespace().filter(|w| w.len() > 2 && w.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())).count() as f64;
    let arousal = ((exclamations + caps_words) / 5.0).clamp(0.0, 1.0);

    (valence, arousal)
}

fn compute_batch_stats(messages: &[SessionMessage]) -> BatchStats {
    let user_messages: Vec<&SessionMessage> = messages.iter().filter(|m| m.role == MessageRole::User).collect();

    let mut active_hours = HashSet::new();
    let mut expertise_hits = HashSet::new();
    let mut total_len = 0usize;
    let mut total_valence = 0.0;
    let mut total_arousal = 0.0;
    let mut sessions = HashSet::new();

    for m in &user_messages {
        active_hours.insert(hour_of_day(m.created_at));
        let lower = m.content.to_ascii_lowercase();
        for term in EXPERTISE_VOCABULARY {
            if lower.contains(term) {
                expertise_hits.insert(term.to_string());
            }
        }
        total_len += m.content.len();
        let (v, a) = score_affect(&m.content);
        total_valence += v;
        total_arousal += a;
        sessions.insert(m.session_id.clone());
    }

    let mut switches = 0usize;
    for pair in user_messages.windows(2) {
        let a_words: HashSet<&str> = pair[0].content.split_whitespace().collect();
        let b_words: HashSet<&str> = pair[1].content.split_whitespace().collect();
        if a_words.is_disjoint(&b_words) {
            switches += 1;
        }
    }

    let count = user_messages.len().max(1) as f64;
    BatchStats {
        active_hours,
        expertise_hits,
        avg_length: total_len as f64 / count,
        avg_valence: total_valence / count,
        avg_arousal: total_arousal / count,
        topic_switch_rate: if user_messages.len() > 1 {
            switches as f64 / (user_messages.len() - 1) as f64
        } else {
            0.0
        },
        messages_per_session: user_messages.len() as f64 / sessions.len().max(1) as f64,
        user_message_count: user_messages.len(),
    }
}

fn classify_style(avg_length: f64) -> String {
    if avg_length < 40.0 {
        "concise".to_string()
    } else if avg_length < 150.0 {
        "conversational".to_string()
    } else {
        "verbose".to_string()
    }
}

/// Blends a previously-aggregated value with a new batch value, weighted
/// by how many messages backed each — new evidence moves the average
/// proportionally to its share of total history.
fn weighted_merge(old_value: f64, old_weight: f64, new_value: f64, new_weight: f64) -> f64 {
    if old_weight + new_weight <= 0.0 {
        return new_value;
    }
    (old_value * old_weight + new_value * new_weight) / (old_weight + new_weight)
}

/// Folds any messages past `last_analyzed_count` into a user's behavioral
/// patterns and persists the result. A no-op if there's nothing new.
#[instrument(skip(storage))]
pub fn infer_for_user(storage: &StorageEngine, user_id: &str) -> Result<bool> {
    let mut patterns = storage.get_behavioral_patterns(user_id)?;
    let all_messages = storage.list_session_messages_for_user(user_id)?;

    let cursor = patterns.last_analyzed_count as usize;
    if cursor >= all_messages.len() {
        return Ok(false);
    }
    let new_messages = &all_messages[cursor..];
    let stats = compute_batch_stats(new_messages);
    if stats.user_message_count == 0 {
        patterns.last_analyzed_count = all_messages.len() as u64;
        storage.set_behavioral_patterns(user_id, &patterns)?;
        return Ok(true);
    }

    let old_weight = cursor as f64;
    let new_weight = stats.user_message_count as f64;

    patterns.response_length = weighted_merge(patterns.response_length, old_weight, stats.avg_length, new_weight);
    patterns.message_frequency = weighted_merge(patterns.message_frequency, old_weight, stats.messages_per_session, new_weight);
    patterns.topic_switch = weighted_merge(patterns.topic_switch, old_weight, stats.topic_switch_rate, new_weight);
    patterns.session_engagement = weighted_merge(
        patterns.session_engagement,
        old_weight,
        stats.messages_per_session,
        new_weight,
    );
    patterns.communication_style = Some(classify_style(patterns.response_length));

    let mut hours: HashSet<u8> = patterns.active_hours.iter().copied().collect();
    hours.extend(stats.active_hours);
    patterns.active_hours = {
        let mut v: Vec<u8> = hours.into_iter().collect();
        v.sort_unstable();
        v
    };

    let mut expertise: HashSet<String> = patterns.expertise_areas.iter().cloned().collect();
    expertise.extend(stats.expertise_hits);
    patterns.expertise_areas = expertise.into_iter().take(MAX_EXPERTISE_AREAS).collect();

    let batch_affect = AffectState {
        valence: stats.avg_valence,
        arousal: stats.avg_arousal,
    };
    patterns.affect_state = batch_affect;
    patterns.smoothed_affect = AffectState {
        valence: SMOOTHING_ALPHA * batch_affect.valence + (1.0 - SMOOTHING_ALPHA) * patterns.smoothed_affect.valence,
        arousal: SMOOTHING_ALPHA * batch_affect.arousal + (1.0 - SMOOTHING_ALPHA) * patterns.smoothed_affect.arousal,
    };
    patterns.last_analyzed_count = all_messages.len() as u64;

    storage.set_behavioral_patterns(user_id, &patterns)?;
    Ok(true)
}

/// Runs incremental inference for every user with at least one session.
pub fn infer_active_users(storage: &StorageEngine) -> Result<usize> {
    let user_ids = storage.list_active_user_ids()?;
    let mut updated = 0;
    for user_id in user_ids {
        if infer_for_user(storage, &user_id)? {
            updated += 1;
        }
    }
    Ok(updated)
}
