use reverie_core::types::{AffectState, BehavioralPatterns, DynamicProfile};
use rusqlite::{params, OptionalExtension};

use crate::engine::StorageEngine;
use crate::error::Result;

impl StorageEngine {
    pub fn get_dynamic_profile(&self, user_id: &str) -> Result<DynamicProfile> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, Option<String>, Option<i64>)> = conn
            .query_row(
                "SELECT recent_topics, active_projects, current_mood, last_interaction_at
                 FROM dynamic_profile WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        Ok(match row {
            Some((topics, projects, mood, last)) => DynamicProfile {
                recent_topics: serde_json::from_str(&topics).unwrap_or_default(),
                active_projects: serde_json::from_str(&projects).unwrap_or_default(),
                current_mood: mood,
                last_interaction_at: last,
            },
            None => DynamicProfile::default(),
        })
    }

    pub fn set_dynamic_profile(&self, user_id: &str, profile: &DynamicProfile) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO dynamic_profile (user_id, recent_topics, active_projects, current_mood, last_interaction_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                recent_topics = excluded.recent_topics,
                active_projects = excluded.active_projects,
                current_mood = excluded.current_mood,
                last_interaction_at = excluded.last_interaction_at",
            params![
                user_id,
                serde_json::to_string(&profile.recent_topics)?,
                serde_json::to_string(&profile.active_projects)?,
                profile.current_mood,
                profile.last_interaction_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_behavioral_patterns(&self, user_id: &str) -> Result<BehavioralPatterns> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT communication_style, expertise_areas, active_hours, response_preferences,
                        message_frequency, session_engagement, topic_switch, response_length,
                        affect_valence, affect_arousal, smoothed_affect_valence, smoothed_affect_arousal,
                        last_analyzed_count
                 FROM behavioral_patterns WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, f64>(8)?,
                        row.get::<_, f64>(9)?,
                        row.get::<_, f64>(10)?,
                        row.get::<_, f64>(11)?,
                        row.get::<_, i64>(12)?,
                    ))
                },
            )
            .optional()?;

        Ok(match row {
            Some((
                style,
                expertise,
                hours,
                prefs,
                msg_freq,
                engagement,
                topic_switch,
                resp_len,
                valence,
                arousal,
                smoothed_valence,
                smoothed_arousal,
                last_analyzed_count,
            )) => BehavioralPatterns {
                communication_style: style,
                expertise_areas: serde_json::from_str(&expertise).unwrap_or_default(),
                active_hours: serde_json::from_str(&hours).unwrap_or_default(),
                response_preferences: serde_json::from_str(&prefs).unwrap_or_default(),
                message_frequency: msg_freq,
                session_engagement: engagement,
                topic_switch,
                response_length: resp_len,
                affect_state: AffectState { valence, arousal },
                smoothed_affect: AffectState {
                    valence: smoothed_valence,
                    arousal: smoothed_arousal,
                },
                last_analyzed_count: last_analyzed_count as u64,
            },
            None => BehavioralPatterns::default(),
        })
    }

    pub fn set_behavioral_patterns(&self, user_id: &str, patterns: &BehavioralPatterns) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO behavioral_patterns
                (user_id, communication_style, expertise_areas, active_hours, response_preferences,
                 message_frequency, session_engagement, topic_switch, response_length,
                 affect_valence, affect_arousal, smoothed_affect_valence, smoothed_affect_arousal,
                 last_analyzed_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(user_id) DO UPDATE SET
                communication_style = excluded.communication_style,
                expertise_areas = excluded.expertise_areas,
                active_hours = excluded.active_hours,
                response_preferences = excluded.response_preferences,
                message_frequency = excluded.message_frequency,
                session_engagement = excluded.session_engagement,
                topic_switch = excluded.topic_switch,
                response_length = excluded.response_length,
                affect_valence = excluded.affect_valence,
                affect_arousal = excluded.affect_arousal,
                smoothed_affect_valence = excluded.smoothed_affect_valence,
                smoothed_affect_arousal = excluded.smoothed_affect_arousal,
                last_analyzed_count = excluded.last_analyzed_count",
            params![
                user_id,
                patterns.communication_style,
                serde_json::to_string(&patterns.expertise_areas)?,
                serde_json::to_string(&patterns.active_hours)?,
                serde_json::to_string(&patterns.response_preferences)?,
                patterns.message_frequency,
                patterns.session_engagement,
                patterns.topic_switch,
                patterns.response_length,
                patterns.affect_state.valence,
                patterns.affect_state.arousal,
                patterns.smoothed_affect.valence,
                patterns.smoothed_affect.arousal,
                patterns.last_analyzed_count as i64,
            ],
        )?;
        Ok(())
    }
}
