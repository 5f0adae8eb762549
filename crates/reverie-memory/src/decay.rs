use reverie_core::types::MemoryCategory;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Per-category decay rate λ (per day) for `prominence ← prominence · exp(−λ·Δt)`.
/// Facts and relationships are treated as more durable than preferences,
/// which drift, and events, which are inherently time-bound.
pub fn lambda_for_category(category: MemoryCategory) -> f64 {
    match category {
        MemoryCategory::Preference => 0.01,
        MemoryCategory::Fact => 0.005,
        MemoryCategory::Event => 0.02,
        MemoryCategory::Relationship => 0.003,
        MemoryCategory::Insight => 0.01,
    }
}

/// Applies the decay formula for an elapsed `delta_ms`, clamped to stay in
/// `[0, 1]` against floating-point drift at the boundaries.
pub fn decay_prominence(prominence: f64, category: MemoryCategory, delta_ms: i64) -> f64 {
    if delta_ms <= 0 {
        return prominence;
    }
    let lambda = lambda_for_category(category);
    let delta_days = delta_ms as f64 / MS_PER_DAY;
    (prominence * (-lambda * delta_days).exp()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_never_increases_prominence() {
        let decayed = decay_prominence(0.8, MemoryCategory::Fact, 30 * 86_400_000);
        assert!(decayed <= 0.8);
        assert!(decayed >= 0.0);
    }

    #[test]
    fn zero_elapsed_time_is_a_no_op() {
        assert_eq!(decay_prominence(0.5, MemoryCategory::Event, 0), 0.5);
    }

    #[test]
    fn events_decay_faster_than_relationships() {
        let event_decayed = decay_prominence(1.0, MemoryCategory::Event, 30 * 86_400_000);
        let relationship_decayed = decay_prominence(1.0, MemoryCategory::Relationship, 30 * 86_400_000);
        assert!(event_decayed < relationship_decayed);
    }
}
