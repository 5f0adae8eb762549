/// SQLite's `bm25()` rank column is negative, more negative meaning more
/// relevant. Min-max normalizes a batch of ranks into `[0, 1]` with 1 being
/// the best match, so it composes linearly with semantic similarity and
/// prominence in the hybrid score.
pub fn normalize_bm25_ranks(ranks: &[f64]) -> Vec<f64> {
    if ranks.is_empty() {
        return Vec::new();
    }
    let min = ranks.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = ranks.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < 1e-9 {
        return vec![1.0; ranks.len()];
    }
    ranks.iter().map(|r| (max - r) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_negative_rank_scores_highest() {
        let normalized = normalize_bm25_ranks(&[-5.0, -1.0, -3.0]);
        assert!((normalized[0] - 1.0).abs() < 1e-9);
        assert!((normalized[1] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn identical_ranks_all_score_one() {
        let normalized = normalize_bm25_ranks(&[-2.0, -2.0]);
        assert_eq!(normalized, vec![1.0, 1.0]);
    }
}
