use std::collections::{HashMap, HashSet, VecDeque};
use std::f64::consts::PI;
use std::sync::Arc;

use rand::Rng;
use reverie_core::types::{MemoryRelation, RelationType};
use reverie_storage::StorageEngine;

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct ActivationConfig {
    pub max_steps: usize,
    pub decay_factor: f64,
    pub noise_sigma: f64,
    pub result_threshold: f64,
    pub max_results: usize,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            max_steps: 3,
            decay_factor: 0.5,
            noise_sigma: 0.0,
            result_threshold: 0.05,
            max_results: 10,
        }
    }
}

/// Directional edge weight for a relation type, `(forward, reverse)`.
fn directional_weight(relation_type: RelationType) -> (f64, f64) {
    match relation_type {
        RelationType::Updates => (0.9, 0.9),
        RelationType::Extends => (0.7, 0.5),
        RelationType::Derives => (0.4, 0.6),
    }
}

/// Box-Muller transform producing one standard-normal sample. `sigma=0`
/// short-circuits to `1.0` (fully deterministic, per the noise-free default).
fn gaussian_multiplier(sigma: f64, rng: &mut impl Rng) -> f64 {
    if sigma <= 0.0 {
        return 1.0;
    }
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    1.0 + z0 * sigma
}

/// Pure spreading-activation over the relation graph. Deterministic when
/// `noise_sigma == 0`. `get_relations` supplies the edge set for a node
/// (both directions), decoupling this from any particular storage backend.
pub fn spread_activation(
    seed_id: &str,
    get_relations: impl Fn(&str) -> Vec<MemoryRelation>,
    cfg: ActivationConfig,
    rng: &mut impl Rng,
) -> HashMap<String, f64> {
    let mut activation: HashMap<String, f64> = HashMap::new();
    activation.insert(seed_id.to_string(), 1.0);

    for _ in 0..cfg.max_steps {
        let mut next: HashMap<String, f64> = HashMap::new();

        for (node_id, &level) in activation.iter() {
            let edges = get_relations(node_id);
            let degree = edges.len().max(1) as f64;

            *next.entry(node_id.clone()).or_insert(0.0) += level * (1.0 - cfg.decay_factor);

            for edge in &edges {
                let (neighbor, forward) = if edge.source_id == *node_id {
                    (edge.target_id.clone(), true)
                } else {
                    (edge.source_id.clone(), false)
                };
                let (fwd_weight, rev_weight) = directional_weight(edge.relation_type);
                let edge_weight = if forward { fwd_weight } else { rev_weight } * edge.confidence;
                let spread = cfg.decay_factor / degree * edge_weight * level;
                *next.entry(neighbor).or_insert(0.0) += spread;
            }
        }

        for value in next.values_mut() {
            *value = value.min(1.0);
        }
        activation = next;
    }

    activation.remove(seed_id);

    activation
        .into_iter()
        .map(|(id, score)| (id, score * gaussian_multiplier(cfg.noise_sigma, rng)))
        .filter(|(_, score)| *score >= cfg.result_threshold)
        .collect()
}

/// Multiplies activation by per-memory prominence, restricted to
/// `is_latest=true`. Falls back to a plain BFS on any storage error, so a
/// damaged graph degrades to a weaker but still-useful traversal rather
/// than failing retrieval outright.
pub fn related_memories_with_activation(
    storage: &Arc<StorageEngine>,
    seed_id: &str,
    cfg: ActivationConfig,
    rng: &mut impl Rng,
) -> Result<Vec<(String, f64)>> {
    let fetch = |id: &str| storage.relations_touching(id).unwrap_or_default();

    let scored = spread_activation(seed_id, fetch, cfg, rng);

    let mut weighted = Vec::new();
    for (id, activation) in scored {
        match storage.get_memory(&id) {
            Ok(memory) if memory.is_latest => weighted.push((id, activation * memory.prominence)),
            _ => continue,
        }
    }
    weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    weighted.truncate(cfg.max_results);

    if weighted.is_empty() {
        return Ok(bfs_fallback(storage, seed_id, cfg.max_results)?);
    }
    Ok(weighted)
}

fn bfs_fallback(storage: &Arc<StorageEngine>, seed_id: &str, max_results: usize) -> Result<Vec<(String, f64)>> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut results = Vec::new();
    visited.insert(seed_id.to_string());
    queue.push_back(seed_id.to_string());

    while let Some(current) = queue.pop_front() {
        if results.len() >= max_results {
            break;
        }
        for relation in storage.relations_touching(&current)? {
            let neighbor = if relation.source_id == current {
                relation.target_id
            } else {
                relation.source_id
            };
            if visited.insert(neighbor.clone()) {
                results.push((neighbor.clone(), 1.0));
                queue.push_back(neighbor);
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn relation(source: &str, target: &str, relation_type: RelationType, confidence: f64) -> MemoryRelation {
        MemoryRelation {
            id: format!("{source}-{target}"),
            source_id: source.to_string(),
            target_id: target.to_string(),
            relation_type,
            confidence,
            created_at: 0,
        }
    }

    #[test]
    fn b_scores_higher_than_c_two_hops_out() {
        let edges = vec![
            relation("a", "b", RelationType::Updates, 0.9),
            relation("b", "c", RelationType::Extends, 0.8),
        ];
        let get_relations = |id: &str| -> Vec<MemoryRelation> {
            edges
                .iter()
                .filter(|r| r.source_id == id || r.target_id == id)
                .cloned()
                .collect()
        };

        let cfg = ActivationConfig {
            max_steps: 2,
            decay_factor: 0.5,
            noise_sigma: 0.0,
            result_threshold: 0.0,
            max_results: 10,
        };
        let mut rng = StepRng::new(0, 1);
        let scores = spread_activation("a", get_relations, cfg, &mut rng);

        assert!(scores.contains_key("b"));
        assert!(scores.contains_key("c"));
        assert!(scores["b"] > scores["c"]);
    }

    #[test]
    fn zero_sigma_is_deterministic_across_runs() {
        let edges = vec![relation("a", "b", RelationType::Updates, 0.9)];
        let get_relations = |id: &str| -> Vec<MemoryRelation> {
            edges
                .iter()
                .filter(|r| r.source_id == id || r.target_id == id)
                .cloned()
                .collect()
        };
        let cfg = ActivationConfig::default();

        let mut rng_a = StepRng::new(1, 7);
        let mut rng_b = StepRng::new(99, 3);
        let scores_a = spread_activation("a", &get_relations, cfg, &mut rng_a);
        let scores_b = spread_activation("a", &get_relations, cfg, &mut rng_b);
        assert_eq!(scores_a, scores_b);
    }

    #[test]
    fn seed_is_excluded_from_results() {
        let edges = vec![relation("a", "b", RelationType::Updates, 0.9)];
        let get_relations = |id: &str| -> Vec<MemoryRelation> {
            edges
                .iter()
                .filter(|r| r.source_id == id || r.target_id == id)
                .cloned()
                .collect()
        };
        let mut rng = StepRng::new(0, 1);
        let scores = spread_activation("a", get_relations, ActivationConfig::default(), &mut rng);
        assert!(!scores.contains_key("a"));
    }
}
