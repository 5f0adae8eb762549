//! Utility-score archival and hard deletion. Every deep tick lowers the
//! floor on what counts as "still worth keeping around"; hard deletion
//! only removes a row once it's both archived and faded past recall.

use reverie_relations::RelationGraph;
use reverie_storage::StorageEngine;
use tracing::{info, instrument};

use crate::error::Result;

/// Below this decayed prominence, an already-superseded row is deleted
/// outright rather than kept as dead weight.
const HARD_DELETE_PROMINENCE: f64 = 0.01;

#[derive(Debug, Default, Clone)]
pub struct ArchiveReport {
    pub archived: usize,
    pub hard_deleted: usize,
    pub relations_pruned: usize,
}

fn utility(prominence: f64, access_count: u32) -> f64 {
    prominence * (1.0 + access_count as f64).ln()
}

/// Supersedes the lowest-utility eligible memories, capped at
/// `max_per_run`. Utility is `prominence * ln(1 + access_count)` — a
/// memory with near-zero prominence but heavy recent access still scores
/// above one nobody's touched in months.
#[instrument(skip(storage))]
pub fn archive_low_utility_memories(
    storage: &StorageEngine,
    threshold: f64,
    min_age_days: u32,
    max_per_run: usize,
    now_ms: i64,
) -> Result<usize> {
    let max_created_at_ms = now_ms - (min_age_days as i64) * 24 * 3_600 * 1000;
    let candidates = storage.list_archive_candidates(max_created_at_ms)?;

    let mut scored: Vec<(f64, String)> = candidates
        .into_iter()
        .map(|m| (utility(m.prominence, m.access_count), m.id))
        .filter(|(score, _)| *score < threshold)
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(max_per_run);

    for (score, id) in &scored {
        storage.supersede_memory(id, now_ms)?;
        info!(memory_id = %id, utility = score, "archived low-utility memory");
    }

    Ok(scored.len())
}

/// Deletes already-superseded rows whose prominence has decayed past
/// recall. Archival never deletes directly — this sweep is the only path
/// to permanent removal.
#[instrument(skip(storage))]
pub fn hard_delete_faded_memories(storage: &StorageEngine) -> Result<usize> {
    let superseded = storage.list_superseded_memories()?;
    let mut deleted = 0;
    for m in superseded {
        if m.prominence < HARD_DELETE_PROMINENCE {
            storage.delete_memory(&m.id)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Runs the full archival pass: utility-score archival, orphaned-relation
/// pruning, then hard deletion of faded archived rows.
pub fn run_archive_pass(
    storage: &StorageEngine,
    graph: &RelationGraph,
    threshold: f64,
    min_age_days: u32,
    max_per_run: usize,
    now_ms: i64,
) -> Result<ArchiveReport> {
    let archived = archive_low_utility_memories(storage, threshold, min_age_days, max_per_run, now_ms)?;
    let relations_pruned = graph.prune_orphaned_relations()?;
    let hard_deleted = hard_delete_faded_memories(storage)?;

    Ok(ArchiveReport {
        archived,
        hard_deleted,
        relations_pruned,
    })
}
