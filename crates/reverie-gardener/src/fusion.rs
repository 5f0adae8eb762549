//! NREM consolidation: clusters dormant memories and asks an LLM to fuse
//! each cluster into a single `derived` memory.

use std::collections::{HashMap, HashSet};

use reverie_core::ids::Id;
use reverie_core::llm::{ChatRequest, LlmProvider, Message, Role};
use reverie_core::types::{MemoryCategory, MemoryEntry, MemoryType, RelationType};
use reverie_embed::{cosine_similarity, EmbeddingProvider};
use reverie_relations::RelationGraph;
use reverie_storage::StorageEngine;
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::error::Result;

/// Dormant band: memories decayed enough to be fusion candidates but not
/// yet so decayed they're headed for archival.
const DORMANT_PROMINENCE_LOW: f64 = 0.1;
const DORMANT_PROMINENCE_HIGH: f64 = 0.5;
const FALLBACK_CLUSTER_SIMILARITY: f32 = 0.65;

#[derive(Debug, Deserialize)]
struct FusionResponse {
    summary: String,
    #[serde(default)]
    importance: Option<u8>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct NremReport {
    pub clusters_found: usize,
    pub fused: usize,
    pub discarded: usize,
}

/// Whether a memory is eligible to take part in NREM fusion: dormant
/// prominence band, latest version, and never a static profile row or an
/// already-fused output.
fn is_fusable(m: &MemoryEntry) -> bool {
    m.is_latest
        && m.memory_type == MemoryType::Regular
        && m.prominence >= DORMANT_PROMINENCE_LOW
        && m.prominence < DORMANT_PROMINENCE_HIGH
}

/// Finds connected components among fusable memories: first via relation
/// edges (BFS), then — for rows no edge reaches — a greedy
/// embedding-similarity fallback so isolated dormant memories still get a
/// chance to cluster.
pub fn find_fusion_clusters(
    graph: &RelationGraph,
    memories: Vec<MemoryEntry>,
    min_cluster_size: usize,
) -> Result<Vec<Vec<MemoryEntry>>> {
    let fusable: Vec<MemoryEntry> = memories.into_iter().filter(is_fusable).collect();
    let by_id: HashMap<String, MemoryEntry> = fusable.iter().map(|m| (m.id.clone(), m.clone())).collect();
    let ids: HashSet<String> = by_id.keys().cloned().collect();

    let mut visited: HashSet<String> = HashSet::new();
    let mut clusters: Vec<Vec<MemoryEntry>> = Vec::new();

    for start in fusable.iter() {
        if visited.contains(&start.id) {
            continue;
        }
        let mut component = vec![start.id.clone()];
        let mut queue = vec![start.id.clone()];
        visited.insert(start.id.clone());

        while let Some(current) = queue.pop() {
            for relation in graph.relations_touching(&current)? {
                let other = if relation.source_id == current {
                    relation.target_id
                } else if relation.target_id == current {
                    relation.source_id
                } else {
                    continue;
                };
                if ids.contains(&other) && visited.insert(other.clone()) {
                    component.push(other.clone());
                    queue.push(other);
                }
            }
        }

        if component.len() >= min_cluster_size {
            clusters.push(component.iter().filter_map(|id| by_id.get(id).cloned()).collect());
        }
    }

    // Fallback: greedily cluster the remaining unvisited rows by embedding
    // similarity, scoped to matching categories (no cross-category merges).
    let leftover: Vec<&MemoryEntry> = fusable.iter().filter(|m| !visited.contains(&m.id)).collect();
    let mut leftover_visited: HashSet<String> = HashSet::new();
    for seed in &leftover {
        if leftover_visited.contains(&seed.id) {
            continue;
        }
        let Some(seed_embedding) = &seed.embedding else {
            leftover_visited.insert(seed.id.clone());
            continue;
        };
        let mut cluster = vec![(*seed).clone()];
        leftover_visited.insert(seed.id.clone());

        for candidate in &leftover {
            if leftover_visited.contains(&candidate.id) || candidate.category != seed.category {
                continue;
            }
            let Some(candidate_embedding) = &candidate.embedding else {
                continue;
            };
            if cosine_similarity(seed_embedding, candidate_embedding) >= FALLBACK_CLUSTER_SIMILARITY {
                cluster.push((*candidate).clone());
                leftover_visited.insert(candidate.id.clone());
            }
        }

        if cluster.len() >= min_cluster_size {
            clusters.push(cluster);
        }
    }

    Ok(clusters)
}

/// Asks an LLM to fuse a cluster into one summary memory. Returns `false`
/// (a discard, not an error) when the LLM is unavailable, the response is
/// unparseable, or the summary fails to be shorter than its sources — the
/// fusion is simply skipped, not retried.
#[instrument(skip(llm, embedder, storage, graph, cluster))]
pub async fn fuse_memory_cluster(
    llm: &dyn LlmProvider,
    model: &str,
    embedder: &dyn EmbeddingProvider,
    storage: &StorageEngine,
    graph: &RelationGraph,
    cluster: &[MemoryEntry],
    now_ms: i64,
) -> Result<bool> {
    let combined_len: usize = cluster.iter().map(|m| m.content.len()).sum();
    let user_id = cluster[0].user_id.clone();
    let category = cluster[0].category;

    let transcript: String = cluster
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{}. {}", i + 1, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let request = ChatRequest {
        model: model.to_string(),
        system: "These memories are related but dormant. Fuse them into one shorter summary \
                 that preserves what matters. Respond with JSON: \
                 {\"summary\": string, \"importance\": 1-10, \"category\": string}."
            .to_string(),
        messages: vec![Message {
            role: Role::User,
            content: transcript,
        }],
        max_tokens: 512,
        expect_json: true,
    };

    let Ok(response) = llm.send(&request).await else {
        return Ok(false);
    };
    let Ok(parsed) = serde_json::from_str::<FusionResponse>(&response.content) else {
        return Ok(false);
    };

    if parsed.summary.len() >= combined_len {
        return Ok(false);
    }

    let fused_category = parsed
        .category
        .as_deref()
        .and_then(|c| c.parse::<MemoryCategory>().ok())
        .unwrap_or(category);

    let embedding = embedder.embed(&parsed.summary).await.ok();
    let derived = MemoryEntry {
        id: Id::new().to_string(),
        user_id,
        content: parsed.summary,
        category: fused_category,
        memory_type: MemoryType::Derived,
        importance: parsed.importance.unwrap_or(5).clamp(1, 10),
        confidence: 0.7,
        prominence: 0.5,
        access_count: 0,
        times_confirmed: 1,
        is_latest: true,
        source: "gardener_fusion".to_string(),
        source_chunk: None,
        learned_from: None,
        document_date: now_ms,
        event_date: None,
        last_accessed: None,
        created_at: now_ms,
        updated_at: now_ms,
        embedding_model: embedding.is_some().then(|| embedder.name().to_string()),
        embedding,
        contradiction_ids: Vec::new(),
        metadata: HashMap::new(),
    };
    storage.insert_memory(&derived)?;

    for source in cluster {
        if let Err(e) = graph.add_relation(&derived.id, &source.id, RelationType::Derives, 1.0, now_ms) {
            warn!(memory_id = %source.id, error = %e, "failed to record DERIVES relation");
        }
        if let Err(e) = storage.supersede_memory(&source.id, now_ms) {
            warn!(memory_id = %source.id, error = %e, "failed to supersede fused source");
        }
    }

    Ok(true)
}

/// Runs NREM consolidation over a set of candidate memories. Error
/// isolation is per cluster: one cluster's LLM failure never aborts the
/// rest.
pub async fn run_nrem(
    llm: &dyn LlmProvider,
    model: &str,
    embedder: &dyn EmbeddingProvider,
    storage: &StorageEngine,
    graph: &RelationGraph,
    memories: Vec<MemoryEntry>,
    min_cluster_size: usize,
    now_ms: i64,
) -> Result<NremReport> {
    let clusters = find_fusion_clusters(graph, memories, min_cluster_size)?;
    let mut report = NremReport {
        clusters_found: clusters.len(),
        ..Default::default()
    };

    for cluster in &clusters {
        match fuse_memory_cluster(llm, model, embedder, storage, graph, cluster, now_ms).await {
            Ok(true) => report.fused += 1,
            Ok(false) => report.discarded += 1,
            Err(e) => {
                warn!(error = %e, "NREM fusion failed for cluster, skipping");
                report.discarded += 1;
            }
        }
    }

    Ok(report)
}
