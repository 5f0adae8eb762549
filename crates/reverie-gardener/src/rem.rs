//! REM exploration: looks for weak cross-domain memory pairs and asks an
//! LLM whether they're worth relating. Best-effort only — nothing here
//! can fail the sleep tick; every error is swallowed and counted.

use rand::seq::SliceRandom;
use reverie_core::llm::{ChatRequest, LlmProvider, Message, Role};
use reverie_core::types::{MemoryEntry, RelationType};
use reverie_embed::cosine_similarity;
use reverie_relations::RelationGraph;
use serde::Deserialize;
use tracing::{instrument, warn};

/// Cross-domain pairs weaker than the normal relation detector's EXTEND
/// threshold (0.5) but not so weak they're noise.
const WEAK_SIMILARITY_LOW: f32 = 0.3;
const WEAK_SIMILARITY_HIGH: f32 = 0.5;
const MIN_PROPOSAL_CONFIDENCE: f64 = 0.5;
/// Bounds the LLM calls a single sleep tick spends on exploration.
const MAX_PAIRS_PER_RUN: usize = 5;

#[derive(Debug, Deserialize)]
struct RemProposal {
    relates: bool,
    #[serde(default)]
    relation_type: Option<String>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Default, Clone)]
pub struct RemReport {
    pub pairs_considered: usize,
    pub proposed: usize,
}

fn parse_relation_type(s: &str) -> RelationType {
    match s.to_ascii_lowercase().as_str() {
        "updates" => RelationType::Updates,
        "derives" => RelationType::Derives,
        _ => RelationType::Extends,
    }
}

/// Finds memories of differing categories whose embeddings sit in the weak
/// similarity band — candidates for a cross-domain connection a normal
/// relation detection pass would never surface.
fn weak_cross_domain_pairs(memories: &[MemoryEntry]) -> Vec<(&MemoryEntry, &MemoryEntry)> {
    let mut pairs = Vec::new();
    for (i, a) in memories.iter().enumerate() {
        let Some(a_embedding) = &a.embedding else { continue };
        for b in &memories[i + 1..] {
            if b.category == a.category {
                continue;
            }
            let Some(b_embedding) = &b.embedding else { continue };
            let sim = cosine_similarity(a_embedding, b_embedding);
            if sim >= WEAK_SIMILARITY_LOW && sim < WEAK_SIMILARITY_HIGH {
                pairs.push((a, b));
            }
        }
    }
    pairs
}

/// Runs one REM exploration pass. Never returns an error: an LLM or parse
/// failure on a given pair is logged and skipped, not propagated, so a bad
/// pair never costs the sleep tick its NREM result.
#[instrument(skip(llm, graph, memories))]
pub async fn run_rem(
    llm: &dyn LlmProvider,
    model: &str,
    graph: &RelationGraph,
    memories: &[MemoryEntry],
    now_ms: i64,
) -> RemReport {
    let mut candidates = weak_cross_domain_pairs(memories);
    let mut rng = rand::thread_rng();
    candidates.shuffle(&mut rng);
    candidates.truncate(MAX_PAIRS_PER_RUN);

    let mut report = RemReport {
        pairs_considered: candidates.len(),
        ..Default::default()
    };

    for (a, b) in candidates {
        // Skip pairs already related; exploration is for novel connections.
        match graph.relations_touching(&a.id) {
            Ok(existing) if existing.iter().any(|r| r.source_id == b.id || r.target_id == b.id) => continue,
            Err(e) => {
                warn!(memory_id = %a.id, error = %e, "REM: failed to check existing relations, skipping pair");
                continue;
            }
            _ => {}
        }

        let request = ChatRequest {
            model: model.to_string(),
            system: "Two memories from different domains are given. Decide if they're worth \
                     relating. Respond with JSON: {\"relates\": bool, \"relation_type\": \
                     \"extends\"|\"derives\"|\"updates\", \"confidence\": 0.0-1.0}."
                .to_string(),
            messages: vec![Message {
                role: Role::User,
                content: format!("A: {}\nB: {}", a.content, b.content),
            }],
            max_tokens: 128,
            expect_json: true,
        };

        let response = match llm.send(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "REM: LLM call failed, skipping pair");
                continue;
            }
        };
        let proposal: RemProposal = match serde_json::from_str(&response.content) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "REM: unparseable proposal, skipping pair");
                continue;
            }
        };

        if !proposal.relates || proposal.confidence < MIN_PROPOSAL_CONFIDENCE {
            continue;
        }

        let relation_type = proposal
            .relation_type
            .as_deref()
            .map(parse_relation_type)
            .unwrap_or(RelationType::Extends);

        match graph.add_relation(&a.id, &b.id, relation_type, proposal.confidence, now_ms) {
            Ok(_) => report.proposed += 1,
            Err(e) => warn!(error = %e, "REM: failed to persist proposed relation"),
        }
    }

    report
}
