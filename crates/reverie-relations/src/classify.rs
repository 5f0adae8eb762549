use reverie_core::llm::{ChatRequest, LlmProvider, Message, Role};
use reverie_core::types::{MemoryCategory, MemoryEntry, RelationType};
use reverie_embed::cosine_similarity;
use serde::Deserialize;

pub const EXTEND_THRESHOLD: f32 = 0.5;
pub const UPDATE_THRESHOLD: f32 = 0.7;
const EARLY_EXIT_CONFIDENCE: f64 = 0.85;

/// Keyword patterns the regex fallback anchors around; the value right
/// after the pattern, with leading prepositions stripped, is what gets
/// compared between candidate and new text.
const KEYWORD_PATTERNS: &[&str] = &["lives in", "works at", "office is"];
const PREPOSITIONS: &[&str] = &["in", "at", "is", "on", "to", "of"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Updates,
    Extends,
    Derives,
    New,
}

impl From<Classification> for Option<RelationType> {
    fn from(c: Classification) -> Self {
        match c {
            Classification::Updates => Some(RelationType::Updates),
            Classification::Extends => Some(RelationType::Extends),
            Classification::Derives => Some(RelationType::Derives),
            Classification::New => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub memory: MemoryEntry,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct ClassifiedRelation {
    pub target_id: String,
    pub classification: Classification,
    pub confidence: f64,
    #[allow(dead_code)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct LlmClassification {
    #[serde(rename = "targetId")]
    target_id: Option<String>,
    classification: String,
    confidence: f64,
    reason: String,
}

/// Filters same-category candidates down to those at or above the extend
/// threshold, pairing each with its cosine similarity to the new memory.
pub fn prefilter_candidates(new_embedding: &[f32], candidates: Vec<MemoryEntry>) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter_map(|memory| {
            let embedding = memory.embedding.as_ref()?;
            let similarity = cosine_similarity(new_embedding, embedding);
            (similarity >= EXTEND_THRESHOLD).then_some(Candidate { memory, similarity })
        })
        .collect()
}

/// Whether an LLM classifier response looks like the documented failure
/// sentinel: every candidate comes back NEW with confidence 0.5 and a
/// reason mentioning failure.
fn is_sentinel_failure(results: &[LlmClassification]) -> bool {
    !results.is_empty()
        && results.iter().all(|r| {
            r.classification.eq_ignore_ascii_case("NEW")
                && (r.confidence - 0.5).abs() < 1e-9
                && r.reason.to_lowercase().contains("failed")
        })
}

/// Steps 4 (LLM classifier) through 7 (cap at 5) of the relation-detection
/// pipeline. `new_content` is the new memory's canonical text.
pub async fn classify_candidates(
    llm: Option<&dyn LlmProvider>,
    model: &str,
    new_content: &str,
    candidates: &[Candidate],
    max_relations: usize,
) -> Vec<ClassifiedRelation> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut classified = if let Some(llm) = llm {
        match classify_with_llm(llm, model, new_content, candidates).await {
            Some(results) if !is_sentinel_failure_raw(&results) => results,
            _ => regex_fallback(new_content, candidates),
        }
    } else {
        regex_fallback(new_content, candidates)
    };

    classified.retain(|c| c.classification != Classification::New);

    if let Some(early) = classified
        .iter()
        .find(|c| c.classification == Classification::Updates && c.confidence >= EARLY_EXIT_CONFIDENCE)
    {
        return vec![early.clone()];
    }

    classified.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    classified.truncate(max_relations);
    classified
}

fn is_sentinel_failure_raw(results: &[ClassifiedRelation]) -> bool {
    !results.is_empty()
        && results.iter().all(|r| {
            r.classification == Classification::New && (r.confidence - 0.5).abs() < 1e-9 && r.reason.to_lowercase().contains("failed")
        })
}

async fn classify_with_llm(
    llm: &dyn LlmProvider,
    model: &str,
    new_content: &str,
    candidates: &[Candidate],
) -> Option<Vec<ClassifiedRelation>> {
    let listed: String = candidates
        .iter()
        .map(|c| format!("{}: {}", c.memory.id, c.memory.content))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "New memory: {new_content}\n\nExisting candidates:\n{listed}\n\n\
         For each candidate, classify its relationship to the new memory as \
         UPDATES, EXTENDS, DERIVES, or NEW. Respond with a JSON array of \
         {{\"targetId\": <id>, \"classification\": <string>, \"confidence\": <float>, \"reason\": <string>}}."
    );

    let request = ChatRequest {
        model: model.to_string(),
        system: "You classify relationships between memory entries. Respond with JSON only.".to_string(),
        messages: vec![Message {
            role: Role::User,
            content: prompt,
        }],
        max_tokens: 1024,
        expect_json: true,
    };

    let response = llm.send(&request).await.ok()?;
    let raw: Vec<LlmClassification> = serde_json::from_str(&response.content).ok()?;

    if is_sentinel_failure(&raw) {
        return Some(
            raw.into_iter()
                .map(|r| ClassifiedRelation {
                    target_id: r.target_id.unwrap_or_default(),
                    classification: Classification::New,
                    confidence: r.confidence,
                    reason: r.reason,
                })
                .collect(),
        );
    }

    Some(
        raw.into_iter()
            .filter_map(|r| {
                let target_id = r.target_id.clone()?;
                let classification = match r.classification.to_uppercase().as_str() {
                    "UPDATES" => Classification::Updates,
                    "EXTENDS" => Classification::Extends,
                    "DERIVES" => Classification::Derives,
                    _ => Classification::New,
                };
                Some(ClassifiedRelation {
                    target_id,
                    classification,
                    confidence: r.confidence,
                    reason: r.reason,
                })
            })
            .collect(),
    )
}

fn strip_prepositions(value: &str) -> String {
    let mut tokens: Vec<&str> = value.split_whitespace().collect();
    while let Some(first) = tokens.first() {
        if PREPOSITIONS.contains(&first.to_lowercase().as_str()) {
            tokens.remove(0);
        } else {
            break;
        }
    }
    tokens.join(" ").to_lowercase()
}

fn extract_value_after_pattern(text: &str, pattern: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let idx = lower.find(pattern)?;
    let after = &text[idx + pattern.len()..];
    let value: String = after
        .split(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';'))
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    if value.is_empty() {
        None
    } else {
        Some(strip_prepositions(&value))
    }
}

fn keyword_overlap_ratio(new_text: &str, existing_text: &str) -> f64 {
    let existing_words: std::collections::HashSet<String> = existing_text
        .to_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    if existing_words.is_empty() {
        return 0.0;
    }
    let new_words: std::collections::HashSet<String> = new_text
        .to_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    let overlap = existing_words.intersection(&new_words).count();
    overlap as f64 / existing_words.len() as f64
}

/// Regex/keyword-pattern fallback used when no LLM classifier is configured
/// or the classifier reports its sentinel failure.
fn regex_fallback(new_content: &str, candidates: &[Candidate]) -> Vec<ClassifiedRelation> {
    let mut results = Vec::new();
    for candidate in candidates {
        if candidate.similarity >= UPDATE_THRESHOLD {
            let mismatch = KEYWORD_PATTERNS.iter().any(|pattern| {
                match (
                    extract_value_after_pattern(new_content, pattern),
                    extract_value_after_pattern(&candidate.memory.content, pattern),
                ) {
                    (Some(new_value), Some(old_value)) => new_value != old_value,
                    _ => false,
                }
            });
            if mismatch {
                results.push(ClassifiedRelation {
                    target_id: candidate.memory.id.clone(),
                    classification: Classification::Updates,
                    confidence: candidate.similarity as f64,
                    reason: "keyword pattern value mismatch".to_string(),
                });
                continue;
            }
        }

        if (EXTEND_THRESHOLD..UPDATE_THRESHOLD).contains(&candidate.similarity) {
            let overlap = keyword_overlap_ratio(new_content, &candidate.memory.content);
            let longer_by = new_content.len() as f64 / candidate.memory.content.len().max(1) as f64;
            if overlap >= 0.5 && longer_by >= 1.2 {
                results.push(ClassifiedRelation {
                    target_id: candidate.memory.id.clone(),
                    classification: Classification::Extends,
                    confidence: candidate.similarity as f64,
                    reason: "keyword overlap and length extension".to_string(),
                });
            }
        }
    }
    results
}

#[allow(dead_code)]
fn category_matches(a: MemoryCategory, b: MemoryCategory) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::types::MemoryType;
    use std::collections::HashMap;

    fn candidate(id: &str, content: &str, similarity: f32) -> Candidate {
        Candidate {
            memory: MemoryEntry {
                id: id.to_string(),
                user_id: "u1".to_string(),
                content: content.to_string(),
                category: MemoryCategory::Fact,
                memory_type: MemoryType::Regular,
                importance: 5,
                confidence: 0.8,
                prominence: 0.5,
                access_count: 0,
                times_confirmed: 0,
                is_latest: true,
                source: "chat".to_string(),
                source_chunk: None,
                learned_from: None,
                document_date: 0,
                event_date: None,
                last_accessed: None,
                created_at: 0,
                updated_at: 0,
                embedding: None,
                embedding_model: None,
                contradiction_ids: vec![],
                metadata: HashMap::new(),
            },
            similarity,
        }
    }

    #[tokio::test]
    async fn regex_fallback_detects_update_on_value_mismatch() {
        let candidates = vec![candidate("b", "works at Microsoft", 0.8)];
        let results = classify_candidates(None, "model", "works at Google", &candidates, 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].classification, Classification::Updates);
    }

    #[tokio::test]
    async fn regex_fallback_detects_extends_on_overlap_and_length() {
        let candidates = vec![candidate("b", "likes pizza", 0.6)];
        let results = classify_candidates(
            None,
            "model",
            "really likes pizza with extra cheese and olives",
            &candidates,
            5,
        )
        .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].classification, Classification::Extends);
    }

    #[tokio::test]
    async fn caps_results_at_max_relations() {
        let candidates: Vec<Candidate> = (0..10)
            .map(|i| candidate(&format!("c{i}"), "works at Acme", 0.75))
            .collect();
        let results = classify_candidates(None, "model", "works at Beta", &candidates, 5).await;
        assert!(results.len() <= 5);
    }
}
