use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ReverieError, Result};

pub const DEFAULT_EMBEDDING_DIM: usize = 256;

/// Top-level config: `reverie.toml` + `REVERIE_*` env overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverieConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub relations: RelationsConfig,
    #[serde(default)]
    pub gardener: GardenerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub proactive: ProactiveConfig,
}

impl Default for ReverieConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            memory: MemoryConfig::default(),
            relations: RelationsConfig::default(),
            gardener: GardenerConfig::default(),
            scheduler: SchedulerConfig::default(),
            proactive: ProactiveConfig::default(),
        }
    }
}

impl ReverieConfig {
    /// Load config from a TOML file with `REVERIE_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.reverie/reverie.toml
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ReverieConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("REVERIE_").split("_"))
            .extract()
            .map_err(|e| ReverieError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.reverie/reverie.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.reverie/reverie.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    /// Max retries for a transient LLM failure before the caller falls back.
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: default_anthropic_base_url(),
            max_retries: default_llm_retries(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_llm_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dim")]
    pub dimensions: usize,
    #[serde(default = "default_cache_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_cache_bytes")]
    pub cache_max_bytes: usize,
    /// Consecutive failures before the fallback embedder takes over.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the circuit stays open before retrying the primary provider.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimensions: default_embedding_dim(),
            cache_max_entries: default_cache_entries(),
            cache_max_bytes: default_cache_bytes(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "local-tfidf".to_string()
}
fn default_embedding_dim() -> usize {
    DEFAULT_EMBEDDING_DIM
}
fn default_cache_entries() -> usize {
    2000
}
fn default_cache_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default)]
    pub prominence_weight: f64,
    #[serde(default = "default_dup_threshold")]
    pub duplicate_similarity_threshold: f64,
    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_keyword_weight(),
            semantic_weight: default_semantic_weight(),
            prominence_weight: 0.0,
            duplicate_similarity_threshold: default_dup_threshold(),
            default_search_limit: default_search_limit(),
        }
    }
}

fn default_keyword_weight() -> f64 {
    0.3
}
fn default_semantic_weight() -> f64 {
    0.7
}
fn default_dup_threshold() -> f64 {
    0.95
}
fn default_search_limit() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationsConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_max_relations_per_memory")]
    pub max_relations_per_memory: usize,
    #[serde(default = "default_activation_decay")]
    pub activation_decay: f64,
    #[serde(default)]
    pub activation_noise_sigma: f64,
    #[serde(default = "default_activation_threshold")]
    pub activation_threshold: f64,
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            max_relations_per_memory: default_max_relations_per_memory(),
            activation_decay: default_activation_decay(),
            activation_noise_sigma: 0.0,
            activation_threshold: default_activation_threshold(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_max_relations_per_memory() -> usize {
    5
}
fn default_activation_decay() -> f64 {
    0.5
}
fn default_activation_threshold() -> f64 {
    0.05
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GardenerConfig {
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    #[serde(default = "default_archive_utility_threshold")]
    pub archive_utility_threshold: f64,
    #[serde(default = "default_archive_min_age_days")]
    pub archive_min_age_days: u32,
    #[serde(default = "default_archive_max_per_run")]
    pub archive_max_per_run: usize,
    #[serde(default = "default_light_tick_secs")]
    pub light_tick_secs: u64,
    #[serde(default = "default_deep_tick_secs")]
    pub deep_tick_secs: u64,
}

impl Default for GardenerConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
            archive_utility_threshold: default_archive_utility_threshold(),
            archive_min_age_days: default_archive_min_age_days(),
            archive_max_per_run: default_archive_max_per_run(),
            light_tick_secs: default_light_tick_secs(),
            deep_tick_secs: default_deep_tick_secs(),
        }
    }
}

fn default_min_cluster_size() -> usize {
    2
}
fn default_archive_utility_threshold() -> f64 {
    0.1
}
fn default_archive_min_age_days() -> u32 {
    14
}
fn default_archive_max_per_run() -> usize {
    50
}
fn default_light_tick_secs() -> u64 {
    60
}
fn default_deep_tick_secs() -> u64 {
    // ~72 light ticks at the default light interval.
    4320
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_quiet_hours_start")]
    pub quiet_hours_start: u8,
    #[serde(default = "default_quiet_hours_end")]
    pub quiet_hours_end: u8,
    #[serde(default = "default_consolidate_interval_secs")]
    pub consolidate_interval_secs: u64,
    #[serde(default = "default_digest_hour")]
    pub morning_digest_hour: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            quiet_hours_start: default_quiet_hours_start(),
            quiet_hours_end: default_quiet_hours_end(),
            consolidate_interval_secs: default_consolidate_interval_secs(),
            morning_digest_hour: default_digest_hour(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_quiet_hours_start() -> u8 {
    22
}
fn default_quiet_hours_end() -> u8 {
    8
}
fn default_consolidate_interval_secs() -> u64 {
    600
}
fn default_digest_hour() -> u8 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_interval_secs: default_evaluation_interval_secs(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_evaluation_interval_secs() -> u64 {
    1800
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_weights() {
        let cfg = ReverieConfig::default();
        assert_eq!(cfg.memory.keyword_weight, 0.3);
        assert_eq!(cfg.memory.semantic_weight, 0.7);
        assert_eq!(cfg.relations.rrf_k, 60.0);
        assert_eq!(cfg.gardener.min_cluster_size, 2);
        assert_eq!(cfg.gardener.archive_utility_threshold, 0.1);
        assert_eq!(cfg.gardener.archive_min_age_days, 14);
        assert_eq!(cfg.gardener.archive_max_per_run, 50);
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let cfg = ReverieConfig::load(Some("/nonexistent/reverie.toml")).unwrap();
        assert_eq!(cfg.llm.model, "claude-sonnet-4-6");
    }
}
