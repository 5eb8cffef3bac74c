use serde::{Deserialize, Serialize};

use crate::cluster::ClusterWeights;
use crate::prompts::PromptRules;
use crate::ranker::RankOptions;
use crate::scoring::ScoreWeights;

/// Full schema of `skill-discovery.yaml`.
/// The global file and the project-local override are deep-merged before
/// deserialization, so every section falls back to its defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub scan: ScanConfig,
    pub patterns: PatternsConfig,
    pub scoring: ScoreWeights,
    pub ranking: RankingConfig,
    pub prompts: PromptRules,
    pub clustering: ClusteringConfig,
    pub embedding: EmbeddingConfig,
}

impl DiscoveryConfig {
    /// Default settings rendered as YAML, used as a starting template.
    pub fn defaults_yaml() -> String {
        serde_yaml::to_string(&Self::default()).unwrap_or_default()
    }

    pub fn rank_options(&self) -> RankOptions {
        RankOptions {
            max_candidates: self.ranking.max_candidates,
            dedup_threshold: self.ranking.dedup_threshold,
            max_evidence_sessions: self.patterns.max_evidence_sessions,
            min_occurrences: self.patterns.min_occurrences,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Transcript root; `~/.claude/projects` when unset
    pub projects_root: Option<String>,
    /// Scan state file; `<home>/scan-state.json` when unset
    pub state_path: Option<String>,
    pub max_concurrent_files: usize,
    /// Files consumed per run. The rest wait for the next run.
    pub max_files: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            projects_root: None,
            state_path: None,
            max_concurrent_files: 8,
            max_files: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    pub noise_min_projects: usize,
    pub noise_ratio: f64,
    pub max_evidence_sessions: usize,
    pub min_occurrences: usize,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            noise_min_projects: 15,
            noise_ratio: 0.8,
            max_evidence_sessions: 10,
            min_occurrences: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub max_candidates: usize,
    pub dedup_threshold: f64,
    /// Added to the built-in stopwords used for keyword overlap
    pub extra_stopwords: Vec<String>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            max_candidates: 20,
            dedup_threshold: 0.5,
            extra_stopwords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub enabled: bool,
    pub min_points: usize,
    /// Fixed radius; skips knee tuning when set
    pub epsilon: Option<f32>,
    /// Used when the corpus is too small to tune
    pub fallback_epsilon: f32,
    /// Most recent prompts kept for clustering
    pub max_prompts: usize,
    pub max_clusters: usize,
    pub weights: ClusterWeights,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_points: 3,
            epsilon: None,
            fallback_epsilon: 0.35,
            max_prompts: 2000,
            max_clusters: 10,
            weights: ClusterWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// SQLite cache; `<home>/embeddings.db` when unset
    pub cache_path: Option<String>,
    pub heuristic_dim: usize,
    /// External embedding command (program and args). Heuristic only when empty.
    pub command: Vec<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            heuristic_dim: 256,
            command: Vec::new(),
            model: "external".into(),
            timeout_secs: 60,
        }
    }
}
