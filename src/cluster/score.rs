use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{ClusterPrompt, PromptCluster};
use crate::dedup::{extract_keywords, max_similarity, ExistingSkill, SkillLike, StopwordSet};
use crate::embedding::EmbeddingMethod;
use crate::ranker::slugify;
use crate::scoring::recency_factor;
use crate::types::millis_to_rfc3339;

const NAME_KEYWORDS: usize = 3;
const NOVELTY_KEYWORDS: usize = 8;
const MAX_EXAMPLES: usize = 5;
const DESCRIPTION_QUOTE_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterWeights {
    pub cohesion: f64,
    pub size: f64,
    pub recency: f64,
    pub novelty: f64,
    /// Member count at which the size factor saturates
    pub size_ceiling: usize,
    pub half_life_days: f64,
}

impl Default for ClusterWeights {
    fn default() -> Self {
        Self {
            cohesion: 0.35,
            size: 0.25,
            recency: 0.20,
            novelty: 0.20,
            size_ceiling: 20,
            half_life_days: 14.0,
        }
    }
}

/// Weighted contribution of each factor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterBreakdown {
    pub cohesion: f64,
    pub size: f64,
    pub recency: f64,
    pub novelty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterScore {
    pub cluster_id: usize,
    pub name: String,
    pub description: String,
    pub score: f64,
    pub breakdown: ClusterBreakdown,
    /// Which embedding path produced the vectors behind this cluster
    pub method: EmbeddingMethod,
    pub member_count: usize,
    pub representative: String,
    pub examples: Vec<String>,
    pub keywords: Vec<String>,
    pub sessions: Vec<String>,
    pub projects: Vec<String>,
    #[serde(default)]
    pub first_seen: String,
    pub last_seen: String,
}

impl SkillLike for ClusterScore {
    fn skill_name(&self) -> &str {
        &self.name
    }

    fn skill_description(&self) -> &str {
        &self.description
    }
}

/// Keywords ranked by how many members use them (then alphabetically).
/// Only keywords shared by at least two members count once a cluster has
/// two or more members.
fn shared_keywords(
    cluster: &PromptCluster,
    prompts: &[ClusterPrompt],
    stopwords: &StopwordSet,
) -> Vec<String> {
    let mut doc_freq: HashMap<String, usize> = HashMap::new();
    for &i in &cluster.members {
        if let Some(prompt) = prompts.get(i) {
            for kw in extract_keywords(&prompt.text, stopwords) {
                *doc_freq.entry(kw).or_insert(0) += 1;
            }
        }
    }

    let floor = if cluster.members.len() >= 2 { 2 } else { 1 };
    let mut ranked: Vec<(String, usize)> =
        doc_freq.into_iter().filter(|(_, c)| *c >= floor).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().map(|(k, _)| k).collect()
}

/// Slug of the top shared keywords, or `prompt-cluster-<id>`.
pub fn generate_cluster_name(
    cluster: &PromptCluster,
    prompts: &[ClusterPrompt],
    stopwords: &StopwordSet,
) -> String {
    let top: Vec<String> = shared_keywords(cluster, prompts, stopwords)
        .into_iter()
        .take(NAME_KEYWORDS)
        .collect();
    let slug = slugify(&top.join(" "));
    if slug.is_empty() {
        format!("prompt-cluster-{}", cluster.id)
    } else {
        slug
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

/// One-line description quoting the representative prompt.
pub fn generate_cluster_description(cluster: &PromptCluster, prompts: &[ClusterPrompt]) -> String {
    let sessions: BTreeSet<&str> = cluster
        .members
        .iter()
        .filter_map(|&i| prompts.get(i))
        .map(|p| p.session_id.as_str())
        .collect();
    let quote = prompts
        .get(cluster.representative)
        .map(|p| truncate_chars(&p.text, DESCRIPTION_QUOTE_CHARS))
        .unwrap_or_default();
    format!(
        "Recurring request like \"{quote}\" ({} similar prompts across {} sessions)",
        cluster.members.len(),
        sessions.len()
    )
}

/// Four-factor cluster score: cohesion, saturating size, recency of the
/// newest member, and novelty against the skill catalog.
pub fn score_cluster(
    cluster: &PromptCluster,
    prompts: &[ClusterPrompt],
    existing: &[ExistingSkill],
    now_ms: i64,
    weights: &ClusterWeights,
    method: EmbeddingMethod,
    stopwords: &StopwordSet,
) -> ClusterScore {
    let members: Vec<&ClusterPrompt> = cluster
        .members
        .iter()
        .filter_map(|&i| prompts.get(i))
        .collect();

    let size = if weights.size_ceiling == 0 {
        1.0
    } else {
        members.len().min(weights.size_ceiling) as f64 / weights.size_ceiling as f64
    };

    let first_ts = members.iter().filter_map(|p| p.timestamp).min();
    let last_ts = members.iter().filter_map(|p| p.timestamp).max();
    let recency = last_ts
        .map(|ts| recency_factor(now_ms - ts, weights.half_life_days))
        .unwrap_or(0.0);

    let keywords = shared_keywords(cluster, prompts, stopwords);
    let novelty_text = keywords
        .iter()
        .take(NOVELTY_KEYWORDS)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    let novelty = 1.0 - max_similarity(&novelty_text, existing, stopwords);

    let breakdown = ClusterBreakdown {
        cohesion: weights.cohesion * cluster.cohesion.clamp(0.0, 1.0),
        size: weights.size * size,
        recency: weights.recency * recency,
        novelty: weights.novelty * novelty,
    };
    let score = breakdown.cohesion + breakdown.size + breakdown.recency + breakdown.novelty;

    let mut examples: Vec<String> = Vec::new();
    if let Some(rep) = prompts.get(cluster.representative) {
        examples.push(rep.text.clone());
    }
    for p in &members {
        if examples.len() >= MAX_EXAMPLES {
            break;
        }
        if !examples.contains(&p.text) {
            examples.push(p.text.clone());
        }
    }

    ClusterScore {
        cluster_id: cluster.id,
        name: generate_cluster_name(cluster, prompts, stopwords),
        description: generate_cluster_description(cluster, prompts),
        score,
        breakdown,
        method,
        member_count: members.len(),
        representative: prompts
            .get(cluster.representative)
            .map(|p| p.text.clone())
            .unwrap_or_default(),
        examples,
        keywords: keywords.into_iter().take(NOVELTY_KEYWORDS).collect(),
        sessions: members
            .iter()
            .map(|p| p.session_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        projects: members
            .iter()
            .map(|p| p.project_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        first_seen: first_ts.and_then(millis_to_rfc3339).unwrap_or_default(),
        last_seen: last_ts.and_then(millis_to_rfc3339).unwrap_or_default(),
    }
}
