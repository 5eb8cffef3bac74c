use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::PatternAggregator;
use crate::analyzers::features::{FeatureCollector, SessionFeatures};
use crate::cluster::{
    build_clusters, score_cluster, tune_epsilon, ClusterPrompt, ClusterScore, Dbscan,
    DistanceMatrix,
};
use crate::config::{embedding_cache_path, projects_root, state_path, DiscoveryConfig, Env};
use crate::dedup::{deduplicate_against_existing, ExistingSkill, StopwordSet};
use crate::draft::{generate_cluster_draft, generate_skill_draft, DraftInput, SkillDraft};
use crate::embedding::{
    CommandEmbeddingProvider, EmbeddingCache, EmbeddingMethod, EmbeddingProvider,
    MemoryEmbeddingCache, PromptEmbedder, SqliteEmbeddingCache,
};
use crate::ranker::{rank_candidates, CorpusTotals, RankedCandidate};
use crate::scanner::{CorpusScanner, ScanOptions, ScanSummary};
use crate::state::{session_of_key, ScanStateStore};

/// How the prompt clusters of a run were produced.
#[derive(Debug, Clone, Serialize)]
pub struct ClusteringSummary {
    pub prompts: usize,
    pub method: EmbeddingMethod,
    pub epsilon: f32,
    /// Whether `epsilon` came from the k-distance knee
    pub tuned: bool,
    pub computed: usize,
    pub cached: usize,
    pub clusters_found: usize,
}

/// Everything one discovery run produced.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub generated_at: String,
    pub scan: ScanSummary,
    pub total_sessions: usize,
    pub total_projects: usize,
    pub patterns_aggregated: usize,
    pub noise_removed: Vec<String>,
    pub candidates: Vec<RankedCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clustering: Option<ClusteringSummary>,
    pub clusters: Vec<ClusterScore>,
    pub drafts: Vec<SkillDraft>,
}

/// Corpus-wide view rebuilt from stored per-session features.
struct Corpus {
    aggregator: PatternAggregator,
    session_timestamps: HashMap<String, i64>,
    total_sessions: usize,
    total_projects: usize,
    prompts: Vec<ClusterPrompt>,
}

/// scan → aggregate → noise filter → rank → embed → cluster → draft.
pub struct DiscoveryPipeline {
    config: DiscoveryConfig,
    projects_root: PathBuf,
    state_path: PathBuf,
    embedder: PromptEmbedder,
    catalog: Vec<ExistingSkill>,
    now_ms: Option<i64>,
}

impl DiscoveryPipeline {
    pub fn new(
        config: DiscoveryConfig,
        projects_root: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        embedder: PromptEmbedder,
    ) -> Self {
        Self {
            config,
            projects_root: projects_root.into(),
            state_path: state_path.into(),
            embedder,
            catalog: Vec::new(),
            now_ms: None,
        }
    }

    /// Resolve paths, the embedding cache and the optional embedding
    /// command from configuration.
    pub fn from_config(env: &dyn Env, config: DiscoveryConfig) -> Self {
        let root = projects_root(env, &config);
        let state = state_path(env, &config);
        let cache_path = embedding_cache_path(env, &config);

        let cache: Arc<dyn EmbeddingCache> = match SqliteEmbeddingCache::open(&cache_path) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!("embedding cache unavailable, using memory cache: {e:#}");
                Arc::new(MemoryEmbeddingCache::new())
            }
        };

        let provider: Option<Arc<dyn EmbeddingProvider>> = if config.embedding.command.is_empty() {
            None
        } else {
            match CommandEmbeddingProvider::new(
                &config.embedding.command,
                config.embedding.model.clone(),
                Duration::from_secs(config.embedding.timeout_secs),
            ) {
                Ok(provider) => Some(Arc::new(provider)),
                Err(e) => {
                    warn!("ignoring embedding command: {e:#}");
                    None
                }
            }
        };

        let embedder = PromptEmbedder::new(provider, cache, config.embedding.heuristic_dim);
        Self::new(config, root, state, embedder)
    }

    pub fn with_catalog(mut self, catalog: Vec<ExistingSkill>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Pin the clock used for recency scoring.
    pub fn with_now(mut self, now_ms: i64) -> Self {
        self.now_ms = Some(now_ms);
        self
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub async fn run(&self) -> Result<DiscoveryReport> {
        let now_ms = self.now_ms.unwrap_or_else(|| Utc::now().timestamp_millis());

        let mut store = ScanStateStore::open_or_reset(&self.state_path);
        let collector = Arc::new(FeatureCollector::seeded(
            self.config.prompts.clone(),
            &store,
        ));
        let scanner = CorpusScanner::new(
            &self.projects_root,
            ScanOptions {
                max_concurrent_files: self.config.scan.max_concurrent_files,
                max_files: self.config.scan.max_files,
            },
        );
        let scan = scanner.scan(&mut store, collector).await?;

        let mut corpus = build_corpus(store.all_features());
        let patterns_aggregated = corpus.aggregator.len();
        let noise_removed = corpus.aggregator.filter_noise(
            corpus.total_projects,
            self.config.patterns.noise_min_projects,
            self.config.patterns.noise_ratio,
        );
        info!(
            sessions = corpus.total_sessions,
            projects = corpus.total_projects,
            patterns = patterns_aggregated,
            noise = noise_removed.len(),
            "aggregated corpus patterns"
        );

        let stopwords = StopwordSet::new(&self.config.ranking.extra_stopwords);
        let totals = CorpusTotals {
            total_projects: corpus.total_projects,
            total_sessions: corpus.total_sessions,
            session_timestamps: &corpus.session_timestamps,
            now_ms,
        };
        let catalog = (!self.catalog.is_empty()).then_some(self.catalog.as_slice());
        let candidates = rank_candidates(
            &corpus.aggregator.snapshot(),
            &totals,
            &self.config.scoring,
            catalog,
            &self.config.rank_options(),
            &stopwords,
        );

        let (clustering, clusters) = if self.config.clustering.enabled {
            let prompts = std::mem::take(&mut corpus.prompts);
            self.cluster_prompts(prompts, now_ms, &stopwords).await
        } else {
            (None, Vec::new())
        };

        let drafts: Vec<SkillDraft> = candidates
            .iter()
            .map(|c| generate_skill_draft(DraftInput::Pattern(c)))
            .chain(clusters.iter().map(generate_cluster_draft))
            .collect();

        info!(
            candidates = candidates.len(),
            clusters = clusters.len(),
            drafts = drafts.len(),
            "discovery finished"
        );

        Ok(DiscoveryReport {
            generated_at: Utc::now().to_rfc3339(),
            scan,
            total_sessions: corpus.total_sessions,
            total_projects: corpus.total_projects,
            patterns_aggregated,
            noise_removed,
            candidates,
            clustering,
            clusters,
            drafts,
        })
    }

    async fn cluster_prompts(
        &self,
        mut prompts: Vec<ClusterPrompt>,
        now_ms: i64,
        stopwords: &StopwordSet,
    ) -> (Option<ClusteringSummary>, Vec<ClusterScore>) {
        let cfg = &self.config.clustering;
        prompts.truncate(cfg.max_prompts);
        if prompts.len() < cfg.min_points.max(2) {
            debug!("{} prompts, too few to cluster", prompts.len());
            return (None, Vec::new());
        }

        let texts: Vec<String> = prompts.iter().map(|p| p.text.clone()).collect();
        let embedded = self.embedder.embed_prompts(&texts).await;
        let method = embedded.method;

        let min_points = cfg.min_points;
        let fixed = cfg.epsilon;
        let fallback = cfg.fallback_epsilon;
        let vectors = embedded.vectors;
        let fitted = tokio::task::spawn_blocking(move || {
            let matrix = DistanceMatrix::build(&vectors);
            let tuned = fixed.is_none().then(|| tune_epsilon(&matrix, min_points)).flatten();
            let epsilon = fixed.or(tuned).unwrap_or(fallback);
            let labels = Dbscan::new(epsilon, min_points).fit(&matrix);
            (build_clusters(&labels, &matrix), epsilon, tuned.is_some())
        })
        .await;

        let (clusters, epsilon, tuned) = match fitted {
            Ok(fitted) => fitted,
            Err(e) => {
                warn!("prompt clustering failed: {e}");
                return (None, Vec::new());
            }
        };
        info!(
            prompts = prompts.len(),
            clusters = clusters.len(),
            epsilon,
            method = ?method,
            "clustered prompts"
        );

        let mut scored: Vec<ClusterScore> = clusters
            .iter()
            .map(|cluster| {
                score_cluster(
                    cluster,
                    &prompts,
                    &self.catalog,
                    now_ms,
                    &cfg.weights,
                    method,
                    stopwords,
                )
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cluster_id.cmp(&b.cluster_id))
        });
        let mut scored = deduplicate_against_existing(
            scored,
            &self.catalog,
            self.config.ranking.dedup_threshold,
            stopwords,
        );
        scored.truncate(cfg.max_clusters);

        let summary = ClusteringSummary {
            prompts: prompts.len(),
            method,
            epsilon,
            tuned,
            computed: embedded.computed,
            cached: embedded.cached,
            clusters_found: clusters.len(),
        };
        (Some(summary), scored)
    }
}

/// Rebuild corpus aggregates from every session's stored features.
fn build_corpus<'a>(features: impl Iterator<Item = (&'a String, &'a SessionFeatures)>) -> Corpus {
    let mut aggregator = PatternAggregator::new();
    let mut session_timestamps = HashMap::new();
    let mut projects = BTreeSet::new();
    let mut prompts = Vec::new();
    let mut total_sessions = 0;

    for (key, f) in features {
        let session_id = session_of_key(key).to_string();
        total_sessions += 1;
        projects.insert(f.project_id.clone());
        if let Some(ts) = f.last_ts {
            session_timestamps.insert(session_id.clone(), ts);
        }
        aggregator.add_session_patterns(&session_id, &f.project_id, &f.bigrams, &f.trigrams, &f.bash);
        prompts.extend(f.prompts.iter().map(|p| ClusterPrompt {
            text: p.text.clone(),
            session_id: session_id.clone(),
            project_id: f.project_id.clone(),
            timestamp: p.timestamp,
        }));
    }

    // Newest first with a stable tiebreak, so truncation and DBSCAN input
    // order do not depend on map iteration order
    prompts.sort_by(|a, b| {
        match (a.timestamp, b.timestamp) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.session_id.cmp(&b.session_id))
        .then_with(|| a.text.cmp(&b.text))
    });

    Corpus {
        aggregator,
        session_timestamps,
        total_sessions,
        total_projects: projects.len(),
        prompts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::CollectedPrompt;
    use std::collections::BTreeMap;

    fn features(project: &str, last_ts: Option<i64>, prompts: &[(&str, Option<i64>)]) -> SessionFeatures {
        SessionFeatures {
            project_id: project.into(),
            last_ts,
            bigrams: BTreeMap::from([("Read->Edit".to_string(), 1)]),
            prompts: prompts
                .iter()
                .map(|(t, ts)| CollectedPrompt {
                    text: t.to_string(),
                    timestamp: *ts,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn corpus_counts_sessions_and_projects() {
        let stored = vec![
            ("p1/s1".to_string(), features("p1", Some(10), &[])),
            ("p1/s2".to_string(), features("p1", None, &[])),
            ("p2/s3".to_string(), features("p2", Some(30), &[])),
        ];
        let corpus = build_corpus(stored.iter().map(|(k, v)| (k, v)));
        assert_eq!(corpus.total_sessions, 3);
        assert_eq!(corpus.total_projects, 2);
        assert_eq!(corpus.session_timestamps.len(), 2);
        let occ = corpus.aggregator.get("bigram:Read->Edit").unwrap();
        assert_eq!(occ.total_count(), 3);
        assert_eq!(occ.project_count(), 2);
        assert!(occ.sessions().contains("s3"));
        assert!(corpus.session_timestamps.contains_key("s1"));
    }

    #[test]
    fn prompts_sorted_newest_first_untimed_last() {
        let stored = vec![
            ("b".to_string(), features("p", None, &[("old one", Some(1)), ("untimed", None)])),
            ("a".to_string(), features("p", None, &[("new one", Some(5))])),
        ];
        let corpus = build_corpus(stored.iter().map(|(k, v)| (k, v)));
        let texts: Vec<&str> = corpus.prompts.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["new one", "old one", "untimed"]);
    }
}
