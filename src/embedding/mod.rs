pub mod cache;
pub mod command;
pub mod heuristic;
pub mod mock;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cache::{EmbeddingCache, MemoryEmbeddingCache, SqliteEmbeddingCache};
pub use command::CommandEmbeddingProvider;
pub use heuristic::HeuristicEmbedder;

use crate::prompts::content_hash;

/// Black-box text → vector service.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifies the vector space; cached vectors are keyed by it.
    fn model_id(&self) -> &str;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Which embedding path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMethod {
    Model,
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct EmbeddedPrompts {
    /// Parallel to the input texts
    pub vectors: Vec<Vec<f32>>,
    pub method: EmbeddingMethod,
    /// Distinct prompts computed in this call
    pub computed: usize,
    /// Distinct prompts served from the cache
    pub cached: usize,
}

/// Embeds prompts through the cache, at most once per distinct normalized
/// text and model, falling back to the heuristic embedder when the model
/// provider is missing or fails.
pub struct PromptEmbedder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    fallback: HeuristicEmbedder,
    cache: Arc<dyn EmbeddingCache>,
}

impl PromptEmbedder {
    pub fn new(
        provider: Option<Arc<dyn EmbeddingProvider>>,
        cache: Arc<dyn EmbeddingCache>,
        heuristic_dim: usize,
    ) -> Self {
        Self {
            provider,
            fallback: HeuristicEmbedder::new(heuristic_dim),
            cache,
        }
    }

    pub async fn embed_prompts(&self, texts: &[String]) -> EmbeddedPrompts {
        if let Some(provider) = &self.provider {
            match embed_cached(provider.as_ref(), self.cache.as_ref(), texts).await {
                Ok((vectors, computed, cached)) => {
                    return EmbeddedPrompts {
                        vectors,
                        method: EmbeddingMethod::Model,
                        computed,
                        cached,
                    }
                }
                Err(e) => {
                    tracing::warn!("embedding provider failed, using heuristic vectors: {e:#}");
                }
            }
        }

        match embed_cached(&self.fallback, self.cache.as_ref(), texts).await {
            Ok((vectors, computed, cached)) => EmbeddedPrompts {
                vectors,
                method: EmbeddingMethod::Heuristic,
                computed,
                cached,
            },
            Err(e) => {
                // Cache trouble only; the heuristic itself cannot fail
                tracing::warn!("embedding cache unavailable: {e:#}");
                EmbeddedPrompts {
                    vectors: texts.iter().map(|t| self.fallback.embed_one(t)).collect(),
                    method: EmbeddingMethod::Heuristic,
                    computed: texts.len(),
                    cached: 0,
                }
            }
        }
    }
}

/// Resolve every text through the cache, embedding only distinct misses.
async fn embed_cached(
    provider: &dyn EmbeddingProvider,
    cache: &dyn EmbeddingCache,
    texts: &[String],
) -> Result<(Vec<Vec<f32>>, usize, usize)> {
    let model = provider.model_id().to_string();
    let hashes: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();

    let mut resolved: HashMap<String, Vec<f32>> = HashMap::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut missing_hashes = Vec::new();
    let mut missing_texts = Vec::new();

    for (hash, text) in hashes.iter().zip(texts) {
        if !seen.insert(hash.as_str()) {
            continue;
        }
        match cache.get(hash, &model)? {
            Some(vector) => {
                resolved.insert(hash.clone(), vector);
            }
            None => {
                missing_hashes.push(hash.clone());
                missing_texts.push(text.clone());
            }
        }
    }
    let cached = resolved.len();

    if !missing_texts.is_empty() {
        let vectors = provider.embed(&missing_texts).await?;
        if vectors.len() != missing_texts.len() {
            bail!(
                "provider returned {} vectors for {} prompts",
                vectors.len(),
                missing_texts.len()
            );
        }
        for (hash, vector) in missing_hashes.iter().zip(vectors) {
            if let Err(e) = cache.put(hash, &model, &vector) {
                tracing::warn!("failed to cache embedding {hash}: {e:#}");
            }
            resolved.insert(hash.clone(), vector);
        }
    }

    let vectors = hashes
        .iter()
        .map(|h| resolved.get(h).cloned().unwrap_or_default())
        .collect();
    Ok((vectors, missing_texts.len(), cached))
}

#[cfg(test)]
mod tests {
    use super::mock::MockEmbeddingProvider;
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn each_distinct_prompt_embedded_once() {
        let provider = Arc::new(MockEmbeddingProvider::new());
        let cache = Arc::new(MemoryEmbeddingCache::new());
        let embedder = PromptEmbedder::new(Some(provider.clone() as Arc<dyn EmbeddingProvider>), cache.clone(), 32);

        let input = texts(&["fix the login bug", "Fix the  login bug", "add a cache layer"]);
        let first = embedder.embed_prompts(&input).await;
        assert_eq!(first.method, EmbeddingMethod::Model);
        assert_eq!(first.vectors.len(), 3);
        assert_eq!(first.vectors[0], first.vectors[1]);
        assert_eq!(first.computed, 2);
        assert_eq!(provider.embedded_count(), 2);

        let second = embedder.embed_prompts(&input).await;
        assert_eq!(second.computed, 0);
        assert_eq!(second.cached, 2);
        assert_eq!(provider.embedded_count(), 2);
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_heuristic() {
        let provider = Arc::new(MockEmbeddingProvider::failing());
        let cache = Arc::new(MemoryEmbeddingCache::new());
        let embedder = PromptEmbedder::new(Some(provider as Arc<dyn EmbeddingProvider>), cache, 32);

        let out = embedder.embed_prompts(&texts(&["write the release notes"])).await;
        assert_eq!(out.method, EmbeddingMethod::Heuristic);
        assert_eq!(out.vectors[0].len(), 32);
    }

    #[tokio::test]
    async fn no_provider_means_heuristic() {
        let embedder = PromptEmbedder::new(None, Arc::new(MemoryEmbeddingCache::new()), 16);
        let out = embedder.embed_prompts(&texts(&["a", "b"])).await;
        assert_eq!(out.method, EmbeddingMethod::Heuristic);
        assert_eq!(out.vectors.len(), 2);
    }

    #[tokio::test]
    async fn outage_does_not_evict_model_vectors() {
        let cache = Arc::new(MemoryEmbeddingCache::new());
        let model = Arc::new(MockEmbeddingProvider::new());
        let healthy = || {
            PromptEmbedder::new(Some(model.clone() as Arc<dyn EmbeddingProvider>), cache.clone(), 16)
        };

        let first = healthy()
            .embed_prompts(&texts(&["fix the login bug", "add a cache layer"]))
            .await;
        assert_eq!(first.computed, 2);

        let down = Arc::new(MockEmbeddingProvider::failing());
        let outage = PromptEmbedder::new(Some(down as Arc<dyn EmbeddingProvider>), cache.clone(), 16)
            .embed_prompts(&texts(&["fix the login bug", "add a cache layer", "bump the version"]))
            .await;
        assert_eq!(outage.method, EmbeddingMethod::Heuristic);

        let third = healthy()
            .embed_prompts(&texts(&["fix the login bug", "add a cache layer", "bump the version"]))
            .await;
        assert_eq!(third.method, EmbeddingMethod::Model);
        assert_eq!(third.computed, 1);
        assert_eq!(third.cached, 2);
        assert_eq!(model.embedded_count(), 3);
    }

    #[tokio::test]
    async fn model_change_recomputes() {
        let cache = Arc::new(MemoryEmbeddingCache::new());
        let a = Arc::new(MockEmbeddingProvider::new());
        PromptEmbedder::new(Some(a as Arc<dyn EmbeddingProvider>), cache.clone(), 16)
            .embed_prompts(&texts(&["same prompt text"]))
            .await;

        let b = Arc::new(MockEmbeddingProvider {
            model: "other-model".into(),
            ..Default::default()
        });
        let out = PromptEmbedder::new(Some(b.clone() as Arc<dyn EmbeddingProvider>), cache, 16)
            .embed_prompts(&texts(&["same prompt text"]))
            .await;
        assert_eq!(out.computed, 1);
        assert_eq!(b.embedded_count(), 1);
    }
}
