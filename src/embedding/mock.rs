use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::EmbeddingProvider;

/// Test provider: embeds each text by looking up a fixed vector, falling
/// back to a one-hot on the text length. Records every batch it receives.
pub struct MockEmbeddingProvider {
    pub model: String,
    pub vectors: Vec<(String, Vec<f32>)>,
    pub dim: usize,
    pub fail: bool,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self {
            model: "mock-model".to_string(),
            vectors: Vec::new(),
            dim: 4,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.push((text.to_string(), vector));
        self
    }

    /// Total texts embedded across all calls.
    pub fn embedded_count(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(texts.to_vec());
        }
        if self.fail {
            bail!("mock embedding service unavailable");
        }
        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .iter()
                    .find(|(text, _)| text == t)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| {
                        let mut v = vec![0.0; self.dim.max(1)];
                        v[t.len() % self.dim.max(1)] = 1.0;
                        v
                    })
            })
            .collect())
    }
}
