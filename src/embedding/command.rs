use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::EmbeddingProvider;

#[derive(Deserialize)]
struct CommandResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding service behind an external command.
///
/// The command receives `{"model": ..., "input": [texts]}` on stdin and must
/// print `{"embeddings": [[...], ...]}` with one vector per input.
pub struct CommandEmbeddingProvider {
    program: String,
    args: Vec<String>,
    model: String,
    timeout: Duration,
}

impl CommandEmbeddingProvider {
    pub fn new(command: &[String], model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("embedding command is empty");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            model: model.into(),
            timeout,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for CommandEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let input = serde_json::to_vec(&serde_json::json!({
            "model": self.model,
            "input": texts,
        }))?;

        tracing::debug!("running embedding command {} for {} texts", self.program, texts.len());

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn embedding command: {}", self.program))?;

        // Feed stdin concurrently so a chatty child cannot block on a full stdout pipe
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let result = stdin.write_all(&input).await;
                drop(stdin);
                result
            })
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .context("embedding command timed out")??;

        if let Some(writer) = writer {
            writer.await?.context("failed to write embedding input")?;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "embedding command exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let response: CommandResponse = serde_json::from_slice(&output.stdout)
            .context("embedding command returned invalid JSON")?;
        if response.embeddings.len() != texts.len() {
            bail!(
                "embedding command returned {} vectors for {} inputs",
                response.embeddings.len(),
                texts.len()
            );
        }
        Ok(response.embeddings)
    }
}
