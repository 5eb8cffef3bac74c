#![allow(dead_code)]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use assert_cmd::Command;
use serde_json::json;
use skill_discovery::config::DiscoveryConfig;
use skill_discovery::embedding::{MemoryEmbeddingCache, PromptEmbedder};
use skill_discovery::DiscoveryPipeline;
use tempfile::TempDir;

/// Fixed clock for recency scoring: 2026-01-10T00:00:00Z.
pub const NOW_MS: i64 = 1_768_003_200_000;

/// A scratch `~/.claude/projects` layout built in code.
pub struct Corpus {
    pub dir: TempDir,
}

impl Corpus {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("projects")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("projects")
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join("state").join("scan-state.json")
    }

    pub fn session_path(&self, project: &str, session: &str) -> PathBuf {
        self.root().join(project).join(format!("{session}.jsonl"))
    }

    /// Create or overwrite a session file.
    pub fn write_session(&self, project: &str, session: &str, lines: &[String]) -> PathBuf {
        let path = self.session_path(project, session);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, join_lines(lines)).unwrap();
        path
    }

    /// Append complete lines to a session file.
    pub fn append_session(&self, project: &str, session: &str, lines: &[String]) {
        let path = self.session_path(project, session);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(join_lines(lines).as_bytes()).unwrap();
    }
}

fn join_lines(lines: &[String]) -> String {
    lines.iter().map(|l| format!("{l}\n")).collect()
}

pub fn ts(day: u32, minute: u32) -> String {
    format!("2026-01-{day:02}T10:{minute:02}:00Z")
}

pub fn user_line(session: &str, timestamp: &str, text: &str) -> String {
    json!({
        "type": "user",
        "sessionId": session,
        "timestamp": timestamp,
        "cwd": "/work",
        "message": {"role": "user", "content": text},
    })
    .to_string()
}

/// Assistant turn calling each tool in order. `Bash` calls run `bash_command`.
pub fn tool_line(timestamp: &str, tools: &[&str], bash_command: &str) -> String {
    let content: Vec<serde_json::Value> = tools
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let input = if *name == "Bash" {
                json!({"command": bash_command})
            } else {
                json!({"file_path": format!("/work/file{i}.rs")})
            };
            json!({"type": "tool_use", "id": format!("toolu_{i}"), "name": name, "input": input})
        })
        .collect();
    json!({
        "type": "assistant",
        "timestamp": timestamp,
        "message": {"role": "assistant", "content": content},
    })
    .to_string()
}

pub fn noise_line(kind: &str) -> String {
    json!({"type": kind, "data": {"n": 1}}).to_string()
}

/// Pipeline over the corpus with heuristic embeddings and an in-memory cache.
pub fn pipeline(corpus: &Corpus, config: DiscoveryConfig) -> DiscoveryPipeline {
    pipeline_at(corpus, corpus.state_path(), config)
}

pub fn pipeline_at(corpus: &Corpus, state: PathBuf, config: DiscoveryConfig) -> DiscoveryPipeline {
    let embedder = PromptEmbedder::new(None, Arc::new(MemoryEmbeddingCache::new()), 64);
    DiscoveryPipeline::new(config, corpus.root(), state, embedder).with_now(NOW_MS)
}

pub fn config_without_clustering() -> DiscoveryConfig {
    let mut config = DiscoveryConfig::default();
    config.clustering.enabled = false;
    config
}

/// CLI with HOME and the data directory pointed into the corpus tempdir.
#[allow(deprecated)]
pub fn cli(corpus: &Corpus) -> Command {
    let mut cmd = Command::cargo_bin("skill-discovery").unwrap();
    cmd.env("HOME", corpus.dir.path())
        .env("SKILL_DISCOVERY_HOME", corpus.dir.path().join("data"))
        .current_dir(corpus.dir.path());
    cmd
}
