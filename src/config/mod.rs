pub mod loader;
pub mod models;

use std::path::PathBuf;

pub use loader::{global_config_path, init_global, load_file, load_merged};
pub use models::{
    ClusteringConfig, DiscoveryConfig, EmbeddingConfig, PatternsConfig, RankingConfig, ScanConfig,
};

/// Environment lookups, swappable in tests.
pub trait Env: Send + Sync {
    fn var(&self, key: &str) -> Result<String, std::env::VarError>;
}

pub struct RealEnv;

impl Env for RealEnv {
    fn var(&self, key: &str) -> Result<String, std::env::VarError> {
        std::env::var(key)
    }
}

fn home_dir(env: &dyn Env) -> PathBuf {
    PathBuf::from(env.var("HOME").unwrap_or_else(|_| ".".into()))
}

/// Data directory: `SKILL_DISCOVERY_HOME`, else `~/.claude/skill-discovery`.
pub fn discovery_home(env: &dyn Env) -> PathBuf {
    match env.var("SKILL_DISCOVERY_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => home_dir(env).join(".claude").join("skill-discovery"),
    }
}

/// Where transcripts live: `~/.claude/projects` unless configured.
pub fn projects_root(env: &dyn Env, config: &DiscoveryConfig) -> PathBuf {
    match &config.scan.projects_root {
        Some(root) => PathBuf::from(root),
        None => home_dir(env).join(".claude").join("projects"),
    }
}

pub fn state_path(env: &dyn Env, config: &DiscoveryConfig) -> PathBuf {
    match &config.scan.state_path {
        Some(path) => PathBuf::from(path),
        None => discovery_home(env).join("scan-state.json"),
    }
}

pub fn embedding_cache_path(env: &dyn Env, config: &DiscoveryConfig) -> PathBuf {
    match &config.embedding.cache_path {
        Some(path) => PathBuf::from(path),
        None => discovery_home(env).join("embeddings.db"),
    }
}
