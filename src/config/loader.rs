use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::models::DiscoveryConfig;
use super::Env;

const GLOBAL_CONFIG_FILENAME: &str = "skill-discovery.yaml";
const PROJECT_CONFIG_FILENAME: &str = ".skill-discovery.yaml";

/// Deep-merge `~/.claude/skill-discovery.yaml` with the project's
/// `.skill-discovery.yaml`. Missing or invalid files are ignored.
pub fn load_merged(env: &dyn Env, project_dir: Option<&Path>) -> DiscoveryConfig {
    let global = load_raw_yaml(&global_config_path(env));
    let project = project_dir.and_then(|dir| load_raw_yaml(&dir.join(PROJECT_CONFIG_FILENAME)));

    let merged = match (global, project) {
        (Some(g), Some(p)) => deep_merge(g, p),
        (Some(g), None) => g,
        (None, Some(p)) => p,
        (None, None) => return DiscoveryConfig::default(),
    };

    // serde(default) fills whatever neither file specified
    serde_json::from_value(merged).unwrap_or_default()
}

/// Load one explicitly named file on top of the defaults. Unlike
/// `load_merged`, a bad file is an error here.
pub fn load_file(path: &Path) -> Result<DiscoveryConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: DiscoveryConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

/// YAML file as a raw value, so absent keys never override the base.
fn load_raw_yaml(path: &Path) -> Option<serde_json::Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&content).ok()
}

/// Values present in `over` replace those in `base`; objects merge per key.
fn deep_merge(base: serde_json::Value, over: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match (base, over) {
        (Value::Object(mut b), Value::Object(o)) => {
            for (key, over_val) in o {
                let base_val = b.remove(&key).unwrap_or(Value::Null);
                b.insert(key, deep_merge(base_val, over_val));
            }
            Value::Object(b)
        }
        (base, Value::Null) => base,
        (_, over) => over,
    }
}

pub fn global_config_path(env: &dyn Env) -> PathBuf {
    let home = env.var("HOME").unwrap_or_else(|_| ".".into());
    Path::new(&home).join(".claude").join(GLOBAL_CONFIG_FILENAME)
}

/// Write the default template to the global config path.
pub fn init_global(env: &dyn Env) -> Result<PathBuf> {
    let path = global_config_path(env);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, DiscoveryConfig::defaults_yaml())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
