use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::dedup::ExistingSkill;

const SKILL_FILENAME: &str = "SKILL.md";

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    name: String,
    #[serde(default)]
    description: String,
}

/// Load the existing-skill catalog from either a YAML/JSON list of
/// `{name, description}` entries or a directory of `<skill>/SKILL.md` files.
///
/// Results are sorted by name; the first entry wins on duplicate names.
pub fn load_catalog(path: &Path) -> Result<Vec<ExistingSkill>> {
    let mut skills = if path.is_dir() {
        load_skill_dir(path)?
    } else {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read skill catalog {}", path.display()))?;
        // YAML is a superset of JSON, so one parser covers both
        serde_yaml::from_str::<Vec<ExistingSkill>>(&content)
            .with_context(|| format!("invalid skill catalog {}", path.display()))?
    };
    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills.dedup_by(|a, b| a.name == b.name);
    debug!("loaded {} existing skills from {}", skills.len(), path.display());
    Ok(skills)
}

fn load_skill_dir(dir: &Path) -> Result<Vec<ExistingSkill>> {
    let mut skills = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let skill_md = entry.path().join(SKILL_FILENAME);
        if !skill_md.is_file() {
            continue;
        }
        let parsed = std::fs::read_to_string(&skill_md)
            .map_err(anyhow::Error::from)
            .and_then(|content| parse_skill_md(&content));
        match parsed {
            Ok(skill) => skills.push(skill),
            Err(e) => warn!("skipping {}: {e:#}", skill_md.display()),
        }
    }
    Ok(skills)
}

/// Name and description from the `---` delimited frontmatter of a SKILL.md.
pub fn parse_skill_md(content: &str) -> Result<ExistingSkill> {
    let content = content.trim_start();
    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| anyhow!("SKILL.md must start with YAML frontmatter"))?;
    let end = rest
        .find("\n---")
        .ok_or_else(|| anyhow!("SKILL.md frontmatter not closed"))?;
    let fm: SkillFrontmatter =
        serde_yaml::from_str(rest[..end].trim()).context("invalid SKILL.md frontmatter")?;
    Ok(ExistingSkill {
        name: fm.name,
        description: fm.description,
    })
}
