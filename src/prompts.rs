use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::parsers::{is_system_meta_message, strip_system_reminders};
use crate::types::{parse_timestamp_millis, UserPrompt};

/// Acknowledgements that carry no intent on their own.
const ACK_WORDS: &[&str] = &[
    "ok", "okay", "yes", "y", "no", "n", "sure", "thanks", "thank", "you", "continue", "go",
    "ahead", "please", "proceed", "next", "done", "lgtm", "k",
];

/// Which user prompts are kept for clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptRules {
    /// Minimum characters after cleanup
    pub min_chars: usize,
    /// Per-session cap on collected prompts
    pub max_per_session: usize,
}

impl Default for PromptRules {
    fn default() -> Self {
        Self {
            min_chars: 20,
            max_per_session: 200,
        }
    }
}

/// A substantive prompt kept for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedPrompt {
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Strip injected reminders and collapse whitespace, keeping case.
pub fn clean_prompt(text: &str) -> String {
    strip_system_reminders(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cache key form of a prompt: cleaned and lowercased.
pub fn normalize_prompt(text: &str) -> String {
    clean_prompt(text).to_lowercase()
}

/// Hex SHA-256 of the normalized prompt.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_prompt(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn is_substantive_prompt(text: &str, min_chars: usize) -> bool {
    if is_system_meta_message(text) {
        return false;
    }

    let cleaned = clean_prompt(text);
    if cleaned.chars().count() < min_chars {
        return false;
    }
    // slash commands
    if cleaned.starts_with('/') && !cleaned.contains(' ') {
        return false;
    }

    let lower = cleaned.to_lowercase();
    !lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .all(|w| ACK_WORDS.contains(&w))
}

/// Keep a prompt if it passes the substantive filter.
pub fn collect_prompt(prompt: &UserPrompt, rules: &PromptRules) -> Option<CollectedPrompt> {
    if !is_substantive_prompt(&prompt.text, rules.min_chars) {
        return None;
    }
    Some(CollectedPrompt {
        text: clean_prompt(&prompt.text),
        timestamp: prompt.timestamp.as_deref().and_then(parse_timestamp_millis),
    })
}
