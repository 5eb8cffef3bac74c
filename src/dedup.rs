use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Words that never count as keywords.
const BUILTIN_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "onto", "then", "than", "when",
    "what", "which", "while", "where", "are", "was", "were", "been", "being", "have", "has",
    "had", "does", "did", "doing", "not", "but", "all", "any", "each", "few", "more", "most",
    "other", "some", "such", "only", "own", "same", "too", "very", "can", "will", "just",
    "should", "now", "you", "your", "our", "its", "they", "them", "their", "there", "here",
    "also", "use", "used", "using", "via", "per", "about", "over", "after", "before", "please",
    "run", "runs", "skill", "workflow", "pattern",
];

/// An already-installed skill, read from the external catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingSkill {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Anything that can be compared against the skill catalog.
pub trait SkillLike {
    fn skill_name(&self) -> &str;
    fn skill_description(&self) -> &str;
}

impl SkillLike for ExistingSkill {
    fn skill_name(&self) -> &str {
        &self.name
    }

    fn skill_description(&self) -> &str {
        &self.description
    }
}

/// Built-in stopwords plus configured extras.
#[derive(Debug, Clone)]
pub struct StopwordSet {
    words: HashSet<String>,
}

impl Default for StopwordSet {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl StopwordSet {
    pub fn new(extra_words: &[String]) -> Self {
        let mut words: HashSet<String> = BUILTIN_STOPWORDS.iter().map(|s| s.to_string()).collect();
        words.extend(extra_words.iter().map(|w| w.to_lowercase()));
        Self { words }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }
}

/// Lowercase alphanumeric words of three or more characters, minus stopwords.
pub fn extract_keywords(text: &str, stopwords: &StopwordSet) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !stopwords.contains(w))
        .map(str::to_string)
        .collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Highest description similarity between `text` and any catalog entry.
pub fn max_similarity(text: &str, existing: &[ExistingSkill], stopwords: &StopwordSet) -> f64 {
    let keywords = extract_keywords(text, stopwords);
    existing
        .iter()
        .map(|skill| jaccard(&keywords, &extract_keywords(&skill.description, stopwords)))
        .fold(0.0, f64::max)
}

fn matches_existing<T: SkillLike>(
    candidate: &T,
    existing: &[(String, HashSet<String>)],
    threshold: f64,
    stopwords: &StopwordSet,
) -> bool {
    let name = candidate.skill_name().to_lowercase();
    let keywords = extract_keywords(candidate.skill_description(), stopwords);
    existing.iter().any(|(existing_name, existing_keywords)| {
        *existing_name == name || jaccard(&keywords, existing_keywords) >= threshold
    })
}

/// Remove candidates that duplicate an existing skill by name
/// (case-insensitive) or by description keyword overlap.
///
/// If every candidate would be removed, the input is returned unchanged.
pub fn deduplicate_against_existing<T: SkillLike>(
    candidates: Vec<T>,
    existing: &[ExistingSkill],
    threshold: f64,
    stopwords: &StopwordSet,
) -> Vec<T> {
    if candidates.is_empty() || existing.is_empty() {
        return candidates;
    }

    let catalog: Vec<(String, HashSet<String>)> = existing
        .iter()
        .map(|s| (s.name.to_lowercase(), extract_keywords(&s.description, stopwords)))
        .collect();

    let keep: Vec<bool> = candidates
        .iter()
        .map(|c| !matches_existing(c, &catalog, threshold, stopwords))
        .collect();

    if !keep.iter().any(|k| *k) {
        tracing::debug!(
            "every candidate matched the skill catalog; keeping all {}",
            candidates.len()
        );
        return candidates;
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect()
}
