use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::{pattern_shape, PatternKind, PatternOccurrence, PatternShape};
use crate::dedup::{deduplicate_against_existing, ExistingSkill, SkillLike, StopwordSet};
use crate::scoring::{score_pattern, ScoreBreakdown, ScoreWeights};
use crate::types::millis_to_rfc3339;

/// Read-only evidence for one pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEvidence {
    pub key: String,
    pub kind: PatternKind,
    /// Alphabetical
    pub projects: Vec<String>,
    /// Newest first, capped
    pub sessions: Vec<String>,
    pub total_count: usize,
    pub session_count: usize,
    pub project_count: usize,
    pub examples: Vec<String>,
    /// RFC 3339, or empty when no contributing session has a timestamp
    pub first_seen: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub name: String,
    pub label: String,
    pub description: String,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub evidence: PatternEvidence,
}

impl SkillLike for RankedCandidate {
    fn skill_name(&self) -> &str {
        &self.name
    }

    fn skill_description(&self) -> &str {
        &self.description
    }
}

/// Corpus-level inputs shared by every pattern score.
#[derive(Debug, Clone)]
pub struct CorpusTotals<'a> {
    pub total_projects: usize,
    pub total_sessions: usize,
    /// Last activity per session, epoch millis
    pub session_timestamps: &'a HashMap<String, i64>,
    pub now_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankOptions {
    pub max_candidates: usize,
    pub dedup_threshold: f64,
    pub max_evidence_sessions: usize,
    /// Patterns seen fewer times than this are not ranked
    pub min_occurrences: usize,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            max_candidates: 20,
            dedup_threshold: 0.5,
            max_evidence_sessions: 10,
            min_occurrences: 1,
        }
    }
}

/// Lowercase `a-z0-9` words joined by single dashes.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

pub fn assemble_evidence(
    occurrence: &PatternOccurrence,
    session_timestamps: &HashMap<String, i64>,
    max_sessions: usize,
) -> PatternEvidence {
    let kind = PatternKind::parse_key(occurrence.key())
        .map(|(kind, _)| kind)
        .unwrap_or(PatternKind::Bigram);

    // BTreeSet iteration is already alphabetical
    let projects: Vec<String> = occurrence.projects().iter().cloned().collect();

    let mut sessions: Vec<(&String, Option<i64>)> = occurrence
        .sessions()
        .iter()
        .map(|s| (s, session_timestamps.get(s).copied()))
        .collect();
    sessions.sort_by(|a, b| match (a.1, b.1) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.0.cmp(b.0)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.0.cmp(b.0),
    });

    let known: Vec<i64> = sessions.iter().filter_map(|(_, ts)| *ts).collect();
    let first_seen = known
        .iter()
        .min()
        .and_then(|ms| millis_to_rfc3339(*ms))
        .unwrap_or_default();
    let last_seen = known
        .iter()
        .max()
        .and_then(|ms| millis_to_rfc3339(*ms))
        .unwrap_or_default();

    let examples = match pattern_shape(occurrence.key()) {
        Some(PatternShape::Tools(tools)) => vec![tools.join("->")],
        Some(PatternShape::Bash { category, .. }) => vec![category.to_string()],
        None => Vec::new(),
    };

    PatternEvidence {
        key: occurrence.key().to_string(),
        kind,
        projects,
        sessions: sessions
            .into_iter()
            .take(max_sessions)
            .map(|(s, _)| s.clone())
            .collect(),
        total_count: occurrence.total_count(),
        session_count: occurrence.session_count(),
        project_count: occurrence.project_count(),
        examples,
        first_seen,
        last_seen,
    }
}

/// Name, label and description derived from the pattern key.
fn describe(evidence: &PatternEvidence) -> (String, String, String) {
    let spread = format!(
        "seen {} times across {} sessions in {} projects",
        evidence.total_count, evidence.session_count, evidence.project_count
    );
    match pattern_shape(&evidence.key) {
        Some(PatternShape::Tools(tools)) => (
            format!("{}-flow", slugify(&tools.join(" "))),
            tools.join(" -> "),
            format!("Repeated tool sequence {} ({spread})", tools.join(", then ")),
        ),
        Some(PatternShape::Bash { category, command }) => (
            slugify(&format!("{category} {command}")),
            format!("{category}: {command}"),
            format!("Recurring {category} command `{command}` ({spread})"),
        ),
        None => (slugify(&evidence.key), evidence.key.clone(), spread),
    }
}

/// Score every pattern, sort by descending score, dedupe against the
/// catalog when one is supplied, then cap at `max_candidates`.
pub fn rank_candidates(
    patterns: &[PatternOccurrence],
    totals: &CorpusTotals<'_>,
    weights: &ScoreWeights,
    catalog: Option<&[ExistingSkill]>,
    options: &RankOptions,
    stopwords: &StopwordSet,
) -> Vec<RankedCandidate> {
    let mut candidates: Vec<RankedCandidate> = patterns
        .iter()
        .filter(|p| p.total_count() >= options.min_occurrences)
        .map(|occurrence| {
            let breakdown = score_pattern(
                occurrence,
                totals.total_projects,
                totals.total_sessions,
                totals.session_timestamps,
                totals.now_ms,
                weights,
            );
            let evidence = assemble_evidence(
                occurrence,
                totals.session_timestamps,
                options.max_evidence_sessions,
            );
            let (name, label, description) = describe(&evidence);
            RankedCandidate {
                name,
                label,
                description,
                score: breakdown.score,
                breakdown,
                evidence,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.evidence.key.cmp(&b.evidence.key))
    });

    if let Some(existing) = catalog {
        candidates =
            deduplicate_against_existing(candidates, existing, options.dedup_threshold, stopwords);
    }

    candidates.truncate(options.max_candidates);
    candidates
}
