use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::aggregate::PatternOccurrence;

const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Weights for the pattern score. Each factor is normalized to [0, 1]
/// before weighting, so with weights summing to 1.0 the score is in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight for total occurrence count (saturating)
    pub frequency: f64,
    /// Weight for the share of sessions containing the pattern
    pub session_breadth: f64,
    /// Weight for the share of projects containing the pattern
    pub project_breadth: f64,
    /// Weight for how recently the pattern was last seen
    pub recency: f64,
    /// Days after which the recency factor halves
    pub half_life_days: f64,
    /// Occurrence count at which the frequency factor reaches 0.5
    pub frequency_saturation: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            frequency: 0.35,
            session_breadth: 0.25,
            project_breadth: 0.20,
            recency: 0.20,
            half_life_days: 14.0,
            frequency_saturation: 10.0,
        }
    }
}

/// Weighted contribution of each factor; `score` is their sum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub frequency: f64,
    pub session_breadth: f64,
    pub project_breadth: f64,
    pub recency: f64,
    pub score: f64,
}

/// exp decay with the given half-life; 1.0 at age 0, never above 1.0.
pub fn recency_factor(age_ms: i64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    let age_days = age_ms.max(0) as f64 / MS_PER_DAY;
    (-age_days * (2.0_f64.ln()) / half_life_days).exp()
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64).min(1.0)
    }
}

/// Newest timestamp among the sessions that contributed to the pattern.
pub fn last_seen_millis(
    occurrence: &PatternOccurrence,
    session_timestamps: &HashMap<String, i64>,
) -> Option<i64> {
    occurrence
        .sessions()
        .iter()
        .filter_map(|s| session_timestamps.get(s).copied())
        .max()
}

/// Score one pattern. The breakdown depends only on the occurrence, the
/// corpus totals, the timestamps and `now_ms`.
pub fn score_pattern(
    occurrence: &PatternOccurrence,
    total_projects: usize,
    total_sessions: usize,
    session_timestamps: &HashMap<String, i64>,
    now_ms: i64,
    weights: &ScoreWeights,
) -> ScoreBreakdown {
    let count = occurrence.total_count() as f64;
    let frequency = if weights.frequency_saturation > 0.0 {
        count / (count + weights.frequency_saturation)
    } else {
        1.0
    };

    let recency = last_seen_millis(occurrence, session_timestamps)
        .map(|last| recency_factor(now_ms - last, weights.half_life_days))
        .unwrap_or(0.0);

    let mut breakdown = ScoreBreakdown {
        frequency: weights.frequency * frequency,
        session_breadth: weights.session_breadth * ratio(occurrence.session_count(), total_sessions),
        project_breadth: weights.project_breadth * ratio(occurrence.project_count(), total_projects),
        recency: weights.recency * recency,
        score: 0.0,
    };
    breakdown.score =
        breakdown.frequency + breakdown.session_breadth + breakdown.project_breadth + breakdown.recency;
    breakdown
}
