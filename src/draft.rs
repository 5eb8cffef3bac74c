use serde::{Deserialize, Serialize};

use crate::aggregate::{pattern_shape, PatternShape};
use crate::cluster::ClusterScore;
use crate::embedding::EmbeddingMethod;
use crate::ranker::RankedCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DraftSource {
    Pattern,
    Cluster,
}

/// What a reviewer needs to accept or reject a draft without reopening
/// the transcripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftEvidence {
    pub sessions: Vec<String>,
    pub projects: Vec<String>,
    pub occurrences: usize,
    pub examples: Vec<String>,
    pub first_seen: String,
    pub last_seen: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<EmbeddingMethod>,
}

/// Renderer-agnostic skill draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDraft {
    pub name: String,
    pub description: String,
    pub outline: Vec<String>,
    pub evidence: DraftEvidence,
    pub source: DraftSource,
}

/// Either kind of candidate a draft can be built from.
#[derive(Debug, Clone, Copy)]
pub enum DraftInput<'a> {
    Pattern(&'a RankedCandidate),
    Cluster(&'a ClusterScore),
}

fn pattern_outline(candidate: &RankedCandidate) -> Vec<String> {
    let mut outline = vec![format!("When to use: {}", candidate.description)];
    match pattern_shape(&candidate.evidence.key) {
        Some(PatternShape::Tools(tools)) => {
            outline.extend(
                tools
                    .iter()
                    .enumerate()
                    .map(|(i, tool)| format!("Step {}: use the {tool} tool", i + 1)),
            );
        }
        Some(PatternShape::Bash { category, command }) => {
            outline.push(format!("Step 1: run `{command}` ({category})"));
            outline.push("Step 2: check the output and report failures".to_string());
        }
        None => {}
    }
    outline
}

fn cluster_outline(cluster: &ClusterScore) -> Vec<String> {
    let mut outline = vec![format!("When to use: {}", cluster.description)];
    if !cluster.keywords.is_empty() {
        outline.push(format!("Key topics: {}", cluster.keywords.join(", ")));
    }
    outline.extend(
        cluster
            .examples
            .iter()
            .map(|example| format!("Example request: {example}")),
    );
    outline
}

pub fn generate_skill_draft(input: DraftInput<'_>) -> SkillDraft {
    match input {
        DraftInput::Pattern(candidate) => SkillDraft {
            name: candidate.name.clone(),
            description: candidate.description.clone(),
            outline: pattern_outline(candidate),
            evidence: DraftEvidence {
                sessions: candidate.evidence.sessions.clone(),
                projects: candidate.evidence.projects.clone(),
                occurrences: candidate.evidence.total_count,
                examples: candidate.evidence.examples.clone(),
                first_seen: candidate.evidence.first_seen.clone(),
                last_seen: candidate.evidence.last_seen.clone(),
                score: candidate.score,
                method: None,
            },
            source: DraftSource::Pattern,
        },
        DraftInput::Cluster(cluster) => SkillDraft {
            name: cluster.name.clone(),
            description: cluster.description.clone(),
            outline: cluster_outline(cluster),
            evidence: DraftEvidence {
                sessions: cluster.sessions.clone(),
                projects: cluster.projects.clone(),
                occurrences: cluster.member_count,
                examples: cluster.examples.clone(),
                first_seen: cluster.first_seen.clone(),
                last_seen: cluster.last_seen.clone(),
                score: cluster.score,
                method: Some(cluster.method),
            },
            source: DraftSource::Cluster,
        },
    }
}

pub fn generate_cluster_draft(cluster: &ClusterScore) -> SkillDraft {
    generate_skill_draft(DraftInput::Cluster(cluster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::PatternKind;
    use crate::cluster::ClusterBreakdown;
    use crate::ranker::PatternEvidence;
    use crate::scoring::ScoreBreakdown;

    fn candidate(key: &str) -> RankedCandidate {
        RankedCandidate {
            name: "read-edit-flow".into(),
            label: "Read -> Edit".into(),
            description: "Repeated tool sequence Read, then Edit".into(),
            score: 0.7,
            breakdown: ScoreBreakdown::default(),
            evidence: PatternEvidence {
                key: key.into(),
                kind: PatternKind::Bigram,
                projects: vec!["p1".into()],
                sessions: vec!["s1".into()],
                total_count: 3,
                session_count: 1,
                project_count: 1,
                examples: vec!["Read->Edit".into()],
                first_seen: String::new(),
                last_seen: String::new(),
            },
        }
    }

    #[test]
    fn pattern_draft_lists_tool_steps() {
        let c = candidate("bigram:Read->Edit");
        let draft = generate_skill_draft(DraftInput::Pattern(&c));
        assert_eq!(draft.source, DraftSource::Pattern);
        assert_eq!(draft.name, "read-edit-flow");
        assert_eq!(draft.outline.len(), 3);
        assert_eq!(draft.outline[1], "Step 1: use the Read tool");
        assert_eq!(draft.evidence.occurrences, 3);
        assert_eq!(draft.evidence.method, None);
    }

    #[test]
    fn bash_draft_runs_the_command() {
        let c = candidate("bash:testing:cargo test");
        let draft = generate_skill_draft(DraftInput::Pattern(&c));
        assert!(draft.outline[1].contains("`cargo test`"));
    }

    #[test]
    fn cluster_draft_keeps_method() {
        let cluster = ClusterScore {
            cluster_id: 0,
            name: "migration-table".into(),
            description: "Recurring request like \"write migration\"".into(),
            score: 0.6,
            breakdown: ClusterBreakdown::default(),
            method: EmbeddingMethod::Heuristic,
            member_count: 4,
            representative: "write migration".into(),
            examples: vec!["write migration".into(), "add migration".into()],
            keywords: vec!["migration".into()],
            sessions: vec!["s1".into()],
            projects: vec!["p".into()],
            first_seen: "2026-01-02T10:00:00+00:00".into(),
            last_seen: "2026-01-05T10:00:00+00:00".into(),
        };
        let draft = generate_cluster_draft(&cluster);
        assert_eq!(draft.source, DraftSource::Cluster);
        assert_eq!(draft.evidence.first_seen, "2026-01-02T10:00:00+00:00");
        assert_eq!(draft.evidence.last_seen, "2026-01-05T10:00:00+00:00");
        assert_eq!(draft.evidence.method, Some(EmbeddingMethod::Heuristic));
        assert_eq!(draft.evidence.occurrences, 4);
        assert_eq!(draft.outline.len(), 4);
    }
}
