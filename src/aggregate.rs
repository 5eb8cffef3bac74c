use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::analyzers::sequence::ngram_tools;

/// Pattern families, kept apart by a key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    Bigram,
    Trigram,
    Bash,
}

impl PatternKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            PatternKind::Bigram => "bigram",
            PatternKind::Trigram => "trigram",
            PatternKind::Bash => "bash",
        }
    }

    pub fn key(&self, raw: &str) -> String {
        format!("{}:{}", self.prefix(), raw)
    }

    /// Split a prefixed key into its kind and raw pattern.
    pub fn parse_key(key: &str) -> Option<(PatternKind, &str)> {
        let (prefix, raw) = key.split_once(':')?;
        let kind = match prefix {
            "bigram" => PatternKind::Bigram,
            "trigram" => PatternKind::Trigram,
            "bash" => PatternKind::Bash,
            _ => return None,
        };
        Some((kind, raw))
    }
}

/// Human-facing pieces of a pattern key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternShape<'a> {
    Tools(Vec<&'a str>),
    Bash {
        category: &'a str,
        command: &'a str,
    },
}

pub fn pattern_shape(key: &str) -> Option<PatternShape<'_>> {
    let (kind, raw) = PatternKind::parse_key(key)?;
    match kind {
        PatternKind::Bigram | PatternKind::Trigram => Some(PatternShape::Tools(ngram_tools(raw))),
        PatternKind::Bash => {
            let (category, command) = raw.split_once(':')?;
            Some(PatternShape::Bash { category, command })
        }
    }
}

/// Corpus-wide record for one pattern key.
///
/// Distinct session/project counts are always the sizes of the id sets;
/// the sets are only ever changed through `merge`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatternOccurrence {
    key: String,
    total_count: usize,
    sessions: BTreeSet<String>,
    projects: BTreeSet<String>,
    per_session: BTreeMap<String, usize>,
}

impl PatternOccurrence {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn merge(&mut self, session_id: &str, project_id: &str, count: usize) {
        if count == 0 {
            return;
        }
        self.total_count += count;
        if !self.sessions.contains(session_id) {
            self.sessions.insert(session_id.to_string());
        }
        if !self.projects.contains(project_id) {
            self.projects.insert(project_id.to_string());
        }
        *self.per_session.entry(session_id.to_string()).or_insert(0) += count;
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn sessions(&self) -> &BTreeSet<String> {
        &self.sessions
    }

    pub fn projects(&self) -> &BTreeSet<String> {
        &self.projects
    }

    pub fn per_session(&self) -> &BTreeMap<String, usize> {
        &self.per_session
    }
}

/// Sole owner of the corpus pattern map for one discovery run.
#[derive(Debug, Default)]
pub struct PatternAggregator {
    patterns: HashMap<String, PatternOccurrence>,
}

impl PatternAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one session's counts. Raw keys are prefixed with their kind.
    pub fn add_session_patterns(
        &mut self,
        session_id: &str,
        project_id: &str,
        bigrams: &BTreeMap<String, usize>,
        trigrams: &BTreeMap<String, usize>,
        bash: &BTreeMap<String, usize>,
    ) {
        let families = [
            (PatternKind::Bigram, bigrams),
            (PatternKind::Trigram, trigrams),
            (PatternKind::Bash, bash),
        ];
        for (kind, counts) in families {
            for (raw, &count) in counts {
                let key = kind.key(raw);
                self.patterns
                    .entry(key.clone())
                    .or_insert_with(|| PatternOccurrence::new(key))
                    .merge(session_id, project_id, count);
            }
        }
    }

    /// Drop patterns present in at least `min_projects` projects that also
    /// cover at least `ratio` of all projects. Returns the removed keys.
    pub fn filter_noise(
        &mut self,
        total_projects: usize,
        min_projects: usize,
        ratio: f64,
    ) -> Vec<String> {
        if total_projects == 0 {
            return Vec::new();
        }
        let mut removed: Vec<String> = self
            .patterns
            .values()
            .filter(|p| {
                let count = p.project_count();
                count >= min_projects && count as f64 / total_projects as f64 >= ratio
            })
            .map(|p| p.key.clone())
            .collect();
        for key in &removed {
            self.patterns.remove(key);
        }
        removed.sort();
        removed
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<PatternOccurrence> {
        self.patterns.get(key).cloned()
    }

    /// Copy of every pattern, ordered by key.
    pub fn snapshot(&self) -> Vec<PatternOccurrence> {
        let mut all: Vec<PatternOccurrence> = self.patterns.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn merge_keeps_counts_and_sets_together() {
        let mut occ = PatternOccurrence::new("bigram:Read->Edit");
        occ.merge("s1", "p1", 2);
        occ.merge("s1", "p1", 1);
        occ.merge("s2", "p1", 1);
        occ.merge("s3", "p2", 0);

        assert_eq!(occ.total_count(), 4);
        assert_eq!(occ.session_count(), 2);
        assert_eq!(occ.project_count(), 1);
        assert_eq!(occ.per_session().get("s1"), Some(&3));
    }

    #[test]
    fn kinds_do_not_collide() {
        let mut agg = PatternAggregator::new();
        let same = counts(&[("x", 1)]);
        agg.add_session_patterns("s1", "p1", &same, &same, &same);
        assert_eq!(agg.len(), 3);
        assert!(agg.get("bigram:x").is_some());
        assert!(agg.get("trigram:x").is_some());
        assert!(agg.get("bash:x").is_some());
    }

    fn corpus_with_project_spread(spread: usize) -> PatternAggregator {
        let mut agg = PatternAggregator::new();
        let empty = BTreeMap::new();
        for p in 0..spread {
            agg.add_session_patterns(
                &format!("s{p}"),
                &format!("p{p}"),
                &counts(&[("Read->Edit", 1)]),
                &empty,
                &empty,
            );
        }
        agg
    }

    #[test]
    fn noise_filter_boundaries() {
        // 18/20 = 90%: removed
        let mut agg = corpus_with_project_spread(18);
        assert_eq!(agg.filter_noise(20, 15, 0.8), vec!["bigram:Read->Edit"]);

        // 16/20 = 80%: removed, the ratio bound is inclusive
        let mut agg = corpus_with_project_spread(16);
        assert_eq!(agg.filter_noise(20, 15, 0.8).len(), 1);

        // 14/20: below the project floor
        let mut agg = corpus_with_project_spread(14);
        assert!(agg.filter_noise(20, 15, 0.8).is_empty());
        assert_eq!(agg.len(), 1);

        // exactly 15 projects but only 75%
        let mut agg = corpus_with_project_spread(15);
        assert!(agg.filter_noise(20, 15, 0.8).is_empty());

        // exactly 15 of 15
        let mut agg = corpus_with_project_spread(15);
        assert_eq!(agg.filter_noise(15, 15, 0.8).len(), 1);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut agg = corpus_with_project_spread(2);
        let snap = agg.snapshot();
        agg.filter_noise(2, 1, 0.5);
        assert!(agg.is_empty());
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].project_count(), 2);
    }

    #[test]
    fn shapes_from_keys() {
        assert_eq!(
            pattern_shape("trigram:Read->Edit->Bash"),
            Some(PatternShape::Tools(vec!["Read", "Edit", "Bash"]))
        );
        assert_eq!(
            pattern_shape("bash:testing:cargo test"),
            Some(PatternShape::Bash {
                category: "testing",
                command: "cargo test"
            })
        );
        assert_eq!(pattern_shape("unknown:x"), None);
    }
}
