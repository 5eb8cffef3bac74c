use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::analyzers::bash::classify_command;
use crate::analyzers::sequence::{build_tool_sequence, extract_ngrams};
use crate::prompts::{collect_prompt, CollectedPrompt, PromptRules};
use crate::scanner::{SessionContext, SessionProcessor};
use crate::state::ScanStateStore;
use crate::types::{parse_timestamp_millis, SessionRecord};

/// Longest window extracted; the carried tail holds `MAX_WINDOW - 1` names.
const MAX_WINDOW: usize = 3;

/// Everything extracted from one session so far.
///
/// Features are extended record by record, so a session parsed in several
/// incremental passes ends up with exactly the counts a single full pass
/// would produce. The tool-name tail bridges windows across pass boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFeatures {
    pub project_id: String,
    #[serde(default)]
    pub first_ts: Option<i64>,
    #[serde(default)]
    pub last_ts: Option<i64>,
    #[serde(default)]
    pub tool_calls: usize,
    #[serde(default)]
    pub bigrams: BTreeMap<String, usize>,
    #[serde(default)]
    pub trigrams: BTreeMap<String, usize>,
    #[serde(default)]
    pub bash: BTreeMap<String, usize>,
    #[serde(default)]
    pub prompts: Vec<CollectedPrompt>,
    #[serde(default)]
    pub tool_tail: Vec<String>,
}

impl SessionFeatures {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Fold one record into the running features.
    pub fn absorb(&mut self, record: &SessionRecord, rules: &PromptRules) {
        if let Some(ts) = record.timestamp().and_then(parse_timestamp_millis) {
            self.first_ts = Some(self.first_ts.map_or(ts, |f| f.min(ts)));
            self.last_ts = Some(self.last_ts.map_or(ts, |l| l.max(ts)));
        }

        match record {
            SessionRecord::ToolBatch(batch) => {
                let names = build_tool_sequence(std::iter::once(record));
                self.absorb_tools(&names);
                for command in batch.calls.iter().filter_map(|c| c.bash_command()) {
                    let pattern = classify_command(command);
                    if !pattern.normalized.is_empty() {
                        *self.bash.entry(pattern.key()).or_insert(0) += 1;
                    }
                }
            }
            SessionRecord::UserPrompt(prompt) => {
                if self.prompts.len() < rules.max_per_session {
                    if let Some(collected) = collect_prompt(prompt, rules) {
                        self.prompts.push(collected);
                    }
                }
            }
            SessionRecord::Skipped { .. } => {}
        }
    }

    fn absorb_tools(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        self.tool_calls += names.len();

        let bigrams = extract_ngrams(&self.bridged(names, 2), 2);
        let trigrams = extract_ngrams(&self.bridged(names, 3), 3);
        merge_counts(&mut self.bigrams, bigrams);
        merge_counts(&mut self.trigrams, trigrams);

        let mut tail = std::mem::take(&mut self.tool_tail);
        tail.extend(names.iter().cloned());
        let keep = tail.len().saturating_sub(MAX_WINDOW - 1);
        self.tool_tail = tail.split_off(keep);
    }

    /// New names prefixed by at most `n - 1` carried names, so every window
    /// of the result is one not counted before.
    fn bridged(&self, names: &[String], n: usize) -> Vec<String> {
        let carry = self.tool_tail.len().min(n - 1);
        self.tool_tail[self.tool_tail.len() - carry..]
            .iter()
            .chain(names)
            .cloned()
            .collect()
    }
}

fn merge_counts(into: &mut BTreeMap<String, usize>, counts: HashMap<String, usize>) {
    for (key, count) in counts {
        *into.entry(key).or_insert(0) += count;
    }
}

/// `SessionProcessor` that extends per-session features during a scan and
/// commits them to the state store next to the watermark.
pub struct FeatureCollector {
    rules: PromptRules,
    seeds: Mutex<HashMap<String, SessionFeatures>>,
    active: Mutex<HashMap<String, SessionFeatures>>,
    finished: Mutex<HashMap<String, SessionFeatures>>,
}

impl FeatureCollector {
    pub fn new(rules: PromptRules) -> Self {
        Self {
            rules,
            seeds: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            finished: Mutex::new(HashMap::new()),
        }
    }

    /// Seed with the features stored alongside existing watermarks.
    pub fn seeded(rules: PromptRules, store: &ScanStateStore) -> Self {
        let collector = Self::new(rules);
        if let Ok(mut seeds) = collector.seeds.lock() {
            seeds.extend(
                store
                    .all_features()
                    .map(|(id, features)| (id.clone(), features.clone())),
            );
        }
        collector
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("feature collector lock poisoned")
}

impl SessionProcessor for FeatureCollector {
    fn begin(&self, ctx: &SessionContext) -> Result<()> {
        let seed = self.seeds.lock().map_err(poisoned)?.remove(&ctx.key());
        let features = match seed {
            Some(features) if ctx.start_offset > 0 => features,
            _ => SessionFeatures::new(&ctx.project_id),
        };
        self.active
            .lock()
            .map_err(poisoned)?
            .insert(ctx.key(), features);
        Ok(())
    }

    fn record(&self, ctx: &SessionContext, record: &SessionRecord) -> Result<()> {
        let mut active = self.active.lock().map_err(poisoned)?;
        let features = active
            .get_mut(&ctx.key())
            .ok_or_else(|| anyhow!("session {} was not started", ctx.session_id))?;
        features.absorb(record, &self.rules);
        Ok(())
    }

    fn finish(&self, ctx: &SessionContext) -> Result<()> {
        let features = self
            .active
            .lock()
            .map_err(poisoned)?
            .remove(&ctx.key())
            .ok_or_else(|| anyhow!("session {} was not started", ctx.session_id))?;
        self.finished
            .lock()
            .map_err(poisoned)?
            .insert(ctx.key(), features);
        Ok(())
    }

    fn abort(&self, ctx: &SessionContext) {
        // A panic mid-record leaves the lock poisoned; the entry is dropped
        // either way so other sessions keep going
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ctx.key());
        self.active.clear_poison();
    }

    fn commit(&self, ctx: &SessionContext, store: &mut ScanStateStore) {
        let features = self
            .finished
            .lock()
            .ok()
            .and_then(|mut finished| finished.remove(&ctx.key()));
        if let Some(features) = features {
            store.set_features(&ctx.key(), features);
        }
    }
}
