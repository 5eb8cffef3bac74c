use std::collections::HashMap;

use crate::types::SessionRecord;

/// Separator between tool names in an n-gram key.
pub const NGRAM_SEPARATOR: &str = "->";

/// Flatten every tool batch, in session order, into one sequence of tool names.
/// Prompts and skipped records are ignored.
pub fn build_tool_sequence<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a SessionRecord>,
{
    records
        .into_iter()
        .filter_map(|record| match record {
            SessionRecord::ToolBatch(batch) => Some(batch),
            _ => None,
        })
        .flat_map(|batch| batch.calls.iter().map(|call| call.name.clone()))
        .collect()
}

/// Sliding-window n-gram counts keyed by `A->B[->C...]`.
///
/// A sequence of length `L` yields `L - n + 1` windows, none when `L < n`.
pub fn extract_ngrams(sequence: &[String], n: usize) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    if n == 0 || sequence.len() < n {
        return counts;
    }

    for window in sequence.windows(n) {
        *counts.entry(window.join(NGRAM_SEPARATOR)).or_insert(0) += 1;
    }
    counts
}

/// Split an n-gram key back into its tool names.
pub fn ngram_tools(key: &str) -> Vec<&str> {
    key.split(NGRAM_SEPARATOR).collect()
}
