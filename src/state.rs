use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzers::features::SessionFeatures;
use crate::types::RecordKind;

/// Highest state schema this build can read.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("scan state at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("scan state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize scan state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Store key for a transcript: `<project>/<session>`, so same-named files in
/// different projects keep separate watermarks.
pub fn session_key(project_id: &str, session_id: &str) -> String {
    format!("{project_id}/{session_id}")
}

/// Session id part of a store key.
pub fn session_of_key(key: &str) -> &str {
    key.rsplit_once('/').map_or(key, |(_, session)| session)
}

/// How far one transcript file has been consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWatermark {
    pub session_id: String,
    #[serde(default)]
    pub project_id: String,
    /// Byte offset just past the last complete line consumed
    pub offset: u64,
    /// File size and mtime observed when the offset was recorded
    pub file_size: u64,
    #[serde(default)]
    pub mtime_ms: Option<i64>,
    pub last_scanned_at: DateTime<Utc>,
}

impl SessionWatermark {
    /// True when the file on disk has not changed since this watermark.
    pub fn is_unchanged(&self, file_size: u64, mtime_ms: Option<i64>) -> bool {
        self.file_size == file_size && self.mtime_ms == mtime_ms
    }

    pub fn key(&self) -> String {
        session_key(&self.project_id, &self.session_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sessions_tracked: usize,
    #[serde(default)]
    pub bytes_consumed: u64,
    #[serde(default)]
    pub records_by_kind: BTreeMap<RecordKind, u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    sessions: BTreeMap<String, SessionWatermark>,
    #[serde(default)]
    features: BTreeMap<String, SessionFeatures>,
    #[serde(default)]
    stats: ScanStats,
}

/// Per-corpus watermark store, persisted as versioned JSON.
///
/// Mutations stay in memory until `save`, which writes a temp file and
/// renames it over the previous state.
#[derive(Debug)]
pub struct ScanStateStore {
    path: PathBuf,
    state: StateFile,
}

impl ScanStateStore {
    /// Empty store that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: StateFile {
                version: STATE_VERSION,
                ..Default::default()
            },
        }
    }

    /// Load the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new(path)),
            Err(e) => return Err(e.into()),
        };

        let state: StateFile =
            serde_json::from_str(&data).map_err(|e| StateError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if state.version == 0 || state.version > STATE_VERSION {
            return Err(StateError::Corrupt {
                path,
                reason: format!("unsupported version {}", state.version),
            });
        }

        Ok(Self { path, state })
    }

    /// Load the store, falling back to an empty one (full rescan) when the
    /// persisted state is corrupt or unreadable.
    pub fn open_or_reset(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::open(&path) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!("{e}; rescanning corpus from scratch");
                Self::new(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&SessionWatermark> {
        self.state.sessions.get(key)
    }

    pub fn update(&mut self, watermark: SessionWatermark) {
        self.state
            .sessions
            .insert(watermark.key(), watermark);
        self.state.stats.sessions_tracked = self.state.sessions.len();
    }

    /// Forget a session entirely (watermark and features).
    pub fn remove(&mut self, key: &str) {
        self.state.sessions.remove(key);
        self.state.features.remove(key);
        self.state.stats.sessions_tracked = self.state.sessions.len();
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &String> {
        self.state.sessions.keys()
    }

    pub fn features(&self, key: &str) -> Option<&SessionFeatures> {
        self.state.features.get(key)
    }

    pub fn all_features(&self) -> impl Iterator<Item = (&String, &SessionFeatures)> {
        self.state.features.iter()
    }

    pub fn set_features(&mut self, key: &str, features: SessionFeatures) {
        self.state.features.insert(key.to_string(), features);
    }

    pub fn stats(&self) -> &ScanStats {
        &self.state.stats
    }

    /// Fold one scan run into the aggregate stats.
    pub fn record_run(&mut self, bytes: u64, records: &HashMap<RecordKind, u64>) {
        let stats = &mut self.state.stats;
        stats.total_runs += 1;
        stats.last_run_at = Some(Utc::now());
        stats.bytes_consumed += bytes;
        for (kind, count) in records {
            *stats.records_by_kind.entry(*kind).or_insert(0) += count;
        }
        stats.sessions_tracked = self.state.sessions.len();
    }

    /// Atomic write: tmp → rename
    pub fn save(&self) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&self.state)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
