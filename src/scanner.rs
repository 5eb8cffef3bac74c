use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::parsers::{list_transcripts, SessionStream, TranscriptFile};
use crate::state::{session_key, ScanStateStore, SessionWatermark};
use crate::types::{RecordKind, SessionRecord};

/// Identity of the session being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub project_id: String,
    pub path: PathBuf,
    /// Byte offset the stream starts at; 0 means the session starts fresh
    pub start_offset: u64,
}

impl SessionContext {
    /// Scan state key of this session.
    pub fn key(&self) -> String {
        session_key(&self.project_id, &self.session_id)
    }
}

/// Per-session callback driven by the scanner.
///
/// `begin`, `record` and `finish` run on a blocking worker, one session per
/// worker, so implementations must be shareable across threads. `commit`
/// runs on the scan loop right after the session's watermark is updated.
pub trait SessionProcessor: Send + Sync {
    fn begin(&self, _ctx: &SessionContext) -> Result<()> {
        Ok(())
    }

    fn record(&self, ctx: &SessionContext, record: &SessionRecord) -> Result<()>;

    fn finish(&self, _ctx: &SessionContext) -> Result<()> {
        Ok(())
    }

    /// Called when the session failed; nothing from it is committed.
    fn abort(&self, _ctx: &SessionContext) {}

    fn commit(&self, _ctx: &SessionContext, _store: &mut ScanStateStore) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFailure {
    pub session_id: String,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub scanned: usize,
    pub skipped: usize,
    pub failed: Vec<SessionFailure>,
    /// Files left for a later run because of the per-run file bound
    pub deferred: usize,
    pub pruned: usize,
    pub bytes_consumed: u64,
    pub records: HashMap<RecordKind, u64>,
    pub state_saved: bool,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_concurrent_files: usize,
    /// Upper bound on changed files processed in one run
    pub max_files: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_concurrent_files: 8,
            max_files: None,
        }
    }
}

struct PendingFile {
    file: TranscriptFile,
    offset: u64,
    file_size: u64,
    mtime_ms: Option<i64>,
}

struct SessionOutcome {
    end_offset: u64,
    records: HashMap<RecordKind, u64>,
}

type TaskOutput = (PendingFile, SessionContext, Result<SessionOutcome>);

/// Incremental, resumable scan over every transcript under a projects root.
pub struct CorpusScanner {
    root: PathBuf,
    options: ScanOptions,
}

impl CorpusScanner {
    pub fn new(root: impl Into<PathBuf>, options: ScanOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan changed files, feed their new records to `processor`, advance
    /// watermarks and persist the store once at the end.
    ///
    /// A failing session is recorded in the summary and leaves its watermark
    /// untouched; every other session still completes.
    pub async fn scan(
        &self,
        store: &mut ScanStateStore,
        processor: Arc<dyn SessionProcessor>,
    ) -> Result<ScanSummary> {
        let files = list_transcripts(&self.root)
            .with_context(|| format!("failed to enumerate {}", self.root.display()))?;
        let present: HashSet<String> = files.iter().map(TranscriptFile::key).collect();

        let mut summary = ScanSummary::default();
        let mut pending = Vec::new();

        for file in files {
            let meta = match std::fs::metadata(&file.path) {
                Ok(meta) => meta,
                Err(e) => {
                    summary.failed.push(failure(&file, format!("metadata: {e}")));
                    continue;
                }
            };
            let file_size = meta.len();
            let mtime_ms = meta
                .modified()
                .ok()
                .map(|t| chrono::DateTime::<Utc>::from(t).timestamp_millis());

            let offset = match store.get(&file.key()) {
                Some(wm) if wm.is_unchanged(file_size, mtime_ms) => {
                    summary.skipped += 1;
                    continue;
                }
                Some(wm) if wm.offset > file_size => {
                    debug!(
                        "{} shrank below its watermark, rescanning from start",
                        file.path.display()
                    );
                    0
                }
                Some(wm) => wm.offset,
                None => 0,
            };

            pending.push(PendingFile {
                file,
                offset,
                file_size,
                mtime_ms,
            });
        }

        if let Some(max) = self.options.max_files {
            if pending.len() > max {
                summary.deferred = pending.len() - max;
                pending.truncate(max);
            }
        }
        // try_spawn pops from the back; keep enumeration order
        pending.reverse();

        info!(
            "scanning {} changed sessions ({} unchanged)",
            pending.len(),
            summary.skipped
        );

        let max_in_flight = self.options.max_concurrent_files.max(1);
        let mut join_set: JoinSet<TaskOutput> = JoinSet::new();
        try_spawn(&mut pending, &mut join_set, &processor, max_in_flight);

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((job, ctx, Ok(outcome))) => {
                    store.update(SessionWatermark {
                        session_id: ctx.session_id.clone(),
                        project_id: ctx.project_id.clone(),
                        offset: outcome.end_offset,
                        file_size: job.file_size,
                        mtime_ms: job.mtime_ms,
                        last_scanned_at: Utc::now(),
                    });
                    processor.commit(&ctx, store);

                    summary.scanned += 1;
                    summary.bytes_consumed += outcome.end_offset.saturating_sub(job.offset);
                    for (kind, count) in outcome.records {
                        *summary.records.entry(kind).or_insert(0) += count;
                    }
                }
                Ok((job, _, Err(e))) => {
                    warn!("session {} failed: {e:#}", job.file.session_id);
                    summary.failed.push(failure(&job.file, format!("{e:#}")));
                }
                Err(e) => {
                    // The blocking task itself panicked or was cancelled
                    tracing::error!("scan task failed: {e}");
                    summary.failed.push(SessionFailure {
                        session_id: String::new(),
                        path: PathBuf::new(),
                        reason: e.to_string(),
                    });
                }
            }

            try_spawn(&mut pending, &mut join_set, &processor, max_in_flight);
        }

        let stale: Vec<String> = store
            .session_ids()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            store.remove(id);
        }
        summary.pruned = stale.len();

        store.record_run(summary.bytes_consumed, &summary.records);
        summary.state_saved = match store.save() {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to persist scan state: {e}");
                false
            }
        };

        info!(
            "scan complete: {} scanned, {} skipped, {} failed",
            summary.scanned,
            summary.skipped,
            summary.failed.len()
        );
        Ok(summary)
    }
}

fn failure(file: &TranscriptFile, reason: String) -> SessionFailure {
    SessionFailure {
        session_id: file.session_id.clone(),
        path: file.path.clone(),
        reason,
    }
}

/// Spawn pending files until `max_in_flight` sessions are running.
fn try_spawn(
    pending: &mut Vec<PendingFile>,
    join_set: &mut JoinSet<TaskOutput>,
    processor: &Arc<dyn SessionProcessor>,
    max_in_flight: usize,
) {
    while join_set.len() < max_in_flight {
        let Some(job) = pending.pop() else {
            break;
        };
        let ctx = SessionContext {
            session_id: job.file.session_id.clone(),
            project_id: job.file.project_id.clone(),
            path: job.file.path.clone(),
            start_offset: job.offset,
        };
        let p = Arc::clone(processor);
        join_set.spawn(async move {
            let worker_ctx = ctx.clone();
            let result = tokio::task::spawn_blocking(move || process_session(p.as_ref(), &worker_ctx))
                .await
                .map_err(anyhow::Error::from)
                .and_then(|r| r);
            (job, ctx, result)
        });
    }
}

/// Run one session through the processor, aborting it on any failure,
/// including a panic inside the processor.
fn process_session(processor: &dyn SessionProcessor, ctx: &SessionContext) -> Result<SessionOutcome> {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| stream_into(processor, ctx)))
        .unwrap_or_else(|_| Err(anyhow!("processor panicked on session {}", ctx.session_id)));
    if result.is_err() {
        processor.abort(ctx);
    }
    result
}

/// Stream the session's unconsumed suffix, one record at a time.
fn stream_into(processor: &dyn SessionProcessor, ctx: &SessionContext) -> Result<SessionOutcome> {
    processor.begin(ctx)?;
    let mut stream = SessionStream::open(&ctx.path, ctx.start_offset)?;
    let mut records: HashMap<RecordKind, u64> = HashMap::new();
    for record in stream.by_ref() {
        let record = record.with_context(|| format!("failed to read {}", ctx.path.display()))?;
        *records.entry(record.kind()).or_insert(0) += 1;
        processor.record(ctx, &record)?;
    }
    processor.finish(ctx)?;
    Ok(SessionOutcome {
        end_offset: stream.position(),
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, RecordKind)>>,
        aborted: Mutex<Vec<String>>,
        fail_on: Option<String>,
        panic_on: Option<String>,
    }

    impl SessionProcessor for Recorder {
        fn record(&self, ctx: &SessionContext, record: &SessionRecord) -> Result<()> {
            if self.fail_on.as_deref() == Some(ctx.session_id.as_str()) {
                anyhow::bail!("processor rejected {}", ctx.session_id);
            }
            if self.panic_on.as_deref() == Some(ctx.session_id.as_str()) {
                panic!("processor blew up on {}", ctx.session_id);
            }
            self.seen
                .lock()
                .unwrap()
                .push((ctx.session_id.clone(), record.kind()));
            Ok(())
        }

        fn abort(&self, ctx: &SessionContext) {
            self.aborted.lock().unwrap().push(ctx.key());
        }
    }

    fn prompt_line(text: &str) -> String {
        format!(r#"{{"type":"user","message":{{"content":"{text}"}}}}"#)
    }

    fn write_session(root: &Path, project: &str, session: &str, lines: &[String]) -> PathBuf {
        let dir = root.join(project);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{session}.jsonl"));
        let mut body = lines.join("\n");
        body.push('\n');
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn unchanged_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("projects");
        write_session(&root, "p1", "s1", &[prompt_line("hello there")]);

        let mut store = ScanStateStore::new(tmp.path().join("state.json"));
        let scanner = CorpusScanner::new(&root, ScanOptions::default());
        let recorder = Arc::new(Recorder::default());

        let first = scanner.scan(&mut store, recorder.clone()).await.unwrap();
        assert_eq!(first.scanned, 1);
        assert!(first.state_saved);

        let second = scanner.scan(&mut store, recorder.clone()).await.unwrap();
        assert_eq!(second.scanned, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn appended_lines_are_read_once() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("projects");
        let path = write_session(&root, "p1", "s1", &[prompt_line("first prompt")]);

        let mut store = ScanStateStore::new(tmp.path().join("state.json"));
        let scanner = CorpusScanner::new(&root, ScanOptions::default());
        let recorder = Arc::new(Recorder::default());
        scanner.scan(&mut store, recorder.clone()).await.unwrap();

        let mut body = std::fs::read_to_string(&path).unwrap();
        body.push_str(&prompt_line("second prompt"));
        body.push('\n');
        std::fs::write(&path, &body).unwrap();

        let summary = scanner.scan(&mut store, recorder.clone()).await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
        assert_eq!(store.get("p1/s1").unwrap().offset, body.len() as u64);
    }

    #[tokio::test]
    async fn one_failing_session_does_not_stop_others() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("projects");
        write_session(&root, "p1", "good", &[prompt_line("fine")]);
        write_session(&root, "p2", "bad", &[prompt_line("boom")]);

        let mut store = ScanStateStore::new(tmp.path().join("state.json"));
        let scanner = CorpusScanner::new(&root, ScanOptions::default());
        let recorder = Arc::new(Recorder {
            fail_on: Some("bad".into()),
            ..Default::default()
        });

        let summary = scanner.scan(&mut store, recorder).await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].session_id, "bad");
        assert!(store.get("p1/good").is_some());
        assert!(store.get("p2/bad").is_none());
    }

    #[tokio::test]
    async fn panicking_processor_aborts_the_session() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("projects");
        write_session(&root, "p1", "good", &[prompt_line("fine")]);
        write_session(&root, "p2", "bad", &[prompt_line("boom")]);

        let mut store = ScanStateStore::new(tmp.path().join("state.json"));
        let scanner = CorpusScanner::new(&root, ScanOptions::default());
        let recorder = Arc::new(Recorder {
            panic_on: Some("bad".into()),
            ..Default::default()
        });

        let summary = scanner.scan(&mut store, recorder.clone()).await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].session_id, "bad");
        assert!(summary.failed[0].reason.contains("panicked"));
        assert_eq!(*recorder.aborted.lock().unwrap(), vec!["p2/bad".to_string()]);
        assert!(store.get("p2/bad").is_none());
    }

    #[tokio::test]
    async fn same_session_name_in_two_projects_keeps_two_watermarks() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("projects");
        write_session(&root, "p1", "s1", &[prompt_line("short")]);
        write_session(&root, "p2", "s1", &[prompt_line("a somewhat longer prompt body")]);

        let mut store = ScanStateStore::new(tmp.path().join("state.json"));
        let scanner = CorpusScanner::new(&root, ScanOptions::default());
        let summary = scanner
            .scan(&mut store, Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(summary.scanned, 2);
        assert_ne!(
            store.get("p1/s1").unwrap().offset,
            store.get("p2/s1").unwrap().offset
        );

        let again = scanner
            .scan(&mut store, Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(again.skipped, 2);
        assert_eq!(again.pruned, 0);
    }

    #[tokio::test]
    async fn deleted_files_are_pruned() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("projects");
        let path = write_session(&root, "p1", "s1", &[prompt_line("hello")]);

        let mut store = ScanStateStore::new(tmp.path().join("state.json"));
        let scanner = CorpusScanner::new(&root, ScanOptions::default());
        scanner
            .scan(&mut store, Arc::new(Recorder::default()))
            .await
            .unwrap();
        std::fs::remove_file(path).unwrap();

        let summary = scanner
            .scan(&mut store, Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(summary.pruned, 1);
        assert!(store.get("p1/s1").is_none());
    }

    #[tokio::test]
    async fn max_files_defers_the_rest() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("projects");
        for i in 0..3 {
            write_session(&root, "p1", &format!("s{i}"), &[prompt_line("hello")]);
        }

        let mut store = ScanStateStore::new(tmp.path().join("state.json"));
        let scanner = CorpusScanner::new(
            &root,
            ScanOptions {
                max_concurrent_files: 1,
                max_files: Some(2),
            },
        );
        let summary = scanner
            .scan(&mut store, Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.deferred, 1);

        let next = scanner
            .scan(&mut store, Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(next.scanned, 1);
        assert_eq!(next.skipped, 2);
    }
}
