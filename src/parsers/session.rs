use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::value::RawValue;

use crate::parsers::redact::redact_secrets;
use crate::types::{Content, Message, SessionRecord, ToolBatch, ToolCall, UserPrompt};

/// How a line is decoded, chosen by its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordRoute {
    UserPrompt,
    ToolBatch,
    Noise,
}

/// Ordered routing table. Types not listed here are routed as noise so new
/// transcript record types never break the scan.
const RECORD_ROUTES: &[(&str, RecordRoute)] = &[
    ("user", RecordRoute::UserPrompt),
    ("assistant", RecordRoute::ToolBatch),
    ("progress", RecordRoute::Noise),
    ("file-history-snapshot", RecordRoute::Noise),
    ("queue-operation", RecordRoute::Noise),
    ("system", RecordRoute::Noise),
    ("summary", RecordRoute::Noise),
];

fn route_for(entry_type: &str) -> RecordRoute {
    RECORD_ROUTES
        .iter()
        .find(|(t, _)| *t == entry_type)
        .map(|(_, route)| *route)
        .unwrap_or(RecordRoute::Noise)
}

/// Header view of a line: `message` stays raw so noise records never pay for
/// (or fail on) decoding a payload we do not use.
#[derive(serde::Deserialize)]
struct LineHeader<'a> {
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(borrow, default)]
    message: Option<&'a RawValue>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
}

impl LineHeader<'_> {
    fn decode_message(&self) -> Option<Message> {
        serde_json::from_str(self.message?.get()).ok()
    }
}

/// Decode one transcript line. Blank, malformed or structurally invalid lines
/// yield `None`; they are never an error.
pub fn parse_line(line: &str) -> Option<SessionRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let header: LineHeader<'_> = serde_json::from_str(trimmed).ok()?;
    if header.entry_type.is_empty() {
        return None;
    }

    match route_for(&header.entry_type) {
        RecordRoute::UserPrompt => {
            let message = header.decode_message()?;
            match message.content.text() {
                Some(text) => Some(SessionRecord::UserPrompt(UserPrompt {
                    text: redact_secrets(&text),
                    session_id: header.session_id,
                    timestamp: header.timestamp,
                    cwd: header.cwd,
                })),
                // Tool results travel back as user turns without text
                None => Some(SessionRecord::Skipped {
                    kind: "tool-result".to_string(),
                }),
            }
        }
        RecordRoute::ToolBatch => {
            let message = header.decode_message()?;
            let calls = extract_tool_calls(&message.content);
            if calls.is_empty() {
                Some(SessionRecord::Skipped {
                    kind: header.entry_type,
                })
            } else {
                Some(SessionRecord::ToolBatch(ToolBatch {
                    timestamp: header.timestamp,
                    calls,
                }))
            }
        }
        RecordRoute::Noise => Some(SessionRecord::Skipped {
            kind: header.entry_type,
        }),
    }
}

fn extract_tool_calls(content: &Content) -> Vec<ToolCall> {
    match content {
        Content::Text(_) => Vec::new(),
        Content::Array(items) => items
            .iter()
            .filter(|item| item.item_type == "tool_use")
            .filter_map(|item| {
                let name = item.name.as_ref()?;
                Some(ToolCall {
                    name: name.clone(),
                    input: item.input.clone().unwrap_or(serde_json::Value::Null),
                })
            })
            .collect(),
    }
}

// --- Streaming ---

/// Lazy record sequence over one transcript file, starting at a byte offset.
///
/// Lines are read one at a time; `position()` is the byte offset just past the
/// last complete line consumed. A trailing line without a newline is left
/// unconsumed so a later scan can pick it up once it is complete.
pub struct SessionStream {
    reader: Option<BufReader<File>>,
    position: u64,
    lines_read: u64,
    buf: Vec<u8>,
}

impl SessionStream {
    /// Open `path` at `offset`. A missing file yields an empty stream.
    pub fn open(path: &Path, offset: u64) -> Result<Self> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::empty(offset)),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open session: {}", path.display()))
            }
        };

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("failed to seek {} to {}", path.display(), offset))?;

        Ok(Self {
            reader: Some(reader),
            position: offset,
            lines_read: 0,
            buf: Vec::new(),
        })
    }

    fn empty(offset: u64) -> Self {
        Self {
            reader: None,
            position: offset,
            lines_read: 0,
            buf: Vec::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

impl Iterator for SessionStream {
    type Item = Result<SessionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            self.buf.clear();

            let n = match reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => n,
                Err(e) => {
                    self.reader = None;
                    return Some(Err(e.into()));
                }
            };

            if n == 0 || self.buf.last() != Some(&b'\n') {
                self.reader = None;
                return None;
            }

            self.position += n as u64;
            self.lines_read += 1;

            let Ok(line) = std::str::from_utf8(&self.buf) else {
                continue;
            };
            if let Some(record) = parse_line(line) {
                return Some(Ok(record));
            }
        }
    }
}

/// Stream a whole transcript from the beginning.
pub fn stream_session(path: &Path) -> Result<SessionStream> {
    SessionStream::open(path, 0)
}

// --- Corpus enumeration ---

/// A transcript file discovered under the projects root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFile {
    pub path: PathBuf,
    pub session_id: String,
    pub project_id: String,
}

impl TranscriptFile {
    /// Scan state key, unique across projects.
    pub fn key(&self) -> String {
        crate::state::session_key(&self.project_id, &self.session_id)
    }
}

/// List `<root>/<project>/<session>.jsonl` files. Files directly under the
/// root belong to a project named after the root itself. Missing root → empty.
pub fn list_transcripts(root: &Path) -> Result<Vec<TranscriptFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let root_project = root
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("root")
        .to_string();

    let mut files = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("failed to list {}", root.display()))? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let Some(project) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            for session_path in list_sessions(&path)? {
                if let Some(file) = transcript_file(session_path, &project) {
                    files.push(file);
                }
            }
        } else if is_jsonl(&path) {
            if let Some(file) = transcript_file(path, &root_project) {
                files.push(file);
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// List all `.jsonl` session files directly inside a project directory.
pub fn list_sessions(project_path: &Path) -> Result<Vec<PathBuf>> {
    if !project_path.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(project_path)? {
        let path = entry?.path();
        if path.is_file() && is_jsonl(&path) {
            sessions.push(path);
        }
    }

    sessions.sort();
    Ok(sessions)
}

fn is_jsonl(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("jsonl")
}

fn transcript_file(path: PathBuf, project: &str) -> Option<TranscriptFile> {
    let session_id = path.file_stem()?.to_str()?.to_string();
    Some(TranscriptFile {
        path,
        session_id,
        project_id: project.to_string(),
    })
}
