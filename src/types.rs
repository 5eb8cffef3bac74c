use chrono::DateTime;
use serde::{Deserialize, Serialize};

// --- Raw transcript payloads ---

/// `message` payload of a user or assistant line.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub content: Content,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Array(Vec<ContentItem>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

impl Content {
    /// Concatenated text blocks, or `None` when the content carries no text
    /// (e.g. a user line that only returns tool results).
    pub fn text(&self) -> Option<String> {
        match self {
            Content::Text(text) => Some(text.clone()),
            Content::Array(items) => {
                let texts: Vec<&str> = items
                    .iter()
                    .filter(|item| item.item_type == "text")
                    .filter_map(|item| item.text.as_deref())
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join("\n"))
                }
            }
        }
    }
}

// --- Parsed records ---

/// A decoded transcript record.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRecord {
    UserPrompt(UserPrompt),
    ToolBatch(ToolBatch),
    /// Structurally valid line that is not deep-parsed (progress, snapshots,
    /// summaries, unknown future types, assistant turns without tool calls).
    Skipped { kind: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserPrompt {
    /// Prompt text after secret redaction.
    pub text: String,
    pub session_id: Option<String>,
    pub timestamp: Option<String>,
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolBatch {
    pub timestamp: Option<String>,
    pub calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolCall {
    /// The `command` argument of a Bash invocation.
    pub fn bash_command(&self) -> Option<&str> {
        if self.name != "Bash" {
            return None;
        }
        self.input.get("command").and_then(|v| v.as_str())
    }
}

impl SessionRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            SessionRecord::UserPrompt(_) => RecordKind::UserPrompt,
            SessionRecord::ToolBatch(_) => RecordKind::ToolBatch,
            SessionRecord::Skipped { .. } => RecordKind::Skipped,
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        match self {
            SessionRecord::UserPrompt(p) => p.timestamp.as_deref(),
            SessionRecord::ToolBatch(b) => b.timestamp.as_deref(),
            SessionRecord::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    UserPrompt,
    ToolBatch,
    Skipped,
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn parse_timestamp_millis(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Render epoch milliseconds as RFC 3339 (UTC). Out-of-range values yield `None`.
pub fn millis_to_rfc3339(ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_text_joins_text_blocks() {
        let content: Content = serde_json::from_str(
            r#"[{"type":"text","text":"a"},{"type":"tool_result","content":"x"},{"type":"text","text":"b"}]"#,
        )
        .unwrap();
        assert_eq!(content.text().as_deref(), Some("a\nb"));
    }

    #[test]
    fn content_without_text_blocks_has_no_text() {
        let content: Content =
            serde_json::from_str(r#"[{"type":"tool_result","content":"x"}]"#).unwrap();
        assert_eq!(content.text(), None);
    }

    #[test]
    fn timestamp_roundtrip_through_millis() {
        let ms = parse_timestamp_millis("2026-02-14T12:00:00+00:00").unwrap();
        assert_eq!(millis_to_rfc3339(ms).unwrap(), "2026-02-14T12:00:00+00:00");
    }

    #[test]
    fn bash_command_only_for_bash_tool() {
        let call = ToolCall {
            name: "Bash".into(),
            input: serde_json::json!({"command": "git status"}),
        };
        assert_eq!(call.bash_command(), Some("git status"));

        let read = ToolCall {
            name: "Read".into(),
            input: serde_json::json!({"command": "git status"}),
        };
        assert_eq!(read.bash_command(), None);
    }
}
