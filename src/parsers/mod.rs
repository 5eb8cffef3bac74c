pub mod prompt_filter;
pub mod redact;
pub mod session;

pub use prompt_filter::{is_system_meta_message, strip_system_reminders};
pub use redact::redact_secrets;
pub use session::{list_sessions, list_transcripts, parse_line, stream_session, SessionStream, TranscriptFile};
