pub mod bash;
pub mod features;
pub mod sequence;

pub use bash::{classify_command, extract_bash_patterns, normalize_command, BashCategory, BashPattern};
pub use features::{FeatureCollector, SessionFeatures};
pub use sequence::{build_tool_sequence, extract_ngrams};
