pub mod aggregate;
pub mod analyzers;
pub mod catalog;
pub mod cluster;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod draft;
pub mod embedding;
pub mod parsers;
pub mod prompts;
pub mod ranker;
pub mod scanner;
pub mod scoring;
pub mod state;
pub mod types;

pub use discovery::{DiscoveryPipeline, DiscoveryReport};
