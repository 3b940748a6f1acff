//! Shared types, error model, and configuration for paper-agent.
//!
//! This crate is the foundation depended on by all other paper-agent crates.
//! It provides:
//! - [`PaperAgentError`], the unified error type
//! - Stage records ([`Paper`], [`ManifestEntry`], [`AnalysisRecord`])
//! - Configuration ([`PipelineConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnalysisConfig, ApiVersion, CrawlerConfig, DecisionPatterns, DownloadConfig, ExtractorKind,
    FilterConfig, MatchField, OptionsConfig, PipelineConfig, load_config_from, mask_api_key,
    parse_config, require_api_key, resolve_api_key,
};
pub use error::{PaperAgentError, Result};
pub use types::{
    AnalysisRecord, AnalysisStatus, Decision, DownloadStatus, ManifestEntry, Paper, SourceUsed,
};
