//! OpenReview crawler, API adapters, and decision classification.
//!
//! This crate provides:
//! - [`adapters`]: per-API-version note schemas and normalization into [`Paper`]
//! - [`DecisionClassifier`]: configurable accept/reject pattern sets
//! - [`engine`]: the paged, retrying crawl over (conference, year) pairs
//!
//! [`Paper`]: paperagent_shared::Paper

pub mod adapters;
pub mod decision;
pub mod engine;

pub use adapters::{ApiAdapter, NoteContext, V1Adapter, V2Adapter, adapter_for, normalize_note};
pub use decision::{Classification, DecisionClassifier};
pub use engine::{CrawlFailure, CrawlOutput, CrawlReport, Crawler, PairOutcome, PairReport};
