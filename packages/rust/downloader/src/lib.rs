//! Concurrent PDF downloader with primary/secondary fallback.
//!
//! This crate provides:
//! - [`Downloader`]: bounded worker pool, shared request throttle, manifest journal
//! - [`bibtex`]: `references.bib` for every paper on disk
//!
//! Re-running against the same output directory is idempotent: files already
//! present are reported as `skipped-duplicate` without any network traffic.

pub mod bibtex;
mod engine;
mod fetch;
mod throttle;

pub use engine::{
    BIBTEX_FILE, DownloadOutcome, DownloadSummary, Downloader, JOURNAL_FILE, MANIFEST_FILE, pdf_path,
};
pub use fetch::{FetchOutcome, PdfFetcher};
pub use throttle::Throttle;
