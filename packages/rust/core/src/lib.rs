//! Stage orchestration for paper-agent.
//!
//! This crate ties together crawling, filtering, downloading, and analysis
//! into the four stage entry points plus `run_all`, and the environment check.

pub mod env_check;
pub mod pipeline;

pub use env_check::{EnvReport, check};
pub use pipeline::{
    AllSummary, AnalysisSummary, CrawlSummary, DownloadStageSummary, FilterSummary,
    ProgressReporter, SilentProgress, run_all, run_all_with, run_analysis, run_analysis_with,
    run_crawl, run_download, run_filter,
};
