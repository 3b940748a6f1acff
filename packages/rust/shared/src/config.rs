//! Pipeline configuration for paper-agent.
//!
//! The whole run is described by one file (YAML, or TOML when the path ends
//! in `.toml`). It is parsed into [`PipelineConfig`], validated once, and the
//! resulting value is passed explicitly to every stage.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PaperAgentError, Result};

/// Conference short names understood without any `crawler.venues` entry.
const BUILTIN_VENUES: &[(&str, &str)] = &[
    ("ICLR", "ICLR.cc"),
    ("NeurIPS", "NeurIPS.cc"),
    ("ICML", "ICML.cc"),
    ("AAAI", "AAAI.org"),
];

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Top-level pipeline config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory for every stage artifact.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Conference short names (e.g. `ICLR`) or raw venue prefixes (e.g. `ICLR.cc`).
    #[serde(default = "default_conferences")]
    pub conferences: Vec<String>,

    #[serde(default = "default_years")]
    pub years: Vec<u32>,

    /// Free-text research topic, used in report headings.
    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub options: OptionsConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            conferences: default_conferences(),
            years: default_years(),
            topic: default_topic(),
            filter: FilterConfig::default(),
            options: OptionsConfig::default(),
            crawler: CrawlerConfig::default(),
            download: DownloadConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

fn default_output_dir() -> String {
    "./paper_research".into()
}
fn default_conferences() -> Vec<String> {
    vec!["ICLR".into()]
}
fn default_years() -> Vec<u32> {
    vec![2024]
}
fn default_topic() -> String {
    "Research".into()
}

/// Searchable text fields of a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Title,
    Abstract,
    Keywords,
}

/// `filter` section: the keyword include/exclude logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// OR of AND groups. Empty means every paper passes the include step.
    #[serde(default)]
    pub include_groups: Vec<Vec<String>>,

    /// Any match suppresses the paper.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_match_fields")]
    pub match_fields: Vec<MatchField>,

    #[serde(default)]
    pub case_sensitive: bool,

    #[serde(default)]
    pub whole_word: bool,

    /// Alternate spellings; a token is satisfied when it or any alternate matches.
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,

    /// Merge the built-in research vocabulary under `synonyms`.
    #[serde(default)]
    pub builtin_synonyms: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            include_groups: Vec::new(),
            exclude: Vec::new(),
            match_fields: default_match_fields(),
            case_sensitive: false,
            whole_word: false,
            synonyms: BTreeMap::new(),
            builtin_synonyms: false,
        }
    }
}

fn default_match_fields() -> Vec<MatchField> {
    vec![MatchField::Title, MatchField::Abstract]
}

/// `options` section: knobs shared by several stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsConfig {
    /// Worker pool size for download and analysis.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between outbound requests (crawler pages, downloads).
    #[serde(default = "default_delay")]
    pub delay: f64,

    #[serde(default = "default_true")]
    pub accepted_only: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            delay: default_delay(),
            accepted_only: true,
        }
    }
}

impl OptionsConfig {
    /// The inter-request delay as a `Duration`. Call after validation.
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.delay.max(0.0))
    }
}

fn default_workers() -> usize {
    4
}
fn default_delay() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

/// OpenReview API flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    V1,
    #[default]
    V2,
}

/// Regex pattern sets used to classify published decision strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPatterns {
    #[serde(default = "default_accept_patterns")]
    pub accept: Vec<String>,
    #[serde(default = "default_reject_patterns")]
    pub reject: Vec<String>,
}

impl Default for DecisionPatterns {
    fn default() -> Self {
        Self {
            accept: default_accept_patterns(),
            reject: default_reject_patterns(),
        }
    }
}

fn default_accept_patterns() -> Vec<String> {
    ["accept", "oral", "poster", "spotlight"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_reject_patterns() -> Vec<String> {
    ["reject", "withdraw", "desk"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `crawler` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default = "default_openreview_api")]
    pub api_base_url: String,

    #[serde(default)]
    pub api_version: ApiVersion,

    /// Base for relative `/pdf?id=` links.
    #[serde(default = "default_openreview_site")]
    pub site_base_url: String,

    /// Notes requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Attempts per (conference, year) pair before it is marked failed.
    #[serde(default = "default_crawl_retries")]
    pub max_retries: u32,

    #[serde(default = "default_crawl_timeout")]
    pub timeout_secs: u64,

    /// Extra conference → venue prefix mappings, checked before the built-ins.
    #[serde(default)]
    pub venues: BTreeMap<String, String>,

    #[serde(default)]
    pub decisions: DecisionPatterns,

    /// Keep records whose decision string matched no pattern when `accepted_only` is set.
    #[serde(default)]
    pub keep_unknown_decisions: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openreview_api(),
            api_version: ApiVersion::default(),
            site_base_url: default_openreview_site(),
            page_size: default_page_size(),
            max_retries: default_crawl_retries(),
            timeout_secs: default_crawl_timeout(),
            venues: BTreeMap::new(),
            decisions: DecisionPatterns::default(),
            keep_unknown_decisions: false,
        }
    }
}

impl CrawlerConfig {
    /// Resolve a conference name to its venue prefix (`ICLR` → `ICLR.cc`).
    ///
    /// Names containing a `.` are taken to already be prefixes.
    pub fn venue_prefix(&self, conference: &str) -> Option<String> {
        if conference.contains('.') {
            return Some(conference.trim_end_matches('/').to_string());
        }
        self.venues
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(BUILTIN_VENUES.iter().copied())
            .find(|(name, _)| name.eq_ignore_ascii_case(conference))
            .map(|(_, prefix)| prefix.to_string())
    }

    /// Full OpenReview venue id, e.g. `ICLR.cc/2024/Conference`.
    pub fn venue_id(&self, conference: &str, year: u32) -> Option<String> {
        self.venue_prefix(conference)
            .map(|prefix| format!("{prefix}/{year}/Conference"))
    }
}

fn default_openreview_api() -> String {
    "https://api2.openreview.net".into()
}
fn default_openreview_site() -> String {
    "https://openreview.net".into()
}
fn default_page_size() -> u32 {
    1000
}
fn default_crawl_retries() -> u32 {
    3
}
fn default_crawl_timeout() -> u64 {
    30
}

/// `download` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    /// Attempts per source for retryable failures.
    #[serde(default = "default_download_retries")]
    pub max_retries: u32,

    /// Search arXiv by title when no secondary URL is known.
    #[serde(default = "default_true")]
    pub arxiv_lookup: bool,

    #[serde(default = "default_arxiv_api")]
    pub arxiv_api_url: String,

    #[serde(default = "default_arxiv_pdf")]
    pub arxiv_pdf_base: String,

    /// Minimum title word-set similarity for accepting an arXiv search hit.
    #[serde(default = "default_title_similarity")]
    pub title_similarity: f64,

    /// Fail the stage when `failed / total` exceeds this. Unset means never.
    #[serde(default)]
    pub max_failure_rate: Option<f64>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout(),
            max_retries: default_download_retries(),
            arxiv_lookup: true,
            arxiv_api_url: default_arxiv_api(),
            arxiv_pdf_base: default_arxiv_pdf(),
            title_similarity: default_title_similarity(),
            max_failure_rate: None,
        }
    }
}

fn default_download_timeout() -> u64 {
    60
}
fn default_download_retries() -> u32 {
    2
}
fn default_arxiv_api() -> String {
    "http://export.arxiv.org/api/query".into()
}
fn default_arxiv_pdf() -> String {
    "https://arxiv.org/pdf".into()
}
fn default_title_similarity() -> f64 {
    0.6
}

/// PDF text extraction backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Built-in, pure Rust.
    #[default]
    Lopdf,
    /// Poppler's `pdftotext` binary, which must be on `PATH`.
    Pdftotext,
}

/// `analysis` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// OpenAI-compatible chat-completions base URL.
    #[serde(default = "default_llm_api")]
    pub api_base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    /// Characters of extracted text sent to the model.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Keys the model must return.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,

    #[serde(default)]
    pub extractor: ExtractorKind,

    /// Re-analyze papers that already have an `ok` result.
    #[serde(default)]
    pub overwrite: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_llm_api(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            max_input_chars: default_max_input_chars(),
            fields: default_fields(),
            extractor: ExtractorKind::default(),
            overwrite: false,
        }
    }
}

fn default_llm_api() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "stepfun/step-3.5-flash:free".into()
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_llm_retries() -> u32 {
    3
}
fn default_max_input_chars() -> usize {
    60_000
}
fn default_fields() -> Vec<String> {
    ["method", "contribution", "key_results", "limitations"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Derived paths & validation
// ---------------------------------------------------------------------------

impl PipelineConfig {
    /// `output_dir` with a leading `~/` expanded.
    pub fn output_root(&self) -> PathBuf {
        expand_home(&self.output_dir)
    }

    /// Stage 1 and 2 artifacts.
    pub fn data_dir(&self) -> PathBuf {
        self.output_root().join("data")
    }

    /// Default Stage 3 output.
    pub fn papers_dir(&self) -> PathBuf {
        self.output_root().join("papers")
    }

    /// Default Stage 4 output.
    pub fn analysis_dir(&self) -> PathBuf {
        self.output_root().join("analysis")
    }

    /// Check everything that would otherwise fail halfway through a stage.
    pub fn validate(&self) -> Result<()> {
        if self.conferences.is_empty() {
            return Err(PaperAgentError::config("`conferences` must not be empty"));
        }
        for conf in &self.conferences {
            if self.crawler.venue_prefix(conf).is_none() {
                return Err(PaperAgentError::config(format!(
                    "unknown conference '{conf}': add it under `crawler.venues`"
                )));
            }
        }
        if self.years.is_empty() {
            return Err(PaperAgentError::config("`years` must not be empty"));
        }
        if let Some(year) = self.years.iter().find(|y| !(1900..=2100).contains(*y)) {
            return Err(PaperAgentError::config(format!("implausible year {year}")));
        }
        if self.options.workers == 0 {
            return Err(PaperAgentError::config("`options.workers` must be at least 1"));
        }
        if !self.options.delay.is_finite() || self.options.delay < 0.0 {
            return Err(PaperAgentError::config(
                "`options.delay` must be a non-negative number of seconds",
            ));
        }

        self.validate_filter()?;

        if !(1..=1000).contains(&self.crawler.page_size) {
            return Err(PaperAgentError::config(
                "`crawler.page_size` must be between 1 and 1000",
            ));
        }
        if self.crawler.max_retries == 0 || self.download.max_retries == 0 {
            return Err(PaperAgentError::config("retry bounds must be at least 1"));
        }
        for pattern in self
            .crawler
            .decisions
            .accept
            .iter()
            .chain(&self.crawler.decisions.reject)
        {
            regex::Regex::new(pattern).map_err(|e| {
                PaperAgentError::config(format!("invalid decision pattern '{pattern}': {e}"))
            })?;
        }

        if !(0.0..=1.0).contains(&self.download.title_similarity) {
            return Err(PaperAgentError::config(
                "`download.title_similarity` must be within 0..=1",
            ));
        }
        if let Some(rate) = self.download.max_failure_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(PaperAgentError::config(
                    "`download.max_failure_rate` must be within 0..=1",
                ));
            }
        }

        if self.analysis.fields.is_empty() {
            return Err(PaperAgentError::config("`analysis.fields` must not be empty"));
        }
        let mut seen = HashSet::new();
        for field in &self.analysis.fields {
            if field.trim().is_empty() || !seen.insert(field.as_str()) {
                return Err(PaperAgentError::config(format!(
                    "`analysis.fields` has an empty or duplicate key '{field}'"
                )));
            }
        }
        if self.analysis.max_input_chars == 0 {
            return Err(PaperAgentError::config(
                "`analysis.max_input_chars` must be positive",
            ));
        }

        Ok(())
    }

    fn validate_filter(&self) -> Result<()> {
        let filter = &self.filter;
        if filter.match_fields.is_empty() {
            return Err(PaperAgentError::config("`filter.match_fields` must not be empty"));
        }
        for (i, group) in filter.include_groups.iter().enumerate() {
            if group.iter().all(|t| t.trim().is_empty()) {
                return Err(PaperAgentError::config(format!(
                    "`filter.include_groups[{i}]` has no non-empty keywords"
                )));
            }
        }
        Ok(())
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse config text. `toml` selects TOML, otherwise YAML.
pub fn parse_config(content: &str, toml: bool) -> Result<PipelineConfig> {
    let config: PipelineConfig = if toml {
        toml::from_str(content).map_err(|e| PaperAgentError::config(e.to_string()))?
    } else {
        serde_yaml::from_str(content).map_err(|e| PaperAgentError::config(e.to_string()))?
    };
    config.validate()?;
    Ok(config)
}

/// Load and validate the pipeline config at `path`.
pub fn load_config_from(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        return Err(PaperAgentError::config(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path).map_err(|e| PaperAgentError::io(path, e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");

    let config = parse_config(&content, is_toml).map_err(|e| match e {
        PaperAgentError::Config { message } => {
            PaperAgentError::config(format!("{}: {message}", path.display()))
        }
        other => other,
    })?;
    tracing::debug!(?path, "config loaded");
    Ok(config)
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// The API key: explicit value first, then the configured env var.
pub fn resolve_api_key(config: &AnalysisConfig, explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(&config.api_key_env).ok())
        .filter(|k| !k.trim().is_empty())
}

/// Require an API key, or fail with an environment error naming the variable.
pub fn require_api_key(config: &AnalysisConfig, explicit: Option<&str>) -> Result<String> {
    resolve_api_key(config, explicit).ok_or_else(|| {
        PaperAgentError::Environment(format!(
            "API key not found. Pass --api-key or set the {} environment variable.",
            config.api_key_env
        ))
    })
}

/// Mask a secret for display: `sk-or-v1...abcd`.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "***".into()
    }
}
