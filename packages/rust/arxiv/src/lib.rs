//! arXiv as a secondary PDF source.
//!
//! Two ways to reach an arXiv copy of a paper:
//! - an arXiv id already mentioned in its metadata ([`extract_arxiv_id`])
//! - a title search against the export API ([`ArxivClient::find_pdf_by_title`]),
//!   accepted only when the word-set similarity clears a threshold

mod parser;

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use paperagent_shared::{PaperAgentError, Result};

pub use parser::{ArxivEntry, parse_atom};

/// User-Agent string for arXiv requests.
const USER_AGENT: &str = concat!("paper-agent/", env!("CARGO_PKG_VERSION"));

/// Search hits inspected per title query.
const SEARCH_RESULTS: usize = 3;

/// Title characters sent in a search query.
const MAX_QUERY_CHARS: usize = 200;

pub const DEFAULT_PDF_BASE: &str = "https://arxiv.org/pdf";

/// New-style ids (`2401.01234`), optionally versioned, in URLs or `arXiv:` citations.
static ARXIV_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:arxiv\.org/(?:abs|pdf)/|arxiv:\s*)(\d{4}\.\d{4,5})(?:v\d+)?")
        .expect("arxiv id regex")
});

/// A bare versioned id, as found in Atom `<id>` URLs.
static BARE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}\.\d{4,5})(?:v\d+)?").expect("bare id regex"));

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// First arXiv id referenced in `text`, without version suffix.
pub fn extract_arxiv_id(text: &str) -> Option<String> {
    ARXIV_ID_RE
        .captures(text)
        .or_else(|| {
            text.contains("arxiv.org")
                .then(|| BARE_ID_RE.captures(text))
                .flatten()
        })
        .map(|c| c[1].to_string())
}

/// PDF location for an id under `base` (e.g. `https://arxiv.org/pdf`).
pub fn pdf_url(base: &str, id: &str) -> String {
    format!("{}/{id}", base.trim_end_matches('/'))
}

/// Jaccard similarity of the lower-cased word sets of two titles.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        s.split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    };
    let (wa, wb) = (words(a), words(b));
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let inter = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    inter as f64 / union as f64
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Thin client for the arXiv export API.
#[derive(Debug, Clone)]
pub struct ArxivClient {
    client: Client,
    api_url: String,
    pdf_base: String,
}

impl ArxivClient {
    pub fn new(api_url: &str, pdf_base: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| PaperAgentError::Environment(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            pdf_base: pdf_base.to_string(),
        })
    }

    /// PDF URL for a known id under this client's base.
    pub fn pdf_url(&self, id: &str) -> String {
        pdf_url(&self.pdf_base, id)
    }

    /// Title search (`ti:` field). Returns hits in feed order.
    #[instrument(skip_all, fields(title = %title))]
    pub async fn search_by_title(&self, title: &str) -> Result<Vec<ArxivEntry>> {
        let query: String = title
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(MAX_QUERY_CHARS)
            .collect();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = Url::parse(&self.api_url)
            .map_err(|e| PaperAgentError::config(format!("invalid arXiv API URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("search_query", &format!("ti:\"{query}\""))
            .append_pair("max_results", &SEARCH_RESULTS.to_string());

        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            let msg = format!("arXiv search: {e}");
            if e.is_timeout() || e.is_connect() {
                PaperAgentError::retryable(msg)
            } else {
                PaperAgentError::upstream(msg)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let msg = format!("arXiv search: HTTP {status}");
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                PaperAgentError::retryable(msg)
            } else {
                PaperAgentError::upstream(msg)
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| PaperAgentError::upstream(format!("arXiv search body: {e}")))?;
        parse_atom(&body)
    }

    /// PDF URL of the first hit whose title similarity exceeds `threshold`.
    pub async fn find_pdf_by_title(&self, title: &str, threshold: f64) -> Result<Option<String>> {
        let hits = self.search_by_title(title).await?;
        let found = hits.into_iter().find(|hit| {
            let score = title_similarity(&hit.title, title);
            debug!(candidate = %hit.title, score, "arXiv title candidate");
            score > threshold
        });
        Ok(found.map(|hit| hit.pdf_url.unwrap_or_else(|| self.pdf_url(&hit.id))))
    }
}
