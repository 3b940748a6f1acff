//! OpenReview crawl engine.
//!
//! For each (conference, year) pair the engine resolves the venue id, looks
//! up the submission invitation, pages through its notes with
//! `offset`/`limit`, and normalizes every note through the API adapter.
//! A failing pair is retried with exponential backoff and then recorded in
//! the report; it never aborts the other pairs.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use paperagent_shared::{ApiVersion, CrawlerConfig, Decision, Paper, PaperAgentError, Result};

use crate::adapters::{self, ApiAdapter, NoteContext};
use crate::decision::DecisionClassifier;

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("paper-agent/", env!("CARGO_PKG_VERSION"));

/// First retry waits this long; each further retry doubles it.
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Outcome of one (conference, year) pair that completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairReport {
    pub conference: String,
    pub year: u32,
    pub venue_id: String,
    pub notes_fetched: usize,
    pub papers_kept: usize,
    pub attempts: u32,
}

/// A pair whose records were excluded from the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlFailure {
    pub conference: String,
    pub year: u32,
    pub venue_id: Option<String>,
    pub attempts: u32,
    pub error: String,
}

/// Written next to the Stage 1 artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlReport {
    pub api_version: ApiVersion,
    pub accepted_only: bool,
    pub pairs: Vec<PairReport>,
    pub failures: Vec<CrawlFailure>,
    /// Raw decision string → occurrences that matched no pattern.
    pub unmatched_decisions: BTreeMap<String, usize>,
    pub duplicates_dropped: usize,
    pub total_papers: usize,
}

/// Papers plus the report describing how they were gathered.
#[derive(Debug, Clone)]
pub struct CrawlOutput {
    pub papers: Vec<Paper>,
    pub report: CrawlReport,
}

/// Records from one pair, before cross-pair deduplication.
#[derive(Debug, Clone, Default)]
pub struct PairOutcome {
    pub venue_id: String,
    pub papers: Vec<Paper>,
    pub notes_fetched: usize,
    pub unmatched: BTreeMap<String, usize>,
}

#[derive(Debug, Deserialize)]
struct NotesPage {
    #[serde(default)]
    notes: Vec<Value>,
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GroupsPage {
    #[serde(default)]
    groups: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Sequential OpenReview crawler.
pub struct Crawler {
    config: CrawlerConfig,
    client: Client,
    adapter: Box<dyn ApiAdapter>,
    classifier: DecisionClassifier,
    page_delay: Duration,
    backoff: Duration,
}

impl Crawler {
    /// `page_delay` is the pause between consecutive API requests.
    pub fn new(config: &CrawlerConfig, page_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaperAgentError::Environment(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            classifier: DecisionClassifier::new(&config.decisions)?,
            adapter: adapters::adapter_for(config.api_version),
            config: config.clone(),
            client,
            page_delay,
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Override the base retry delay.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff = base;
        self
    }

    /// Crawl every (conference, year) pair. `on_pair` is called once per pair
    /// with the finished report or failure, in query order.
    #[instrument(skip_all, fields(api = self.adapter.name(), pairs = conferences.len() * years.len()))]
    pub async fn crawl(
        &self,
        conferences: &[String],
        years: &[u32],
        accepted_only: bool,
        mut on_pair: impl FnMut(std::result::Result<&PairReport, &CrawlFailure>),
    ) -> CrawlOutput {
        let mut report = CrawlReport {
            api_version: self.config.api_version,
            accepted_only,
            ..CrawlReport::default()
        };
        let mut papers = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut first = true;

        for conference in conferences {
            for &year in years {
                if !first {
                    tokio::time::sleep(self.page_delay).await;
                }
                first = false;

                let venue_id = self.config.venue_id(conference, year);
                let (result, attempts) = match &venue_id {
                    Some(id) => self.crawl_pair_with_retry(conference, year, id, accepted_only).await,
                    None => (
                        Err(PaperAgentError::config(format!("unknown conference '{conference}'"))),
                        0,
                    ),
                };

                match result {
                    Ok(outcome) => {
                        let mut kept = 0;
                        for paper in outcome.papers {
                            if seen.insert(paper.id.clone()) {
                                papers.push(paper);
                                kept += 1;
                            } else {
                                report.duplicates_dropped += 1;
                            }
                        }
                        for (status, count) in outcome.unmatched {
                            warn!(%conference, year, decision = %status, count, "decision matched no pattern");
                            *report.unmatched_decisions.entry(status).or_default() += count;
                        }
                        let pair = PairReport {
                            conference: conference.clone(),
                            year,
                            venue_id: outcome.venue_id,
                            notes_fetched: outcome.notes_fetched,
                            papers_kept: kept,
                            attempts,
                        };
                        info!(%conference, year, fetched = pair.notes_fetched, kept, "pair crawled");
                        on_pair(Ok(&pair));
                        report.pairs.push(pair);
                    }
                    Err(e) => {
                        warn!(%conference, year, attempts, error = %e, "pair failed; excluding its records");
                        let failure = CrawlFailure {
                            conference: conference.clone(),
                            year,
                            venue_id,
                            attempts,
                            error: e.to_string(),
                        };
                        on_pair(Err(&failure));
                        report.failures.push(failure);
                    }
                }
            }
        }

        report.total_papers = papers.len();
        CrawlOutput { papers, report }
    }

    async fn crawl_pair_with_retry(
        &self,
        conference: &str,
        year: u32,
        venue_id: &str,
        accepted_only: bool,
    ) -> (Result<PairOutcome>, u32) {
        let max = self.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.crawl_pair(conference, year, venue_id, accepted_only).await {
                Ok(outcome) => return (Ok(outcome), attempt),
                Err(e) if e.is_retryable() && attempt < max => {
                    let wait = self.backoff * 2u32.pow(attempt - 1);
                    warn!(%venue_id, attempt, ?wait, error = %e, "pair failed, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    /// Fetch and normalize every note of one venue.
    #[instrument(skip(self, accepted_only), fields(api = self.adapter.name()))]
    pub async fn crawl_pair(
        &self,
        conference: &str,
        year: u32,
        venue_id: &str,
        accepted_only: bool,
    ) -> Result<PairOutcome> {
        let submission = self.submission_name(venue_id).await?;
        let invitation = format!("{venue_id}/-/{submission}");
        let ctx = NoteContext {
            conference,
            year,
            venue_id,
            site_base_url: &self.config.site_base_url,
        };

        let mut outcome = PairOutcome {
            venue_id: venue_id.to_string(),
            ..PairOutcome::default()
        };
        let limit = self.config.page_size as usize;
        let mut offset = 0usize;

        loop {
            tokio::time::sleep(self.page_delay).await;
            let page = self.fetch_notes(&invitation, offset).await?;
            let received = page.notes.len();
            outcome.notes_fetched += received;
            debug!(%invitation, offset, received, count = ?page.count, "notes page");

            for note in &page.notes {
                let Some((paper, class)) =
                    adapters::normalize_note(self.adapter.as_ref(), note, &ctx, &self.classifier)
                else {
                    continue;
                };
                if class.unmatched {
                    if let Some(raw) = &paper.venue_status {
                        *outcome.unmatched.entry(raw.clone()).or_default() += 1;
                    }
                }
                if self.keep(paper.decision, accepted_only) {
                    outcome.papers.push(paper);
                }
            }

            offset += received;
            let exhausted = page.count.is_some_and(|count| offset >= count);
            if received < limit || exhausted {
                break;
            }
        }

        Ok(outcome)
    }

    fn keep(&self, decision: Decision, accepted_only: bool) -> bool {
        !accepted_only
            || decision == Decision::Accepted
            || (decision == Decision::Unknown && self.config.keep_unknown_decisions)
    }

    /// The venue's submission invitation name, falling back to the default
    /// when the group cannot be read.
    async fn submission_name(&self, venue_id: &str) -> Result<String> {
        let url = self.endpoint("groups", &[("id", venue_id)])?;
        match self.get_json::<GroupsPage>(url).await {
            Ok(page) => Ok(page
                .groups
                .first()
                .map(|group| self.adapter.submission_name(group))
                .unwrap_or_else(|| adapters::DEFAULT_SUBMISSION_NAME.to_string())),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                warn!(%venue_id, error = %e, "venue group unavailable, using default submission name");
                Ok(adapters::DEFAULT_SUBMISSION_NAME.to_string())
            }
        }
    }

    async fn fetch_notes(&self, invitation: &str, offset: usize) -> Result<NotesPage> {
        let offset = offset.to_string();
        let limit = self.config.page_size.to_string();
        let url = self.endpoint(
            "notes",
            &[
                ("invitation", invitation),
                ("offset", offset.as_str()),
                ("limit", limit.as_str()),
            ],
        )?;
        self.get_json(url).await
    }

    fn endpoint(&self, resource: &str, query: &[(&str, &str)]) -> Result<Url> {
        let base = self.config.api_base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{resource}"))
            .map_err(|e| PaperAgentError::config(format!("invalid crawler.api_base_url: {e}")))?;
        url.query_pairs_mut().extend_pairs(query.iter().copied());
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            let msg = format!("{url}: {e}");
            if e.is_timeout() || e.is_connect() {
                PaperAgentError::retryable(msg)
            } else {
                PaperAgentError::upstream(msg)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&url, status));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PaperAgentError::parse(format!("{url}: {e}")))
    }
}

fn status_error(url: &Url, status: StatusCode) -> PaperAgentError {
    let msg = format!("{url}: HTTP {status}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        PaperAgentError::retryable(msg)
    } else {
        PaperAgentError::upstream(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn note(id: &str, title: &str, venue: &str) -> Value {
        json!({
            "id": id,
            "forum": id,
            "content": {
                "title": {"value": title},
                "abstract": {"value": "An abstract."},
                "authors": {"value": ["Ada Lovelace"]},
                "venue": {"value": venue},
                "pdf": {"value": format!("/pdf/{id}.pdf")}
            }
        })
    }

    fn config(server: &MockServer) -> CrawlerConfig {
        CrawlerConfig {
            api_base_url: server.uri(),
            page_size: 2,
            max_retries: 2,
            ..CrawlerConfig::default()
        }
    }

    fn crawler(config: &CrawlerConfig) -> Crawler {
        Crawler::new(config, Duration::ZERO)
            .unwrap()
            .with_backoff(Duration::from_millis(1))
    }

    async fn mount_groups(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"groups": []})))
            .mount(server)
            .await;
    }

    async fn mount_notes(server: &MockServer, invitation: &str, offset: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path("/notes"))
            .and(query_param("invitation", invitation))
            .and(query_param("offset", offset))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn pages_and_classifies() {
        let server = MockServer::start().await;
        mount_groups(&server).await;
        let inv = "ICLR.cc/2024/Conference/-/Submission";
        mount_notes(
            &server,
            inv,
            "0",
            json!({"notes": [note("n1", "A", "ICLR 2024 poster"), note("n2", "B", "Rejected")], "count": 3}),
        )
        .await;
        mount_notes(
            &server,
            inv,
            "2",
            json!({"notes": [note("n3", "C", "Submitted to ICLR 2024")], "count": 3}),
        )
        .await;

        let cfg = config(&server);
        let out = crawler(&cfg)
            .crawl(&["ICLR".into()], &[2024], true, |_| {})
            .await;

        let ids: Vec<_> = out.papers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["n1"]);
        assert_eq!(out.report.pairs[0].notes_fetched, 3);
        assert_eq!(out.report.unmatched_decisions["Submitted to ICLR 2024"], 1);
        assert!(out.report.failures.is_empty());
        assert_eq!(
            out.papers[0].pdf_url_primary.as_deref(),
            Some("https://openreview.net/pdf/n1.pdf")
        );
    }

    #[tokio::test]
    async fn keeps_everything_without_accepted_only() {
        let server = MockServer::start().await;
        mount_groups(&server).await;
        mount_notes(
            &server,
            "ICLR.cc/2024/Conference/-/Submission",
            "0",
            json!({"notes": [note("n1", "A", "ICLR 2024 poster"), note("n2", "B", "Rejected")]}),
        )
        .await;
        let mut cfg = config(&server);
        cfg.page_size = 10;

        let out = crawler(&cfg)
            .crawl(&["ICLR".into()], &[2024], false, |_| {})
            .await;
        assert_eq!(out.papers.len(), 2);
        assert_eq!(out.papers[1].decision, Decision::Rejected);
    }

    #[tokio::test]
    async fn keep_unknown_decisions_option() {
        let server = MockServer::start().await;
        mount_groups(&server).await;
        mount_notes(
            &server,
            "ICLR.cc/2024/Conference/-/Submission",
            "0",
            json!({"notes": [note("n1", "A", "Under review")]}),
        )
        .await;
        let mut cfg = config(&server);
        cfg.keep_unknown_decisions = true;

        let out = crawler(&cfg)
            .crawl(&["ICLR".into()], &[2024], true, |_| {})
            .await;
        assert_eq!(out.papers.len(), 1);
        assert_eq!(out.papers[0].decision, Decision::Unknown);
    }

    #[tokio::test]
    async fn failing_pair_does_not_abort_others() {
        let server = MockServer::start().await;
        mount_groups(&server).await;
        mount_notes(
            &server,
            "ICLR.cc/2024/Conference/-/Submission",
            "0",
            json!({"notes": [note("n1", "A", "ICLR 2024 oral")]}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/notes"))
            .and(query_param("invitation", "ICLR.cc/2023/Conference/-/Submission"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let cfg = config(&server);
        let mut seen_failures = 0;
        let out = crawler(&cfg)
            .crawl(&["ICLR".into()], &[2023, 2024], true, |r| {
                if r.is_err() {
                    seen_failures += 1;
                }
            })
            .await;

        assert_eq!(seen_failures, 1);
        assert_eq!(out.report.failures.len(), 1);
        assert_eq!(out.report.failures[0].year, 2023);
        assert_eq!(out.report.failures[0].attempts, 2);
        assert_eq!(out.papers.len(), 1);
        assert_eq!(out.papers[0].id, "n1");
    }

    #[tokio::test]
    async fn pair_failing_after_pages_keeps_other_pairs() {
        let server = MockServer::start().await;
        mount_groups(&server).await;
        mount_notes(
            &server,
            "ICLR.cc/2024/Conference/-/Submission",
            "0",
            json!({"notes": [note("a1", "A", "ICLR 2024 oral")], "count": 1}),
        )
        .await;

        // 2023: first page succeeds, the second keeps failing.
        let inv_2023 = "ICLR.cc/2023/Conference/-/Submission";
        Mock::given(method("GET"))
            .and(path("/notes"))
            .and(query_param("invitation", inv_2023))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "notes": [note("b1", "B1", "ICLR 2023 poster"), note("b2", "B2", "ICLR 2023 poster")],
                "count": 4
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/notes"))
            .and(query_param("invitation", inv_2023))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        mount_notes(
            &server,
            "ICLR.cc/2025/Conference/-/Submission",
            "0",
            json!({"notes": [note("c1", "C", "ICLR 2025 spotlight")], "count": 1}),
        )
        .await;

        let cfg = config(&server);
        let out = crawler(&cfg)
            .crawl(&["ICLR".into()], &[2024, 2023, 2025], true, |_| {})
            .await;

        let ids: Vec<_> = out.papers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["a1", "c1"]);
        let done: Vec<_> = out.report.pairs.iter().map(|p| p.year).collect();
        assert_eq!(done, [2024, 2025]);
        assert_eq!(out.report.failures.len(), 1);
        assert_eq!(out.report.failures[0].year, 2023);
        assert_eq!(out.report.failures[0].attempts, 2);
        assert!(out.report.failures[0].error.contains("502"));
        assert_eq!(out.report.total_papers, 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_not_retried() {
        let server = MockServer::start().await;
        mount_groups(&server).await;
        Mock::given(method("GET"))
            .and(path("/notes"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = config(&server);
        let out = crawler(&cfg)
            .crawl(&["ICLR".into()], &[2024], true, |_| {})
            .await;
        assert_eq!(out.report.failures[0].attempts, 1);
        assert!(out.papers.is_empty());
    }

    #[tokio::test]
    async fn duplicates_across_pairs_dropped() {
        let server = MockServer::start().await;
        mount_groups(&server).await;
        for inv in [
            "ICLR.cc/2024/Conference/-/Submission",
            "NeurIPS.cc/2024/Conference/-/Submission",
        ] {
            mount_notes(
                &server,
                inv,
                "0",
                json!({"notes": [note("same", "A", "poster")]}),
            )
            .await;
        }

        let cfg = config(&server);
        let out = crawler(&cfg)
            .crawl(&["ICLR".into(), "NeurIPS".into()], &[2024], true, |_| {})
            .await;
        assert_eq!(out.papers.len(), 1);
        assert_eq!(out.papers[0].conference, "ICLR");
        assert_eq!(out.report.duplicates_dropped, 1);
    }

    #[tokio::test]
    async fn uses_published_submission_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/groups"))
            .and(query_param("id", "ICML.cc/2024/Conference"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "groups": [{"id": "ICML.cc/2024/Conference", "content": {"submission_name": {"value": "Blind_Submission"}}}]
            })))
            .mount(&server)
            .await;
        mount_notes(
            &server,
            "ICML.cc/2024/Conference/-/Blind_Submission",
            "0",
            json!({"notes": [note("m1", "A", "ICML 2024 Spotlight")]}),
        )
        .await;

        let cfg = config(&server);
        let out = crawler(&cfg)
            .crawl(&["ICML".into()], &[2024], true, |_| {})
            .await;
        assert_eq!(out.papers.len(), 1);
        assert_eq!(out.papers[0].venue_id, "ICML.cc/2024/Conference");
    }

    #[tokio::test]
    async fn v1_notes_are_unwrapped() {
        let server = MockServer::start().await;
        mount_groups(&server).await;
        mount_notes(
            &server,
            "ICLR.cc/2020/Conference/-/Submission",
            "0",
            json!({"notes": [{
                "id": "old1",
                "content": {"title": "Old paper", "venue": "ICLR 2020 Poster", "pdf": "/pdf/old1.pdf"}
            }]}),
        )
        .await;
        let mut cfg = config(&server);
        cfg.api_version = ApiVersion::V1;

        let out = crawler(&cfg)
            .crawl(&["ICLR".into()], &[2020], true, |_| {})
            .await;
        assert_eq!(out.papers.len(), 1);
        assert_eq!(out.papers[0].title, "Old paper");
        assert_eq!(out.report.api_version, ApiVersion::V1);
    }
}
