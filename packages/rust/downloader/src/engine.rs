//! Download worker pool.
//!
//! Each paper moves through `pending → primary → (done | secondary) → (done | failed)`.
//! Workers run under a semaphore and send finished entries over a channel to
//! a single collector, which journals them to `manifest.jsonl` as they arrive.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, instrument, warn};

use paperagent_arxiv::ArxivClient;
use paperagent_artifacts::{Journal, sanitize_file_stem, write_json, write_text};
use paperagent_shared::{
    DownloadConfig, DownloadStatus, ManifestEntry, Paper, PaperAgentError, Result, SourceUsed,
};

use crate::bibtex;
use crate::fetch::PdfFetcher;
use crate::throttle::Throttle;

/// User-Agent string for PDF requests.
const USER_AGENT: &str = concat!("paper-agent/", env!("CARGO_PKG_VERSION"));

const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

pub const MANIFEST_FILE: &str = "manifest.json";
pub const JOURNAL_FILE: &str = "manifest.jsonl";
pub const BIBTEX_FILE: &str = "references.bib";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadSummary {
    pub total: usize,
    pub downloaded: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub from_primary: usize,
    pub from_secondary: usize,
    /// `failed / total`, 0 for an empty batch.
    pub failure_rate: f64,
}

impl DownloadSummary {
    fn from_manifest(entries: &[ManifestEntry]) -> Self {
        let mut s = Self {
            total: entries.len(),
            ..Self::default()
        };
        for e in entries {
            match e.status {
                DownloadStatus::Downloaded => s.downloaded += 1,
                DownloadStatus::SkippedDuplicate => s.skipped_duplicate += 1,
                DownloadStatus::Failed => s.failed += 1,
            }
            match e.source_used {
                SourceUsed::Primary => s.from_primary += 1,
                SourceUsed::Secondary => s.from_secondary += 1,
                SourceUsed::None => {}
            }
        }
        if s.total > 0 {
            s.failure_rate = s.failed as f64 / s.total as f64;
        }
        s
    }

    /// Whether the failure rate is above `max_rate` (never, when unset).
    pub fn exceeds(&self, max_rate: Option<f64>) -> bool {
        max_rate.is_some_and(|max| self.failure_rate > max)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Sorted by `paper_id`.
    pub manifest: Vec<ManifestEntry>,
    pub summary: DownloadSummary,
    pub manifest_path: PathBuf,
    pub bibtex_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

pub struct Downloader {
    config: DownloadConfig,
    workers: usize,
    client: Client,
    throttle: Arc<Throttle>,
    backoff: Duration,
}

impl Downloader {
    /// `delay` spaces request starts across all workers.
    pub fn new(config: &DownloadConfig, workers: usize, delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaperAgentError::Environment(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config: config.clone(),
            workers: workers.max(1),
            client,
            throttle: Arc::new(Throttle::new(delay)),
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Override the base retry delay.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff = base;
        self
    }

    /// Download every paper into `output_dir` and write the manifest files.
    ///
    /// Per-paper failures are recorded in the manifest, never returned.
    #[instrument(skip_all, fields(papers = papers.len(), workers = self.workers, output_dir = %output_dir.display()))]
    pub async fn download(
        &self,
        papers: Vec<Paper>,
        output_dir: &Path,
        mut on_entry: impl FnMut(&ManifestEntry),
    ) -> Result<DownloadOutcome> {
        std::fs::create_dir_all(output_dir).map_err(|e| PaperAgentError::io(output_dir, e))?;

        let mut seen = HashSet::new();
        let papers: Vec<Paper> = papers
            .into_iter()
            .filter(|p| {
                let fresh = seen.insert(p.id.clone());
                if !fresh {
                    warn!(id = %p.id, "duplicate paper id in input, ignoring repeat");
                }
                fresh
            })
            .collect();

        let worker = Arc::new(Worker {
            fetcher: PdfFetcher::new(
                self.client.clone(),
                self.throttle.clone(),
                self.config.max_retries,
                self.backoff,
            ),
            arxiv: ArxivClient::new(
                &self.config.arxiv_api_url,
                &self.config.arxiv_pdf_base,
                Duration::from_secs(self.config.timeout_secs),
            )?,
            throttle: self.throttle.clone(),
            config: self.config.clone(),
            output_dir: output_dir.to_path_buf(),
        });

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::channel::<ManifestEntry>(self.workers * 2);
        let mut handles = Vec::with_capacity(papers.len());

        for paper in papers.iter().cloned() {
            let worker = worker.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let entry = worker.process(&paper).await;
                let _ = tx.send(entry).await;
            }));
        }
        drop(tx);

        let mut journal = Journal::open(&output_dir.join(JOURNAL_FILE))?;
        let mut manifest = Vec::with_capacity(papers.len());
        while let Some(entry) = rx.recv().await {
            journal.append(&entry)?;
            on_entry(&entry);
            manifest.push(entry);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "download task aborted");
            }
        }

        // A task that died before reporting still gets a terminal entry.
        let reported: HashSet<&str> = manifest.iter().map(|e| e.paper_id.as_str()).collect();
        let missing: Vec<ManifestEntry> = papers
            .iter()
            .filter(|p| !reported.contains(p.id.as_str()))
            .map(|p| ManifestEntry {
                paper_id: p.id.clone(),
                status: DownloadStatus::Failed,
                source_used: SourceUsed::None,
                local_path: None,
                attempts: 0,
                last_error: Some("download task aborted".into()),
            })
            .collect();
        for entry in missing {
            journal.append(&entry)?;
            on_entry(&entry);
            manifest.push(entry);
        }

        manifest.sort_by(|a, b| a.paper_id.cmp(&b.paper_id));

        let manifest_path = output_dir.join(MANIFEST_FILE);
        write_json(&manifest_path, &manifest)?;

        let by_id: HashMap<&str, &Paper> = papers.iter().map(|p| (p.id.as_str(), p)).collect();
        let on_disk: Vec<&Paper> = manifest
            .iter()
            .filter(|e| e.status != DownloadStatus::Failed)
            .filter_map(|e| by_id.get(e.paper_id.as_str()).copied())
            .collect();
        let bibtex_path = output_dir.join(BIBTEX_FILE);
        write_text(&bibtex_path, &bibtex::render(&on_disk))?;

        let summary = DownloadSummary::from_manifest(&manifest);
        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped_duplicate,
            failed = summary.failed,
            "download complete"
        );

        Ok(DownloadOutcome {
            manifest,
            summary,
            manifest_path,
            bibtex_path,
        })
    }
}

/// Local file for a paper: `<output_dir>/<sanitized id>.pdf`.
pub fn pdf_path(output_dir: &Path, paper_id: &str) -> PathBuf {
    output_dir.join(format!("{}.pdf", sanitize_file_stem(paper_id)))
}

/// `local_path` as recorded in the manifest: relative to the manifest's own
/// directory, so the manifest stays valid from any working directory.
fn manifest_local_path(target: &Path) -> String {
    target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| target.display().to_string())
}

// ---------------------------------------------------------------------------
// Per-paper state machine
// ---------------------------------------------------------------------------

struct Worker {
    fetcher: PdfFetcher,
    arxiv: ArxivClient,
    throttle: Arc<Throttle>,
    config: DownloadConfig,
    output_dir: PathBuf,
}

impl Worker {
    async fn process(&self, paper: &Paper) -> ManifestEntry {
        let target = pdf_path(&self.output_dir, &paper.id);
        let mut entry = ManifestEntry {
            paper_id: paper.id.clone(),
            status: DownloadStatus::Failed,
            source_used: SourceUsed::None,
            local_path: None,
            attempts: 0,
            last_error: None,
        };

        if target.exists() {
            debug!(id = %paper.id, "already on disk");
            entry.status = DownloadStatus::SkippedDuplicate;
            entry.local_path = Some(manifest_local_path(&target));
            return entry;
        }

        if let Some(url) = paper.pdf_url_primary.as_deref() {
            let out = self.fetcher.fetch(url, &target).await;
            entry.attempts += out.attempts;
            match out.result {
                Ok(()) => return self.finish(entry, SourceUsed::Primary, &target),
                Err(e) => {
                    debug!(id = %paper.id, error = %e, "primary source failed");
                    entry.last_error = Some(e.to_string());
                }
            }
        }

        match self.secondary_url(paper).await {
            Ok(Some(url)) => {
                let out = self.fetcher.fetch(&url, &target).await;
                entry.attempts += out.attempts;
                match out.result {
                    Ok(()) => return self.finish(entry, SourceUsed::Secondary, &target),
                    Err(e) => entry.last_error = Some(e.to_string()),
                }
            }
            Ok(None) => {
                if entry.last_error.is_none() {
                    entry.last_error = Some("no PDF source available".into());
                }
            }
            Err(e) => {
                entry.last_error = Some(match entry.last_error.take() {
                    Some(prev) => format!("{prev}; arXiv lookup: {e}"),
                    None => format!("arXiv lookup: {e}"),
                });
            }
        }

        warn!(id = %paper.id, error = ?entry.last_error, "download failed");
        entry
    }

    fn finish(&self, mut entry: ManifestEntry, source: SourceUsed, target: &Path) -> ManifestEntry {
        entry.status = DownloadStatus::Downloaded;
        entry.source_used = source;
        entry.local_path = Some(manifest_local_path(target));
        entry.last_error = None;
        entry
    }

    /// Secondary location: explicit URL, then a known arXiv id, then a title search.
    async fn secondary_url(&self, paper: &Paper) -> Result<Option<String>> {
        if let Some(url) = paper.pdf_url_secondary.as_deref() {
            return Ok(Some(url.to_string()));
        }
        if let Some(id) = paper.external_ids.get("arxiv") {
            return Ok(Some(self.arxiv.pdf_url(id)));
        }
        if !self.config.arxiv_lookup || paper.title.trim().is_empty() {
            return Ok(None);
        }
        self.throttle.wait().await;
        self.arxiv
            .find_pdf_by_title(&paper.title, self.config.title_similarity)
            .await
    }
}
