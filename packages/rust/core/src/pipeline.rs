//! Stage entry points: crawl → filter → download → analyze.
//!
//! Every stage takes the explicit [`PipelineConfig`], reads its input from a
//! file, writes its output to files, and returns a serializable summary that
//! the CLI prints as one JSON line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use paperagent_analyzer::{
    Analyzer, ChatClient, ReasoningService, collect_inputs, required_tools,
};
use paperagent_artifacts::{
    artifact_name, query_fingerprint, read_papers, sidecar_path, write_json,
};
use paperagent_crawler::{CrawlReport, Crawler};
use paperagent_downloader::{DownloadSummary, Downloader, MANIFEST_FILE};
use paperagent_filter::{FilterStatistics, filter_papers};
use paperagent_shared::{
    AnalysisStatus, DownloadStatus, PaperAgentError, PipelineConfig, Result, require_api_key,
};

use crate::env_check::ensure_tools;

pub const CRAWL_PREFIX: &str = "all_papers";
pub const FILTER_PREFIX: &str = "filtered_papers";

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting stage status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage or phase.
    fn phase(&self, name: &str);
    /// Called once the number of work items is known.
    fn begin(&self, total: usize);
    /// Called when one item finishes.
    fn item(&self, label: &str, ok: bool);
    /// Called when the current phase completes.
    fn finish(&self);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn begin(&self, _total: usize) {}
    fn item(&self, _label: &str, _ok: bool) {}
    fn finish(&self) {}
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub stage: &'static str,
    pub artifact: PathBuf,
    pub report: PathBuf,
    pub total_papers: usize,
    pub pairs_ok: usize,
    pub pairs_failed: usize,
    pub unmatched_decisions: usize,
    pub duplicates_dropped: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterSummary {
    pub stage: &'static str,
    pub input: PathBuf,
    pub artifact: PathBuf,
    pub summary: PathBuf,
    pub total: usize,
    pub kept: usize,
    pub discarded: usize,
    pub pass_rate: f64,
}

/// Written next to the Stage 2 artifact.
#[derive(Serialize)]
struct FilterSidecar<'a> {
    input: &'a Path,
    fingerprint: &'a str,
    filter: &'a paperagent_shared::FilterConfig,
    statistics: &'a FilterStatistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadStageSummary {
    pub stage: &'static str,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub manifest: PathBuf,
    pub bibtex: PathBuf,
    #[serde(flatten)]
    pub counts: DownloadSummary,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub stage: &'static str,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub analysis: PathBuf,
    pub report: PathBuf,
    pub model: String,
    pub total: usize,
    pub ok: usize,
    pub parse_errors: usize,
    pub api_errors: usize,
    pub reused: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllSummary {
    pub stage: &'static str,
    pub crawl: CrawlSummary,
    pub filter: FilterSummary,
    pub download: DownloadStageSummary,
    pub analysis: AnalysisSummary,
}

// ---------------------------------------------------------------------------
// Stage 1: crawl
// ---------------------------------------------------------------------------

/// Crawl every configured (conference, year) pair into `<data_dir>/all_papers_*.json`.
#[instrument(skip_all, fields(conferences = ?config.conferences, years = ?config.years))]
pub async fn run_crawl(
    config: &PipelineConfig,
    progress: &dyn ProgressReporter,
) -> Result<CrawlSummary> {
    config.validate()?;
    let start = Instant::now();
    let accepted_only = config.options.accepted_only;

    progress.phase("Crawling OpenReview");
    progress.begin(config.conferences.len() * config.years.len());

    let crawler = Crawler::new(&config.crawler, config.options.delay())?;
    let output = crawler
        .crawl(&config.conferences, &config.years, accepted_only, |pair| match pair {
            Ok(p) => progress.item(&format!("{} {}", p.conference, p.year), true),
            Err(f) => progress.item(&format!("{} {}", f.conference, f.year), false),
        })
        .await;
    progress.finish();

    let report: &CrawlReport = &output.report;
    if report.pairs.is_empty() && !report.failures.is_empty() {
        return Err(PaperAgentError::upstream(format!(
            "stage1: all {} conference/year pairs failed; first error: {}",
            report.failures.len(),
            report.failures[0].error
        )));
    }

    let fingerprint = query_fingerprint(&serde_json::json!({
        "conferences": config.conferences,
        "years": config.years,
        "accepted_only": accepted_only,
    }))?;
    let artifact = config.data_dir().join(artifact_name(
        CRAWL_PREFIX,
        &fingerprint,
        chrono::Local::now().naive_local(),
    ));
    write_json(&artifact, &output.papers)?;
    let report_path = sidecar_path(&artifact, "report");
    write_json(&report_path, report)?;

    info!(papers = output.papers.len(), artifact = %artifact.display(), "stage1 complete");

    Ok(CrawlSummary {
        stage: "stage1",
        artifact,
        report: report_path,
        total_papers: output.papers.len(),
        pairs_ok: report.pairs.len(),
        pairs_failed: report.failures.len(),
        unmatched_decisions: report.unmatched_decisions.values().sum(),
        duplicates_dropped: report.duplicates_dropped,
        elapsed_ms: start.elapsed().as_millis(),
    })
}

// ---------------------------------------------------------------------------
// Stage 2: filter
// ---------------------------------------------------------------------------

/// Filter a Stage 1 artifact. Never touches the network.
#[instrument(skip_all, fields(input = %input.display()))]
pub fn run_filter(
    config: &PipelineConfig,
    input: &Path,
    output_dir: Option<&Path>,
) -> Result<FilterSummary> {
    config.validate()?;
    let papers = read_papers(input)?;
    let outcome = filter_papers(papers, &config.filter)?;

    let fingerprint = query_fingerprint(&serde_json::json!({
        "input": input.display().to_string(),
        "filter": config.filter,
    }))?;
    let dir = output_dir.map(Path::to_path_buf).unwrap_or_else(|| config.data_dir());
    let artifact = dir.join(artifact_name(
        FILTER_PREFIX,
        &fingerprint,
        chrono::Local::now().naive_local(),
    ));
    write_json(&artifact, &outcome.kept)?;

    let summary_path = sidecar_path(&artifact, "summary");
    write_json(
        &summary_path,
        &FilterSidecar {
            input,
            fingerprint: &fingerprint,
            filter: &config.filter,
            statistics: &outcome.statistics,
        },
    )?;

    let stats = &outcome.statistics;
    info!(total = stats.total, kept = stats.kept, artifact = %artifact.display(), "stage2 complete");

    Ok(FilterSummary {
        stage: "stage2",
        input: input.to_path_buf(),
        artifact,
        summary: summary_path,
        total: stats.total,
        kept: stats.kept,
        discarded: stats.discarded,
        pass_rate: stats.pass_rate,
    })
}

// ---------------------------------------------------------------------------
// Stage 3: download
// ---------------------------------------------------------------------------

/// Download the PDFs of a Stage 2 artifact into `output_dir` (default `<output>/papers`).
#[instrument(skip_all, fields(input = %input.display()))]
pub async fn run_download(
    config: &PipelineConfig,
    input: &Path,
    output_dir: Option<&Path>,
    progress: &dyn ProgressReporter,
) -> Result<DownloadStageSummary> {
    config.validate()?;
    let start = Instant::now();
    let papers = read_papers(input)?;
    let dir = output_dir.map(Path::to_path_buf).unwrap_or_else(|| config.papers_dir());

    progress.phase("Downloading PDFs");
    progress.begin(papers.len());
    let downloader = Downloader::new(&config.download, config.options.workers, config.options.delay())?;
    let outcome = downloader
        .download(papers, &dir, |entry| {
            progress.item(&entry.paper_id, entry.status != DownloadStatus::Failed);
        })
        .await?;
    progress.finish();

    let counts = outcome.summary;
    if counts.total > 0 && counts.failed == counts.total {
        return Err(PaperAgentError::upstream(format!(
            "stage3: all {} downloads failed; see {}",
            counts.total,
            outcome.manifest_path.display()
        )));
    }
    if counts.exceeds(config.download.max_failure_rate) {
        warn!(rate = counts.failure_rate, "download failure rate above threshold");
        return Err(PaperAgentError::PartialBatch {
            stage: "stage3".into(),
            failed: counts.failed,
            total: counts.total,
        });
    }

    Ok(DownloadStageSummary {
        stage: "stage3",
        input: input.to_path_buf(),
        output_dir: dir,
        manifest: outcome.manifest_path,
        bibtex: outcome.bibtex_path,
        counts,
        elapsed_ms: start.elapsed().as_millis(),
    })
}

// ---------------------------------------------------------------------------
// Stage 4: analyze
// ---------------------------------------------------------------------------

/// Analyze PDFs from a directory or `manifest.json` with the configured model.
pub async fn run_analysis(
    config: &PipelineConfig,
    input: &Path,
    output_dir: Option<&Path>,
    api_key: Option<&str>,
    progress: &dyn ProgressReporter,
) -> Result<AnalysisSummary> {
    config.validate()?;
    let key = require_api_key(&config.analysis, api_key)?;
    let client = ChatClient::new(&config.analysis, key)?;
    run_analysis_with(config, input, output_dir, Arc::new(client), progress).await
}

/// Stage 4 against any [`ReasoningService`].
#[instrument(skip_all, fields(input = %input.display(), model = %service.model()))]
pub async fn run_analysis_with(
    config: &PipelineConfig,
    input: &Path,
    output_dir: Option<&Path>,
    service: Arc<dyn ReasoningService>,
    progress: &dyn ProgressReporter,
) -> Result<AnalysisSummary> {
    let start = Instant::now();
    let inputs = collect_inputs(input)?;
    let dir = output_dir.map(Path::to_path_buf).unwrap_or_else(|| config.analysis_dir());
    let model = service.model().to_string();

    progress.phase("Analyzing papers");
    progress.begin(inputs.len());
    let analyzer = Analyzer::new(&config.analysis, service, config.options.workers)?
        .with_topic(config.topic.clone());
    let outcome = analyzer
        .analyze(inputs, &dir, |record| {
            progress.item(&record.paper_id, record.status == AnalysisStatus::Ok);
        })
        .await?;
    progress.finish();

    let report = &outcome.report;
    if report.total > 0 && report.ok == 0 {
        return Err(PaperAgentError::upstream(format!(
            "stage4: none of {} papers could be analyzed; see {}",
            report.total,
            outcome.analysis_path.display()
        )));
    }

    Ok(AnalysisSummary {
        stage: "stage4",
        input: input.to_path_buf(),
        output_dir: dir,
        analysis: outcome.analysis_path,
        report: outcome.report_path,
        model,
        total: report.total,
        ok: report.ok,
        parse_errors: report.parse_errors,
        api_errors: report.api_errors,
        reused: outcome.reused,
        elapsed_ms: start.elapsed().as_millis(),
    })
}

// ---------------------------------------------------------------------------
// All stages
// ---------------------------------------------------------------------------

/// Run all four stages, stopping at the first fatal error.
///
/// The credential is resolved before any network work so a missing key fails fast.
pub async fn run_all(
    config: &PipelineConfig,
    api_key: Option<&str>,
    progress: &dyn ProgressReporter,
) -> Result<AllSummary> {
    config.validate()?;
    let key = require_api_key(&config.analysis, api_key)?;
    let client = ChatClient::new(&config.analysis, key)?;
    run_all_with(config, Arc::new(client), progress).await
}

/// [`run_all`] against any [`ReasoningService`].
///
/// Tools the configured extractor needs are checked before Stage 1 starts.
pub async fn run_all_with(
    config: &PipelineConfig,
    service: Arc<dyn ReasoningService>,
    progress: &dyn ProgressReporter,
) -> Result<AllSummary> {
    run_all_requiring(
        config,
        service,
        progress,
        required_tools(config.analysis.extractor),
    )
    .await
}

async fn run_all_requiring(
    config: &PipelineConfig,
    service: Arc<dyn ReasoningService>,
    progress: &dyn ProgressReporter,
    tools: &[&str],
) -> Result<AllSummary> {
    config.validate()?;
    ensure_tools(tools)?;

    let crawl = run_crawl(config, progress).await?;

    progress.phase("Filtering papers");
    let filter = run_filter(config, &crawl.artifact, None)?;

    let download = run_download(config, &filter.artifact, None, progress).await?;

    let manifest = download.output_dir.join(MANIFEST_FILE);
    let analysis = run_analysis_with(config, &manifest, None, service, progress).await?;

    Ok(AllSummary {
        stage: "all",
        crawl,
        filter,
        download,
        analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperagent_shared::Paper;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("pa-pipeline-test-{}", uuid::Uuid::now_v7()))
    }

    fn paper(id: &str, title: &str) -> Paper {
        serde_json::from_value(json!({
            "id": id,
            "title": title,
            "abstract": "",
            "authors": ["Ada Lovelace"],
            "conference": "ICLR",
            "year": 2024,
        }))
        .unwrap()
    }

    fn base_config(root: &Path) -> PipelineConfig {
        let mut config = PipelineConfig {
            output_dir: root.display().to_string(),
            ..PipelineConfig::default()
        };
        config.options.delay = 0.0;
        config
    }

    /// Single-page PDF whose text layer reads `text`.
    fn pdf_bytes(text: &str) -> Vec<u8> {
        use lopdf::{Document, Object, Stream, dictionary};
        let mut doc = Document::with_version("1.4");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Helvetica",
        });
        let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages", "Kids" => vec![page_id.into()], "Count" => 1,
        });
        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn filter_rerun_writes_independent_artifacts() {
        let root = temp_root();
        let mut config = base_config(&root);
        std::fs::create_dir_all(config.data_dir()).unwrap();
        let input = config.data_dir().join("all_papers_abc_20240101_000000.json");
        write_json(
            &input,
            &vec![
                paper("1", "Molecule diffusion"),
                paper("2", "Graph transformers"),
                paper("3", "Diffusion for graphs"),
            ],
        )
        .unwrap();

        config.filter.include_groups = vec![vec!["diffusion".into()]];
        let first = run_filter(&config, &input, None).unwrap();
        assert_eq!((first.total, first.kept, first.discarded), (3, 2, 1));
        assert!(first.summary.exists());

        config.filter.include_groups = vec![vec!["graph".into()]];
        config.filter.exclude = vec!["diffusion".into()];
        let second = run_filter(&config, &input, None).unwrap();
        assert_eq!(second.kept, 1);
        assert_ne!(first.artifact, second.artifact);
        assert!(first.artifact.exists());

        let kept: Vec<Paper> = paperagent_artifacts::read_json(&second.artifact).unwrap();
        assert_eq!(kept[0].id, "2");
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn filter_rejects_missing_input() {
        let root = temp_root();
        let config = base_config(&root);
        assert!(run_filter(&config, &root.join("nope.json"), None).is_err());
    }

    #[tokio::test]
    async fn analysis_requires_key() {
        let root = temp_root();
        let mut config = base_config(&root);
        config.analysis.api_key_env = "PAPER_AGENT_TEST_UNSET_KEY".into();
        let err = run_analysis(&config, &root, None, None, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PaperAgentError::Environment(_)));
    }

    #[tokio::test]
    async fn all_stops_before_crawling_when_a_tool_is_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"notes": []})))
            .expect(0)
            .mount(&server)
            .await;

        let root = temp_root();
        let mut config = base_config(&root);
        config.crawler.api_base_url = server.uri();
        config.analysis.api_base_url = server.uri();
        let client = ChatClient::new(&config.analysis, "sk-test-key").unwrap();

        let err = run_all_requiring(
            &config,
            Arc::new(client),
            &SilentProgress,
            &["paper-agent-no-such-tool"],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PaperAgentError::Environment(_)));
        assert!(!config.data_dir().exists());
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn all_stages_end_to_end() {
        let server = MockServer::start().await;
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path("/groups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"groups": []})))
            .mount(&server)
            .await;
        let note = |id: &str, title: &str| {
            json!({
                "id": id,
                "forum": id,
                "content": {
                    "title": {"value": title},
                    "abstract": {"value": "We study molecules."},
                    "authors": {"value": ["Ada Lovelace"]},
                    "venue": {"value": "ICLR 2024 poster"},
                    "pdf": {"value": format!("/pdf/{id}.pdf")}
                }
            })
        };
        Mock::given(method("GET"))
            .and(path("/notes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "notes": [note("n1", "Molecule diffusion"), note("n2", "Protein folding")],
                "count": 2
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/pdf/n1\.pdf$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(pdf_bytes("Molecule diffusion paper")),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content":
                    "{\"method\": \"score-based diffusion\", \"contribution\": \"c\", \"key_results\": \"r\", \"limitations\": \"l\"}"
                }}]
            })))
            .mount(&server)
            .await;

        let root = temp_root();
        let mut config = base_config(&root);
        config.crawler.api_base_url = uri.clone();
        config.crawler.site_base_url = uri.clone();
        config.download.arxiv_lookup = false;
        config.analysis.api_base_url = uri.clone();
        config.filter.include_groups = vec![vec!["molecule".into()]];

        let summary = run_all(&config, Some("sk-test-key"), &SilentProgress).await.unwrap();
        assert_eq!(summary.crawl.total_papers, 2);
        assert_eq!(summary.filter.kept, 1);
        assert_eq!(summary.download.counts.downloaded, 1);
        assert_eq!(summary.analysis.ok, 1);
        assert!(config.analysis_dir().join("n1.analysis.json").exists());
        assert!(config.papers_dir().join("references.bib").exists());

        let line = serde_json::to_string(&summary).unwrap();
        assert!(!line.contains('\n'));
        std::fs::remove_dir_all(&root).ok();
    }
}
