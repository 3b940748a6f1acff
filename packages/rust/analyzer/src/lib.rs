//! LLM-driven structured extraction over downloaded PDFs.
//!
//! This crate provides:
//! - [`ReasoningService`] and its OpenAI-compatible [`ChatClient`]
//! - [`TextExtractor`]: `lopdf` or `pdftotext` text extraction
//! - [`Analyzer`]: the bounded worker pool that turns PDFs into
//!   [`AnalysisRecord`]s plus the aggregate report

mod client;
mod extract;
mod prompt;
mod report;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, instrument, warn};

use paperagent_artifacts::{read_json, sanitize_file_stem, write_json, write_text};
use paperagent_shared::{
    AnalysisConfig, AnalysisRecord, AnalysisStatus, DownloadStatus, ManifestEntry,
    PaperAgentError, Result,
};

pub use client::{ChatClient, ReasoningService};
pub use extract::{PDFTOTEXT, TextExtractor, required_tools};
pub use prompt::{build_prompt, parse_response, truncate_chars};
pub use report::{
    AnalysisReport, TermCount, build_report, render_record_markdown, render_report_markdown,
};

pub const ANALYSIS_FILE: &str = "analysis.json";
pub const REPORT_JSON: &str = "report.json";
pub const REPORT_MD: &str = "report.md";

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// One PDF to analyze.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisInput {
    pub paper_id: String,
    pub pdf_path: PathBuf,
}

/// Resolve analysis inputs from a PDF directory (searched recursively) or a
/// download `manifest.json`. Sorted by paper id, first occurrence wins.
pub fn collect_inputs(input: &Path) -> Result<Vec<AnalysisInput>> {
    let mut inputs = if input.is_dir() {
        let mut found = Vec::new();
        walk_pdfs(input, &mut found)?;
        found
            .into_iter()
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_string();
                Some(AnalysisInput {
                    paper_id: stem,
                    pdf_path: path,
                })
            })
            .collect::<Vec<_>>()
    } else if input.is_file() {
        let entries: Vec<ManifestEntry> = read_json(input)?;
        let base = input.parent().unwrap_or(Path::new("."));
        entries
            .into_iter()
            .filter(|e| e.status != DownloadStatus::Failed)
            .filter_map(|e| {
                let local = PathBuf::from(e.local_path?);
                let pdf_path = if local.is_absolute() {
                    local
                } else {
                    base.join(local)
                };
                Some(AnalysisInput {
                    paper_id: e.paper_id,
                    pdf_path,
                })
            })
            .collect()
    } else {
        return Err(PaperAgentError::validation(format!(
            "analysis input {} does not exist",
            input.display()
        )));
    };

    inputs.sort_by(|a, b| a.paper_id.cmp(&b.paper_id).then(a.pdf_path.cmp(&b.pdf_path)));
    let mut seen = HashSet::new();
    inputs.retain(|i| seen.insert(i.paper_id.clone()));
    Ok(inputs)
}

fn walk_pdfs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| PaperAgentError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| PaperAgentError::io(dir, e))?.path();
        if path.is_dir() {
            walk_pdfs(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
        {
            out.push(path);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// Sorted by `paper_id`.
    pub records: Vec<AnalysisRecord>,
    pub report: AnalysisReport,
    /// Records taken from a previous run instead of calling the model.
    pub reused: usize,
    pub analysis_path: PathBuf,
    pub report_path: PathBuf,
}

pub struct Analyzer {
    config: AnalysisConfig,
    service: Arc<dyn ReasoningService>,
    extractor: TextExtractor,
    workers: usize,
    topic: String,
}

impl Analyzer {
    pub fn new(
        config: &AnalysisConfig,
        service: Arc<dyn ReasoningService>,
        workers: usize,
    ) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            service,
            extractor: TextExtractor::for_kind(config.extractor)?,
            workers: workers.max(1),
            topic: "Research".into(),
        })
    }

    /// Research topic shown in the report heading.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Analyze every input and write per-paper and batch outputs.
    ///
    /// Per-paper failures become `parse-error` / `api-error` records; only
    /// filesystem errors on the output side abort the batch.
    #[instrument(skip_all, fields(papers = inputs.len(), workers = self.workers, model = %self.service.model()))]
    pub async fn analyze(
        &self,
        inputs: Vec<AnalysisInput>,
        output_dir: &Path,
        mut on_record: impl FnMut(&AnalysisRecord),
    ) -> Result<AnalysisOutcome> {
        std::fs::create_dir_all(output_dir).map_err(|e| PaperAgentError::io(output_dir, e))?;

        let mut records = Vec::with_capacity(inputs.len());
        let mut pending = Vec::new();
        for input in inputs {
            match self.reusable(output_dir, &input.paper_id) {
                Some(record) => {
                    debug!(id = %input.paper_id, "reusing existing analysis");
                    on_record(&record);
                    records.push(record);
                }
                None => pending.push(input),
            }
        }
        let reused = records.len();

        let worker = Arc::new(Worker {
            service: self.service.clone(),
            extractor: self.extractor.clone(),
            fields: self.config.fields.clone(),
            max_input_chars: self.config.max_input_chars,
        });
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::channel::<AnalysisRecord>(self.workers * 2);
        let mut handles = Vec::with_capacity(pending.len());

        for input in pending.iter().cloned() {
            let worker = worker.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let record = worker.process(&input).await;
                let _ = tx.send(record).await;
            }));
        }
        drop(tx);

        let mut reported = HashSet::new();
        while let Some(record) = rx.recv().await {
            write_record(output_dir, &record)?;
            on_record(&record);
            reported.insert(record.paper_id.clone());
            records.push(record);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "analysis task aborted");
            }
        }
        for input in pending.iter().filter(|i| !reported.contains(&i.paper_id)) {
            let record = AnalysisRecord {
                paper_id: input.paper_id.clone(),
                extracted_fields: Default::default(),
                model_used: self.service.model().to_string(),
                status: AnalysisStatus::ApiError,
                error: Some("analysis task aborted".into()),
                source_path: input.pdf_path.display().to_string(),
                input_chars: 0,
                truncated: false,
            };
            write_record(output_dir, &record)?;
            on_record(&record);
            records.push(record);
        }

        records.sort_by(|a, b| a.paper_id.cmp(&b.paper_id));

        let analysis_path = output_dir.join(ANALYSIS_FILE);
        write_json(&analysis_path, &records)?;

        let report = build_report(&records);
        let report_path = output_dir.join(REPORT_JSON);
        write_json(&report_path, &report)?;
        write_text(&output_dir.join(REPORT_MD), &render_report_markdown(&report, &self.topic))?;

        info!(
            ok = report.ok,
            parse_errors = report.parse_errors,
            api_errors = report.api_errors,
            reused,
            "analysis complete"
        );

        Ok(AnalysisOutcome {
            records,
            report,
            reused,
            analysis_path,
            report_path,
        })
    }

    /// A previous `ok` result for this paper, unless overwriting.
    fn reusable(&self, output_dir: &Path, paper_id: &str) -> Option<AnalysisRecord> {
        if self.config.overwrite {
            return None;
        }
        let path = record_path(output_dir, paper_id);
        if !path.exists() {
            return None;
        }
        match read_json::<AnalysisRecord>(&path) {
            Ok(record) if record.status == AnalysisStatus::Ok => Some(record),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable analysis");
                None
            }
        }
    }
}

/// `<output_dir>/<sanitized id>.analysis.json`
pub fn record_path(output_dir: &Path, paper_id: &str) -> PathBuf {
    output_dir.join(format!("{}.analysis.json", sanitize_file_stem(paper_id)))
}

fn write_record(output_dir: &Path, record: &AnalysisRecord) -> Result<()> {
    write_json(&record_path(output_dir, &record.paper_id), record)?;
    let md_path = output_dir.join(format!("{}.md", sanitize_file_stem(&record.paper_id)));
    write_text(&md_path, &render_record_markdown(record))
}

// ---------------------------------------------------------------------------
// Per-paper pipeline
// ---------------------------------------------------------------------------

struct Worker {
    service: Arc<dyn ReasoningService>,
    extractor: TextExtractor,
    fields: Vec<String>,
    max_input_chars: usize,
}

impl Worker {
    async fn process(&self, input: &AnalysisInput) -> AnalysisRecord {
        let mut record = AnalysisRecord {
            paper_id: input.paper_id.clone(),
            extracted_fields: Default::default(),
            model_used: self.service.model().to_string(),
            status: AnalysisStatus::ParseError,
            error: None,
            source_path: input.pdf_path.display().to_string(),
            input_chars: 0,
            truncated: false,
        };

        let text = match self.extractor.extract(&input.pdf_path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(id = %input.paper_id, error = %e, "text extraction failed");
                record.error = Some(e.to_string());
                return record;
            }
        };
        let (text, truncated) = truncate_chars(&text, self.max_input_chars);
        record.truncated = truncated;
        record.input_chars = text.chars().count();

        let reply = match self.service.complete(&build_prompt(&self.fields, text)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(id = %input.paper_id, error = %e, "model call failed");
                record.status = AnalysisStatus::ApiError;
                record.error = Some(e.to_string());
                return record;
            }
        };

        match parse_response(&reply, &self.fields) {
            Ok(fields) => {
                record.status = AnalysisStatus::Ok;
                record.extracted_fields = fields;
            }
            Err(e) => {
                warn!(id = %input.paper_id, error = %e, "unparsable model reply");
                record.error = Some(e.to_string());
            }
        }
        record
    }
}
