//! Aggregate report over a batch of analysis records.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use paperagent_shared::{AnalysisRecord, AnalysisStatus};

/// Number of terms kept in the report.
pub const TOP_TERMS: usize = 15;

/// Field whose text feeds the term ranking.
const TERM_FIELD: &str = "method";

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9-]{2,}").expect("word regex"));

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "and", "for", "with", "that", "this", "from", "are", "was", "were", "which", "into",
        "using", "based", "via", "its", "their", "our", "has", "have", "been", "not", "can", "also",
        "such", "these", "those", "than", "more", "each", "both", "between", "over", "under",
        "through", "while", "when", "where", "how", "new", "novel", "propose", "proposed",
        "proposes", "approach", "method", "methods", "paper", "work", "uses", "use", "used", "model",
        "models", "framework", "mentioned", "other", "only", "all", "any", "well", "then", "them",
        "they", "who", "what", "will", "would", "may", "one", "two", "three", "first", "second",
        "existing", "prior", "key", "main", "core", "technique", "techniques",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermCount {
    pub term: String,
    /// Occurrences across all `method` texts.
    pub count: usize,
    /// Papers whose `method` mentions the term, sorted.
    pub papers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub total: usize,
    pub ok: usize,
    pub parse_errors: usize,
    pub api_errors: usize,
    /// Distinct models that produced the records.
    pub models: Vec<String>,
    pub top_terms: Vec<TermCount>,
}

impl AnalysisReport {
    pub fn failed(&self) -> usize {
        self.parse_errors + self.api_errors
    }
}

/// Status counts and the most frequent method terms.
pub fn build_report(records: &[AnalysisRecord]) -> AnalysisReport {
    let mut report = AnalysisReport {
        total: records.len(),
        ..AnalysisReport::default()
    };
    let mut models = BTreeSet::new();
    let mut counts: BTreeMap<String, (usize, BTreeSet<String>)> = BTreeMap::new();

    for record in records {
        match record.status {
            AnalysisStatus::Ok => report.ok += 1,
            AnalysisStatus::ParseError => report.parse_errors += 1,
            AnalysisStatus::ApiError => report.api_errors += 1,
        }
        if !record.model_used.is_empty() {
            models.insert(record.model_used.clone());
        }
        let Some(text) = record.extracted_fields.get(TERM_FIELD) else {
            continue;
        };
        for word in WORD_RE.find_iter(text) {
            let term = word.as_str().to_lowercase();
            if STOPWORDS.contains(term.as_str()) {
                continue;
            }
            let slot = counts.entry(term).or_default();
            slot.0 += 1;
            slot.1.insert(record.paper_id.clone());
        }
    }

    let mut terms: Vec<TermCount> = counts
        .into_iter()
        .map(|(term, (count, papers))| TermCount {
            term,
            count,
            papers: papers.into_iter().collect(),
        })
        .collect();
    // Count descending, then term ascending (already the BTreeMap order).
    terms.sort_by(|a, b| b.count.cmp(&a.count));
    terms.truncate(TOP_TERMS);

    report.models = models.into_iter().collect();
    report.top_terms = terms;
    report
}

/// `report.md`
pub fn render_report_markdown(report: &AnalysisReport, topic: &str) -> String {
    let mut md = format!("# {topic}: Paper Analysis Report\n\n");
    let _ = writeln!(md, "| Status | Papers |\n|---|---|");
    let _ = writeln!(md, "| ok | {} |", report.ok);
    let _ = writeln!(md, "| parse-error | {} |", report.parse_errors);
    let _ = writeln!(md, "| api-error | {} |", report.api_errors);
    let _ = writeln!(md, "| **total** | {} |\n", report.total);

    if !report.models.is_empty() {
        let _ = writeln!(md, "Models: {}\n", report.models.join(", "));
    }

    md.push_str("## Top method terms\n\n");
    if report.top_terms.is_empty() {
        md.push_str("_No successful analyses._\n");
        return md;
    }
    for t in &report.top_terms {
        let _ = writeln!(md, "### {} ({})\n", t.term, t.count);
        for id in &t.papers {
            let _ = writeln!(md, "- {id}");
        }
        md.push('\n');
    }
    md
}

/// Per-paper `<id>.md`.
pub fn render_record_markdown(record: &AnalysisRecord) -> String {
    let mut md = format!("# {}\n\n", record.paper_id);
    let _ = writeln!(md, "- Status: {}", record.status.as_str());
    let _ = writeln!(md, "- Model: {}", record.model_used);
    if !record.source_path.is_empty() {
        let _ = writeln!(md, "- Source: {}", record.source_path);
    }
    if record.truncated {
        let _ = writeln!(md, "- Input truncated to {} characters", record.input_chars);
    }
    if let Some(err) = &record.error {
        let _ = writeln!(md, "- Error: {err}");
    }
    for (field, text) in &record.extracted_fields {
        let _ = write!(md, "\n## {}\n\n{text}\n", heading(field));
    }
    md
}

/// `key_results` → `Key Results`
fn heading(field: &str) -> String {
    field
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: AnalysisStatus, method: Option<&str>) -> AnalysisRecord {
        AnalysisRecord {
            paper_id: id.into(),
            extracted_fields: method
                .map(|m| BTreeMap::from([("method".to_string(), m.to_string())]))
                .unwrap_or_default(),
            model_used: "m1".into(),
            status,
            error: None,
            source_path: String::new(),
            input_chars: 0,
            truncated: false,
        }
    }

    #[test]
    fn counts_and_terms() {
        let records = vec![
            record("a", AnalysisStatus::Ok, Some("Diffusion model with graph attention")),
            record("b", AnalysisStatus::Ok, Some("Graph diffusion; diffusion sampling")),
            record("c", AnalysisStatus::ParseError, None),
            record("d", AnalysisStatus::ApiError, None),
        ];
        let report = build_report(&records);
        assert_eq!((report.total, report.ok, report.failed()), (4, 2, 2));
        assert_eq!(report.models, ["m1"]);

        let top = &report.top_terms[0];
        assert_eq!(top.term, "diffusion");
        assert_eq!(top.count, 3);
        assert_eq!(top.papers, ["a", "b"]);
        assert_eq!(report.top_terms[1].term, "graph");
        assert!(!report.top_terms.iter().any(|t| t.term == "with" || t.term == "model"));
    }

    #[test]
    fn markdown_renders() {
        let report = build_report(&[record("a", AnalysisStatus::Ok, Some("sparse attention"))]);
        let md = render_report_markdown(&report, "Attention");
        assert!(md.starts_with("# Attention: Paper Analysis Report"));
        assert!(md.contains("| ok | 1 |"));
        assert!(md.contains("### attention (1)"));

        let mut rec = record("a", AnalysisStatus::Ok, Some("sparse attention"));
        rec.extracted_fields.insert("key_results".into(), "SOTA".into());
        let md = render_record_markdown(&rec);
        assert!(md.contains("## Key Results\n\nSOTA"));
        assert!(md.contains("- Status: ok"));
    }
}
