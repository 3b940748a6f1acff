//! Canonical records flowing between pipeline stages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Paper
// ---------------------------------------------------------------------------

/// Review outcome of a submission, after venue-specific normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Rejected,
    #[default]
    Unknown,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single paper, as normalized by the crawler.
///
/// This is the only record shape downstream stages ever see; venue and API
/// differences are resolved inside the crawler adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Source-assigned key (OpenReview note id). Unique within one crawl.
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    /// Author names in publication order.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Short conference name as configured (e.g. `ICLR`).
    pub conference: String,
    pub year: u32,
    #[serde(default)]
    pub decision: Decision,
    /// Venue-hosted PDF.
    #[serde(default)]
    pub pdf_url_primary: Option<String>,
    /// Fallback PDF location, usually a derived arXiv link.
    #[serde(default)]
    pub pdf_url_secondary: Option<String>,
    /// Identifiers in other systems, keyed by system name (e.g. `arxiv`).
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    /// Author-supplied keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Full venue id (e.g. `ICLR.cc/2024/Conference`).
    #[serde(default)]
    pub venue_id: String,
    /// Decision string exactly as published by the venue.
    #[serde(default)]
    pub venue_status: Option<String>,
    #[serde(default)]
    pub forum: Option<String>,
}

impl Paper {
    /// Last name of the first author, or `Unknown`.
    pub fn first_author_surname(&self) -> &str {
        self.authors
            .first()
            .and_then(|a| a.split_whitespace().last())
            .unwrap_or("Unknown")
    }
}

// ---------------------------------------------------------------------------
// Download manifest
// ---------------------------------------------------------------------------

/// Terminal outcome of a download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadStatus {
    Downloaded,
    Failed,
    SkippedDuplicate,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
            Self::SkippedDuplicate => "skipped-duplicate",
        }
    }
}

/// Which channel produced the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceUsed {
    Primary,
    Secondary,
    None,
}

/// One line of the download manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub paper_id: String,
    pub status: DownloadStatus,
    pub source_used: SourceUsed,
    #[serde(default)]
    pub local_path: Option<String>,
    /// Number of HTTP fetch attempts made across both channels.
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Outcome of analyzing one paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisStatus {
    Ok,
    ParseError,
    ApiError,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ParseError => "parse-error",
            Self::ApiError => "api-error",
        }
    }
}

/// Structured extraction result for one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub paper_id: String,
    /// Schema key (e.g. `method`) to extracted text. Empty unless `status` is `ok`.
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, String>,
    pub model_used: String,
    pub status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// PDF the text was extracted from.
    #[serde(default)]
    pub source_path: String,
    /// Characters submitted to the model after truncation.
    #[serde(default)]
    pub input_chars: usize,
    #[serde(default)]
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_paper() -> Paper {
        Paper {
            id: "abc123".into(),
            title: "Diffusion Models for Molecule Generation".into(),
            abstract_text: "We propose a diffusion model.".into(),
            authors: vec!["Ada Lovelace".into(), "Alan Turing".into()],
            conference: "ICLR".into(),
            year: 2024,
            decision: Decision::Accepted,
            pdf_url_primary: Some("https://openreview.net/pdf?id=abc123".into()),
            pdf_url_secondary: Some("https://arxiv.org/pdf/2401.00001".into()),
            external_ids: BTreeMap::from([("arxiv".to_string(), "2401.00001".to_string())]),
            keywords: vec!["diffusion".into()],
            venue_id: "ICLR.cc/2024/Conference".into(),
            venue_status: Some("ICLR 2024 poster".into()),
            forum: Some("abc123".into()),
        }
    }

    #[test]
    fn paper_roundtrip_preserves_fields() {
        let paper = sample_paper();
        let json = serde_json::to_string_pretty(&paper).expect("serialize");
        let parsed: Paper = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, paper);
        // Re-serializing is byte-identical.
        assert_eq!(serde_json::to_string_pretty(&parsed).unwrap(), json);
    }

    #[test]
    fn paper_uses_abstract_key() {
        let json = serde_json::to_value(sample_paper()).unwrap();
        assert!(json.get("abstract").is_some());
        assert!(json.get("abstract_text").is_none());
        assert_eq!(json["decision"], "accepted");
    }

    #[test]
    fn paper_optional_fields_default() {
        let json = r#"{"id":"x","title":"T","conference":"ICML","year":2023}"#;
        let paper: Paper = serde_json::from_str(json).expect("deserialize minimal");
        assert_eq!(paper.decision, Decision::Unknown);
        assert!(paper.authors.is_empty());
        assert!(paper.external_ids.is_empty());
        assert_eq!(paper.first_author_surname(), "Unknown");
    }

    #[test]
    fn first_author_surname() {
        assert_eq!(sample_paper().first_author_surname(), "Lovelace");
    }

    #[test]
    fn manifest_status_serializes_kebab_case() {
        let entry = ManifestEntry {
            paper_id: "p1".into(),
            status: DownloadStatus::SkippedDuplicate,
            source_used: SourceUsed::None,
            local_path: Some("/tmp/p1.pdf".into()),
            attempts: 0,
            last_error: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "skipped-duplicate");
        assert_eq!(json["source_used"], "none");
    }

    #[test]
    fn analysis_status_serializes_kebab_case() {
        let json = serde_json::to_string(&AnalysisStatus::ParseError).unwrap();
        assert_eq!(json, r#""parse-error""#);
        assert_eq!(AnalysisStatus::ApiError.as_str(), "api-error");
    }
}
