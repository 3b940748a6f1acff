//! Per-API-version note adapters.
//!
//! OpenReview serves notes in two shapes. API v2 wraps every content field
//! in `{"value": ...}`; API v1 stores the value directly. Adapters hide that
//! difference so [`normalize_note`] can build the one canonical [`Paper`].

mod v1;
mod v2;

use std::collections::BTreeMap;

use serde_json::Value;

use paperagent_shared::{ApiVersion, Paper};

use crate::decision::{Classification, DecisionClassifier};

pub use v1::V1Adapter;
pub use v2::V2Adapter;

/// Invitation suffix used when the venue does not publish one.
pub const DEFAULT_SUBMISSION_NAME: &str = "Submission";

/// Content keys scanned for arXiv references.
const ARXIV_HINT_FIELDS: &[&str] = &["abstract", "TLDR", "TL;DR", "code", "html", "supplementary_material"];

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Schema knowledge for one OpenReview API version.
pub trait ApiAdapter: Send + Sync {
    /// Read a content field, unwrapping any version-specific envelope.
    fn field<'a>(&self, content: &'a Value, key: &str) -> Option<&'a Value>;

    /// Submission invitation name from a venue group object.
    fn submission_name(&self, group: &Value) -> String;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

/// The adapter for `version`.
pub fn adapter_for(version: ApiVersion) -> Box<dyn ApiAdapter> {
    match version {
        ApiVersion::V1 => Box::new(V1Adapter),
        ApiVersion::V2 => Box::new(V2Adapter),
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Where a note came from.
#[derive(Debug, Clone)]
pub struct NoteContext<'a> {
    pub conference: &'a str,
    pub year: u32,
    pub venue_id: &'a str,
    /// Base for relative PDF links (e.g. `https://openreview.net`).
    pub site_base_url: &'a str,
}

/// Convert a raw note into a [`Paper`]. Returns `None` for notes without an id.
pub fn normalize_note(
    adapter: &dyn ApiAdapter,
    note: &Value,
    ctx: &NoteContext<'_>,
    classifier: &DecisionClassifier,
) -> Option<(Paper, Classification)> {
    let id = note.get("id")?.as_str()?.to_string();
    let empty = Value::Null;
    let content = note.get("content").unwrap_or(&empty);

    let text = |key: &str| -> String {
        adapter
            .field(content, key)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };

    let venue_status = Some(text("venue")).filter(|s| !s.is_empty());
    let classification = classifier.classify(venue_status.as_deref());

    let pdf_url_primary = adapter
        .field(content, "pdf")
        .and_then(Value::as_str)
        .and_then(|raw| pdf_url(raw, &id, ctx.site_base_url));

    let mut external_ids = BTreeMap::new();
    let mut pdf_url_secondary = None;
    let arxiv = ARXIV_HINT_FIELDS
        .iter()
        .filter_map(|key| adapter.field(content, key).and_then(Value::as_str))
        .find_map(paperagent_arxiv::extract_arxiv_id);
    if let Some(arxiv_id) = arxiv {
        pdf_url_secondary = Some(paperagent_arxiv::pdf_url(
            paperagent_arxiv::DEFAULT_PDF_BASE,
            &arxiv_id,
        ));
        external_ids.insert("arxiv".to_string(), arxiv_id);
    }

    let paper = Paper {
        title: text("title"),
        abstract_text: text("abstract"),
        authors: string_list(adapter.field(content, "authors")),
        conference: ctx.conference.to_string(),
        year: ctx.year,
        decision: classification.decision,
        pdf_url_primary,
        pdf_url_secondary,
        external_ids,
        keywords: string_list(adapter.field(content, "keywords")),
        venue_id: ctx.venue_id.to_string(),
        venue_status,
        forum: note
            .get("forum")
            .and_then(Value::as_str)
            .map(str::to_string),
        id,
    };
    Some((paper, classification))
}

/// PDF link rules: `/pdf...` is site-relative, `http(s)` is kept, anything
/// else non-empty (an attachment hash) resolves to `/pdf?id=<id>`.
pub fn pdf_url(raw: &str, id: &str, site_base_url: &str) -> Option<String> {
    let raw = raw.trim();
    let base = site_base_url.trim_end_matches('/');
    if raw.is_empty() {
        None
    } else if raw.starts_with("/pdf") {
        Some(format!("{base}{raw}"))
    } else if raw.starts_with("http://") || raw.starts_with("https://") {
        Some(raw.to_string())
    } else {
        Some(format!("{base}/pdf?id={id}"))
    }
}

/// A list of strings, or a single string treated as a one-element list.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}
