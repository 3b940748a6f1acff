//! PDF text extraction.

use std::path::{Path, PathBuf};

use tracing::debug;

use paperagent_shared::{ExtractorKind, PaperAgentError, Result};

pub const PDFTOTEXT: &str = "pdftotext";

/// A configured text extractor.
#[derive(Debug, Clone)]
pub enum TextExtractor {
    /// In-process extraction with `lopdf`.
    Lopdf,
    /// Poppler's `pdftotext`, resolved on `PATH`.
    Pdftotext { binary: PathBuf },
}

impl TextExtractor {
    /// Resolve the extractor for `kind`. Fails if the external tool is missing.
    pub fn for_kind(kind: ExtractorKind) -> Result<Self> {
        match kind {
            ExtractorKind::Lopdf => Ok(Self::Lopdf),
            ExtractorKind::Pdftotext => which::which(PDFTOTEXT)
                .map(|binary| Self::Pdftotext { binary })
                .map_err(|_| {
                    PaperAgentError::Environment(format!("`{PDFTOTEXT}` not found on PATH"))
                }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Lopdf => "lopdf",
            Self::Pdftotext { .. } => PDFTOTEXT,
        }
    }

    /// Plain text of every page, in page order.
    pub async fn extract(&self, path: &Path) -> Result<String> {
        let text = match self {
            Self::Lopdf => {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || extract_with_lopdf(&path))
                    .await
                    .map_err(|e| PaperAgentError::parse(format!("extraction task failed: {e}")))??
            }
            Self::Pdftotext { binary } => extract_with_pdftotext(binary, path).await?,
        };

        if text.trim().is_empty() {
            return Err(PaperAgentError::parse(format!(
                "{}: no extractable text",
                path.display()
            )));
        }
        debug!(path = %path.display(), chars = text.chars().count(), extractor = self.name(), "extracted text");
        Ok(text)
    }
}

/// External tools the given extractor kind needs on `PATH`.
pub fn required_tools(kind: ExtractorKind) -> &'static [&'static str] {
    match kind {
        ExtractorKind::Lopdf => &[],
        ExtractorKind::Pdftotext => &[PDFTOTEXT],
    }
}

fn extract_with_lopdf(path: &Path) -> Result<String> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| PaperAgentError::parse(format!("{}: {e}", path.display())))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err(PaperAgentError::parse(format!("{}: PDF has no pages", path.display())));
    }
    doc.extract_text(&pages)
        .map_err(|e| PaperAgentError::parse(format!("{}: {e}", path.display())))
}

async fn extract_with_pdftotext(binary: &Path, path: &Path) -> Result<String> {
    let output = tokio::process::Command::new(binary)
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .output()
        .await
        .map_err(|e| PaperAgentError::Environment(format!("failed to run {PDFTOTEXT}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PaperAgentError::parse(format!(
            "{}: {PDFTOTEXT} exited with {}: {}",
            path.display(),
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
