//! Append-only JSONL journal, flushed after every entry.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use paperagent_shared::{PaperAgentError, Result};

/// One JSON document per line. A killed process loses at most the line in flight.
pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl Journal {
    /// Open `path` for appending, creating it (and its parent) if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PaperAgentError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PaperAgentError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Append one entry and flush it to disk.
    pub fn append<T: Serialize>(&mut self, entry: &T) -> Result<()> {
        let line = serde_json::to_string(entry)
            .map_err(|e| PaperAgentError::validation(format!("journal entry: {e}")))?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .map_err(|e| PaperAgentError::io(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    /// Entries appended through this handle.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every well-formed line of a journal. Torn lines are skipped.
pub fn read_journal<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| PaperAgentError::io(path, e))?;
    let mut entries = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PaperAgentError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed journal line"),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperagent_shared::{DownloadStatus, ManifestEntry, SourceUsed};

    fn entry(id: &str) -> ManifestEntry {
        ManifestEntry {
            paper_id: id.into(),
            status: DownloadStatus::Downloaded,
            source_used: SourceUsed::Primary,
            local_path: Some(format!("/tmp/{id}.pdf")),
            attempts: 1,
            last_error: None,
        }
    }

    #[test]
    fn appends_across_reopen() {
        let dir = std::env::temp_dir().join(format!("pa-journal-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("manifest.jsonl");

        let mut journal = Journal::open(&path).unwrap();
        journal.append(&entry("a")).unwrap();
        journal.append(&entry("b")).unwrap();
        assert_eq!(journal.written(), 2);
        drop(journal);

        let mut journal = Journal::open(&path).unwrap();
        journal.append(&entry("c")).unwrap();
        drop(journal);

        let back: Vec<ManifestEntry> = read_journal(&path).unwrap();
        let ids: Vec<_> = back.iter().map(|e| e.paper_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let dir = std::env::temp_dir().join(format!("pa-journal-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("manifest.jsonl");
        let good = serde_json::to_string(&entry("a")).unwrap();
        std::fs::write(&path, format!("{good}\n{{\"paper_id\":\"b\",\"sta")).unwrap();

        let back: Vec<ManifestEntry> = read_journal(&path).unwrap();
        assert_eq!(back.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
