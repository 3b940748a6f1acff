//! Stage artifact I/O.
//!
//! Every stage boundary is a file. This crate owns how those files are named,
//! written, and read back:
//! - fingerprinted artifact names (`<prefix>_<fp>_<YYYYmmdd_HHMMSS>.json`)
//! - atomic JSON writes (temp file, then rename)
//! - the append-only JSONL [`Journal`] used for per-item progress

mod journal;

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::debug;

use paperagent_shared::{Paper, PaperAgentError, Result};

pub use journal::{Journal, read_journal};

/// Hex characters of the query hash kept in artifact names.
const FINGERPRINT_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Short SHA-256 fingerprint of any serializable query description.
///
/// Two runs over the same query produce the same fingerprint, so their
/// artifacts sort next to each other and differ only by timestamp.
pub fn query_fingerprint<T: Serialize + ?Sized>(query: &T) -> Result<String> {
    let bytes = serde_json::to_vec(query)
        .map_err(|e| PaperAgentError::validation(format!("cannot fingerprint query: {e}")))?;
    let digest = Sha256::digest(&bytes);
    let hex = format!("{digest:x}");
    Ok(hex[..FINGERPRINT_LEN].to_string())
}

/// `<prefix>_<fingerprint>_<YYYYmmdd_HHMMSS>.json`
pub fn artifact_name(prefix: &str, fingerprint: &str, at: NaiveDateTime) -> String {
    format!("{prefix}_{fingerprint}_{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Companion file next to an artifact: `foo.json` → `foo.<suffix>.json`.
pub fn sidecar_path(artifact: &Path, suffix: &str) -> PathBuf {
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    artifact.with_file_name(format!("{stem}.{suffix}.json"))
}

/// Hex characters of the id hash appended to rewritten file stems.
const STEM_HASH_LEN: usize = 8;

/// Make an id safe to use as a file name.
///
/// Ids that need rewriting get a `-<hash>` suffix of the original id, so two
/// ids that clean up to the same text (`a/b`, `a_b`) never share a file.
pub fn sanitize_file_stem(id: &str) -> String {
    let cleaned = clean_stem(id);
    if cleaned == id {
        return cleaned;
    }
    let digest = format!("{:x}", Sha256::digest(id.as_bytes()));
    format!("{cleaned}-{}", &digest[..STEM_HASH_LEN])
}

fn clean_stem(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "_".into()
    } else {
        cleaned.to_string()
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write pretty-printed JSON atomically: `.<name>.tmp` first, then rename.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| PaperAgentError::validation(format!("JSON serialization failed: {e}")))?;
    write_text(path, &json)?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

/// Write a text file atomically, creating parent directories.
pub fn write_text(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| PaperAgentError::io(parent, e))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".into());
    let temp = parent.join(format!(".{name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| PaperAgentError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| PaperAgentError::io(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read any JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperAgentError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        PaperAgentError::validation(format!("invalid artifact {}: {e}", path.display()))
    })
}

/// Read a Stage 1 or Stage 2 artifact: a JSON array of papers.
pub fn read_papers(path: &Path) -> Result<Vec<Paper>> {
    let papers: Vec<Paper> = read_json(path)?;
    debug!(path = %path.display(), count = papers.len(), "read papers");
    Ok(papers)
}

/// Most recent artifact in `dir` whose name starts with `<prefix>_`.
///
/// Names embed a sortable timestamp, so "most recent" is the greatest name.
pub fn latest_artifact(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let wanted = format!("{prefix}_");
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| {
                    n.starts_with(&wanted) && n.ends_with(".json") && n.matches('.').count() == 1
                })
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pa-artifacts-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = query_fingerprint(&(["ICLR"], [2024], true)).unwrap();
        let b = query_fingerprint(&(["ICLR"], [2024], true)).unwrap();
        let c = query_fingerprint(&(["ICLR"], [2023], true)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn artifact_naming() {
        let name = artifact_name("all_papers", "0123456789ab", at(9, 5, 7));
        assert_eq!(name, "all_papers_0123456789ab_20240501_090507.json");

        let report = sidecar_path(Path::new("/data/all_papers_x_1.json"), "report");
        assert_eq!(report, PathBuf::from("/data/all_papers_x_1.report.json"));
    }

    #[test]
    fn sanitizes_ids() {
        assert_eq!(sanitize_file_stem("abc-123_X"), "abc-123_X");
        assert_eq!(sanitize_file_stem("2401.00001"), "2401.00001");

        let slashed = sanitize_file_stem("a/b:c");
        assert!(slashed.starts_with("a_b_c-"), "got {slashed}");
        assert_eq!(slashed.len(), "a_b_c-".len() + 8);
        assert_eq!(slashed, sanitize_file_stem("a/b:c"));
        assert!(sanitize_file_stem("..").starts_with("_-"));
    }

    #[test]
    fn colliding_ids_get_distinct_stems() {
        assert_eq!(sanitize_file_stem("a_b"), "a_b");
        assert_ne!(sanitize_file_stem("a/b"), sanitize_file_stem("a_b"));
        assert_ne!(sanitize_file_stem("a/b"), sanitize_file_stem("a:b"));
    }

    #[test]
    fn write_json_is_atomic_and_readable() {
        let dir = temp_dir();
        let path = dir.join("nested").join("papers.json");
        let papers: Vec<Paper> = serde_json::from_str(
            r#"[{"id":"p1","title":"A","conference":"ICLR","year":2024}]"#,
        )
        .unwrap();

        write_json(&path, &papers).unwrap();
        let back = read_papers(&path).unwrap();
        assert_eq!(back, papers);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn read_papers_rejects_non_array() {
        let dir = temp_dir();
        let path = dir.join("bad.json");
        std::fs::write(&path, r#"{"id":"p1"}"#).unwrap();
        let err = read_papers(&path).unwrap_err();
        assert!(matches!(err, PaperAgentError::Validation { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn latest_artifact_picks_newest_and_ignores_sidecars() {
        let dir = temp_dir();
        for name in [
            artifact_name("all_papers", "aaaaaaaaaaaa", at(1, 0, 0)),
            artifact_name("all_papers", "aaaaaaaaaaaa", at(2, 0, 0)),
            "all_papers_aaaaaaaaaaaa_20240501_030000.report.json".into(),
            artifact_name("filtered_papers", "aaaaaaaaaaaa", at(4, 0, 0)),
        ] {
            std::fs::write(dir.join(name), "[]").unwrap();
        }
        let latest = latest_artifact(&dir, "all_papers").unwrap();
        assert!(latest.ends_with("all_papers_aaaaaaaaaaaa_20240501_020000.json"));
        assert!(latest_artifact(&dir, "nothing").is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
