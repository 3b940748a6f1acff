//! Single-URL PDF fetch with bounded retries.
//!
//! Bytes are streamed to `<target>.part` and renamed into place only after
//! the body is complete, so an interrupted run never leaves a file that the
//! next run would mistake for a finished download.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use paperagent_shared::{PaperAgentError, Result};

use crate::throttle::Throttle;

/// Bytes inspected for the `%PDF` signature when the content type is not a PDF.
const SNIFF_LEN: usize = 1024;

const PDF_MAGIC: &[u8] = b"%PDF";

/// Result of fetching one URL, including how many requests it took.
#[derive(Debug)]
pub struct FetchOutcome {
    pub result: Result<()>,
    pub attempts: u32,
}

#[derive(Debug)]
pub struct PdfFetcher {
    client: Client,
    throttle: Arc<Throttle>,
    max_retries: u32,
    backoff: Duration,
}

impl PdfFetcher {
    pub fn new(client: Client, throttle: Arc<Throttle>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            client,
            throttle,
            max_retries: max_retries.max(1),
            backoff,
        }
    }

    /// Fetch `url` into `target`, retrying only retryable failures.
    pub async fn fetch(&self, url: &str, target: &Path) -> FetchOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.throttle.wait().await;
            match self.fetch_once(url, target).await {
                Ok(()) => {
                    return FetchOutcome {
                        result: Ok(()),
                        attempts,
                    };
                }
                Err(e) if e.is_retryable() && attempts < self.max_retries => {
                    let wait = self.backoff * 2u32.pow(attempts - 1);
                    warn!(%url, attempts, ?wait, error = %e, "fetch failed, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    return FetchOutcome {
                        result: Err(e),
                        attempts,
                    };
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str, target: &Path) -> Result<()> {
        debug!(%url, "fetching PDF");
        let mut response = self.client.get(url).send().await.map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let msg = format!("{url}: HTTP {status}");
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                PaperAgentError::retryable(msg)
            } else {
                PaperAgentError::upstream(msg)
            });
        }

        let declared_pdf = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("pdf"));

        // Buffer the head of the body so the signature can be checked before
        // anything touches the disk.
        let mut head: Vec<u8> = Vec::new();
        let mut finished = false;
        while head.len() < SNIFF_LEN {
            match response.chunk().await.map_err(|e| transport_error(url, e))? {
                Some(chunk) => head.extend_from_slice(&chunk),
                None => {
                    finished = true;
                    break;
                }
            }
        }
        if head.is_empty() {
            return Err(PaperAgentError::upstream(format!("{url}: empty body")));
        }
        if !declared_pdf && !head.starts_with(PDF_MAGIC) {
            return Err(PaperAgentError::upstream(format!(
                "{url}: response is not a PDF"
            )));
        }

        let part = part_path(target);
        let written = async {
            let mut file = tokio::fs::File::create(&part)
                .await
                .map_err(|e| PaperAgentError::io(&part, e))?;
            file.write_all(&head)
                .await
                .map_err(|e| PaperAgentError::io(&part, e))?;
            if !finished {
                while let Some(chunk) = response.chunk().await.map_err(|e| transport_error(url, e))? {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| PaperAgentError::io(&part, e))?;
                }
            }
            file.flush().await.map_err(|e| PaperAgentError::io(&part, e))?;
            Ok::<(), PaperAgentError>(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        tokio::fs::rename(&part, target)
            .await
            .map_err(|e| PaperAgentError::io(target, e))
    }
}

/// `<target>.part`
pub fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn transport_error(url: &str, e: reqwest::Error) -> PaperAgentError {
    let msg = format!("{url}: {e}");
    if e.is_timeout() || e.is_connect() || e.is_body() {
        PaperAgentError::retryable(msg)
    } else {
        PaperAgentError::upstream(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(retries: u32) -> PdfFetcher {
        PdfFetcher::new(
            Client::new(),
            Arc::new(Throttle::new(Duration::ZERO)),
            retries,
            Duration::from_millis(1),
        )
    }

    fn temp_target() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("pa-fetch-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("p.pdf");
        (dir, target)
    }

    #[tokio::test]
    async fn accepts_pdf_signature_without_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 body".to_vec()))
            .mount(&server)
            .await;

        let (dir, target) = temp_target();
        let out = fetcher(2).fetch(&format!("{}/x", server.uri()), &target).await;
        assert!(out.result.is_ok());
        assert_eq!(out.attempts, 1);
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.7 body");
        assert!(!part_path(&target).exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn rejects_html_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>login</html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (dir, target) = temp_target();
        let out = fetcher(3).fetch(&server.uri(), &target).await;
        assert!(out.result.unwrap_err().to_string().contains("not a PDF"));
        assert_eq!(out.attempts, 1);
        assert!(!target.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn retries_server_errors_up_to_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let (dir, target) = temp_target();
        let out = fetcher(3).fetch(&server.uri(), &target).await;
        assert!(out.result.is_err());
        assert_eq!(out.attempts, 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn not_found_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (dir, target) = temp_target();
        let out = fetcher(3).fetch(&server.uri(), &target).await;
        assert!(!out.result.unwrap_err().is_retryable());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(part_path(Path::new("/a/b.pdf")), PathBuf::from("/a/b.pdf.part"));
    }
}
