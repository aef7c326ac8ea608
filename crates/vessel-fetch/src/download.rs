//! Atomic downloads
//!
//! The body is streamed into a temporary file next to the destination. Only
//! after the stream completes is the file flushed, fsynced and renamed into
//! place, so the destination either holds the whole payload or nothing. A
//! payload that fails its expected digest is never renamed into place.

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::FetchError;
use crate::request::{FetchRequest, Fetcher};
use crate::retry::RetryPolicy;
use crate::Result;

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub request: FetchRequest,
    pub destination: PathBuf,
    pub retry: RetryPolicy,
    /// Lowercase hex SHA-256 the payload must match
    pub expected_sha256: Option<String>,
}

impl DownloadJob {
    /// A GET download that retries network failures with the default backoff.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            request: FetchRequest::get(url),
            destination: destination.into(),
            retry: RetryPolicy::network(),
            expected_sha256: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into().to_ascii_lowercase());
        self
    }
}

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub path: PathBuf,
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the payload
    pub sha256: String,
}

/// Progress as a 0-100 percentage, when the total size is known.
pub fn percent(downloaded: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(total) if total > 0 => Some((downloaded as f64 / total as f64 * 100.0).min(100.0)),
        _ => None,
    }
}

impl Fetcher {
    pub async fn download(&self, job: &DownloadJob) -> Result<Downloaded> {
        self.download_with_progress(job, |_, _| {}).await
    }

    /// Like [`Fetcher::download`], reporting `(downloaded, total)` after every chunk.
    pub async fn download_with_progress<P>(&self, job: &DownloadJob, mut progress: P) -> Result<Downloaded>
    where
        P: FnMut(u64, Option<u64>),
    {
        let url = job.request.url.clone();
        let response = self.fetch(&job.request, &job.retry).await?;
        let total = response.content_length();

        let directory = parent_dir(&job.destination);
        tokio::fs::create_dir_all(&directory).await?;

        // Dropping the temp path deletes the partial file on every early return
        let staging = tempfile::Builder::new()
            .prefix(".vessel-")
            .suffix(".part")
            .tempfile_in(&directory)?;
        let (std_file, temp_path) = staging.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| FetchError::Interrupted {
                url: url.clone(),
                source,
            })?;

            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded = downloaded.saturating_add(chunk.len() as u64);
            progress(downloaded, total);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let sha256 = hex_digest(hasher);
        if let Some(expected) = &job.expected_sha256 {
            if *expected != sha256 {
                tracing::warn!(url = %url, expected = %expected, actual = %sha256, "Rejected download");
                return Err(FetchError::ChecksumMismatch {
                    url,
                    expected: expected.clone(),
                    actual: sha256,
                });
            }
        }

        temp_path
            .persist(&job.destination)
            .map_err(|e| FetchError::Io(e.error))?;
        sync_directory(&directory).await;

        tracing::info!(
            url = %url,
            path = %job.destination.display(),
            bytes = downloaded,
            sha256 = %sha256,
            "Download completed"
        );

        Ok(Downloaded {
            path: job.destination.clone(),
            bytes: downloaded,
            sha256,
        })
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Makes the rename itself durable. Best effort: the file data is already synced.
async fn sync_directory(directory: &Path) {
    #[cfg(unix)]
    {
        let result = match tokio::fs::File::open(directory).await {
            Ok(dir) => dir.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::debug!(path = %directory.display(), error = %e, "Directory fsync skipped");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = directory;
    }
}
