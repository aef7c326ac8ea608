//! Update backend reading a GitHub-style "latest release" feed

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use vessel_bus::Subscription;
use vessel_fetch::{percent, DownloadJob, FetchError, FetchRequest, Fetcher, RetryPolicy};

use crate::backend::{ListenerSet, UpdateAsset, UpdateBackend, UpdateInfo};
use crate::error::UpdateError;
use crate::Result;

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    html_url: String,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
    size: Option<u64>,
    /// "sha256:<hex>"
    digest: Option<String>,
}

fn default_asset_suffix() -> &'static str {
    if cfg!(target_os = "windows") {
        ".exe"
    } else if cfg!(target_os = "macos") {
        ".dmg"
    } else {
        ".AppImage"
    }
}

pub struct ReleaseFeedBackend {
    fetcher: Fetcher,
    feed_url: String,
    current_version: String,
    staging_dir: PathBuf,
    asset_suffix: String,
    retry: RetryPolicy,
    progress: ListenerSet<f64>,
    errors: ListenerSet<str>,
}

impl ReleaseFeedBackend {
    pub fn new(
        fetcher: Fetcher,
        feed_url: impl Into<String>,
        current_version: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            feed_url: feed_url.into(),
            current_version: current_version.into(),
            staging_dir: staging_dir.into(),
            asset_suffix: default_asset_suffix().to_string(),
            retry: RetryPolicy::network(),
            progress: ListenerSet::new("download-progress"),
            errors: ListenerSet::new("error"),
        }
    }

    /// Which release asset is the installer for this platform.
    pub fn with_asset_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.asset_suffix = suffix.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    fn update_info(&self, version: &str, release: Release) -> UpdateInfo {
        let asset = release
            .assets
            .into_iter()
            .find(|asset| asset.name.ends_with(&self.asset_suffix))
            .map(|asset| UpdateAsset {
                sha256: asset
                    .digest
                    .as_deref()
                    .and_then(|digest| digest.strip_prefix("sha256:"))
                    .map(str::to_ascii_lowercase),
                name: asset.name,
                url: asset.browser_download_url,
                size: asset.size,
            });

        UpdateInfo {
            version: version.to_string(),
            release_name: release.name,
            release_notes: release.body,
            release_date: release.published_at,
            url: release.html_url,
            asset,
        }
    }

    async fn fetch_installer(&self, update: &UpdateInfo) -> Result<PathBuf> {
        let asset = update.asset.as_ref().ok_or_else(|| UpdateError::NoAsset {
            version: update.version.clone(),
        })?;

        // Only the file name; the feed does not get to pick directories
        let file_name = Path::new(&asset.name)
            .file_name()
            .ok_or_else(|| UpdateError::Feed(format!("Bad asset name: {}", asset.name)))?;
        let mut job = DownloadJob::new(&asset.url, self.staging_dir.join(file_name)).with_retry(self.retry);
        if let Some(expected) = &asset.sha256 {
            job = job.with_sha256(expected.as_str());
        }

        let mut last_whole = None;
        let downloaded = self
            .fetcher
            .download_with_progress(&job, |done, total| {
                let Some(percent) = percent(done, total) else {
                    return;
                };
                let whole = percent.floor() as u8;
                if last_whole != Some(whole) {
                    last_whole = Some(whole);
                    self.progress.emit(&percent);
                }
            })
            .await
            .map_err(|e| match e {
                FetchError::ChecksumMismatch { expected, actual, .. } => UpdateError::ChecksumMismatch {
                    name: asset.name.clone(),
                    expected,
                    actual,
                },
                other => other.into(),
            })?;

        tracing::info!(
            version = %update.version,
            path = %downloaded.path.display(),
            bytes = downloaded.bytes,
            "Update downloaded"
        );
        Ok(downloaded.path)
    }
}

#[async_trait]
impl UpdateBackend for ReleaseFeedBackend {
    async fn check(&self) -> Result<Option<UpdateInfo>> {
        let request =
            FetchRequest::get(&self.feed_url).header("Accept", "application/vnd.github+json");
        let response = self.fetcher.fetch(&request, &self.retry).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| UpdateError::Feed(e.to_string()))?;
        let release: Release =
            serde_json::from_slice(&body).map_err(|e| UpdateError::Feed(e.to_string()))?;

        let latest = release.tag_name.trim_start_matches('v').to_string();
        if !is_newer(&latest, &self.current_version) {
            tracing::debug!(latest = %latest, current = %self.current_version, "Up to date");
            return Ok(None);
        }

        tracing::info!(latest = %latest, current = %self.current_version, "Update available");
        Ok(Some(self.update_info(&latest, release)))
    }

    async fn download(&self, update: &UpdateInfo) -> Result<PathBuf> {
        let result = self.fetch_installer(update).await;
        if let Err(e) = &result {
            self.errors.emit(&e.to_string());
        }
        result
    }

    fn quit_and_install(&self, installer: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(installer, std::fs::Permissions::from_mode(0o755)) {
                tracing::warn!(path = %installer.display(), error = %e, "Failed to mark installer executable");
            }
        }

        let mut command = if cfg!(target_os = "macos") {
            let mut open = tokio::process::Command::new("open");
            open.arg(installer);
            open
        } else {
            tokio::process::Command::new(installer)
        };

        command
            .spawn()
            .map_err(|e| UpdateError::Install(format!("{}: {e}", installer.display())))?;
        tracing::info!(path = %installer.display(), "Installer launched");
        Ok(())
    }

    fn on_progress(&self, listener: Box<dyn Fn(&f64) + Send + Sync>) -> Subscription {
        self.progress.subscribe(listener)
    }

    fn on_error(&self, listener: Box<dyn Fn(&str) + Send + Sync>) -> Subscription {
        self.errors.subscribe(listener)
    }
}

/// Numeric dotted-version comparison: true if `candidate` is newer than
/// `current`. Missing components count as zero; anything after a `-` or `+`
/// is ignored.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    fn components(version: &str) -> Vec<u64> {
        version
            .trim_start_matches('v')
            .split(['.', '-', '+'])
            .map_while(|part| part.parse().ok())
            .collect()
    }

    let (candidate, current) = (components(candidate), components(current));
    let width = candidate.len().max(current.len());
    let padded = |parts: Vec<u64>| -> Vec<u64> {
        parts.into_iter().chain(std::iter::repeat(0)).take(width).collect()
    };
    padded(candidate) > padded(current)
}
