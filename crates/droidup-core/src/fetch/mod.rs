//! Remote release metadata lookups (GitHub releases, F-Droid package API).

mod fdroid;
mod github;
mod http;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::apps::{App, DownloadSource};
use crate::release::Metadata;

pub use fdroid::FdroidPackage;
pub use github::GithubRelease;

/// Where the newest release of an app is resolved. `Ok(None)` = no usable release.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, app: App) -> Result<Option<Metadata>>;
}

/// Looks releases up on the app's public download source.
#[derive(Debug, Clone)]
pub struct RemoteMetadataSource {
    github_api: String,
    fdroid_base: String,
    timeout: Duration,
}

impl RemoteMetadataSource {
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoints("https://api.github.com", "https://f-droid.org", timeout)
    }

    /// Point at other hosts (mirrors, local test servers). No trailing slash.
    pub fn with_endpoints(github_api: &str, fdroid_base: &str, timeout: Duration) -> Self {
        Self {
            github_api: github_api.trim_end_matches('/').to_string(),
            fdroid_base: fdroid_base.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn lookup_blocking(&self, app: App) -> Result<Option<Metadata>> {
        match app.download_source() {
            DownloadSource::GitHub { repo, asset } => {
                let url = format!("{}/repos/{}/releases?per_page=20", self.github_api, repo);
                let releases: Vec<GithubRelease> = http::get_json(&url, self.timeout)?;
                github::select_release(&releases, asset, app.release_id_kind())
            }
            DownloadSource::FDroid => {
                let url = format!("{}/api/v1/packages/{}", self.fdroid_base, app.package_name());
                let package: FdroidPackage = http::get_json(&url, self.timeout)?;
                fdroid::select_release(&package, &self.fdroid_base)
            }
        }
    }
}

#[async_trait]
impl MetadataSource for RemoteMetadataSource {
    async fn fetch(&self, app: App) -> Result<Option<Metadata>> {
        let this = self.clone();
        let found = tokio::task::spawn_blocking(move || this.lookup_blocking(app)).await??;
        match &found {
            Some(meta) => tracing::info!(
                %app,
                source = app.download_source().label(),
                release = %meta.release_id(),
                "found latest release"
            ),
            None => tracing::info!(%app, source = app.download_source().label(), "no suitable release"),
        }
        Ok(found)
    }
}
