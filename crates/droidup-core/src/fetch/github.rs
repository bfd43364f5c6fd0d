//! GitHub releases API.

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use url::Url;

use crate::release::{Metadata, ReleaseId, ReleaseIdKind};

#[derive(Debug, Clone, Deserialize)]
pub struct GithubAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    pub published_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

/// Newest published, non-prerelease release that carries `asset`.
/// Releases are expected newest first, as the API returns them.
pub(super) fn select_release(
    releases: &[GithubRelease],
    asset: &str,
    kind: ReleaseIdKind,
) -> Result<Option<Metadata>> {
    for release in releases.iter().filter(|r| !r.prerelease && !r.draft) {
        let Some(found) = release.assets.iter().find(|a| a.name == asset) else {
            continue;
        };
        let release_id = match kind {
            ReleaseIdKind::Version => {
                ReleaseId::Version(release.tag_name.trim_start_matches('v').to_string())
            }
            ReleaseIdKind::Timestamp => match release.published_at {
                Some(ts) => ReleaseId::Timestamp(ts),
                None => continue,
            },
        };
        let url = Url::parse(&found.browser_download_url)?;
        return Ok(Some(Metadata::new(url, release_id)));
    }
    Ok(None)
}
