//! F-Droid package API (`/api/v1/packages/<package>`).

use anyhow::Result;
use serde::Deserialize;
use url::Url;

use crate::release::{Metadata, ReleaseId};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FdroidVersion {
    pub version_name: String,
    pub version_code: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FdroidPackage {
    pub package_name: String,
    #[serde(default)]
    pub packages: Vec<FdroidVersion>,
}

/// Highest version code published for the package. Several builds (one per
/// ABI) can share a version name; the highest code is the arm64 build.
pub(super) fn select_release(package: &FdroidPackage, base: &str) -> Result<Option<Metadata>> {
    let Some(latest) = package.packages.iter().max_by_key(|p| p.version_code) else {
        return Ok(None);
    };
    let url = Url::parse(&format!(
        "{}/repo/{}_{}.apk",
        base, package.package_name, latest.version_code
    ))?;
    Ok(Some(Metadata::new(
        url,
        ReleaseId::Version(latest.version_name.clone()),
    )))
}
