//! The fixed set of tracked applications and their compiled-in signing fingerprints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::release::ReleaseIdKind;

/// Where the newest release of an app is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadSource {
    /// Latest non-prerelease GitHub release of `repo` carrying an asset named `asset`.
    GitHub {
        repo: &'static str,
        asset: &'static str,
    },
    /// F-Droid package API for the app's package name.
    FDroid,
}

impl DownloadSource {
    pub fn label(&self) -> &'static str {
        match self {
            DownloadSource::GitHub { .. } => "GitHub",
            DownloadSource::FDroid => "F-Droid",
        }
    }
}

/// A tracked application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum App {
    Brave,
    Bromite,
    Mull,
}

impl App {
    pub const ALL: [App; 3] = [App::Brave, App::Bromite, App::Mull];

    /// Stable identifier used in storage keys and on the command line.
    pub fn key(self) -> &'static str {
        match self {
            App::Brave => "brave",
            App::Bromite => "bromite",
            App::Mull => "mull",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            App::Brave => "Brave Browser",
            App::Bromite => "Bromite",
            App::Mull => "Mull",
        }
    }

    /// Android package name, used to query the installed package.
    pub fn package_name(self) -> &'static str {
        match self {
            App::Brave => "com.brave.browser",
            App::Bromite => "org.bromite.bromite",
            App::Mull => "us.spotco.fennec_dos",
        }
    }

    /// Which kind of release identifier this app publishes. Never changes per app.
    pub fn release_id_kind(self) -> ReleaseIdKind {
        match self {
            App::Brave | App::Mull => ReleaseIdKind::Version,
            App::Bromite => ReleaseIdKind::Timestamp,
        }
    }

    pub fn download_source(self) -> DownloadSource {
        match self {
            App::Brave => DownloadSource::GitHub {
                repo: "brave/brave-browser",
                asset: "BraveMonoarm64.apk",
            },
            App::Bromite => DownloadSource::GitHub {
                repo: "bromite/bromite",
                asset: "arm64_ChromePublic.apk",
            },
            App::Mull => DownloadSource::FDroid,
        }
    }

    /// SHA-256 of the DER-encoded signing certificate, lowercase hex.
    pub fn signature_fingerprint(self) -> &'static str {
        match self {
            App::Brave => "9c2db70513515fdbfbbc585b3edf3d7123d4dc67c94ffd306361c1d79bbf18ac",
            App::Bromite => "e1ee5cd076d7b0dc84cb2b45fb78b86df2eb39a3b6c56ba3dc292a5e0c3b9504",
            App::Mull => "ff81f5be56396594eee70fef2832256e15214122e2ba9cedd26005ffd4bcaaa8",
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Error for an app name that is not tracked.
#[derive(Debug, thiserror::Error)]
#[error("unknown app '{0}' (expected one of: brave, bromite, mull)")]
pub struct UnknownApp(pub String);

impl FromStr for App {
    type Err = UnknownApp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        App::ALL
            .into_iter()
            .find(|app| app.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownApp(s.to_string()))
    }
}
