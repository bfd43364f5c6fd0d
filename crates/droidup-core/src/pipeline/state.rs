//! States an update attempt moves through.

use std::fmt;
use std::path::PathBuf;

use crate::download::{DownloadStatus, TaskId};
use crate::fingerprint::{VerificationResult, VerifyError};
use crate::release::Metadata;

/// Why a fingerprint check did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintProblem {
    /// The signer was read and is not the expected one.
    Mismatch(VerificationResult),
    /// The package is corrupt, not a package, or unsigned.
    Unreadable(String),
    NotInstalled,
    /// The device or its tooling could not be queried.
    Unavailable(String),
}

impl From<VerifyError> for FingerprintProblem {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Unreadable { .. } => FingerprintProblem::Unreadable(err.to_string()),
            VerifyError::NotInstalled { .. } => FingerprintProblem::NotInstalled,
            VerifyError::Unavailable(e) => FingerprintProblem::Unavailable(format!("{:#}", e)),
        }
    }
}

impl fmt::Display for FingerprintProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintProblem::Mismatch(r) => write!(
                f,
                "fingerprint {} does not match expected {}",
                r.observed_fingerprint_hex, r.expected_fingerprint_hex
            ),
            FingerprintProblem::Unreadable(reason) => f.write_str(reason),
            FingerprintProblem::NotInstalled => f.write_str("package is not installed"),
            FingerprintProblem::Unavailable(reason) => write!(f, "cannot check: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    FetchingMetadata,
    MetadataResolved(Metadata),
    MetadataFailed {
        reason: String,
    },
    Downloading {
        task: TaskId,
        status: DownloadStatus,
        progress: u8,
    },
    DownloadFailed {
        reason: String,
    },
    DownloadSucceeded {
        artifact: PathBuf,
    },
    VerifyingDownload,
    DownloadFingerprintGood(VerificationResult),
    DownloadFingerprintBad(FingerprintProblem),
    AwaitingInstallConfirmation,
    Installing,
    InstallFailed {
        reason: String,
    },
    InstallSucceeded,
    VerifyingInstalled,
    InstalledFingerprintGood(VerificationResult),
    InstalledFingerprintBad(FingerprintProblem),
    /// The kill switch fired. Returned from `join`, never sent to observers.
    Cancelled,
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::FetchingMetadata => "fetching_metadata",
            PipelineState::MetadataResolved(_) => "metadata_resolved",
            PipelineState::MetadataFailed { .. } => "metadata_failed",
            PipelineState::Downloading { .. } => "downloading",
            PipelineState::DownloadFailed { .. } => "download_failed",
            PipelineState::DownloadSucceeded { .. } => "download_succeeded",
            PipelineState::VerifyingDownload => "verifying_download",
            PipelineState::DownloadFingerprintGood(_) => "download_fingerprint_good",
            PipelineState::DownloadFingerprintBad(_) => "download_fingerprint_bad",
            PipelineState::AwaitingInstallConfirmation => "awaiting_install_confirmation",
            PipelineState::Installing => "installing",
            PipelineState::InstallFailed { .. } => "install_failed",
            PipelineState::InstallSucceeded => "install_succeeded",
            PipelineState::VerifyingInstalled => "verifying_installed",
            PipelineState::InstalledFingerprintGood(_) => "installed_fingerprint_good",
            PipelineState::InstalledFingerprintBad(_) => "installed_fingerprint_bad",
            PipelineState::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::MetadataFailed { .. }
                | PipelineState::DownloadFailed { .. }
                | PipelineState::DownloadFingerprintBad(_)
                | PipelineState::InstallFailed { .. }
                | PipelineState::InstalledFingerprintGood(_)
                | PipelineState::InstalledFingerprintBad(_)
                | PipelineState::Cancelled
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::FetchingMetadata => f.write_str("looking up latest release"),
            PipelineState::MetadataResolved(m) => {
                write!(f, "found release {} at {}", m.release_id(), m.download_url())
            }
            PipelineState::MetadataFailed { reason } => {
                write!(f, "release lookup failed: {}", reason)
            }
            PipelineState::Downloading {
                task,
                status,
                progress,
            } => write!(f, "download {} {} {}%", task, status.as_str(), progress),
            PipelineState::DownloadFailed { reason } => write!(f, "download failed: {}", reason),
            PipelineState::DownloadSucceeded { artifact } => {
                write!(f, "downloaded {}", artifact.display())
            }
            PipelineState::VerifyingDownload => f.write_str("checking download signature"),
            PipelineState::DownloadFingerprintGood(r) => {
                write!(f, "download signed by {}", r.observed_fingerprint_hex)
            }
            PipelineState::DownloadFingerprintBad(p) => {
                write!(f, "download signature rejected: {}", p)
            }
            PipelineState::AwaitingInstallConfirmation => f.write_str("ready to install"),
            PipelineState::Installing => f.write_str("installing"),
            PipelineState::InstallFailed { reason } => write!(f, "install failed: {}", reason),
            PipelineState::InstallSucceeded => f.write_str("installed"),
            PipelineState::VerifyingInstalled => f.write_str("checking installed signature"),
            PipelineState::InstalledFingerprintGood(r) => {
                write!(f, "installed app signed by {}", r.observed_fingerprint_hex)
            }
            PipelineState::InstalledFingerprintBad(p) => {
                write!(f, "installed signature rejected: {}", p)
            }
            PipelineState::Cancelled => f.write_str("cancelled"),
        }
    }
}
