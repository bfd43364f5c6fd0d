//! The package installer seam.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::apps::App;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    /// The installer ran and refused (user declined, signature conflict, ...).
    Rejected { reason: String },
}

/// Installs a downloaded package. Installation needs the user's consent on the
/// device, so the result may take a while to arrive.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, app: App, artifact: &Path) -> Result<InstallOutcome>;
}
