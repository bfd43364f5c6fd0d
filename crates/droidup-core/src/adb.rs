//! Installer and installed-package signer source backed by the `adb` tool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;

use crate::apps::App;
use crate::config::AdbConfig;
use crate::fingerprint::{read_apk_signer, SignerSource, VerifyError};
use crate::install::{InstallOutcome, PackageInstaller};

#[derive(Debug, Clone)]
pub struct Adb {
    program: String,
    serial: Option<String>,
}

impl Adb {
    pub fn new(cfg: &AdbConfig) -> Self {
        Self {
            program: cfg.path.clone(),
            serial: cfg.serial.clone(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args).kill_on_drop(true);
        tracing::debug!(program = %self.program, ?args, "running adb");
        cmd.output()
            .await
            .with_context(|| format!("run {} {}", self.program, args.join(" ")))
    }

    /// On-device paths of the package's APKs; empty if it is not installed.
    async fn package_paths(&self, package: &str) -> Result<Vec<String>> {
        let out = self.run(&["shell", "pm", "path", package]).await?;
        pm_path_outcome(&out)
    }
}

/// An empty `pm path` is only "not installed" when adb itself reached the
/// device; "no devices", "unauthorized" and the like are errors.
fn pm_path_outcome(output: &Output) -> Result<Vec<String>> {
    let paths = parse_pm_path(&String::from_utf8_lossy(&output.stdout));
    if !paths.is_empty() || output.status.success() {
        return Ok(paths);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let lower = stderr.to_ascii_lowercase();
    if stderr.is_empty() || (lower.contains("package") && lower.contains("not found")) {
        return Ok(paths);
    }
    anyhow::bail!("adb shell pm path failed: {}", stderr)
}

/// Lines look like `package:/data/app/~~x==/com.example-1/base.apk`; base.apk first.
fn parse_pm_path(stdout: &str) -> Vec<String> {
    let mut paths: Vec<String> = stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(str::to_owned)
        .collect();
    paths.sort_by_key(|p| !p.ends_with("/base.apk"));
    paths
}

/// `adb install` prints "Success" on stdout; failures carry a `Failure [CODE]` line.
fn install_outcome(output: &Output) -> InstallOutcome {
    if output.status.success() && String::from_utf8_lossy(&output.stdout).contains("Success") {
        return InstallOutcome::Installed;
    }
    let text = if output.stderr.is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    InstallOutcome::Rejected {
        reason: String::from_utf8_lossy(text).trim().to_string(),
    }
}

#[async_trait]
impl PackageInstaller for Adb {
    async fn install(&self, app: App, artifact: &Path) -> Result<InstallOutcome> {
        let path = artifact.to_string_lossy();
        let out = self.run(&["install", "-r", &*path]).await?;
        let outcome = install_outcome(&out);
        if let InstallOutcome::Rejected { reason } = &outcome {
            tracing::warn!(%app, reason = %reason, "adb install rejected");
        }
        Ok(outcome)
    }
}

#[async_trait]
impl SignerSource for Adb {
    async fn artifact_signer(&self, path: &Path) -> Result<Vec<u8>, VerifyError> {
        read_apk_signer(path).await
    }

    async fn installed_signer(&self, package: &str) -> Result<Vec<u8>, VerifyError> {
        let paths = self
            .package_paths(package)
            .await
            .map_err(VerifyError::Unavailable)?;
        let Some(remote) = paths.first() else {
            return Err(VerifyError::NotInstalled {
                package: package.to_string(),
            });
        };

        let scratch = tempfile::tempdir()
            .context("create scratch dir")
            .map_err(VerifyError::Unavailable)?;
        let local = scratch.path().join("installed.apk");
        let local_str = local.to_string_lossy().into_owned();
        let out = self
            .run(&["pull", remote.as_str(), local_str.as_str()])
            .await
            .map_err(VerifyError::Unavailable)?;
        if !out.status.success() {
            return Err(VerifyError::Unavailable(anyhow::anyhow!(
                "adb pull {} failed: {}",
                remote,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        read_apk_signer(&local).await
    }
}
