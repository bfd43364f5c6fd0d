//! The update pipeline: resolve, download, verify, install and re-verify one app.
//!
//! [`UpdatePipeline::start`] spawns one run on the tokio runtime and hands back a
//! [`PipelineHandle`]. The run emits every [`PipelineState`] it enters to the
//! handle, stops at the first terminal state, and never emits anything once
//! the handle's kill switch has been pulled. Collaborator failures become
//! terminal states; `join` only fails if the run itself panicked.

mod lease;
mod run;
mod state;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use crate::apps::App;
use crate::cache::MetadataCache;
use crate::config::DroidupConfig;
use crate::download::{DownloadOrchestrator, DownloadService, TaskId};
use crate::fetch::MetadataSource;
use crate::fingerprint::{FingerprintVerifier, SignerSource, VerificationResult};
use crate::install::PackageInstaller;
use crate::installed::InstalledReleases;
use crate::kv::KeyValueStore;
use crate::release::{Metadata, ReleaseId};

pub use state::{FingerprintProblem, PipelineState};

/// Everything a run talks to. Clones share the underlying services.
#[derive(Clone)]
pub struct PipelineDeps {
    pub cache: MetadataCache<dyn KeyValueStore>,
    pub installed: InstalledReleases<dyn KeyValueStore>,
    pub source: Arc<dyn MetadataSource>,
    pub downloads: DownloadOrchestrator<dyn DownloadService>,
    pub verifier: FingerprintVerifier<dyn SignerSource>,
    pub installer: Arc<dyn PackageInstaller>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Delay between download status checks.
    pub poll_interval: Duration,
    /// Upper bound on one remote metadata lookup.
    pub fetch_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&DroidupConfig> for PipelineOptions {
    fn from(cfg: &DroidupConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            fetch_timeout: cfg.fetch_timeout(),
        }
    }
}

/// One update attempt for one app.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub app: App,
    /// Download from here instead of resolving the latest release.
    pub download_url: Option<Url>,
    /// Release being installed when `download_url` is given. Recorded on success.
    pub release_id: Option<ReleaseId>,
    /// Hex SHA-256 of the signing certificate to accept.
    pub expected_fingerprint: String,
}

impl UpdateRequest {
    pub fn new(app: App) -> Self {
        Self {
            app,
            download_url: None,
            release_id: None,
            expected_fingerprint: app.signature_fingerprint().to_string(),
        }
    }

    pub fn with_download_url(mut self, url: Url) -> Self {
        self.download_url = Some(url);
        self
    }

    pub fn with_release_id(mut self, release: ReleaseId) -> Self {
        self.release_id = Some(release);
        self
    }

    pub fn with_expected_fingerprint(mut self, hex_fp: impl Into<String>) -> Self {
        self.expected_fingerprint = hex_fp.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineCommand {
    ConfirmInstall,
    DeclineInstall,
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub app: App,
    pub final_state: PipelineState,
    /// Metadata the run downloaded from, when it came from the cache or a lookup.
    pub metadata: Option<Metadata>,
    pub task: Option<TaskId>,
    pub download_check: Option<VerificationResult>,
    pub installed_check: Option<VerificationResult>,
}

impl PipelineOutcome {
    /// Installed and the installed signer is the expected one.
    pub fn succeeded(&self) -> bool {
        matches!(self.final_state, PipelineState::InstalledFingerprintGood(_))
    }
}

/// Caller side of a running pipeline. Dropping it pulls the kill switch.
pub struct PipelineHandle {
    app: App,
    commands: mpsc::UnboundedSender<PipelineCommand>,
    states: mpsc::UnboundedReceiver<PipelineState>,
    cancel: CancellationToken,
    task: JoinHandle<PipelineOutcome>,
    _teardown: DropGuard,
}

impl PipelineHandle {
    pub fn app(&self) -> App {
        self.app
    }

    /// Allow the install. Only acted on while the run is awaiting confirmation;
    /// earlier confirmations are discarded. Returns false if the run has ended.
    pub fn confirm_install(&self) -> bool {
        self.commands.send(PipelineCommand::ConfirmInstall).is_ok()
    }

    /// Refuse the install; the run ends as `InstallFailed`.
    pub fn decline_install(&self) -> bool {
        self.commands.send(PipelineCommand::DeclineInstall).is_ok()
    }

    /// Kill switch. Polling stops, the download is removed, and no further state is emitted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next state entered by the run, or `None` once it has finished and all states were read.
    pub async fn next_state(&mut self) -> Option<PipelineState> {
        self.states.recv().await
    }

    /// Wait for the run to finish. A run still awaiting confirmation is cancelled.
    pub async fn join(self) -> Result<PipelineOutcome> {
        let PipelineHandle {
            app,
            commands,
            task,
            _teardown,
            ..
        } = self;
        drop(commands);
        let outcome = task
            .await
            .with_context(|| format!("update pipeline for {} did not finish", app))?;
        drop(_teardown);
        Ok(outcome)
    }
}

/// Starts update runs. Runs for different apps may overlap; they share the cache.
#[derive(Clone)]
pub struct UpdatePipeline {
    deps: PipelineDeps,
    options: PipelineOptions,
}

impl UpdatePipeline {
    pub fn new(deps: PipelineDeps, options: PipelineOptions) -> Self {
        Self { deps, options }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// Spawn a run for `request`. Must be called from within a tokio runtime.
    pub fn start(&self, request: UpdateRequest) -> PipelineHandle {
        let app = request.app;
        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (states_tx, states_rx) = mpsc::unbounded_channel();
        let run = run::Run::new(
            self.deps.clone(),
            self.options,
            app,
            cancel.clone(),
            states_tx,
            commands_rx,
        );
        tracing::info!(%app, "update started");
        let task = tokio::spawn(run.execute(request));
        PipelineHandle {
            app,
            commands: commands_tx,
            states: states_rx,
            _teardown: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }
}
