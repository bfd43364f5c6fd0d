//! The body of one pipeline run.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::lease::{TaskLease, TerminalLatch};
use super::state::{FingerprintProblem, PipelineState};
use super::{PipelineCommand, PipelineDeps, PipelineOptions, PipelineOutcome, UpdateRequest};
use crate::apps::App;
use crate::cache::CacheError;
use crate::download::{poll_until_terminal, DownloadStatus, PollEvent, TaskId};
use crate::fingerprint::VerificationResult;
use crate::install::InstallOutcome;
use crate::release::{Metadata, ReleaseId};

/// `Err` carries the terminal state a step ended the run with.
type Step<T> = Result<T, PipelineState>;

/// `None` if `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

struct Target {
    url: Url,
    release: Option<ReleaseId>,
}

impl From<&Metadata> for Target {
    fn from(m: &Metadata) -> Self {
        Self {
            url: m.download_url().clone(),
            release: Some(m.release_id().clone()),
        }
    }
}

pub(super) struct Run {
    deps: PipelineDeps,
    options: PipelineOptions,
    app: App,
    cancel: CancellationToken,
    states: mpsc::UnboundedSender<PipelineState>,
    commands: mpsc::UnboundedReceiver<PipelineCommand>,
    metadata: Option<Metadata>,
    task: Option<TaskId>,
    download_check: Option<VerificationResult>,
    installed_check: Option<VerificationResult>,
}

impl Run {
    pub(super) fn new(
        deps: PipelineDeps,
        options: PipelineOptions,
        app: App,
        cancel: CancellationToken,
        states: mpsc::UnboundedSender<PipelineState>,
        commands: mpsc::UnboundedReceiver<PipelineCommand>,
    ) -> Self {
        Self {
            deps,
            options,
            app,
            cancel,
            states,
            commands,
            metadata: None,
            task: None,
            download_check: None,
            installed_check: None,
        }
    }

    pub(super) async fn execute(mut self, request: UpdateRequest) -> PipelineOutcome {
        let final_state = match self.steps(&request).await {
            Ok(state) | Err(state) => state,
        };
        if final_state == PipelineState::Cancelled {
            tracing::info!(app = %self.app, "update cancelled");
        }
        PipelineOutcome {
            app: self.app,
            final_state,
            metadata: self.metadata,
            task: self.task,
            download_check: self.download_check,
            installed_check: self.installed_check,
        }
    }

    async fn steps(&mut self, request: &UpdateRequest) -> Step<PipelineState> {
        self.emit(PipelineState::Idle);
        let target = self.resolve(request).await?;
        let (lease, artifact) = self.download(&target).await?;
        self.verify_download(&artifact, &request.expected_fingerprint)
            .await?;
        self.await_confirmation().await?;
        self.install(lease, &artifact, target.release.as_ref())
            .await?;
        Ok(self.verify_installed(&request.expected_fingerprint).await)
    }

    /// Send `state` to the observer unless the kill switch has fired.
    fn emit(&self, state: PipelineState) {
        if self.cancel.is_cancelled() {
            tracing::debug!(app = %self.app, state = state.name(), "dropping transition after cancel");
            return;
        }
        tracing::info!(app = %self.app, state = state.name(), "{}", state);
        // The observer may have stopped listening; the run still finishes.
        let _ = self.states.send(state);
    }

    fn finish(&self, state: PipelineState) -> PipelineState {
        self.emit(state.clone());
        state
    }

    async fn resolve(&mut self, request: &UpdateRequest) -> Step<Target> {
        let app = self.app;

        if let Some(url) = &request.download_url {
            tracing::info!(%app, %url, "using supplied download location");
            return Ok(Target {
                url: url.clone(),
                release: request.release_id.clone(),
            });
        }

        match until_cancelled(&self.cancel, self.deps.cache.lookup(app)).await {
            None => return Err(PipelineState::Cancelled),
            Some(Ok(Some(metadata))) => {
                tracing::info!(%app, release = %metadata.release_id(), "using cached release metadata");
                let target = Target::from(&metadata);
                self.metadata = Some(metadata);
                return Ok(target);
            }
            Some(Ok(None)) => {}
            Some(Err(e @ CacheError::Corrupted { .. })) => {
                tracing::warn!(%app, "refetching over corrupted cache entry: {}", e);
            }
            Some(Err(e)) => {
                tracing::warn!(%app, "metadata cache unavailable: {}", e);
            }
        }

        self.emit(PipelineState::FetchingMetadata);
        let fetch = tokio::time::timeout(self.options.fetch_timeout, self.deps.source.fetch(app));
        let reason = match until_cancelled(&self.cancel, fetch).await {
            None => return Err(PipelineState::Cancelled),
            Some(Ok(Ok(Some(metadata)))) => {
                if let Err(e) = self.deps.cache.store(app, &metadata).await {
                    tracing::warn!(%app, "could not cache release metadata: {}", e);
                }
                let target = Target::from(&metadata);
                self.metadata = Some(metadata.clone());
                self.emit(PipelineState::MetadataResolved(metadata));
                return Ok(target);
            }
            Some(Ok(Ok(None))) => "no release with a download location".to_string(),
            Some(Ok(Err(e))) => format!("{:#}", e),
            Some(Err(_)) => format!("timed out after {:?}", self.options.fetch_timeout),
        };
        Err(self.finish(PipelineState::MetadataFailed { reason }))
    }

    async fn download(&mut self, target: &Target) -> Step<(TaskLease, PathBuf)> {
        let app = self.app;
        let downloads = self.deps.downloads.clone();
        // Subscribe before enqueueing so a fast completion is not missed.
        let mut completions = downloads.subscribe_completions();
        let task = match downloads.enqueue(app, target.url.as_str(), app.title()) {
            Ok(task) => task,
            Err(e) => {
                return Err(self.finish(PipelineState::DownloadFailed {
                    reason: format!("{:#}", e),
                }))
            }
        };
        self.task = Some(task);
        let lease = TaskLease::new(downloads.clone(), task);

        let mut shown = (DownloadStatus::Pending, 0u8);
        self.emit(PipelineState::Downloading {
            task,
            status: shown.0,
            progress: shown.1,
        });

        let poll_cancel = self.cancel.child_token();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        tokio::spawn(poll_until_terminal(
            Arc::clone(downloads.service()),
            task,
            self.options.poll_interval,
            poll_cancel.clone(),
            events_tx,
        ));
        // Stops the poller on every way out of this function.
        let _stop_polling = poll_cancel.drop_guard();

        let mut latch = TerminalLatch::default();
        let mut polling = true;
        let mut listening = true;
        let status = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PipelineState::Cancelled),
                event = events.recv(), if polling => match event {
                    Some(PollEvent::Progress { task: id, snapshot }) if id == lease.task() => {
                        let now = (snapshot.status, snapshot.progress);
                        if !snapshot.status.is_terminal() && now != shown {
                            shown = now;
                            self.emit(PipelineState::Downloading {
                                task,
                                status: snapshot.status,
                                progress: snapshot.progress,
                            });
                        }
                    }
                    Some(PollEvent::Terminal { task: id, status }) if id == lease.task() => {
                        if latch.fire(id) {
                            break status;
                        }
                    }
                    Some(_) => {}
                    None => polling = false,
                },
                done = completions.recv(), if listening => match done {
                    Ok(id) if id == task => {
                        let status = match downloads.status(task) {
                            Ok(snapshot) => snapshot.status,
                            Err(e) => {
                                tracing::warn!(%task, "status after completion unavailable: {:#}", e);
                                DownloadStatus::Failed
                            }
                        };
                        if status.is_terminal() && latch.fire(id) {
                            break status;
                        }
                    }
                    Ok(other) => {
                        tracing::debug!(%task, %other, "ignoring completion of another download");
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(%task, missed, "completion notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => listening = false,
                },
            }
        };

        if status != DownloadStatus::Successful {
            return Err(self.finish(PipelineState::DownloadFailed {
                reason: format!("download {} ended with status {}", task, status.as_str()),
            }));
        }
        match downloads.locate(task) {
            Ok(artifact) => {
                self.emit(PipelineState::DownloadSucceeded {
                    artifact: artifact.clone(),
                });
                Ok((lease, artifact))
            }
            Err(e) => Err(self.finish(PipelineState::DownloadFailed {
                reason: format!("{:#}", e),
            })),
        }
    }

    async fn verify_download(&mut self, artifact: &Path, expected: &str) -> Step<()> {
        self.emit(PipelineState::VerifyingDownload);
        let checked =
            until_cancelled(&self.cancel, self.deps.verifier.verify_file(artifact, expected)).await;
        match checked {
            None => Err(PipelineState::Cancelled),
            Some(Ok(result)) => {
                self.download_check = Some(result.clone());
                if result.passed {
                    self.emit(PipelineState::DownloadFingerprintGood(result));
                    Ok(())
                } else {
                    Err(self.finish(PipelineState::DownloadFingerprintBad(
                        FingerprintProblem::Mismatch(result),
                    )))
                }
            }
            Some(Err(e)) => Err(self.finish(PipelineState::DownloadFingerprintBad(e.into()))),
        }
    }

    async fn await_confirmation(&mut self) -> Step<()> {
        while let Ok(stale) = self.commands.try_recv() {
            tracing::debug!(app = %self.app, ?stale, "discarding command sent before install was offered");
        }
        self.emit(PipelineState::AwaitingInstallConfirmation);
        let command = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PipelineState::Cancelled),
            command = self.commands.recv() => command,
        };
        match command {
            Some(PipelineCommand::ConfirmInstall) => Ok(()),
            Some(PipelineCommand::DeclineInstall) => Err(self.finish(PipelineState::InstallFailed {
                reason: "install declined".to_string(),
            })),
            None => {
                // Nobody is left to confirm.
                self.cancel.cancel();
                Err(PipelineState::Cancelled)
            }
        }
    }

    async fn install(
        &mut self,
        mut lease: TaskLease,
        artifact: &Path,
        release: Option<&ReleaseId>,
    ) -> Step<()> {
        let app = self.app;
        self.emit(PipelineState::Installing);
        let installed =
            until_cancelled(&self.cancel, self.deps.installer.install(app, artifact)).await;
        lease.release();

        let reason = match installed {
            None => return Err(PipelineState::Cancelled),
            Some(Ok(InstallOutcome::Installed)) => {
                match release {
                    Some(release) => {
                        if let Err(e) = self.deps.installed.record(app, release).await {
                            tracing::warn!(%app, "could not record installed release: {}", e);
                        }
                    }
                    None => tracing::debug!(%app, "release unknown, nothing recorded"),
                }
                self.emit(PipelineState::InstallSucceeded);
                return Ok(());
            }
            Some(Ok(InstallOutcome::Rejected { reason })) => reason,
            Some(Err(e)) => format!("{:#}", e),
        };
        Err(self.finish(PipelineState::InstallFailed { reason }))
    }

    async fn verify_installed(&mut self, expected: &str) -> PipelineState {
        self.emit(PipelineState::VerifyingInstalled);
        let package = self.app.package_name();
        let checked =
            until_cancelled(&self.cancel, self.deps.verifier.verify_installed(package, expected))
                .await;
        match checked {
            None => PipelineState::Cancelled,
            Some(Ok(result)) => {
                self.installed_check = Some(result.clone());
                if result.passed {
                    self.finish(PipelineState::InstalledFingerprintGood(result))
                } else {
                    self.finish(PipelineState::InstalledFingerprintBad(
                        FingerprintProblem::Mismatch(result),
                    ))
                }
            }
            Some(Err(e)) => self.finish(PipelineState::InstalledFingerprintBad(e.into())),
        }
    }
}
