//! In-memory stand-ins for the pipeline's collaborators.
//!
//! Every fake writes to a shared [`Journal`] so tests can assert the order in
//! which the pipeline touched them.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use droidup_core::apps::App;
use droidup_core::cache::{ManualClock, MetadataCache, DEFAULT_TTL};
use droidup_core::download::{
    DownloadOrchestrator, DownloadService, DownloadStatus, StatusSnapshot, TaskId,
};
use droidup_core::fetch::MetadataSource;
use droidup_core::fingerprint::{SignerSource, VerifyError};
use droidup_core::install::{InstallOutcome, PackageInstaller};
use droidup_core::installed::InstalledReleases;
use droidup_core::kv::{KeyValueStore, MemoryStore};
use droidup_core::pipeline::{
    PipelineDeps, PipelineHandle, PipelineOptions, PipelineState, UpdatePipeline,
};
use droidup_core::release::Metadata;
use tokio::sync::broadcast;

pub const T0: i64 = 1_700_000_000_000;
pub const TASK: TaskId = TaskId(42);

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn note(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

pub enum SourceReply {
    Found(Metadata),
    Nothing,
    Error(&'static str),
    Hang,
}

pub struct FakeSource {
    reply: Mutex<Option<SourceReply>>,
    journal: Journal,
}

#[async_trait]
impl MetadataSource for FakeSource {
    async fn fetch(&self, app: App) -> anyhow::Result<Option<Metadata>> {
        self.journal.note("fetch");
        let reply = self.reply.lock().unwrap().take();
        match reply {
            Some(SourceReply::Found(m)) => Ok(Some(m)),
            Some(SourceReply::Nothing) | None => Ok(None),
            Some(SourceReply::Error(msg)) => anyhow::bail!("{} lookup failed: {}", app, msg),
            Some(SourceReply::Hang) => {
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }
}

/// One task with a scripted status sequence; the last snapshot repeats.
pub struct FakeDownloads {
    script: Mutex<VecDeque<StatusSnapshot>>,
    completions: broadcast::Sender<TaskId>,
    pub artifact: PathBuf,
    pub status_calls: AtomicUsize,
    pub enqueued_urls: Mutex<Vec<String>>,
    journal: Journal,
}

impl FakeDownloads {
    pub fn set_script(&self, script: &[(DownloadStatus, u8)]) {
        *self.script.lock().unwrap() = script
            .iter()
            .map(|&(status, progress)| StatusSnapshot { status, progress })
            .collect();
    }

    /// Fire the "download finished" broadcast for `task`.
    pub fn complete(&self, task: TaskId) {
        let _ = self.completions.send(task);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl DownloadService for FakeDownloads {
    fn enqueue(&self, app: App, url: &str, _title: &str) -> anyhow::Result<TaskId> {
        self.journal.note(format!("enqueue {}", app.key()));
        self.enqueued_urls.lock().unwrap().push(url.to_string());
        Ok(TASK)
    }

    fn status(&self, task: TaskId) -> anyhow::Result<StatusSnapshot> {
        anyhow::ensure!(task == TASK, "unknown task {}", task);
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let snapshot = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        };
        snapshot.ok_or_else(|| anyhow::anyhow!("no script"))
    }

    fn subscribe_completions(&self) -> broadcast::Receiver<TaskId> {
        self.completions.subscribe()
    }

    fn locate(&self, _task: TaskId) -> anyhow::Result<PathBuf> {
        Ok(self.artifact.clone())
    }

    fn remove(&self, task: TaskId) -> anyhow::Result<()> {
        self.journal.note(format!("remove {}", task.0));
        Ok(())
    }
}

pub enum InstalledSigner {
    Cert(Vec<u8>),
    Missing,
}

pub struct FakeSigners {
    pub artifact: Mutex<Result<Vec<u8>, &'static str>>,
    pub installed: Mutex<InstalledSigner>,
    journal: Journal,
}

#[async_trait]
impl SignerSource for FakeSigners {
    async fn artifact_signer(&self, path: &Path) -> Result<Vec<u8>, VerifyError> {
        self.journal.note("artifact_signer");
        match &*self.artifact.lock().unwrap() {
            Ok(cert) => Ok(cert.clone()),
            Err(reason) => Err(VerifyError::Unreadable {
                path: path.display().to_string(),
                reason: reason.to_string(),
            }),
        }
    }

    async fn installed_signer(&self, package: &str) -> Result<Vec<u8>, VerifyError> {
        self.journal.note("installed_signer");
        match &*self.installed.lock().unwrap() {
            InstalledSigner::Cert(cert) => Ok(cert.clone()),
            InstalledSigner::Missing => Err(VerifyError::NotInstalled {
                package: package.to_string(),
            }),
        }
    }
}

pub struct FakeInstaller {
    pub outcome: Mutex<InstallOutcome>,
    journal: Journal,
}

#[async_trait]
impl PackageInstaller for FakeInstaller {
    async fn install(&self, app: App, artifact: &Path) -> anyhow::Result<InstallOutcome> {
        self.journal.note(format!("install {}", app.key()));
        assert!(artifact.ends_with("brave-42.apk"));
        Ok(self.outcome.lock().unwrap().clone())
    }
}

pub const GOOD_CERT: &[u8] = b"expected signer";

/// All fakes wired into one pipeline. By default every step succeeds.
pub struct Harness {
    pub journal: Journal,
    pub store: Arc<MemoryStore>,
    pub clock: ManualClock,
    pub source: Arc<FakeSource>,
    pub downloads: Arc<FakeDownloads>,
    pub signers: Arc<FakeSigners>,
    pub installer: Arc<FakeInstaller>,
}

impl Harness {
    pub fn new() -> Self {
        let journal = Journal::default();
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: ManualClock::new(T0),
            source: Arc::new(FakeSource {
                reply: Mutex::new(None),
                journal: journal.clone(),
            }),
            downloads: Arc::new(FakeDownloads {
                script: Mutex::new(
                    [
                        StatusSnapshot {
                            status: DownloadStatus::Running,
                            progress: 40,
                        },
                        StatusSnapshot {
                            status: DownloadStatus::Successful,
                            progress: 100,
                        },
                    ]
                    .into_iter()
                    .collect(),
                ),
                completions: broadcast::channel(8).0,
                artifact: PathBuf::from("/downloads/brave-42.apk"),
                status_calls: AtomicUsize::new(0),
                enqueued_urls: Mutex::new(Vec::new()),
                journal: journal.clone(),
            }),
            signers: Arc::new(FakeSigners {
                artifact: Mutex::new(Ok(GOOD_CERT.to_vec())),
                installed: Mutex::new(InstalledSigner::Cert(GOOD_CERT.to_vec())),
                journal: journal.clone(),
            }),
            installer: Arc::new(FakeInstaller {
                outcome: Mutex::new(InstallOutcome::Installed),
                journal: journal.clone(),
            }),
            journal,
        }
    }

    pub fn reply_with(&self, reply: SourceReply) {
        *self.source.reply.lock().unwrap() = Some(reply);
    }

    pub fn cache(&self) -> MetadataCache<dyn KeyValueStore> {
        let store: Arc<dyn KeyValueStore> = self.store.clone();
        MetadataCache::with_clock(store, Arc::new(self.clock.clone()), DEFAULT_TTL)
    }

    pub fn installed(&self) -> InstalledReleases<dyn KeyValueStore> {
        let store: Arc<dyn KeyValueStore> = self.store.clone();
        InstalledReleases::new(store)
    }

    pub fn pipeline(&self) -> UpdatePipeline {
        let downloads: Arc<dyn DownloadService> = self.downloads.clone();
        let signers: Arc<dyn SignerSource> = self.signers.clone();
        let deps = PipelineDeps {
            cache: self.cache(),
            installed: self.installed(),
            source: self.source.clone(),
            downloads: DownloadOrchestrator::new(downloads),
            verifier: droidup_core::fingerprint::FingerprintVerifier::new(signers),
            installer: self.installer.clone(),
        };
        UpdatePipeline::new(
            deps,
            PipelineOptions {
                poll_interval: Duration::from_millis(500),
                fetch_timeout: Duration::from_secs(5),
            },
        )
    }
}

/// Read states until a terminal one, answering the install prompt with `confirm`.
pub async fn drive(handle: &mut PipelineHandle, confirm: bool) -> Vec<PipelineState> {
    let mut seen = Vec::new();
    while let Some(state) = handle.next_state().await {
        if state == PipelineState::AwaitingInstallConfirmation {
            if confirm {
                handle.confirm_install();
            } else {
                handle.decline_install();
            }
        }
        let done = state.is_terminal();
        seen.push(state);
        if done {
            break;
        }
    }
    seen
}

/// Read states until `pred` matches one; returns everything read.
pub async fn wait_for(
    handle: &mut PipelineHandle,
    pred: impl Fn(&PipelineState) -> bool,
) -> Vec<PipelineState> {
    let mut seen = Vec::new();
    while let Some(state) = handle.next_state().await {
        let hit = pred(&state);
        seen.push(state);
        if hit {
            break;
        }
    }
    seen
}

pub fn names(states: &[PipelineState]) -> Vec<&'static str> {
    states.iter().map(PipelineState::name).collect()
}
