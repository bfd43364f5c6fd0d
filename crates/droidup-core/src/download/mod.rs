//! Download orchestration on top of an external download service.
//!
//! The service owns each task from `enqueue` until `remove`. Callers get an
//! opaque [`TaskId`], poll snapshots with [`DownloadOrchestrator::status`], and
//! may subscribe to the one-shot "download finished" broadcast, which carries
//! the id of the task that ended. Ids that do not match the caller's task must
//! be ignored.

pub mod curl;
mod poll;

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::apps::App;

pub use poll::{poll_until_terminal, PollEvent};

/// Opaque handle of one download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Running,
    Paused,
    Successful,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Successful | DownloadStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Running => "running",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Successful => "success",
            DownloadStatus::Failed => "failed",
        }
    }
}

/// Point-in-time status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: DownloadStatus,
    /// 0..=100
    pub progress: u8,
}

/// The external download subsystem. All calls return without waiting for the transfer.
pub trait DownloadService: Send + Sync + 'static {
    fn enqueue(&self, app: App, url: &str, title: &str) -> Result<TaskId>;

    fn status(&self, task: TaskId) -> Result<StatusSnapshot>;

    /// Receiver for task ids whose download ended (successfully or not).
    fn subscribe_completions(&self) -> broadcast::Receiver<TaskId>;

    /// Local file of a task whose status is `Successful`.
    fn locate(&self, task: TaskId) -> Result<PathBuf>;

    /// Abort if still running and release the task's file and bookkeeping.
    /// Unknown or already removed tasks are not an error.
    fn remove(&self, task: TaskId) -> Result<()>;
}

pub struct DownloadOrchestrator<D: ?Sized> {
    service: Arc<D>,
}

impl<D: ?Sized> Clone for DownloadOrchestrator<D> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<D: DownloadService + ?Sized> DownloadOrchestrator<D> {
    pub fn new(service: Arc<D>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<D> {
        &self.service
    }

    /// Start a download. Not idempotent: enqueue once per update attempt.
    pub fn enqueue(&self, app: App, url: &str, title: &str) -> Result<TaskId> {
        let task = self.service.enqueue(app, url, title)?;
        tracing::info!(%app, %task, url, "download enqueued");
        Ok(task)
    }

    pub fn status(&self, task: TaskId) -> Result<StatusSnapshot> {
        self.service.status(task)
    }

    pub fn subscribe_completions(&self) -> broadcast::Receiver<TaskId> {
        self.service.subscribe_completions()
    }

    pub fn locate(&self, task: TaskId) -> Result<PathBuf> {
        let snapshot = self.service.status(task)?;
        if snapshot.status != DownloadStatus::Successful {
            anyhow::bail!(
                "download {} has status {}, no file to locate",
                task,
                snapshot.status.as_str()
            );
        }
        self.service.locate(task)
    }

    pub fn cancel_or_remove(&self, task: TaskId) -> Result<()> {
        self.service.remove(task)?;
        tracing::debug!(%task, "download removed");
        Ok(())
    }
}
