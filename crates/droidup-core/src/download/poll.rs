//! Status polling loop for one download task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{DownloadService, DownloadStatus, StatusSnapshot, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// Status or progress changed since the previous check.
    Progress {
        task: TaskId,
        snapshot: StatusSnapshot,
    },
    /// The task reached `Successful` or `Failed`; the loop has stopped.
    Terminal { task: TaskId, status: DownloadStatus },
}

/// Check `task` every `interval` until it is terminal or `cancel` fires.
///
/// Cancellation is checked before every status check and interrupts the sleep,
/// so no status call and no event happen after the token is cancelled. A status
/// error counts as a failed download. Spawn this with tokio::spawn.
pub async fn poll_until_terminal<D: DownloadService + ?Sized>(
    service: Arc<D>,
    task: TaskId,
    interval: Duration,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<PollEvent>,
) {
    let mut previous: Option<StatusSnapshot> = None;
    loop {
        if cancel.is_cancelled() {
            tracing::debug!(%task, "polling stopped by kill switch");
            return;
        }

        let snapshot = match service.status(task) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%task, "download status unavailable: {:#}", e);
                StatusSnapshot {
                    status: DownloadStatus::Failed,
                    progress: previous.map(|p| p.progress).unwrap_or(0),
                }
            }
        };

        if previous != Some(snapshot) {
            previous = Some(snapshot);
            tracing::debug!(%task, status = snapshot.status.as_str(), progress = snapshot.progress, "download status");
            if events.send(PollEvent::Progress { task, snapshot }).is_err() {
                return;
            }
        }

        if snapshot.status.is_terminal() {
            let _ = events.send(PollEvent::Terminal {
                task,
                status: snapshot.status,
            });
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(%task, "polling stopped by kill switch");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
