//! Ownership of the one download task a pipeline run creates.

use crate::download::{DownloadOrchestrator, DownloadService, TaskId};

/// Removes the download task exactly once: on `release` or, failing that, on drop.
pub(crate) struct TaskLease {
    downloads: DownloadOrchestrator<dyn DownloadService>,
    task: TaskId,
    released: bool,
}

impl TaskLease {
    pub(crate) fn new(downloads: DownloadOrchestrator<dyn DownloadService>, task: TaskId) -> Self {
        Self {
            downloads,
            task,
            released: false,
        }
    }

    pub(crate) fn task(&self) -> TaskId {
        self.task
    }

    pub(crate) fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Err(e) = self.downloads.cancel_or_remove(self.task) {
            tracing::warn!(task = %self.task, "failed to remove download: {:#}", e);
        }
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lets through the first terminal download signal of a run and nothing after it.
///
/// The poller and the completion broadcast can both report the end of the same
/// task, and the broadcast may repeat.
#[derive(Debug, Default)]
pub(crate) struct TerminalLatch {
    fired: Option<TaskId>,
}

impl TerminalLatch {
    pub(crate) fn fire(&mut self, task: TaskId) -> bool {
        if let Some(first) = self.fired {
            tracing::debug!(%task, %first, "ignoring repeated terminal signal");
            return false;
        }
        self.fired = Some(task);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::App;
    use crate::download::StatusSnapshot;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct CountingRemovals {
        removed: AtomicUsize,
    }

    impl DownloadService for CountingRemovals {
        fn enqueue(&self, _: App, _: &str, _: &str) -> anyhow::Result<TaskId> {
            Ok(TaskId(7))
        }

        fn status(&self, _: TaskId) -> anyhow::Result<StatusSnapshot> {
            anyhow::bail!("not used")
        }

        fn subscribe_completions(&self) -> broadcast::Receiver<TaskId> {
            broadcast::channel(1).1
        }

        fn locate(&self, _: TaskId) -> anyhow::Result<PathBuf> {
            anyhow::bail!("not used")
        }

        fn remove(&self, _: TaskId) -> anyhow::Result<()> {
            self.removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn lease(service: &Arc<CountingRemovals>) -> TaskLease {
        let service: Arc<dyn DownloadService> = Arc::clone(service) as Arc<dyn DownloadService>;
        TaskLease::new(DownloadOrchestrator::new(service), TaskId(7))
    }

    #[test]
    fn release_then_drop_removes_once() {
        let service = Arc::new(CountingRemovals::default());
        let mut l = lease(&service);
        assert_eq!(l.task(), TaskId(7));
        l.release();
        l.release();
        drop(l);
        assert_eq!(service.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_alone_removes() {
        let service = Arc::new(CountingRemovals::default());
        drop(lease(&service));
        assert_eq!(service.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn latch_fires_once() {
        let mut latch = TerminalLatch::default();
        assert!(latch.fire(TaskId(1)));
        assert!(!latch.fire(TaskId(1)));
        assert!(!latch.fire(TaskId(2)));
    }
}
