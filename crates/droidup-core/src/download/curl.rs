//! libcurl-backed download service.
//!
//! Each task runs one curl Easy transfer on its own OS thread, writing
//! `<dir>/<app>-<id>.apk.part` and renaming it to `.apk` when the transfer
//! succeeds. Status and progress live in a shared table; the task id is
//! broadcast once when the transfer ends.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;

use super::{DownloadService, DownloadStatus, StatusSnapshot, TaskId};
use crate::apps::App;

struct TaskEntry {
    snapshot: StatusSnapshot,
    file: PathBuf,
    abort: Arc<AtomicBool>,
}

type TaskTable = Arc<Mutex<HashMap<TaskId, TaskEntry>>>;

fn lock(tasks: &TaskTable) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_snapshot(tasks: &TaskTable, task: TaskId, status: DownloadStatus, progress: u8) {
    if let Some(entry) = lock(tasks).get_mut(&task) {
        entry.snapshot = StatusSnapshot { status, progress };
    }
}

pub struct CurlDownloadService {
    dir: PathBuf,
    next_id: AtomicU64,
    tasks: TaskTable,
    completions: broadcast::Sender<TaskId>,
}

impl CurlDownloadService {
    /// Downloads go to `dir`, which is created on first enqueue.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (completions, _) = broadcast::channel(16);
        Self {
            dir: dir.into(),
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            completions,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.dir
    }
}

fn part_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Runs in the transfer thread. Returns Ok(true) when the file is complete.
fn transfer(url: &str, file: &Path, task: TaskId, tasks: &TaskTable, abort: &AtomicBool) -> Result<bool> {
    let part = part_path(file);
    let mut out = File::create(&part).with_context(|| format!("create {}", part.display()))?;

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.fail_on_error(true)?;
    easy.progress(true)?;
    easy.connect_timeout(Duration::from_secs(30))?;
    easy.low_speed_limit(1024)?;
    easy.low_speed_time(Duration::from_secs(60))?;

    let performed = {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| match out.write_all(data) {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                tracing::warn!(%task, "download write failed: {}", e);
                Ok(0) // abort transfer
            }
        })?;
        transfer.progress_function(|dltotal, dlnow, _, _| {
            if dltotal > 0.0 {
                let pct = ((dlnow / dltotal) * 100.0).clamp(0.0, 100.0) as u8;
                set_snapshot(tasks, task, DownloadStatus::Running, pct);
            }
            !abort.load(Ordering::Relaxed)
        })?;
        transfer.perform()
    };

    if abort.load(Ordering::Relaxed) {
        let _ = fs::remove_file(&part);
        return Ok(false);
    }
    if let Err(e) = performed {
        let _ = fs::remove_file(&part);
        return Err(anyhow::Error::new(e).context(format!("GET {}", url)));
    }
    out.sync_all()?;
    drop(out);
    publish(&part, file, task, tasks)
}

/// Renames the finished `.part` into place under the task-table lock, so a
/// concurrent `remove` either sees the final file or finds nothing to rename.
fn publish(part: &Path, file: &Path, task: TaskId, tasks: &TaskTable) -> Result<bool> {
    let table = lock(tasks);
    let live = table
        .get(&task)
        .is_some_and(|t| !t.abort.load(Ordering::Relaxed));
    if !live {
        drop(table);
        let _ = fs::remove_file(part);
        return Ok(false);
    }
    fs::rename(part, file).with_context(|| format!("rename to {}", file.display()))?;
    Ok(true)
}

impl DownloadService for CurlDownloadService {
    fn enqueue(&self, app: App, url: &str, title: &str) -> Result<TaskId> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create download dir {}", self.dir.display()))?;
        let task = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let file = self.dir.join(format!("{}-{}.apk", app.key(), task.0));
        let abort = Arc::new(AtomicBool::new(false));
        lock(&self.tasks).insert(
            task,
            TaskEntry {
                snapshot: StatusSnapshot {
                    status: DownloadStatus::Pending,
                    progress: 0,
                },
                file: file.clone(),
                abort: Arc::clone(&abort),
            },
        );

        let tasks = Arc::clone(&self.tasks);
        let completions = self.completions.clone();
        let url = url.to_string();
        let title = title.to_string();
        thread::Builder::new()
            .name(format!("download-{}", task.0))
            .spawn(move || {
                set_snapshot(&tasks, task, DownloadStatus::Running, 0);
                tracing::info!(%task, title = %title, "download started");
                match transfer(&url, &file, task, &tasks, &abort) {
                    Ok(true) => set_snapshot(&tasks, task, DownloadStatus::Successful, 100),
                    Ok(false) => {
                        tracing::debug!(%task, "download aborted");
                        set_snapshot(&tasks, task, DownloadStatus::Failed, 0);
                    }
                    Err(e) => {
                        tracing::warn!(%task, "download failed: {:#}", e);
                        let progress = lock(&tasks)
                            .get(&task)
                            .map(|t| t.snapshot.progress)
                            .unwrap_or(0);
                        set_snapshot(&tasks, task, DownloadStatus::Failed, progress);
                    }
                }
                // No subscribers is fine.
                let _ = completions.send(task);
            })
            .context("spawn download thread")?;
        Ok(task)
    }

    fn status(&self, task: TaskId) -> Result<StatusSnapshot> {
        lock(&self.tasks)
            .get(&task)
            .map(|t| t.snapshot)
            .with_context(|| format!("unknown download {}", task))
    }

    fn subscribe_completions(&self) -> broadcast::Receiver<TaskId> {
        self.completions.subscribe()
    }

    fn locate(&self, task: TaskId) -> Result<PathBuf> {
        let tasks = lock(&self.tasks);
        let entry = tasks
            .get(&task)
            .with_context(|| format!("unknown download {}", task))?;
        if entry.snapshot.status != DownloadStatus::Successful {
            anyhow::bail!("download {} is not finished", task);
        }
        Ok(entry.file.clone())
    }

    fn remove(&self, task: TaskId) -> Result<()> {
        let Some(entry) = lock(&self.tasks).remove(&task) else {
            return Ok(());
        };
        entry.abort.store(true, Ordering::Relaxed);
        match fs::remove_file(&entry.file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("remove {}", entry.file.display())),
        }
        Ok(())
    }
}
