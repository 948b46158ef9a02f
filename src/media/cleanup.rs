//! Temp-file ownership and the stale-file sweeper
//!
//! Every extraction writes into the shared download directory under its own
//! media id. [`ScratchSpace`] owns those files until a validated
//! [`MediaArtifact`] takes them over; [`sweep_stale`] catches whatever a
//! crash left behind.

use super::{MediaArtifact, PipelineError};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Files in the download directory that belong to one request.
///
/// A file belongs to the request when its name is the media id, or the media
/// id followed by `.` or `_` (`<id>.mp4`, `<id>.mp4.part`, `<id>_00001.jpg`).
/// Dropping an armed guard deletes all of them.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: PathBuf,
    media_id: String,
    armed: AtomicBool,
}

impl ScratchSpace {
    /// Creates an armed guard for `media_id` inside `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, media_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            media_id: media_id.into(),
            armed: AtomicBool::new(true),
        }
    }

    /// Request media id
    #[must_use]
    pub fn media_id(&self) -> &str {
        &self.media_id
    }

    /// Download directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<media_id>.<ext>`
    #[must_use]
    pub fn path_for(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{ext}", self.media_id))
    }

    fn owns(&self, name: &str) -> bool {
        name.strip_prefix(self.media_id.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('_'))
    }

    /// Regular files currently attributable to this request, sorted by name
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .filter(|entry| self.owns(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        files.sort();
        files
    }

    /// Delete every file of this request; returns how many were removed
    pub fn purge(&self) -> usize {
        self.retain_only(&[])
    }

    /// Delete every file of this request except `keep`
    pub fn retain_only(&self, keep: &[&Path]) -> usize {
        let mut removed = 0;
        for path in self.files() {
            if keep.iter().any(|k| *k == path.as_path()) {
                continue;
            }
            if remove_quietly(&path) {
                removed += 1;
            }
        }
        removed
    }

    /// Stop deleting on drop
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    /// Whether dropping the guard still deletes files
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        if self.is_armed() {
            let removed = self.purge();
            if removed > 0 {
                debug!(media_id = %self.media_id, removed, "Scratch space purged on drop");
            }
        }
    }
}

/// Remove a file, treating "already gone" as success
fn remove_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Deleted");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete");
            false
        }
    }
}

/// Await `body`; purge the scratch space if it fails.
///
/// On success every scratch file not owned by the artifact is deleted and
/// the guard is disarmed, so the artifact becomes the only owner.
///
/// # Errors
///
/// Returns the error produced by `body` after cleaning up.
pub async fn with_cleanup_on_error<F>(
    scratch: &ScratchSpace,
    body: F,
) -> Result<MediaArtifact, PipelineError>
where
    F: Future<Output = Result<MediaArtifact, PipelineError>>,
{
    match body.await {
        Ok(artifact) => {
            let keep: Vec<&Path> = artifact.paths().collect();
            let removed = scratch.retain_only(&keep);
            scratch.disarm();
            if removed > 0 {
                debug!(media_id = %scratch.media_id(), removed, "Removed leftover scratch files");
            }
            Ok(artifact)
        }
        Err(e) => {
            let removed = scratch.purge();
            warn!(
                media_id = %scratch.media_id(),
                removed,
                error = %e,
                "Extraction failed, scratch space cleaned up"
            );
            Err(e)
        }
    }
}

/// Delete regular files in `dir` older than `max_age`.
///
/// Per-file failures are logged and skipped. Returns the number of files
/// removed.
pub async fn sweep_stale(dir: &Path, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read download dir for sweep");
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Sweep aborted while listing");
                break;
            }
        };
        let path = entry.path();

        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat file");
                continue;
            }
        };

        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age <= max_age {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                removed += 1;
                debug!(path = %path.display(), age_secs = age.as_secs(), "Swept stale file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to sweep file"),
        }
    }

    if removed > 0 {
        info!(dir = %dir.display(), removed, "Cleaned up old download files");
    }
    removed
}

/// Sweep once now, then every `interval` until `shutdown` fires
#[must_use]
pub fn spawn_sweeper(
    dir: PathBuf,
    max_age: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = ticker.tick() => {
                    sweep_stale(&dir, max_age).await;
                }
                () = shutdown.cancelled() => {
                    debug!("Sweeper stopped");
                    break;
                }
            }
        }
    })
}
