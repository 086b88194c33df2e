//! Filesystem cleanup workers (spec §4.10 "Cleanup"): a batched,
//! lexicographic walk of the cache directory that deletes files a
//! predicate rejects and publishes kept-file/kept-byte gauges once a
//! full traversal completes, plus a companion worker that prunes
//! dangling symlinks.
//!
//! Grounded on `gw-peers::PeerManager::refreshPeers`'s "bounded
//! background work on a timer, errors logged and swallowed" shape,
//! generalized from a single upstream call to a recursive directory
//! walk.

use std::path::{Path, PathBuf};

use gw_o11y::MetricsRegistry;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Decides whether a file found during a cleanup traversal should be
/// deleted. Implementations close over whatever retention state they
/// need (cache-policy expirations, an LRU eviction list, …).
pub trait DeletionPredicate: Send + Sync {
    fn should_delete(&self, path: &Path, metadata: &std::fs::Metadata) -> bool;
}

/// A predicate that never deletes anything; useful as a default when no
/// cache policy enforces a retention window.
pub struct KeepEverything;

impl DeletionPredicate for KeepEverything {
    fn should_delete(&self, _path: &Path, _metadata: &std::fs::Metadata) -> bool {
        false
    }
}

pub struct FsCleanupWorker<P> {
    base: PathBuf,
    predicate: P,
    batch_size: usize,
    batch_pause: Duration,
    metrics: MetricsRegistry,
    cache_label: String,
}

pub struct TraversalTotals {
    pub kept_files: i64,
    pub kept_bytes: i64,
}

impl<P: DeletionPredicate> FsCleanupWorker<P> {
    pub fn new(
        base: impl Into<PathBuf>,
        predicate: P,
        batch_size: usize,
        batch_pause: Duration,
        metrics: MetricsRegistry,
        cache_label: impl Into<String>,
    ) -> Self {
        Self { base: base.into(), predicate, batch_size, batch_pause, metrics, cache_label: cache_label.into() }
    }

    /// Runs cleanup cycles until `cancel` fires, pausing `idle_pause`
    /// between full traversals.
    pub async fn run(&self, idle_pause: Duration, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            match self.run_one_cycle(&cancel).await {
                Ok(totals) => {
                    self.metrics.fs_cleanup_kept_files.with_label_values(&[&self.cache_label]).set(totals.kept_files);
                    self.metrics.fs_cleanup_kept_bytes.with_label_values(&[&self.cache_label]).set(totals.kept_bytes);
                }
                Err(e) => warn!(error = %e, "filesystem cleanup cycle failed"),
            }

            tokio::select! {
                _ = sleep(idle_pause) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    /// Walks the base directory once, batched and paused between
    /// batches, returning the accumulated kept-file/kept-byte totals.
    /// Counters reset every call (spec §4.10: "on restart the counters
    /// reset" — a fresh cycle is the analogue of a restart here).
    pub async fn run_one_cycle(&self, cancel: &CancellationToken) -> std::io::Result<TraversalTotals> {
        let mut entries = Vec::new();
        collect_files_sorted(&self.base, &mut entries)?;

        let mut kept_files = 0i64;
        let mut kept_bytes = 0i64;

        for batch in entries.chunks(self.batch_size.max(1)) {
            if cancel.is_cancelled() {
                break;
            }

            for path in batch {
                let metadata = match std::fs::metadata(path) {
                    Ok(m) => m,
                    Err(_) => continue, // vanished between listing and stat; skip
                };

                if self.predicate.should_delete(path, &metadata) {
                    if let Err(e) = std::fs::remove_file(path) {
                        debug!(path = %path.display(), error = %e, "failed to delete file during cleanup");
                    }
                } else {
                    kept_files += 1;
                    kept_bytes += metadata.len() as i64;
                }
            }

            sleep(self.batch_pause).await;
        }

        Ok(TraversalTotals { kept_files, kept_bytes })
    }
}

fn collect_files_sorted(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    children.sort();

    for path in children {
        if path.is_dir() {
            collect_files_sorted(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Recursively removes dangling symlinks under `base` on a fixed
/// interval (spec §4.10's "companion symlink cleanup worker").
pub struct SymlinkCleanupWorker {
    base: PathBuf,
}

impl SymlinkCleanupWorker {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = sleep(interval) => {}
                _ = cancel.cancelled() => return,
            }
            if let Err(e) = self.sweep() {
                warn!(error = %e, "symlink cleanup sweep failed");
            }
        }
    }

    pub fn sweep(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        sweep_dir(&self.base, &mut removed)?;
        Ok(removed)
    }
}

fn sweep_dir(dir: &Path, removed: &mut usize) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            if std::fs::metadata(&path).is_err() {
                std::fs::remove_file(&path)?;
                *removed += 1;
            }
        } else if file_type.is_dir() {
            sweep_dir(&path, removed)?;
        }
    }
    Ok(())
}
