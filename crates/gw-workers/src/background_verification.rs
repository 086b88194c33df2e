//! Background verification worker (spec §4.10, config knobs
//! `BACKGROUND_DATA_VERIFICATION_*`): periodically rereads a batch of
//! cached entries and recomputes their content hash, so corruption
//! under `by-hash` is caught on a schedule rather than only when a
//! client happens to notice.
//!
//! Grounded on [`crate::scaffold`]'s polling-queue shape, with the
//! queue implemented as a continuous lexicographic sweep of the
//! `by-id` symlink directory — the same traversal style as
//! `gw_data_source::FsCleanupWorker`, but never deleting the
//! directory's own entries, only the cache files a failed check finds
//! corrupt.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use gw_data_source::{by_hash_path, FsCache};
use gw_o11y::MetricsRegistry;
use gw_primitives::{ErrorKind, Identifier};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::scaffold::{ItemProcessor, PollingQueue, WorkerError};

/// Walks the `by-id` symlink directory lexicographically, resuming
/// after the last item returned and wrapping back to the start once
/// the directory is exhausted, so every cached entry is eventually
/// re-checked on a continuous rotation.
pub struct FsCacheVerificationQueue {
    by_id_dir: PathBuf,
    cursor: Mutex<Option<PathBuf>>,
}

impl FsCacheVerificationQueue {
    pub fn new(cache: &FsCache) -> Self {
        Self { by_id_dir: cache.base().join("by-id"), cursor: Mutex::new(None) }
    }
}

#[async_trait]
impl PollingQueue for FsCacheVerificationQueue {
    type Item = PathBuf;

    async fn poll(&self, max_items: usize) -> Result<Vec<PathBuf>, WorkerError> {
        let dir = self.by_id_dir.clone();
        let after = self.cursor.lock().unwrap().clone();

        let (batch, next_cursor) = tokio::task::spawn_blocking(move || next_batch(&dir, after.as_deref(), max_items))
            .await
            .map_err(|e| WorkerError::Poll(format!("verification sweep panicked: {e}")))?
            .map_err(|e| WorkerError::Poll(format!("failed to walk by-id directory: {e}")))?;

        *self.cursor.lock().unwrap() = next_cursor;
        Ok(batch)
    }
}

fn next_batch(
    dir: &Path,
    after: Option<&Path>,
    max_items: usize,
) -> std::io::Result<(Vec<PathBuf>, Option<PathBuf>)> {
    if !dir.is_dir() {
        return Ok((Vec::new(), None));
    }
    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    children.sort();

    let start = match after {
        Some(cursor) => children.iter().position(|p| p.as_path() > cursor).unwrap_or(children.len()),
        None => 0,
    };

    let batch: Vec<PathBuf> = children[start..].iter().take(max_items.max(1)).cloned().collect();
    // Reaching the end of the directory wraps the cursor back to the
    // start rather than stopping; an empty batch here just means this
    // poll found nothing left in the current rotation.
    let next_cursor = batch.last().cloned();
    Ok((batch, next_cursor))
}

/// Recomputes a cached entry's SHA-256 and removes both the `by-hash`
/// blob and its `by-id` symlink if it no longer matches.
pub struct VerificationProcessor {
    cache: FsCache,
    metrics: MetricsRegistry,
}

impl VerificationProcessor {
    pub fn new(cache: FsCache, metrics: MetricsRegistry) -> Self {
        Self { cache, metrics }
    }
}

#[async_trait]
impl ItemProcessor for VerificationProcessor {
    type Item = PathBuf;

    async fn process(&self, index_path: PathBuf) -> Result<(), WorkerError> {
        let target = match tokio::fs::read_link(&index_path).await {
            Ok(target) => target,
            // Removed by a concurrent cleanup pass between listing and read; not a failure.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(WorkerError::Process(format!("reading {} failed: {e}", index_path.display())))
            }
        };

        let hash = match target.file_name().and_then(|n| n.to_str()) {
            Some(hash) => hash.to_string(),
            None => {
                return Err(WorkerError::Process(format!(
                    "malformed cache symlink target {}",
                    target.display()
                )))
            }
        };

        let bytes = match self
            .cache
            .read_by_hash(&hash)
            .await
            .map_err(|e| WorkerError::Process(format!("reading cached bytes for {hash} failed: {e}")))?
        {
            Some(bytes) => bytes,
            // Dangling symlink; left for the symlink cleanup worker.
            None => return Ok(()),
        };

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest: [u8; 32] = hasher.finalize().into();
        let recomputed = Identifier::from_bytes(digest).to_base64url();

        if recomputed != hash {
            self.metrics.record_failure("background_verification", ErrorKind::VerificationFailed);
            warn!(
                path = %index_path.display(),
                expected = %hash,
                actual = %recomputed,
                "cached entry failed re-verification, removing"
            );
            let _ = tokio::fs::remove_file(&index_path).await;
            let _ = tokio::fs::remove_file(by_hash_path(self.cache.base(), &hash)).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_clean_entry_survives_verification() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        let hash = cache.write_by_hash(b"good bytes").await.unwrap();
        let index_path = dir.path().join("by-id").join("some-id");
        cache.link_index(&index_path, &hash).await.unwrap();

        let processor = VerificationProcessor::new(FsCache::new(dir.path()), MetricsRegistry::new());
        processor.process(index_path.clone()).await.unwrap();

        assert!(tokio::fs::symlink_metadata(&index_path).await.is_ok());
        assert!(cache.read_by_hash(&hash).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn a_corrupted_blob_is_removed_along_with_its_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        let hash = cache.write_by_hash(b"original bytes").await.unwrap();
        let index_path = dir.path().join("by-id").join("some-id");
        cache.link_index(&index_path, &hash).await.unwrap();

        // Corrupt the blob in place without touching its hash-derived path.
        let blob_path = by_hash_path(dir.path(), &hash);
        tokio::fs::write(&blob_path, b"tampered bytes").await.unwrap();

        let processor = VerificationProcessor::new(FsCache::new(dir.path()), MetricsRegistry::new());
        processor.process(index_path.clone()).await.unwrap();

        assert!(tokio::fs::symlink_metadata(&index_path).await.is_err());
        assert!(!blob_path.exists());
    }

    #[tokio::test]
    async fn a_dangling_symlink_is_left_for_the_cleanup_worker() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("by-id").join("ghost-id");
        tokio::fs::create_dir_all(index_path.parent().unwrap()).await.unwrap();
        tokio::fs::symlink(dir.path().join("by-hash").join("aa").join("bb").join("never-written"), &index_path)
            .await
            .unwrap();

        let processor = VerificationProcessor::new(FsCache::new(dir.path()), MetricsRegistry::new());
        processor.process(index_path.clone()).await.unwrap();

        assert!(tokio::fs::symlink_metadata(&index_path).await.is_ok());
    }

    #[tokio::test]
    async fn the_queue_sweeps_every_entry_across_polls() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        for n in 0..5u8 {
            let hash = cache.write_by_hash(&[n; 4]).await.unwrap();
            let index_path = dir.path().join("by-id").join(format!("id-{n}"));
            cache.link_index(&index_path, &hash).await.unwrap();
        }

        let queue = FsCacheVerificationQueue::new(&cache);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..5 {
            let batch = queue.poll(2).await.unwrap();
            for path in batch {
                seen.insert(path);
            }
        }
        assert_eq!(seen.len(), 5);
    }
}
