use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;

use crate::reader::CdbReader;
use crate::record::RootTxRecord;
use crate::CdbError;

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Directory-mode CDB64 index (spec §4.3): every `.cdb` file directly in
/// `dir` (non-recursive) is opened and queried in sorted-path order, the
/// first match winning. A filesystem watcher keeps the reader set in
/// sync with the directory, debounced so a burst of events collapses
/// into one rescan.
pub struct CdbDirectoryIndex {
    readers: Arc<RwLock<BTreeMap<PathBuf, Arc<CdbReader>>>>,
    _watcher: Option<RecommendedWatcher>,
}

impl CdbDirectoryIndex {
    /// Opens every `.cdb` file in `dir` and starts watching it for
    /// changes. If `dir` does not exist, returns an index with no
    /// readers and no watcher (callers may create the directory later
    /// and this index will simply keep returning misses).
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CdbError> {
        let dir = dir.into();
        let readers = Arc::new(RwLock::new(BTreeMap::new()));

        if dir.is_dir() {
            reconcile(&dir, &readers)?;
        }

        let watcher = spawn_watcher(dir, Arc::clone(&readers));
        Ok(Self { readers, _watcher: watcher })
    }

    /// Looks up `key` across every currently-open reader, in sorted path
    /// order, returning the first match. Takes a snapshot of the reader
    /// set up front so concurrent add/remove of readers never causes one
    /// to be missed or visited twice within a single call (spec §5).
    pub fn get(&self, key: &[u8]) -> Result<Option<RootTxRecord>, CdbError> {
        let snapshot: Vec<Arc<CdbReader>> = self.readers.read().values().cloned().collect();
        for reader in snapshot {
            if let Some(record) = reader.get(key)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn reader_count(&self) -> usize {
        self.readers.read().len()
    }

    pub fn reader_paths(&self) -> Vec<PathBuf> {
        self.readers.read().keys().cloned().collect()
    }
}

fn reconcile(
    dir: &Path,
    readers: &Arc<RwLock<BTreeMap<PathBuf, Arc<CdbReader>>>>,
) -> Result<(), CdbError> {
    let mut on_disk = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("cdb") {
            on_disk.insert(path, ());
        }
    }

    let mut guard = readers.write();

    // Drop readers for files that disappeared.
    guard.retain(|path, _| on_disk.contains_key(path));

    // Open readers for new files.
    for path in on_disk.keys() {
        if guard.contains_key(path) {
            continue;
        }
        match CdbReader::open(path) {
            Ok(reader) => {
                // Guard against an unlink race between the directory
                // listing above and the open() call just now: only keep
                // the reader if the file is still present.
                if path.exists() {
                    guard.insert(path.clone(), Arc::new(reader));
                }
                // else: drop `reader`, closing its file handle, and
                // discard it without inserting.
            }
            Err(CdbError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                // Unlinked between listing and open; skip.
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

fn spawn_watcher(
    dir: PathBuf,
    readers: Arc<RwLock<BTreeMap<PathBuf, Arc<CdbReader>>>>,
) -> Option<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.send(res);
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "failed to construct CDB64 directory watcher");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        tracing::warn!(error = %e, path = %dir.display(), "failed to watch CDB64 directory");
        return None;
    }

    std::thread::spawn(move || {
        loop {
            match rx.recv() {
                Ok(_) => {
                    // Debounce: drain any further events arriving within
                    // the stability window before reconciling once.
                    while rx.recv_timeout(DEBOUNCE) != Err(RecvTimeoutError::Timeout) {
                        if matches!(rx.recv_timeout(DEBOUNCE), Err(RecvTimeoutError::Disconnected)) {
                            return;
                        }
                    }
                    if let Err(e) = reconcile(&dir, &readers) {
                        tracing::warn!(error = %e, "failed to reconcile CDB64 directory");
                    }
                }
                Err(_) => return,
            }
        }
    });

    Some(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::CdbWriter;
    use gw_primitives::Identifier;
    use std::time::Duration;

    fn write_cdb(path: &Path, key: [u8; 32], root_tx: [u8; 32]) {
        let mut writer = CdbWriter::create(path).unwrap();
        writer.put(&key, &RootTxRecord::simple(Identifier::from_bytes(root_tx))).unwrap();
        writer.finalize().unwrap();
    }

    #[test]
    fn opens_existing_files_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut key_a = [0u8; 32];
        key_a[0] = 1;
        let mut key_b = [0u8; 32];
        key_b[0] = 2;

        write_cdb(&dir.path().join("a.cdb"), key_a, [0x11; 32]);
        write_cdb(&dir.path().join("b.cdb"), key_b, [0x22; 32]);

        let index = CdbDirectoryIndex::open(dir.path()).unwrap();
        assert_eq!(index.reader_count(), 2);
        assert_eq!(index.get(&key_a).unwrap().unwrap().root_tx_id, Identifier::from_bytes([0x11; 32]));
        assert_eq!(index.get(&key_b).unwrap().unwrap().root_tx_id, Identifier::from_bytes([0x22; 32]));
    }

    #[test]
    fn first_match_wins_when_multiple_files_share_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut key = [0u8; 32];
        key[0] = 5;

        write_cdb(&dir.path().join("a.cdb"), key, [0xAA; 32]);
        write_cdb(&dir.path().join("b.cdb"), key, [0xBB; 32]);

        let index = CdbDirectoryIndex::open(dir.path()).unwrap();
        assert_eq!(index.get(&key).unwrap().unwrap().root_tx_id, Identifier::from_bytes([0xAA; 32]));
    }

    #[test]
    fn missing_directory_yields_no_readers_but_no_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let index = CdbDirectoryIndex::open(&missing).unwrap();
        assert_eq!(index.reader_count(), 0);
        assert_eq!(index.get(&[0u8; 32]).unwrap(), None);
    }

    #[test]
    fn watcher_picks_up_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = CdbDirectoryIndex::open(dir.path()).unwrap();
        assert_eq!(index.reader_count(), 0);

        let mut key = [0u8; 32];
        key[0] = 9;
        write_cdb(&dir.path().join("late.cdb"), key, [0x99; 32]);

        // Wait past the debounce window for the watcher to reconcile.
        for _ in 0..50 {
            if index.reader_count() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(index.reader_count(), 1);
    }
}
