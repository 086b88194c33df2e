use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::hash::cdb64_hash;
use crate::record::RootTxRecord;
use crate::{CdbError, HEADER_LEN, KEY_LEN, NUM_TABLES};

/// Builds a CDB64 file. Records are appended via [`CdbWriter::put`];
/// [`CdbWriter::finalize`] writes the hash tables and header and
/// atomically renames the result into place. If the writer is dropped
/// without `finalize` (or after an explicit [`CdbWriter::abort`]), the
/// temporary data file is unlinked — generalizing the spec's `abort()`
/// to also cover the panic/early-return case.
pub struct CdbWriter {
    target_path: PathBuf,
    data_tmp_path: PathBuf,
    data_file: Option<BufWriter<File>>,
    data_len: u64,
    buckets: Vec<Vec<(u64, u64)>>,
    done: bool,
}

impl CdbWriter {
    pub fn create(target_path: impl Into<PathBuf>) -> Result<Self, CdbError> {
        let target_path = target_path.into();
        let data_tmp_path = tmp_path(&target_path, "data");
        let data_file = File::create(&data_tmp_path)?;
        Ok(Self {
            target_path,
            data_tmp_path,
            data_file: Some(BufWriter::new(data_file)),
            data_len: 0,
            buckets: vec![Vec::new(); NUM_TABLES],
            done: false,
        })
    }

    /// Appends one `(key, value)` record. `key` must be exactly
    /// [`KEY_LEN`] bytes; in practice keys are Arweave ids.
    pub fn put(&mut self, key: &[u8], value: &RootTxRecord) -> Result<(), CdbError> {
        debug_assert_eq!(key.len(), KEY_LEN, "CDB64 keys are fixed at 32 bytes");
        let value_bytes = rmp_serde::to_vec_named(value)?;

        let file = self.data_file.as_mut().ok_or(CdbError::AlreadyFinalized)?;
        file.write_all(&(key.len() as u64).to_le_bytes())?;
        file.write_all(&(value_bytes.len() as u64).to_le_bytes())?;
        file.write_all(key)?;
        file.write_all(&value_bytes)?;

        let record_offset = self.data_len;
        self.data_len += 16 + key.len() as u64 + value_bytes.len() as u64;

        let hash = cdb64_hash(key);
        let table_idx = (hash % NUM_TABLES as u64) as usize;
        self.buckets[table_idx].push((hash, record_offset));
        Ok(())
    }

    /// Writes the hash tables and header, then atomically renames the
    /// assembled file into place.
    pub fn finalize(mut self) -> Result<(), CdbError> {
        let mut data_file = self.data_file.take().ok_or(CdbError::AlreadyFinalized)?;
        data_file.flush()?;
        drop(data_file);

        let assembled_tmp_path = tmp_path(&self.target_path, "build");
        {
            let mut out = BufWriter::new(File::create(&assembled_tmp_path)?);
            // Placeholder header, rewritten once table positions are known.
            out.write_all(&vec![0u8; HEADER_LEN as usize])?;

            let mut data_in = File::open(&self.data_tmp_path)?;
            std::io::copy(&mut data_in, &mut out)?;

            let mut header = Vec::with_capacity(HEADER_LEN as usize);
            let mut next_table_pos = HEADER_LEN + self.data_len;

            for bucket in &self.buckets {
                if bucket.is_empty() {
                    header.extend_from_slice(&0u64.to_le_bytes());
                    header.extend_from_slice(&0u64.to_le_bytes());
                    continue;
                }

                // Load factor <= 0.5 (spec invariant): at least 2x entries.
                let slot_count = (bucket.len() * 2) as u64;
                let mut slots = vec![(0u64, 0u64); slot_count as usize];
                for &(hash, record_offset) in bucket {
                    let absolute_offset = HEADER_LEN + record_offset;
                    let start = (hash >> 8) % slot_count;
                    let mut idx = start as usize;
                    loop {
                        if slots[idx].1 == 0 {
                            slots[idx] = (hash, absolute_offset);
                            break;
                        }
                        idx = (idx + 1) % slots.len();
                    }
                }

                header.extend_from_slice(&next_table_pos.to_le_bytes());
                header.extend_from_slice(&slot_count.to_le_bytes());

                for (hash, offset) in slots {
                    out.write_all(&hash.to_le_bytes())?;
                    out.write_all(&offset.to_le_bytes())?;
                }
                next_table_pos += slot_count * 16;
            }

            out.flush()?;
            let mut file = out.into_inner().map_err(|e| e.into_error())?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header)?;
            file.flush()?;
            file.sync_all()?;
        }

        fs::rename(&assembled_tmp_path, &self.target_path)?;
        let _ = fs::remove_file(&self.data_tmp_path);
        self.done = true;
        Ok(())
    }

    /// Discards the writer and unlinks its temporary data file. Calling
    /// this explicitly is equivalent to letting the writer drop.
    pub fn abort(mut self) {
        self.data_file = None;
        let _ = fs::remove_file(&self.data_tmp_path);
        self.done = true;
    }
}

impl Drop for CdbWriter {
    fn drop(&mut self) {
        if !self.done {
            let _ = fs::remove_file(&self.data_tmp_path);
        }
    }
}

fn tmp_path(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{suffix}.tmp"));
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::CdbReader;
    use gw_primitives::Identifier;

    #[test]
    fn round_trips_written_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.cdb");

        let mut writer = CdbWriter::create(&path).unwrap();
        let mut key1 = [0u8; 32];
        key1[31] = 1;
        let mut key2 = [0u8; 32];
        key2[31] = 2;

        let record1 = RootTxRecord::simple(Identifier::from_bytes([0x64; 32]));
        let mut record2 = RootTxRecord::simple(Identifier::from_bytes([0x65; 32]));
        record2.root_data_item_offset = Some(10);
        record2.root_data_offset = Some(20);

        writer.put(&key1, &record1).unwrap();
        writer.put(&key2, &record2).unwrap();
        writer.finalize().unwrap();

        let reader = CdbReader::open(&path).unwrap();
        assert_eq!(reader.get(&key1).unwrap(), Some(record1));
        let got2 = reader.get(&key2).unwrap().unwrap();
        assert!(got2.is_complete());
        assert_eq!(got2, record2);

        let mut missing = [0u8; 32];
        missing[31] = 9;
        assert_eq!(reader.get(&missing).unwrap(), None);
    }

    #[test]
    fn abort_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aborted.cdb");
        let writer = CdbWriter::create(&path).unwrap();
        let tmp = writer.data_tmp_path.clone();
        writer.abort();
        assert!(!tmp.exists());
        assert!(!path.exists());
    }

    #[test]
    fn drop_without_finalize_cleans_up_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.cdb");
        let tmp_path;
        {
            let writer = CdbWriter::create(&path).unwrap();
            tmp_path = writer.data_tmp_path.clone();
        }
        assert!(!tmp_path.exists());
    }

    #[test]
    fn handles_many_records_with_collisions_in_one_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("many.cdb");
        let mut writer = CdbWriter::create(&path).unwrap();

        let mut keys = Vec::new();
        for i in 0u8..64 {
            let mut key = [0u8; 32];
            key[0] = i;
            let record = RootTxRecord::simple(Identifier::from_bytes([i; 32]));
            writer.put(&key, &record).unwrap();
            keys.push((key, record));
        }
        writer.finalize().unwrap();

        let reader = CdbReader::open(&path).unwrap();
        for (key, record) in keys {
            assert_eq!(reader.get(&key).unwrap(), Some(record));
        }
    }
}
