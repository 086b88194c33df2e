use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::hash::cdb64_hash;
use crate::record::RootTxRecord;
use crate::{CdbError, HEADER_LEN, KEY_LEN, NUM_TABLES};

/// An open, immutable CDB64 file. The file handle is opened once and
/// read concurrently via positioned reads (`pread`), so no locking is
/// needed for lookups (spec §5: "opened once, many concurrent reads").
pub struct CdbReader {
    path: PathBuf,
    file: File,
    header: [(u64, u64); NUM_TABLES],
}

impl CdbReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CdbError> {
        let path = path.into();
        let file = File::open(&path)?;
        let mut raw = [0u8; HEADER_LEN as usize];
        file.read_exact_at(&mut raw, 0)?;

        let mut header = [(0u64, 0u64); NUM_TABLES];
        for (i, slot) in header.iter_mut().enumerate() {
            let base = i * 16;
            let table_pos = u64::from_le_bytes(raw[base..base + 8].try_into().unwrap());
            let slot_count = u64::from_le_bytes(raw[base + 8..base + 16].try_into().unwrap());
            *slot = (table_pos, slot_count);
        }

        Ok(Self { path, file, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up `key`. Non-32-byte keys short-circuit to a miss without
    /// touching disk (spec §3 invariant).
    pub fn get(&self, key: &[u8]) -> Result<Option<RootTxRecord>, CdbError> {
        if key.len() != KEY_LEN {
            return Ok(None);
        }

        let hash = cdb64_hash(key);
        let table_idx = (hash % NUM_TABLES as u64) as usize;
        let (table_pos, slot_count) = self.header[table_idx];
        if slot_count == 0 {
            return Ok(None);
        }

        let start = (hash >> 8) % slot_count;
        let mut slot_buf = [0u8; 16];

        for step in 0..slot_count {
            let slot_idx = (start + step) % slot_count;
            let slot_offset = table_pos + slot_idx * 16;
            self.file.read_exact_at(&mut slot_buf, slot_offset)?;
            let stored_hash = u64::from_le_bytes(slot_buf[0..8].try_into().unwrap());
            let record_offset = u64::from_le_bytes(slot_buf[8..16].try_into().unwrap());

            if record_offset == 0 {
                // Empty slot: CDB64's probe sequence terminates on first miss.
                return Ok(None);
            }
            if stored_hash != hash {
                continue;
            }

            if let Some(record) = self.read_record_if_key_matches(record_offset, key)? {
                return Ok(Some(record));
            }
            // Hash collision with a different key: keep probing.
        }

        Ok(None)
    }

    fn read_record_if_key_matches(
        &self,
        record_offset: u64,
        key: &[u8],
    ) -> Result<Option<RootTxRecord>, CdbError> {
        let mut record_header = [0u8; 16];
        self.file.read_exact_at(&mut record_header, record_offset)?;
        let key_len = u64::from_le_bytes(record_header[0..8].try_into().unwrap());
        let value_len = u64::from_le_bytes(record_header[8..16].try_into().unwrap());

        if key_len != KEY_LEN as u64 {
            return Err(CdbError::Corrupt("record key length is not 32 bytes"));
        }

        let mut stored_key = vec![0u8; key_len as usize];
        self.file.read_exact_at(&mut stored_key, record_offset + 16)?;
        if stored_key != key {
            return Ok(None);
        }

        let mut value_bytes = vec![0u8; value_len as usize];
        self.file.read_exact_at(&mut value_bytes, record_offset + 16 + key_len)?;
        let record: RootTxRecord = rmp_serde::from_slice(&value_bytes)?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::CdbWriter;
    use gw_primitives::Identifier;

    #[test]
    fn short_key_is_a_miss_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.cdb");
        let writer = CdbWriter::create(&path).unwrap();
        writer.finalize().unwrap();

        let reader = CdbReader::open(&path).unwrap();
        assert_eq!(reader.get(b"too-short").unwrap(), None);
    }

    #[test]
    fn empty_database_is_always_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.cdb");
        let writer = CdbWriter::create(&path).unwrap();
        writer.finalize().unwrap();

        let reader = CdbReader::open(&path).unwrap();
        assert_eq!(reader.get(&[0u8; 32]).unwrap(), None);
    }

    #[test]
    fn specific_id_lookup_from_spec_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example.cdb");
        let mut writer = CdbWriter::create(&path).unwrap();

        let mut data_item_id = [0u8; 32];
        data_item_id[31] = 1;
        let mut root_tx_id = [0u8; 32];
        root_tx_id[31] = 0x64;

        writer
            .put(&data_item_id, &RootTxRecord::simple(Identifier::from_bytes(root_tx_id)))
            .unwrap();
        writer.finalize().unwrap();

        let reader = CdbReader::open(&path).unwrap();
        let found = reader.get(&data_item_id).unwrap().unwrap();
        assert_eq!(found.root_tx_id, Identifier::from_bytes(root_tx_id));

        let mut other_id = [0u8; 32];
        other_id[31] = 2;
        assert_eq!(reader.get(&other_id).unwrap(), None);

        let short_id = [0u8; 20];
        assert_eq!(reader.get(&short_id).unwrap(), None);
    }
}
