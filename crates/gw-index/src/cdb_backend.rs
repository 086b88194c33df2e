use async_trait::async_trait;
use gw_cdb::CdbDirectoryIndex;
use gw_primitives::Identifier;

use crate::backend::{IndexError, RootTxIndexBackend, RootTxRecord};

/// Local, O(1) disk lookups via a [`CdbDirectoryIndex`] (spec §4.6).
/// `pread`-based lookups never suspend on I/O contention the way a
/// network call would, but the trait is async regardless so the
/// composite index can treat every backend uniformly.
pub struct CdbBackend {
    index: CdbDirectoryIndex,
}

impl CdbBackend {
    pub fn new(index: CdbDirectoryIndex) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RootTxIndexBackend for CdbBackend {
    async fn get_root_tx(&self, data_item_id: Identifier) -> Result<Option<RootTxRecord>, IndexError> {
        self.index
            .get(data_item_id.as_bytes())
            .map_err(|e| IndexError::Storage(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "cdb64"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_cdb::{CdbWriter, RootTxRecord as Record};

    #[tokio::test]
    async fn finds_a_written_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CdbWriter::create(dir.path().join("a.cdb")).unwrap();
        let data_item_id = Identifier::from_bytes([1u8; 32]);
        let root_tx_id = Identifier::from_bytes([2u8; 32]);
        writer.put(data_item_id.as_bytes(), &Record::simple(root_tx_id)).unwrap();
        writer.finalize().unwrap();

        let backend = CdbBackend::new(CdbDirectoryIndex::open(dir.path()).unwrap());
        let record = backend.get_root_tx(data_item_id).await.unwrap().unwrap();
        assert_eq!(record.root_tx_id, root_tx_id);
    }

    #[tokio::test]
    async fn missing_record_is_none_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CdbBackend::new(CdbDirectoryIndex::open(dir.path()).unwrap());
        let result = backend.get_root_tx(Identifier::from_bytes([9u8; 32])).await.unwrap();
        assert!(result.is_none());
    }
}
