//! Offset repair worker (spec §4.6 "simple" vs "complete" records):
//! walks a bundle's envelope for a data item whose root-tx index record
//! only has the root transaction id so far, and writes back a complete
//! record carrying its offsets — so later lookups of the same item are
//! served straight from the index without repeating the bundle walk.
//!
//! Mirrors [`crate::bundle_item::BundleAwareDataSource::resolve_offset`]
//! (in `gw_data_source`) minus the "serve the read" half: this worker
//! only persists the resolved offset, it never returns bytes to anyone.

use std::sync::Arc;

use async_trait::async_trait;
use gw_bundles::get_data_item_offset;
use gw_data_source::{ContiguousDataSource, DataSourceByteRange};
use gw_index::RootTxRecord;
use gw_primitives::{Identifier, RequestAttributes};

use crate::scaffold::{ItemProcessor, PollingQueue, WorkerError};
use crate::writer::RootTxIndexWriter;

/// A data item whose index record is `simple` (spec §4.6): its root
/// transaction is known but its offsets inside it are not yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffsetRepair {
    pub data_item_id: Identifier,
    pub simple_record: RootTxRecord,
}

#[async_trait]
pub trait PendingRepairQueue: Send + Sync {
    async fn next_pending(&self, max_items: usize) -> Result<Vec<PendingOffsetRepair>, WorkerError>;
}

#[async_trait]
impl<T: PendingRepairQueue> PollingQueue for T {
    type Item = PendingOffsetRepair;

    async fn poll(&self, max_items: usize) -> Result<Vec<PendingOffsetRepair>, WorkerError> {
        self.next_pending(max_items).await
    }
}

/// Resolves a pending item's offset by walking its root transaction's
/// bytes through `tx_source`, then persists the completed record
/// through `writer`.
pub struct OffsetRepairProcessor<S, W> {
    tx_source: Arc<S>,
    writer: W,
    max_bundle_nesting_depth: u32,
}

impl<S: ContiguousDataSource, W: RootTxIndexWriter> OffsetRepairProcessor<S, W> {
    pub fn new(tx_source: Arc<S>, writer: W, max_bundle_nesting_depth: u32) -> Self {
        Self { tx_source, writer, max_bundle_nesting_depth }
    }
}

#[async_trait]
impl<S: ContiguousDataSource + 'static, W: RootTxIndexWriter> ItemProcessor for OffsetRepairProcessor<S, W> {
    type Item = PendingOffsetRepair;

    async fn process(&self, item: PendingOffsetRepair) -> Result<(), WorkerError> {
        let root_tx_id = item.simple_record.root_tx_id;
        let byte_range = DataSourceByteRange::new(Arc::clone(&self.tx_source), root_tx_id, RequestAttributes::default());

        let found = get_data_item_offset(&byte_range, root_tx_id, item.data_item_id, self.max_bundle_nesting_depth)
            .await
            .map_err(|e| {
                WorkerError::Process(format!(
                    "bundle walk for data item {} in bundle {root_tx_id} failed: {e}",
                    item.data_item_id
                ))
            })?
            .ok_or_else(|| {
                WorkerError::Process(format!(
                    "data item {} not found while walking bundle {root_tx_id}",
                    item.data_item_id
                ))
            })?;

        let mut record = item.simple_record;
        record.root_data_item_offset = Some(found.offset);
        record.root_data_offset = Some(found.offset);
        record.data_size = Some(found.size);
        record.size.get_or_insert(found.size);

        self.writer.put_record(item.data_item_id, record).await.map_err(|e| {
            WorkerError::Process(format!("writing repaired record for {} failed: {e}", item.data_item_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use gw_data_source::{ContiguousData, DataRequest, DataSourceError};
    use gw_primitives::ContiguousDataMetadata;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct InMemoryBundleSource {
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl ContiguousDataSource for InMemoryBundleSource {
        async fn get_data(
            &self,
            request: DataRequest,
            _cancel: CancellationToken,
        ) -> Result<ContiguousData, DataSourceError> {
            let (start, end) = match request.range {
                Some(r) => (r.start as usize, r.end as usize),
                None => (0, self.bytes.len()),
            };
            let slice = self
                .bytes
                .get(start..end)
                .ok_or_else(|| DataSourceError::InvalidInput("range out of bounds".to_string()))?
                .to_vec();
            let metadata = ContiguousDataMetadata::unverified(self.bytes.len() as u64, request.request_attributes);
            let stream = futures::stream::once(async { Ok(Bytes::from(slice)) });
            Ok(ContiguousData { metadata, stream: Box::pin(stream) })
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        records: Mutex<Vec<(Identifier, RootTxRecord)>>,
    }

    #[async_trait]
    impl RootTxIndexWriter for RecordingWriter {
        async fn put_record(&self, data_item_id: Identifier, record: RootTxRecord) -> Result<(), WorkerError> {
            self.records.lock().unwrap().push((data_item_id, record));
            Ok(())
        }
    }

    fn id(byte: u8) -> Identifier {
        Identifier::from_bytes([byte; 32])
    }

    fn build_single_item_bundle(item_id: Identifier, data: &[u8]) -> Vec<u8> {
        fn u256_le(n: u64) -> [u8; 32] {
            let mut out = [0u8; 32];
            out[0..8].copy_from_slice(&n.to_le_bytes());
            out
        }

        let mut item = Vec::new();
        item.extend_from_slice(&2u16.to_le_bytes());
        item.extend(vec![0u8; 64]);
        item.extend(vec![0u8; 32]);
        item.push(0);
        item.push(0);
        item.extend_from_slice(&0u64.to_le_bytes());
        item.extend_from_slice(&0u64.to_le_bytes());
        item.extend_from_slice(data);

        let mut out = Vec::new();
        out.extend_from_slice(&u256_le(1));
        out.extend_from_slice(&u256_le(item.len() as u64));
        out.extend_from_slice(item_id.as_bytes());
        out.extend_from_slice(&item);
        out
    }

    #[tokio::test]
    async fn repairs_a_simple_record_into_a_complete_one() {
        let item_id = id(5);
        let bundle_id = id(1);
        let bundle_bytes = build_single_item_bundle(item_id, b"repaired payload");

        let source = Arc::new(InMemoryBundleSource { bytes: bundle_bytes });
        let writer = RecordingWriter::default();
        let processor = OffsetRepairProcessor::new(source, writer, 10);

        let pending = PendingOffsetRepair { data_item_id: item_id, simple_record: RootTxRecord::simple(bundle_id) };
        processor.process(pending).await.unwrap();

        let records = processor.writer.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, item_id);
        assert!(records[0].1.is_complete());
        assert_eq!(records[0].1.data_size, Some(16));
    }

    #[tokio::test]
    async fn an_absent_item_is_reported_as_a_process_error() {
        let bundle_id = id(1);
        let bundle_bytes = build_single_item_bundle(id(9), b"someone else's item");

        let source = Arc::new(InMemoryBundleSource { bytes: bundle_bytes });
        let writer = RecordingWriter::default();
        let processor = OffsetRepairProcessor::new(source, writer, 10);

        let pending = PendingOffsetRepair { data_item_id: id(42), simple_record: RootTxRecord::simple(bundle_id) };
        assert!(matches!(processor.process(pending).await, Err(WorkerError::Process(_))));
    }
}
