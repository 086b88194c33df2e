//! Data-item indexer worker (spec §4.9): parses a newly imported
//! ANS-104 bundle's envelope once and writes a root-tx record for each
//! of its direct data items, so the composite root-tx index (spec §4.6)
//! can resolve them without re-parsing the bundle bytes on every
//! request.
//!
//! Nested bundles turn up among a bundle's direct items like any other
//! entry; they get their own indexing pass once the importer enqueues
//! them in turn, so this worker never recurses into bundle payloads
//! itself (mirrors [`crate::data_importer`]'s one-item-per-poll shape).

use std::sync::Arc;

use async_trait::async_trait;
use gw_bundles::list_entries;
use gw_data_source::{ContiguousDataSource, DataSourceByteRange};
use gw_index::RootTxRecord;
use gw_primitives::{Identifier, RequestAttributes};

use crate::scaffold::{ItemProcessor, PollingQueue, WorkerError};
use crate::writer::RootTxIndexWriter;

/// A bundle transaction pending a pass over its direct data items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingBundleIndex {
    pub bundle_id: Identifier,
}

/// Collaborator-backed source of bundles awaiting indexing.
#[async_trait]
pub trait PendingIndexQueue: Send + Sync {
    async fn next_pending(&self, max_items: usize) -> Result<Vec<PendingBundleIndex>, WorkerError>;
}

#[async_trait]
impl<T: PendingIndexQueue> PollingQueue for T {
    type Item = PendingBundleIndex;

    async fn poll(&self, max_items: usize) -> Result<Vec<PendingBundleIndex>, WorkerError> {
        self.next_pending(max_items).await
    }
}

/// Reads a bundle's bytes through `tx_source`, lists its direct data
/// items via `gw_bundles::list_entries`, and writes one record per item
/// through `writer`.
pub struct DataItemIndexerProcessor<S, W> {
    tx_source: Arc<S>,
    writer: W,
}

impl<S: ContiguousDataSource, W: RootTxIndexWriter> DataItemIndexerProcessor<S, W> {
    pub fn new(tx_source: Arc<S>, writer: W) -> Self {
        Self { tx_source, writer }
    }
}

#[async_trait]
impl<S: ContiguousDataSource + 'static, W: RootTxIndexWriter> ItemProcessor for DataItemIndexerProcessor<S, W> {
    type Item = PendingBundleIndex;

    async fn process(&self, item: PendingBundleIndex) -> Result<(), WorkerError> {
        let byte_range = DataSourceByteRange::new(
            Arc::clone(&self.tx_source),
            item.bundle_id,
            RequestAttributes::default(),
        );

        let entries = list_entries(&byte_range)
            .await
            .map_err(|e| WorkerError::Process(format!("listing entries of bundle {} failed: {e}", item.bundle_id)))?;

        for entry in entries {
            let record = RootTxRecord {
                root_tx_id: item.bundle_id,
                root_data_item_offset: Some(entry.offset),
                root_data_offset: Some(entry.offset),
                content_type: None,
                size: Some(entry.size),
                data_size: Some(entry.size),
            };
            self.writer.put_record(entry.id, record).await.map_err(|e| {
                WorkerError::Process(format!(
                    "writing index record for data item {} of bundle {} failed: {e}",
                    entry.id, item.bundle_id
                ))
            })?;
        }

        Ok(())
    }
}
