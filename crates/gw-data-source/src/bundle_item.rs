//! Nested ANS-104 data-item reads (spec §4.5 "Nested data item"): resolve
//! a data item's root transaction and parent offsets through the
//! composite root-tx index, then read the right slice of the root
//! transaction's byte stream — falling back to `gw-bundles`' envelope
//! walker when the index only has a *simple* record (no offsets yet).

use std::sync::Arc;

use async_trait::async_trait;
use gw_index::{CompositeRootTxIndex, RootTxRecord};
use gw_primitives::HopGuard;
use tokio_util::sync::CancellationToken;

use crate::byte_range_adapter::DataSourceByteRange;
use crate::source::{ContiguousData, ContiguousDataSource, DataRequest, DataSourceError};

/// Wraps a root-transaction byte-stream source (typically a
/// [`crate::tx_stream::ChunkStreamDataSource`]) with bundle-aware
/// resolution for ids that turn out to be data items nested one or more
/// bundles deep.
pub struct BundleAwareDataSource<S> {
    root_tx_index: Arc<CompositeRootTxIndex>,
    tx_source: Arc<S>,
    max_bundle_nesting_depth: u32,
    hop_guard: HopGuard,
}

impl<S: ContiguousDataSource + 'static> BundleAwareDataSource<S> {
    pub fn new(
        root_tx_index: Arc<CompositeRootTxIndex>,
        tx_source: Arc<S>,
        max_bundle_nesting_depth: u32,
        max_hops: u32,
    ) -> Self {
        Self { root_tx_index, tx_source, max_bundle_nesting_depth, hop_guard: HopGuard::new(max_hops) }
    }

    async fn resolve_offset(&self, record: &RootTxRecord, target_id: gw_primitives::Identifier) -> Result<(u64, u64), DataSourceError> {
        if record.is_complete() {
            let offset = record.root_data_offset.expect("checked complete");
            let size = record
                .data_size
                .or(record.size)
                .ok_or_else(|| DataSourceError::InvalidInput("root-tx record is missing an item size".to_string()))?;
            return Ok((offset, size));
        }

        let byte_range = DataSourceByteRange::new(
            Arc::clone(&self.tx_source),
            record.root_tx_id,
            Default::default(),
        );
        let found = gw_bundles::get_data_item_offset(
            &byte_range,
            record.root_tx_id,
            target_id,
            self.max_bundle_nesting_depth,
        )
        .await
        .map_err(|e| DataSourceError::InvalidInput(format!("bundle envelope walk failed: {e}")))?
        .ok_or(DataSourceError::NotFound)?;

        Ok((found.offset, found.size))
    }
}

#[async_trait]
impl<S: ContiguousDataSource + 'static> ContiguousDataSource for BundleAwareDataSource<S> {
    async fn get_data(
        &self,
        request: DataRequest,
        cancel: CancellationToken,
    ) -> Result<ContiguousData, DataSourceError> {
        self.hop_guard.check(&request.request_attributes)?;

        let record = self
            .root_tx_index
            .get_root_tx(request.id)
            .await
            .ok_or(DataSourceError::NotFound)?;

        if record.root_tx_id == request.id {
            return self.tx_source.get_data(request, cancel).await;
        }

        let (item_offset, item_size) = self.resolve_offset(&record, request.id).await?;

        let region = match &request.range {
            Some(r) => {
                if r.end > item_size || r.start > r.end {
                    return Err(DataSourceError::InvalidInput(format!(
                        "range {:?} exceeds data item size {}",
                        r, item_size
                    )));
                }
                item_offset + r.start..item_offset + r.end
            }
            None => item_offset..item_offset + item_size,
        };

        let inner_request = DataRequest {
            id: record.root_tx_id,
            range: Some(region),
            request_attributes: request.request_attributes.next_hop(),
        };

        let mut result = self.tx_source.get_data(inner_request, cancel).await?;
        if result.metadata.source_content_type.is_none() {
            result.metadata.source_content_type = record.content_type.clone();
        }
        Ok(result)
    }
}
