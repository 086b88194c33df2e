//! Adapts a [`ContiguousDataSource`] fixed to one identifier into a
//! [`ByteRangeSource`], so `gw-bundles`' envelope walker can read a root
//! transaction's bytes without knowing anything about chunks or peers.

use async_trait::async_trait;
use futures::TryStreamExt;
use gw_primitives::{ByteRangeError, ByteRangeSource, Identifier, RequestAttributes};
use tokio_util::sync::CancellationToken;

use crate::source::{ContiguousDataSource, DataRequest};

pub struct DataSourceByteRange<S> {
    source: S,
    id: Identifier,
    request_attributes: RequestAttributes,
}

impl<S: ContiguousDataSource> DataSourceByteRange<S> {
    pub fn new(source: S, id: Identifier, request_attributes: RequestAttributes) -> Self {
        Self { source, id, request_attributes }
    }
}

#[async_trait]
impl<S: ContiguousDataSource> ByteRangeSource for DataSourceByteRange<S> {
    async fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, ByteRangeError> {
        let request = DataRequest {
            id: self.id,
            range: Some(offset..offset + size),
            request_attributes: self.request_attributes.clone(),
        };
        let data = self
            .source
            .get_data(request, CancellationToken::new())
            .await
            .map_err(|e| ByteRangeError::Io(e.to_string()))?;

        let bytes: Vec<u8> = data
            .stream
            .map_ok(|chunk| chunk.to_vec())
            .try_concat()
            .await
            .map_err(|e| ByteRangeError::Io(e.to_string()))?;
        Ok(bytes)
    }

    async fn size(&self) -> Result<u64, ByteRangeError> {
        let request =
            DataRequest { id: self.id, range: None, request_attributes: self.request_attributes.clone() };
        // The returned stream is never polled, so this costs only the
        // lookup needed to learn the transaction's size, not a fetch of
        // its bytes (spec §4.5's range-read avoids fetching chunks
        // outside the region actually needed).
        let data = self
            .source
            .get_data(request, CancellationToken::new())
            .await
            .map_err(|e| ByteRangeError::Io(e.to_string()))?;
        Ok(data.metadata.size)
    }
}
