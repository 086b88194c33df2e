use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use gw_primitives::{Classify, ContiguousDataMetadata, ErrorKind, HopsExceeded, Identifier, RequestAttributes};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DataSourceError>> + Send>>;

/// A resolved, possibly-streaming byte range plus the metadata the
/// caller (the out-of-scope HTTP layer) attaches to response headers
/// (spec §6 "Inbound HTTP" header list).
pub struct ContiguousData {
    pub metadata: ContiguousDataMetadata,
    pub stream: ByteStream,
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("no source could resolve this identifier")]
    NotFound,
    #[error(transparent)]
    HopsExceeded(#[from] HopsExceeded),
    #[error("chunk verification failed: {0}")]
    VerificationFailed(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("request timed out")]
    Timeout,
    #[error("circuit open for this backend")]
    CircuitOpen,
    #[error("rate limited by backend")]
    RateLimited,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("all configured sources failed")]
    AllSourcesFailed,
}

impl Classify for DataSourceError {
    fn kind(&self) -> ErrorKind {
        match self {
            DataSourceError::NotFound => ErrorKind::NotFound,
            DataSourceError::HopsExceeded(_) => ErrorKind::HopsExceeded,
            DataSourceError::VerificationFailed(_) => ErrorKind::VerificationFailed,
            DataSourceError::NetworkError(_) => ErrorKind::NetworkError,
            DataSourceError::Timeout => ErrorKind::Timeout,
            DataSourceError::CircuitOpen => ErrorKind::CircuitOpen,
            DataSourceError::RateLimited => ErrorKind::RateLimited,
            DataSourceError::InvalidInput(_) => ErrorKind::InvalidInput,
            DataSourceError::Cancelled => ErrorKind::Cancelled,
            DataSourceError::AllSourcesFailed => ErrorKind::NetworkError,
        }
    }
}

/// A request for (possibly a sub-range of) the contiguous payload
/// addressed by `id`.
#[derive(Debug, Clone)]
pub struct DataRequest {
    pub id: Identifier,
    pub range: Option<Range<u64>>,
    pub request_attributes: RequestAttributes,
}

/// The common capability every backend in the data-source chain
/// implements (spec §2, §4.4-§4.7): resolve an identifier, optionally
/// ranged, to a verified byte stream plus metadata.
#[async_trait::async_trait]
pub trait ContiguousDataSource: Send + Sync {
    async fn get_data(
        &self,
        request: DataRequest,
        cancel: CancellationToken,
    ) -> Result<ContiguousData, DataSourceError>;
}

#[async_trait::async_trait]
impl<T: ContiguousDataSource + ?Sized> ContiguousDataSource for Arc<T> {
    async fn get_data(
        &self,
        request: DataRequest,
        cancel: CancellationToken,
    ) -> Result<ContiguousData, DataSourceError> {
        (**self).get_data(request, cancel).await
    }
}
