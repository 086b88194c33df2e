use async_trait::async_trait;
use gw_primitives::{Classify, ErrorKind, Identifier};
use thiserror::Error;

pub use gw_cdb::RootTxRecord;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("root-tx record not found")]
    NotFound,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("index request timed out")]
    Timeout,
    #[error("rate limited by backend")]
    RateLimited,
    #[error("local index storage error: {0}")]
    Storage(String),
}

impl Classify for IndexError {
    fn kind(&self) -> ErrorKind {
        match self {
            IndexError::NotFound => ErrorKind::NotFound,
            IndexError::NetworkError(_) => ErrorKind::NetworkError,
            IndexError::Timeout => ErrorKind::Timeout,
            IndexError::RateLimited => ErrorKind::RateLimited,
            IndexError::Storage(_) => ErrorKind::InvalidInput,
        }
    }
}

/// One backend in the composite root-tx index (spec §4.6). Every
/// backend answers the same question — "what root transaction, and at
/// what offset, does this data item live inside?" — over whatever
/// storage or remote protocol it wraps.
#[async_trait]
pub trait RootTxIndexBackend: Send + Sync {
    async fn get_root_tx(&self, data_item_id: Identifier) -> Result<Option<RootTxRecord>, IndexError>;

    /// Short name used in tracing spans and metrics labels.
    fn name(&self) -> &'static str;
}
