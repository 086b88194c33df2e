//! Chain-level lookup for a root transaction's data root and absolute
//! chunk offsets (spec §4.5, §6: the core "only consumes
//! `ContiguousDataIndex`... interfaces"; the SQLite-backed implementation
//! itself is owned by the indexer collaborator and out of scope, spec §1).

use std::sync::Arc;

use async_trait::async_trait;
use gw_primitives::{Classify, ErrorKind, Identifier};
use thiserror::Error;

/// Where a root transaction's bytes begin in the chain's chunk space,
/// and its Merkle `data_root` (spec §4.5 "Look up the transaction's
/// `data_root` and `txOffset`...").
#[derive(Debug, Clone)]
pub struct TxOffset {
    pub data_root: Identifier,
    pub size: u64,
    /// Absolute offset, inclusive, of the transaction's last byte in
    /// the chain's chunk-offset space.
    pub end_offset: u64,
    pub content_type: Option<String>,
}

impl TxOffset {
    /// `startOffset = txOffset.endOffset - txOffset.size + 1` (spec §4.5).
    pub fn start_offset(&self) -> u64 {
        self.end_offset - self.size + 1
    }
}

#[derive(Debug, Error)]
pub enum TxOffsetError {
    #[error("transaction not found in the chain index")]
    NotFound,
    #[error("chain index storage error: {0}")]
    Storage(String),
}

impl Classify for TxOffsetError {
    fn kind(&self) -> ErrorKind {
        match self {
            TxOffsetError::NotFound => ErrorKind::NotFound,
            TxOffsetError::Storage(_) => ErrorKind::NetworkError,
        }
    }
}

/// Narrow capability consumed by [`crate::tx_stream::ChunkStreamDataSource`]:
/// "where does this root transaction's payload live, and what's its
/// Merkle root". A real deployment backs this with the chain importer's
/// database (spec §1 Non-goals: "the chain importer... these are glue").
#[async_trait]
pub trait ContiguousDataIndex: Send + Sync {
    async fn get_tx_offset(&self, tx_id: Identifier) -> Result<Option<TxOffset>, TxOffsetError>;
}

#[async_trait]
impl<T: ContiguousDataIndex + ?Sized> ContiguousDataIndex for Arc<T> {
    async fn get_tx_offset(&self, tx_id: Identifier) -> Result<Option<TxOffset>, TxOffsetError> {
        (**self).get_tx_offset(tx_id).await
    }
}

/// Test/bootstrap implementation keyed by a fixed in-memory map.
pub struct InMemoryContiguousDataIndex {
    entries: std::collections::HashMap<Identifier, TxOffset>,
}

impl InMemoryContiguousDataIndex {
    pub fn new() -> Self {
        Self { entries: std::collections::HashMap::new() }
    }

    pub fn with_tx(mut self, tx_id: Identifier, offset: TxOffset) -> Self {
        self.entries.insert(tx_id, offset);
        self
    }
}

impl Default for InMemoryContiguousDataIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContiguousDataIndex for InMemoryContiguousDataIndex {
    async fn get_tx_offset(&self, tx_id: Identifier) -> Result<Option<TxOffset>, TxOffsetError> {
        Ok(self.entries.get(&tx_id).cloned())
    }
}
