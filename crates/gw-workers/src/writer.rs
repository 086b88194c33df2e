//! Write-side seam for the root-tx index (spec §4.3, §4.6): the CDB64
//! backend itself is immutable once finalized, so the workers that
//! discover new root-tx records write them to a collaborator-owned
//! mutable backend (SQLite, per spec §1 Non-goals) through this trait
//! instead.

use async_trait::async_trait;
use gw_index::RootTxRecord;
use gw_primitives::Identifier;

use crate::scaffold::WorkerError;

#[async_trait]
pub trait RootTxIndexWriter: Send + Sync {
    async fn put_record(&self, data_item_id: Identifier, record: RootTxRecord) -> Result<(), WorkerError>;
}
