use std::sync::Arc;

use async_trait::async_trait;
use gw_primitives::Identifier;

use crate::backend::{IndexError, RootTxIndexBackend, RootTxRecord};

/// Chain-database lookup (spec §4.6 "SQLite index", spec §6: "SQLite
/// schemas are owned by the indexer (collaborator); the core only
/// consumes [`ChainOffsetIndex`]"). This crate depends only on the
/// narrow capability, not on a SQLite client — a real deployment
/// supplies its own [`ChainOffsetIndex`] implementation backed by
/// whatever the indexer collaborator exposes.
#[async_trait]
pub trait ChainOffsetIndex: Send + Sync {
    async fn lookup(&self, data_item_id: Identifier) -> Result<Option<RootTxRecord>, IndexError>;
}

#[async_trait]
impl<T: ChainOffsetIndex + ?Sized> ChainOffsetIndex for Arc<T> {
    async fn lookup(&self, data_item_id: Identifier) -> Result<Option<RootTxRecord>, IndexError> {
        (**self).lookup(data_item_id).await
    }
}

/// Adapts any [`ChainOffsetIndex`] into a [`RootTxIndexBackend`] for the
/// composite chain.
pub struct SqliteBackend<I> {
    index: I,
}

impl<I: ChainOffsetIndex> SqliteBackend<I> {
    pub fn new(index: I) -> Self {
        Self { index }
    }
}

#[async_trait]
impl<I: ChainOffsetIndex> RootTxIndexBackend for SqliteBackend<I> {
    async fn get_root_tx(&self, data_item_id: Identifier) -> Result<Option<RootTxRecord>, IndexError> {
        self.index.lookup(data_item_id).await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeChainOffsetIndex(HashMap<Identifier, RootTxRecord>);

    #[async_trait]
    impl ChainOffsetIndex for FakeChainOffsetIndex {
        async fn lookup(&self, data_item_id: Identifier) -> Result<Option<RootTxRecord>, IndexError> {
            Ok(self.0.get(&data_item_id).cloned())
        }
    }

    #[tokio::test]
    async fn delegates_to_the_wrapped_index() {
        let id = Identifier::from_bytes([1u8; 32]);
        let root = Identifier::from_bytes([2u8; 32]);
        let mut map = HashMap::new();
        map.insert(id, RootTxRecord::simple(root));

        let backend = SqliteBackend::new(FakeChainOffsetIndex(map));
        let record = backend.get_root_tx(id).await.unwrap().unwrap();
        assert_eq!(record.root_tx_id, root);
    }
}
