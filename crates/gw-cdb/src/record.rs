use gw_primitives::Identifier;
use serde::{Deserialize, Serialize};

/// The value stored under a data-item id key (spec §4.3): a
/// MessagePack-encoded object carrying the root transaction id and,
/// optionally, the offsets that place the data item inside it.
///
/// A record with both offsets present is *complete*; one with either
/// missing is *simple* and may need another backend to fill in the rest
/// (spec §4.6 traversal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootTxRecord {
    pub root_tx_id: Identifier,
    pub root_data_item_offset: Option<u64>,
    pub root_data_offset: Option<u64>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub data_size: Option<u64>,
}

impl RootTxRecord {
    pub fn simple(root_tx_id: Identifier) -> Self {
        Self {
            root_tx_id,
            root_data_item_offset: None,
            root_data_offset: None,
            content_type: None,
            size: None,
            data_size: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.root_data_item_offset.is_some() && self.root_data_offset.is_some()
    }
}
