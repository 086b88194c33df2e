//! Composite root-transaction index (spec §4.6): resolves
//! `dataItemId -> {rootTxId, rootOffset?, rootDataOffset?, contentType?,
//! size?, dataSize?}` across an ordered list of backends, each guarded
//! by its own circuit breaker.
//!
//! Grounded on `core/store/src/node_storage/opener.rs`'s hot/cold-
//! database-mismatch handling (the teacher's pattern for "multiple
//! backing stores, reconcile or prefer one") generalized to an ordered
//! fallback chain, and `chain/network/src/types.rs`'s tagged-enum
//! response types for the simple-vs-complete record distinction
//! (carried by [`gw_cdb::RootTxRecord::is_complete`]).

mod backend;
mod cdb_backend;
mod composite;
mod gateway_header_backend;
mod graphql_backend;
mod sqlite_backend;
mod turbo_backend;

pub use backend::{IndexError, RootTxIndexBackend, RootTxRecord};
pub use cdb_backend::CdbBackend;
pub use composite::{CompositeRootTxIndex, CompositeRootTxIndexBuilder};
pub use gateway_header_backend::{GatewayHeaderBackend, TrustedGateway};
pub use graphql_backend::GraphqlBackend;
pub use sqlite_backend::{ChainOffsetIndex, SqliteBackend};
pub use turbo_backend::TurboBackend;
