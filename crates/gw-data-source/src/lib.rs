//! Contiguous-data source chain (spec §2, §4.5-§4.7, §4.10): resolves an
//! identifier to a verified byte stream, whether it names a whole
//! transaction, a nested ANS-104 data item, or a cached copy on disk —
//! and composes those resolutions with ordered fallback, sampling, and
//! a filesystem cache with background cleanup.
//!
//! Mirrors `chain/chunks`'s layering: a narrow "where do these bytes
//! live" index sits underneath a streaming reconstruction layer, which
//! in turn sits underneath composition and caching wrappers that don't
//! know anything about chunks at all.

pub mod byte_range_adapter;
pub mod bundle_item;
pub mod chain_offset;
pub mod cleanup;
pub mod composite;
pub mod fs_cache;
pub mod source;
pub mod tx_stream;

pub use bundle_item::BundleAwareDataSource;
pub use byte_range_adapter::DataSourceByteRange;
pub use chain_offset::{ContiguousDataIndex, InMemoryContiguousDataIndex, TxOffset, TxOffsetError};
pub use cleanup::{DeletionPredicate, FsCleanupWorker, KeepEverything, SymlinkCleanupWorker};
pub use composite::{FallbackCompositeDataSource, SamplingDataSource};
pub use fs_cache::{by_dataroot_path, by_hash_path, CachingDataSource, FsCache};
pub use source::{ByteStream, ContiguousData, ContiguousDataSource, DataRequest, DataSourceError};
pub use tx_stream::ChunkStreamDataSource;
