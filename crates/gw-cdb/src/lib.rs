//! CDB64: an immutable on-disk constant hash database, DJB-hash based,
//! with a 64-bit hash variant (spec §4.3).
//!
//! Grounded on `core/store/src/node_storage/opener.rs`'s open/finalize/
//! atomic-rename-then-replace error taxonomy and
//! `core/store/src/archive/cold_storage.rs`'s directory-of-immutable-files
//! pattern for [`directory::CdbDirectoryIndex`].

pub mod directory;
pub mod hash;
pub mod reader;
pub mod record;
pub mod writer;

pub use directory::CdbDirectoryIndex;
pub use hash::cdb64_hash;
pub use reader::CdbReader;
pub use record::RootTxRecord;
pub use writer::CdbWriter;

use thiserror::Error;

/// Size in bytes of one key. Spec §3: "A CDB64 key is exactly 32 bytes;
/// any other length returns 'not found' without probing."
pub const KEY_LEN: usize = 32;

/// Number of header slots / hash tables.
pub const NUM_TABLES: usize = 256;

/// Size in bytes of the fixed header: 256 slots of (table_position,
/// slot_count), each a little-endian u64 pair.
pub const HEADER_LEN: u64 = (NUM_TABLES as u64) * 16;

#[derive(Debug, Error)]
pub enum CdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode CDB64 value: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode CDB64 value: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("CDB64 file is truncated or corrupt: {0}")]
    Corrupt(&'static str),
    #[error("writer has already been finalized or aborted")]
    AlreadyFinalized,
}
