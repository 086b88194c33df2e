use crate::identifier::Identifier;

/// A single Merkle-verifiable slice of a transaction's payload (spec §3).
///
/// `data` is at most [`crate::MAX_CHUNK_SIZE`] bytes. `hash` is the
/// SHA-256 of `data` and is checked by the caller before the chunk is
/// handed to anything else — see `gw-merkle`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Vec<u8>,
    pub data_path: Vec<u8>,
    pub data_root: Identifier,
    pub tx_size: u64,
    pub relative_offset: u64,
    pub hash: [u8; 32],
    pub source: Option<ChunkSource>,
}

/// Where a chunk came from, attached for metrics/debugging (spec §2
/// "source label").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSource {
    pub label: &'static str,
    pub host: String,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
