//! Merkle verification of a single chunk against a transaction's
//! `data_root` (spec §4.4, invariant §3 "a chunk is returned to a caller
//! only after...").
//!
//! CPU-only, no I/O and no suspension points (spec §5): every function
//! here is synchronous.
//!
//! The `dataPath` is a sequence of branch nodes from the root down to
//! the chunk's leaf. Each branch node is `(leftHash || rightHash ||
//! boundary:uint256_be)`; the leaf carries `(dataHash || offset:uint256_be)`.
//! Descending the path narrows the offset range the current hash covers;
//! the leaf's declared offset must land inside that narrowed range and
//! its `dataHash` must equal `SHA256(chunk.data)`.

use gw_primitives::{Chunk, Identifier};
use sha2::{Digest, Sha256};
use thiserror::Error;

const BRANCH_NODE_LEN: usize = 96;
const LEAF_NODE_LEN: usize = 64;
const NOTE_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("chunk hash does not match SHA256(data)")]
    HashMismatch,
    #[error("data_path is malformed: {0}")]
    MalformedPath(&'static str),
    #[error("recomputed hash does not match expected hash at this level")]
    HashChainBroken,
    #[error("leaf offset is inconsistent with the chunk's relative_offset or branch boundaries")]
    OffsetInconsistent,
}

fn h(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn h2(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(a);
    buf.extend_from_slice(b);
    h(&buf)
}

fn note(offset: u64) -> [u8; 32] {
    let mut bytes = [0u8; NOTE_LEN];
    bytes[NOTE_LEN - 8..].copy_from_slice(&offset.to_be_bytes());
    bytes
}

fn branch_hash(left: &[u8; 32], right: &[u8; 32], boundary: u64) -> [u8; 32] {
    let hl = h(left);
    let hr = h(right);
    let hb = h(&note(boundary));
    h(&[hl, hr, hb].concat())
}

fn leaf_hash(data_hash: &[u8; 32], offset: u64) -> [u8; 32] {
    let hd = h(data_hash);
    let ho = h(&note(offset));
    h2(&hd, &ho)
}

/// Verifies a chunk's integrity hash and its position in the Merkle tree
/// rooted at `chunk.data_root`, given the transaction's total size.
///
/// On success, returns the chunk's `[start, end)` byte range within the
/// transaction, as attested by the path.
pub fn verify_chunk(chunk: &Chunk) -> Result<std::ops::Range<u64>, MerkleError> {
    let actual_hash: [u8; 32] = h(&chunk.data);
    if actual_hash != chunk.hash {
        return Err(MerkleError::HashMismatch);
    }

    let path = &chunk.data_path;
    if path.len() < LEAF_NODE_LEN || (path.len() - LEAF_NODE_LEN) % BRANCH_NODE_LEN != 0 {
        return Err(MerkleError::MalformedPath("length is not branches-then-leaf shaped"));
    }

    let branch_bytes = &path[..path.len() - LEAF_NODE_LEN];
    let leaf_bytes = &path[path.len() - LEAF_NODE_LEN..];

    let mut expected_hash: [u8; 32] = *chunk.data_root.as_bytes();
    let mut range_start: u64 = 0;
    let mut range_end: u64 = chunk.tx_size;

    for branch in branch_bytes.chunks_exact(BRANCH_NODE_LEN) {
        let left: [u8; 32] = branch[0..32].try_into().unwrap();
        let right: [u8; 32] = branch[32..64].try_into().unwrap();
        let boundary = u64_from_be_tail(&branch[64..96]);

        if branch_hash(&left, &right, boundary) != expected_hash {
            return Err(MerkleError::HashChainBroken);
        }

        if chunk.relative_offset < boundary {
            expected_hash = left;
            range_end = boundary;
        } else {
            expected_hash = right;
            range_start = boundary;
        }
    }

    let data_hash: [u8; 32] = leaf_bytes[0..32].try_into().unwrap();
    let leaf_offset = u64_from_be_tail(&leaf_bytes[32..64]);

    if leaf_hash(&data_hash, leaf_offset) != expected_hash {
        return Err(MerkleError::HashChainBroken);
    }
    if data_hash != chunk.hash {
        return Err(MerkleError::HashMismatch);
    }

    let range_end = range_end.min(leaf_offset);
    if chunk.relative_offset < range_start
        || chunk.relative_offset >= range_end
        || leaf_offset > chunk.tx_size
    {
        return Err(MerkleError::OffsetInconsistent);
    }

    Ok(range_start..range_end)
}

fn u64_from_be_tail(bytes: &[u8]) -> u64 {
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&bytes[bytes.len() - 8..]);
    u64::from_be_bytes(tail)
}

/// Test helper: builds a `(data_root, data_path)` pair for a single-leaf
/// tree, i.e. a transaction small enough to fit in one chunk.
pub fn single_leaf_tree(data: &[u8]) -> (Identifier, Vec<u8>) {
    let data_hash = h(data);
    let offset = data.len() as u64;
    let root = leaf_hash(&data_hash, offset);
    let mut path = Vec::with_capacity(LEAF_NODE_LEN);
    path.extend_from_slice(&data_hash);
    path.extend_from_slice(&note(offset));
    (Identifier::from_bytes(root), path)
}

/// Test helper: builds a `(data_root, data_path)` pair for a two-leaf
/// tree split at `boundary`.
pub fn two_leaf_tree(
    left_data: &[u8],
    right_data: &[u8],
) -> (Identifier, Vec<u8> /* path for left leaf */, Vec<u8> /* path for right leaf */) {
    let boundary = left_data.len() as u64;
    let tx_size = boundary + right_data.len() as u64;

    let left_data_hash = h(left_data);
    let left_leaf = leaf_hash(&left_data_hash, boundary);

    let right_data_hash = h(right_data);
    let right_leaf = leaf_hash(&right_data_hash, tx_size);

    let root = branch_hash(&left_leaf, &right_leaf, boundary);

    let mut branch = Vec::with_capacity(BRANCH_NODE_LEN);
    branch.extend_from_slice(&left_leaf);
    branch.extend_from_slice(&right_leaf);
    branch.extend_from_slice(&note(boundary));

    let mut left_path = branch.clone();
    left_path.extend_from_slice(&left_data_hash);
    left_path.extend_from_slice(&note(boundary));

    let mut right_path = branch;
    right_path.extend_from_slice(&right_data_hash);
    right_path.extend_from_slice(&note(tx_size));

    (Identifier::from_bytes(root), left_path, right_path)
}
