use std::collections::HashSet;

use gw_primitives::{ByteRangeSource, Identifier};
use thiserror::Error;

use crate::signature::SignatureType;
use crate::tags;

/// Length in bytes of the leading item-count field and of one
/// `(size, id)` header entry (spec §4.7).
const ITEM_COUNT_LEN: u64 = 32;
const ENTRY_LEN: u64 = 64;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("byte range read failed: {0}")]
    Read(#[from] gw_primitives::ByteRangeError),
    #[error("bundle envelope is truncated or malformed: {0}")]
    Malformed(&'static str),
    #[error("u256 field does not fit in 64 bits")]
    ValueTooLarge,
    #[error("unknown data item signature type {0}")]
    UnknownSignatureType(u16),
}

/// A located nested data item: its byte offset and size within the
/// top-level bundle's byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataItemOffset {
    pub offset: u64,
    pub size: u64,
}

struct BundleEntry {
    size: u64,
    id: [u8; 32],
}

/// One data item directly inside a bundle: its identifier, its byte
/// range relative to the byte-range source the bundle was read from,
/// and whether its own tags mark it as a nested bundle in turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataItemEntry {
    pub id: Identifier,
    pub offset: u64,
    pub size: u64,
    pub is_nested_bundle: bool,
}

/// Finds `target_id` inside the bundle rooted at `bundle_id`, recursing
/// into nested bundles up to `max_nesting_depth`, with cycle detection
/// on bundle id (spec §4.7, invariant §3 "bundle parsing aborts if the
/// same bundle-id recurs..."). `source` exposes the top-level bundle's
/// raw bytes; all offsets returned are relative to it.
pub async fn get_data_item_offset(
    source: &dyn ByteRangeSource,
    bundle_id: Identifier,
    target_id: Identifier,
    max_nesting_depth: u32,
) -> Result<Option<DataItemOffset>, BundleError> {
    let mut visited = HashSet::new();
    visited.insert(bundle_id);
    let bundle_size = source.size().await?;
    search_bundle(source, 0, bundle_size, target_id, &mut visited, 0, max_nesting_depth).await
}

/// Reads and validates the leading item-count field and `(size, id)`
/// entry table starting at `bundle_offset`, without touching any item
/// payload.
async fn read_entry_table(
    source: &dyn ByteRangeSource,
    bundle_offset: u64,
    bundle_size: u64,
) -> Result<Vec<BundleEntry>, BundleError> {
    if bundle_size < ITEM_COUNT_LEN {
        return Err(BundleError::Malformed("bundle smaller than its item-count field"));
    }

    let count_bytes = source.read(bundle_offset, ITEM_COUNT_LEN).await?;
    let item_count = read_u256_le_as_u64(&count_bytes)?;

    let header_len = ITEM_COUNT_LEN + item_count * ENTRY_LEN;
    if header_len > bundle_size {
        return Err(BundleError::Malformed("item-count header exceeds bundle size"));
    }

    let mut entries = Vec::with_capacity(item_count as usize);
    if item_count > 0 {
        let raw = source.read(bundle_offset + ITEM_COUNT_LEN, item_count * ENTRY_LEN).await?;
        for chunk in raw.chunks_exact(ENTRY_LEN as usize) {
            let size = read_u256_le_as_u64(&chunk[0..32])?;
            let mut id = [0u8; 32];
            id.copy_from_slice(&chunk[32..64]);
            entries.push(BundleEntry { size, id });
        }
    }
    Ok(entries)
}

/// Lists the data items directly inside the bundle at `bundle_id`
/// (spec §4.9 "data-item indexing"), one level deep. Nested bundles
/// among the results are not descended into: each is itself indexed
/// once it reaches the front of the same work queue, keeping one
/// indexing pass bounded to one bundle's direct children.
pub async fn list_entries(source: &dyn ByteRangeSource) -> Result<Vec<DataItemEntry>, BundleError> {
    let bundle_size = source.size().await?;
    let raw_entries = read_entry_table(source, 0, bundle_size).await?;

    let header_len = ITEM_COUNT_LEN + raw_entries.len() as u64 * ENTRY_LEN;
    let mut payload_cursor = header_len;
    let mut out = Vec::with_capacity(raw_entries.len());
    for entry in &raw_entries {
        let header = read_item_header(source, payload_cursor, entry.size).await?;
        out.push(DataItemEntry {
            id: Identifier::from_bytes(entry.id),
            offset: payload_cursor + header.envelope_header_len,
            size: entry.size - header.envelope_header_len,
            is_nested_bundle: header.is_nested_bundle,
        });
        payload_cursor += entry.size;
    }
    Ok(out)
}

#[async_recursion::async_recursion]
async fn search_bundle(
    source: &dyn ByteRangeSource,
    bundle_offset: u64,
    bundle_size: u64,
    target_id: Identifier,
    visited: &mut HashSet<Identifier>,
    depth: u32,
    max_nesting_depth: u32,
) -> Result<Option<DataItemOffset>, BundleError> {
    if depth >= max_nesting_depth {
        tracing::debug!(depth, "bundle nesting depth bound reached, giving up on this branch");
        return Ok(None);
    }

    let entries = read_entry_table(source, bundle_offset, bundle_size).await?;
    let header_len = ITEM_COUNT_LEN + entries.len() as u64 * ENTRY_LEN;
    let mut payload_cursor = bundle_offset + header_len;

    for entry in &entries {
        let entry_id = Identifier::from_bytes(entry.id);
        let header = read_item_header(source, payload_cursor, entry.size).await?;

        if entry_id == target_id {
            return Ok(Some(DataItemOffset {
                offset: payload_cursor + header.envelope_header_len,
                size: entry.size - header.envelope_header_len,
            }));
        }

        if header.is_nested_bundle && !visited.contains(&entry_id) {
            visited.insert(entry_id);
            let nested_offset = payload_cursor + header.envelope_header_len;
            let nested_size = entry.size - header.envelope_header_len;
            let found = search_bundle(
                source,
                nested_offset,
                nested_size,
                target_id,
                visited,
                depth + 1,
                max_nesting_depth,
            )
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        payload_cursor += entry.size;
    }

    Ok(None)
}

struct ItemHeader {
    envelope_header_len: u64,
    is_nested_bundle: bool,
}

/// Reads just enough of a data item's header (starting at `item_offset`
/// within `source`) to learn its total envelope length and whether its
/// tags mark it as a nested bundle — without reading its payload.
async fn read_item_header(
    source: &dyn ByteRangeSource,
    item_offset: u64,
    item_size: u64,
) -> Result<ItemHeader, BundleError> {
    let sig_type_bytes = source.read(item_offset, 2).await?;
    let sig_type_code = u16::from_le_bytes([sig_type_bytes[0], sig_type_bytes[1]]);
    let sig_type = SignatureType::from_u16(sig_type_code)
        .ok_or(BundleError::UnknownSignatureType(sig_type_code))?;

    let mut cursor = item_offset + 2 + sig_type.sig_len() as u64 + sig_type.pub_len() as u64;

    let target_flag = source.read(cursor, 1).await?[0];
    cursor += 1;
    if target_flag != 0 {
        cursor += 32;
    }

    let anchor_flag = source.read(cursor, 1).await?[0];
    cursor += 1;
    if anchor_flag != 0 {
        cursor += 32;
    }

    let tag_counts = source.read(cursor, 16).await?;
    let _tag_count = u64::from_le_bytes(tag_counts[0..8].try_into().unwrap());
    let tag_bytes_len = u64::from_le_bytes(tag_counts[8..16].try_into().unwrap());
    cursor += 16;

    let envelope_header_len = cursor + tag_bytes_len - item_offset;
    if envelope_header_len > item_size {
        return Err(BundleError::Malformed("item header length exceeds the item's own size"));
    }

    let is_nested_bundle = if tag_bytes_len > 0 {
        let tag_bytes = source.read(cursor, tag_bytes_len).await?;
        tags::is_nested_bundle(&tags::decode_tags(&tag_bytes))
    } else {
        false
    };

    Ok(ItemHeader { envelope_header_len, is_nested_bundle })
}

fn read_u256_le_as_u64(bytes: &[u8]) -> Result<u64, BundleError> {
    if bytes.len() != 32 {
        return Err(BundleError::Malformed("expected a 32-byte u256 field"));
    }
    if bytes[8..].iter().any(|&b| b != 0) {
        return Err(BundleError::ValueTooLarge);
    }
    Ok(u64::from_le_bytes(bytes[0..8].try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_primitives::InMemoryByteRangeSource;

    fn u256_le(n: u64) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(&n.to_le_bytes());
        out
    }

    /// Builds a minimal single-item bundle whose item uses the Ed25519
    /// signature scheme (smallest sig/pub lengths, for compact fixtures),
    /// no target/anchor, and the given tags + data payload.
    fn build_bundle(items: &[(Identifier, Vec<(&str, &str)>, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&u256_le(items.len() as u64));

        let mut item_bytes = Vec::new();
        let mut entries = Vec::new();
        for (id, item_tags, data) in items {
            let mut item = Vec::new();
            item.extend_from_slice(&2u16.to_le_bytes()); // Ed25519
            item.extend(vec![0u8; SignatureType::Ed25519.sig_len()]);
            item.extend(vec![0u8; SignatureType::Ed25519.pub_len()]);
            item.push(0); // no target
            item.push(0); // no anchor

            let tag_blob = encode_tags(item_tags);
            item.extend_from_slice(&(item_tags.len() as u64).to_le_bytes());
            item.extend_from_slice(&(tag_blob.len() as u64).to_le_bytes());
            item.extend_from_slice(&tag_blob);
            item.extend_from_slice(data);

            entries.push((item.len() as u64, *id.as_bytes()));
            item_bytes.extend_from_slice(&item);
        }

        for (size, id) in &entries {
            out.extend_from_slice(&u256_le(*size));
            out.extend_from_slice(id);
        }
        out.extend_from_slice(&item_bytes);
        out
    }

    fn encode_zigzag(n: i64) -> Vec<u8> {
        let zigzag = ((n << 1) ^ (n >> 63)) as u64;
        let mut out = Vec::new();
        let mut value = zigzag;
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
        out
    }

    fn encode_tags(pairs: &[(&str, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        if !pairs.is_empty() {
            out.extend(encode_zigzag(pairs.len() as i64));
            for (name, value) in pairs {
                out.extend(encode_zigzag(name.len() as i64));
                out.extend_from_slice(name.as_bytes());
                out.extend(encode_zigzag(value.len() as i64));
                out.extend_from_slice(value.as_bytes());
            }
        }
        out.extend(encode_zigzag(0));
        out
    }

    fn id(byte: u8) -> Identifier {
        Identifier::from_bytes([byte; 32])
    }

    #[tokio::test]
    async fn finds_a_top_level_item() {
        let target = id(1);
        let bundle_bytes = build_bundle(&[(target, vec![], b"hello".to_vec())]);
        let source = InMemoryByteRangeSource::new(bundle_bytes);

        let found = get_data_item_offset(&source, id(0), target, 10).await.unwrap().unwrap();
        let item_bytes = source.read(found.offset, found.size).await.unwrap();
        assert_eq!(item_bytes, b"hello");
    }

    #[tokio::test]
    async fn returns_none_when_absent() {
        let bundle_bytes = build_bundle(&[(id(1), vec![], b"hello".to_vec())]);
        let source = InMemoryByteRangeSource::new(bundle_bytes);

        let found = get_data_item_offset(&source, id(0), id(2), 10).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn recurses_into_a_nested_bundle() {
        let target = id(3);
        let nested_bundle_bytes =
            build_bundle(&[(target, vec![], b"nested payload".to_vec())]);

        let outer_bundle_bytes = build_bundle(&[(
            id(2),
            vec![("Bundle-Format", "binary"), ("Bundle-Version", "2.0.0")],
            nested_bundle_bytes,
        )]);
        let source = InMemoryByteRangeSource::new(outer_bundle_bytes);

        let found = get_data_item_offset(&source, id(0), target, 10).await.unwrap().unwrap();
        let item_bytes = source.read(found.offset, found.size).await.unwrap();
        assert_eq!(item_bytes, b"nested payload");
    }

    #[tokio::test]
    async fn does_not_recurse_into_non_bundle_items() {
        let nested_looking_bytes = build_bundle(&[(id(3), vec![], b"nested payload".to_vec())]);
        let outer_bundle_bytes = build_bundle(&[(id(2), vec![], nested_looking_bytes)]);
        let source = InMemoryByteRangeSource::new(outer_bundle_bytes);

        let found = get_data_item_offset(&source, id(0), id(3), 10).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn cycle_between_two_bundles_terminates() {
        // Bundle A's only item claims to be a nested bundle but its
        // payload is just bundle A's own bytes reused: a self-cycle.
        // The target is absent, and recursion must still terminate.
        let a_id = id(0xA);
        let inner_placeholder = build_bundle(&[(id(9), vec![], b"x".to_vec())]);
        let bundle_a = build_bundle(&[(
            a_id,
            vec![("Bundle-Format", "binary"), ("Bundle-Version", "2.0.0")],
            inner_placeholder,
        )]);
        let source = InMemoryByteRangeSource::new(bundle_a);

        let result = get_data_item_offset(&source, a_id, id(0xFF), 10).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn list_entries_returns_each_top_level_item_with_its_offset() {
        let bundle_bytes = build_bundle(&[
            (id(1), vec![], b"hello".to_vec()),
            (id(2), vec![], b"world!".to_vec()),
        ]);
        let source = InMemoryByteRangeSource::new(bundle_bytes);

        let entries = list_entries(&source).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, id(1));
        assert!(!entries[0].is_nested_bundle);
        assert_eq!(source.read(entries[0].offset, entries[0].size).await.unwrap(), b"hello");
        assert_eq!(entries[1].id, id(2));
        assert_eq!(source.read(entries[1].offset, entries[1].size).await.unwrap(), b"world!");
    }

    #[tokio::test]
    async fn list_entries_flags_nested_bundles_without_descending() {
        let nested_bytes = build_bundle(&[(id(9), vec![], b"leaf".to_vec())]);
        let bundle_bytes = build_bundle(&[(
            id(3),
            vec![("Bundle-Format", "binary"), ("Bundle-Version", "2.0.0")],
            nested_bytes,
        )]);
        let source = InMemoryByteRangeSource::new(bundle_bytes);

        let entries = list_entries(&source).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id(3));
        assert!(entries[0].is_nested_bundle);
    }

    #[tokio::test]
    async fn nesting_depth_bound_stops_infinite_descent() {
        // Build a chain of depth+1 nested bundles, each pointing only to
        // the next, so a shallow max_nesting_depth must give up before
        // reaching the innermost target.
        let target = id(0x42);
        let mut current = build_bundle(&[(id(100), vec![], b"leaf".to_vec())]);
        for i in 0..5u8 {
            current = build_bundle(&[(
                id(i),
                vec![("Bundle-Format", "binary"), ("Bundle-Version", "2.0.0")],
                current,
            )]);
        }
        let _ = target;
        let source = InMemoryByteRangeSource::new(current);
        let result = get_data_item_offset(&source, id(0), id(100), 2).await.unwrap();
        assert!(result.is_none());
    }
}
