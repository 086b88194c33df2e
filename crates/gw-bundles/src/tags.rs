/// Decodes the Avro-encoded `(name, value)` tag list embedded in a data
/// item header (spec §4.7). Tags are an Avro array of byte-string pairs:
/// a sequence of blocks, each a zigzag-varint item count (negative counts
/// are followed by a byte-size varint we skip) followed by that many
/// `(name: bytes, value: bytes)` pairs, terminated by a zero-count block.
///
/// Returns raw bytes rather than decoded strings: callers that only need
/// to check for a couple of well-known tag names (e.g. `Bundle-Format`)
/// decode just those with `String::from_utf8_lossy`.
pub fn decode_tags(buf: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut pos = 0usize;
    let mut tags = Vec::new();

    loop {
        let Some(count) = read_zigzag_varint(buf, &mut pos) else { break };
        if count == 0 {
            break;
        }
        let item_count = if count < 0 {
            // Negative count: followed by the block's byte size, which we
            // don't need since we walk item-by-item anyway.
            if read_zigzag_varint(buf, &mut pos).is_none() {
                break;
            }
            (-count) as usize
        } else {
            count as usize
        };

        for _ in 0..item_count {
            let Some(name) = read_avro_bytes(buf, &mut pos) else { return tags };
            let Some(value) = read_avro_bytes(buf, &mut pos) else { return tags };
            tags.push((name, value));
        }
    }

    tags
}

/// Convenience check used by bundle recursion: does this tag set mark
/// its item as a nested ANS-104 bundle (spec §4.7 step 2)?
pub fn is_nested_bundle(tags: &[(Vec<u8>, Vec<u8>)]) -> bool {
    let mut format = None;
    let mut version = None;
    for (name, value) in tags {
        match String::from_utf8_lossy(name).as_ref() {
            "Bundle-Format" => format = Some(String::from_utf8_lossy(value).into_owned()),
            "Bundle-Version" => version = Some(String::from_utf8_lossy(value).into_owned()),
            _ => {}
        }
    }
    format.as_deref() == Some("binary") && version.as_deref() == Some("2.0.0")
}

fn read_zigzag_varint(buf: &[u8], pos: &mut usize) -> Option<i64> {
    let mut shift = 0u32;
    let mut result: u64 = 0;
    loop {
        let byte = *buf.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    Some(((result >> 1) as i64) ^ -((result & 1) as i64))
}

fn read_avro_bytes(buf: &[u8], pos: &mut usize) -> Option<Vec<u8>> {
    let len = read_zigzag_varint(buf, pos)?;
    if len < 0 {
        return None;
    }
    let len = len as usize;
    let slice = buf.get(*pos..*pos + len)?;
    *pos += len;
    Some(slice.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
        let mut out = encode_zigzag(bytes.len() as i64);
        out.extend_from_slice(bytes);
        out
    }

    fn encode_tags(pairs: &[(&str, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        if !pairs.is_empty() {
            out.extend(encode_zigzag(pairs.len() as i64));
            for (name, value) in pairs {
                out.extend(encode_bytes(name.as_bytes()));
                out.extend(encode_bytes(value.as_bytes()));
            }
        }
        out.extend(encode_zigzag(0));
        out
    }

    #[test]
    fn decodes_empty_tag_list() {
        let buf = encode_tags(&[]);
        assert!(decode_tags(&buf).is_empty());
    }

    #[test]
    fn decodes_a_single_block_of_tags() {
        let buf = encode_tags(&[("App-Name", "ArDrive"), ("Content-Type", "text/plain")]);
        let tags = decode_tags(&buf);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].0, b"App-Name");
        assert_eq!(tags[0].1, b"ArDrive");
    }

    #[test]
    fn detects_nested_bundle_marker_tags() {
        let buf = encode_tags(&[("Bundle-Format", "binary"), ("Bundle-Version", "2.0.0")]);
        let tags = decode_tags(&buf);
        assert!(is_nested_bundle(&tags));
    }

    #[test]
    fn non_bundle_tags_are_not_flagged_as_nested() {
        let buf = encode_tags(&[("App-Name", "ArDrive")]);
        let tags = decode_tags(&buf);
        assert!(!is_nested_bundle(&tags));
    }

    #[test]
    fn truncated_buffer_stops_without_panicking() {
        let mut buf = encode_tags(&[("App-Name", "ArDrive")]);
        buf.truncate(buf.len() - 3);
        let tags = decode_tags(&buf);
        assert!(tags.len() <= 1);
    }
}
