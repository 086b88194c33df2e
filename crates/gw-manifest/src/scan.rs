//! A minimal, streaming JSON scanner specialized to Arweave path
//! manifests: it reads just enough of the document to answer "what does
//! `paths["<segment>"]` resolve to", skipping every sibling value byte
//! by byte rather than materializing them (spec §2 "Manifest path
//! resolver... streams a JSON manifest").

use std::collections::HashMap;

use crate::cursor::ByteCursor;
use crate::{ManifestEntry, ManifestError};

/// `index`/`fallback` point either directly at a data item (`{"id": "..."}`)
/// or at a name inside `paths` (`{"path": "index.html"}`).
enum IndexRef {
    Id(String),
    Path(String),
}

/// Scans a path-manifest document for the entry named `path` (Arweave
/// path-manifest resolution, in order of precedence: an exact `paths`
/// match; an empty `path` falling back to `index`; anything unresolved
/// falling back to `fallback`).
///
/// `index` and `fallback` are read as they're encountered — in the
/// conventional manifest layout they appear before `paths` in the
/// object, so their pointer targets (when they reference a `paths`
/// name rather than an id directly) are known by the time `paths`
/// itself is scanned, letting that single pass resolve them too.
pub async fn resolve_path(cursor: &mut ByteCursor, path: &str) -> Result<Option<ManifestEntry>, ManifestError> {
    let mut index_ref: Option<IndexRef> = None;
    let mut fallback_ref: Option<IndexRef> = None;
    let mut paths_matches: HashMap<String, ManifestEntry> = HashMap::new();

    expect_byte(cursor, b'{').await?;
    loop {
        cursor.skip_whitespace().await?;
        if peek_is(cursor, b'}').await? {
            consume(cursor).await?;
            break;
        }

        let key = read_json_string(cursor).await?;
        cursor.skip_whitespace().await?;
        expect_byte(cursor, b':').await?;
        cursor.skip_whitespace().await?;

        match key.as_str() {
            "index" => index_ref = parse_index_ref(cursor).await?,
            "fallback" => fallback_ref = parse_index_ref(cursor).await?,
            "paths" => {
                let mut wanted = vec![("__target__".to_string(), path.to_string())];
                if let Some(IndexRef::Path(name)) = &index_ref {
                    wanted.push(("__index__".to_string(), name.clone()));
                }
                if let Some(IndexRef::Path(name)) = &fallback_ref {
                    wanted.push(("__fallback__".to_string(), name.clone()));
                }
                paths_matches = scan_paths_object(cursor, &wanted).await?;
            }
            _ => skip_value(cursor).await?,
        }

        cursor.skip_whitespace().await?;
        match cursor.next().await? {
            Some(b',') => continue,
            Some(b'}') => break,
            Some(other) => {
                return Err(ManifestError::Malformed(format!("unexpected byte 0x{other:02x} after manifest field")))
            }
            None => return Err(ManifestError::Malformed("unexpected end of manifest".to_string())),
        }
    }

    if let Some(entry) = paths_matches.remove("__target__") {
        return Ok(Some(entry));
    }

    if path.is_empty() {
        match index_ref {
            Some(IndexRef::Id(id)) => return Ok(Some(ManifestEntry { id })),
            Some(IndexRef::Path(_)) => {
                if let Some(entry) = paths_matches.remove("__index__") {
                    return Ok(Some(entry));
                }
            }
            None => {}
        }
    }

    match fallback_ref {
        Some(IndexRef::Id(id)) => Ok(Some(ManifestEntry { id })),
        Some(IndexRef::Path(_)) => Ok(paths_matches.remove("__fallback__")),
        None => Ok(None),
    }
}

/// Scans the `paths` object once, collecting the entry for every
/// `(label, path-name)` pair in `wanted` whose name is seen as a key.
/// Every other entry's value is skipped without allocating more than
/// its key string.
async fn scan_paths_object(
    cursor: &mut ByteCursor,
    wanted: &[(String, String)],
) -> Result<HashMap<String, ManifestEntry>, ManifestError> {
    expect_byte(cursor, b'{').await?;
    let mut found = HashMap::new();

    loop {
        cursor.skip_whitespace().await?;
        if peek_is(cursor, b'}').await? {
            consume(cursor).await?;
            break;
        }

        let key = read_json_string(cursor).await?;
        cursor.skip_whitespace().await?;
        expect_byte(cursor, b':').await?;
        cursor.skip_whitespace().await?;

        let labels: Vec<&str> =
            wanted.iter().filter(|(_, name)| *name == key).map(|(label, _)| label.as_str()).collect();

        if labels.is_empty() {
            skip_value(cursor).await?;
        } else {
            let entry = parse_path_entry(cursor).await?;
            for label in labels {
                found.insert(label.to_string(), entry.clone());
            }
        }

        cursor.skip_whitespace().await?;
        match cursor.next().await? {
            Some(b',') => continue,
            Some(b'}') => break,
            Some(other) => return Err(ManifestError::Malformed(format!("unexpected byte 0x{other:02x} in paths"))),
            None => return Err(ManifestError::Malformed("unexpected end of paths object".to_string())),
        }
    }

    Ok(found)
}

/// Parses a `paths` entry object: `{"id": "<43-char b64url>", ...}`.
async fn parse_path_entry(cursor: &mut ByteCursor) -> Result<ManifestEntry, ManifestError> {
    expect_byte(cursor, b'{').await?;
    let mut id = None;

    loop {
        cursor.skip_whitespace().await?;
        if peek_is(cursor, b'}').await? {
            consume(cursor).await?;
            break;
        }

        let key = read_json_string(cursor).await?;
        cursor.skip_whitespace().await?;
        expect_byte(cursor, b':').await?;
        cursor.skip_whitespace().await?;

        if key == "id" {
            id = Some(read_json_string(cursor).await?);
        } else {
            skip_value(cursor).await?;
        }

        cursor.skip_whitespace().await?;
        match cursor.next().await? {
            Some(b',') => continue,
            Some(b'}') => break,
            Some(other) => {
                return Err(ManifestError::Malformed(format!("unexpected byte 0x{other:02x} in path entry")))
            }
            None => return Err(ManifestError::Malformed("unexpected end of path entry".to_string())),
        }
    }

    let id = id.ok_or_else(|| ManifestError::Malformed("path entry missing \"id\"".to_string()))?;
    Ok(ManifestEntry { id })
}

/// `{"id": "..."}` or `{"path": "..."}`.
async fn parse_index_ref(cursor: &mut ByteCursor) -> Result<Option<IndexRef>, ManifestError> {
    expect_byte(cursor, b'{').await?;
    let mut id = None;
    let mut path = None;

    loop {
        cursor.skip_whitespace().await?;
        if peek_is(cursor, b'}').await? {
            consume(cursor).await?;
            break;
        }

        let key = read_json_string(cursor).await?;
        cursor.skip_whitespace().await?;
        expect_byte(cursor, b':').await?;
        cursor.skip_whitespace().await?;

        match key.as_str() {
            "id" => id = Some(read_json_string(cursor).await?),
            "path" => path = Some(read_json_string(cursor).await?),
            _ => skip_value(cursor).await?,
        }

        cursor.skip_whitespace().await?;
        match cursor.next().await? {
            Some(b',') => continue,
            Some(b'}') => break,
            Some(other) => {
                return Err(ManifestError::Malformed(format!("unexpected byte 0x{other:02x} in index/fallback")))
            }
            None => return Err(ManifestError::Malformed("unexpected end of index/fallback".to_string())),
        }
    }

    Ok(id.map(IndexRef::Id).or(path.map(IndexRef::Path)))
}

async fn peek_is(cursor: &mut ByteCursor, expected: u8) -> Result<bool, ManifestError> {
    Ok(cursor.peek().await.map_err(ManifestError::Io)? == Some(expected))
}

async fn consume(cursor: &mut ByteCursor) -> Result<(), ManifestError> {
    cursor.next().await.map_err(ManifestError::Io)?;
    Ok(())
}

async fn expect_byte(cursor: &mut ByteCursor, expected: u8) -> Result<(), ManifestError> {
    cursor.skip_whitespace().await.map_err(ManifestError::Io)?;
    match cursor.next().await.map_err(ManifestError::Io)? {
        Some(b) if b == expected => Ok(()),
        Some(other) => {
            Err(ManifestError::Malformed(format!("expected '{}', found byte 0x{:02x}", expected as char, other)))
        }
        None => Err(ManifestError::Malformed(format!("expected '{}', found end of input", expected as char))),
    }
}

/// Reads a JSON string literal, handling the common escape sequences.
/// The opening quote must be the next byte.
async fn read_json_string(cursor: &mut ByteCursor) -> Result<String, ManifestError> {
    expect_byte(cursor, b'"').await?;
    let mut out = String::new();

    loop {
        let b = cursor.next().await.map_err(ManifestError::Io)?.ok_or_else(|| {
            ManifestError::Malformed("unexpected end of input inside string literal".to_string())
        })?;

        match b {
            b'"' => return Ok(out),
            b'\\' => {
                let escaped = cursor.next().await.map_err(ManifestError::Io)?.ok_or_else(|| {
                    ManifestError::Malformed("unexpected end of input after escape".to_string())
                })?;
                match escaped {
                    b'"' => out.push('"'),
                    b'\\' => out.push('\\'),
                    b'/' => out.push('/'),
                    b'b' => out.push('\u{8}'),
                    b'f' => out.push('\u{c}'),
                    b'n' => out.push('\n'),
                    b'r' => out.push('\r'),
                    b't' => out.push('\t'),
                    b'u' => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let hex = cursor.next().await.map_err(ManifestError::Io)?.ok_or_else(|| {
                                ManifestError::Malformed("truncated unicode escape".to_string())
                            })?;
                            code = code * 16
                                + (hex as char)
                                    .to_digit(16)
                                    .ok_or_else(|| ManifestError::Malformed("invalid unicode escape".to_string()))?;
                        }
                        out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                    }
                    other => {
                        return Err(ManifestError::Malformed(format!("invalid escape byte 0x{other:02x}")));
                    }
                }
            }
            other => out.push(other as char),
        }
    }
}

/// Skips a JSON value of any kind without retaining its contents,
/// beyond the bounded work of tracking nesting depth.
async fn skip_value(cursor: &mut ByteCursor) -> Result<(), ManifestError> {
    cursor.skip_whitespace().await.map_err(ManifestError::Io)?;
    match cursor.peek().await.map_err(ManifestError::Io)? {
        Some(b'"') => {
            read_json_string(cursor).await?;
        }
        Some(b'{') => skip_balanced(cursor, b'{', b'}').await?,
        Some(b'[') => skip_balanced(cursor, b'[', b']').await?,
        Some(b't') => skip_literal(cursor, "true").await?,
        Some(b'f') => skip_literal(cursor, "false").await?,
        Some(b'n') => skip_literal(cursor, "null").await?,
        Some(_) => skip_number(cursor).await?,
        None => return Err(ManifestError::Malformed("unexpected end of input skipping a value".to_string())),
    }
    Ok(())
}

async fn skip_literal(cursor: &mut ByteCursor, literal: &str) -> Result<(), ManifestError> {
    for expected in literal.bytes() {
        expect_byte(cursor, expected).await?;
    }
    Ok(())
}

async fn skip_number(cursor: &mut ByteCursor) -> Result<(), ManifestError> {
    loop {
        match cursor.peek().await.map_err(ManifestError::Io)? {
            Some(b) if b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E') => {
                cursor.next().await.map_err(ManifestError::Io)?;
            }
            _ => return Ok(()),
        }
    }
}

/// Skips a brace- or bracket-delimited value, respecting nested strings
/// (so a `}` inside a string literal isn't mistaken for the closer) and
/// nested containers of the same kind.
async fn skip_balanced(cursor: &mut ByteCursor, open: u8, close: u8) -> Result<(), ManifestError> {
    expect_byte(cursor, open).await?;
    let mut depth = 1u32;

    while depth > 0 {
        cursor.skip_whitespace().await.map_err(ManifestError::Io)?;
        match cursor.peek().await.map_err(ManifestError::Io)? {
            Some(b'"') => {
                read_json_string(cursor).await?;
            }
            Some(b) if b == open => {
                cursor.next().await.map_err(ManifestError::Io)?;
                depth += 1;
            }
            Some(b) if b == close => {
                cursor.next().await.map_err(ManifestError::Io)?;
                depth -= 1;
            }
            Some(_) => {
                cursor.next().await.map_err(ManifestError::Io)?;
            }
            None => return Err(ManifestError::Malformed("unexpected end of input inside a value".to_string())),
        }
    }
    Ok(())
}
