//! Streaming JSON manifest path resolver (spec §2 "Manifest path
//! resolver", §4.5's "manifest resolver (optional)" control-flow step).
//!
//! Resolves a request path segment against an Arweave path manifest —
//! `{"manifest":"arweave/paths", "index": {...}, "paths": {"<segment>":
//! {"id": "..."}, ...}, "fallback": {...}}` — by scanning the manifest's
//! byte stream directly rather than materializing it into a generic
//! JSON value first, per the "streams" wording in the spec's component
//! description. The manifest itself is fetched through a
//! [`gw_data_source::ContiguousDataSource`], same as any other
//! identifier, so it benefits from the same cache/verification
//! pipeline as the files it indexes.

mod cursor;
mod scan;

use std::sync::Arc;

use gw_data_source::{ContiguousDataSource, DataRequest, DataSourceError};
use gw_primitives::{Identifier, RequestAttributes};
use thiserror::Error;

pub use cursor::ByteCursor;

/// A resolved manifest entry: just the target identifier. Real path
/// manifests carry no other per-path fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub id: String,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest data source error: {0}")]
    Source(#[from] DataSourceError),
    #[error("malformed manifest: {0}")]
    Malformed(String),
    #[error("manifest I/O error: {0}")]
    Io(std::io::Error),
    #[error("manifest entry \"{0}\" is not a valid identifier: {1}")]
    InvalidIdentifier(String, gw_primitives::identifier::IdentifierError),
}

/// Resolves `path` against the manifest named `manifest_id`, fetched
/// through `source`. Returns `None` when neither an exact `paths`
/// match, an empty-path `index` fallback, nor a `fallback` entry apply.
pub struct ManifestResolver<S> {
    source: Arc<S>,
}

impl<S: ContiguousDataSource> ManifestResolver<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    pub async fn resolve(
        &self,
        manifest_id: Identifier,
        path: &str,
    ) -> Result<Option<Identifier>, ManifestError> {
        let request = DataRequest { id: manifest_id, range: None, request_attributes: RequestAttributes::default() };
        let data = self.source.get_data(request, tokio_util::sync::CancellationToken::new()).await?;

        let mut cursor = ByteCursor::new(data.stream);
        let entry = scan::resolve_path(&mut cursor, path).await?;

        match entry {
            Some(entry) => {
                let id = entry
                    .id
                    .parse::<Identifier>()
                    .map_err(|e| ManifestError::InvalidIdentifier(entry.id.clone(), e))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }
}
