use async_trait::async_trait;
use gw_primitives::Peer;
use serde::Deserialize;
use thiserror::Error;

use crate::ChunkFetchParams;

#[derive(Debug, Deserialize)]
pub struct RawChunkResponse {
    #[serde(rename = "chunk")]
    pub chunk_b64: String,
    #[serde(rename = "data_path")]
    pub data_path_b64: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("malformed response body: {0}")]
    Malformed(String),
}

/// Abstracts the actual byte transport so the retry/verification logic
/// in [`crate::PeerChunkSource`] is testable without a network, and so
/// a future non-HTTP transport (e.g. direct on-chain read) can be
/// substituted without touching the retry loop (spec §2's "pluggable
/// for HTTP-range and on-chain sources").
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn fetch(&self, peer: &Peer, params: &ChunkFetchParams) -> Result<RawChunkResponse, TransportError>;
}

/// Production transport: issues a GET to `{peer.url}/chunk/{absoluteOffset}`.
pub struct ReqwestChunkTransport {
    client: reqwest::Client,
}

impl ReqwestChunkTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChunkTransport for ReqwestChunkTransport {
    async fn fetch(&self, peer: &Peer, params: &ChunkFetchParams) -> Result<RawChunkResponse, TransportError> {
        let url = format!("{}/chunk/{}", peer.url.trim_end_matches('/'), params.absolute_offset);
        let response = self.client.get(&url).send().await.map_err(|e| TransportError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!("status {}", response.status())));
        }

        response
            .json::<RawChunkResponse>()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}
