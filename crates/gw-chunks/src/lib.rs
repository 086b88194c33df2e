//! Chunk source chain (spec §4.4): fetches a single verified chunk from
//! a weighted peer sample, with hop checking, retry, and per-request
//! coalescing.
//!
//! Grounded on `chain/chunks/src/shards_manager_actor.rs`'s
//! `request_chunk_single` retry-with-backoff structure, generalized from
//! "request parts from validators" to "fetch one chunk from a weighted
//! peer sample with retry."

mod transport;

pub use transport::{ChunkTransport, RawChunkResponse, ReqwestChunkTransport, TransportError};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use gw_coalescer::{CoalesceError, Coalescer};
use gw_merkle::MerkleError;
use gw_peers::{PeerCallMetrics, PeerManager};
use gw_primitives::{Chunk, ChunkSource, Classify, ErrorKind, HopGuard, HopsExceeded, Identifier, RequestAttributes};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Hop ceiling specific to chunk fetches (spec §4.4); distinct from the
/// general [`gw_primitives::MAX_HOPS`] used by data-source recursion.
pub const DEFAULT_MAX_CHUNK_HOPS: u32 = 1;
/// Number of retry passes over a fresh peer sample before giving up.
pub const DEFAULT_RETRY_COUNT: u32 = 3;
/// Peers drawn per retry pass.
pub const DEFAULT_PEER_SELECTION_COUNT: usize = 3;
/// Coalescing window: concurrent callers for the same fingerprint within
/// this window share one underlying fetch (spec §4.4).
pub const DEFAULT_COALESCE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ChunkFetchParams {
    pub tx_size: u64,
    pub data_root: Identifier,
    pub absolute_offset: u64,
    pub relative_offset: u64,
    pub request_attributes: RequestAttributes,
}

impl ChunkFetchParams {
    fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.data_root, self.absolute_offset, self.tx_size, self.relative_offset
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ChunkSourceError {
    #[error(transparent)]
    HopsExceeded(#[from] HopsExceeded),
    #[error("request declined remote forwarding and no local compute path exists")]
    SkippedForCompute,
    #[error("all peers failed across every retry pass")]
    AllPeersFailed,
    #[error("request was cancelled")]
    Aborted,
}

impl Classify for ChunkSourceError {
    fn kind(&self) -> ErrorKind {
        match self {
            ChunkSourceError::HopsExceeded(_) => ErrorKind::HopsExceeded,
            ChunkSourceError::SkippedForCompute => ErrorKind::InvalidInput,
            ChunkSourceError::AllPeersFailed => ErrorKind::NetworkError,
            ChunkSourceError::Aborted => ErrorKind::Cancelled,
        }
    }
}

#[async_trait]
pub trait ChunkByAnySource: Send + Sync {
    async fn get_chunk_by_any(
        &self,
        params: ChunkFetchParams,
        cancel: CancellationToken,
    ) -> Result<Chunk, ChunkSourceError>;
}

#[derive(Debug, Clone)]
pub struct ChunkSourceConfig {
    pub max_hops: u32,
    pub retry_count: u32,
    pub peer_selection_count: usize,
    pub coalesce_ttl: Duration,
    pub category: String,
}

impl Default for ChunkSourceConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_CHUNK_HOPS,
            retry_count: DEFAULT_RETRY_COUNT,
            peer_selection_count: DEFAULT_PEER_SELECTION_COUNT,
            coalesce_ttl: DEFAULT_COALESCE_TTL,
            category: "chunk".to_string(),
        }
    }
}

/// Production [`ChunkByAnySource`]: samples peers from a [`PeerManager`],
/// fetches over `T`, verifies via `gw-merkle`, and reports outcomes back
/// to the peer manager for weight adjustment.
pub struct PeerChunkSource<T: ChunkTransport> {
    config: ChunkSourceConfig,
    peer_manager: Arc<PeerManager>,
    transport: Arc<T>,
    coalescer: Coalescer<Chunk, ChunkSourceError>,
    hop_guard: HopGuard,
}

impl<T: ChunkTransport + 'static> PeerChunkSource<T> {
    pub fn new(config: ChunkSourceConfig, peer_manager: Arc<PeerManager>, transport: Arc<T>) -> Self {
        let hop_guard = HopGuard::new(config.max_hops);
        Self { config, peer_manager, transport, coalescer: Coalescer::new(), hop_guard }
    }
}

#[async_trait]
impl<T: ChunkTransport + 'static> ChunkByAnySource for PeerChunkSource<T> {
    async fn get_chunk_by_any(
        &self,
        params: ChunkFetchParams,
        cancel: CancellationToken,
    ) -> Result<Chunk, ChunkSourceError> {
        self.hop_guard.check(&params.request_attributes)?;
        if params.request_attributes.skip_remote_forwarding {
            return Err(ChunkSourceError::SkippedForCompute);
        }

        let fingerprint = params.fingerprint();
        let peer_manager = Arc::clone(&self.peer_manager);
        let transport = Arc::clone(&self.transport);
        let config = self.config.clone();

        let coalesced = self.coalescer.get_or_spawn(fingerprint, self.config.coalesce_ttl, move |inner_cancel| {
            fetch_with_retry(peer_manager, transport, config, params, inner_cancel)
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChunkSourceError::Aborted),
            result = coalesced.wait() => match result {
                Ok(chunk) => Ok(chunk),
                Err(CoalesceError::Cancelled) => Err(ChunkSourceError::Aborted),
                Err(CoalesceError::Inner(e)) => Err(e),
            },
        }
    }
}

async fn fetch_with_retry<T: ChunkTransport>(
    peer_manager: Arc<PeerManager>,
    transport: Arc<T>,
    config: ChunkSourceConfig,
    params: ChunkFetchParams,
    cancel: CancellationToken,
) -> Result<Chunk, ChunkSourceError> {
    for _attempt in 0..config.retry_count {
        if cancel.is_cancelled() {
            return Err(ChunkSourceError::Aborted);
        }

        let Ok(peers) = peer_manager.select_peers(&config.category, config.peer_selection_count) else {
            continue;
        };

        for peer in peers {
            if cancel.is_cancelled() {
                return Err(ChunkSourceError::Aborted);
            }

            let started = Instant::now();
            let outcome = transport
                .fetch(&peer, &params)
                .await
                .map_err(|e| e.to_string())
                .and_then(|raw| decode_chunk(&raw, &params, &peer).map_err(|e| e.to_string()))
                .and_then(|chunk| match gw_merkle::verify_chunk(&chunk) {
                    Ok(_range) => Ok(chunk),
                    Err(e) => Err(merkle_error_message(e)),
                });

            match outcome {
                Ok(chunk) => {
                    let elapsed = started.elapsed().as_secs_f64().max(0.001);
                    peer_manager.report_success(
                        &config.category,
                        &peer,
                        PeerCallMetrics {
                            latency_ms: elapsed * 1000.0,
                            throughput_bytes_per_sec: chunk.len() as f64 / elapsed,
                        },
                    );
                    return Ok(chunk);
                }
                Err(reason) => {
                    tracing::debug!(peer = %peer.url, %reason, "chunk fetch attempt failed");
                    peer_manager.report_failure(&config.category, &peer);
                }
            }
        }
    }

    Err(ChunkSourceError::AllPeersFailed)
}

fn merkle_error_message(e: MerkleError) -> String {
    format!("verification failed: {e}")
}

fn decode_chunk(
    raw: &RawChunkResponse,
    params: &ChunkFetchParams,
    peer: &gw_primitives::Peer,
) -> Result<Chunk, String> {
    let data = URL_SAFE_NO_PAD.decode(&raw.chunk_b64).map_err(|e| format!("bad chunk encoding: {e}"))?;
    let data_path = URL_SAFE_NO_PAD
        .decode(&raw.data_path_b64)
        .map_err(|e| format!("bad data_path encoding: {e}"))?;

    let mut hasher = Sha256::new();
    hasher.update(&data);
    let hash: [u8; 32] = hasher.finalize().into();

    Ok(Chunk {
        data,
        data_path,
        data_root: params.data_root,
        tx_size: params.tx_size,
        relative_offset: params.relative_offset,
        hash,
        source: Some(ChunkSource { label: "peer", host: peer.url.clone() }),
    })
}
