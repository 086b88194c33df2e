//! Composition root (spec §2 "Composition root / gateway core", §6): the
//! single place that owns every collaborator's concrete type and wires
//! the data-source chain, peer manager, root-tx index, filesystem cache,
//! and background workers into one [`GatewayCore`].
//!
//! Everything this crate constructs is generalized behind the seams the
//! rest of the workspace already exposes — [`gw_data_source::ContiguousDataIndex`],
//! [`gw_index::ChainOffsetIndex`], and the worker queues' `Pending*Queue`/
//! `RootTxIndexWriter` traits — so the collaborators spec §1 marks out of
//! scope (the chain importer, the SQLite schema) plug in without this
//! crate knowing anything about their storage.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gw_cdb::{CdbDirectoryIndex, CdbError};
use gw_chunks::{ChunkSourceConfig, PeerChunkSource, ReqwestChunkTransport};
use gw_circuit_breaker::CircuitBreakerConfig;
use gw_config::{ConfigError, GatewayConfig};
use gw_data_source::{
    BundleAwareDataSource, CachingDataSource, ChunkStreamDataSource, ContiguousData, ContiguousDataIndex,
    ContiguousDataSource, DataRequest, DataSourceError, DeletionPredicate, FsCache, FsCleanupWorker,
    SymlinkCleanupWorker,
};
use gw_filter::{CachePolicy, PolicyLoadError};
use gw_index::{CdbBackend, ChainOffsetIndex, CompositeRootTxIndex, SqliteBackend};
use gw_manifest::{ManifestError, ManifestResolver};
use gw_o11y::MetricsRegistry;
use gw_peers::{PeerManager, PeerManagerConfig};
use gw_primitives::{Identifier, RequestAttributes};
use gw_workers::{
    DataImporterProcessor, DataItemIndexerProcessor, FsCacheVerificationQueue, OffsetRepairProcessor,
    PendingImportQueue, PendingIndexQueue, PendingRepairQueue, PollingWorker, RootTxIndexWriter,
    VerificationProcessor, WorkerConfig,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A fully resolved transaction-chunk reconstruction source, erased
/// behind [`ContiguousDataIndex`] so [`GatewayCore`] never has to name
/// the collaborator's concrete chain-index type.
type ChainBackedDataSource = ChunkStreamDataSource<Arc<dyn ContiguousDataIndex>, PeerChunkSource<ReqwestChunkTransport>>;

/// How often the symlink and filesystem cleanup workers run a full
/// traversal when spawned without a caller-chosen interval. Not itself a
/// knob on [`GatewayConfig`]: the cleanup cadence only needs to be "a few
/// times a day", unlike the verification interval, which the spec names
/// explicitly (`BACKGROUND_DATA_VERIFICATION_INTERVAL_SECONDS`).
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read cache policy file {path}: {source}")]
    CachePolicyIo { path: String, source: std::io::Error },
    #[error(transparent)]
    CachePolicy(#[from] PolicyLoadError),
    #[error(transparent)]
    Cdb(#[from] CdbError),
}

/// Owns every collaborator's concrete type and exposes the two entry
/// points the out-of-scope HTTP layer needs (spec §1 Non-goals): resolve
/// an identifier to bytes, and resolve a manifest path to an identifier.
/// Also offers `spawn_*` helpers for the background workers described in
/// spec §2 "Worker queues", each taking the collaborator-owned queue or
/// writer it needs as a generic parameter.
pub struct GatewayCore {
    config: GatewayConfig,
    data_source: Arc<dyn ContiguousDataSource>,
    manifest_resolver: ManifestResolver<Arc<dyn ContiguousDataSource>>,
    root_tx_index: Arc<CompositeRootTxIndex>,
    peer_manager: Arc<PeerManager>,
    cache: FsCache,
    metrics: MetricsRegistry,
}

impl GatewayCore {
    /// Builds the full chain described in spec §4.5: chunk-backed
    /// transaction reads, wrapped in bundle-aware nested item
    /// resolution, wrapped in the filesystem cache.
    ///
    /// `chain_index` and `chain_offset_index` are the two collaborator
    /// extension points spec §6 calls out as owned outside this crate
    /// (the chain importer's offset table and the indexer's SQLite
    /// lookup, respectively). `chain_offset_index` is optional because a
    /// deployment with only a CDB64 index on disk (`config.cdb_path`)
    /// still has a usable, if incomplete, root-tx index.
    pub fn new(
        config: GatewayConfig,
        chain_index: Arc<dyn ContiguousDataIndex>,
        chain_offset_index: Option<Arc<dyn ChainOffsetIndex>>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let metrics = MetricsRegistry::new();

        let policies = load_cache_policies(&config)?;

        let http = reqwest::Client::new();
        let peer_manager_config = PeerManagerConfig {
            temperature_delta: config.weighted_peers_temperature_delta.max(0) as u32,
            request_window_count: config.gateway_peers_request_window_count,
            selection_cache_ttl: config.selection_cache_ttl(),
        };
        let peer_manager =
            Arc::new(PeerManager::new(peer_manager_config, http.clone(), config.peer_registry_url.clone()));

        let chunk_source_config = ChunkSourceConfig {
            max_hops: config.max_chunk_hops,
            retry_count: config.chunk_retry_count as u32,
            peer_selection_count: config.peer_selection_count,
            coalesce_ttl: Duration::from_secs(config.request_coalescing_ttl_seconds),
            category: "chunk".to_string(),
        };
        let transport = Arc::new(ReqwestChunkTransport::new(http));
        let chunk_source =
            Arc::new(PeerChunkSource::new(chunk_source_config, Arc::clone(&peer_manager), transport));

        let tx_source: Arc<ChainBackedDataSource> = Arc::new(ChunkStreamDataSource::new(
            Arc::new(chain_index),
            chunk_source,
            "data",
            config.max_chunk_hops,
        ));

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.root_tx_index_circuit_breaker_failure_threshold,
            success_threshold: config.root_tx_index_circuit_breaker_success_threshold,
            timeout: config.circuit_breaker_timeout(),
        };

        let mut root_tx_index_builder = CompositeRootTxIndex::builder();
        if let Some(cdb_path) = &config.cdb_path {
            let directory_index = CdbDirectoryIndex::open(PathBuf::from(cdb_path))?;
            root_tx_index_builder = root_tx_index_builder
                .with_backend_and_config(Box::new(CdbBackend::new(directory_index)), breaker_config);
        }
        if let Some(chain_offset_index) = chain_offset_index {
            root_tx_index_builder = root_tx_index_builder
                .with_backend_and_config(Box::new(SqliteBackend::new(chain_offset_index)), breaker_config);
        }
        let root_tx_index = Arc::new(root_tx_index_builder.build());

        let bundle_aware = BundleAwareDataSource::new(
            Arc::clone(&root_tx_index),
            tx_source,
            config.max_bundle_nesting_depth,
            config.max_chunk_hops,
        );

        let cache = FsCache::new(PathBuf::from(&config.cache_dir));
        let caching_source =
            CachingDataSource::new(FsCache::new(PathBuf::from(&config.cache_dir)), bundle_aware, policies);
        let data_source: Arc<dyn ContiguousDataSource> = Arc::new(caching_source);

        let manifest_resolver = ManifestResolver::new(Arc::new(Arc::clone(&data_source)));

        Ok(Self { config, data_source, manifest_resolver, root_tx_index, peer_manager, cache, metrics })
    }

    /// Resolves `identifier` (a transaction id or nested data-item id),
    /// optionally to just `range` of its bytes, the way spec §4.5
    /// describes the combined chunk/bundle/cache chain.
    pub async fn resolve(
        &self,
        identifier: Identifier,
        range: Option<Range<u64>>,
        request_attributes: RequestAttributes,
    ) -> Result<ContiguousData, DataSourceError> {
        let request = DataRequest { id: identifier, range, request_attributes };
        self.data_source.get_data(request, CancellationToken::new()).await
    }

    /// Resolves `path` against the manifest named `manifest_id` (spec §2
    /// "Manifest path resolver"), fetching the manifest itself through
    /// the same cached/verified chain as any other identifier.
    pub async fn resolve_manifest_path(
        &self,
        manifest_id: Identifier,
        path: &str,
    ) -> Result<Option<Identifier>, ManifestError> {
        self.manifest_resolver.resolve(manifest_id, path).await
    }

    pub fn peer_manager(&self) -> &Arc<PeerManager> {
        &self.peer_manager
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Spawns the background verification worker (spec §4.10), if
    /// enabled, re-checking cached entries on a continuous rotation
    /// paced by `background_data_verification_interval_seconds`.
    pub fn spawn_background_verification(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.background_data_verification_enabled {
            return None;
        }

        let queue = FsCacheVerificationQueue::new(&self.cache);
        let processor = VerificationProcessor::new(FsCache::new(self.cache.base()), self.metrics.clone());
        let worker_config = WorkerConfig {
            idle_poll_interval: Duration::from_secs(self.config.background_data_verification_interval_seconds),
            ..WorkerConfig::default()
        };
        let worker = Arc::new(PollingWorker::new("background-verification", queue, processor, worker_config));
        Some(tokio::spawn(worker.run(cancel)))
    }

    /// Spawns the companion dangling-symlink sweep (spec §4.10).
    pub fn spawn_symlink_cleanup(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let worker = SymlinkCleanupWorker::new(self.cache.base());
        tokio::spawn(async move { worker.run(DEFAULT_CLEANUP_INTERVAL, cancel).await })
    }

    /// Spawns a retention-driven cleanup sweep of the filesystem cache
    /// (spec §4.10), deleting whatever `predicate` rejects.
    pub fn spawn_fs_cleanup<P: DeletionPredicate + Send + Sync + 'static>(
        &self,
        predicate: P,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let worker = Arc::new(FsCleanupWorker::new(
            self.cache.base(),
            predicate,
            self.config.fs_cleanup_worker_batch_size,
            Duration::from_millis(self.config.fs_cleanup_worker_batch_pause_ms),
            self.metrics.clone(),
            "by-hash",
        ));
        tokio::spawn(async move { worker.run(DEFAULT_CLEANUP_INTERVAL, cancel).await })
    }

    /// Spawns the data importer worker (spec §2), pushing every id
    /// `queue` reports through the full data-source chain once so it
    /// lands in the filesystem cache ahead of any client request.
    pub fn spawn_data_importer<Q: PendingImportQueue + 'static>(
        &self,
        queue: Q,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let processor = DataImporterProcessor::new(Arc::clone(&self.data_source));
        let worker = Arc::new(PollingWorker::new("data-importer", queue, processor, WorkerConfig::default()));
        tokio::spawn(worker.run(cancel))
    }

    /// Spawns the data-item indexer worker (spec §4.9), parsing each
    /// bundle `queue` reports and writing one root-tx record per direct
    /// item through `writer`.
    pub fn spawn_data_item_indexer<Q: PendingIndexQueue + 'static, W: RootTxIndexWriter + 'static>(
        &self,
        queue: Q,
        writer: W,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let processor = DataItemIndexerProcessor::new(Arc::new(Arc::clone(&self.data_source)), writer);
        let worker = Arc::new(PollingWorker::new("data-item-indexer", queue, processor, WorkerConfig::default()));
        tokio::spawn(worker.run(cancel))
    }

    /// Spawns the offset repair worker (spec §4.6), completing `simple`
    /// root-tx records that `queue` reports by walking the bundle's
    /// envelope and writing the result back through `writer`.
    pub fn spawn_offset_repair<Q: PendingRepairQueue + 'static, W: RootTxIndexWriter + 'static>(
        &self,
        queue: Q,
        writer: W,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let processor = OffsetRepairProcessor::new(
            Arc::new(Arc::clone(&self.data_source)),
            writer,
            self.config.max_bundle_nesting_depth,
        );
        let worker = Arc::new(PollingWorker::new("offset-repair", queue, processor, WorkerConfig::default()));
        tokio::spawn(worker.run(cancel))
    }

    /// The composite root-tx index backing the bundle-aware data
    /// source, exposed so a caller that owns a [`RootTxIndexWriter`] can
    /// observe what [`Self::spawn_offset_repair`] and
    /// [`Self::spawn_data_item_indexer`] are completing.
    pub fn root_tx_index(&self) -> &Arc<CompositeRootTxIndex> {
        &self.root_tx_index
    }
}

fn load_cache_policies(config: &GatewayConfig) -> Result<Vec<CachePolicy>, GatewayError> {
    let Some(path) = &config.cache_policy_file else {
        return Ok(Vec::new());
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|source| GatewayError::CachePolicyIo { path: path.clone(), source })?;
    Ok(gw_filter::load_policies(&contents)?)
}
