//! Data importer worker (spec §2 "Worker queues"): pulls identifiers the
//! chain importer (out of scope, spec §1) has flagged as newly seen and
//! pushes them through the full [`ContiguousDataSource`] chain once, so
//! a cache-eligible item lands in the filesystem cache without waiting
//! for a client request to trigger the fetch.
//!
//! The queue of pending ids is collaborator-owned (backed by the
//! SQLite schema, spec §1 Non-goals); [`PendingImportQueue`] is the seam
//! this worker consumes it through.

use async_trait::async_trait;
use futures::TryStreamExt;
use gw_data_source::{ContiguousDataSource, DataRequest, DataSourceError};
use gw_primitives::{Identifier, RequestAttributes};

use crate::scaffold::{ItemProcessor, PollingQueue, WorkerError};

/// One identifier pending import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingImport {
    pub id: Identifier,
}

/// Collaborator-backed source of pending import work (spec §1: the
/// chain importer itself is glue; this worker only consumes the queue
/// it produces).
#[async_trait]
pub trait PendingImportQueue: Send + Sync {
    async fn next_pending(&self, max_items: usize) -> Result<Vec<PendingImport>, WorkerError>;
}

#[async_trait]
impl<T: PendingImportQueue> PollingQueue for T {
    type Item = PendingImport;

    async fn poll(&self, max_items: usize) -> Result<Vec<PendingImport>, WorkerError> {
        self.next_pending(max_items).await
    }
}

/// Fetches each pending id through `source` and drains its stream,
/// letting the source's own caching layer (spec §4.10) decide whether
/// the bytes are retained. The worker itself never writes to the
/// filesystem cache directly — that stays the single responsibility of
/// `gw_data_source::CachingDataSource`.
pub struct DataImporterProcessor<S> {
    source: S,
}

impl<S: ContiguousDataSource> DataImporterProcessor<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: ContiguousDataSource> ItemProcessor for DataImporterProcessor<S> {
    type Item = PendingImport;

    async fn process(&self, item: PendingImport) -> Result<(), WorkerError> {
        let request = DataRequest { id: item.id, range: None, request_attributes: RequestAttributes::default() };
        let data = self
            .source
            .get_data(request, tokio_util::sync::CancellationToken::new())
            .await
            .map_err(|e| WorkerError::Process(format!("import fetch for {} failed: {e}", item.id)))?;

        // Drain fully: a caching source only persists bytes once the
        // whole stream has been consumed (spec §4.10).
        data.stream
            .try_for_each(|_chunk| async { Ok(()) })
            .await
            .map_err(|e: DataSourceError| WorkerError::Process(format!("import drain for {} failed: {e}", item.id)))
    }
}
