//! Sampling / composite data-source wrappers (spec §2 "Sampling / composite
//! data source wrappers"): ordered fallback across a chain of sources, and
//! probabilistic routing between two sources.
//!
//! Grounded on `gw-index::CompositeRootTxIndex`'s own "try each, first
//! success wins" shape, generalized from index backends to full
//! [`ContiguousDataSource`]s, plus `chain/network/src/peer_manager`'s
//! random-sampling style for the probabilistic variant.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::source::{ContiguousData, ContiguousDataSource, DataRequest, DataSourceError};

/// Tries each source in order; a source whose error is locally
/// recoverable (not found, network error, timeout, circuit open, rate
/// limited) falls through to the next. Any other error (hops exceeded,
/// verification failure, invalid input, cancellation) is returned
/// immediately, since retrying another source cannot fix it.
pub struct FallbackCompositeDataSource {
    sources: Vec<Arc<dyn ContiguousDataSource>>,
}

impl FallbackCompositeDataSource {
    pub fn new(sources: Vec<Arc<dyn ContiguousDataSource>>) -> Self {
        Self { sources }
    }
}

fn is_locally_recoverable(err: &DataSourceError) -> bool {
    matches!(
        err,
        DataSourceError::NotFound
            | DataSourceError::NetworkError(_)
            | DataSourceError::Timeout
            | DataSourceError::CircuitOpen
            | DataSourceError::RateLimited
            | DataSourceError::AllSourcesFailed
    )
}

#[async_trait]
impl ContiguousDataSource for FallbackCompositeDataSource {
    async fn get_data(
        &self,
        request: DataRequest,
        cancel: CancellationToken,
    ) -> Result<ContiguousData, DataSourceError> {
        let mut last_err = DataSourceError::AllSourcesFailed;

        for (idx, source) in self.sources.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(DataSourceError::Cancelled);
            }
            match source.get_data(request.clone(), cancel.clone()).await {
                Ok(data) => return Ok(data),
                Err(err) if is_locally_recoverable(&err) => {
                    debug!(source_index = idx, error = %err, "data source failed, trying next");
                    last_err = err;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }
}

/// Routes each request to one of two sources, chosen independently per
/// call with probability `primary_weight / (primary_weight +
/// secondary_weight)` for the primary. Used to shift read traffic
/// between two equivalent backends (e.g. canary a new gateway) without
/// an explicit failover signal.
pub struct SamplingDataSource {
    primary: Arc<dyn ContiguousDataSource>,
    secondary: Arc<dyn ContiguousDataSource>,
    primary_weight: u32,
    secondary_weight: u32,
}

impl SamplingDataSource {
    pub fn new(
        primary: Arc<dyn ContiguousDataSource>,
        secondary: Arc<dyn ContiguousDataSource>,
        primary_weight: u32,
        secondary_weight: u32,
    ) -> Self {
        assert!(primary_weight + secondary_weight > 0, "sampling weights must not both be zero");
        Self { primary, secondary, primary_weight, secondary_weight }
    }
}

#[async_trait]
impl ContiguousDataSource for SamplingDataSource {
    async fn get_data(
        &self,
        request: DataRequest,
        cancel: CancellationToken,
    ) -> Result<ContiguousData, DataSourceError> {
        let total = self.primary_weight + self.secondary_weight;
        let draw = rand::thread_rng().gen_range(0..total);
        if draw < self.primary_weight {
            self.primary.get_data(request, cancel).await
        } else {
            self.secondary.get_data(request, cancel).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use gw_primitives::{ContiguousDataMetadata, Identifier, RequestAttributes};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> DataRequest {
        DataRequest { id: Identifier::from_bytes([1u8; 32]), range: None, request_attributes: RequestAttributes::default() }
    }

    struct FixedSource {
        result: Result<Vec<u8>, DataSourceError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ContiguousDataSource for FixedSource {
        async fn get_data(&self, _request: DataRequest, _cancel: CancellationToken) -> Result<ContiguousData, DataSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(data) => {
                    let data = data.clone();
                    let metadata = ContiguousDataMetadata {
                        size: data.len() as u64,
                        source_content_type: None,
                        verified: true,
                        trusted: false,
                        cached: false,
                        request_attributes: RequestAttributes::default(),
                    };
                    let stream = stream::once(async move { Ok(Bytes::from(data)) });
                    Ok(ContiguousData { metadata, stream: Box::pin(stream) })
                }
                Err(err) => Err(clone_err(err)),
            }
        }
    }

    fn clone_err(err: &DataSourceError) -> DataSourceError {
        match err {
            DataSourceError::NotFound => DataSourceError::NotFound,
            DataSourceError::NetworkError(m) => DataSourceError::NetworkError(m.clone()),
            DataSourceError::VerificationFailed(m) => DataSourceError::VerificationFailed(m.clone()),
            other => panic!("unsupported error in test clone: {other}"),
        }
    }

    #[tokio::test]
    async fn falls_through_recoverable_errors_to_the_next_source() {
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let composite = FallbackCompositeDataSource::new(vec![
            Arc::new(FixedSource { result: Err(DataSourceError::NotFound), calls: Arc::clone(&first_calls) }),
            Arc::new(FixedSource { result: Ok(b"found it".to_vec()), calls: Arc::clone(&second_calls) }),
        ]);

        let result = composite.get_data(request(), CancellationToken::new()).await.unwrap();
        assert_eq!(result.metadata.size, 8);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_recoverable_errors_short_circuit() {
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let composite = FallbackCompositeDataSource::new(vec![
            Arc::new(FixedSource {
                result: Err(DataSourceError::VerificationFailed("bad hash".to_string())),
                calls: Arc::clone(&first_calls),
            }),
            Arc::new(FixedSource { result: Ok(b"unreached".to_vec()), calls: Arc::clone(&second_calls) }),
        ]);

        let err = composite.get_data(request(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DataSourceError::VerificationFailed(_)));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_sources_failing_returns_the_last_error() {
        let composite = FallbackCompositeDataSource::new(vec![
            Arc::new(FixedSource { result: Err(DataSourceError::NotFound), calls: Arc::new(AtomicUsize::new(0)) }),
            Arc::new(FixedSource {
                result: Err(DataSourceError::NetworkError("timeout".to_string())),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        ]);

        let err = composite.get_data(request(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DataSourceError::NetworkError(_)));
    }

    #[tokio::test]
    async fn sampling_with_zero_weight_secondary_always_hits_primary() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let secondary_calls = Arc::new(AtomicUsize::new(0));

        let sampler = SamplingDataSource::new(
            Arc::new(FixedSource { result: Ok(b"p".to_vec()), calls: Arc::clone(&primary_calls) }),
            Arc::new(FixedSource { result: Ok(b"s".to_vec()), calls: Arc::clone(&secondary_calls) }),
            1,
            0,
        );

        for _ in 0..20 {
            sampler.get_data(request(), CancellationToken::new()).await.unwrap();
        }
        assert_eq!(primary_calls.load(Ordering::SeqCst), 20);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }
}
