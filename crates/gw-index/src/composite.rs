use gw_circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use gw_primitives::Identifier;

use crate::backend::{IndexError, RootTxIndexBackend, RootTxRecord};

struct GuardedBackend {
    backend: Box<dyn RootTxIndexBackend>,
    breaker: CircuitBreaker,
}

/// Tries an ordered list of backends for `dataItemId -> RootTxRecord`
/// resolution (spec §4.6). Each backend is wrapped in its own circuit
/// breaker; a backend whose breaker is open is skipped without being
/// called. The first backend to return a *complete* record (both
/// offsets present) wins immediately; a record missing offsets is kept
/// as a fallback in case a later backend can complete it.
pub struct CompositeRootTxIndex {
    backends: Vec<GuardedBackend>,
}

impl CompositeRootTxIndex {
    pub fn builder() -> CompositeRootTxIndexBuilder {
        CompositeRootTxIndexBuilder { backends: Vec::new() }
    }

    pub async fn get_root_tx(&self, data_item_id: Identifier) -> Option<RootTxRecord> {
        let mut fallback: Option<RootTxRecord> = None;

        for guarded in &self.backends {
            if guarded.breaker.state() == gw_circuit_breaker::CircuitState::Open {
                tracing::debug!(backend = guarded.backend.name(), "skipping backend, circuit open");
                continue;
            }

            let result = guarded
                .breaker
                .call(|| guarded.backend.get_root_tx(data_item_id))
                .await;

            let record = match result {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(CircuitBreakerError::CircuitOpen) => continue,
                Err(CircuitBreakerError::Inner(err)) => {
                    tracing::debug!(
                        backend = guarded.backend.name(),
                        error = %err,
                        "backend lookup failed, trying next"
                    );
                    continue;
                }
            };

            if record.is_complete() {
                return Some(record);
            }
            if fallback.is_none() {
                fallback = Some(record);
            }
        }

        fallback
    }
}

pub struct CompositeRootTxIndexBuilder {
    backends: Vec<GuardedBackend>,
}

impl CompositeRootTxIndexBuilder {
    pub fn with_backend(mut self, backend: Box<dyn RootTxIndexBackend>) -> Self {
        self.with_backend_and_config(backend, CircuitBreakerConfig::default())
    }

    pub fn with_backend_and_config(
        mut self,
        backend: Box<dyn RootTxIndexBackend>,
        config: CircuitBreakerConfig,
    ) -> Self {
        self.backends.push(GuardedBackend { backend, breaker: CircuitBreaker::new(config) });
        self
    }

    pub fn build(self) -> CompositeRootTxIndex {
        CompositeRootTxIndex { backends: self.backends }
    }
}
