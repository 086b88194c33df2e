//! Typed configuration surface for the gateway core (spec §6).
//!
//! One struct, constructed once by the process entrypoint and threaded
//! through explicitly to every component that needs it — see
//! `core/chain-configs/src/client_config.rs` for the teacher's analogous
//! typed-config-with-defaults approach, and
//! `nearcore/src/config_validate.rs` for the "fail loudly with one
//! summary error" validation style this crate's [`GatewayConfig::validate`]
//! follows.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub max_chunk_hops: u32,
    pub chunk_cache_ttl_seconds: u64,
    pub chunk_cache_capacity: usize,
    pub weighted_peers_temperature_delta: i32,
    pub gateway_peers_request_window_count: usize,
    pub trusted_gateways_request_timeout_ms: u64,
    pub graphql_root_tx_rate_limit_capacity: u32,
    pub graphql_root_tx_rate_limit_per_interval: u32,
    pub graphql_root_tx_rate_limit_interval_ms: u64,
    pub background_data_verification_enabled: bool,
    pub background_data_verification_interval_seconds: u64,
    pub fs_cleanup_worker_batch_size: usize,
    pub fs_cleanup_worker_batch_pause_ms: u64,
    pub root_tx_index_circuit_breaker_failure_threshold: u32,
    pub root_tx_index_circuit_breaker_success_threshold: u32,
    pub root_tx_index_circuit_breaker_timeout_ms: u64,
    pub max_bundle_nesting_depth: u32,
    pub arns_root_host: Option<String>,
    pub skip_cache: bool,
    pub peer_selection_count: usize,
    pub chunk_retry_count: usize,
    pub min_weight: i32,
    pub max_weight: i32,
    pub default_weight: i32,
    pub default_selection_cache_ttl_ms: u64,
    pub request_coalescing_ttl_seconds: u64,
    pub cache_policy_file: Option<String>,
    pub cdb_path: Option<String>,
    pub cache_dir: String,
    pub peer_registry_url: String,
}

impl GatewayConfig {
    pub fn chunk_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.chunk_cache_ttl_seconds)
    }

    pub fn trusted_gateways_request_timeout(&self) -> Duration {
        Duration::from_millis(self.trusted_gateways_request_timeout_ms)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.root_tx_index_circuit_breaker_timeout_ms)
    }

    pub fn selection_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.default_selection_cache_ttl_ms)
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every knob and returns a single error summarizing all
    /// defects found, rather than failing on the first one — matching
    /// `nearcore/src/config_validate.rs`'s "fail loudly with a single
    /// summary error" convention.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.min_weight < 1 {
            problems.push("min_weight must be >= 1".to_string());
        }
        if self.max_weight < self.min_weight {
            problems.push("max_weight must be >= min_weight".to_string());
        }
        if self.default_weight < self.min_weight || self.default_weight > self.max_weight {
            problems.push("default_weight must fall within [min_weight, max_weight]".to_string());
        }
        if self.max_bundle_nesting_depth == 0 {
            problems.push("max_bundle_nesting_depth must be > 0".to_string());
        }
        if self.peer_selection_count == 0 {
            problems.push("peer_selection_count must be > 0".to_string());
        }
        if self.chunk_retry_count == 0 {
            problems.push("chunk_retry_count must be > 0".to_string());
        }
        if self.root_tx_index_circuit_breaker_failure_threshold == 0 {
            problems
                .push("root_tx_index_circuit_breaker_failure_threshold must be > 0".to_string());
        }
        if self.root_tx_index_circuit_breaker_success_threshold == 0 {
            problems
                .push("root_tx_index_circuit_breaker_success_threshold must be > 0".to_string());
        }
        if self.cache_dir.is_empty() {
            problems.push("cache_dir must not be empty".to_string());
        }
        if self.peer_registry_url.is_empty() {
            problems.push("peer_registry_url must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_chunk_hops: 1,
            chunk_cache_ttl_seconds: 60,
            chunk_cache_capacity: 100,
            weighted_peers_temperature_delta: 2,
            gateway_peers_request_window_count: 20,
            trusted_gateways_request_timeout_ms: 5_000,
            graphql_root_tx_rate_limit_capacity: 50,
            graphql_root_tx_rate_limit_per_interval: 10,
            graphql_root_tx_rate_limit_interval_ms: 1_000,
            background_data_verification_enabled: false,
            background_data_verification_interval_seconds: 3_600,
            fs_cleanup_worker_batch_size: 500,
            fs_cleanup_worker_batch_pause_ms: 50,
            root_tx_index_circuit_breaker_failure_threshold: 5,
            root_tx_index_circuit_breaker_success_threshold: 2,
            root_tx_index_circuit_breaker_timeout_ms: 10_000,
            max_bundle_nesting_depth: 10,
            arns_root_host: None,
            skip_cache: false,
            peer_selection_count: 3,
            chunk_retry_count: 3,
            min_weight: 1,
            max_weight: 100,
            default_weight: 50,
            default_selection_cache_ttl_ms: 5_000,
            request_coalescing_ttl_seconds: 60,
            cache_policy_file: None,
            cdb_path: None,
            cache_dir: "./data/cache".to_string(),
            peer_registry_url: "http://localhost:8080/peers".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse gateway config: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("invalid gateway config:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}
