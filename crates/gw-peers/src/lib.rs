//! Weighted peer manager (spec §4.1): a live set of peer URLs grouped by
//! logical category, with per-category weights that track recent call
//! outcomes, and cheap weighted random sampling.
//!
//! Grounded on the refresh-and-reconnect loop and weighted-preference
//! scoring of `chain/network/src/peer_manager/peer_manager_actor.rs`, and
//! on the snapshot-for-readers / single-writer discipline of
//! `chain/network/src/routing/routing_table_view_v2/mod.rs`.

mod sampling;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use gw_cache::TtlLru;
use gw_circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use gw_primitives::{Classify, ErrorKind, Peer};
use parking_lot::RwLock;
use rand::thread_rng;
use thiserror::Error;

/// Minimum clamp for any peer's per-category weight.
pub const MIN_WEIGHT: u32 = 1;
/// Maximum clamp for any peer's per-category weight.
pub const MAX_WEIGHT: u32 = 100;
/// Weight assigned to a peer newly observed by a registry refresh.
pub const DEFAULT_WEIGHT: u32 = 50;
/// Number of trailing latency/throughput samples kept per peer for the
/// "faster/slower than recent average" bonus comparison.
pub const DEFAULT_REQUEST_WINDOW_COUNT: usize = 20;
/// How long a computed weighted selection is cached before being
/// recomputed, keyed by `(category, count, generation)`.
pub const DEFAULT_SELECTION_CACHE_TTL: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum PeerManagerError {
    #[error("no peers registered for category {0}")]
    NoPeersAvailable(String),
    #[error("peer registry refresh failed: {0}")]
    RefreshFailed(String),
}

impl Classify for PeerManagerError {
    fn kind(&self) -> ErrorKind {
        match self {
            PeerManagerError::NoPeersAvailable(_) => ErrorKind::NotFound,
            PeerManagerError::RefreshFailed(_) => ErrorKind::NetworkError,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PeerCallMetrics {
    pub latency_ms: f64,
    pub throughput_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PeerManagerConfig {
    pub temperature_delta: u32,
    pub request_window_count: usize,
    pub selection_cache_ttl: Duration,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            temperature_delta: 2,
            request_window_count: DEFAULT_REQUEST_WINDOW_COUNT,
            selection_cache_ttl: DEFAULT_SELECTION_CACHE_TTL,
        }
    }
}

struct PeerEntry {
    weight: u32,
    latency_samples: VecDeque<f64>,
    throughput_samples: VecDeque<f64>,
}

impl PeerEntry {
    fn new(weight: u32) -> Self {
        Self { weight, latency_samples: VecDeque::new(), throughput_samples: VecDeque::new() }
    }
}

#[derive(Default)]
struct CategoryState {
    peers: HashMap<String, PeerEntry>,
    generation: AtomicU64,
}

impl CategoryState {
    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }
}

/// Maintains per-category peer weights and produces weighted samples.
/// Cloned via `Arc` by callers that need to share one instance across
/// tasks; the weight map is guarded by a single `RwLock` so readers
/// (sampling, metrics export) never block each other, while mutations
/// (reports, refresh) are serialized.
pub struct PeerManager {
    config: PeerManagerConfig,
    categories: RwLock<HashMap<String, CategoryState>>,
    selection_cache: TtlLru<(String, usize, u64), Vec<Peer>>,
    refresh_breaker: CircuitBreaker,
    http: reqwest::Client,
    registry_url: String,
}

impl PeerManager {
    pub fn new(config: PeerManagerConfig, http: reqwest::Client, registry_url: impl Into<String>) -> Self {
        Self {
            config,
            categories: RwLock::new(HashMap::new()),
            selection_cache: TtlLru::new(256),
            refresh_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            http,
            registry_url: registry_url.into(),
        }
    }

    /// Selects up to `count` distinct peers for `category`, weighted by
    /// current score and additionally shuffled to break ties. Results
    /// are cached for `selection_cache_ttl`, keyed by the category's
    /// current generation so any mutation naturally invalidates it.
    pub fn select_peers(&self, category: &str, count: usize) -> Result<Vec<Peer>, PeerManagerError> {
        let categories = self.categories.read();
        let state = categories
            .get(category)
            .ok_or_else(|| PeerManagerError::NoPeersAvailable(category.to_string()))?;
        if state.peers.is_empty() {
            return Err(PeerManagerError::NoPeersAvailable(category.to_string()));
        }

        let generation = state.generation.load(Ordering::Relaxed);
        let cache_key = (category.to_string(), count, generation);
        if let Some(cached) = self.selection_cache.get(&cache_key) {
            return Ok(cached);
        }

        let mut urls: Vec<&String> = state.peers.keys().collect();
        urls.sort();
        let weights: Vec<u32> = urls.iter().map(|url| state.peers[*url].weight).collect();

        let mut rng = thread_rng();
        let picks = sampling::weighted_sample_without_replacement(&mut rng, &weights, count);
        let selected: Vec<Peer> = picks.into_iter().map(|i| Peer::new(urls[i].clone())).collect();

        drop(categories);
        self.selection_cache.insert(cache_key, selected.clone(), self.config.selection_cache_ttl);
        Ok(selected)
    }

    /// Rewards `peer` for a successful call, adding a bonus for being
    /// faster/higher-throughput than its own trailing average (spec §4.1).
    pub fn report_success(&self, category: &str, peer: &Peer, metrics: PeerCallMetrics) {
        let mut categories = self.categories.write();
        let Some(state) = categories.get_mut(category) else { return };
        let Some(entry) = state.peers.get_mut(&peer.url) else { return };

        let trailing_latency = trailing_mean(&entry.latency_samples);
        let trailing_throughput = trailing_mean(&entry.throughput_samples);

        let mut bonus = self.config.temperature_delta;
        if let Some(mean) = trailing_latency {
            if metrics.latency_ms < mean {
                bonus += self.config.temperature_delta;
            }
        }
        if let Some(mean) = trailing_throughput {
            if metrics.throughput_bytes_per_sec > mean {
                bonus += self.config.temperature_delta;
            }
        }
        entry.weight = entry.weight.saturating_add(bonus).min(MAX_WEIGHT);

        push_sample(&mut entry.latency_samples, metrics.latency_ms, self.config.request_window_count);
        push_sample(
            &mut entry.throughput_samples,
            metrics.throughput_bytes_per_sec,
            self.config.request_window_count,
        );

        state.bump();
    }

    pub fn report_failure(&self, category: &str, peer: &Peer) {
        let mut categories = self.categories.write();
        let Some(state) = categories.get_mut(category) else { return };
        let Some(entry) = state.peers.get_mut(&peer.url) else { return };
        entry.weight = entry.weight.saturating_sub(self.config.temperature_delta).max(MIN_WEIGHT);
        state.bump();
    }

    /// Replaces the peer set from the upstream registry, preserving
    /// weights of survivors and assigning [`DEFAULT_WEIGHT`] to newly
    /// observed peers. Errors are logged and swallowed: the previous
    /// peer set is retained (spec §4.1 failure semantics).
    pub async fn refresh_peers(&self) {
        let result = self
            .refresh_breaker
            .call(|| async {
                self.http
                    .get(&self.registry_url)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?
                    .json::<HashMap<String, Vec<String>>>()
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;

        let registry = match result {
            Ok(registry) => registry,
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::warn!("peer registry refresh skipped: circuit open");
                return;
            }
            Err(CircuitBreakerError::Inner(e)) => {
                tracing::warn!(error = %e, "peer registry refresh failed, retaining previous peer set");
                return;
            }
        };

        let mut categories = self.categories.write();
        for (category, urls) in registry {
            let state = categories.entry(category).or_default();
            let incoming: std::collections::HashSet<String> = urls.into_iter().collect();

            state.peers.retain(|url, _| incoming.contains(url));
            for url in incoming {
                state.peers.entry(url).or_insert_with(|| PeerEntry::new(DEFAULT_WEIGHT));
            }
            state.bump();
        }
    }

    pub fn get_peer_urls(&self, category: &str) -> Vec<String> {
        self.categories
            .read()
            .get(category)
            .map(|state| state.peers.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_weights(&self, category: &str) -> HashMap<String, u32> {
        self.categories
            .read()
            .get(category)
            .map(|state| state.peers.iter().map(|(url, e)| (url.clone(), e.weight)).collect())
            .unwrap_or_default()
    }

    /// Test/bootstrap helper to seed a category directly, bypassing
    /// `refresh_peers`'s network call.
    pub fn seed_category(&self, category: &str, urls: impl IntoIterator<Item = String>) {
        let mut categories = self.categories.write();
        let state = categories.entry(category.to_string()).or_default();
        for url in urls {
            state.peers.entry(url).or_insert_with(|| PeerEntry::new(DEFAULT_WEIGHT));
        }
        state.bump();
    }
}

fn trailing_mean(samples: &VecDeque<f64>) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

fn push_sample(samples: &mut VecDeque<f64>, value: f64, window: usize) {
    samples.push_back(value);
    while samples.len() > window {
        samples.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PeerManager {
        PeerManager::new(
            PeerManagerConfig::default(),
            reqwest::Client::new(),
            "http://registry.example/peers".to_string(),
        )
    }

    #[test]
    fn selecting_from_unknown_category_fails() {
        let pm = manager();
        assert!(matches!(
            pm.select_peers("chunk", 2),
            Err(PeerManagerError::NoPeersAvailable(_))
        ));
    }

    #[test]
    fn seeded_peers_get_default_weight() {
        let pm = manager();
        pm.seed_category("chunk", vec!["http://a".to_string(), "http://b".to_string()]);
        let weights = pm.get_weights("chunk");
        assert_eq!(weights.len(), 2);
        assert!(weights.values().all(|&w| w == DEFAULT_WEIGHT));
    }

    #[test]
    fn select_peers_returns_distinct_urls_without_exceeding_population() {
        let pm = manager();
        pm.seed_category("chunk", vec!["http://a".to_string(), "http://b".to_string()]);
        let selected = pm.select_peers("chunk", 5).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn report_success_increases_weight_up_to_max() {
        let pm = manager();
        pm.seed_category("chunk", vec!["http://a".to_string()]);
        let peer = Peer::new("http://a");
        for _ in 0..100 {
            pm.report_success("chunk", &peer, PeerCallMetrics { latency_ms: 10.0, throughput_bytes_per_sec: 1000.0 });
        }
        assert_eq!(pm.get_weights("chunk")["http://a"], MAX_WEIGHT);
    }

    #[test]
    fn report_failure_decreases_weight_down_to_min() {
        let pm = manager();
        pm.seed_category("chunk", vec!["http://a".to_string()]);
        let peer = Peer::new("http://a");
        for _ in 0..100 {
            pm.report_failure("chunk", &peer);
        }
        assert_eq!(pm.get_weights("chunk")["http://a"], MIN_WEIGHT);
    }

    #[test]
    fn faster_than_trailing_mean_earns_a_bonus() {
        let pm = manager();
        pm.seed_category("chunk", vec!["http://a".to_string()]);
        let peer = Peer::new("http://a");

        // Establish a trailing mean of 100ms.
        for _ in 0..5 {
            pm.report_success("chunk", &peer, PeerCallMetrics { latency_ms: 100.0, throughput_bytes_per_sec: 0.0 });
        }
        let before = pm.get_weights("chunk")["http://a"];

        // A call faster than the mean earns base + bonus.
        pm.report_success("chunk", &peer, PeerCallMetrics { latency_ms: 1.0, throughput_bytes_per_sec: 0.0 });
        let after = pm.get_weights("chunk")["http://a"];
        assert!(after - before > pm.config.temperature_delta);
    }

    #[test]
    fn selection_cache_invalidates_after_a_report() {
        let pm = manager();
        pm.seed_category("chunk", vec!["http://a".to_string()]);
        let first = pm.select_peers("chunk", 1).unwrap();
        pm.report_failure("chunk", &first[0]);
        // Different generation, so a fresh computation runs rather than
        // returning a stale cached Vec (weight differs now).
        let weights_before = pm.get_weights("chunk")["http://a"];
        assert_eq!(weights_before, DEFAULT_WEIGHT - pm.config.temperature_delta);
    }
}
