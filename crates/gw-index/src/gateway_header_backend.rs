use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use gw_cache::{TokenBucket, TtlLru};
use gw_primitives::Identifier;

use crate::backend::{IndexError, RootTxIndexBackend, RootTxRecord};

/// One trusted gateway consulted via `HEAD` request (spec §4.6).
/// `priority` orders the gateway set: lower values are tried first.
pub struct TrustedGateway {
    pub base_url: String,
    pub priority: u32,
    pub rate_limit: TokenBucket,
}

impl TrustedGateway {
    pub fn new(base_url: impl Into<String>, priority: u32, rate_limit: TokenBucket) -> Self {
        Self { base_url: base_url.into(), priority, rate_limit }
    }
}

/// Consults a set of trusted gateways by `HEAD <gateway>/<id>`, parsing
/// `x-ar-io-root-transaction-id` and offset response headers. Gateways
/// are tried in ascending priority order; each carries its own
/// [`TokenBucket`] so a rate-limited gateway is skipped on this attempt
/// without counting against the others. An optional in-memory LRU
/// short-circuits repeat lookups within its TTL (spec §4.6 "optional
/// in-memory LRU").
pub struct GatewayHeaderBackend {
    http: reqwest::Client,
    gateways: Vec<TrustedGateway>,
    timeout: Duration,
    cache: Option<TtlLru<Identifier, RootTxRecord>>,
    cache_ttl: Duration,
}

impl GatewayHeaderBackend {
    pub fn new(
        http: reqwest::Client,
        mut gateways: Vec<TrustedGateway>,
        timeout: Duration,
        cache: Option<TtlLru<Identifier, RootTxRecord>>,
        cache_ttl: Duration,
    ) -> Self {
        gateways.sort_by_key(|g| g.priority);
        Self { http, gateways, timeout, cache, cache_ttl }
    }
}

#[async_trait]
impl RootTxIndexBackend for GatewayHeaderBackend {
    async fn get_root_tx(&self, data_item_id: Identifier) -> Result<Option<RootTxRecord>, IndexError> {
        if let Some(cache) = &self.cache {
            if let Some(record) = cache.get(&data_item_id) {
                return Ok(Some(record));
            }
        }

        for gateway in &self.gateways {
            if !gateway.rate_limit.try_remove_tokens(1) {
                tracing::debug!(gateway = %gateway.base_url, "skipping rate-limited gateway this attempt");
                continue;
            }

            let url = format!("{}/{}", gateway.base_url, data_item_id.to_base64url());
            let response = match self.http.head(&url).timeout(self.timeout).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => continue,
                Err(_) => continue,
            };

            if !response.status().is_success() {
                continue;
            }

            if let Some(record) = parse_headers(response.headers()) {
                if let Some(cache) = &self.cache {
                    cache.insert(data_item_id, record.clone(), self.cache_ttl);
                }
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    fn name(&self) -> &'static str {
        "gateway-header"
    }
}

fn parse_headers(headers: &reqwest::header::HeaderMap) -> Option<RootTxRecord> {
    let root_tx_id: Identifier = headers
        .get("x-ar-io-root-transaction-id")?
        .to_str()
        .ok()?
        .parse()
        .ok()?;

    let parse_u64 = |name: &str| -> Option<u64> {
        headers.get(name).and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok())
    };

    Some(RootTxRecord {
        root_tx_id,
        root_data_item_offset: parse_u64("x-ar-io-root-data-item-offset"),
        root_data_offset: parse_u64("x-ar-io-root-data-offset"),
        content_type: headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        size: parse_u64("content-length"),
        data_size: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateways_are_sorted_ascending_by_priority() {
        let backend = GatewayHeaderBackend::new(
            reqwest::Client::new(),
            vec![
                TrustedGateway::new("http://b", 2, TokenBucket::new(10, 10, Duration::from_secs(1))),
                TrustedGateway::new("http://a", 1, TokenBucket::new(10, 10, Duration::from_secs(1))),
            ],
            Duration::from_secs(1),
            None,
            Duration::from_secs(60),
        );
        assert_eq!(backend.gateways[0].base_url, "http://a");
        assert_eq!(backend.gateways[1].base_url, "http://b");
    }

    #[test]
    fn parses_complete_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        let root_tx = Identifier::from_bytes([3u8; 32]);
        headers.insert("x-ar-io-root-transaction-id", root_tx.to_base64url().parse().unwrap());
        headers.insert("x-ar-io-root-data-item-offset", "100".parse().unwrap());
        headers.insert("x-ar-io-root-data-offset", "200".parse().unwrap());

        let record = parse_headers(&headers).unwrap();
        assert_eq!(record.root_tx_id, root_tx);
        assert!(record.is_complete());
    }

    #[test]
    fn missing_root_tx_header_yields_none() {
        let headers = reqwest::header::HeaderMap::new();
        assert!(parse_headers(&headers).is_none());
    }
}
