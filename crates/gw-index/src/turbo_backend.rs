use async_trait::async_trait;
use gw_primitives::Identifier;
use serde::Deserialize;

use crate::backend::{IndexError, RootTxIndexBackend, RootTxRecord};

/// Remote DynamoDB-like key-value lookup (spec §4.6 "Turbo index").
/// Modeled as a plain GET-by-key HTTP call, since the wire contract of
/// the remote table is out of scope here — only the fact that it
/// answers the same `dataItemId -> RootTxRecord` question matters.
pub struct TurboBackend {
    http: reqwest::Client,
    base_url: String,
    timeout: std::time::Duration,
}

impl TurboBackend {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self { http, base_url: base_url.into(), timeout }
    }
}

#[derive(Debug, Deserialize)]
struct TurboRecord {
    root_tx_id: String,
    root_data_item_offset: Option<u64>,
    root_data_offset: Option<u64>,
    content_type: Option<String>,
    size: Option<u64>,
    data_size: Option<u64>,
}

#[async_trait]
impl RootTxIndexBackend for TurboBackend {
    async fn get_root_tx(&self, data_item_id: Identifier) -> Result<Option<RootTxRecord>, IndexError> {
        let url = format!("{}/items/{}", self.base_url, data_item_id.to_base64url());
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(IndexError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(IndexError::NetworkError(format!("turbo index returned {}", response.status())));
        }

        let record: TurboRecord = response.json().await.map_err(classify_reqwest_error)?;
        let root_tx_id: Identifier = record
            .root_tx_id
            .parse()
            .map_err(|e: gw_primitives::identifier::IdentifierError| IndexError::Storage(e.to_string()))?;

        Ok(Some(RootTxRecord {
            root_tx_id,
            root_data_item_offset: record.root_data_item_offset,
            root_data_offset: record.root_data_offset,
            content_type: record.content_type,
            size: record.size,
            data_size: record.data_size,
        }))
    }

    fn name(&self) -> &'static str {
        "turbo"
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> IndexError {
    if err.is_timeout() {
        IndexError::Timeout
    } else {
        IndexError::NetworkError(err.to_string())
    }
}
