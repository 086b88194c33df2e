use std::collections::HashSet;

use async_trait::async_trait;
use gw_primitives::Identifier;
use serde::Deserialize;
use serde_json::json;

use crate::backend::{IndexError, RootTxIndexBackend, RootTxRecord};

/// Walks `transaction.bundledIn.id` upward via GraphQL until a
/// transaction with no parent is reached (spec §4.6). Bounded by
/// `max_nesting_depth` and a visited-id set, mirroring the cycle
/// protection `gw-bundles::get_data_item_offset` applies to the binary
/// envelope walk.
pub struct GraphqlBackend {
    http: reqwest::Client,
    endpoint: String,
    max_nesting_depth: u32,
    timeout: std::time::Duration,
}

impl GraphqlBackend {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        max_nesting_depth: u32,
        timeout: std::time::Duration,
    ) -> Self {
        Self { http, endpoint: endpoint.into(), max_nesting_depth, timeout }
    }

    async fn bundled_in(&self, id: Identifier) -> Result<Option<Identifier>, IndexError> {
        let query = json!({
            "query": "query($id: ID!) { transaction(id: $id) { bundledIn { id } } }",
            "variables": { "id": id.to_base64url() },
        });

        #[derive(Deserialize)]
        struct Response {
            data: Option<ResponseData>,
        }
        #[derive(Deserialize)]
        struct ResponseData {
            transaction: Option<TransactionData>,
        }
        #[derive(Deserialize)]
        struct TransactionData {
            #[serde(rename = "bundledIn")]
            bundled_in: Option<BundledIn>,
        }
        #[derive(Deserialize)]
        struct BundledIn {
            id: String,
        }

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&query)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            return Err(IndexError::NetworkError(format!("graphql gateway returned {}", response.status())));
        }

        let body: Response = response.json().await.map_err(classify_reqwest_error)?;
        let Some(bundled_in) = body.data.and_then(|d| d.transaction).and_then(|t| t.bundled_in) else {
            return Ok(None);
        };

        bundled_in
            .id
            .parse()
            .map(Some)
            .map_err(|e: gw_primitives::identifier::IdentifierError| IndexError::Storage(e.to_string()))
    }
}

#[async_trait]
impl RootTxIndexBackend for GraphqlBackend {
    async fn get_root_tx(&self, data_item_id: Identifier) -> Result<Option<RootTxRecord>, IndexError> {
        let mut current = data_item_id;
        let mut visited = HashSet::new();
        visited.insert(current);

        for _ in 0..self.max_nesting_depth {
            match self.bundled_in(current).await? {
                // No parent: `current` is the root (possibly the
                // original id itself, if it was never bundled).
                None => return Ok(Some(RootTxRecord::simple(current))),
                Some(parent) => {
                    if !visited.insert(parent) {
                        tracing::warn!(id = %data_item_id, "bundledIn cycle detected, aborting GraphQL walk");
                        return Ok(None);
                    }
                    current = parent;
                }
            }
        }

        tracing::warn!(id = %data_item_id, "bundledIn walk exceeded max nesting depth");
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "graphql"
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> IndexError {
    if err.is_timeout() {
        IndexError::Timeout
    } else {
        IndexError::NetworkError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_name_is_stable() {
        let backend = GraphqlBackend::new(
            reqwest::Client::new(),
            "http://gw.example/graphql",
            10,
            std::time::Duration::from_secs(5),
        );
        assert_eq!(backend.name(), "graphql");
    }
}
