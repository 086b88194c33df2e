//! Cache policies: a prioritized list of filters deciding whether, and
//! for how long, a retrieved item should be cached (spec §4.8). Loading
//! and validation follow `gw-config`'s "collect every defect, fail with
//! one summary error" convention (itself after
//! `nearcore/src/config_validate.rs`).

use serde::Deserialize;
use thiserror::Error;

use crate::grammar::{Filter, FilterLoadError};
use crate::item::TaggedItem;

#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    pub retention_days: u32,
    pub filter: Filter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDecision {
    pub policy_id: String,
    pub retention_days: u32,
}

impl CacheDecision {
    /// `expiresAt` (spec §3 "Cache decision"), a unix-ms timestamp. Takes
    /// `now_ms` as a parameter rather than reading the clock itself,
    /// since this crate has no ambient notion of "now" (the caller, not
    /// the filter engine, owns time).
    pub fn expires_at_ms(&self, now_ms: u64) -> u64 {
        now_ms + self.retention_days as u64 * 86_400_000
    }
}

/// Evaluates `policies` against `item`, returning the first match among
/// enabled policies ordered by descending priority (ties broken by
/// declaration order). Mirrors the composite-backend "first complete
/// result wins" shape used by `gw-index`'s root-tx lookup, but over
/// priority rather than backend order.
pub fn evaluate(policies: &[CachePolicy], item: &TaggedItem) -> Option<CacheDecision> {
    let mut ordered: Vec<&CachePolicy> = policies.iter().filter(|p| p.enabled).collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

    ordered.into_iter().find(|policy| policy.filter.matches(item)).map(|policy| CacheDecision {
        policy_id: policy.id.clone(),
        retention_days: policy.retention_days,
    })
}

/// Supported `version` value of the cache-policy file envelope (spec
/// §6). Any other value is an `InvalidInput` defect (spec §7: "unknown
/// policy version").
const SUPPORTED_POLICY_VERSION: &str = "1.0";

#[derive(Debug, Deserialize)]
struct RawCachePolicyFile {
    version: String,
    policies: Vec<RawCachePolicy>,
}

#[derive(Debug, Deserialize)]
struct RawCachePolicy {
    id: String,
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
    #[serde(rename = "retentionDays")]
    retention_days: u32,
    filter: serde_json::Value,
}

fn default_true() -> bool {
    true
}

/// Parses a cache-policy configuration file: the versioned `{version,
/// policies}` envelope spec §6 describes. Every defect (unknown version,
/// duplicate id, negative priority, non-positive retention, bad filter
/// shape) is collected before returning, rather than stopping at the
/// first one.
pub fn load_policies(s: &str) -> Result<Vec<CachePolicy>, PolicyLoadError> {
    let file: RawCachePolicyFile = serde_json::from_str(s).map_err(PolicyLoadError::Parse)?;

    let mut problems = Vec::new();
    if file.version != SUPPORTED_POLICY_VERSION {
        problems.push(format!(
            "unknown policy version {:?}, expected {SUPPORTED_POLICY_VERSION:?}",
            file.version
        ));
    }

    let mut seen_ids = std::collections::HashSet::new();
    let mut policies = Vec::with_capacity(file.policies.len());

    for (index, entry) in file.policies.into_iter().enumerate() {
        if !seen_ids.insert(entry.id.clone()) {
            problems.push(format!("policy {index} ({}): duplicate id", entry.id));
        }
        if entry.priority < 0 {
            problems.push(format!("policy {index} ({}): priority must be >= 0", entry.id));
        }
        if entry.retention_days == 0 {
            problems.push(format!("policy {index} ({}): retentionDays must be > 0", entry.id));
        }
        let filter = match Filter::from_json(&entry.filter.to_string()) {
            Ok(filter) => Some(filter),
            Err(err) => {
                problems.push(format!("policy {index} ({}): invalid filter: {err}", entry.id));
                None
            }
        };

        if let Some(filter) = filter {
            policies.push(CachePolicy {
                id: entry.id,
                name: entry.name,
                enabled: entry.enabled,
                priority: entry.priority,
                retention_days: entry.retention_days,
                filter,
            });
        }
    }

    if problems.is_empty() {
        Ok(policies)
    } else {
        Err(PolicyLoadError::Invalid(problems))
    }
}

#[derive(Debug, Error)]
pub enum PolicyLoadError {
    #[error("failed to parse cache policy file: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("invalid cache policy file:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

impl From<FilterLoadError> for PolicyLoadError {
    fn from(err: FilterLoadError) -> Self {
        PolicyLoadError::Invalid(vec![err.to_string()])
    }
}
