use thiserror::Error;

use crate::MAX_HOPS;

/// Request-scoped attributes propagated across forwarding hops (spec §3).
#[derive(Debug, Clone, Default)]
pub struct RequestAttributes {
    pub hops: u32,
    pub origin: Option<String>,
    pub origin_node_release: Option<String>,
    pub client_ips: Vec<String>,
    pub arns_name: Option<String>,
    pub skip_remote_forwarding: bool,
}

impl RequestAttributes {
    /// Returns a copy with `hops` incremented by one, for forwarding to
    /// the next hop. Does not itself enforce the hop limit — callers
    /// check via [`HopGuard`] before using the result.
    pub fn next_hop(&self) -> Self {
        Self { hops: self.hops + 1, ..self.clone() }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("hop limit exceeded: {hops} >= {max}")]
pub struct HopsExceeded {
    pub hops: u32,
    pub max: u32,
}

/// Centralizes the "refuse before any network call once hops >= max"
/// invariant (spec §3) so every call site — chunk fetch, data-source
/// recursion, bundle recursion — uses one audited check.
#[derive(Debug, Clone, Copy)]
pub struct HopGuard {
    max_hops: u32,
}

impl HopGuard {
    pub fn new(max_hops: u32) -> Self {
        Self { max_hops }
    }

    pub fn check(&self, attributes: &RequestAttributes) -> Result<(), HopsExceeded> {
        if attributes.hops >= self.max_hops {
            return Err(HopsExceeded { hops: attributes.hops, max: self.max_hops });
        }
        Ok(())
    }
}

impl Default for HopGuard {
    fn default() -> Self {
        Self::new(MAX_HOPS)
    }
}
