//! Small, single-purpose cache primitives used throughout the gateway:
//! a TTL-wrapped LRU for the peer-selection cache and the gateway-header
//! index's in-memory LRU, and a token bucket for per-gateway rate
//! limiting.
//!
//! Scoped deliberately thin, in the spirit of `utils/near-cache`'s own
//! "do not use this, new versions can stop being published at literally
//! any time" warning about not growing beyond a wrapper around `lru`.

pub mod token_bucket;
pub mod ttl_lru;

pub use token_bucket::TokenBucket;
pub use ttl_lru::TtlLru;
