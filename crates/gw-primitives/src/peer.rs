use std::fmt;

/// A logical class of peer endpoint, e.g. `chunk` or `data` (spec §3).
/// Cheap to clone and hash; categories are created lazily on first use by
/// the peer manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerCategory(pub String);

impl PeerCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for PeerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single peer/gateway URL, as returned by the peer registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub url: String,
}

impl Peer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
