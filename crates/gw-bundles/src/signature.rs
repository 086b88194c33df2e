/// ANS-104 signature type, a closed enum with a fixed `(sigLen, pubLen,
/// name)` per variant (spec §4.7). The numeric codes below match the
/// values the Arweave bundling ecosystem (`arbundles`) assigns to each
/// scheme, in the order spec.md lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    Arweave,
    Ed25519,
    Ethereum,
    Solana,
    InjectedAptos,
    MultiAptos,
    TypedEthereum,
}

impl SignatureType {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Arweave),
            2 => Some(Self::Ed25519),
            3 => Some(Self::Ethereum),
            4 => Some(Self::Solana),
            5 => Some(Self::InjectedAptos),
            6 => Some(Self::MultiAptos),
            7 => Some(Self::TypedEthereum),
            _ => None,
        }
    }

    /// Signature length in bytes for this scheme.
    pub fn sig_len(self) -> usize {
        match self {
            Self::Arweave => 512,
            Self::Ed25519 => 64,
            Self::Ethereum => 65,
            Self::Solana => 64,
            Self::InjectedAptos => 64,
            Self::MultiAptos => 2052,
            Self::TypedEthereum => 65,
        }
    }

    /// Public key length in bytes for this scheme.
    pub fn pub_len(self) -> usize {
        match self {
            Self::Arweave => 512,
            Self::Ed25519 => 32,
            Self::Ethereum => 65,
            Self::Solana => 32,
            Self::InjectedAptos => 32,
            Self::MultiAptos => 1025,
            Self::TypedEthereum => 42,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Arweave => "arweave",
            Self::Ed25519 => "ed25519",
            Self::Ethereum => "ethereum",
            Self::Solana => "solana",
            Self::InjectedAptos => "injected-aptos",
            Self::MultiAptos => "multi-aptos",
            Self::TypedEthereum => "typed-ethereum",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_codes() {
        for code in 1u16..=7 {
            let sig_type = SignatureType::from_u16(code).unwrap();
            assert!(sig_type.sig_len() > 0);
            assert!(sig_type.pub_len() > 0);
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert!(SignatureType::from_u16(0).is_none());
        assert!(SignatureType::from_u16(8).is_none());
    }

    #[test]
    fn arweave_is_the_largest_common_scheme() {
        assert_eq!(SignatureType::Arweave.sig_len(), 512);
        assert_eq!(SignatureType::Arweave.pub_len(), 512);
    }
}
