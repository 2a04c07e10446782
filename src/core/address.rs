//! Identities and Derived Addresses
//!
//! Every ledger record lives at an address derived from namespaced seeds,
//! so callers never supply raw account identifiers.
//!
//! ## Derivation
//!
//! ```text
//! address = SHA-256( seed_0 || seed_1 || ... || DERIVATION_MARKER )
//!
//! match    : "match" || seed (u64 LE) || code bytes || creator (32 bytes)
//! vault    : "vault" || match address (32 bytes)
//! treasury : "treasury"
//! config   : "config"
//! ```
//!
//! The seed and creator components are fixed width, so the variable-length
//! `code` in the middle of the match seeds is unambiguous.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::hash::LedgerHasher;

/// Marker appended after all seeds.
pub const DERIVATION_MARKER: &[u8] = b"chess-escrow/derived-address";

/// Seed prefix for match records.
pub const MATCH_SEED: &[u8] = b"match";
/// Seed prefix for vaults.
pub const VAULT_SEED: &[u8] = b"vault";
/// Seed for the treasury.
pub const TREASURY_SEED: &[u8] = b"treasury";
/// Seed for the config store.
pub const CONFIG_SEED: &[u8] = b"config";

/// Maximum length of a match code, in bytes.
pub const MAX_CODE_LEN: usize = 32;

/// Error parsing a 32-byte key from hex.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    /// Not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    /// Decoded to the wrong number of bytes.
    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

fn parse_key(s: &str) -> Result<[u8; 32], KeyParseError> {
    let bytes = hex::decode(s).map_err(|e| KeyParseError::InvalidHex(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(KeyParseError::InvalidLength(bytes.len()));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

macro_rules! key_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get raw bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Lowercase hex encoding.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// First four bytes as hex, for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = KeyParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_key(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

key_type! {
    /// Identity of a participant or the protocol authority (public key bytes).
    ///
    /// Implements Ord for deterministic BTreeMap ordering.
    Identity
}

key_type! {
    /// Deterministically derived ledger address.
    Address
}

impl Identity {
    /// Derive an identity from an external subject string (e.g. a JWT `sub`).
    pub fn from_subject(subject: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"chess-escrow-identity:");
        hasher.update(subject.as_bytes());
        Self(hasher.finalize().into())
    }
}

/// Derive an address from an ordered list of seeds.
pub fn derive_address(seeds: &[&[u8]]) -> Address {
    let mut hasher = LedgerHasher::raw();
    for seed in seeds {
        hasher.update_bytes(seed);
    }
    hasher.update_bytes(DERIVATION_MARKER);
    Address(hasher.finalize())
}

/// Check a match code is usable as a derivation seed.
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.len() <= MAX_CODE_LEN
}

/// Address of the match record for `(seed, code, creator)`.
pub fn match_address(seed: u64, code: &str, creator: &Identity) -> Address {
    derive_address(&[
        MATCH_SEED,
        &seed.to_le_bytes(),
        code.as_bytes(),
        creator.as_bytes(),
    ])
}

/// Address of the vault bound to a match record.
pub fn vault_address(match_address: &Address) -> Address {
    derive_address(&[VAULT_SEED, match_address.as_bytes()])
}

/// Address of the protocol treasury.
pub fn treasury_address() -> Address {
    derive_address(&[TREASURY_SEED])
}

/// Address of the config store.
pub fn config_address() -> Address {
    derive_address(&[CONFIG_SEED])
}
