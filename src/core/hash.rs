//! Ledger Hashing
//!
//! Provides deterministic, domain-separated SHA-256 hashing for:
//! - Address derivation (match, vault, treasury, config)
//! - Ledger state roots for replica integrity checks
//! - Journal hash chaining

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type LedgerHash = [u8; 32];

/// Deterministic hasher for ledger data.
///
/// Wraps SHA-256 with helpers for the integer widths the ledger stores.
/// Order of updates is critical for determinism.
pub struct LedgerHasher {
    hasher: Sha256,
}

impl LedgerHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for the ledger state root.
    pub fn for_ledger_state() -> Self {
        Self::new(b"CHESS_ESCROW_STATE_V1")
    }

    /// Create hasher for journal entries.
    pub fn for_journal() -> Self {
        Self::new(b"CHESS_ESCROW_JOURNAL_V1")
    }

    /// Create hasher with no domain prefix (raw seed hashing).
    pub fn raw() -> Self {
        Self { hasher: Sha256::new() }
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i64 value (little-endian).
    #[inline]
    pub fn update_i64(&mut self, value: i64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a 32-byte key (identity, address, hash).
    #[inline]
    pub fn update_key(&mut self, key: &[u8; 32]) {
        self.hasher.update(key);
    }

    /// Update with an optional 32-byte key. Presence is tagged so that
    /// `None` and an all-zero key never collide.
    #[inline]
    pub fn update_opt_key(&mut self, key: Option<&[u8; 32]>) {
        match key {
            Some(k) => {
                self.update_u8(1);
                self.update_key(k);
            }
            None => self.update_u8(0),
        }
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> LedgerHash {
        self.hasher.finalize().into()
    }
}

/// Compute a simple hash of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> LedgerHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> LedgerHash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the ledger state root.
///
/// Called by `Ledger::compute_hash()`. The closure adds the records in
/// their canonical (sorted) order.
pub fn compute_ledger_hash<F>(sequence: u64, add_state: F) -> LedgerHash
where
    F: FnOnce(&mut LedgerHasher),
{
    let mut hasher = LedgerHasher::for_ledger_state();

    // Always hash the commit sequence first
    hasher.update_u64(sequence);

    add_state(&mut hasher);

    hasher.finalize()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_hasher_determinism() {
        let make_hash = || {
            let mut hasher = LedgerHasher::for_ledger_state();
            hasher.update_u32(100);
            hasher.update_u64(12345);
            hasher.update_i64(-7);
            hasher.update_key(&[9u8; 32]);
            hasher.update_bool(true);
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = LedgerHasher::new(b"test");
            h.update_u64(1);
            h.update_u64(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = LedgerHasher::new(b"test");
            h.update_u64(2);
            h.update_u64(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_domain_separation() {
        let data = [1u8, 2, 3, 4];

        let hash1 = hash_with_domain(b"DOMAIN_A", &data);
        let hash2 = hash_with_domain(b"DOMAIN_B", &data);

        assert_ne!(hash1, hash2);
        assert_ne!(hash1, hash_bytes(&data));
    }

    #[test]
    fn test_optional_key_tagging() {
        let none = {
            let mut h = LedgerHasher::raw();
            h.update_opt_key(None);
            h.finalize()
        };
        let zero = {
            let mut h = LedgerHasher::raw();
            h.update_opt_key(Some(&[0u8; 32]));
            h.finalize()
        };

        assert_ne!(none, zero);
    }

    #[test]
    fn test_compute_ledger_hash() {
        let hash = compute_ledger_hash(3, |hasher| {
            hasher.update_u64(500);
            hasher.update_bool(true);
        });

        let hash2 = compute_ledger_hash(3, |hasher| {
            hasher.update_u64(500);
            hasher.update_bool(true);
        });

        assert_eq!(hash, hash2);

        // Different sequence = different hash
        let hash3 = compute_ledger_hash(4, |hasher| {
            hasher.update_u64(500);
            hasher.update_bool(true);
        });

        assert_ne!(hash, hash3);
    }
}
