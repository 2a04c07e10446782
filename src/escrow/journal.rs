//! Settlement Journal
//!
//! Append-only, hash-chained record of every committed transaction.
//! A replica that replays the same operations must reach the same head
//! hash; `verify()` recomputes the chain from genesis.

use serde::{Serialize, Deserialize};

use crate::core::hash::{LedgerHash, LedgerHasher};
use crate::escrow::events::EscrowEvent;

/// Hash preceding the first entry.
pub const GENESIS_HASH: LedgerHash = [0u8; 32];

/// One committed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// 1-based commit sequence.
    pub sequence: u64,
    /// Events emitted by the transaction.
    pub events: Vec<EscrowEvent>,
    /// Hash of the previous entry.
    pub prev_hash: LedgerHash,
    /// Hash of this entry.
    pub hash: LedgerHash,
}

/// Compute an entry hash.
pub fn entry_hash(prev_hash: &LedgerHash, sequence: u64, events: &[EscrowEvent]) -> LedgerHash {
    let mut hasher = LedgerHasher::for_journal();
    hasher.update_key(prev_hash);
    hasher.update_u64(sequence);
    // Serialization of plain data into a Vec cannot fail.
    let encoded = bincode::serialize(events).unwrap_or_default();
    hasher.update_u64(encoded.len() as u64);
    hasher.update_bytes(&encoded);
    hasher.finalize()
}

/// Hash-chained list of entries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a committed transaction, returning its sequence number.
    pub fn append(&mut self, events: Vec<EscrowEvent>) -> &JournalEntry {
        let sequence = self.entries.len() as u64 + 1;
        let prev_hash = self.head_hash();
        let hash = entry_hash(&prev_hash, sequence, &events);
        self.entries.push(JournalEntry { sequence, events, prev_hash, hash });
        &self.entries[self.entries.len() - 1]
    }

    /// Hash of the latest entry.
    pub fn head_hash(&self) -> LedgerHash {
        self.entries.last().map(|e| e.hash).unwrap_or(GENESIS_HASH)
    }

    /// Number of committed transactions.
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Whether nothing has been committed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in commit order.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Entries after `sequence` (for catching up a replica).
    pub fn since(&self, sequence: u64) -> &[JournalEntry] {
        let start = (sequence as usize).min(self.entries.len());
        &self.entries[start..]
    }

    /// Recompute the whole chain. Returns the first bad sequence, if any.
    pub fn verify(&self) -> Result<(), u64> {
        let mut prev = GENESIS_HASH;
        for (i, entry) in self.entries.iter().enumerate() {
            let sequence = i as u64 + 1;
            if entry.sequence != sequence
                || entry.prev_hash != prev
                || entry.hash != entry_hash(&prev, sequence, &entry.events)
            {
                return Err(sequence);
            }
            prev = entry.hash;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Address;

    fn closed(byte: u8) -> EscrowEvent {
        EscrowEvent::MatchClosed { match_address: Address::new([byte; 32]) }
    }

    #[test]
    fn test_append_chains_hashes() {
        let mut journal = Journal::new();
        assert!(journal.is_empty());
        assert_eq!(journal.head_hash(), GENESIS_HASH);

        let first = journal.append(vec![closed(1)]).hash;
        let second = journal.append(vec![closed(2)]).clone();

        assert_eq!(journal.len(), 2);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.prev_hash, first);
        assert_eq!(journal.head_hash(), second.hash);
        assert!(journal.verify().is_ok());
    }

    #[test]
    fn test_identical_histories_agree() {
        let mut a = Journal::new();
        let mut b = Journal::new();
        for byte in 0..5 {
            a.append(vec![closed(byte)]);
            b.append(vec![closed(byte)]);
        }
        assert_eq!(a.head_hash(), b.head_hash());
    }

    #[test]
    fn test_tampering_detected() {
        let mut journal = Journal::new();
        journal.append(vec![closed(1)]);
        journal.append(vec![closed(2)]);
        journal.append(vec![closed(3)]);

        journal.entries[1].events = vec![closed(9)];
        assert_eq!(journal.verify(), Err(2));
    }

    #[test]
    fn test_since() {
        let mut journal = Journal::new();
        for byte in 0..4 {
            journal.append(vec![closed(byte)]);
        }
        assert_eq!(journal.since(0).len(), 4);
        assert_eq!(journal.since(3).len(), 1);
        assert_eq!(journal.since(3)[0].sequence, 4);
        assert!(journal.since(10).is_empty());
    }
}
