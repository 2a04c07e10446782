//! Escrow State Definitions
//!
//! Record types stored in the ledger. Each record lives at an address
//! derived in `core::address`; none of them carries a caller-chosen id.

use serde::{Serialize, Deserialize};

use crate::core::address::{self, Address, Identity};
use crate::core::amount::{self, AmountError, Lamports};
use crate::core::hash::LedgerHasher;

// =============================================================================
// MATCH STATUS
// =============================================================================

/// Lifecycle state of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MatchStatus {
    /// Created, waiting for an opponent. Only `player_a` has deposited.
    Waiting = 0,
    /// Both players deposited.
    InProgress = 1,
    /// Settled or cancelled. The record no longer exists.
    Closed = 2,
}

impl MatchStatus {
    /// Number of players whose stake is in the vault.
    pub fn depositors(self) -> u64 {
        match self {
            MatchStatus::Waiting => 1,
            MatchStatus::InProgress => 2,
            MatchStatus::Closed => 0,
        }
    }
}

// =============================================================================
// MATCH RECORD
// =============================================================================

/// One wagered match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Creator-chosen seed used in address derivation.
    pub seed: u64,
    /// Short code; required on every operation after creation.
    pub code: String,
    /// Creator.
    pub player_a: Identity,
    /// Opponent, absent until joined.
    pub player_b: Option<Identity>,
    /// Stake each player deposits.
    pub bet_amount: Lamports,
    /// Advisory duration in seconds. Stored, never enforced.
    pub match_duration: u32,
    /// Unix seconds at creation.
    pub created_at: i64,
    /// Current state.
    pub status: MatchStatus,
    /// Vault bound to this record.
    pub vault: Address,
    /// Reserve lamports paid by the creator to store this record.
    pub rent: Lamports,
}

impl MatchRecord {
    /// Address this record lives at.
    pub fn address(&self) -> Address {
        address::match_address(self.seed, &self.code, &self.player_a)
    }

    /// Whether `code` re-derives this record's address.
    pub fn code_matches(&self, code: &str) -> bool {
        address::match_address(self.seed, code, &self.player_a) == self.address()
    }

    /// Whether `who` is one of the two participants.
    pub fn is_participant(&self, who: &Identity) -> bool {
        self.player_a == *who || self.player_b.as_ref() == Some(who)
    }

    /// Total stake the vault must hold in the current state.
    pub fn expected_vault_balance(&self) -> Result<Lamports, AmountError> {
        amount::mul(self.bet_amount, self.status.depositors())
    }

    /// Unix seconds after which the match is considered overdue.
    pub fn expires_at(&self) -> i64 {
        self.created_at.saturating_add(self.match_duration as i64)
    }

    /// Advisory expiry check. No transition depends on it.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at()
    }

    /// Check the status/participant pairing.
    pub fn players_consistent(&self) -> bool {
        match self.status {
            MatchStatus::Waiting => self.player_b.is_none(),
            MatchStatus::InProgress => self.player_b.is_some(),
            MatchStatus::Closed => false,
        }
    }

    /// Add to hasher (for the ledger state root).
    pub fn hash_into(&self, hasher: &mut LedgerHasher) {
        hasher.update_u64(self.seed);
        hasher.update_u32(self.code.len() as u32);
        hasher.update_bytes(self.code.as_bytes());
        hasher.update_key(self.player_a.as_bytes());
        hasher.update_opt_key(self.player_b.as_ref().map(|p| p.as_bytes()));
        hasher.update_u64(self.bet_amount);
        hasher.update_u32(self.match_duration);
        hasher.update_i64(self.created_at);
        hasher.update_u8(self.status as u8);
        hasher.update_key(self.vault.as_bytes());
        hasher.update_u64(self.rent);
    }
}

// =============================================================================
// VAULT
// =============================================================================

/// Escrow holding the stakes of exactly one match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Match record this vault is bound to.
    pub match_address: Address,
    /// Staked lamports currently held.
    pub balance: Lamports,
}

impl Vault {
    /// Empty vault for a match.
    pub fn new(match_address: Address) -> Self {
        Self {
            match_address,
            balance: 0,
        }
    }

    /// Add to hasher.
    pub fn hash_into(&self, hasher: &mut LedgerHasher) {
        hasher.update_key(self.match_address.as_bytes());
        hasher.update_u64(self.balance);
    }
}

// =============================================================================
// CONFIG + TREASURY
// =============================================================================

/// Protocol configuration. Created once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStore {
    /// Sole identity allowed to resolve matches and withdraw fees.
    pub authority: Identity,
    /// Address of the treasury account.
    pub treasury: Address,
}

impl ConfigStore {
    /// Capability check.
    pub fn is_authority(&self, who: &Identity) -> bool {
        self.authority == *who
    }
}

/// Accumulator of protocol fees.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryAccount {
    /// Treasury address.
    pub address: Address,
    /// Lamports held.
    pub balance: Lamports,
}

impl TreasuryAccount {
    /// Lamports above `reserve` that may be withdrawn right now.
    pub fn withdrawable(&self, reserve: Lamports) -> Lamports {
        self.balance.saturating_sub(reserve)
    }

    /// Add to hasher.
    pub fn hash_into(&self, hasher: &mut LedgerHasher) {
        hasher.update_key(self.address.as_bytes());
        hasher.update_u64(self.balance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: MatchStatus, player_b: Option<Identity>) -> MatchRecord {
        let player_a = Identity::new([1; 32]);
        let addr = address::match_address(5, "g1", &player_a);
        MatchRecord {
            seed: 5,
            code: "g1".into(),
            player_a,
            player_b,
            bet_amount: 100,
            match_duration: 600,
            created_at: 1_000,
            status,
            vault: address::vault_address(&addr),
            rent: 0,
        }
    }

    #[test]
    fn test_status_depositors() {
        assert_eq!(MatchStatus::Waiting.depositors(), 1);
        assert_eq!(MatchStatus::InProgress.depositors(), 2);
        assert_eq!(MatchStatus::Closed.depositors(), 0);
    }

    #[test]
    fn test_expected_vault_balance() {
        assert_eq!(record(MatchStatus::Waiting, None).expected_vault_balance(), Ok(100));
        let b = Some(Identity::new([2; 32]));
        assert_eq!(record(MatchStatus::InProgress, b).expected_vault_balance(), Ok(200));
    }

    #[test]
    fn test_players_consistent() {
        let b = Some(Identity::new([2; 32]));
        assert!(record(MatchStatus::Waiting, None).players_consistent());
        assert!(!record(MatchStatus::Waiting, b).players_consistent());
        assert!(record(MatchStatus::InProgress, b).players_consistent());
        assert!(!record(MatchStatus::InProgress, None).players_consistent());
    }

    #[test]
    fn test_participants() {
        let b = Identity::new([2; 32]);
        let r = record(MatchStatus::InProgress, Some(b));
        assert!(r.is_participant(&Identity::new([1; 32])));
        assert!(r.is_participant(&b));
        assert!(!r.is_participant(&Identity::new([3; 32])));
    }

    #[test]
    fn test_expiry_is_advisory_arithmetic() {
        let r = record(MatchStatus::Waiting, None);
        assert_eq!(r.expires_at(), 1_600);
        assert!(!r.is_expired(1_600));
        assert!(r.is_expired(1_601));
    }

    #[test]
    fn test_record_address_roundtrip() {
        let r = record(MatchStatus::Waiting, None);
        assert_eq!(r.vault, address::vault_address(&r.address()));
    }

    #[test]
    fn test_treasury_withdrawable() {
        let t = TreasuryAccount { address: address::treasury_address(), balance: 50 };
        assert_eq!(t.withdrawable(80), 0);
        let t = TreasuryAccount { balance: 130, ..t };
        assert_eq!(t.withdrawable(80), 50);
        assert_eq!(t.withdrawable(0), 130);
    }
}
