//! Escrow Events
//!
//! Emitted by each committed transition, in the order the transition
//! staged them. Events of a failed transition are discarded with it.

use serde::{Serialize, Deserialize};

use crate::core::address::{Address, Identity};
use crate::core::amount::Lamports;
use crate::escrow::fees::Settlement;

/// Destination of a closed record's storage rent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentRecipient {
    /// Swept into the treasury (settled by the authority).
    Treasury,
    /// Returned to the creator who paid it (cancelled).
    Creator(Identity),
}

/// Event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EscrowEvent {
    /// Config store and treasury created.
    ConfigInitialized {
        /// Identity that may resolve matches and withdraw fees.
        authority: Identity,
        /// Address of the config store.
        config: Address,
        /// Address of the fee treasury.
        treasury: Address,
    },

    /// Match created and first stake deposited.
    MatchCreated {
        /// Derived match address.
        match_address: Address,
        /// Vault holding the stakes.
        vault: Address,
        /// Creator.
        player_a: Identity,
        /// Stake per player.
        bet_amount: Lamports,
        /// Advisory duration in seconds.
        match_duration: u32,
        /// Creation time supplied by the caller, Unix seconds.
        created_at: i64,
    },

    /// Opponent joined and deposited.
    MatchJoined {
        /// Match joined.
        match_address: Address,
        /// Opponent.
        player_b: Identity,
        /// Vault balance after the second deposit.
        vault_balance: Lamports,
    },

    /// Vault split by a result or a cancellation.
    MatchSettled {
        /// Match settled.
        match_address: Address,
        /// Payouts and fee taken from the vault.
        settlement: Settlement,
        /// Where the record's rent went.
        rent_recipient: RentRecipient,
        /// Rent released with the record.
        rent: Lamports,
    },

    /// Match record and vault removed from the ledger.
    MatchClosed {
        /// Now-tombstoned match address.
        match_address: Address,
    },

    /// Treasury fees withdrawn by the authority.
    TreasuryWithdrawn {
        /// Recipient of the withdrawal.
        authority: Identity,
        /// Lamports moved out.
        amount: Lamports,
        /// Treasury balance left behind.
        remaining: Lamports,
    },
}

impl EscrowEvent {
    /// Match this event concerns, if any.
    pub fn match_address(&self) -> Option<Address> {
        match self {
            EscrowEvent::MatchCreated { match_address, .. }
            | EscrowEvent::MatchJoined { match_address, .. }
            | EscrowEvent::MatchSettled { match_address, .. }
            | EscrowEvent::MatchClosed { match_address } => Some(*match_address),
            EscrowEvent::ConfigInitialized { .. } | EscrowEvent::TreasuryWithdrawn { .. } => None,
        }
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            EscrowEvent::ConfigInitialized { .. } => "config_initialized",
            EscrowEvent::MatchCreated { .. } => "match_created",
            EscrowEvent::MatchJoined { .. } => "match_joined",
            EscrowEvent::MatchSettled { .. } => "match_settled",
            EscrowEvent::MatchClosed { .. } => "match_closed",
            EscrowEvent::TreasuryWithdrawn { .. } => "treasury_withdrawn",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_address_extraction() {
        let addr = Address::new([4; 32]);
        assert_eq!(EscrowEvent::MatchClosed { match_address: addr }.match_address(), Some(addr));

        let ev = EscrowEvent::TreasuryWithdrawn {
            authority: Identity::new([1; 32]),
            amount: 5,
            remaining: 0,
        };
        assert_eq!(ev.match_address(), None);
        assert_eq!(ev.name(), "treasury_withdrawn");
    }

    #[test]
    fn test_event_json_is_tagged() {
        let ev = EscrowEvent::MatchClosed { match_address: Address::new([0; 32]) };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "match_closed");
    }
}
