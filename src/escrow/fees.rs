//! Fee Policy and Settlement Math
//!
//! Pure functions from a match record to the exact lamport split.
//! The protocol fee is always whatever stays in the vault after the
//! payouts, so rounding remainders go to the treasury and nothing is
//! ever stranded in a destroyed vault.

use serde::{Serialize, Deserialize};

use crate::core::address::Identity;
use crate::core::amount::{self, Lamports, BPS_DENOMINATOR, LAMPORTS_PER_UNIT};
use crate::escrow::error::{EscrowError, EscrowResult};
use crate::escrow::state::{MatchRecord, MatchStatus};

/// Win fee applied up to (and including) a per-player bet size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    /// Largest per-player bet this tier covers. `None` = unbounded.
    pub max_bet: Option<Lamports>,
    /// Fee on the pot, in basis points.
    pub bps: u64,
}

/// Fee rates for every settlement path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Win fee tiers, ascending by `max_bet`, last one unbounded.
    pub win_tiers: Vec<FeeTier>,
    /// Fee on each player's stake when a match is drawn.
    pub draw_fee_bps: u64,
    /// Fee on each player's stake when an in-progress match is cancelled.
    pub cancel_in_progress_fee_bps: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::flat()
    }
}

impl FeePolicy {
    /// 0.5% of the pot on a win, 1% of each stake on a draw or a
    /// cancellation after joining.
    pub fn flat() -> Self {
        Self {
            win_tiers: vec![FeeTier { max_bet: None, bps: 50 }],
            draw_fee_bps: 100,
            cancel_in_progress_fee_bps: 100,
        }
    }

    /// Stake-dependent win fee: 0.5% up to 1 unit per player, 1% up to
    /// 5 units, 1.5% above.
    pub fn tiered() -> Self {
        Self {
            win_tiers: vec![
                FeeTier { max_bet: Some(LAMPORTS_PER_UNIT), bps: 50 },
                FeeTier { max_bet: Some(5 * LAMPORTS_PER_UNIT), bps: 100 },
                FeeTier { max_bet: None, bps: 150 },
            ],
            ..Self::flat()
        }
    }

    /// Check rates are within 0..=100% and tiers are well formed.
    pub fn validate(&self) -> Result<(), String> {
        if self.win_tiers.is_empty() {
            return Err("at least one win tier required".into());
        }
        let mut prev: Option<Lamports> = None;
        for (i, tier) in self.win_tiers.iter().enumerate() {
            if tier.bps > BPS_DENOMINATOR {
                return Err(format!("win tier {} exceeds 100%", i));
            }
            let last = i + 1 == self.win_tiers.len();
            match (tier.max_bet, last) {
                (None, false) => return Err(format!("win tier {} is unbounded but not last", i)),
                (Some(_), true) => return Err("last win tier must be unbounded".into()),
                (Some(max), false) => {
                    if prev.is_some_and(|p| max <= p) {
                        return Err(format!("win tier {} is not ascending", i));
                    }
                    prev = Some(max);
                }
                (None, true) => {}
            }
        }
        if self.draw_fee_bps > BPS_DENOMINATOR {
            return Err("draw fee exceeds 100%".into());
        }
        if self.cancel_in_progress_fee_bps > BPS_DENOMINATOR {
            return Err("cancel fee exceeds 100%".into());
        }
        Ok(())
    }

    /// Win fee rate for a per-player bet.
    pub fn win_fee_bps(&self, bet: Lamports) -> u64 {
        self.win_tiers
            .iter()
            .find(|t| t.max_bet.map_or(true, |max| bet <= max))
            .map(|t| t.bps)
            .unwrap_or(0)
    }
}

// =============================================================================
// SETTLEMENT
// =============================================================================

/// How a vault is being emptied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementKind {
    /// Authority reported a winner.
    Win {
        /// Winning player.
        winner: Identity,
    },
    /// Authority reported a draw.
    Draw,
    /// Creator cancelled before anyone joined.
    CancelWaiting,
    /// A participant cancelled after both deposited.
    CancelInProgress,
}

/// Lamports sent to one participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Recipient.
    pub recipient: Identity,
    /// Amount.
    pub amount: Lamports,
}

/// Exact split of a vault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Settlement path.
    pub kind: SettlementKind,
    /// Stake the vault holds before the split.
    pub vault_balance: Lamports,
    /// Participant payouts.
    pub payouts: Vec<Payout>,
    /// Credited to the treasury.
    pub fee: Lamports,
}

impl Settlement {
    /// Sum of participant payouts.
    pub fn total_paid(&self) -> EscrowResult<Lamports> {
        self.payouts
            .iter()
            .try_fold(0, |acc, p| amount::add(acc, p.amount))
            .map_err(EscrowError::from)
    }

    /// `fee + Σ payouts == vault_balance`.
    pub fn is_conserved(&self) -> bool {
        self.total_paid()
            .ok()
            .and_then(|paid| paid.checked_add(self.fee))
            == Some(self.vault_balance)
    }

    /// Amount paid to `who`, zero if not a recipient.
    pub fn paid_to(&self, who: &Identity) -> Lamports {
        self.payouts
            .iter()
            .filter(|p| p.recipient == *who)
            .map(|p| p.amount)
            .sum()
    }

    fn from_payouts(kind: SettlementKind, vault_balance: Lamports, payouts: Vec<Payout>) -> EscrowResult<Self> {
        let mut settlement = Self { kind, vault_balance, payouts, fee: 0 };
        settlement.fee = amount::sub(vault_balance, settlement.total_paid()?)?;
        Ok(settlement)
    }
}

fn require_status(record: &MatchRecord, status: MatchStatus) -> EscrowResult<()> {
    if record.status != status {
        return Err(EscrowError::InvalidState(record.status));
    }
    Ok(())
}

fn opponent(record: &MatchRecord) -> EscrowResult<Identity> {
    record
        .player_b
        .ok_or_else(|| EscrowError::InvariantViolation("in-progress match without player_b".into()))
}

/// Split for a decisive result.
pub fn settle_win(record: &MatchRecord, winner: &Identity, policy: &FeePolicy) -> EscrowResult<Settlement> {
    require_status(record, MatchStatus::InProgress)?;
    let player_b = opponent(record)?;
    if *winner != record.player_a && *winner != player_b {
        return Err(EscrowError::UnknownWinner);
    }

    let pot = amount::mul(record.bet_amount, 2)?;
    let fee = amount::bps_of(pot, policy.win_fee_bps(record.bet_amount))?;
    let payout = Payout { recipient: *winner, amount: amount::sub(pot, fee)? };

    Settlement::from_payouts(SettlementKind::Win { winner: *winner }, pot, vec![payout])
}

/// Split for a draw.
pub fn settle_draw(record: &MatchRecord, policy: &FeePolicy) -> EscrowResult<Settlement> {
    require_status(record, MatchStatus::InProgress)?;
    let player_b = opponent(record)?;
    let pot = amount::mul(record.bet_amount, 2)?;
    let refund = amount::sub(record.bet_amount, amount::bps_of(record.bet_amount, policy.draw_fee_bps)?)?;

    Settlement::from_payouts(
        SettlementKind::Draw,
        pot,
        vec![
            Payout { recipient: record.player_a, amount: refund },
            Payout { recipient: player_b, amount: refund },
        ],
    )
}

/// Split for a cancellation, chosen by the record's state.
pub fn settle_cancel(record: &MatchRecord, policy: &FeePolicy) -> EscrowResult<Settlement> {
    match record.status {
        MatchStatus::Waiting => Settlement::from_payouts(
            SettlementKind::CancelWaiting,
            record.bet_amount,
            vec![Payout { recipient: record.player_a, amount: record.bet_amount }],
        ),
        MatchStatus::InProgress => {
            let player_b = opponent(record)?;
            let pot = amount::mul(record.bet_amount, 2)?;
            let penalty = amount::bps_of(record.bet_amount, policy.cancel_in_progress_fee_bps)?;
            let refund = amount::sub(record.bet_amount, penalty)?;

            Settlement::from_payouts(
                SettlementKind::CancelInProgress,
                pot,
                vec![
                    Payout { recipient: record.player_a, amount: refund },
                    Payout { recipient: player_b, amount: refund },
                ],
            )
        }
        MatchStatus::Closed => Err(EscrowError::InvalidState(MatchStatus::Closed)),
    }
}
