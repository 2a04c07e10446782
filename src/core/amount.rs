//! Lamport Arithmetic
//!
//! All value in the ledger is counted in integer lamports. Every operation
//! here is checked: an overflow is an error, never a wrap.
//!
//! ## Basis points
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  fee = amount * bps / 10_000     (floor division)           │
//! │                                                             │
//! │   50 bps = 0.5%   ->  2 units pot  = 0.01 unit fee          │
//! │  100 bps = 1.0%   ->  1 unit stake = 0.01 unit fee          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `amount * 50 / 10_000` is exactly `amount / 200` for every u64 amount
//! (both are floor divisions of the same rational), so the basis-point
//! form reproduces the "pot / 200" rule bit for bit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Amount of value, in lamports.
pub type Lamports = u64;

/// Lamports in one whole unit of the native token.
pub const LAMPORTS_PER_UNIT: Lamports = 1_000_000_000;

/// Basis-point denominator (100%).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Arithmetic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AmountError {
    /// Addition or multiplication exceeded u64.
    #[error("lamport arithmetic overflow")]
    Overflow,
    /// Subtraction went below zero.
    #[error("lamport arithmetic underflow")]
    Underflow,
}

/// Checked addition.
#[inline]
pub fn add(a: Lamports, b: Lamports) -> Result<Lamports, AmountError> {
    a.checked_add(b).ok_or(AmountError::Overflow)
}

/// Checked subtraction.
#[inline]
pub fn sub(a: Lamports, b: Lamports) -> Result<Lamports, AmountError> {
    a.checked_sub(b).ok_or(AmountError::Underflow)
}

/// Checked multiplication.
#[inline]
pub fn mul(a: Lamports, b: u64) -> Result<Lamports, AmountError> {
    a.checked_mul(b).ok_or(AmountError::Overflow)
}

/// `amount * bps / 10_000`, floored.
///
/// Computed in u128 so large stakes cannot overflow the intermediate.
#[inline]
pub fn bps_of(amount: Lamports, bps: u64) -> Result<Lamports, AmountError> {
    let scaled = (amount as u128) * (bps as u128) / (BPS_DENOMINATOR as u128);
    u64::try_from(scaled).map_err(|_| AmountError::Overflow)
}

/// Whole units to lamports.
#[inline]
pub const fn units(n: u64) -> Lamports {
    n * LAMPORTS_PER_UNIT
}

/// Render lamports as a decimal unit string for logs (`1.990000000`).
pub fn format_units(amount: Lamports) -> String {
    format!(
        "{}.{:09}",
        amount / LAMPORTS_PER_UNIT,
        amount % LAMPORTS_PER_UNIT
    )
}

// =============================================================================
// RENT
// =============================================================================

/// Per-account storage overhead counted by the rent schedule, in bytes.
pub const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Bytes of serialized match record charged rent.
///
/// 8 discriminator + 8 seed + 8 bet + 4 duration + 32 player_a
/// + 33 player_b + 8 created_at + 33 winner + 1 status + 2 bumps.
pub const MATCH_RECORD_SPACE: u64 = 137;

/// Rent schedule for storing records in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentSchedule {
    /// Lamports per byte per year.
    pub lamports_per_byte_year: u64,
    /// Years of rent that make an account exempt.
    pub exemption_threshold: u64,
}

impl Default for RentSchedule {
    fn default() -> Self {
        Self {
            lamports_per_byte_year: 3480,
            exemption_threshold: 2,
        }
    }
}

impl RentSchedule {
    /// Minimum balance an account of `data_len` bytes must hold.
    pub fn minimum_balance(&self, data_len: u64) -> Lamports {
        (ACCOUNT_STORAGE_OVERHEAD + data_len)
            .saturating_mul(self.lamports_per_byte_year)
            .saturating_mul(self.exemption_threshold)
    }

    /// Rent held by a match record.
    pub fn match_record_rent(&self) -> Lamports {
        self.minimum_balance(MATCH_RECORD_SPACE)
    }

    /// Floor the treasury never withdraws below.
    pub fn treasury_reserve(&self) -> Lamports {
        self.minimum_balance(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bps_matches_division_rules() {
        let pot = units(2);
        assert_eq!(bps_of(pot, 50).unwrap(), pot / 200);
        assert_eq!(bps_of(pot, 50).unwrap(), 10_000_000);

        let bet = units(1);
        assert_eq!(bps_of(bet, 100).unwrap(), bet / 100);
    }

    #[test]
    fn test_checked_ops() {
        assert_eq!(add(1, 2), Ok(3));
        assert_eq!(add(u64::MAX, 1), Err(AmountError::Overflow));
        assert_eq!(sub(1, 2), Err(AmountError::Underflow));
        assert_eq!(mul(u64::MAX, 2), Err(AmountError::Overflow));
    }

    #[test]
    fn test_bps_of_large_amount_does_not_overflow() {
        assert_eq!(bps_of(u64::MAX, BPS_DENOMINATOR).unwrap(), u64::MAX);
        assert_eq!(bps_of(u64::MAX, 50).unwrap(), u64::MAX / 200);
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(units(1)), "1.000000000");
        assert_eq!(format_units(1_990_000_000), "1.990000000");
        assert_eq!(format_units(5), "0.000000005");
    }

    #[test]
    fn test_rent_schedule_defaults() {
        let rent = RentSchedule::default();
        assert_eq!(rent.treasury_reserve(), 890_880);
        assert_eq!(rent.match_record_rent(), (128 + 137) * 3480 * 2);
    }

    proptest! {
        #[test]
        fn prop_fifty_bps_is_div_200(amount in any::<u64>()) {
            prop_assert_eq!(bps_of(amount, 50).unwrap(), amount / 200);
        }

        #[test]
        fn prop_hundred_bps_is_div_100(amount in any::<u64>()) {
            prop_assert_eq!(bps_of(amount, 100).unwrap(), amount / 100);
        }
    }
}
