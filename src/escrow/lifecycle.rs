//! Match Lifecycle
//!
//! The escrow state machine. Every public function here is one atomic
//! ledger transaction:
//!
//! ```text
//!            create             join              resolve
//!   (none) ─────────▶ Waiting ───────▶ InProgress ─────────▶ Closed
//!                        │                  │
//!                        └──── cancel ──────┴──── cancel ───▶ Closed
//! ```
//!
//! `Closed` records are deleted; their address is tombstoned so no later
//! operation on the same `(seed, code, creator)` can succeed.

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::core::address::{self, Address, Identity};
use crate::core::amount::{self, format_units, Lamports, RentSchedule};
use crate::escrow::error::{EscrowError, EscrowResult};
use crate::escrow::events::{EscrowEvent, RentRecipient};
use crate::escrow::fees::{self, FeePolicy, Settlement};
use crate::escrow::ledger::{Ledger, Receipt, Transaction};
use crate::escrow::state::{ConfigStore, MatchRecord, MatchStatus, TreasuryAccount, Vault};

/// Default upper bound on `match_duration` (one day, in seconds).
pub const DEFAULT_MAX_MATCH_DURATION: u32 = 86_400;

/// Configuration for settlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Fee rates.
    pub fees: FeePolicy,
    /// Storage reserve schedule.
    pub rent: RentSchedule,
    /// Largest accepted `match_duration`, in seconds.
    pub max_match_duration: u32,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            fees: FeePolicy::default(),
            rent: RentSchedule::default(),
            max_match_duration: DEFAULT_MAX_MATCH_DURATION,
        }
    }
}

impl EscrowConfig {
    /// Create config from environment variables.
    ///
    /// - `ESCROW_FEE_SCHEDULE`: `flat` (default) or `tiered`
    /// - `ESCROW_CANCEL_FEE_BPS`: penalty on each stake for in-progress cancels
    /// - `ESCROW_MAX_MATCH_DURATION`: seconds
    ///
    /// Unset variables keep their defaults. A variable that is set but does
    /// not parse is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup (`from_env` reads the process env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut fees = match lookup("ESCROW_FEE_SCHEDULE").as_deref() {
            None | Some("flat") => FeePolicy::flat(),
            Some("tiered") => FeePolicy::tiered(),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "ESCROW_FEE_SCHEDULE",
                    value: other.to_string(),
                    expected: "`flat` or `tiered`",
                })
            }
        };
        if let Some(bps) = parse_var(&lookup, "ESCROW_CANCEL_FEE_BPS", "basis points")? {
            fees.cancel_in_progress_fee_bps = bps;
        }
        let max_match_duration = parse_var(&lookup, "ESCROW_MAX_MATCH_DURATION", "seconds as u32")?
            .unwrap_or(DEFAULT_MAX_MATCH_DURATION);

        Ok(Self { fees, rent: RentSchedule::default(), max_match_duration })
    }

    /// Check the config is usable.
    pub fn validate(&self) -> Result<(), String> {
        self.fees.validate()?;
        if self.max_match_duration == 0 {
            return Err("max match duration must be positive".into());
        }
        Ok(())
    }
}

/// Rejected escrow environment setting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable is set to something unusable.
    #[error("{key}={value:?} is invalid, expected {expected}")]
    Invalid {
        /// Environment variable name.
        key: &'static str,
        /// Raw value found.
        value: String,
        /// What would have been accepted.
        expected: &'static str,
    },
}

fn parse_var<F, T>(lookup: &F, key: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw, expected }),
    }
}

/// Parameters of `create_match`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMatch {
    /// Derivation seed.
    pub seed: u64,
    /// Match code (1..=32 bytes).
    pub code: String,
    /// Advisory duration in seconds.
    pub match_duration: u32,
    /// Stake per player.
    pub bet_amount: Lamports,
}

// =============================================================================
// CONFIG + TREASURY
// =============================================================================

/// Create the config store and treasury. One time only.
#[instrument(skip(ledger))]
pub fn init_config(ledger: &mut Ledger, authority: Identity) -> EscrowResult<Receipt> {
    let ((), receipt) = ledger.execute(|tx| {
        if tx.config().is_some() {
            return Err(EscrowError::AlreadyInitialized);
        }

        let treasury = address::treasury_address();
        tx.put_config(ConfigStore { authority, treasury });
        tx.put_treasury(TreasuryAccount {
            address: treasury,
            balance: 0,
        });
        tx.emit(EscrowEvent::ConfigInitialized {
            authority,
            config: address::config_address(),
            treasury,
        });
        Ok(())
    })?;

    info!("Config initialized, authority {}", authority.short());
    Ok(receipt)
}

/// Move the treasury balance above `config.rent.treasury_reserve()` to the
/// authority.
#[instrument(skip(ledger, config))]
pub fn withdraw_from_treasury(
    ledger: &mut Ledger,
    config: &EscrowConfig,
    caller: Identity,
) -> EscrowResult<(Lamports, Receipt)> {
    let (withdrawn, receipt) = ledger.execute(|tx| {
        let store = tx.require_config()?;
        if !store.is_authority(&caller) {
            return Err(EscrowError::Unauthorized);
        }

        let mut treasury = tx.treasury().ok_or(EscrowError::ConfigNotInitialized)?;
        let withdrawn = treasury.withdrawable(config.rent.treasury_reserve());
        treasury.balance = amount::sub(treasury.balance, withdrawn)?;
        let remaining = treasury.balance;
        tx.put_treasury(treasury);
        tx.credit(&caller, withdrawn)?;

        tx.emit(EscrowEvent::TreasuryWithdrawn { authority: caller, amount: withdrawn, remaining });
        Ok(withdrawn)
    })?;

    info!("Treasury withdrawal of {} to {}", format_units(withdrawn), caller.short());
    Ok((withdrawn, receipt))
}

// =============================================================================
// MATCH TRANSITIONS
// =============================================================================

/// Fetch a live match, checking the presented code.
fn load_match(tx: &Transaction<'_>, match_address: &Address, code: &str) -> EscrowResult<MatchRecord> {
    if tx.is_closed(match_address) {
        return Err(EscrowError::InvalidState(MatchStatus::Closed));
    }
    let record = tx
        .match_record(match_address)
        .ok_or(EscrowError::MatchNotFound(*match_address))?;
    if !record.code_matches(code) {
        return Err(EscrowError::CodeMismatch);
    }
    Ok(record)
}

/// Create a match and deposit the creator's stake.
///
/// The creator also pays the record's storage rent, returned on cancel.
#[instrument(skip(ledger, config))]
pub fn create_match(
    ledger: &mut Ledger,
    config: &EscrowConfig,
    creator: Identity,
    params: CreateMatch,
    now: i64,
) -> EscrowResult<(Address, Receipt)> {
    let (match_address, receipt) = ledger.execute(|tx| {
        tx.require_config()?;

        if params.bet_amount == 0 {
            return Err(EscrowError::InvalidParameters("bet amount must be positive".into()));
        }
        if params.match_duration == 0 || params.match_duration > config.max_match_duration {
            return Err(EscrowError::InvalidParameters(format!(
                "match duration must be 1..={} seconds",
                config.max_match_duration
            )));
        }
        if !address::is_valid_code(&params.code) {
            return Err(EscrowError::InvalidParameters(format!(
                "code must be 1..={} bytes",
                address::MAX_CODE_LEN
            )));
        }

        let match_address = address::match_address(params.seed, &params.code, &creator);
        if tx.match_record(&match_address).is_some() || tx.is_closed(&match_address) {
            return Err(EscrowError::DuplicateMatch(match_address));
        }

        let rent = config.rent.match_record_rent();
        tx.debit(&creator, amount::add(params.bet_amount, rent)?)?;

        let vault_address = address::vault_address(&match_address);
        let mut vault = Vault::new(match_address);
        vault.balance = params.bet_amount;
        tx.put_vault(vault_address, vault);

        tx.put_match(match_address, MatchRecord {
            seed: params.seed,
            code: params.code.clone(),
            player_a: creator,
            player_b: None,
            bet_amount: params.bet_amount,
            match_duration: params.match_duration,
            created_at: now,
            status: MatchStatus::Waiting,
            vault: vault_address,
            rent,
        });

        tx.emit(EscrowEvent::MatchCreated {
            match_address,
            vault: vault_address,
            player_a: creator,
            bet_amount: params.bet_amount,
            match_duration: params.match_duration,
            created_at: now,
        });
        Ok(match_address)
    })?;

    info!(
        "Match {} created by {} with stake {}",
        match_address.short(),
        creator.short(),
        format_units(params.bet_amount)
    );
    Ok((match_address, receipt))
}

/// Join a waiting match and deposit the matching stake.
#[instrument(skip(ledger))]
pub fn join_match(
    ledger: &mut Ledger,
    joiner: Identity,
    match_address: Address,
    code: &str,
) -> EscrowResult<Receipt> {
    let ((), receipt) = ledger.execute(|tx| {
        tx.require_config()?;
        let mut record = load_match(tx, &match_address, code)?;

        if record.status != MatchStatus::Waiting {
            return Err(EscrowError::InvalidState(record.status));
        }
        if record.player_a == joiner {
            return Err(EscrowError::SelfJoin);
        }

        let mut vault = tx
            .vault(&record.vault)
            .ok_or_else(|| EscrowError::InvariantViolation("match without vault".into()))?;

        tx.debit(&joiner, record.bet_amount)?;
        vault.balance = amount::add(vault.balance, record.bet_amount)?;
        let vault_balance = vault.balance;
        tx.put_vault(record.vault, vault);

        record.player_b = Some(joiner);
        record.status = MatchStatus::InProgress;
        tx.put_match(match_address, record);

        tx.emit(EscrowEvent::MatchJoined { match_address, player_b: joiner, vault_balance });
        Ok(())
    })?;

    info!("Player {} joined match {}", joiner.short(), match_address.short());
    Ok(receipt)
}

/// Settle an in-progress match with the authority's reported result.
///
/// `winner = None` is a draw.
#[instrument(skip(ledger, config))]
pub fn resolve_match(
    ledger: &mut Ledger,
    config: &EscrowConfig,
    caller: Identity,
    match_address: Address,
    code: &str,
    winner: Option<Identity>,
) -> EscrowResult<(Settlement, Receipt)> {
    let (settlement, receipt) = ledger.execute(|tx| {
        let store = tx.require_config()?;
        if !store.is_authority(&caller) {
            return Err(EscrowError::Unauthorized);
        }

        let record = load_match(tx, &match_address, code)?;
        if record.status != MatchStatus::InProgress {
            return Err(EscrowError::InvalidState(record.status));
        }

        let settlement = match winner {
            Some(winner) => fees::settle_win(&record, &winner, &config.fees)?,
            None => fees::settle_draw(&record, &config.fees)?,
        };

        apply_settlement(tx, &match_address, &record, &settlement, RentRecipient::Treasury)?;
        Ok(settlement)
    })?;

    match winner {
        Some(winner) => info!(
            "Match {} won by {}: payout {}, fee {}",
            match_address.short(),
            winner.short(),
            format_units(settlement.paid_to(&winner)),
            format_units(settlement.fee)
        ),
        None => info!("Match {} drawn, fee {}", match_address.short(), format_units(settlement.fee)),
    }
    Ok((settlement, receipt))
}

/// Cancel a match and refund stakes.
///
/// From `Waiting` only the creator may cancel and gets a full refund.
/// From `InProgress` either participant may cancel; both refunds carry
/// the configured penalty, credited to the treasury.
#[instrument(skip(ledger, config))]
pub fn cancel_match(
    ledger: &mut Ledger,
    config: &EscrowConfig,
    initiator: Identity,
    match_address: Address,
    code: &str,
) -> EscrowResult<(Settlement, Receipt)> {
    let (settlement, receipt) = ledger.execute(|tx| {
        tx.require_config()?;
        let record = load_match(tx, &match_address, code)?;

        let has_standing = match record.status {
            MatchStatus::Waiting => record.player_a == initiator,
            MatchStatus::InProgress => record.is_participant(&initiator),
            MatchStatus::Closed => return Err(EscrowError::InvalidState(MatchStatus::Closed)),
        };
        if !has_standing {
            return Err(EscrowError::Unauthorized);
        }

        let settlement = fees::settle_cancel(&record, &config.fees)?;
        apply_settlement(
            tx,
            &match_address,
            &record,
            &settlement,
            RentRecipient::Creator(record.player_a),
        )?;
        Ok(settlement)
    })?;

    info!(
        "Match {} cancelled by {}, fee {}",
        match_address.short(),
        initiator.short(),
        format_units(settlement.fee)
    );
    Ok((settlement, receipt))
}

/// Empty the vault per `settlement`, then delete record and vault.
fn apply_settlement(
    tx: &mut Transaction<'_>,
    match_address: &Address,
    record: &MatchRecord,
    settlement: &Settlement,
    rent_to: RentRecipient,
) -> EscrowResult<()> {
    let vault = tx
        .vault(&record.vault)
        .ok_or_else(|| EscrowError::InvariantViolation("match without vault".into()))?;
    if vault.balance != settlement.vault_balance {
        return Err(EscrowError::InvariantViolation(format!(
            "vault holds {}, settlement expects {}",
            vault.balance, settlement.vault_balance
        )));
    }
    if !settlement.is_conserved() {
        return Err(EscrowError::InvariantViolation("settlement does not conserve stake".into()));
    }

    for payout in &settlement.payouts {
        tx.credit(&payout.recipient, payout.amount)?;
    }
    tx.credit_treasury(settlement.fee)?;

    match rent_to {
        RentRecipient::Creator(identity) => tx.credit(&identity, record.rent)?,
        RentRecipient::Treasury => tx.credit_treasury(record.rent)?,
    }

    tx.close_match(*match_address, record.vault);
    tx.emit(EscrowEvent::MatchSettled {
        match_address: *match_address,
        settlement: settlement.clone(),
        rent_recipient: rent_to,
        rent: record.rent,
    });
    tx.emit(EscrowEvent::MatchClosed { match_address: *match_address });
    Ok(())
}
