//! Escrow Errors
//!
//! Every error aborts the whole transition. Nothing is partially applied.

use thiserror::Error;

use crate::core::amount::{AmountError, Lamports};
use crate::core::address::Address;
use crate::escrow::state::MatchStatus;

/// Errors returned by escrow operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    /// Caller lacks the capability the operation requires.
    #[error("unauthorized caller")]
    Unauthorized,

    /// Operation is not allowed from the match's current state.
    #[error("invalid match state: {0:?}")]
    InvalidState(MatchStatus),

    /// A match record already exists at the derived address.
    #[error("match already exists at {0:?}")]
    DuplicateMatch(Address),

    /// The config store has already been created.
    #[error("config already initialized")]
    AlreadyInitialized,

    /// The config store has not been created yet.
    #[error("config not initialized")]
    ConfigNotInitialized,

    /// Reported winner is neither participant.
    #[error("winner is not a participant in this match")]
    UnknownWinner,

    /// Malformed stake, duration, or code.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Payer cannot cover the deposit.
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds {
        /// Lamports required.
        needed: Lamports,
        /// Lamports available.
        available: Lamports,
    },

    /// The creator tried to join their own match.
    #[error("player cannot join their own match")]
    SelfJoin,

    /// No match record at the given address.
    #[error("match not found: {0:?}")]
    MatchNotFound(Address),

    /// Code does not re-derive the presented match address.
    #[error("match code does not match address")]
    CodeMismatch,

    /// Lamport arithmetic failed.
    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] AmountError),

    /// A ledger invariant would be broken by committing.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Result alias for escrow operations.
pub type EscrowResult<T> = Result<T, EscrowError>;
