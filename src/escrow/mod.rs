//! Escrow Layer
//!
//! Match records, vaults, fees and the transitions between them. Every
//! transition runs as one atomic `Ledger::execute` transaction; nothing
//! here reads the clock or touches the network.

pub mod error;
pub mod events;
pub mod fees;
pub mod journal;
pub mod ledger;
pub mod lifecycle;
pub mod state;

pub use error::{EscrowError, EscrowResult};
pub use events::{EscrowEvent, RentRecipient};
pub use fees::{FeePolicy, FeeTier, Payout, Settlement, SettlementKind};
pub use journal::{Journal, JournalEntry};
pub use ledger::{Ledger, Receipt, Transaction};
pub use lifecycle::{
    cancel_match, create_match, init_config, join_match, resolve_match, withdraw_from_treasury,
    ConfigError, CreateMatch, EscrowConfig,
};
pub use state::{ConfigStore, MatchRecord, MatchStatus, TreasuryAccount, Vault};
