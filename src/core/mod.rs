//! Core deterministic primitives.
//!
//! Nothing in this module reads a clock, touches the network, or iterates
//! a HashMap. Address derivation here must stay bit-exact across releases.

pub mod address;
pub mod amount;
pub mod hash;

// Re-export core types
pub use address::{Address, Identity};
pub use amount::{Lamports, RentSchedule, LAMPORTS_PER_UNIT, BPS_DENOMINATOR};
pub use hash::{LedgerHash, LedgerHasher, compute_ledger_hash};
