//! # Chess Escrow Server
//!
//! Custodial escrow for two-player wagered chess matches. Stakes are held in
//! per-match vaults and released only by a settlement transition.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CHESS ESCROW SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── address.rs  - Identities and derived addresses          │
//! │  ├── amount.rs   - Checked lamport arithmetic, rent          │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  escrow/         - Settlement logic (deterministic)          │
//! │  ├── state.rs    - Match record, vault, config, treasury     │
//! │  ├── fees.rs     - Fee policy and payout computation         │
//! │  ├── ledger.rs   - Keyed store with atomic transactions      │
//! │  ├── lifecycle.rs- create / join / resolve / cancel          │
//! │  ├── events.rs   - Events emitted per commit                 │
//! │  └── journal.rs  - Hash-chained commit log                   │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - JWT validation                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conservation Guarantee
//!
//! Every transition commits atomically or not at all, and a commit is
//! refused unless:
//! - Each vault holds exactly `bet_amount` times the number of depositors
//! - Total lamports across wallets, vaults and treasury are unchanged
//! - No record exists without its vault
//!
//! The `core/` and `escrow/` modules never read a clock; the caller
//! supplies `now`. Replaying the same operations yields the same state
//! root and journal head on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod escrow;
pub mod network;

// Re-export commonly used types
pub use core::address::{Address, Identity};
pub use core::amount::{Lamports, LAMPORTS_PER_UNIT};
pub use escrow::{EscrowConfig, EscrowError, EscrowEvent, Ledger, MatchRecord, MatchStatus, Receipt};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
