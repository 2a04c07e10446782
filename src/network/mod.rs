//! Network Layer
//!
//! WebSocket server in front of the escrow ledger.
//! This layer is **non-deterministic**: it reads the clock and accepts
//! connections. All value movement runs through `escrow/`.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{authenticate, AuthConfig, AuthError, Caller, Role, TokenClaims};
pub use protocol::{ClientMessage, ServerMessage, ServerError, ErrorCode, MatchInfo, ReceiptInfo};
pub use server::{bootstrap_authority, load_genesis, EscrowServer, EscrowServerError, EscrowService, ServerConfig, Session};
