//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON text frames tagged by `type`. Identities and
//! addresses travel as lowercase hex strings.

use serde::{Serialize, Deserialize};

use crate::core::address::{Address, Identity};
use crate::core::amount::Lamports;
use crate::escrow::{EscrowError, EscrowEvent, MatchRecord, MatchStatus, Receipt};
use crate::network::auth::Role;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
///
/// Every mutating request acts as the identity bound by `auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with the server.
    Auth(AuthRequest),

    /// Create the config store with the caller as authority. Only the
    /// identity pinned by `ESCROW_AUTHORITY` may send it.
    InitConfig,

    /// Create a match and deposit the first stake.
    CreateMatch(CreateMatchRequest),

    /// Join a waiting match.
    JoinMatch {
        /// Match to join.
        match_address: Address,
        /// Code the creator shared.
        code: String,
    },

    /// Report a result (authority only). No winner means a draw.
    ResolveMatch {
        /// Match to settle.
        match_address: Address,
        /// Match code.
        code: String,
        /// Winning player, absent for a draw.
        #[serde(default)]
        winner: Option<Identity>,
    },

    /// Cancel a match and refund stakes.
    CancelMatch {
        /// Match to cancel.
        match_address: Address,
        /// Match code.
        code: String,
    },

    /// Withdraw accumulated fees (authority only).
    WithdrawTreasury,

    /// Look up a live match.
    GetMatch {
        /// Match to look up.
        match_address: Address,
    },

    /// Caller's wallet balance.
    GetBalance,

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back in `pong`.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT from the auth provider.
    pub token: String,
    /// Client version for compatibility check.
    #[serde(default)]
    pub client_version: String,
}

/// Parameters of a new match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMatchRequest {
    /// Derivation seed.
    pub seed: u64,
    /// Match code shared with the opponent.
    pub code: String,
    /// Advisory duration in seconds.
    #[serde(alias = "duration")]
    pub match_duration: u32,
    /// Stake per player, in lamports.
    pub bet_amount: Lamports,
}

impl ClientMessage {
    /// Whether the message changes ledger state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ClientMessage::InitConfig
                | ClientMessage::CreateMatch(_)
                | ClientMessage::JoinMatch { .. }
                | ClientMessage::ResolveMatch { .. }
                | ClientMessage::CancelMatch { .. }
                | ClientMessage::WithdrawTreasury
        )
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// A committed transaction. Sent to the caller and broadcast to
    /// every other connection.
    Receipt(ReceiptInfo),

    /// Match lookup result.
    MatchInfo(MatchInfo),

    /// Wallet balance.
    Balance {
        /// Wallet owner (the caller).
        identity: Identity,
        /// Spendable lamports.
        lamports: Lamports,
    },

    /// Pong response.
    Pong {
        /// Echo of the ping's `timestamp`.
        timestamp: u64,
        /// Server clock, Unix milliseconds.
        server_time: i64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Human-readable cause.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Session ID if successful.
    pub session_id: Option<String>,
    /// Identity the connection now acts as.
    pub identity: Option<Identity>,
    /// Whether the connection is the escrow authority or a player.
    #[serde(default)]
    pub role: Option<Role>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Committed transaction as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptInfo {
    /// Journal sequence number.
    pub sequence: u64,
    /// Events in emission order.
    pub events: Vec<EscrowEvent>,
    /// Ledger state root after commit (hex).
    pub state_hash: String,
}

impl From<&Receipt> for ReceiptInfo {
    fn from(receipt: &Receipt) -> Self {
        Self {
            sequence: receipt.sequence,
            events: receipt.events.clone(),
            state_hash: hex::encode(receipt.state_hash),
        }
    }
}

/// Public view of a live match. The code is withheld.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInfo {
    /// Record address.
    pub match_address: Address,
    /// Creator.
    pub player_a: Identity,
    /// Opponent, if joined.
    pub player_b: Option<Identity>,
    /// Stake per player.
    pub bet_amount: Lamports,
    /// Current state.
    pub status: MatchStatus,
    /// Unix seconds at creation.
    pub created_at: i64,
    /// Advisory end of the match.
    pub expires_at: i64,
    /// Vault address.
    pub vault: Address,
    /// Lamports currently escrowed.
    pub vault_balance: Lamports,
}

impl MatchInfo {
    /// Build the view of `record` and its vault balance.
    pub fn new(match_address: Address, record: &MatchRecord, vault_balance: Lamports) -> Self {
        Self {
            match_address,
            player_a: record.player_a,
            player_b: record.player_b,
            bet_amount: record.bet_amount,
            status: record.status,
            created_at: record.created_at,
            expires_at: record.expires_at(),
            vault: record.vault,
            vault_balance,
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Error with an explicit code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Malformed message or parameters.
    InvalidInput,
    /// Caller may not perform the operation.
    Unauthorized,
    /// Operation not allowed in the match's state.
    InvalidState,
    /// Match already exists.
    DuplicateMatch,
    /// Config already initialized.
    AlreadyInitialized,
    /// Config not initialized.
    ConfigNotInitialized,
    /// Winner is not a participant.
    UnknownWinner,
    /// Wallet cannot cover the deposit.
    InsufficientFunds,
    /// Creator tried to join their own match.
    SelfJoin,
    /// Match not found.
    MatchNotFound,
    /// Code does not match the address.
    CodeMismatch,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<&EscrowError> for ServerError {
    fn from(err: &EscrowError) -> Self {
        let code = match err {
            EscrowError::Unauthorized => ErrorCode::Unauthorized,
            EscrowError::InvalidState(_) => ErrorCode::InvalidState,
            EscrowError::DuplicateMatch(_) => ErrorCode::DuplicateMatch,
            EscrowError::AlreadyInitialized => ErrorCode::AlreadyInitialized,
            EscrowError::ConfigNotInitialized => ErrorCode::ConfigNotInitialized,
            EscrowError::UnknownWinner => ErrorCode::UnknownWinner,
            EscrowError::InvalidParameters(_) => ErrorCode::InvalidInput,
            EscrowError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            EscrowError::SelfJoin => ErrorCode::SelfJoin,
            EscrowError::MatchNotFound(_) => ErrorCode::MatchNotFound,
            EscrowError::CodeMismatch => ErrorCode::CodeMismatch,
            EscrowError::Arithmetic(_) | EscrowError::InvariantViolation(_) => ErrorCode::InternalError,
        };
        Self { code, message: err.to_string() }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::ResolveMatch {
            match_address: Address::new([7; 32]),
            code: "game".into(),
            winner: Some(Identity::new([1; 32])),
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"resolve_match\""));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_create_match_accepts_duration_alias() {
        let json = r#"{"type":"create_match","seed":3,"code":"abc","duration":600,"bet_amount":1000}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CreateMatch(CreateMatchRequest {
                seed: 3,
                code: "abc".into(),
                match_duration: 600,
                bet_amount: 1000,
            })
        );
        assert!(msg.is_mutating());
    }

    #[test]
    fn test_resolve_without_winner_is_draw() {
        let addr = Address::new([1; 32]);
        let json = format!(r#"{{"type":"resolve_match","match_address":"{}","code":"x"}}"#, addr);
        match ClientMessage::from_json(&json).unwrap() {
            ClientMessage::ResolveMatch { winner, match_address, .. } => {
                assert_eq!(winner, None);
                assert_eq!(match_address, addr);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_malformed_address_rejected() {
        let json = r#"{"type":"get_match","match_address":"zz"}"#;
        assert!(ClientMessage::from_json(json).is_err());
    }

    #[test]
    fn test_read_requests_not_mutating() {
        assert!(!ClientMessage::GetBalance.is_mutating());
        assert!(!ClientMessage::Ping { timestamp: 1 }.is_mutating());
        assert!(ClientMessage::WithdrawTreasury.is_mutating());
    }

    #[test]
    fn test_server_message_json_roundtrip() {
        let receipt = Receipt {
            sequence: 4,
            events: vec![EscrowEvent::MatchClosed { match_address: Address::new([2; 32]) }],
            state_hash: [0xAB; 32],
        };
        let msg = ServerMessage::Receipt(ReceiptInfo::from(&receipt));

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"receipt\""));
        assert!(json.contains(&"ab".repeat(32)));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_error_codes() {
        let error = ServerError::from(&EscrowError::SelfJoin);
        assert_eq!(error.code, ErrorCode::SelfJoin);

        let msg = ServerMessage::Error(error);
        let json = msg.to_json().unwrap();
        assert!(json.contains("self_join"));

        let internal = ServerError::from(&EscrowError::InvariantViolation("x".into()));
        assert_eq!(internal.code, ErrorCode::InternalError);
        assert_eq!(
            ServerError::from(&EscrowError::InvalidParameters("bad".into())).code,
            ErrorCode::InvalidInput
        );
    }

    #[test]
    fn test_match_info_hides_code() {
        let creator = Identity::new([5; 32]);
        let match_address = address::match_address(1, "secret", &creator);
        let record = MatchRecord {
            seed: 1,
            code: "secret".into(),
            player_a: creator,
            player_b: None,
            bet_amount: 10,
            match_duration: 60,
            created_at: 100,
            status: MatchStatus::Waiting,
            vault: address::vault_address(&match_address),
            rent: 0,
        };

        let info = MatchInfo::new(match_address, &record, 10);
        assert_eq!(info.expires_at, 160);
        let json = ServerMessage::MatchInfo(info).to_json().unwrap();
        assert!(!json.contains("secret"));
    }
}
