//! WebSocket Escrow Server
//!
//! Async WebSocket server in front of the escrow ledger.
//! Handles authentication, request dispatch and receipt broadcasting.
//! This is the only place that reads the wall clock.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use chrono::Utc;
use serde::{Serialize, Deserialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};
use uuid::Uuid;

use crate::core::address::Identity;
use crate::core::amount::Lamports;
use crate::core::hash::LedgerHash;
use crate::escrow::{self, CreateMatch, EscrowConfig, EscrowResult, Ledger, Receipt};
use crate::network::auth::{authenticate, AuthConfig, AuthError, Caller};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, MatchInfo, ReceiptInfo, ServerError,
    ServerMessage,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// JSON file of genesis wallet balances.
    pub genesis_path: Option<PathBuf>,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            genesis_path: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// - `ESCROW_BIND_ADDR`: socket address (default `0.0.0.0:8080`)
    /// - `ESCROW_MAX_CONNECTIONS`
    /// - `ESCROW_GENESIS`: path to a genesis balance file
    pub fn from_env() -> Result<Self, EscrowServerError> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("ESCROW_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|e| EscrowServerError::InvalidConfig(format!("ESCROW_BIND_ADDR: {}", e)))?;
        }
        if let Ok(max) = std::env::var("ESCROW_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|e| EscrowServerError::InvalidConfig(format!("ESCROW_MAX_CONNECTIONS: {}", e)))?;
        }
        config.genesis_path = std::env::var("ESCROW_GENESIS").ok().map(PathBuf::from);
        Ok(config)
    }
}

/// Escrow server errors.
#[derive(Debug, thiserror::Error)]
pub enum EscrowServerError {
    /// Failed to bind to address, or to read a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Genesis file is malformed.
    #[error("Invalid genesis file: {0}")]
    Genesis(#[from] serde_json::Error),

    /// Configuration rejected at startup.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// =============================================================================
// GENESIS
// =============================================================================

/// One genesis wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    /// Wallet owner.
    pub identity: Identity,
    /// Opening balance.
    pub lamports: Lamports,
}

/// Build a ledger from a JSON array of allocations.
pub fn load_genesis(path: &Path) -> Result<Ledger, EscrowServerError> {
    let text = std::fs::read_to_string(path)?;
    let allocations: Vec<GenesisAllocation> = serde_json::from_str(&text)?;
    info!("Loaded {} genesis wallets from {}", allocations.len(), path.display());
    Ok(Ledger::with_balances(allocations.into_iter().map(|a| (a.identity, a.lamports))))
}

/// Initialize the escrow for the pinned authority unless the ledger already
/// has a config. Returns the receipt when this call did the initialization.
pub fn bootstrap_authority(ledger: &mut Ledger, auth: &AuthConfig) -> EscrowResult<Option<Receipt>> {
    match auth.authority {
        Some(authority) if ledger.config().is_none() => escrow::init_config(ledger, authority).map(Some),
        _ => Ok(None),
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Per-connection state.
#[derive(Debug, Clone)]
pub struct Session {
    /// Random id reported to the client on auth.
    pub id: Uuid,
    /// Signer bound by a successful `auth`.
    pub caller: Option<Caller>,
}

impl Session {
    /// Fresh unauthenticated session.
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), caller: None }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// The ledger plus everything needed to answer requests against it.
pub struct EscrowService {
    escrow: EscrowConfig,
    auth: AuthConfig,
    version: String,
    ledger: RwLock<Ledger>,
}

fn error_message(code: ErrorCode, message: &str) -> ServerMessage {
    ServerMessage::Error(ServerError::new(code, message))
}

fn receipt_message(result: EscrowResult<Receipt>) -> ServerMessage {
    match result {
        Ok(receipt) => ServerMessage::Receipt(ReceiptInfo::from(&receipt)),
        Err(e) => {
            debug!("Request rejected: {}", e);
            ServerMessage::Error(ServerError::from(&e))
        }
    }
}

impl EscrowService {
    /// Wrap a ledger.
    pub fn new(ledger: Ledger, escrow: EscrowConfig, auth: AuthConfig, version: String) -> Self {
        Self { escrow, auth, version, ledger: RwLock::new(ledger) }
    }

    /// Current ledger state root.
    pub async fn state_hash(&self) -> LedgerHash {
        self.ledger.read().await.compute_hash()
    }

    /// Answer one client message.
    ///
    /// Committed transactions come back as `ServerMessage::Receipt`.
    pub async fn dispatch(&self, session: &mut Session, msg: ClientMessage) -> ServerMessage {
        match msg {
            ClientMessage::Auth(auth) => self.handle_auth(session, auth),
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: Utc::now().timestamp_millis(),
            },
            ClientMessage::GetMatch { match_address } => {
                let ledger = self.ledger.read().await;
                match ledger.match_record(&match_address) {
                    Some(record) => {
                        let vault_balance = ledger.vault(&record.vault).map(|v| v.balance).unwrap_or(0);
                        ServerMessage::MatchInfo(MatchInfo::new(match_address, record, vault_balance))
                    }
                    None if ledger.is_closed(&match_address) => {
                        error_message(ErrorCode::MatchNotFound, "match is closed")
                    }
                    None => error_message(ErrorCode::MatchNotFound, "match not found"),
                }
            }
            msg => {
                let Some(caller) = session.caller else {
                    return error_message(ErrorCode::NotAuthenticated, "Must authenticate first");
                };
                if caller.is_expired(Utc::now().timestamp(), &self.auth) {
                    session.caller = None;
                    return error_message(ErrorCode::TokenExpired, "Login expired, authenticate again");
                }
                self.handle_request(caller, msg).await
            }
        }
    }

    fn handle_auth(&self, session: &mut Session, auth: AuthRequest) -> ServerMessage {
        match authenticate(&auth.token, &self.auth, Utc::now().timestamp()) {
            Ok(caller) => {
                session.caller = Some(caller);
                debug!("Session {} authenticated as {} ({:?})", session.id, caller.identity.short(), caller.role);
                ServerMessage::AuthResult(AuthResult {
                    success: true,
                    session_id: Some(session.id.to_string()),
                    identity: Some(caller.identity),
                    role: Some(caller.role),
                    error: None,
                    server_version: self.version.clone(),
                })
            }
            Err(e) => {
                debug!("Session {} failed auth: {}", session.id, e);
                let code = match e {
                    AuthError::Expired => ErrorCode::TokenExpired,
                    AuthError::NotConfigured => ErrorCode::AuthFailed,
                    _ => ErrorCode::InvalidToken,
                };
                ServerMessage::AuthResult(AuthResult {
                    success: false,
                    session_id: None,
                    identity: None,
                    role: None,
                    error: Some(format!("{:?}: {}", code, e)),
                    server_version: self.version.clone(),
                })
            }
        }
    }

    async fn handle_request(&self, signer: Caller, msg: ClientMessage) -> ServerMessage {
        let config = &self.escrow;
        let caller = signer.identity;

        if let ClientMessage::GetBalance = msg {
            let lamports = self.ledger.read().await.balance(&caller);
            return ServerMessage::Balance { identity: caller, lamports };
        }

        let mut ledger = self.ledger.write().await;
        let result = match msg {
            ClientMessage::InitConfig if !signer.is_authority() => {
                warn!("Rejected init_config from non-authority {}", caller.short());
                return error_message(ErrorCode::Unauthorized, "only the pinned authority may initialize the escrow");
            }
            ClientMessage::InitConfig => escrow::init_config(&mut ledger, caller),
            ClientMessage::CreateMatch(req) => {
                let params = CreateMatch {
                    seed: req.seed,
                    code: req.code,
                    match_duration: req.match_duration,
                    bet_amount: req.bet_amount,
                };
                escrow::create_match(&mut ledger, config, caller, params, Utc::now().timestamp())
                    .map(|(_, receipt)| receipt)
            }
            ClientMessage::JoinMatch { match_address, code } => {
                escrow::join_match(&mut ledger, caller, match_address, &code)
            }
            ClientMessage::ResolveMatch { match_address, code, winner } => {
                escrow::resolve_match(&mut ledger, config, caller, match_address, &code, winner)
                    .map(|(_, receipt)| receipt)
            }
            ClientMessage::CancelMatch { match_address, code } => {
                escrow::cancel_match(&mut ledger, config, caller, match_address, &code)
                    .map(|(_, receipt)| receipt)
            }
            ClientMessage::WithdrawTreasury => {
                escrow::withdraw_from_treasury(&mut ledger, config, caller).map(|(_, receipt)| receipt)
            }
            ClientMessage::Auth(_)
            | ClientMessage::Ping { .. }
            | ClientMessage::GetMatch { .. }
            | ClientMessage::GetBalance => {
                return error_message(ErrorCode::InternalError, "request routed incorrectly");
            }
        };
        receipt_message(result)
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Connected client state.
struct ConnectedClient {
    /// Session id.
    session_id: Uuid,
    /// Connection time.
    connected_at: Instant,
    /// Message sender (for receipt broadcasts).
    sender: mpsc::Sender<ServerMessage>,
}

type ClientMap = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The escrow server.
pub struct EscrowServer {
    /// Server configuration.
    config: ServerConfig,
    /// Ledger and request handling.
    service: Arc<EscrowService>,
    /// Connected clients.
    clients: ClientMap,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl EscrowServer {
    /// Create a new escrow server over `ledger`.
    pub fn new(config: ServerConfig, escrow: EscrowConfig, auth: AuthConfig, ledger: Ledger) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let service = EscrowService::new(ledger, escrow, auth, config.version.clone());

        Self {
            config,
            service: Arc::new(service),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), EscrowServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Escrow server listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let service = self.service.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);
            let mut session = Session::new();

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    session_id: session.id,
                    connected_at: Instant::now(),
                    sender: msg_tx.clone(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(error_message(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )).await;
                                        continue;
                                    }
                                };

                                let reply = service.dispatch(&mut session, client_msg).await;
                                if let ServerMessage::Receipt(_) = &reply {
                                    Self::broadcast(&clients, addr, &reply).await;
                                }
                                let _ = msg_tx.send(reply).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(error_message(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                )).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            sender_task.abort();

            let mut clients = clients.write().await;
            if let Some(client) = clients.remove(&addr) {
                info!(
                    "Client {} (session {}) cleaned up after {:?}",
                    addr,
                    client.session_id,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Send a committed receipt to every client except its origin.
    async fn broadcast(clients: &ClientMap, origin: SocketAddr, msg: &ServerMessage) {
        let clients = clients.read().await;
        for (addr, client) in clients.iter().filter(|(addr, _)| **addr != origin) {
            if client.sender.try_send(msg.clone()).is_err() {
                warn!("Dropped receipt broadcast to slow client {}", addr);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Request handler shared by all connections.
    pub fn service(&self) -> &Arc<EscrowService> {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address;
    use crate::core::amount::units;
    use crate::escrow::EscrowEvent;
    use crate::network::auth::{Role, TokenClaims};
    use crate::network::protocol::CreateMatchRequest;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    const SECRET: &str = "escrow-test-secret-0123456789!!";

    fn token_for(sub: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: sub.into(),
            exp: Some(now + 3600),
            iat: Some(now),
            iss: Some("escrow-tests".into()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn service_with(wallets: &[(&str, Lamports)]) -> EscrowService {
        let ledger = Ledger::with_balances(wallets.iter().map(|(sub, n)| (Identity::from_subject(sub), *n)));
        let auth = AuthConfig {
            secret: Some(SECRET.into()),
            authority: Some(Identity::from_subject("admin")),
            ..Default::default()
        };
        EscrowService::new(ledger, EscrowConfig::default(), auth, "test".into())
    }

    async fn login(service: &EscrowService, sub: &str) -> Session {
        let mut session = Session::new();
        let reply = service
            .dispatch(&mut session, ClientMessage::Auth(AuthRequest { token: token_for(sub), client_version: String::new() }))
            .await;
        assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: true, .. })));
        session
    }

    fn expect_receipt(reply: ServerMessage) -> ReceiptInfo {
        match reply {
            ServerMessage::Receipt(receipt) => receipt,
            other => panic!("expected receipt, got {:?}", other),
        }
    }

    fn expect_error(reply: ServerMessage) -> ErrorCode {
        match reply {
            ServerMessage::Error(err) => err.code,
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.genesis_path.is_none());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = EscrowServer::new(config, EscrowConfig::default(), AuthConfig::default(), Ledger::new());

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.service().state_hash().await, Ledger::new().compute_hash());
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = EscrowServer::new(
            ServerConfig::default(),
            EscrowConfig::default(),
            AuthConfig::default(),
            Ledger::new(),
        );
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_mutations_require_auth() {
        let service = service_with(&[]);
        let mut session = Session::new();

        let reply = service.dispatch(&mut session, ClientMessage::InitConfig).await;
        assert_eq!(expect_error(reply), ErrorCode::NotAuthenticated);
        let reply = service.dispatch(&mut session, ClientMessage::GetBalance).await;
        assert_eq!(expect_error(reply), ErrorCode::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let service = service_with(&[]);
        let mut session = Session::new();
        let auth = AuthRequest { token: "not.a.jwt".into(), client_version: String::new() };

        match service.dispatch(&mut session, ClientMessage::Auth(auth)).await {
            ServerMessage::AuthResult(result) => {
                assert!(!result.success);
                assert!(result.error.is_some());
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(session.caller.is_none());
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let service = service_with(&[]);
        let reply = service.dispatch(&mut Session::new(), ClientMessage::Ping { timestamp: 42 }).await;
        assert!(matches!(reply, ServerMessage::Pong { timestamp: 42, .. }));
    }

    #[tokio::test]
    async fn test_full_match_over_dispatch() {
        let service = service_with(&[("admin", 0), ("alice", units(5)), ("bob", units(5))]);
        let mut admin = login(&service, "admin").await;
        let mut alice = login(&service, "alice").await;
        let mut bob = login(&service, "bob").await;
        let alice_id = Identity::from_subject("alice");

        expect_receipt(service.dispatch(&mut admin, ClientMessage::InitConfig).await);

        let create = ClientMessage::CreateMatch(CreateMatchRequest {
            seed: 1,
            code: "blitz".into(),
            match_duration: 300,
            bet_amount: units(1),
        });
        let receipt = expect_receipt(service.dispatch(&mut alice, create).await);
        let match_address = address::match_address(1, "blitz", &alice_id);
        assert!(matches!(receipt.events[0], EscrowEvent::MatchCreated { match_address: a, .. } if a == match_address));

        let join = ClientMessage::JoinMatch { match_address, code: "blitz".into() };
        expect_receipt(service.dispatch(&mut bob, join).await);

        match service.dispatch(&mut bob, ClientMessage::GetMatch { match_address }).await {
            ServerMessage::MatchInfo(info) => {
                assert_eq!(info.vault_balance, units(2));
                assert_eq!(info.player_b, Some(Identity::from_subject("bob")));
            }
            other => panic!("unexpected reply {:?}", other),
        }

        // Only the authority can report the result.
        let resolve = ClientMessage::ResolveMatch { match_address, code: "blitz".into(), winner: Some(alice_id) };
        assert_eq!(expect_error(service.dispatch(&mut alice, resolve.clone()).await), ErrorCode::Unauthorized);

        let receipt = expect_receipt(service.dispatch(&mut admin, resolve).await);
        assert_eq!(receipt.state_hash, hex::encode(service.state_hash().await));

        // Closed matches are gone, same as never-created ones.
        let reply = service.dispatch(&mut alice, ClientMessage::GetMatch { match_address }).await;
        assert_eq!(expect_error(reply), ErrorCode::MatchNotFound);

        match service.dispatch(&mut bob, ClientMessage::GetBalance).await {
            ServerMessage::Balance { lamports, .. } => assert_eq!(lamports, units(4)),
            other => panic!("unexpected reply {:?}", other),
        }

        expect_receipt(service.dispatch(&mut admin, ClientMessage::WithdrawTreasury).await);
    }

    #[tokio::test]
    async fn test_only_pinned_authority_can_init() {
        let service = service_with(&[("mallory", units(5)), ("alice", units(5)), ("bob", units(5))]);
        let mut mallory = login(&service, "mallory").await;
        let empty = service.state_hash().await;

        let reply = service.dispatch(&mut mallory, ClientMessage::InitConfig).await;
        assert_eq!(expect_error(reply), ErrorCode::Unauthorized);
        assert_eq!(service.state_hash().await, empty);

        let mut admin = login(&service, "admin").await;
        expect_receipt(service.dispatch(&mut admin, ClientMessage::InitConfig).await);

        // The failed attempt left mallory with no say over results.
        let mut alice = login(&service, "alice").await;
        let mut bob = login(&service, "bob").await;
        let create = ClientMessage::CreateMatch(CreateMatchRequest {
            seed: 3,
            code: "rapid".into(),
            match_duration: 600,
            bet_amount: units(1),
        });
        expect_receipt(service.dispatch(&mut alice, create).await);
        let match_address = address::match_address(3, "rapid", &Identity::from_subject("alice"));
        let join = ClientMessage::JoinMatch { match_address, code: "rapid".into() };
        expect_receipt(service.dispatch(&mut bob, join).await);

        let resolve = ClientMessage::ResolveMatch {
            match_address,
            code: "rapid".into(),
            winner: Some(Identity::from_subject("mallory")),
        };
        assert_eq!(expect_error(service.dispatch(&mut mallory, resolve).await), ErrorCode::Unauthorized);
        let reply = service.dispatch(&mut mallory, ClientMessage::WithdrawTreasury).await;
        assert_eq!(expect_error(reply), ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn test_auth_result_reports_role() {
        let service = service_with(&[]);
        for (sub, role) in [("admin", Role::Authority), ("alice", Role::Player)] {
            let mut session = Session::new();
            let auth = AuthRequest { token: token_for(sub), client_version: String::new() };
            match service.dispatch(&mut session, ClientMessage::Auth(auth)).await {
                ServerMessage::AuthResult(result) => assert_eq!(result.role, Some(role)),
                other => panic!("unexpected reply {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_lapsed_login_must_reauthenticate() {
        let service = service_with(&[("alice", units(1))]);
        let mut session = Session {
            id: Uuid::new_v4(),
            caller: Some(Caller { identity: Identity::from_subject("alice"), role: Role::Player, expires_at: 1 }),
        };

        let reply = service.dispatch(&mut session, ClientMessage::GetBalance).await;
        assert_eq!(expect_error(reply), ErrorCode::TokenExpired);
        assert!(session.caller.is_none());
    }

    #[test]
    fn test_bootstrap_authority() {
        let admin = Identity::from_subject("admin");
        let auth = AuthConfig { authority: Some(admin), ..Default::default() };

        let mut ledger = Ledger::new();
        assert!(bootstrap_authority(&mut ledger, &auth).unwrap().is_some());
        assert_eq!(ledger.config().unwrap().authority, admin);

        // Already initialized: left alone.
        let hash = ledger.compute_hash();
        assert!(bootstrap_authority(&mut ledger, &auth).unwrap().is_none());
        assert_eq!(ledger.compute_hash(), hash);

        // Nothing pinned: nothing to do.
        let mut ledger = Ledger::new();
        assert!(bootstrap_authority(&mut ledger, &AuthConfig::default()).unwrap().is_none());
        assert!(ledger.config().is_none());
    }

    #[tokio::test]
    async fn test_escrow_errors_mapped() {
        let service = service_with(&[("alice", units(1))]);
        let mut alice = login(&service, "alice").await;

        let create = ClientMessage::CreateMatch(CreateMatchRequest {
            seed: 1,
            code: "x".into(),
            match_duration: 300,
            bet_amount: units(1),
        });
        let reply = service.dispatch(&mut alice, create).await;
        assert_eq!(expect_error(reply), ErrorCode::ConfigNotInitialized);

        let missing = address::match_address(9, "x", &Identity::from_subject("alice"));
        let reply = service.dispatch(&mut alice, ClientMessage::GetMatch { match_address: missing }).await;
        assert_eq!(expect_error(reply), ErrorCode::MatchNotFound);
    }

    #[test]
    fn test_load_genesis() {
        let path = std::env::temp_dir().join(format!("escrow-genesis-{}.json", Uuid::new_v4()));
        let alice = Identity::new([1; 32]);
        let allocations = vec![GenesisAllocation { identity: alice, lamports: 500 }];
        std::fs::write(&path, serde_json::to_string(&allocations).unwrap()).unwrap();

        let ledger = load_genesis(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(ledger.balance(&alice), 500);
        assert_eq!(ledger.total_lamports(), 500);
    }

    #[test]
    fn test_load_genesis_rejects_garbage() {
        let path = std::env::temp_dir().join(format!("escrow-genesis-{}.json", Uuid::new_v4()));
        std::fs::write(&path, "[{\"identity\": \"nothex\", \"lamports\": 1}]").unwrap();

        let result = load_genesis(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(EscrowServerError::Genesis(_))));
    }
}
