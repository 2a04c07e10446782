//! Session Authentication
//!
//! A connection proves who it is once, with an HS256 JWT minted by the
//! operator's login service, and every later request on that connection is
//! signed by the resulting `Caller`. The token subject is hashed into the
//! escrow `Identity`, so one account always settles as one key.
//!
//! The operator pins the escrow authority with `ESCROW_AUTHORITY`. A caller
//! whose identity matches it gets `Role::Authority`; everyone else is a
//! `Role::Player`.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::address::Identity;
use crate::escrow::ConfigError;

/// Default clock skew tolerated on `exp` and `iat`, in seconds.
pub const DEFAULT_LEEWAY_SECS: i64 = 30;

/// How tokens are checked and who the authority is.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HS256 signing secret shared with the login service.
    pub secret: Option<String>,
    /// Required `iss` claim, if any.
    pub issuer: Option<String>,
    /// Identity allowed to initialize and run the escrow.
    pub authority: Option<Identity>,
    /// Accepted clock skew, in seconds.
    pub leeway_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: None,
            authority: None,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }
}

impl AuthConfig {
    /// Create config from environment variables.
    ///
    /// - `AUTH_SECRET`: HS256 secret (auth is refused while unset)
    /// - `AUTH_ISSUER`: required issuer
    /// - `AUTH_LEEWAY_SECS`: clock skew on `exp`/`iat`
    /// - `ESCROW_AUTHORITY`: hex identity of the escrow authority
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            secret: std::env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty()),
            issuer: std::env::var("AUTH_ISSUER").ok(),
            ..Self::default()
        };
        if let Ok(raw) = std::env::var("AUTH_LEEWAY_SECS") {
            config.leeway_secs = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "AUTH_LEEWAY_SECS",
                value: raw.clone(),
                expected: "seconds",
            })?;
        }
        if let Ok(raw) = std::env::var("ESCROW_AUTHORITY") {
            config.authority = Some(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "ESCROW_AUTHORITY",
                value: raw.clone(),
                expected: "64 hex characters",
            })?);
        }
        Ok(config)
    }

    /// Whether tokens can be checked at all.
    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    fn role_of(&self, identity: &Identity) -> Role {
        if self.authority.as_ref() == Some(identity) {
            Role::Authority
        } else {
            Role::Player
        }
    }
}

/// Claims read from a login token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Account name at the login service.
    pub sub: String,
    /// Expiry, Unix seconds. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issue time, Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Login service that minted the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl TokenClaims {
    /// Escrow identity of the token's subject.
    pub fn identity(&self) -> Identity {
        Identity::from_subject(&self.sub)
    }
}

/// What an authenticated connection may do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Creates, joins and cancels matches with its own wallet.
    Player,
    /// Also initializes the escrow, reports results and sweeps the treasury.
    Authority,
}

/// The signer bound to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    /// Wallet the caller acts as.
    pub identity: Identity,
    /// Capabilities granted at login.
    pub role: Role,
    /// Token expiry, Unix seconds.
    pub expires_at: i64,
}

impl Caller {
    /// Whether this caller is the pinned escrow authority.
    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }

    /// Whether the login behind this caller has lapsed at `now`.
    pub fn is_expired(&self, now: i64, config: &AuthConfig) -> bool {
        now > self.expires_at.saturating_add(config.leeway_secs)
    }
}

/// Login rejections.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No `AUTH_SECRET` on this server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Not a JWT, or not signed with HS256.
    #[error("malformed token")]
    Malformed,
    /// Signed with another secret.
    #[error("bad signature")]
    BadSignature,
    /// Issued by someone else.
    #[error("unexpected issuer")]
    WrongIssuer,
    /// A claim we need is absent or empty.
    #[error("missing claim `{0}`")]
    MissingClaim(&'static str),
    /// `exp` is in the past.
    #[error("token expired")]
    Expired,
    /// `iat` is in the future.
    #[error("token issued in the future")]
    NotYetValid,
}

/// Check a login token at time `now` and bind it to a `Caller`.
pub fn authenticate(token: &str, config: &AuthConfig, now: i64) -> Result<Caller, AuthError> {
    let secret = config.secret.as_deref().ok_or(AuthError::NotConfigured)?;

    // Time claims are checked below against the caller's clock.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["iss"]);
    }

    let claims = decode::<TokenClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::InvalidSignature => AuthError::BadSignature,
                ErrorKind::InvalidIssuer | ErrorKind::MissingRequiredClaim(_) => AuthError::WrongIssuer,
                _ => AuthError::Malformed,
            }
        })?
        .claims;

    if claims.sub.trim().is_empty() {
        return Err(AuthError::MissingClaim("sub"));
    }
    let expires_at = claims.exp.ok_or(AuthError::MissingClaim("exp"))?;
    if now > expires_at.saturating_add(config.leeway_secs) {
        return Err(AuthError::Expired);
    }
    if let Some(iat) = claims.iat {
        if iat > now.saturating_add(config.leeway_secs) {
            return Err(AuthError::NotYetValid);
        }
    }

    let identity = claims.identity();
    Ok(Caller { identity, role: config.role_of(&identity), expires_at })
}
