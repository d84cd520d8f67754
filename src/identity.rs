//! Identity resolution for ledger callers
//!
//! A caller presents an opaque session token, either as a bearer token or in
//! the session cookie. Resolution yields the stable user id carried in the
//! token's `sub` claim, or nothing.
//!
//! Absent, malformed, expired and wrongly signed tokens all resolve to
//! `None`. The reason is logged here and never surfaced to callers.
//!
//! Tokens are HS256 JWTs.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::LedgerError;

/// Stable user identifier issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Out-of-band credentials accompanying a ledger call
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    session_token: Option<String>,
}

impl CallerContext {
    /// Caller without credentials
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.trim();
        Self {
            session_token: (!token.is_empty()).then(|| token.to_string()),
        }
    }

    /// Build from request headers. A bearer token wins over the cookie.
    pub fn from_headers(
        authorization: Option<&str>,
        cookie: Option<&str>,
        cookie_name: &str,
    ) -> Self {
        let token = extract_token_from_header(authorization)
            .or_else(|| extract_token_from_cookie(cookie, cookie_name));

        match token {
            Some(token) => Self::with_token(token),
            None => Self::anonymous(),
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

/// Resolves the acting identity of a caller
pub trait IdentityResolver: Send + Sync {
    /// `None` means unauthenticated; this is a normal outcome, not an error
    fn resolve(&self, caller: &CallerContext) -> Option<Identity>;
}

/// Payload stored in a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// JWT session token verifier and issuer
#[derive(Clone)]
pub struct JwtIdentityResolver {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    expiry_seconds: u64,
}

impl JwtIdentityResolver {
    /// Create a resolver
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(
        secret: &str,
        issuer: Option<String>,
        expiry_seconds: u64,
    ) -> Result<Self, LedgerError> {
        if secret.is_empty() {
            return Err(LedgerError::Config("jwt_secret is required".into()));
        }

        if secret.len() < 32 {
            return Err(LedgerError::Config(
                "jwt_secret must be at least 32 characters".into(),
            ));
        }

        Ok(Self::build(secret, issuer, expiry_seconds))
    }

    /// Create a resolver for dev mode with a fixed secret
    pub fn new_dev() -> Self {
        Self::build("dev-mode-secret-not-for-production-use-123456", None, 3600)
    }

    /// Build from config, falling back to dev mode when no secret is set
    pub fn from_config(config: &AuthConfig) -> Result<Self, LedgerError> {
        if config.jwt_secret.is_empty() {
            warn!("No jwt_secret configured, using dev-mode session tokens");
            return Ok(Self::new_dev());
        }
        Self::new(
            &config.jwt_secret,
            config.issuer.clone(),
            config.token_expiry_secs,
        )
    }

    fn build(secret: &str, issuer: Option<String>, expiry_seconds: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(ref iss) = issuer {
            // Without `iss` in the required set, tokens lacking the claim skip the check
            validation.set_issuer(&[iss.as_str()]);
            validation.set_required_spec_claims(&["exp", "iss"]);
        }

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            expiry_seconds,
        }
    }

    /// Mint a session token for `identity`
    pub fn issue_token(&self, identity: &Identity) -> Result<String, LedgerError> {
        let now = unix_now()?;

        let claims = Claims {
            sub: identity.as_str().to_string(),
            iat: now,
            exp: now + self.expiry_seconds,
            iss: self.issuer.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| LedgerError::Auth(format!("Failed to generate token: {}", e)))
    }

    /// Verify and decode a session token
    pub fn verify_token(&self, token: &str) -> Result<Claims, LedgerError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                use jsonwebtoken::errors::ErrorKind;
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => "Token expired",
                    ErrorKind::InvalidToken => "Invalid token",
                    ErrorKind::InvalidSignature => "Invalid signature",
                    ErrorKind::InvalidIssuer => "Invalid issuer",
                    _ => "Token validation failed",
                };
                LedgerError::Auth(reason.to_string())
            })
    }
}

impl IdentityResolver for JwtIdentityResolver {
    fn resolve(&self, caller: &CallerContext) -> Option<Identity> {
        let Some(token) = caller.session_token() else {
            debug!("No session token presented");
            return None;
        };

        match self.verify_token(token) {
            Ok(claims) if !claims.sub.is_empty() => Some(Identity::new(claims.sub)),
            Ok(_) => {
                warn!("Session token has an empty subject");
                None
            }
            Err(e) => {
                warn!(error = %e, "Error when verifying session token");
                None
            }
        }
    }
}

fn unix_now() -> Result<u64, LedgerError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| LedgerError::Auth(format!("System time error: {}", e)))
}

/// Token from an `Authorization` header value.
///
/// Accepts `Bearer <token>` (scheme is case-insensitive) or a bare token.
/// Any other scheme yields `None`.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    let token = match header.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return None,
        None => header.trim(),
    };

    (!token.is_empty()).then_some(token)
}

/// Extract a named cookie value from a `Cookie` header
pub fn extract_token_from_cookie<'a>(cookie_header: Option<&'a str>, name: &str) -> Option<&'a str> {
    cookie_header?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
