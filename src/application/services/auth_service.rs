//! Authentication Service
//!
//! Turns connection credentials into a [`Principal`]. Account management
//! lives in the marketplace backend; the chat core only verifies the bearer
//! tokens it issues.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtSettings;
use crate::domain::{Principal, UserId, UserRole};

/// Credentials presented when a connection opens.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("token", &"<redacted>").finish()
    }
}

/// Verifies credentials for the connection manager.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError>;
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (canonical user ID)
    pub sub: String,
    /// Marketplace role
    pub role: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at time (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// HS256 bearer token verification.
#[derive(Clone)]
pub struct JwtAuthenticator {
    settings: JwtSettings,
}

impl JwtAuthenticator {
    pub fn new(settings: JwtSettings) -> Self {
        Self { settings }
    }

    /// Issue an access token for `principal`.
    ///
    /// Production tokens come from the marketplace backend; this exists for
    /// local development and tests.
    pub fn issue_token(&self, principal: &Principal) -> Result<String, AuthError> {
        let now = Utc::now();
        let expiry = now + Duration::minutes(self.settings.access_token_expiry_minutes);
        let claims = Claims {
            sub: principal.id.to_string(),
            role: principal.role.as_str().to_string(),
            exp: expiry.timestamp(),
            iat: now.timestamp(),
            jti: Some(uuid::Uuid::new_v4().to_string()),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.settings.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Decode and validate an access token
    fn decode_token(&self, token: &str) -> Result<Claims, AuthError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.settings.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        let token = credentials.token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let claims = self.decode_token(token)?;
        let id: UserId = claims
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidClaims(format!("subject '{}' is not a user id", claims.sub)))?;
        let role = UserRole::parse(&claims.role)
            .ok_or_else(|| AuthError::InvalidClaims(format!("unknown role '{}'", claims.role)))?;

        Ok(Principal::new(id, role))
    }
}
