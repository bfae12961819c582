//! Principal and user directory.
//!
//! The chat core never owns user accounts. It only needs the canonical id and
//! marketplace role of whoever is on the other end of a connection, plus a
//! way to ask the user directory about counterparts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::UserId;
use crate::shared::error::AppError;

/// Marketplace role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Buyer,
    Shop,
    RescueCenter,
    Admin,
}

impl UserRole {
    /// Convert from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buyer" | "user" => Some(Self::Buyer),
            "shop" => Some(Self::Shop),
            "rescue_center" | "rescue" => Some(Self::RescueCenter),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Shop => "shop",
            Self::RescueCenter => "rescue_center",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub role: UserRole,
}

impl Principal {
    pub fn new(id: impl Into<UserId>, role: UserRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Read-only view of the account store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up an account by id. Deactivated accounts are still returned.
    async fn find_principal(&self, id: UserId) -> Result<Option<Principal>, AppError>;

    /// Whether the account exists and has not been deactivated.
    async fn is_active(&self, id: UserId) -> Result<bool, AppError>;
}
