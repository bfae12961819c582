//! Conversation entity and repository trait.
//!
//! Maps to the `conversations` table. A conversation always has exactly two
//! participants: the buyer and a counterpart whose role is fixed by the
//! conversation kind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserRole;
use crate::domain::value_objects::{ConversationId, UserId};
use crate::shared::error::AppError;

/// Maximum length of the last-message summary kept on a conversation.
pub const SUMMARY_MAX_CHARS: usize = 120;

/// Which side of the marketplace the buyer is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// Buyer talking to a pet/product shop
    BuyerShop,
    /// Buyer talking to a rescue center about an adoption
    BuyerRescueCenter,
}

impl ConversationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buyer_shop" => Some(Self::BuyerShop),
            "buyer_rescue_center" => Some(Self::BuyerRescueCenter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuyerShop => "buyer_shop",
            Self::BuyerRescueCenter => "buyer_rescue_center",
        }
    }

    /// Role the non-buyer participant must hold.
    pub fn counterpart_role(&self) -> UserRole {
        match self {
            Self::BuyerShop => UserRole::Shop,
            Self::BuyerRescueCenter => UserRole::RescueCenter,
        }
    }

    /// Whether a (buyer, counterpart) role pair may form this kind.
    pub fn admits(&self, buyer: UserRole, counterpart: UserRole) -> bool {
        buyer == UserRole::Buyer && counterpart == self.counterpart_role()
    }
}

/// Marketplace entity a conversation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RelatedEntity {
    Pet(i64),
    Product(i64),
}

impl RelatedEntity {
    /// Split into the (type, id) column pair used by the database.
    pub fn to_columns(self) -> (&'static str, i64) {
        match self {
            Self::Pet(id) => ("pet", id),
            Self::Product(id) => ("product", id),
        }
    }

    pub fn from_columns(kind: Option<&str>, id: Option<i64>) -> Option<Self> {
        match (kind, id) {
            (Some("pet"), Some(id)) => Some(Self::Pet(id)),
            (Some("product"), Some(id)) => Some(Self::Product(id)),
            _ => None,
        }
    }
}

/// The ordered participant pair of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participants {
    pub buyer: UserId,
    pub counterpart: UserId,
}

impl Participants {
    pub fn new(buyer: UserId, counterpart: UserId) -> Self {
        Self { buyer, counterpart }
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.buyer == user || self.counterpart == user
    }

    /// The participant that is not `user`, if `user` participates at all.
    pub fn other(&self, user: UserId) -> Option<UserId> {
        if user == self.buyer {
            Some(self.counterpart)
        } else if user == self.counterpart {
            Some(self.buyer)
        } else {
            None
        }
    }

    pub fn as_array(&self) -> [UserId; 2] {
        [self.buyer, self.counterpart]
    }
}

/// A two-party conversation.
///
/// Maps to the `conversations` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - buyer_id / counterpart_id: BIGINT NOT NULL
/// - kind: VARCHAR(32) NOT NULL
/// - related_type / related_id: nullable pair
/// - last_message: TEXT NULL
/// - created_at / last_activity_at: TIMESTAMPTZ NOT NULL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Participants,
    pub kind: ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<RelatedEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user: UserId) -> bool {
        self.participants.contains(user)
    }

    pub fn other_participant(&self, user: UserId) -> Option<UserId> {
        self.participants.other(user)
    }
}

/// Truncate message content into a conversation list summary.
pub fn summarize(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= SUMMARY_MAX_CHARS {
        return trimmed.to_string();
    }
    let mut summary: String = trimmed.chars().take(SUMMARY_MAX_CHARS - 1).collect();
    summary.push('…');
    summary
}

/// Repository trait for Conversation data access operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Return the conversation for (participants, kind, related), creating it
    /// if it does not exist yet.
    async fn create_or_get(
        &self,
        participants: Participants,
        kind: ConversationKind,
        related: Option<RelatedEntity>,
    ) -> Result<Conversation, AppError>;

    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, AppError>;

    /// Conversations the principal participates in, most recent activity first.
    async fn list_for_principal(&self, user: UserId) -> Result<Vec<Conversation>, AppError>;

    /// Bump last activity and replace the last-message summary.
    async fn record_activity(
        &self,
        id: ConversationId,
        at: DateTime<Utc>,
        summary: &str,
    ) -> Result<(), AppError>;
}
