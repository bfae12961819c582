//! Conversation Repository Implementation
//!
//! PostgreSQL implementation of the ConversationRepository trait.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{
    Conversation, ConversationId, ConversationKind, ConversationRepository, Participants,
    RelatedEntity, UserId,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

/// Database row representation of the conversations table.
#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    buyer_id: i64,
    counterpart_id: i64,
    kind: String,
    related_type: Option<String>,
    related_id: Option<i64>,
    last_message: Option<String>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl ConversationRow {
    /// Convert database row to domain Conversation entity.
    fn into_conversation(self) -> Result<Conversation, AppError> {
        let kind = ConversationKind::parse(&self.kind).ok_or_else(|| {
            AppError::Internal(format!("conversation {} has unknown kind '{}'", self.id, self.kind))
        })?;
        Ok(Conversation {
            id: ConversationId::new(self.id),
            participants: Participants::new(
                UserId::new(self.buyer_id),
                UserId::new(self.counterpart_id),
            ),
            kind,
            related: RelatedEntity::from_columns(self.related_type.as_deref(), self.related_id),
            last_message: self.last_message,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        })
    }
}

const CONVERSATION_COLUMNS: &str = "id, buyer_id, counterpart_id, kind, related_type, related_id, \
     last_message, created_at, last_activity_at";

/// PostgreSQL conversation repository implementation.
#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
    ids: Arc<SnowflakeGenerator>,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool, ids: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, ids }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create_or_get(
        &self,
        participants: Participants,
        kind: ConversationKind,
        related: Option<RelatedEntity>,
    ) -> Result<Conversation, AppError> {
        let started = Instant::now();
        let (related_type, related_id) = match related.map(RelatedEntity::to_columns) {
            Some((t, id)) => (Some(t), Some(id)),
            None => (None, None),
        };

        // Concurrent opens of the same conversation race on the unique index;
        // the loser falls through to the select.
        let inserted = sqlx::query_as::<_, ConversationRow>(&format!(
            r#"
            INSERT INTO conversations (id, buyer_id, counterpart_id, kind, related_type, related_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            RETURNING {CONVERSATION_COLUMNS}
            "#
        ))
        .bind(self.ids.generate())
        .bind(participants.buyer.as_i64())
        .bind(participants.counterpart.as_i64())
        .bind(kind.as_str())
        .bind(related_type)
        .bind(related_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match inserted {
            Some(row) => row,
            None => {
                sqlx::query_as::<_, ConversationRow>(&format!(
                    r#"
                    SELECT {CONVERSATION_COLUMNS}
                    FROM conversations
                    WHERE buyer_id = $1 AND counterpart_id = $2 AND kind = $3
                      AND related_type IS NOT DISTINCT FROM $4
                      AND related_id IS NOT DISTINCT FROM $5
                    "#
                ))
                .bind(participants.buyer.as_i64())
                .bind(participants.counterpart.as_i64())
                .bind(kind.as_str())
                .bind(related_type)
                .bind(related_id)
                .fetch_one(&self.pool)
                .await?
            }
        };

        metrics::record_db_query("upsert", "conversations", started.elapsed().as_secs_f64());
        row.into_conversation()
    }

    async fn find_by_id(&self, id: ConversationId) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConversationRow::into_conversation).transpose()
    }

    async fn list_for_principal(&self, user: UserId) -> Result<Vec<Conversation>, AppError> {
        let started = Instant::now();
        let rows = sqlx::query_as::<_, ConversationRow>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations
            WHERE buyer_id = $1 OR counterpart_id = $1
            ORDER BY last_activity_at DESC, id DESC
            "#
        ))
        .bind(user.as_i64())
        .fetch_all(&self.pool)
        .await?;

        metrics::record_db_query("select", "conversations", started.elapsed().as_secs_f64());
        rows.into_iter().map(ConversationRow::into_conversation).collect()
    }

    async fn record_activity(
        &self,
        id: ConversationId,
        at: DateTime<Utc>,
        summary: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET last_activity_at = GREATEST(last_activity_at, $2), last_message = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(at)
        .bind(summary)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Conversation {} not found", id)));
        }
        Ok(())
    }
}
