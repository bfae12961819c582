//! Message Repository Implementation
//!
//! PostgreSQL implementation of message storage. Appends lock the parent
//! conversation row, so ids and timestamps are assigned in one order per
//! conversation.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{
    ContentKind, ConversationId, Message, MessageId, MessageRepository, NewMessage, UserId,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

/// PostgreSQL message repository implementation.
pub struct PgMessageRepository {
    pool: PgPool,
    ids: Arc<SnowflakeGenerator>,
}

impl PgMessageRepository {
    /// Creates a new PgMessageRepository with the given connection pool.
    pub fn new(pool: PgPool, ids: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, ids }
    }
}

/// Internal row type for message queries.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    content: String,
    content_kind: String,
    attachment_ref: Option<String>,
    read: bool,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    /// Converts database row to domain Message entity.
    fn into_message(self) -> Message {
        Message {
            id: MessageId::new(self.id),
            conversation_id: ConversationId::new(self.conversation_id),
            sender_id: UserId::new(self.sender_id),
            content: self.content,
            kind: ContentKind::from_str(&self.content_kind),
            attachment: self.attachment_ref,
            created_at: self.created_at,
            read: self.read,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ParticipantRow {
    buyer_id: i64,
    counterpart_id: i64,
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(&self, message: NewMessage) -> Result<Message, AppError> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        let participants = sqlx::query_as::<_, ParticipantRow>(
            "SELECT buyer_id, counterpart_id FROM conversations WHERE id = $1 FOR UPDATE",
        )
        .bind(message.conversation_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Conversation {} not found", message.conversation_id))
        })?;

        let sender = message.sender_id.as_i64();
        let recipient = if sender == participants.buyer_id {
            participants.counterpart_id
        } else if sender == participants.counterpart_id {
            participants.buyer_id
        } else {
            return Err(AppError::Forbidden(
                "Sender is not a participant of this conversation".into(),
            ));
        };

        let recipient_active = sqlx::query_scalar::<_, bool>(
            "SELECT is_active FROM users WHERE id = $1",
        )
        .bind(recipient)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(false);
        if !recipient_active {
            return Err(AppError::Conflict("Recipient account is deactivated".into()));
        }

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, content_kind, attachment_ref, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, GREATEST(
                clock_timestamp(),
                COALESCE((SELECT MAX(created_at) FROM messages WHERE conversation_id = $2), '-infinity')
            ))
            RETURNING id, conversation_id, sender_id, content, content_kind,
                      attachment_ref, read, created_at
            "#,
        )
        .bind(self.ids.generate())
        .bind(message.conversation_id.as_i64())
        .bind(sender)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(message.attachment.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::record_db_query("insert", "messages", started.elapsed().as_secs_f64());
        Ok(row.into_message())
    }

    async fn list(
        &self,
        conversation_id: ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>, AppError> {
        let started = Instant::now();
        let page_size = i64::from(page_size.max(1));
        let offset = i64::from(page) * page_size;

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, sender_id, content, content_kind,
                   attachment_ref, read, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(conversation_id.as_i64())
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        metrics::record_db_query("select", "messages", started.elapsed().as_secs_f64());
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET read = TRUE
            WHERE conversation_id = $1 AND sender_id <> $2 AND NOT read
            "#,
        )
        .bind(conversation_id.as_i64())
        .bind(reader.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
