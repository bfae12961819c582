//! User Directory Implementation
//!
//! Read-only PostgreSQL view of marketplace accounts.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::{Principal, UserDirectory, UserId, UserRole};
use crate::shared::error::AppError;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    role: String,
}

/// PostgreSQL user directory implementation.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_principal(&self, id: UserId) -> Result<Option<Principal>, AppError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, role FROM users WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            UserRole::parse(&r.role)
                .map(|role| Principal::new(r.id, role))
                .ok_or_else(|| AppError::Internal(format!("user {} has unknown role '{}'", r.id, r.role)))
        })
        .transpose()
    }

    async fn is_active(&self, id: UserId) -> Result<bool, AppError> {
        let active = sqlx::query_scalar::<_, bool>("SELECT is_active FROM users WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(active.unwrap_or(false))
    }
}
