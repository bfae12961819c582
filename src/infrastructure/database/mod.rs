//! Database Module
//!
//! PostgreSQL pool for the `postgres` storage backend, its migrations, and
//! the liveness probe used by readiness checks.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::time::Instant;

use crate::config::DatabaseSettings;
use crate::infrastructure::metrics;

/// Create a PostgreSQL connection pool
pub async fn create_pool(settings: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout))
        .test_before_acquire(true)
        .connect(&settings.url)
        .await?;
    refresh_pool_stats(&pool);
    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Round-trip a trivial query and return its latency.
pub async fn ping(pool: &PgPool) -> Result<Duration, sqlx::Error> {
    let started = Instant::now();
    sqlx::query("SELECT 1").execute(pool).await?;
    let latency = started.elapsed();
    refresh_pool_stats(pool);
    Ok(latency)
}

fn refresh_pool_stats(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle() as u32;
    metrics::update_db_pool_stats(
        idle,
        size.saturating_sub(idle),
        pool.options().get_max_connections(),
    );
}
