use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use summarybot_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Every pooled connection runs in WAL mode and waits up to 5 s on a locked database, so the
/// scheduler and the event handlers can write concurrently. `delivery_log.subscription_id` is a
/// logical reference only; foreign keys stay off.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use summarybot_core::config::DatabaseConfig;

    use super::connect_with_config;
    use crate::migrations;

    #[tokio::test]
    async fn pool_connections_apply_pragmas() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 5,
        };
        let pool = connect_with_config(&config).await.expect("connect");

        let (foreign_keys,): (i64,) =
            sqlx::query_as("PRAGMA foreign_keys").fetch_one(&pool).await.expect("foreign_keys");
        let (busy_timeout,): (i64,) =
            sqlx::query_as("PRAGMA busy_timeout").fetch_one(&pool).await.expect("busy_timeout");

        assert_eq!(foreign_keys, 0);
        assert_eq!(busy_timeout, 5000);
    }

    #[tokio::test]
    async fn delivery_log_accepts_rows_for_unknown_subscriptions() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 5,
        };
        let pool = connect_with_config(&config).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        sqlx::query(
            "INSERT INTO delivery_log (subscription_id, delivered_at, status, message_count) \
             VALUES (999, '2026-10-18T09:00:00.000000+00:00', 'success', 0)",
        )
        .execute(&pool)
        .await
        .expect("orphan log row should be stored");
    }
}
