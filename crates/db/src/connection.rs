use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use officeflow_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

const SQLITE_MEMORY_URL: &str = "sqlite::memory:";

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.dsn, config.max_connections, config.timeout_secs).await
}

/// Opens a pool with foreign keys, WAL and a busy timeout on every
/// connection. An in-memory database is private to its connection, so it
/// always gets a single-connection pool.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let (database_url, max_connections) = if is_memory_url(database_url) {
        (SQLITE_MEMORY_URL, 1)
    } else {
        (database_url.trim(), max_connections.max(1))
    };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

fn is_memory_url(database_url: &str) -> bool {
    matches!(database_url.trim(), ":memory:" | "sqlite::memory:" | "sqlite://:memory:")
}

#[cfg(test)]
mod tests {
    use super::{connect_with_settings, is_memory_url};

    #[test]
    fn memory_urls_are_recognised() {
        assert!(is_memory_url(":memory:"));
        assert!(is_memory_url("sqlite::memory:"));
        assert!(!is_memory_url("sqlite://officeflow.db"));
    }

    #[tokio::test]
    async fn connections_enforce_foreign_keys() {
        let pool = connect_with_settings(":memory:", 8, 5).await.expect("connect");
        let enabled: i64 =
            sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.expect("pragma");
        assert_eq!(enabled, 1);
        assert_eq!(pool.options().get_max_connections(), 1);
    }
}
