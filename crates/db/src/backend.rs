use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use officeflow_core::audit::{AuditSink, TracingAuditSink};
use officeflow_core::config::{DatabaseConfig, DsnKind};
use officeflow_core::store::{ApprovalStore, StoreError};

use crate::connection::{connect_with_config, DbPool};
use crate::fixtures::DemoSeedDataset;
use crate::migrations;
use crate::repositories::{InMemoryApprovalStore, SqlApprovalStore, SqlAuditSink};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unsupported database dsn `{0}`")]
    UnsupportedDsn(String),
    #[error("database connection failed: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("demo data could not be loaded: {0}")]
    Seed(#[from] StoreError),
}

/// The store selected by `database.dsn`.
#[derive(Clone)]
pub enum StoreBackend {
    Sqlite(DbPool),
    Memory(InMemoryApprovalStore),
}

impl StoreBackend {
    /// Connects and migrates. A `memory://` store starts with the demo dataset
    /// because nothing else could ever populate its directory.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, BackendError> {
        match config.kind() {
            Some(DsnKind::Sqlite) => {
                let pool = connect_with_config(config).await.map_err(BackendError::Connect)?;
                migrations::run_pending(&pool).await?;
                info!(
                    event_name = "store.opened",
                    backend = "sqlite",
                    max_connections = config.max_connections,
                    "sqlite store ready"
                );
                Ok(Self::Sqlite(pool))
            }
            Some(DsnKind::Memory) => {
                let store = InMemoryApprovalStore::new();
                DemoSeedDataset::load_into_memory(&store).await?;
                info!(event_name = "store.opened", backend = "memory", "in-memory store ready");
                Ok(Self::Memory(store))
            }
            None => Err(BackendError::UnsupportedDsn(config.dsn.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Memory(_) => "memory",
        }
    }

    pub fn store(&self) -> Arc<dyn ApprovalStore> {
        match self {
            Self::Sqlite(pool) => Arc::new(SqlApprovalStore::new(pool.clone())),
            Self::Memory(store) => Arc::new(store.clone()),
        }
    }

    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        match self {
            Self::Sqlite(pool) => Arc::new(SqlAuditSink::new(pool.clone())),
            Self::Memory(_) => Arc::new(TracingAuditSink),
        }
    }

    pub fn pool(&self) -> Option<&DbPool> {
        match self {
            Self::Sqlite(pool) => Some(pool),
            Self::Memory(_) => None,
        }
    }

    /// Cheap liveness probe for health checks.
    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Sqlite(pool) => sqlx::query("SELECT 1")
                .execute(pool)
                .await
                .map(|_| ())
                .map_err(crate::repositories::db_error),
            Self::Memory(store) => store.begin().await.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use officeflow_core::config::DatabaseConfig;

    use super::{BackendError, StoreBackend};

    fn database(dsn: &str) -> DatabaseConfig {
        DatabaseConfig { dsn: dsn.to_string(), max_connections: 1, timeout_secs: 5 }
    }

    #[tokio::test]
    async fn sqlite_memory_dsn_opens_a_migrated_pool() {
        let backend = StoreBackend::open(&database(":memory:")).await.expect("open");
        assert_eq!(backend.name(), "sqlite");
        backend.ping().await.expect("ping");
    }

    #[tokio::test]
    async fn memory_dsn_opens_a_seeded_store() {
        let backend = StoreBackend::open(&database("memory://")).await.expect("open");
        assert_eq!(backend.name(), "memory");
        assert!(backend.pool().is_none());

        let store = backend.store();
        let mut tx = store.begin().await.expect("begin");
        assert!(tx.find_type_by_code("leave").await.expect("lookup").is_some());
    }

    #[tokio::test]
    async fn unknown_dsn_is_rejected() {
        let result = StoreBackend::open(&database("postgres://localhost/oa")).await;
        assert!(matches!(result, Err(BackendError::UnsupportedDsn(_))));
    }
}
