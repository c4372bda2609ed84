use async_trait::async_trait;
use sqlx::{Sqlite, Transaction};

use officeflow_core::store::{ApprovalStore, StoreError, StoreTx};

use super::db_error;
use crate::DbPool;

/// SQLite-backed store. Each unit of work is one database transaction.
#[derive(Clone)]
pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(SqlStoreTx { tx }))
    }
}

/// An open transaction. Dropping it without [`StoreTx::commit`] rolls back.
pub struct SqlStoreTx {
    pub(crate) tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTx for SqlStoreTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_error)
    }
}
