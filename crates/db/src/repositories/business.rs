//! Status updates on rows owned by business modules.
//!
//! Table and column names are interpolated into SQL; they only ever come
//! from the static bindings in `officeflow_core::dispatch`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use officeflow_core::dispatch::BusinessEffect;
use officeflow_core::domain::instance::BusinessRef;
use officeflow_core::store::{BusinessTx, StoreError};

use super::store::SqlStoreTx;
use super::{db_error, timestamp};

#[async_trait]
impl BusinessTx for SqlStoreTx {
    async fn business_row_exists(&mut self, business: &BusinessRef) -> Result<bool, StoreError> {
        let exists: i64 = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1 AND deleted_at IS NULL)",
            business.module.table()
        ))
        .bind(business.row_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(exists == 1)
    }

    async fn apply_effect(
        &mut self,
        effect: &BusinessEffect,
        row_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated_at = timestamp(now);
        match *effect {
            BusinessEffect::SetStatus { table, status } => {
                let result = sqlx::query(&format!(
                    "UPDATE {table} SET status = ?1, updated_at = ?2 WHERE id = ?3"
                ))
                .bind(status)
                .bind(&updated_at)
                .bind(row_id)
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::not_found(table, row_id));
                }
            }
            BusinessEffect::SetLinkedStatus { table, link_column, target_table, status } => {
                let result = sqlx::query(&format!(
                    "UPDATE {target_table} SET status = ?1, updated_at = ?2
                     WHERE id = (SELECT {link_column} FROM {table} WHERE id = ?3)"
                ))
                .bind(status)
                .bind(&updated_at)
                .bind(row_id)
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;
                if result.rows_affected() == 0 {
                    warn!(
                        event_name = "dispatch.linked_row_missing",
                        table,
                        link_column,
                        row_id,
                        "business row has no linked row to update"
                    );
                }
            }
            BusinessEffect::StampDate { table, column } => {
                let result = sqlx::query(&format!(
                    "UPDATE {table} SET {column} = COALESCE({column}, ?1), updated_at = ?2
                     WHERE id = ?3"
                ))
                .bind(now.date_naive().format("%Y-%m-%d").to_string())
                .bind(&updated_at)
                .bind(row_id)
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::not_found(table, row_id));
                }
            }
        }
        Ok(())
    }
}
