use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use officeflow_core::domain::catalog::{
    ApprovalType, ApprovalTypeId, ApprovalTypeUpdate, Flow, FlowId, FlowUpdate, NewApprovalType,
    Node, NodeId, NodeKind, NodeSpec,
};
use officeflow_core::store::{CatalogTx, StoreError};

use super::store::SqlStoreTx;
use super::{column, count, db_error, timestamp, timestamp_column};

const TYPE_COLUMNS: &str = "id, code, name, sort, active, created_at, updated_at";
const FLOW_COLUMNS: &str = "id, type_id, name, description, active, created_at, updated_at";

fn row_to_type(row: &SqliteRow) -> Result<ApprovalType, StoreError> {
    Ok(ApprovalType {
        id: ApprovalTypeId(column(row, "id")?),
        code: column(row, "code")?,
        name: column(row, "name")?,
        sort: column(row, "sort")?,
        active: column(row, "active")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

fn row_to_flow(row: &SqliteRow) -> Result<Flow, StoreError> {
    Ok(Flow {
        id: FlowId(column(row, "id")?),
        type_id: ApprovalTypeId(column(row, "type_id")?),
        name: column(row, "name")?,
        description: column(row, "description")?,
        active: column(row, "active")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

fn row_to_node(row: &SqliteRow) -> Result<Node, StoreError> {
    let id: i64 = column(row, "id")?;
    let kind: String = column(row, "kind")?;
    let participant_ref: Option<i64> = column(row, "participant_ref")?;
    let order: i64 = column(row, "sort_order")?;
    let kind = NodeKind::from_parts(&kind, participant_ref).ok_or_else(|| {
        StoreError::Decode(format!(
            "node {id} has kind `{kind}` with participant {participant_ref:?}"
        ))
    })?;
    let order = u32::try_from(order)
        .map_err(|_| StoreError::Decode(format!("node {id} has order {order}")))?;

    Ok(Node {
        id: NodeId(id),
        flow_id: FlowId(column(row, "flow_id")?),
        name: column(row, "name")?,
        order,
        kind,
    })
}

impl SqlStoreTx {
    async fn require_type(&mut self, id: ApprovalTypeId) -> Result<ApprovalType, StoreError> {
        self.find_type(id).await?.ok_or_else(|| StoreError::not_found("approval type", id))
    }

    async fn require_flow(&mut self, id: FlowId) -> Result<Flow, StoreError> {
        self.find_flow(id).await?.ok_or_else(|| StoreError::not_found("flow", id))
    }
}

#[async_trait]
impl CatalogTx for SqlStoreTx {
    async fn list_types(&mut self) -> Result<Vec<ApprovalType>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TYPE_COLUMNS} FROM approval_types
             WHERE deleted_at IS NULL
             ORDER BY sort ASC, id ASC"
        ))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_type).collect()
    }

    async fn find_type(
        &mut self,
        id: ApprovalTypeId,
    ) -> Result<Option<ApprovalType>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TYPE_COLUMNS} FROM approval_types WHERE id = ?1 AND deleted_at IS NULL"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_type).transpose()
    }

    async fn find_type_by_code(&mut self, code: &str) -> Result<Option<ApprovalType>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TYPE_COLUMNS} FROM approval_types WHERE code = ?1 AND deleted_at IS NULL"
        ))
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_type).transpose()
    }

    async fn insert_type(
        &mut self,
        new: &NewApprovalType,
        now: DateTime<Utc>,
    ) -> Result<ApprovalType, StoreError> {
        let result = sqlx::query(
            "INSERT INTO approval_types (code, name, sort, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
        )
        .bind(&new.code)
        .bind(&new.name)
        .bind(new.sort)
        .bind(timestamp(now))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        self.require_type(ApprovalTypeId(result.last_insert_rowid())).await
    }

    async fn update_type(
        &mut self,
        id: ApprovalTypeId,
        update: &ApprovalTypeUpdate,
        now: DateTime<Utc>,
    ) -> Result<ApprovalType, StoreError> {
        let existing = self.require_type(id).await?;
        let name = update.name.as_deref().map(str::trim).unwrap_or(&existing.name);
        let sort = update.sort.unwrap_or(existing.sort);

        sqlx::query("UPDATE approval_types SET name = ?1, sort = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(name)
            .bind(sort)
            .bind(timestamp(now))
            .bind(id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        self.require_type(id).await
    }

    async fn set_type_active(
        &mut self,
        id: ApprovalTypeId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<ApprovalType, StoreError> {
        let result = sqlx::query(
            "UPDATE approval_types SET active = ?1, updated_at = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
        )
        .bind(active)
        .bind(timestamp(now))
        .bind(id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("approval type", id));
        }

        self.require_type(id).await
    }

    async fn soft_delete_type(
        &mut self,
        id: ApprovalTypeId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE approval_types SET deleted_at = ?1, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NULL",
        )
        .bind(timestamp(now))
        .bind(id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("approval type", id));
        }
        Ok(())
    }

    async fn count_flows_for_type(&mut self, id: ApprovalTypeId) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM approval_flows WHERE type_id = ?1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(count(total))
    }

    async fn list_flows(
        &mut self,
        type_id: Option<ApprovalTypeId>,
        only_active: bool,
    ) -> Result<Vec<Flow>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM approval_flows
             WHERE deleted_at IS NULL
               AND (?1 IS NULL OR type_id = ?1)
               AND (?2 = 0 OR active = 1)
             ORDER BY id ASC"
        ))
        .bind(type_id.map(|id| id.0))
        .bind(only_active)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_flow).collect()
    }

    async fn find_flow(&mut self, id: FlowId) -> Result<Option<Flow>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM approval_flows WHERE id = ?1 AND deleted_at IS NULL"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_flow).transpose()
    }

    async fn lock_flow(&mut self, id: FlowId) -> Result<(), StoreError> {
        // A no-op write takes SQLite's write lock before any read in this transaction.
        sqlx::query("UPDATE approval_flows SET updated_at = updated_at WHERE id = ?1")
            .bind(id.0)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn insert_flow(
        &mut self,
        type_id: ApprovalTypeId,
        name: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Flow, StoreError> {
        let result = sqlx::query(
            "INSERT INTO approval_flows (type_id, name, description, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
        )
        .bind(type_id.0)
        .bind(name)
        .bind(description)
        .bind(timestamp(now))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        self.require_flow(FlowId(result.last_insert_rowid())).await
    }

    async fn update_flow(
        &mut self,
        id: FlowId,
        update: &FlowUpdate,
        now: DateTime<Utc>,
    ) -> Result<Flow, StoreError> {
        let existing = self.require_flow(id).await?;
        let name = update.name.as_deref().map(str::trim).unwrap_or(&existing.name);
        let description = update.description.as_deref().unwrap_or(&existing.description);

        sqlx::query(
            "UPDATE approval_flows SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(name)
        .bind(description)
        .bind(timestamp(now))
        .bind(id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        self.require_flow(id).await
    }

    async fn set_flow_active(
        &mut self,
        id: FlowId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Flow, StoreError> {
        let result = sqlx::query(
            "UPDATE approval_flows SET active = ?1, updated_at = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
        )
        .bind(active)
        .bind(timestamp(now))
        .bind(id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("flow", id));
        }

        self.require_flow(id).await
    }

    async fn soft_delete_flow(&mut self, id: FlowId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let deleted_at = timestamp(now);
        let result = sqlx::query(
            "UPDATE approval_flows SET deleted_at = ?1, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NULL",
        )
        .bind(&deleted_at)
        .bind(id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("flow", id));
        }

        sqlx::query(
            "UPDATE approval_nodes SET deleted_at = ?1 WHERE flow_id = ?2 AND deleted_at IS NULL",
        )
        .bind(&deleted_at)
        .bind(id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn list_nodes(&mut self, flow_id: FlowId) -> Result<Vec<Node>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, flow_id, name, kind, participant_ref, sort_order
             FROM approval_nodes
             WHERE flow_id = ?1 AND deleted_at IS NULL
             ORDER BY sort_order ASC",
        )
        .bind(flow_id.0)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_node).collect()
    }

    async fn replace_nodes(
        &mut self,
        flow_id: FlowId,
        nodes: &[NodeSpec],
        now: DateTime<Utc>,
    ) -> Result<Vec<Node>, StoreError> {
        let now = timestamp(now);
        // Retired nodes stay behind for the records of finished instances.
        sqlx::query(
            "UPDATE approval_nodes SET deleted_at = ?1 WHERE flow_id = ?2 AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(flow_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        for spec in nodes {
            sqlx::query(
                "INSERT INTO approval_nodes
                     (flow_id, name, kind, participant_ref, sort_order, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(flow_id.0)
            .bind(spec.name.trim())
            .bind(spec.kind.as_str())
            .bind(spec.kind.participant_ref())
            .bind(i64::from(spec.order))
            .bind(&now)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }

        self.list_nodes(flow_id).await
    }

    async fn count_live_instances_for_flow(&mut self, flow_id: FlowId) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM approval_instances
             WHERE flow_id = ?1 AND status IN ('pending', 'running') AND deleted_at IS NULL",
        )
        .bind(flow_id.0)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(count(total))
    }
}
