use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use officeflow_core::domain::catalog::{FlowId, NodeId};
use officeflow_core::domain::directory::UserId;
use officeflow_core::domain::instance::{
    BusinessModule, BusinessRef, Instance, InstanceFilter, InstanceId, InstanceStatus,
    InstanceView, NewInstance, NodeRecord, NodeRecordId, NodeRecordStatus, TodoItem,
};
use officeflow_core::domain::page::{Page, PageRequest};
use officeflow_core::store::{InstanceTx, StoreError};

use super::store::SqlStoreTx;
use super::{
    column, count, db_error, optional_timestamp_column, sql_int, timestamp, timestamp_column,
};

const INSTANCE_COLUMNS: &str = "id, flow_id, title, body, applicant_id, current_node_id, status,
     business_tag, business_id, created_at, updated_at";
const RECORD_COLUMNS: &str =
    "id, instance_id, node_id, approver_id, status, comment, decided_at, created_at";

fn business_ref(
    row: &SqliteRow,
    tag_column: &str,
    id_column: &str,
) -> Result<Option<BusinessRef>, StoreError> {
    let tag: Option<String> = column(row, tag_column)?;
    let row_id: Option<i64> = column(row, id_column)?;
    match (tag, row_id) {
        (Some(tag), Some(row_id)) => {
            let module = BusinessModule::parse(&tag)
                .ok_or_else(|| StoreError::Decode(format!("unknown business tag `{tag}`")))?;
            Ok(Some(BusinessRef::new(module, row_id)))
        }
        (None, None) => Ok(None),
        (tag, row_id) => {
            Err(StoreError::Decode(format!("partial business reference {tag:?}/{row_id:?}")))
        }
    }
}

fn row_to_instance(row: &SqliteRow) -> Result<Instance, StoreError> {
    let status: String = column(row, "status")?;
    let current_node_id: Option<i64> = column(row, "current_node_id")?;

    Ok(Instance {
        id: InstanceId(column(row, "id")?),
        flow_id: FlowId(column(row, "flow_id")?),
        title: column(row, "title")?,
        body: column(row, "body")?,
        applicant_id: UserId(column(row, "applicant_id")?),
        current_node_id: current_node_id.map(NodeId),
        status: InstanceStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("unknown instance status `{status}`")))?,
        business: business_ref(row, "business_tag", "business_id")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

fn row_to_record(row: &SqliteRow) -> Result<NodeRecord, StoreError> {
    let status: String = column(row, "status")?;

    Ok(NodeRecord {
        id: NodeRecordId(column(row, "id")?),
        instance_id: InstanceId(column(row, "instance_id")?),
        node_id: NodeId(column(row, "node_id")?),
        approver_id: UserId(column(row, "approver_id")?),
        status: NodeRecordStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("unknown record status `{status}`")))?,
        comment: column(row, "comment")?,
        decided_at: optional_timestamp_column(row, "decided_at")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

fn row_to_todo(row: &SqliteRow) -> Result<TodoItem, StoreError> {
    Ok(TodoItem {
        record_id: NodeRecordId(column(row, "record_id")?),
        instance_id: InstanceId(column(row, "instance_id")?),
        node_id: NodeId(column(row, "node_id")?),
        title: column(row, "title")?,
        applicant_id: UserId(column(row, "applicant_id")?),
        business: business_ref(row, "business_tag", "business_id")?,
        assigned_at: timestamp_column(row, "assigned_at")?,
    })
}

impl SqlStoreTx {
    async fn instance_status(
        &mut self,
        instance_id: InstanceId,
    ) -> Result<InstanceStatus, StoreError> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM approval_instances WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(instance_id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;
        let status = status.ok_or_else(|| StoreError::not_found("instance", instance_id))?;
        InstanceStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("unknown instance status `{status}`")))
    }

    async fn find_record(&mut self, id: NodeRecordId) -> Result<Option<NodeRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_node_records WHERE id = ?1 AND deleted_at IS NULL"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert_records(
        &mut self,
        instance_id: InstanceId,
        node_id: NodeId,
        approvers: &[UserId],
        now: &str,
    ) -> Result<Vec<NodeRecord>, StoreError> {
        let mut records = Vec::with_capacity(approvers.len());
        for approver in approvers {
            let result = sqlx::query(
                "INSERT INTO approval_node_records
                     (instance_id, node_id, approver_id, status, comment, created_at)
                 VALUES (?1, ?2, ?3, 'pending', '', ?4)",
            )
            .bind(instance_id.0)
            .bind(node_id.0)
            .bind(approver.0)
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| match db_error(error) {
                StoreError::Conflict(_) => StoreError::DuplicateApprover(format!(
                    "user {approver} already holds a record at node {node_id} of instance {instance_id}"
                )),
                other => other,
            })?;

            let id = NodeRecordId(result.last_insert_rowid());
            let record = self
                .find_record(id)
                .await?
                .ok_or_else(|| StoreError::not_found("node record", id))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl InstanceTx for SqlStoreTx {
    async fn lock_instance(&mut self, id: InstanceId) -> Result<(), StoreError> {
        // A no-op write takes SQLite's write lock before any read in this transaction.
        let result = sqlx::query(
            "UPDATE approval_instances SET updated_at = updated_at
             WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("instance", id));
        }
        Ok(())
    }

    async fn load_instance(&mut self, id: InstanceId) -> Result<Option<InstanceView>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instances WHERE id = ?1 AND deleted_at IS NULL"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let instance = row_to_instance(&row)?;

        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_node_records
             WHERE instance_id = ?1 AND deleted_at IS NULL
             ORDER BY id ASC"
        ))
        .bind(id.0)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(InstanceView { instance, records }))
    }

    async fn find_live_instance_by_business(
        &mut self,
        business: &BusinessRef,
    ) -> Result<Option<InstanceId>, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM approval_instances
             WHERE business_tag = ?1 AND business_id = ?2
               AND status IN ('pending', 'running') AND deleted_at IS NULL
             LIMIT 1",
        )
        .bind(business.module.as_str())
        .bind(business.row_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(id.map(InstanceId))
    }

    async fn create_instance(
        &mut self,
        new: &NewInstance,
        first_node: NodeId,
        approvers: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<InstanceView, StoreError> {
        let now = timestamp(now);
        let result = sqlx::query(
            "INSERT INTO approval_instances
                 (flow_id, title, body, applicant_id, current_node_id, status,
                  business_tag, business_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'running', ?6, ?7, ?8, ?8)",
        )
        .bind(new.flow_id.0)
        .bind(&new.title)
        .bind(&new.body)
        .bind(new.applicant_id.0)
        .bind(first_node.0)
        .bind(new.business.map(|business| business.module.as_str()))
        .bind(new.business.map(|business| business.row_id))
        .bind(&now)
        .execute(&mut *self.tx)
        .await
        .map_err(|error| match (db_error(error), new.business) {
            (StoreError::Conflict(_), Some(business)) => {
                StoreError::BusinessBusy(format!("{business} is bound to a live instance"))
            }
            (other, _) => other,
        })?;

        let instance_id = InstanceId(result.last_insert_rowid());
        self.insert_records(instance_id, first_node, approvers, &now).await?;
        self.load_instance(instance_id)
            .await?
            .ok_or_else(|| StoreError::not_found("instance", instance_id))
    }

    async fn append_node_records(
        &mut self,
        instance_id: InstanceId,
        node_id: NodeId,
        approvers: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeRecord>, StoreError> {
        if self.instance_status(instance_id).await?.is_terminal() {
            return Err(StoreError::InstanceTerminal(instance_id));
        }
        self.insert_records(instance_id, node_id, approvers, &timestamp(now)).await
    }

    async fn close_node_record(
        &mut self,
        record_id: NodeRecordId,
        outcome: NodeRecordStatus,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, StoreError> {
        if outcome.is_open() {
            return Err(StoreError::Database(format!(
                "record {record_id} cannot be closed as {outcome}"
            )));
        }

        let result = sqlx::query(
            "UPDATE approval_node_records SET status = ?1, comment = ?2, decided_at = ?3
             WHERE id = ?4 AND status = 'pending' AND deleted_at IS NULL",
        )
        .bind(outcome.as_str())
        .bind(comment)
        .bind(timestamp(now))
        .bind(record_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let record = self
            .find_record(record_id)
            .await?
            .ok_or_else(|| StoreError::not_found("node record", record_id))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyDecided(format!(
                "record {record_id} is already {}",
                record.status
            )));
        }
        Ok(record)
    }

    async fn transition(
        &mut self,
        instance_id: InstanceId,
        current_node: Option<NodeId>,
        status: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE approval_instances SET status = ?1, current_node_id = ?2, updated_at = ?3
             WHERE id = ?4 AND status IN ('pending', 'running') AND deleted_at IS NULL",
        )
        .bind(status.as_str())
        .bind(current_node.map(|node| node.0))
        .bind(timestamp(now))
        .bind(instance_id.0)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            // Distinguishes a missing row from one that already ended.
            self.instance_status(instance_id).await?;
            return Err(StoreError::InstanceTerminal(instance_id));
        }
        Ok(())
    }

    async fn list_instances(
        &mut self,
        filter: &InstanceFilter,
        page: PageRequest,
    ) -> Result<Page<Instance>, StoreError> {
        let applicant = filter.applicant_id.map(|id| id.0);
        let status = filter.status.map(|status| status.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM approval_instances
             WHERE deleted_at IS NULL
               AND (?1 IS NULL OR applicant_id = ?1)
               AND (?2 IS NULL OR status = ?2)",
        )
        .bind(applicant)
        .bind(status)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instances
             WHERE deleted_at IS NULL
               AND (?1 IS NULL OR applicant_id = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY id DESC
             LIMIT ?3 OFFSET ?4"
        ))
        .bind(applicant)
        .bind(status)
        .bind(sql_int(page.limit()))
        .bind(sql_int(page.offset()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let data = rows.iter().map(row_to_instance).collect::<Result<Vec<_>, _>>()?;
        Ok(Page { data, total: count(total) })
    }

    async fn list_todo(
        &mut self,
        approver: UserId,
        page: PageRequest,
    ) -> Result<Page<TodoItem>, StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(1)
             FROM approval_node_records r
             JOIN approval_instances i ON i.id = r.instance_id
             WHERE r.approver_id = ?1 AND r.status = 'pending' AND r.deleted_at IS NULL
               AND i.status = 'running' AND i.deleted_at IS NULL",
        )
        .bind(approver.0)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let rows = sqlx::query(
            "SELECT r.id AS record_id, r.instance_id, r.node_id, r.created_at AS assigned_at,
                    i.title, i.applicant_id, i.business_tag, i.business_id
             FROM approval_node_records r
             JOIN approval_instances i ON i.id = r.instance_id
             WHERE r.approver_id = ?1 AND r.status = 'pending' AND r.deleted_at IS NULL
               AND i.status = 'running' AND i.deleted_at IS NULL
             ORDER BY r.id ASC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(approver.0)
        .bind(sql_int(page.limit()))
        .bind(sql_int(page.offset()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let data = rows.iter().map(row_to_todo).collect::<Result<Vec<_>, _>>()?;
        Ok(Page { data, total: count(total) })
    }

    async fn record_dispatch(
        &mut self,
        instance_id: InstanceId,
        outcome: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO approval_dispatch_log (instance_id, outcome, dispatched_at)
             VALUES (?1, ?2, ?3)",
        )
        .bind(instance_id.0)
        .bind(outcome.as_str())
        .bind(timestamp(now))
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }
}
