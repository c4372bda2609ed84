use std::collections::BTreeMap;

use officeflow_core::audit::{AuditEvent, AuditSink, TracingAuditSink};
use officeflow_core::domain::instance::InstanceId;
use tracing::warn;

use super::{timestamp, RepositoryError};
use crate::DbPool;

/// Persists audit events to `approval_audit_event` off the request path.
/// Every event is also forwarded to the tracing pipeline.
#[derive(Clone)]
pub struct SqlAuditSink {
    pool: DbPool,
}

/// One persisted audit row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredAuditEvent {
    pub id: String,
    pub instance_id: Option<InstanceId>,
    pub correlation_id: String,
    pub event_type: String,
    pub outcome: String,
    pub metadata: BTreeMap<String, String>,
}

impl SqlAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn persist(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO approval_audit_event
                 (id, instance_id, correlation_id, event_type, category, actor, outcome,
                  metadata_json, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&event.event_id)
        .bind(event.instance_id.map(|id| id.0))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(metadata_json)
        .bind(timestamp(event.occurred_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<StoredAuditEvent>, RepositoryError> {
        let rows: Vec<(String, Option<i64>, String, String, String, String)> = sqlx::query_as(
            "SELECT id, instance_id, correlation_id, event_type, outcome, metadata_json
             FROM approval_audit_event
             WHERE instance_id = ?1
             ORDER BY occurred_at ASC, id ASC",
        )
        .bind(instance_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, instance_id, correlation_id, event_type, outcome, metadata_json)| {
                let metadata = serde_json::from_str(&metadata_json)
                    .map_err(|error| RepositoryError::Decode(error.to_string()))?;
                Ok(StoredAuditEvent {
                    id,
                    instance_id: instance_id.map(InstanceId),
                    correlation_id,
                    event_type,
                    outcome,
                    metadata,
                })
            })
            .collect()
    }
}

impl AuditSink for SqlAuditSink {
    fn emit(&self, event: AuditEvent) {
        TracingAuditSink.emit(event.clone());

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                event_name = "audit.persist_skipped",
                event_id = %event.event_id,
                "no async runtime available; audit event not persisted"
            );
            return;
        };
        let sink = self.clone();
        runtime.spawn(async move {
            if let Err(error) = sink.persist(&event).await {
                warn!(
                    event_name = "audit.persist_failed",
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %error,
                    "failed to persist audit event"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use officeflow_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
    use officeflow_core::domain::instance::InstanceId;

    use super::SqlAuditSink;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn persisted_events_keep_their_metadata() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let sink = SqlAuditSink::new(pool);

        let context = AuditContext::new("req-1", "user:42");
        let event = AuditEvent::new(
            Some(InstanceId(3)),
            &context,
            "approval.decided",
            AuditCategory::Engine,
            AuditOutcome::Rejected,
        )
        .with_metadata("error_kind", "already_decided");
        sink.persist(&event).await.expect("persist");

        let stored = sink.list_for_instance(InstanceId(3)).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].correlation_id, "req-1");
        assert_eq!(stored[0].outcome, "rejected");
        assert_eq!(
            stored[0].metadata.get("error_kind").map(String::as_str),
            Some("already_decided")
        );
    }
}
