use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "departments",
        "users",
        "roles",
        "user_roles",
        "approval_types",
        "approval_flows",
        "approval_nodes",
        "approval_instances",
        "approval_node_records",
        "approval_dispatch_log",
        "approval_audit_event",
        "leave_applications",
        "overtime_applications",
        "business_trip_applications",
        "transfer_applications",
        "resignation_applications",
        "probation_reviews",
        "meeting_reservations",
        "assets",
        "vehicles",
        "seals",
        "asset_disposals",
        "vehicle_applications",
        "seal_applications",
        "documents",
        "idx_users_department_id",
        "idx_user_roles_role_id",
        "idx_approval_types_code_live",
        "idx_approval_flows_type_id",
        "idx_approval_nodes_flow_order_live",
        "idx_approval_instances_live_business",
        "idx_approval_instances_applicant",
        "idx_approval_instances_flow_status",
        "idx_approval_node_records_approver_status",
        "idx_approval_audit_event_instance_id",
        "idx_approval_audit_event_occurred_at",
    ];

    async fn table_exists(pool: &sqlx::SqlitePool, name: &str) -> bool {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
            == 1
    }

    #[tokio::test]
    async fn migrations_create_engine_and_business_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in [
            "approval_types",
            "approval_flows",
            "approval_nodes",
            "approval_instances",
            "approval_node_records",
            "approval_dispatch_log",
            "departments",
            "asset_disposals",
            "documents",
        ] {
            assert!(table_exists(&pool, table).await, "{table} should exist");
        }
    }

    #[tokio::test]
    async fn live_business_index_rejects_a_second_live_instance() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        sqlx::query(
            "INSERT INTO users (id, name) VALUES (42, 'Applicant');
             INSERT INTO approval_types (id, code, name, created_at, updated_at)
                 VALUES (1, 'disposal', 'Disposal', '2026-01-05T09:00:00Z', '2026-01-05T09:00:00Z');
             INSERT INTO approval_flows (id, type_id, name, created_at, updated_at)
                 VALUES (1, 1, 'disposal', '2026-01-05T09:00:00Z', '2026-01-05T09:00:00Z');",
        )
        .execute(&pool)
        .await
        .expect("seed");

        let insert = "INSERT INTO approval_instances
                (flow_id, title, applicant_id, status, business_tag, business_id,
                 created_at, updated_at)
            VALUES (1, 'Dispose', 42, ?1, 'asset-disposal', 77,
                    '2026-01-05T09:00:00Z', '2026-01-05T09:00:00Z')";
        sqlx::query(insert).bind("rejected").execute(&pool).await.expect("terminal instance");
        sqlx::query(insert).bind("running").execute(&pool).await.expect("live instance");

        let duplicate = sqlx::query(insert).bind("running").execute(&pool).await;
        assert!(
            matches!(duplicate, Err(sqlx::Error::Database(ref error)) if error.is_unique_violation()),
            "second live instance should violate the partial index: {duplicate:?}"
        );
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
