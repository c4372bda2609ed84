use chrono::Utc;
use sqlx::Executor;

use officeflow_core::domain::catalog::{NewApprovalType, NodeKind, NodeSpec};
use officeflow_core::domain::directory::{Department, DepartmentId, RoleId, User, UserId};
use officeflow_core::store::{ApprovalStore, StoreError};

use crate::connection::DbPool;
use crate::repositories::memory::BusinessRow;
use crate::repositories::{InMemoryApprovalStore, RepositoryError};

/// Demo organisation, catalog and business rows shared by `officeflow seed`,
/// `memory://` deployments and the engine scenario tests.
pub struct DemoSeedDataset;

const DEMO_DEPARTMENTS: &[(i64, &str, Option<i64>, Option<i64>)] = &[
    (1, "Head Office", None, Some(1)),
    (2, "Operations", Some(1), Some(5)),
    (3, "Field Service", Some(2), None),
];

const DEMO_USERS: &[(i64, &str, bool, i64)] = &[
    (1, "Director Lin", true, 1),
    (5, "Operations Head Zhao", true, 2),
    (7, "Line Manager Chen", true, 2),
    (9, "HR Specialist Wang", true, 1),
    (10, "HR Specialist Liu", true, 1),
    (11, "HR Specialist Sun (left)", false, 1),
    (12, "Finance Controller Xu", true, 1),
    (13, "Asset Officer Hu", true, 1),
    (42, "Field Engineer Ma", true, 3),
];

pub const HR_ROLE: RoleId = RoleId(1);
pub const ADMIN_ROLE: RoleId = RoleId(2);
const DEMO_ROLE_MEMBERS: &[(RoleId, i64)] =
    &[(HR_ROLE, 9), (HR_ROLE, 10), (HR_ROLE, 11), (ADMIN_ROLE, 1)];

/// `(table, id, status, link)` for every demo business row.
const DEMO_BUSINESS_ROWS: &[(&str, i64, &str, Option<(&str, i64)>)] = &[
    ("leave_applications", 1, "pending", None),
    ("leave_applications", 2, "pending", None),
    ("overtime_applications", 1, "pending", None),
    ("business_trip_applications", 1, "pending", None),
    ("transfer_applications", 1, "pending", None),
    ("resignation_applications", 1, "pending", None),
    ("probation_reviews", 1, "pending", None),
    ("meeting_reservations", 1, "pending", None),
    ("assets", 1, "active", None),
    ("asset_disposals", 77, "pending", Some(("asset_id", 1))),
    ("vehicles", 1, "available", None),
    ("vehicle_applications", 1, "pending", Some(("vehicle_id", 1))),
    ("seals", 1, "available", None),
    ("seal_applications", 1, "pending", Some(("seal_id", 1))),
    ("documents", 1, "pending", None),
];

const DEMO_TYPE_CODES: &[&str] = &["leave", "disposal", "meeting"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub users: usize,
    pub approval_types: usize,
    pub flows: usize,
    pub business_rows: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    fn summary() -> SeedResult {
        SeedResult {
            users: DEMO_USERS.len(),
            approval_types: DEMO_TYPE_CODES.len(),
            flows: 3,
            business_rows: DEMO_BUSINESS_ROWS.len(),
        }
    }

    /// Loads the dataset into a migrated database. Loading twice is a no-op.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;
        Ok(Self::summary())
    }

    /// Loads the same dataset into a fresh in-memory store. Catalog rows go
    /// through the store so ids line up with the SQL fixture.
    pub async fn load_into_memory(store: &InMemoryApprovalStore) -> Result<SeedResult, StoreError> {
        for (id, name, parent_id, head_user_id) in DEMO_DEPARTMENTS {
            store
                .put_department(Department {
                    id: DepartmentId(*id),
                    name: (*name).to_string(),
                    parent_id: parent_id.map(DepartmentId),
                    head_user_id: head_user_id.map(UserId),
                })
                .await;
        }
        for (id, name, active, department_id) in DEMO_USERS {
            store
                .put_user(User {
                    id: UserId(*id),
                    name: (*name).to_string(),
                    active: *active,
                    department_id: Some(DepartmentId(*department_id)),
                })
                .await;
        }
        for (role, user_id) in DEMO_ROLE_MEMBERS {
            store.add_role_member(*role, UserId(*user_id)).await;
        }
        for (table, id, status, link) in DEMO_BUSINESS_ROWS {
            let mut row = BusinessRow::new(*status);
            if let Some((column, target_id)) = link {
                row = row.linked(*column, *target_id);
            }
            store.put_business_row(table, *id, row).await;
        }

        let now = Utc::now();
        let mut tx = store.begin().await?;
        let catalog: [(&str, &str, &str, &str, Vec<NodeSpec>); 3] = [
            (
                "leave",
                "Leave request",
                "leave-std",
                "Line manager, then HR",
                vec![
                    node("Line manager", 1, NodeKind::FixedPerson { user_id: UserId(7) }),
                    node("HR review", 2, NodeKind::Role { role_id: HR_ROLE }),
                ],
            ),
            (
                "disposal",
                "Asset disposal",
                "disposal",
                "Department head, finance, asset officer",
                vec![
                    node("Department head", 1, NodeKind::DepartmentHead),
                    node("Finance", 2, NodeKind::FixedPerson { user_id: UserId(12) }),
                    node("Asset officer", 3, NodeKind::FixedPerson { user_id: UserId(13) }),
                ],
            ),
            (
                "meeting",
                "Meeting room reservation",
                "meeting-quick",
                "Department head only",
                vec![node("Department head", 1, NodeKind::DepartmentHead)],
            ),
        ];
        for (index, (code, type_name, flow_name, description, nodes)) in catalog.iter().enumerate()
        {
            let sort = i32::try_from(index + 1).unwrap_or(i32::MAX).saturating_mul(10);
            let new = NewApprovalType {
                code: (*code).to_string(),
                name: (*type_name).to_string(),
                sort,
            };
            let approval_type = tx.insert_type(&new, now).await?;
            let flow = tx.insert_flow(approval_type.id, flow_name, description, now).await?;
            tx.replace_nodes(flow.id, nodes, now).await?;
        }
        tx.commit().await?;

        Ok(Self::summary())
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (id, ..) in DEMO_USERS {
            let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)")
                .bind(*id)
                .fetch_one(pool)
                .await?;
            checks.push((format!("user:{id}"), exists == 1));
        }

        for code in DEMO_TYPE_CODES {
            let flows: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM approval_flows f
                 JOIN approval_types t ON t.id = f.type_id
                 WHERE t.code = ?1 AND t.deleted_at IS NULL AND f.deleted_at IS NULL",
            )
            .bind(*code)
            .fetch_one(pool)
            .await?;
            checks.push((format!("approval-type:{code}"), flows > 0));
        }

        let hr_members: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM user_roles ur JOIN users u ON u.id = ur.user_id
             WHERE ur.role_id = ?1 AND u.active = 1",
        )
        .bind(HR_ROLE.0)
        .fetch_one(pool)
        .await?;
        checks.push(("role:hr-active-members".to_string(), hr_members == 2));

        for (table, id, ..) in DEMO_BUSINESS_ROWS {
            let exists: i64 =
                sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)"))
                    .bind(*id)
                    .fetch_one(pool)
                    .await?;
            checks.push((format!("{table}:{id}"), exists == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes engine state and restores demo business rows to their seeded
    /// status. Directory and catalog rows are kept.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(
            "DELETE FROM approval_dispatch_log;
             DELETE FROM approval_node_records;
             DELETE FROM approval_instances;
             DELETE FROM approval_audit_event;",
        )
        .await?;
        for (table, id, status, _) in DEMO_BUSINESS_ROWS {
            let mut statement = format!("UPDATE {table} SET status = ?1");
            if *table == "documents" {
                statement.push_str(", sign_date = NULL");
            }
            statement.push_str(" WHERE id = ?2");
            sqlx::query(&statement).bind(*status).bind(*id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn node(name: &str, order: u32, kind: NodeKind) -> NodeSpec {
    NodeSpec { name: name.to_string(), order, kind }
}
