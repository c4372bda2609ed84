use async_trait::async_trait;

use officeflow_core::domain::directory::{Department, DepartmentId, RoleId, User, UserId};
use officeflow_core::store::{Directory, StoreError};

use super::store::SqlStoreTx;
use super::{column, db_error};

#[async_trait]
impl Directory for SqlStoreTx {
    async fn find_user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, active, department_id FROM users
             WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let department_id: Option<i64> = column(&row, "department_id")?;
        Ok(Some(User {
            id: UserId(column(&row, "id")?),
            name: column(&row, "name")?,
            active: column(&row, "active")?,
            department_id: department_id.map(DepartmentId),
        }))
    }

    async fn active_role_members(&mut self, role: RoleId) -> Result<Vec<UserId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT u.id FROM user_roles ur
             JOIN users u ON u.id = ur.user_id
             WHERE ur.role_id = ?1 AND u.active = 1 AND u.deleted_at IS NULL
             ORDER BY u.id ASC",
        )
        .bind(role.0)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn find_department(
        &mut self,
        id: DepartmentId,
    ) -> Result<Option<Department>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, parent_id, head_user_id FROM departments
             WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let parent_id: Option<i64> = column(&row, "parent_id")?;
        let head_user_id: Option<i64> = column(&row, "head_user_id")?;
        Ok(Some(Department {
            id: DepartmentId(column(&row, "id")?),
            name: column(&row, "name")?,
            parent_id: parent_id.map(DepartmentId),
            head_user_id: head_user_id.map(UserId),
        }))
    }
}
