//! Participant resolution: turns a node plus the applicant's context into the
//! concrete set of approvers for that node.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::catalog::{Node, NodeKind};
use crate::domain::directory::{Department, DepartmentId, User, UserId};
use crate::errors::ApprovalError;
use crate::store::Directory;

/// Upper bound on department nesting; deeper chains are cut off.
pub const MAX_DEPARTMENT_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentLink {
    pub department: Department,
    /// Head of the department, present only while that user is active.
    pub active_head: Option<UserId>,
}

/// Everything the resolver knows about an applicant, captured at the start of
/// the unit of work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceContext {
    pub applicant: User,
    /// Immediate department first, root last.
    pub department_chain: Vec<DepartmentLink>,
}

impl InstanceContext {
    pub async fn load<D>(applicant_id: UserId, directory: &mut D) -> Result<Self, ApprovalError>
    where
        D: Directory + ?Sized,
    {
        let applicant = directory
            .find_user(applicant_id)
            .await?
            .filter(|user| user.active)
            .ok_or_else(|| ApprovalError::not_found("applicant", applicant_id))?;

        let mut department_chain = Vec::new();
        let mut visited: HashSet<DepartmentId> = HashSet::new();
        let mut next = applicant.department_id;

        while let Some(department_id) = next {
            if !visited.insert(department_id) || department_chain.len() >= MAX_DEPARTMENT_DEPTH {
                break;
            }
            let Some(department) = directory.find_department(department_id).await? else {
                break;
            };
            let active_head = match department.head_user_id {
                Some(head_id) => directory
                    .find_user(head_id)
                    .await?
                    .filter(|user| user.active)
                    .map(|user| user.id),
                None => None,
            };
            next = department.parent_id;
            department_chain.push(DepartmentLink { department, active_head });
        }

        Ok(Self { applicant, department_chain })
    }

    /// First active head found walking up from the applicant's department.
    pub fn department_head(&self) -> Option<UserId> {
        self.department_chain.iter().find_map(|link| link.active_head)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ParticipantResolver;

impl ParticipantResolver {
    /// Returns the deduplicated, non-empty approver set for `node`.
    pub async fn resolve<D>(
        &self,
        node: &Node,
        context: &InstanceContext,
        directory: &mut D,
    ) -> Result<Vec<UserId>, ApprovalError>
    where
        D: Directory + ?Sized,
    {
        let approvers: BTreeSet<UserId> = match &node.kind {
            NodeKind::FixedPerson { user_id } => {
                let active = directory
                    .find_user(*user_id)
                    .await?
                    .map(|user| user.active)
                    .unwrap_or(false);
                if !active {
                    return Err(ApprovalError::ResolveFailed(format!(
                        "node `{}`: user {user_id} is missing or inactive",
                        node.name
                    )));
                }
                BTreeSet::from([*user_id])
            }
            NodeKind::Role { role_id } => {
                directory.active_role_members(*role_id).await?.into_iter().collect()
            }
            NodeKind::DepartmentHead => context.department_head().into_iter().collect(),
        };

        if approvers.is_empty() {
            let reason = match &node.kind {
                NodeKind::Role { role_id } => format!("role {role_id} has no active members"),
                NodeKind::DepartmentHead => format!(
                    "no active department head above applicant {}",
                    context.applicant.id
                ),
                NodeKind::FixedPerson { user_id } => format!("user {user_id} is unavailable"),
            };
            return Err(ApprovalError::ResolveFailed(format!("node `{}`: {reason}", node.name)));
        }

        Ok(approvers.into_iter().collect())
    }
}
