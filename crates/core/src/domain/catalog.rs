use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::directory::{RoleId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalTypeId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl fmt::Display for ApprovalTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse classifier for a family of flows ("leave", "disposal", ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalType {
    pub id: ApprovalTypeId,
    pub code: String,
    pub name: String,
    pub sort: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApprovalType {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub sort: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTypeUpdate {
    pub name: Option<String>,
    pub sort: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub type_id: ApprovalTypeId,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFlow {
    pub type_id: ApprovalTypeId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<NodeSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Approver-selection rule of a node. The resolver dispatches on the tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    FixedPerson { user_id: UserId },
    Role { role_id: RoleId },
    DepartmentHead,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedPerson { .. } => "fixed_person",
            Self::Role { .. } => "role",
            Self::DepartmentHead => "department_head",
        }
    }

    pub fn participant_ref(&self) -> Option<i64> {
        match self {
            Self::FixedPerson { user_id } => Some(user_id.0),
            Self::Role { role_id } => Some(role_id.0),
            Self::DepartmentHead => None,
        }
    }

    /// Rebuilds a kind from its stored `(kind, participant_ref)` columns.
    pub fn from_parts(kind: &str, participant_ref: Option<i64>) -> Option<Self> {
        match (kind.trim().to_ascii_lowercase().as_str(), participant_ref) {
            ("fixed_person", Some(id)) => Some(Self::FixedPerson { user_id: UserId(id) }),
            ("role", Some(id)) => Some(Self::Role { role_id: RoleId(id) }),
            ("department_head", None) => Some(Self::DepartmentHead),
            _ => None,
        }
    }
}

/// Node as submitted by an administrator, before it has an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub order: u32,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub flow_id: FlowId,
    pub name: String,
    pub order: u32,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn spec(&self) -> NodeSpec {
        NodeSpec { name: self.name.clone(), order: self.order, kind: self.kind.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowWithNodes {
    pub flow: Flow,
    pub nodes: Vec<Node>,
}
