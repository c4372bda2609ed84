use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{FlowId, NodeId};
use crate::domain::directory::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRecordId(pub i64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Running,
    Approved,
    Rejected,
    Cancelled,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Superseded` marks a record closed by the system because a sibling
/// approver decided first or the instance was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRecordStatus {
    Pending,
    Approved,
    Rejected,
    Superseded,
}

impl NodeRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Superseded => "superseded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for NodeRecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn record_status(&self) -> NodeRecordStatus {
        match self {
            Self::Approve => NodeRecordStatus::Approved,
            Self::Reject => NodeRecordStatus::Rejected,
        }
    }
}

/// Module tag carried in a business reference. The dispatcher binds its
/// effects per tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusinessModule {
    Leave,
    Overtime,
    BusinessTrip,
    Transfer,
    Resignation,
    Probation,
    AssetDisposal,
    VehicleApplication,
    SealApplication,
    Document,
    MeetingReservation,
}

impl BusinessModule {
    pub const ALL: [BusinessModule; 11] = [
        Self::Leave,
        Self::Overtime,
        Self::BusinessTrip,
        Self::Transfer,
        Self::Resignation,
        Self::Probation,
        Self::AssetDisposal,
        Self::VehicleApplication,
        Self::SealApplication,
        Self::Document,
        Self::MeetingReservation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leave => "leave",
            Self::Overtime => "overtime",
            Self::BusinessTrip => "business-trip",
            Self::Transfer => "transfer",
            Self::Resignation => "resignation",
            Self::Probation => "probation",
            Self::AssetDisposal => "asset-disposal",
            Self::VehicleApplication => "vehicle-application",
            Self::SealApplication => "seal-application",
            Self::Document => "document",
            Self::MeetingReservation => "meeting-reservation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|module| module.as_str() == normalized)
    }

    /// Table holding the rows this module submits for approval.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Leave => "leave_applications",
            Self::Overtime => "overtime_applications",
            Self::BusinessTrip => "business_trip_applications",
            Self::Transfer => "transfer_applications",
            Self::Resignation => "resignation_applications",
            Self::Probation => "probation_reviews",
            Self::AssetDisposal => "asset_disposals",
            Self::VehicleApplication => "vehicle_applications",
            Self::SealApplication => "seal_applications",
            Self::Document => "documents",
            Self::MeetingReservation => "meeting_reservations",
        }
    }
}

impl fmt::Display for BusinessModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessRef {
    pub module: BusinessModule,
    pub row_id: i64,
}

impl BusinessRef {
    pub fn new(module: BusinessModule, row_id: i64) -> Self {
        Self { module, row_id }
    }
}

impl fmt::Display for BusinessRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.row_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub flow_id: FlowId,
    pub title: String,
    pub body: String,
    pub applicant_id: UserId,
    pub current_node_id: Option<NodeId>,
    pub status: InstanceStatus,
    pub business: Option<BusinessRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeRecordId,
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    pub approver_id: UserId,
    pub status: NodeRecordStatus,
    pub comment: String,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for `InstanceTx::create_instance`; the store assigns ids and
/// timestamps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewInstance {
    pub flow_id: FlowId,
    pub applicant_id: UserId,
    pub title: String,
    pub body: String,
    pub business: Option<BusinessRef>,
}

/// What an applicant submits; the flow is chosen separately.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub applicant_id: UserId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub business: Option<BusinessRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceView {
    pub instance: Instance,
    pub records: Vec<NodeRecord>,
}

impl InstanceView {
    pub fn open_records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records.iter().filter(|record| record.status.is_open())
    }
}

/// One open task in an approver's inbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub record_id: NodeRecordId,
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    pub title: String,
    pub applicant_id: UserId,
    pub business: Option<BusinessRef>,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFilter {
    pub applicant_id: Option<UserId>,
    pub status: Option<InstanceStatus>,
}
