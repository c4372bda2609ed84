//! Storage seam for the catalog and the engine.
//!
//! Every engine operation opens one unit of work with [`ApprovalStore::begin`]
//! and either commits it or drops it. Dropping a [`StoreTx`] rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::dispatch::BusinessEffect;
use crate::domain::catalog::{
    ApprovalType, ApprovalTypeId, ApprovalTypeUpdate, Flow, FlowId, FlowUpdate, NewApprovalType,
    Node, NodeId, NodeSpec,
};
use crate::domain::directory::{Department, DepartmentId, RoleId, User, UserId};
use crate::domain::instance::{
    BusinessRef, Instance, InstanceFilter, InstanceId, InstanceStatus, InstanceView, NewInstance,
    NodeRecord, NodeRecordId, NodeRecordStatus, TodoItem,
};
use crate::domain::page::{Page, PageRequest};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("instance {0} is terminal")]
    InstanceTerminal(InstanceId),
    #[error("duplicate approver: {0}")]
    DuplicateApprover(String),
    #[error("already decided: {0}")]
    AlreadyDecided(String),
    #[error("business record busy: {0}")]
    BusinessBusy(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Transient failures are the only ones worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
pub trait StoreTx: CatalogTx + InstanceTx + Directory + BusinessTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Catalog rows. Soft-deleted rows are invisible to every method.
#[async_trait]
pub trait CatalogTx: Send {
    async fn list_types(&mut self) -> Result<Vec<ApprovalType>, StoreError>;

    async fn find_type(&mut self, id: ApprovalTypeId)
        -> Result<Option<ApprovalType>, StoreError>;

    async fn find_type_by_code(&mut self, code: &str) -> Result<Option<ApprovalType>, StoreError>;

    /// Fails with `Conflict` when the code is taken by a live type.
    async fn insert_type(
        &mut self,
        new: &NewApprovalType,
        now: DateTime<Utc>,
    ) -> Result<ApprovalType, StoreError>;

    async fn update_type(
        &mut self,
        id: ApprovalTypeId,
        update: &ApprovalTypeUpdate,
        now: DateTime<Utc>,
    ) -> Result<ApprovalType, StoreError>;

    async fn set_type_active(
        &mut self,
        id: ApprovalTypeId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<ApprovalType, StoreError>;

    async fn soft_delete_type(
        &mut self,
        id: ApprovalTypeId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn count_flows_for_type(&mut self, id: ApprovalTypeId) -> Result<u64, StoreError>;

    /// Flows ordered by id.
    async fn list_flows(
        &mut self,
        type_id: Option<ApprovalTypeId>,
        only_active: bool,
    ) -> Result<Vec<Flow>, StoreError>;

    async fn find_flow(&mut self, id: FlowId) -> Result<Option<Flow>, StoreError>;

    /// Takes the write lock on the flow row for the rest of the unit of work.
    async fn lock_flow(&mut self, id: FlowId) -> Result<(), StoreError>;

    async fn insert_flow(
        &mut self,
        type_id: ApprovalTypeId,
        name: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Flow, StoreError>;

    async fn update_flow(
        &mut self,
        id: FlowId,
        update: &FlowUpdate,
        now: DateTime<Utc>,
    ) -> Result<Flow, StoreError>;

    async fn set_flow_active(
        &mut self,
        id: FlowId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Flow, StoreError>;

    /// Soft-deletes the flow together with its nodes.
    async fn soft_delete_flow(&mut self, id: FlowId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Nodes ordered ascending by `order`.
    async fn list_nodes(&mut self, flow_id: FlowId) -> Result<Vec<Node>, StoreError>;

    /// Retires the current node set and inserts `nodes` in its place.
    async fn replace_nodes(
        &mut self,
        flow_id: FlowId,
        nodes: &[NodeSpec],
        now: DateTime<Utc>,
    ) -> Result<Vec<Node>, StoreError>;

    async fn count_live_instances_for_flow(&mut self, flow_id: FlowId) -> Result<u64, StoreError>;
}

/// Instance and node-record rows. Only the engine calls the mutating methods.
#[async_trait]
pub trait InstanceTx: Send {
    /// Serializes the rest of the unit of work against other writers of the
    /// same instance. Fails with `NotFound` for an unknown id.
    async fn lock_instance(&mut self, id: InstanceId) -> Result<(), StoreError>;

    async fn load_instance(&mut self, id: InstanceId) -> Result<Option<InstanceView>, StoreError>;

    async fn find_live_instance_by_business(
        &mut self,
        business: &BusinessRef,
    ) -> Result<Option<InstanceId>, StoreError>;

    /// Writes a `Running` instance pointing at `first_node` plus one pending
    /// record per approver. Fails with `BusinessBusy` when the business
    /// reference is already bound to a live instance.
    async fn create_instance(
        &mut self,
        new: &NewInstance,
        first_node: NodeId,
        approvers: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<InstanceView, StoreError>;

    async fn append_node_records(
        &mut self,
        instance_id: InstanceId,
        node_id: NodeId,
        approvers: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeRecord>, StoreError>;

    /// Compare-and-set from `Pending` to `outcome`.
    async fn close_node_record(
        &mut self,
        record_id: NodeRecordId,
        outcome: NodeRecordStatus,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, StoreError>;

    async fn transition(
        &mut self,
        instance_id: InstanceId,
        current_node: Option<NodeId>,
        status: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_instances(
        &mut self,
        filter: &InstanceFilter,
        page: PageRequest,
    ) -> Result<Page<Instance>, StoreError>;

    /// Open records of `approver` on running instances, oldest first.
    async fn list_todo(
        &mut self,
        approver: UserId,
        page: PageRequest,
    ) -> Result<Page<TodoItem>, StoreError>;

    /// Records the dispatch of a terminal transition. Returns `false` when the
    /// instance was already dispatched.
    async fn record_dispatch(
        &mut self,
        instance_id: InstanceId,
        outcome: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Read-only organisation data consulted by the participant resolver.
#[async_trait]
pub trait Directory: Send {
    async fn find_user(&mut self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn active_role_members(&mut self, role: RoleId) -> Result<Vec<UserId>, StoreError>;

    async fn find_department(&mut self, id: DepartmentId)
        -> Result<Option<Department>, StoreError>;
}

/// Business rows owned by other modules, touched only by the dispatcher.
#[async_trait]
pub trait BusinessTx: Send {
    async fn business_row_exists(&mut self, business: &BusinessRef) -> Result<bool, StoreError>;

    async fn apply_effect(
        &mut self,
        effect: &BusinessEffect,
        row_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
