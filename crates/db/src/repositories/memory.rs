//! Process-local store for tests and `memory://` deployments.
//!
//! One async mutex serializes every unit of work. A unit of work edits a
//! private copy of the state which replaces the shared state on commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use officeflow_core::dispatch::BusinessEffect;
use officeflow_core::domain::catalog::{
    ApprovalType, ApprovalTypeId, ApprovalTypeUpdate, Flow, FlowId, FlowUpdate, NewApprovalType,
    Node, NodeId, NodeSpec,
};
use officeflow_core::domain::directory::{Department, DepartmentId, RoleId, User, UserId};
use officeflow_core::domain::instance::{
    BusinessRef, Instance, InstanceFilter, InstanceId, InstanceStatus, InstanceView, NewInstance,
    NodeRecord, NodeRecordId, NodeRecordStatus, TodoItem,
};
use officeflow_core::domain::page::{Page, PageRequest};
use officeflow_core::store::{
    ApprovalStore, BusinessTx, CatalogTx, Directory, InstanceTx, StoreError, StoreTx,
};

/// A row owned by a business module, reduced to what the dispatcher touches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusinessRow {
    pub status: String,
    /// Foreign-key columns, e.g. `asset_id`.
    pub links: BTreeMap<String, i64>,
    /// Date columns filled by decisions, e.g. `sign_date`.
    pub dates: BTreeMap<String, String>,
}

impl BusinessRow {
    pub fn new(status: impl Into<String>) -> Self {
        Self { status: status.into(), ..Self::default() }
    }

    pub fn linked(mut self, column: impl Into<String>, target_id: i64) -> Self {
        self.links.insert(column.into(), target_id);
        self
    }
}

#[derive(Clone, Debug)]
struct Stored<T> {
    value: T,
    deleted: bool,
}

impl<T> Stored<T> {
    fn live(value: T) -> Self {
        Self { value, deleted: false }
    }
}

#[derive(Clone, Debug, Default)]
struct Sequences {
    approval_type: i64,
    flow: i64,
    node: i64,
    instance: i64,
    record: i64,
}

fn next(sequence: &mut i64) -> i64 {
    *sequence += 1;
    *sequence
}

#[derive(Clone, Debug, Default)]
struct MemoryState {
    sequences: Sequences,
    users: BTreeMap<UserId, User>,
    departments: BTreeMap<DepartmentId, Department>,
    role_members: BTreeMap<RoleId, BTreeSet<UserId>>,
    types: BTreeMap<ApprovalTypeId, Stored<ApprovalType>>,
    flows: BTreeMap<FlowId, Stored<Flow>>,
    nodes: BTreeMap<NodeId, Stored<Node>>,
    instances: BTreeMap<InstanceId, Instance>,
    records: BTreeMap<NodeRecordId, NodeRecord>,
    dispatched: BTreeMap<InstanceId, InstanceStatus>,
    business: BTreeMap<String, BTreeMap<i64, BusinessRow>>,
}

#[derive(Clone, Default)]
pub struct InMemoryApprovalStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_department(&self, department: Department) {
        self.state.lock().await.departments.insert(department.id, department);
    }

    pub async fn put_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn add_role_member(&self, role: RoleId, user: UserId) {
        self.state.lock().await.role_members.entry(role).or_default().insert(user);
    }

    pub async fn put_business_row(&self, table: &str, id: i64, row: BusinessRow) {
        self.state.lock().await.business.entry(table.to_string()).or_default().insert(id, row);
    }

    pub async fn business_row(&self, table: &str, id: i64) -> Option<BusinessRow> {
        self.state.lock().await.business.get(table).and_then(|rows| rows.get(&id)).cloned()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

impl MemoryState {
    fn live_type(&self, id: ApprovalTypeId) -> Option<&ApprovalType> {
        self.types.get(&id).filter(|stored| !stored.deleted).map(|stored| &stored.value)
    }

    fn live_type_mut(&mut self, id: ApprovalTypeId) -> Result<&mut ApprovalType, StoreError> {
        self.types
            .get_mut(&id)
            .filter(|stored| !stored.deleted)
            .map(|stored| &mut stored.value)
            .ok_or_else(|| StoreError::not_found("approval type", id))
    }

    fn live_flow(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(&id).filter(|stored| !stored.deleted).map(|stored| &stored.value)
    }

    fn live_flow_mut(&mut self, id: FlowId) -> Result<&mut Flow, StoreError> {
        self.flows
            .get_mut(&id)
            .filter(|stored| !stored.deleted)
            .map(|stored| &mut stored.value)
            .ok_or_else(|| StoreError::not_found("flow", id))
    }

    fn live_nodes(&self, flow_id: FlowId) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .values()
            .filter(|stored| !stored.deleted && stored.value.flow_id == flow_id)
            .map(|stored| stored.value.clone())
            .collect();
        nodes.sort_by_key(|node| node.order);
        nodes
    }

    fn live_instance(&self, business: &BusinessRef) -> Option<InstanceId> {
        self.instances
            .values()
            .find(|instance| {
                !instance.status.is_terminal() && instance.business.as_ref() == Some(business)
            })
            .map(|instance| instance.id)
    }

    fn view(&self, id: InstanceId) -> Option<InstanceView> {
        let instance = self.instances.get(&id)?.clone();
        let records =
            self.records.values().filter(|record| record.instance_id == id).cloned().collect();
        Some(InstanceView { instance, records })
    }

    fn insert_records(
        &mut self,
        instance_id: InstanceId,
        node_id: NodeId,
        approvers: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeRecord>, StoreError> {
        let mut created = Vec::with_capacity(approvers.len());
        for approver in approvers {
            let taken = self.records.values().any(|record| {
                record.instance_id == instance_id
                    && record.node_id == node_id
                    && record.approver_id == *approver
            });
            if taken {
                return Err(StoreError::DuplicateApprover(format!(
                    "user {approver} already holds a record at node {node_id} of instance {instance_id}"
                )));
            }

            let record = NodeRecord {
                id: NodeRecordId(next(&mut self.sequences.record)),
                instance_id,
                node_id,
                approver_id: *approver,
                status: NodeRecordStatus::Pending,
                comment: String::new(),
                decided_at: None,
                created_at: now,
            };
            self.records.insert(record.id, record.clone());
            created.push(record);
        }
        Ok(created)
    }

    fn business_row_mut(&mut self, table: &str, row_id: i64) -> Option<&mut BusinessRow> {
        self.business.get_mut(table).and_then(|rows| rows.get_mut(&row_id))
    }
}

#[async_trait]
impl CatalogTx for MemoryTx {
    async fn list_types(&mut self) -> Result<Vec<ApprovalType>, StoreError> {
        let mut types: Vec<ApprovalType> = self
            .working
            .types
            .values()
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.value.clone())
            .collect();
        types.sort_by_key(|approval_type| (approval_type.sort, approval_type.id));
        Ok(types)
    }

    async fn find_type(
        &mut self,
        id: ApprovalTypeId,
    ) -> Result<Option<ApprovalType>, StoreError> {
        Ok(self.working.live_type(id).cloned())
    }

    async fn find_type_by_code(&mut self, code: &str) -> Result<Option<ApprovalType>, StoreError> {
        Ok(self
            .working
            .types
            .values()
            .find(|stored| !stored.deleted && stored.value.code == code)
            .map(|stored| stored.value.clone()))
    }

    async fn insert_type(
        &mut self,
        new: &NewApprovalType,
        now: DateTime<Utc>,
    ) -> Result<ApprovalType, StoreError> {
        if self.find_type_by_code(&new.code).await?.is_some() {
            return Err(StoreError::Conflict(format!("approval type code `{}` is taken", new.code)));
        }
        let approval_type = ApprovalType {
            id: ApprovalTypeId(next(&mut self.working.sequences.approval_type)),
            code: new.code.clone(),
            name: new.name.clone(),
            sort: new.sort,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.working.types.insert(approval_type.id, Stored::live(approval_type.clone()));
        Ok(approval_type)
    }

    async fn update_type(
        &mut self,
        id: ApprovalTypeId,
        update: &ApprovalTypeUpdate,
        now: DateTime<Utc>,
    ) -> Result<ApprovalType, StoreError> {
        let approval_type = self.working.live_type_mut(id)?;
        if let Some(name) = &update.name {
            approval_type.name = name.trim().to_string();
        }
        if let Some(sort) = update.sort {
            approval_type.sort = sort;
        }
        approval_type.updated_at = now;
        Ok(approval_type.clone())
    }

    async fn set_type_active(
        &mut self,
        id: ApprovalTypeId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<ApprovalType, StoreError> {
        let approval_type = self.working.live_type_mut(id)?;
        approval_type.active = active;
        approval_type.updated_at = now;
        Ok(approval_type.clone())
    }

    async fn soft_delete_type(
        &mut self,
        id: ApprovalTypeId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.working.live_type_mut(id)?.updated_at = now;
        if let Some(stored) = self.working.types.get_mut(&id) {
            stored.deleted = true;
        }
        Ok(())
    }

    async fn count_flows_for_type(&mut self, id: ApprovalTypeId) -> Result<u64, StoreError> {
        let total = self
            .working
            .flows
            .values()
            .filter(|stored| !stored.deleted && stored.value.type_id == id)
            .count();
        Ok(total as u64)
    }

    async fn list_flows(
        &mut self,
        type_id: Option<ApprovalTypeId>,
        only_active: bool,
    ) -> Result<Vec<Flow>, StoreError> {
        Ok(self
            .working
            .flows
            .values()
            .filter(|stored| !stored.deleted)
            .map(|stored| &stored.value)
            .filter(|flow| type_id.map_or(true, |type_id| flow.type_id == type_id))
            .filter(|flow| !only_active || flow.active)
            .cloned()
            .collect())
    }

    async fn find_flow(&mut self, id: FlowId) -> Result<Option<Flow>, StoreError> {
        Ok(self.working.live_flow(id).cloned())
    }

    async fn lock_flow(&mut self, _id: FlowId) -> Result<(), StoreError> {
        // The unit of work already holds the store-wide lock.
        Ok(())
    }

    async fn insert_flow(
        &mut self,
        type_id: ApprovalTypeId,
        name: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Flow, StoreError> {
        if self.working.live_type(type_id).is_none() {
            return Err(StoreError::not_found("approval type", type_id));
        }
        let flow = Flow {
            id: FlowId(next(&mut self.working.sequences.flow)),
            type_id,
            name: name.to_string(),
            description: description.to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.working.flows.insert(flow.id, Stored::live(flow.clone()));
        Ok(flow)
    }

    async fn update_flow(
        &mut self,
        id: FlowId,
        update: &FlowUpdate,
        now: DateTime<Utc>,
    ) -> Result<Flow, StoreError> {
        let flow = self.working.live_flow_mut(id)?;
        if let Some(name) = &update.name {
            flow.name = name.trim().to_string();
        }
        if let Some(description) = &update.description {
            flow.description = description.clone();
        }
        flow.updated_at = now;
        Ok(flow.clone())
    }

    async fn set_flow_active(
        &mut self,
        id: FlowId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Flow, StoreError> {
        let flow = self.working.live_flow_mut(id)?;
        flow.active = active;
        flow.updated_at = now;
        Ok(flow.clone())
    }

    async fn soft_delete_flow(&mut self, id: FlowId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.working.live_flow_mut(id)?.updated_at = now;
        if let Some(stored) = self.working.flows.get_mut(&id) {
            stored.deleted = true;
        }
        for stored in self.working.nodes.values_mut() {
            if stored.value.flow_id == id {
                stored.deleted = true;
            }
        }
        Ok(())
    }

    async fn list_nodes(&mut self, flow_id: FlowId) -> Result<Vec<Node>, StoreError> {
        Ok(self.working.live_nodes(flow_id))
    }

    async fn replace_nodes(
        &mut self,
        flow_id: FlowId,
        nodes: &[NodeSpec],
        _now: DateTime<Utc>,
    ) -> Result<Vec<Node>, StoreError> {
        if self.working.live_flow(flow_id).is_none() {
            return Err(StoreError::not_found("flow", flow_id));
        }
        for stored in self.working.nodes.values_mut() {
            if stored.value.flow_id == flow_id {
                stored.deleted = true;
            }
        }
        for spec in nodes {
            let node = Node {
                id: NodeId(next(&mut self.working.sequences.node)),
                flow_id,
                name: spec.name.trim().to_string(),
                order: spec.order,
                kind: spec.kind.clone(),
            };
            self.working.nodes.insert(node.id, Stored::live(node));
        }
        Ok(self.working.live_nodes(flow_id))
    }

    async fn count_live_instances_for_flow(&mut self, flow_id: FlowId) -> Result<u64, StoreError> {
        let total = self
            .working
            .instances
            .values()
            .filter(|instance| instance.flow_id == flow_id && !instance.status.is_terminal())
            .count();
        Ok(total as u64)
    }
}

#[async_trait]
impl InstanceTx for MemoryTx {
    async fn lock_instance(&mut self, id: InstanceId) -> Result<(), StoreError> {
        if self.working.instances.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::not_found("instance", id))
        }
    }

    async fn load_instance(&mut self, id: InstanceId) -> Result<Option<InstanceView>, StoreError> {
        Ok(self.working.view(id))
    }

    async fn find_live_instance_by_business(
        &mut self,
        business: &BusinessRef,
    ) -> Result<Option<InstanceId>, StoreError> {
        Ok(self.working.live_instance(business))
    }

    async fn create_instance(
        &mut self,
        new: &NewInstance,
        first_node: NodeId,
        approvers: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<InstanceView, StoreError> {
        if let Some(business) = &new.business {
            if let Some(existing) = self.working.live_instance(business) {
                return Err(StoreError::BusinessBusy(format!(
                    "{business} is bound to instance {existing}"
                )));
            }
        }

        let instance = Instance {
            id: InstanceId(next(&mut self.working.sequences.instance)),
            flow_id: new.flow_id,
            title: new.title.clone(),
            body: new.body.clone(),
            applicant_id: new.applicant_id,
            current_node_id: Some(first_node),
            status: InstanceStatus::Running,
            business: new.business,
            created_at: now,
            updated_at: now,
        };
        let instance_id = instance.id;
        self.working.instances.insert(instance_id, instance);
        self.working.insert_records(instance_id, first_node, approvers, now)?;
        self.working.view(instance_id).ok_or_else(|| StoreError::not_found("instance", instance_id))
    }

    async fn append_node_records(
        &mut self,
        instance_id: InstanceId,
        node_id: NodeId,
        approvers: &[UserId],
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeRecord>, StoreError> {
        let instance = self
            .working
            .instances
            .get(&instance_id)
            .ok_or_else(|| StoreError::not_found("instance", instance_id))?;
        if instance.status.is_terminal() {
            return Err(StoreError::InstanceTerminal(instance_id));
        }
        self.working.insert_records(instance_id, node_id, approvers, now)
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
        let record = self
            .working
            .records
            .get_mut(&record_id)
            .ok_or_else(|| StoreError::not_found("node record", record_id))?;
        if !record.status.is_open() {
            return Err(StoreError::AlreadyDecided(format!(
                "record {record_id} is already {}",
                record.status
            )));
        }
        record.status = outcome;
        record.comment = comment.to_string();
        record.decided_at = Some(now);
        Ok(record.clone())
    }

    async fn transition(
        &mut self,
        instance_id: InstanceId,
        current_node: Option<NodeId>,
        status: InstanceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let instance = self
            .working
            .instances
            .get_mut(&instance_id)
            .ok_or_else(|| StoreError::not_found("instance", instance_id))?;
        if instance.status.is_terminal() {
            return Err(StoreError::InstanceTerminal(instance_id));
        }
        instance.status = status;
        instance.current_node_id = current_node;
        instance.updated_at = now;
        Ok(())
    }

    async fn list_instances(
        &mut self,
        filter: &InstanceFilter,
        page: PageRequest,
    ) -> Result<Page<Instance>, StoreError> {
        let matching: Vec<Instance> = self
            .working
            .instances
            .values()
            .rev()
            .filter(|instance| filter.applicant_id.map_or(true, |id| instance.applicant_id == id))
            .filter(|instance| filter.status.map_or(true, |status| instance.status == status))
            .cloned()
            .collect();
        Ok(page.slice(&matching))
    }

    async fn list_todo(
        &mut self,
        approver: UserId,
        page: PageRequest,
    ) -> Result<Page<TodoItem>, StoreError> {
        let state = &self.working;
        let items: Vec<TodoItem> = state
            .records
            .values()
            .filter(|record| record.approver_id == approver && record.status.is_open())
            .filter_map(|record| {
                let instance = state.instances.get(&record.instance_id)?;
                (instance.status == InstanceStatus::Running).then(|| TodoItem {
                    record_id: record.id,
                    instance_id: instance.id,
                    node_id: record.node_id,
                    title: instance.title.clone(),
                    applicant_id: instance.applicant_id,
                    business: instance.business,
                    assigned_at: record.created_at,
                })
            })
            .collect();
        Ok(page.slice(&items))
    }

    async fn record_dispatch(
        &mut self,
        instance_id: InstanceId,
        outcome: InstanceStatus,
        _now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if self.working.dispatched.contains_key(&instance_id) {
            return Ok(false);
        }
        self.working.dispatched.insert(instance_id, outcome);
        Ok(true)
    }
}

#[async_trait]
impl Directory for MemoryTx {
    async fn find_user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn active_role_members(&mut self, role: RoleId) -> Result<Vec<UserId>, StoreError> {
        let state = &self.working;
        Ok(state
            .role_members
            .get(&role)
            .map(|members| {
                members
                    .iter()
                    .filter(|id| state.users.get(id).is_some_and(|user| user.active))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_department(
        &mut self,
        id: DepartmentId,
    ) -> Result<Option<Department>, StoreError> {
        Ok(self.working.departments.get(&id).cloned())
    }
}

#[async_trait]
impl BusinessTx for MemoryTx {
    async fn business_row_exists(&mut self, business: &BusinessRef) -> Result<bool, StoreError> {
        Ok(self
            .working
            .business
            .get(business.module.table())
            .is_some_and(|rows| rows.contains_key(&business.row_id)))
    }

    async fn apply_effect(
        &mut self,
        effect: &BusinessEffect,
        row_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match *effect {
            BusinessEffect::SetStatus { table, status } => {
                let row = self
                    .working
                    .business_row_mut(table, row_id)
                    .ok_or_else(|| StoreError::not_found(table, row_id))?;
                row.status = status.to_string();
            }
            BusinessEffect::SetLinkedStatus { table, link_column, target_table, status } => {
                let target = self
                    .working
                    .business
                    .get(table)
                    .and_then(|rows| rows.get(&row_id))
                    .and_then(|row| row.links.get(link_column).copied());
                match target.and_then(|target| self.working.business_row_mut(target_table, target))
                {
                    Some(row) => row.status = status.to_string(),
                    None => warn!(
                        event_name = "dispatch.linked_row_missing",
                        table,
                        link_column,
                        row_id,
                        "business row has no linked row to update"
                    ),
                }
            }
            BusinessEffect::StampDate { table, column } => {
                let row = self
                    .working
                    .business_row_mut(table, row_id)
                    .ok_or_else(|| StoreError::not_found(table, row_id))?;
                row.dates
                    .entry(column.to_string())
                    .or_insert_with(|| now.date_naive().format("%Y-%m-%d").to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use officeflow_core::domain::catalog::{NewApprovalType, NodeKind, NodeSpec};
    use officeflow_core::domain::directory::UserId;
    use officeflow_core::domain::instance::{
        BusinessModule, BusinessRef, InstanceStatus, NewInstance, NodeRecordStatus,
    };
    use officeflow_core::store::{ApprovalStore, StoreError};

    use super::{BusinessRow, InMemoryApprovalStore};

    #[tokio::test]
    async fn dropped_unit_of_work_leaves_no_trace() {
        let store = InMemoryApprovalStore::new();
        {
            let mut tx = store.begin().await.expect("begin");
            tx.insert_type(
                &NewApprovalType { code: "leave".into(), name: "Leave".into(), sort: 0 },
                Utc::now(),
            )
            .await
            .expect("insert");
        }

        let mut tx = store.begin().await.expect("begin");
        assert!(tx.list_types().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn live_business_reference_is_exclusive_and_records_close_once() {
        let store = InMemoryApprovalStore::new();
        store.put_business_row("leave_applications", 1, BusinessRow::new("pending")).await;
        let now = Utc::now();
        let business = BusinessRef::new(BusinessModule::Leave, 1);

        let mut tx = store.begin().await.expect("begin");
        let new_type = NewApprovalType { code: "leave".into(), name: "Leave".into(), sort: 0 };
        let approval_type = tx
            .insert_type(&new_type, now)
            .await
            .expect("type");
        let flow = tx.insert_flow(approval_type.id, "leave-std", "", now).await.expect("flow");
        let nodes = tx
            .replace_nodes(
                flow.id,
                &[NodeSpec {
                    name: "Manager".into(),
                    order: 1,
                    kind: NodeKind::FixedPerson { user_id: UserId(7) },
                }],
                now,
            )
            .await
            .expect("nodes");
        let new = NewInstance {
            flow_id: flow.id,
            applicant_id: UserId(42),
            title: "Leave".into(),
            body: String::new(),
            business: Some(business),
        };
        let view = tx.create_instance(&new, nodes[0].id, &[UserId(7)], now).await.expect("create");
        assert!(matches!(
            tx.create_instance(&new, nodes[0].id, &[UserId(7)], now).await,
            Err(StoreError::BusinessBusy(_))
        ));

        let record = view.records[0].id;
        tx.close_node_record(record, NodeRecordStatus::Approved, "ok", now).await.expect("close");
        assert!(matches!(
            tx.close_node_record(record, NodeRecordStatus::Rejected, "", now).await,
            Err(StoreError::AlreadyDecided(_))
        ));

        tx.transition(view.instance.id, None, InstanceStatus::Approved, now).await.expect("done");
        assert!(matches!(
            tx.append_node_records(view.instance.id, nodes[0].id, &[UserId(9)], now).await,
            Err(StoreError::InstanceTerminal(_))
        ));
        let id = view.instance.id;
        assert!(tx.record_dispatch(id, InstanceStatus::Approved, now).await.expect("log"));
        assert!(!tx.record_dispatch(id, InstanceStatus::Approved, now).await.expect("log"));
        assert_eq!(tx.find_live_instance_by_business(&business).await.expect("lookup"), None);
    }
}
