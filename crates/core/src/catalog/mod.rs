//! Read-mostly registry of approval types, flows and their ordered nodes.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::domain::catalog::{
    ApprovalType, ApprovalTypeId, ApprovalTypeUpdate, Flow, FlowId, FlowUpdate, FlowWithNodes,
    NewApprovalType, NewFlow, Node, NodeKind, NodeSpec,
};
use crate::errors::ApprovalError;
use crate::store::{ApprovalStore, StoreTx};

pub mod cache;

pub use cache::CatalogCache;

pub struct CatalogService {
    store: Arc<dyn ApprovalStore>,
    cache: CatalogCache,
}

impl CatalogService {
    pub fn new(store: Arc<dyn ApprovalStore>, cache: CatalogCache) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    pub async fn list_types(&self) -> Result<Vec<ApprovalType>, ApprovalError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_types().await?)
    }

    pub async fn get_type(&self, code: &str) -> Result<ApprovalType, ApprovalError> {
        let code = code.trim();
        if let Some(cached) = self.cache.approval_type(code) {
            return Ok(cached);
        }
        let mut tx = self.store.begin().await?;
        let approval_type = type_by_code(tx.as_mut(), code).await?;
        self.cache.put_type(approval_type.clone());
        Ok(approval_type)
    }

    pub async fn create_type(&self, new: NewApprovalType) -> Result<ApprovalType, ApprovalError> {
        let code = new.code.trim();
        if code.is_empty() || code.chars().any(char::is_whitespace) {
            return Err(ApprovalError::InvalidInput(
                "approval type code must be a non-empty token".to_string(),
            ));
        }
        if new.name.trim().is_empty() {
            return Err(ApprovalError::InvalidInput("approval type name is required".to_string()));
        }
        let normalized = NewApprovalType { code: code.to_string(), ..new };

        let mut tx = self.store.begin().await?;
        if tx.find_type_by_code(&normalized.code).await?.is_some() {
            return Err(ApprovalError::InvalidInput(format!(
                "approval type code `{}` already exists",
                normalized.code
            )));
        }
        let created = tx.insert_type(&normalized, Utc::now()).await?;
        tx.commit().await?;

        info!(
            event_name = "catalog.type_created",
            type_id = created.id.0,
            code = %created.code,
            "approval type created"
        );
        Ok(created)
    }

    pub async fn update_type(
        &self,
        code: &str,
        update: ApprovalTypeUpdate,
    ) -> Result<ApprovalType, ApprovalError> {
        let code = code.trim();
        if update.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(ApprovalError::InvalidInput("approval type name is required".to_string()));
        }
        let mut tx = self.store.begin().await?;
        let existing = type_by_code(tx.as_mut(), code).await?;
        let updated = tx.update_type(existing.id, &update, Utc::now()).await?;
        tx.commit().await?;

        self.cache.invalidate_type(code);
        Ok(updated)
    }

    pub async fn activate_type(&self, code: &str) -> Result<ApprovalType, ApprovalError> {
        self.set_type_active(code, true).await
    }

    /// Deactivated types keep their flows; only new submissions by type code
    /// are refused.
    pub async fn deactivate_type(&self, code: &str) -> Result<ApprovalType, ApprovalError> {
        self.set_type_active(code, false).await
    }

    async fn set_type_active(
        &self,
        code: &str,
        active: bool,
    ) -> Result<ApprovalType, ApprovalError> {
        let code = code.trim();
        let mut tx = self.store.begin().await?;
        let existing = type_by_code(tx.as_mut(), code).await?;
        let updated = tx.set_type_active(existing.id, active, Utc::now()).await?;
        tx.commit().await?;

        self.cache.invalidate_type(code);
        info!(
            event_name = "catalog.type_activation_changed",
            code = %code,
            active,
            "approval type activation changed"
        );
        Ok(updated)
    }

    pub async fn delete_type(&self, code: &str) -> Result<(), ApprovalError> {
        let code = code.trim();
        let mut tx = self.store.begin().await?;
        let existing = type_by_code(tx.as_mut(), code).await?;
        let flows = tx.count_flows_for_type(existing.id).await?;
        if flows > 0 {
            return Err(ApprovalError::InUse { entity: "approval type", id: code.to_string() });
        }
        tx.soft_delete_type(existing.id, Utc::now()).await?;
        tx.commit().await?;

        self.cache.invalidate_type(code);
        info!(event_name = "catalog.type_deleted", code = %code, "approval type deleted");
        Ok(())
    }

    pub async fn list_flows(
        &self,
        type_id: Option<ApprovalTypeId>,
        only_active: bool,
    ) -> Result<Vec<Flow>, ApprovalError> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_flows(type_id, only_active).await?)
    }

    pub async fn get_flow(&self, id: FlowId) -> Result<FlowWithNodes, ApprovalError> {
        if let Some(cached) = self.cache.flow(id) {
            return Ok(cached);
        }
        let mut tx = self.store.begin().await?;
        let flow = flow_with_nodes(tx.as_mut(), id).await?;
        self.cache.put_flow(flow.clone());
        Ok(flow)
    }

    pub async fn create_flow(&self, new: NewFlow) -> Result<FlowWithNodes, ApprovalError> {
        if new.name.trim().is_empty() {
            return Err(ApprovalError::InvalidInput("flow name is required".to_string()));
        }
        validate_node_specs(&new.nodes)?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if tx.find_type(new.type_id).await?.is_none() {
            return Err(ApprovalError::not_found("approval type", new.type_id));
        }
        let flow = tx.insert_flow(new.type_id, new.name.trim(), &new.description, now).await?;
        let nodes = tx.replace_nodes(flow.id, &new.nodes, now).await?;
        tx.commit().await?;

        info!(
            event_name = "catalog.flow_created",
            flow_id = flow.id.0,
            type_id = flow.type_id.0,
            node_count = nodes.len(),
            "approval flow created"
        );
        Ok(FlowWithNodes { flow, nodes })
    }

    /// Metadata is frozen together with the node set while the flow is in use.
    pub async fn update_flow_metadata(
        &self,
        id: FlowId,
        update: FlowUpdate,
    ) -> Result<Flow, ApprovalError> {
        if update.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(ApprovalError::InvalidInput("flow name is required".to_string()));
        }
        let mut tx = self.store.begin().await?;
        lock_existing_flow(tx.as_mut(), id).await?;
        if tx.count_live_instances_for_flow(id).await? > 0 {
            return Err(ApprovalError::FlowInUse(id));
        }
        let updated = tx.update_flow(id, &update, Utc::now()).await?;
        tx.commit().await?;

        self.cache.invalidate_flow(id);
        Ok(updated)
    }

    pub async fn activate_flow(&self, id: FlowId) -> Result<Flow, ApprovalError> {
        self.set_flow_active(id, true).await
    }

    /// Running instances keep advancing on a deactivated flow; only new
    /// submissions are refused.
    pub async fn deactivate_flow(&self, id: FlowId) -> Result<Flow, ApprovalError> {
        self.set_flow_active(id, false).await
    }

    async fn set_flow_active(&self, id: FlowId, active: bool) -> Result<Flow, ApprovalError> {
        let mut tx = self.store.begin().await?;
        lock_existing_flow(tx.as_mut(), id).await?;
        let updated = tx.set_flow_active(id, active, Utc::now()).await?;
        tx.commit().await?;

        self.cache.invalidate_flow(id);
        info!(
            event_name = "catalog.flow_activation_changed",
            flow_id = id.0,
            active,
            "approval flow activation changed"
        );
        Ok(updated)
    }

    pub async fn delete_flow(&self, id: FlowId) -> Result<(), ApprovalError> {
        let mut tx = self.store.begin().await?;
        lock_existing_flow(tx.as_mut(), id).await?;
        if tx.count_live_instances_for_flow(id).await? > 0 {
            return Err(ApprovalError::InUse { entity: "flow", id: id.to_string() });
        }
        tx.soft_delete_flow(id, Utc::now()).await?;
        tx.commit().await?;

        self.cache.invalidate_flow(id);
        info!(event_name = "catalog.flow_deleted", flow_id = id.0, "approval flow deleted");
        Ok(())
    }

    /// Copies a flow and its node set under a new id. The copy starts
    /// inactive so its nodes can be edited before it takes submissions.
    pub async fn clone_flow(
        &self,
        id: FlowId,
        name: Option<String>,
    ) -> Result<FlowWithNodes, ApprovalError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let source = flow_with_nodes(tx.as_mut(), id).await?;
        let name = match name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            Some(_) => {
                return Err(ApprovalError::InvalidInput("flow name is required".to_string()))
            }
            None => format!("{} (copy)", source.flow.name),
        };
        let specs: Vec<NodeSpec> = source.nodes.iter().map(Node::spec).collect();

        let created =
            tx.insert_flow(source.flow.type_id, &name, &source.flow.description, now).await?;
        let flow = tx.set_flow_active(created.id, false, now).await?;
        let nodes = tx.replace_nodes(flow.id, &specs, now).await?;
        tx.commit().await?;

        info!(
            event_name = "catalog.flow_cloned",
            source_flow_id = id.0,
            flow_id = flow.id.0,
            "approval flow cloned"
        );
        Ok(FlowWithNodes { flow, nodes })
    }

    pub async fn list_nodes(&self, flow_id: FlowId) -> Result<Vec<Node>, ApprovalError> {
        Ok(self.get_flow(flow_id).await?.nodes)
    }

    pub async fn upsert_nodes(
        &self,
        flow_id: FlowId,
        specs: Vec<NodeSpec>,
    ) -> Result<Vec<Node>, ApprovalError> {
        validate_node_specs(&specs)?;

        let mut tx = self.store.begin().await?;
        lock_existing_flow(tx.as_mut(), flow_id).await?;
        if tx.count_live_instances_for_flow(flow_id).await? > 0 {
            return Err(ApprovalError::FlowInUse(flow_id));
        }
        let nodes = tx.replace_nodes(flow_id, &specs, Utc::now()).await?;
        tx.commit().await?;

        self.cache.invalidate_flow(flow_id);
        info!(
            event_name = "catalog.nodes_replaced",
            flow_id = flow_id.0,
            node_count = nodes.len(),
            "approval nodes replaced"
        );
        Ok(nodes)
    }
}

/// Checks a node set against the flow shape rules: at least one node, orders
/// unique and >= 1, names non-blank, participant ids positive.
pub fn validate_node_specs(specs: &[NodeSpec]) -> Result<(), ApprovalError> {
    if specs.is_empty() {
        return Err(ApprovalError::InvalidShape("a flow needs at least one node".to_string()));
    }

    let mut orders = BTreeSet::new();
    for spec in specs {
        if spec.order == 0 {
            return Err(ApprovalError::InvalidShape(format!(
                "node `{}` has order 0; orders start at 1",
                spec.name
            )));
        }
        if !orders.insert(spec.order) {
            return Err(ApprovalError::InvalidShape(format!(
                "order {} is used by more than one node",
                spec.order
            )));
        }
        if spec.name.trim().is_empty() {
            return Err(ApprovalError::InvalidShape(format!(
                "node at order {} has a blank name",
                spec.order
            )));
        }
        let participant_ok = match &spec.kind {
            NodeKind::FixedPerson { user_id } => user_id.0 > 0,
            NodeKind::Role { role_id } => role_id.0 > 0,
            NodeKind::DepartmentHead => true,
        };
        if !participant_ok {
            return Err(ApprovalError::InvalidShape(format!(
                "node `{}` references an invalid participant",
                spec.name
            )));
        }
    }

    Ok(())
}

async fn type_by_code(tx: &mut dyn StoreTx, code: &str) -> Result<ApprovalType, ApprovalError> {
    tx.find_type_by_code(code.trim())
        .await?
        .ok_or_else(|| ApprovalError::not_found("approval type", code))
}

async fn flow_with_nodes(tx: &mut dyn StoreTx, id: FlowId) -> Result<FlowWithNodes, ApprovalError> {
    let flow = tx.find_flow(id).await?.ok_or_else(|| ApprovalError::not_found("flow", id))?;
    let nodes = tx.list_nodes(id).await?;
    Ok(FlowWithNodes { flow, nodes })
}

async fn lock_existing_flow(tx: &mut dyn StoreTx, id: FlowId) -> Result<(), ApprovalError> {
    tx.lock_flow(id).await?;
    if tx.find_flow(id).await?.is_none() {
        return Err(ApprovalError::not_found("flow", id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_node_specs;
    use crate::domain::catalog::{NodeKind, NodeSpec};
    use crate::domain::directory::{RoleId, UserId};
    use crate::errors::ApprovalError;

    fn spec(name: &str, order: u32, kind: NodeKind) -> NodeSpec {
        NodeSpec { name: name.to_string(), order, kind }
    }

    #[test]
    fn accepts_well_formed_node_sets() {
        let specs = vec![
            spec("Manager", 1, NodeKind::FixedPerson { user_id: UserId(7) }),
            spec("HR", 2, NodeKind::Role { role_id: RoleId(1) }),
            spec("Head", 5, NodeKind::DepartmentHead),
        ];
        assert_eq!(validate_node_specs(&specs), Ok(()));
    }

    #[test]
    fn rejects_empty_node_set() {
        assert!(matches!(validate_node_specs(&[]), Err(ApprovalError::InvalidShape(_))));
    }

    #[test]
    fn rejects_duplicate_and_zero_orders() {
        let duplicate = vec![
            spec("A", 1, NodeKind::DepartmentHead),
            spec("B", 1, NodeKind::DepartmentHead),
        ];
        assert!(matches!(validate_node_specs(&duplicate), Err(ApprovalError::InvalidShape(_))));

        let zero = vec![spec("A", 0, NodeKind::DepartmentHead)];
        assert!(matches!(validate_node_specs(&zero), Err(ApprovalError::InvalidShape(_))));
    }

    #[test]
    fn rejects_blank_names_and_bad_participants() {
        let blank = vec![spec("  ", 1, NodeKind::DepartmentHead)];
        assert!(matches!(validate_node_specs(&blank), Err(ApprovalError::InvalidShape(_))));

        let bad_person = vec![spec("A", 1, NodeKind::FixedPerson { user_id: UserId(0) })];
        assert!(matches!(validate_node_specs(&bad_person), Err(ApprovalError::InvalidShape(_))));
    }
}
