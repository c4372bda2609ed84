use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::catalog::{Node, NodeId};
use crate::domain::instance::{InstanceStatus, NodeRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceEvent {
    Submitted,
    NodeApproved { has_next_node: bool },
    NodeRejected,
    CancelRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: InstanceStatus,
    pub to: InstanceStatus,
    pub event: InstanceEvent,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("instance in terminal status {0} cannot change")]
    Terminal(InstanceStatus),
    #[error("invalid transition from {state} using event {event:?}")]
    Invalid { state: InstanceStatus, event: InstanceEvent },
}

/// Instance status machine. Terminal statuses are absorbing.
pub fn next_status(
    current: InstanceStatus,
    event: InstanceEvent,
) -> Result<TransitionOutcome, TransitionError> {
    use InstanceEvent::{CancelRequested, NodeApproved, NodeRejected, Submitted};
    use InstanceStatus::{Approved, Cancelled, Pending, Rejected, Running};

    let to = match (current, event) {
        (Pending, Submitted) => Running,
        (Running, NodeApproved { has_next_node: true }) => Running,
        (Running, NodeApproved { has_next_node: false }) => Approved,
        (Running, NodeRejected) => Rejected,
        (Pending | Running, CancelRequested) => Cancelled,
        (state, _) if state.is_terminal() => return Err(TransitionError::Terminal(state)),
        (state, event) => return Err(TransitionError::Invalid { state, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}

/// Lowest-order node of a flow. `nodes` need not be sorted.
pub fn first_node(nodes: &[Node]) -> Option<&Node> {
    nodes.iter().min_by_key(|node| node.order)
}

/// Smallest-order node strictly after `current`.
pub fn next_node<'a>(nodes: &'a [Node], current: &Node) -> Option<&'a Node> {
    nodes.iter().filter(|node| node.order > current.order).min_by_key(|node| node.order)
}

/// Node an instance must point at: the smallest-order node that still holds
/// a pending record, or `None` when nothing is pending.
pub fn expected_current_node(nodes: &[Node], records: &[NodeRecord]) -> Option<NodeId> {
    nodes
        .iter()
        .filter(|node| {
            records.iter().any(|record| record.node_id == node.id && record.status.is_open())
        })
        .min_by_key(|node| node.order)
        .map(|node| node.id)
}
