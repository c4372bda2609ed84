//! The approval state machine and the only writer of instance state.
//!
//! Each operation is one unit of work against the store, bounded by the
//! request deadline. Intents are published only after the unit of work
//! commits; a failure anywhere drops the unit of work and publishes nothing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::dispatch::{DispatchOutcome, Dispatcher, Intent};
use crate::domain::catalog::{FlowId, NodeId};
use crate::domain::directory::UserId;
use crate::domain::instance::{
    Decision, Instance, InstanceFilter, InstanceId, InstanceStatus, InstanceView, NewInstance,
    NodeRecordStatus, Submission, TodoItem,
};
use crate::domain::page::{Page, PageRequest};
use crate::errors::ApprovalError;
use crate::resolver::{InstanceContext, ParticipantResolver};
use crate::store::{ApprovalStore, StoreTx};

pub mod retry;
pub mod transitions;

pub use retry::RetryPolicy;
pub use transitions::{
    expected_current_node, first_node, next_node, next_status, InstanceEvent, TransitionError,
    TransitionOutcome,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Wall-clock budget of one engine operation.
    pub deadline: Duration,
    pub read_retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { deadline: Duration::from_secs(10), read_retry: RetryPolicy::default() }
    }
}

/// State of an instance right after a committed decision or cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionReceipt {
    pub instance_id: InstanceId,
    pub from: InstanceStatus,
    pub to: InstanceStatus,
    pub current_node_id: Option<NodeId>,
}

pub struct ApprovalEngine {
    store: Arc<dyn ApprovalStore>,
    resolver: ParticipantResolver,
    dispatcher: Dispatcher,
    audit: Arc<dyn AuditSink>,
    settings: EngineSettings,
}

impl ApprovalEngine {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        dispatcher: Dispatcher,
        audit: Arc<dyn AuditSink>,
        settings: EngineSettings,
    ) -> Self {
        Self { store, resolver: ParticipantResolver, dispatcher, audit, settings }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Starts a new instance of `flow_id` and assigns the first node.
    pub async fn submit(
        &self,
        flow_id: FlowId,
        submission: Submission,
        audit: &AuditContext,
    ) -> Result<InstanceView, ApprovalError> {
        let result = self.within_deadline(self.submit_in_tx(flow_id, submission)).await;
        let instance_id = result.as_ref().ok().map(|(view, _)| view.instance.id);
        self.record_audit("approval.submitted", instance_id, audit, &result, |event| {
            event.with_metadata("flow_id", flow_id.to_string())
        });

        let (view, intents) = result?;
        info!(
            event_name = "engine.instance_submitted",
            correlation_id = %audit.correlation_id,
            instance_id = view.instance.id.0,
            flow_id = flow_id.0,
            applicant_id = view.instance.applicant_id.0,
            approvers = view.records.len(),
            "approval instance submitted"
        );
        self.dispatcher.publish(intents);
        Ok(view)
    }

    /// Submits against the flow of an approval type: `requested` when given,
    /// otherwise the active flow with the lowest id.
    pub async fn submit_for_type(
        &self,
        type_code: &str,
        requested: Option<FlowId>,
        submission: Submission,
        audit: &AuditContext,
    ) -> Result<InstanceView, ApprovalError> {
        let flow_id = match self.within_deadline(self.flow_for_type(type_code, requested)).await {
            Ok(flow_id) => flow_id,
            Err(error) => {
                let result: Result<(), ApprovalError> = Err(error.clone());
                self.record_audit("approval.submitted", None, audit, &result, |event| {
                    event.with_metadata("type_code", type_code)
                });
                return Err(error);
            }
        };
        self.submit(flow_id, submission, audit).await
    }

    pub async fn decide(
        &self,
        instance_id: InstanceId,
        approver_id: UserId,
        decision: Decision,
        comment: &str,
        audit: &AuditContext,
    ) -> Result<DecisionReceipt, ApprovalError> {
        let result = self
            .within_deadline(self.decide_in_tx(instance_id, approver_id, decision, comment))
            .await;
        self.record_audit("approval.decided", Some(instance_id), audit, &result, |event| {
            event
                .with_metadata("decision", decision.as_str())
                .with_metadata("approver_id", approver_id.to_string())
        });

        let (receipt, intents) = result?;
        info!(
            event_name = "engine.decision_committed",
            correlation_id = %audit.correlation_id,
            instance_id = instance_id.0,
            approver_id = approver_id.0,
            decision = decision.as_str(),
            from = receipt.from.as_str(),
            to = receipt.to.as_str(),
            "approval decision committed"
        );
        self.dispatcher.publish(intents);
        Ok(receipt)
    }

    pub async fn approve(
        &self,
        instance_id: InstanceId,
        approver_id: UserId,
        comment: &str,
        audit: &AuditContext,
    ) -> Result<DecisionReceipt, ApprovalError> {
        self.decide(instance_id, approver_id, Decision::Approve, comment, audit).await
    }

    pub async fn reject(
        &self,
        instance_id: InstanceId,
        approver_id: UserId,
        comment: &str,
        audit: &AuditContext,
    ) -> Result<DecisionReceipt, ApprovalError> {
        self.decide(instance_id, approver_id, Decision::Reject, comment, audit).await
    }

    pub async fn cancel(
        &self,
        instance_id: InstanceId,
        requester_id: UserId,
        audit: &AuditContext,
    ) -> Result<DecisionReceipt, ApprovalError> {
        let result = self.within_deadline(self.cancel_in_tx(instance_id, requester_id)).await;
        self.record_audit("approval.cancelled", Some(instance_id), audit, &result, |event| {
            event.with_metadata("requester_id", requester_id.to_string())
        });

        let (receipt, intents) = result?;
        info!(
            event_name = "engine.instance_cancelled",
            correlation_id = %audit.correlation_id,
            instance_id = instance_id.0,
            requester_id = requester_id.0,
            "approval instance cancelled"
        );
        self.dispatcher.publish(intents);
        Ok(receipt)
    }

    /// Same as [`ApprovalEngine::cancel`].
    pub async fn withdraw(
        &self,
        instance_id: InstanceId,
        requester_id: UserId,
        audit: &AuditContext,
    ) -> Result<DecisionReceipt, ApprovalError> {
        self.cancel(instance_id, requester_id, audit).await
    }

    pub async fn load_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<InstanceView, ApprovalError> {
        let store = &self.store;
        let read = self.settings.read_retry.run("load_instance", || async move {
            let mut tx = store.begin().await?;
            tx.load_instance(instance_id).await
        });
        self.within_deadline(async { read.await.map_err(ApprovalError::from) })
            .await?
            .ok_or_else(|| ApprovalError::not_found("instance", instance_id))
    }

    pub async fn list_todo(
        &self,
        approver_id: UserId,
        page: PageRequest,
    ) -> Result<Page<TodoItem>, ApprovalError> {
        let store = &self.store;
        let read = self.settings.read_retry.run("list_todo", || async move {
            let mut tx = store.begin().await?;
            tx.list_todo(approver_id, page).await
        });
        self.within_deadline(async { read.await.map_err(ApprovalError::from) }).await
    }

    pub async fn list_instances(
        &self,
        filter: InstanceFilter,
        page: PageRequest,
    ) -> Result<Page<Instance>, ApprovalError> {
        let store = &self.store;
        let filter = &filter;
        let read = self.settings.read_retry.run("list_instances", || async move {
            let mut tx = store.begin().await?;
            tx.list_instances(filter, page).await
        });
        self.within_deadline(async { read.await.map_err(ApprovalError::from) }).await
    }

    async fn flow_for_type(
        &self,
        type_code: &str,
        requested: Option<FlowId>,
    ) -> Result<FlowId, ApprovalError> {
        let mut tx = self.store.begin().await?;
        let approval_type = tx
            .find_type_by_code(type_code.trim())
            .await?
            .ok_or_else(|| ApprovalError::not_found("approval type", type_code))?;
        if !approval_type.active {
            return Err(ApprovalError::FlowInactive(format!(
                "approval type `{}` is inactive",
                approval_type.code
            )));
        }

        match requested {
            Some(flow_id) => {
                let flow = tx
                    .find_flow(flow_id)
                    .await?
                    .filter(|flow| flow.type_id == approval_type.id)
                    .ok_or_else(|| ApprovalError::not_found("flow", flow_id))?;
                Ok(flow.id)
            }
            None => tx
                .list_flows(Some(approval_type.id), true)
                .await?
                .into_iter()
                .map(|flow| flow.id)
                .min()
                .ok_or_else(|| {
                    ApprovalError::FlowInactive(format!(
                        "approval type `{}` has no active flow",
                        approval_type.code
                    ))
                }),
        }
    }

    async fn submit_in_tx(
        &self,
        flow_id: FlowId,
        submission: Submission,
    ) -> Result<(InstanceView, Vec<Intent>), ApprovalError> {
        let title = submission.title.trim();
        if title.is_empty() {
            return Err(ApprovalError::InvalidInput("title is required".to_string()));
        }
        if let Some(business) = &submission.business {
            if business.row_id <= 0 {
                return Err(ApprovalError::InvalidInput(format!(
                    "business row id must be positive (got {business})"
                )));
            }
        }

        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        tx.lock_flow(flow_id).await?;
        let flow =
            tx.find_flow(flow_id).await?.ok_or_else(|| ApprovalError::not_found("flow", flow_id))?;
        if !flow.active {
            return Err(ApprovalError::FlowInactive(flow.name));
        }

        let context = InstanceContext::load(submission.applicant_id, tx.as_mut()).await?;

        if let Some(business) = &submission.business {
            if !tx.business_row_exists(business).await? {
                return Err(ApprovalError::not_found("business record", business));
            }
            if let Some(existing) = tx.find_live_instance_by_business(business).await? {
                return Err(ApprovalError::BusinessBusy(format!(
                    "{business} is bound to instance {existing}"
                )));
            }
        }

        let nodes = tx.list_nodes(flow_id).await?;
        let first = first_node(&nodes).ok_or_else(|| {
            ApprovalError::FlowInactive(format!("flow `{}` has no nodes", flow.name))
        })?;
        let approvers = self.resolver.resolve(first, &context, tx.as_mut()).await?;
        next_status(InstanceStatus::Pending, InstanceEvent::Submitted)
            .map_err(|error| ApprovalError::Internal(error.to_string()))?;

        let new = NewInstance {
            flow_id,
            applicant_id: submission.applicant_id,
            title: title.to_string(),
            body: submission.body,
            business: submission.business,
        };
        let view = tx.create_instance(&new, first.id, &approvers, now).await?;
        tx.commit().await?;

        let mut intents: Vec<Intent> = approvers
            .iter()
            .map(|approver| Intent::TodoAssigned {
                instance_id: view.instance.id,
                node_id: first.id,
                recipient: *approver,
            })
            .collect();
        intents.push(Intent::Submitted {
            instance_id: view.instance.id,
            recipient: view.instance.applicant_id,
        });
        Ok((view, intents))
    }

    async fn decide_in_tx(
        &self,
        instance_id: InstanceId,
        approver_id: UserId,
        decision: Decision,
        comment: &str,
    ) -> Result<(DecisionReceipt, Vec<Intent>), ApprovalError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let view = lock_and_load(tx.as_mut(), instance_id).await?;
        let instance = &view.instance;
        let held_record = view.records.iter().any(|record| record.approver_id == approver_id);

        if instance.status != InstanceStatus::Running {
            if held_record && instance.status != InstanceStatus::Cancelled {
                return Err(ApprovalError::AlreadyDecided(format!(
                    "instance {instance_id} was already {}",
                    instance.status
                )));
            }
            return Err(ApprovalError::InstanceTerminal(instance_id));
        }

        let current_node_id = instance.current_node_id.ok_or_else(|| {
            ApprovalError::Internal(format!("running instance {instance_id} has no current node"))
        })?;
        let Some(record) = view.records.iter().find(|record| {
            record.node_id == current_node_id
                && record.approver_id == approver_id
                && record.status.is_open()
        }) else {
            if held_record {
                return Err(ApprovalError::AlreadyDecided(format!(
                    "user {approver_id} already decided on instance {instance_id}"
                )));
            }
            return Err(ApprovalError::NotAssigned { instance_id, approver_id });
        };

        let nodes = tx.list_nodes(instance.flow_id).await?;
        let current = nodes.iter().find(|node| node.id == current_node_id).ok_or_else(|| {
            ApprovalError::Internal(format!(
                "current node {current_node_id} of instance {instance_id} is missing"
            ))
        })?;

        tx.close_node_record(record.id, decision.record_status(), comment, now).await?;

        let mut intents = Vec::new();
        for sibling in view.open_records().filter(|sibling| sibling.id != record.id) {
            tx.close_node_record(sibling.id, NodeRecordStatus::Superseded, "", now).await?;
            intents.push(Intent::TodoWithdrawn {
                instance_id,
                node_id: sibling.node_id,
                recipient: sibling.approver_id,
            });
        }

        let applicant_id = instance.applicant_id;
        let (outcome, current_node) = match decision {
            Decision::Approve => match next_node(&nodes, current) {
                Some(next) => {
                    let context = InstanceContext::load(applicant_id, tx.as_mut()).await?;
                    let approvers = self.resolver.resolve(next, &context, tx.as_mut()).await?;
                    let outcome = transition(
                        instance_id,
                        instance.status,
                        InstanceEvent::NodeApproved { has_next_node: true },
                    )?;
                    tx.append_node_records(instance_id, next.id, &approvers, now).await?;
                    tx.transition(instance_id, Some(next.id), outcome.to, now).await?;
                    intents.extend(approvers.iter().map(|approver| Intent::TodoAssigned {
                        instance_id,
                        node_id: next.id,
                        recipient: *approver,
                    }));
                    (outcome, Some(next.id))
                }
                None => {
                    let outcome = transition(
                        instance_id,
                        instance.status,
                        InstanceEvent::NodeApproved { has_next_node: false },
                    )?;
                    tx.transition(instance_id, None, outcome.to, now).await?;
                    self.dispatcher
                        .apply(
                            tx.as_mut(),
                            instance_id,
                            instance.business.as_ref(),
                            DispatchOutcome::Approved,
                            now,
                        )
                        .await?;
                    intents.push(Intent::Approved { instance_id, recipient: applicant_id });
                    (outcome, None)
                }
            },
            Decision::Reject => {
                let outcome =
                    transition(instance_id, instance.status, InstanceEvent::NodeRejected)?;
                tx.transition(instance_id, None, outcome.to, now).await?;
                self.dispatcher
                    .apply(
                        tx.as_mut(),
                        instance_id,
                        instance.business.as_ref(),
                        DispatchOutcome::Rejected,
                        now,
                    )
                    .await?;
                intents.push(Intent::Rejected { instance_id, recipient: applicant_id });
                (outcome, None)
            }
        };

        tx.commit().await?;
        let receipt = DecisionReceipt {
            instance_id,
            from: outcome.from,
            to: outcome.to,
            current_node_id: current_node,
        };
        Ok((receipt, intents))
    }

    async fn cancel_in_tx(
        &self,
        instance_id: InstanceId,
        requester_id: UserId,
    ) -> Result<(DecisionReceipt, Vec<Intent>), ApprovalError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let view = lock_and_load(tx.as_mut(), instance_id).await?;
        let instance = &view.instance;

        if instance.status.is_terminal() {
            return Err(ApprovalError::InstanceTerminal(instance_id));
        }
        if instance.applicant_id != requester_id {
            return Err(ApprovalError::Forbidden(format!(
                "only the applicant may cancel instance {instance_id}"
            )));
        }

        let outcome = transition(instance_id, instance.status, InstanceEvent::CancelRequested)?;
        let mut intents = Vec::new();
        for record in view.open_records() {
            tx.close_node_record(record.id, NodeRecordStatus::Superseded, "", now).await?;
            intents.push(Intent::TodoWithdrawn {
                instance_id,
                node_id: record.node_id,
                recipient: record.approver_id,
            });
        }
        tx.transition(instance_id, None, outcome.to, now).await?;
        tx.commit().await?;

        intents.push(Intent::Cancelled { instance_id, recipient: instance.applicant_id });
        let receipt = DecisionReceipt {
            instance_id,
            from: outcome.from,
            to: outcome.to,
            current_node_id: None,
        };
        Ok((receipt, intents))
    }

    async fn within_deadline<T, F>(&self, operation: F) -> Result<T, ApprovalError>
    where
        F: Future<Output = Result<T, ApprovalError>>,
    {
        match tokio::time::timeout(self.settings.deadline, operation).await {
            Ok(result) => result,
            Err(_) => Err(ApprovalError::Timeout),
        }
    }

    fn record_audit<T>(
        &self,
        event_type: &str,
        instance_id: Option<InstanceId>,
        context: &AuditContext,
        result: &Result<T, ApprovalError>,
        decorate: impl FnOnce(AuditEvent) -> AuditEvent,
    ) {
        let outcome = match result {
            Ok(_) => AuditOutcome::Success,
            Err(error) if error.kind().is_refusal() => {
                warn!(
                    event_name = "engine.operation_refused",
                    correlation_id = %context.correlation_id,
                    operation = event_type,
                    instance_id = instance_id.map(|id| id.0),
                    kind = error.kind().code(),
                    error = %error,
                    "approval operation refused"
                );
                AuditOutcome::Rejected
            }
            Err(error) => {
                error!(
                    event_name = "engine.operation_failed",
                    correlation_id = %context.correlation_id,
                    operation = event_type,
                    instance_id = instance_id.map(|id| id.0),
                    error = %error,
                    "approval operation failed"
                );
                AuditOutcome::Failed
            }
        };

        let mut event = decorate(AuditEvent::new(
            instance_id,
            context,
            event_type,
            AuditCategory::Engine,
            outcome,
        ));
        if let Err(error) = result {
            event = event.with_metadata("error_kind", error.kind().code());
        }
        self.audit.emit(event);
    }
}

async fn lock_and_load(
    tx: &mut dyn StoreTx,
    instance_id: InstanceId,
) -> Result<InstanceView, ApprovalError> {
    tx.lock_instance(instance_id).await?;
    tx.load_instance(instance_id)
        .await?
        .ok_or_else(|| ApprovalError::not_found("instance", instance_id))
}

fn transition(
    instance_id: InstanceId,
    current: InstanceStatus,
    event: InstanceEvent,
) -> Result<TransitionOutcome, ApprovalError> {
    next_status(current, event).map_err(|error| match error {
        TransitionError::Terminal(_) => ApprovalError::InstanceTerminal(instance_id),
        TransitionError::Invalid { .. } => ApprovalError::Internal(error.to_string()),
    })
}
