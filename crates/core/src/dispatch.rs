//! Side effects of terminal transitions and the intents emitted around them.
//!
//! Business effects run inside the engine's unit of work; intents are
//! published only after that unit of work commits.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::catalog::NodeId;
use crate::domain::directory::UserId;
use crate::domain::instance::{BusinessModule, BusinessRef, InstanceId, InstanceStatus};
use crate::errors::ApprovalError;
use crate::store::{BusinessTx, InstanceTx};

/// Terminal outcome a business module reacts to. Cancellation has no
/// business effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Approved,
    Rejected,
}

impl DispatchOutcome {
    pub fn status(&self) -> InstanceStatus {
        match self {
            Self::Approved => InstanceStatus::Approved,
            Self::Rejected => InstanceStatus::Rejected,
        }
    }
}

/// One idempotent row update. Table and column names come from the static
/// binding table below, never from callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusinessEffect {
    SetStatus { table: &'static str, status: &'static str },
    /// Follows `table.link_column` to `target_table.id` and sets its status.
    SetLinkedStatus {
        table: &'static str,
        link_column: &'static str,
        target_table: &'static str,
        status: &'static str,
    },
    /// Fills `table.column` with the decision date unless already set.
    StampDate { table: &'static str, column: &'static str },
}

pub fn effects_for(module: BusinessModule, outcome: DispatchOutcome) -> Vec<BusinessEffect> {
    use BusinessEffect::{SetLinkedStatus, SetStatus, StampDate};

    let table = module.table();
    match (module, outcome) {
        (BusinessModule::AssetDisposal, DispatchOutcome::Approved) => vec![
            SetStatus { table, status: "approved" },
            SetLinkedStatus {
                table,
                link_column: "asset_id",
                target_table: "assets",
                status: "disposed",
            },
        ],
        (BusinessModule::VehicleApplication, DispatchOutcome::Approved) => vec![
            SetStatus { table, status: "approved" },
            SetLinkedStatus {
                table,
                link_column: "vehicle_id",
                target_table: "vehicles",
                status: "in_use",
            },
        ],
        (BusinessModule::SealApplication, DispatchOutcome::Approved) => vec![
            SetStatus { table, status: "approved" },
            SetLinkedStatus {
                table,
                link_column: "seal_id",
                target_table: "seals",
                status: "checked_out",
            },
        ],
        (BusinessModule::Document, DispatchOutcome::Approved) => vec![
            SetStatus { table, status: "signed" },
            StampDate { table, column: "sign_date" },
        ],
        (BusinessModule::Document, DispatchOutcome::Rejected) => {
            vec![SetStatus { table, status: "draft" }]
        }
        (_, DispatchOutcome::Approved) => vec![SetStatus { table, status: "approved" }],
        (_, DispatchOutcome::Rejected) => vec![SetStatus { table, status: "rejected" }],
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Submitted { instance_id: InstanceId, recipient: UserId },
    TodoAssigned { instance_id: InstanceId, node_id: NodeId, recipient: UserId },
    TodoWithdrawn { instance_id: InstanceId, node_id: NodeId, recipient: UserId },
    Approved { instance_id: InstanceId, recipient: UserId },
    Rejected { instance_id: InstanceId, recipient: UserId },
    Cancelled { instance_id: InstanceId, recipient: UserId },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted { .. } => "submitted",
            Self::TodoAssigned { .. } => "todo_assigned",
            Self::TodoWithdrawn { .. } => "todo_withdrawn",
            Self::Approved { .. } => "approved",
            Self::Rejected { .. } => "rejected",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        match self {
            Self::Submitted { instance_id, .. }
            | Self::TodoAssigned { instance_id, .. }
            | Self::TodoWithdrawn { instance_id, .. }
            | Self::Approved { instance_id, .. }
            | Self::Rejected { instance_id, .. }
            | Self::Cancelled { instance_id, .. } => *instance_id,
        }
    }

    pub fn recipient(&self) -> UserId {
        match self {
            Self::Submitted { recipient, .. }
            | Self::TodoAssigned { recipient, .. }
            | Self::TodoWithdrawn { recipient, .. }
            | Self::Approved { recipient, .. }
            | Self::Rejected { recipient, .. }
            | Self::Cancelled { recipient, .. } => *recipient,
        }
    }
}

/// Receiver of committed intents. Implementations must not block.
pub trait IntentSink: Send + Sync {
    fn publish(&self, intent: Intent);
}

#[derive(Clone, Default)]
pub struct InMemoryIntentSink {
    intents: Arc<Mutex<Vec<Intent>>>,
}

impl InMemoryIntentSink {
    pub fn intents(&self) -> Vec<Intent> {
        match self.intents.lock() {
            Ok(intents) => intents.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn take(&self) -> Vec<Intent> {
        match self.intents.lock() {
            Ok(mut intents) => std::mem::take(&mut *intents),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl IntentSink for InMemoryIntentSink {
    fn publish(&self, intent: Intent) {
        match self.intents.lock() {
            Ok(mut intents) => intents.push(intent),
            Err(poisoned) => poisoned.into_inner().push(intent),
        }
    }
}

/// Forwards intents to a delivery task over an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelIntentSink {
    sender: mpsc::UnboundedSender<Intent>,
}

impl ChannelIntentSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Intent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl IntentSink for ChannelIntentSink {
    fn publish(&self, intent: Intent) {
        if let Err(error) = self.sender.send(intent) {
            warn!(
                event_name = "dispatch.intent_dropped",
                intent = error.0.name(),
                instance_id = error.0.instance_id().0,
                "intent receiver closed; intent dropped"
            );
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    /// `false` when the transition had already been dispatched.
    pub applied: bool,
    pub effects: usize,
}

pub struct Dispatcher {
    sink: Arc<dyn IntentSink>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn IntentSink>) -> Self {
        Self { sink }
    }

    /// Applies the business effects bound to `business` for `outcome`, at most
    /// once per instance. Runs inside the caller's unit of work.
    pub async fn apply<T>(
        &self,
        tx: &mut T,
        instance_id: InstanceId,
        business: Option<&BusinessRef>,
        outcome: DispatchOutcome,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, ApprovalError>
    where
        T: InstanceTx + BusinessTx + ?Sized,
    {
        if !tx.record_dispatch(instance_id, outcome.status(), now).await? {
            info!(
                event_name = "dispatch.replay_skipped",
                instance_id = instance_id.0,
                "terminal transition already dispatched"
            );
            return Ok(DispatchReport { applied: false, effects: 0 });
        }

        let Some(business) = business else {
            return Ok(DispatchReport { applied: true, effects: 0 });
        };

        let effects = effects_for(business.module, outcome);
        for effect in &effects {
            tx.apply_effect(effect, business.row_id, now).await?;
        }

        info!(
            event_name = "dispatch.effects_applied",
            instance_id = instance_id.0,
            business = %business,
            outcome = outcome.status().as_str(),
            effects = effects.len(),
            "business effects applied"
        );
        Ok(DispatchReport { applied: true, effects: effects.len() })
    }

    /// Publishes intents in order. Call only after the unit of work committed.
    pub fn publish(&self, intents: Vec<Intent>) {
        for intent in intents {
            self.sink.publish(intent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        effects_for, BusinessEffect, ChannelIntentSink, DispatchOutcome, InMemoryIntentSink,
        Intent, IntentSink,
    };
    use crate::domain::catalog::NodeId;
    use crate::domain::directory::UserId;
    use crate::domain::instance::{BusinessModule, InstanceId};

    #[test]
    fn every_module_has_a_status_effect_for_both_outcomes() {
        for module in BusinessModule::ALL {
            for outcome in [DispatchOutcome::Approved, DispatchOutcome::Rejected] {
                let effects = effects_for(module, outcome);
                assert!(
                    matches!(effects.first(), Some(BusinessEffect::SetStatus { table, .. }) if *table == module.table()),
                    "{module} {outcome:?}"
                );
            }
        }
    }

    #[test]
    fn asset_disposal_approval_disposes_the_asset() {
        let effects = effects_for(BusinessModule::AssetDisposal, DispatchOutcome::Approved);
        assert_eq!(
            effects[1],
            BusinessEffect::SetLinkedStatus {
                table: "asset_disposals",
                link_column: "asset_id",
                target_table: "assets",
                status: "disposed",
            }
        );

        let rejected = effects_for(BusinessModule::AssetDisposal, DispatchOutcome::Rejected);
        assert_eq!(
            rejected,
            vec![BusinessEffect::SetStatus { table: "asset_disposals", status: "rejected" }]
        );
    }

    #[test]
    fn document_is_signed_on_approval_and_reverts_to_draft() {
        let approved = effects_for(BusinessModule::Document, DispatchOutcome::Approved);
        assert_eq!(
            approved,
            vec![
                BusinessEffect::SetStatus { table: "documents", status: "signed" },
                BusinessEffect::StampDate { table: "documents", column: "sign_date" },
            ]
        );
        let rejected = effects_for(BusinessModule::Document, DispatchOutcome::Rejected);
        assert_eq!(
            rejected,
            vec![BusinessEffect::SetStatus { table: "documents", status: "draft" }]
        );
    }

    #[test]
    fn in_memory_sink_keeps_publication_order() {
        let sink = InMemoryIntentSink::default();
        sink.publish(Intent::TodoAssigned {
            instance_id: InstanceId(1),
            node_id: NodeId(1),
            recipient: UserId(7),
        });
        sink.publish(Intent::Submitted { instance_id: InstanceId(1), recipient: UserId(42) });

        let names: Vec<&str> = sink.intents().iter().map(Intent::name).collect();
        assert_eq!(names, vec!["todo_assigned", "submitted"]);
        assert_eq!(sink.take().len(), 2);
        assert!(sink.intents().is_empty());
    }

    #[tokio::test]
    async fn channel_sink_forwards_and_survives_closed_receiver() {
        let (sink, mut receiver) = ChannelIntentSink::channel();
        sink.publish(Intent::Approved { instance_id: InstanceId(3), recipient: UserId(42) });

        let received = receiver.recv().await.expect("intent");
        assert_eq!(received.instance_id(), InstanceId(3));
        assert_eq!(received.recipient(), UserId(42));

        drop(receiver);
        sink.publish(Intent::Cancelled { instance_id: InstanceId(3), recipient: UserId(42) });
    }
}
