pub mod audit;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod resolver;
pub mod store;
pub mod tokens;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use catalog::{CatalogCache, CatalogService};
pub use dispatch::{
    BusinessEffect, ChannelIntentSink, DispatchOutcome, Dispatcher, InMemoryIntentSink, Intent,
    IntentSink,
};
pub use domain::catalog::{
    ApprovalType, ApprovalTypeId, Flow, FlowId, FlowWithNodes, Node, NodeId, NodeKind, NodeSpec,
};
pub use domain::directory::{DepartmentId, RoleId, UserId};
pub use domain::instance::{
    BusinessModule, BusinessRef, Decision, Instance, InstanceId, InstanceStatus, InstanceView,
    NodeRecord, NodeRecordStatus, Submission,
};
pub use domain::page::{Page, PageRequest};
pub use engine::{ApprovalEngine, DecisionReceipt, EngineSettings, RetryPolicy};
pub use errors::{ApprovalError, ErrorKind};
pub use resolver::{InstanceContext, ParticipantResolver};
pub use store::{ApprovalStore, StoreError, StoreTx};
pub use tokens::{Caller, TokenError, TokenService};
