use thiserror::Error;

use crate::domain::catalog::FlowId;
use crate::domain::directory::UserId;
use crate::domain::instance::InstanceId;
use crate::store::StoreError;

/// Failure taxonomy shared by the catalog, the resolver and the engine.
/// Every variant keeps its kind all the way to the HTTP edge.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid node set: {0}")]
    InvalidShape(String),
    #[error("authentication required: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("user {approver_id} has no open task on instance {instance_id}")]
    NotAssigned { instance_id: InstanceId, approver_id: UserId },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("flow `{0}` is inactive")]
    FlowInactive(String),
    #[error("flow {0} is referenced by a live instance")]
    FlowInUse(FlowId),
    #[error("{entity} `{id}` is still in use")]
    InUse { entity: &'static str, id: String },
    #[error("instance {0} is no longer running")]
    InstanceTerminal(InstanceId),
    #[error("decision already recorded: {0}")]
    AlreadyDecided(String),
    #[error("business record {0} is bound to a live instance")]
    BusinessBusy(String),
    #[error("duplicate approver: {0}")]
    DuplicateApprover(String),
    #[error("no approvers could be resolved: {0}")]
    ResolveFailed(String),
    #[error("operation deadline expired")]
    Timeout,
    #[error("internal failure: {0}")]
    Internal(String),
}

/// Stable, machine-readable classification of an `ApprovalError`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    InvalidShape,
    Unauthenticated,
    Forbidden,
    NotAssigned,
    NotFound,
    FlowInactive,
    FlowInUse,
    InUse,
    InstanceTerminal,
    AlreadyDecided,
    BusinessBusy,
    DuplicateApprover,
    ResolveFailed,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InvalidShape => "invalid_shape",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotAssigned => "not_assigned",
            Self::NotFound => "not_found",
            Self::FlowInactive => "flow_inactive",
            Self::FlowInUse => "flow_in_use",
            Self::InUse => "in_use",
            Self::InstanceTerminal => "instance_terminal",
            Self::AlreadyDecided => "already_decided",
            Self::BusinessBusy => "business_busy",
            Self::DuplicateApprover => "duplicate_approver",
            Self::ResolveFailed => "resolve_failed",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    /// Default HTTP status. Surfaces with different conventions override it
    /// at the edge.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput | Self::InvalidShape => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden | Self::NotAssigned => 403,
            Self::NotFound => 404,
            Self::FlowInactive => 404,
            Self::FlowInUse | Self::InUse | Self::AlreadyDecided | Self::BusinessBusy => 409,
            Self::DuplicateApprover => 409,
            Self::InstanceTerminal => 410,
            Self::ResolveFailed => 422,
            Self::Timeout => 504,
            Self::Internal => 500,
        }
    }

    /// Domain refusals are audited as `rejected`, the rest as `failed`.
    pub fn is_refusal(&self) -> bool {
        !matches!(self, Self::Timeout | Self::Internal)
    }
}

impl ApprovalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidShape(_) => ErrorKind::InvalidShape,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotAssigned { .. } => ErrorKind::NotAssigned,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::FlowInactive(_) => ErrorKind::FlowInactive,
            Self::FlowInUse(_) => ErrorKind::FlowInUse,
            Self::InUse { .. } => ErrorKind::InUse,
            Self::InstanceTerminal(_) => ErrorKind::InstanceTerminal,
            Self::AlreadyDecided(_) => ErrorKind::AlreadyDecided,
            Self::BusinessBusy(_) => ErrorKind::BusinessBusy,
            Self::DuplicateApprover(_) => ErrorKind::DuplicateApprover,
            Self::ResolveFailed(_) => ErrorKind::ResolveFailed,
            Self::Timeout => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Message safe to show a caller. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Internal(_) => "An unexpected internal error occurred.".to_string(),
            Self::Timeout => "The operation did not finish before its deadline.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for ApprovalError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::InstanceTerminal(id) => Self::InstanceTerminal(id),
            StoreError::DuplicateApprover(message) => Self::DuplicateApprover(message),
            StoreError::AlreadyDecided(message) => Self::AlreadyDecided(message),
            StoreError::BusinessBusy(message) => Self::BusinessBusy(message),
            StoreError::Conflict(message) => Self::InvalidInput(message),
            StoreError::Unavailable(message)
            | StoreError::Database(message)
            | StoreError::Decode(message) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::catalog::FlowId;
    use crate::domain::instance::InstanceId;
    use crate::errors::{ApprovalError, ErrorKind};
    use crate::store::StoreError;

    #[test]
    fn kinds_map_to_documented_http_statuses() {
        let cases = [
            (ApprovalError::InvalidInput("x".into()), 400),
            (ApprovalError::Unauthenticated("x".into()), 401),
            (ApprovalError::Forbidden("x".into()), 403),
            (ApprovalError::not_found("instance", 4), 404),
            (ApprovalError::FlowInactive("leave-std".into()), 404),
            (ApprovalError::InstanceTerminal(InstanceId(1)), 410),
            (ApprovalError::AlreadyDecided("x".into()), 409),
            (ApprovalError::BusinessBusy("leave:1".into()), 409),
            (ApprovalError::FlowInUse(FlowId(2)), 409),
            (ApprovalError::ResolveFailed("x".into()), 422),
            (ApprovalError::Timeout, 504),
            (ApprovalError::Internal("x".into()), 500),
        ];

        for (error, status) in cases {
            assert_eq!(error.kind().http_status(), status, "{error}");
        }
    }

    #[test]
    fn store_contract_failures_keep_their_kind() {
        let error = ApprovalError::from(StoreError::AlreadyDecided("record 3".into()));
        assert_eq!(error.kind(), ErrorKind::AlreadyDecided);

        let error = ApprovalError::from(StoreError::InstanceTerminal(InstanceId(9)));
        assert_eq!(error, ApprovalError::InstanceTerminal(InstanceId(9)));

        let error = ApprovalError::from(StoreError::Unavailable("database is locked".into()));
        assert_eq!(error.kind(), ErrorKind::Internal);
    }

    #[test]
    fn internal_errors_hide_details_from_callers() {
        let error = ApprovalError::Internal("disk I/O error at page 7".into());
        assert_eq!(error.user_message(), "An unexpected internal error occurred.");
        assert!(!ErrorKind::Internal.is_refusal());
        assert!(ErrorKind::NotAssigned.is_refusal());
        assert_eq!(ErrorKind::NotAssigned.code(), "not_assigned");
    }
}
