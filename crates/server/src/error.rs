use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use officeflow_core::errors::{ApprovalError, ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Which route family produced the error. A few kinds map to different
/// statuses depending on the operation the caller attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Surface {
    Submit,
    Decide,
    Cancel,
    Read,
    Catalog,
    Auth,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(surface: Surface, error: ApprovalError) -> Self {
        let kind = error.kind();
        if kind == ErrorKind::Internal {
            error!(
                event_name = "http.internal_error",
                surface = ?surface,
                error = %error,
                "request failed with an internal error"
            );
        }
        Self { status: status_for(surface, kind), kind, message: error.user_message() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(Surface::Read, ApprovalError::InvalidInput(message.into()))
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Surface::Auth, ApprovalError::Unauthenticated(message.into()))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(Surface::Auth, ApprovalError::Forbidden(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(surface: Surface, kind: ErrorKind) -> StatusCode {
    let code = match (surface, kind) {
        (Surface::Catalog, ErrorKind::FlowInactive) => 409,
        (Surface::Cancel, ErrorKind::InstanceTerminal) => 409,
        (_, kind) => kind.http_status(),
    };
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { kind: self.kind.code().to_string(), message: self.message };
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

/// Binds an [`ApprovalError`] to the surface it is reported on.
pub trait OnSurface<T> {
    fn on(self, surface: Surface) -> Result<T, ApiError>;
}

impl<T> OnSurface<T> for Result<T, ApprovalError> {
    fn on(self, surface: Surface) -> Result<T, ApiError> {
        self.map_err(|error| ApiError::new(surface, error))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use officeflow_core::domain::instance::InstanceId;
    use officeflow_core::errors::ApprovalError;

    use super::{ApiError, Surface};

    #[test]
    fn flow_inactive_is_not_found_on_submit_but_conflict_on_catalog_edits() {
        let error = ApprovalError::FlowInactive("leave-std".to_string());

        assert_eq!(ApiError::new(Surface::Submit, error.clone()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::new(Surface::Catalog, error).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn terminal_instance_is_gone_on_decide_and_conflict_on_cancel() {
        let error = ApprovalError::InstanceTerminal(InstanceId(3));

        assert_eq!(ApiError::new(Surface::Decide, error.clone()).status(), StatusCode::GONE);
        assert_eq!(ApiError::new(Surface::Cancel, error).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn internal_details_are_not_rendered() {
        let error = ApiError::new(Surface::Read, ApprovalError::Internal("disk full".to_string()));

        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message.contains("disk full"));
    }
}
