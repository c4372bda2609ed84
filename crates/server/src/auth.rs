use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use officeflow_core::audit::AuditContext;
use officeflow_core::tokens::{Caller, TokenError, TokenService};
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller identity from the bearer token plus the request's correlation id.
#[derive(Clone, Debug)]
pub struct Authenticated {
    pub caller: Caller,
    pub correlation_id: String,
}

impl Authenticated {
    pub fn audit(&self) -> AuditContext {
        AuditContext::new(self.correlation_id.clone(), format!("user:{}", self.caller.user_id))
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.caller.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("the admin role is required"))
        }
    }
}

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tokens = Arc::<TokenService>::from_ref(state);
        let token = bearer_token(&parts.headers)?;
        let caller = tokens.verify(token).map_err(|error| {
            debug!(event_name = "auth.token_rejected", error = %error, "bearer token rejected");
            match error {
                TokenError::Expired => ApiError::unauthenticated("token expired"),
                TokenError::Invalid(_) | TokenError::Issue(_) => {
                    ApiError::unauthenticated("token invalid")
                }
            }
        })?;
        Ok(Self { caller, correlation_id: correlation_id(&parts.headers) })
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthenticated("missing Authorization header"))?
        .to_str()
        .map_err(|_| ApiError::unauthenticated("malformed Authorization header"))?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthenticated("expected a bearer token"))?;
    Ok(token)
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(ToString::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderMap, HeaderValue};

    use super::{bearer_token, correlation_id, REQUEST_ID_HEADER};

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).expect("token"), "abc.def.ghi");
    }

    #[test]
    fn request_id_header_is_reused_as_correlation_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(correlation_id(&headers).len(), 36);

        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-77"));
        assert_eq!(correlation_id(&headers), "req-77");
    }
}
