//! Engine routes:
//!
//! - `POST /api/approvals/{type_code}`       submit (201 + instance)
//! - `GET  /api/approvals/{id}`              instance with its node records
//! - `POST /api/approvals/{id}/approve`      decide Approve (204)
//! - `POST /api/approvals/{id}/reject`       decide Reject (204)
//! - `POST /api/approvals/{id}/cancel`       cancel (204)
//! - `POST /api/approvals/{id}/withdraw`     alias of cancel
//! - `GET  /api/approvals?assignee=me`       open tasks of the caller
//! - `GET  /api/approvals?applicant=me`      submissions of the caller

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use officeflow_core::domain::catalog::FlowId;
use officeflow_core::domain::instance::{
    BusinessModule, BusinessRef, Decision, InstanceFilter, InstanceId, InstanceStatus,
    InstanceView, Submission,
};
use officeflow_core::domain::page::PageRequest;
use serde::Deserialize;

use crate::auth::Authenticated;
use crate::error::{ApiError, OnSurface, Surface};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/approvals", get(list))
        .route("/api/approvals/{id}", get(load).post(submit))
        .route("/api/approvals/{id}/approve", post(approve))
        .route("/api/approvals/{id}/reject", post(reject))
        .route("/api/approvals/{id}/cancel", post(cancel))
        .route("/api/approvals/{id}/withdraw", post(cancel))
}

#[derive(Debug, Deserialize)]
pub struct BusinessInput {
    pub module: String,
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub flow_id: Option<i64>,
    pub business: Option<BusinessInput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecideRequest {
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub assignee: Option<String>,
    pub applicant: Option<String>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// The path segment holds the approval type code on submit.
async fn submit(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(type_code): Path<String>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InstanceView>), ApiError> {
    let Json(request) = body?;
    let business = request.business.map(business_ref).transpose()?;
    let submission = Submission {
        applicant_id: auth.caller.user_id,
        title: request.title,
        body: request.body,
        business,
    };

    let view = state
        .engine
        .submit_for_type(&type_code, request.flow_id.map(FlowId), submission, &auth.audit())
        .await
        .on(Surface::Submit)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn load(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<InstanceView>, ApiError> {
    let id = instance_id(&id)?;
    let view = state.engine.load_instance(id).await.on(Surface::Read)?;
    Ok(Json(view))
}

async fn approve(
    state: State<AppState>,
    auth: Authenticated,
    id: Path<String>,
    body: Option<Json<DecideRequest>>,
) -> Result<StatusCode, ApiError> {
    decide(state, auth, id, body, Decision::Approve).await
}

async fn reject(
    state: State<AppState>,
    auth: Authenticated,
    id: Path<String>,
    body: Option<Json<DecideRequest>>,
) -> Result<StatusCode, ApiError> {
    decide(state, auth, id, body, Decision::Reject).await
}

async fn decide(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<String>,
    body: Option<Json<DecideRequest>>,
    decision: Decision,
) -> Result<StatusCode, ApiError> {
    let id = instance_id(&id)?;
    let comment = body.map(|Json(request)| request.comment).unwrap_or_default();
    state
        .engine
        .decide(id, auth.caller.user_id, decision, &comment, &auth.audit())
        .await
        .on(Surface::Decide)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = instance_id(&id)?;
    state.engine.cancel(id, auth.caller.user_id, &auth.audit()).await.on(Surface::Cancel)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list(
    State(state): State<AppState>,
    auth: Authenticated,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let page = PageRequest::new(query.page, query.page_size).on(Surface::Read)?;
    let status = query.status.as_deref().map(parse_status).transpose()?;

    if let Some(assignee) = query.assignee.as_deref() {
        require_me("assignee", assignee)?;
        if status.is_some_and(|status| status != InstanceStatus::Pending) {
            return Err(ApiError::invalid_input("open tasks can only be listed as `pending`"));
        }
        let todo = state.engine.list_todo(auth.caller.user_id, page).await.on(Surface::Read)?;
        return Ok(Json(todo).into_response());
    }

    let applicant_id = match query.applicant.as_deref() {
        Some(applicant) => {
            require_me("applicant", applicant)?;
            Some(auth.caller.user_id)
        }
        None => {
            auth.require_admin()?;
            None
        }
    };
    let filter = InstanceFilter { applicant_id, status };
    let instances = state.engine.list_instances(filter, page).await.on(Surface::Read)?;
    Ok(Json(instances).into_response())
}

fn require_me(parameter: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().eq_ignore_ascii_case("me") {
        Ok(())
    } else {
        Err(ApiError::invalid_input(format!("`{parameter}` only accepts `me`")))
    }
}

fn parse_status(value: &str) -> Result<InstanceStatus, ApiError> {
    InstanceStatus::parse(value.trim())
        .ok_or_else(|| ApiError::invalid_input(format!("unknown instance status `{value}`")))
}

fn instance_id(raw: &str) -> Result<InstanceId, ApiError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .map(InstanceId)
        .ok_or_else(|| ApiError::invalid_input(format!("`{raw}` is not an instance id")))
}

fn business_ref(input: BusinessInput) -> Result<BusinessRef, ApiError> {
    let module = BusinessModule::parse(&input.module).ok_or_else(|| {
        ApiError::invalid_input(format!("unknown business module `{}`", input.module))
    })?;
    Ok(BusinessRef::new(module, input.id))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use officeflow_core::dispatch::Intent;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::state::router;
    use crate::state::test_support::{admin_token, json_body, request, state, token};

    #[tokio::test]
    async fn leave_request_travels_from_submit_to_approved() {
        let (state, intents) = state().await;
        let app = router(state.clone());
        let applicant = token(&state, 42);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/approvals/leave",
                Some(&applicant),
                Some(json!({
                    "title": "Leave 2024-06-01",
                    "body": "3 days",
                    "business": {"module": "leave", "id": 1}
                })),
            ))
            .await
            .expect("submit");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        assert_eq!(created["instance"]["status"], "running");
        let id = created["instance"]["id"].as_i64().expect("instance id");

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/api/approvals?assignee=me&status=pending",
                Some(&token(&state, 7)),
                None,
            ))
            .await
            .expect("todo");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["total"], 1);

        for (approver, comment) in [(7, "ok"), (9, "")] {
            let response = app
                .clone()
                .oneshot(request(
                    Method::POST,
                    &format!("/api/approvals/{id}/approve"),
                    Some(&token(&state, approver)),
                    Some(json!({ "comment": comment })),
                ))
                .await
                .expect("approve");
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("/api/approvals/{id}"), Some(&applicant), None))
            .await
            .expect("load");
        assert_eq!(json_body(response).await["instance"]["status"], "approved");

        let response = app
            .oneshot(request(
                Method::POST,
                &format!("/api/approvals/{id}/approve"),
                Some(&token(&state, 10)),
                None,
            ))
            .await
            .expect("late approve");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["kind"], "already_decided");

        assert!(intents.intents().iter().any(|intent| matches!(intent, Intent::Approved { .. })));
    }

    #[tokio::test]
    async fn requests_without_a_valid_token_are_unauthenticated() {
        let (state, _) = state().await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/api/approvals/1", None, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["kind"], "unauthenticated");

        let response = app
            .oneshot(request(Method::GET, "/api/approvals/1", Some("not-a-jwt"), None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_errors_keep_their_kind() {
        let (state, _) = state().await;
        let app = router(state.clone());
        let applicant = token(&state, 42);
        let body = json!({"title": "Dispose", "business": {"module": "asset-disposal", "id": 77}});

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/approvals/disposal",
                Some(&applicant),
                Some(body.clone()),
            ))
            .await
            .expect("first");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/api/approvals/disposal", Some(&applicant), Some(body)))
            .await
            .expect("second");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["kind"], "business_busy");

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/approvals/leave",
                Some(&applicant),
                Some(json!({"title": "x", "business": {"module": "payroll", "id": 1}})),
            ))
            .await
            .expect("unknown module");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request(
                Method::POST,
                "/api/approvals/travel",
                Some(&applicant),
                Some(json!({"title": "Trip"})),
            ))
            .await
            .expect("unknown type");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_of_a_terminal_instance_is_a_conflict() {
        let (state, _) = state().await;
        let app = router(state.clone());
        let applicant = token(&state, 42);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/approvals/meeting",
                Some(&applicant),
                Some(json!({"title": "Room"})),
            ))
            .await
            .expect("submit");
        let id = json_body(response).await["instance"]["id"].as_i64().expect("id");

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/approvals/{id}/withdraw"),
                Some(&token(&state, 5)),
                None,
            ))
            .await
            .expect("foreign withdraw");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/approvals/{id}/withdraw"),
                Some(&applicant),
                None,
            ))
            .await
            .expect("withdraw");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/approvals/{id}/cancel"),
                Some(&applicant),
                None,
            ))
            .await
            .expect("cancel again");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["kind"], "instance_terminal");

        let response = app
            .oneshot(request(
                Method::POST,
                &format!("/api/approvals/{id}/approve"),
                Some(&token(&state, 5)),
                None,
            ))
            .await
            .expect("approve cancelled");
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn listings_are_scoped_to_the_caller_unless_admin() {
        let (state, _) = state().await;
        let app = router(state.clone());
        let applicant = token(&state, 42);
        app.clone()
            .oneshot(request(
                Method::POST,
                "/api/approvals/meeting",
                Some(&applicant),
                Some(json!({"title": "Room"})),
            ))
            .await
            .expect("submit");

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/api/approvals?applicant=me&status=running",
                Some(&applicant),
                None,
            ))
            .await
            .expect("mine");
        assert_eq!(json_body(response).await["total"], 1);

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/api/approvals?applicant=me",
                Some(&token(&state, 7)),
                None,
            ))
            .await
            .expect("someone else");
        let body = json_body(response).await;
        assert_eq!(body["total"], 0);
        assert_eq!(body["data"], serde_json::json!([]));

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/api/approvals", Some(&applicant), None))
            .await
            .expect("all as non-admin");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/api/approvals", Some(&admin_token(&state, 1)), None))
            .await
            .expect("all as admin");
        assert_eq!(json_body(response).await["total"], 1);

        let response = app
            .oneshot(request(
                Method::GET,
                "/api/approvals?assignee=me&page_size=500",
                Some(&applicant),
                None,
            ))
            .await
            .expect("oversized page");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
