//! Catalog administration. Reads need any authenticated caller, mutations
//! the admin role.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use officeflow_core::domain::catalog::{
    ApprovalType, ApprovalTypeId, ApprovalTypeUpdate, Flow, FlowId, FlowUpdate, FlowWithNodes,
    NewApprovalType, NewFlow, Node, NodeSpec,
};
use serde::Deserialize;
use tracing::info;

use crate::auth::Authenticated;
use crate::error::{ApiError, OnSurface, Surface};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/approval-types", get(list_types).post(create_type))
        .route(
            "/api/approval-types/{code}",
            get(get_type).put(update_type).delete(delete_type),
        )
        .route("/api/approval-types/{code}/activate", post(activate_type))
        .route("/api/approval-types/{code}/deactivate", post(deactivate_type))
        .route("/api/approval-flows", get(list_flows).post(create_flow))
        .route(
            "/api/approval-flows/{id}",
            get(get_flow).put(update_flow).delete(delete_flow),
        )
        .route("/api/approval-flows/{id}/activate", post(activate_flow))
        .route("/api/approval-flows/{id}/deactivate", post(deactivate_flow))
        .route("/api/approval-flows/{id}/clone", post(clone_flow))
        .route("/api/approval-flows/{id}/nodes", get(list_nodes).put(replace_nodes))
}

#[derive(Debug, Default, Deserialize)]
pub struct FlowQuery {
    pub type_id: Option<i64>,
    #[serde(default)]
    pub only_active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CloneRequest {
    pub name: Option<String>,
}

async fn list_types(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<Vec<ApprovalType>>, ApiError> {
    Ok(Json(state.catalog.list_types().await.on(Surface::Catalog)?))
}

async fn get_type(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(code): Path<String>,
) -> Result<Json<ApprovalType>, ApiError> {
    Ok(Json(state.catalog.get_type(&code).await.on(Surface::Catalog)?))
}

async fn create_type(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<NewApprovalType>, JsonRejection>,
) -> Result<(StatusCode, Json<ApprovalType>), ApiError> {
    auth.require_admin()?;
    let Json(new) = body?;
    let created = state.catalog.create_type(new).await.on(Surface::Catalog)?;
    log_admin_change(&auth, "approval_type.created", &created.code);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_type(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(code): Path<String>,
    body: Result<Json<ApprovalTypeUpdate>, JsonRejection>,
) -> Result<Json<ApprovalType>, ApiError> {
    auth.require_admin()?;
    let Json(update) = body?;
    let updated = state.catalog.update_type(&code, update).await.on(Surface::Catalog)?;
    log_admin_change(&auth, "approval_type.updated", &code);
    Ok(Json(updated))
}

async fn delete_type(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    auth.require_admin()?;
    state.catalog.delete_type(&code).await.on(Surface::Catalog)?;
    log_admin_change(&auth, "approval_type.deleted", &code);
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_type(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(code): Path<String>,
) -> Result<Json<ApprovalType>, ApiError> {
    auth.require_admin()?;
    Ok(Json(state.catalog.activate_type(&code).await.on(Surface::Catalog)?))
}

async fn deactivate_type(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(code): Path<String>,
) -> Result<Json<ApprovalType>, ApiError> {
    auth.require_admin()?;
    Ok(Json(state.catalog.deactivate_type(&code).await.on(Surface::Catalog)?))
}

async fn list_flows(
    State(state): State<AppState>,
    _auth: Authenticated,
    query: Result<Query<FlowQuery>, QueryRejection>,
) -> Result<Json<Vec<Flow>>, ApiError> {
    let Query(query) = query?;
    let flows = state
        .catalog
        .list_flows(query.type_id.map(ApprovalTypeId), query.only_active)
        .await
        .on(Surface::Catalog)?;
    Ok(Json(flows))
}

async fn get_flow(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<FlowWithNodes>, ApiError> {
    Ok(Json(state.catalog.get_flow(flow_id(&id)?).await.on(Surface::Catalog)?))
}

async fn create_flow(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Result<Json<NewFlow>, JsonRejection>,
) -> Result<(StatusCode, Json<FlowWithNodes>), ApiError> {
    auth.require_admin()?;
    let Json(new) = body?;
    let created = state.catalog.create_flow(new).await.on(Surface::Catalog)?;
    log_admin_change(&auth, "approval_flow.created", &created.flow.id.to_string());
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_flow(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<String>,
    body: Result<Json<FlowUpdate>, JsonRejection>,
) -> Result<Json<Flow>, ApiError> {
    auth.require_admin()?;
    let id = flow_id(&id)?;
    let Json(update) = body?;
    let updated = state.catalog.update_flow_metadata(id, update).await.on(Surface::Catalog)?;
    log_admin_change(&auth, "approval_flow.updated", &id.to_string());
    Ok(Json(updated))
}

async fn delete_flow(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    auth.require_admin()?;
    let id = flow_id(&id)?;
    state.catalog.delete_flow(id).await.on(Surface::Catalog)?;
    log_admin_change(&auth, "approval_flow.deleted", &id.to_string());
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_flow(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Flow>, ApiError> {
    auth.require_admin()?;
    Ok(Json(state.catalog.activate_flow(flow_id(&id)?).await.on(Surface::Catalog)?))
}

async fn deactivate_flow(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Flow>, ApiError> {
    auth.require_admin()?;
    Ok(Json(state.catalog.deactivate_flow(flow_id(&id)?).await.on(Surface::Catalog)?))
}

async fn clone_flow(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<String>,
    body: Option<Json<CloneRequest>>,
) -> Result<(StatusCode, Json<FlowWithNodes>), ApiError> {
    auth.require_admin()?;
    let id = flow_id(&id)?;
    let name = body.and_then(|Json(request)| request.name);
    let cloned = state.catalog.clone_flow(id, name).await.on(Surface::Catalog)?;
    log_admin_change(&auth, "approval_flow.cloned", &cloned.flow.id.to_string());
    Ok((StatusCode::CREATED, Json(cloned)))
}

async fn list_nodes(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<Vec<Node>>, ApiError> {
    Ok(Json(state.catalog.list_nodes(flow_id(&id)?).await.on(Surface::Catalog)?))
}

async fn replace_nodes(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<String>,
    body: Result<Json<Vec<NodeSpec>>, JsonRejection>,
) -> Result<Json<Vec<Node>>, ApiError> {
    auth.require_admin()?;
    let id = flow_id(&id)?;
    let Json(specs) = body?;
    let nodes = state.catalog.upsert_nodes(id, specs).await.on(Surface::Catalog)?;
    log_admin_change(&auth, "approval_flow.nodes_replaced", &id.to_string());
    Ok(Json(nodes))
}

fn flow_id(raw: &str) -> Result<FlowId, ApiError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .map(FlowId)
        .ok_or_else(|| ApiError::invalid_input(format!("`{raw}` is not a flow id")))
}

fn log_admin_change(auth: &Authenticated, change: &'static str, target: &str) {
    info!(
        event_name = "http.catalog_changed",
        correlation_id = %auth.correlation_id,
        actor_id = auth.caller.user_id.0,
        change,
        target = %target,
        "catalog changed by administrator"
    );
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::state::router;
    use crate::state::test_support::{admin_token, json_body, request, state, token};

    #[tokio::test]
    async fn mutations_require_the_admin_role() {
        let (state, _) = state().await;
        let app = router(state.clone());
        let body = json!({"code": "expense", "name": "Expense claim"});

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/approval-types",
                Some(&token(&state, 42)),
                Some(body.clone()),
            ))
            .await
            .expect("non-admin");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["kind"], "forbidden");

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/approval-types",
                Some(&admin_token(&state, 1)),
                Some(body),
            ))
            .await
            .expect("admin");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(request(
                Method::GET,
                "/api/approval-types/expense",
                Some(&token(&state, 42)),
                None,
            ))
            .await
            .expect("read");
        assert_eq!(json_body(response).await["name"], "Expense claim");
    }

    #[tokio::test]
    async fn flow_admin_round_trip() {
        let (state, _) = state().await;
        let app = router(state.clone());
        let admin = admin_token(&state, 1);

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/approval-flows",
                Some(&admin),
                Some(json!({
                    "type_id": 1,
                    "name": "leave-express",
                    "nodes": [
                        {"name": "Manager", "order": 1, "kind": "fixed_person", "user_id": 7},
                        {"name": "Head", "order": 2, "kind": "department_head"}
                    ]
                })),
            ))
            .await
            .expect("create");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        let id = created["flow"]["id"].as_i64().expect("flow id");
        assert_eq!(created["nodes"].as_array().map(Vec::len), Some(2));

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                &format!("/api/approval-flows/{id}/nodes"),
                Some(&admin),
                Some(json!([])),
            ))
            .await
            .expect("empty nodes");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "invalid_shape");

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/approval-flows/{id}/clone"),
                Some(&admin),
                None,
            ))
            .await
            .expect("clone");
        assert_eq!(response.status(), StatusCode::CREATED);
        let clone = json_body(response).await;
        assert_eq!(clone["flow"]["active"], false);

        let response = app
            .oneshot(request(
                Method::GET,
                "/api/approval-flows?type_id=1&only_active=true",
                Some(&token(&state, 42)),
                None,
            ))
            .await
            .expect("list");
        let flows = json_body(response).await;
        assert_eq!(flows.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn in_use_type_cannot_be_deleted() {
        let (state, _) = state().await;
        let app = router(state.clone());

        let response = app
            .oneshot(request(
                Method::DELETE,
                "/api/approval-types/leave",
                Some(&admin_token(&state, 1)),
                None,
            ))
            .await
            .expect("delete");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["kind"], "in_use");
    }
}
