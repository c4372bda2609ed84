use std::sync::Arc;

use axum::extract::FromRef;
use axum::Router;
use officeflow_core::catalog::CatalogService;
use officeflow_core::engine::ApprovalEngine;
use officeflow_core::tokens::TokenService;
use officeflow_db::StoreBackend;
use tower_http::trace::TraceLayer;

use crate::{approvals, catalog, health};

/// Shared handles every route needs. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ApprovalEngine>,
    pub catalog: Arc<CatalogService>,
    pub tokens: Arc<TokenService>,
    pub backend: StoreBackend,
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(approvals::router())
        .merge(catalog::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use officeflow_core::catalog::{CatalogCache, CatalogService};
    use officeflow_core::dispatch::{Dispatcher, InMemoryIntentSink};
    use officeflow_core::domain::directory::UserId;
    use officeflow_core::engine::{ApprovalEngine, EngineSettings};
    use officeflow_core::tokens::{TokenService, ADMIN_ROLE};
    use officeflow_core::audit::InMemoryAuditSink;
    use officeflow_core::config::DatabaseConfig;
    use officeflow_db::StoreBackend;
    use secrecy::SecretString;
    use serde_json::Value;

    use super::AppState;

    pub const SECRET: &str = "router-test-secret-0123456789";

    /// Seeded `memory://` deployment with in-memory intent and audit sinks.
    pub async fn state() -> (AppState, InMemoryIntentSink) {
        let backend = StoreBackend::open(&DatabaseConfig {
            dsn: "memory://".to_string(),
            max_connections: 1,
            timeout_secs: 5,
        })
        .await
        .expect("memory backend");
        let store = backend.store();
        let intents = InMemoryIntentSink::default();
        let engine = ApprovalEngine::new(
            store.clone(),
            Dispatcher::new(Arc::new(intents.clone())),
            Arc::new(InMemoryAuditSink::default()),
            EngineSettings::default(),
        );
        let state = AppState {
            engine: Arc::new(engine),
            catalog: Arc::new(CatalogService::new(store, CatalogCache::disabled())),
            tokens: Arc::new(TokenService::new(&SecretString::from(SECRET.to_string()), 3600)),
            backend,
        };
        (state, intents)
    }

    pub fn token(state: &AppState, user: i64) -> String {
        state.tokens.issue(UserId(user), &[]).expect("token")
    }

    pub fn admin_token(state: &AppState, user: i64) -> String {
        state.tokens.issue(UserId(user), &[ADMIN_ROLE.to_string()]).expect("token")
    }

    pub fn request(
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        }
    }

    pub async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }
}
