use std::sync::Arc;

use officeflow_core::catalog::{CatalogCache, CatalogService};
use officeflow_core::config::{AppConfig, ConfigError};
use officeflow_core::dispatch::{ChannelIntentSink, Dispatcher};
use officeflow_core::engine::{ApprovalEngine, EngineSettings, RetryPolicy};
use officeflow_core::tokens::TokenService;
use officeflow_db::{BackendError, StoreBackend};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::intents;
use crate::state::AppState;

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
    pub intent_worker: JoinHandle<u64>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        mode = config.server.mode.as_str(),
        "starting application bootstrap"
    );

    let backend = StoreBackend::open(&config.database).await?;
    info!(
        event_name = "system.bootstrap.store_ready",
        correlation_id = "bootstrap",
        backend = backend.name(),
        "approval store ready"
    );

    let store = backend.store();
    let (sink, receiver) = ChannelIntentSink::channel();
    let intent_worker = intents::spawn(receiver);
    let settings = EngineSettings {
        deadline: config.server.request_timeout(),
        read_retry: RetryPolicy::default(),
    };
    let engine = ApprovalEngine::new(
        store.clone(),
        Dispatcher::new(Arc::new(sink)),
        backend.audit_sink(),
        settings,
    );
    let catalog = CatalogService::new(store, CatalogCache::new(config.approval.cache_ttl()));
    let tokens = TokenService::from_config(&config.jwt);

    let state = AppState {
        engine: Arc::new(engine),
        catalog: Arc::new(catalog),
        tokens: Arc::new(tokens),
        backend,
    };
    Ok(Application { config, state, intent_worker })
}
