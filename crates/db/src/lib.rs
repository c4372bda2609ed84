pub mod backend;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use backend::{BackendError, StoreBackend};
pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{DemoSeedDataset, SeedResult, VerificationResult};
pub use repositories::{InMemoryApprovalStore, SqlApprovalStore, SqlAuditSink};
