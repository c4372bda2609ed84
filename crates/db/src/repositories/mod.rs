use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use officeflow_core::store::StoreError;

pub mod audit;
pub mod business;
pub mod catalog;
pub mod directory;
pub mod instance;
pub mod memory;
pub mod store;

pub use audit::SqlAuditSink;
pub use memory::InMemoryApprovalStore;
pub use store::{SqlApprovalStore, SqlStoreTx};

/// Failures of the pool-level helpers (fixtures, audit persistence) that
/// sit outside the engine's storage seam.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => db_error(error),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

/// Maps a driver error onto the storage taxonomy. Busy and locked databases
/// are transient; unique violations are conflicts.
pub(crate) fn db_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        sqlx::Error::Database(database) => {
            let primary_code = database
                .code()
                .and_then(|code| code.parse::<i64>().ok())
                .map(|code| code & 0xff);
            if matches!(primary_code, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
                StoreError::Unavailable(database.message().to_string())
            } else if database.is_unique_violation() {
                StoreError::Conflict(database.message().to_string())
            } else {
                StoreError::Database(database.message().to_string())
            }
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => StoreError::Decode(error.to_string()),
        _ => StoreError::Database(error.to_string()),
    }
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|error| StoreError::Decode(format!("{name}: {error}")))
}

pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| StoreError::Decode(format!("timestamp `{value}`: {error}")))
}

pub(crate) fn timestamp_column(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = column(row, name)?;
    parse_timestamp(&raw)
}

pub(crate) fn optional_timestamp_column(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<String> = column(row, name)?;
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

pub(crate) fn sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
