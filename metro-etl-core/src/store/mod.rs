//! Record store abstraction.
//!
//! Stages talk to storage only through [`RecordStore`]: an async capability
//! for executing DDL, appending records, and reading a table back. Records are
//! JSON objects keyed by lower-case column name.

pub mod memory;
pub mod postgrest;
pub mod sqlite;

use crate::config::{EtlConfig, StoreBackend};
use crate::error::{EtlError, StoreError};
use crate::schema::Dialect;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;
pub use sqlite::SqliteStore;

/// One row, keyed by column name.
pub type Record = Map<String, Value>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Execute a statement with no result rows (DDL).
    async fn execute_sql(&self, sql: &str) -> Result<(), StoreError>;

    /// Append records to `table`, returning the number inserted.
    async fn insert(&self, table: &str, records: &[Record]) -> Result<usize, StoreError>;

    /// Every row currently in `table`.
    async fn select_all(&self, table: &str) -> Result<Vec<Record>, StoreError>;
}

/// Accept only plain SQL identifiers: a letter or underscore followed by
/// letters, digits, or underscores.
pub fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

/// Column names across `records`, in order of first appearance.
pub fn record_columns(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Open the store selected by `config.store.backend`.
///
/// The PostgREST backend needs credentials from the environment; their
/// absence is a configuration error.
pub fn open_store(config: &EtlConfig) -> Result<Box<dyn RecordStore>, EtlError> {
    let store: Box<dyn RecordStore> = match config.store.backend {
        StoreBackend::Sqlite => Box::new(SqliteStore::open(
            config.store.sqlite_path(&config.paths),
        )?),
        StoreBackend::Postgrest => {
            let credentials = config.store.credentials()?;
            Box::new(PostgrestStore::new(credentials, &config.store)?)
        }
        StoreBackend::Memory => Box::new(MemoryStore::new()),
    };
    tracing::debug!(backend = store.name(), dialect = %store.dialect(), "Opened record store");
    Ok(store)
}
