//! SQLite-backed record store.
//!
//! Each call opens its own connection on a blocking thread, so the store is
//! just a path and trivially `Send + Sync`.

use super::{Record, RecordStore, record_columns, validate_identifier};
use crate::error::StoreError;
use crate::schema::Dialect;
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
                message: format!("cannot create {}: {e}", parent.display()),
            })?;
        }
        let _ = rusqlite::Connection::open(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, task: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&path)?;
            task(conn)
        })
        .await
        .map_err(|e| StoreError::Connection {
            message: format!("SQLite task join error: {e}"),
        })?
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::String("<blob>".to_string()),
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute_sql(&self, sql: &str) -> Result<(), StoreError> {
        let sql = sql.to_string();
        self.blocking(move |conn| Ok(conn.execute_batch(&sql)?)).await
    }

    async fn insert(&self, table: &str, records: &[Record]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let table = validate_identifier(table)?.to_string();
        let columns = record_columns(records);
        for column in &columns {
            validate_identifier(column)?;
        }

        let rows: Vec<Vec<SqlValue>> = records
            .iter()
            .map(|r| {
                columns
                    .iter()
                    .map(|c| r.get(c).map(to_sql).unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect();

        self.blocking(move |mut conn| {
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            );
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for row in &rows {
                    stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
        .await
    }

    async fn select_all(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        let table = validate_identifier(table)?.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM {table} ORDER BY rowid"))?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut out = Vec::new();
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let mut record = Record::new();
                for (i, name) in columns.iter().enumerate() {
                    record.insert(name.clone(), from_sql(row.get_ref(i)?));
                }
                out.push(record);
            }
            Ok(out)
        })
        .await
    }
}
