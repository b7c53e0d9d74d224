//! In-process record store for dry runs and tests.
//!
//! Insert outcomes can be scripted per call, and every call's batch size is
//! recorded, so retry-and-skip behaviour can be asserted without a database.

use super::{Record, RecordStore, validate_identifier};
use crate::error::StoreError;
use crate::schema::Dialect;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    insert_script: Mutex<VecDeque<Option<String>>>,
    insert_calls: Mutex<Vec<usize>>,
    executed: Mutex<Vec<String>>,
    sql_enabled: bool,
    next_id: Mutex<i64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            insert_script: Mutex::new(VecDeque::new()),
            insert_calls: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            sql_enabled: true,
            next_id: Mutex::new(1),
        }
    }

    /// A store whose `execute_sql` always reports the capability as missing.
    pub fn without_sql() -> Self {
        Self {
            sql_enabled: false,
            ..Self::new()
        }
    }

    /// Make the next insert call fail with `message`.
    pub fn fail_next_insert(&self, message: &str) {
        lock(&self.insert_script).push_back(Some(message.to_string()));
    }

    /// Make the next insert call succeed. Useful to interleave with failures.
    pub fn succeed_next_insert(&self) {
        lock(&self.insert_script).push_back(None);
    }

    /// Batch size of every insert call so far, including failed ones.
    pub fn insert_calls(&self) -> Vec<usize> {
        lock(&self.insert_calls).clone()
    }

    /// Statements passed to `execute_sql`.
    pub fn executed_sql(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    /// Put rows in place directly, bypassing the insert script.
    pub fn seed(&self, table: &str, records: Vec<Record>) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .extend(records);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute_sql(&self, sql: &str) -> Result<(), StoreError> {
        if !self.sql_enabled {
            return Err(StoreError::Unsupported {
                message: "memory store has no SQL engine".into(),
            });
        }
        lock(&self.executed).push(sql.to_string());
        Ok(())
    }

    async fn insert(&self, table: &str, records: &[Record]) -> Result<usize, StoreError> {
        let table = validate_identifier(table)?;
        lock(&self.insert_calls).push(records.len());
        if let Some(Some(message)) = lock(&self.insert_script).pop_front() {
            return Err(StoreError::Insert { message });
        }

        let mut next_id = lock(&self.next_id);
        let mut tables = lock(&self.tables);
        let rows = tables.entry(table.to_string()).or_default();
        for record in records {
            let mut row = record.clone();
            row.insert("id".to_string(), Value::from(*next_id));
            *next_id += 1;
            rows.push(row);
        }
        Ok(records.len())
    }

    async fn select_all(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        let table = validate_identifier(table)?;
        Ok(self.rows(table))
    }
}
