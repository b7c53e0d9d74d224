//! Load stage: staged CSV into a record store in fixed-size batches.
//!
//! Batches are attempted independently. A batch that still fails after the
//! configured attempts is skipped and the loader moves on; the report says
//! which rows never made it. Loads append, so re-running duplicates rows.

use crate::config::LoadConfig;
use crate::error::{EtlError, StoreError, Result};
use crate::records::{STAGED_TIME_FORMAT, parse_timestamp};
use crate::retry::{RetryPolicy, with_retry};
use crate::schema::{ColumnType, TableSchema};
use crate::store::{Record, RecordStore};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Cell texts that mean "no value".
pub const NULL_SENTINELS: [&str; 7] = ["NaN", "nan", "NaT", "None", "null", "NA", "<NA>"];

/// Result of trying to create a table before loading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchemaOutcome {
    Applied { table: String },
    /// The store could not run the DDL; `sql` is what should be applied by hand.
    Unavailable {
        table: String,
        sql: String,
        reason: String,
    },
}

impl SchemaOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SchemaOutcome::Applied { .. })
    }
}

/// Run the table's DDL through the store. Never fails; the caller decides
/// what an unavailable schema capability means.
pub async fn ensure_schema(store: &dyn RecordStore, schema: &TableSchema) -> SchemaOutcome {
    let sql = schema.create_sql(store.dialect());
    match store.execute_sql(&sql).await {
        Ok(()) => {
            info!(table = schema.name, store = store.name(), "Schema ensured");
            SchemaOutcome::Applied {
                table: schema.name.to_string(),
            }
        }
        Err(e) => {
            warn!(
                table = schema.name,
                error = %e,
                "Could not create table automatically; apply this SQL manually:\n{sql}"
            );
            SchemaOutcome::Unavailable {
                table: schema.name.to_string(),
                sql,
                reason: e.to_string(),
            }
        }
    }
}

fn is_null(cell: &str) -> bool {
    cell.is_empty() || NULL_SENTINELS.contains(&cell)
}

fn number(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn infer(cell: &str) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        Value::from(i)
    } else if let Ok(f) = cell.parse::<f64>() {
        number(f)
    } else {
        Value::String(cell.to_string())
    }
}

/// Convert one staged cell to a store value according to its column type.
///
/// Cells that do not parse as their declared type are passed through as text
/// and left for the store to accept or reject.
pub fn coerce_cell(raw: &str, kind: Option<ColumnType>) -> Value {
    let cell = raw.trim();
    if is_null(cell) {
        return Value::Null;
    }
    match kind {
        Some(ColumnType::Text) => Value::String(cell.to_string()),
        Some(ColumnType::Integer) => match cell.parse::<i64>() {
            Ok(i) => Value::from(i),
            // pandas writes nullable integer columns as floats
            Err(_) => match cell.parse::<f64>() {
                Ok(f) if f.fract() == 0.0 && f.is_finite() => Value::from(f as i64),
                _ => Value::String(cell.to_string()),
            },
        },
        Some(ColumnType::Real) => match cell.parse::<f64>() {
            Ok(f) if f.is_finite() => number(f),
            Ok(_) => Value::Null,
            Err(_) => Value::String(cell.to_string()),
        },
        Some(ColumnType::Timestamp) => match parse_timestamp(cell) {
            Some(t) => Value::String(t.format(STAGED_TIME_FORMAT).to_string()),
            None => Value::String(cell.to_string()),
        },
        None => infer(cell),
    }
}

/// Read a staged CSV into store records: headers lower-cased, cells coerced
/// by `schema`.
pub fn read_records(staged_csv: &Path, schema: &TableSchema) -> Result<Vec<Record>> {
    if !staged_csv.is_file() {
        return Err(EtlError::missing_input("load", staged_csv));
    }
    let mut reader = csv::Reader::from_path(staged_csv)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_lowercase).collect();
    let kinds: Vec<Option<ColumnType>> = headers
        .iter()
        .map(|h| schema.column(h).map(|c| c.kind))
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut record = Record::new();
        for ((name, kind), cell) in headers.iter().zip(&kinds).zip(row.iter()) {
            record.insert(name.clone(), coerce_cell(cell, *kind));
        }
        records.push(record);
    }
    Ok(records)
}

/// A contiguous slice of the staged rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 1-based.
    pub number: usize,
    /// 0-based index of the first row in the staged file.
    pub first_row: usize,
    pub records: Vec<Record>,
}

/// Split records into order-preserving batches of at most `batch_size`.
pub fn partition(records: Vec<Record>, batch_size: usize) -> Vec<Batch> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(size));
    let mut iter = records.into_iter().peekable();
    let mut first_row = 0;
    while iter.peek().is_some() {
        let chunk: Vec<Record> = iter.by_ref().take(size).collect();
        let len = chunk.len();
        batches.push(Batch {
            number: batches.len() + 1,
            first_row,
            records: chunk,
        });
        first_row += len;
    }
    batches
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Inserted,
    Skipped { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub number: usize,
    pub first_row: usize,
    pub rows: usize,
    pub attempts: u32,
    pub status: BatchStatus,
}

impl BatchOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self.status, BatchStatus::Inserted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub source: PathBuf,
    pub outcomes: Vec<BatchOutcome>,
}

impl LoadReport {
    pub fn total_rows(&self) -> usize {
        self.outcomes.iter().map(|o| o.rows).sum()
    }

    pub fn inserted_rows(&self) -> usize {
        self.outcomes.iter().filter(|o| o.inserted()).map(|o| o.rows).sum()
    }

    pub fn skipped_rows(&self) -> usize {
        self.total_rows() - self.inserted_rows()
    }

    pub fn skipped_batches(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| !o.inserted())
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(BatchOutcome::inserted)
    }
}

impl std::fmt::Display for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} rows loaded into {} in {} batches",
            self.inserted_rows(),
            self.total_rows(),
            self.table,
            self.outcomes.len()
        )?;
        let skipped: Vec<String> = self
            .skipped_batches()
            .map(|o| format!("#{} (rows {}-{})", o.number, o.first_row, o.first_row + o.rows - 1))
            .collect();
        if !skipped.is_empty() {
            write!(f, "; skipped batches: {}", skipped.join(", "))?;
        }
        Ok(())
    }
}

/// Batched, retrying writer of one staged file into one table.
pub struct BatchLoader<'a> {
    store: &'a dyn RecordStore,
    schema: TableSchema,
    batch_size: usize,
    policy: RetryPolicy,
}

impl<'a> BatchLoader<'a> {
    pub fn new(store: &'a dyn RecordStore, schema: TableSchema, config: &LoadConfig) -> Self {
        Self {
            store,
            schema,
            batch_size: config.batch_size,
            policy: RetryPolicy::fixed(config.max_attempts, config.retry_delay()),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn load_batch(&self, batch: &Batch) -> BatchOutcome {
        let store = self.store;
        let table = self.schema.name;
        let records = batch.records.as_slice();
        let label = format!("load:{table}#{}", batch.number);

        let result = with_retry(&self.policy, &label, |_: &StoreError| true, move |_| {
            store.insert(table, records)
        })
        .await;

        let (attempts, status) = match result {
            Ok(done) => {
                info!(
                    table,
                    batch = batch.number,
                    rows = records.len(),
                    attempts = done.attempts,
                    "Batch inserted"
                );
                (done.attempts, BatchStatus::Inserted)
            }
            Err(exhausted) => {
                error!(
                    table,
                    batch = batch.number,
                    first_row = batch.first_row,
                    rows = records.len(),
                    error = %exhausted.error,
                    "Batch skipped"
                );
                (
                    exhausted.attempts,
                    BatchStatus::Skipped {
                        error: exhausted.error.to_string(),
                    },
                )
            }
        };

        BatchOutcome {
            number: batch.number,
            first_row: batch.first_row,
            rows: records.len(),
            attempts,
            status,
        }
    }

    /// Load every row of `staged_csv`. Only a missing or unreadable file is
    /// an error; failed batches are reported in the result.
    pub async fn load(&self, staged_csv: &Path) -> Result<LoadReport> {
        let records = read_records(staged_csv, &self.schema)?;
        let batches = partition(records, self.batch_size);
        info!(
            table = self.schema.name,
            batches = batches.len(),
            batch_size = self.batch_size,
            "Loading"
        );

        let mut outcomes = Vec::with_capacity(batches.len());
        for batch in &batches {
            outcomes.push(self.load_batch(batch).await);
        }

        let report = LoadReport {
            table: self.schema.name.to_string(),
            source: staged_csv.to_path_buf(),
            outcomes,
        };
        info!(table = self.schema.name, "{report}");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn numbered(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| json!({ "n": i }).as_object().unwrap().clone())
            .collect()
    }

    fn write_staged(dir: &Path, rows: usize) -> PathBuf {
        let path = dir.join("air_quality_transformed.csv");
        let mut text = String::from("city,time,pm2_5,aqi_category,hour\n");
        for i in 0..rows {
            text.push_str(&format!("Delhi,2025-01-01 {:02}:00:00,{}.5,Good,{}\n", i % 24, i, i % 24));
        }
        std::fs::write(&path, text).unwrap();
        path
    }

    fn config(batch_size: usize) -> LoadConfig {
        LoadConfig {
            batch_size,
            ..LoadConfig::default()
        }
    }

    #[test]
    fn test_partition_sizes_and_order() {
        let batches = partition(numbered(450), 200);
        let sizes: Vec<usize> = batches.iter().map(|b| b.records.len()).collect();
        assert_eq!(sizes, vec![200, 200, 50]);
        assert_eq!(batches[1].number, 2);
        assert_eq!(batches[1].first_row, 200);
        assert_eq!(batches[2].records[0]["n"], json!(400));
    }

    #[test]
    fn test_partition_edges() {
        assert!(partition(Vec::new(), 200).is_empty());
        assert_eq!(partition(numbered(200), 200).len(), 1);
        assert_eq!(partition(numbered(3), 1).len(), 3);
    }

    #[test]
    fn test_coerce_cell_by_type() {
        assert_eq!(coerce_cell("", Some(ColumnType::Real)), Value::Null);
        assert_eq!(coerce_cell("NaN", Some(ColumnType::Real)), Value::Null);
        assert_eq!(coerce_cell("<NA>", Some(ColumnType::Integer)), Value::Null);
        assert_eq!(coerce_cell("12.5", Some(ColumnType::Real)), json!(12.5));
        assert_eq!(coerce_cell("3.0", Some(ColumnType::Integer)), json!(3));
        assert_eq!(coerce_cell("7", Some(ColumnType::Text)), json!("7"));
        assert_eq!(
            coerce_cell("2025-01-01T05:00", Some(ColumnType::Timestamp)),
            json!("2025-01-01 05:00:00")
        );
        assert_eq!(coerce_cell("42", None), json!(42));
        assert_eq!(coerce_cell("High Risk", None), json!("High Risk"));
    }

    #[test]
    fn test_read_records_lowercases_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("churn.csv");
        std::fs::write(&path, "tenure,MonthlyCharges,Churn\n5.0,20.5,No\n,NaN,Yes\n").unwrap();
        let records = read_records(&path, &TableSchema::churn()).unwrap();
        assert_eq!(records[0]["tenure"], json!(5));
        assert_eq!(records[0]["monthlycharges"], json!(20.5));
        assert_eq!(records[0]["churn"], json!("No"));
        assert_eq!(records[1]["tenure"], Value::Null);
        assert_eq!(records[1]["monthlycharges"], Value::Null);
    }

    #[tokio::test]
    async fn test_missing_staged_file() {
        let store = MemoryStore::new();
        let loader = BatchLoader::new(&store, TableSchema::air_quality(), &config(200));
        let err = loader.load(Path::new("/nonexistent/staged.csv")).await.unwrap_err();
        assert!(matches!(err, EtlError::MissingInput { .. }));
        assert!(store.insert_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_after_fixed_delay() {
        let dir = tempfile::tempdir().unwrap();
        let staged = write_staged(dir.path(), 5);
        let store = MemoryStore::new();
        store.fail_next_insert("connection reset");

        let loader = BatchLoader::new(&store, TableSchema::air_quality(), &config(200));
        let start = tokio::time::Instant::now();
        let report = loader.load(&staged).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(report.is_complete());
        assert_eq!(report.outcomes[0].attempts, 2);
        assert_eq!(store.rows("air_quality_data").len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_batch_is_skipped_and_later_batches_continue() {
        let dir = tempfile::tempdir().unwrap();
        let staged = write_staged(dir.path(), 450);
        let store = MemoryStore::new();
        store.succeed_next_insert();
        store.fail_next_insert("timeout");
        store.fail_next_insert("timeout");

        let loader = BatchLoader::new(&store, TableSchema::air_quality(), &config(200));
        let start = tokio::time::Instant::now();
        let report = loader.load(&staged).await.unwrap();

        // One 2s pause between the two attempts of batch 2.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(store.insert_calls(), vec![200, 200, 200, 50]);
        assert!(!report.is_complete());
        assert_eq!(report.inserted_rows(), 250);
        assert_eq!(report.skipped_rows(), 200);
        let skipped: Vec<usize> = report.skipped_batches().map(|b| b.number).collect();
        assert_eq!(skipped, vec![2]);
        assert_eq!(
            report.to_string(),
            "250 of 450 rows loaded into air_quality_data in 3 batches; \
             skipped batches: #2 (rows 200-399)"
        );

        let rows = store.rows("air_quality_data");
        assert_eq!(rows.len(), 250);
        assert_eq!(rows[200]["pm2_5"], json!(400.5));
    }

    #[tokio::test]
    async fn test_ensure_schema_outcomes() {
        let store = MemoryStore::new();
        let outcome = ensure_schema(&store, &TableSchema::churn()).await;
        assert!(outcome.is_applied());
        assert!(store.executed_sql()[0].contains("CREATE TABLE IF NOT EXISTS churn_data"));

        let store = MemoryStore::without_sql();
        match ensure_schema(&store, &TableSchema::churn()).await {
            SchemaOutcome::Unavailable { sql, .. } => assert!(sql.contains("churn_data")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
