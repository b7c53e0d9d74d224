//! Post-load data quality checks. Read-only against both the original file
//! and the store.

use crate::error::{EtlError, Result};
use crate::records::{AqiCategory, CONTRACT_CODES, ChargeSegment, RiskFlag, TenureGroup};
use crate::store::{Record, RecordStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use tracing::info;

/// The transformer writes New/Regular/Loyal/Champion; older tooling checked
/// tenure_group against month ranges that no current load produces.
pub const LEGACY_TENURE_NOTE: &str = "tenure_group checked against New, Regular, Loyal, Champion; \
     the legacy labels 0-12, 13-24, 25-48, 49-60, 60+ are not accepted";

/// A derived column and the values it may hold.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainCheck {
    pub column: &'static str,
    pub allowed: Vec<Value>,
}

impl DomainCheck {
    fn labels(column: &'static str, labels: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            column,
            allowed: labels.into_iter().map(Value::from).collect(),
        }
    }

    fn permits(&self, value: &Value) -> bool {
        self.allowed.iter().any(|a| same_value(a, value))
    }
}

/// Which checks to run for one pipeline's table.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationPlan {
    pub name: &'static str,
    pub table: &'static str,
    pub missing_columns: Vec<&'static str>,
    pub domains: Vec<DomainCheck>,
    /// Caveats printed with every report from this plan.
    pub notes: Vec<&'static str>,
}

impl ValidationPlan {
    pub fn churn() -> Self {
        Self {
            name: "churn",
            table: "churn_data",
            missing_columns: vec!["tenure", "monthlycharges", "totalcharges"],
            domains: vec![
                DomainCheck::labels("tenure_group", TenureGroup::ALL.iter().map(TenureGroup::label)),
                DomainCheck::labels(
                    "monthly_charge_segment",
                    ChargeSegment::ALL.iter().map(ChargeSegment::label),
                ),
                DomainCheck {
                    column: "contract_type_code",
                    allowed: CONTRACT_CODES.iter().map(|&c| Value::from(c)).collect(),
                },
            ],
            notes: vec![LEGACY_TENURE_NOTE],
        }
    }

    pub fn air_quality() -> Self {
        Self {
            name: "air_quality",
            table: "air_quality_data",
            missing_columns: vec!["pm2_5", "pm10", "ozone"],
            domains: vec![
                DomainCheck::labels("aqi_category", AqiCategory::ALL.iter().map(AqiCategory::label)),
                DomainCheck::labels("risk_flag", RiskFlag::ALL.iter().map(RiskFlag::label)),
            ],
            notes: Vec::new(),
        }
    }
}

/// Numbers compare by value regardless of integer/float representation.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCount {
    Count(usize),
    ColumnNotFound,
}

impl fmt::Display for MissingCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingCount::Count(n) => write!(f, "{n}"),
            MissingCount::ColumnNotFound => write!(f, "column not found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainReport {
    pub column: String,
    pub column_found: bool,
    pub nulls: usize,
    pub invalid_rows: usize,
    /// Distinct out-of-domain values, sorted.
    pub invalid_values: Vec<String>,
}

impl DomainReport {
    pub fn is_valid(&self) -> bool {
        self.column_found && self.invalid_rows == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub plan: String,
    pub table: String,
    pub original_count: usize,
    pub db_count: usize,
    pub counts_match: bool,
    pub missing: Vec<(String, MissingCount)>,
    pub domains: Vec<DomainReport>,
    pub unique_rows: usize,
    pub notes: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.counts_match && self.domains.iter().all(DomainReport::is_valid)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Validation: {} ({})", self.plan, self.table)?;
        writeln!(
            f,
            "  row count: original {} / store {} ({})",
            self.original_count,
            self.db_count,
            if self.counts_match { "match" } else { "MISMATCH" }
        )?;
        writeln!(f, "  missing values:")?;
        for (column, count) in &self.missing {
            writeln!(f, "    {column}: {count}")?;
        }
        writeln!(f, "  domains:")?;
        for d in &self.domains {
            if !d.column_found {
                writeln!(f, "    {}: column not found", d.column)?;
            } else if d.invalid_rows == 0 {
                writeln!(f, "    {}: ok ({} null)", d.column, d.nulls)?;
            } else {
                writeln!(
                    f,
                    "    {}: {} invalid rows [{}] ({} null)",
                    d.column,
                    d.invalid_rows,
                    d.invalid_values.join(", "),
                    d.nulls
                )?;
            }
        }
        write!(f, "  unique rows: {}", self.unique_rows)?;
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

fn column_present(rows: &[Record], column: &str) -> bool {
    rows.iter().any(|r| r.contains_key(column))
}

fn is_missing(record: &Record, column: &str) -> bool {
    record.get(column).is_none_or(Value::is_null)
}

pub fn missing_count(rows: &[Record], column: &str) -> MissingCount {
    if !column_present(rows, column) {
        return MissingCount::ColumnNotFound;
    }
    MissingCount::Count(rows.iter().filter(|r| is_missing(r, column)).count())
}

pub fn check_domain(rows: &[Record], check: &DomainCheck) -> DomainReport {
    let mut report = DomainReport {
        column: check.column.to_string(),
        column_found: column_present(rows, check.column),
        nulls: 0,
        invalid_rows: 0,
        invalid_values: Vec::new(),
    };
    let mut invalid = BTreeSet::new();
    for row in rows {
        match row.get(check.column) {
            None | Some(Value::Null) => report.nulls += 1,
            Some(v) if check.permits(v) => {}
            Some(v) => {
                report.invalid_rows += 1;
                invalid.insert(display_value(v));
            }
        }
    }
    report.invalid_values = invalid.into_iter().collect();
    report
}

/// Distinct rows, ignoring the surrogate `id`.
pub fn unique_rows(rows: &[Record]) -> usize {
    rows.iter()
        .map(|r| {
            let mut fields: Vec<(&str, String)> = r
                .iter()
                .filter(|(k, _)| k.as_str() != "id")
                .map(|(k, v)| (k.as_str(), v.to_string()))
                .collect();
            fields.sort();
            fields
        })
        .collect::<HashSet<_>>()
        .len()
}

fn count_csv_rows(path: &Path) -> Result<usize> {
    if !path.is_file() {
        return Err(EtlError::missing_input("validate", path));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut count = 0;
    for row in reader.records() {
        row?;
        count += 1;
    }
    Ok(count)
}

/// Compare the original file with what the store holds and run the plan's
/// column checks.
pub async fn validate(
    original_csv: &Path,
    store: &dyn RecordStore,
    plan: &ValidationPlan,
) -> Result<ValidationReport> {
    let original_count = count_csv_rows(original_csv)?;
    let rows = store.select_all(plan.table).await?;

    let report = ValidationReport {
        plan: plan.name.to_string(),
        table: plan.table.to_string(),
        original_count,
        db_count: rows.len(),
        counts_match: original_count == rows.len(),
        missing: plan
            .missing_columns
            .iter()
            .map(|c| (c.to_string(), missing_count(&rows, c)))
            .collect(),
        domains: plan.domains.iter().map(|d| check_domain(&rows, d)).collect(),
        unique_rows: unique_rows(&rows),
        notes: plan.notes.iter().map(|n| n.to_string()).collect(),
    };
    info!(
        plan = plan.name,
        original = report.original_count,
        stored = report.db_count,
        passed = report.passed(),
        "Validation complete"
    );
    Ok(report)
}
