//! Clean the raw churn export and derive its segmentation fields.

use super::TransformReport;
use crate::error::{EtlError, Result};
use crate::persistence::atomic_write_csv;
use crate::records::{
    ChargeSegment, ChurnRaw, ChurnRow, TenureGroup, contract_type_code, has_internet_service,
    is_multi_line_user,
};
use std::path::Path;
use tracing::{debug, info};

const STAGE: &str = "transform";

/// Placeholder for categorical values missing from the export.
pub const UNKNOWN: &str = "Unknown";

/// Parse a numeric cell; blanks and non-numbers are absent.
pub fn parse_numeric(cell: Option<&str>) -> Option<f64> {
    cell.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

/// Median of the present values, or `None` if there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// A numeric column with absent cells filled by the median of present ones.
fn fill_with_median(column: Vec<Option<f64>>) -> (Vec<Option<f64>>, usize) {
    let present: Vec<f64> = column.iter().flatten().copied().collect();
    let missing = column.len() - present.len();
    let Some(fill) = median(&present) else {
        return (column, missing);
    };
    (column.into_iter().map(|v| v.or(Some(fill))).collect(), missing)
}

fn categorical(cell: &Option<String>) -> String {
    match cell.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

fn numeric_column<F>(raw: &[ChurnRaw], cell: F) -> Vec<Option<f64>>
where
    F: Fn(&ChurnRaw) -> Option<&str>,
{
    raw.iter().map(|r| parse_numeric(cell(r))).collect()
}

/// Build staged rows from raw ones. Medians are computed over the whole input.
pub fn clean_churn(raw: &[ChurnRaw]) -> Vec<ChurnRow> {
    let (tenure, tenure_missing) =
        fill_with_median(numeric_column(raw, |r| r.tenure.as_deref()));
    let (monthly, monthly_missing) =
        fill_with_median(numeric_column(raw, |r| r.monthly_charges.as_deref()));
    let (total, total_missing) =
        fill_with_median(numeric_column(raw, |r| r.total_charges.as_deref()));
    debug!(
        tenure = tenure_missing,
        monthly_charges = monthly_missing,
        total_charges = total_missing,
        "Median-filled missing numeric values"
    );

    raw.iter()
        .enumerate()
        .map(|(i, r)| {
            let tenure = tenure[i].map(|t| t.round() as i64);
            let internet_service = categorical(&r.internet_service);
            let contract = categorical(&r.contract);
            let multiple_lines = categorical(&r.multiple_lines);
            ChurnRow {
                tenure,
                tenure_group: tenure.and_then(|t| TenureGroup::from_tenure(t as f64)),
                monthly_charge_segment: monthly[i].and_then(ChargeSegment::from_monthly_charges),
                has_internet_service: has_internet_service(&internet_service),
                is_multi_line_user: is_multi_line_user(&multiple_lines),
                contract_type_code: contract_type_code(&contract),
                internet_service,
                contract,
                payment_method: categorical(&r.payment_method),
                monthly_charges: monthly[i],
                total_charges: total[i],
                churn: categorical(&r.churn),
            }
        })
        .collect()
}

/// Read the raw churn CSV, clean it, and replace the staged CSV.
pub fn transform_churn(raw_csv: &Path, staged_path: &Path) -> Result<TransformReport> {
    if !raw_csv.is_file() {
        return Err(EtlError::missing_input(STAGE, raw_csv));
    }

    let mut reader = csv::Reader::from_path(raw_csv)?;
    let raw = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ChurnRaw>, csv::Error>>()?;
    if raw.is_empty() {
        return Err(EtlError::no_input(STAGE, raw_csv));
    }

    let rows = clean_churn(&raw);
    let written = atomic_write_csv(staged_path, &rows)?;
    info!(rows = written, path = %staged_path.display(), "Churn transform complete");

    Ok(TransformReport {
        output: staged_path.to_path_buf(),
        input_files: 1,
        skipped_files: Vec::new(),
        rows_read: raw.len(),
        rows_dropped: raw.len() - written,
        rows_written: written,
    })
}
