//! Flatten raw Open-Meteo payloads into staged air-quality rows.

use super::TransformReport;
use crate::error::{EtlError, Result};
use crate::persistence::atomic_write_csv;
use crate::records::{
    AirQualityRow, MEASUREMENT_FIELDS, Measurements, SeverityWeights, parse_timestamp,
};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STAGE: &str = "transform";

/// Recover the city from a raw file name such as `new_delhi_raw_20250101T000000Z.json`.
pub fn city_from_filename(file_name: &str) -> Option<String> {
    let (slug, _) = file_name.split_once("_raw_")?;
    if slug.is_empty() {
        return None;
    }
    Some(title_case(&slug.replace('_', " ")))
}

/// Upper-case the first letter after any non-letter, lower-case the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        at_word_start = !c.is_alphabetic();
    }
    out
}

/// Numeric reading from a JSON cell; anything non-numeric is absent.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Rows flattened from one payload.
#[derive(Debug, Default)]
pub struct Flattened {
    pub rows: Vec<(NaiveDateTime, Measurements)>,
    pub bad_timestamps: usize,
}

/// Pair `hourly.time[i]` with every series' `i`-th value.
///
/// Series shorter than the time axis, or missing altogether, leave the
/// corresponding readings absent.
pub fn flatten_payload(payload: &Value) -> Flattened {
    let hourly = &payload["hourly"];
    let Some(times) = hourly["time"].as_array() else {
        return Flattened::default();
    };

    let mut out = Flattened::default();
    for (i, raw_time) in times.iter().enumerate() {
        let Some(time) = raw_time.as_str().and_then(parse_timestamp) else {
            out.bad_timestamps += 1;
            continue;
        };
        let mut m = Measurements::default();
        for field in MEASUREMENT_FIELDS {
            let value = hourly[field].get(i).and_then(coerce_number);
            m.set(field, value);
        }
        out.rows.push((time, m));
    }
    out
}

fn raw_json_files(raw_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(raw_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Read every raw payload, derive classification fields, and replace the
/// staged CSV at `staged_path`.
pub fn transform_air_quality(
    raw_dir: &Path,
    staged_path: &Path,
    weights: &SeverityWeights,
) -> Result<TransformReport> {
    if !raw_dir.is_dir() {
        return Err(EtlError::missing_input(STAGE, raw_dir));
    }

    let files = raw_json_files(raw_dir)?;
    let mut report = TransformReport {
        output: staged_path.to_path_buf(),
        input_files: files.len(),
        ..Default::default()
    };
    let mut staged = Vec::new();

    for path in &files {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some(city) = city_from_filename(file_name) else {
            warn!(path = %path.display(), "Raw file name does not identify a city, skipping");
            report.skipped_files.push(path.clone());
            continue;
        };

        let payload: Value = match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
        {
            Ok(v) => v,
            Err(reason) => {
                warn!(path = %path.display(), reason = reason.as_str(), "Unreadable raw file, skipping");
                report.skipped_files.push(path.clone());
                continue;
            }
        };

        let flat = flatten_payload(&payload);
        if flat.bad_timestamps > 0 {
            warn!(
                path = %path.display(),
                count = flat.bad_timestamps,
                "Dropped rows with unparsable timestamps"
            );
        }
        debug!(path = %path.display(), city = city.as_str(), rows = flat.rows.len(), "Flattened");

        report.rows_read += flat.rows.len() + flat.bad_timestamps;
        report.rows_dropped += flat.bad_timestamps;
        for (time, m) in flat.rows {
            if m.all_absent() {
                report.rows_dropped += 1;
                continue;
            }
            staged.push(AirQualityRow::derive(city.clone(), time, m, weights));
        }
    }

    if staged.is_empty() {
        return Err(EtlError::no_input(STAGE, raw_dir));
    }

    report.rows_written = atomic_write_csv(staged_path, &staged)?;
    info!(
        rows = report.rows_written,
        dropped = report.rows_dropped,
        path = %staged_path.display(),
        "Air quality transform complete"
    );
    Ok(report)
}

/// Read a staged air-quality CSV back into typed rows.
pub fn read_staged(path: &Path) -> Result<Vec<AirQualityRow>> {
    if !path.exists() {
        return Err(EtlError::missing_input("read staged", path));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<AirQualityRow>, csv::Error>>()?;
    Ok(rows)
}
