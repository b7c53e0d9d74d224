//! Whole-file writes for staged and processed tables.
//!
//! Staged and processed outputs replace the previous run's file. They are
//! written to a `.tmp` sibling and renamed into place so a reader never sees
//! a half-written table.

use serde::Serialize;
use std::io;
use std::path::Path;

/// Atomically write raw bytes to a file.
///
/// Writes to a `.tmp` sibling file, then renames to the target path.
/// Creates parent directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Serialize `rows` as CSV with a header row and atomically replace `path`.
///
/// Returns the number of data rows written. An empty iterator still produces
/// a file, but without a header (serde-derived headers need a first row).
pub fn atomic_write_csv<T, I>(path: &Path, rows: I) -> Result<usize, csv::Error>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    atomic_write(path, &bytes)?;
    Ok(count)
}

/// Write a CSV with an explicit header and pre-rendered string records.
pub fn atomic_write_table(
    path: &Path,
    header: &[&str],
    records: &[Vec<String>],
) -> Result<usize, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header)?;
    for record in records {
        writer.write_record(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    atomic_write(path, &bytes)?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Serialize)]
    struct Row {
        city: &'static str,
        pm2_5: Option<f64>,
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dir").join("out.txt");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        atomic_write(&path, b"first run with more bytes").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_atomic_write_csv_renders_absent_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.csv");
        let written = atomic_write_csv(
            &path,
            vec![
                Row {
                    city: "Delhi",
                    pm2_5: Some(81.5),
                },
                Row {
                    city: "Mumbai",
                    pm2_5: None,
                },
            ],
        )
        .unwrap();
        assert_eq!(written, 2);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "city,pm2_5\nDelhi,81.5\nMumbai,\n");
    }

    #[test]
    fn test_atomic_write_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.csv");
        atomic_write_table(
            &path,
            &["metric", "value"],
            &[vec!["Hour With Worst AQI".into(), "8".into()]],
        )
        .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "metric,value\nHour With Worst AQI,8\n");
    }
}
