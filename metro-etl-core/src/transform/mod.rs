//! Transform stage: raw inputs to one staged CSV per pipeline.
//!
//! Each run rewrites its staged file from scratch.

pub mod air_quality;
pub mod churn;

use serde::Serialize;
use std::path::PathBuf;

pub use air_quality::transform_air_quality;
pub use churn::transform_churn;

/// What a transform run read, dropped, and wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformReport {
    pub output: PathBuf,
    pub input_files: usize,
    pub skipped_files: Vec<PathBuf>,
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub rows_written: usize,
}

impl std::fmt::Display for TransformReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rows written to {} ({} read, {} dropped",
            self.rows_written,
            self.output.display(),
            self.rows_read,
            self.rows_dropped
        )?;
        if !self.skipped_files.is_empty() {
            write!(f, ", {} unreadable files skipped", self.skipped_files.len())?;
        }
        write!(f, ")")
    }
}
