//! End-to-end runners for the two pipelines.
//!
//! Stages run strictly in sequence. Per-entity and per-batch failures are
//! collected into the [`PipelineSummary`]; a missing file between stages stops
//! the run.

use crate::analysis::{AnalysisReport, analyze_air_quality};
use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::fetch::{AirQualityApi, FetchSummary, Fetcher};
use crate::load::{BatchLoader, LoadReport, SchemaOutcome, ensure_schema};
use crate::schema::TableSchema;
use crate::store::RecordStore;
use crate::transform::{TransformReport, transform_air_quality, transform_churn};
use crate::validate::{ValidationPlan, ValidationReport, validate};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub pipeline: String,
    pub fetch: Option<FetchSummary>,
    pub transform: Option<TransformReport>,
    pub schema: Option<SchemaOutcome>,
    pub load: Option<LoadReport>,
    pub analysis: Option<AnalysisReport>,
    pub validation: Option<ValidationReport>,
    /// Non-fatal stage problems that are not covered by the reports above.
    pub notes: Vec<String>,
}

impl PipelineSummary {
    fn new(pipeline: &str) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            fetch: None,
            transform: None,
            schema: None,
            load: None,
            analysis: None,
            validation: None,
            notes: Vec::new(),
        }
    }

    /// Everything that went wrong, one line each.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(fetch) = self.fetch.as_ref().filter(|f| !f.is_complete()) {
            let names: Vec<&str> = fetch.failed.iter().map(|(n, _)| n.as_str()).collect();
            problems.push(format!("failed cities: {}", names.join(", ")));
        }
        if let Some(SchemaOutcome::Unavailable { table, .. }) = &self.schema {
            problems.push(format!("schema for {table} not applied; create it manually"));
        }
        if let Some(load) = self.load.as_ref().filter(|l| !l.is_complete()) {
            let batches: Vec<String> = load
                .skipped_batches()
                .map(|b| format!("#{} (first row {}, {} rows)", b.number, b.first_row, b.rows))
                .collect();
            problems.push(format!("skipped batches: {}", batches.join(", ")));
        }
        if let Some(v) = self.validation.as_ref().filter(|v| !v.passed()) {
            problems.push(format!(
                "validation did not pass (original {}, stored {})",
                v.original_count, v.db_count
            ));
        }
        problems.extend(self.notes.iter().cloned());
        problems
    }

    pub fn is_success(&self) -> bool {
        self.problems().is_empty()
    }
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let problems = self.problems();
        if problems.is_empty() {
            return write!(f, "{} pipeline completed successfully", self.pipeline);
        }
        write!(f, "{} pipeline completed with failures", self.pipeline)?;
        for p in &problems {
            write!(f, "\n  - {p}")?;
        }
        Ok(())
    }
}

fn require_file(stage: &str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(EtlError::missing_input(stage, path))
    }
}

/// Fetch, transform, load, analyze, validate.
pub async fn run_air_quality(
    config: &EtlConfig,
    api: &dyn AirQualityApi,
    store: &dyn RecordStore,
) -> Result<PipelineSummary> {
    let paths = &config.paths;
    paths.ensure_dirs()?;
    let mut summary = PipelineSummary::new("air_quality");

    info!(cities = config.fetch.cities.len(), "Stage: fetch");
    let fetcher = Fetcher::new(api, paths.raw_dir(), &config.fetch);
    let results = fetcher.fetch_all(&config.fetch.cities).await;
    let fetch = FetchSummary::from_results(&results);
    info!("{fetch}");
    summary.fetch = Some(fetch);

    info!("Stage: transform");
    let staged = paths.air_quality_staged();
    summary.transform = Some(transform_air_quality(
        &paths.raw_dir(),
        &staged,
        &config.transform.severity,
    )?);

    info!("Stage: load");
    require_file("load", &staged)?;
    let schema = TableSchema::air_quality();
    summary.schema = Some(ensure_schema(store, &schema).await);
    let loader = BatchLoader::new(store, schema, &config.load);
    summary.load = Some(loader.load(&staged).await?);

    info!("Stage: analyze");
    match analyze_air_quality(store, loader.schema().name, &paths.processed_dir()).await {
        Ok(report) => summary.analysis = Some(report),
        Err(EtlError::Analysis { message }) => {
            warn!(message = message.as_str(), "Analysis skipped");
            summary.notes.push(format!("analysis skipped: {message}"));
        }
        Err(e) => return Err(e),
    }

    info!("Stage: validate");
    summary.validation = Some(validate(&staged, store, &ValidationPlan::air_quality()).await?);

    info!("{summary}");
    Ok(summary)
}

/// Transform, load, validate the churn export.
pub async fn run_churn(config: &EtlConfig, store: &dyn RecordStore) -> Result<PipelineSummary> {
    let paths = &config.paths;
    paths.ensure_dirs()?;
    let mut summary = PipelineSummary::new("churn");

    let raw = config.churn.raw_csv(paths);
    require_file("transform", &raw)?;

    info!("Stage: transform");
    let staged = paths.churn_staged();
    summary.transform = Some(transform_churn(&raw, &staged)?);

    info!("Stage: load");
    require_file("load", &staged)?;
    let schema = TableSchema::churn();
    summary.schema = Some(ensure_schema(store, &schema).await);
    let loader = BatchLoader::new(store, schema, &config.load);
    summary.load = Some(loader.load(&staged).await?);

    info!("Stage: validate");
    summary.validation = Some(validate(&raw, store, &ValidationPlan::churn()).await?);

    info!("{summary}");
    Ok(summary)
}
