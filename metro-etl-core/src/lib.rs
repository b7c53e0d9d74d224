//! # metro-etl core
//!
//! Stages of the metro-etl pipelines: extraction from the Open-Meteo
//! air-quality API, transformation into typed staged CSVs, batched loading
//! into a record store, analysis, and post-load validation.

pub mod analysis;
pub mod config;
pub mod error;
pub mod fetch;
pub mod load;
pub mod persistence;
pub mod pipeline;
pub mod records;
pub mod retry;
pub mod schema;
pub mod store;
pub mod transform;
pub mod validate;

// Re-export commonly used types at the crate root.
pub use analysis::{AnalysisReport, Kpis, analyze_air_quality};
pub use config::{CityConfig, EtlConfig, StoreBackend, load_config};
pub use error::{ConfigError, EtlError, FetchError, Result, StoreError};
pub use fetch::{AirQualityApi, FetchResult, FetchSummary, Fetcher, OpenMeteoClient};
pub use load::{BatchLoader, LoadReport, SchemaOutcome, ensure_schema};
pub use pipeline::{PipelineSummary, run_air_quality, run_churn};
pub use records::{AirQualityRow, AqiCategory, ChurnRow, RiskFlag, SeverityWeights};
pub use retry::{RetryPolicy, with_retry};
pub use schema::{Dialect, TableSchema};
pub use store::{MemoryStore, PostgrestStore, Record, RecordStore, SqliteStore, open_store};
pub use transform::{TransformReport, transform_air_quality, transform_churn};
pub use validate::{ValidationPlan, ValidationReport, validate};
