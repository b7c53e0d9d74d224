//! Extraction stage: per-city fetch with exponential backoff, persisting
//! every successful payload verbatim under the raw directory.
//!
//! Failures are reported per city in the returned [`FetchResult`]s, never
//! propagated. The payload source is the [`AirQualityApi`] trait so the retry
//! and persistence contract can run against a scripted source in tests.

pub mod open_meteo;

use crate::config::{CityConfig, FetchConfig};
use crate::error::FetchError;
use crate::retry::{RetryPolicy, with_retry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

pub use open_meteo::OpenMeteoClient;

/// Source of raw hourly payloads for a city.
#[async_trait]
pub trait AirQualityApi: Send + Sync {
    async fn hourly(&self, city: &CityConfig) -> Result<Value, FetchError>;
}

/// Outcome of one city's attempt sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResult {
    pub entity: String,
    pub attempts: u32,
    pub outcome: FetchOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Saved { raw_path: PathBuf },
    Failed { error: String },
}

impl FetchResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Saved { .. })
    }

    pub fn raw_path(&self) -> Option<&Path> {
        match &self.outcome {
            FetchOutcome::Saved { raw_path } => Some(raw_path),
            FetchOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            FetchOutcome::Saved { .. } => None,
            FetchOutcome::Failed { error } => Some(error),
        }
    }
}

/// Aggregate view over a fetch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl FetchSummary {
    pub fn from_results(results: &[FetchResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            match &r.outcome {
                FetchOutcome::Saved { .. } => summary.succeeded.push(r.entity.clone()),
                FetchOutcome::Failed { error } => {
                    summary.failed.push((r.entity.clone(), error.clone()))
                }
            }
        }
        summary
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl std::fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} cities fetched",
            self.succeeded.len(),
            self.succeeded.len() + self.failed.len()
        )?;
        if !self.failed.is_empty() {
            let names: Vec<&str> = self.failed.iter().map(|(n, _)| n.as_str()).collect();
            write!(f, "; failed: {}", names.join(", "))?;
        }
        Ok(())
    }
}

/// File-name slug for an entity: lower case, spaces as underscores.
pub fn entity_slug(entity: &str) -> String {
    entity.trim().replace(' ', "_").to_lowercase()
}

/// Persist a payload as `<slug>_raw_<UTC timestamp>.json`.
///
/// If the JSON rendering or its write fails, the payload's text form goes to
/// the same stem with `.txt` instead. Only when both writes fail is an error
/// returned.
pub fn save_raw(
    raw_dir: &Path,
    entity: &str,
    payload: &Value,
    now: DateTime<Utc>,
) -> Result<PathBuf, FetchError> {
    let stem = format!("{}_raw_{}", entity_slug(entity), now.format("%Y%m%dT%H%M%SZ"));
    let json_path = raw_dir.join(format!("{stem}.json"));

    let primary = std::fs::create_dir_all(raw_dir)
        .map_err(|e| e.to_string())
        .and_then(|_| serde_json::to_vec_pretty(payload).map_err(|e| e.to_string()))
        .and_then(|bytes| std::fs::write(&json_path, bytes).map_err(|e| e.to_string()));

    match primary {
        Ok(()) => Ok(json_path),
        Err(reason) => {
            let txt_path = raw_dir.join(format!("{stem}.txt"));
            tracing::warn!(
                path = %json_path.display(),
                reason = reason.as_str(),
                "JSON write failed, falling back to text"
            );
            std::fs::write(&txt_path, payload.to_string())
                .map(|_| txt_path.clone())
                .map_err(|e| FetchError::Persist {
                    path: txt_path,
                    message: e.to_string(),
                })
        }
    }
}

/// Sequential per-city extractor.
pub struct Fetcher<'a> {
    api: &'a dyn AirQualityApi,
    raw_dir: PathBuf,
    policy: RetryPolicy,
    inter_call_delay: Duration,
}

impl<'a> Fetcher<'a> {
    pub fn new(api: &'a dyn AirQualityApi, raw_dir: impl Into<PathBuf>, config: &FetchConfig) -> Self {
        Self {
            api,
            raw_dir: raw_dir.into(),
            policy: RetryPolicy::exponential(config.max_retries),
            inter_call_delay: config.inter_call_delay(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch one city, retrying transient failures, and persist the payload.
    pub async fn fetch(&self, city: &CityConfig) -> FetchResult {
        let label = format!("fetch:{}", city.name);
        let api = self.api;
        let fetched = with_retry(&self.policy, &label, FetchError::is_transient, move |attempt| {
            tracing::debug!(city = city.name.as_str(), attempt, "Fetching");
            api.hourly(city)
        })
        .await;

        let (payload, attempts) = match fetched {
            Ok(done) => (done.value, done.attempts),
            Err(exhausted) => {
                error!(
                    city = city.name.as_str(),
                    attempts = exhausted.attempts,
                    error = %exhausted.error,
                    "Fetch failed"
                );
                return FetchResult {
                    entity: city.name.clone(),
                    attempts: exhausted.attempts,
                    outcome: FetchOutcome::Failed {
                        error: exhausted.error.to_string(),
                    },
                };
            }
        };

        let outcome = match save_raw(&self.raw_dir, &city.name, &payload, Utc::now()) {
            Ok(raw_path) => {
                info!(
                    city = city.name.as_str(),
                    path = %raw_path.display(),
                    attempts,
                    "Fetched and saved"
                );
                FetchOutcome::Saved { raw_path }
            }
            Err(e) => {
                error!(city = city.name.as_str(), error = %e, "Payload could not be persisted");
                FetchOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        FetchResult {
            entity: city.name.clone(),
            attempts,
            outcome,
        }
    }

    /// Fetch every city in order, pausing between consecutive cities.
    pub async fn fetch_all(&self, cities: &[CityConfig]) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(cities.len());
        for (i, city) in cities.iter().enumerate() {
            if i > 0 && !self.inter_call_delay.is_zero() {
                tokio::time::sleep(self.inter_call_delay).await;
            }
            results.push(self.fetch(city).await);
        }
        results
    }
}
