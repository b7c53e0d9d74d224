//! Fetch-stage retry and persistence behaviour against a scripted API.
//!
//! Runs on paused tokio time, so backoff waits are asserted exactly without
//! real sleeping.

mod common;

use common::{ScriptedApi, config_in};
use metro_etl_core::error::FetchError;
use metro_etl_core::fetch::{FetchSummary, Fetcher};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_two_failures_then_success_waits_one_then_two_seconds() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), &["Delhi"]);
    let api = ScriptedApi::new();
    api.fail_times("Delhi", 2, FetchError::Status { status: 503 });

    let fetcher = Fetcher::new(&api, config.paths.raw_dir(), &config.fetch);
    let start = Instant::now();
    let result = fetcher.fetch(&config.fetch.cities[0]).await;

    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert!(result.success());
    assert_eq!(result.attempts, 3);
    assert_eq!(api.calls("Delhi"), 3);

    let path = result.raw_path().unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("delhi_raw_"));
    assert!(name.ends_with("Z.json"));
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_is_a_per_city_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path(), &["Delhi", "Mumbai"]);
    config.fetch.inter_call_delay_ms = 500;
    let api = ScriptedApi::new();
    api.fail_times(
        "Delhi",
        3,
        FetchError::Transport {
            message: "connection refused".into(),
        },
    );

    let fetcher = Fetcher::new(&api, config.paths.raw_dir(), &config.fetch);
    let start = Instant::now();
    let results = fetcher.fetch_all(&config.fetch.cities).await;

    // 1s + 2s of backoff for Delhi, then the 500ms pause before Mumbai.
    assert_eq!(start.elapsed(), Duration::from_millis(3500));
    assert!(!results[0].success());
    assert_eq!(results[0].attempts, 3);
    assert!(results[0].error().unwrap().contains("connection refused"));
    assert!(results[1].success());

    let summary = FetchSummary::from_results(&results);
    assert_eq!(summary.to_string(), "1 of 2 cities fetched; failed: Delhi");

    // Only the successful city left a raw file.
    let files: Vec<_> = std::fs::read_dir(config.paths.raw_dir()).unwrap().collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_transient_error_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), &["Atlantis"]);
    let api = ScriptedApi::new();
    api.queue(
        "Atlantis",
        Err(FetchError::UnknownEntity {
            name: "Atlantis".into(),
        }),
    );

    let fetcher = Fetcher::new(&api, config.paths.raw_dir(), &config.fetch);
    let start = Instant::now();
    let result = fetcher.fetch(&config.fetch.cities[0]).await;

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(result.attempts, 1);
    assert!(!result.success());
}
