//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use metro_etl_core::config::{CityConfig, EtlConfig};
use metro_etl_core::error::FetchError;
use metro_etl_core::fetch::AirQualityApi;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// Payload source that replays queued results per city and records calls.
///
/// A city with an empty queue gets `default_payload`.
#[derive(Default)]
pub struct ScriptedApi {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, FetchError>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, city: &str, result: Result<Value, FetchError>) {
        self.queued
            .lock()
            .unwrap()
            .entry(city.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn fail_times(&self, city: &str, times: usize, error: FetchError) {
        for _ in 0..times {
            self.queue(city, Err(error.clone()));
        }
    }

    pub fn calls(&self, city: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == city).count()
    }
}

#[async_trait]
impl AirQualityApi for ScriptedApi {
    async fn hourly(&self, city: &CityConfig) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push(city.name.clone());
        let next = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&city.name)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(default_payload()))
    }
}

/// Three hours of readings; the last hour has every series null.
pub fn default_payload() -> Value {
    json!({
        "latitude": 28.7,
        "longitude": 77.1,
        "hourly": {
            "time": ["2025-01-01T00:00", "2025-01-01T01:00", "2025-01-01T02:00"],
            "pm10": [80.0, 120.0, null],
            "pm2_5": [45.0, 150.0, null],
            "carbon_monoxide": [300.0, 900.0, null],
            "nitrogen_dioxide": [20.0, 40.0, null],
            "sulphur_dioxide": [5.0, 10.0, null],
            "ozone": [30.0, 15.0, null],
            "uv_index": [0.0, 0.0, null]
        }
    })
}

/// Defaults re-rooted at `data_dir` with the given cities and no inter-city pause.
pub fn config_in(data_dir: &Path, cities: &[&str]) -> EtlConfig {
    let mut config = EtlConfig::default();
    config.paths.data_dir = data_dir.to_path_buf();
    config.fetch.inter_call_delay_ms = 0;
    config.fetch.cities = cities
        .iter()
        .map(|name| CityConfig::new(name, 20.0, 77.0))
        .collect();
    config
}

pub const CHURN_CSV: &str = "\
customerID,gender,SeniorCitizen,tenure,PhoneService,MultipleLines,InternetService,Contract,PaymentMethod,MonthlyCharges,TotalCharges,Churn
7590-VHVEG,Female,0,1,No,No phone service,DSL,Month-to-month,Electronic check,29.85,29.85,No
5575-GNVDE,Male,0,34,Yes,No,DSL,One year,Mailed check,56.95,1889.5,No
3668-QPYBK,Male,0,2,Yes,No,DSL,Month-to-month,Mailed check,53.85,108.15,Yes
7795-CFOCW,Male,0,45,No,No phone service,DSL,One year,Bank transfer (automatic),42.3,1840.75,No
9237-HQITU,Female,0,2,Yes,No,Fiber optic,Month-to-month,Electronic check,70.7,151.65,Yes
4472-LVYGI,Female,0,0,No,No phone service,DSL,Two year,Bank transfer (automatic),52.55, ,No
";
