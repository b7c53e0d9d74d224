//! Open-Meteo air-quality API client.
//!
//! One GET per city with the coordinates and the hourly pollutant series as
//! query parameters. No authentication.

use super::AirQualityApi;
use crate::config::{CityConfig, FetchConfig};
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

/// Hourly series requested for every city.
pub const HOURLY_SERIES: &str =
    "pm10,pm2_5,carbon_monoxide,nitrogen_dioxide,ozone,sulphur_dioxide,uv_index";

pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl OpenMeteoClient {
    /// Build a client whose requests time out after `config.timeout_secs`.
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("metro-etl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else if let Some(status) = e.status() {
            FetchError::Status {
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport {
                message: e.to_string(),
            }
        }
    }
}

/// Parse a response body as JSON, keeping the raw text when it is not JSON.
pub fn parse_body(body: String) -> Value {
    match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => json!({ "raw_text": body }),
    }
}

#[async_trait]
impl AirQualityApi for OpenMeteoClient {
    async fn hourly(&self, city: &CityConfig) -> Result<Value, FetchError> {
        debug!(
            city = city.name.as_str(),
            url = self.base_url.as_str(),
            "Requesting hourly air quality"
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", city.latitude.to_string()),
                ("longitude", city.longitude.to_string()),
                ("hourly", HOURLY_SERIES.to_string()),
            ])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        Ok(parse_body(body))
    }
}
