//! Configuration system for metro-etl.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! Configuration is loaded from `~/.config/metro-etl/config.toml` and/or
//! `.metro-etl/config.toml` in the workspace directory. The resulting
//! [`EtlConfig`] is built once and handed to every stage by reference.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::records::SeverityWeights;

/// Default Open-Meteo air-quality endpoint.
pub const OPEN_METEO_AIR_QUALITY_URL: &str =
    "https://air-quality-api.open-meteo.com/v1/air-quality";

/// Top-level configuration for every pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlConfig {
    pub paths: PathsConfig,
    pub fetch: FetchConfig,
    pub load: LoadConfig,
    pub store: StoreConfig,
    pub transform: TransformConfig,
    pub churn: ChurnConfig,
}

impl EtlConfig {
    /// Reject knob values the stages cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.max_retries == 0 {
            return Err(ConfigError::Invalid {
                message: "fetch.max_retries must be at least 1".into(),
            });
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "fetch.timeout_secs must be at least 1".into(),
            });
        }
        if self.load.batch_size == 0 {
            return Err(ConfigError::Invalid {
                message: "load.batch_size must be at least 1".into(),
            });
        }
        if self.load.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "load.max_attempts must be at least 1".into(),
            });
        }
        if self.store.page_size == 0 {
            return Err(ConfigError::Invalid {
                message: "store.page_size must be at least 1".into(),
            });
        }
        for city in &self.fetch.cities {
            if city.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: "fetch.cities entries need a name".into(),
                });
            }
            if !(-90.0..=90.0).contains(&city.latitude) || !(-180.0..=180.0).contains(&city.longitude)
            {
                return Err(ConfigError::Invalid {
                    message: format!("coordinates out of range for city '{}'", city.name),
                });
            }
        }
        Ok(())
    }

    /// Anchor relative paths at `workspace`.
    pub fn resolve_paths(&mut self, workspace: &Path) {
        if self.paths.data_dir.is_relative() {
            self.paths.data_dir = workspace.join(&self.paths.data_dir);
        }
        if let Some(ref mut path) = self.store.sqlite_path {
            if path.is_relative() {
                *path = workspace.join(&*path);
            }
        }
        if let Some(ref mut path) = self.churn.raw_csv {
            if path.is_relative() {
                *path = workspace.join(&*path);
            }
        }
    }
}

/// Filesystem layout for raw, staged, and processed artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root data directory; `raw/`, `staged/` and `processed/` live beneath it.
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl PathsConfig {
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn staged_dir(&self) -> PathBuf {
        self.data_dir.join("staged")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    /// Staged output of the air-quality transformer.
    pub fn air_quality_staged(&self) -> PathBuf {
        self.staged_dir().join("air_quality_transformed.csv")
    }

    /// Staged output of the churn transformer.
    pub fn churn_staged(&self) -> PathBuf {
        self.staged_dir().join("churn_transformed.csv")
    }

    /// Create the raw, staged, and processed directories if absent.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [self.raw_dir(), self.staged_dir(), self.processed_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// A city to fetch, with the coordinates sent to the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl CityConfig {
    pub fn new(name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.to_string(),
            latitude,
            longitude,
        }
    }
}

fn default_cities() -> Vec<CityConfig> {
    vec![
        CityConfig::new("Delhi", 28.7041, 77.1025),
        CityConfig::new("Mumbai", 19.0760, 72.8777),
        CityConfig::new("Bengaluru", 12.9716, 77.5946),
        CityConfig::new("Hyderabad", 17.3850, 78.4867),
        CityConfig::new("Kolkata", 22.5726, 88.3639),
    ]
}

/// Extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub base_url: String,
    /// Total attempts per city, including the first.
    pub max_retries: u32,
    /// Per-request network timeout.
    pub timeout_secs: u64,
    /// Pause between consecutive cities.
    pub inter_call_delay_ms: u64,
    pub cities: Vec<CityConfig>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: OPEN_METEO_AIR_QUALITY_URL.to_string(),
            max_retries: 3,
            timeout_secs: 10,
            inter_call_delay_ms: 500,
            cities: default_cities(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    pub fn city(&self, name: &str) -> Option<&CityConfig> {
        self.cities
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Batch loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub batch_size: usize,
    /// Insert attempts per batch before it is skipped.
    pub max_attempts: u32,
    /// Fixed pause between attempts on the same batch.
    pub retry_delay_secs: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_attempts: 2,
            retry_delay_secs: 2,
        }
    }
}

impl LoadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Which record store implementation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Postgrest,
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Sqlite => write!(f, "sqlite"),
            StoreBackend::Postgrest => write!(f, "postgrest"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file; defaults to `<data_dir>/metro_etl.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,
    /// Environment variable holding the PostgREST base URL.
    pub url_env: String,
    /// Environment variable holding the PostgREST API key.
    pub key_env: String,
    /// Rows requested per page when reading a table back.
    pub page_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: None,
            url_env: "SUPABASE_URL".to_string(),
            key_env: "SUPABASE_KEY".to_string(),
            page_size: 1000,
            request_timeout_secs: 30,
        }
    }
}

/// Credentials for a remote store, read from the environment.
#[derive(Clone)]
pub struct StoreCredentials {
    pub url: String,
    pub key: String,
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl StoreConfig {
    /// Resolve the SQLite file for this configuration.
    pub fn sqlite_path(&self, paths: &PathsConfig) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| paths.data_dir.join("metro_etl.db"))
    }

    /// Read remote-store credentials. Missing or empty values are fatal.
    pub fn credentials(&self) -> Result<StoreCredentials, ConfigError> {
        let read = |var: &str| {
            std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::EnvVarMissing {
                    var: var.to_string(),
                })
        };
        Ok(StoreCredentials {
            url: read(&self.url_env)?,
            key: read(&self.key_env)?,
        })
    }
}

/// Derived-feature configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    pub severity: SeverityWeights,
}

/// Churn pipeline inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChurnConfig {
    /// Original churn CSV; defaults to `<data_dir>/raw/churn.csv`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_csv: Option<PathBuf>,
}

impl ChurnConfig {
    pub fn raw_csv(&self, paths: &PathsConfig) -> PathBuf {
        self.raw_csv
            .clone()
            .unwrap_or_else(|| paths.raw_dir().join("churn.csv"))
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `METRO_ETL_`, `__` for nesting)
/// 2. Workspace-local config (`.metro-etl/config.toml`)
/// 3. User config (`~/.config/metro-etl/config.toml`)
/// 4. Built-in defaults
///
/// Relative paths are anchored at `workspace` and the result is validated.
pub fn load_config(workspace: Option<&Path>) -> Result<EtlConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EtlConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "metro-etl", "metro-etl") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".metro-etl").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // METRO_ETL_LOAD__BATCH_SIZE, METRO_ETL_FETCH__MAX_RETRIES, etc.
    figment = figment.merge(Env::prefixed("METRO_ETL_").split("__"));

    let mut config: EtlConfig = figment.extract().map_err(Box::new)?;
    if let Some(ws) = workspace {
        config.resolve_paths(ws);
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EtlConfig::default();
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.fetch.timeout_secs, 10);
        assert_eq!(config.fetch.inter_call_delay(), Duration::from_millis(500));
        assert_eq!(config.load.batch_size, 200);
        assert_eq!(config.load.max_attempts, 2);
        assert_eq!(config.load.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.fetch.cities.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = EtlConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EtlConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.load.batch_size, config.load.batch_size);
        assert_eq!(back.fetch.cities, config.fetch.cities);
        assert_eq!(back.transform.severity, config.transform.severity);
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = EtlConfig::default();
        config.load.batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let mut config = EtlConfig::default();
        config.fetch.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_coordinates() {
        let mut config = EtlConfig::default();
        config.fetch.cities.push(CityConfig::new("Nowhere", 123.0, 0.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paths_layout() {
        let paths = PathsConfig {
            data_dir: PathBuf::from("/srv/etl"),
        };
        assert_eq!(paths.raw_dir(), PathBuf::from("/srv/etl/raw"));
        assert_eq!(
            paths.air_quality_staged(),
            PathBuf::from("/srv/etl/staged/air_quality_transformed.csv")
        );
        assert_eq!(
            paths.churn_staged(),
            PathBuf::from("/srv/etl/staged/churn_transformed.csv")
        );
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            data_dir: dir.path().join("data"),
        };
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.raw_dir().is_dir());
        assert!(paths.staged_dir().is_dir());
        assert!(paths.processed_dir().is_dir());
    }

    #[test]
    fn test_city_lookup_is_case_insensitive() {
        let config = FetchConfig::default();
        assert_eq!(config.city("delhi").unwrap().latitude, 28.7041);
        assert!(config.city("Atlantis").is_none());
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".metro-etl");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
[load]
batch_size = 50
max_attempts = 4
retry_delay_secs = 1

[store]
backend = "memory"
url_env = "SUPABASE_URL"
key_env = "SUPABASE_KEY"
page_size = 500
request_timeout_secs = 5
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.load.batch_size, 50);
        assert_eq!(config.load.max_attempts, 4);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.page_size, 500);
        assert_eq!(config.paths.data_dir, dir.path().join("data"));
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".metro-etl");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[load]\nbatch_size = 0\nmax_attempts = 2\nretry_delay_secs = 2\n",
        )
        .unwrap();
        assert!(matches!(
            load_config(Some(dir.path())),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_credentials_missing_env_var() {
        let config = StoreConfig {
            url_env: "METRO_ETL_TEST_UNSET_URL_7f3a".into(),
            key_env: "METRO_ETL_TEST_UNSET_KEY_7f3a".into(),
            ..Default::default()
        };
        let err = config.credentials().unwrap_err();
        assert!(
            matches!(err, ConfigError::EnvVarMissing { ref var } if var == "METRO_ETL_TEST_UNSET_URL_7f3a")
        );
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = StoreCredentials {
            url: "https://example.supabase.co".into(),
            key: "secret-key".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_sqlite_path_defaults_under_data_dir() {
        let paths = PathsConfig {
            data_dir: PathBuf::from("/tmp/etl"),
        };
        let store = StoreConfig::default();
        assert_eq!(store.sqlite_path(&paths), PathBuf::from("/tmp/etl/metro_etl.db"));
    }
}
