//! CLI subcommand handlers.

use crate::{AirAction, ChurnAction, Commands, ConfigAction};
use metro_etl_core::fetch::{FetchSummary, Fetcher};
use metro_etl_core::load::{BatchLoader, SchemaOutcome, ensure_schema};
use metro_etl_core::store::{RecordStore, open_store};
use metro_etl_core::{
    EtlConfig, FetchError, OpenMeteoClient, PipelineSummary, StoreBackend, TableSchema,
    ValidationPlan,
};
use std::path::{Path, PathBuf};

/// Global options shared by every subcommand.
pub struct Options {
    pub workspace: PathBuf,
    pub store: Option<String>,
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, options: &Options) -> anyhow::Result<()> {
    match command {
        Commands::Air { action } => handle_air(action, options).await,
        Commands::Churn { action } => handle_churn(action, options).await,
        Commands::Config { action } => handle_config(action, &options.workspace),
    }
}

fn parse_backend(name: &str) -> anyhow::Result<StoreBackend> {
    match name.to_ascii_lowercase().as_str() {
        "sqlite" => Ok(StoreBackend::Sqlite),
        "postgrest" | "supabase" => Ok(StoreBackend::Postgrest),
        "memory" => Ok(StoreBackend::Memory),
        other => anyhow::bail!("Unknown store backend '{other}'. Use sqlite, postgrest or memory."),
    }
}

fn load(options: &Options) -> anyhow::Result<EtlConfig> {
    let mut config = metro_etl_core::load_config(Some(&options.workspace))
        .map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    if let Some(name) = &options.store {
        config.store.backend = parse_backend(name)?;
    }
    config.paths.ensure_dirs()?;
    tracing::debug!(
        data_dir = %config.paths.data_dir.display(),
        backend = %config.store.backend,
        "Configuration loaded"
    );
    Ok(config)
}

fn store(config: &EtlConfig) -> anyhow::Result<Box<dyn RecordStore>> {
    Ok(open_store(config)?)
}

fn finish(summary: PipelineSummary) -> anyhow::Result<()> {
    println!("{summary}");
    if summary.is_success() {
        Ok(())
    } else {
        anyhow::bail!("{} pipeline finished with failures", summary.pipeline)
    }
}

fn print_schema_outcome(outcome: &SchemaOutcome) {
    if let SchemaOutcome::Unavailable { table, sql, reason } = outcome {
        println!("Could not create {table} automatically ({reason}). Apply manually:\n{sql}");
    }
}

async fn load_stage(
    config: &EtlConfig,
    schema: TableSchema,
    staged: &Path,
) -> anyhow::Result<()> {
    let store = store(config)?;
    print_schema_outcome(&ensure_schema(store.as_ref(), &schema).await);
    let report = BatchLoader::new(store.as_ref(), schema, &config.load)
        .load(staged)
        .await?;
    println!("{report}");
    if !report.is_complete() {
        anyhow::bail!("{} rows were not loaded", report.skipped_rows());
    }
    Ok(())
}

async fn validate_stage(
    config: &EtlConfig,
    original: &Path,
    plan: ValidationPlan,
) -> anyhow::Result<()> {
    let store = store(config)?;
    let report = metro_etl_core::validate(original, store.as_ref(), &plan).await?;
    println!("{report}");
    Ok(())
}

async fn handle_air(action: AirAction, options: &Options) -> anyhow::Result<()> {
    let mut config = load(options)?;
    let paths = config.paths.clone();

    match action {
        AirAction::Fetch { city } => {
            if !city.is_empty() {
                let selected = city
                    .iter()
                    .map(|name| {
                        config
                            .fetch
                            .city(name)
                            .cloned()
                            .ok_or_else(|| FetchError::UnknownEntity { name: name.clone() })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                config.fetch.cities = selected;
            }
            let client = OpenMeteoClient::new(&config.fetch)?;
            let fetcher = Fetcher::new(&client, paths.raw_dir(), &config.fetch);
            let results = fetcher.fetch_all(&config.fetch.cities).await;
            for r in &results {
                match (r.raw_path(), r.error()) {
                    (Some(path), _) => println!("  {} -> {}", r.entity, path.display()),
                    (None, Some(error)) => {
                        println!("  {} failed after {} attempts: {error}", r.entity, r.attempts)
                    }
                    (None, None) => {}
                }
            }
            let summary = FetchSummary::from_results(&results);
            println!("{summary}");
            if !summary.is_complete() {
                anyhow::bail!("{} cities could not be fetched", summary.failed.len());
            }
            Ok(())
        }
        AirAction::Transform => {
            let report = metro_etl_core::transform_air_quality(
                &paths.raw_dir(),
                &paths.air_quality_staged(),
                &config.transform.severity,
            )?;
            println!("{report}");
            Ok(())
        }
        AirAction::Load => {
            load_stage(&config, TableSchema::air_quality(), &paths.air_quality_staged()).await
        }
        AirAction::Analyze => {
            let store = store(&config)?;
            let schema = TableSchema::air_quality();
            let report =
                metro_etl_core::analyze_air_quality(store.as_ref(), schema.name, &paths.processed_dir())
                    .await?;
            println!("{report}");
            for path in &report.outputs {
                println!("  wrote {}", path.display());
            }
            Ok(())
        }
        AirAction::Validate => {
            validate_stage(&config, &paths.air_quality_staged(), ValidationPlan::air_quality()).await
        }
        AirAction::Run => {
            let client = OpenMeteoClient::new(&config.fetch)?;
            let store = store(&config)?;
            let summary = metro_etl_core::run_air_quality(&config, &client, store.as_ref()).await?;
            finish(summary)
        }
    }
}

async fn handle_churn(action: ChurnAction, options: &Options) -> anyhow::Result<()> {
    let mut config = load(options)?;
    let paths = config.paths.clone();

    match action {
        ChurnAction::Transform { input } => {
            if input.is_some() {
                config.churn.raw_csv = input;
            }
            let report = metro_etl_core::transform_churn(
                &config.churn.raw_csv(&paths),
                &paths.churn_staged(),
            )?;
            println!("{report}");
            Ok(())
        }
        ChurnAction::Load => load_stage(&config, TableSchema::churn(), &paths.churn_staged()).await,
        ChurnAction::Validate { input } => {
            if input.is_some() {
                config.churn.raw_csv = input;
            }
            validate_stage(&config, &config.churn.raw_csv(&paths), ValidationPlan::churn()).await
        }
        ChurnAction::Run { input } => {
            if input.is_some() {
                config.churn.raw_csv = input;
            }
            let store = store(&config)?;
            let summary = metro_etl_core::run_churn(&config, store.as_ref()).await?;
            finish(summary)
        }
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".metro-etl");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&EtlConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!("Created default configuration at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = metro_etl_core::load_config(Some(workspace))
                .map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const CHURN_CSV: &str = "\
customerID,tenure,MultipleLines,InternetService,Contract,PaymentMethod,MonthlyCharges,TotalCharges,Churn
0001,1,No phone service,DSL,Month-to-month,Electronic check,29.85,29.85,No
0002,34,No,DSL,One year,Mailed check,56.95,1889.5,No
";

    fn options(dir: &TempDir, store: Option<&str>) -> Options {
        Options {
            workspace: dir.path().to_path_buf(),
            store: store.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, &options(&dir, None)).await.unwrap();

        let config_path = dir.path().join(".metro-etl").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: EtlConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.load.batch_size, 200);
        assert_eq!(parsed.fetch.cities.len(), 5);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".metro-etl").join("config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[load]\nbatch_size = 50\n").unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, &options(&dir, None)).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[load]\nbatch_size = 50\n"
        );
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, &options(&dir, None)).await.is_ok());
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!(parse_backend("SQLite").unwrap(), StoreBackend::Sqlite);
        assert_eq!(parse_backend("supabase").unwrap(), StoreBackend::Postgrest);
        assert!(parse_backend("mongo").is_err());
    }

    #[tokio::test]
    async fn test_air_transform_without_raw_files_fails() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Air {
            action: AirAction::Transform,
        };
        let err = handle_command(command, &options(&dir, None)).await.unwrap_err();
        assert!(err.to_string().contains("no usable input rows"));
    }

    #[tokio::test]
    async fn test_churn_run_with_sqlite_store() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("export.csv");
        std::fs::write(&input, CHURN_CSV).unwrap();

        let command = Commands::Churn {
            action: ChurnAction::Run {
                input: Some(input),
            },
        };
        handle_command(command, &options(&dir, Some("sqlite")))
            .await
            .unwrap();

        assert!(dir.path().join("data").join("staged").join("churn_transformed.csv").is_file());
        assert!(dir.path().join("data").join("metro_etl.db").is_file());
    }

    #[tokio::test]
    async fn test_churn_stages_chain_with_custom_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("export.csv");
        std::fs::write(&input, CHURN_CSV).unwrap();
        let opts = options(&dir, Some("sqlite"));

        let stages = [
            ChurnAction::Transform {
                input: Some(input.clone()),
            },
            ChurnAction::Load,
            ChurnAction::Validate {
                input: Some(input.clone()),
            },
        ];
        for action in stages {
            handle_command(Commands::Churn { action }, &opts).await.unwrap();
        }

        // Without --input, validate looks for the default raw file and stops.
        let err = handle_command(
            Commands::Churn {
                action: ChurnAction::Validate { input: None },
            },
            &opts,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("required input missing"));
    }

    #[tokio::test]
    async fn test_unknown_city_is_rejected_before_fetching() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Air {
            action: AirAction::Fetch {
                city: vec!["Atlantis".into()],
            },
        };
        let err = handle_command(command, &options(&dir, Some("memory")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown entity: Atlantis"));
    }
}
