//! Air-quality KPIs and the processed CSV tables derived from loaded rows.

use crate::error::{EtlError, Result};
use crate::persistence::atomic_write_table;
use crate::records::{RiskFlag, STAGED_TIME_FORMAT, parse_timestamp};
use crate::store::{Record, RecordStore};
use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SUMMARY_FILE: &str = "summary_metrics.csv";
pub const RISK_DISTRIBUTION_FILE: &str = "city_risk_distribution.csv";
pub const TRENDS_FILE: &str = "pollution_trends.csv";

/// The subset of a stored row the analysis reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub city: String,
    pub time: Option<NaiveDateTime>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub ozone: Option<f64>,
    pub severity_score: Option<f64>,
    pub risk_flag: Option<RiskFlag>,
    pub hour: Option<u32>,
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_str(value: Option<&Value>) -> Option<&str> {
    value?.as_str()
}

impl Observation {
    pub fn from_record(record: &Record) -> Self {
        let time = as_str(record.get("time")).and_then(parse_timestamp);
        Self {
            city: as_str(record.get("city")).unwrap_or_default().to_string(),
            pm2_5: as_f64(record.get("pm2_5")),
            pm10: as_f64(record.get("pm10")),
            ozone: as_f64(record.get("ozone")),
            severity_score: as_f64(record.get("severity_score")),
            risk_flag: as_str(record.get("risk_flag")).and_then(RiskFlag::from_label),
            hour: as_f64(record.get("hour"))
                .map(|h| h as u32)
                .or_else(|| time.map(|t| t.hour())),
            time,
        }
    }
}

/// Running mean that ignores absent values.
#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

/// Key with the greatest mean. Keys iterate in order, so on a tie the first
/// (smallest) key wins.
fn argmax<K: Clone + Ord>(means: &BTreeMap<K, Mean>) -> Option<(K, f64)> {
    let mut best: Option<(K, f64)> = None;
    for (key, mean) in means {
        let Some(m) = mean.get() else { continue };
        if best.as_ref().is_none_or(|(_, b)| m > *b) {
            best = Some((key.clone(), m));
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub total_rows: usize,
    pub most_polluted_city: Option<(String, f64)>,
    pub highest_severity_city: Option<(String, f64)>,
    /// Percentage of flagged rows per risk flag, in `RiskFlag::ALL` order.
    pub risk_percentages: Vec<(RiskFlag, f64)>,
    pub worst_hour: Option<(u32, f64)>,
}

pub fn compute_kpis(observations: &[Observation]) -> Kpis {
    let mut pm_by_city: BTreeMap<String, Mean> = BTreeMap::new();
    let mut severity_by_city: BTreeMap<String, Mean> = BTreeMap::new();
    let mut pm_by_hour: BTreeMap<u32, Mean> = BTreeMap::new();
    let mut flags: BTreeMap<RiskFlag, usize> = BTreeMap::new();

    for o in observations {
        pm_by_city.entry(o.city.clone()).or_default().add(o.pm2_5);
        severity_by_city
            .entry(o.city.clone())
            .or_default()
            .add(o.severity_score);
        if let Some(h) = o.hour {
            pm_by_hour.entry(h).or_default().add(o.pm2_5);
        }
        if let Some(flag) = o.risk_flag {
            *flags.entry(flag).or_default() += 1;
        }
    }

    let flagged: usize = flags.values().sum();
    let risk_percentages = RiskFlag::ALL
        .iter()
        .map(|flag| {
            let count = flags.get(flag).copied().unwrap_or(0);
            let pct = if flagged == 0 {
                0.0
            } else {
                count as f64 * 100.0 / flagged as f64
            };
            (*flag, pct)
        })
        .collect();

    Kpis {
        total_rows: observations.len(),
        most_polluted_city: argmax(&pm_by_city),
        highest_severity_city: argmax(&severity_by_city),
        risk_percentages,
        worst_hour: argmax(&pm_by_hour),
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}

fn summary_table(kpis: &Kpis) -> Vec<Vec<String>> {
    let mut rows = vec![vec!["total_rows".to_string(), kpis.total_rows.to_string()]];
    let mut push = |metric: &str, value: String| rows.push(vec![metric.to_string(), value]);

    if let Some((city, mean)) = &kpis.most_polluted_city {
        push("most_polluted_city", city.clone());
        push("most_polluted_city_mean_pm2_5", fmt_opt(Some(*mean)));
    }
    if let Some((city, mean)) = &kpis.highest_severity_city {
        push("highest_severity_city", city.clone());
        push("highest_severity_city_mean_score", fmt_opt(Some(*mean)));
    }
    for (flag, pct) in &kpis.risk_percentages {
        let metric = format!("{}_pct", flag.label().to_lowercase().replace(' ', "_"));
        push(&metric, fmt_opt(Some(*pct)));
    }
    if let Some((hour, mean)) = kpis.worst_hour {
        push("worst_pollution_hour", hour.to_string());
        push("worst_pollution_hour_mean_pm2_5", fmt_opt(Some(mean)));
    }
    rows
}

fn risk_distribution_table(observations: &[Observation]) -> Vec<Vec<String>> {
    let mut counts: BTreeMap<(&str, RiskFlag), usize> = BTreeMap::new();
    for o in observations {
        if let Some(flag) = o.risk_flag {
            *counts.entry((o.city.as_str(), flag)).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|((city, flag), n)| vec![city.to_string(), flag.label().to_string(), n.to_string()])
        .collect()
}

fn trends_table(observations: &[Observation]) -> Vec<Vec<String>> {
    let mut timed: Vec<(&NaiveDateTime, &Observation)> = observations
        .iter()
        .filter_map(|o| o.time.as_ref().map(|t| (t, o)))
        .collect();
    timed.sort_by_key(|(t, _)| **t);
    timed
        .into_iter()
        .map(|(t, o)| {
            vec![
                t.format(STAGED_TIME_FORMAT).to_string(),
                o.city.clone(),
                o.pm2_5.map(|v| v.to_string()).unwrap_or_default(),
                o.pm10.map(|v| v.to_string()).unwrap_or_default(),
                o.ozone.map(|v| v.to_string()).unwrap_or_default(),
            ]
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub kpis: Kpis,
    pub outputs: Vec<PathBuf>,
}

impl std::fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Analyzed {} rows", self.kpis.total_rows)?;
        if let Some((city, mean)) = &self.kpis.most_polluted_city {
            write!(f, "; most polluted: {city} (mean PM2.5 {mean:.2})")?;
        }
        if let Some((hour, _)) = self.kpis.worst_hour {
            write!(f, "; worst hour: {hour:02}:00")?;
        }
        Ok(())
    }
}

/// Read every loaded air-quality row and write the processed tables.
pub async fn analyze_air_quality(
    store: &dyn RecordStore,
    table: &str,
    processed_dir: &Path,
) -> Result<AnalysisReport> {
    let records = store.select_all(table).await?;
    if records.is_empty() {
        return Err(EtlError::Analysis {
            message: format!("no rows in {table} to analyze"),
        });
    }
    let observations: Vec<Observation> = records.iter().map(Observation::from_record).collect();
    let kpis = compute_kpis(&observations);

    let summary = processed_dir.join(SUMMARY_FILE);
    let distribution = processed_dir.join(RISK_DISTRIBUTION_FILE);
    let trends = processed_dir.join(TRENDS_FILE);
    atomic_write_table(&summary, &["metric", "value"], &summary_table(&kpis))?;
    atomic_write_table(
        &distribution,
        &["city", "risk_flag", "count"],
        &risk_distribution_table(&observations),
    )?;
    atomic_write_table(
        &trends,
        &["time", "city", "pm2_5", "pm10", "ozone"],
        &trends_table(&observations),
    )?;

    let report = AnalysisReport {
        kpis,
        outputs: vec![summary, distribution, trends],
    };
    info!(dir = %processed_dir.display(), "{report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obs(city: &str, hour: u32, pm2_5: Option<f64>, severity: Option<f64>) -> Observation {
        Observation {
            city: city.to_string(),
            time: parse_timestamp(&format!("2025-01-01 {hour:02}:00:00")),
            pm2_5,
            pm10: None,
            ozone: None,
            severity_score: severity,
            risk_flag: severity.map(RiskFlag::from_severity),
            hour: Some(hour),
        }
    }

    #[test]
    fn test_kpis_ignore_absent_values() {
        let observations = vec![
            obs("Delhi", 1, Some(100.0), Some(500.0)),
            obs("Delhi", 2, None, None),
            obs("Mumbai", 1, Some(40.0), Some(100.0)),
            obs("Mumbai", 2, Some(60.0), Some(300.0)),
        ];
        let kpis = compute_kpis(&observations);
        assert_eq!(kpis.most_polluted_city, Some(("Delhi".to_string(), 100.0)));
        assert_eq!(kpis.highest_severity_city, Some(("Delhi".to_string(), 500.0)));
        assert_eq!(kpis.worst_hour, Some((1, 70.0)));
        let high = kpis.risk_percentages[0];
        assert_eq!(high.0, RiskFlag::High);
        assert!((high.1 - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_resolve_to_first_key() {
        let observations = vec![
            obs("Pune", 3, Some(50.0), None),
            obs("Agra", 5, Some(50.0), None),
        ];
        let kpis = compute_kpis(&observations);
        assert_eq!(kpis.most_polluted_city.unwrap().0, "Agra");
        assert_eq!(kpis.worst_hour.unwrap().0, 3);
        assert_eq!(kpis.highest_severity_city, None);
        assert!(kpis.risk_percentages.iter().all(|(_, p)| *p == 0.0));
    }

    #[test]
    fn test_observation_from_store_record() {
        let record = json!({
            "city": "Delhi", "time": "2025-01-01T07:00:00", "pm2_5": "12.5",
            "risk_flag": "Moderate Risk", "hour": 7
        });
        let o = Observation::from_record(record.as_object().unwrap());
        assert_eq!(o.pm2_5, Some(12.5));
        assert_eq!(o.risk_flag, Some(RiskFlag::Moderate));
        assert_eq!(o.hour, Some(7));
        assert!(o.time.is_some());
    }

    #[tokio::test]
    async fn test_analyze_writes_three_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let seed: Vec<Record> = [
            json!({"city": "Mumbai", "time": "2025-01-01 02:00:00", "pm2_5": 20.0, "pm10": 30.0,
                   "ozone": 5.0, "severity_score": 250.0, "risk_flag": "Moderate Risk", "hour": 2}),
            json!({"city": "Delhi", "time": "2025-01-01 01:00:00", "pm2_5": 80.0, "pm10": 90.0,
                   "ozone": 9.0, "severity_score": 900.0, "risk_flag": "High Risk", "hour": 1}),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect();
        store.seed("air_quality_data", seed);

        let report = analyze_air_quality(&store, "air_quality_data", dir.path())
            .await
            .unwrap();
        assert_eq!(report.outputs.len(), 3);

        let trends = std::fs::read_to_string(dir.path().join(TRENDS_FILE)).unwrap();
        let lines: Vec<&str> = trends.lines().collect();
        assert_eq!(lines[0], "time,city,pm2_5,pm10,ozone");
        assert_eq!(lines[1], "2025-01-01 01:00:00,Delhi,80,90,9");

        let dist = std::fs::read_to_string(dir.path().join(RISK_DISTRIBUTION_FILE)).unwrap();
        assert_eq!(
            dist,
            "city,risk_flag,count\nDelhi,High Risk,1\nMumbai,Moderate Risk,1\n"
        );

        let summary = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        assert!(summary.contains("most_polluted_city,Delhi\n"));
        assert!(summary.contains("high_risk_pct,50.00\n"));
        assert!(summary.contains("worst_pollution_hour,1\n"));
    }

    #[tokio::test]
    async fn test_analyze_empty_store_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = analyze_air_quality(&MemoryStore::new(), "air_quality_data", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Analysis { .. }));
    }
}
