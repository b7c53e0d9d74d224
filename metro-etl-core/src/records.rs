//! Typed staged records and the pure derivations that fill their
//! classification fields.
//!
//! Raw inputs are loosely typed; everything past the transformer uses these
//! structs, so a staged row always carries its identifying fields.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Air quality
// ---------------------------------------------------------------------------

/// Names of the hourly pollutant series, in staged column order.
pub const MEASUREMENT_FIELDS: [&str; 7] = [
    "pm10",
    "pm2_5",
    "carbon_monoxide",
    "nitrogen_dioxide",
    "sulphur_dioxide",
    "ozone",
    "uv_index",
];

/// AQI band derived from PM2.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    Unhealthy,
    #[serde(rename = "Very Unhealthy")]
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub const ALL: [AqiCategory; 5] = [
        AqiCategory::Good,
        AqiCategory::Moderate,
        AqiCategory::Unhealthy,
        AqiCategory::VeryUnhealthy,
        AqiCategory::Hazardous,
    ];

    /// Band a PM2.5 reading. Upper bounds are inclusive.
    pub fn from_pm2_5(pm2_5: f64) -> Self {
        if pm2_5 <= 50.0 {
            AqiCategory::Good
        } else if pm2_5 <= 100.0 {
            AqiCategory::Moderate
        } else if pm2_5 <= 200.0 {
            AqiCategory::Unhealthy
        } else if pm2_5 <= 300.0 {
            AqiCategory::VeryUnhealthy
        } else {
            AqiCategory::Hazardous
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }
}

/// Risk class derived from the severity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskFlag {
    #[serde(rename = "High Risk")]
    High,
    #[serde(rename = "Moderate Risk")]
    Moderate,
    #[serde(rename = "Low Risk")]
    Low,
}

impl RiskFlag {
    pub const ALL: [RiskFlag; 3] = [RiskFlag::High, RiskFlag::Moderate, RiskFlag::Low];

    /// Lower bounds are exclusive: exactly 400 is Moderate, exactly 200 is Low.
    pub fn from_severity(score: f64) -> Self {
        if score > 400.0 {
            RiskFlag::High
        } else if score > 200.0 {
            RiskFlag::Moderate
        } else {
            RiskFlag::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskFlag::High => "High Risk",
            RiskFlag::Moderate => "Moderate Risk",
            RiskFlag::Low => "Low Risk",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.label() == label)
    }
}

/// Weights of the linear severity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub pm2_5: f64,
    pub pm10: f64,
    pub nitrogen_dioxide: f64,
    pub sulphur_dioxide: f64,
    pub carbon_monoxide: f64,
    pub ozone: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            pm2_5: 5.0,
            pm10: 3.0,
            nitrogen_dioxide: 4.0,
            sulphur_dioxide: 4.0,
            carbon_monoxide: 2.0,
            ozone: 3.0,
        }
    }
}

/// One hour of pollutant readings. `None` means the reading is absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub pm10: Option<f64>,
    pub pm2_5: Option<f64>,
    pub carbon_monoxide: Option<f64>,
    pub nitrogen_dioxide: Option<f64>,
    pub sulphur_dioxide: Option<f64>,
    pub ozone: Option<f64>,
    pub uv_index: Option<f64>,
}

impl Measurements {
    pub fn all_absent(&self) -> bool {
        [
            self.pm10,
            self.pm2_5,
            self.carbon_monoxide,
            self.nitrogen_dioxide,
            self.sulphur_dioxide,
            self.ozone,
            self.uv_index,
        ]
        .iter()
        .all(Option::is_none)
    }

    /// Set a reading by its series name. Unknown names are ignored.
    pub fn set(&mut self, field: &str, value: Option<f64>) {
        match field {
            "pm10" => self.pm10 = value,
            "pm2_5" => self.pm2_5 = value,
            "carbon_monoxide" => self.carbon_monoxide = value,
            "nitrogen_dioxide" => self.nitrogen_dioxide = value,
            "sulphur_dioxide" => self.sulphur_dioxide = value,
            "ozone" => self.ozone = value,
            "uv_index" => self.uv_index = value,
            _ => {}
        }
    }

    /// Weighted sum of the scored pollutants; absent if any of them is absent.
    pub fn severity_score(&self, weights: &SeverityWeights) -> Option<f64> {
        Some(
            self.pm2_5? * weights.pm2_5
                + self.pm10? * weights.pm10
                + self.nitrogen_dioxide? * weights.nitrogen_dioxide
                + self.sulphur_dioxide? * weights.sulphur_dioxide
                + self.carbon_monoxide? * weights.carbon_monoxide
                + self.ozone? * weights.ozone,
        )
    }
}

/// A staged air-quality row: one city at one hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityRow {
    pub city: String,
    #[serde(with = "staged_time")]
    pub time: NaiveDateTime,
    pub pm10: Option<f64>,
    pub pm2_5: Option<f64>,
    pub carbon_monoxide: Option<f64>,
    pub nitrogen_dioxide: Option<f64>,
    pub sulphur_dioxide: Option<f64>,
    pub ozone: Option<f64>,
    pub uv_index: Option<f64>,
    pub aqi_category: Option<AqiCategory>,
    pub severity_score: Option<f64>,
    pub risk_flag: Option<RiskFlag>,
    pub hour: u32,
}

impl AirQualityRow {
    /// Build a staged row, deriving every classification field.
    pub fn derive(
        city: impl Into<String>,
        time: NaiveDateTime,
        m: Measurements,
        weights: &SeverityWeights,
    ) -> Self {
        use chrono::Timelike;

        let severity_score = m.severity_score(weights);
        Self {
            city: city.into(),
            time,
            aqi_category: m.pm2_5.map(AqiCategory::from_pm2_5),
            risk_flag: severity_score.map(RiskFlag::from_severity),
            severity_score,
            hour: time.hour(),
            pm10: m.pm10,
            pm2_5: m.pm2_5,
            carbon_monoxide: m.carbon_monoxide,
            nitrogen_dioxide: m.nitrogen_dioxide,
            sulphur_dioxide: m.sulphur_dioxide,
            ozone: m.ozone,
            uv_index: m.uv_index,
        }
    }
}

/// Timestamp formats accepted from the API, staged files, and stores.
const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Canonical staged rendering of a timestamp.
pub const STAGED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a naive timestamp in any accepted form. Offsets are normalised to UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

pub mod staged_time {
    //! Serde adapter writing timestamps as `YYYY-MM-DD HH:MM:SS`.

    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&time.format(super::STAGED_TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| D::Error::custom(format!("unrecognised timestamp '{raw}'")))
    }
}

// ---------------------------------------------------------------------------
// Customer churn
// ---------------------------------------------------------------------------

/// Tenure bucket in months: (0,12], (12,36], (36,60], (60,inf).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TenureGroup {
    New,
    Regular,
    Loyal,
    Champion,
}

impl TenureGroup {
    pub const ALL: [TenureGroup; 4] = [
        TenureGroup::New,
        TenureGroup::Regular,
        TenureGroup::Loyal,
        TenureGroup::Champion,
    ];

    /// Absent for zero or negative tenure, which falls outside every bucket.
    pub fn from_tenure(months: f64) -> Option<Self> {
        if months.is_nan() || months <= 0.0 {
            None
        } else if months <= 12.0 {
            Some(TenureGroup::New)
        } else if months <= 36.0 {
            Some(TenureGroup::Regular)
        } else if months <= 60.0 {
            Some(TenureGroup::Loyal)
        } else {
            Some(TenureGroup::Champion)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TenureGroup::New => "New",
            TenureGroup::Regular => "Regular",
            TenureGroup::Loyal => "Loyal",
            TenureGroup::Champion => "Champion",
        }
    }
}

/// Monthly charge band: (-inf,30], (30,70], (70,inf).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargeSegment {
    Low,
    Medium,
    High,
}

impl ChargeSegment {
    pub const ALL: [ChargeSegment; 3] =
        [ChargeSegment::Low, ChargeSegment::Medium, ChargeSegment::High];

    pub fn from_monthly_charges(charges: f64) -> Option<Self> {
        if charges.is_nan() {
            None
        } else if charges <= 30.0 {
            Some(ChargeSegment::Low)
        } else if charges <= 70.0 {
            Some(ChargeSegment::Medium)
        } else {
            Some(ChargeSegment::High)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChargeSegment::Low => "Low",
            ChargeSegment::Medium => "Medium",
            ChargeSegment::High => "High",
        }
    }
}

/// Valid `contract_type_code` values.
pub const CONTRACT_CODES: [i64; 3] = [0, 1, 2];

pub fn contract_type_code(contract: &str) -> Option<u8> {
    match contract {
        "Month-to-month" => Some(0),
        "One year" => Some(1),
        "Two year" => Some(2),
        _ => None,
    }
}

pub fn has_internet_service(service: &str) -> u8 {
    match service {
        "DSL" | "Fiber optic" => 1,
        _ => 0,
    }
}

pub fn is_multi_line_user(lines: &str) -> Option<u8> {
    match lines {
        "Yes" => Some(1),
        "No" | "No phone service" => Some(0),
        _ => None,
    }
}

/// One row of the raw churn export. Numeric columns are kept as text so
/// blanks and stray values can be coerced instead of rejected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChurnRaw {
    #[serde(rename = "customerID", default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub tenure: Option<String>,
    #[serde(rename = "MultipleLines", default)]
    pub multiple_lines: Option<String>,
    #[serde(rename = "InternetService", default)]
    pub internet_service: Option<String>,
    #[serde(rename = "Contract", default)]
    pub contract: Option<String>,
    #[serde(rename = "PaymentMethod", default)]
    pub payment_method: Option<String>,
    #[serde(rename = "MonthlyCharges", default)]
    pub monthly_charges: Option<String>,
    #[serde(rename = "TotalCharges", default)]
    pub total_charges: Option<String>,
    #[serde(rename = "Churn", default)]
    pub churn: Option<String>,
}

/// A staged churn row. Column names follow the raw export; the loader
/// lower-cases them to match the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnRow {
    pub tenure: Option<i64>,
    #[serde(rename = "InternetService")]
    pub internet_service: String,
    #[serde(rename = "Contract")]
    pub contract: String,
    #[serde(rename = "PaymentMethod")]
    pub payment_method: String,
    #[serde(rename = "MonthlyCharges")]
    pub monthly_charges: Option<f64>,
    #[serde(rename = "TotalCharges")]
    pub total_charges: Option<f64>,
    #[serde(rename = "Churn")]
    pub churn: String,
    pub tenure_group: Option<TenureGroup>,
    pub monthly_charge_segment: Option<ChargeSegment>,
    pub has_internet_service: u8,
    pub is_multi_line_user: Option<u8>,
    pub contract_type_code: Option<u8>,
}
