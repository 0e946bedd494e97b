//! Data models for the pond monitoring service.
//!
//! Readings arrive from the store as loosely-typed [`SensorRow`]s (raw
//! timestamp text, nullable columns) and are normalized into [`Reading`]s
//! before any threshold evaluation happens. The set of tracked parameters
//! is closed: every lookup goes through [`Parameter`] so a new sensor
//! column cannot be silently skipped by a key mismatch.

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---

/// A water-quality parameter tracked by the pond sensors.
///
/// Variant order is the canonical reporting order used by every rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parameter {
    #[serde(rename = "temp")]
    Temp,
    #[serde(rename = "ph")]
    Ph,
    #[serde(rename = "do")]
    DissolvedOxygen,
    #[serde(rename = "ammonia")]
    Ammonia,
    #[serde(rename = "nitrate")]
    Nitrate,
    #[serde(rename = "manganese")]
    Manganese,
    #[serde(rename = "turbidity")]
    Turbidity,
    #[serde(rename = "salinity")]
    Salinity,
}

impl Parameter {
    // ---
    pub const ALL: [Parameter; 8] = [
        Parameter::Temp,
        Parameter::Ph,
        Parameter::DissolvedOxygen,
        Parameter::Ammonia,
        Parameter::Nitrate,
        Parameter::Manganese,
        Parameter::Turbidity,
        Parameter::Salinity,
    ];

    /// Parameters written when a device's thresholds are seeded with defaults.
    pub const SEEDED: [Parameter; 4] = [
        Parameter::Temp,
        Parameter::Ph,
        Parameter::Ammonia,
        Parameter::Turbidity,
    ];

    /// Key used in threshold records and alert identifiers.
    pub fn key(self) -> &'static str {
        match self {
            Parameter::Temp => "temp",
            Parameter::Ph => "ph",
            Parameter::DissolvedOxygen => "do",
            Parameter::Ammonia => "ammonia",
            Parameter::Nitrate => "nitrate",
            Parameter::Manganese => "manganese",
            Parameter::Turbidity => "turbidity",
            Parameter::Salinity => "salinity",
        }
    }

    /// Column name of this parameter in stored sensor rows.
    pub fn column(self) -> &'static str {
        match self {
            Parameter::Temp => "temperature",
            Parameter::Ph => "ph_value",
            Parameter::DissolvedOxygen => "dissolved_oxygen",
            Parameter::Ammonia => "ammonia",
            Parameter::Nitrate => "nitrate",
            Parameter::Manganese => "manganese",
            Parameter::Turbidity => "turbidity",
            Parameter::Salinity => "salinity",
        }
    }

    /// Display label: the key with its first letter upper-cased.
    pub fn label(self) -> &'static str {
        match self {
            Parameter::Temp => "Temp",
            Parameter::Ph => "Ph",
            Parameter::DissolvedOxygen => "Do",
            Parameter::Ammonia => "Ammonia",
            Parameter::Nitrate => "Nitrate",
            Parameter::Manganese => "Manganese",
            Parameter::Turbidity => "Turbidity",
            Parameter::Salinity => "Salinity",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }

    /// Fallback band used when a device has no configured threshold.
    pub fn default_band(self) -> ThresholdBand {
        let (min, max) = match self {
            Parameter::Temp => (15.0, 30.0),
            Parameter::Ph => (5.0, 9.0),
            Parameter::DissolvedOxygen => (5.0, 10.0),
            Parameter::Ammonia => (0.0, 0.25),
            Parameter::Nitrate => (20.0, 80.0),
            Parameter::Manganese => (0.0, 0.05),
            Parameter::Turbidity => (25.0, 60.0),
            Parameter::Salinity => (0.0, 100.0),
        };
        ThresholdBand { min, max }
    }
}

/// Acceptable `{min, max}` range for one parameter on one device.
///
/// `min > max` is a misconfiguration that must be tolerated, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub min: f64,
    pub max: f64,
}

impl ThresholdBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

// ---

/// Parameter values carried by a single reading. Absent means not reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SensorValues {
    pub temperature: Option<f64>,
    pub ph: Option<f64>,
    pub dissolved_oxygen: Option<f64>,
    pub ammonia: Option<f64>,
    pub nitrate: Option<f64>,
    pub manganese: Option<f64>,
    pub turbidity: Option<f64>,
    pub salinity: Option<f64>,
}

impl SensorValues {
    /// Finite value of `parameter`, if the reading carries one.
    pub fn get(&self, parameter: Parameter) -> Option<f64> {
        let value = match parameter {
            Parameter::Temp => self.temperature,
            Parameter::Ph => self.ph,
            Parameter::DissolvedOxygen => self.dissolved_oxygen,
            Parameter::Ammonia => self.ammonia,
            Parameter::Nitrate => self.nitrate,
            Parameter::Manganese => self.manganese,
            Parameter::Turbidity => self.turbidity,
            Parameter::Salinity => self.salinity,
        };
        value.filter(|v| v.is_finite())
    }
}

/// One timestamped sensor sample, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: SensorValues,
}

/// Sensor row as stored (and served by `/api/sensor-data`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SensorRow {
    // ---
    pub device_id: String,
    pub timestamp: String,
    pub temperature: Option<f64>,
    pub ph_value: Option<f64>,
    pub dissolved_oxygen: Option<f64>,
    pub ammonia: Option<f64>,
    pub nitrate: Option<f64>,
    pub manganese: Option<f64>,
    pub turbidity: Option<f64>,
    pub salinity: Option<f64>,
}

impl SensorRow {
    // ---
    /// Replace non-finite values with `None`.
    pub fn normalized(self) -> Self {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        SensorRow {
            temperature: finite(self.temperature),
            ph_value: finite(self.ph_value),
            dissolved_oxygen: finite(self.dissolved_oxygen),
            ammonia: finite(self.ammonia),
            nitrate: finite(self.nitrate),
            manganese: finite(self.manganese),
            turbidity: finite(self.turbidity),
            salinity: finite(self.salinity),
            ..self
        }
    }

    /// Convert to a [`Reading`], interpreting zone-less timestamps in `tz`.
    ///
    /// Returns `None` when the timestamp cannot be parsed.
    pub fn to_reading<Tz: TimeZone>(&self, tz: &Tz) -> Option<Reading> {
        // ---
        let timestamp = parse_timestamp(&self.timestamp, tz)?;
        let row = self.clone().normalized();

        Some(Reading {
            device_id: row.device_id,
            timestamp,
            values: SensorValues {
                temperature: row.temperature,
                ph: row.ph_value,
                dissolved_oxygen: row.dissolved_oxygen,
                ammonia: row.ammonia,
                nitrate: row.nitrate,
                manganese: row.manganese,
                turbidity: row.turbidity,
                salinity: row.salinity,
            },
        })
    }
}

/// Convert stored rows into readings, most recent first.
///
/// Rows with unparseable timestamps are dropped. The sort is stable, so rows
/// sharing a timestamp keep their stored order.
pub fn readings_from_rows<Tz: TimeZone>(rows: &[SensorRow], tz: &Tz) -> Vec<Reading> {
    // ---
    let mut readings: Vec<Reading> = rows.iter().filter_map(|r| r.to_reading(tz)).collect();
    readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    readings
}

// ---

/// Zone-less formats tried after the primary `YYYY-MM-DD H:M:S` layout.
const NAIVE_FALLBACK_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y, %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse a reading timestamp.
///
/// The device format `YYYY-MM-DD H:M:S` (one or two digit time fields) and
/// the other zone-less layouts are wall-clock times in `tz`. Strings carrying
/// an offset (RFC 3339, RFC 2822) are taken as-is.
pub fn parse_timestamp<Tz: TimeZone>(raw: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    // ---
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return resolve_local(tz, naive);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_FALLBACK_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| resolve_local(tz, naive))
}

/// Pin a wall-clock time to `tz`. Ambiguous times take the earlier instant;
/// times inside a DST gap are shifted forward one hour.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    // ---
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()?,
    };
    Some(local.with_timezone(&Utc))
}

// ---

/// Threshold record as stored per `(device_id, parameter)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredThreshold {
    pub device_id: String,
    pub parameter: String,
    pub min: f64,
    pub max: f64,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}
