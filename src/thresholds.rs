//! Threshold evaluation and severity classification.
//!
//! [`evaluate`] is the single comparison used by both the alert list and the
//! AI-insight anomaly detector. Band lookups go through [`ThresholdTable`],
//! which falls back to [`Parameter::default_band`] for unconfigured pairs.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Parameter, StoredThreshold, ThresholdBand};

// ---

/// Side of the band a value fell out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundType {
    Below,
    Above,
}

/// An out-of-band result: which side, and the bound that was crossed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub direction: BoundType,
    pub bound: f64,
}

/// Compare a finite `value` against `band`.
///
/// Bounds are inclusive: only `value < min` or `value > max` breach. The
/// below-check runs first, so for an inverted band (`min > max`) a value
/// satisfying both comparisons is reported as `Below`.
pub fn evaluate(value: f64, band: ThresholdBand) -> Option<Breach> {
    // ---
    if value < band.min {
        return Some(Breach {
            direction: BoundType::Below,
            bound: band.min,
        });
    }
    if value > band.max {
        return Some(Breach {
            direction: BoundType::Above,
            bound: band.max,
        });
    }
    None
}

// ---

/// Coarse severity tier for narrative summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

const CRITICAL_LOW: f64 = 0.5;
const CRITICAL_HIGH: f64 = 1.5;
const HIGH_LOW: f64 = 0.8;
const HIGH_HIGH: f64 = 1.2;

/// Classify how far an out-of-band `value` sits from `band`.
///
/// Callers only pass values already known to breach; anything not
/// `Critical` or `High` is `Medium`.
pub fn classify_severity(value: f64, band: ThresholdBand) -> Severity {
    // ---
    if value < band.min * CRITICAL_LOW || value > band.max * CRITICAL_HIGH {
        Severity::Critical
    } else if value < band.min * HIGH_LOW || value > band.max * HIGH_HIGH {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Describe a breach as a percentage of the violated bound, one decimal.
///
/// A zero bound yields a non-finite ratio, rendered as `Infinity`,
/// `-Infinity` or `NaN` rather than clamped.
pub fn describe_deviation(value: f64, breach: Breach) -> String {
    // ---
    match breach.direction {
        BoundType::Below => {
            let pct = (breach.bound - value) / breach.bound * 100.0;
            format!("{}% below minimum", format_percent(pct))
        }
        BoundType::Above => {
            let pct = (value - breach.bound) / breach.bound * 100.0;
            format!("{}% above maximum", format_percent(pct))
        }
    }
}

fn format_percent(pct: f64) -> String {
    if pct.is_nan() {
        "NaN".to_string()
    } else if pct == f64::INFINITY {
        "Infinity".to_string()
    } else if pct == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        format!("{:.1}", pct)
    }
}

// ---

/// Typed `(device, parameter) -> band` lookup.
#[derive(Debug, Clone, Default)]
pub struct ThresholdTable {
    bands: HashMap<String, HashMap<Parameter, ThresholdBand>>,
}

impl ThresholdTable {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored records. Records naming an unknown parameter are
    /// ignored with a warning.
    pub fn from_stored(items: &[StoredThreshold]) -> Self {
        // ---
        let mut table = Self::new();
        for item in items {
            match Parameter::from_key(&item.parameter) {
                Some(parameter) => table.insert(
                    &item.device_id,
                    parameter,
                    ThresholdBand::new(item.min, item.max),
                ),
                None => tracing::warn!(
                    "Ignoring threshold for unknown parameter '{}' on device {}",
                    item.parameter,
                    item.device_id
                ),
            }
        }
        table
    }

    pub fn insert(&mut self, device_id: &str, parameter: Parameter, band: ThresholdBand) {
        self.bands
            .entry(device_id.to_string())
            .or_default()
            .insert(parameter, band);
    }

    /// Band configured for this device, without falling back to defaults.
    pub fn configured(&self, device_id: &str, parameter: Parameter) -> Option<ThresholdBand> {
        self.bands
            .get(device_id)
            .and_then(|by_param| by_param.get(&parameter))
            .copied()
    }

    /// Band in force for this device: configured if present, else the default.
    pub fn band_for(&self, device_id: &str, parameter: Parameter) -> ThresholdBand {
        self.configured(device_id, parameter)
            .unwrap_or_else(|| parameter.default_band())
    }
}
