//! Alert derivation and dashboard rollups.
//!
//! Alerts are never stored: every request recomputes the full list from the
//! readings snapshot, so identifiers must be reproducible from
//! `(device, parameter, timestamp)` alone. Calendar bucketing (day, month) is
//! done in a caller-supplied time zone; the routes pass `chrono::Local`.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::Serialize;

use crate::models::{Parameter, Reading};
use crate::thresholds::{evaluate, Breach, BoundType, ThresholdTable};

// ---

/// One out-of-band parameter value on one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub parameter: Parameter,
    pub value: f64,
    pub threshold_type: BoundType,
    pub threshold: f64,
    pub message: String,
}

/// Sub-second precision is kept only when the timestamp carries it, so two
/// readings within the same second still get distinct ids.
pub fn alert_id(device_id: &str, parameter: Parameter, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        device_id,
        parameter.key(),
        timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    )
}

pub fn alert_message(parameter: Parameter, value: f64, breach: Breach) -> String {
    let side = match breach.direction {
        BoundType::Below => "low",
        BoundType::Above => "high",
    };
    format!(
        "{} is too {}: {} (threshold: {})",
        parameter.label(),
        side,
        value,
        breach.bound
    )
}

/// Evaluate every present parameter of every reading against its band.
///
/// The result is sorted most recent first. The sort is stable: alerts sharing
/// a timestamp keep reading order, then parameter order.
pub fn build_alerts(readings: &[Reading], table: &ThresholdTable) -> Vec<Alert> {
    // ---
    let mut alerts = Vec::new();

    for reading in readings {
        for parameter in Parameter::ALL {
            let Some(value) = reading.values.get(parameter) else {
                continue;
            };
            let band = table.band_for(&reading.device_id, parameter);
            if let Some(breach) = evaluate(value, band) {
                alerts.push(Alert {
                    id: alert_id(&reading.device_id, parameter, reading.timestamp),
                    timestamp: reading.timestamp,
                    device_id: reading.device_id.clone(),
                    parameter,
                    value,
                    threshold_type: breach.direction,
                    threshold: breach.bound,
                    message: alert_message(parameter, value, breach),
                });
            }
        }
    }

    alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    tracing::debug!(
        "Built {} alerts from {} readings",
        alerts.len(),
        readings.len()
    );
    alerts
}

/// Alerts falling on the same local calendar day as the most recent alert.
pub fn latest_day_alerts<Tz: TimeZone>(alerts: &[Alert], tz: &Tz) -> Vec<Alert> {
    // ---
    let Some(latest) = alerts.iter().map(|a| a.timestamp).max() else {
        return Vec::new();
    };
    let day = latest.with_timezone(tz).date_naive();

    alerts
        .iter()
        .filter(|a| a.timestamp.with_timezone(tz).date_naive() == day)
        .cloned()
        .collect()
}

// ---

/// Wholesale aggregate over an alert list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub total_alerts: usize,
    pub by_parameter: BTreeMap<Parameter, usize>,
    pub by_month: BTreeMap<String, usize>,
}

impl AlertSummary {
    pub fn from_alerts<Tz: TimeZone>(alerts: &[Alert], tz: &Tz) -> Self {
        Self {
            total_alerts: alerts.len(),
            by_parameter: by_parameter(alerts),
            by_month: by_month(alerts, tz),
        }
    }
}

/// Alert count per parameter. Every tracked parameter has a key.
pub fn by_parameter(alerts: &[Alert]) -> BTreeMap<Parameter, usize> {
    // ---
    let mut counts: BTreeMap<Parameter, usize> = Parameter::ALL.iter().map(|p| (*p, 0)).collect();
    for alert in alerts {
        *counts.entry(alert.parameter).or_insert(0) += 1;
    }
    counts
}

/// Alert count per local `"month/year"` bucket, e.g. `"3/2025"`.
pub fn by_month<Tz: TimeZone>(alerts: &[Alert], tz: &Tz) -> BTreeMap<String, usize> {
    // ---
    let mut counts = BTreeMap::new();
    for alert in alerts {
        let local = alert.timestamp.with_timezone(tz);
        let key = format!("{}/{}", local.month(), local.year());
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

/// Current vs previous calendar month alert counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyStats {
    pub current_month: String,
    pub current_value: usize,
    pub previous_month: String,
    pub previous_value: usize,
    pub difference: i64,
}

/// Compare the month of the most recent alert with the month before it.
pub fn monthly_stats<Tz: TimeZone>(alerts: &[Alert], tz: &Tz) -> MonthlyStats {
    // ---
    let Some(latest) = alerts.iter().map(|a| a.timestamp).max() else {
        return MonthlyStats {
            current_month: "N/A".to_string(),
            current_value: 0,
            previous_month: "N/A".to_string(),
            previous_value: 0,
            difference: 0,
        };
    };

    let latest = latest.with_timezone(tz);
    let current = (latest.year(), latest.month());
    let previous = if current.1 == 1 {
        (current.0 - 1, 12)
    } else {
        (current.0, current.1 - 1)
    };

    let count_in = |(year, month): (i32, u32)| {
        alerts
            .iter()
            .map(|a| a.timestamp.with_timezone(tz))
            .filter(|t| t.year() == year && t.month() == month)
            .count()
    };
    let current_value = count_in(current);
    let previous_value = count_in(previous);

    MonthlyStats {
        current_month: month_label(current),
        current_value,
        previous_month: month_label(previous),
        previous_value,
        difference: current_value as i64 - previous_value as i64,
    }
}

fn month_label((year, month): (i32, u32)) -> String {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.format("%b %Y").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Share of eligible readings that raised an alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertProportion {
    pub percentage: f64,
    pub message_count: usize,
}

/// Number of `(reading, parameter)` pairs carrying a value.
pub fn eligible_reading_count(readings: &[Reading]) -> usize {
    readings
        .iter()
        .map(|r| {
            Parameter::ALL
                .iter()
                .filter(|p| r.values.get(**p).is_some())
                .count()
        })
        .sum()
}

/// `alert_count / eligible * 100`, rounded to one decimal; `0` when nothing
/// is eligible.
pub fn proportion(readings: &[Reading], alert_count: usize) -> AlertProportion {
    // ---
    let eligible = eligible_reading_count(readings);
    let percentage = if eligible > 0 {
        alert_count as f64 / eligible as f64 * 100.0
    } else {
        0.0
    };

    AlertProportion {
        percentage: (percentage * 10.0).round() / 10.0,
        message_count: alert_count,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub value: usize,
}

/// Non-zero parameter counts labelled for display.
pub fn by_category(summary: &AlertSummary) -> Vec<CategoryCount> {
    summary
        .by_parameter
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(parameter, count)| CategoryCount {
            category: parameter.label().to_string(),
            value: *count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{SensorValues, ThresholdBand};
    use chrono::{FixedOffset, TimeZone, Utc};

    fn reading_at(device: &str, ts: DateTime<Utc>, values: SensorValues) -> Reading {
        Reading {
            device_id: device.to_string(),
            timestamp: ts,
            values,
        }
    }

    fn hot_reading(ts: DateTime<Utc>) -> Reading {
        reading_at(
            "pond-A",
            ts,
            SensorValues {
                temperature: Some(35.0),
                ..Default::default()
            },
        )
    }

    fn alert_at(ts: DateTime<Utc>) -> Alert {
        let mut alerts = build_alerts(&[hot_reading(ts)], &ThresholdTable::new());
        alerts.remove(0)
    }

    #[test]
    fn test_builds_one_alert_per_breaching_parameter() {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let reading = reading_at(
            "pond-A",
            ts,
            SensorValues {
                temperature: Some(12.0),
                ph: Some(7.0),
                ammonia: Some(0.6),
                turbidity: None,
                ..Default::default()
            },
        );
        let alerts = build_alerts(&[reading], &ThresholdTable::new());

        assert_eq!(alerts.len(), 2);
        let temp = &alerts[0];
        assert_eq!(temp.parameter, Parameter::Temp);
        assert_eq!(temp.threshold_type, BoundType::Below);
        assert_eq!(temp.threshold, 15.0);
        assert_eq!(temp.message, "Temp is too low: 12 (threshold: 15)");
        assert_eq!(temp.id, "pond-A-temp-2025-03-26T18:45:00Z");

        let ammonia = &alerts[1];
        assert_eq!(ammonia.threshold_type, BoundType::Above);
        assert_eq!(ammonia.message, "Ammonia is too high: 0.6 (threshold: 0.25)");
    }

    #[test]
    fn test_ids_distinct_within_one_second() {
        // ---
        let base = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let readings = vec![
            hot_reading(base + chrono::Duration::milliseconds(900)),
            hot_reading(base + chrono::Duration::milliseconds(100)),
        ];
        let alerts = build_alerts(&readings, &ThresholdTable::new());

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].id, "pond-A-temp-2025-03-26T18:45:00.900Z");
        assert_eq!(alerts[1].id, "pond-A-temp-2025-03-26T18:45:00.100Z");
        assert_ne!(alerts[0].id, alerts[1].id);
    }

    #[test]
    fn test_same_timestamp_keeps_reading_then_parameter_order() {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let earlier = ts - chrono::Duration::hours(1);
        let both = SensorValues {
            temperature: Some(35.0),
            ammonia: Some(0.6),
            ..Default::default()
        };
        let readings = vec![
            reading_at("pond-B", ts, both),
            reading_at("pond-A", earlier, both),
            reading_at("pond-A", ts, both),
        ];
        let alerts = build_alerts(&readings, &ThresholdTable::new());

        let order: Vec<(&str, Parameter)> = alerts
            .iter()
            .map(|a| (a.device_id.as_str(), a.parameter))
            .collect();
        assert_eq!(
            order,
            vec![
                ("pond-B", Parameter::Temp),
                ("pond-B", Parameter::Ammonia),
                ("pond-A", Parameter::Temp),
                ("pond-A", Parameter::Ammonia),
                ("pond-A", Parameter::Temp),
                ("pond-A", Parameter::Ammonia),
            ]
        );
        assert_eq!(alerts[4].timestamp, earlier);
    }

    #[test]
    fn test_device_band_overrides_default() {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let mut table = ThresholdTable::new();
        table.insert("pond-A", Parameter::Temp, ThresholdBand::new(10.0, 40.0));

        let alerts = build_alerts(&[hot_reading(ts)], &table);
        assert!(alerts.is_empty());

        let other = reading_at("pond-B", ts, hot_reading(ts).values);
        assert_eq!(build_alerts(&[other], &table).len(), 1);
    }

    #[test]
    fn test_alerts_sorted_newest_first_and_idempotent() {
        // ---
        let readings: Vec<Reading> = [3, 1, 4, 1, 5]
            .iter()
            .map(|d| hot_reading(Utc.with_ymd_and_hms(2025, 3, *d, 8, 0, 0).unwrap()))
            .collect();
        let table = ThresholdTable::new();

        let first = build_alerts(&readings, &table);
        assert_eq!(first.len(), 5);
        assert!(first.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let second = build_alerts(&readings, &table);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_input_yields_empty_rollups() {
        // ---
        let alerts = build_alerts(&[], &ThresholdTable::new());
        assert!(alerts.is_empty());

        let summary = AlertSummary::from_alerts(&alerts, &Utc);
        assert_eq!(summary.total_alerts, 0);
        assert_eq!(summary.by_parameter.len(), Parameter::ALL.len());
        assert!(summary.by_parameter.values().all(|c| *c == 0));
        assert!(summary.by_month.is_empty());
        assert!(by_category(&summary).is_empty());

        let stats = monthly_stats(&alerts, &Utc);
        assert_eq!(stats.current_month, "N/A");
        assert_eq!(stats.difference, 0);

        assert!(latest_day_alerts(&alerts, &Utc).is_empty());
    }

    #[test]
    fn test_monthly_stats_difference() {
        // ---
        let mut alerts = Vec::new();
        for day in 1..=7 {
            alerts.push(alert_at(Utc.with_ymd_and_hms(2025, 4, day, 12, 0, 0).unwrap()));
        }
        for day in 1..=3 {
            alerts.push(alert_at(Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()));
        }

        let stats = monthly_stats(&alerts, &Utc);
        assert_eq!(stats.current_month, "Apr 2025");
        assert_eq!(stats.current_value, 7);
        assert_eq!(stats.previous_month, "Mar 2025");
        assert_eq!(stats.previous_value, 3);
        assert_eq!(stats.difference, 4);
    }

    #[test]
    fn test_monthly_stats_year_rollover_and_negative_difference() {
        // ---
        let alerts = vec![
            alert_at(Utc.with_ymd_and_hms(2025, 1, 2, 12, 0, 0).unwrap()),
            alert_at(Utc.with_ymd_and_hms(2024, 12, 30, 12, 0, 0).unwrap()),
            alert_at(Utc.with_ymd_and_hms(2024, 12, 29, 12, 0, 0).unwrap()),
        ];
        let stats = monthly_stats(&alerts, &Utc);
        assert_eq!(stats.current_month, "Jan 2025");
        assert_eq!(stats.previous_month, "Dec 2024");
        assert_eq!(stats.difference, -1);
    }

    #[test]
    fn test_by_month_uses_local_calendar() {
        // ---
        // 23:30 UTC on Mar 31 is already April 1 at UTC+2.
        let alert = alert_at(Utc.with_ymd_and_hms(2025, 3, 31, 23, 30, 0).unwrap());
        let plus2 = FixedOffset::east_opt(2 * 3600).unwrap();

        let utc_months = by_month(std::slice::from_ref(&alert), &Utc);
        assert_eq!(utc_months.get("3/2025"), Some(&1));

        let local_months = by_month(std::slice::from_ref(&alert), &plus2);
        assert_eq!(local_months.get("4/2025"), Some(&1));
        assert_eq!(local_months.get("3/2025"), None);
    }

    #[test]
    fn test_latest_day_alerts() {
        // ---
        let alerts = vec![
            alert_at(Utc.with_ymd_and_hms(2025, 3, 26, 18, 0, 0).unwrap()),
            alert_at(Utc.with_ymd_and_hms(2025, 3, 26, 4, 0, 0).unwrap()),
            alert_at(Utc.with_ymd_and_hms(2025, 3, 25, 23, 0, 0).unwrap()),
        ];
        assert_eq!(latest_day_alerts(&alerts, &Utc).len(), 2);

        // At UTC-5 the 04:00 UTC alert belongs to Mar 25.
        let minus5 = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(latest_day_alerts(&alerts, &minus5).len(), 1);
    }

    #[test]
    fn test_summary_and_categories() {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let reading = reading_at(
            "pond-A",
            ts,
            SensorValues {
                temperature: Some(35.0),
                ph: Some(10.0),
                ..Default::default()
            },
        );
        let alerts = build_alerts(&[reading.clone(), hot_reading(ts)], &ThresholdTable::new());
        let summary = AlertSummary::from_alerts(&alerts, &Utc);

        assert_eq!(summary.total_alerts, 3);
        assert_eq!(summary.by_parameter[&Parameter::Temp], 2);
        assert_eq!(summary.by_parameter[&Parameter::Ph], 1);
        assert_eq!(summary.by_parameter[&Parameter::Salinity], 0);
        assert_eq!(summary.by_month.get("3/2025"), Some(&3));

        let categories = by_category(&summary);
        assert_eq!(
            categories,
            vec![
                CategoryCount { category: "Temp".into(), value: 2 },
                CategoryCount { category: "Ph".into(), value: 1 },
            ]
        );
    }

    #[test]
    fn test_proportion_counts_present_values_only() {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let readings = vec![
            reading_at(
                "pond-A",
                ts,
                SensorValues {
                    temperature: Some(20.0),
                    ph: Some(7.0),
                    ammonia: Some(0.1),
                    ..Default::default()
                },
            ),
            reading_at("pond-A", ts, SensorValues::default()),
        ];
        assert_eq!(eligible_reading_count(&readings), 3);

        let p = proportion(&readings, 1);
        assert_eq!(p.percentage, 33.3);
        assert_eq!(p.message_count, 1);
    }

    #[test]
    fn test_proportion_guards_divide_by_zero() {
        // ---
        let p = proportion(&[], 0);
        assert_eq!(p.percentage, 0.0);
        assert!(p.percentage.is_finite());
    }
}
