//! Database access for readings, thresholds and insights.
//!
//! Every function takes the pool explicitly and returns `sqlx::Error`; routes
//! decide how a failure is surfaced.

use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::insights::{AiInsight, InsightRow};
use crate::models::{readings_from_rows, Parameter, Reading, SensorRow, StoredThreshold};

// ---

/// Row cap applied when loading reading history for alerts.
pub const HISTORY_LIMIT: u32 = 500;

/// Filters for a sensor row query.
#[derive(Debug, Clone, Default)]
pub struct SensorQuery {
    pub device_id: Option<String>,
    pub start_ts: Option<String>,
    pub end_ts: Option<String>,
    pub limit: u32,
}

/// Fetch stored sensor rows, newest first.
///
/// Timestamps are compared as stored text. That matches chronological order
/// only for zero-padded `YYYY-MM-DD HH:MM:SS` values; a row such as
/// `2025-03-26 8:05:00` sorts after `2025-03-26 18:00:00`, which can shift the
/// `LIMIT` window and the range bounds. Callers re-sort by parsed time with
/// [`readings_from_rows`].
pub async fn fetch_sensor_rows(
    pool: &PgPool,
    query: &SensorQuery,
) -> Result<Vec<SensorRow>, sqlx::Error> {
    // ---
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        r#"
        SELECT device_id, "timestamp",
               temperature, ph_value, dissolved_oxygen, ammonia,
               nitrate, manganese, turbidity, salinity
        FROM sensor_readings
        WHERE TRUE
        "#,
    );

    if let Some(device_id) = &query.device_id {
        qb.push(" AND device_id = ").push_bind(device_id);
    }
    if let Some(start) = &query.start_ts {
        qb.push(r#" AND "timestamp" >= "#).push_bind(start);
    }
    if let Some(end) = &query.end_ts {
        qb.push(r#" AND "timestamp" <= "#).push_bind(end);
    }
    qb.push(r#" ORDER BY "timestamp" DESC LIMIT "#)
        .push_bind(i64::from(query.limit));

    let rows = qb.build_query_as::<SensorRow>().fetch_all(pool).await?;
    tracing::debug!("Fetched {} sensor rows for {:?}", rows.len(), query);
    Ok(rows)
}

/// Load readings for alert evaluation, newest first, in the local zone.
pub async fn load_readings(
    pool: &PgPool,
    device_id: Option<&str>,
) -> Result<Vec<Reading>, sqlx::Error> {
    // ---
    let query = SensorQuery {
        device_id: device_id.map(str::to_owned),
        limit: HISTORY_LIMIT,
        ..Default::default()
    };
    let rows = fetch_sensor_rows(pool, &query).await?;
    let readings = readings_from_rows(&rows, &Local);

    if readings.len() < rows.len() {
        tracing::warn!(
            "Dropped {} rows with unparseable timestamps",
            rows.len() - readings.len()
        );
    }
    Ok(readings)
}

// ---

/// Stored thresholds for one device, or for every device when `None`.
pub async fn fetch_thresholds(
    pool: &PgPool,
    device_id: Option<&str>,
) -> Result<Vec<StoredThreshold>, sqlx::Error> {
    // ---
    sqlx::query_as::<_, StoredThreshold>(
        r#"
        SELECT device_id, parameter, min, max, updated_at, version
        FROM thresholds
        WHERE $1::TEXT IS NULL OR device_id = $1
        ORDER BY device_id, parameter
        "#,
    )
    .bind(device_id)
    .fetch_all(pool)
    .await
}

/// One `{parameter, min, max}` entry of a threshold write.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdItem {
    pub parameter: String,
    pub min: f64,
    pub max: f64,
}

impl ThresholdItem {
    /// Items written when a device is seeded with defaults.
    pub fn seed_defaults() -> Vec<ThresholdItem> {
        Parameter::SEEDED
            .iter()
            .map(|p| {
                let band = p.default_band();
                ThresholdItem {
                    parameter: p.key().to_string(),
                    min: band.min,
                    max: band.max,
                }
            })
            .collect()
    }
}

/// Upsert thresholds in one transaction, bumping each row's version.
pub async fn upsert_thresholds(
    pool: &PgPool,
    device_id: &str,
    items: &[ThresholdItem],
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;

    for item in items {
        sqlx::query(
            r#"
            INSERT INTO thresholds (device_id, parameter, min, max, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, 1)
            ON CONFLICT (device_id, parameter) DO UPDATE SET
                min        = EXCLUDED.min,
                max        = EXCLUDED.max,
                updated_at = EXCLUDED.updated_at,
                version    = thresholds.version + 1
            "#,
        )
        .bind(device_id)
        .bind(&item.parameter)
        .bind(item.min)
        .bind(item.max)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::debug!("Upserted {} thresholds for {}", items.len(), device_id);
    Ok(())
}

// ---

/// Most recent insights for a device.
pub async fn fetch_insights(
    pool: &PgPool,
    device_id: &str,
    limit: u32,
) -> Result<Vec<AiInsight>, sqlx::Error> {
    // ---
    let rows = sqlx::query_as::<_, InsightRow>(
        r#"
        SELECT device_id, "timestamp", insight_type, severity, title, description,
               ai_summary, confidence_score, affected_metrics, recommendations,
               created_at, expires_at
        FROM ai_insights
        WHERE device_id = $1
        ORDER BY "timestamp" DESC
        LIMIT $2
        "#,
    )
    .bind(device_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(AiInsight::from).collect())
}

/// Store an insight, replacing any with the same `(device_id, timestamp)`.
pub async fn insert_insight(pool: &PgPool, insight: &AiInsight) -> Result<(), sqlx::Error> {
    // ---
    sqlx::query(
        r#"
        INSERT INTO ai_insights (
            device_id, "timestamp", insight_type, severity, title, description,
            ai_summary, confidence_score, affected_metrics, recommendations,
            created_at, expires_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (device_id, "timestamp") DO UPDATE SET
            insight_type     = EXCLUDED.insight_type,
            severity         = EXCLUDED.severity,
            title            = EXCLUDED.title,
            description      = EXCLUDED.description,
            ai_summary       = EXCLUDED.ai_summary,
            confidence_score = EXCLUDED.confidence_score,
            affected_metrics = EXCLUDED.affected_metrics,
            recommendations  = EXCLUDED.recommendations,
            created_at       = EXCLUDED.created_at,
            expires_at       = EXCLUDED.expires_at
        "#,
    )
    .bind(&insight.device_id)
    .bind(insight.timestamp)
    .bind(insight.insight_type.as_str())
    .bind(insight.severity.as_str())
    .bind(&insight.title)
    .bind(&insight.description)
    .bind(&insight.ai_summary)
    .bind(insight.confidence_score)
    .bind(&insight.affected_metrics)
    .bind(&insight.recommendations)
    .bind(insight.created_at)
    .bind(insight.expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_seed_defaults() {
        // ---
        let items = ThresholdItem::seed_defaults();
        let keys: Vec<&str> = items.iter().map(|i| i.parameter.as_str()).collect();
        assert_eq!(keys, vec!["temp", "ph", "ammonia", "turbidity"]);
        assert_eq!(
            items[2],
            ThresholdItem {
                parameter: "ammonia".into(),
                min: 0.0,
                max: 0.25
            }
        );
    }
}
