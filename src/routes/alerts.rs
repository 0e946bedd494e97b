//! Alert list and dashboard rollups.
//!
//! Alerts are recomputed from the cached readings snapshot on every request.
//! A failed readings load is logged and treated as an empty snapshot, so these
//! routes answer "no alerts" rather than an error.

use std::sync::Arc;

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use super::{flag_set, non_empty, AppState};
use crate::{
    alerts, store, Alert, AlertProportion, AlertSummary, CategoryCount, MonthlyStats, Reading,
    ReadingCache, ThresholdTable,
};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/alerts", get(list))
        .route("/api/alerts/latest-day", get(latest_day))
        .route("/api/alerts/summary", get(summary))
}

/// Query parameters shared by the alert routes.
#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    device_id: Option<String>,
    /// `true` or `1` reloads readings instead of using the cached snapshot.
    refresh: Option<String>,
}

#[derive(Serialize)]
struct AlertsResponse {
    alerts: Vec<Alert>,
}

#[derive(Serialize)]
struct SummaryResponse {
    summary: AlertSummary,
    monthly: MonthlyStats,
    proportion: AlertProportion,
    by_category: Vec<CategoryCount>,
}

async fn list(
    Query(params): Query<AlertsQuery>,
    State((pool, _summarizer, cache)): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /api/alerts - {:?}", params);
    let (_, alerts) = collect_alerts(&pool, &cache, params).await;
    info!("Returning {} alerts", alerts.len());
    (StatusCode::OK, Json(AlertsResponse { alerts }))
}

async fn latest_day(
    Query(params): Query<AlertsQuery>,
    State((pool, _summarizer, cache)): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /api/alerts/latest-day - {:?}", params);
    let (_, all) = collect_alerts(&pool, &cache, params).await;
    let alerts = alerts::latest_day_alerts(&all, &Local);
    info!("Returning {} of {} alerts", alerts.len(), all.len());
    (StatusCode::OK, Json(AlertsResponse { alerts }))
}

async fn summary(
    Query(params): Query<AlertsQuery>,
    State((pool, _summarizer, cache)): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /api/alerts/summary - {:?}", params);
    let (readings, all) = collect_alerts(&pool, &cache, params).await;

    let summary = AlertSummary::from_alerts(&all, &Local);
    let response = SummaryResponse {
        monthly: alerts::monthly_stats(&all, &Local),
        proportion: alerts::proportion(&readings, all.len()),
        by_category: alerts::by_category(&summary),
        summary,
    };
    (StatusCode::OK, Json(response))
}

/// Load readings and bands, then derive the alert list.
///
/// Never fails: a readings error yields an empty snapshot, a thresholds error
/// falls back to default bands.
async fn collect_alerts(
    pool: &PgPool,
    cache: &ReadingCache,
    params: AlertsQuery,
) -> (Arc<Vec<Reading>>, Vec<Alert>) {
    // ---
    let device_id = non_empty(params.device_id);
    let device_id = device_id.as_deref();
    let force_refresh = flag_set(params.refresh.as_deref());

    // An unfiltered refresh makes every per-device snapshot stale as well
    if force_refresh && device_id.is_none() {
        cache.clear().await;
    }

    let readings = match cache
        .load(device_id, force_refresh, || store::load_readings(pool, device_id))
        .await
    {
        Ok(readings) => readings,
        Err(e) => {
            error!("Failed to load readings for {:?}: {}", device_id, e);
            Arc::new(Vec::new())
        }
    };

    let table = match store::fetch_thresholds(pool, device_id).await {
        Ok(stored) => ThresholdTable::from_stored(&stored),
        Err(e) => {
            warn!("Failed to load thresholds, using defaults: {}", e);
            ThresholdTable::new()
        }
    };

    debug!(
        "Evaluating {} readings ({} cached snapshots)",
        readings.len(),
        cache.len().await
    );
    let alerts = alerts::build_alerts(&readings, &table);
    (readings, alerts)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::SensorValues;
    use crate::routes::test_support::{get, send, test_app, test_app_with_cache};
    use chrono::{TimeZone, Utc};

    fn hot_snapshot() -> Vec<Reading> {
        vec![Reading {
            device_id: "pond-A".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap(),
            values: SensorValues {
                temperature: Some(35.0),
                ..Default::default()
            },
        }]
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_empty_alerts() {
        // ---
        let (status, body) = send(test_app(), get("/api/alerts?device_id=pond-A")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alerts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_zeroed_summary() {
        // ---
        let (status, body) = send(test_app(), get("/api/alerts/summary?refresh=true")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["total_alerts"], 0);
        assert_eq!(body["summary"]["by_parameter"]["temp"], 0);
        assert_eq!(body["summary"]["by_parameter"]["salinity"], 0);
        assert_eq!(body["monthly"]["current_month"], "N/A");
        assert_eq!(body["proportion"]["percentage"], 0.0);
        assert_eq!(body["by_category"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_latest_day_on_empty_snapshot() {
        // ---
        let (status, body) = send(test_app(), get("/api/alerts/latest-day")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alerts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_cached_snapshot_serves_alerts() {
        // ---
        let cache = ReadingCache::default();
        cache.insert(Some("pond-A"), hot_snapshot()).await;

        let (status, body) = send(
            test_app_with_cache(cache.clone()),
            get("/api/alerts?device_id=pond-A"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alerts"][0]["id"], "pond-A-temp-2025-03-26T18:45:00Z");
        assert_eq!(body["alerts"][0]["threshold_type"], "above");
    }

    #[tokio::test]
    async fn test_unfiltered_refresh_clears_every_snapshot() {
        // ---
        let cache = ReadingCache::default();
        cache.insert(Some("pond-A"), hot_snapshot()).await;
        cache.insert(None, hot_snapshot()).await;

        let (status, body) =
            send(test_app_with_cache(cache.clone()), get("/api/alerts?refresh=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alerts"], serde_json::json!([]));
        assert_eq!(cache.len().await, 0);
    }
}
