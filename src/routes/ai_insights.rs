//! AI insight records per device.
//!
//! `GET` serves stored insights, generating a fresh one first when the
//! regeneration policy says so. Generation problems are logged and the stored
//! insights are returned instead. `POST` stores a client-submitted insight.

use anyhow::{Context, Result};
use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, error, info};

use super::{error_response, flag_set, non_empty, AppState};
use crate::{
    insights, readings_from_rows, store, AiInsight, NewInsight, SensorQuery, Summarizer,
    ThresholdTable,
};

// ---

const DEFAULT_INSIGHT_LIMIT: u32 = 5;
const MAX_INSIGHT_LIMIT: u32 = 100;

/// Readings scanned when generating an insight.
const GENERATION_SAMPLE: u32 = 50;

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/ai-insights", get(list).post(create))
}

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    device_id: Option<String>,
    refresh: Option<String>,
    limit: Option<String>,
}

#[derive(Serialize)]
struct InsightsResponse {
    data: Vec<AiInsight>,
    total: usize,
    last_updated: DateTime<Utc>,
}

impl InsightsResponse {
    fn new(data: Vec<AiInsight>) -> Self {
        Self {
            total: data.len(),
            data,
            last_updated: Utc::now(),
        }
    }
}

async fn list(
    Query(params): Query<InsightsQuery>,
    State((pool, summarizer, _cache)): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /api/ai-insights - {:?}", params);

    let Some(device_id) = non_empty(params.device_id) else {
        return error_response(StatusCode::BAD_REQUEST, "device_id is required");
    };
    let force_refresh = flag_set(params.refresh.as_deref());
    let limit = params
        .limit
        .as_deref()
        .and_then(|l| l.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_INSIGHT_LIMIT)
        .min(MAX_INSIGHT_LIMIT);

    let existing = match store::fetch_insights(&pool, &device_id, limit).await {
        Ok(existing) => existing,
        Err(e) => {
            error!("Failed to fetch AI insights for {}: {}", device_id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch AI insights");
        }
    };

    let now = Utc::now();
    if insights::should_regenerate(&existing, force_refresh, now) {
        match generate(&pool, &summarizer, &device_id, now).await {
            Ok(Some(insight)) => {
                info!("Generated {} insight for {}", insight.insight_type, device_id);
                return (StatusCode::OK, Json(InsightsResponse::new(vec![insight]))).into_response();
            }
            Ok(None) => debug!("No readings for {}, serving stored insights", device_id),
            Err(e) => error!("Error generating AI insights for {}: {:#}", device_id, e),
        }
    }

    (StatusCode::OK, Json(InsightsResponse::new(existing))).into_response()
}

/// Build and store a new insight from the device's latest reading.
///
/// Returns `None` when the device has no readings.
async fn generate(
    pool: &PgPool,
    summarizer: &Summarizer,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<AiInsight>> {
    // ---
    let thresholds = store::fetch_thresholds(pool, Some(device_id))
        .await
        .context("Failed to load thresholds")?;
    let table = ThresholdTable::from_stored(&thresholds);

    let query = SensorQuery {
        device_id: Some(device_id.to_string()),
        limit: GENERATION_SAMPLE,
        ..Default::default()
    };
    let rows = store::fetch_sensor_rows(pool, &query)
        .await
        .context("Failed to load sensor rows")?;
    let readings = readings_from_rows(&rows, &Local);

    let Some(latest) = readings.first() else {
        return Ok(None);
    };

    let anomalies = insights::detect_anomalies(latest, &table);
    debug!("{} anomalies on latest reading for {}", anomalies.len(), device_id);

    let prompt = insights::build_prompt(device_id, latest, &anomalies, &thresholds);
    let ai_summary = summarizer
        .summarize(device_id, &prompt, !anomalies.is_empty())
        .await;

    let insight = insights::build_insight(device_id, &anomalies, ai_summary, now);
    store::insert_insight(pool, &insight)
        .await
        .context("Failed to store insight")?;

    Ok(Some(insight))
}

#[derive(Serialize)]
struct CreatedResponse {
    success: bool,
    insight: AiInsight,
}

async fn create(
    State((pool, _summarizer, _cache)): State<AppState>,
    Json(body): Json<NewInsight>,
) -> impl IntoResponse {
    // ---
    info!("POST /api/ai-insights - device {:?}", body.device_id);

    let insight = match body.into_insight(Utc::now()) {
        Ok(insight) => insight,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    match store::insert_insight(&pool, &insight).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(CreatedResponse {
                success: true,
                insight,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Error creating AI insight: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create AI insight")
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::routes::test_support::{get, send, test_app, with_json};
    use serde_json::json;

    #[tokio::test]
    async fn test_get_requires_device_id() {
        // ---
        let (status, body) = send(test_app(), get("/api/ai-insights?refresh=true")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "device_id is required");
    }

    #[tokio::test]
    async fn test_post_missing_fields() {
        // ---
        let request = with_json("POST", "/api/ai-insights", json!({ "device_id": "pond-A" }));
        let (status, body) = send(test_app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required fields");
    }

    #[tokio::test]
    async fn test_post_store_failure_is_500() {
        // ---
        let request = with_json(
            "POST",
            "/api/ai-insights",
            json!({
                "device_id": "pond-A",
                "insight_type": "recommendation",
                "title": "Aerate",
                "description": "Dissolved oxygen trending down"
            }),
        );
        let (status, body) = send(test_app(), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to create AI insight");
    }
}
