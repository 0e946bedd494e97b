//! `GET /api/sensor-data`: stored sensor rows, newest first.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{error_response, non_empty, AppState};
use crate::{store, SensorQuery, SensorRow};

// ---

const DEFAULT_LIMIT: u32 = 500;
const FALLBACK_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/sensor-data", get(handler))
}

/// Query parameters for `/api/sensor-data`.
#[derive(Debug, Deserialize)]
pub struct SensorDataQuery {
    device_id: Option<String>,
    /// Row cap; absent means 500, unparseable or zero means 100, max 1000.
    limit: Option<String>,
    /// Inclusive lower bound, same text format as stored timestamps.
    start_ts: Option<String>,
    /// Inclusive upper bound.
    end_ts: Option<String>,
}

#[derive(Serialize)]
struct SensorDataResponse {
    data: Vec<SensorRow>,
}

async fn handler(
    Query(params): Query<SensorDataQuery>,
    State((pool, _summarizer, _cache)): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /api/sensor-data - {:?}", params);

    let query = SensorQuery {
        device_id: non_empty(params.device_id),
        start_ts: non_empty(params.start_ts),
        end_ts: non_empty(params.end_ts),
        limit: resolve_limit(params.limit.as_deref()),
    };

    match store::fetch_sensor_rows(&pool, &query).await {
        Ok(rows) => {
            let data: Vec<SensorRow> = rows.into_iter().map(SensorRow::normalized).collect();
            info!("Returning {} sensor rows", data.len());
            (StatusCode::OK, Json(SensorDataResponse { data })).into_response()
        }
        Err(e) => {
            error!("Failed to fetch sensor data: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch data")
        }
    }
}

fn resolve_limit(raw: Option<&str>) -> u32 {
    // ---
    match raw {
        None => DEFAULT_LIMIT,
        Some(s) => s
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(FALLBACK_LIMIT)
            .min(MAX_LIMIT),
    }
}
