//! Per-device threshold bands.
//!
//! - `GET /api/thresholds?device_id=..&auto_seed=1` lists stored bands,
//!   seeding the defaults first when the device has none and seeding is asked for.
//! - `PUT /api/thresholds` upserts `{device_id, items}`; an empty item list
//!   writes the defaults.

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, error, info};

use super::{error_response, flag_set, non_empty, AppState};
use crate::{store, Parameter, StoredThreshold, ThresholdItem};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/thresholds", get(list).put(save))
}

#[derive(Debug, Deserialize)]
pub struct ThresholdsQuery {
    device_id: Option<String>,
    auto_seed: Option<String>,
}

#[derive(Serialize)]
struct ThresholdsResponse {
    items: Vec<StoredThreshold>,
}

async fn list(
    Query(params): Query<ThresholdsQuery>,
    State((pool, _summarizer, _cache)): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /api/thresholds - {:?}", params);

    let Some(device_id) = non_empty(params.device_id) else {
        return error_response(StatusCode::BAD_REQUEST, "device_id is required");
    };
    let auto_seed = flag_set(params.auto_seed.as_deref());

    match load_or_seed(&pool, &device_id, auto_seed).await {
        Ok(items) => (StatusCode::OK, Json(ThresholdsResponse { items })).into_response(),
        Err(e) => {
            error!("Failed to get thresholds for {}: {}", device_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get thresholds")
        }
    }
}

async fn load_or_seed(
    pool: &PgPool,
    device_id: &str,
    auto_seed: bool,
) -> Result<Vec<StoredThreshold>, sqlx::Error> {
    // ---
    let items = store::fetch_thresholds(pool, Some(device_id)).await?;
    if !items.is_empty() || !auto_seed {
        return Ok(items);
    }

    debug!("No thresholds for {}, seeding defaults", device_id);
    store::upsert_thresholds(pool, device_id, &ThresholdItem::seed_defaults(), Utc::now()).await?;
    store::fetch_thresholds(pool, Some(device_id)).await
}

#[derive(Debug, Deserialize)]
pub struct ThresholdUpdate {
    device_id: Option<String>,
    #[serde(default)]
    items: Vec<ThresholdItem>,
}

#[derive(Serialize)]
struct SaveResponse {
    ok: bool,
    updated_at: DateTime<Utc>,
}

async fn save(
    State((pool, _summarizer, _cache)): State<AppState>,
    Json(body): Json<ThresholdUpdate>,
) -> impl IntoResponse {
    // ---
    info!("PUT /api/thresholds - device {:?}, {} items", body.device_id, body.items.len());

    let Some(device_id) = non_empty(body.device_id) else {
        return error_response(StatusCode::BAD_REQUEST, "device_id is required");
    };

    let items = if body.items.is_empty() {
        ThresholdItem::seed_defaults()
    } else {
        body.items
    };
    if let Some(unknown) = items.iter().find(|i| Parameter::from_key(&i.parameter).is_none()) {
        let message = format!("unknown parameter: {}", unknown.parameter);
        return error_response(StatusCode::BAD_REQUEST, &message);
    }

    let now = Utc::now();
    match store::upsert_thresholds(&pool, &device_id, &items, now).await {
        Ok(()) => (
            StatusCode::OK,
            Json(SaveResponse {
                ok: true,
                updated_at: now,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to save thresholds for {}: {}", device_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save thresholds")
        }
    }
}
