//! HTTP route gateway.
//!
//! Each sibling module exports a subrouter over the shared [`AppState`];
//! `main.rs` only sees [`router`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;

use crate::{ReadingCache, Summarizer};

mod ai_insights;
mod alerts;
mod health;
mod sensor_data;
mod thresholds;

// ---

/// Router state: database pool, insight summarizer, reading cache.
pub type AppState = (PgPool, Summarizer, ReadingCache);

pub fn router(pool: PgPool, summarizer: Summarizer, cache: ReadingCache) -> Router {
    // ---
    Router::new()
        .merge(sensor_data::router())
        .merge(thresholds::router())
        .merge(alerts::router())
        .merge(ai_insights::router())
        .merge(health::router())
        .with_state((pool, summarizer, cache))
}

/// JSON `{"error": message}` body with the given status.
fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Treat empty query values as absent.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Query flags accept `1` or `true`.
fn flag_set(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}


#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_flags_and_empty_values() {
        // ---
        assert!(flag_set(Some("1")));
        assert!(flag_set(Some("true")));
        assert!(!flag_set(Some("yes")));
        assert!(!flag_set(None));

        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some("pond-A".into())), Some("pond-A".into()));
    }
}
