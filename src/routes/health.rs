// src/routes/health.rs
//! Liveness endpoint for the pondwatch backend.
//!
//! `/health` is polled by container orchestrators and CI. It follows the
//! Explicit Module Boundary Pattern (EMBP): the handler stays private and the
//! gateway (`mod.rs`) merges the exported subrouter.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Handle `GET /health`.
///
/// Reports only that the process is serving; it does not touch the database
/// or the language model runtime.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a subrouter containing the `/health` route.
///
/// Generic over the application state so it merges into the gateway router
/// regardless of the state type.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    // ---
    use crate::routes::test_support::{get, send, test_app};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health_ok_without_database() {
        // ---
        let (status, body) = send(test_app(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "pondwatch");
    }
}
