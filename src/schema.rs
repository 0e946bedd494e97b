//! Database schema management for `pondwatch`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `sensor_readings` (raw device samples), `thresholds` (per-device
/// bands) and `ai_insights` (generated and submitted insights). Safe to call
/// on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Sensor samples as written by the devices. Timestamps stay as text
    // because device formats vary; parsing happens on load.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id               SERIAL PRIMARY KEY,
            device_id        TEXT NOT NULL,
            "timestamp"      TEXT NOT NULL,
            temperature      DOUBLE PRECISION,
            ph_value         DOUBLE PRECISION,
            dissolved_oxygen DOUBLE PRECISION,
            ammonia          DOUBLE PRECISION,
            nitrate          DOUBLE PRECISION,
            manganese        DOUBLE PRECISION,
            turbidity        DOUBLE PRECISION,
            salinity         DOUBLE PRECISION
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS thresholds (
            device_id  TEXT             NOT NULL,
            parameter  TEXT             NOT NULL,
            min        DOUBLE PRECISION NOT NULL,
            max        DOUBLE PRECISION NOT NULL,
            updated_at TIMESTAMPTZ      NOT NULL,
            version    INTEGER          NOT NULL DEFAULT 1,
            PRIMARY KEY (device_id, parameter)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ai_insights (
            device_id        TEXT             NOT NULL,
            "timestamp"      TIMESTAMPTZ      NOT NULL,
            insight_type     TEXT             NOT NULL,
            severity         TEXT             NOT NULL,
            title            TEXT             NOT NULL,
            description      TEXT             NOT NULL,
            ai_summary       TEXT             NOT NULL,
            confidence_score DOUBLE PRECISION NOT NULL,
            affected_metrics TEXT[]           NOT NULL DEFAULT '{}',
            recommendations  TEXT[]           NOT NULL DEFAULT '{}',
            created_at       TIMESTAMPTZ      NOT NULL,
            expires_at       TIMESTAMPTZ,
            PRIMARY KEY (device_id, "timestamp")
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Readings are always queried by device and time range
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_device_ts
            ON sensor_readings (device_id, "timestamp" DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_ts
            ON sensor_readings ("timestamp" DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
