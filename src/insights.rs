//! AI insights for a single device.
//!
//! Rule-based anomaly detection on the most recent reading is the source of
//! truth: it decides the insight type, severity, title and description. The
//! hosted language model only contributes the free-text `ai_summary`, and any
//! failure there degrades to a fixed fallback sentence.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::models::{Parameter, Reading, StoredThreshold};
use crate::thresholds::{classify_severity, describe_deviation, evaluate, Severity, ThresholdTable};

// ---

/// Parameters checked for anomalies.
const ANOMALY_PARAMETERS: [Parameter; 4] = [
    Parameter::Temp,
    Parameter::Ph,
    Parameter::Ammonia,
    Parameter::Turbidity,
];

/// Parameters listed as "current readings" in the prompt, in prompt order.
const PROMPT_PARAMETERS: [Parameter; 5] = [
    Parameter::Ammonia,
    Parameter::Ph,
    Parameter::Salinity,
    Parameter::Temp,
    Parameter::Turbidity,
];

const REGENERATE_AFTER_HOURS: i64 = 24;
const INSIGHT_TTL_DAYS: i64 = 7;

const MAX_TOKENS: u32 = 150;
const TEMPERATURE: f64 = 0.1;
const TOP_P: f64 = 0.9;

/// One out-of-band value on the latest reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub metric: String,
    pub value: f64,
    pub threshold_range: (f64, f64),
    pub deviation: String,
    pub severity: Severity,
}

/// Check the latest reading against the device's configured bands.
///
/// Parameters without a configured band are skipped rather than checked
/// against defaults.
pub fn detect_anomalies(latest: &Reading, table: &ThresholdTable) -> Vec<Anomaly> {
    // ---
    ANOMALY_PARAMETERS
        .iter()
        .filter_map(|parameter| {
            let value = latest.values.get(*parameter)?;
            let band = table.configured(&latest.device_id, *parameter)?;
            let breach = evaluate(value, band)?;
            Some(Anomaly {
                metric: parameter.column().to_string(),
                value,
                threshold_range: (band.min, band.max),
                deviation: describe_deviation(value, breach),
                severity: classify_severity(value, band),
            })
        })
        .collect()
}

/// Worst anomaly severity; `Low` when there are none.
pub fn overall_severity(anomalies: &[Anomaly]) -> Severity {
    // ---
    if anomalies.is_empty() {
        return Severity::Low;
    }
    if anomalies.iter().any(|a| a.severity == Severity::Critical) {
        Severity::Critical
    } else if anomalies.iter().any(|a| a.severity == Severity::High) {
        Severity::High
    } else {
        Severity::Medium
    }
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Anomaly,
    Forecast,
    Summary,
    Recommendation,
}

impl InsightType {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightType::Anomaly => "anomaly",
            InsightType::Forecast => "forecast",
            InsightType::Summary => "summary",
            InsightType::Recommendation => "recommendation",
        }
    }
}

impl fmt::Display for InsightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anomaly" => Ok(InsightType::Anomaly),
            "forecast" => Ok(InsightType::Forecast),
            "summary" => Ok(InsightType::Summary),
            "recommendation" => Ok(InsightType::Recommendation),
            other => Err(format!("unknown insight type: {}", other)),
        }
    }
}

/// A stored insight record for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInsight {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub insight_type: InsightType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub ai_summary: String,
    pub confidence_score: f64,
    pub affected_metrics: Vec<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Insight row as stored; enum columns are plain text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InsightRow {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub insight_type: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub ai_summary: String,
    pub confidence_score: f64,
    pub affected_metrics: Vec<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<InsightRow> for AiInsight {
    fn from(row: InsightRow) -> Self {
        // ---
        let insight_type = row.insight_type.parse().unwrap_or_else(|e| {
            tracing::warn!("{} on insight for {}, treating as summary", e, row.device_id);
            InsightType::Summary
        });
        let severity = row.severity.parse().unwrap_or_else(|e| {
            tracing::warn!("{} on insight for {}, treating as medium", e, row.device_id);
            Severity::Medium
        });

        AiInsight {
            device_id: row.device_id,
            timestamp: row.timestamp,
            insight_type,
            severity,
            title: row.title,
            description: row.description,
            ai_summary: row.ai_summary,
            confidence_score: row.confidence_score,
            affected_metrics: row.affected_metrics,
            recommendations: row.recommendations,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

/// Assemble a generated insight from detected anomalies.
pub fn build_insight(
    device_id: &str,
    anomalies: &[Anomaly],
    ai_summary: String,
    now: DateTime<Utc>,
) -> AiInsight {
    // ---
    let has_anomalies = !anomalies.is_empty();
    let metrics: Vec<String> = anomalies.iter().map(|a| a.metric.clone()).collect();

    let (insight_type, title, description, confidence_score, recommendations) = if has_anomalies {
        let violations = anomalies
            .iter()
            .map(|a| {
                format!(
                    "{} = {:.2} (range: {}-{}, {})",
                    a.metric, a.value, a.threshold_range.0, a.threshold_range.1, a.deviation
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        (
            InsightType::Anomaly,
            format!("Threshold Alert: {}", metrics.join(", ")),
            format!("Threshold violations: {}", violations),
            0.9,
            vec![
                "Check sensor calibration",
                "Review threshold settings",
                "Monitor water quality parameters",
                "Consider adjusting feeding schedule",
            ],
        )
    } else {
        (
            InsightType::Summary,
            "All Parameters Normal".to_string(),
            "All sensor readings are within configured threshold ranges".to_string(),
            0.95,
            vec![
                "Continue regular monitoring",
                "Maintain current operational parameters",
            ],
        )
    };

    AiInsight {
        device_id: device_id.to_string(),
        timestamp: now,
        insight_type,
        severity: overall_severity(anomalies),
        title,
        description,
        ai_summary,
        confidence_score,
        affected_metrics: metrics,
        recommendations: recommendations.into_iter().map(String::from).collect(),
        created_at: now,
        expires_at: Some(now + chrono::Duration::days(INSIGHT_TTL_DAYS)),
    }
}

/// Whether a new insight should be generated instead of serving stored ones.
pub fn should_regenerate(existing: &[AiInsight], force_refresh: bool, now: DateTime<Utc>) -> bool {
    // ---
    if force_refresh {
        return true;
    }
    match existing.iter().map(|i| i.created_at).max() {
        Some(newest) => now - newest > chrono::Duration::hours(REGENERATE_AFTER_HOURS),
        None => true,
    }
}

/// Client-submitted insight (`POST /api/ai-insights`).
#[derive(Debug, Default, Deserialize)]
pub struct NewInsight {
    pub device_id: Option<String>,
    pub insight_type: Option<String>,
    pub severity: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub ai_summary: Option<String>,
    pub confidence_score: Option<f64>,
    pub affected_metrics: Option<Vec<String>>,
    pub recommendations: Option<Vec<String>>,
}

impl NewInsight {
    /// Validate and fill defaults. The error is a client-facing message.
    pub fn into_insight(self, now: DateTime<Utc>) -> Result<AiInsight, String> {
        // ---
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let (Some(device_id), Some(insight_type), Some(title), Some(description)) = (
            present(self.device_id),
            present(self.insight_type),
            present(self.title),
            present(self.description),
        ) else {
            return Err("Missing required fields".to_string());
        };

        let insight_type: InsightType = insight_type.parse()?;
        let severity = match present(self.severity) {
            Some(s) => s.parse()?,
            None => Severity::Medium,
        };

        Ok(AiInsight {
            device_id,
            timestamp: now,
            insight_type,
            severity,
            title,
            ai_summary: present(self.ai_summary).unwrap_or_else(|| description.clone()),
            description,
            confidence_score: self.confidence_score.unwrap_or(0.8),
            affected_metrics: self.affected_metrics.unwrap_or_default(),
            recommendations: self.recommendations.unwrap_or_default(),
            created_at: now,
            expires_at: Some(now + chrono::Duration::days(INSIGHT_TTL_DAYS)),
        })
    }
}

// ---

/// Prompt describing the device's latest state for the language model.
pub fn build_prompt(
    device_id: &str,
    latest: &Reading,
    anomalies: &[Anomaly],
    thresholds: &[StoredThreshold],
) -> String {
    // ---
    let readings = PROMPT_PARAMETERS
        .iter()
        .map(|p| match latest.values.get(*p) {
            Some(v) => format!("{}: {:.2}", p.column(), v),
            None => format!("{}: N/A", p.column()),
        })
        .collect::<Vec<_>>()
        .join(", ");

    let ranges = thresholds
        .iter()
        .map(|t| format!("{}: {}-{}", t.parameter, t.min, t.max))
        .collect::<Vec<_>>()
        .join(", ");

    let violations = if anomalies.is_empty() {
        "All parameters within threshold ranges".to_string()
    } else {
        let listed = anomalies
            .iter()
            .map(|a| format!("{} = {:.2} ({})", a.metric, a.value, a.deviation))
            .collect::<Vec<_>>()
            .join(", ");
        format!("Threshold violations: {}", listed)
    };

    format!(
        "Analyze this IoT sensor data for aquaculture device {device_id}:\n\n\
         Current readings: {readings}\n\
         Threshold ranges: {ranges}\n\
         {violations}\n\n\
         Provide a brief 1-2 sentence summary of the device's current health status and any \
         concerns. Focus on actionable insights for fish farming based on threshold violations."
    )
}

pub fn fallback_summary(device_id: &str, has_anomalies: bool) -> String {
    let state = if has_anomalies {
        "threshold violations"
    } else {
        "normal readings"
    };
    format!(
        "Device {} shows {}. Monitor closely for any changes.",
        device_id, state
    )
}

/// Pull the generated text out of the known model response shapes.
pub fn extract_summary_text(body: &Value) -> Option<String> {
    // ---
    ["/output/message/content/0/text", "/content/0/text", "/completions/0/data/text"]
        .iter()
        .find_map(|path| body.pointer(path).and_then(Value::as_str))
        .map(|text| text.trim().to_string())
}

fn request_body(prompt: &str) -> Value {
    json!({
        "messages": [
            { "role": "user", "content": [ { "text": prompt } ] }
        ],
        "inferenceConfig": {
            "maxTokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
            "topP": TOP_P
        }
    })
}

/// Client for the hosted model's invoke endpoint.
#[derive(Debug, Clone)]
pub struct Summarizer {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    model_id: String,
}

impl Summarizer {
    // ---
    /// Build the client once; clones share its connection pool.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.llm_timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: cfg.llm_api_url.clone(),
            api_key: cfg.llm_api_key.clone(),
            model_id: cfg.llm_model_id.clone(),
        })
    }

    /// Generate a summary, or the fallback sentence if the model is not
    /// configured or the call fails.
    pub async fn summarize(&self, device_id: &str, prompt: &str, has_anomalies: bool) -> String {
        // ---
        let Some(endpoint) = self.endpoint.as_deref() else {
            tracing::debug!("No LLM_API_URL configured, using fallback summary for {}", device_id);
            return fallback_summary(device_id, has_anomalies);
        };

        match self.invoke(endpoint, prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Summary generation failed for {}: {:#}", device_id, e);
                fallback_summary(device_id, has_anomalies)
            }
        }
    }

    async fn invoke(&self, endpoint: &str, prompt: &str) -> Result<String> {
        // ---
        let url = format!(
            "{}/model/{}/invoke",
            endpoint.trim_end_matches('/'),
            self.model_id
        );

        let mut request = self.client.post(&url).json(&request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!("Invoking model at {}", url);
        let response = request
            .send()
            .await
            .context("Failed to call model invoke endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Model request failed with {}: {}", status, body));
        }

        let payload: Value = response
            .json()
            .await
            .context("Failed to parse model response JSON")?;

        extract_summary_text(&payload)
            .ok_or_else(|| anyhow!("Model response has no recognizable text field"))
    }
}
