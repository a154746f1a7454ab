//! Metrics provider clients.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use drift_model::Sample;
use serde::Deserialize;
use thiserror::Error;

/// Errors from the metrics provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not be reached or returned a server error.
    /// Never an immediate analysis failure; the run becomes
    /// inconclusive instead.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with something unparseable.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Read access to a time-series metrics provider.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Evaluate a query expression over a trailing time window and
    /// return the ordered samples. Zero samples is a valid answer.
    async fn query(&self, expr: &str, window: Duration) -> Result<Vec<Sample>, ProviderError>;
}

// =============================================================================
// HTTP provider (Prometheus-compatible range query API)
// =============================================================================

#[derive(Debug, Deserialize)]
struct RangeResponse {
    status: String,
    #[serde(default)]
    data: Option<RangeData>,
}

#[derive(Debug, Deserialize)]
struct RangeData {
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Client for a Prometheus-style `/api/v1/query_range` endpoint.
pub struct HttpMetricsProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetricsProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MetricsProvider for HttpMetricsProvider {
    async fn query(&self, expr: &str, window: Duration) -> Result<Vec<Sample>, ProviderError> {
        let end = Utc::now();
        let start = end - chrono::Duration::from_std(window).unwrap_or_default();
        let step = (window.as_secs() / 10).max(1);

        let response = self
            .client
            .get(format!("{}/api/v1/query_range", self.base_url))
            .query(&[
                ("query", expr),
                ("start", &start.timestamp().to_string()),
                ("end", &end.timestamp().to_string()),
                ("step", &step.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let body: RangeResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if body.status != "success" {
            return Err(ProviderError::Unavailable(format!(
                "provider status {}",
                body.status
            )));
        }

        let mut samples = Vec::new();
        if let Some(series) = body.data.and_then(|d| d.result.into_iter().next()) {
            for (ts, value) in series.values {
                let value: f64 = value
                    .parse()
                    .map_err(|_| ProviderError::Malformed(format!("sample value '{value}'")))?;
                let at: DateTime<Utc> = Utc
                    .timestamp_opt(ts as i64, 0)
                    .single()
                    .ok_or_else(|| ProviderError::Malformed(format!("sample timestamp {ts}")))?;
                samples.push(Sample { at, value });
            }
        }

        Ok(samples)
    }
}

// =============================================================================
// Static provider (dev mode and tests)
// =============================================================================

/// Provider backed by an in-memory table. Unknown expressions return
/// zero samples, which analysis treats as inconclusive.
#[derive(Default)]
pub struct StaticMetricsProvider {
    series: Mutex<HashMap<String, Vec<Sample>>>,
    queued: Mutex<HashMap<String, std::collections::VecDeque<Vec<Sample>>>>,
}

impl StaticMetricsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the samples served for an expression.
    pub fn set(&self, expr: impl Into<String>, samples: Vec<Sample>) {
        self.series
            .lock()
            .expect("series lock")
            .insert(expr.into(), samples);
    }

    /// Queue a one-shot answer for an expression. Queued answers are
    /// served in order before the static series, which makes scripted
    /// pass-then-fail sequences deterministic.
    pub fn enqueue(&self, expr: impl Into<String>, samples: Vec<Sample>) {
        self.queued
            .lock()
            .expect("queue lock")
            .entry(expr.into())
            .or_default()
            .push_back(samples);
    }

    /// Queue a flat one-shot series of `n` samples at `value`.
    pub fn enqueue_flat(&self, expr: impl Into<String>, value: f64, n: usize) {
        let now = Utc::now();
        let samples = (0..n)
            .map(|i| Sample {
                at: now - chrono::Duration::seconds((n - i) as i64 * 10),
                value,
            })
            .collect();
        self.enqueue(expr, samples);
    }

    /// Serve a flat series of `n` samples at `value`.
    pub fn set_flat(&self, expr: impl Into<String>, value: f64, n: usize) {
        let now = Utc::now();
        let samples = (0..n)
            .map(|i| Sample {
                at: now - chrono::Duration::seconds((n - i) as i64 * 10),
                value,
            })
            .collect();
        self.set(expr, samples);
    }
}

#[async_trait]
impl MetricsProvider for StaticMetricsProvider {
    async fn query(&self, expr: &str, _window: Duration) -> Result<Vec<Sample>, ProviderError> {
        if let Some(samples) = self
            .queued
            .lock()
            .expect("queue lock")
            .get_mut(expr)
            .and_then(|q| q.pop_front())
        {
            return Ok(samples);
        }

        Ok(self
            .series
            .lock()
            .expect("series lock")
            .get(expr)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_provider_parses_range_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {
                    "resultType": "matrix",
                    "result": [
                        {
                            "metric": {},
                            "values": [
                                [1712345600.0, "0.010"],
                                [1712345660.0, "0.012"],
                                [1712345720.0, "0.011"]
                            ]
                        }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let provider = HttpMetricsProvider::new(server.uri());
        let samples = provider
            .query("error_rate", Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(samples.len(), 3);
        assert!((samples[1].value - 0.012).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_http_provider_empty_result_is_zero_samples() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": { "resultType": "matrix", "result": [] }
            })))
            .mount(&server)
            .await;

        let provider = HttpMetricsProvider::new(server.uri());
        let samples = provider
            .query("error_rate", Duration::from_secs(300))
            .await
            .unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn test_http_provider_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query_range"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = HttpMetricsProvider::new(server.uri());
        let err = provider
            .query("error_rate", Duration::from_secs(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_static_provider_round_trip() {
        let provider = StaticMetricsProvider::new();
        provider.set_flat("latency_p99", 0.25, 5);

        let samples = provider
            .query("latency_p99", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(samples.len(), 5);

        let empty = provider
            .query("unknown", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }
}
