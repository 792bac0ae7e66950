//! Range queries against a Prometheus-compatible metrics backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::MetricsError;
use crate::usage::reduce::{MetricSeries, Sample};

/// Default metrics backend address.
pub const DEFAULT_PROMETHEUS_URL: &str = "http://localhost:9090";

/// One ranged query over `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub query: String,
    /// Window start, epoch seconds.
    pub start: i64,
    /// Window end, epoch seconds.
    pub end: i64,
    /// Sampling step in seconds.
    pub step: u64,
}

/// Trait for backends that answer ranged metric queries.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Runs one query and returns a series per matching instance.
    ///
    /// An empty vector means the query succeeded but matched nothing.
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<MetricSeries>, MetricsError>;
}

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryRangeData>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<RawSeries>,
}

#[derive(Debug, Deserialize)]
struct RawSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Parses a `/api/v1/query_range` response body.
///
/// Sample values arrive as strings and are converted to `f64` here, so a
/// malformed sample fails the whole query.
pub fn parse_query_range(body: &str) -> Result<Vec<MetricSeries>, MetricsError> {
    let response: QueryRangeResponse = serde_json::from_str(body)
        .map_err(|e| MetricsError::ParseError(format!("invalid response envelope: {e}")))?;

    if response.status != "success" {
        return Err(MetricsError::BackendError {
            error_type: response.error_type.unwrap_or(response.status),
            message: response.error.unwrap_or_default(),
        });
    }

    let Some(data) = response.data else {
        return Ok(Vec::new());
    };

    data.result
        .into_iter()
        .map(|raw| {
            let samples = raw
                .values
                .into_iter()
                .map(|(timestamp, value)| {
                    value
                        .parse::<f64>()
                        .map(|value| Sample::new(timestamp, value))
                        .map_err(|_| {
                            MetricsError::ParseError(format!("non-numeric sample value '{value}'"))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(MetricSeries {
                labels: raw.metric,
                samples,
            })
        })
        .collect()
}

/// Maps an HTTP status and body to the query outcome.
///
/// A non-2xx response carrying an error envelope reports the backend's own
/// error; any other non-2xx response is reported as `HttpStatus`.
pub fn parse_response(status: u16, body: String) -> Result<Vec<MetricSeries>, MetricsError> {
    if !(200..300).contains(&status) {
        // Prometheus explains rejected queries in the usual envelope.
        if let Err(err @ MetricsError::BackendError { .. }) = parse_query_range(&body) {
            return Err(err);
        }
        return Err(MetricsError::HttpStatus { code: status, body });
    }

    parse_query_range(&body)
}

/// HTTP client for the Prometheus query API.
pub struct PrometheusClient {
    base_url: String,
    http_client: Client,
}

impl PrometheusClient {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MetricsError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetricsError::RequestFailed(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            http_client,
        })
    }

    /// Get the backend base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn query_url(&self, query: &RangeQuery) -> Result<Url, MetricsError> {
        let endpoint = format!("{}/api/v1/query_range", self.base_url.trim_end_matches('/'));
        let start = query.start.to_string();
        let end = query.end.to_string();
        let step = query.step.to_string();

        Url::parse_with_params(
            &endpoint,
            &[
                ("query", query.query.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step.as_str()),
            ],
        )
        .map_err(|e| MetricsError::RequestFailed(format!("invalid backend URL '{endpoint}': {e}")))
    }
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<MetricSeries>, MetricsError> {
        let url = self.query_url(query)?;
        tracing::debug!(query = %query.query, start = query.start, end = query.end, "Querying metrics backend");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| MetricsError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MetricsError::RequestFailed(format!("Failed to read response: {e}")))?;

        parse_response(status.as_u16(), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_response() {
        let body = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {"metric": {"name": "train-task-1", "cpu": "cpu00"},
                     "values": [[1700000000, "10"], [1700000010.5, "12.5"]]},
                    {"metric": {"name": "train-task-1", "cpu": "cpu01"},
                     "values": [[1700000000, "3"]]}
                ]
            }
        }"#;

        let series = parse_query_range(body).expect("valid body");
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].labels.get("cpu").map(String::as_str), Some("cpu00"));
        assert_eq!(
            series[0].samples,
            vec![Sample::new(1_700_000_000.0, 10.0), Sample::new(1_700_000_010.5, 12.5)]
        );
        assert_eq!(series[1].samples.len(), 1);
    }

    #[test]
    fn test_parse_empty_result() {
        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        assert!(parse_query_range(body).expect("valid").is_empty());
    }

    #[test]
    fn test_parse_error_envelope() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error at char 5"}"#;
        match parse_query_range(body).unwrap_err() {
            MetricsError::BackendError {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "bad_data");
                assert!(message.contains("parse error"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_rejects_non_numeric_sample() {
        let body = r#"{"status":"success","data":{"result":[{"metric":{},"values":[[1,"lots"]]}]}}"#;
        assert!(matches!(
            parse_query_range(body),
            Err(MetricsError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_query_range("<html>bad gateway</html>"),
            Err(MetricsError::ParseError(_))
        ));
    }

    #[test]
    fn test_rejected_query_prefers_error_envelope() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"invalid parameter \"query\""}"#;
        match parse_response(400, body.to_string()).unwrap_err() {
            MetricsError::BackendError { error_type, .. } => assert_eq!(error_type, "bad_data"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_envelope_failure_reports_status() {
        match parse_response(502, "<html>bad gateway</html>".to_string()).unwrap_err() {
            MetricsError::HttpStatus { code, body } => {
                assert_eq!(code, 502);
                assert!(body.contains("bad gateway"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // A success envelope on an error status is still an error.
        let body = r#"{"status":"success","data":{"result":[]}}"#;
        assert!(matches!(
            parse_response(503, body.to_string()),
            Err(MetricsError::HttpStatus { code: 503, .. })
        ));
    }

    #[test]
    fn test_success_status_parses_body() {
        let body = r#"{"status":"success","data":{"result":[{"metric":{},"values":[[1,"2"],[2,"3"]]}]}}"#;
        let series = parse_response(200, body.to_string()).expect("series");
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].samples.len(), 2);
    }

    #[test]
    fn test_query_url() {
        let client =
            PrometheusClient::new("http://prom:9090/", Duration::from_secs(5)).expect("client");
        let url = client
            .query_url(&RangeQuery {
                query: "container_fs_usage_bytes{name='train-task-1'}".to_string(),
                start: 100,
                end: 3700,
                step: 10,
            })
            .expect("url");

        assert_eq!(url.path(), "/api/v1/query_range");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (
                    "query".to_string(),
                    "container_fs_usage_bytes{name='train-task-1'}".to_string()
                ),
                ("start".to_string(), "100".to_string()),
                ("end".to_string(), "3700".to_string()),
                ("step".to_string(), "10".to_string()),
            ]
        );
    }
}
