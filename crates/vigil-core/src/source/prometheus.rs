//! Prometheus-compatible instant query source

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{MetricError, MetricSource};

/// Reads metric values through the Prometheus HTTP API (`/api/v1/query`)
///
/// The metric identifier is sent verbatim as the query, so any expression
/// returning a single-element vector or a scalar works.
#[derive(Debug, Clone)]
pub struct PrometheusMetricSource {
    client: Client,
    base_url: String,
}

impl PrometheusMetricSource {
    /// Create a source for the server at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MetricError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetricError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl MetricSource for PrometheusMetricSource {
    async fn get(&self, metric: &str) -> Result<f64, MetricError> {
        let url = format!("{}/api/v1/query", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("query", metric)])
            .send()
            .await
            .map_err(|e| MetricError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MetricError::Unavailable(format!(
                "query endpoint returned {}",
                response.status()
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| invalid(metric, e.to_string()))?;

        if body.status != "success" {
            return Err(MetricError::Unavailable(
                body.error.unwrap_or_else(|| format!("query status {}", body.status)),
            ));
        }

        let raw = match body.data {
            Some(QueryData::Vector { result }) => match result.into_iter().next() {
                Some(sample) => sample.value.1,
                None => return Err(MetricError::NotFound(metric.to_string())),
            },
            Some(QueryData::Scalar { result }) => result.1,
            None => return Err(MetricError::NotFound(metric.to_string())),
        };

        let value = raw
            .parse::<f64>()
            .map_err(|e| invalid(metric, format!("'{raw}': {e}")))?;
        if !value.is_finite() {
            return Err(invalid(metric, format!("'{raw}' is not finite")));
        }

        debug!(metric, value, "Fetched metric");
        Ok(value)
    }
}

fn invalid(metric: &str, reason: String) -> MetricError {
    MetricError::InvalidValue {
        metric: metric.to_string(),
        reason,
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", rename_all = "lowercase")]
enum QueryData {
    Vector { result: Vec<VectorSample> },
    Scalar { result: (f64, String) },
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    value: (f64, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn source_for(server: &MockServer) -> PrometheusMetricSource {
        PrometheusMetricSource::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_reads_first_vector_sample() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .and(query_param("query", "cpu_usage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [{"metric": {"instance": "a"}, "value": [1700000000.0, "87.5"]}]
                }
            })))
            .mount(&server)
            .await;

        let source = source_for(&server).await;

        assert_eq!(source.get("cpu_usage").await, Ok(87.5));
    }

    #[tokio::test]
    async fn test_reads_scalar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "scalar", "result": [1700000000.0, "0"]}
            })))
            .mount(&server)
            .await;

        let source = source_for(&server).await;

        assert_eq!(source.get("scalar(up)").await, Ok(0.0));
    }

    #[tokio::test]
    async fn test_empty_vector_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "vector", "result": []}
            })))
            .mount(&server)
            .await;

        let source = source_for(&server).await;

        assert_eq!(
            source.get("absent_metric").await,
            Err(MetricError::NotFound("absent_metric".to_string()))
        );
    }

    #[tokio::test]
    async fn test_nan_sample_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [{"metric": {}, "value": [1700000000.0, "NaN"]}]
                }
            })))
            .mount(&server)
            .await;

        let source = source_for(&server).await;

        assert!(matches!(
            source.get("cpu_usage").await,
            Err(MetricError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = source_for(&server).await;

        assert!(matches!(
            source.get("cpu_usage").await,
            Err(MetricError::Unavailable(_))
        ));
    }
}
