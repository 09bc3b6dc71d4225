use async_trait::async_trait;
use newsmap::consumers::{ClusteringService, ConsumerError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

const DEFAULT_API_KEY_VAR_NAME: &str = "NEWSMAP_CLUSTER_API_KEY";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct ServiceConfig {
    api_url: String,
    api_key_var: Option<String>,
    timeout_secs: Option<u64>,
    params: Option<Map<String, Value>>,
}

/// Implementation of newsmap's `ClusteringService` for a remote clustering
/// endpoint.
///
/// The endpoint receives `{"vectors": [[...], ...], "params": {...}}` and must
/// answer with `{"labels": [...]}`, one integer label per vector in request
/// order. Noise points may be labelled `-1`.
///
/// # Supported Configuration
///
/// - `api_url`: endpoint URL
/// - `api_key_var`(optional): environment variable holding a bearer token
/// - `timeout_secs`(optional): request timeout, 120 by default
/// - `params`(optional): algorithm parameters forwarded verbatim
///
/// # Examples
///
/// ```rust,no_run
/// use newsmap::prelude::*;
/// use newsmap_cluster_http::HttpClusteringService;
///
/// # async fn run() -> newsmap::error::Result<()> {
/// let service = HttpClusteringService::new(
///     r#"{
///       "api_url": "http://localhost:5000/cluster",
///       "params": {"algorithm": "dbscan", "eps": 0.4, "min_samples": 5}
///     }"#,
/// )?;
/// ClusterPipeline::new(PipelineConfig::default()).run(&service).await?;
/// # Ok(())
/// # }
/// ```
pub struct HttpClusteringService {
    api_url: String,
    api_key: Option<String>,
    params: Map<String, Value>,
    client: Client,
}

impl HttpClusteringService {
    /// Creates a service from a JSON configuration string.
    ///
    /// # Errors
    /// Malformed JSON, unknown fields, a missing `api_url`, or an HTTP client
    /// that can't be built.
    pub fn new(json_config: &str) -> Result<Self, ConsumerError> {
        let config: ServiceConfig = serde_json::from_str(json_config)
            .map_err(|e| ConsumerError::InvalidParameters(e.to_string()))?;
        let api_key_var = config
            .api_key_var
            .unwrap_or_else(|| DEFAULT_API_KEY_VAR_NAME.to_string());
        let client = Client::builder()
            .timeout(Duration::from_secs(
                config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|e| ConsumerError::Service(e.to_string()))?;

        Ok(Self {
            api_url: config.api_url,
            api_key: std::env::var(&api_key_var).ok(),
            params: config.params.unwrap_or_default(),
            client,
        })
    }

    /// Points the service at `api_url` with no extra parameters.
    ///
    /// # Errors
    /// An HTTP client that can't be built.
    pub fn from_url(api_url: &str) -> Result<Self, ConsumerError> {
        let config = serde_json::json!({ "api_url": api_url }).to_string();
        Self::new(&config)
    }
}

#[derive(Serialize)]
struct ClusterRequest<'a> {
    vectors: &'a [Vec<f32>],
    params: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct ClusterResponse {
    labels: Vec<i64>,
}

#[async_trait]
impl ClusteringService for HttpClusteringService {
    async fn cluster(&self, vectors: &[Vec<f32>]) -> Result<Vec<i64>, ConsumerError> {
        let request_body = ClusterRequest {
            vectors,
            params: &self.params,
        };
        let mut request = self.client.post(&self.api_url).json(&request_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ConsumerError::RequestError(e.to_string()))?;

        if response.status().is_success() {
            let response = response
                .json::<ClusterResponse>()
                .await
                .map_err(|e| ConsumerError::ParseError(e.to_string()))?;
            debug!(labels = response.labels.len(), "received cluster labels");
            Ok(response.labels)
        } else {
            let status = response.status().as_u16();
            let error_message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(ConsumerError::ProviderError(status, error_message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn test_config() {
        let service = HttpClusteringService::new(
            r#"{"api_url": "http://localhost/cluster", "params": {"k": 4}}"#,
        )
        .unwrap();
        assert_eq!(service.api_url, "http://localhost/cluster");
        assert_eq!(service.params.get("k"), Some(&json!(4)));

        assert!(HttpClusteringService::new(r#"{"params": {}}"#).is_err());
        assert!(HttpClusteringService::new(r#"{"api_url": "x", "k": 3}"#).is_err());
    }

    #[tokio::test]
    async fn test_cluster_request() {
        let mut mock_server = mockito::Server::new_async().await;
        let mock = mock_server
            .mock("POST", "/cluster")
            .match_body(Matcher::Json(json!({
                "vectors": [[0.0, 1.0], [0.5, 0.5], [9.0, 9.0]],
                "params": {"algorithm": "dbscan", "eps": 0.4}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"labels": [0, 0, -1]}"#)
            .create_async()
            .await;

        let config = format!(
            r#"{{"api_url": "{}/cluster", "params": {{"algorithm": "dbscan", "eps": 0.4}}}}"#,
            mock_server.url()
        );
        let service = HttpClusteringService::new(&config).unwrap();
        let labels = service
            .cluster(&[vec![0.0, 1.0], vec![0.5, 0.5], vec![9.0, 9.0]])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(labels, vec![0, 0, -1]);
    }

    #[tokio::test]
    async fn test_provider_error() {
        let mut mock_server = mockito::Server::new_async().await;
        let _mock = mock_server
            .mock("POST", "/")
            .with_status(500)
            .with_body("out of memory")
            .create_async()
            .await;

        let service = HttpClusteringService::from_url(&mock_server.url()).unwrap();
        let result = service.cluster(&[vec![1.0]]).await;

        assert!(matches!(
            result,
            Err(ConsumerError::ProviderError(500, ref body)) if body == "out of memory"
        ));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mut mock_server = mockito::Server::new_async().await;
        let _mock = mock_server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"clusters": [1]}"#)
            .create_async()
            .await;

        let service = HttpClusteringService::from_url(&mock_server.url()).unwrap();
        let result = service.cluster(&[vec![1.0]]).await;
        assert!(matches!(result, Err(ConsumerError::ParseError(_))));
    }
}
