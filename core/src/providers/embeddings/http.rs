use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::embeddings::device::Precision;
use crate::embeddings::model::{BackendError, EmbeddingBackend, ForwardRequest, TokenStates};

const DEFAULT_API_KEY_VAR_NAME: &str = "NEWSMAP_BACKEND_API_KEY";
const DEFAULT_URL: &str = "http://127.0.0.1:8080/embed_all";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct BackendConfig {
    api_url: Option<String>,
    api_key_var: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    accelerator: Option<bool>,
}

#[derive(Serialize)]
struct ForwardBody<'a> {
    inputs: &'a [&'a str],
    truncate: bool,
    max_length: usize,
    precision: Precision,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// [`EmbeddingBackend`] served by a remote inference endpoint that returns raw
/// per-token hidden states.
///
/// The endpoint receives
/// `{"inputs": [...], "truncate": true, "max_length": N, "precision": "half"|"full"}`
/// and must answer with one `positions x hidden` matrix per input, in order.
///
/// # Supported Configuration
///
/// - `api_url`(optional): endpoint URL, `http://127.0.0.1:8080/embed_all` by default
/// - `api_key_var`(optional): environment variable holding a bearer token
/// - `model`(optional): model identifier forwarded with every request
/// - `timeout_secs`(optional): per-request timeout, 300 by default
/// - `accelerator`(optional): whether the server runs on an accelerator
///
/// ```json
/// {
///   "api_url": "http://gpu-box:8080/embed_all",
///   "model": "jinaai/jina-embeddings-v3",
///   "accelerator": true
/// }
/// ```
pub struct HttpTokenBackend {
    api_url: String,
    api_key: Option<String>,
    model: Option<String>,
    accelerator: bool,
    client: Client,
}

impl HttpTokenBackend {
    /// Creates a backend from an optional JSON configuration string.
    ///
    /// # Errors
    /// Malformed JSON, unknown fields, or an HTTP client that can't be built.
    pub fn new(json_config: Option<&str>) -> Result<Self, BackendError> {
        let config: BackendConfig = match json_config {
            Some(json) => {
                serde_json::from_str(json).map_err(|e| BackendError::Config(e.to_string()))?
            }
            None => BackendConfig::default(),
        };
        let api_key_var = config
            .api_key_var
            .unwrap_or_else(|| DEFAULT_API_KEY_VAR_NAME.to_string());
        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Self {
            api_url: config.api_url.unwrap_or_else(|| DEFAULT_URL.to_string()),
            api_key: std::env::var(&api_key_var).ok(),
            model: config.model,
            accelerator: config.accelerator.unwrap_or(false),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpTokenBackend {
    async fn forward(
        &self,
        batch: &[&str],
        request: ForwardRequest,
    ) -> Result<Vec<TokenStates>, BackendError> {
        let body = ForwardBody {
            inputs: batch,
            truncate: true,
            max_length: request.max_tokens,
            precision: request.precision,
            model: self.model.as_deref(),
        };
        let mut builder = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                BackendError::Unavailable(e.to_string())
            } else {
                BackendError::RequestError(e.to_string())
            }
        })?;

        if response.status().is_success() {
            response
                .json::<Vec<TokenStates>>()
                .await
                .map_err(|e| BackendError::ParseError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let error_message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(BackendError::ProviderError(status, error_message))
        }
    }

    fn accelerator_available(&self) -> bool {
        self.accelerator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    const REQUEST: ForwardRequest = ForwardRequest {
        max_tokens: 16,
        precision: Precision::Half,
    };

    #[test]
    fn test_config_deserialization() {
        let backend = HttpTokenBackend::new(Some(
            r#"{"api_url": "http://localhost:9/embed_all", "model": "m", "accelerator": true}"#,
        ))
        .unwrap();
        assert_eq!(backend.api_url, "http://localhost:9/embed_all");
        assert_eq!(backend.model.as_deref(), Some("m"));
        assert!(backend.accelerator_available());

        let unknown = HttpTokenBackend::new(Some(r#"{"url": "http://localhost"}"#));
        assert!(matches!(unknown, Err(BackendError::Config(_))));
    }

    #[tokio::test]
    async fn test_forward() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embed_all")
            .match_body(Matcher::PartialJson(json!({
                "inputs": ["a b", "c"],
                "truncate": true,
                "max_length": 16,
                "precision": "half"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0]]]")
            .create_async()
            .await;

        let config = format!(r#"{{"api_url": "{}/embed_all"}}"#, server.url());
        let backend = HttpTokenBackend::new(Some(&config)).unwrap();
        let states = backend.forward(&["a b", "c"], REQUEST).await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            states,
            vec![vec![vec![1.0, 2.0], vec![3.0, 4.0]], vec![vec![5.0, 6.0]]]
        );
    }

    #[tokio::test]
    async fn test_provider_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/embed_all")
            .with_status(503)
            .with_body("model loading")
            .create_async()
            .await;

        let config = format!(r#"{{"api_url": "{}/embed_all"}}"#, server.url());
        let backend = HttpTokenBackend::new(Some(&config)).unwrap();
        let result = backend.forward(&["x"], REQUEST).await;

        match result {
            Err(BackendError::ProviderError(status, body)) => {
                assert_eq!(status, 503);
                assert_eq!(body, "model loading");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}
