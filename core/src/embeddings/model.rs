use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use super::device::Precision;

/// Per-position hidden states the backend produced for one input text,
/// `positions x hidden_size`.
pub type TokenStates = Vec<Vec<f32>>;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("RequestError: {0}")]
    RequestError(String),
    #[error("ParseError: {0}")]
    ParseError(String),
    #[error("Provider error -> HTTP Status {0}: {1}")]
    ProviderError(u16, String),
    #[error("Invalid backend config: {0}")]
    Config(String),
}

/// Parameters sent along with every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForwardRequest {
    /// Inputs longer than this many tokens are truncated by the backend's tokenizer.
    pub max_tokens: usize,
    pub precision: Precision,
}

/// A text embedding model seen as a token-state producer.
///
/// Tokenization, padding and the forward pass all happen behind this trait;
/// the embedder only ever sees one [`TokenStates`] matrix per input, in input
/// order.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn forward(
        &self,
        batch: &[&str],
        request: ForwardRequest,
    ) -> Result<Vec<TokenStates>, BackendError>;

    /// Whether this backend can run on an accelerator. Queried once, when the
    /// execution device is resolved.
    fn accelerator_available(&self) -> bool {
        false
    }
}

#[async_trait]
impl<B: EmbeddingBackend + ?Sized> EmbeddingBackend for Box<B> {
    async fn forward(
        &self,
        batch: &[&str],
        request: ForwardRequest,
    ) -> Result<Vec<TokenStates>, BackendError> {
        (**self).forward(batch, request).await
    }

    fn accelerator_available(&self) -> bool {
        (**self).accelerator_available()
    }
}

#[async_trait]
impl<B: EmbeddingBackend + ?Sized> EmbeddingBackend for Arc<B> {
    async fn forward(
        &self,
        batch: &[&str],
        request: ForwardRequest,
    ) -> Result<Vec<TokenStates>, BackendError> {
        (**self).forward(batch, request).await
    }

    fn accelerator_available(&self) -> bool {
        (**self).accelerator_available()
    }
}
