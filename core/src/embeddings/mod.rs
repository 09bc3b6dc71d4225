pub mod device;
pub mod model;
pub mod pooling;

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::progress::{ProgressReporter, SilentProgress, Stage};
use device::Device;
use model::{BackendError, EmbeddingBackend, ForwardRequest};
use pooling::{mean_pool, truncate_to_tokens};

/// Default input length cap, in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 8192;
pub const DEFAULT_BATCH_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("batch size must be a positive integer")]
    InvalidBatchSize,
    #[error("max token length must be a positive integer")]
    InvalidMaxTokens,
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("backend returned {found} outputs for a batch of {expected}")]
    OutputCountMismatch { expected: usize, found: usize },
    #[error("backend returned no token states for an input")]
    EmptyTokenStates,
    #[error("token state at position {position} has width {found}, expected {expected}")]
    RaggedTokenStates {
        position: usize,
        expected: usize,
        found: usize,
    },
    #[error("embedding dimensionality changed from {expected} to {found} within a run")]
    DimensionMismatch { expected: usize, found: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedderConfig {
    pub max_tokens: usize,
    /// Resolved once at startup, see [`device::DevicePreference::resolve`].
    pub device: Device,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            device: Device::Cpu,
        }
    }
}

/// Turns texts into one fixed-length vector each, a batch at a time.
pub struct BatchEmbedder<B: EmbeddingBackend> {
    backend: B,
    config: EmbedderConfig,
    progress: Arc<dyn ProgressReporter>,
}

impl<B: EmbeddingBackend> BatchEmbedder<B> {
    /// # Errors
    /// Rejects a zero `max_tokens`.
    pub fn new(backend: B, config: EmbedderConfig) -> Result<Self, EmbedderError> {
        if config.max_tokens == 0 {
            return Err(EmbedderError::InvalidMaxTokens);
        }
        Ok(Self {
            backend,
            config,
            progress: Arc::new(SilentProgress),
        })
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn device(&self) -> Device {
        self.config.device
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Embeds `texts`, returning vectors in the same order.
    ///
    /// Texts are split into contiguous batches of at most `batch_size`, each
    /// sent to the backend in one call. Inputs longer than the configured token
    /// cap are truncated, never dropped.
    ///
    /// # Errors
    /// A zero `batch_size` is rejected up front. Any backend failure aborts the
    /// whole call; nothing from earlier batches is returned.
    pub async fn embed<S: AsRef<str>>(
        &self,
        texts: &[S],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if batch_size == 0 {
            return Err(EmbedderError::InvalidBatchSize);
        }
        let request = ForwardRequest {
            max_tokens: self.config.max_tokens,
            precision: self.config.device.precision(),
        };

        let batches = texts.len().div_ceil(batch_size);
        self.progress.start(Stage::Embedding, Some(batches));

        let mut vectors = Vec::with_capacity(texts.len());
        let mut dimensions = None;
        for (index, chunk) in texts.chunks(batch_size).enumerate() {
            let batch: Vec<&str> = chunk
                .iter()
                .map(|t| truncate_to_tokens(t.as_ref(), request.max_tokens))
                .collect();

            let states = self.backend.forward(&batch, request).await?;
            if states.len() != batch.len() {
                return Err(EmbedderError::OutputCountMismatch {
                    expected: batch.len(),
                    found: states.len(),
                });
            }

            for text_states in &states {
                let mut vector = mean_pool(text_states)?;
                request.precision.apply(&mut vector);
                match dimensions {
                    None => dimensions = Some(vector.len()),
                    Some(expected) if expected != vector.len() => {
                        return Err(EmbedderError::DimensionMismatch {
                            expected,
                            found: vector.len(),
                        });
                    }
                    Some(_) => {}
                }
                vectors.push(vector);
            }

            debug!(batch = index, size = batch.len(), "embedded batch");
            self.progress.advance(Stage::Embedding, 1);
        }
        self.progress.finish(Stage::Embedding);

        Ok(vectors)
    }
}
