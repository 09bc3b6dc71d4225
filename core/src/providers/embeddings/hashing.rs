use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::embeddings::model::{BackendError, EmbeddingBackend, ForwardRequest, TokenStates};

/// A model-free backend that hashes each whitespace token into a fixed-width
/// vector.
///
/// Useful for dry runs and tests: the output is deterministic across runs and
/// machines, texts sharing words land near each other after pooling, and no
/// model has to be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingBackend {
    dimensions: usize,
}

impl HashingBackend {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn token_states(&self, text: &str, max_tokens: usize) -> TokenStates {
        let states: TokenStates = text
            .split_whitespace()
            .take(max_tokens)
            .map(|token| self.token_vector(token))
            .collect();
        if states.is_empty() {
            vec![vec![0.0; self.dimensions]]
        } else {
            states
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn token_vector(&self, token: &str) -> Vec<f32> {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        (0..self.dimensions)
            .map(|i| {
                let salt = ((i / digest.len()) as u8).wrapping_mul(31);
                f32::from(digest[i % digest.len()] ^ salt) / 127.5 - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    async fn forward(
        &self,
        batch: &[&str],
        request: ForwardRequest,
    ) -> Result<Vec<TokenStates>, BackendError> {
        Ok(batch
            .iter()
            .map(|text| self.token_states(text, request.max_tokens))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::device::Precision;

    const REQUEST: ForwardRequest = ForwardRequest {
        max_tokens: 4,
        precision: Precision::Full,
    };

    #[tokio::test]
    async fn test_deterministic_fixed_width() {
        let backend = HashingBackend::new(48);
        let first = backend.forward(&["Breaking news today", ""], REQUEST).await.unwrap();
        let second = backend.forward(&["Breaking news today"], REQUEST).await.unwrap();

        assert_eq!(first[0], second[0]);
        assert_eq!(first[0].len(), 3);
        assert!(first[0].iter().all(|row| row.len() == 48));
        assert_eq!(first[1], vec![vec![0.0; 48]]);
        assert_ne!(first[0][0], first[0][1]);
    }

    #[tokio::test]
    async fn test_respects_max_tokens() {
        let backend = HashingBackend::new(4);
        let states = backend
            .forward(&["one two three four five six"], REQUEST)
            .await
            .unwrap();
        assert_eq!(states[0].len(), 4);
    }
}
