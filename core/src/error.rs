use crate::{
    config::ConfigError, consumers::ConsumerError, embeddings::EmbedderError,
    loader::LoaderError, vector_store::VectorStoreError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),
    #[error("Embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("VectorStore error: {0}")]
    VectorStore(#[from] VectorStoreError),
    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),
}

pub type Result<T> = std::result::Result<T, Error>;
