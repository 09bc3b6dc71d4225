//! # newsmap - Core API Documentation
//!
//! newsmap turns a directory of line-delimited JSON news articles into a
//! persisted, content-addressed store of embedding vectors, and hands that
//! store to downstream projection and clustering consumers.
//!
//! ## Features
//!
//! - **Loaders**: lazy, restartable reading of `*.jsonl` article dumps with body normalization
//! - **Identity**: SHA-256 content-addressed keys derived from the article `id` or body
//! - **Embedders**: batched inference over an abstract token-state backend with mean pooling
//! - **Vector Store**: a single-file, append-style keyed container with random access by key
//! - **Consumers**: projection and clustering contracts, plus a built-in k-means
//!
//! ## Example
//!
//! ```rust,no_run
//! use newsmap::prelude::*;
//! use newsmap::providers::embeddings::HashingBackend;
//!
//! #[tokio::main]
//! async fn main() -> newsmap::error::Result<()> {
//!     let config = PipelineConfig::default();
//!     let pipeline = EmbedPipeline::new(config, HashingBackend::new(256))?;
//!     let report = pipeline.run().await?;
//!     println!("stored {} records", report.written);
//!
//!     let loaded = newsmap::vector_store::load("embeddings/articles.nmst")?;
//!     for (key, title) in loaded.keys.iter().zip(loaded.titles()) {
//!         println!("{key} {title}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Store layout
//!
//! A store is one file: an 8 byte magic header followed by length-prefixed
//! `bincode` frames, one per record. Frames are only ever appended; when a key
//! occurs more than once the last frame wins.

/// Article records and body normalization
pub mod article;

/// Pipeline configuration
pub mod config;

/// Projection and clustering consumers of a finished store
pub mod consumers;

/// Batched text embedding over an abstract backend
pub mod embeddings;

/// Error types for all library operations
pub mod error;

/// Content-addressed key derivation
pub mod identity;

/// Article loading from line-delimited JSON files
pub mod loader;

/// End-to-end embed and cluster runs
pub mod pipeline;

/// Convenience prelude exports
pub mod prelude;

/// Injectable progress reporting
pub mod progress;

/// Builtin embedding backends
pub mod providers;

/// Persisted embedding storage and retrieval
pub mod vector_store;
