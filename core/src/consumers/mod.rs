//! Downstream consumers of a finished store.
//!
//! Projection (e.g. a 3-D nonlinear embedding for visualization) and
//! clustering both read the same `(vectors, keys, metadata)` triple from
//! [`LoadedEmbeddings`]. The traits here fix only what goes in and what comes
//! out; [`KMeans`] and [`Dbscan`] are in-process clustering services for runs
//! without a remote one. A failing consumer never touches the store.

pub mod dbscan;
pub mod kmeans;

pub use dbscan::Dbscan;
pub use kmeans::KMeans;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::vector_store::{LoadedEmbeddings, VectorStoreError};

/// Metadata a cluster result carries, in output order.
pub const RESULT_ATTRIBUTES: [&str; 5] = ["id", "title", "source", "publishTime", "crawledAt"];

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Clustering service error: {0}")]
    Service(String),
    #[error("RequestError: {0}")]
    RequestError(String),
    #[error("ParseError: {0}")]
    ParseError(String),
    #[error("Provider error -> HTTP Status {0}: {1}")]
    ProviderError(u16, String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Consumer returned {found} results for {expected} vectors")]
    CountMismatch { expected: usize, found: usize },
    #[error("Failed to write results to `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode results: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] VectorStoreError),
}

/// Reduces vectors to a low-dimensional map, one point per key.
pub trait Projector {
    /// # Errors
    /// Implementation defined.
    fn project(
        &self,
        embeddings: &LoadedEmbeddings,
        dimensions: usize,
    ) -> Result<Vec<Vec<f32>>, ConsumerError>;
}

/// Assigns one discrete label per vector.
#[async_trait]
pub trait ClusteringService: Send + Sync {
    async fn cluster(&self, vectors: &[Vec<f32>]) -> Result<Vec<i64>, ConsumerError>;
}

/// One line of the clustering output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResult {
    pub id: String,
    pub title: String,
    pub source: String,
    pub publish_time: String,
    pub crawled_at: String,
    pub cluster: i64,
}

/// Projects `embeddings` and checks that every key got exactly one point of
/// the requested dimensionality.
///
/// # Errors
/// The projector's own errors, or a result of the wrong shape.
pub fn project_embeddings<P: Projector + ?Sized>(
    embeddings: &LoadedEmbeddings,
    projector: &P,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, ConsumerError> {
    if dimensions == 0 {
        return Err(ConsumerError::InvalidParameters(
            "projection dimensionality must be positive".to_string(),
        ));
    }
    let points = projector.project(embeddings, dimensions)?;
    if points.len() != embeddings.len() {
        return Err(ConsumerError::CountMismatch {
            expected: embeddings.len(),
            found: points.len(),
        });
    }
    if let Some(point) = points.iter().find(|p| p.len() != dimensions) {
        return Err(ConsumerError::InvalidParameters(format!(
            "projector returned a {}-dimensional point, expected {dimensions}",
            point.len()
        )));
    }
    Ok(points)
}

/// Clusters `embeddings` and joins each label with the record's metadata.
///
/// `embeddings` should be loaded with [`RESULT_ATTRIBUTES`]; the `id` column
/// falls back to the store key when a record has no `id` attribute.
///
/// # Errors
/// The service's own errors, or a label count that doesn't match the input.
pub async fn cluster_embeddings<S: ClusteringService + ?Sized>(
    embeddings: &LoadedEmbeddings,
    service: &S,
) -> Result<Vec<ClusterResult>, ConsumerError> {
    if embeddings.is_empty() {
        return Ok(Vec::new());
    }
    let labels = service.cluster(&embeddings.vectors).await?;
    if labels.len() != embeddings.len() {
        return Err(ConsumerError::CountMismatch {
            expected: embeddings.len(),
            found: labels.len(),
        });
    }

    Ok(labels
        .into_iter()
        .enumerate()
        .map(|(i, cluster)| {
            let id = embeddings.attribute_text(i, "id");
            ClusterResult {
                id: if id.is_empty() {
                    embeddings.keys[i].to_string()
                } else {
                    id
                },
                title: embeddings.attribute_text(i, "title"),
                source: embeddings.attribute_text(i, "source"),
                publish_time: embeddings.attribute_text(i, "publishTime"),
                crawled_at: embeddings.attribute_text(i, "crawledAt"),
                cluster,
            }
        })
        .collect())
}

/// Writes `results` as a JSON array, creating parent directories as needed.
///
/// # Errors
/// I/O and encoding failures.
pub fn write_cluster_results(path: &Path, results: &[ClusterResult]) -> Result<(), ConsumerError> {
    let io_err = |source| ConsumerError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer_pretty(&mut writer, results)?;
    writer.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::EmbeddingKey;
    use crate::vector_store::{AttributeValue, Attributes};

    struct ModuloService;

    #[async_trait]
    impl ClusteringService for ModuloService {
        async fn cluster(&self, vectors: &[Vec<f32>]) -> Result<Vec<i64>, ConsumerError> {
            Ok((0..vectors.len()).map(|i| (i % 2) as i64).collect())
        }
    }

    struct ShortService;

    #[async_trait]
    impl ClusteringService for ShortService {
        async fn cluster(&self, _vectors: &[Vec<f32>]) -> Result<Vec<i64>, ConsumerError> {
            Ok(vec![0])
        }
    }

    struct FirstComponents;

    impl Projector for FirstComponents {
        fn project(
            &self,
            embeddings: &LoadedEmbeddings,
            dimensions: usize,
        ) -> Result<Vec<Vec<f32>>, ConsumerError> {
            Ok(embeddings
                .vectors
                .iter()
                .map(|v| v.iter().copied().take(dimensions).collect())
                .collect())
        }
    }

    fn text(s: &str) -> AttributeValue {
        AttributeValue::Text(s.to_string())
    }

    fn embeddings() -> LoadedEmbeddings {
        LoadedEmbeddings {
            keys: vec![EmbeddingKey::from_identity("a1"), EmbeddingKey::from_identity("body")],
            vectors: vec![vec![0.0, 1.0, 2.0, 3.0], vec![1.0, 1.0, 1.0, 1.0]],
            attributes: vec![
                Attributes::from([
                    ("id".to_string(), text("a1")),
                    ("title".to_string(), text("Title")),
                    ("source".to_string(), text("wire")),
                    ("publishTime".to_string(), text("2024-05-01")),
                    ("crawledAt".to_string(), text("2024-05-02")),
                ]),
                Attributes::new(),
            ],
        }
    }

    #[tokio::test]
    async fn test_cluster_embeddings_joins_metadata() {
        let results = cluster_embeddings(&embeddings(), &ModuloService).await.unwrap();
        assert_eq!(
            results[0],
            ClusterResult {
                id: "a1".to_string(),
                title: "Title".to_string(),
                source: "wire".to_string(),
                publish_time: "2024-05-01".to_string(),
                crawled_at: "2024-05-02".to_string(),
                cluster: 0,
            }
        );
        assert_eq!(results[1].id, EmbeddingKey::from_identity("body").to_string());
        assert_eq!(results[1].title, "");
        assert_eq!(results[1].cluster, 1);
    }

    #[tokio::test]
    async fn test_label_count_is_checked() {
        let result = cluster_embeddings(&embeddings(), &ShortService).await;
        assert!(matches!(
            result,
            Err(ConsumerError::CountMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_project_embeddings() {
        let points = project_embeddings(&embeddings(), &FirstComponents, 3).unwrap();
        assert_eq!(points, vec![vec![0.0, 1.0, 2.0], vec![1.0, 1.0, 1.0]]);
        assert!(project_embeddings(&embeddings(), &FirstComponents, 0).is_err());
        assert!(project_embeddings(&embeddings(), &FirstComponents, 5).is_err());
    }

    #[test]
    fn test_write_cluster_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/clusters.json");
        let results = vec![ClusterResult {
            id: "a1".to_string(),
            title: "T".to_string(),
            source: "s".to_string(),
            publish_time: "p".to_string(),
            crawled_at: "c".to_string(),
            cluster: 4,
        }];
        write_cluster_results(&path, &results).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            written,
            serde_json::json!([{
                "id": "a1", "title": "T", "source": "s",
                "publishTime": "p", "crawledAt": "c", "cluster": 4
            }])
        );
    }
}
