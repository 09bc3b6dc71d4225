use async_trait::async_trait;
use tracing::debug;

use super::{ClusteringService, ConsumerError};

/// In-process k-means over vectors of any dimensionality.
///
/// Seeding is deterministic: the first vector, then repeatedly the vector
/// farthest from every centroid chosen so far. Identical input always gives
/// identical labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeans {
    k: usize,
    max_iters: usize,
}

impl KMeans {
    pub const DEFAULT_MAX_ITERS: usize = 100;

    /// # Errors
    /// `k` and `max_iters` must both be positive.
    pub fn new(k: usize, max_iters: usize) -> Result<Self, ConsumerError> {
        if k == 0 || max_iters == 0 {
            return Err(ConsumerError::InvalidParameters(
                "k and max_iters must be positive".to_string(),
            ));
        }
        Ok(Self { k, max_iters })
    }

    /// Labels in `0..min(k, vectors.len())`.
    ///
    /// # Errors
    /// Vectors of differing dimensionality.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn fit(&self, vectors: &[Vec<f32>]) -> Result<Vec<usize>, ConsumerError> {
        let Some(first) = vectors.first() else {
            return Ok(Vec::new());
        };
        let dims = first.len();
        if vectors.iter().any(|v| v.len() != dims) {
            return Err(ConsumerError::InvalidParameters(
                "all vectors must share one dimensionality".to_string(),
            ));
        }

        let k = self.k.min(vectors.len());
        let mut centroids = seed(vectors, k);
        let mut labels = vec![0usize; vectors.len()];

        for iteration in 0..self.max_iters {
            let mut changed = false;
            for (label, vector) in labels.iter_mut().zip(vectors) {
                let nearest = nearest(&centroids, vector);
                if *label != nearest {
                    *label = nearest;
                    changed = true;
                }
            }
            if !changed && iteration > 0 {
                debug!(iteration, "k-means converged");
                break;
            }

            let mut sums = vec![vec![0.0_f64; dims]; k];
            let mut counts = vec![0usize; k];
            for (label, vector) in labels.iter().zip(vectors) {
                counts[*label] += 1;
                for (acc, v) in sums[*label].iter_mut().zip(vector) {
                    *acc += f64::from(*v);
                }
            }
            for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
                // an emptied cluster keeps its previous centroid
                if count == 0 {
                    continue;
                }
                for (c, s) in centroid.iter_mut().zip(sum) {
                    *c = (s / count as f64) as f32;
                }
            }
        }
        Ok(labels)
    }
}

#[async_trait]
impl ClusteringService for KMeans {
    async fn cluster(&self, vectors: &[Vec<f32>]) -> Result<Vec<i64>, ConsumerError> {
        let labels = self.fit(vectors)?;
        Ok(labels
            .into_iter()
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .collect())
    }
}

fn seed(vectors: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
    let mut centroids = vec![vectors[0].clone()];
    let mut closest: Vec<f32> = vectors
        .iter()
        .map(|v| squared_distance(v, &centroids[0]))
        .collect();
    while centroids.len() < k {
        let (farthest, _) = closest
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, d)| {
                if *d > best.1 {
                    (i, *d)
                } else {
                    best
                }
            });
        let centroid = vectors[farthest].clone();
        for (d, v) in closest.iter_mut().zip(vectors) {
            *d = d.min(squared_distance(v, &centroid));
        }
        centroids.push(centroid);
    }
    centroids
}

fn nearest(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    centroids
        .iter()
        .map(|c| squared_distance(c, vector))
        .enumerate()
        .fold((0, f32::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
        .0
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
