use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::{ClusteringService, ConsumerError};

/// Up to this many dimensions neighbours come from a grid of `eps` cells.
const GRID_MAX_DIMS: usize = 3;
const UNCLASSIFIED: i64 = -1;

/// Density-based clustering with a noise label.
///
/// A point is a core point when at least `min_pts` points, itself included,
/// lie within `eps` of it. Clusters are numbered `1..=K` in discovery order and
/// [`Dbscan::NOISE`] marks points reachable from no core point. For up to three
/// dimensions, the usual shape after a projection, neighbours are looked up in
/// a uniform grid of `eps`-sized cells; wider vectors are scanned linearly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dbscan {
    eps: f32,
    min_pts: usize,
}

impl Dbscan {
    pub const NOISE: i64 = 0;

    /// # Errors
    /// `eps` must be finite and positive, `min_pts` positive.
    pub fn new(eps: f32, min_pts: usize) -> Result<Self, ConsumerError> {
        if !(eps.is_finite() && eps > 0.0) || min_pts == 0 {
            return Err(ConsumerError::InvalidParameters(
                "eps and min_pts must be positive".to_string(),
            ));
        }
        Ok(Self { eps, min_pts })
    }

    /// One label per vector, in input order.
    ///
    /// # Errors
    /// Vectors of differing dimensionality.
    pub fn fit(&self, vectors: &[Vec<f32>]) -> Result<Vec<i64>, ConsumerError> {
        let Some(first) = vectors.first() else {
            return Ok(Vec::new());
        };
        let dims = first.len();
        if vectors.iter().any(|v| v.len() != dims) {
            return Err(ConsumerError::InvalidParameters(
                "all vectors must share one dimensionality".to_string(),
            ));
        }

        let index = NeighbourIndex::new(vectors, self.eps);
        let mut labels = vec![UNCLASSIFIED; vectors.len()];
        let mut cluster = Self::NOISE;
        for point in 0..vectors.len() {
            if labels[point] != UNCLASSIFIED {
                continue;
            }
            let seeds = index.neighbours(point);
            if seeds.len() < self.min_pts {
                labels[point] = Self::NOISE;
                continue;
            }

            cluster += 1;
            labels[point] = cluster;
            let mut queue = VecDeque::new();
            for seed in seeds {
                if labels[seed] == UNCLASSIFIED {
                    queue.push_back(seed);
                }
                if labels[seed] == UNCLASSIFIED || labels[seed] == Self::NOISE {
                    labels[seed] = cluster;
                }
            }

            while let Some(current) = queue.pop_front() {
                let reachable = index.neighbours(current);
                if reachable.len() < self.min_pts {
                    continue;
                }
                for q in reachable {
                    if labels[q] == UNCLASSIFIED {
                        queue.push_back(q);
                    }
                    if labels[q] == UNCLASSIFIED || labels[q] == Self::NOISE {
                        labels[q] = cluster;
                    }
                }
            }
        }

        let noise = labels.iter().filter(|l| **l == Self::NOISE).count();
        debug!(clusters = cluster, noise, "dbscan finished");
        Ok(labels)
    }
}

#[async_trait]
impl ClusteringService for Dbscan {
    async fn cluster(&self, vectors: &[Vec<f32>]) -> Result<Vec<i64>, ConsumerError> {
        self.fit(vectors)
    }
}

struct NeighbourIndex<'a> {
    vectors: &'a [Vec<f32>],
    eps: f32,
    /// Empty when the vectors are too wide for a grid
    cells: HashMap<Vec<i64>, Vec<usize>>,
}

impl<'a> NeighbourIndex<'a> {
    fn new(vectors: &'a [Vec<f32>], eps: f32) -> Self {
        let mut cells: HashMap<Vec<i64>, Vec<usize>> = HashMap::new();
        if vectors.first().is_some_and(|v| v.len() <= GRID_MAX_DIMS) {
            for (i, v) in vectors.iter().enumerate() {
                cells.entry(cell_of(v, eps)).or_default().push(i);
            }
        }
        Self {
            vectors,
            eps,
            cells,
        }
    }

    /// Every point within `eps` of `point`, `point` included.
    fn neighbours(&self, point: usize) -> Vec<usize> {
        let origin = &self.vectors[point];
        let eps2 = f64::from(self.eps) * f64::from(self.eps);
        let close = |i: &usize| squared_distance(origin, &self.vectors[*i]) <= eps2;

        if self.cells.is_empty() {
            return (0..self.vectors.len()).filter(close).collect();
        }
        let home = cell_of(origin, self.eps);
        let mut found = Vec::new();
        for offset in adjacent_offsets(home.len()) {
            let cell: Vec<i64> = home.iter().zip(&offset).map(|(c, o)| c + o).collect();
            if let Some(members) = self.cells.get(&cell) {
                found.extend(members.iter().copied().filter(close));
            }
        }
        found.sort_unstable();
        found
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cell_of(vector: &[f32], eps: f32) -> Vec<i64> {
    vector
        .iter()
        .map(|x| (f64::from(*x) / f64::from(eps)).floor() as i64)
        .collect()
}

/// All `{-1, 0, 1}^dims` offsets.
fn adjacent_offsets(dims: usize) -> Vec<Vec<i64>> {
    (0..dims).fold(vec![Vec::new()], |acc, _| {
        acc.into_iter()
            .flat_map(|prefix| {
                (-1..=1).map(move |d| {
                    let mut next = prefix.clone();
                    next.push(d);
                    next
                })
            })
            .collect()
    })
}

fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_groups_and_an_outlier() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0],
            vec![5.0, 5.0],
            vec![0.1, 0.2],
            vec![5.1, 4.9],
            vec![0.2, 0.0],
            vec![5.0, 5.2],
            vec![20.0, -20.0],
        ]
    }

    #[test]
    fn test_dense_groups_and_noise() {
        let labels = Dbscan::new(0.5, 3)
            .unwrap()
            .fit(&two_groups_and_an_outlier())
            .unwrap();
        assert_eq!(labels, vec![1, 2, 1, 2, 1, 2, Dbscan::NOISE]);
    }

    #[test]
    fn test_border_point_joins_cluster() {
        // both end points lack density of their own but sit next to a core point
        let vectors = vec![vec![0.0], vec![0.3], vec![0.6], vec![1.0]];
        let labels = Dbscan::new(0.45, 3).unwrap().fit(&vectors).unwrap();
        assert_eq!(labels, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_min_pts_larger_than_input() {
        let labels = Dbscan::new(100.0, 10)
            .unwrap()
            .fit(&two_groups_and_an_outlier())
            .unwrap();
        assert!(labels.iter().all(|l| *l == Dbscan::NOISE));
    }

    #[test]
    fn test_grid_matches_linear_scan() {
        let vectors: Vec<Vec<f32>> = (0..40)
            .map(|i| {
                let i = i as f32;
                vec![(i * 0.37).sin() * 3.0, (i * 0.11).cos() * 3.0, i * 0.05]
            })
            .collect();
        let padded: Vec<Vec<f32>> = vectors
            .iter()
            .map(|v| {
                let mut wide = v.clone();
                wide.push(0.0);
                wide
            })
            .collect();

        let dbscan = Dbscan::new(0.6, 3).unwrap();
        assert_eq!(dbscan.fit(&vectors).unwrap(), dbscan.fit(&padded).unwrap());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(Dbscan::new(0.0, 3).is_err());
        assert!(Dbscan::new(f32::NAN, 3).is_err());
        assert!(Dbscan::new(0.5, 0).is_err());
        assert!(Dbscan::new(0.5, 2)
            .unwrap()
            .fit(&[vec![1.0], vec![1.0, 2.0]])
            .is_err());
    }

    #[tokio::test]
    async fn test_clustering_service() {
        let labels = Dbscan::new(1.0, 1)
            .unwrap()
            .cluster(&[vec![0.0], vec![0.5], vec![9.0]])
            .await
            .unwrap();
        assert_eq!(labels, vec![1, 1, 2]);
    }
}
