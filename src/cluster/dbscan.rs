use std::collections::VecDeque;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// `1 - cosine similarity`, clamped to [0, 2].
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 2.0)
}

/// Dense pairwise cosine distances. Rows are computed in parallel.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f32>,
}

impl DistanceMatrix {
    pub fn build(points: &[Vec<f32>]) -> Self {
        let n = points.len();
        let rows: Vec<Vec<f32>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (0..n)
                    .map(|j| {
                        if i == j {
                            0.0
                        } else {
                            cosine_distance(&points[i], &points[j])
                        }
                    })
                    .collect()
            })
            .collect();
        Self {
            n,
            data: rows.into_iter().flatten().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n..(i + 1) * self.n]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterLabel {
    Noise,
    Cluster(usize),
}

impl ClusterLabel {
    pub fn cluster_id(&self) -> Option<usize> {
        match self {
            ClusterLabel::Cluster(id) => Some(*id),
            ClusterLabel::Noise => None,
        }
    }
}

/// Density-based clustering over a precomputed distance matrix.
///
/// A point is core when its epsilon-neighborhood, itself included, holds at
/// least `min_points` points. Points are visited in input order and cluster
/// ids are assigned in discovery order, so the labelling is deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dbscan {
    pub epsilon: f32,
    pub min_points: usize,
}

impl Dbscan {
    pub fn new(epsilon: f32, min_points: usize) -> Self {
        Self {
            epsilon,
            min_points: min_points.max(1),
        }
    }

    fn neighbors(&self, matrix: &DistanceMatrix, i: usize) -> Vec<usize> {
        matrix
            .row(i)
            .iter()
            .enumerate()
            .filter(|(_, d)| **d <= self.epsilon)
            .map(|(j, _)| j)
            .collect()
    }

    pub fn fit(&self, matrix: &DistanceMatrix) -> Vec<ClusterLabel> {
        let n = matrix.len();
        let mut labels: Vec<Option<ClusterLabel>> = vec![None; n];
        let mut next_id = 0;

        for i in 0..n {
            if labels[i].is_some() {
                continue;
            }
            let seeds = self.neighbors(matrix, i);
            if seeds.len() < self.min_points {
                labels[i] = Some(ClusterLabel::Noise);
                continue;
            }

            let id = next_id;
            next_id += 1;
            labels[i] = Some(ClusterLabel::Cluster(id));

            let mut queue: VecDeque<usize> = seeds.into_iter().filter(|&j| j != i).collect();
            while let Some(q) = queue.pop_front() {
                match labels[q] {
                    // Border point previously marked noise
                    Some(ClusterLabel::Noise) => labels[q] = Some(ClusterLabel::Cluster(id)),
                    Some(ClusterLabel::Cluster(_)) => {}
                    None => {
                        labels[q] = Some(ClusterLabel::Cluster(id));
                        let reach = self.neighbors(matrix, q);
                        if reach.len() >= self.min_points {
                            queue.extend(
                                reach
                                    .into_iter()
                                    .filter(|j| !matches!(labels[*j], Some(ClusterLabel::Cluster(_)))),
                            );
                        }
                    }
                }
            }
        }

        labels
            .into_iter()
            .map(|l| l.unwrap_or(ClusterLabel::Noise))
            .collect()
    }

    pub fn fit_points(&self, points: &[Vec<f32>]) -> Vec<ClusterLabel> {
        self.fit(&DistanceMatrix::build(points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0],
            vec![0.99, 0.05],
            vec![0.98, 0.1],
            vec![0.0, 1.0],
            vec![0.05, 0.99],
            vec![0.1, 0.98],
            vec![-1.0, 0.0],
        ]
    }

    #[test]
    fn distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn matrix_is_symmetric_with_zero_diagonal() {
        let m = DistanceMatrix::build(&points());
        for i in 0..m.len() {
            assert_eq!(m.get(i, i), 0.0);
            for j in 0..m.len() {
                assert!((m.get(i, j) - m.get(j, i)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn finds_two_clusters_and_noise() {
        let labels = Dbscan::new(0.05, 3).fit_points(&points());
        assert_eq!(
            labels,
            vec![
                ClusterLabel::Cluster(0),
                ClusterLabel::Cluster(0),
                ClusterLabel::Cluster(0),
                ClusterLabel::Cluster(1),
                ClusterLabel::Cluster(1),
                ClusterLabel::Cluster(1),
                ClusterLabel::Noise,
            ]
        );
    }

    #[test]
    fn deterministic_for_same_input() {
        let d = Dbscan::new(0.05, 2);
        assert_eq!(d.fit_points(&points()), d.fit_points(&points()));
    }

    #[test]
    fn sparse_points_are_never_core() {
        // Each point has only itself within epsilon
        let labels = Dbscan::new(0.01, 2).fit_points(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(labels.iter().all(|l| *l == ClusterLabel::Noise));
    }

    #[test]
    fn border_point_joins_cluster() {
        // Point 3 is within epsilon of point 2 only; 0..=2 are mutually close
        let pts = vec![
            vec![1.0, 0.0],
            vec![1.0, 0.02],
            vec![1.0, 0.04],
            vec![1.0, 0.4],
        ];
        let m = DistanceMatrix::build(&pts);
        let eps = m.get(2, 3) + 1e-4;
        assert!(m.get(1, 3) > eps);
        let labels = Dbscan::new(eps, 3).fit(&m);
        assert_eq!(labels[3], ClusterLabel::Cluster(0));
    }

    #[test]
    fn empty_input() {
        assert!(Dbscan::new(0.5, 2).fit_points(&[]).is_empty());
    }
}
