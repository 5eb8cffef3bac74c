use super::dbscan::DistanceMatrix;

/// Distance from every point to its k-th nearest other point, sorted
/// ascending. Points with fewer than `k` others use their farthest one.
pub fn k_distances(matrix: &DistanceMatrix, k: usize) -> Vec<f32> {
    let n = matrix.len();
    if n < 2 || k == 0 {
        return Vec::new();
    }

    let mut result: Vec<f32> = (0..n)
        .map(|i| {
            let mut others: Vec<f32> = matrix
                .row(i)
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, d)| *d)
                .collect();
            others.sort_by(|a, b| a.total_cmp(b));
            others[k.min(others.len()) - 1]
        })
        .collect();
    result.sort_by(|a, b| a.total_cmp(b));
    result
}

/// Index of the point farthest from the chord joining the first and last
/// values of an ascending curve. A straight line has no knee, so the
/// middle index is used.
pub fn find_knee(sorted: &[f32]) -> Option<usize> {
    match sorted.len() {
        0 => return None,
        1 | 2 => return Some(sorted.len() - 1),
        _ => {}
    }

    let last = sorted.len() - 1;
    let (x0, y0) = (0.0f64, f64::from(sorted[0]));
    let (x1, y1) = (last as f64, f64::from(sorted[last]));
    let dx = x1 - x0;
    let dy = y1 - y0;
    let norm = (dx * dx + dy * dy).sqrt();

    let mut best = (last / 2, 0.0f64);
    for (i, y) in sorted.iter().enumerate() {
        let d = (dy * i as f64 - dx * f64::from(*y) + x1 * y0 - y1 * x0).abs() / norm;
        if d > best.1 + 1e-6 {
            best = (i, d);
        }
    }
    Some(best.0)
}

/// Pick epsilon at the knee of the k-distance curve (k = `min_points`).
/// The value is always one of the observed k-distances.
pub fn tune_epsilon(matrix: &DistanceMatrix, min_points: usize) -> Option<f32> {
    let distances = k_distances(matrix, min_points.max(1));
    let knee = find_knee(&distances)?;
    Some(distances[knee])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_distances_are_sorted_and_exclude_self() {
        let pts = vec![vec![1.0, 0.0], vec![1.0, 0.1], vec![0.0, 1.0]];
        let m = DistanceMatrix::build(&pts);
        let kd = k_distances(&m, 1);
        assert_eq!(kd.len(), 3);
        assert!(kd.windows(2).all(|w| w[0] <= w[1]));
        assert!(kd[0] > 0.0);
    }

    #[test]
    fn k_larger_than_corpus_uses_farthest() {
        let pts = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let m = DistanceMatrix::build(&pts);
        let kd = k_distances(&m, 5);
        assert!(kd.iter().all(|d| (*d - 1.0).abs() < 1e-6));
    }

    #[test]
    fn knee_of_hockey_stick() {
        let curve = [0.01, 0.02, 0.02, 0.03, 0.03, 0.04, 0.3, 0.8, 0.9];
        assert_eq!(find_knee(&curve), Some(5));
    }

    #[test]
    fn knee_of_line_is_middle() {
        let line = [0.1, 0.2, 0.3, 0.4, 0.5];
        assert_eq!(find_knee(&line), Some(2));
        assert_eq!(find_knee(&[]), None);
        assert_eq!(find_knee(&[0.4]), Some(0));
    }

    #[test]
    fn tuned_epsilon_is_within_observed_range() {
        let pts: Vec<Vec<f32>> = (0..20)
            .map(|i| {
                let a = i as f32 * 0.07;
                vec![a.cos(), a.sin(), (i % 3) as f32 * 0.1]
            })
            .collect();
        let m = DistanceMatrix::build(&pts);
        let kd = k_distances(&m, 3);
        let eps = tune_epsilon(&m, 3).unwrap();
        assert!(eps >= kd[0] && eps <= kd[kd.len() - 1]);
    }

    #[test]
    fn too_few_points_yield_nothing() {
        let m = DistanceMatrix::build(&[vec![1.0]]);
        assert_eq!(tune_epsilon(&m, 2), None);
    }
}
