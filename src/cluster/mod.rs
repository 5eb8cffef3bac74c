pub mod dbscan;
pub mod score;
pub mod tuner;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use dbscan::{cosine_distance, cosine_similarity, ClusterLabel, Dbscan, DistanceMatrix};
pub use score::{
    generate_cluster_description, generate_cluster_name, score_cluster, ClusterBreakdown,
    ClusterScore, ClusterWeights,
};
pub use tuner::{find_knee, k_distances, tune_epsilon};

/// A prompt fed to clustering, with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPrompt {
    pub text: String,
    pub session_id: String,
    pub project_id: String,
    pub timestamp: Option<i64>,
}

/// Non-empty group of prompt indices with its cohesion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptCluster {
    pub id: usize,
    /// Indices into the clustered prompt list, ascending
    pub members: Vec<usize>,
    /// Mean pairwise cosine similarity between members
    pub cohesion: f64,
    /// Member with the highest mean similarity to the others
    pub representative: usize,
}

/// Group labelled points into clusters. Noise points are dropped.
pub fn build_clusters(labels: &[ClusterLabel], matrix: &DistanceMatrix) -> Vec<PromptCluster> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        if let Some(id) = label.cluster_id() {
            groups.entry(id).or_default().push(i);
        }
    }

    groups
        .into_iter()
        .map(|(id, members)| {
            let mean_similarity = |i: usize| -> f64 {
                let others = members.len().saturating_sub(1);
                if others == 0 {
                    return 1.0;
                }
                let total: f64 = members
                    .iter()
                    .filter(|&&j| j != i)
                    .map(|&j| 1.0 - f64::from(matrix.get(i, j)))
                    .sum();
                total / others as f64
            };

            let mut representative = members[0];
            let mut best = f64::MIN;
            let mut sum = 0.0;
            for &m in &members {
                let s = mean_similarity(m);
                sum += s;
                if s > best {
                    best = s;
                    representative = m;
                }
            }

            PromptCluster {
                id,
                cohesion: sum / members.len() as f64,
                members,
                representative,
            }
        })
        .collect()
}
