//! Semantic equivalence clustering of agent responses.
//!
//! Clustering is union-find over pairwise similarity at or above the
//! threshold: two responses land in the same cluster when they are
//! directly or transitively similar enough, so membership never depends
//! on comparison order. The similarity measure itself is pluggable and
//! must be deterministic.

use std::sync::Arc;
use tracing::debug;

use crate::evidence::normalize;
use crate::types::{AgentId, AgentResponse, ClusterGroup};

/// Deterministic pairwise similarity in `[0, 1]`.
pub trait SimilarityScorer: Send + Sync {
    /// Similarity between two responses.
    fn similarity(&self, a: &AgentResponse, b: &AgentResponse) -> f64;
}

/// Cosine similarity over claim embeddings, falling back to exact
/// normalized-text equality when either embedding is missing.
pub struct CosineSimilarity;

impl SimilarityScorer for CosineSimilarity {
    fn similarity(&self, a: &AgentResponse, b: &AgentResponse) -> f64 {
        if let (Some(ea), Some(eb)) = (&a.embedding, &b.embedding) {
            if ea.len() == eb.len() && !ea.is_empty() {
                return cosine(ea, eb);
            }
        }
        match (&a.claim, &b.claim) {
            (Some(ca), Some(cb)) if normalize(ca) == normalize(cb) => 1.0,
            _ => 0.0,
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn seat_rank(agent: AgentId) -> usize {
    AgentId::all()
        .iter()
        .position(|a| *a == agent)
        .unwrap_or(usize::MAX)
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, x: usize, y: usize) {
        let (px, py) = (self.find(x), self.find(y));
        if px != py {
            self.parent[px] = py;
        }
    }
}

/// Groups responses into equivalence clusters.
pub struct Clusterer {
    threshold: f64,
    scorer: Arc<dyn SimilarityScorer>,
}

impl Clusterer {
    /// Create a clusterer with the given threshold and scorer.
    pub fn new(threshold: f64, scorer: Arc<dyn SimilarityScorer>) -> Self {
        Self { threshold, scorer }
    }

    /// Cluster the given `ok` responses.
    ///
    /// Cluster weights are zero here; the consensus calculator assigns
    /// them. Representative choice: highest self-reported confidence,
    /// ties broken by earliest arrival, then by seat order. Output is
    /// fully determined by the response set, independent of input order.
    pub fn cluster(&self, responses: &[AgentResponse]) -> Vec<ClusterGroup> {
        if responses.is_empty() {
            return Vec::new();
        }

        let n = responses.len();
        let mut similarity = vec![vec![1.0f64; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let s = self.scorer.similarity(&responses[i], &responses[j]);
                similarity[i][j] = s;
                similarity[j][i] = s;
            }
        }

        let mut uf = UnionFind::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                if similarity[i][j] >= self.threshold {
                    uf.union(i, j);
                }
            }
        }

        let mut by_root: std::collections::HashMap<usize, Vec<usize>> =
            std::collections::HashMap::new();
        for i in 0..n {
            let root = uf.find(i);
            by_root.entry(root).or_default().push(i);
        }

        let mut groups: Vec<ClusterGroup> = by_root
            .into_values()
            .map(|mut indices| {
                indices.sort_by_key(|&i| seat_rank(responses[i].agent));

                let representative_idx = indices
                    .iter()
                    .copied()
                    .min_by(|&a, &b| {
                        responses[b]
                            .confidence
                            .partial_cmp(&responses[a].confidence)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(responses[a].received_at.cmp(&responses[b].received_at))
                            .then(seat_rank(responses[a].agent).cmp(&seat_rank(responses[b].agent)))
                    })
                    .unwrap_or(indices[0]);

                let cohesion = mean_pairwise(&indices, &similarity);
                ClusterGroup {
                    members: indices.iter().map(|&i| responses[i].agent).collect(),
                    representative: responses[representative_idx]
                        .claim
                        .clone()
                        .unwrap_or_default(),
                    weight: 0.0,
                    cohesion,
                }
            })
            .collect();

        // Deterministic output order: larger clusters first, then seat order.
        groups.sort_by(|a, b| {
            b.members
                .len()
                .cmp(&a.members.len())
                .then_with(|| seat_rank(a.members[0]).cmp(&seat_rank(b.members[0])))
        });

        debug!(
            responses = n,
            clusters = groups.len(),
            threshold = self.threshold,
            "responses clustered"
        );
        groups
    }
}

fn mean_pairwise(indices: &[usize], similarity: &[Vec<f64>]) -> f64 {
    if indices.len() < 2 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for (pos, &i) in indices.iter().enumerate() {
        for &j in &indices[pos + 1..] {
            sum += similarity[i][j];
            count += 1;
        }
    }
    sum / count as f64
}
