//! Weighted consensus decision over response clusters.
//!
//! Each response weighs reliability × self-reported confidence; cluster
//! weights are member sums normalized over every participating response,
//! so they always sum to 1.0. Consensus requires the top cluster to reach
//! the majority threshold; otherwise every cluster is reported as a
//! minority view so disagreement stays visible.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::types::{
    AgentId, AgentResponse, ClusterGroup, ConsensusResult, ConsensusStatus, ResponseWeight,
};

/// Outcome of a voting round, including the per-response weights that the
/// audit record must carry.
#[derive(Debug, Clone)]
pub struct ConsensusDecision {
    /// The result returned to the caller.
    pub result: ConsensusResult,
    /// Normalized per-response weights used in the vote.
    pub weights: Vec<ResponseWeight>,
}

/// Computes whether the clustered responses constitute consensus.
pub struct ConsensusCalculator {
    majority_threshold: f64,
}

impl ConsensusCalculator {
    /// Create a calculator with the given majority threshold.
    pub fn new(majority_threshold: f64) -> Self {
        Self { majority_threshold }
    }

    /// Decide consensus for one deliberation.
    ///
    /// `responses` are the collected `ok` responses (quorum already
    /// verified by the coordinator); `reliability` maps each seat to its
    /// health-derived score in `[0, 1]`.
    pub fn decide(
        &self,
        clusters: Vec<ClusterGroup>,
        responses: &[AgentResponse],
        reliability: &HashMap<AgentId, f64>,
        evidence_ids: Vec<String>,
    ) -> ConsensusDecision {
        let raw: Vec<(AgentId, f64)> = responses
            .iter()
            .map(|r| {
                let rel = reliability.get(&r.agent).copied().unwrap_or(1.0);
                (r.agent, rel.clamp(0.0, 1.0) * r.confidence)
            })
            .collect();

        let total: f64 = raw.iter().map(|(_, w)| w).sum();
        // Degenerate case: every weight is zero. Fall back to uniform
        // weights so normalization still sums to 1.0.
        let weights: Vec<ResponseWeight> = if total > 0.0 {
            raw.iter()
                .map(|(agent, w)| ResponseWeight {
                    agent: *agent,
                    weight: w / total,
                })
                .collect()
        } else {
            let uniform = 1.0 / responses.len().max(1) as f64;
            raw.iter()
                .map(|(agent, _)| ResponseWeight {
                    agent: *agent,
                    weight: uniform,
                })
                .collect()
        };

        let by_agent: HashMap<AgentId, f64> =
            weights.iter().map(|w| (w.agent, w.weight)).collect();

        let mut clusters: Vec<ClusterGroup> = clusters
            .into_iter()
            .map(|mut cluster| {
                cluster.weight = cluster
                    .members
                    .iter()
                    .map(|m| by_agent.get(m).copied().unwrap_or(0.0))
                    .sum();
                cluster
            })
            .collect();

        clusters.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.members.cmp(&b.members))
        });

        debug!(
            clusters = clusters.len(),
            top_weight = clusters.first().map(|c| c.weight).unwrap_or(0.0),
            threshold = self.majority_threshold,
            "cluster weights computed"
        );

        let result = match clusters.first() {
            Some(top) if top.weight >= self.majority_threshold => {
                info!(
                    winning_weight = top.weight,
                    members = top.members.len(),
                    "consensus reached"
                );
                let winning = top.clone();
                let minority = clusters[1..].to_vec();
                ConsensusResult {
                    status: ConsensusStatus::ConsensusReached,
                    confidence: winning.weight,
                    winning_cluster: Some(winning),
                    minority_clusters: minority,
                    evidence_ids,
                }
            }
            _ => {
                info!(clusters = clusters.len(), "no consensus; reporting all clusters");
                ConsensusResult {
                    status: ConsensusStatus::NoConsensus,
                    winning_cluster: None,
                    confidence: 0.0,
                    minority_clusters: clusters,
                    evidence_ids,
                }
            }
        };

        ConsensusDecision { result, weights }
    }
}
