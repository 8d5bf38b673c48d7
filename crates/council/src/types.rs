//! Core data model for council deliberations.
//!
//! Everything a deliberation produces is immutable once created: queries,
//! evidence bundles, agent responses, and the final consensus result. The
//! only continuously mutated state in the crate lives in the health
//! monitor's registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identifier for a council seat — one independent reasoning agent.
///
/// The set of seats is closed and explicit; agents are never addressed by
/// ad-hoc string identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// Primary analytical reasoner.
    Analyst,
    /// Adversarial seat — probes for weaknesses in the obvious answer.
    Skeptic,
    /// Evidence-first seat — weighs retrieved passages heavily.
    Empiricist,
    /// Cross-source synthesis seat.
    Synthesist,
    /// General-purpose fallback seat.
    Generalist,
}

impl AgentId {
    /// All council seats, in canonical order.
    pub fn all() -> &'static [AgentId] {
        &[
            AgentId::Analyst,
            AgentId::Skeptic,
            AgentId::Empiricist,
            AgentId::Synthesist,
            AgentId::Generalist,
        ]
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentId::Analyst => write!(f, "analyst"),
            AgentId::Skeptic => write!(f, "skeptic"),
            AgentId::Empiricist => write!(f, "empiricist"),
            AgentId::Synthesist => write!(f, "synthesist"),
            AgentId::Generalist => write!(f, "generalist"),
        }
    }
}

/// A query submitted for deliberation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Unique query identifier.
    pub id: Uuid,
    /// Raw query text.
    pub text: String,
    /// Tenant/context tag assigned upstream.
    pub context_tag: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Query {
    /// Create a new query.
    pub fn new(text: impl Into<String>, context_tag: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            context_tag: context_tag.into(),
            created_at: Utc::now(),
        }
    }
}

/// One ranked evidence passage from the knowledge store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Identifier of the source passage in the knowledge store.
    pub source_id: String,
    /// Excerpt text.
    pub excerpt: String,
    /// Relevance score assigned by the store, higher is better.
    pub relevance: f64,
}

/// Retrieved evidence for one query fingerprint.
///
/// Shared read-only (via [`Arc`]) by every agent answering the same query
/// within the TTL window. Owned by the evidence cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBundle {
    /// Fingerprint of the normalized query text.
    pub fingerprint: String,
    /// Ranked evidence passages.
    pub items: Vec<EvidenceItem>,
    /// Retrieval timestamp.
    pub retrieved_at: DateTime<Utc>,
    /// Time-to-live for cache reuse.
    pub ttl: Duration,
}

impl EvidenceBundle {
    /// Whether this bundle has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.retrieved_at);
        age.to_std().map(|a| a >= self.ttl).unwrap_or(false)
    }

    /// Source ids of all contained evidence items.
    pub fn source_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.source_id.clone()).collect()
    }
}

/// Shared handle to an evidence bundle.
pub type SharedEvidence = Arc<EvidenceBundle>;

/// Outcome status of a single agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Agent produced a claim within the deadline.
    Ok,
    /// Agent exceeded the per-agent deadline.
    Timeout,
    /// Agent invocation failed for a non-timeout reason.
    Error,
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseStatus::Ok => write!(f, "ok"),
            ResponseStatus::Timeout => write!(f, "timeout"),
            ResponseStatus::Error => write!(f, "error"),
        }
    }
}

/// One agent's response within a deliberation. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// The responding seat.
    pub agent: AgentId,
    /// Produced claim text. `None` for timeout/error outcomes.
    pub claim: Option<String>,
    /// Self-reported confidence in `[0, 1]`. Zero for timeout/error.
    pub confidence: f64,
    /// Optional embedding of the claim, used for semantic clustering.
    pub embedding: Option<Vec<f32>>,
    /// Invocation latency in milliseconds.
    pub latency_ms: u64,
    /// Invocation outcome.
    pub status: ResponseStatus,
    /// Arrival timestamp, used as a clustering tie-break.
    pub received_at: DateTime<Utc>,
}

impl AgentResponse {
    /// Build a successful response. Confidence is clamped to `[0, 1]`.
    pub fn ok(
        agent: AgentId,
        claim: String,
        confidence: f64,
        embedding: Option<Vec<f32>>,
        latency_ms: u64,
    ) -> Self {
        Self {
            agent,
            claim: Some(claim),
            confidence: confidence.clamp(0.0, 1.0),
            embedding,
            latency_ms,
            status: ResponseStatus::Ok,
            received_at: Utc::now(),
        }
    }

    /// Build a timeout response. Carries no claim.
    pub fn timed_out(agent: AgentId, latency_ms: u64) -> Self {
        Self {
            agent,
            claim: None,
            confidence: 0.0,
            embedding: None,
            latency_ms,
            status: ResponseStatus::Timeout,
            received_at: Utc::now(),
        }
    }

    /// Build an error response. Carries no claim.
    pub fn failed(agent: AgentId, latency_ms: u64) -> Self {
        Self {
            agent,
            claim: None,
            confidence: 0.0,
            embedding: None,
            latency_ms,
            status: ResponseStatus::Error,
            received_at: Utc::now(),
        }
    }

    /// Whether this response participates in clustering and voting.
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok && self.claim.is_some()
    }
}

/// A group of semantically equivalent agent responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGroup {
    /// Seats whose responses fell into this cluster, in canonical order.
    pub members: Vec<AgentId>,
    /// Representative claim text for the cluster.
    pub representative: String,
    /// Normalized aggregate weight in `[0, 1]`. Zero until voting runs.
    pub weight: f64,
    /// Mean pairwise similarity within the cluster (1.0 for singletons).
    pub cohesion: f64,
}

/// Final status of a deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    /// Top cluster weight met the majority threshold.
    ConsensusReached,
    /// Quorum met but no cluster reached the majority threshold.
    NoConsensus,
    /// Fewer `ok` responses than the configured quorum.
    InsufficientQuorum,
}

impl std::fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusStatus::ConsensusReached => write!(f, "consensus_reached"),
            ConsensusStatus::NoConsensus => write!(f, "no_consensus"),
            ConsensusStatus::InsufficientQuorum => write!(f, "insufficient_quorum"),
        }
    }
}

/// Outcome of a deliberation, returned to the caller and embedded in the
/// audit record. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Final deliberation status.
    pub status: ConsensusStatus,
    /// Winning cluster when consensus was reached.
    pub winning_cluster: Option<ClusterGroup>,
    /// Confidence score: the winning cluster's normalized weight, or zero.
    pub confidence: f64,
    /// All non-winning clusters with their weights. When no consensus was
    /// reached this holds every cluster, so disagreement is exposed rather
    /// than hidden behind a forced majority pick.
    pub minority_clusters: Vec<ClusterGroup>,
    /// Evidence ids that grounded the deliberation.
    pub evidence_ids: Vec<String>,
}

impl ConsensusResult {
    /// Whether consensus was reached.
    pub fn is_consensus(&self) -> bool {
        self.status == ConsensusStatus::ConsensusReached
    }
}

/// Weight attributed to one agent's response during voting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseWeight {
    /// The weighted seat.
    pub agent: AgentId,
    /// Normalized weight (reliability × confidence, over the total).
    pub weight: f64,
}

/// Immutable, complete record of one deliberation. Append-only: once
/// written to a sink it is never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Deliberation identifier.
    pub deliberation_id: Uuid,
    /// The query that was deliberated.
    pub query: Query,
    /// Evidence ids used for grounding.
    pub evidence_ids: Vec<String>,
    /// Every collected response, including timeouts and errors.
    pub responses: Vec<AgentResponse>,
    /// Cluster assignment (empty when quorum was not met).
    pub clusters: Vec<ClusterGroup>,
    /// Normalized per-response weights used in voting.
    pub weights: Vec<ResponseWeight>,
    /// The decision that was returned to the caller.
    pub result: ConsensusResult,
    /// Write timestamp.
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_order_and_display() {
        let all = AgentId::all();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(AgentId::Skeptic.to_string(), "skeptic");
    }

    #[test]
    fn test_agent_id_serde() {
        let json = serde_json::to_string(&AgentId::Empiricist).unwrap();
        assert_eq!(json, "\"empiricist\"");
        let parsed: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, AgentId::Empiricist);
    }

    #[test]
    fn test_confidence_clamped() {
        let resp = AgentResponse::ok(AgentId::Analyst, "x".into(), 1.7, None, 10);
        assert!((resp.confidence - 1.0).abs() < f64::EPSILON);
        let resp = AgentResponse::ok(AgentId::Analyst, "x".into(), -0.3, None, 10);
        assert_eq!(resp.confidence, 0.0);
    }

    #[test]
    fn test_failed_responses_carry_no_claim() {
        let timeout = AgentResponse::timed_out(AgentId::Skeptic, 3000);
        assert_eq!(timeout.status, ResponseStatus::Timeout);
        assert!(timeout.claim.is_none());
        assert!(!timeout.is_ok());

        let error = AgentResponse::failed(AgentId::Skeptic, 12);
        assert_eq!(error.status, ResponseStatus::Error);
        assert!(!error.is_ok());
    }

    #[test]
    fn test_bundle_expiry() {
        let fresh = EvidenceBundle {
            fingerprint: "fp".into(),
            items: vec![],
            retrieved_at: Utc::now(),
            ttl: Duration::from_secs(300),
        };
        assert!(!fresh.is_expired());

        let stale = EvidenceBundle {
            retrieved_at: Utc::now() - chrono::Duration::seconds(600),
            ..fresh
        };
        assert!(stale.is_expired());
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&ConsensusStatus::InsufficientQuorum).unwrap();
        assert_eq!(json, "\"insufficient_quorum\"");
        assert_eq!(
            serde_json::to_string(&ResponseStatus::Timeout).unwrap(),
            "\"timeout\""
        );
    }
}
