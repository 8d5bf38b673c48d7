//! Deliberation orchestration.
//!
//! The coordinator owns one deliberation end to end: retrieve evidence,
//! fan the query out to the active pool under per-agent deadlines,
//! collect every outcome, cluster the successful claims, run the weighted
//! vote, and persist the audit record. The audit write is the last step
//! and is fatal on failure; a deliberation whose decision cannot be
//! recorded did not happen.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentWrapper, ReasoningAgent};
use crate::audit::{AuditRecorder, AuditSink};
use crate::config::CouncilConfig;
use crate::consensus::{ConsensusCalculator, ConsensusDecision};
use crate::error::{CouncilResult, DeliberationError};
use crate::evidence::{EvidenceRetriever, KnowledgeStore};
use crate::health::{HealthMonitor, HealthSummary};
use crate::semantic::{Clusterer, CosineSimilarity, SimilarityScorer};
use crate::types::{
    AgentId, AgentResponse, AuditRecord, ConsensusResult, ConsensusStatus, Query,
};

/// Orchestrates council deliberations.
pub struct Coordinator {
    wrappers: Vec<AgentWrapper>,
    health: Arc<HealthMonitor>,
    retriever: Arc<EvidenceRetriever>,
    clusterer: Clusterer,
    calculator: ConsensusCalculator,
    recorder: AuditRecorder,
    config: CouncilConfig,
}

impl Coordinator {
    /// Build a coordinator from its parts, validating the configuration.
    ///
    /// Agents beyond `agent_pool_size` are not seated.
    pub fn new(
        agents: Vec<Arc<dyn ReasoningAgent>>,
        store: Arc<dyn KnowledgeStore>,
        sink: Arc<dyn AuditSink>,
        config: CouncilConfig,
    ) -> CouncilResult<Self> {
        Self::with_scorer(agents, store, sink, config, Arc::new(CosineSimilarity))
    }

    /// Like [`Coordinator::new`] with a custom similarity scorer.
    pub fn with_scorer(
        mut agents: Vec<Arc<dyn ReasoningAgent>>,
        store: Arc<dyn KnowledgeStore>,
        sink: Arc<dyn AuditSink>,
        config: CouncilConfig,
        scorer: Arc<dyn SimilarityScorer>,
    ) -> CouncilResult<Self> {
        config.validate()?;
        agents.truncate(config.agent_pool_size);

        // One agent per seat: a duplicated seat would double-vote while
        // health tracking and weight aggregation see a single agent.
        let mut seats = std::collections::HashSet::new();
        for agent in &agents {
            if !seats.insert(agent.id()) {
                return Err(DeliberationError::InvalidConfig {
                    reason: format!("seat {} is occupied by more than one agent", agent.id()),
                });
            }
        }

        let wrappers = agents
            .into_iter()
            .map(|agent| AgentWrapper::new(agent, config.per_agent_timeout))
            .collect();

        Ok(Self {
            wrappers,
            health: Arc::new(HealthMonitor::new(config.health.clone())),
            retriever: Arc::new(EvidenceRetriever::new(store, config.evidence_ttl)),
            clusterer: Clusterer::new(config.similarity_threshold, scorer),
            calculator: ConsensusCalculator::new(config.majority_threshold),
            recorder: AuditRecorder::new(sink),
            config,
        })
    }

    /// Seats currently configured into the council.
    pub fn seats(&self) -> Vec<AgentId> {
        self.wrappers.iter().map(|w| w.id()).collect()
    }

    /// Health snapshot across all tracked agents.
    pub fn health_summary(&self) -> HealthSummary {
        self.health.summary()
    }

    /// Operator action: clear health state for one agent.
    pub fn reset_agent_health(&self, agent: AgentId) {
        self.health.reset(agent);
    }

    /// Run one full deliberation for a query.
    ///
    /// Evidence retrieval failure aborts before any agent runs and writes
    /// no audit record. Every other outcome, including insufficient
    /// quorum, is recorded.
    pub async fn resolve(&self, query: &Query) -> CouncilResult<ConsensusResult> {
        let deliberation_id = Uuid::new_v4();
        info!(
            deliberation_id = %deliberation_id,
            query_id = %query.id,
            context = %query.context_tag,
            "deliberation started"
        );

        // Grounding comes first: without evidence there is nothing for the
        // agents to reason over.
        let evidence = self.retriever.retrieve(query).await?;
        let evidence_ids = evidence.source_ids();

        let candidates = self.seats();
        let pool = self.health.active_pool(&candidates);
        if pool.len() < candidates.len() {
            warn!(
                deliberation_id = %deliberation_id,
                seated = candidates.len(),
                active = pool.len(),
                "degraded agents excluded from fan-out"
            );
        }

        let mut responses = self.fan_out(query, &evidence, &pool).await;
        for response in &responses {
            self.health.record_outcome(response.agent, response.status);
        }
        responses.sort_by_key(|r| r.agent);

        let ok_responses: Vec<AgentResponse> =
            responses.iter().filter(|r| r.is_ok()).cloned().collect();

        let decision = if ok_responses.len() < self.config.min_quorum {
            warn!(
                deliberation_id = %deliberation_id,
                ok = ok_responses.len(),
                min_quorum = self.config.min_quorum,
                "quorum not met"
            );
            ConsensusDecision {
                result: ConsensusResult {
                    status: ConsensusStatus::InsufficientQuorum,
                    winning_cluster: None,
                    confidence: 0.0,
                    minority_clusters: Vec::new(),
                    evidence_ids: evidence_ids.clone(),
                },
                weights: Vec::new(),
            }
        } else {
            let clusters = self.clusterer.cluster(&ok_responses);
            let reliability = self.health.reliability_map(&pool);
            self.calculator
                .decide(clusters, &ok_responses, &reliability, evidence_ids.clone())
        };

        let record = AuditRecord {
            id: Uuid::new_v4(),
            deliberation_id,
            query: query.clone(),
            evidence_ids,
            responses,
            clusters: decision
                .result
                .winning_cluster
                .iter()
                .cloned()
                .chain(decision.result.minority_clusters.iter().cloned())
                .collect(),
            weights: decision.weights,
            result: decision.result.clone(),
            recorded_at: chrono::Utc::now(),
        };
        self.recorder.record(&record).await?;

        info!(
            deliberation_id = %deliberation_id,
            status = %decision.result.status,
            confidence = decision.result.confidence,
            "deliberation completed"
        );
        Ok(decision.result)
    }

    /// Invoke every pooled agent concurrently and collect all outcomes.
    /// The wrapper converts deadline expiry and failures into responses,
    /// so no seat in the pool is ever silently dropped.
    async fn fan_out(
        &self,
        query: &Query,
        evidence: &crate::types::SharedEvidence,
        pool: &[AgentId],
    ) -> Vec<AgentResponse> {
        let mut tasks = JoinSet::new();
        for wrapper in &self.wrappers {
            if !pool.contains(&wrapper.id()) {
                continue;
            }
            let wrapper = wrapper.clone();
            let query = query.clone();
            let evidence = Arc::clone(evidence);
            tasks.spawn(async move { wrapper.invoke(&query, &evidence).await });
        }

        let mut responses = Vec::with_capacity(pool.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(response) => responses.push(response),
                Err(e) => warn!(error = %e, "agent task aborted"),
            }
        }
        // A seat whose task panicked or was aborted still gets an error
        // outcome; health bookkeeping (probe admission included) must see
        // every pooled seat exactly once.
        for &agent in pool {
            if !responses.iter().any(|r| r.agent == agent) {
                responses.push(AgentResponse::failed(agent, 0));
            }
        }
        responses
    }
}
