//! Council: multi-agent consensus deliberation.
//!
//! A [`coordinator::Coordinator`] answers a query by fanning it out to a
//! pool of independent reasoning agents, each grounded by the same cached
//! evidence bundle, then clustering the returned claims by semantic
//! similarity and running a reliability-weighted vote. Every deliberation
//! ends with an immutable audit record; if the record cannot be written,
//! the deliberation fails.
//!
//! Module map:
//! - [`types`] — immutable data model (queries, evidence, responses, results)
//! - [`config`] — typed configuration with TOML loading and validation
//! - [`evidence`] — knowledge-store boundary and single-flight TTL cache
//! - [`agent`] — reasoning-agent seam, deadline wrapper, HTTP backend
//! - [`health`] — rolling-window exclusion and recovery probes
//! - [`semantic`] — union-find clustering over pairwise similarity
//! - [`consensus`] — weighted majority voting
//! - [`audit`] — append-only deliberation records
//! - [`coordinator`] — the deliberation pipeline

pub mod agent;
pub mod audit;
pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod error;
pub mod evidence;
pub mod health;
pub mod semantic;
pub mod types;

pub use agent::{AgentAnswer, AgentError, ReasoningAgent, ScriptedAgent};
pub use audit::{AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use config::{CouncilConfig, HealthConfig};
pub use coordinator::Coordinator;
pub use error::{CouncilResult, DeliberationError};
pub use evidence::{KnowledgeStore, KnowledgeStoreError};
pub use types::{
    AgentId, AgentResponse, AuditRecord, ConsensusResult, ConsensusStatus, EvidenceBundle,
    EvidenceItem, Query, ResponseStatus,
};
