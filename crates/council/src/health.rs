//! Per-agent health tracking with rolling-window exclusion.
//!
//! Exclusion follows the circuit-breaker shape: an agent whose failure
//! rate over the rolling window crosses the threshold is excluded from
//! the active pool; after the cooldown it is admitted once as a recovery
//! probe (half-open). A successful probe re-admits it, a failed probe
//! re-excludes it with a fresh cooldown.
//!
//! Locking discipline: the registry lock is held only for counter and
//! status updates, never across an await point.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::HealthConfig;
use crate::types::{AgentId, ResponseStatus};

/// Admission status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    /// Agent participates in deliberations.
    Active,
    /// Agent is skipped by fan-out until a probe succeeds.
    Excluded,
}

#[derive(Debug)]
struct AgentHealth {
    window: VecDeque<(Instant, ResponseStatus)>,
    successes: u64,
    timeouts: u64,
    errors: u64,
    status: AdmissionStatus,
    excluded_at: Option<Instant>,
    probe_inflight: bool,
}

impl AgentHealth {
    fn new() -> Self {
        Self {
            window: VecDeque::new(),
            successes: 0,
            timeouts: 0,
            errors: 0,
            status: AdmissionStatus::Active,
            excluded_at: None,
            probe_inflight: false,
        }
    }

    fn trim(&mut self, config: &HealthConfig, now: Instant) {
        while self.window.len() > config.max_samples {
            self.window.pop_front();
        }
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > config.window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self
            .window
            .iter()
            .filter(|(_, s)| *s != ResponseStatus::Ok)
            .count();
        failures as f64 / self.window.len() as f64
    }

    fn reliability(&self) -> f64 {
        if self.window.is_empty() {
            // New agents are trusted until evidence says otherwise.
            return 1.0;
        }
        (1.0 - self.failure_rate()).clamp(0.0, 1.0)
    }
}

/// Per-agent health snapshot for operational introspection.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealthSnapshot {
    pub agent: AgentId,
    pub status: AdmissionStatus,
    pub successes: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub reliability: f64,
}

/// Summary of the whole council's health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub active: usize,
    pub excluded: usize,
    pub agents: Vec<AgentHealthSnapshot>,
}

/// Synchronized registry of per-agent health state.
///
/// State lives for the process lifetime and is reset only by explicit
/// operator action ([`HealthMonitor::reset`]).
pub struct HealthMonitor {
    config: HealthConfig,
    registry: RwLock<HashMap<AgentId, AgentHealth>>,
}

impl HealthMonitor {
    /// Create a monitor with the given tuning.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Record one invocation outcome for an agent and re-evaluate its
    /// admission status.
    pub fn record_outcome(&self, agent: AgentId, status: ResponseStatus) {
        let now = Instant::now();
        let mut registry = self.registry.write().expect("health registry poisoned");
        let entry = registry.entry(agent).or_insert_with(AgentHealth::new);

        entry.window.push_back((now, status));
        entry.trim(&self.config, now);
        match status {
            ResponseStatus::Ok => entry.successes += 1,
            ResponseStatus::Timeout => entry.timeouts += 1,
            ResponseStatus::Error => entry.errors += 1,
        }

        match (entry.status, status) {
            (AdmissionStatus::Excluded, ResponseStatus::Ok) => {
                entry.status = AdmissionStatus::Active;
                entry.excluded_at = None;
                entry.probe_inflight = false;
                info!(agent = %agent, "agent re-admitted after successful probe");
            }
            (AdmissionStatus::Excluded, _) => {
                // Failed probe: fresh cooldown.
                entry.excluded_at = Some(now);
                entry.probe_inflight = false;
            }
            (AdmissionStatus::Active, _) => {
                let rate = entry.failure_rate();
                if entry.window.len() >= self.config.min_samples
                    && rate >= self.config.failure_rate_threshold
                {
                    entry.status = AdmissionStatus::Excluded;
                    entry.excluded_at = Some(now);
                    entry.probe_inflight = false;
                    warn!(
                        agent = %agent,
                        failure_rate = rate,
                        samples = entry.window.len(),
                        "agent excluded from active pool"
                    );
                }
            }
        }
    }

    /// The subset of `candidates` currently admitted. Excluded agents
    /// whose cooldown has elapsed are admitted once as recovery probes.
    pub fn active_pool(&self, candidates: &[AgentId]) -> Vec<AgentId> {
        let mut registry = self.registry.write().expect("health registry poisoned");
        let now = Instant::now();

        candidates
            .iter()
            .copied()
            .filter(|agent| {
                let entry = registry.entry(*agent).or_insert_with(AgentHealth::new);
                match entry.status {
                    AdmissionStatus::Active => true,
                    AdmissionStatus::Excluded => {
                        let cooled = entry
                            .excluded_at
                            .map(|at| now.duration_since(at) >= self.config.cooldown)
                            .unwrap_or(true);
                        if cooled && !entry.probe_inflight {
                            entry.probe_inflight = true;
                            info!(agent = %agent, "admitting excluded agent as recovery probe");
                            true
                        } else {
                            false
                        }
                    }
                }
            })
            .collect()
    }

    /// Reliability score in `[0, 1]` for an agent, from its rolling window.
    pub fn reliability(&self, agent: AgentId) -> f64 {
        let registry = self.registry.read().expect("health registry poisoned");
        registry.get(&agent).map(|e| e.reliability()).unwrap_or(1.0)
    }

    /// Reliability scores for a set of agents.
    pub fn reliability_map(&self, agents: &[AgentId]) -> HashMap<AgentId, f64> {
        agents
            .iter()
            .map(|a| (*a, self.reliability(*a)))
            .collect()
    }

    /// Operator action: clear all recorded state for an agent.
    pub fn reset(&self, agent: AgentId) {
        let mut registry = self.registry.write().expect("health registry poisoned");
        registry.remove(&agent);
        info!(agent = %agent, "agent health state reset");
    }

    /// Snapshot of all tracked agents.
    pub fn summary(&self) -> HealthSummary {
        let registry = self.registry.read().expect("health registry poisoned");
        let mut agents: Vec<AgentHealthSnapshot> = registry
            .iter()
            .map(|(agent, entry)| AgentHealthSnapshot {
                agent: *agent,
                status: entry.status,
                successes: entry.successes,
                timeouts: entry.timeouts,
                errors: entry.errors,
                reliability: entry.reliability(),
            })
            .collect();
        agents.sort_by_key(|s| s.agent);

        let active = agents
            .iter()
            .filter(|s| s.status == AdmissionStatus::Active)
            .count();
        HealthSummary {
            total: agents.len(),
            active,
            excluded: agents.len() - active,
            agents,
        }
    }
}
