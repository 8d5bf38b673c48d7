//! Typed configuration for the council.
//!
//! Defaults carry the design values (3-second agent deadline, 0.66 majority,
//! 0.95 semantic threshold, 5-minute evidence TTL). Configuration can also
//! be loaded from a TOML file with durations expressed in integer units.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{CouncilResult, DeliberationError};
use crate::types::AgentId;

/// Health monitor tuning.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Rolling window over which failure rate is evaluated.
    pub window: Duration,
    /// Maximum samples retained per agent.
    pub max_samples: usize,
    /// Minimum samples in the window before exclusion may trigger.
    /// Prevents flapping on a single failure.
    pub min_samples: usize,
    /// Failure rate in the window at or above which an agent is excluded.
    pub failure_rate_threshold: f64,
    /// Exclusion period before a recovery probe is admitted.
    pub cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(120),
            max_samples: 50,
            min_samples: 4,
            failure_rate_threshold: 0.5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Top-level council configuration.
#[derive(Debug, Clone)]
pub struct CouncilConfig {
    /// Maximum number of seats fanned out to per deliberation.
    pub agent_pool_size: usize,
    /// Deadline for each agent invocation.
    pub per_agent_timeout: Duration,
    /// Minimum `ok` responses before voting is attempted.
    pub min_quorum: usize,
    /// Normalized weight the top cluster must reach for consensus.
    pub majority_threshold: f64,
    /// Floor for `min_quorum`. A quorum below this is rejected at
    /// validation time, so a single-agent "consensus" cannot be configured.
    pub min_evidence_quorum: usize,
    /// Pairwise similarity at or above which responses are equivalent.
    pub similarity_threshold: f64,
    /// Time-to-live for cached evidence bundles.
    pub evidence_ttl: Duration,
    /// Health monitor tuning.
    pub health: HealthConfig,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            agent_pool_size: 3,
            per_agent_timeout: Duration::from_secs(3),
            min_quorum: 2,
            majority_threshold: 0.66,
            min_evidence_quorum: 2,
            similarity_threshold: 0.95,
            evidence_ttl: Duration::from_secs(300),
            health: HealthConfig::default(),
        }
    }
}

impl CouncilConfig {
    /// Validate invariants between fields.
    pub fn validate(&self) -> CouncilResult<()> {
        if self.agent_pool_size == 0 || self.agent_pool_size > AgentId::all().len() {
            return Err(DeliberationError::InvalidConfig {
                reason: format!(
                    "agent_pool_size must be in 1..={}, got {}",
                    AgentId::all().len(),
                    self.agent_pool_size
                ),
            });
        }
        if self.min_quorum < self.min_evidence_quorum {
            return Err(DeliberationError::InvalidConfig {
                reason: format!(
                    "min_quorum {} is below the evidence floor {}",
                    self.min_quorum, self.min_evidence_quorum
                ),
            });
        }
        if self.min_quorum > self.agent_pool_size {
            return Err(DeliberationError::InvalidConfig {
                reason: format!(
                    "min_quorum {} exceeds agent_pool_size {}",
                    self.min_quorum, self.agent_pool_size
                ),
            });
        }
        if !(0.5..=1.0).contains(&self.majority_threshold) {
            return Err(DeliberationError::InvalidConfig {
                reason: format!(
                    "majority_threshold must be in [0.5, 1.0], got {}",
                    self.majority_threshold
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) || self.similarity_threshold == 0.0 {
            return Err(DeliberationError::InvalidConfig {
                reason: format!(
                    "similarity_threshold must be in (0.0, 1.0], got {}",
                    self.similarity_threshold
                ),
            });
        }
        if self.per_agent_timeout.is_zero() {
            return Err(DeliberationError::InvalidConfig {
                reason: "per_agent_timeout must be non-zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.health.failure_rate_threshold)
            || self.health.failure_rate_threshold == 0.0
        {
            return Err(DeliberationError::InvalidConfig {
                reason: format!(
                    "failure_rate_threshold must be in (0.0, 1.0], got {}",
                    self.health.failure_rate_threshold
                ),
            });
        }
        if self.health.min_samples == 0 || self.health.min_samples > self.health.max_samples {
            return Err(DeliberationError::InvalidConfig {
                reason: "health.min_samples must be in 1..=max_samples".into(),
            });
        }
        Ok(())
    }

    /// Apply `COUNCIL_*` environment overrides on top of this
    /// configuration. Unset or unparsable variables leave the field
    /// untouched; the result is validated before being returned.
    pub fn overlay_env(mut self) -> CouncilResult<Self> {
        if let Some(v) = env_parse::<usize>("COUNCIL_AGENT_POOL_SIZE") {
            self.agent_pool_size = v;
        }
        if let Some(v) = env_parse::<u64>("COUNCIL_PER_AGENT_TIMEOUT_MS") {
            self.per_agent_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<usize>("COUNCIL_MIN_QUORUM") {
            self.min_quorum = v;
        }
        if let Some(v) = env_parse::<f64>("COUNCIL_MAJORITY_THRESHOLD") {
            self.majority_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("COUNCIL_SIMILARITY_THRESHOLD") {
            self.similarity_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("COUNCIL_EVIDENCE_TTL_SECS") {
            self.evidence_ttl = Duration::from_secs(v);
        }
        self.validate()?;
        Ok(self)
    }

    /// Load configuration from a TOML file. Missing keys fall back to the
    /// design defaults; the result is validated before being returned.
    pub fn from_toml_file(path: impl AsRef<Path>) -> CouncilResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DeliberationError::InvalidConfig {
                reason: format!("cannot read {}: {}", path.as_ref().display(), e),
            }
        })?;
        let file: CouncilConfigFile =
            toml::from_str(&raw).map_err(|e| DeliberationError::InvalidConfig {
                reason: format!("cannot parse {}: {}", path.as_ref().display(), e),
            })?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// TOML schema with durations as integer units.
#[derive(Debug, Default, Deserialize)]
struct CouncilConfigFile {
    agent_pool_size: Option<usize>,
    per_agent_timeout_ms: Option<u64>,
    min_quorum: Option<usize>,
    majority_threshold: Option<f64>,
    min_evidence_quorum: Option<usize>,
    similarity_threshold: Option<f64>,
    evidence_ttl_secs: Option<u64>,
    #[serde(default)]
    health: HealthConfigFile,
}

#[derive(Debug, Default, Deserialize)]
struct HealthConfigFile {
    window_secs: Option<u64>,
    max_samples: Option<usize>,
    min_samples: Option<usize>,
    failure_rate_threshold: Option<f64>,
    cooldown_secs: Option<u64>,
}

impl CouncilConfigFile {
    fn into_config(self) -> CouncilConfig {
        let defaults = CouncilConfig::default();
        let health_defaults = defaults.health.clone();
        CouncilConfig {
            agent_pool_size: self.agent_pool_size.unwrap_or(defaults.agent_pool_size),
            per_agent_timeout: self
                .per_agent_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.per_agent_timeout),
            min_quorum: self.min_quorum.unwrap_or(defaults.min_quorum),
            majority_threshold: self.majority_threshold.unwrap_or(defaults.majority_threshold),
            min_evidence_quorum: self
                .min_evidence_quorum
                .unwrap_or(defaults.min_evidence_quorum),
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            evidence_ttl: self
                .evidence_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.evidence_ttl),
            health: HealthConfig {
                window: self
                    .health
                    .window_secs
                    .map(Duration::from_secs)
                    .unwrap_or(health_defaults.window),
                max_samples: self.health.max_samples.unwrap_or(health_defaults.max_samples),
                min_samples: self.health.min_samples.unwrap_or(health_defaults.min_samples),
                failure_rate_threshold: self
                    .health
                    .failure_rate_threshold
                    .unwrap_or(health_defaults.failure_rate_threshold),
                cooldown: self
                    .health
                    .cooldown_secs
                    .map(Duration::from_secs)
                    .unwrap_or(health_defaults.cooldown),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        CouncilConfig::default().validate().unwrap();
    }

    #[test]
    fn test_quorum_below_evidence_floor_rejected() {
        let config = CouncilConfig {
            min_quorum: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DeliberationError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_quorum_above_pool_rejected() {
        let config = CouncilConfig {
            min_quorum: 4,
            agent_pool_size: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_majority_threshold_bounds() {
        let config = CouncilConfig {
            majority_threshold: 0.4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_size_bounded_by_seats() {
        let config = CouncilConfig {
            agent_pool_size: 9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "agent_pool_size = 5\nper_agent_timeout_ms = 1500\nmin_quorum = 3\n\n[health]\ncooldown_secs = 10"
        )
        .unwrap();

        let config = CouncilConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.agent_pool_size, 5);
        assert_eq!(config.per_agent_timeout, Duration::from_millis(1500));
        assert_eq!(config.min_quorum, 3);
        assert_eq!(config.health.cooldown, Duration::from_secs(10));
        // Untouched keys keep design defaults.
        assert!((config.majority_threshold - 0.66).abs() < f64::EPSILON);
        assert_eq!(config.evidence_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_env_overlay() {
        std::env::set_var("COUNCIL_MAJORITY_THRESHOLD", "0.75");
        std::env::set_var("COUNCIL_EVIDENCE_TTL_SECS", "60");
        let config = CouncilConfig::default().overlay_env().unwrap();
        std::env::remove_var("COUNCIL_MAJORITY_THRESHOLD");
        std::env::remove_var("COUNCIL_EVIDENCE_TTL_SECS");

        assert!((config.majority_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.evidence_ttl, Duration::from_secs(60));
        assert_eq!(config.min_quorum, 2);
    }

    #[test]
    fn test_toml_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_quorum = 1").unwrap();
        assert!(CouncilConfig::from_toml_file(file.path()).is_err());
    }
}
