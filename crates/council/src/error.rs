//! Error surface for the consensus engine.
//!
//! Only systemic conditions are errors: missing evidence, a failed audit
//! write, or a bad configuration. Per-agent timeouts and failures are
//! absorbed into [`crate::types::ResponseStatus`], and quorum/consensus
//! shortfalls are reported as [`crate::types::ConsensusStatus`] values, so
//! callers can render the correct user-facing message for each.

/// Error type for deliberation operations.
#[derive(Debug, thiserror::Error)]
pub enum DeliberationError {
    /// Knowledge store unreachable or returned no evidence. Retryable;
    /// no ungrounded answer is ever attempted.
    #[error("evidence retrieval failed: {reason}")]
    EvidenceRetrieval { reason: String },

    /// The audit sink rejected or failed the write. Fatal for the
    /// deliberation: no un-audited decision may reach a caller.
    #[error("audit write failed: {reason}")]
    AuditWrite { reason: String },

    /// Configuration failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Result type for deliberation operations.
pub type CouncilResult<T> = Result<T, DeliberationError>;
