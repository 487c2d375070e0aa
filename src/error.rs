//! Crate-wide error taxonomy.
//!
//! [`IncidentOpsError`] carries the named error codes the incident actor, the
//! similar-incidents context agent, and the prompt workflow surface as
//! first-class values, in the idiom of the teacher's
//! [`ToolError`](crate::tool_protocol::ToolError): a plain enum implementing
//! `std::error::Error` and `Display`, no external error-derive crate needed
//! for a taxonomy this small.
//!
//! Lower-level plumbing (HTTP transport, JSON parsing) keeps propagating
//! `Box<dyn std::error::Error>` exactly as [`ClientWrapper`](crate::client_wrapper::ClientWrapper)
//! does; callers at the actor boundary convert those into
//! [`IncidentOpsError::Transport`].
//!
//! Dedupe collisions are deliberately *not* a variant here: per the event-log
//! invariant, a duplicate insight insertion returns a `deduped: bool` flag on
//! the success path rather than an error, so callers can treat the prior
//! event as authoritative without matching on an error variant.

use std::fmt;

/// Errors surfaced by the incident actor, the context agent, and the prompt
/// workflow.
#[derive(Debug, Clone)]
pub enum IncidentOpsError {
    /// A status, severity, or affection mutation would violate the lifecycle
    /// state machine (e.g. `resolved → mitigating`).
    InvalidTransition { from: String, to: String },
    /// The similar-incidents context agent was asked to act on an incident id
    /// different from the one it was first bound to.
    AgentIncidentIdMismatch { bound_to: String, requested: String },
    /// A tool call failed validation (missing `evidence`, constraint unmet)
    /// and was dropped during normalization rather than raised to the caller.
    /// Exposed for callers that want to observe *why* a suggestion vanished;
    /// the Suggestion Engine itself never returns this as an `Err`.
    ValidationFailed(String),
    /// An LM transport call failed after exhausting its retry budget.
    LmTransportFailed(String),
    /// A lower-level I/O or transport error, wrapped at the actor boundary.
    Transport(String),
}

impl fmt::Display for IncidentOpsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentOpsError::InvalidTransition { from, to } => {
                write!(f, "INVALID_TRANSITION: {} -> {} is not a legal status transition", from, to)
            }
            IncidentOpsError::AgentIncidentIdMismatch { bound_to, requested } => write!(
                f,
                "AGENT_INCIDENT_ID_MISMATCH: agent bound to {}, requested for {}",
                bound_to, requested
            ),
            IncidentOpsError::ValidationFailed(msg) => write!(f, "VALIDATION_FAILED: {}", msg),
            IncidentOpsError::LmTransportFailed(msg) => write!(f, "LM_TRANSPORT_FAILED: {}", msg),
            IncidentOpsError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for IncidentOpsError {}

impl From<std::io::Error> for IncidentOpsError {
    fn from(e: std::io::Error) -> Self {
        IncidentOpsError::Transport(e.to_string())
    }
}

impl From<Box<dyn std::error::Error>> for IncidentOpsError {
    fn from(e: Box<dyn std::error::Error>) -> Self {
        IncidentOpsError::LmTransportFailed(e.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for IncidentOpsError {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        IncidentOpsError::LmTransportFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_named_error_codes() {
        let err = IncidentOpsError::InvalidTransition {
            from: "resolved".to_string(),
            to: "mitigating".to_string(),
        };
        assert!(err.to_string().starts_with("INVALID_TRANSITION"));

        let err = IncidentOpsError::AgentIncidentIdMismatch {
            bound_to: "inc-1".to_string(),
            requested: "inc-2".to_string(),
        };
        assert!(err.to_string().starts_with("AGENT_INCIDENT_ID_MISMATCH"));
    }
}
