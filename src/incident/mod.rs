pub mod actor;
pub mod event_log;
pub mod model;
pub mod prompt_assembler;
pub mod prompt_engine;
pub mod suggestion_engine;

pub use event_log::{Adapter, AgentEvent, EventType, IncidentEventLog};
pub use model::{
    ActionFamily, AffectionInfo, AffectionStatus, AgentSuggestion, CandidateLifecycle,
    ContextAgentStep, ContextBatch, Incident, PendingTarget, ServiceImpact, ServiceRef, Severity,
    SimilarIncidentCandidate, SimilarIncidentsRequest, Status, SuggestedAffectionStatus,
    SuggestionTargetState, StepRole, StepSource, TerminalStatus,
};
