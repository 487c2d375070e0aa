//! Domain data model: the incident, its derived state, and the suggestions
//! the Suggestion Engine may produce.
//!
//! Following the teacher's preference for tagged variants over class
//! hierarchies (`client_wrapper::Role`, `telemetry::RuntimeEvent`), every
//! discriminated union here is a plain Rust `enum` with `#[serde(tag = ...)]`
//! rather than a trait-object hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Open,
    Mitigating,
    Resolved,
    Declined,
}

impl Status {
    /// Enumerate the legal exits from this status.
    ///
    /// `open -> {mitigating, resolved, declined}`, `mitigating -> {resolved, declined}`,
    /// `resolved|declined -> {}`.
    pub fn valid_transitions(self) -> &'static [Status] {
        match self {
            Status::Open => &[Status::Mitigating, Status::Resolved, Status::Declined],
            Status::Mitigating => &[Status::Resolved, Status::Declined],
            Status::Resolved | Status::Declined => &[],
        }
    }

    /// Whether `next` is a legal transition from this status.
    pub fn can_transition_to(self, next: Status) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Incident severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A live operational incident tracked by an [`IncidentActor`](crate::incident::actor::IncidentActor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: Status,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// The original human-authored prompt that opened the incident.
    pub prompt: String,
    pub assignee: Option<String>,
    /// Free-form origin label (e.g. `"pagerduty"`, `"manual"`), distinct from
    /// the per-event [`Adapter`](crate::incident::event_log::Adapter).
    pub source: String,
}

/// Status applied to a public status-page ("affection") record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AffectionStatus {
    Investigating,
    Mitigating,
    Resolved,
}

/// Status-page status as offered by the `add_status_page_update` tool,
/// which additionally allows `update`: post new text without changing the
/// status-page's own lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAffectionStatus {
    Investigating,
    Mitigating,
    Resolved,
    Update,
}

/// Derived by folding `AFFECTION_UPDATE` events over an incident's log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffectionInfo {
    pub has_affection: bool,
    pub last_status: Option<AffectionStatus>,
    pub last_update_at: Option<DateTime<Utc>>,
}

/// Impact level of an affected service on a status-page update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceImpact {
    Partial,
    Major,
}

/// A service reference attached to a status-page update, bounded to the
/// tenant's allowed service catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRef {
    pub id: String,
    pub impact: ServiceImpact,
}

/// The three action families a suggestion may target, used as the key for
/// pending/applied target tracking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ActionFamily {
    Status,
    Severity,
    Affection,
}

/// A suggestion made but not yet observed as applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTarget {
    /// The target value as a string (a [`Status`], [`Severity`], or affection
    /// status name) so all three families share one tracking shape.
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub event_index: u64,
}

/// Derived each turn from the event log: for each action family, which
/// targets are pending (suggested, not yet applied) and which have already
/// been applied.
#[derive(Debug, Clone, Default)]
pub struct SuggestionTargetState {
    pub pending: HashMap<ActionFamily, Vec<PendingTarget>>,
    pub applied: HashMap<ActionFamily, String>,
}

impl SuggestionTargetState {
    /// Pending targets for `family` whose `value` matches `target`.
    pub fn pending_matching(&self, family: ActionFamily, target: &str) -> Vec<&PendingTarget> {
        self.pending
            .get(&family)
            .into_iter()
            .flatten()
            .filter(|p| p.value == target)
            .collect()
    }
}

/// A structured proposal returned by the Suggestion Engine. Not yet applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action")]
#[serde(rename_all = "snake_case")]
pub enum AgentSuggestion {
    UpdateStatus {
        evidence: String,
        status: Status,
        message: String,
    },
    UpdateSeverity {
        evidence: String,
        severity: Severity,
    },
    AddStatusPageUpdate {
        evidence: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        affection_status: Option<SuggestedAffectionStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        services: Vec<ServiceRef>,
    },
}

impl AgentSuggestion {
    /// The action family this suggestion targets, for dedup/cap bookkeeping.
    pub fn family(&self) -> ActionFamily {
        match self {
            AgentSuggestion::UpdateStatus { .. } => ActionFamily::Status,
            AgentSuggestion::UpdateSeverity { .. } => ActionFamily::Severity,
            AgentSuggestion::AddStatusPageUpdate { .. } => ActionFamily::Affection,
        }
    }

    /// Stable signature used for duplicate-suggestion rate metrics:
    /// `action:target[:services-sorted]`.
    pub fn signature(&self) -> String {
        match self {
            AgentSuggestion::UpdateStatus { status, .. } => {
                format!("update_status:{:?}", status).to_lowercase()
            }
            AgentSuggestion::UpdateSeverity { severity, .. } => {
                format!("update_severity:{:?}", severity).to_lowercase()
            }
            AgentSuggestion::AddStatusPageUpdate { services, .. } => {
                let mut ids: Vec<&str> = services.iter().map(|s| s.id.as_str()).collect();
                ids.sort_unstable();
                format!("add_status_page_update:{}", ids.join(","))
            }
        }
    }
}

/// A request, emitted alongside suggestions, asking the similar-incidents
/// context agent to investigate historical candidates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarIncidentsRequest {
    pub evidence: String,
    pub reason: String,
}

/// Terminal status of a completed (non-live) incident.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Resolved,
    Declined,
}

/// Lifecycle position of a similar-incident candidate: either still live
/// (tracked by an [`IncidentActor`](crate::incident::actor::IncidentActor))
/// or completed (read from historical records only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CandidateLifecycle {
    Open { status: Status },
    Completed { terminal_status: TerminalStatus, resolved_at: DateTime<Utc> },
}

/// A historical or currently-open incident the context agent may investigate
/// as potentially similar to the incident under discussion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarIncidentCandidate {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub lifecycle: CandidateLifecycle,
    pub created_at: DateTime<Utc>,
}

/// Role of a single step in the context agent's LM-ready step history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepRole {
    System,
    User,
    Assistant,
    Tool,
    FunctionCall,
}

/// Origin of a context-agent step, distinguishing summarized incident
/// context from operator prompts, LM narrative, and tool results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StepSource {
    System,
    Context,
    Prompt,
    Runner,
    ToolResult,
}

/// One entry in the similar-incidents context agent's durable step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAgentStep {
    pub role: StepRole,
    pub content: String,
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub source: StepSource,
    pub context_to_event_id: Option<u64>,
    pub run_id: Option<String>,
}

/// A record of one `addContext` call: the incident-event slice the context
/// agent was asked to fold in, keyed uniquely by `to_event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBatch {
    pub to_event_id: u64,
    pub trigger: String,
    pub requested_at: DateTime<Utc>,
    pub appended_step_range: Option<(u64, u64)>,
}
