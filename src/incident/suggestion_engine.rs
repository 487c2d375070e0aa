//! Generates structured suggestions for a live incident by calling an LM
//! with a strict tool schema, the way the teacher's `Agent::generate_with_tokens`
//! drives a tool-calling loop against a [`ClientWrapper`].
//!
//! Unlike the teacher's open-ended agent loop, this call is always exactly
//! one round trip: the model either returns zero or more tool calls (which
//! become [`AgentSuggestion`]s and an optional [`SimilarIncidentsRequest`])
//! or plain narrative text, and the engine never re-prompts within a turn.

use crate::client_wrapper::{
    ClientWrapper, Message, NativeToolCall, ReasoningEffort, Role, StructuredRequest,
    ToolChoice, ToolDefinition, TokenUsage,
};
use crate::config::IncidentOpsConfig;
use crate::error::IncidentOpsError;
use crate::incident::event_log::AgentEvent;
use crate::incident::model::{
    ActionFamily, AgentSuggestion, Incident, PendingTarget, ServiceImpact, ServiceRef, Severity,
    SimilarIncidentsRequest, Status, SuggestedAffectionStatus, SuggestionTargetState,
};
use crate::incident::model::AffectionInfo;
use crate::incident::prompt_assembler::{
    build_event_history_messages, build_incident_state_message,
    build_status_page_context_message, build_suggestion_state_context_message,
    derive_affection_info, derive_suggestion_target_state,
};
use crate::tool_protocol::{ToolMetadata, ToolProtocol, ToolRegistry, ToolResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

/// Exposes the Suggestion Engine's four tools through the provider-agnostic
/// [`ToolProtocol`] surface. `execute` is never called directly — the LM
/// itself is the only caller of these tools — so this protocol only backs
/// discovery: [`build_tool_registry`] uses it to assemble the catalog that
/// gets logged before every turn, independent of the strict wire schema in
/// [`tool_definitions`].
struct SuggestionToolProtocol;

#[async_trait]
impl ToolProtocol for SuggestionToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        _parameters: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        Ok(ToolResult::success(serde_json::json!({ "tool": tool_name })))
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(tool_definitions()
            .into_iter()
            .map(|t| ToolMetadata::new(t.name, t.description))
            .collect())
    }

    async fn get_tool_metadata(
        &self,
        tool_name: &str,
    ) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>> {
        tool_definitions()
            .into_iter()
            .find(|t| t.name == tool_name)
            .map(|t| ToolMetadata::new(t.name, t.description))
            .ok_or_else(|| format!("unknown tool: {}", tool_name).into())
    }

    fn protocol_name(&self) -> &str {
        "suggestion_engine"
    }
}

async fn build_tool_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::empty();
    let _ = registry
        .add_protocol("suggestion_engine", Arc::new(SuggestionToolProtocol))
        .await;
    registry
}

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "update_status".to_string(),
            description: "Propose moving the incident to a new lifecycle status.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "evidence": {"type": "string", "description": "Quote or paraphrase of the event that justifies this change."},
                    "status": {"type": "string", "enum": ["mitigating", "resolved"]},
                    "message": {"type": "string", "description": "Human-readable rationale to show alongside the change."}
                },
                "required": ["evidence", "status", "message"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "update_severity".to_string(),
            description: "Propose changing the incident's severity.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "evidence": {"type": "string"},
                    "severity": {"type": "string", "enum": ["low", "medium", "high"]}
                },
                "required": ["evidence", "severity"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "add_status_page_update".to_string(),
            description: "Propose publishing a new public status-page update.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "evidence": {"type": "string"},
                    "message": {"type": "string"},
                    "affection_status": {"type": "string", "enum": ["investigating", "mitigating", "resolved", "update"]},
                    "title": {"type": "string"},
                    "services": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {"type": "string"},
                                "impact": {"type": "string", "enum": ["partial", "major"]}
                            },
                            "required": ["id", "impact"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["evidence", "message"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "similar_incidents".to_string(),
            description: "Ask the similar-incidents context agent to investigate whether this incident resembles past incidents.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "evidence": {"type": "string"},
                    "reason": {"type": "string"}
                },
                "required": ["evidence", "reason"],
                "additionalProperties": false
            }),
        },
    ]
}

/// Stable cache key derived from the incident id, so the Responses provider
/// can reuse the shared system/context prefix across turns of the same
/// incident without hashing the id itself into the key.
pub fn prompt_cache_key(incident_id: &str) -> String {
    let head: String = incident_id.chars().take(12).collect();
    let tail: String = if incident_id.len() > 8 {
        incident_id[incident_id.len() - 8..].to_string()
    } else {
        incident_id.to_string()
    };
    format!("is:v1:{}:{}", head, tail)
}

const SYSTEM_PROMPT: &str = "You are an incident response co-pilot. Read the incident state, \
status page state, suggestion state, and event history, then call zero or more tools to \
propose changes. Only call a tool when the evidence clearly supports it. Never repeat a \
change that is already pending or already applied.";

fn build_messages(
    incident: &Incident,
    events: &[AgentEvent],
    state: &SuggestionTargetState,
    affection: &AffectionInfo,
    processed_through_id: u64,
) -> Vec<Message> {
    let mut messages = vec![
        Message::new(Role::System, SYSTEM_PROMPT),
        Message::new(Role::User, build_incident_state_message(incident)),
        Message::new(Role::User, build_status_page_context_message(affection)),
        Message::new(Role::User, build_suggestion_state_context_message(state)),
    ];
    messages.extend(build_event_history_messages(events, processed_through_id));
    messages
}

/// Result of one Suggestion Engine turn.
pub struct SuggestionOutcome {
    pub suggestions: Vec<AgentSuggestion>,
    pub similar_incidents_request: Option<SimilarIncidentsRequest>,
    pub narrative: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Run one Suggestion Engine turn for `incident`, using `events` as the full
/// incident history and `pending` as the actor's own bookkeeping of
/// suggestions already in flight. `processed_through_id` is the id of the
/// last event folded into a prior turn (`0` on an incident's first turn) and
/// marks the turn boundary the prompt draws between old and new evidence.
pub async fn generate_incident_suggestions(
    client: &Arc<dyn ClientWrapper>,
    config: &IncidentOpsConfig,
    incident: &Incident,
    events: &[AgentEvent],
    pending: HashMap<ActionFamily, Vec<PendingTarget>>,
    processed_through_id: u64,
) -> Result<SuggestionOutcome, IncidentOpsError> {
    let state = derive_suggestion_target_state(events, pending);
    let affection = derive_affection_info(events);
    let messages = build_messages(incident, events, &state, &affection, processed_through_id);

    let registry = build_tool_registry().await;
    log::debug!(
        "incident {}: suggestion engine turn offering tools {:?}",
        incident.id,
        registry.list_tools().iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
    );

    let request = StructuredRequest {
        messages,
        tools: tool_definitions(),
        tool_choice: ToolChoice::Auto,
        prompt_cache_key: Some(prompt_cache_key(&incident.id)),
        reasoning_effort: Some(ReasoningEffort::Medium),
    };

    let reply = client
        .send_structured(request)
        .await
        .map_err(IncidentOpsError::from)?;

    let mut suggestions = Vec::new();
    let mut similar_incidents_request = None;
    for call in &reply.tool_calls {
        match parse_tool_call(call) {
            Ok(ParsedCall::Suggestion(s)) => suggestions.push(s),
            Ok(ParsedCall::SimilarIncidents(r)) => similar_incidents_request = Some(r),
            Err(_) => continue,
        }
    }

    let current_event_id = events.last().map(|e| e.id).unwrap_or(0);
    let suggestions = normalize_suggestions(
        suggestions,
        incident,
        &state,
        config,
        &affection,
        current_event_id,
    );

    Ok(SuggestionOutcome {
        suggestions,
        similar_incidents_request,
        narrative: if reply.content.is_empty() { None } else { Some(reply.content.to_string()) },
        usage: reply.usage,
    })
}

enum ParsedCall {
    Suggestion(AgentSuggestion),
    SimilarIncidents(SimilarIncidentsRequest),
}

fn parse_tool_call(call: &NativeToolCall) -> Result<ParsedCall, IncidentOpsError> {
    let args = &call.arguments;
    let evidence = args
        .get("evidence")
        .and_then(|v| v.as_str())
        .ok_or_else(|| IncidentOpsError::ValidationFailed("missing evidence".to_string()))?
        .to_string();

    match call.name.as_str() {
        "update_status" => {
            let status = args
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(parse_status)
                .ok_or_else(|| IncidentOpsError::ValidationFailed("invalid status".to_string()))?;
            let message = args.get("message").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(ParsedCall::Suggestion(AgentSuggestion::UpdateStatus { evidence, status, message }))
        }
        "update_severity" => {
            let severity = args
                .get("severity")
                .and_then(|v| v.as_str())
                .and_then(parse_severity)
                .ok_or_else(|| IncidentOpsError::ValidationFailed("invalid severity".to_string()))?;
            Ok(ParsedCall::Suggestion(AgentSuggestion::UpdateSeverity { evidence, severity }))
        }
        "add_status_page_update" => {
            let message = args
                .get("message")
                .and_then(|v| v.as_str())
                .ok_or_else(|| IncidentOpsError::ValidationFailed("missing message".to_string()))?
                .to_string();
            let affection_status = args
                .get("affection_status")
                .and_then(|v| v.as_str())
                .and_then(parse_suggested_affection_status);
            let title = args.get("title").and_then(|v| v.as_str()).map(str::to_string);
            let services = args
                .get("services")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(parse_service_ref).collect())
                .unwrap_or_default();
            Ok(ParsedCall::Suggestion(AgentSuggestion::AddStatusPageUpdate {
                evidence,
                message,
                affection_status,
                title,
                services,
            }))
        }
        "similar_incidents" => {
            let reason = args.get("reason").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(ParsedCall::SimilarIncidents(SimilarIncidentsRequest { evidence, reason }))
        }
        other => Err(IncidentOpsError::ValidationFailed(format!("unknown tool: {}", other))),
    }
}

fn parse_status(raw: &str) -> Option<Status> {
    match raw {
        "open" => Some(Status::Open),
        "mitigating" => Some(Status::Mitigating),
        "resolved" => Some(Status::Resolved),
        "declined" => Some(Status::Declined),
        _ => None,
    }
}

fn parse_severity(raw: &str) -> Option<Severity> {
    match raw {
        "low" => Some(Severity::Low),
        "medium" => Some(Severity::Medium),
        "high" => Some(Severity::High),
        _ => None,
    }
}

fn parse_suggested_affection_status(raw: &str) -> Option<SuggestedAffectionStatus> {
    match raw {
        "investigating" => Some(SuggestedAffectionStatus::Investigating),
        "mitigating" => Some(SuggestedAffectionStatus::Mitigating),
        "resolved" => Some(SuggestedAffectionStatus::Resolved),
        "update" => Some(SuggestedAffectionStatus::Update),
        _ => None,
    }
}

fn parse_service_ref(value: &serde_json::Value) -> Option<ServiceRef> {
    let id = value.get("id")?.as_str()?.to_string();
    let impact = match value.get("impact")?.as_str()? {
        "partial" => ServiceImpact::Partial,
        "major" => ServiceImpact::Major,
        _ => return None,
    };
    Some(ServiceRef { id, impact })
}

fn target_value(suggestion: &AgentSuggestion) -> String {
    match suggestion {
        AgentSuggestion::UpdateStatus { status, .. } => format!("{:?}", status).to_lowercase(),
        AgentSuggestion::UpdateSeverity { severity, .. } => format!("{:?}", severity).to_lowercase(),
        AgentSuggestion::AddStatusPageUpdate { affection_status, .. } => affection_status
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_else(|| "update".to_string()),
    }
}

/// Phrases that signal the incident is still actively being worked, which
/// block a `resolved` suggestion regardless of what else the evidence says.
const IN_PROGRESS_SIGNALS: &[&str] = &[
    "investigating",
    "in progress",
    "in-progress",
    "ongoing",
    "still checking",
    "still seeing",
    "still monitoring",
    "continuing to monitor",
    "not yet resolved",
];

/// Maximum number of suggestions the engine will hand the actor in one turn.
const MAX_SUGGESTIONS_PER_TURN: usize = 3;

/// Enforce the Suggestion Engine's invariants before a raw tool call becomes
/// a suggestion the incident actor will act on:
///
/// 1. every suggestion must carry non-empty evidence, and `update_status`/
///    `update_severity` may only target a legal, distinct value,
/// 2. a suggestion repeating an already-applied or still-fresh-pending
///    target is dropped; "fresh" requires both less than
///    `stale_suggestion_age` old *and* fewer than `stale_suggestion_event_count`
///    events old, so either threshold alone re-opens the suggestion,
/// 3. the first `add_status_page_update` while no status page exists yet
///    must carry `investigating`, a title, and at least one service,
/// 4. `update_status(resolved)` is dropped when its evidence still reads as
///    in-progress work,
/// 5. at most [`MAX_SUGGESTIONS_PER_TURN`] suggestions survive, deduped by
///    action family so a turn never proposes the same family twice.
pub fn normalize_suggestions(
    raw: Vec<AgentSuggestion>,
    incident: &Incident,
    state: &SuggestionTargetState,
    config: &IncidentOpsConfig,
    affection: &AffectionInfo,
    current_event_id: u64,
) -> Vec<AgentSuggestion> {
    let now = Utc::now();
    let mut seen_families = std::collections::HashSet::new();
    raw.into_iter()
        .filter(|s| has_evidence(s))
        .filter(|s| match s {
            AgentSuggestion::UpdateStatus { status, .. } => incident.status.can_transition_to(*status),
            AgentSuggestion::UpdateSeverity { severity, .. } => *severity != incident.severity,
            AgentSuggestion::AddStatusPageUpdate { .. } => true,
        })
        .filter(|s| {
            let family = s.family();
            let target = target_value(s);
            if state.applied.get(&family) == Some(&target) {
                return false;
            }
            let still_fresh = state.pending_matching(family, &target).iter().any(|p| {
                let age = now.signed_duration_since(p.created_at).to_std().unwrap_or_default();
                let events_elapsed = current_event_id.saturating_sub(p.event_index);
                age < config.stale_suggestion_age
                    && (events_elapsed as usize) < config.stale_suggestion_event_count
            });
            !still_fresh
        })
        .filter(|s| match s {
            AgentSuggestion::AddStatusPageUpdate { affection_status, title, services, .. }
                if !affection.has_affection =>
            {
                *affection_status == Some(SuggestedAffectionStatus::Investigating)
                    && title.is_some()
                    && !services.is_empty()
            }
            _ => true,
        })
        .filter(|s| match s {
            AgentSuggestion::UpdateStatus { status: Status::Resolved, evidence, .. } => {
                let lowered = evidence.to_lowercase();
                !IN_PROGRESS_SIGNALS.iter().any(|signal| lowered.contains(signal))
            }
            _ => true,
        })
        .filter(|s| seen_families.insert(s.family()))
        .take(MAX_SUGGESTIONS_PER_TURN)
        .collect()
}

fn has_evidence(suggestion: &AgentSuggestion) -> bool {
    let evidence = match suggestion {
        AgentSuggestion::UpdateStatus { evidence, .. } => evidence,
        AgentSuggestion::UpdateSeverity { evidence, .. } => evidence,
        AgentSuggestion::AddStatusPageUpdate { evidence, .. } => evidence,
    };
    !evidence.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::model::PendingTarget;
    use chrono::Utc;

    fn sample_incident() -> Incident {
        Incident {
            id: "incident-0123456789abcdef".to_string(),
            created_at: Utc::now(),
            status: Status::Open,
            severity: Severity::Medium,
            title: "api errors".to_string(),
            description: "".to_string(),
            prompt: "".to_string(),
            assignee: None,
            source: "pagerduty".to_string(),
        }
    }

    fn normalize(
        raw: Vec<AgentSuggestion>,
        incident: &Incident,
        state: &SuggestionTargetState,
        config: &IncidentOpsConfig,
    ) -> Vec<AgentSuggestion> {
        normalize_suggestions(raw, incident, state, config, &AffectionInfo::default(), 0)
    }

    #[test]
    fn cache_key_is_stable_for_same_incident() {
        let a = prompt_cache_key("incident-0123456789abcdef");
        let b = prompt_cache_key("incident-0123456789abcdef");
        assert_eq!(a, b);
        assert!(a.starts_with("is:v1:"));
    }

    #[test]
    fn drops_suggestion_with_no_evidence() {
        let incident = sample_incident();
        let state = SuggestionTargetState::default();
        let config = IncidentOpsConfig::default();
        let raw = vec![AgentSuggestion::UpdateStatus {
            evidence: "   ".to_string(),
            status: Status::Mitigating,
            message: "m".to_string(),
        }];
        assert!(normalize(raw, &incident, &state, &config).is_empty());
    }

    #[test]
    fn drops_illegal_status_transition() {
        let mut incident = sample_incident();
        incident.status = Status::Resolved;
        let state = SuggestionTargetState::default();
        let config = IncidentOpsConfig::default();
        let raw = vec![AgentSuggestion::UpdateStatus {
            evidence: "e".to_string(),
            status: Status::Mitigating,
            message: "m".to_string(),
        }];
        assert!(normalize(raw, &incident, &state, &config).is_empty());
    }

    #[test]
    fn drops_repeat_of_fresh_pending_target() {
        let incident = sample_incident();
        let mut state = SuggestionTargetState::default();
        state.pending.insert(
            ActionFamily::Status,
            vec![PendingTarget {
                value: "mitigating".to_string(),
                created_at: Utc::now(),
                event_index: 0,
            }],
        );
        let config = IncidentOpsConfig::default();
        let raw = vec![AgentSuggestion::UpdateStatus {
            evidence: "e".to_string(),
            status: Status::Mitigating,
            message: "m".to_string(),
        }];
        assert!(normalize_suggestions(raw, &incident, &state, &config, &AffectionInfo::default(), 1).is_empty());
    }

    #[test]
    fn keeps_repeat_once_both_staleness_thresholds_pass() {
        let incident = sample_incident();
        let mut state = SuggestionTargetState::default();
        state.pending.insert(
            ActionFamily::Status,
            vec![PendingTarget {
                value: "mitigating".to_string(),
                created_at: Utc::now() - chrono::Duration::minutes(20),
                event_index: 0,
            }],
        );
        let config = IncidentOpsConfig::default();
        let raw = vec![AgentSuggestion::UpdateStatus {
            evidence: "e".to_string(),
            status: Status::Mitigating,
            message: "m".to_string(),
        }];
        // Old enough, but fewer than stale_suggestion_event_count events have
        // elapsed: the AND-gate still suppresses the repeat.
        assert!(normalize_suggestions(raw.clone(), &incident, &state, &config, &AffectionInfo::default(), 5).is_empty());
        // Both thresholds cleared: the repeat is allowed back through.
        assert_eq!(
            normalize_suggestions(raw, &incident, &state, &config, &AffectionInfo::default(), 25).len(),
            1
        );
    }

    #[test]
    fn keeps_legal_fresh_suggestion() {
        let incident = sample_incident();
        let state = SuggestionTargetState::default();
        let config = IncidentOpsConfig::default();
        let raw = vec![AgentSuggestion::UpdateStatus {
            evidence: "e".to_string(),
            status: Status::Mitigating,
            message: "m".to_string(),
        }];
        assert_eq!(normalize(raw, &incident, &state, &config).len(), 1);
    }

    #[test]
    fn drops_first_status_page_update_missing_investigating_shape() {
        let incident = sample_incident();
        let state = SuggestionTargetState::default();
        let config = IncidentOpsConfig::default();
        let raw = vec![AgentSuggestion::AddStatusPageUpdate {
            evidence: "e".to_string(),
            message: "m".to_string(),
            affection_status: None,
            title: None,
            services: vec![],
        }];
        assert!(normalize(raw, &incident, &state, &config).is_empty());
    }

    #[test]
    fn keeps_first_status_page_update_with_investigating_shape() {
        let incident = sample_incident();
        let state = SuggestionTargetState::default();
        let config = IncidentOpsConfig::default();
        let raw = vec![AgentSuggestion::AddStatusPageUpdate {
            evidence: "e".to_string(),
            message: "m".to_string(),
            affection_status: Some(SuggestedAffectionStatus::Investigating),
            title: Some("Investigating elevated error rates".to_string()),
            services: vec![ServiceRef { id: "api".to_string(), impact: ServiceImpact::Major }],
        }];
        assert_eq!(normalize(raw, &incident, &state, &config).len(), 1);
    }

    #[test]
    fn drops_resolved_when_evidence_still_reads_in_progress() {
        let mut incident = sample_incident();
        incident.status = Status::Mitigating;
        let state = SuggestionTargetState::default();
        let config = IncidentOpsConfig::default();
        let raw = vec![AgentSuggestion::UpdateStatus {
            evidence: "still investigating a residual spike".to_string(),
            status: Status::Resolved,
            message: "m".to_string(),
        }];
        assert!(normalize(raw, &incident, &state, &config).is_empty());
    }

    #[test]
    fn caps_at_three_and_dedupes_by_family() {
        let mut incident = sample_incident();
        incident.status = Status::Mitigating;
        let state = SuggestionTargetState::default();
        let config = IncidentOpsConfig::default();
        let raw = vec![
            AgentSuggestion::UpdateStatus {
                evidence: "e1".to_string(),
                status: Status::Resolved,
                message: "m".to_string(),
            },
            AgentSuggestion::UpdateStatus {
                evidence: "e2".to_string(),
                status: Status::Declined,
                message: "m".to_string(),
            },
            AgentSuggestion::UpdateSeverity { evidence: "e3".to_string(), severity: Severity::High },
        ];
        let normalized = normalize(raw, &incident, &state, &config);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].family(), ActionFamily::Status);
        assert_eq!(normalized[1].family(), ActionFamily::Severity);
    }
}
