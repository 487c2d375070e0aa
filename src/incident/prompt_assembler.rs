//! Turns an incident's event log and derived state into the message blocks
//! the Suggestion Engine and the similar-incidents context agent feed to the
//! LM, the way the teacher's conversation-history strategy turns a raw
//! message list into an LM-ready prompt.

use super::event_log::{AgentEvent, EventType};
use super::model::{
    ActionFamily, AffectionInfo, AffectionStatus, Incident, PendingTarget, SuggestionTargetState,
};
use crate::client_wrapper::{Message, Role};
use std::collections::HashMap;

/// Keys stripped from event payloads before they reach the LM: these vary
/// run-to-run without carrying decision-relevant information, and letting
/// them through would make two otherwise-identical incidents look distinct
/// to the model (and would defeat prompt caching).
const VOLATILE_KEYS: &[&str] = &[
    "created_at",
    "createdAt",
    "ts",
    "timestamp",
    "messageId",
    "promptTs",
    "promptThreadTs",
];

/// Recursively sort object keys and drop [`VOLATILE_KEYS`] at every level, so
/// the same logical event always serializes to the same bytes.
pub fn normalize_event_data(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if VOLATILE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                sorted.insert(key.clone(), normalize_event_data(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(normalize_event_data).collect())
        }
        other => other.clone(),
    }
}

/// Marker inserted once to separate already-processed events from new ones.
pub const TURN_BOUNDARY_MARKER: &str = "[TURN BOUNDARY]";

/// Whether `event` originated from a suggestion the engine itself proposed
/// (tagged by the actor when it persists an applied suggestion's source
/// event), rather than from an operator or adapter.
fn is_suggestion_origin(event: &AgentEvent) -> bool {
    event
        .event_metadata
        .as_ref()
        .and_then(|m| m.get("kind"))
        .and_then(|v| v.as_str())
        == Some("suggestion")
}

fn is_internal_agent_event(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::SimilarIncidentsDiscovered
            | EventType::SimilarIncident
            | EventType::ContextAgentTriggered
    )
}

/// Compact one-line summary for the internal agent event types, versus the
/// plain `<EVENT_TYPE>: <normalized JSON>` rendering used for everything else.
fn summarize_internal_event(event: &AgentEvent, normalized: &serde_json::Value) -> String {
    match event.event_type {
        EventType::SimilarIncidentsDiscovered => {
            let selected = normalized
                .get("selected_incident_ids")
                .and_then(|v| v.as_array())
                .map(|a| a.len())
                .unwrap_or(0);
            format!("similar-incidents search discovered {} candidate(s)", selected)
        }
        EventType::SimilarIncident => {
            let id = normalized
                .get("similar_incident_id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            format!("similar incident confirmed: {}", id)
        }
        EventType::ContextAgentTriggered => "similar-incidents agent notified of new events".to_string(),
        _ => normalized.to_string(),
    }
}

fn render_event(event: &AgentEvent) -> String {
    let normalized = normalize_event_data(&event.event_data);
    if is_internal_agent_event(event.event_type) {
        format!("[#{}] {}", event.id, summarize_internal_event(event, &normalized))
    } else {
        format!("[#{}] {:?}: {}", event.id, event.event_type, normalized)
    }
}

/// Render the event log as a sequence of role-tagged message blocks.
///
/// Suggestion-origin events are emitted with role `assistant`; everything
/// else with role `user`. When `processed_through_id > 0` and some event's
/// `id` exceeds it, exactly one synthetic assistant
/// [`TURN_BOUNDARY_MARKER`] message is inserted immediately before the first
/// such event, separating already-processed history from new evidence.
pub fn build_event_messages(events: &[AgentEvent], processed_through_id: u64) -> Vec<Message> {
    let boundary_index = if processed_through_id > 0 {
        events.iter().position(|e| e.id > processed_through_id)
    } else {
        None
    };

    let mut messages = Vec::with_capacity(events.len() + 1);
    for (index, event) in events.iter().enumerate() {
        if boundary_index == Some(index) {
            messages.push(Message::new(Role::Assistant, TURN_BOUNDARY_MARKER));
        }
        let role = if is_suggestion_origin(event) { Role::Assistant } else { Role::User };
        messages.push(Message::new(role, render_event(event)));
    }
    messages
}

/// The message blocks carrying the full incident conversation history,
/// headed by a user-role label so the LM can tell where it starts.
pub fn build_event_history_messages(events: &[AgentEvent], processed_through_id: u64) -> Vec<Message> {
    if events.is_empty() {
        return vec![Message::new(
            Role::User,
            "## Incident event history\n\n(no events recorded yet)",
        )];
    }
    let mut messages = vec![Message::new(Role::User, "## Incident event history")];
    messages.extend(build_event_messages(events, processed_through_id));
    messages
}

/// Fold `AFFECTION_UPDATE` events into the incident's current status-page
/// state.
pub fn derive_affection_info(events: &[AgentEvent]) -> AffectionInfo {
    let mut info = AffectionInfo::default();
    for event in events {
        if event.event_type != EventType::AffectionUpdate {
            continue;
        }
        info.has_affection = true;
        info.last_update_at = Some(event.created_at);
        if let Some(status) = event
            .event_data
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(parse_affection_status)
        {
            info.last_status = Some(status);
        }
    }
    info
}

fn parse_affection_status(raw: &str) -> Option<AffectionStatus> {
    match raw {
        "investigating" => Some(AffectionStatus::Investigating),
        "mitigating" => Some(AffectionStatus::Mitigating),
        "resolved" => Some(AffectionStatus::Resolved),
        _ => None,
    }
}

/// A status-page human-readable block describing the current affection
/// state, used so the LM doesn't have to re-derive it from raw events.
pub fn build_status_page_context_message(affection: &AffectionInfo) -> String {
    match (affection.has_affection, affection.last_status) {
        (false, _) => {
            "## Status page\n\nNo public status page record exists for this incident yet."
                .to_string()
        }
        (true, Some(status)) => format!(
            "## Status page\n\nA status page record exists. Last published status: {:?} (at {}).",
            status,
            affection
                .last_update_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        ),
        (true, None) => {
            "## Status page\n\nA status page record exists but no status has been published yet."
                .to_string()
        }
    }
}

fn applied_value_for(events: &[AgentEvent], event_type: EventType, field: &str) -> Option<String> {
    events
        .iter()
        .rev()
        .find(|e| e.event_type == event_type)
        .and_then(|e| e.event_data.get(field))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Fold applied status/severity/affection changes out of the event log, and
/// drop any caller-supplied pending target whose value has since been
/// applied — the mechanism the incident actor uses to clear a pending
/// suggestion once it observes the matching change land.
pub fn derive_suggestion_target_state(
    events: &[AgentEvent],
    pending: HashMap<ActionFamily, Vec<PendingTarget>>,
) -> SuggestionTargetState {
    let mut applied = HashMap::new();
    if let Some(status) = applied_value_for(events, EventType::StatusUpdate, "status") {
        applied.insert(ActionFamily::Status, status);
    }
    if let Some(severity) = applied_value_for(events, EventType::SeverityUpdate, "severity") {
        applied.insert(ActionFamily::Severity, severity);
    }
    if let Some(status) = applied_value_for(events, EventType::AffectionUpdate, "status") {
        applied.insert(ActionFamily::Affection, status);
    }

    let pending = pending
        .into_iter()
        .filter_map(|(family, targets)| {
            let cleared = applied.get(&family);
            let remaining: Vec<PendingTarget> = targets
                .into_iter()
                .filter(|t| cleared != Some(&t.value))
                .collect();
            if remaining.is_empty() {
                None
            } else {
                Some((family, remaining))
            }
        })
        .collect();

    SuggestionTargetState { pending, applied }
}

/// A block summarizing which suggestions are already pending or applied, so
/// the LM doesn't re-propose a change already in flight.
pub fn build_suggestion_state_context_message(state: &SuggestionTargetState) -> String {
    let mut out = String::from("## Suggestion state\n\n");
    for family in [ActionFamily::Status, ActionFamily::Severity, ActionFamily::Affection] {
        let applied = state.applied.get(&family);
        let pending = state.pending.get(&family);
        out.push_str(&format!(
            "- {:?}: applied={}, pending={}\n",
            family,
            applied.map(String::as_str).unwrap_or("none"),
            pending
                .map(|p| p
                    .iter()
                    .map(|t| t.value.as_str())
                    .collect::<Vec<_>>()
                    .join(","))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "none".to_string())
        ));
    }
    out
}

/// A block stating the incident's current identity and lifecycle state.
pub fn build_incident_state_message(incident: &Incident) -> String {
    format!(
        "## Incident state\n\nid={}\ntitle={}\nstatus={:?}\nseverity={:?}\nassignee={}\nsource={}",
        incident.id,
        incident.title,
        incident.status,
        incident.severity,
        incident.assignee.as_deref().unwrap_or("unassigned"),
        incident.source,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::event_log::Adapter;
    use crate::incident::model::{Severity, Status};
    use chrono::Utc;
    use serde_json::json;

    fn sample_event(id: u64, event_type: EventType, data: serde_json::Value, adapter: Adapter) -> AgentEvent {
        AgentEvent {
            id,
            event_type,
            event_data: data,
            created_at: Utc::now(),
            adapter,
            event_metadata: None,
            prev_hash: "0".repeat(64),
            hash: "1".repeat(64),
        }
    }

    #[test]
    fn normalize_strips_volatile_keys_and_sorts() {
        let value = json!({"b": 1, "a": 2, "createdAt": "2020-01-01", "nested": {"ts": 1, "z": 1, "y": 2}});
        let normalized = normalize_event_data(&value);
        assert_eq!(
            normalized,
            json!({"a": 2, "b": 1, "nested": {"y": 2, "z": 1}})
        );
    }

    #[test]
    fn event_messages_insert_boundary_once_before_first_unprocessed_event() {
        let events = vec![
            sample_event(1, EventType::IncidentCreated, json!({}), Adapter::Slack),
            sample_event(2, EventType::MessageAdded, json!({}), Adapter::Slack),
            sample_event(3, EventType::MessageAdded, json!({}), Adapter::Dashboard),
        ];
        let rendered = build_event_messages(&events, 1);
        let boundary_count = rendered
            .iter()
            .filter(|m| m.content.as_ref() == TURN_BOUNDARY_MARKER)
            .count();
        assert_eq!(boundary_count, 1);
        // One boundary message plus one per event.
        assert_eq!(rendered.len(), events.len() + 1);
        assert_eq!(rendered[1].content.as_ref(), TURN_BOUNDARY_MARKER);
    }

    #[test]
    fn event_messages_omit_boundary_when_processed_through_id_is_zero() {
        let events = vec![sample_event(1, EventType::IncidentCreated, json!({}), Adapter::Slack)];
        let rendered = build_event_messages(&events, 0);
        assert_eq!(rendered.len(), 1);
    }

    #[test]
    fn suggestion_origin_events_are_tagged_assistant() {
        let mut metadata = HashMap::new();
        metadata.insert("kind".to_string(), json!("suggestion"));
        let mut event = sample_event(1, EventType::StatusUpdate, json!({"status": "mitigating"}), Adapter::Dashboard);
        event.event_metadata = Some(metadata);
        let rendered = build_event_messages(&[event], 0);
        assert!(matches!(rendered[0].role, Role::Assistant));
    }

    #[test]
    fn ordinary_events_are_tagged_user() {
        let event = sample_event(1, EventType::MessageAdded, json!({}), Adapter::Slack);
        let rendered = build_event_messages(&[event], 0);
        assert!(matches!(rendered[0].role, Role::User));
    }

    #[test]
    fn affection_info_tracks_latest_status_only() {
        let events = vec![
            sample_event(1, EventType::AffectionUpdate, json!({"status": "investigating"}), Adapter::Dashboard),
            sample_event(2, EventType::AffectionUpdate, json!({"status": "mitigating"}), Adapter::Dashboard),
        ];
        let info = derive_affection_info(&events);
        assert!(info.has_affection);
        assert_eq!(info.last_status, Some(AffectionStatus::Mitigating));
    }

    #[test]
    fn pending_target_clears_once_applied() {
        let events = vec![sample_event(
            1,
            EventType::StatusUpdate,
            json!({"status": "mitigating"}),
            Adapter::Fire,
        )];
        let mut pending = HashMap::new();
        pending.insert(
            ActionFamily::Status,
            vec![PendingTarget {
                value: "mitigating".to_string(),
                created_at: Utc::now(),
                event_index: 0,
            }],
        );
        let state = derive_suggestion_target_state(&events, pending);
        assert!(state.pending.get(&ActionFamily::Status).is_none());
        assert_eq!(state.applied.get(&ActionFamily::Status), Some(&"mitigating".to_string()));
    }

    #[test]
    fn incident_state_message_reports_unassigned() {
        let incident = Incident {
            id: "inc-1".to_string(),
            created_at: Utc::now(),
            status: Status::Open,
            severity: Severity::High,
            title: "db outage".to_string(),
            description: "".to_string(),
            prompt: "".to_string(),
            assignee: None,
            source: "pagerduty".to_string(),
        };
        let rendered = build_incident_state_message(&incident);
        assert!(rendered.contains("unassigned"));
    }
}
