//! Replays a [`Scenario`] against a live incident actor and records what the
//! Suggestion Engine and Prompt Workflow actually did, turn by turn.

use crate::client_wrapper::ClientWrapper;
use crate::config::IncidentOpsConfig;
use crate::context_agent::candidates::{CandidateSource, StaticCandidateSource};
use crate::context_agent::ContextAgentHandle;
use crate::error::IncidentOpsError;
use crate::eval::scenario::{Expectation, Scenario};
use crate::incident::actor::IncidentHandle;
use crate::incident::event_log::IncidentEventLog;
use crate::incident::model::{AgentSuggestion, Incident, Severity, Status, SuggestedAffectionStatus};
use crate::telemetry::RuntimeEventHandler;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

/// What happened on one scripted turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRecord {
    pub turn_index: usize,
    /// Whether this turn ran a suggestion-engine pass at all.
    pub triggered: bool,
    /// [`AgentSuggestion::signature`] of each suggestion applied this turn.
    pub suggestions_applied: Vec<String>,
    /// `true` if this turn's applied-suggestion signature repeated one
    /// already applied earlier in the same scenario run.
    pub was_duplicate: bool,
}

/// Outcome of replaying one scenario end to end.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub turns: Vec<TurnRecord>,
    pub expectations_met: Vec<bool>,
    pub final_status: Status,
    pub final_severity: Severity,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.expectations_met.iter().all(|m| *m)
    }
}

/// Four-step scenario runner: seed the incident, replay each scripted turn,
/// snapshot the final state, then check expectations against it.
pub async fn run_scenario(
    scenario: &Scenario,
    client: Arc<dyn ClientWrapper>,
    config: &IncidentOpsConfig,
    handler: Arc<dyn RuntimeEventHandler>,
) -> Result<ScenarioResult, IncidentOpsError> {
    // Step 1: seed the incident actor.
    let log_dir = TempDir::new().map_err(IncidentOpsError::from)?;
    let event_log = IncidentEventLog::open(&log_dir.path().to_path_buf(), &scenario.seed.id)?;
    let incident = IncidentHandle::spawn(
        scenario.seed.clone(),
        event_log,
        client.clone(),
        config.clone(),
        handler.clone(),
    );
    let candidate_source: Arc<dyn CandidateSource> =
        Arc::new(StaticCandidateSource { candidates: Vec::new() });
    let context_agent = ContextAgentHandle::spawn(
        incident.clone(),
        candidate_source,
        client,
        config.clone(),
        handler.clone(),
    );
    incident.attach_context_agent(context_agent).await?;

    // Step 2: replay each scripted turn.
    let mut turns = Vec::new();
    let mut seen_signatures = HashSet::new();
    for (index, turn) in scenario.turns.iter().enumerate() {
        incident.add_message(turn.content.clone(), turn.adapter).await?;
        let mut record = TurnRecord { turn_index: index, ..Default::default() };
        if turn.trigger_suggestion {
            record.triggered = true;
            let outcome = incident.run_suggestion_turn().await?;
            for suggestion in outcome.suggestions {
                let signature = suggestion.signature();
                apply_suggestion(&incident, suggestion).await?;
                if !seen_signatures.insert(signature.clone()) {
                    record.was_duplicate = true;
                }
                record.suggestions_applied.push(signature);
            }
        }
        turns.push(record);
    }

    // Step 3: snapshot final state.
    let final_incident: Incident = incident.get_snapshot().await?;
    let events = incident.get_context().await?;

    // Step 4: check expectations.
    let expectations_met = scenario
        .expectations
        .iter()
        .map(|expectation| check_expectation(expectation, &final_incident, &events))
        .collect();

    Ok(ScenarioResult {
        scenario_name: scenario.name.clone(),
        turns,
        expectations_met,
        final_status: final_incident.status,
        final_severity: final_incident.severity,
    })
}

async fn apply_suggestion(incident: &IncidentHandle, suggestion: AgentSuggestion) -> Result<(), IncidentOpsError> {
    match suggestion {
        AgentSuggestion::UpdateStatus { status, message, .. } => incident.update_status(status, message).await,
        AgentSuggestion::UpdateSeverity { severity, .. } => incident.set_severity(severity).await,
        AgentSuggestion::AddStatusPageUpdate { message, affection_status, .. } => {
            let status = affection_status.unwrap_or(SuggestedAffectionStatus::Update);
            incident.update_affection(status, message).await
        }
    }
}

fn check_expectation(
    expectation: &Expectation,
    incident: &Incident,
    events: &[crate::incident::event_log::AgentEvent],
) -> bool {
    use crate::incident::event_log::EventType;
    match expectation {
        Expectation::StatusBecomes(status) => incident.status == *status,
        Expectation::SeverityBecomes(severity) => incident.severity == *severity,
        Expectation::AffectionPublished => events.iter().any(|e| e.event_type == EventType::AffectionUpdate),
        Expectation::NoAffectionPublished => !events.iter().any(|e| e.event_type == EventType::AffectionUpdate),
        Expectation::SimilarIncidentFound(_) => events.iter().any(|e| e.event_type == EventType::SimilarIncident),
        Expectation::NoSuggestionMade => !events
            .iter()
            .any(|e| matches!(e.event_type, EventType::StatusUpdate | EventType::SeverityUpdate | EventType::AffectionUpdate)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::{Message, NativeToolCall, StructuredReply, StructuredRequest};
    use crate::eval::scenario::builtin_scenarios;
    use crate::telemetry::LoggingRuntimeEventHandler;
    use async_trait::async_trait;
    use std::error::Error;

    struct MitigatingClient;

    #[async_trait]
    impl ClientWrapper for MitigatingClient {
        async fn send_message(&self, _messages: &[Message]) -> Result<Message, Box<dyn Error>> {
            unimplemented!()
        }

        async fn send_structured(
            &self,
            _request: StructuredRequest,
        ) -> Result<StructuredReply, Box<dyn Error>> {
            Ok(StructuredReply {
                content: "".into(),
                tool_calls: vec![NativeToolCall {
                    id: "call-1".to_string(),
                    name: "update_status".to_string(),
                    arguments: serde_json::json!({
                        "evidence": "rolled back",
                        "status": "mitigating",
                        "message": "rollback complete"
                    }),
                }],
                usage: None,
                response_id: None,
            })
        }

        fn model_name(&self) -> &str {
            "mitigating"
        }
    }

    #[tokio::test]
    async fn clear_mitigation_scenario_passes_with_suggesting_client() {
        let scenario = builtin_scenarios()
            .into_iter()
            .find(|s| s.name == "cdn-outage-turn-2")
            .unwrap();
        let result = run_scenario(
            &scenario,
            Arc::new(MitigatingClient),
            &IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        )
        .await
        .unwrap();
        assert!(result.passed());
        assert_eq!(result.final_status, Status::Mitigating);
    }
}
