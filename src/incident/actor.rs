//! Per-incident actor: owns one incident's event log and pending-suggestion
//! bookkeeping behind a `tokio::sync::mpsc` mailbox, the way the teacher's
//! `Agent`/`Council` types own session state behind a task boundary rather
//! than exposing `&mut self` across concurrent callers.

use crate::client_wrapper::ClientWrapper;
use crate::config::IncidentOpsConfig;
use crate::context_agent::ContextAgentHandle;
use crate::error::IncidentOpsError;
use crate::incident::event_log::{Adapter, AgentEvent, EventType, IncidentEventLog};
use crate::incident::model::{
    ActionFamily, AgentSuggestion, ContextBatch, Incident, PendingTarget, Severity, Status,
    SuggestedAffectionStatus,
};
use crate::incident::prompt_assembler::derive_affection_info;
use crate::incident::prompt_engine::{self, PromptOutcome};
use crate::incident::suggestion_engine::{self, SuggestionOutcome};
use crate::telemetry::{RuntimeEvent, RuntimeEventHandler};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T, IncidentOpsError>>;

enum ActorMessage {
    UpdateStatus { status: Status, message: String, reply: Reply<()> },
    SetSeverity { severity: Severity, reply: Reply<()> },
    UpdateAffection { status: SuggestedAffectionStatus, message: String, reply: Reply<()> },
    AddMessage { content: String, adapter: Adapter, reply: Reply<()> },
    RecordInsightEvent {
        dedupe_key: String,
        event_type: EventType,
        data: serde_json::Value,
        adapter: Adapter,
        reply: Reply<bool>,
    },
    GetContext { reply: Reply<Vec<AgentEvent>> },
    GetSnapshot { reply: Reply<Incident> },
    RunSuggestionTurn { reply: Reply<SuggestionOutcome> },
    RunPromptTurn { prompt_text: String, reply: Reply<PromptOutcome> },
    /// Bind the similar-incidents context agent after it has been spawned.
    /// Spawning a [`ContextAgentHandle`] requires an already-running
    /// [`IncidentHandle`], so the two actors can't be wired up at
    /// construction time — the caller attaches it once both exist.
    AttachContextAgent { context_agent: ContextAgentHandle, reply: Reply<()> },
}

/// A cloneable reference to a running incident actor's mailbox.
#[derive(Clone)]
pub struct IncidentHandle {
    incident_id: String,
    sender: mpsc::Sender<ActorMessage>,
}

impl IncidentHandle {
    /// Spawn the actor task and return a handle to its mailbox.
    pub fn spawn(
        incident: Incident,
        event_log: IncidentEventLog,
        client: Arc<dyn ClientWrapper>,
        config: IncidentOpsConfig,
        handler: Arc<dyn RuntimeEventHandler>,
    ) -> Self {
        let incident_id = incident.id.clone();
        let (tx, rx) = mpsc::channel(64);
        let actor = Actor {
            incident,
            event_log,
            pending: HashMap::new(),
            client,
            config,
            handler,
            processed_through_id: 0,
            context_agent: None,
        };
        tokio::spawn(actor.run(rx));
        IncidentHandle { incident_id, sender: tx }
    }

    pub fn incident_id(&self) -> &str {
        &self.incident_id
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ActorMessage,
    ) -> Result<T, IncidentOpsError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(build(reply_tx))
            .await
            .map_err(|_| IncidentOpsError::Transport("incident actor mailbox closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| IncidentOpsError::Transport("incident actor dropped reply".to_string()))?
    }

    pub async fn update_status(&self, status: Status, message: String) -> Result<(), IncidentOpsError> {
        self.call(|reply| ActorMessage::UpdateStatus { status, message, reply }).await
    }

    pub async fn set_severity(&self, severity: Severity) -> Result<(), IncidentOpsError> {
        self.call(|reply| ActorMessage::SetSeverity { severity, reply }).await
    }

    pub async fn update_affection(
        &self,
        status: SuggestedAffectionStatus,
        message: String,
    ) -> Result<(), IncidentOpsError> {
        self.call(|reply| ActorMessage::UpdateAffection { status, message, reply }).await
    }

    pub async fn add_message(&self, content: String, adapter: Adapter) -> Result<(), IncidentOpsError> {
        self.call(|reply| ActorMessage::AddMessage { content, adapter, reply }).await
    }

    /// Insert-or-ignore an agent-authored insight event, returning whether it
    /// was newly inserted (`true`) or suppressed as a duplicate (`false`).
    pub async fn record_insight_event(
        &self,
        dedupe_key: String,
        event_type: EventType,
        data: serde_json::Value,
        adapter: Adapter,
    ) -> Result<bool, IncidentOpsError> {
        self.call(|reply| ActorMessage::RecordInsightEvent { dedupe_key, event_type, data, adapter, reply })
            .await
    }

    pub async fn get_context(&self) -> Result<Vec<AgentEvent>, IncidentOpsError> {
        self.call(|reply| ActorMessage::GetContext { reply }).await
    }

    /// A point-in-time copy of the incident's identity and lifecycle state.
    pub async fn get_snapshot(&self) -> Result<Incident, IncidentOpsError> {
        self.call(|reply| ActorMessage::GetSnapshot { reply }).await
    }

    pub async fn run_suggestion_turn(&self) -> Result<SuggestionOutcome, IncidentOpsError> {
        self.call(|reply| ActorMessage::RunSuggestionTurn { reply }).await
    }

    /// Run the Prompt Workflow's `fetch` step: one LM call with the prompt
    /// toolset against `prompt_text`, resolving to at most one action.
    pub async fn run_prompt_turn(&self, prompt_text: String) -> Result<PromptOutcome, IncidentOpsError> {
        self.call(|reply| ActorMessage::RunPromptTurn { prompt_text, reply }).await
    }

    /// Bind the similar-incidents context agent so the actor can forward new
    /// events to it as they arrive.
    pub async fn attach_context_agent(&self, context_agent: ContextAgentHandle) -> Result<(), IncidentOpsError> {
        self.call(|reply| ActorMessage::AttachContextAgent { context_agent, reply }).await
    }
}

struct Actor {
    incident: Incident,
    event_log: IncidentEventLog,
    pending: HashMap<ActionFamily, Vec<PendingTarget>>,
    client: Arc<dyn ClientWrapper>,
    config: IncidentOpsConfig,
    handler: Arc<dyn RuntimeEventHandler>,
    /// Id of the last event folded into a completed suggestion turn, so the
    /// next turn's prompt can draw the boundary between processed history
    /// and newly arrived evidence.
    processed_through_id: u64,
    /// The similar-incidents context agent this incident forwards new
    /// events to, once attached via [`IncidentHandle::attach_context_agent`].
    context_agent: Option<ContextAgentHandle>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<ActorMessage>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                ActorMessage::UpdateStatus { status, message, reply } => {
                    let _ = reply.send(self.apply_status(status, message));
                }
                ActorMessage::SetSeverity { severity, reply } => {
                    let _ = reply.send(self.apply_severity(severity));
                }
                ActorMessage::UpdateAffection { status, message, reply } => {
                    let _ = reply.send(self.apply_affection(status, message));
                }
                ActorMessage::AddMessage { content, adapter, reply } => {
                    let result = self
                        .event_log
                        .append(
                            EventType::MessageAdded,
                            serde_json::json!({ "content": content }),
                            adapter,
                            None,
                        )
                        .map(|_| ())
                        .map_err(IncidentOpsError::from);
                    if result.is_ok() {
                        self.forward_to_context_agent("message_added");
                    }
                    let _ = reply.send(result);
                }
                ActorMessage::RecordInsightEvent { dedupe_key, event_type, data, adapter, reply } => {
                    let result = self
                        .event_log
                        .append_deduped(&dedupe_key, event_type, data, adapter, HashMap::new())
                        .map_err(IncidentOpsError::from);
                    if let Ok(inserted) = result {
                        let event = RuntimeEvent::EventAppended {
                            incident_id: self.incident.id.clone(),
                            event_type: format!("{:?}", event_type),
                            sequence: self.event_log.events().len() as u64,
                        };
                        if inserted {
                            self.handler.on_runtime_event(&event).await;
                        } else {
                            self.handler
                                .on_runtime_event(&RuntimeEvent::EventDeduped {
                                    incident_id: self.incident.id.clone(),
                                    dedupe_key: dedupe_key.clone(),
                                })
                                .await;
                        }
                    }
                    let _ = reply.send(result);
                }
                ActorMessage::GetContext { reply } => {
                    let _ = reply.send(Ok(self.event_log.events().to_vec()));
                }
                ActorMessage::GetSnapshot { reply } => {
                    let _ = reply.send(Ok(self.incident.clone()));
                }
                ActorMessage::RunSuggestionTurn { reply } => {
                    let result = self.run_suggestion_turn().await;
                    let _ = reply.send(result);
                }
                ActorMessage::RunPromptTurn { prompt_text, reply } => {
                    let affection = derive_affection_info(self.event_log.events());
                    let result =
                        prompt_engine::run_prompt_turn(&self.client, &self.incident, &affection, &prompt_text)
                            .await;
                    let _ = reply.send(result);
                }
                ActorMessage::AttachContextAgent { context_agent, reply } => {
                    self.context_agent = Some(context_agent);
                    let _ = reply.send(Ok(()));
                }
            }
        }
    }

    fn apply_status(&mut self, status: Status, message: String) -> Result<(), IncidentOpsError> {
        if !self.incident.status.can_transition_to(status) {
            return Err(IncidentOpsError::InvalidTransition {
                from: format!("{:?}", self.incident.status).to_lowercase(),
                to: format!("{:?}", status).to_lowercase(),
            });
        }
        self.incident.status = status;
        self.event_log
            .append(
                EventType::StatusUpdate,
                serde_json::json!({ "status": format!("{:?}", status).to_lowercase(), "message": message }),
                Adapter::Dashboard,
                None,
            )
            .map_err(IncidentOpsError::from)?;
        self.forward_to_context_agent("status_update");
        Ok(())
    }

    fn apply_severity(&mut self, severity: Severity) -> Result<(), IncidentOpsError> {
        self.incident.severity = severity;
        self.event_log
            .append(
                EventType::SeverityUpdate,
                serde_json::json!({ "severity": format!("{:?}", severity).to_lowercase() }),
                Adapter::Dashboard,
                None,
            )
            .map_err(IncidentOpsError::from)?;
        self.forward_to_context_agent("severity_update");
        Ok(())
    }

    fn apply_affection(
        &mut self,
        status: SuggestedAffectionStatus,
        message: String,
    ) -> Result<(), IncidentOpsError> {
        let status_field = if status == SuggestedAffectionStatus::Update {
            None
        } else {
            Some(format!("{:?}", status).to_lowercase())
        };
        let mut data = serde_json::json!({ "message": message });
        if let Some(s) = status_field {
            data["status"] = serde_json::Value::String(s);
        }
        self.event_log
            .append(EventType::AffectionUpdate, data, Adapter::Dashboard, None)
            .map_err(IncidentOpsError::from)?;
        self.forward_to_context_agent("affection_update");
        Ok(())
    }

    /// Forward the delta up to the incident's latest event to the attached
    /// similar-incidents context agent, recording that the handoff happened.
    /// The `add_context` call runs on a detached task rather than being
    /// awaited inline: the context agent's own processing calls back into
    /// this incident's [`IncidentHandle`] (e.g. `get_context`), and awaiting
    /// it here, inside this actor's own message loop, would deadlock the two
    /// mailboxes against each other.
    fn forward_to_context_agent(&mut self, trigger: &str) {
        let Some(context_agent) = self.context_agent.clone() else { return };
        let to_event_id = self.event_log.events().last().map(|e| e.id).unwrap_or(0);
        let _ = self.event_log.append(
            EventType::ContextAgentTriggered,
            serde_json::json!({ "to_event_id": to_event_id, "trigger": trigger }),
            Adapter::Dashboard,
            None,
        );
        let batch = ContextBatch {
            to_event_id,
            trigger: trigger.to_string(),
            requested_at: Utc::now(),
            appended_step_range: None,
        };
        tokio::spawn(async move {
            let _ = context_agent.add_context(batch).await;
        });
    }

    async fn run_suggestion_turn(&mut self) -> Result<SuggestionOutcome, IncidentOpsError> {
        self.handler
            .on_runtime_event(&RuntimeEvent::SuggestionCallStarted {
                incident_id: self.incident.id.clone(),
                context_event_count: self.event_log.events().len(),
            })
            .await;

        let outcome = suggestion_engine::generate_incident_suggestions(
            &self.client,
            &self.config,
            &self.incident,
            self.event_log.events(),
            self.pending.clone(),
            self.processed_through_id,
        )
        .await;

        match &outcome {
            Ok(outcome) => {
                let event_index = self.event_log.events().len() as u64;
                self.processed_through_id = self.event_log.events().last().map(|e| e.id).unwrap_or(0);
                for suggestion in &outcome.suggestions {
                    self.pending.entry(suggestion.family()).or_default().push(PendingTarget {
                        value: target_label(suggestion),
                        created_at: Utc::now(),
                        event_index,
                    });
                }
                self.handler
                    .on_runtime_event(&RuntimeEvent::SuggestionCallCompleted {
                        incident_id: self.incident.id.clone(),
                        tokens_used: outcome.usage.clone(),
                        tool_calls_made: outcome.suggestions.len(),
                    })
                    .await;
                if outcome.similar_incidents_request.is_some() {
                    self.forward_to_context_agent("similar_incidents_requested");
                }
            }
            Err(err) => {
                self.handler
                    .on_runtime_event(&RuntimeEvent::SuggestionCallFailed {
                        incident_id: self.incident.id.clone(),
                        error: err.to_string(),
                    })
                    .await;
            }
        }

        outcome
    }
}

fn target_label(suggestion: &AgentSuggestion) -> String {
    match suggestion {
        AgentSuggestion::UpdateStatus { status, .. } => format!("{:?}", status).to_lowercase(),
        AgentSuggestion::UpdateSeverity { severity, .. } => format!("{:?}", severity).to_lowercase(),
        AgentSuggestion::AddStatusPageUpdate { affection_status, .. } => affection_status
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_else(|| "update".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::{Message, StructuredReply};
    use crate::telemetry::LoggingRuntimeEventHandler;
    use async_trait::async_trait;
    use std::error::Error;
    use tempfile::tempdir;

    struct SilentClient;

    #[async_trait]
    impl ClientWrapper for SilentClient {
        async fn send_message(&self, _messages: &[Message]) -> Result<Message, Box<dyn Error>> {
            unimplemented!()
        }

        async fn send_structured(
            &self,
            _request: crate::client_wrapper::StructuredRequest,
        ) -> Result<StructuredReply, Box<dyn Error>> {
            Ok(StructuredReply {
                content: "".into(),
                tool_calls: Vec::new(),
                usage: None,
                response_id: None,
            })
        }

        fn model_name(&self) -> &str {
            "silent"
        }
    }

    fn sample_incident() -> Incident {
        Incident {
            id: "inc-actor-1".to_string(),
            created_at: Utc::now(),
            status: Status::Open,
            severity: Severity::Medium,
            title: "t".to_string(),
            description: "d".to_string(),
            prompt: "p".to_string(),
            assignee: None,
            source: "manual".to_string(),
        }
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected_without_mutating_state() {
        let dir = tempdir().unwrap();
        let log = IncidentEventLog::open(&dir.path().to_path_buf(), "inc-actor-1").unwrap();
        let handle = IncidentHandle::spawn(
            sample_incident(),
            log,
            Arc::new(SilentClient),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );
        handle.update_status(Status::Resolved, "fixed".to_string()).await.unwrap();
        let err = handle.update_status(Status::Mitigating, "oops".to_string()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn duplicate_insight_event_is_deduped() {
        let dir = tempdir().unwrap();
        let log = IncidentEventLog::open(&dir.path().to_path_buf(), "inc-actor-1").unwrap();
        let handle = IncidentHandle::spawn(
            sample_incident(),
            log,
            Arc::new(SilentClient),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );
        let first = handle
            .record_insight_event(
                "dk-1".to_string(),
                EventType::SimilarIncident,
                serde_json::json!({"id": "inc-0"}),
                Adapter::Dashboard,
            )
            .await
            .unwrap();
        let second = handle
            .record_insight_event(
                "dk-1".to_string(),
                EventType::SimilarIncident,
                serde_json::json!({"id": "inc-0"}),
                Adapter::Dashboard,
            )
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }
}
