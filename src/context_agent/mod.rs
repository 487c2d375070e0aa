//! Similar-incidents context agent: a secondary actor per incident that
//! investigates historical candidates on demand, keeping its own turn
//! history the way the teacher's council-session types keep a participant's
//! turns separate from the primary conversation.

pub mod candidates;

use crate::client_wrapper::{
    ClientWrapper, Message, ReasoningEffort, Role, StructuredRequest, ToolChoice, ToolDefinition,
};
use crate::config::IncidentOpsConfig;
use crate::error::IncidentOpsError;
use crate::incident::actor::IncidentHandle;
use crate::incident::event_log::{Adapter, AgentEvent, EventType};
use crate::incident::model::{
    CandidateLifecycle, ContextAgentStep, ContextBatch, SimilarIncidentCandidate, StepRole, StepSource,
};
use crate::telemetry::{RuntimeEvent, RuntimeEventHandler};
use candidates::CandidateSource;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Whether the context agent is between investigations or mid-turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Failed,
}

/// How current an [`addPrompt`](ContextAgentHandle::add_prompt) answer is
/// with respect to the incident's latest events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The answer reflects every event queued so far.
    Fresh,
    /// An investigation is still running, or events have been queued that
    /// the answer does not yet reflect.
    InProgress,
    /// No context has ever been added for this incident.
    Empty,
}

/// Result of one [`ContextAgentHandle::add_prompt`] call.
#[derive(Debug, Clone)]
pub struct PromptAnswer {
    pub answer: String,
    pub freshness: Freshness,
    pub as_of_event_id: u64,
}

/// Snapshot returned by [`ContextAgentHandle::export_data`] for persistence
/// or for the evaluation harness to inspect after a scenario run.
#[derive(Debug, Clone)]
pub struct ContextAgentExport {
    pub incident_id: String,
    pub last_processed_event_id: u64,
    pub run_status: RunStatus,
    pub steps: Vec<ContextAgentStep>,
    pub batches: Vec<ContextBatch>,
    pub candidates_loaded: bool,
}

type Reply<T> = oneshot::Sender<Result<T, IncidentOpsError>>;

enum AgentMessage {
    AddContext { batch: ContextBatch, reply: Reply<()> },
    AddPrompt { text: String, reply: Reply<PromptAnswer> },
    Cleanup { reply: Reply<ContextAgentExport> },
}

/// A cloneable reference to a running context agent's mailbox.
#[derive(Clone)]
pub struct ContextAgentHandle {
    incident_id: String,
    sender: mpsc::Sender<AgentMessage>,
}

impl ContextAgentHandle {
    pub fn spawn(
        incident: IncidentHandle,
        candidate_source: Arc<dyn CandidateSource>,
        client: Arc<dyn ClientWrapper>,
        config: IncidentOpsConfig,
        handler: Arc<dyn RuntimeEventHandler>,
    ) -> Self {
        let incident_id = incident.incident_id().to_string();
        let (tx, rx) = mpsc::channel(32);
        let agent = Agent {
            incident_id: incident_id.clone(),
            incident,
            candidate_source,
            client,
            config,
            handler,
            last_processed_event_id: 0,
            max_queued_to_event_id: 0,
            run_status: RunStatus::Idle,
            candidates_loaded: false,
            candidates: Vec::new(),
            steps: Vec::new(),
            batches: Vec::new(),
        };
        tokio::spawn(agent.run(rx));
        ContextAgentHandle { incident_id, sender: tx }
    }

    pub fn incident_id(&self) -> &str {
        &self.incident_id
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> AgentMessage) -> Result<T, IncidentOpsError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(build(reply_tx))
            .await
            .map_err(|_| IncidentOpsError::Transport("context agent mailbox closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| IncidentOpsError::Transport("context agent dropped reply".to_string()))?
    }

    /// Queue a new slice of the incident's event log for investigation.
    /// Coalesces with any investigation already in flight: the actor loop
    /// re-checks `max_queued_to_event_id` after every iteration rather than
    /// requiring one call per batch.
    pub async fn add_context(&self, batch: ContextBatch) -> Result<(), IncidentOpsError> {
        self.call(|reply| AgentMessage::AddContext { batch, reply }).await
    }

    /// Ask the context agent a question about the incident right now,
    /// answered from whatever context it has already folded in.
    pub async fn add_prompt(&self, text: String) -> Result<PromptAnswer, IncidentOpsError> {
        self.call(|reply| AgentMessage::AddPrompt { text, reply }).await
    }

    /// Drain the agent's accumulated state for persistence or inspection.
    pub async fn cleanup(&self) -> Result<ContextAgentExport, IncidentOpsError> {
        self.call(|reply| AgentMessage::Cleanup { reply }).await
    }
}

struct Agent {
    incident_id: String,
    incident: IncidentHandle,
    candidate_source: Arc<dyn CandidateSource>,
    client: Arc<dyn ClientWrapper>,
    config: IncidentOpsConfig,
    handler: Arc<dyn RuntimeEventHandler>,
    last_processed_event_id: u64,
    max_queued_to_event_id: u64,
    run_status: RunStatus,
    candidates_loaded: bool,
    candidates: Vec<SimilarIncidentCandidate>,
    steps: Vec<ContextAgentStep>,
    batches: Vec<ContextBatch>,
}

impl Agent {
    async fn run(mut self, mut rx: mpsc::Receiver<AgentMessage>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                AgentMessage::AddContext { batch, reply } => {
                    self.max_queued_to_event_id = self.max_queued_to_event_id.max(batch.to_event_id);
                    self.batches.push(batch);
                    let result = self.run_until_caught_up().await;
                    let _ = reply.send(result);
                }
                AgentMessage::AddPrompt { text, reply } => {
                    let result = self.answer_prompt(text).await;
                    let _ = reply.send(result);
                }
                AgentMessage::Cleanup { reply } => {
                    let export = ContextAgentExport {
                        incident_id: self.incident_id.clone(),
                        last_processed_event_id: self.last_processed_event_id,
                        run_status: self.run_status,
                        steps: self.steps.clone(),
                        batches: self.batches.clone(),
                        candidates_loaded: self.candidates_loaded,
                    };
                    let _ = reply.send(Ok(export));
                }
            }
        }
    }

    /// The alarm loop: keep investigating while new context has arrived,
    /// bounded so a misbehaving provider can't spin the task forever.
    async fn run_until_caught_up(&mut self) -> Result<(), IncidentOpsError> {
        const MAX_ITERATIONS_PER_WAKE: usize = 10;
        let mut iterations = 0;
        while self.max_queued_to_event_id > self.last_processed_event_id {
            if iterations >= MAX_ITERATIONS_PER_WAKE {
                break;
            }
            iterations += 1;
            self.run_iteration().await?;
        }
        Ok(())
    }

    /// One catch-up step: a discovery call over the whole candidate pool
    /// (emitting exactly one `SIMILAR_INCIDENTS_DISCOVERED` event), followed
    /// by a deep-dive call per selected candidate, run concurrently, each
    /// independently emitting `SIMILAR_INCIDENT` when it confirms a match.
    async fn run_iteration(&mut self) -> Result<(), IncidentOpsError> {
        self.run_status = RunStatus::Running;

        if !self.candidates_loaded {
            if let Err(err) = self.load_candidates().await {
                self.run_status = RunStatus::Failed;
                return Err(err);
            }
        }

        let events = self.incident.get_context().await?;
        let new_events: Vec<&AgentEvent> = events
            .iter()
            .filter(|e| e.id > self.last_processed_event_id && e.id <= self.max_queued_to_event_id)
            .collect();

        self.steps.push(ContextAgentStep {
            role: StepRole::User,
            content: summarize_new_events(&new_events),
            name: None,
            tool_call_id: None,
            source: StepSource::Context,
            context_to_event_id: Some(self.max_queued_to_event_id),
            run_id: None,
        });

        self.handler
            .on_runtime_event(&RuntimeEvent::ContextInvestigationStarted {
                incident_id: self.incident_id.clone(),
                candidate_count: self.candidates.len(),
            })
            .await;

        let discovery = match self.run_discovery_phase().await {
            Ok(discovery) => discovery,
            Err(err) => {
                self.run_status = RunStatus::Failed;
                return Err(err);
            }
        };

        let posted = match self.run_deep_dive_phase(discovery).await {
            Ok(posted) => posted,
            Err(err) => {
                self.run_status = RunStatus::Failed;
                return Err(err);
            }
        };

        self.handler
            .on_runtime_event(&RuntimeEvent::ContextInvestigationCompleted {
                incident_id: self.incident_id.clone(),
                contexts_posted: posted,
            })
            .await;

        self.last_processed_event_id = self.max_queued_to_event_id;
        self.run_status = RunStatus::Idle;
        Ok(())
    }

    /// Phase 1: one LM call ranking and selecting candidates worth a
    /// deep-dive, recorded as a single `SIMILAR_INCIDENTS_DISCOVERED` event.
    async fn run_discovery_phase(&mut self) -> Result<DiscoveryResult, IncidentOpsError> {
        let run_id = Uuid::new_v4().to_string();

        let messages = self.build_discovery_messages();
        let request = StructuredRequest {
            messages,
            tools: vec![discovery_tool_definition()],
            tool_choice: ToolChoice::Auto,
            prompt_cache_key: None,
            reasoning_effort: Some(ReasoningEffort::Low),
        };
        let reply = self.client.send_structured(request).await.map_err(IncidentOpsError::from)?;

        let mut ranked_ids = Vec::new();
        let mut selected_ids = Vec::new();
        for call in &reply.tool_calls {
            if call.name != "select_similar_candidates" {
                continue;
            }
            if let Some(ranked) = call.arguments.get("ranked_candidate_ids").and_then(|v| v.as_array()) {
                ranked_ids = ranked.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
            }
            if let Some(selected) = call.arguments.get("selected_candidate_ids").and_then(|v| v.as_array()) {
                selected_ids = selected.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
            }
        }

        let (open_count, closed_count) = self.candidates.iter().fold((0usize, 0usize), |(open, closed), c| {
            match c.lifecycle {
                CandidateLifecycle::Open { .. } => (open + 1, closed),
                CandidateLifecycle::Completed { .. } => (open, closed + 1),
            }
        });
        let gate_decision = if selected_ids.is_empty() { "no_match" } else { "investigate" };

        self.incident
            .record_insight_event(
                format!("discovered:{}", run_id),
                EventType::SimilarIncidentsDiscovered,
                serde_json::json!({
                    "run_id": run_id,
                    "searched_at": Utc::now(),
                    "gate_decision": gate_decision,
                    "open_candidate_count": open_count,
                    "closed_candidate_count": closed_count,
                    "ranked_incident_ids": ranked_ids,
                    "selected_incident_ids": selected_ids,
                }),
                Adapter::Dashboard,
            )
            .await?;

        self.steps.push(ContextAgentStep {
            role: StepRole::Assistant,
            content: format!(
                "discovery run {} selected {} of {} candidate(s)",
                run_id,
                selected_ids.len(),
                self.candidates.len()
            ),
            name: None,
            tool_call_id: None,
            source: StepSource::Runner,
            context_to_event_id: None,
            run_id: Some(run_id.clone()),
        });

        let selected = self
            .candidates
            .iter()
            .filter(|c| selected_ids.contains(&c.id))
            .cloned()
            .collect();

        Ok(DiscoveryResult { run_id, selected })
    }

    /// Phase 2: one independent LM call per selected candidate, run
    /// concurrently on detached tasks since each only needs a clone of the
    /// incident handle and client, not `&mut self`.
    async fn run_deep_dive_phase(&mut self, discovery: DiscoveryResult) -> Result<usize, IncidentOpsError> {
        if discovery.selected.is_empty() {
            return Ok(0);
        }

        let mut handles = Vec::with_capacity(discovery.selected.len());
        for candidate in discovery.selected {
            let client = self.client.clone();
            let incident = self.incident.clone();
            let run_id = discovery.run_id.clone();
            handles.push(tokio::spawn(
                async move { deep_dive_candidate(client, incident, run_id, candidate).await },
            ));
        }

        let mut posted = 0;
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(Ok(inserted)) => {
                    if inserted {
                        posted += 1;
                    }
                }
                Ok(Err(err)) => outcomes.push(err),
                Err(_) => {}
            }
        }
        if let Some(err) = outcomes.into_iter().next() {
            return Err(err);
        }
        Ok(posted)
    }

    /// Answer one operator question immediately from whatever context has
    /// already been folded in, without waiting for a pending investigation.
    async fn answer_prompt(&mut self, text: String) -> Result<PromptAnswer, IncidentOpsError> {
        self.steps.push(ContextAgentStep {
            role: StepRole::User,
            content: text,
            name: None,
            tool_call_id: None,
            source: StepSource::Prompt,
            context_to_event_id: None,
            run_id: None,
        });

        let messages = self.build_discovery_messages();
        let request = StructuredRequest {
            messages,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            prompt_cache_key: None,
            reasoning_effort: Some(ReasoningEffort::Low),
        };
        let reply = self.client.send_structured(request).await.map_err(IncidentOpsError::from)?;
        let answer = reply.content.to_string();

        self.steps.push(ContextAgentStep {
            role: StepRole::Assistant,
            content: answer.clone(),
            name: None,
            tool_call_id: None,
            source: StepSource::Runner,
            context_to_event_id: None,
            run_id: None,
        });

        let freshness = if self.run_status == RunStatus::Running {
            Freshness::InProgress
        } else if self.last_processed_event_id == 0 && self.max_queued_to_event_id == 0 {
            Freshness::Empty
        } else if self.last_processed_event_id == self.max_queued_to_event_id {
            Freshness::Fresh
        } else {
            Freshness::InProgress
        };

        Ok(PromptAnswer { answer, freshness, as_of_event_id: self.last_processed_event_id })
    }

    async fn load_candidates(&mut self) -> Result<(), IncidentOpsError> {
        let since = Utc::now() - chrono::Duration::from_std(self.config.candidate_lookback).unwrap_or_default();
        let open = self
            .candidate_source
            .open_candidates(&self.incident_id, since, self.config.max_open_candidates)
            .await
            .map_err(IncidentOpsError::from)?;
        let completed = self
            .candidate_source
            .completed_candidates(&self.incident_id, since, self.config.max_completed_candidates)
            .await
            .map_err(IncidentOpsError::from)?;
        self.candidates = open.into_iter().chain(completed).collect();
        self.candidates_loaded = true;
        Ok(())
    }

    fn build_discovery_messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::new(
            Role::System,
            "You investigate whether a live incident resembles past incidents. \
             Rank and select candidates worth a closer look; a separate call \
             will deep-dive each one you select.",
        )];
        messages.push(Message::new(Role::User, render_candidates(&self.candidates)));
        for step in &self.steps {
            let role = match step.role {
                StepRole::System => Role::System,
                StepRole::User | StepRole::FunctionCall => Role::User,
                StepRole::Assistant => Role::Assistant,
                StepRole::Tool => Role::Tool { call_id: step.tool_call_id.clone().unwrap_or_default() },
            };
            messages.push(Message::new(role, step.content.clone()));
        }
        messages
    }
}

/// Candidates selected by a discovery run, ready for deep-dive.
struct DiscoveryResult {
    run_id: String,
    selected: Vec<SimilarIncidentCandidate>,
}

/// Phase 2 of one candidate: decide, in isolation, whether `candidate` is
/// truly similar to the live incident, and if so emit one `SIMILAR_INCIDENT`
/// event keyed by `{run_id}:{candidate.id}`.
async fn deep_dive_candidate(
    client: Arc<dyn ClientWrapper>,
    incident: IncidentHandle,
    run_id: String,
    candidate: SimilarIncidentCandidate,
) -> Result<bool, IncidentOpsError> {
    let messages = vec![
        Message::new(
            Role::System,
            "Decide whether the live incident and this one candidate are truly similar. \
             Call confirm_similar_incident exactly once with your verdict.",
        ),
        Message::new(
            Role::User,
            format!(
                "Candidate: {} | {} | severity={:?} | lifecycle={:?}",
                candidate.id, candidate.title, candidate.severity, candidate.lifecycle
            ),
        ),
    ];
    let request = StructuredRequest {
        messages,
        tools: vec![deep_dive_tool_definition()],
        tool_choice: ToolChoice::Auto,
        prompt_cache_key: None,
        reasoning_effort: Some(ReasoningEffort::Low),
    };
    let reply = client.send_structured(request).await.map_err(IncidentOpsError::from)?;

    for call in &reply.tool_calls {
        if call.name != "confirm_similar_incident" {
            continue;
        }
        let is_similar = call.arguments.get("is_similar").and_then(|v| v.as_bool()).unwrap_or(false);
        if !is_similar {
            return Ok(false);
        }
        let similarities = call.arguments.get("similarities").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let learnings = call.arguments.get("learnings").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let dedupe_key = format!("{}:{}", run_id, candidate.id);
        return incident
            .record_insight_event(
                dedupe_key,
                EventType::SimilarIncident,
                serde_json::json!({
                    "origin_run_id": run_id,
                    "similar_incident_id": candidate.id,
                    "title": candidate.title,
                    "similarities": similarities,
                    "learnings": learnings,
                }),
                Adapter::Dashboard,
            )
            .await;
    }
    Ok(false)
}

fn summarize_new_events(events: &[&AgentEvent]) -> String {
    if events.is_empty() {
        return "## New incident activity\n\n(no new events)".to_string();
    }
    let mut out = String::from("## New incident activity\n\n");
    for event in events {
        out.push_str(&format!("[#{} {:?}] {}\n", event.id, event.event_type, event.event_data));
    }
    out
}

fn render_candidates(candidates: &[SimilarIncidentCandidate]) -> String {
    if candidates.is_empty() {
        return "## Candidate incidents\n\n(none found in the lookback window)".to_string();
    }
    let mut out = String::from("## Candidate incidents\n\n");
    for c in candidates {
        out.push_str(&format!(
            "- {} | {} | severity={:?} | lifecycle={:?}\n",
            c.id, c.title, c.severity, c.lifecycle
        ));
    }
    out
}

fn discovery_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: "select_similar_candidates".to_string(),
        description: "Rank candidates by relevance and select which ones deserve a closer deep-dive.".to_string(),
        parameters_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "ranked_candidate_ids": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "All considered candidate ids, most relevant first."
                },
                "selected_candidate_ids": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Subset of ranked_candidate_ids worth a deep-dive call."
                }
            },
            "required": ["ranked_candidate_ids", "selected_candidate_ids"],
            "additionalProperties": false
        }),
    }
}

fn deep_dive_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: "confirm_similar_incident".to_string(),
        description: "Confirm or refute that this one candidate is similar to the live incident.".to_string(),
        parameters_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "is_similar": {"type": "boolean"},
                "similarities": {"type": "array", "items": {"type": "string"}},
                "learnings": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["is_similar"],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::{Message as WrapperMessage, StructuredReply};
    use crate::incident::event_log::IncidentEventLog;
    use crate::incident::model::{Incident, Severity, Status};
    use crate::telemetry::LoggingRuntimeEventHandler;
    use async_trait::async_trait;
    use std::error::Error;
    use tempfile::tempdir;

    struct EchoClient;

    #[async_trait]
    impl ClientWrapper for EchoClient {
        async fn send_message(&self, _messages: &[WrapperMessage]) -> Result<WrapperMessage, Box<dyn Error>> {
            unimplemented!()
        }

        async fn send_structured(
            &self,
            _request: StructuredRequest,
        ) -> Result<StructuredReply, Box<dyn Error>> {
            Ok(StructuredReply {
                content: "no matches".into(),
                tool_calls: Vec::new(),
                usage: None,
                response_id: None,
            })
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn run_until_caught_up_reaches_idle_with_no_candidates() {
        let dir = tempdir().unwrap();
        let log = IncidentEventLog::open(&dir.path().to_path_buf(), "inc-ctx-1").unwrap();
        let incident = Incident {
            id: "inc-ctx-1".to_string(),
            created_at: Utc::now(),
            status: Status::Open,
            severity: Severity::Medium,
            title: "t".to_string(),
            description: "d".to_string(),
            prompt: "p".to_string(),
            assignee: None,
            source: "manual".to_string(),
        };
        let incident_handle = IncidentHandle::spawn(
            incident,
            log,
            Arc::new(EchoClient),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );
        let context_handle = ContextAgentHandle::spawn(
            incident_handle,
            Arc::new(candidates::StaticCandidateSource { candidates: Vec::new() }),
            Arc::new(EchoClient),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );
        context_handle
            .add_context(ContextBatch {
                to_event_id: 1,
                trigger: "similar_incidents".to_string(),
                requested_at: Utc::now(),
                appended_step_range: None,
            })
            .await
            .unwrap();
        let export = context_handle.cleanup().await.unwrap();
        assert_eq!(export.run_status, RunStatus::Idle);
        assert_eq!(export.last_processed_event_id, 1);
    }

    struct ConfirmingClient;

    #[async_trait]
    impl ClientWrapper for ConfirmingClient {
        async fn send_message(&self, _messages: &[WrapperMessage]) -> Result<WrapperMessage, Box<dyn Error>> {
            unimplemented!()
        }

        async fn send_structured(
            &self,
            request: StructuredRequest,
        ) -> Result<StructuredReply, Box<dyn Error>> {
            let tool_name = request.tools.first().map(|t| t.name.as_str()).unwrap_or("");
            let tool_calls = match tool_name {
                "select_similar_candidates" => vec![crate::client_wrapper::NativeToolCall {
                    id: "call-1".to_string(),
                    name: "select_similar_candidates".to_string(),
                    arguments: serde_json::json!({
                        "ranked_candidate_ids": ["inc-old-1"],
                        "selected_candidate_ids": ["inc-old-1"],
                    }),
                }],
                "confirm_similar_incident" => vec![crate::client_wrapper::NativeToolCall {
                    id: "call-2".to_string(),
                    name: "confirm_similar_incident".to_string(),
                    arguments: serde_json::json!({
                        "is_similar": true,
                        "similarities": ["same failing dependency"],
                        "learnings": ["check the dependency health dashboard first"],
                    }),
                }],
                _ => Vec::new(),
            };
            Ok(StructuredReply { content: "".into(), tool_calls, usage: None, response_id: None })
        }

        fn model_name(&self) -> &str {
            "confirming"
        }
    }

    fn sample_candidate() -> SimilarIncidentCandidate {
        SimilarIncidentCandidate {
            id: "inc-old-1".to_string(),
            title: "checkout 500s".to_string(),
            description: "d".to_string(),
            severity: Severity::High,
            lifecycle: CandidateLifecycle::Completed {
                terminal_status: crate::incident::model::TerminalStatus::Resolved,
                resolved_at: Utc::now(),
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn confirmed_match_emits_discovered_then_similar_with_matching_run_id() {
        let dir = tempdir().unwrap();
        let log = IncidentEventLog::open(&dir.path().to_path_buf(), "inc-ctx-2").unwrap();
        let incident = Incident {
            id: "inc-ctx-2".to_string(),
            created_at: Utc::now(),
            status: Status::Open,
            severity: Severity::Medium,
            title: "t".to_string(),
            description: "d".to_string(),
            prompt: "p".to_string(),
            assignee: None,
            source: "manual".to_string(),
        };
        let incident_handle = IncidentHandle::spawn(
            incident,
            log,
            Arc::new(ConfirmingClient),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );
        let context_handle = ContextAgentHandle::spawn(
            incident_handle.clone(),
            Arc::new(candidates::StaticCandidateSource { candidates: vec![sample_candidate()] }),
            Arc::new(ConfirmingClient),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );
        context_handle
            .add_context(ContextBatch {
                to_event_id: 0,
                trigger: "similar_incidents".to_string(),
                requested_at: Utc::now(),
                appended_step_range: None,
            })
            .await
            .unwrap();

        let events = incident_handle.get_context().await.unwrap();
        let discovered = events.iter().find(|e| e.event_type == EventType::SimilarIncidentsDiscovered).unwrap();
        let similar = events.iter().find(|e| e.event_type == EventType::SimilarIncident).unwrap();
        assert!(discovered.id < similar.id);
        let run_id = discovered.event_data.get("run_id").and_then(|v| v.as_str()).unwrap();
        assert_eq!(similar.event_data.get("origin_run_id").and_then(|v| v.as_str()), Some(run_id));
        assert_eq!(similar.event_data.get("similar_incident_id").and_then(|v| v.as_str()), Some("inc-old-1"));
    }

    #[tokio::test]
    async fn add_prompt_reports_empty_freshness_before_any_context_added() {
        let dir = tempdir().unwrap();
        let log = IncidentEventLog::open(&dir.path().to_path_buf(), "inc-ctx-3").unwrap();
        let incident = Incident {
            id: "inc-ctx-3".to_string(),
            created_at: Utc::now(),
            status: Status::Open,
            severity: Severity::Medium,
            title: "t".to_string(),
            description: "d".to_string(),
            prompt: "p".to_string(),
            assignee: None,
            source: "manual".to_string(),
        };
        let incident_handle = IncidentHandle::spawn(
            incident,
            log,
            Arc::new(EchoClient),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );
        let context_handle = ContextAgentHandle::spawn(
            incident_handle,
            Arc::new(candidates::StaticCandidateSource { candidates: Vec::new() }),
            Arc::new(EchoClient),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );
        let answer = context_handle.add_prompt("what's going on?".to_string()).await.unwrap();
        assert_eq!(answer.freshness, Freshness::Empty);
    }
}
