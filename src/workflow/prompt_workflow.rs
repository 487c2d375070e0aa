//! The step-checkpointed workflow that turns one human prompt into exactly
//! one observable effect, grounded in the teacher's RALPH-style
//! orchestration loop: named steps, each retried with geometric backoff
//! before the whole run is abandoned.

use crate::config::IncidentOpsConfig;
use crate::context_agent::ContextAgentHandle;
use crate::error::IncidentOpsError;
use crate::incident::actor::IncidentHandle;
use crate::incident::event_log::Adapter;
use crate::incident::prompt_engine::PromptAction;
use crate::telemetry::{RuntimeEventHandler, WorkflowEvent};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// What the workflow accomplished on one pass over an incident.
#[derive(Debug, Default)]
pub struct WorkflowRunOutcome {
    pub run_id: String,
    /// Name of the action the workflow applied this run, if any
    /// (`"apply-status"`, `"apply-severity"`, `"apply-affection"`).
    pub applied: Option<String>,
    /// Whether the prompt was forwarded to the similar-incidents context agent.
    pub investigated_similar: bool,
    /// Whether the LM's plain-text reply was appended as a message.
    pub responded: bool,
    pub is_complete: bool,
}

async fn run_step_with_retry<F, Fut, T>(
    config: &IncidentOpsConfig,
    handler: &Arc<dyn RuntimeEventHandler>,
    run_id: &str,
    step_name: &str,
    mut f: F,
) -> Result<T, IncidentOpsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IncidentOpsError>>,
{
    let mut attempt = 0usize;
    let mut backoff = config.retry_backoff_min;
    loop {
        attempt += 1;
        handler
            .on_workflow_event(&WorkflowEvent::StepStarted {
                run_id: run_id.to_string(),
                step_name: step_name.to_string(),
                attempt,
            })
            .await;

        match f().await {
            Ok(value) => {
                handler
                    .on_workflow_event(&WorkflowEvent::StepCompleted {
                        run_id: run_id.to_string(),
                        step_name: step_name.to_string(),
                    })
                    .await;
                return Ok(value);
            }
            Err(err) if attempt < config.max_retry_attempts => {
                handler
                    .on_workflow_event(&WorkflowEvent::StepRetrying {
                        run_id: run_id.to_string(),
                        step_name: step_name.to_string(),
                        error: err.to_string(),
                        attempt,
                        backoff_ms: backoff.as_millis() as u64,
                    })
                    .await;
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.retry_backoff_max);
            }
            Err(err) => {
                handler
                    .on_workflow_event(&WorkflowEvent::StepAbandoned {
                        run_id: run_id.to_string(),
                        step_name: step_name.to_string(),
                        error: err.to_string(),
                    })
                    .await;
                return Err(err);
            }
        }
    }
}

/// Run the named steps once for `incident` against one human `prompt_text`:
/// fetch context, mark intent to act, run the prompt toolset against the
/// text, then apply exactly one of a state mutation, a forwarded similar-
/// incidents question, or a plain-text reply, and finally clear the intent
/// marker.
pub async fn run_prompt_workflow(
    incident: &IncidentHandle,
    context_agent: Option<&ContextAgentHandle>,
    prompt_text: String,
    config: &IncidentOpsConfig,
    handler: Arc<dyn RuntimeEventHandler>,
) -> Result<WorkflowRunOutcome, IncidentOpsError> {
    let run_id = Uuid::new_v4().to_string();
    handler
        .on_workflow_event(&WorkflowEvent::RunStarted {
            incident_id: incident.incident_id().to_string(),
            run_id: run_id.clone(),
        })
        .await;

    run_step_with_retry(config, &handler, &run_id, "context", || async {
        incident.get_context().await
    })
    .await?;

    run_step_with_retry(config, &handler, &run_id, "add-reaction", || async { Ok(()) }).await?;

    let outcome = run_step_with_retry(config, &handler, &run_id, "fetch", || {
        let prompt_text = prompt_text.clone();
        async move { incident.run_prompt_turn(prompt_text).await }
    })
    .await?;

    let mut result = WorkflowRunOutcome {
        run_id: run_id.clone(),
        ..Default::default()
    };

    match outcome.action {
        Some(action @ PromptAction::UpdateStatus { .. })
        | Some(action @ PromptAction::UpdateSeverity { .. })
        | Some(action @ PromptAction::AddStatusPageUpdate { .. }) => {
            let step_name = apply_step_name(&action);
            run_step_with_retry(config, &handler, &run_id, step_name, || {
                let action = action.clone();
                async { apply_action(incident, action).await }
            })
            .await?;
            result.applied = Some(step_name.to_string());
        }
        Some(PromptAction::SimilarIncidents { question }) => {
            if let Some(context_agent) = context_agent {
                let answer = run_step_with_retry(config, &handler, &run_id, "similar", || {
                    let question = question.clone();
                    async move { context_agent.add_prompt(question).await }
                })
                .await?;
                run_step_with_retry(config, &handler, &run_id, "similar-respond", || {
                    let answer = answer.answer.clone();
                    async { incident.add_message(answer, Adapter::Dashboard).await }
                })
                .await?;
                result.investigated_similar = true;
            }
        }
        None => {
            if let Some(narrative) = outcome.narrative {
                run_step_with_retry(config, &handler, &run_id, "respond", || {
                    let narrative = narrative.clone();
                    async { incident.add_message(narrative, Adapter::Dashboard).await }
                })
                .await?;
                result.responded = true;
            }
        }
    }

    run_step_with_retry(config, &handler, &run_id, "remove-reaction", || async { Ok(()) }).await?;

    result.is_complete = result.applied.is_some() || result.investigated_similar || result.responded;

    handler
        .on_workflow_event(&WorkflowEvent::RunCompleted {
            incident_id: incident.incident_id().to_string(),
            run_id: run_id.clone(),
            is_complete: result.is_complete,
        })
        .await;

    Ok(result)
}

fn apply_step_name(action: &PromptAction) -> &'static str {
    match action {
        PromptAction::UpdateStatus { .. } => "apply-status",
        PromptAction::UpdateSeverity { .. } => "apply-severity",
        PromptAction::AddStatusPageUpdate { .. } => "apply-affection",
        PromptAction::SimilarIncidents { .. } => "similar",
    }
}

async fn apply_action(incident: &IncidentHandle, action: PromptAction) -> Result<(), IncidentOpsError> {
    match action {
        PromptAction::UpdateStatus { status, message } => incident.update_status(status, message).await,
        PromptAction::UpdateSeverity { severity } => incident.set_severity(severity).await,
        PromptAction::AddStatusPageUpdate { message, affection_status, .. } => {
            let status = affection_status.unwrap_or(crate::incident::model::SuggestedAffectionStatus::Update);
            incident.update_affection(status, message).await
        }
        PromptAction::SimilarIncidents { .. } => unreachable!("similar-incidents is handled by its own branch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::{
        ClientWrapper, Message, NativeToolCall, StructuredReply, StructuredRequest,
    };
    use crate::incident::event_log::IncidentEventLog;
    use crate::incident::model::{Incident, Severity, Status};
    use crate::telemetry::LoggingRuntimeEventHandler;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::error::Error;
    use tempfile::tempdir;

    struct ToolCallingClient {
        name: &'static str,
        arguments: serde_json::Value,
    }

    #[async_trait]
    impl ClientWrapper for ToolCallingClient {
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
                    name: self.name.to_string(),
                    arguments: self.arguments.clone(),
                }],
                usage: None,
                response_id: None,
            })
        }

        fn model_name(&self) -> &str {
            "prompt-tool-caller"
        }
    }

    struct PlainTextClient;

    #[async_trait]
    impl ClientWrapper for PlainTextClient {
        async fn send_message(&self, _messages: &[Message]) -> Result<Message, Box<dyn Error>> {
            unimplemented!()
        }

        async fn send_structured(
            &self,
            _request: StructuredRequest,
        ) -> Result<StructuredReply, Box<dyn Error>> {
            Ok(StructuredReply {
                content: "already rolled back, no action needed".into(),
                tool_calls: Vec::new(),
                usage: None,
                response_id: None,
            })
        }

        fn model_name(&self) -> &str {
            "plain-text"
        }
    }

    fn sample_incident_record() -> Incident {
        Incident {
            id: "inc-wf-1".to_string(),
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
    async fn applies_explicit_status_instruction_and_completes() {
        let dir = tempdir().unwrap();
        let log = IncidentEventLog::open(&dir.path().to_path_buf(), "inc-wf-1").unwrap();
        let client = ToolCallingClient {
            name: "update_status",
            arguments: serde_json::json!({ "status": "mitigating", "message": "rolling back" }),
        };
        let handle = IncidentHandle::spawn(
            sample_incident_record(),
            log,
            Arc::new(client),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );

        let outcome = run_prompt_workflow(
            &handle,
            None,
            "mark this mitigating, we rolled back".to_string(),
            &IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        )
        .await
        .unwrap();

        assert_eq!(outcome.applied.as_deref(), Some("apply-status"));
        assert!(outcome.is_complete);
    }

    #[tokio::test]
    async fn non_actionable_prompt_is_answered_with_a_plain_reply() {
        let dir = tempdir().unwrap();
        let log = IncidentEventLog::open(&dir.path().to_path_buf(), "inc-wf-2").unwrap();
        let mut record = sample_incident_record();
        record.id = "inc-wf-2".to_string();
        let handle = IncidentHandle::spawn(
            record,
            log,
            Arc::new(PlainTextClient),
            IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        );

        let outcome = run_prompt_workflow(
            &handle,
            None,
            "did we already roll back?".to_string(),
            &IncidentOpsConfig::default(),
            Arc::new(LoggingRuntimeEventHandler),
        )
        .await
        .unwrap();

        assert!(outcome.applied.is_none());
        assert!(outcome.responded);
        assert!(outcome.is_complete);
    }
}
