//! Turns one human prompt into at most one action, the way
//! [`suggestion_engine`](crate::incident::suggestion_engine) turns a passive
//! event tick into proposals — except this call is given a **prompt
//! toolset** distinct from the Suggestion Engine's, is always driven by
//! explicit human text, and the LM is asked to pick exactly one tool (or
//! none, in which case it replies in plain text instead).

use crate::client_wrapper::{
    ClientWrapper, Message, NativeToolCall, ReasoningEffort, Role, StructuredRequest, ToolChoice,
    ToolDefinition, TokenUsage,
};
use crate::error::IncidentOpsError;
use crate::incident::model::{Incident, Severity, ServiceRef, Status, SuggestedAffectionStatus};
use crate::incident::prompt_assembler::{build_incident_state_message, build_status_page_context_message};
use crate::incident::model::AffectionInfo;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are an incident response co-pilot taking a direct instruction from \
a human operator. Read the incident state and the operator's prompt, then follow any explicit \
instruction by calling exactly one tool. If the prompt asks a question or gives no actionable \
instruction, reply in plain text instead of calling a tool.";

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "update_status".to_string(),
            description: "Move the incident to a new lifecycle status, as instructed.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["mitigating", "resolved", "declined"]},
                    "message": {"type": "string", "description": "Human-readable rationale to show alongside the change."}
                },
                "required": ["status", "message"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "update_severity".to_string(),
            description: "Change the incident's severity, as instructed.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "severity": {"type": "string", "enum": ["low", "medium", "high"]}
                },
                "required": ["severity"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "add_status_page_update".to_string(),
            description: "Publish a new public status-page update, as instructed.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
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
                "required": ["message"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "prompt_similar_incidents".to_string(),
            description: "Ask the similar-incidents context agent the operator's question.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string"}
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        },
    ]
}

/// One action the prompt toolset can resolve to. At most one is ever
/// produced per call, matching the Prompt Workflow's "exactly one of"
/// branch point.
#[derive(Clone)]
pub enum PromptAction {
    UpdateStatus { status: Status, message: String },
    UpdateSeverity { severity: Severity },
    AddStatusPageUpdate {
        message: String,
        affection_status: Option<SuggestedAffectionStatus>,
        title: Option<String>,
        services: Vec<ServiceRef>,
    },
    SimilarIncidents { question: String },
}

/// Result of one `fetch` step: either a single action to apply, or plain
/// narrative text when the prompt had nothing actionable in it.
pub struct PromptOutcome {
    pub action: Option<PromptAction>,
    pub narrative: Option<String>,
    pub usage: Option<TokenUsage>,
}

fn build_messages(incident: &Incident, affection: &AffectionInfo, prompt_text: &str) -> Vec<Message> {
    vec![
        Message::new(Role::System, SYSTEM_PROMPT),
        Message::new(Role::User, build_incident_state_message(incident)),
        Message::new(Role::User, build_status_page_context_message(affection)),
        Message::new(Role::User, format!("## Operator prompt\n\n{}", prompt_text)),
    ]
}

pub async fn run_prompt_turn(
    client: &Arc<dyn ClientWrapper>,
    incident: &Incident,
    affection: &AffectionInfo,
    prompt_text: &str,
) -> Result<PromptOutcome, IncidentOpsError> {
    let messages = build_messages(incident, affection, prompt_text);

    let request = StructuredRequest {
        messages,
        tools: tool_definitions(),
        tool_choice: ToolChoice::Auto,
        prompt_cache_key: None,
        reasoning_effort: Some(ReasoningEffort::Medium),
    };

    let reply = client.send_structured(request).await.map_err(IncidentOpsError::from)?;

    let action = reply.tool_calls.first().and_then(|call| parse_tool_call(call).ok());

    Ok(PromptOutcome {
        action,
        narrative: if reply.content.is_empty() { None } else { Some(reply.content.to_string()) },
        usage: reply.usage,
    })
}

fn parse_tool_call(call: &NativeToolCall) -> Result<PromptAction, IncidentOpsError> {
    let args = &call.arguments;
    match call.name.as_str() {
        "update_status" => {
            let status = args
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(parse_status)
                .ok_or_else(|| IncidentOpsError::ValidationFailed("invalid status".to_string()))?;
            let message = args.get("message").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(PromptAction::UpdateStatus { status, message })
        }
        "update_severity" => {
            let severity = args
                .get("severity")
                .and_then(|v| v.as_str())
                .and_then(parse_severity)
                .ok_or_else(|| IncidentOpsError::ValidationFailed("invalid severity".to_string()))?;
            Ok(PromptAction::UpdateSeverity { severity })
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
            Ok(PromptAction::AddStatusPageUpdate { message, affection_status, title, services })
        }
        "prompt_similar_incidents" => {
            let question = args.get("question").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(PromptAction::SimilarIncidents { question })
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
        "partial" => crate::incident::model::ServiceImpact::Partial,
        "major" => crate::incident::model::ServiceImpact::Major,
        _ => return None,
    };
    Some(ServiceRef { id, impact })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::{StructuredReply};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::error::Error;

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
                content: "the rollback finished ten minutes ago".into(),
                tool_calls: Vec::new(),
                usage: None,
                response_id: None,
            })
        }

        fn model_name(&self) -> &str {
            "plain-text"
        }
    }

    fn sample_incident() -> Incident {
        Incident {
            id: "inc-prompt-1".to_string(),
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
    async fn explicit_status_instruction_resolves_to_update_status_action() {
        let client: Arc<dyn ClientWrapper> = Arc::new(ToolCallingClient {
            name: "update_status",
            arguments: serde_json::json!({ "status": "declined", "message": "false alarm" }),
        });
        let outcome = run_prompt_turn(&client, &sample_incident(), &AffectionInfo::default(), "mark this declined")
            .await
            .unwrap();
        match outcome.action {
            Some(PromptAction::UpdateStatus { status, .. }) => assert_eq!(status, Status::Declined),
            _ => panic!("expected an update_status action"),
        }
    }

    #[tokio::test]
    async fn similar_incidents_question_resolves_to_similar_incidents_action() {
        let client: Arc<dyn ClientWrapper> = Arc::new(ToolCallingClient {
            name: "prompt_similar_incidents",
            arguments: serde_json::json!({ "question": "has this happened before?" }),
        });
        let outcome = run_prompt_turn(
            &client,
            &sample_incident(),
            &AffectionInfo::default(),
            "has this happened before?",
        )
        .await
        .unwrap();
        match outcome.action {
            Some(PromptAction::SimilarIncidents { question }) => {
                assert_eq!(question, "has this happened before?")
            }
            _ => panic!("expected a similar-incidents action"),
        }
    }

    #[tokio::test]
    async fn non_actionable_prompt_yields_narrative_with_no_action() {
        let client: Arc<dyn ClientWrapper> = Arc::new(PlainTextClient);
        let outcome = run_prompt_turn(&client, &sample_incident(), &AffectionInfo::default(), "what happened?")
            .await
            .unwrap();
        assert!(outcome.action.is_none());
        assert_eq!(outcome.narrative.as_deref(), Some("the rollback finished ten minutes ago"));
    }
}
