//! LM-as-judge grading pass: an independent model call that scores whether a
//! scenario turn's applied suggestions were justified by the evidence,
//! reusing the same strict-tool-calling shape the Suggestion Engine uses
//! rather than parsing free-text grades.

use crate::client_wrapper::{
    ClientWrapper, Message, ReasoningEffort, Role, StructuredRequest, ToolChoice, ToolDefinition,
};
use crate::error::IncidentOpsError;
use crate::eval::runner::TurnRecord;

/// A judge's verdict on one turn.
#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    /// 0.0 (unjustified) to 1.0 (fully justified by the turn's evidence).
    pub score: f64,
    pub rationale: String,
}

fn grade_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: "grade_turn".to_string(),
        description: "Grade whether the actions taken this turn were justified by the evidence.".to_string(),
        parameters_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "rationale": {"type": "string"}
            },
            "required": ["score", "rationale"],
            "additionalProperties": false
        }),
    }
}

/// Ask the judge model to grade one scripted turn's outcome.
pub async fn judge_turn(
    client: &dyn ClientWrapper,
    turn_content: &str,
    turn: &TurnRecord,
) -> Result<JudgeVerdict, IncidentOpsError> {
    let actions = if turn.suggestions_applied.is_empty() {
        "no actions were taken".to_string()
    } else {
        format!("actions taken: {}", turn.suggestions_applied.join(", "))
    };

    let messages = vec![
        Message::new(
            Role::System,
            "You are grading an incident-response co-pilot's behavior on one turn. \
             Score 1.0 if the actions taken (or inaction) were clearly justified by the \
             message, 0.0 if clearly unjustified, and a value in between for ambiguous cases.",
        ),
        Message::new(Role::User, format!("Message: {}\n{}", turn_content, actions)),
    ];

    let request = StructuredRequest {
        messages,
        tools: vec![grade_tool_definition()],
        tool_choice: ToolChoice::Required,
        prompt_cache_key: None,
        reasoning_effort: Some(ReasoningEffort::Low),
    };

    let reply = client
        .send_structured(request)
        .await
        .map_err(IncidentOpsError::from)?;

    let call = reply
        .tool_calls
        .first()
        .ok_or_else(|| IncidentOpsError::ValidationFailed("judge returned no grade".to_string()))?;

    let score = call.arguments.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let rationale = call
        .arguments
        .get("rationale")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(JudgeVerdict { score, rationale })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::{NativeToolCall, StructuredReply};
    use async_trait::async_trait;
    use std::error::Error;

    struct FixedJudge;

    #[async_trait]
    impl ClientWrapper for FixedJudge {
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
                    id: "g1".to_string(),
                    name: "grade_turn".to_string(),
                    arguments: serde_json::json!({"score": 0.9, "rationale": "clear evidence"}),
                }],
                usage: None,
                response_id: None,
            })
        }

        fn model_name(&self) -> &str {
            "judge"
        }
    }

    #[tokio::test]
    async fn parses_score_and_rationale_from_tool_call() {
        let turn = TurnRecord {
            turn_index: 0,
            triggered: true,
            suggestions_applied: vec!["apply-status".to_string()],
            was_duplicate: false,
        };
        let verdict = judge_turn(&FixedJudge, "rolled back the deploy", &turn).await.unwrap();
        assert_eq!(verdict.score, 0.9);
        assert_eq!(verdict.rationale, "clear evidence");
    }
}
