//! Shared utilities used by provider client implementations.
//!
//! These helpers isolate wire-format details (OpenAI-compatible Chat
//! Completions and Responses APIs) from the domain logic in
//! [`crate::incident`], [`crate::context_agent`], and [`crate::workflow`],
//! which only ever see [`crate::client_wrapper::Message`] and
//! [`crate::client_wrapper::NativeToolCall`].

use crate::client_wrapper::{
    Message, NativeToolCall, ReasoningEffort, Role, TokenUsage, ToolChoice, ToolDefinition,
};
use lazy_static::lazy_static;
use std::error::Error;
use std::time::Duration;
use tokio::sync::Mutex;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// A single client instance keeps TLS sessions and DNS lookups warm,
    /// which matters when many incidents are running suggestion turns
    /// concurrently.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

fn wire_role(role: &Role) -> serde_json::Value {
    match role {
        Role::System => serde_json::json!("system"),
        Role::User => serde_json::json!("user"),
        Role::Assistant => serde_json::json!("assistant"),
        Role::Tool { .. } => serde_json::json!("tool"),
    }
}

fn wire_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| match &msg.role {
            Role::Tool { call_id } => serde_json::json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": msg.content.as_ref(),
            }),
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let tool_calls: Vec<serde_json::Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": serde_json::to_string(&tc.arguments)
                                    .unwrap_or_else(|_| "{}".to_string()),
                            }
                        })
                    })
                    .collect();
                serde_json::json!({
                    "role": "assistant",
                    "content": serde_json::Value::Null,
                    "tool_calls": tool_calls,
                })
            }
            role => serde_json::json!({
                "role": wire_role(role),
                "content": msg.content.as_ref(),
            }),
        })
        .collect()
}

/// Call the OpenAI-compatible Chat Completions endpoint with plain messages
/// and no tool schema. Used for the context agent's narrative calls
/// (summarization, constrained Q&A) which never need function-calling.
pub async fn send_chat_completion(
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[Message],
    http_client: &reqwest::Client,
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<Message, Box<dyn Error>> {
    let body = serde_json::json!({
        "model": model,
        "messages": wire_messages(messages),
    });

    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let resp = http_client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        if log::log_enabled!(log::Level::Error) {
            log::error!("send_chat_completion: HTTP {} from {}: {}", status, url, text);
        }
        return Err(format!("send_chat_completion: HTTP {} — {}", status, text).into());
    }

    let parsed: serde_json::Value = serde_json::from_str(&text)?;
    if let Some(usage) = extract_usage(&parsed) {
        *usage_slot.lock().await = Some(usage);
    }

    let content = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    Ok(Message::new(Role::Assistant, content))
}

/// Call the Responses-style endpoint (`/v1/responses`) with native tool
/// definitions, a tool choice, a prompt cache key, and a reasoning-effort
/// hint. This is the call shape every strict-schema tool call in this crate
/// goes through: the Suggestion Engine's four tools, the context agent's
/// `investigate_incident` and deep-dive tools, and the evaluation harness's
/// `grade_turn` judge tool.
///
/// Compatible with OpenAI and any OpenAI-compatible provider exposing the
/// same Responses surface.
#[allow(clippy::too_many_arguments)]
pub async fn send_responses_request(
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[Message],
    tools: &[ToolDefinition],
    tool_choice: ToolChoice,
    prompt_cache_key: Option<&str>,
    reasoning_effort: Option<ReasoningEffort>,
    http_client: &reqwest::Client,
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<ResponsesReply, Box<dyn Error>> {
    let wire_tools: Vec<serde_json::Value> = tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters_schema,
                "strict": true,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "input": wire_messages(messages),
        "tools": wire_tools,
        "tool_choice": match tool_choice {
            ToolChoice::Auto => "auto",
            ToolChoice::Required => "required",
        },
    });

    if let Some(key) = prompt_cache_key {
        body["prompt_cache_key"] = serde_json::json!(key);
    }
    if let Some(effort) = reasoning_effort {
        body["reasoning"] = serde_json::json!({ "effort": effort.to_string() });
    }

    let url = format!("{}/responses", base_url.trim_end_matches('/'));
    let resp = http_client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        if log::log_enabled!(log::Level::Error) {
            log::error!("send_responses_request: HTTP {} from {}: {}", status, url, text);
        }
        return Err(format!("send_responses_request: HTTP {} — {}", status, text).into());
    }

    let parsed: serde_json::Value = serde_json::from_str(&text)?;
    if let Some(usage) = extract_usage(&parsed) {
        *usage_slot.lock().await = Some(usage);
    }

    let response_id = parsed
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let output = parsed
        .get("output")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for item in &output {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("function_call") => {
                let id = item
                    .get("call_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let name = item
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let args_str = item.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
                let arguments: serde_json::Value =
                    serde_json::from_str(args_str).unwrap_or_else(|_| serde_json::json!({}));
                tool_calls.push(NativeToolCall { id, name, arguments });
            }
            Some("message") => {
                if let Some(parts) = item.get("content").and_then(|c| c.as_array()) {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                            content.push_str(text);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(ResponsesReply {
        content,
        tool_calls,
        response_id,
    })
}

fn extract_usage(parsed: &serde_json::Value) -> Option<TokenUsage> {
    let usage = parsed.get("usage")?;
    let input = usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    let output = usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
    let cached = usage
        .get("input_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    Some(TokenUsage {
        input_tokens: input,
        output_tokens: output,
        cached_tokens: cached,
        total_tokens: input + output,
    })
}

/// Parsed result of a Responses-style call, before the caller packages it
/// into [`crate::client_wrapper::StructuredReply`].
pub struct ResponsesReply {
    pub content: String,
    pub tool_calls: Vec<NativeToolCall>,
    pub response_id: Option<String>,
}
