//! Shared primitives for the provider-agnostic LM client.
//!
//! Every component that calls a language model — the Suggestion Engine, the
//! Similar-Incidents Context Agent, the Prompt Workflow, and the Evaluation
//! Harness's judge pass — goes through the [`ClientWrapper`] trait rather than
//! talking to a vendor SDK directly. This keeps provider wiring in one place
//! and lets tests substitute a fake client.
//!
//! # Two calling conventions
//!
//! [`ClientWrapper::send_message`] is the simple request/response shape used
//! for plain-text calls (context summarization, deep-dive narration).
//! [`ClientWrapper::send_structured`] is the Responses-style call (external
//! interfaces §6) used whenever the caller needs strict function-calling: a
//! `tools[]` array, a `tool_choice`, a `prompt_cache_key` for prefix reuse,
//! and a reasoning-effort hint. The default implementation of
//! `send_structured` reports the capability as unsupported so that providers
//! which only expose Chat Completions don't have to stub it out.

use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single tool call returned by the LM in a native function-calling response.
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Provider-assigned call id, used to correlate a later tool-result message.
    pub id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LM for this call.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema passed to the LM along with a request.
///
/// Built from [`crate::tool_protocol::ToolMetadata::to_tool_definition`].
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name as it will appear in the provider's `tools` array.
    pub name: String,
    /// Human-readable description surfaced to the LM to aid tool selection.
    pub description: String,
    /// Strict JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// Role of a single chat message.
#[derive(Debug, Clone)]
pub enum Role {
    /// A system-authored message priming or constraining assistant behaviour.
    System,
    /// A human or adapter-originated message.
    User,
    /// A model-authored message (including one carrying tool calls).
    Assistant,
    /// A tool-result message correlated with a prior [`NativeToolCall::id`].
    Tool { call_id: String },
}

/// Token accounting for a single LM call.
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    /// Prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Tokens served from the provider's prompt cache, if reported.
    pub cached_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

/// A single chat message.
#[derive(Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body. `Arc<str>` keeps turn histories cheap to clone —
    /// every turn of the Suggestion Engine rebuilds the full message list.
    pub content: Arc<str>,
    /// Native tool calls carried by an assistant message. Empty for every
    /// other role.
    pub tool_calls: Vec<NativeToolCall>,
}

impl Message {
    /// Construct a plain message with no tool calls.
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Message {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// How firmly the caller wants the LM to invoke a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model may reply in plain text or call zero or more tools.
    Auto,
    /// The model must call at least one of the supplied tools.
    Required,
}

/// Reasoning-effort hint forwarded to providers that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// A Responses-style structured request: messages plus a strict tool schema.
pub struct StructuredRequest {
    /// Full message list, already in the fixed order the caller requires.
    pub messages: Vec<Message>,
    /// Strict JSON-Schema tool definitions offered to the model.
    pub tools: Vec<ToolDefinition>,
    /// Whether a tool call is mandatory.
    pub tool_choice: ToolChoice,
    /// Prefix-cache key; stable across turns that share a message prefix.
    pub prompt_cache_key: Option<String>,
    /// Reasoning-effort hint, when the provider exposes one.
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// Result of a [`ClientWrapper::send_structured`] call.
pub struct StructuredReply {
    /// Any plain-text narrative the model produced alongside tool calls.
    pub content: Arc<str>,
    /// Zero or more native tool calls the model selected.
    pub tool_calls: Vec<NativeToolCall>,
    /// Usage reported by the provider for this call, if any.
    pub usage: Option<TokenUsage>,
    /// Provider-assigned response id, logged for traceability.
    pub response_id: Option<String>,
}

/// Trait-driven abstraction for a concrete LM provider.
///
/// Implementations must be thread-safe (`Send + Sync`) so they can be shared
/// across the per-incident actor tasks described in SPEC_FULL.md §5.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a plain request/response call with no tool schema.
    async fn send_message(&self, messages: &[Message]) -> Result<Message, Box<dyn Error>>;

    /// Send a Responses-style structured call with a strict tool schema.
    ///
    /// Providers that only support Chat Completions can inherit the default,
    /// which reports the capability as unsupported rather than panicking.
    async fn send_structured(
        &self,
        _request: StructuredRequest,
    ) -> Result<StructuredReply, Box<dyn Error>> {
        Err("this provider does not support structured tool-calling requests".into())
    }

    /// Identifier used to select the upstream model (e.g. `"gpt-5-mini"`).
    fn model_name(&self) -> &str;

    /// Retrieve usage from the most recent call, if the provider tracks it.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Expose a shared mutable slot where the implementation persists usage.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
