//! OpenAI-compatible LM client.
//!
//! This is the reference [`ClientWrapper`] implementation used by every
//! component in this crate: the Suggestion Engine, the Similar-Incidents
//! Context Agent, the Prompt Workflow, and the Evaluation Harness's judge
//! pass. It talks to the Chat Completions endpoint for plain calls and the
//! Responses endpoint for strict tool-calling, matching the external
//! interface in SPEC_FULL.md §6.
//!
//! # Example
//!
//! ```rust,no_run
//! use incident_ops_core::client_wrapper::{ClientWrapper, Message, Role};
//! use incident_ops_core::clients::openai::{Model, OpenAIClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAIClient::new_with_model_enum(&key, Model::GPT5Mini);
//!     let resp = client
//!         .send_message(&[Message::new(Role::User, "Summarize the last hour.")])
//!         .await?;
//!     println!("{}", resp.content);
//!     Ok(())
//! }
//! ```

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client_wrapper::{ClientWrapper, Message, StructuredReply, StructuredRequest, TokenUsage};
use crate::clients::common::{get_shared_http_client, send_chat_completion, send_responses_request};

/// Model identifiers supported by OpenAI's Chat Completions / Responses APIs.
#[allow(non_camel_case_types)]
pub enum Model {
    /// `gpt-5.1` – flagship for coding and agentic tasks.
    GPT51,
    /// `gpt-5` – high-reasoning, medium latency.
    GPT5,
    /// `gpt-5-mini` – fast, balanced cost/quality; the default for suggestion turns.
    GPT5Mini,
    /// `gpt-5-nano` – lowest latency, used for cheap summarization calls.
    GPT5Nano,
    /// `gpt-4.1` – general availability GPT-4.1.
    GPT41,
    /// `gpt-4.1-mini` – reduced cost GPT-4.1 tier.
    GPT41Mini,
}

/// Convert a [`Model`] variant into the string identifier expected by the API.
pub fn model_to_string(model: Model) -> String {
    match model {
        Model::GPT51 => "gpt-5.1".to_string(),
        Model::GPT5 => "gpt-5".to_string(),
        Model::GPT5Mini => "gpt-5-mini".to_string(),
        Model::GPT5Nano => "gpt-5-nano".to_string(),
        Model::GPT41 => "gpt-4.1".to_string(),
        Model::GPT41Mini => "gpt-4.1-mini".to_string(),
    }
}

/// Client wrapper for OpenAI-compatible Chat Completions and Responses APIs.
pub struct OpenAIClient {
    model: String,
    api_key: String,
    base_url: String,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAIClient {
    /// Construct a client using the provided API key and [`Model`] variant.
    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new_with_model_string(secret_key, &model_to_string(model))
    }

    /// Construct a client using an explicit model name, for unofficial or
    /// self-hosted OpenAI-compatible deployments.
    pub fn new_with_model_string(secret_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(secret_key, model_name, "https://api.openai.com/v1")
    }

    /// Construct a client targeting a custom OpenAI-compatible base URL.
    /// `base_url` should not have a trailing slash.
    pub fn new_with_base_url(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAIClient {
            model: model_name.to_string(),
            api_key: secret_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token_usage: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    async fn send_message(&self, messages: &[Message]) -> Result<Message, Box<dyn Error>> {
        let result = send_chat_completion(
            &self.base_url,
            &self.api_key,
            &self.model,
            messages,
            get_shared_http_client(),
            &self.token_usage,
        )
        .await;

        if let Err(ref e) = result {
            if log::log_enabled!(log::Level::Error) {
                log::error!("OpenAIClient::send_message: {}", e);
            }
        }
        result
    }

    async fn send_structured(
        &self,
        request: StructuredRequest,
    ) -> Result<StructuredReply, Box<dyn Error>> {
        let reply = send_responses_request(
            &self.base_url,
            &self.api_key,
            &self.model,
            &request.messages,
            &request.tools,
            request.tool_choice,
            request.prompt_cache_key.as_deref(),
            request.reasoning_effort,
            get_shared_http_client(),
            &self.token_usage,
        )
        .await
        .map_err(|e| {
            if log::log_enabled!(log::Level::Error) {
                log::error!("OpenAIClient::send_structured: {}", e);
            }
            e
        })?;

        let usage = self.token_usage.lock().await.clone();
        Ok(StructuredReply {
            content: Arc::from(reply.content.as_str()),
            tool_calls: reply.tool_calls,
            usage,
            response_id: reply.response_id,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
