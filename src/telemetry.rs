//! Runtime event system.
//!
//! Provides a callback-based observability layer for the per-incident actor,
//! the Similar-Incidents Context Agent, and the Prompt Workflow. Implement
//! [`RuntimeEventHandler`] to receive notifications about:
//!
//! - **LM round-trips**: suggestion-engine and context-agent calls starting/completing
//! - **Tool operations**: tool call detection and execution outcomes
//! - **Event log**: events appended to an incident's append-only log
//! - **Prompt Workflow**: step transitions and retries
//!
//! # Architecture
//!
//! Events flow through a single [`RuntimeEventHandler`] trait with two methods:
//! - [`on_runtime_event`](RuntimeEventHandler::on_runtime_event) — per-incident actor and context-agent events
//! - [`on_workflow_event`](RuntimeEventHandler::on_workflow_event) — Prompt Workflow step events
//!
//! Both methods have default no-op implementations, so you only override what
//! you care about. The handler is wrapped in `Arc<dyn RuntimeEventHandler>` and
//! shared across the per-incident actor tasks described in SPEC_FULL.md §5.
//!
//! # Example
//!
//! ```rust,no_run
//! use incident_ops_core::telemetry::{RuntimeEvent, RuntimeEventHandler, WorkflowEvent};
//! use async_trait::async_trait;
//!
//! struct MyHandler;
//!
//! #[async_trait]
//! impl RuntimeEventHandler for MyHandler {
//!     async fn on_runtime_event(&self, event: &RuntimeEvent) {
//!         match event {
//!             RuntimeEvent::SuggestionCallStarted { incident_id, .. } => {
//!                 println!("incident {} requesting suggestions...", incident_id);
//!             }
//!             RuntimeEvent::SuggestionCallCompleted { incident_id, tool_calls_made, .. } => {
//!                 println!("incident {} suggested {} actions", incident_id, tool_calls_made);
//!             }
//!             _ => {}
//!         }
//!     }
//!     async fn on_workflow_event(&self, event: &WorkflowEvent) {
//!         println!("workflow: {:?}", event);
//!     }
//! }
//! ```

use crate::client_wrapper::TokenUsage;
use async_trait::async_trait;

/// Events emitted by a per-incident actor and its Similar-Incidents Context
/// Agent during their lifecycle.
///
/// Every variant carries `incident_id` so handlers can identify the source
/// incident without external state.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Fired at the start of a Suggestion Engine turn.
    SuggestionCallStarted {
        /// Stable identifier of the incident.
        incident_id: String,
        /// Number of events included in the call's context window.
        context_event_count: usize,
    },

    /// Fired when a Suggestion Engine turn returns successfully.
    SuggestionCallCompleted {
        /// Stable identifier of the incident.
        incident_id: String,
        /// Token usage for this call, or `None` if the provider did not report it.
        tokens_used: Option<TokenUsage>,
        /// Number of tool calls the model made in this turn.
        tool_calls_made: usize,
    },

    /// A Suggestion Engine turn failed and will be retried or abandoned.
    SuggestionCallFailed {
        /// Stable identifier of the incident.
        incident_id: String,
        /// The error message from the failed call.
        error: String,
    },

    /// A tool call was parsed from the Suggestion Engine's structured reply.
    ToolCallDetected {
        /// Stable identifier of the incident.
        incident_id: String,
        /// Name of the tool being invoked (e.g. `"update_status"`).
        tool_name: String,
        /// Raw JSON parameters supplied by the model.
        parameters: serde_json::Value,
    },

    /// A tool call finished executing against the incident actor's state.
    ToolExecutionCompleted {
        /// Stable identifier of the incident.
        incident_id: String,
        /// Name of the tool that was executed.
        tool_name: String,
        /// `true` if the tool call applied without error.
        success: bool,
        /// Error message if the tool call failed, `None` on success.
        error: Option<String>,
    },

    /// An event was appended to the incident's event log.
    EventAppended {
        /// Stable identifier of the incident.
        incident_id: String,
        /// Name of the event type that was appended (e.g. `"STATUS_UPDATE"`).
        event_type: String,
        /// Position of the appended event in the log.
        sequence: u64,
    },

    /// A duplicate context/insight event was suppressed by dedupe-key matching.
    EventDeduped {
        /// Stable identifier of the incident.
        incident_id: String,
        /// Dedupe key that matched an existing event.
        dedupe_key: String,
    },

    /// The Similar-Incidents Context Agent began investigating a batch of candidates.
    ContextInvestigationStarted {
        /// Stable identifier of the incident.
        incident_id: String,
        /// Number of similar-incident candidates under investigation.
        candidate_count: usize,
    },

    /// The Similar-Incidents Context Agent completed its investigation and
    /// posted context back onto the incident.
    ContextInvestigationCompleted {
        /// Stable identifier of the incident.
        incident_id: String,
        /// Number of candidates that produced a posted context event.
        contexts_posted: usize,
    },
}

/// Events emitted by the Prompt Workflow during a single checkpointed run.
///
/// These provide coarse-grained progress visibility into the step pipeline,
/// while [`RuntimeEvent`]s provide fine-grained visibility into the
/// individual LM calls and tool executions each step may trigger.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// The workflow run has started.
    RunStarted {
        /// Stable identifier of the incident this run is acting on.
        incident_id: String,
        /// Identifier correlating all steps of a single run.
        run_id: String,
    },

    /// A single step began execution.
    StepStarted {
        /// Correlating run identifier.
        run_id: String,
        /// Name of the step (e.g. `"fetch"`, `"apply_status"`, `"respond"`).
        step_name: String,
        /// 1-based attempt number for this step.
        attempt: usize,
    },

    /// A single step completed successfully.
    StepCompleted {
        /// Correlating run identifier.
        run_id: String,
        /// Name of the step that completed.
        step_name: String,
    },

    /// A step failed and will be retried after a backoff delay.
    StepRetrying {
        /// Correlating run identifier.
        run_id: String,
        /// Name of the step that failed.
        step_name: String,
        /// The error message from the failed attempt.
        error: String,
        /// 1-based attempt number that failed.
        attempt: usize,
        /// Backoff delay, in milliseconds, before the next attempt.
        backoff_ms: u64,
    },

    /// A step exhausted its retry budget and the run is abandoning it.
    StepAbandoned {
        /// Correlating run identifier.
        run_id: String,
        /// Name of the step that was abandoned.
        step_name: String,
        /// The error message from the final attempt.
        error: String,
    },

    /// The workflow run has completed (successfully or after abandoning a step).
    RunCompleted {
        /// Stable identifier of the incident this run acted on.
        incident_id: String,
        /// Correlating run identifier.
        run_id: String,
        /// `true` if every step completed without being abandoned.
        is_complete: bool,
    },
}

/// Trait for receiving runtime and workflow events.
///
/// Both methods have **default no-op implementations**, so you only need to
/// override the events you care about.
///
/// # Thread Safety
///
/// The `Send + Sync` bound allows the handler to be shared across the
/// per-incident actor tasks via `Arc<dyn RuntimeEventHandler>`.
#[async_trait]
pub trait RuntimeEventHandler: Send + Sync {
    /// Called when a per-incident actor or context agent emits an event.
    ///
    /// The default implementation is a no-op.
    async fn on_runtime_event(&self, _event: &RuntimeEvent) {}

    /// Called when the Prompt Workflow emits a step event.
    ///
    /// The default implementation is a no-op.
    async fn on_workflow_event(&self, _event: &WorkflowEvent) {}
}

/// Default handler that forwards every event to the `log` facade at an
/// appropriate level: failures and retries at `warn`, everything else at
/// `debug`.
pub struct LoggingRuntimeEventHandler;

#[async_trait]
impl RuntimeEventHandler for LoggingRuntimeEventHandler {
    async fn on_runtime_event(&self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::SuggestionCallFailed { incident_id, error } => {
                log::warn!("incident {}: suggestion call failed: {}", incident_id, error);
            }
            RuntimeEvent::ToolExecutionCompleted {
                incident_id,
                tool_name,
                success: false,
                error,
            } => {
                log::warn!(
                    "incident {}: tool {} failed: {}",
                    incident_id,
                    tool_name,
                    error.as_deref().unwrap_or("unknown error")
                );
            }
            other => {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("{:?}", other);
                }
            }
        }
    }

    async fn on_workflow_event(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::StepRetrying {
                run_id,
                step_name,
                error,
                attempt,
                backoff_ms,
            } => {
                log::warn!(
                    "run {}: step {} failed on attempt {} ({}), retrying in {}ms",
                    run_id,
                    step_name,
                    attempt,
                    error,
                    backoff_ms
                );
            }
            WorkflowEvent::StepAbandoned { run_id, step_name, error } => {
                log::warn!("run {}: step {} abandoned: {}", run_id, step_name, error);
            }
            other => {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("{:?}", other);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        runtime_events: AtomicUsize,
        workflow_events: AtomicUsize,
    }

    #[async_trait]
    impl RuntimeEventHandler for CountingHandler {
        async fn on_runtime_event(&self, _event: &RuntimeEvent) {
            self.runtime_events.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_workflow_event(&self, _event: &WorkflowEvent) {
            self.workflow_events.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dispatches_both_event_kinds() {
        let handler: Arc<dyn RuntimeEventHandler> = Arc::new(CountingHandler {
            runtime_events: AtomicUsize::new(0),
            workflow_events: AtomicUsize::new(0),
        });

        handler
            .on_runtime_event(&RuntimeEvent::EventDeduped {
                incident_id: "inc-1".to_string(),
                dedupe_key: "ctx:abc".to_string(),
            })
            .await;
        handler
            .on_workflow_event(&WorkflowEvent::RunStarted {
                incident_id: "inc-1".to_string(),
                run_id: "run-1".to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn logging_handler_does_not_panic_on_any_variant() {
        let handler = LoggingRuntimeEventHandler;
        handler
            .on_runtime_event(&RuntimeEvent::SuggestionCallFailed {
                incident_id: "inc-1".to_string(),
                error: "timeout".to_string(),
            })
            .await;
        handler
            .on_workflow_event(&WorkflowEvent::StepAbandoned {
                run_id: "run-1".to_string(),
                step_name: "fetch".to_string(),
                error: "exhausted retries".to_string(),
            })
            .await;
    }
}
