//! Core actor, suggestion engine, similar-incidents context agent, prompt
//! workflow, and evaluation harness for AI-assisted incident operations.

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod context_agent;
pub mod error;
pub mod eval;
pub mod incident;
pub mod telemetry;
pub mod tool_protocol;
pub mod workflow;

pub use client_wrapper::{ClientWrapper, Message, Role};
pub use config::IncidentOpsConfig;
pub use error::IncidentOpsError;
pub use incident::actor::IncidentHandle;
pub use incident::model::Incident;
