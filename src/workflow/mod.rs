pub mod prompt_workflow;

pub use prompt_workflow::{run_prompt_workflow, WorkflowRunOutcome};
