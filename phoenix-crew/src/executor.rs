//! The seam between the pipeline and whatever actually does a stage's work

use crate::output::TaskOutput;
use crate::request::RunOptions;
use crate::role::{AgentRole, ToolCapability};
use phoenix_error::Result;
use std::future::Future;

/// Everything an executor needs to know about one stage
#[derive(Debug, Clone)]
pub struct StagePrompt {
    /// Who is doing the work
    pub role: AgentRole,
    /// Rendered task text, including the expected-output contract
    pub task: String,
}

impl StagePrompt {
    pub fn new(role: AgentRole, task: impl Into<String>) -> Self {
        Self {
            role,
            task: task.into(),
        }
    }
}

/// Runs a single stage to completion.
///
/// The production implementation is [`crate::AgentExecutor`]; tests script
/// their own.
pub trait StageExecutor: Send + Sync {
    fn execute(
        &self,
        prompt: StagePrompt,
        tools: &[ToolCapability],
        options: &RunOptions,
    ) -> impl Future<Output = Result<TaskOutput>> + Send;
}

impl<E: StageExecutor> StageExecutor for std::sync::Arc<E> {
    fn execute(
        &self,
        prompt: StagePrompt,
        tools: &[ToolCapability],
        options: &RunOptions,
    ) -> impl Future<Output = Result<TaskOutput>> + Send {
        (**self).execute(prompt, tools, options)
    }
}
