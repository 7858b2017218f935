//! Agent implementation - drives the LLM <-> code interpreter loop for one stage

use crate::executor::{StageExecutor, StagePrompt};
use crate::output::TaskOutput;
use crate::request::RunOptions;
use crate::role::{AgentRole, ToolCapability};
use crate::sandbox::CodeInterpreter;
use phoenix_error::{Error, ErrorKind, Result};
use phoenix_llm::{
    ChatMessage, CompletionRequest, LlmProvider, ToolCall, ToolDefinition, UsageTracker,
};
use std::sync::Mutex;

/// Configuration for the agent
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// Model override; the provider default is used otherwise
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

/// Production stage executor: an LLM playing the stage's role, allowed to
/// run code between turns.
pub struct AgentExecutor<P> {
    provider: P,
    interpreter: CodeInterpreter,
    config: AgentConfig,
    usage: Mutex<UsageTracker>,
}

impl<P: LlmProvider> AgentExecutor<P> {
    pub fn new(provider: P, interpreter: CodeInterpreter) -> Self {
        Self::with_config(provider, interpreter, AgentConfig::default())
    }

    pub fn with_config(provider: P, interpreter: CodeInterpreter, config: AgentConfig) -> Self {
        Self {
            provider,
            interpreter,
            config,
            usage: Mutex::new(UsageTracker::new()),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Token usage accumulated over every stage this executor ran
    pub fn usage(&self) -> UsageTracker {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }

    fn model(&self) -> String {
        self.config
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    fn tool_definitions(role: &AgentRole, tools: &[ToolCapability]) -> Vec<ToolDefinition> {
        tools
            .iter()
            .filter(|tool| role.can_use(**tool))
            .map(|tool| match tool {
                ToolCapability::CodeExecution => CodeInterpreter::tool_definition(),
            })
            .collect()
    }

    /// Run one requested tool call and produce the text fed back to the model.
    ///
    /// Problems the model can act on (bad arguments, a timed out snippet, a
    /// tool it may not use) come back as text. Only a sandbox that cannot
    /// start at all is an error.
    async fn run_tool(&self, role: &AgentRole, offered: &[ToolDefinition], call: &ToolCall) -> Result<String> {
        let capability = ToolCapability::from_tool_name(&call.name)
            .filter(|c| role.can_use(*c) && offered.iter().any(|t| t.name == call.name));

        let Some(capability) = capability else {
            tracing::warn!(agent = %role.name, tool = %call.name, "refusing tool call");
            return Ok(format!(
                "Error: tool '{}' is not available to {}. Answer without it.",
                call.name, role.name
            ));
        };

        let result = match capability {
            ToolCapability::CodeExecution => self.interpreter.invoke(call).await,
        };

        match result {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::ToolFailed => Err(e),
            Err(e) => {
                tracing::debug!(tool = %call.name, "tool error returned to model: {}", e);
                Ok(format!("Error: {}", e.message()))
            }
        }
    }

    fn track(&self, model: &str, usage: &phoenix_llm::Usage) {
        if let Ok(mut tracker) = self.usage.lock() {
            tracker.track(model, usage);
        }
    }
}

impl<P: LlmProvider> StageExecutor for AgentExecutor<P> {
    async fn execute(
        &self,
        prompt: StagePrompt,
        tools: &[ToolCapability],
        options: &RunOptions,
    ) -> Result<TaskOutput> {
        let StagePrompt { role, task } = prompt;
        let model = self.model();
        let offered = Self::tool_definitions(&role, tools);

        let mut messages = vec![
            ChatMessage::system(role.system_prompt()),
            ChatMessage::user(task),
        ];

        for turn in 1..=options.max_iterations {
            let mut request = CompletionRequest::new(messages.clone())
                .with_model(model.clone())
                .with_tools(offered.clone());
            request.temperature = self.config.temperature;
            request.max_tokens = self.config.max_tokens;

            if options.verbose {
                tracing::info!(agent = %role.name, turn, messages = messages.len(), "asking model");
            } else {
                tracing::debug!(agent = %role.name, turn, messages = messages.len(), "asking model");
            }

            let response = self.provider.complete(request).await.map_err(|e| {
                e.into_error()
                    .with_operation("agent::execute")
                    .with_context("agent", role.name.clone())
                    .with_context("turn", turn.to_string())
            })?;
            self.track(&response.model, &response.usage);

            if !response.wants_tools() {
                let content = response.content.filter(|c| !c.trim().is_empty()).ok_or_else(|| {
                    Error::malformed_output(format!("{} returned an empty final answer", role.name))
                        .with_operation("agent::execute")
                        .with_context("turn", turn.to_string())
                })?;
                return Ok(TaskOutput::Raw {
                    raw: content,
                    json: Some(serde_json::json!({
                        "agent": role.name,
                        "model": response.model,
                        "turns": turn,
                        "total_tokens": response.usage.total_tokens,
                    })),
                });
            }

            if turn == options.max_iterations {
                break;
            }

            let calls = response.tool_calls;
            messages.push(ChatMessage::assistant_tool_calls(response.content, calls.clone()));
            for call in &calls {
                if options.verbose {
                    tracing::info!(agent = %role.name, tool = %call.name, "running tool");
                }
                let text = self.run_tool(&role, &offered, call).await.map_err(|e| {
                    e.with_operation("agent::execute").with_context("agent", role.name.clone())
                })?;
                messages.push(ChatMessage::tool_result(call, text));
            }
        }

        Err(Error::new(
            ErrorKind::StageFailed,
            format!(
                "{} still wanted tools after {} turns: iteration limit reached",
                role.name, options.max_iterations
            ),
        )
        .with_operation("agent::execute")
        .with_context("max_iterations", options.max_iterations.to_string()))
    }
}
