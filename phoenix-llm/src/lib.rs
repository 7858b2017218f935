//! # Phoenix LLM
//!
//! Provider layer for the phoenix agents.
//!
//! ## Core Concepts
//! - **ChatMessage**: system / user / assistant / tool turns of a conversation
//! - **ToolDefinition / ToolCall**: function calling, used by the fixer agent to run code
//! - **LlmProvider**: trait-based LLM communication (Gemini, OpenAI-compatible, Anthropic)
//! - **Provider**: runtime-selected provider built from a [`ProviderConfig`]

pub mod error;
pub mod provider;

pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use provider::{
    AnthropicProvider, ChatMessage, CompletionRequest, CompletionResponse, FinishReason,
    GeminiProvider, LlmProvider, OpenAIProvider, Provider, ProviderConfig, ProviderError,
    ProviderType, Role, ToolCall, ToolChoice, ToolDefinition, Usage, UsageTracker,
};
