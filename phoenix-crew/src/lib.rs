//! # Phoenix Crew
//!
//! Two agents fix submitted code in a fixed order:
//! 1. The Code Fixer runs the code in a sandbox, reads the errors and repairs it
//! 2. The Code Verifier reviews the fix and returns the final version
//!
//! The [`Pipeline`] controller runs the stages, [`AgentExecutor`] drives the
//! LLM for one stage, and [`CodeInterpreter`] is the only tool the agents get.

mod agent;
pub mod config;
pub mod evaluation;
mod executor;
pub mod history;
mod output;
pub mod pipeline;
mod request;
mod role;
pub mod sandbox;
pub mod store;
mod task;
pub mod training;

pub use agent::{AgentConfig, AgentExecutor};
pub use config::PhoenixConfig;
pub use evaluation::{EvaluationReport, Evaluator};
pub use executor::{StageExecutor, StagePrompt};
pub use history::{FixHistory, FixRecord};
pub use output::TaskOutput;
pub use pipeline::{
    Crew, Pipeline, PipelineEvent, PipelineObserver, PipelineResult, PipelineState, Stage,
    TaskRecord,
};
pub use request::{PipelineRequest, RunOptions, MAX_ITERATIONS, MIN_ITERATIONS};
pub use role::{AgentRole, ToolCapability};
pub use sandbox::{CodeInterpreter, ExecutionReport, SandboxConfig, SandboxMode};
pub use store::{RunRecord, RunStore};
pub use task::TaskSpec;
pub use training::{FeedbackSource, TrainingData};

pub use phoenix_error::{Error, ErrorKind, Result};
