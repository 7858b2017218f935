//! # Phoenix Web
//!
//! HTTP dashboard for the code-fixing crew. Every browser session can have
//! one run in flight; completed fixes go into a history shared by all
//! sessions.

mod api;
mod error;

pub use api::{FixResponse, FixSubmission, StatusResponse};
pub use error::ApiError;

use axum::routing::{get, post};
use axum::Router;
use phoenix_crew::{
    AgentExecutor, Crew, ErrorKind, FixHistory, PhoenixConfig, Pipeline, Result, StageExecutor,
    TaskSpec,
};
use phoenix_llm::Provider;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state
pub struct AppState<E> {
    pub config: PhoenixConfig,
    /// `None` while the provider credential is missing
    pipeline: Option<Pipeline<E>>,
    agents: Vec<String>,
    pub history: FixHistory,
    /// Cancellation tokens of the runs in flight, keyed by session
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl<E: StageExecutor> AppState<E> {
    pub fn new(config: PhoenixConfig, pipeline: Option<Pipeline<E>>) -> Self {
        let agents = match &pipeline {
            Some(pipeline) => pipeline.agents(),
            None => vec![TaskSpec::fix().agent.name, TaskSpec::verify().agent.name],
        };
        Self {
            config,
            pipeline,
            agents,
            history: FixHistory::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn pipeline(&self) -> Option<&Pipeline<E>> {
        self.pipeline.as_ref()
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }
}

impl AppState<AgentExecutor<Provider>> {
    /// Build the production state.
    ///
    /// A missing credential leaves the dashboard up with fixing disabled;
    /// any other construction failure is returned.
    pub fn from_config(config: PhoenixConfig) -> Result<Self> {
        let pipeline = match Crew::from_config(&config) {
            Ok(crew) => Some(crew),
            Err(e) if e.kind() == ErrorKind::ConfigInvalid => {
                tracing::warn!("Fixing disabled: {}", e.message());
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Self::new(config, pipeline))
    }
}

/// Build the dashboard router
pub fn router<E: StageExecutor + 'static>(state: Arc<AppState<E>>) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/api/health", get(api::health))
        .route("/api/status", get(api::status::<E>))
        .route("/api/fix", post(api::fix::<E>))
        .route("/api/sessions/:id/cancel", post(api::cancel::<E>))
        .route("/api/history", get(api::history::<E>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
