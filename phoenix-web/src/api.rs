//! Route handlers

use crate::error::ApiError;
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse};
use axum::Json;
use phoenix_crew::{Error, FixRecord, PhoenixConfig, PipelineRequest, RunOptions, StageExecutor};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const DEFAULT_HISTORY_LIMIT: usize = 3;
const MAX_HISTORY_LIMIT: usize = 50;

/// Body of `POST /api/fix`
#[derive(Debug, Clone, Deserialize)]
pub struct FixSubmission {
    pub source_code: String,
    #[serde(default)]
    pub expected_behavior: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u8>,
    #[serde(default)]
    pub include_optimization: Option<bool>,
    #[serde(default)]
    pub verbose: Option<bool>,
    /// Runs without a session id never conflict
    #[serde(default)]
    pub session_id: Option<String>,
}

impl FixSubmission {
    fn options(&self) -> RunOptions {
        let defaults = RunOptions::default();
        RunOptions {
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            include_optimization: self
                .include_optimization
                .unwrap_or(defaults.include_optimization),
            verbose: self.verbose.unwrap_or(defaults.verbose),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FixResponse {
    pub raw_text: String,
    pub execution_time_secs: f64,
    pub lines_analyzed: usize,
    pub agents_used: usize,
    pub timestamp: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub api_key_configured: bool,
    pub provider: String,
    pub model: String,
    pub agents: Vec<String>,
    pub fixes_completed: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    /// Newest first
    fixes: Vec<FixRecord>,
    total: usize,
}

type Runs = HashMap<String, CancellationToken>;

/// Removes the session's entry from the in-flight map when the run ends,
/// including when the client goes away and the handler is dropped.
struct InFlight<'a> {
    runs: &'a Mutex<Runs>,
    session_id: String,
    token: CancellationToken,
}

impl<'a> InFlight<'a> {
    fn register(
        runs: &'a Mutex<Runs>,
        session_id: String,
    ) -> Result<Self, ApiError> {
        let mut map = lock(runs);
        if map.contains_key(&session_id) {
            return Err(ApiError::conflict(&session_id));
        }
        let token = CancellationToken::new();
        map.insert(session_id.clone(), token.clone());
        Ok(Self {
            runs,
            session_id,
            token,
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.runs).remove(&self.session_id);
    }
}

fn lock(runs: &Mutex<Runs>) -> MutexGuard<'_, Runs> {
    runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Why fixing is disabled
fn unavailable(config: &PhoenixConfig) -> Error {
    config.provider_config().err().unwrap_or_else(|| {
        Error::config_invalid(config.provider.api_key_var(), "the crew is not configured")
    })
}

pub(crate) async fn index() -> impl IntoResponse {
    Html(include_str!("../assets/index.html"))
}

pub(crate) async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn status<E: StageExecutor>(
    State(state): State<Arc<AppState<E>>>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        api_key_configured: state.config.api_key_configured(),
        provider: state.config.provider.as_str().to_string(),
        model: state.config.model_name(),
        agents: state.agents().to_vec(),
        fixes_completed: state.history.len().await,
    })
}

/// Run the crew on submitted code
pub(crate) async fn fix<E: StageExecutor>(
    State(state): State<Arc<AppState<E>>>,
    body: Result<Json<FixSubmission>, JsonRejection>,
) -> Result<Json<FixResponse>, ApiError> {
    let Json(submission) = body?;
    let pipeline = state
        .pipeline()
        .ok_or_else(|| unavailable(&state.config).with_operation("web::fix"))?;

    let options = submission.options();
    options.validate()?;
    let request = PipelineRequest::new(submission.source_code, submission.expected_behavior)?;

    let session_id = submission
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let run = InFlight::register(&state.in_flight, session_id)?;

    tracing::info!(
        session = %run.session_id,
        lines = request.lines_analyzed(),
        "Fix submitted"
    );
    let result = pipeline.run(&request, &options, &run.token).await?;

    let record = FixRecord::new(
        request.source_code(),
        result.raw_text.clone(),
        result.execution_time,
    );
    let timestamp = record.formatted_timestamp();
    state.history.append(record).await;

    tracing::info!(
        session = %run.session_id,
        secs = result.execution_time.as_secs_f64(),
        "Fix completed"
    );
    Ok(Json(FixResponse {
        raw_text: result.raw_text,
        execution_time_secs: result.execution_time.as_secs_f64(),
        lines_analyzed: request.lines_analyzed(),
        agents_used: state.agents().len(),
        timestamp,
        session_id: run.session_id.clone(),
    }))
}

/// Fire the cancellation token of a session's run
pub(crate) async fn cancel<E: StageExecutor>(
    State(state): State<Arc<AppState<E>>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let token = lock(&state.in_flight).get(&session_id).cloned();
    match token {
        Some(token) => {
            token.cancel();
            tracing::info!(session = %session_id, "Run cancelled");
            Ok(Json(json!({ "session_id": session_id, "cancelled": true })))
        }
        None => Err(Error::not_found("session", session_id)
            .with_operation("web::cancel")
            .into()),
    }
}

pub(crate) async fn history<E: StageExecutor>(
    State(state): State<Arc<AppState<E>>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let mut fixes = state.history.recent(limit).await;
    fixes.reverse();
    Json(HistoryResponse {
        fixes,
        total: state.history.len().await,
    })
}
