//! Pipeline controller
//!
//! Runs the Fix and Verify stages strictly in order:
//!
//! ```text
//! Start -> Fixing -> Verifying -> Done
//!   \________\___________\______-> Failed
//! ```
//!
//! Verify only starts once Fix produced normalized output. Every failure
//! aborts the run and carries the stage it happened in, readable through
//! [`Stage::of`]. Nothing is retried here.

use crate::agent::AgentExecutor;
use crate::config::PhoenixConfig;
use crate::executor::{StageExecutor, StagePrompt};
use crate::request::{PipelineRequest, RunOptions};
use crate::role::ToolCapability;
use crate::sandbox::CodeInterpreter;
use crate::task::TaskSpec;
use phoenix_error::{Error, ErrorKind, Result};
use phoenix_llm::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fixing,
    Verifying,
}

impl Stage {
    /// Execution order
    pub const ALL: [Stage; 2] = [Stage::Fixing, Stage::Verifying];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fixing => "fixing",
            Stage::Verifying => "verifying",
        }
    }

    /// The stage an error was raised in, if it came out of a pipeline
    pub fn of(err: &Error) -> Option<Stage> {
        err.stage().and_then(|s| s.parse().ok())
    }

    fn state(&self) -> PipelineState {
        match self {
            Stage::Fixing => PipelineState::Fixing,
            Stage::Verifying => PipelineState::Verifying,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixing" => Ok(Stage::Fixing),
            "verifying" => Ok(Stage::Verifying),
            other => Err(Error::invalid_argument(format!("unknown stage '{}'", other))),
        }
    }
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    Fixing,
    Verifying,
    Done,
    Failed,
}

/// One completed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub stage: Stage,
    pub agent: String,
    pub description: String,
    pub output: String,
    pub duration: Duration,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Normalized output of the last stage
    pub raw_text: String,
    pub execution_time: Duration,
    pub tasks: Vec<TaskRecord>,
}

/// Stage lifecycle notifications
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    StageStarted(Stage),
    StageCompleted(Stage, Duration),
    StageFailed(Stage, &'a Error),
}

pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent<'_>);
}

/// The two-stage fix/verify crew
pub struct Pipeline<E> {
    executor: E,
    fix: TaskSpec,
    verify: TaskSpec,
    stage_timeout: Duration,
    observer: Option<Arc<dyn PipelineObserver>>,
}

/// The pipeline as wired for production
pub type Crew = Pipeline<AgentExecutor<Provider>>;

impl Crew {
    /// Build the production pipeline.
    ///
    /// # Errors
    ///
    /// `ConfigInvalid` for a missing or placeholder credential, before any
    /// provider is constructed.
    pub fn from_config(config: &PhoenixConfig) -> Result<Self> {
        let provider_config = config.provider_config()?;
        let provider = Provider::from_config(provider_config)
            .map_err(|e| e.into_error().with_operation("pipeline::from_config"))?;
        let executor = AgentExecutor::new(provider, CodeInterpreter::new(config.sandbox.clone()));
        Ok(Pipeline::new(executor, config.stage_timeout))
    }
}

impl<E: StageExecutor> Pipeline<E> {
    pub fn new(executor: E, stage_timeout: Duration) -> Self {
        Self {
            executor,
            fix: TaskSpec::fix(),
            verify: TaskSpec::verify(),
            stage_timeout,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn task(&self, stage: Stage) -> &TaskSpec {
        match stage {
            Stage::Fixing => &self.fix,
            Stage::Verifying => &self.verify,
        }
    }

    /// Agent names in execution order
    pub fn agents(&self) -> Vec<String> {
        Stage::ALL
            .iter()
            .map(|s| self.task(*s).agent.name.clone())
            .collect()
    }

    /// Inputs a request renders into
    pub fn inputs(request: &PipelineRequest, options: &RunOptions) -> HashMap<String, String> {
        HashMap::from([("context".to_string(), request.context(options))])
    }

    /// Run Fix then Verify for one request.
    pub async fn run(
        &self,
        request: &PipelineRequest,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult> {
        options.validate()?;
        let inputs = Self::inputs(request, options);
        tracing::info!(
            lines = request.lines_analyzed(),
            max_iterations = options.max_iterations,
            "Starting pipeline"
        );
        self.run_stages(Stage::Fixing, &inputs, None, options, cancel).await
    }

    /// Re-execute from `stage` onwards with the inputs of an earlier run.
    ///
    /// Replaying Verify feeds the stored Fix output in as upstream context.
    ///
    /// # Errors
    ///
    /// `NotFound` when replaying Verify and `previous` holds no Fix record.
    pub async fn replay_from(
        &self,
        stage: Stage,
        inputs: &HashMap<String, String>,
        previous: &[TaskRecord],
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult> {
        options.validate()?;
        let upstream = match stage {
            Stage::Fixing => None,
            Stage::Verifying => {
                let fix = previous
                    .iter()
                    .rev()
                    .find(|t| t.stage == Stage::Fixing)
                    .ok_or_else(|| {
                        Error::not_found("task", "fixing")
                            .with_operation("pipeline::replay_from")
                    })?;
                Some(fix.output.clone())
            }
        };
        tracing::info!(stage = %stage, "Replaying pipeline");
        self.run_stages(stage, inputs, upstream, options, cancel).await
    }

    async fn run_stages(
        &self,
        from: Stage,
        inputs: &HashMap<String, String>,
        mut upstream: Option<String>,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult> {
        let started = Instant::now();
        let mut state = PipelineState::Start;
        let mut tasks = Vec::new();

        for stage in Stage::ALL.into_iter().filter(|s| *s >= from) {
            self.transition(&mut state, stage.state());
            let outcome = self
                .run_stage(stage, inputs, upstream.as_deref(), options, cancel)
                .await;

            match outcome {
                Ok(record) => {
                    upstream = Some(record.output.clone());
                    tasks.push(record);
                }
                Err(e) => {
                    let e = e.with_stage(stage.as_str()).with_operation("pipeline::run");
                    self.transition(&mut state, PipelineState::Failed);
                    self.emit(PipelineEvent::StageFailed(stage, &e));
                    tracing::error!(stage = %stage, "Pipeline failed: {}", e);
                    return Err(e);
                }
            }
        }

        self.transition(&mut state, PipelineState::Done);
        let raw_text = upstream.ok_or_else(|| {
            Error::unexpected("pipeline finished without running a stage")
                .with_operation("pipeline::run")
        })?;
        let execution_time = started.elapsed();
        tracing::info!("Pipeline completed in {:.2}s", execution_time.as_secs_f64());

        Ok(PipelineResult {
            raw_text,
            execution_time,
            tasks,
        })
    }

    async fn run_stage(
        &self,
        stage: Stage,
        inputs: &HashMap<String, String>,
        upstream: Option<&str>,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<TaskRecord> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(stage.as_str()));
        }

        let task = self.task(stage);
        let mut description = task.describe(inputs)?;
        if let Some(previous) = upstream {
            description.push_str("\n\nThis is the context you're working with (from the previous task):\n");
            description.push_str(previous);
        }

        let tools: Vec<ToolCapability> = task.agent.allowed_tools.iter().copied().collect();
        let prompt = StagePrompt::new(task.agent.clone(), description.clone());

        self.emit(PipelineEvent::StageStarted(stage));
        if options.verbose {
            tracing::info!(stage = %stage, agent = %task.agent.name, "Stage started");
        } else {
            tracing::debug!(stage = %stage, agent = %task.agent.name, "Stage started");
        }

        let begun = Instant::now();
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::new(
                    ErrorKind::Cancelled,
                    format!("run cancelled during '{}'", stage),
                ));
            }
            result = tokio::time::timeout(
                self.stage_timeout,
                self.executor.execute(prompt, &tools, options),
            ) => match result {
                Ok(output) => output?,
                Err(_) => {
                    return Err(Error::stage_timeout(stage.as_str(), self.stage_timeout.as_secs()));
                }
            }
        };
        let output = output.normalize()?;
        let duration = begun.elapsed();

        self.emit(PipelineEvent::StageCompleted(stage, duration));
        tracing::info!(stage = %stage, "Stage completed in {:.2}s", duration.as_secs_f64());

        Ok(TaskRecord {
            task_id: Uuid::new_v4(),
            stage,
            agent: task.agent.name.clone(),
            description,
            output,
            duration,
        })
    }

    fn transition(&self, state: &mut PipelineState, to: PipelineState) {
        tracing::debug!("Pipeline state {:?} -> {:?}", state, to);
        *state = to;
    }

    fn emit(&self, event: PipelineEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::TaskOutput;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Step {
        Reply(TaskOutput),
        Fail(ErrorKind),
        Hang,
        /// Reply, then fire the token as the stage finishes
        ReplyAndCancel(TaskOutput, CancellationToken),
    }

    #[derive(Default)]
    struct FakeExecutor {
        steps: HashMap<String, Step>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeExecutor {
        fn with(mut self, agent: &str, step: Step) -> Self {
            self.steps.insert(agent.to_string(), step);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
        }

        fn description(&self, agent: &str) -> Option<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(a, _)| a == agent)
                .map(|(_, d)| d.clone())
        }
    }

    impl StageExecutor for FakeExecutor {
        async fn execute(
            &self,
            prompt: StagePrompt,
            _tools: &[ToolCapability],
            _options: &RunOptions,
        ) -> Result<TaskOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.role.name.clone(), prompt.task.clone()));
            match self.steps.get(&prompt.role.name).cloned() {
                Some(Step::Reply(output)) => Ok(output),
                Some(Step::Fail(kind)) => Err(Error::new(kind, "scripted failure")),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(TaskOutput::Text("too late".into()))
                }
                Some(Step::ReplyAndCancel(output, token)) => {
                    token.cancel();
                    Ok(output)
                }
                None => Err(Error::unexpected("no script for agent")),
            }
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl PipelineObserver for RecordingObserver {
        fn on_event(&self, event: &PipelineEvent<'_>) {
            let line = match event {
                PipelineEvent::StageStarted(s) => format!("started:{}", s),
                PipelineEvent::StageCompleted(s, _) => format!("completed:{}", s),
                PipelineEvent::StageFailed(s, e) => format!("failed:{}:{}", s, e.kind()),
            };
            self.events.lock().unwrap().push(line);
        }
    }

    fn request() -> PipelineRequest {
        PipelineRequest::new("print('hi'", Some("prints hi".into())).unwrap()
    }

    fn text(s: &str) -> Step {
        Step::Reply(TaskOutput::Text(s.into()))
    }

    fn pipeline(executor: FakeExecutor) -> Pipeline<FakeExecutor> {
        Pipeline::new(executor, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_fix_then_verify() {
        let observer = Arc::new(RecordingObserver::default());
        let executor = FakeExecutor::default()
            .with("Code Fixer", text("print('hi')"))
            .with("Code Verifier", text("print('hi')  # verified"));
        let pipeline = pipeline(executor).with_observer(observer.clone());

        let result = pipeline
            .run(&request(), &RunOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.raw_text, "print('hi')  # verified");
        assert_eq!(result.tasks.len(), 2);
        assert_eq!(result.tasks[0].stage, Stage::Fixing);
        assert_eq!(result.tasks[0].agent, "Code Fixer");
        assert_eq!(result.tasks[1].stage, Stage::Verifying);
        assert_ne!(result.tasks[0].task_id, result.tasks[1].task_id);

        let executor = pipeline.executor();
        assert_eq!(executor.calls(), vec!["Code Fixer", "Code Verifier"]);
        let fix = executor.description("Code Fixer").unwrap();
        assert!(fix.contains("USER'S CODE:\n```python\nprint('hi'\n```"));
        assert!(fix.contains("EXPECTED BEHAVIOR: prints hi"));
        let verify = executor.description("Code Verifier").unwrap();
        assert!(verify.ends_with("from the previous task):\nprint('hi')"));

        assert_eq!(
            *observer.events.lock().unwrap(),
            vec!["started:fixing", "completed:fixing", "started:verifying", "completed:verifying"]
        );
    }

    #[tokio::test]
    async fn test_verify_never_runs_after_fix_failure() {
        let observer = Arc::new(RecordingObserver::default());
        let executor = FakeExecutor::default()
            .with("Code Fixer", Step::Fail(ErrorKind::InferenceFailed))
            .with("Code Verifier", text("unreachable"));
        let pipeline = pipeline(executor).with_observer(observer.clone());

        let err = pipeline
            .run(&request(), &RunOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InferenceFailed);
        assert_eq!(Stage::of(&err), Some(Stage::Fixing));
        assert_eq!(pipeline.executor().calls(), vec!["Code Fixer"]);
        assert_eq!(
            observer.events.lock().unwrap().last().map(String::as_str),
            Some("failed:fixing:InferenceFailed")
        );
    }

    #[tokio::test]
    async fn test_malformed_verify_output() {
        let executor = FakeExecutor::default()
            .with("Code Fixer", text("fixed"))
            .with("Code Verifier", Step::Reply(TaskOutput::Json(serde_json::json!({"score": 3}))));

        let err = pipeline(executor)
            .run(&request(), &RunOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
        assert_eq!(Stage::of(&err), Some(Stage::Verifying));
    }

    #[tokio::test]
    async fn test_rich_outputs_are_normalized() {
        let executor = FakeExecutor::default()
            .with(
                "Code Fixer",
                Step::Reply(TaskOutput::Raw {
                    raw: "X".into(),
                    json: None,
                }),
            )
            .with("Code Verifier", Step::Reply(TaskOutput::Json(serde_json::json!({"raw": "Y"}))));

        let result = pipeline(executor)
            .run(&request(), &RunOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.tasks[0].output, "X");
        assert_eq!(result.raw_text, "Y");
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let executor = FakeExecutor::default()
            .with("Code Fixer", Step::Hang)
            .with("Code Verifier", text("unreachable"));
        let pipeline = Pipeline::new(executor, Duration::from_millis(50));

        let err = pipeline
            .run(&request(), &RunOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StageTimeout);
        assert_eq!(Stage::of(&err), Some(Stage::Fixing));
        assert_eq!(pipeline.executor().calls(), vec!["Code Fixer"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let executor = FakeExecutor::default().with("Code Fixer", text("fixed"));
        let pipeline = pipeline(executor);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline
            .run(&request(), &RunOptions::default(), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(Stage::of(&err), Some(Stage::Fixing));
        assert!(pipeline.executor().calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_stages_skips_verify() {
        let cancel = CancellationToken::new();
        let executor = FakeExecutor::default()
            .with(
                "Code Fixer",
                Step::ReplyAndCancel(TaskOutput::Text("fixed".into()), cancel.clone()),
            )
            .with("Code Verifier", text("unreachable"));
        let pipeline = pipeline(executor);

        let err = pipeline
            .run(&request(), &RunOptions::default(), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(Stage::of(&err), Some(Stage::Verifying));
        assert_eq!(pipeline.executor().calls(), vec!["Code Fixer"]);
    }

    #[tokio::test]
    async fn test_cancel_during_stage() {
        let executor = FakeExecutor::default().with("Code Fixer", Step::Hang);
        let pipeline = pipeline(executor);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = pipeline
            .run(&request(), &RunOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(Stage::of(&err), Some(Stage::Fixing));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_any_stage() {
        let executor = FakeExecutor::default().with("Code Fixer", text("fixed"));
        let pipeline = pipeline(executor);
        let options = RunOptions {
            max_iterations: 0,
            ..RunOptions::default()
        };

        let err = pipeline
            .run(&request(), &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(pipeline.executor().calls().is_empty());
    }

    #[tokio::test]
    async fn test_replay_verify_uses_stored_fix_output() {
        let first = FakeExecutor::default()
            .with("Code Fixer", text("stored fix"))
            .with("Code Verifier", text("first verify"));
        let opts = RunOptions::default();
        let inputs = Pipeline::<FakeExecutor>::inputs(&request(), &opts);
        let original = pipeline(first)
            .run(&request(), &opts, &CancellationToken::new())
            .await
            .unwrap();

        let second = FakeExecutor::default().with("Code Verifier", text("second verify"));
        let replayer = pipeline(second);
        let result = replayer
            .replay_from(Stage::Verifying, &inputs, &original.tasks, &opts, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.raw_text, "second verify");
        assert_eq!(result.tasks.len(), 1);
        assert_eq!(replayer.executor().calls(), vec!["Code Verifier"]);
        assert!(replayer
            .executor()
            .description("Code Verifier")
            .unwrap()
            .ends_with("stored fix"));
    }

    #[tokio::test]
    async fn test_replay_verify_without_fix_record() {
        let replayer = pipeline(FakeExecutor::default());
        let err = replayer
            .replay_from(
                Stage::Verifying,
                &HashMap::new(),
                &[],
                &RunOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_crew_requires_credentials() {
        let err = match Crew::from_config(&PhoenixConfig::default()) {
            Ok(_) => panic!("expected missing credential to fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!("verifying".parse::<Stage>().unwrap(), Stage::Verifying);
        assert!("done".parse::<Stage>().is_err());
        assert_eq!(Stage::of(&Error::unexpected("x")), None);
        let pipeline = pipeline(FakeExecutor::default());
        assert_eq!(pipeline.agents(), vec!["Code Fixer", "Code Verifier"]);
    }
}
