//! Human-in-the-loop training runs
//!
//! The crew runs a fixed input several times. After each run a person rates
//! every task output in free text; the outputs and feedback are written to a
//! JSON training file.

use crate::executor::StageExecutor;
use crate::pipeline::{Pipeline, Stage};
use crate::request::{PipelineRequest, RunOptions};
use chrono::{DateTime, Utc};
use phoenix_error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Input used for every training iteration
pub const TRAINING_QUERY: &str = "How to center a div in CSS?";

/// Where feedback on a task output comes from
pub trait FeedbackSource {
    fn feedback(&mut self, iteration: usize, agent: &str, output: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedTask {
    pub stage: Stage,
    pub agent: String,
    pub output: String,
    pub human_feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingIteration {
    pub iteration: usize,
    pub execution_time_secs: f64,
    pub tasks: Vec<TrainedTask>,
}

/// Contents of a training file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingData {
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub iterations: Vec<TrainingIteration>,
}

impl TrainingData {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorKind::IoFailed, format!("Failed to read {}: {}", path.display(), e))
                .with_operation("training::load")
                .set_source(e)
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::serialization_failed(e.to_string())
                .with_operation("training::load")
                .set_source(e)
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::serialization_failed(e.to_string())
                .with_operation("training::save")
                .set_source(e)
        })?;
        std::fs::write(path, content).map_err(|e| {
            Error::new(ErrorKind::IoFailed, format!("Failed to write {}: {}", path.display(), e))
                .with_operation("training::save")
                .set_source(e)
        })
    }
}

/// Run `n_iterations` training rounds and write the results to `filename`.
///
/// The file is rewritten after every iteration, so feedback given before a
/// failure is kept.
pub async fn train<E: StageExecutor>(
    pipeline: &Pipeline<E>,
    n_iterations: usize,
    filename: &Path,
    feedback: &mut impl FeedbackSource,
) -> Result<TrainingData> {
    if n_iterations == 0 {
        return Err(Error::invalid_argument("n_iterations must be at least 1")
            .with_operation("training::train"));
    }
    if filename.as_os_str().is_empty() {
        return Err(Error::invalid_argument("training filename is empty")
            .with_operation("training::train"));
    }

    let request = PipelineRequest::new(TRAINING_QUERY, None)?;
    let options = RunOptions::default();
    let mut data = TrainingData {
        query: TRAINING_QUERY.to_string(),
        created_at: Utc::now(),
        iterations: Vec::with_capacity(n_iterations),
    };

    for iteration in 1..=n_iterations {
        tracing::info!(iteration, n_iterations, "Training iteration");
        let result = pipeline
            .run(&request, &options, &CancellationToken::new())
            .await
            .map_err(|e| e.with_context("iteration", iteration.to_string()))?;

        let mut tasks = Vec::with_capacity(result.tasks.len());
        for task in result.tasks {
            let human_feedback = feedback.feedback(iteration, &task.agent, &task.output)?;
            tasks.push(TrainedTask {
                stage: task.stage,
                agent: task.agent,
                output: task.output,
                human_feedback,
            });
        }

        data.iterations.push(TrainingIteration {
            iteration,
            execution_time_secs: result.execution_time.as_secs_f64(),
            tasks,
        });
        data.save(filename)?;
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StagePrompt;
    use crate::output::TaskOutput;
    use crate::role::ToolCapability;
    use std::time::Duration;

    struct EchoExecutor;

    impl StageExecutor for EchoExecutor {
        async fn execute(
            &self,
            prompt: StagePrompt,
            _tools: &[ToolCapability],
            _options: &RunOptions,
        ) -> Result<TaskOutput> {
            Ok(TaskOutput::Text(format!("{} answer", prompt.role.name)))
        }
    }

    struct ScriptedFeedback(Vec<String>);

    impl FeedbackSource for ScriptedFeedback {
        fn feedback(&mut self, iteration: usize, agent: &str, _output: &str) -> Result<String> {
            let note = format!("{}:{}", iteration, agent);
            self.0.push(note.clone());
            Ok(note)
        }
    }

    #[tokio::test]
    async fn test_training_writes_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.json");
        let pipeline = Pipeline::new(EchoExecutor, Duration::from_secs(5));
        let mut feedback = ScriptedFeedback(Vec::new());

        let data = train(&pipeline, 2, &path, &mut feedback).await.unwrap();

        assert_eq!(data.iterations.len(), 2);
        assert_eq!(feedback.0.len(), 4);
        assert_eq!(data.iterations[1].tasks[0].human_feedback, "2:Code Fixer");
        assert_eq!(data.iterations[1].tasks[1].output, "Code Verifier answer");

        let saved = TrainingData::load(&path).unwrap();
        assert_eq!(saved, data);
        assert_eq!(saved.query, TRAINING_QUERY);
    }

    #[tokio::test]
    async fn test_zero_iterations_rejected() {
        let pipeline = Pipeline::new(EchoExecutor, Duration::from_secs(5));
        let mut feedback = ScriptedFeedback(Vec::new());
        let err = train(&pipeline, 0, Path::new("out.json"), &mut feedback)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
