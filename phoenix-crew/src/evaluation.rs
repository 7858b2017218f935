//! Crew evaluation
//!
//! Runs the crew several times and has a judge model score every task
//! output from 1 to 10 on completion, quality and overall performance.

use crate::config::PhoenixConfig;
use crate::executor::StageExecutor;
use crate::pipeline::{Pipeline, Stage, TaskRecord};
use crate::request::{PipelineRequest, RunOptions};
use crate::task::TaskSpec;
use phoenix_error::{Error, Result};
use phoenix_llm::{ChatMessage, CompletionRequest, LlmProvider, ProviderConfig, ProviderType};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Snippet the crew is evaluated on
pub const EVALUATION_CODE: &str = "def average(numbers)\n    return sum(numbers) / len(numbers)\n\nprint(average([]))";
pub const EVALUATION_BEHAVIOR: &str = "Print the average of a list of numbers, or 0 for an empty list";

/// Settings for the judge model named on the command line.
///
/// `eval_llm` is `model` or `provider/model` (e.g. `gemini/gemini-1.5-flash`).
/// A different provider than the configured one reads its own credential
/// through `lookup`.
pub fn judge_config(
    config: &PhoenixConfig,
    eval_llm: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ProviderConfig> {
    let eval_llm = eval_llm.trim();
    let (provider, model) = match eval_llm.split_once('/') {
        Some((prefix, model)) => match prefix.parse::<ProviderType>() {
            Ok(provider) => (provider, model),
            Err(_) => (config.provider, eval_llm),
        },
        None => (config.provider, eval_llm),
    };
    if model.is_empty() {
        return Err(Error::invalid_argument("eval_llm names no model").with_operation("evaluation::judge_config"));
    }

    let judge = if provider == config.provider {
        config.provider_config()?
    } else {
        let var = provider.api_key_var();
        let key = lookup(var)
            .filter(|k| !k.trim().is_empty() && k != provider.placeholder_key())
            .ok_or_else(|| {
                Error::config_invalid(var, format!("Please set a valid {} to use {} as judge", var, eval_llm))
                    .with_operation("evaluation::judge_config")
            })?;
        ProviderConfig::for_type(provider, key)
    };
    Ok(judge.with_model(model))
}

/// Scores task outputs with an LLM
pub struct Evaluator<P> {
    judge: P,
}

impl<P: LlmProvider> Evaluator<P> {
    pub fn new(judge: P) -> Self {
        Self { judge }
    }

    /// Score one task output, 1 to 10
    pub async fn score(&self, task: &TaskSpec, record: &TaskRecord) -> Result<f64> {
        let prompt = format!(
            "Based on the task description and the expected output, compare and evaluate the \
             performance of the agents in the crew based on the Task Output they have performed \
             using score from 1 to 10 evaluating on completion, quality, and overall performance.\n\n\
             task_description: {}\n\
             task_expected_output: {}\n\
             agent: {}\n\
             agent_goal: {}\n\
             Task Output: {}\n\n\
             Reply with JSON only, in the form {{\"quality\": <score>}}.",
            record.description, task.expected_output, task.agent.name, task.agent.goal, record.output
        );
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are an expert evaluator of AI agent output."),
            ChatMessage::user(prompt),
        ])
        .with_temperature(0.0);

        let response = self.judge.complete(request).await.map_err(|e| {
            e.into_error()
                .with_operation("evaluation::score")
                .with_stage(record.stage.as_str())
        })?;
        let text = response.content.unwrap_or_default();
        parse_score(&text).map_err(|e| e.with_stage(record.stage.as_str()))
    }
}

/// Pull a 1-10 score out of the judge's reply
pub fn parse_score(text: &str) -> Result<f64> {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let score = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value.get("quality").and_then(|q| q.as_f64()),
        Err(_) => trimmed
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .find_map(|word| word.parse::<f64>().ok()),
    };

    match score {
        Some(score) if (1.0..=10.0).contains(&score) => Ok(score),
        _ => Err(Error::malformed_output(format!("judge gave no 1-10 score: {}", text.trim()))
            .with_operation("evaluation::parse_score")),
    }
}

/// Scores of every run
#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    /// Per stage, one score per run
    pub scores: BTreeMap<Stage, Vec<f64>>,
    pub agents: HashMap<Stage, String>,
    pub execution_times: Vec<Duration>,
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

impl EvaluationReport {
    pub fn runs(&self) -> usize {
        self.execution_times.len()
    }

    pub fn task_average(&self, stage: Stage) -> Option<f64> {
        self.scores.get(&stage).and_then(|s| average(s))
    }

    /// Average over all tasks of one run
    pub fn run_average(&self, run: usize) -> Option<f64> {
        let values: Vec<f64> = self.scores.values().filter_map(|s| s.get(run).copied()).collect();
        average(&values)
    }

    pub fn crew_average(&self) -> Option<f64> {
        let values: Vec<f64> = (0..self.runs()).filter_map(|r| self.run_average(r)).collect();
        average(&values)
    }

    /// Score table with one column per run
    pub fn render_table(&self) -> String {
        let fmt = |v: Option<f64>| v.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "-".into());
        let mut out = String::new();
        let _ = writeln!(out, "Tasks Scores");
        let _ = writeln!(out, "(1-10 Higher is better)");

        let mut header = format!("{:<20}", "Tasks/Crew/Agents");
        for run in 1..=self.runs() {
            let _ = write!(header, " | {:>6}", format!("Run {}", run));
        }
        let _ = write!(header, " | {:>10} | {}", "Avg. Total", "Agents");
        let _ = writeln!(out, "{}", header);
        let _ = writeln!(out, "{}", "-".repeat(header.len()));

        for (index, (stage, scores)) in self.scores.iter().enumerate() {
            let mut row = format!("{:<20}", format!("Task {}", index + 1));
            for run in 0..self.runs() {
                let _ = write!(row, " | {:>6}", fmt(scores.get(run).copied()));
            }
            let agent = self.agents.get(stage).map(String::as_str).unwrap_or("");
            let _ = write!(row, " | {:>10} | {}", fmt(self.task_average(*stage)), agent);
            let _ = writeln!(out, "{}", row);
        }

        let mut crew = format!("{:<20}", "Crew");
        for run in 0..self.runs() {
            let _ = write!(crew, " | {:>6}", fmt(self.run_average(run)));
        }
        let _ = write!(crew, " | {:>10} |", fmt(self.crew_average()));
        let _ = writeln!(out, "{}", crew);

        let mut times = format!("{:<20}", "Execution Time (s)");
        for time in &self.execution_times {
            let _ = write!(times, " | {:>6}", format!("{:.0}", time.as_secs_f64()));
        }
        let _ = write!(times, " | {:>10} |", "");
        let _ = writeln!(out, "{}", times);
        out
    }
}

/// Run the crew `n_iterations` times and score each task output.
pub async fn evaluate<E: StageExecutor, P: LlmProvider>(
    pipeline: &Pipeline<E>,
    evaluator: &Evaluator<P>,
    n_iterations: usize,
) -> Result<EvaluationReport> {
    if n_iterations == 0 {
        return Err(Error::invalid_argument("n_iterations must be at least 1")
            .with_operation("evaluation::evaluate"));
    }

    let request = PipelineRequest::new(EVALUATION_CODE, Some(EVALUATION_BEHAVIOR.to_string()))?;
    let options = RunOptions::default();
    let mut report = EvaluationReport::default();

    for run in 1..=n_iterations {
        tracing::info!(run, n_iterations, "Evaluation run");
        let result = pipeline.run(&request, &options, &CancellationToken::new()).await?;
        for record in &result.tasks {
            let score = evaluator.score(pipeline.task(record.stage), record).await?;
            tracing::debug!(stage = %record.stage, score, "Scored task");
            report.scores.entry(record.stage).or_default().push(score);
            report.agents.insert(record.stage, record.agent.clone());
        }
        report.execution_times.push(result.execution_time);
    }

    Ok(report)
}
