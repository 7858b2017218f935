//! # Phoenix CLI
//!
//! Command-line interface for the code-fixing crew.
//!
//! Usage:
//!   phoenix                                  (interactive run, code on stdin)
//!   phoenix run [--file <path>] [--expected <text>]
//!   phoenix train <n_iterations> <filename>
//!   phoenix replay <task_id>
//!   phoenix test <n_iterations> <eval_llm>
//!
//! Examples:
//!   echo "print('hi'" | phoenix
//!   phoenix run --file broken.py --expected "prints the sum"
//!   phoenix replay 3f2a9c1e
//!   phoenix test 3 gemini/gemini-1.5-pro

use clap::error::ErrorKind as ClapErrorKind;
use clap::{Parser, Subcommand};
use phoenix_crew::evaluation::{self, Evaluator};
use phoenix_crew::training::{self, FeedbackSource};
use phoenix_crew::{
    Crew, Error, PhoenixConfig, PipelineRequest, PipelineResult, Result, RunOptions, RunStore,
};
use phoenix_llm::Provider;
use std::collections::HashMap;
use std::io::{BufRead, IsTerminal, Read, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

const USAGE: &str = "Usage:
  phoenix train <n_iterations> <filename>
  phoenix replay <task_id>
  phoenix test <n_iterations> <eval_llm>
  phoenix (for interactive run)";

#[derive(Parser)]
#[command(name = "phoenix")]
#[command(author, version, about = "Phoenix - AI agents that fix your code")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log every stage and tool call
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fix code read from a file or stdin
    Run {
        /// Read the code from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// What the code is supposed to do
        #[arg(short, long)]
        expected: Option<String>,

        /// Maximum tool turns per stage (1-10)
        #[arg(short, long, default_value = "5", value_parser = clap::value_parser!(u8).range(1..=10))]
        max_iterations: u8,

        /// Ask for a fix only, without optimization
        #[arg(long)]
        no_optimization: bool,
    },
    /// Run the crew repeatedly and collect human feedback
    Train {
        n_iterations: usize,
        filename: PathBuf,
    },
    /// Re-execute a recorded run from one of its tasks
    Replay { task_id: String },
    /// Run the crew repeatedly and score each task with an LLM judge
    Test {
        n_iterations: usize,
        eval_llm: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "phoenix=debug,tower_http=debug"
    } else {
        "phoenix=info,tower_http=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("PHOENIX_LOG")
        .unwrap_or_else(|_| default.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel the run on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            token.cancel();
        }
    });
    cancel
}

fn read_query(file: Option<PathBuf>) -> Result<String> {
    if let Some(path) = file {
        return std::fs::read_to_string(&path).map_err(|e| {
            Error::from(e)
                .with_operation("cli::read_query")
                .with_context("path", path.display().to_string())
        });
    }

    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        print!("Enter your query: ");
        std::io::stdout().flush()?;
        eprintln!("(finish with Ctrl-D)");
    }
    let mut query = String::new();
    stdin.lock().read_to_string(&mut query)?;
    Ok(query)
}

fn print_result(result: &PipelineResult) {
    println!("Result: {}", result.raw_text);
    println!();
    println!("Completed in {:.2}s", result.execution_time.as_secs_f64());
    for task in &result.tasks {
        println!("  {} ({}): task {}", task.stage, task.agent, task.task_id);
    }
}

fn record_run(config: &PhoenixConfig, inputs: HashMap<String, String>, result: &PipelineResult) {
    let recorded =
        RunStore::file(&config.data_dir).and_then(|mut store| store.record(inputs, result));
    if let Err(e) = recorded {
        tracing::warn!("Could not record run for replay: {}", e);
    }
}

async fn run(file: Option<PathBuf>, expected: Option<String>, options: RunOptions) -> Result<()> {
    let config = PhoenixConfig::from_env()?;
    let crew = Crew::from_config(&config)?;

    let request = PipelineRequest::new(read_query(file)?, expected)?;
    let result = crew.run(&request, &options, &cancel_on_interrupt()).await?;

    record_run(&config, Crew::inputs(&request, &options), &result);
    print_result(&result);
    Ok(())
}

async fn replay(task_id: &str, options: RunOptions) -> Result<()> {
    let config = PhoenixConfig::from_env()?;
    let crew = Crew::from_config(&config)?;
    let store = RunStore::file(&config.data_dir)?;
    let (run, task) = store.find_task(task_id)?;

    println!("Replaying run {} from {} ({})", run.run_id, task.stage, task.agent);
    let result = crew
        .replay_from(task.stage, &run.inputs, &run.tasks, &options, &cancel_on_interrupt())
        .await?;

    // Keep the stages that were not re-run so this run can be replayed too
    let mut tasks: Vec<_> = run
        .tasks
        .iter()
        .filter(|t| t.stage < task.stage)
        .cloned()
        .collect();
    tasks.extend(result.tasks.iter().cloned());
    let recorded = PipelineResult {
        tasks,
        ..result.clone()
    };

    record_run(&config, run.inputs.clone(), &recorded);
    print_result(&result);
    Ok(())
}

/// Asks for feedback on the terminal
struct StdinFeedback;

impl FeedbackSource for StdinFeedback {
    fn feedback(&mut self, iteration: usize, agent: &str, output: &str) -> Result<String> {
        println!("\n## {} output (iteration {}):\n{}\n", agent, iteration, output);
        print!("Please provide feedback on the {} output: ", agent);
        std::io::stdout().flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

async fn train(n_iterations: usize, filename: PathBuf) -> Result<()> {
    let config = PhoenixConfig::from_env()?;
    let crew = Crew::from_config(&config)?;

    let data = training::train(&crew, n_iterations, &filename, &mut StdinFeedback).await?;
    println!(
        "\nTraining finished: {} iterations saved to {}",
        data.iterations.len(),
        filename.display()
    );
    Ok(())
}

async fn test(n_iterations: usize, eval_llm: &str) -> Result<()> {
    let config = PhoenixConfig::from_env()?;
    let crew = Crew::from_config(&config)?;

    let judge_config = evaluation::judge_config(&config, eval_llm, |key| std::env::var(key).ok())?;
    let judge = Provider::from_config(judge_config)
        .map_err(|e| e.into_error().with_operation("cli::test"))?;
    let evaluator = Evaluator::new(judge);

    let report = evaluation::evaluate(&crew, &evaluator, n_iterations).await?;
    println!("\n{}", report.render_table());

    let usage = crew.executor().usage();
    println!(
        "Crew used {} tokens over {} model calls",
        usage.total_tokens(),
        usage.total_calls
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion
            ) =>
        {
            e.exit()
        }
        Err(e) => {
            eprintln!("{}", e.kind());
            println!("{}", USAGE);
            std::process::exit(1);
        }
    };

    init_tracing(cli.verbose);
    let options = RunOptions {
        verbose: cli.verbose,
        ..RunOptions::default()
    };

    // Runtime failures are reported, not fatal
    match cli.command {
        None => {
            if let Err(e) = run(None, None, options).await {
                println!("An error occurred while running the crew: {}", e);
            }
        }
        Some(Commands::Run {
            file,
            expected,
            max_iterations,
            no_optimization,
        }) => {
            let options = RunOptions {
                max_iterations,
                include_optimization: !no_optimization,
                ..options
            };
            if let Err(e) = run(file, expected, options).await {
                println!("An error occurred while running the crew: {}", e);
            }
        }
        Some(Commands::Train {
            n_iterations,
            filename,
        }) => {
            if let Err(e) = train(n_iterations, filename).await {
                println!("An error occurred while training the crew: {}", e);
            }
        }
        Some(Commands::Replay { task_id }) => {
            if let Err(e) = replay(&task_id, options).await {
                println!("An error occurred while replaying the crew: {}", e);
            }
        }
        Some(Commands::Test {
            n_iterations,
            eval_llm,
        }) => {
            if let Err(e) = test(n_iterations, &eval_llm).await {
                println!("An error occurred while testing the crew: {}", e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["phoenix", "train", "3", "out.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Train { n_iterations: 3, .. })
        ));

        let cli = Cli::try_parse_from(["phoenix", "-v", "replay", "abc"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Replay { ref task_id }) if task_id == "abc"));

        let cli = Cli::try_parse_from(["phoenix"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_bad_arguments_are_usage_errors() {
        assert!(Cli::try_parse_from(["phoenix", "train", "3"]).is_err());
        assert!(Cli::try_parse_from(["phoenix", "train", "many", "out.json"]).is_err());
        assert!(Cli::try_parse_from(["phoenix", "test", "2"]).is_err());
        assert!(Cli::try_parse_from(["phoenix", "replay"]).is_err());
        assert!(Cli::try_parse_from(["phoenix", "deploy"]).is_err());
    }

    #[test]
    fn test_run_options() {
        let cli = Cli::try_parse_from(["phoenix", "run", "-m", "7", "--no-optimization"]).unwrap();
        match cli.command {
            Some(Commands::Run {
                max_iterations,
                no_optimization,
                file,
                ..
            }) => {
                assert_eq!(max_iterations, 7);
                assert!(no_optimization);
                assert!(file.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_max_iterations_out_of_range() {
        for value in ["0", "11"] {
            let err = Cli::try_parse_from(["phoenix", "run", "-m", value])
                .err()
                .unwrap();
            assert_eq!(err.kind(), ClapErrorKind::ValueValidation);
        }
        assert!(Cli::try_parse_from(["phoenix", "run", "-m", "10"]).is_ok());
    }
}
