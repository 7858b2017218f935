//! Sandboxed code interpreter
//!
//! Runs model-written Python in a throwaway directory, either inside a
//! network-less Docker container (the default) or with a local interpreter
//! for development. Output comes back as a single text report the model can
//! read.

use crate::role::ToolCapability;
use phoenix_error::{Error, Result};
use phoenix_llm::{ToolCall, ToolDefinition};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::process::Command;

const SCRIPT_NAME: &str = "main.py";
const MAX_REPORT_CHARS: usize = 10_000;

/// Where code runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    Docker,
    /// Host interpreter with a cleared environment. Development only.
    Local,
}

impl FromStr for SandboxMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(SandboxMode::Docker),
            "local" => Ok(SandboxMode::Local),
            other => Err(format!("unknown sandbox mode '{}', expected docker or local", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub mode: SandboxMode,
    /// Docker image with a Python interpreter
    pub image: String,
    /// Interpreter binary for local mode
    pub python: String,
    /// Wall-clock limit for one run
    pub timeout: Duration,
    /// Docker `--memory` limit
    pub memory: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Docker,
            image: "python:3.12-slim".to_string(),
            python: "python3".to_string(),
            timeout: Duration::from_secs(30),
            memory: "256m".to_string(),
        }
    }
}

/// Result of one code run
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Libraries the model asked for that could not be installed
    pub unavailable_libraries: Vec<String>,
    pub duration: Duration,
}

impl ExecutionReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut result = format!("Exit code: {}\n", self.exit_code);

        if !self.unavailable_libraries.is_empty() {
            result.push_str(&format!(
                "Note: library installation is not available in this sandbox; not installed: {}\n",
                self.unavailable_libraries.join(", ")
            ));
        }

        if !self.stdout.is_empty() {
            result.push_str("\n--- stdout ---\n");
            result.push_str(&self.stdout);
        }

        if !self.stderr.is_empty() {
            result.push_str("\n--- stderr ---\n");
            result.push_str(&self.stderr);
        }

        if self.stdout.is_empty() && self.stderr.is_empty() {
            result.push_str("\n(no output)");
        }

        write!(f, "{}", truncate(result))
    }
}

#[derive(Debug, Deserialize)]
struct InterpreterArgs {
    code: String,
    #[serde(default)]
    libraries_used: Vec<String>,
}

/// Executes Python snippets for the agents
#[derive(Debug, Clone)]
pub struct CodeInterpreter {
    config: SandboxConfig,
}

impl CodeInterpreter {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The tool as offered to the model
    pub fn tool_definition() -> ToolDefinition {
        ToolDefinition::new(
            ToolCapability::CodeExecution.tool_name(),
            "Interprets Python3 code strings with a final print statement. \
             Returns the exit code, stdout and stderr of the run.",
        )
        .with_parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python3 code used to be interpreted. Always print the final result."
                },
                "libraries_used": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of libraries used in the code"
                }
            },
            "required": ["code"]
        }))
    }

    /// Run a model tool call and render the report.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for unparsable arguments, plus anything [`CodeInterpreter::run`] returns.
    pub async fn invoke(&self, call: &ToolCall) -> Result<String> {
        let args: InterpreterArgs = call.parse_arguments().map_err(|e| {
            Error::invalid_argument(format!("bad arguments for {}: {}", call.name, e))
                .with_operation("sandbox::invoke")
                .with_context("tool", call.name.clone())
        })?;
        let report = self.run(&args.code, &args.libraries_used).await?;
        Ok(report.to_string())
    }

    /// Write `code` to a fresh directory and run it.
    ///
    /// # Errors
    ///
    /// `ToolTimeout` when the run exceeds the configured limit, `ToolFailed`
    /// when the sandbox itself cannot be started.
    pub async fn run(&self, code: &str, libraries: &[String]) -> Result<ExecutionReport> {
        let tool = ToolCapability::CodeExecution.tool_name();
        let workdir = tempfile::Builder::new()
            .prefix("phoenix-run-")
            .tempdir()
            .map_err(|e| {
                Error::tool_failed(tool, format!("cannot create work dir: {}", e))
                    .with_operation("sandbox::run")
                    .set_source(e)
            })?;
        tokio::fs::write(workdir.path().join(SCRIPT_NAME), code)
            .await
            .map_err(|e| Error::from(e).with_operation("sandbox::run"))?;

        let container = format!("phoenix-{}", uuid::Uuid::new_v4().simple());
        let (mut command, mut guard) = match self.config.mode {
            SandboxMode::Docker => (
                self.docker_command(workdir.path(), &container),
                ContainerGuard::armed(&container),
            ),
            SandboxMode::Local => (self.local_command(workdir.path()), ContainerGuard::disarmed()),
        };

        tracing::debug!(mode = ?self.config.mode, bytes = code.len(), "running code");

        let start = Instant::now();
        let output = match tokio::time::timeout(self.config.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                guard.disarm();
                tracing::error!("Sandbox failed to start: {}", e);
                return Err(Error::tool_failed(tool, format!("failed to start sandbox: {}", e))
                    .with_operation("sandbox::run")
                    .set_source(e));
            }
            Err(_) => {
                tracing::warn!("Code run timed out after {:?}", self.config.timeout);
                return Err(Error::tool_timeout(tool, self.config.timeout.as_secs())
                    .with_operation("sandbox::run"));
            }
        };
        guard.disarm();

        let report = ExecutionReport {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: sanitize_output(&output.stdout),
            stderr: sanitize_output(&output.stderr),
            unavailable_libraries: libraries.to_vec(),
            duration: start.elapsed(),
        };

        tracing::debug!(
            "Code run completed: exit={}, stdout_len={}, stderr_len={}",
            report.exit_code,
            report.stdout.len(),
            report.stderr.len()
        );

        Ok(report)
    }

    fn docker_command(&self, dir: &Path, container: &str) -> Command {
        let mut command = Command::new("docker");
        command
            .arg("run")
            .arg("--rm")
            .args(["--name", container])
            .args(["--network", "none"])
            .args(["--memory", self.config.memory.as_str()])
            .args(["--pids-limit", "64"])
            .arg("-v")
            .arg(format!("{}:/work:ro", dir.display()))
            .args(["-w", "/work"])
            .arg(&self.config.image)
            .args(["timeout", "-s", "KILL"])
            .arg(self.config.timeout.as_secs().max(1).to_string())
            .args(["python", SCRIPT_NAME]);
        piped(command)
    }

    fn local_command(&self, dir: &Path) -> Command {
        let mut command = Command::new(&self.config.python);
        command.arg(SCRIPT_NAME).current_dir(dir).env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        command
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8");
        piped(command)
    }
}

fn piped(mut command: Command) -> Command {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

/// Force-removes a named container when dropped while armed.
///
/// `kill_on_drop` only reaches the docker client; the container keeps
/// running unless the daemon is told to remove it. Dropping the guard
/// covers timeouts and callers abandoning the run future alike.
struct ContainerGuard {
    name: Option<String>,
}

impl ContainerGuard {
    fn armed(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
        }
    }

    fn disarmed() -> Self {
        Self { name: None }
    }

    fn disarm(&mut self) {
        self.name = None;
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.name.is_some()
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            // Drop cannot await; the removal runs detached
            let result = removal_command(&name)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            match result {
                Ok(_) => tracing::debug!(container = %name, "removing abandoned container"),
                Err(e) => tracing::warn!("Failed to remove container {}: {}", name, e),
            }
        }
    }
}

fn removal_command(name: &str) -> std::process::Command {
    let mut command = std::process::Command::new("docker");
    command.args(["rm", "-f", name]);
    command
}

/// Sanitize process output: detect binary data, replace invalid UTF-8 and
/// drop control characters other than newlines and tabs.
pub fn sanitize_output(bytes: &[u8]) -> String {
    let non_printable_count = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    if bytes.len() > 100 && non_printable_count > bytes.len() / 10 {
        return format!(
            "[Binary output detected - {} bytes, {}% non-printable]",
            bytes.len(),
            non_printable_count * 100 / bytes.len()
        );
    }

    let text = String::from_utf8_lossy(bytes);
    text.chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect()
}

fn truncate(mut text: String) -> String {
    if let Some((idx, _)) = text.char_indices().nth(MAX_REPORT_CHARS) {
        text.truncate(idx);
        text.push_str("\n... [output truncated]");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_error::ErrorKind;

    // `sh` stands in for python so the tests only need a POSIX shell
    fn shell_interpreter(timeout: Duration) -> CodeInterpreter {
        CodeInterpreter::new(SandboxConfig {
            mode: SandboxMode::Local,
            python: "sh".to_string(),
            timeout,
            ..SandboxConfig::default()
        })
    }

    #[test]
    fn test_sanitize_output() {
        assert_eq!(sanitize_output(b"ok\n\tdone"), "ok\n\tdone");
        assert_eq!(sanitize_output(b"a\x00b\xffc"), "abc");

        let binary = vec![0u8; 200];
        assert!(sanitize_output(&binary).starts_with("[Binary output detected - 200 bytes"));
    }

    #[test]
    fn test_report_rendering() {
        let report = ExecutionReport {
            exit_code: 1,
            stdout: String::new(),
            stderr: "NameError: name 'x' is not defined".to_string(),
            unavailable_libraries: vec!["numpy".to_string()],
            duration: Duration::from_millis(5),
        };
        let text = report.to_string();
        assert!(text.starts_with("Exit code: 1\n"));
        assert!(text.contains("not installed: numpy"));
        assert!(text.contains("--- stderr ---\nNameError"));
        assert!(!text.contains("--- stdout ---"));
        assert!(!report.success());
    }

    #[test]
    fn test_report_truncation() {
        let report = ExecutionReport {
            exit_code: 0,
            stdout: "é".repeat(20_000),
            stderr: String::new(),
            unavailable_libraries: Vec::new(),
            duration: Duration::ZERO,
        };
        let text = report.to_string();
        assert!(text.ends_with("... [output truncated]"));
        assert!(text.chars().count() < 10_100);
    }

    #[test]
    fn test_sandbox_mode_parsing() {
        assert_eq!("Docker".parse::<SandboxMode>(), Ok(SandboxMode::Docker));
        assert_eq!("local".parse::<SandboxMode>(), Ok(SandboxMode::Local));
        assert!("vm".parse::<SandboxMode>().is_err());
    }

    #[test]
    fn test_tool_definition() {
        let tool = CodeInterpreter::tool_definition();
        assert_eq!(tool.name, "code_interpreter");
        assert_eq!(tool.parameters["required"][0], "code");
    }

    #[test]
    fn test_docker_command_bounds_the_script() {
        let interpreter = CodeInterpreter::new(SandboxConfig {
            timeout: Duration::from_secs(7),
            ..SandboxConfig::default()
        });
        let command = interpreter.docker_command(Path::new("/tmp/work"), "phoenix-abc");
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&args[..4], ["run", "--rm", "--name", "phoenix-abc"]);
        assert!(args.contains(&"none".to_string()));
        let image = args.iter().position(|a| a == "python:3.12-slim").unwrap();
        assert_eq!(&args[image + 1..], ["timeout", "-s", "KILL", "7", "python", "main.py"]);
    }

    #[test]
    fn test_container_guard() {
        let removal = removal_command("phoenix-abc");
        assert_eq!(removal.get_program(), "docker");
        let args: Vec<_> = removal.get_args().collect();
        assert_eq!(args, ["rm", "-f", "phoenix-abc"]);

        let mut guard = ContainerGuard::armed("phoenix-abc");
        assert!(guard.is_armed());
        guard.disarm();
        assert!(!guard.is_armed());
        assert!(!ContainerGuard::disarmed().is_armed());

        // Dropping an armed guard must not panic even without a docker binary
        drop(ContainerGuard::armed("phoenix-missing"));
    }

    #[tokio::test]
    async fn test_local_run_captures_output() {
        let interpreter = shell_interpreter(Duration::from_secs(10));
        let report = interpreter
            .run("echo fixed; echo oops >&2; exit 3", &[])
            .await
            .unwrap();
        assert_eq!(report.exit_code, 3);
        assert_eq!(report.stdout, "fixed\n");
        assert_eq!(report.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_local_run_has_clean_environment() {
        std::env::set_var("PHOENIX_SANDBOX_LEAK", "secret");
        let interpreter = shell_interpreter(Duration::from_secs(10));
        let report = interpreter
            .run("echo \"[${PHOENIX_SANDBOX_LEAK}]\"", &[])
            .await
            .unwrap();
        assert_eq!(report.stdout, "[]\n");
    }

    #[tokio::test]
    async fn test_local_run_timeout() {
        let interpreter = shell_interpreter(Duration::from_millis(200));
        let err = interpreter.run("sleep 5", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolTimeout);
        assert_eq!(err.context_value("tool"), Some("code_interpreter"));
    }

    #[tokio::test]
    async fn test_invoke_parses_arguments() {
        let interpreter = shell_interpreter(Duration::from_secs(10));
        let call = ToolCall {
            id: "call_0".into(),
            name: "code_interpreter".into(),
            arguments: r#"{"code":"echo 4","libraries_used":["requests"]}"#.into(),
        };
        let text = interpreter.invoke(&call).await.unwrap();
        assert!(text.contains("Exit code: 0"));
        assert!(text.contains("--- stdout ---\n4"));
        assert!(text.contains("not installed: requests"));

        let bad = ToolCall {
            arguments: "{}".into(),
            ..call
        };
        let err = interpreter.invoke(&bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_tool_failure() {
        let interpreter = CodeInterpreter::new(SandboxConfig {
            mode: SandboxMode::Local,
            python: "phoenix-no-such-python".to_string(),
            ..SandboxConfig::default()
        });
        let err = interpreter.run("print(1)", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolFailed);
    }
}
