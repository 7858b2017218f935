//! Inbound fix requests and per-run options

use phoenix_error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const MIN_ITERATIONS: u8 = 1;
pub const MAX_ITERATIONS: u8 = 10;

/// Code submitted for fixing. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRequest {
    source_code: String,
    expected_behavior: Option<String>,
}

impl PipelineRequest {
    /// Build a request. A blank `expected_behavior` counts as not given.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `source_code` is empty or whitespace only.
    pub fn new(source_code: impl Into<String>, expected_behavior: Option<String>) -> Result<Self> {
        let source_code = source_code.into();
        if source_code.trim().is_empty() {
            return Err(Error::invalid_argument("Please provide some code to analyze")
                .with_operation("request::new"));
        }
        Ok(Self {
            source_code,
            expected_behavior: expected_behavior.filter(|b| !b.trim().is_empty()),
        })
    }

    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    pub fn expected_behavior(&self) -> Option<&str> {
        self.expected_behavior.as_deref()
    }

    /// Number of lines in the submitted code
    pub fn lines_analyzed(&self) -> usize {
        self.source_code.split('\n').count()
    }

    /// Context block handed to the Fix task as `{context}`
    pub fn context(&self, options: &RunOptions) -> String {
        let mut context = String::new();
        if options.include_optimization {
            context.push_str("TASK: Fix and optimize the following Python code\n");
        } else {
            context.push_str("TASK: Fix the following Python code\n");
        }
        context.push_str("\nUSER'S CODE:\n```python\n");
        context.push_str(&self.source_code);
        context.push_str("\n```\n\n");
        context.push_str(&format!(
            "EXPECTED BEHAVIOR: {}\n\n",
            self.expected_behavior().unwrap_or("Not specified")
        ));
        context.push_str(
            "INSTRUCTIONS:\n\
             - Analyze the code for syntax errors, logical errors, or runtime issues\n\
             - Test the code using the code interpreter tool\n\
             - Fix any issues found systematically\n",
        );
        if options.include_optimization {
            context.push_str("- Provide working, optimized Python code\n");
        } else {
            context.push_str("- Provide working Python code\n");
        }
        context
    }
}

/// Knobs a submitter may turn for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Cap on tool-augmented reasoning turns per stage
    pub max_iterations: u8,
    pub include_optimization: bool,
    /// Log each stage at debug level
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            include_optimization: true,
            verbose: false,
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.max_iterations) {
            return Err(Error::invalid_argument(format!(
                "max_iterations must be between {} and {}, got {}",
                MIN_ITERATIONS, MAX_ITERATIONS, self.max_iterations
            ))
            .with_context("max_iterations", self.max_iterations.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_error::ErrorKind;

    #[test]
    fn test_blank_code_rejected() {
        let err = PipelineRequest::new("  \n\t", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_context_embeds_code_verbatim() {
        let code = "def add(a, b)\n    return a + b";
        let request = PipelineRequest::new(code, Some("adds two numbers".into())).unwrap();
        let context = request.context(&RunOptions::default());

        assert!(context.starts_with("TASK: Fix and optimize the following Python code"));
        assert!(context.contains(&format!("```python\n{}\n```", code)));
        assert!(context.contains("EXPECTED BEHAVIOR: adds two numbers"));
        assert!(context.contains("- Provide working, optimized Python code"));
        assert_eq!(request.lines_analyzed(), 2);
    }

    #[test]
    fn test_context_without_behavior_or_optimization() {
        let request = PipelineRequest::new("print(1)", Some("   ".into())).unwrap();
        assert_eq!(request.expected_behavior(), None);

        let options = RunOptions {
            include_optimization: false,
            ..RunOptions::default()
        };
        let context = request.context(&options);
        assert!(context.contains("EXPECTED BEHAVIOR: Not specified"));
        assert!(context.starts_with("TASK: Fix the following Python code"));
        assert!(!context.contains("optimized"));
    }

    #[test]
    fn test_run_options_bounds() {
        assert!(RunOptions::default().validate().is_ok());
        for bad in [0u8, 11] {
            let options = RunOptions {
                max_iterations: bad,
                ..RunOptions::default()
            };
            assert_eq!(options.validate().unwrap_err().kind(), ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_run_options_defaults_from_json() {
        let options: RunOptions = serde_json::from_str(r#"{"verbose": true}"#).unwrap();
        assert_eq!(options.max_iterations, 5);
        assert!(options.include_optimization);
        assert!(options.verbose);
    }
}
