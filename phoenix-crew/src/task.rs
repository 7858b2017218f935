//! Task specifications and template rendering

use crate::role::AgentRole;
use phoenix_error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const FIX_INSTRUCTIONS: &str = "You are a Python code fixing expert.

{context}

Your approach:
1. First, run the provided code using the code interpreter tool to identify any errors
2. If errors are found, analyze them carefully and create a fixed version
3. Test the fixed code to ensure it runs without errors
4. If needed, iterate until the code works properly
5. Provide the final working code with explanations of what was fixed

Always use the code interpreter tool to test your solutions.

IMPORTANT: Provide your response in PLAIN TEXT format only. Do NOT use markdown formatting, \
code blocks with backticks, or any special formatting. Just provide the clean Python code and \
explanations in simple text.";

const VERIFY_INSTRUCTIONS: &str = "Review and improve the fixed code from the previous task. \
Ensure it meets high quality standards.

Your tasks:
1. Review the fixed code from the previous agent
2. Check if the code follows Python best practices
3. Verify the code is readable and well-structured
4. Suggest any optimizations for performance or clarity
5. Provide a final, polished version of the code with explanations

Only make necessary improvements - don't over-engineer simple solutions.
Always provide the final working Python code.

IMPORTANT: Provide your response in PLAIN TEXT format only. Do NOT use markdown formatting, \
code blocks with backticks, or any special formatting. Just provide the clean Python code and \
explanations in simple text.";

/// A unit of work bound to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    /// Template; `{name}` is substituted from the run inputs, `{{` and `}}` are literal braces
    pub instructions: String,
    pub expected_output: String,
    pub agent: AgentRole,
}

impl TaskSpec {
    pub fn fix() -> Self {
        Self {
            name: "fix_task".to_string(),
            instructions: FIX_INSTRUCTIONS.to_string(),
            expected_output: "Working Python code in plain text format without markdown, along \
                              with explanations of any fixes made."
                .to_string(),
            agent: AgentRole::fixer(),
        }
    }

    pub fn verify() -> Self {
        Self {
            name: "verify_task".to_string(),
            instructions: VERIFY_INSTRUCTIONS.to_string(),
            expected_output: "Final, verified Python code in plain text format without markdown, \
                              with a summary of quality improvements made."
                .to_string(),
            agent: AgentRole::verifier(),
        }
    }

    /// Placeholder names in the order they appear
    pub fn placeholders(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        walk_template(&self.instructions, |segment| {
            if let Segment::Placeholder(name) = segment {
                names.push(name.to_string());
            }
            Ok(())
        })?;
        Ok(names)
    }

    /// Substitute every placeholder from `inputs`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if a placeholder has no input or a `{` is never closed.
    pub fn render(&self, inputs: &HashMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(self.instructions.len());
        walk_template(&self.instructions, |segment| {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Brace(c) => out.push(c),
                Segment::Placeholder(name) => {
                    let value = inputs.get(name).ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "task '{}' needs input '{}'",
                            self.name, name
                        ))
                        .with_context("task", self.name.clone())
                    })?;
                    out.push_str(value);
                }
            }
            Ok(())
        })
        .map_err(|e| e.with_operation("task::render"))?;
        Ok(out)
    }

    /// Rendered instructions followed by the expected-output contract
    pub fn describe(&self, inputs: &HashMap<String, String>) -> Result<String> {
        Ok(format!(
            "{}\n\nThis is the expected criteria for your final answer: {}\n\
             You MUST return the actual complete content as the final answer, not a summary.",
            self.render(inputs)?,
            self.expected_output
        ))
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

fn walk_template<'a>(
    template: &'a str,
    mut visit: impl FnMut(Segment<'a>) -> Result<()>,
) -> Result<()> {
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        visit(Segment::Literal(&rest[..pos]))?;
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            visit(Segment::Brace('{'))?;
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            visit(Segment::Brace('}'))?;
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            visit(Segment::Brace('}'))?;
            rest = &tail[1..];
        } else {
            let close = tail.find('}').ok_or_else(|| {
                Error::invalid_argument(format!("unclosed '{{' at byte {}", template.len() - tail.len()))
            })?;
            let name = tail[1..close].trim();
            if name.is_empty() || name.contains('{') {
                return Err(Error::invalid_argument(format!(
                    "malformed placeholder '{}'",
                    &tail[..=close]
                )));
            }
            visit(Segment::Placeholder(name))?;
            rest = &tail[close + 1..];
        }
    }
    visit(Segment::Literal(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_error::ErrorKind;

    fn inputs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_builtin_placeholders() {
        assert_eq!(TaskSpec::fix().placeholders().unwrap(), vec!["context".to_string()]);
        assert!(TaskSpec::verify().placeholders().unwrap().is_empty());
        assert_eq!(TaskSpec::fix().agent.name, "Code Fixer");
        assert_eq!(TaskSpec::verify().agent.name, "Code Verifier");
    }

    #[test]
    fn test_render_fix() {
        let rendered = TaskSpec::fix()
            .render(&inputs(&[("context", "USER'S CODE: print(1")]))
            .unwrap();
        assert!(rendered.starts_with("You are a Python code fixing expert."));
        assert!(rendered.contains("USER'S CODE: print(1"));
        assert!(!rendered.contains("{context}"));
    }

    #[test]
    fn test_substituted_values_are_not_reparsed() {
        let rendered = TaskSpec::fix()
            .render(&inputs(&[("context", "d = {'a': 1}\nprint(f'{d}')")]))
            .unwrap();
        assert!(rendered.contains("print(f'{d}')"));
    }

    #[test]
    fn test_missing_input() {
        let err = TaskSpec::fix().render(&HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("context"));
    }

    #[test]
    fn test_unclosed_brace() {
        let mut task = TaskSpec::verify();
        task.instructions = "Review {context".to_string();
        let err = task.render(&inputs(&[("context", "x")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("unclosed"));
    }

    #[test]
    fn test_escaped_braces() {
        let mut task = TaskSpec::verify();
        task.instructions = "Use {{}} for dicts, {lang} code".to_string();
        let rendered = task.render(&inputs(&[("lang", "Python")])).unwrap();
        assert_eq!(rendered, "Use {} for dicts, Python code");
    }

    #[test]
    fn test_describe_appends_expected_output() {
        let text = TaskSpec::verify().describe(&HashMap::new()).unwrap();
        assert!(text.starts_with("Review and improve the fixed code"));
        assert!(text.contains("expected criteria for your final answer: Final, verified Python code"));
    }
}
