//! Stage output shapes and normalization

use phoenix_error::{Error, Result};
use serde_json::Value;

/// What a stage executor hands back
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// Plain text
    Text(String),
    /// A rich result that exposes its text as `raw`
    Raw { raw: String, json: Option<Value> },
    /// Structured output
    Json(Value),
}

impl TaskOutput {
    /// Collapse any output shape into the displayable text.
    ///
    /// # Errors
    ///
    /// `MalformedOutput` when no text can be found, or the text is blank.
    pub fn normalize(self) -> Result<String> {
        let text = match self {
            TaskOutput::Text(text) => text,
            TaskOutput::Raw { raw, .. } => raw,
            TaskOutput::Json(Value::String(text)) => text,
            TaskOutput::Json(Value::Object(mut map)) => match map.remove("raw") {
                Some(Value::String(raw)) => raw,
                _ => {
                    return Err(Error::malformed_output("JSON output has no string 'raw' field")
                        .with_operation("output::normalize"))
                }
            },
            TaskOutput::Json(other) => {
                return Err(Error::malformed_output(format!(
                    "unsupported JSON output: {}",
                    json_type(&other)
                ))
                .with_operation("output::normalize"))
            }
        };

        if text.trim().is_empty() {
            return Err(Error::malformed_output("stage produced empty output")
                .with_operation("output::normalize"));
        }
        Ok(text)
    }
}

impl From<String> for TaskOutput {
    fn from(text: String) -> Self {
        TaskOutput::Text(text)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
