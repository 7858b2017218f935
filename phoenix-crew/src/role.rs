//! Agent roles
//!
//! A role is static configuration: who the agent is, what it is trying to
//! achieve, and which tools it may touch. Roles are built once and shared by
//! every run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Rule appended to every system prompt. Output is shown verbatim in the
/// dashboard and the terminal, so markdown is not wanted.
pub const PLAIN_TEXT_RULE: &str = "IMPORTANT: Provide your response in plain text format only. \
Do not use markdown formatting, code blocks with backticks, or special characters for formatting. \
Present code as plain text with proper indentation.";

/// An external capability an agent may be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    /// Run code in the sandboxed interpreter
    CodeExecution,
}

impl ToolCapability {
    /// Name the model sees for this tool
    pub fn tool_name(&self) -> &'static str {
        match self {
            ToolCapability::CodeExecution => "code_interpreter",
        }
    }

    /// Reverse of [`ToolCapability::tool_name`]
    pub fn from_tool_name(name: &str) -> Option<Self> {
        match name {
            "code_interpreter" => Some(ToolCapability::CodeExecution),
            _ => None,
        }
    }
}

impl fmt::Display for ToolCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tool_name())
    }
}

/// Persona and permissions of one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRole {
    pub name: String,
    pub goal: String,
    pub backstory: String,
    pub allowed_tools: BTreeSet<ToolCapability>,
    pub allow_delegation: bool,
}

impl AgentRole {
    /// The agent that runs the code, reads the errors and repairs it
    pub fn fixer() -> Self {
        Self {
            name: "Code Fixer".to_string(),
            goal: "Analyze the provided code, identify errors, and propose corrected versions \
                   iteratively until it runs without errors."
                .to_string(),
            backstory: "You are an expert debugger specializing in Python code. You use logical \
                        reasoning to fix syntax, logic, and runtime errors. You always test your \
                        fixes. You provide responses in plain text format without markdown or \
                        special formatting."
                .to_string(),
            allowed_tools: BTreeSet::from([ToolCapability::CodeExecution]),
            allow_delegation: false,
        }
    }

    /// The agent that reviews the fixed code and returns the final version
    pub fn verifier() -> Self {
        Self {
            name: "Code Verifier".to_string(),
            goal: "Review the fixed code for best practices, efficiency, and confirm it meets \
                   the user's intent."
                .to_string(),
            backstory: "You are a senior code reviewer ensuring the code is clean, efficient, and \
                        functional. You provide responses in plain text format without markdown \
                        or special formatting."
                .to_string(),
            allowed_tools: BTreeSet::new(),
            allow_delegation: false,
        }
    }

    pub fn can_use(&self, tool: ToolCapability) -> bool {
        self.allowed_tools.contains(&tool)
    }

    /// System prompt for an LLM playing this role
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are {}. {}\nYour personal goal is: {}\n",
            self.name, self.backstory, self.goal
        );
        if !self.allowed_tools.is_empty() {
            let tools: Vec<&str> = self.allowed_tools.iter().map(|t| t.tool_name()).collect();
            prompt.push_str(&format!("You have access to these tools: {}\n", tools.join(", ")));
        }
        prompt.push('\n');
        prompt.push_str(PLAIN_TEXT_RULE);
        prompt
    }
}
