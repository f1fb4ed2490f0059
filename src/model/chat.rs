//! Chat message and tool-call types shared with the model collaborator
//!
//! The model is an external collaborator; these types are the wire contract
//! with it. Tool calls arrive either in the native `tool_calls` field or,
//! with smaller models, as JSON embedded in the reply text, so both paths
//! are handled here before anything reaches the typed protocol.

use serde::{Deserialize, Serialize};

use crate::protocol::{RuntimeKind, ToolRequest};

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }
}

/// A tool call from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// Function call details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Why a tool call could not be turned into a typed request.
///
/// `UnsupportedRuntime` is separated out because it is a sandbox-boundary
/// failure that still gets a persisted audit record; the rest are protocol
/// violations answered with a structured error message to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallError {
    UnknownTool(String),
    UnsupportedRuntime(String),
    MissingField(&'static str),
    MalformedArguments,
}

impl std::fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTool(name) => write!(f, "unknown tool '{}'", name),
            Self::UnsupportedRuntime(name) => write!(f, "unsupported runtime '{}'", name),
            Self::MissingField(field) => write!(f, "missing required field '{}'", field),
            Self::MalformedArguments => write!(f, "arguments are not a JSON object"),
        }
    }
}

impl ToolCall {
    /// Convert the model's loose JSON arguments into a typed request.
    pub fn to_request(&self) -> Result<ToolRequest, ToolCallError> {
        if self.function.name != "execute_code" {
            return Err(ToolCallError::UnknownTool(self.function.name.clone()));
        }
        let args = self
            .function
            .arguments
            .as_object()
            .ok_or(ToolCallError::MalformedArguments)?;

        let runtime_name = args
            .get("runtime")
            .and_then(|v| v.as_str())
            .ok_or(ToolCallError::MissingField("runtime"))?;
        let source = args
            .get("source")
            .and_then(|v| v.as_str())
            .ok_or(ToolCallError::MissingField("source"))?;
        if source.trim().is_empty() {
            return Err(ToolCallError::MissingField("source"));
        }

        let runtime = RuntimeKind::parse(runtime_name)
            .ok_or_else(|| ToolCallError::UnsupportedRuntime(runtime_name.to_string()))?;

        let stdin = args
            .get("stdin")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(ToolRequest::ExecuteCode {
            runtime,
            source: source.to_string(),
            stdin,
        })
    }
}

/// Tool definition for the model.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // always "function"
    pub function: ToolFunction,
}

/// Function specification for a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

/// The `execute_code` tool definition advertised to the model.
pub fn execute_code_tool() -> Tool {
    let runtimes: Vec<&str> = RuntimeKind::ALL.iter().map(|r| r.as_str()).collect();
    Tool {
        tool_type: "function".to_string(),
        function: ToolFunction {
            name: "execute_code".to_string(),
            description: "Execute code in an isolated sandbox and see its output. \
                          The environment is ephemeral: nothing survives between calls."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "runtime": {
                        "type": "string",
                        "enum": runtimes,
                        "description": "The runtime to execute the code with"
                    },
                    "source": {
                        "type": "string",
                        "description": "The code to execute"
                    },
                    "stdin": {
                        "type": "string",
                        "description": "Optional text fed to the program on standard input"
                    }
                },
                "required": ["runtime", "source"]
            }),
        },
    }
}

/// Default system prompt for the code-execution agent.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant with access to an isolated code execution sandbox.

You have access to the execute_code tool. Use it whenever you need to:
- Calculate something
- Verify a result
- Run shell commands
- Test code

Guidelines:
- Always use the execute_code tool to verify results rather than guessing
- If code fails, read the error message and fix it
- Supported runtimes: python, node, bash
- The sandbox is ephemeral: files do not survive between calls
- When the task is complete, respond with your final answer in plain text"#;

/// Try to parse tool calls from the response content text.
///
/// Handles models that output tool calls as JSON in the text instead of
/// using the native `tool_calls` field.
pub fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let content = content.trim();
    let mut tool_calls = Vec::new();

    if let Some(tool_call) = try_parse_tool_call(content) {
        tool_calls.push(tool_call);
        return tool_calls;
    }

    // Scan for balanced {...} blocks that might be tool calls.
    let mut depth = 0;
    let mut start = None;
    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        if let Some(tool_call) = try_parse_tool_call(&content[s..=i]) {
                            tool_calls.push(tool_call);
                        }
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }

    tool_calls
}

fn try_parse_tool_call(json_str: &str) -> Option<ToolCall> {
    let value = serde_json::from_str::<serde_json::Value>(json_str).ok()?;
    let name = value.get("name").and_then(|n| n.as_str())?;

    // Some models emit "parameters" instead of "arguments".
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))?
        .clone();

    Some(ToolCall {
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    })
}
