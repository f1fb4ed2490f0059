//! Tool invocation protocol between the orchestrator and the sandbox
//!
//! These types are the only contract the orchestrator has with the sandbox
//! runtime manager. Everything here is a flat, serializable structure: tool
//! arguments and results cross the persistence boundary (they are written
//! into `tool_events`) and, conceptually, a container boundary, so they must
//! never hold live references.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A supported sandbox runtime, one per pre-provisioned image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Python,
    Node,
    Bash,
}

impl RuntimeKind {
    /// All supported runtimes, in the order they are advertised to the model.
    pub const ALL: [RuntimeKind; 3] = [RuntimeKind::Python, RuntimeKind::Node, RuntimeKind::Bash];

    /// Parse a runtime name as emitted by the model collaborator.
    ///
    /// Accepts the common aliases smaller models tend to produce
    /// ("python3", "javascript", "sh", ...). Returns `None` for anything
    /// outside the provisioned set; the caller reports `UnsupportedRuntime`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" => Some(Self::Python),
            "node" | "javascript" | "js" => Some(Self::Node),
            "bash" | "sh" | "shell" => Some(Self::Bash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Node => "node",
            Self::Bash => "bash",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource limits applied to one sandbox execution.
///
/// The wall-clock timeout is mandatory: there is no unbounded tool call.
/// Memory/CPU ceilings are optional; `None` leaves the container default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock timeout in milliseconds.
    pub timeout_ms: u64,
    /// Cap on captured bytes per output stream.
    pub max_output_bytes: usize,
    /// Memory ceiling in MiB, enforced by the container runtime.
    pub memory_mb: Option<u64>,
    /// CPU ceiling in cores.
    pub cpus: Option<f32>,
}

impl ExecutionLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_output_bytes: 64 * 1024,
            memory_mb: Some(256),
            cpus: Some(1.0),
        }
    }
}

/// A tool call dispatched by the orchestrator.
///
/// Code execution is the only tool in scope; the enum keeps the dispatch
/// exhaustive so new tools cannot be half-wired.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolRequest {
    ExecuteCode {
        runtime: RuntimeKind,
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdin: Option<String>,
    },
}

impl ToolRequest {
    /// The tool name recorded in the audit trail.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::ExecuteCode { .. } => "execute_code",
        }
    }
}

/// Why a sandbox execution failed at the sandbox boundary.
///
/// A payload that runs and exits non-zero is NOT a failure here; that case is
/// reported as `ToolResponse::Success` with a failing exit code, because the
/// sandbox itself did its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Forcibly terminated after the wall-clock deadline.
    Timeout,
    /// Memory/CPU ceiling hit.
    ResourceExceeded,
    /// The execution environment could not be created.
    LaunchFailure,
    /// The requested runtime is not in the provisioned set.
    UnsupportedRuntime,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::ResourceExceeded => "resource_exceeded",
            Self::LaunchFailure => "launch_failure",
            Self::UnsupportedRuntime => "unsupported_runtime",
        };
        f.write_str(s)
    }
}

/// Result of one sandbox execution, as fed back to the model and persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResponse {
    Success {
        stdout: String,
        stderr: String,
        exit_code: i32,
        elapsed_ms: u64,
        truncated: bool,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
}

impl ToolResponse {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Render the response as the tool-role text the model sees next turn.
    pub fn render_for_model(&self) -> String {
        match self {
            Self::Success {
                stdout,
                stderr,
                exit_code,
                truncated,
                ..
            } => {
                let mut out = format!("Exit code: {}\nStdout:\n{}\nStderr:\n{}", exit_code, stdout, stderr);
                if *truncated {
                    out.push_str("\n(output truncated)");
                }
                out
            }
            Self::Failure { kind, message } => {
                format!("Tool failed ({}): {}", kind, message)
            }
        }
    }
}

/// Inbound frame on the duplex chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    pub message: String,
}

impl InboundFrame {
    /// Interpret one transport line: a serialized frame, or raw text from an
    /// interactive session.
    pub fn from_line(line: &str) -> Self {
        serde_json::from_str(line).unwrap_or_else(|_| Self {
            message: line.to_string(),
        })
    }
}

/// Outbound frame on the duplex chat channel.
///
/// Raw sandbox/internal error detail is never placed in an `Error` frame;
/// the chat channel is untrusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum OutboundFrame {
    AssistantMessage(String),
    Error(String),
}
