//! Language-model collaborator integration
//!
//! The model itself is external; this module holds the wire types shared
//! with it, the `ModelClient` seam the orchestrator depends on, and the
//! default Ollama-compatible HTTP adapter.

pub mod chat;
pub mod client;

pub use chat::{
    execute_code_tool, parse_tool_calls_from_text, ChatMessage, FunctionCall, Tool, ToolCall,
    ToolCallError, ToolFunction, DEFAULT_SYSTEM_PROMPT,
};
pub use client::{ChatResponse, ModelClient, ModelError, OllamaChatClient};
