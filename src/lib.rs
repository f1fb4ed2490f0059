//! Sandbot - conversational agent with sandboxed code execution
//!
//! A chat agent that lets a language model run user-requested code inside
//! isolated, ephemeral docker sandboxes, with every conversation and tool
//! execution persisted to SQLite.
//!
//! # Modules
//!
//! - `agent` - turn orchestration and per-session serialization
//! - `model` - chat wire types and the model collaborator client
//! - `protocol` - typed tool request/response contract
//! - `sandbox` - docker-backed code execution with hard limits
//! - `store` - append-only SQLite persistence
//! - `metrics` - Prometheus metrics for observability
//!
//! # Quick Start
//!
//! ```ignore
//! use sandbot::{Orchestrator, OrchestratorConfig, SandboxExecutor, SessionStore};
//!
//! let store = SessionStore::open("sessions.db").await?;
//! let executor = Arc::new(SandboxExecutor::with_defaults());
//! let orchestrator = Orchestrator::new(model, executor, store, OrchestratorConfig::default());
//! ```

pub mod agent;
pub mod metrics;
pub mod model;
pub mod protocol;
pub mod sandbox;
pub mod store;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{Orchestrator, OrchestratorConfig, TurnError};
pub use protocol::{
    ExecutionLimits, FailureKind, InboundFrame, OutboundFrame, RuntimeKind, ToolRequest,
    ToolResponse,
};
pub use sandbox::{CodeExecutor, SandboxConfig, SandboxExecutor};
pub use store::{SessionStore, StoreError};
