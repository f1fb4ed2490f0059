//! Sandbox runtime manager
//!
//! Executes one untrusted code payload per isolated, ephemeral container:
//!
//! ```text
//! ToolRequest ──► SandboxExecutor
//!                     │  fresh ScratchDir + uniquely named container
//!                     ▼
//!               docker run --rm --network=none --memory ... <image>
//!                     │  capped stdout/stderr capture, wall-clock timeout
//!                     ▼
//!               ToolResponse (Success | Failure)
//!                     │
//!               ContainerGuard / TempDir drop ──► unconditional teardown
//! ```
//!
//! The orchestrator only ever sees the `CodeExecutor` trait and the protocol
//! types; container details stay behind this module boundary.

pub mod executor;
pub mod scratch;

pub use executor::{status_label, CodeExecutor, SandboxConfig, SandboxExecutor};
pub use scratch::{ContainerGuard, ScratchDir};
