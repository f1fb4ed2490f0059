//! Conversational agent orchestration
//!
//! ```text
//!                    +---------------------+
//!   inbound message  |    Orchestrator     |   outbound frames
//!  ----------------->|  (one turn at a     |------------------>
//!                    |   time per session) |
//!                    +----+-----+-----+----+
//!                         |     |     |
//!              model call |     |     | append
//!                         v     |     v
//!                  ModelClient  |  SessionStore
//!                               |
//!                      dispatch v
//!                         CodeExecutor
//! ```
//!
//! The orchestrator owns the turn state machine; the session registry
//! serializes turns within a session while sessions stay independent.

pub mod orchestrator;
pub mod sessions;

pub use orchestrator::{Orchestrator, OrchestratorConfig, TurnError};
pub use sessions::SessionRegistry;
