//! Conversation orchestrator - per-session state machine driving turns
//!
//! One turn walks `idle -> awaiting model -> (direct reply | dispatching
//! tool) -> persisting result -> idle`. The orchestrator persists the
//! inbound message before anything else, asks the model collaborator for the
//! next action, dispatches tool calls to the sandbox, records exactly one
//! ToolEvent per dispatched call once the execution has terminated, and
//! feeds results back to the model until it produces a direct reply.
//!
//! Sandbox-boundary failures are recoverable: they go back to the model as
//! failed tool results. A store write failure is fatal to the turn: state
//! never advances past a failed write, and the caller sees only a generic
//! error frame.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::sessions::SessionRegistry;
use crate::metrics::{TOOL_CALLS, TURNS};
use crate::model::{
    execute_code_tool, parse_tool_calls_from_text, ChatMessage, ModelClient, ModelError,
    ToolCallError, DEFAULT_SYSTEM_PROMPT,
};
use crate::protocol::{ExecutionLimits, FailureKind, OutboundFrame, ToolResponse};
use crate::sandbox::CodeExecutor;
use crate::store::{Role, SessionStore, StoreError};

/// Reply sent when a turn dies on an internal failure. Raw error detail
/// never reaches the untrusted chat channel.
const TURN_FAILED_REPLY: &str = "Something went wrong while handling that message. Please try again.";

/// Fallback reply when a turn hits the tool-call or model-call cap.
const TURN_CAP_REPLY: &str =
    "I couldn't complete this request within the allowed number of code executions.";

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Cap on sandbox dispatches within one turn. Exceeding it forces the
    /// fallback reply instead of another dispatch.
    pub max_tool_calls_per_turn: usize,
    /// Cap on model calls within one turn, so a model stuck emitting
    /// malformed tool calls cannot loop forever.
    pub max_model_calls_per_turn: usize,
    /// Limits applied to every sandbox execution.
    pub limits: ExecutionLimits,
    /// Custom system prompt (uses the default if None).
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_calls_per_turn: 3,
            max_model_calls_per_turn: 8,
            limits: ExecutionLimits::default(),
            system_prompt: None,
        }
    }
}

/// Error type for a single turn. Everything here aborts the turn.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("model collaborator error: {0}")]
    Model(#[from] ModelError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Orchestrates the model collaborator, the sandbox and the store for all
/// sessions served by this process.
pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    executor: Arc<dyn CodeExecutor>,
    store: SessionStore,
    registry: SessionRegistry,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        executor: Arc<dyn CodeExecutor>,
        store: SessionStore,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            model,
            executor,
            store,
            registry: SessionRegistry::new(),
            config,
        }
    }

    /// The injected store handle, for history views.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Handle one inbound user message for a session.
    ///
    /// Takes the session's turn lock for the whole turn, so concurrent
    /// messages on the same session queue. Outbound frames go through
    /// `outbound`; if the transport has hung up, completed work (including
    /// persisted ToolEvents) is kept and only the frame is discarded.
    pub async fn handle_message(
        &self,
        session_id: &str,
        text: &str,
        outbound: &mpsc::Sender<OutboundFrame>,
    ) {
        let lock = self.registry.turn_lock(session_id).await;
        let _turn = lock.lock().await;

        if let Err(e) = self.run_turn(session_id, text, outbound).await {
            warn!(session_id = %session_id, error = %e, "turn aborted");
            TURNS.with_label_values(&["failed"]).inc();
            self.emit(outbound, OutboundFrame::Error(TURN_FAILED_REPLY.to_string()))
                .await;
        }
    }

    async fn run_turn(
        &self,
        session_id: &str,
        text: &str,
        outbound: &mpsc::Sender<OutboundFrame>,
    ) -> Result<(), TurnError> {
        let trace_id = Uuid::now_v7().to_string();
        let span = info_span!("turn", trace_id = %trace_id, session_id = %session_id);

        async {
            self.store.ensure_session(session_id).await?;
            self.store.append_message(session_id, Role::User, text).await?;

            let mut history = self.load_history(session_id).await?;
            let tools = vec![execute_code_tool()];
            let mut dispatched = 0usize;
            let mut model_calls = 0usize;

            loop {
                model_calls += 1;
                if model_calls > self.config.max_model_calls_per_turn {
                    warn!(trace_id = %trace_id, model_calls, "model call cap reached");
                    return self.finish_with_fallback(session_id, outbound, "model_cap").await;
                }

                let model_span = info_span!("model_call", trace_id = %trace_id, call = model_calls);
                let response = self
                    .model
                    .chat(history.clone(), Some(tools.clone()))
                    .instrument(model_span)
                    .await?;
                history.push(response.message.clone());

                // Native tool calls first, then the text-embedded fallback.
                let tool_calls = response
                    .message
                    .tool_calls
                    .clone()
                    .filter(|tc| !tc.is_empty())
                    .unwrap_or_else(|| parse_tool_calls_from_text(&response.message.content));

                if tool_calls.is_empty() {
                    // Direct reply: persist, emit, back to idle.
                    self.store
                        .append_message(session_id, Role::Assistant, &response.message.content)
                        .await?;
                    info!(trace_id = %trace_id, dispatched, "turn completed");
                    TURNS.with_label_values(&["completed"]).inc();
                    self.emit(outbound, OutboundFrame::AssistantMessage(response.message.content))
                        .await;
                    return Ok(());
                }

                for call in tool_calls {
                    if dispatched >= self.config.max_tool_calls_per_turn {
                        warn!(trace_id = %trace_id, dispatched, "tool call cap reached");
                        return self.finish_with_fallback(session_id, outbound, "tool_cap").await;
                    }

                    match call.to_request() {
                        Ok(request) => {
                            dispatched += 1;
                            TOOL_CALLS.with_label_values(&[request.tool_name()]).inc();

                            let exec_span = info_span!(
                                "tool_call",
                                trace_id = %trace_id,
                                tool = request.tool_name()
                            );
                            let result = self
                                .executor
                                .execute(&request, &self.config.limits)
                                .instrument(exec_span)
                                .await;

                            // Exactly one audit record per dispatch, written
                            // only after the execution has terminated.
                            self.store
                                .append_tool_event(
                                    session_id,
                                    request.tool_name(),
                                    &serde_json::to_value(&request)?,
                                    &serde_json::to_value(&result)?,
                                )
                                .await?;

                            let rendered = result.render_for_model();
                            self.store.append_message(session_id, Role::Tool, &rendered).await?;
                            history.push(ChatMessage::tool(rendered));
                        }
                        Err(ToolCallError::UnsupportedRuntime(name)) => {
                            // Never dispatched, but it is a sandbox-boundary
                            // failure and part of the audit trail.
                            let result = ToolResponse::failure(
                                FailureKind::UnsupportedRuntime,
                                format!("runtime '{}' is not in the provisioned set", name),
                            );
                            self.store
                                .append_tool_event(
                                    session_id,
                                    "execute_code",
                                    &call.function.arguments,
                                    &serde_json::to_value(&result)?,
                                )
                                .await?;

                            let rendered = result.render_for_model();
                            self.store.append_message(session_id, Role::Tool, &rendered).await?;
                            history.push(ChatMessage::tool(rendered));
                        }
                        Err(violation) => {
                            // Malformed arguments from the model: answer
                            // structurally, never crash.
                            debug!(trace_id = %trace_id, error = %violation, "protocol violation from model");
                            history.push(ChatMessage::tool(format!(
                                "Error: invalid execute_code call: {}. Fix the arguments and try again.",
                                violation
                            )));
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Persist and emit the fallback reply that closes a capped turn.
    async fn finish_with_fallback(
        &self,
        session_id: &str,
        outbound: &mpsc::Sender<OutboundFrame>,
        outcome: &str,
    ) -> Result<(), TurnError> {
        self.store
            .append_message(session_id, Role::Assistant, TURN_CAP_REPLY)
            .await?;
        TURNS.with_label_values(&[outcome]).inc();
        self.emit(outbound, OutboundFrame::AssistantMessage(TURN_CAP_REPLY.to_string()))
            .await;
        Ok(())
    }

    /// Full prior history for the model: system prompt plus every persisted
    /// message of the session, in append order.
    async fn load_history(&self, session_id: &str) -> Result<Vec<ChatMessage>, TurnError> {
        let prompt = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let mut history = vec![ChatMessage::system(prompt)];

        for record in self.store.session_messages(session_id).await? {
            let message = match record.role {
                Role::System => ChatMessage::system(record.content),
                Role::User => ChatMessage::user(record.content),
                Role::Assistant => ChatMessage::assistant(record.content),
                Role::Tool => ChatMessage::tool(record.content),
            };
            history.push(message);
        }

        Ok(history)
    }

    async fn emit(&self, outbound: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) {
        if outbound.send(frame).await.is_err() {
            // Transport hung up mid-turn. Everything is already persisted;
            // the reply is simply discarded.
            info!("chat channel closed; discarding outbound frame");
        }
    }
}
