//! End-to-end orchestrator tests with scripted collaborators
//!
//! The model and the sandbox are replaced by deterministic fakes so the full
//! turn lifecycle (persist, model call, dispatch, audit, reply) is exercised
//! without a docker daemon or an Ollama endpoint.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use sandbot::model::{
    ChatMessage, ChatResponse, FunctionCall, ModelClient, ModelError, Tool, ToolCall,
};
use sandbot::protocol::{
    ExecutionLimits, FailureKind, OutboundFrame, ToolRequest, ToolResponse,
};
use sandbot::sandbox::CodeExecutor;
use sandbot::store::{Role, SessionStore};
use sandbot::{Orchestrator, OrchestratorConfig};

/// Model fake that replays a fixed script of responses.
struct ScriptedModel {
    script: Mutex<VecDeque<ChatResponse>>,
}

impl ScriptedModel {
    fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
        })
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn chat(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: Option<Vec<Tool>>,
    ) -> Result<ChatResponse, ModelError> {
        self.script
            .lock()
            .await
            .pop_front()
            .ok_or(ModelError::EmptyResponse)
    }
}

/// Sandbox fake that records every dispatched request and replays scripted
/// results.
struct ScriptedExecutor {
    results: Mutex<VecDeque<ToolResponse>>,
    calls: Mutex<Vec<ToolRequest>>,
}

impl ScriptedExecutor {
    fn new(results: Vec<ToolResponse>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    async fn calls(&self) -> Vec<ToolRequest> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CodeExecutor for ScriptedExecutor {
    async fn execute(&self, request: &ToolRequest, _limits: &ExecutionLimits) -> ToolResponse {
        self.calls.lock().await.push(request.clone());
        self.results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| success("", 0))
    }
}

fn success(stdout: &str, exit_code: i32) -> ToolResponse {
    ToolResponse::Success {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code,
        elapsed_ms: 5,
        truncated: false,
    }
}

fn reply(content: &str) -> ChatResponse {
    ChatResponse {
        message: ChatMessage::assistant(content),
        done: true,
    }
}

fn tool_call_response(arguments: serde_json::Value) -> ChatResponse {
    ChatResponse {
        message: ChatMessage {
            role: "assistant".to_string(),
            content: String::new(),
            tool_calls: Some(vec![ToolCall {
                function: FunctionCall {
                    name: "execute_code".to_string(),
                    arguments,
                },
            }]),
        },
        done: true,
    }
}

async fn orchestrator_with(
    model: Arc<ScriptedModel>,
    executor: Arc<ScriptedExecutor>,
) -> (Orchestrator, SessionStore) {
    let store = SessionStore::open_in_memory().await.unwrap();
    let orchestrator =
        Orchestrator::new(model, executor, store.clone(), OrchestratorConfig::default());
    (orchestrator, store)
}

#[tokio::test]
async fn test_turn_with_one_execution_persists_full_trail() {
    let model = ScriptedModel::new(vec![
        tool_call_response(json!({"runtime": "python", "source": "print(2+2)"})),
        reply("The result is 4."),
    ]);
    let executor = ScriptedExecutor::new(vec![success("4\n", 0)]);
    let (orchestrator, store) = orchestrator_with(model, executor.clone()).await;

    let (tx, mut rx) = mpsc::channel(16);
    orchestrator.handle_message("s1", "What is 2+2? Run it.", &tx).await;

    assert_eq!(
        rx.recv().await,
        Some(OutboundFrame::AssistantMessage("The result is 4.".to_string()))
    );

    // Exactly one dispatch, with the typed request the model asked for.
    let calls = executor.calls().await;
    assert_eq!(calls.len(), 1);
    let ToolRequest::ExecuteCode { source, .. } = &calls[0];
    assert_eq!(source, "print(2+2)");

    // Persisted trail: user, tool result, assistant reply, in order.
    let messages = store.session_messages("s1").await.unwrap();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Tool, Role::Assistant]);
    assert!(messages[1].content.contains("4\n"));

    // Exactly one audit record, carrying args and result.
    let events = store.session_tool_events("s1").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tool_name, "execute_code");
    assert_eq!(events[0].tool_args["source"], "print(2+2)");
    assert_eq!(events[0].tool_result["status"], "success");
}

#[tokio::test]
async fn test_timeout_failure_is_audited_and_reported() {
    let model = ScriptedModel::new(vec![
        tool_call_response(json!({"runtime": "python", "source": "while True: pass"})),
        reply("That code ran past the time limit."),
    ]);
    let executor = ScriptedExecutor::new(vec![ToolResponse::failure(
        FailureKind::Timeout,
        "terminated after 30000ms",
    )]);
    let (orchestrator, store) = orchestrator_with(model, executor).await;

    let (tx, mut rx) = mpsc::channel(16);
    orchestrator.handle_message("s1", "loop forever", &tx).await;

    assert_eq!(
        rx.recv().await,
        Some(OutboundFrame::AssistantMessage(
            "That code ran past the time limit.".to_string()
        ))
    );

    let events = store.session_tool_events("s1").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tool_result["status"], "failure");
    assert_eq!(events[0].tool_result["kind"], "timeout");

    // The tool message fed back to the model names the failure.
    let messages = store.session_messages("s1").await.unwrap();
    assert!(messages[1].content.contains("timeout"));
}

#[tokio::test]
async fn test_tool_call_cap_forces_fallback_reply() {
    // The model keeps asking for executions; the cap must cut it off after 3.
    let call = || tool_call_response(json!({"runtime": "bash", "source": "echo hi"}));
    let model = ScriptedModel::new(vec![call(), call(), call(), call(), call()]);
    let executor = ScriptedExecutor::new(vec![
        success("hi\n", 0),
        success("hi\n", 0),
        success("hi\n", 0),
    ]);
    let (orchestrator, store) = orchestrator_with(model, executor.clone()).await;

    let (tx, mut rx) = mpsc::channel(16);
    orchestrator.handle_message("s1", "echo until told to stop", &tx).await;

    let frame = rx.recv().await.unwrap();
    let OutboundFrame::AssistantMessage(content) = frame else {
        panic!("expected an assistant message, got {:?}", frame);
    };
    assert!(content.contains("allowed number of code executions"));

    assert_eq!(executor.calls().await.len(), 3);
    assert_eq!(store.session_tool_events("s1").await.unwrap().len(), 3);

    // The fallback reply is part of the persisted conversation.
    let messages = store.session_messages("s1").await.unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert!(last.content.contains("allowed number of code executions"));
}

#[tokio::test]
async fn test_unsupported_runtime_is_audited_without_dispatch() {
    let model = ScriptedModel::new(vec![
        tool_call_response(json!({"runtime": "ruby", "source": "puts 1"})),
        reply("I can't run ruby here."),
    ]);
    let executor = ScriptedExecutor::new(vec![]);
    let (orchestrator, store) = orchestrator_with(model, executor.clone()).await;

    let (tx, mut rx) = mpsc::channel(16);
    orchestrator.handle_message("s1", "run some ruby", &tx).await;

    assert_eq!(
        rx.recv().await,
        Some(OutboundFrame::AssistantMessage("I can't run ruby here.".to_string()))
    );

    // Never reached the sandbox, but the refusal is in the audit trail.
    assert!(executor.calls().await.is_empty());
    let events = store.session_tool_events("s1").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tool_result["kind"], "unsupported_runtime");
}

#[tokio::test]
async fn test_malformed_arguments_get_structured_error_not_audit() {
    let model = ScriptedModel::new(vec![
        // Missing "source" entirely.
        tool_call_response(json!({"runtime": "python"})),
        reply("Sorry, I sent a bad call."),
    ]);
    let executor = ScriptedExecutor::new(vec![]);
    let (orchestrator, store) = orchestrator_with(model, executor.clone()).await;

    let (tx, mut rx) = mpsc::channel(16);
    orchestrator.handle_message("s1", "run something", &tx).await;

    assert!(rx.recv().await.is_some());
    assert!(executor.calls().await.is_empty());
    // Nothing was dispatched, so nothing is audited.
    assert!(store.session_tool_events("s1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_persistence_failure_emits_generic_error() {
    let model = ScriptedModel::new(vec![reply("never reached")]);
    let executor = ScriptedExecutor::new(vec![]);
    let (orchestrator, store) = orchestrator_with(model, executor).await;

    // Closing the pool makes the very first write fail.
    store.close().await;

    let (tx, mut rx) = mpsc::channel(16);
    orchestrator.handle_message("s1", "hello", &tx).await;

    let frame = rx.recv().await.unwrap();
    let OutboundFrame::Error(message) = frame else {
        panic!("expected an error frame, got {:?}", frame);
    };
    // No internal detail leaks onto the chat channel.
    assert!(!message.contains("database"));
    assert!(!message.contains("pool"));
}

#[tokio::test]
async fn test_closed_transport_discards_reply_but_keeps_work() {
    let model = ScriptedModel::new(vec![
        tool_call_response(json!({"runtime": "python", "source": "print(1)"})),
        reply("done"),
    ]);
    let executor = ScriptedExecutor::new(vec![success("1\n", 0)]);
    let (orchestrator, store) = orchestrator_with(model, executor.clone()).await;

    let (tx, rx) = mpsc::channel(16);
    drop(rx);

    // Must not panic, and the turn still runs to completion.
    orchestrator.handle_message("s1", "print one", &tx).await;

    assert_eq!(executor.calls().await.len(), 1);
    assert_eq!(store.session_tool_events("s1").await.unwrap().len(), 1);
    let messages = store.session_messages("s1").await.unwrap();
    assert_eq!(messages.last().unwrap().role, Role::Assistant);
}

#[tokio::test]
async fn test_embedded_json_tool_call_is_parsed() {
    // Model that ignores the native tool_calls field and writes JSON in text.
    let model = ScriptedModel::new(vec![
        reply(r#"{"name": "execute_code", "arguments": {"runtime": "python", "source": "print(7)"}}"#),
        reply("The answer is 7."),
    ]);
    let executor = ScriptedExecutor::new(vec![success("7\n", 0)]);
    let (orchestrator, _store) = orchestrator_with(model, executor.clone()).await;

    let (tx, mut rx) = mpsc::channel(16);
    orchestrator.handle_message("s1", "print 7", &tx).await;

    assert_eq!(
        rx.recv().await,
        Some(OutboundFrame::AssistantMessage("The answer is 7.".to_string()))
    );
    assert_eq!(executor.calls().await.len(), 1);
}

#[tokio::test]
async fn test_turns_on_same_session_are_serialized() {
    let model = ScriptedModel::new(vec![reply("first"), reply("second")]);
    let executor = ScriptedExecutor::new(vec![]);
    let (orchestrator, store) = orchestrator_with(model, executor).await;
    let orchestrator = Arc::new(orchestrator);

    let (tx, mut rx) = mpsc::channel(16);
    let first = {
        let orchestrator = orchestrator.clone();
        let tx = tx.clone();
        tokio::spawn(async move { orchestrator.handle_message("s1", "one", &tx).await })
    };
    let second = {
        let orchestrator = orchestrator.clone();
        let tx = tx.clone();
        tokio::spawn(async move { orchestrator.handle_message("s1", "two", &tx).await })
    };
    first.await.unwrap();
    second.await.unwrap();

    // Both replies arrive and both turns are fully persisted; the session
    // lock guarantees the turns did not interleave their writes.
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_some());
    let messages = store.session_messages("s1").await.unwrap();
    assert_eq!(messages.len(), 4);
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
}

#[tokio::test]
async fn test_history_accumulates_across_turns() {
    let model = ScriptedModel::new(vec![reply("hi there"), reply("still here")]);
    let executor = ScriptedExecutor::new(vec![]);
    let (orchestrator, store) = orchestrator_with(model, executor).await;

    let (tx, mut rx) = mpsc::channel(16);
    orchestrator.handle_message("s1", "hello", &tx).await;
    orchestrator.handle_message("s1", "are you there?", &tx).await;

    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_some());

    let messages = store.session_messages("s1").await.unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[2].content, "are you there?");
}
