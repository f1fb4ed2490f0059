//! Prometheus metrics for the agent

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

lazy_static! {
    /// Completed turns by outcome (completed, tool_cap, model_cap, failed).
    pub static ref TURNS: IntCounterVec = register_int_counter_vec!(
        "sandbot_turns_total",
        "Turns handled by the orchestrator, by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Tool calls dispatched to the sandbox, by tool name.
    pub static ref TOOL_CALLS: IntCounterVec = register_int_counter_vec!(
        "sandbot_tool_calls_total",
        "Tool calls dispatched to the sandbox",
        &["tool"]
    )
    .unwrap();

    /// Sandbox executions by runtime and terminal status.
    pub static ref EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "sandbot_executions_total",
        "Sandbox executions by runtime and terminal status",
        &["runtime", "status"]
    )
    .unwrap();

    /// Wall-clock duration of sandbox executions.
    pub static ref EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "sandbot_execution_duration_seconds",
        "Sandbox execution duration in seconds",
        &["runtime"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();
}
