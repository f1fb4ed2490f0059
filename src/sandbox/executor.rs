//! Sandbox executor - one untrusted payload per ephemeral container
//!
//! Each call provisions a fresh container from a pre-built runtime image,
//! mounts a per-call scratch directory as the only writable host path, runs
//! the payload with no network access under a mandatory wall-clock timeout,
//! captures capped stdout/stderr, and tears the environment down on every
//! exit path. Nothing is shared between two executions, including two
//! executions in the same session run back to back.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use super::scratch::{ContainerGuard, ScratchDir};
use crate::metrics::{EXECUTIONS, EXECUTION_DURATION};
use crate::protocol::{ExecutionLimits, FailureKind, RuntimeKind, ToolRequest, ToolResponse};

/// Exit code the docker CLI reports when the daemon/run itself failed.
const DOCKER_LAUNCH_EXIT: i32 = 125;
/// Exit code of a process killed by SIGKILL, which is what the OOM killer sends.
const OOM_KILL_EXIT: i32 = 137;

/// The seam the orchestrator depends on. It never sees container internals,
/// only the protocol types.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Run one payload to completion. Sandbox-boundary failures come back as
    /// `ToolResponse::Failure`; a payload that ran and exited non-zero is a
    /// `Success` with a failing exit code.
    async fn execute(&self, request: &ToolRequest, limits: &ExecutionLimits) -> ToolResponse;
}

/// Static configuration for the docker-backed executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker binary to invoke.
    pub docker_bin: String,
    /// Image overrides per runtime. Runtimes without an entry use
    /// `sandbot-{runtime}:latest`.
    pub images: HashMap<RuntimeKind, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            images: HashMap::new(),
        }
    }
}

impl SandboxConfig {
    pub fn image_for(&self, runtime: RuntimeKind) -> String {
        self.images
            .get(&runtime)
            .cloned()
            .unwrap_or_else(|| format!("sandbot-{}:latest", runtime))
    }
}

/// Docker-CLI backed sandbox runtime manager.
pub struct SandboxExecutor {
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(SandboxConfig::default())
    }

    fn interpreter(runtime: RuntimeKind) -> &'static str {
        match runtime {
            RuntimeKind::Python => "python3",
            RuntimeKind::Node => "node",
            RuntimeKind::Bash => "/bin/sh",
        }
    }

    fn docker_args(
        &self,
        runtime: RuntimeKind,
        limits: &ExecutionLimits,
        container: &str,
        scratch: &Path,
        wants_stdin: bool,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            container.into(),
            "--network=none".into(),
            "--pids-limit=128".into(),
        ];
        if let Some(mb) = limits.memory_mb {
            args.push("--memory".into());
            args.push(format!("{}m", mb));
        }
        if let Some(cpus) = limits.cpus {
            args.push("--cpus".into());
            args.push(format!("{}", cpus));
        }
        if wants_stdin {
            args.push("-i".into());
        }
        args.push("-v".into());
        args.push(format!("{}:/workspace", scratch.display()));
        args.push("-w".into());
        args.push("/workspace".into());
        args.push(self.config.image_for(runtime));
        args.push(Self::interpreter(runtime).into());
        args.push(format!("/workspace/{}", ScratchDir::source_file_name(runtime)));
        args
    }

    async fn run_container(
        &self,
        runtime: RuntimeKind,
        source: &str,
        stdin_payload: Option<&str>,
        limits: &ExecutionLimits,
    ) -> ToolResponse {
        let scratch = match ScratchDir::create() {
            Ok(s) => s,
            Err(e) => {
                return ToolResponse::failure(
                    FailureKind::LaunchFailure,
                    format!("could not create scratch area: {}", e),
                )
            }
        };
        if let Err(e) = scratch.write_source(runtime, source) {
            return ToolResponse::failure(
                FailureKind::LaunchFailure,
                format!("could not stage source payload: {}", e),
            );
        }

        let container = format!("sandbot-{}", Uuid::now_v7());
        let mut guard = ContainerGuard::new(&self.config.docker_bin, &container);
        let args = self.docker_args(runtime, limits, &container, scratch.path(), stdin_payload.is_some());

        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.args(&args)
            .stdin(if stdin_payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                guard.disarm(); // nothing was launched
                return ToolResponse::failure(
                    FailureKind::LaunchFailure,
                    format!("could not launch execution environment: {}", e),
                );
            }
        };

        let (Some(child_stdout), Some(child_stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            guard.reap_async().await;
            return ToolResponse::failure(
                FailureKind::LaunchFailure,
                "could not capture execution output".to_string(),
            );
        };

        // Readers drain both output pipes from the start, and stdin is fed
        // from its own task, so a payload that floods stdout before reading
        // its input cannot wedge the pipe pair.
        let cap = limits.max_output_bytes;
        let stdout_task = tokio::spawn(read_capped(child_stdout, cap));
        let stderr_task = tokio::spawn(read_capped(child_stderr, cap));

        if let Some(input) = stdin_payload {
            if let Some(mut child_stdin) = child.stdin.take() {
                let input = input.to_string();
                tokio::spawn(async move {
                    if let Err(e) = child_stdin.write_all(input.as_bytes()).await {
                        debug!(error = %e, "payload stdin closed early");
                    }
                    // Dropping closes the pipe so the payload sees EOF.
                });
            }
        }

        match tokio::time::timeout(limits.timeout(), child.wait()).await {
            Err(_) => {
                // Deadline hit: kill the container first (that terminates the
                // payload's process group), then the CLI client.
                guard.reap_async().await;
                let _ = child.start_kill();
                let _ = child.wait().await;
                let (stdout, _) = stdout_task.await.unwrap_or_default();
                let (stderr, _) = stderr_task.await.unwrap_or_default();

                let mut message = format!("terminated after exceeding the {} ms limit", limits.timeout_ms);
                if !stdout.is_empty() {
                    message.push_str("\npartial stdout:\n");
                    message.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    message.push_str("\npartial stderr:\n");
                    message.push_str(&stderr);
                }
                ToolResponse::failure(FailureKind::Timeout, message)
            }
            Ok(Err(e)) => {
                guard.reap_async().await;
                ToolResponse::failure(
                    FailureKind::LaunchFailure,
                    format!("lost track of execution environment: {}", e),
                )
            }
            Ok(Ok(status)) => {
                // Container has exited; --rm already removed it.
                guard.disarm();
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let (stdout, out_truncated) = stdout_task.await.unwrap_or_default();
                let (stderr, err_truncated) = stderr_task.await.unwrap_or_default();
                let exit_code = status.code().unwrap_or(-1);

                if exit_code == OOM_KILL_EXIT && limits.memory_mb.is_some() {
                    return ToolResponse::failure(
                        FailureKind::ResourceExceeded,
                        format!(
                            "killed after hitting the {} MiB memory ceiling",
                            limits.memory_mb.unwrap_or_default()
                        ),
                    );
                }
                if exit_code == DOCKER_LAUNCH_EXIT {
                    return ToolResponse::failure(
                        FailureKind::LaunchFailure,
                        format!("execution environment failed to start: {}", stderr.trim()),
                    );
                }

                ToolResponse::Success {
                    stdout,
                    stderr,
                    exit_code,
                    elapsed_ms,
                    truncated: out_truncated || err_truncated,
                }
            }
        }
    }
}

#[async_trait]
impl CodeExecutor for SandboxExecutor {
    async fn execute(&self, request: &ToolRequest, limits: &ExecutionLimits) -> ToolResponse {
        let ToolRequest::ExecuteCode { runtime, source, stdin } = request;
        debug!(runtime = %runtime, source_len = source.len(), "dispatching sandbox execution");

        let start = Instant::now();
        let response = self
            .run_container(*runtime, source, stdin.as_deref(), limits)
            .await;

        EXECUTION_DURATION
            .with_label_values(&[runtime.as_str()])
            .observe(start.elapsed().as_secs_f64());
        EXECUTIONS
            .with_label_values(&[runtime.as_str(), status_label(&response)])
            .inc();

        response
    }
}

/// Metrics label for one execution outcome.
pub fn status_label(response: &ToolResponse) -> &'static str {
    match response {
        ToolResponse::Success { exit_code: 0, .. } => "success",
        ToolResponse::Success { .. } => "error",
        ToolResponse::Failure { kind, .. } => match kind {
            FailureKind::Timeout => "timeout",
            FailureKind::ResourceExceeded => "resource_exceeded",
            FailureKind::LaunchFailure => "launch_failure",
            FailureKind::UnsupportedRuntime => "unsupported_runtime",
        },
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes.
///
/// The stream is always drained so the child never blocks on a full pipe;
/// anything past the cap is discarded and flagged.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> (String, bool) {
    let mut buf: Vec<u8> = Vec::with_capacity(cap.min(8192));
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}
