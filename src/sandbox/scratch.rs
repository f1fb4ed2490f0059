//! Ephemeral per-execution resources: scratch directories and container reaping
//!
//! Every sandbox execution gets a fresh scratch directory (mounted into the
//! container as its only writable host path) and a uniquely named container.
//! Both are scoped acquisitions: the directory is removed when the
//! `ScratchDir` drops, and the `ContainerGuard` force-removes the container
//! on drop unless the normal exit path already disarmed it. That keeps the
//! teardown unconditional across success, error, timeout and panic paths.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;

use crate::protocol::RuntimeKind;

/// Fresh working area for one execution. Removed on drop.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn create() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("sandbot-").tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the source payload as a file the runtime can execute.
    ///
    /// A fixed name per runtime keeps the in-container path predictable.
    pub fn write_source(&self, runtime: RuntimeKind, source: &str) -> io::Result<PathBuf> {
        let file_name = Self::source_file_name(runtime);
        let path = self.dir.path().join(file_name);
        std::fs::write(&path, source)?;
        Ok(path)
    }

    pub fn source_file_name(runtime: RuntimeKind) -> &'static str {
        match runtime {
            RuntimeKind::Python => "snippet.py",
            RuntimeKind::Node => "snippet.js",
            RuntimeKind::Bash => "snippet.sh",
        }
    }
}

/// Best-effort removal of a named container when the execution scope ends.
///
/// The normal path disarms the guard once the container has exited (`--rm`
/// already cleaned it up). The timeout and error paths leave it armed, so the
/// container is force-removed even if the caller unwinds.
pub struct ContainerGuard {
    docker_bin: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    pub fn new(docker_bin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            name: name.into(),
            armed: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark the container as already gone; drop becomes a no-op.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Force-remove the container now without blocking the runtime.
    ///
    /// This is the path the executor takes on timeout and error; the
    /// synchronous `reap` stays only as the `Drop` fallback.
    pub async fn reap_async(&mut self) {
        if !self.armed {
            return;
        }
        let status = tokio::process::Command::new(&self.docker_bin)
            .args(["rm", "-f", &self.name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            tracing::warn!(container = %self.name, error = %e, "failed to force-remove container");
        }
        self.armed = false;
    }

    /// Blocking removal, reserved for `Drop` when the scope unwinds.
    pub fn reap(&mut self) {
        if !self.armed {
            return;
        }
        let status = Command::new(&self.docker_bin)
            .args(["rm", "-f", &self.name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            tracing::warn!(container = %self.name, error = %e, "failed to force-remove container");
        }
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        self.reap();
    }
}
