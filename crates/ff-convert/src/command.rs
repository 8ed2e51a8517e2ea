//! Builder for running converter binaries with a timeout.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

use ff_core::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Stderr beyond this many bytes is cut from error messages.
const STDERR_TAIL: usize = 2048;

/// Captured result of a successful run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// A single external tool invocation.
///
/// The child is killed if the timeout fires or the future is dropped, so an
/// aborted request never leaves a converter running in the background.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            cwd: None,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Short name used in errors and logs.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Run to completion.
    ///
    /// Spawn failures, non-zero exits and timeouts all map to
    /// [`Error::Tool`].
    pub async fn execute(&self) -> Result<ToolOutput> {
        let tool = self.tool_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(tool = %tool, args = ?self.args, "Running converter");

        let child = cmd
            .spawn()
            .map_err(|e| Error::tool(&tool, format!("failed to spawn: {e}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::tool(&tool, format!("I/O error waiting for process: {e}")))
            }
            Err(_elapsed) => {
                tracing::warn!(tool = %tool, timeout = ?self.timeout, "Converter timed out");
                return Err(Error::tool(
                    &tool,
                    format!("timed out after {:?}", self.timeout),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(Error::tool(
                &tool,
                format!("exited with {}: {}", output.status, tail(stderr.trim())),
            ));
        }

        Ok(ToolOutput {
            status: output.status,
            stdout,
            stderr,
        })
    }
}

fn tail(s: &str) -> &str {
    if s.len() <= STDERR_TAIL {
        return s;
    }
    let mut start = s.len() - STDERR_TAIL;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
