//! External Tool Process Module - 外部工具进程管理
//!
//! Every external invocation made by the sweep (transcoder, info report,
//! ffmpeg, vmaf) goes through [`ToolProcess`]:
//!
//! - stdout and stderr are drained on their own threads, so a tool that
//!   writes more than a pipe buffer of diagnostics never blocks
//! - the child is polled instead of blocking in `wait()`, so an optional
//!   timeout can kill it; on unix it runs in its own process group and the
//!   kill takes its whole process tree with it
//! - wall-clock duration is measured around the whole invocation
//!
//! ```ignore
//! use shared_utils::tool_process::ToolProcess;
//! use std::process::Command;
//! use std::time::Duration;
//!
//! let mut cmd = Command::new("adderinfo");
//! cmd.arg("-i").arg("events.adder");
//! let output = ToolProcess::spawn("adderinfo", &mut cmd)?
//!     .wait_with_timeout(Some(Duration::from_secs(60)))?;
//! if output.success() {
//!     println!("{}", output.stdout);
//! }
//! ```

use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Interval between `try_wait` polls while a tool is running.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long the drain threads get after a kill, or after a clean exit with
/// no timeout set. A background process that inherited the pipes keeps
/// them open after the direct child is gone; it is killed once this runs out.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Drain threads of a tool that exited right at its deadline still get
/// this long to hand over the captured text.
const PIPE_SETTLE: Duration = Duration::from_millis(250);

/// 外部工具调用失败（进程无法启动或无法等待）
///
/// A non-zero exit is NOT an error at this level: it is reported through
/// [`ToolOutput::exit_code`] so callers decide how to classify it.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {tool} ({command}): {source}")]
    Spawn {
        tool: String,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for {tool}: {source}")]
    Wait {
        tool: String,
        #[source]
        source: io::Error,
    },
}

/// Captured result of one finished (or killed) tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Short human-readable reason for a failed invocation: the trimmed
    /// stderr if there is any, otherwise the exit status.
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        let status = if self.timed_out {
            format!("timed out after {:.1}s", self.duration.as_secs_f64())
        } else {
            match self.exit_code {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            }
        };
        if stderr.is_empty() {
            status
        } else {
            format!("{}: {}", status, stderr)
        }
    }
}

/// 外部工具进程包装器 - 并发消耗 stdout/stderr，支持超时
pub struct ToolProcess {
    tool: String,
    command: String,
    child: Child,
    stdout_rx: Receiver<String>,
    stderr_rx: Receiver<String>,
    started: Instant,
}

impl ToolProcess {
    /// Spawn `cmd` with both output pipes captured.
    ///
    /// `tool` is only used for logging and error messages.
    pub fn spawn(tool: &str, cmd: &mut Command) -> Result<Self, ToolError> {
        let command = format!("{:?}", cmd);
        info!(tool = tool, command = %command, "Executing external tool");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(cmd);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            tool: tool.to_string(),
            command: command.clone(),
            source,
        })?;

        let stdout_rx = drain(child.stdout.take());
        let stderr_rx = drain(child.stderr.take());

        Ok(Self {
            tool: tool.to_string(),
            command,
            child,
            stdout_rx,
            stderr_rx,
            started,
        })
    }

    /// Wait for the process to exit, killing it once `timeout` elapses.
    ///
    /// The timeout covers the whole invocation: a tool that exits but leaves
    /// a background process holding its pipes is killed at the same deadline
    /// and reported as timed out. Whatever the outcome, no process spawned
    /// by the tool outlives this call (unix).
    pub fn wait_with_timeout(mut self, timeout: Option<Duration>) -> Result<ToolOutput, ToolError> {
        let deadline = timeout.map(|limit| self.started + limit);
        let mut timed_out = false;
        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        warn!(
                            tool = %self.tool,
                            elapsed_secs = self.started.elapsed().as_secs_f64(),
                            "External tool exceeded its timeout, killing it"
                        );
                        kill_process_group(&self.child);
                        // kill() fails only if the child already exited; wait() reaps it either way
                        let _ = self.child.kill();
                        timed_out = true;
                        break self.child.wait().map_err(|source| ToolError::Wait {
                            tool: self.tool.clone(),
                            source,
                        })?;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(source) => {
                    return Err(ToolError::Wait {
                        tool: self.tool.clone(),
                        source,
                    })
                }
            }
        };

        // the exit deadline also bounds the pipes; without one, leftovers get DRAIN_GRACE
        let pipe_deadline = match deadline {
            Some(d) if !timed_out => d.max(Instant::now() + PIPE_SETTLE),
            _ => Instant::now() + DRAIN_GRACE,
        };
        let mut stdout = collect_until(&self.stdout_rx, pipe_deadline);
        let mut stderr = collect_until(&self.stderr_rx, pipe_deadline);

        if !timed_out && (stdout.is_none() || stderr.is_none()) {
            if deadline.is_some() {
                warn!(
                    tool = %self.tool,
                    elapsed_secs = self.started.elapsed().as_secs_f64(),
                    "External tool exited but its pipes are still open past the timeout, killing its process group"
                );
                timed_out = true;
            } else {
                warn!(tool = %self.tool, "External tool left processes holding its pipes, killing its process group");
            }
            kill_process_group(&self.child);
            let grace = Instant::now() + DRAIN_GRACE;
            stdout = stdout.or_else(|| collect_until(&self.stdout_rx, grace));
            stderr = stderr.or_else(|| collect_until(&self.stderr_rx, grace));
        }

        // background leftovers that closed their pipes must not outlive the call either
        kill_process_group(&self.child);

        if stdout.is_none() || stderr.is_none() {
            debug!(tool = %self.tool, "Pipe still held open after kill, dropping its output");
        }
        let output = ToolOutput {
            exit_code: status.code(),
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
            duration: self.started.elapsed(),
            timed_out,
        };
        crate::logging::log_external_tool(&self.tool, &self.command, &output);
        Ok(output)
    }
}

/// Put the child in a process group of its own so the whole tree can be
/// signalled at once.
#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// SIGKILL every process left in the child's group. ESRCH (group already
/// empty) is the normal case after a clean exit.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers; the group id is the child's pid
    // because of process_group(0) at spawn
    let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if ret == 0 {
        debug!(pgid, "Killed leftover process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Read a pipe to EOF on a background thread and hand the text back.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                debug!(error = %e, "Pipe read ended with error");
            }
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// `None` while something still holds the pipe open at `deadline`.
fn collect_until(rx: &Receiver<String>, deadline: Instant) -> Option<String> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
    }
}

/// Run `program args...` to completion (or timeout).
pub fn run_tool(
    tool: &str,
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<ToolOutput, ToolError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    ToolProcess::spawn(tool, &mut cmd)?.wait_with_timeout(timeout)
}
