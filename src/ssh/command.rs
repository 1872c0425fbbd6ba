//! Command execution over SSH
//!
//! Provides the `CommandOutput` struct and the PTY-backed single command
//! runner, plus the channel reading loop shared with the batch runner and
//! the push protocol.

use std::time::{Duration, Instant};

use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::Session;
use super::sanitize::sanitize_command;
use crate::error::{ExecError, Result};

/// Terminal type requested for the PTY
pub const TERM: &str = "xterm";

/// PTY geometry
pub const TERM_COLUMNS: u32 = 40;
pub const TERM_ROWS: u32 = 80;

const TERMINAL_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 0),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// How long a force-closed channel may take to report its close
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: Vec<u8>,

    /// Standard error from the command
    pub stderr: Vec<u8>,

    /// Wall-clock time from channel open to channel close
    pub elapsed: Duration,

    /// Exit status of the command (if reported)
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// Check if the command succeeded (exit status 0)
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Standard output as text, replacing invalid UTF-8
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error as text, replacing invalid UTF-8
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout_lossy()
        } else if self.stdout.is_empty() {
            self.stderr_lossy()
        } else {
            format!("{}\n{}", self.stdout_lossy(), self.stderr_lossy())
        }
    }
}

/// Everything observed on a channel read to its end
#[derive(Debug, Default)]
pub(crate) struct ChannelOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<u32>,
    pub exit_signal: Option<String>,
    pub cancelled: bool,
}

impl ChannelOutcome {
    /// Turn the outcome into the call result, attaching `output` to failures
    pub fn finish(self, output: CommandOutput) -> Result<CommandOutput> {
        if self.cancelled {
            return Err(ExecError::Cancelled {
                output: Box::new(output),
            });
        }

        if let Some(signal) = self.exit_signal {
            return Err(ExecError::remote(
                format!("Process killed by signal {}", signal),
                output,
            ));
        }

        match self.exit_status {
            Some(0) => Ok(output),
            Some(code) => Err(ExecError::remote(
                format!("Process exited with status {}", code),
                output,
            )),
            None => Err(ExecError::remote(
                "Process exited without reporting an exit status",
                output,
            )),
        }
    }
}

/// Request the fixed-geometry PTY used by every runner
pub(crate) async fn request_pty(channel: &Channel<Msg>) -> Result<()> {
    channel
        .request_pty(true, TERM, TERM_COLUMNS, TERM_ROWS, 0, 0, TERMINAL_MODES)
        .await
        .map_err(|e| ExecError::channel(format!("Failed to request PTY: {}", e)))
}

async fn wait_cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Read a channel until it closes
///
/// Every stdout chunk is also handed to `on_data` as it arrives. If `cancel`
/// fires first, the channel is force-closed and whatever is still in flight
/// is drained for a short grace period.
pub(crate) async fn collect_channel<F>(
    channel: &mut Channel<Msg>,
    cancel: Option<&CancellationToken>,
    mut on_data: F,
) -> ChannelOutcome
where
    F: FnMut(&[u8]),
{
    let mut outcome = ChannelOutcome::default();

    loop {
        let msg = if outcome.cancelled {
            match timeout(CLOSE_GRACE, channel.wait()).await {
                Ok(msg) => msg,
                Err(_) => {
                    warn!(
                        "Channel did not close within {}ms of cancellation",
                        CLOSE_GRACE.as_millis()
                    );
                    break;
                }
            }
        } else {
            tokio::select! {
                msg = channel.wait() => msg,
                _ = wait_cancelled(cancel) => {
                    warn!("Kill signal received, force-closing channel");
                    outcome.cancelled = true;
                    if let Err(e) = channel.close().await {
                        debug!("Channel close failed: {}", e);
                    }
                    continue;
                }
            }
        };

        let Some(msg) = msg else {
            break;
        };

        match msg {
            ChannelMsg::Data { data } => {
                on_data(&data);
                outcome.stdout.extend_from_slice(&data);
            }
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                if ext == 1 {
                    outcome.stderr.extend_from_slice(&data);
                } else {
                    outcome.stdout.extend_from_slice(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                outcome.exit_status = Some(exit_status);
            }
            ChannelMsg::ExitSignal {
                signal_name,
                error_message,
                ..
            } => {
                outcome.exit_signal = Some(format!("{:?} {}", signal_name, error_message));
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    outcome
}

/// Split on newlines, drop trailing carriage returns, join with `\n`
///
/// # Examples
/// ```
/// use remote_exec::ssh::command::assemble_lines;
///
/// assert_eq!(assemble_lines(b"one\r\ntwo\r\n"), b"one\ntwo");
/// ```
pub fn assemble_lines(raw: &[u8]) -> Vec<u8> {
    let mut lines: Vec<&[u8]> = raw
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect();

    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines.join(&b"\n"[..])
}

impl Session {
    /// Execute one command in a PTY-backed channel
    ///
    /// stdout and stderr are captured separately. If `cancel` fires before
    /// the command finishes, the channel is closed and `Cancelled` is
    /// returned with whatever was captured.
    pub async fn run_command(
        &self,
        cancel: Option<&CancellationToken>,
        command: &str,
    ) -> Result<CommandOutput> {
        let command = sanitize_command(command)?;
        let start = Instant::now();

        let mut channel = self.open_channel().await?;
        request_pty(&channel).await?;

        channel
            .exec(true, command.as_str())
            .await
            .map_err(|e| ExecError::channel(format!("Failed to exec command: {}", e)))?;

        let outcome = collect_channel(&mut channel, cancel, |_| {}).await;

        let output = CommandOutput {
            stdout: assemble_lines(&outcome.stdout),
            stderr: assemble_lines(&outcome.stderr),
            elapsed: start.elapsed(),
            exit_status: outcome.exit_status,
        };

        info!(
            "Command executed on {}: exit_status={:?}, elapsed={}ms, stdout_len={}, stderr_len={}",
            self.address(),
            output.exit_status,
            output.elapsed.as_millis(),
            output.stdout.len(),
            output.stderr.len()
        );

        outcome.finish(output)
    }
}
