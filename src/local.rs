//! Local command execution with a deadline

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{ExecError, Result};

/// Run a local program and return its stdout
///
/// The child is killed if the deadline passes first.
pub async fn run_local_command<S: AsRef<str>>(
    timeout: Duration,
    program: &str,
    args: &[S],
) -> Result<Vec<u8>> {
    let mut command = Command::new(program);
    command
        .args(args.iter().map(|a| a.as_ref()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running local command: {}", program);

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn local command {}: {}", program, e);
        ExecError::LocalExecution {
            message: format!("{}: {}", program, e),
            output: Vec::new(),
        }
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            error!("Local command {} failed: {}", program, e);
            return Err(ExecError::LocalExecution {
                message: format!("{}: {}", program, e),
                output: Vec::new(),
            });
        }
        Err(_) => {
            error!(
                "Local command {} deadline exceeded after {}ms",
                program,
                timeout.as_millis()
            );
            return Err(ExecError::CommandDeadlineExceeded(timeout.as_millis() as u64));
        }
    };

    if !output.status.success() {
        error!(
            "Local command {} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Err(ExecError::LocalExecution {
            message: format!("{}: {}", program, output.status),
            output: output.stdout,
        });
    }

    Ok(output.stdout)
}
