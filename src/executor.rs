//! Deadline and cancellation wrapper
//!
//! Every call here opens a fresh [`Session`], runs one operation on a
//! background task raced against the command deadline, and closes the
//! session before returning, whatever happened.
//!
//! ```text
//! connecting --(timeout)--------------------------> timed-out
//!     |
//!     v
//!  running --(task finished)--> completed
//!     |
//!     +-----(timeout: cancel token, if any)-------> timed-out
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS};
use crate::error::{ExecError, Result};
use crate::ssh::{
    join_commands, sanitize_command, CommandOutput, ConnectionTarget, FileTransferSpec, Session,
};

/// Time limits for the two phases of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Limit for dial + authentication
    pub connect: Duration,

    /// Limit for the operation once connected
    pub command: Duration,
}

impl Deadlines {
    pub fn new(connect: Duration, command: Duration) -> Self {
        Self { connect, command }
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            command: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

/// Open one authenticated session
pub async fn connect(target: &ConnectionTarget, timeout: Duration) -> Result<Session> {
    Session::connect(target, timeout).await
}

/// Run one command and capture stdout, stderr and elapsed time
///
/// On timeout `cancel` (if supplied) is cancelled so the remote command's
/// channel is closed, and `CommandDeadlineExceeded` is returned.
pub async fn run_command(
    target: &ConnectionTarget,
    cancel: Option<&CancellationToken>,
    deadlines: Deadlines,
    command: &str,
) -> Result<CommandOutput> {
    let command = sanitize_command(command)?;
    let token = cancel.cloned();

    with_session(target, cancel, deadlines, "ssh command", move |session| async move {
        session.run_command(token.as_ref(), &command).await
    })
    .await
}

/// Run a batch of commands, answering sudo password prompts
pub async fn run_privileged_batch<S: AsRef<str>>(
    target: &ConnectionTarget,
    deadlines: Deadlines,
    commands: &[S],
) -> Result<Vec<u8>> {
    let commands: Vec<String> = commands.iter().map(|c| c.as_ref().to_string()).collect();
    join_commands(&commands)?;

    with_session(target, None, deadlines, "sudo command batch", move |session| async move {
        session.run_privileged_batch(&commands).await
    })
    .await
}

/// Push a directory and/or file through the SCP sink protocol
pub async fn push_file(
    target: &ConnectionTarget,
    cancel: Option<&CancellationToken>,
    deadlines: Deadlines,
    spec: &FileTransferSpec,
) -> Result<Duration> {
    spec.validate()?;
    let spec = spec.clone();
    let token = cancel.cloned();

    with_session(target, cancel, deadlines, "scp transfer", move |session| async move {
        session.push_file(token.as_ref(), &spec).await
    })
    .await
}

/// Connect, run `op` under the command deadline, then close the session
async fn with_session<T, F, Fut>(
    target: &ConnectionTarget,
    cancel: Option<&CancellationToken>,
    deadlines: Deadlines,
    label: &'static str,
    op: F,
) -> Result<T>
where
    F: FnOnce(Arc<Session>) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let session = Arc::new(Session::connect(target, deadlines.connect).await?);

    let result = race_deadline(cancel, deadlines.command, label, op(Arc::clone(&session))).await;

    if let Err(ref e) = result {
        error!("{} on {} failed: {}", label, session.address(), e);
    }

    session.close().await;
    result
}

/// Run `operation` on a background task and race it against `deadline`
///
/// If the deadline wins, `cancel` is cancelled (a second cancel is a no-op)
/// and the task is detached; its result is discarded.
async fn race_deadline<T, Fut>(
    cancel: Option<&CancellationToken>,
    deadline: Duration,
    label: &'static str,
    operation: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::spawn(operation);

    tokio::select! {
        joined = &mut task => match joined {
            Ok(result) => result,
            Err(e) => {
                error!("{} task failed: {}", label, e);
                Err(ExecError::Internal(format!("{} task failed: {}", label, e)))
            }
        },
        _ = tokio::time::sleep(deadline) => {
            error!("{} deadline exceeded after {}ms", label, deadline.as_millis());
            match cancel {
                Some(token) => {
                    token.cancel();
                    debug!("Kill signal sent to {}", label);
                }
                None => warn!(
                    "No kill signal for {}; it keeps running until the session closes",
                    label
                ),
            }
            Err(ExecError::CommandDeadlineExceeded(deadline.as_millis() as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_race_completes_before_deadline() {
        let result = race_deadline(None, Duration::from_secs(5), "test", async {
            Ok::<_, ExecError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_race_passes_operation_error_through() {
        let result: Result<()> = race_deadline(None, Duration::from_secs(5), "test", async {
            Err::<(), _>(ExecError::channel("boom"))
        })
        .await;
        assert!(matches!(result, Err(ExecError::RemoteExecution { .. })));
    }

    #[tokio::test]
    async fn test_race_deadline_cancels_token() {
        let token = CancellationToken::new();
        let watched = token.clone();
        let started = Instant::now();

        let result: Result<()> = race_deadline(
            Some(&token),
            Duration::from_millis(50),
            "test",
            async move {
                watched.cancelled().await;
                Err::<(), _>(ExecError::Cancelled {
                    output: Box::default(),
                })
            },
        )
        .await;

        assert!(matches!(result, Err(ExecError::CommandDeadlineExceeded(50))));
        assert!(token.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_race_deadline_without_token() {
        let result: Result<()> = race_deadline(None, Duration::from_millis(20), "test", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), ExecError>(())
        })
        .await;
        assert!(matches!(result, Err(ExecError::CommandDeadlineExceeded(20))));
    }

    #[tokio::test]
    async fn test_second_cancel_is_noop() {
        let token = CancellationToken::new();
        for _ in 0..2 {
            let result: Result<()> =
                race_deadline(Some(&token), Duration::from_millis(10), "test", async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<(), ExecError>(())
                })
                .await;
            assert!(result.is_err());
        }
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_race_contains_panic() {
        let result: Result<()> = race_deadline(None, Duration::from_secs(5), "test", async {
            let fail = true;
            if fail {
                panic!("operation blew up");
            }
            Ok::<(), ExecError>(())
        })
        .await;
        assert!(matches!(result, Err(ExecError::Internal(_))));
    }

    #[tokio::test]
    async fn test_run_command_rejects_empty_before_connecting() {
        let target = ConnectionTarget::new("127.0.0.1", "test").with_password("test");
        let result = run_command(&target, None, Deadlines::default(), "  ").await;
        assert!(matches!(result, Err(ExecError::InvalidParams(_))));
    }

    #[tokio::test]
    async fn test_unreachable_target_never_runs() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = ConnectionTarget::new("127.0.0.1", "test")
            .with_port(port)
            .with_password("test");
        let token = CancellationToken::new();
        let deadlines = Deadlines::new(Duration::from_secs(10), Duration::from_secs(10));

        let result = run_command(&target, Some(&token), deadlines, "sleep 100").await;
        assert!(matches!(result, Err(ExecError::BadIpOrPort(_))));
        assert!(!token.is_cancelled());

        let spec = FileTransferSpec::new("/tmp").with_file("f", 0o644, "x");
        let result = push_file(&target, None, deadlines, &spec).await;
        assert!(matches!(result, Err(ExecError::BadIpOrPort(_))));

        let result = run_privileged_batch(&target, deadlines, &["sudo id"]).await;
        assert!(matches!(result, Err(ExecError::BadIpOrPort(_))));
    }

    #[test]
    fn test_default_deadlines() {
        let deadlines = Deadlines::default();
        assert_eq!(deadlines.connect, Duration::from_secs(30));
        assert_eq!(deadlines.command, Duration::from_secs(60));
    }
}
