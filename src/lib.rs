//! remote-exec - bounded-time remote command execution over SSH
//!
//! This crate runs shell commands and pushes files on a remote host over
//! SSH. Every call opens its own session, runs under a deadline, and can be
//! force-terminated through a cancellation token.
//!
//! # Features
//!
//! - Single command runs with separate stdout/stderr capture (`run_command`)
//! - Command batches that answer `sudo` password prompts (`run_privileged_batch`)
//! - File and directory push over the scp sink protocol (`push_file`)
//! - Local command runs with the same deadline semantics (`run_local_command`)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use remote_exec::{executor, ConnectionTarget, Deadlines};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> remote_exec::Result<()> {
//! let target = ConnectionTarget::new("192.168.1.100", "admin").with_password("secret");
//! let kill = CancellationToken::new();
//! let deadlines = Deadlines::new(Duration::from_secs(10), Duration::from_secs(30));
//!
//! let output = executor::run_command(&target, Some(&kill), deadlines, "uptime").await?;
//! println!("{}", output.stdout_lossy());
//! # Ok(())
//! # }
//! ```
//!
//! Logging goes through `tracing`; install a subscriber to see it.

pub mod config;
pub mod error;
pub mod executor;
pub mod local;
pub mod report;
pub mod ssh;

// Re-exports for convenience
pub use config::{Action, Args, Config};
pub use error::{ExecError, Result};
pub use executor::{push_file, run_command, run_privileged_batch, Deadlines};
pub use local::run_local_command;
pub use report::Report;
pub use ssh::{CommandOutput, ConnectionTarget, FileTransferSpec, PromptWatcher, Session};
