//! Command sanitization and escaping utilities
//!
//! Provides functions for validating and escaping commands before SSH execution.

use crate::error::{ExecError, Result};

/// Separator used to join a batch of commands into one command line
pub const COMMAND_SEPARATOR: &str = "; ";

/// Sanitize a command before execution
///
/// Trims whitespace and rejects empty commands.
///
/// # Examples
/// ```
/// use remote_exec::ssh::sanitize::sanitize_command;
///
/// let cmd = sanitize_command("  ls -la  ").unwrap();
/// assert_eq!(cmd, "ls -la");
///
/// assert!(sanitize_command("   ").is_err());
/// ```
pub fn sanitize_command(command: &str) -> Result<String> {
    let trimmed = command.trim();

    if trimmed.is_empty() {
        return Err(ExecError::invalid_params("Command cannot be empty"));
    }

    Ok(trimmed.to_string())
}

/// Join a batch of commands into a single command line
///
/// Blank entries are dropped; an empty batch is rejected.
///
/// # Examples
/// ```
/// use remote_exec::ssh::sanitize::join_commands;
///
/// let line = join_commands(&["sudo -k", " sudo id "]).unwrap();
/// assert_eq!(line, "sudo -k; sudo id");
/// ```
pub fn join_commands<S: AsRef<str>>(commands: &[S]) -> Result<String> {
    let parts: Vec<&str> = commands
        .iter()
        .map(|c| c.as_ref().trim())
        .filter(|c| !c.is_empty())
        .collect();

    if parts.is_empty() {
        return Err(ExecError::invalid_params("Command batch cannot be empty"));
    }

    Ok(parts.join(COMMAND_SEPARATOR))
}

/// Escape a string for use inside single quotes in a shell command
///
/// # Example
/// ```
/// use remote_exec::ssh::sanitize::escape_for_shell;
///
/// let escaped = escape_for_shell("it's");
/// assert_eq!(escaped, "it'\"'\"'s");
/// ```
pub fn escape_for_shell(s: &str) -> String {
    // 'word' becomes '"'"'word'"'"'
    s.replace('\'', "'\"'\"'")
}
