//! Result reports printed by the binary

use std::io::Write;
use std::time::Duration;

use serde::Serialize;

use crate::error::{ExecError, Result};
use crate::ssh::CommandOutput;

/// Outcome of one call, in a form fit for printing or JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub action: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Report {
    fn empty(action: &str) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_ms: None,
            exit_status: None,
            error: None,
        }
    }

    fn with_output(mut self, output: &CommandOutput) -> Self {
        self.stdout = output.stdout_lossy();
        self.stderr = output.stderr_lossy();
        self.elapsed_ms = Some(output.elapsed.as_millis() as u64);
        self.exit_status = output.exit_status;
        self
    }

    fn with_error(mut self, err: &ExecError) -> Self {
        self.success = false;
        self.error = Some(err.to_string());

        match err {
            ExecError::LocalExecution { output, .. } => {
                self.stdout = String::from_utf8_lossy(output).into_owned();
                self
            }
            _ => match err.output() {
                Some(output) => self.with_output(output),
                None => self,
            },
        }
    }

    /// Report for a single command run
    pub fn from_command(action: &str, result: &Result<CommandOutput>) -> Self {
        match result {
            Ok(output) => Self::empty(action).with_output(output),
            Err(e) => Self::empty(action).with_error(e),
        }
    }

    /// Report for a call that returns plain output bytes
    pub fn from_output(action: &str, result: &Result<Vec<u8>>) -> Self {
        match result {
            Ok(bytes) => {
                let mut report = Self::empty(action);
                report.stdout = String::from_utf8_lossy(bytes).into_owned();
                report
            }
            Err(e) => Self::empty(action).with_error(e),
        }
    }

    /// Report for a file push
    pub fn from_transfer(action: &str, result: &Result<Duration>) -> Self {
        match result {
            Ok(elapsed) => {
                let mut report = Self::empty(action);
                report.elapsed_ms = Some(elapsed.as_millis() as u64);
                report
            }
            Err(e) => Self::empty(action).with_error(e),
        }
    }

    /// Write the report: JSON on stdout, or raw stdout/stderr plus the error
    pub fn emit(&self, json: bool) -> Result<()> {
        if json {
            let rendered = serde_json::to_string_pretty(self)?;
            println!("{}", rendered);
            return Ok(());
        }

        let mut stdout = std::io::stdout().lock();
        if !self.stdout.is_empty() {
            writeln!(stdout, "{}", self.stdout)?;
        }

        let mut stderr = std::io::stderr().lock();
        if !self.stderr.is_empty() {
            writeln!(stderr, "{}", self.stderr)?;
        }
        if let Some(ref error) = self.error {
            writeln!(stderr, "Error: {}", error)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_report_success() {
        let output = CommandOutput {
            stdout: b"up 3 days".to_vec(),
            stderr: Vec::new(),
            elapsed: Duration::from_millis(120),
            exit_status: Some(0),
        };
        let report = Report::from_command("exec", &Ok(output));
        assert!(report.success);
        assert_eq!(report.stdout, "up 3 days");
        assert_eq!(report.elapsed_ms, Some(120));
        assert_eq!(report.exit_status, Some(0));
    }

    #[test]
    fn test_command_report_remote_failure_keeps_output() {
        let output = CommandOutput {
            stderr: b"ls: cannot access".to_vec(),
            exit_status: Some(2),
            ..Default::default()
        };
        let result = Err(ExecError::remote("Process exited with status 2", output));
        let report = Report::from_command("exec", &result);
        assert!(!report.success);
        assert_eq!(report.stderr, "ls: cannot access");
        assert_eq!(report.exit_status, Some(2));
    }

    #[test]
    fn test_transfer_report_json() {
        let report = Report::from_transfer("push", &Ok(Duration::from_millis(7)));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["action"], "push");
        assert_eq!(json["success"], true);
        assert_eq!(json["elapsed_ms"], 7);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_deadline_report() {
        let result: Result<Vec<u8>> = Err(ExecError::CommandDeadlineExceeded(1000));
        let report = Report::from_output("sudo", &result);
        assert!(!report.success);
        assert_eq!(
            report.error.as_deref(),
            Some("Command deadline exceeded after 1000ms")
        );
    }

    #[test]
    fn test_local_failure_report() {
        let result: Result<Vec<u8>> = Err(ExecError::LocalExecution {
            message: "false: exit status: 1".to_string(),
            output: b"half".to_vec(),
        });
        let report = Report::from_output("local", &result);
        assert_eq!(report.stdout, "half");
        assert!(!report.success);
    }
}
