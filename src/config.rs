//! Configuration and CLI argument parsing for the remote-exec binary

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::SecretString;

use crate::error::{ExecError, Result};
use crate::executor::Deadlines;
use crate::ssh::ConnectionTarget;

/// Default connect deadline in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000; // 30 seconds

/// Default command deadline in milliseconds
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 60_000; // 60 seconds

/// remote-exec CLI arguments
#[derive(Parser, Clone)]
#[command(name = "remote-exec")]
#[command(version)]
#[command(about = "Run commands and push files on a remote host over SSH with deadlines")]
pub struct Args {
    /// SSH host to connect to
    #[arg(long, env = "REMOTE_EXEC_HOST")]
    pub host: Option<String>,

    /// SSH port
    #[arg(long, default_value = "22", env = "REMOTE_EXEC_PORT")]
    pub port: u16,

    /// SSH username
    #[arg(long, env = "REMOTE_EXEC_USER")]
    pub user: Option<String>,

    /// SSH password, also used to answer sudo prompts
    #[arg(long, env = "REMOTE_EXEC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Path to SSH private key file
    #[arg(long, env = "REMOTE_EXEC_KEY")]
    pub key: Option<PathBuf>,

    /// Connect deadline in milliseconds
    #[arg(long = "connect-timeout", default_value = "30000", env = "REMOTE_EXEC_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Command deadline in milliseconds
    #[arg(long, default_value = "60000", env = "REMOTE_EXEC_TIMEOUT")]
    pub timeout: u64,

    /// Print a JSON report instead of raw output
    #[arg(long, default_value = "false")]
    pub json: bool,

    #[command(subcommand)]
    pub action: Action,
}

/// What to do once connected
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run one command, capturing stdout and stderr separately
    Exec {
        /// Command line to run on the remote host
        command: String,
    },

    /// Run commands as one batch, answering sudo password prompts
    Sudo {
        /// Commands, joined with "; "
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Push a directory and/or file with the scp sink protocol
    Push {
        /// Existing remote directory to push into
        #[arg(long)]
        dest: String,

        /// Directory to create inside the destination
        #[arg(long)]
        dir_name: Option<String>,

        /// Octal permission bits for the new directory
        #[arg(long, default_value = "755", value_parser = parse_mode)]
        dir_mode: u32,

        /// File to create
        #[arg(long)]
        file_name: Option<String>,

        /// Octal permission bits for the new file
        #[arg(long, default_value = "644", value_parser = parse_mode)]
        file_mode: u32,

        /// Local file whose content is sent (empty content if omitted)
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Run a local program with the command deadline
    Local {
        /// Program to run
        program: String,

        /// Arguments passed through unchanged
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

impl Action {
    /// Whether the action talks to a remote host
    pub fn is_remote(&self) -> bool {
        !matches!(self, Action::Local { .. })
    }
}

/// Parsed and validated configuration
#[derive(Debug)]
pub struct Config {
    /// SSH host
    pub host: String,

    /// SSH port
    pub port: u16,

    /// SSH username
    pub user: String,

    /// SSH password
    pub password: Option<SecretString>,

    /// Path to SSH private key
    pub key: Option<PathBuf>,

    /// Connect and command deadlines
    pub deadlines: Deadlines,

    /// Emit JSON reports
    pub json: bool,

    /// Requested action
    pub action: Action,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        Ok(Config {
            host: args.host.unwrap_or_default(),
            port: args.port,
            user: args.user.unwrap_or_default(),
            password: args
                .password
                .filter(|p| !p.is_empty())
                .map(SecretString::new),
            key: args.key,
            deadlines: Deadlines::new(
                Duration::from_millis(args.connect_timeout),
                Duration::from_millis(args.timeout),
            ),
            json: args.json,
            action: args.action,
        })
    }

    /// Build the connection target, reading the key file if one was given
    pub async fn connection_target(&self) -> Result<ConnectionTarget> {
        use secrecy::ExposeSecret;

        let mut target = ConnectionTarget::new(&self.host, &self.user).with_port(self.port);

        if let Some(ref password) = self.password {
            target = target.with_password(password.expose_secret().as_str());
        }

        if let Some(ref key_path) = self.key {
            let key_content = tokio::fs::read_to_string(key_path).await?;
            target = target.with_private_key(key_content);
        }

        Ok(target)
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.timeout == 0 {
        errors.push("--timeout must be greater than 0".to_string());
    }

    if args.action.is_remote() {
        if args.host.as_deref().unwrap_or("").is_empty() {
            errors.push("Missing required --host".to_string());
        }

        if args.user.as_deref().unwrap_or("").is_empty() {
            errors.push("Missing required --user".to_string());
        }

        if args.connect_timeout == 0 {
            errors.push("--connect-timeout must be greater than 0".to_string());
        }

        // Must have either password or key
        if args.password.as_deref().unwrap_or("").is_empty() && args.key.is_none() {
            errors.push("Must provide either --password or --key".to_string());
        }

        if let Some(ref key_path) = args.key {
            if !key_path.exists() {
                errors.push(format!("SSH key file not found: {}", key_path.display()));
            }
        }
    }

    if let Action::Push {
        source: Some(ref source),
        ..
    } = args.action
    {
        if !source.exists() {
            errors.push(format!("Source file not found: {}", source.display()));
        }
    }

    if !errors.is_empty() {
        return Err(ExecError::config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

/// Parse octal permission bits such as `755`, `0644` or `0o600`
pub fn parse_mode(value: &str) -> std::result::Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| format!("invalid octal permission bits: {}", value))?;

    if mode > 0o7777 {
        return Err(format!("permission bits out of range: {}", value));
    }

    Ok(mode)
}
