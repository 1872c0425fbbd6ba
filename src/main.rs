//! remote-exec - Entry point
//!
//! Parses CLI arguments, validates configuration, runs one remote or local
//! call and prints its report. Ctrl+C cancels the in-flight call.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use remote_exec::config::{Action, Args, Config};
use remote_exec::error::Result;
use remote_exec::{executor, local, FileTransferSpec, Report};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only command output
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_args(args)?;

    info!("remote-exec v{} starting...", env!("CARGO_PKG_VERSION"));
    if config.action.is_remote() {
        info!(
            "Target {}@{}:{}, connect timeout {}ms, command timeout {}ms",
            config.user,
            config.host,
            config.port,
            config.deadlines.connect.as_millis(),
            config.deadlines.command.as_millis()
        );
    }

    let kill = CancellationToken::new();
    let interrupt = {
        let kill = kill.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT (Ctrl+C), cancelling...");
                kill.cancel();
            }
        })
    };

    let report = run(&config, &kill).await?;
    interrupt.abort();

    report.emit(config.json)?;

    if !report.success {
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: &Config, kill: &CancellationToken) -> Result<Report> {
    let report = match &config.action {
        Action::Exec { command } => {
            let target = config.connection_target().await?;
            let result =
                executor::run_command(&target, Some(kill), config.deadlines, command).await;
            Report::from_command("exec", &result)
        }
        Action::Sudo { commands } => {
            let target = config.connection_target().await?;
            let result =
                executor::run_privileged_batch(&target, config.deadlines, commands.as_slice())
                    .await;
            Report::from_output("sudo", &result)
        }
        Action::Push {
            dest,
            dir_name,
            dir_mode,
            file_name,
            file_mode,
            source,
        } => {
            let target = config.connection_target().await?;
            let content = match source {
                Some(path) => tokio::fs::read(path).await?,
                None => Vec::new(),
            };

            let mut spec = FileTransferSpec::new(dest);
            if let Some(name) = dir_name {
                spec = spec.with_subdirectory(name, *dir_mode);
            }
            if let Some(name) = file_name {
                spec = spec.with_file(name, *file_mode, content);
            }

            let result = executor::push_file(&target, Some(kill), config.deadlines, &spec).await;
            Report::from_transfer("push", &result)
        }
        Action::Local { program, args } => {
            let result =
                local::run_local_command(config.deadlines.command, program, args.as_slice())
                    .await;
            Report::from_output("local", &result)
        }
    };

    Ok(report)
}
