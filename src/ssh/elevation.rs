//! Privileged batch execution
//!
//! Runs a list of commands as one PTY command line and answers sudo's
//! password prompt with the password the session authenticated with.

use std::time::Instant;

use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command::{collect_channel, request_pty, CommandOutput};
use super::connection::Session;
use super::sanitize::join_commands;
use crate::error::{ExecError, Result};

/// Start of the prompt line sudo prints when it wants a password
pub const SUDO_PROMPT_PREFIX: &str = "[sudo] password for ";

/// End of the prompt line; sudo does not print a newline after it
pub const SUDO_PROMPT_SUFFIX: &str = ": ";

/// Streaming matcher for the sudo password prompt
///
/// Bytes are fed one at a time. The current line resets on `\n`, and a
/// match is reported as soon as the line has the prompt prefix and ends
/// with the suffix, without waiting for a newline.
#[derive(Debug, Default)]
pub struct PromptWatcher {
    line: Vec<u8>,
}

impl PromptWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output byte; returns true when a prompt has just appeared
    pub fn feed(&mut self, byte: u8) -> bool {
        if byte == b'\n' {
            self.line.clear();
            return false;
        }

        self.line.push(byte);

        self.line.starts_with(SUDO_PROMPT_PREFIX.as_bytes())
            && self.line.ends_with(SUDO_PROMPT_SUFFIX.as_bytes())
    }
}

/// Watch output chunks and answer every sudo prompt with the password
///
/// Returns the number of prompts answered. Stops at the first write error.
async fn answer_sudo_prompts<W>(
    mut chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    writer: W,
    password: SecretString,
) -> usize
where
    W: AsyncWrite + Send + 'static,
{
    let mut writer = Box::pin(writer);
    let mut watcher = PromptWatcher::new();
    let mut answered = 0;

    while let Some(chunk) = chunks.recv().await {
        for &byte in &chunk {
            if !watcher.feed(byte) {
                continue;
            }

            debug!("sudo password prompt detected, sending password");

            let mut reply = password.expose_secret().as_bytes().to_vec();
            reply.push(b'\n');

            if let Err(e) = writer.write_all(&reply).await {
                warn!("Failed to send sudo password: {}", e);
                return answered;
            }
            answered += 1;
        }
    }

    answered
}

/// Collect the prompt watcher after the channel has closed
///
/// Faults inside the watcher are logged and never reach the caller. A
/// watcher still blocked on a write is aborted. Returns the number of
/// prompts answered, if the watcher finished normally.
async fn join_watcher(watcher: JoinHandle<usize>) -> Option<usize> {
    if !watcher.is_finished() {
        watcher.abort();
    }

    match watcher.await {
        Ok(answered) => {
            debug!("Prompt watcher answered {} sudo prompt(s)", answered);
            Some(answered)
        }
        Err(e) if e.is_panic() => {
            error!("Internal fault in sudo prompt watcher, recovered: {}", e);
            None
        }
        Err(e) => {
            warn!("Sudo prompt watcher did not finish: {}", e);
            None
        }
    }
}

impl Session {
    /// Run a batch of commands (may use sudo) as one command line
    ///
    /// Commands are joined with `"; "`. stderr is not captured; the PTY
    /// output is returned as-is.
    pub async fn run_privileged_batch<S: AsRef<str>>(&self, commands: &[S]) -> Result<Vec<u8>> {
        let command_line = join_commands(commands)?;
        let start = Instant::now();

        let mut channel = self.open_channel().await?;
        request_pty(&channel).await?;

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let password = SecretString::new(self.password().expose_secret().clone());
        let watcher = tokio::spawn(answer_sudo_prompts(
            chunk_rx,
            channel.make_writer(),
            password,
        ));

        if let Err(e) = channel.exec(true, command_line.as_str()).await {
            watcher.abort();
            return Err(ExecError::channel(format!(
                "Failed to exec command batch: {}",
                e
            )));
        }

        let mut outcome = collect_channel(&mut channel, None, |chunk| {
            let _ = chunk_tx.send(chunk.to_vec());
        })
        .await;
        drop(chunk_tx);

        join_watcher(watcher).await;

        let output = CommandOutput {
            stdout: std::mem::take(&mut outcome.stdout),
            stderr: Vec::new(),
            elapsed: start.elapsed(),
            exit_status: outcome.exit_status,
        };

        info!(
            "Command batch executed on {}: exit_status={:?}, elapsed={}ms, output_len={}",
            self.address(),
            output.exit_status,
            output.elapsed.as_millis(),
            output.stdout.len()
        );

        outcome.finish(output).map(|output| output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::command::ChannelOutcome;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn feed_all(watcher: &mut PromptWatcher, bytes: &[u8]) -> Vec<usize> {
        bytes
            .iter()
            .enumerate()
            .filter_map(|(i, b)| watcher.feed(*b).then_some(i))
            .collect()
    }

    #[test]
    fn test_prompt_detected_without_newline() {
        let mut watcher = PromptWatcher::new();
        let prompt = b"[sudo] password for alice: ";
        let hits = feed_all(&mut watcher, prompt);
        assert_eq!(hits, vec![prompt.len() - 1]);
    }

    #[test]
    fn test_prompt_after_other_output() {
        let mut watcher = PromptWatcher::new();
        let stream = b"Reading package lists...\r\n[sudo] password for bob: ";
        let hits = feed_all(&mut watcher, stream);
        assert_eq!(hits, vec![stream.len() - 1]);
    }

    #[test]
    fn test_prompt_must_start_the_line() {
        let mut watcher = PromptWatcher::new();
        assert!(feed_all(&mut watcher, b"echo [sudo] password for alice: ").is_empty());
    }

    #[test]
    fn test_line_resets_on_newline() {
        let mut watcher = PromptWatcher::new();
        assert!(feed_all(&mut watcher, b"[sudo] password for\nalice: ").is_empty());
    }

    #[test]
    fn test_unrelated_colon_lines_ignored() {
        let mut watcher = PromptWatcher::new();
        assert!(feed_all(&mut watcher, b"Password: \nuser: \n").is_empty());
    }

    #[tokio::test]
    async fn test_password_sent_as_soon_as_prompt_appears() {
        let (writer, mut remote) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(answer_sudo_prompts(
            rx,
            writer,
            SecretString::new("s3cret".to_string()),
        ));

        tx.send(b"[sudo] pass".to_vec()).unwrap();
        tx.send(b"word for alice: ".to_vec()).unwrap();

        let mut reply = [0u8; 7];
        remote.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"s3cret\n");

        drop(tx);
        assert_eq!(task.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_prompt_no_write() {
        let (writer, mut remote) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(answer_sudo_prompts(
            rx,
            writer,
            SecretString::new("s3cret".to_string()),
        ));

        tx.send(b"uid=0(root) gid=0(root)\r\n".to_vec()).unwrap();
        drop(tx);
        assert_eq!(task.await.unwrap(), 0);

        // Writer was dropped with the task, so the remote end sees EOF
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    async fn finished<T>(task: &JoinHandle<T>) {
        while !task.is_finished() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_watcher_fault_is_contained() {
        let watcher = tokio::spawn(async {
            let fail = true;
            if fail {
                panic!("watcher fault");
            }
            0usize
        });
        finished(&watcher).await;

        assert_eq!(join_watcher(watcher).await, None);

        // The batch result still comes from what the channel reported
        let outcome = ChannelOutcome {
            stdout: b"uid=0(root)".to_vec(),
            exit_status: Some(0),
            ..Default::default()
        };
        let output = CommandOutput {
            stdout: outcome.stdout.clone(),
            exit_status: outcome.exit_status,
            ..Default::default()
        };
        assert_eq!(outcome.finish(output).unwrap().stdout, b"uid=0(root)");
    }

    #[tokio::test]
    async fn test_join_watcher_returns_answer_count() {
        let watcher = tokio::spawn(async { 2usize });
        finished(&watcher).await;
        assert_eq!(join_watcher(watcher).await, Some(2));
    }

    #[tokio::test]
    async fn test_join_watcher_aborts_blocked_watcher() {
        let (_chunk_tx, chunk_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (writer, _reader) = tokio::io::duplex(8);
        let watcher = tokio::spawn(answer_sudo_prompts(
            chunk_rx,
            writer,
            SecretString::new("pw".to_string()),
        ));

        let joined = tokio::time::timeout(Duration::from_secs(5), join_watcher(watcher))
            .await
            .unwrap();
        assert_eq!(joined, None);
    }
}
