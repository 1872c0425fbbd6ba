//! Push-mode file transfer over the SCP sink protocol
//!
//! The remote side runs `scp -tr <destination>`; we send an optional
//! directory directive, an optional file directive followed by its content,
//! and a single NUL byte as the end-of-transfer marker.

use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::command::{collect_channel, CommandOutput};
use super::connection::Session;
use super::sanitize::escape_for_shell;
use crate::error::{ExecError, Result};

/// Receiver binary started on the remote side
pub const DEFAULT_SCP_BINARY: &str = "/usr/bin/scp";

/// Permission bits used when none are given for a new directory
pub const DEFAULT_DIRECTORY_MODE: u32 = 0o755;

/// Permission bits used when none are given for a new file
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Sent after all directives and content
pub const END_OF_TRANSFER: u8 = 0x00;

/// Sink reply bytes that introduce a warning or fatal error line
const SINK_WARNING: u8 = 0x01;
const SINK_FATAL: u8 = 0x02;

/// What to create under a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferSpec {
    /// Existing remote directory the receiver is started in
    pub destination_directory: String,

    /// Directory to create inside the destination (skipped when empty)
    pub subdirectory_name: Option<String>,

    /// Permission bits of the new directory
    pub subdirectory_mode: u32,

    /// File to create (skipped when empty)
    pub file_name: Option<String>,

    /// Permission bits of the new file
    pub file_mode: u32,

    /// File content, sent verbatim
    pub content: Vec<u8>,
}

impl FileTransferSpec {
    /// Transfer into `destination_directory` that creates nothing yet
    pub fn new(destination_directory: impl Into<String>) -> Self {
        Self {
            destination_directory: destination_directory.into(),
            subdirectory_name: None,
            subdirectory_mode: DEFAULT_DIRECTORY_MODE,
            file_name: None,
            file_mode: DEFAULT_FILE_MODE,
            content: Vec::new(),
        }
    }

    /// Create a subdirectory with the given permission bits
    pub fn with_subdirectory(mut self, name: impl Into<String>, mode: u32) -> Self {
        self.subdirectory_name = Some(name.into());
        self.subdirectory_mode = mode;
        self
    }

    /// Create a file with the given permission bits and content
    pub fn with_file(
        mut self,
        name: impl Into<String>,
        mode: u32,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.file_name = Some(name.into());
        self.file_mode = mode;
        self.content = content.into();
        self
    }

    fn subdirectory(&self) -> Option<&str> {
        self.subdirectory_name.as_deref().filter(|n| !n.is_empty())
    }

    fn file(&self) -> Option<&str> {
        self.file_name.as_deref().filter(|n| !n.is_empty())
    }

    /// Reject transfers the sink protocol cannot express
    pub fn validate(&self) -> Result<()> {
        if self.destination_directory.trim().is_empty() {
            return Err(ExecError::invalid_params(
                "Destination directory cannot be empty",
            ));
        }

        for name in [self.subdirectory(), self.file()].into_iter().flatten() {
            if name.contains(['/', '\n']) || name == "." || name == ".." {
                return Err(ExecError::invalid_params(format!(
                    "Invalid name for transfer: {:?}",
                    name
                )));
            }
        }

        for mode in [self.subdirectory_mode, self.file_mode] {
            if mode > 0o7777 {
                return Err(ExecError::invalid_params(format!(
                    "Invalid permission bits: {:o}",
                    mode
                )));
            }
        }

        Ok(())
    }

    /// Remote command that receives the transfer
    pub fn receiver_command(&self, scp_binary: &str) -> String {
        format!(
            "{} -tr '{}'",
            scp_binary,
            escape_for_shell(&self.destination_directory)
        )
    }

    /// Full byte stream sent to the receiver
    ///
    /// # Examples
    /// ```
    /// use remote_exec::ssh::scp::FileTransferSpec;
    ///
    /// let spec = FileTransferSpec::new("/tmp").with_file("a.txt", 0o600, "hi");
    /// assert_eq!(spec.encode(), b"C0600 2 a.txt\nhi\x00");
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.content.len() + 64);

        if let Some(name) = self.subdirectory() {
            payload.extend_from_slice(
                format!("D{:04o} 0 {}\n", self.subdirectory_mode, name).as_bytes(),
            );
        }

        if let Some(name) = self.file() {
            payload.extend_from_slice(
                format!("C{:04o} {} {}\n", self.file_mode, self.content.len(), name).as_bytes(),
            );
            payload.extend_from_slice(&self.content);
        }

        payload.push(END_OF_TRANSFER);
        payload
    }
}

/// Collect the text of warning/fatal lines the sink wrote to stdout
fn sink_messages(stdout: &[u8]) -> Option<String> {
    let messages: Vec<String> = stdout
        .split(|b| *b == b'\n')
        .filter_map(|line| {
            let start = line
                .iter()
                .position(|b| *b == SINK_WARNING || *b == SINK_FATAL)?;
            let text = String::from_utf8_lossy(&line[start + 1..]).trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .collect();

    (!messages.is_empty()).then(|| messages.join("; "))
}

async fn write_transfer<W>(writer: W, payload: Vec<u8>) -> std::io::Result<()>
where
    W: AsyncWrite + Send + 'static,
{
    let mut writer = Box::pin(writer);
    writer.write_all(&payload).await?;
    writer.flush().await?;
    // Shutting the writer down sends EOF so the receiver exits
    writer.shutdown().await
}

/// Wait for the payload writer once the channel has closed
///
/// A writer still pending at this point can never finish (a closed channel
/// never reopens its window), so it is aborted. Returns whether the whole
/// payload was written.
async fn join_writer(writer: JoinHandle<std::io::Result<()>>) -> bool {
    if !writer.is_finished() {
        writer.abort();
    }

    match writer.await {
        Ok(Ok(())) => {
            debug!("scp payload written");
            true
        }
        Ok(Err(e)) => {
            error!("Failed to write scp payload: {}", e);
            false
        }
        Err(e) if e.is_cancelled() => {
            debug!("scp writer stopped with payload unsent");
            false
        }
        Err(e) => {
            error!("scp writer task failed: {}", e);
            false
        }
    }
}

impl Session {
    /// Push a directory and/or file to the remote side
    ///
    /// Returns how long the transfer took. A failed transfer may leave a
    /// partially written file or directory behind.
    pub async fn push_file(
        &self,
        cancel: Option<&CancellationToken>,
        spec: &FileTransferSpec,
    ) -> Result<Duration> {
        spec.validate()?;
        let start = Instant::now();

        let mut channel = self.open_channel().await?;
        let receiver = spec.receiver_command(DEFAULT_SCP_BINARY);

        debug!("Starting scp receiver on {}: {}", self.address(), receiver);

        channel
            .exec(true, receiver.as_str())
            .await
            .map_err(|e| ExecError::channel(format!("Failed to start scp receiver: {}", e)))?;

        let writer = tokio::spawn(write_transfer(channel.make_writer(), spec.encode()));

        let outcome = collect_channel(&mut channel, cancel, |_| {}).await;
        join_writer(writer).await;

        let output = CommandOutput {
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
            elapsed: start.elapsed(),
            exit_status: outcome.exit_status,
        };

        info!(
            "scp transfer to {}:{} finished: exit_status={:?}, elapsed={}ms",
            self.address(),
            spec.destination_directory,
            output.exit_status,
            output.elapsed.as_millis()
        );

        outcome
            .finish(output)
            .map(|output| output.elapsed)
            .map_err(|e| match e {
                ExecError::RemoteExecution { message, output } => {
                    let message = match sink_messages(&output.stdout) {
                        Some(detail) => format!("{}: {}", message, detail),
                        None => message,
                    };
                    ExecError::RemoteExecution { message, output }
                }
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_encode_directory_and_file() {
        let spec = FileTransferSpec::new("/srv")
            .with_subdirectory("conf", 0o755)
            .with_file("app.toml", 0o640, "port = 80\n");
        assert_eq!(
            spec.encode(),
            b"D0755 0 conf\nC0640 10 app.toml\nport = 80\n\x00".to_vec()
        );
    }

    #[test]
    fn test_encode_nothing_still_ends_transfer() {
        let spec = FileTransferSpec::new("/srv");
        assert_eq!(spec.encode(), vec![END_OF_TRANSFER]);
    }

    #[test]
    fn test_encode_empty_names_are_skipped() {
        let spec = FileTransferSpec::new("/srv")
            .with_subdirectory("", 0o700)
            .with_file("", 0o600, "ignored");
        assert_eq!(spec.encode(), vec![END_OF_TRANSFER]);
    }

    #[test]
    fn test_encode_binary_content_length() {
        let content = vec![0u8, 159, 146, 150, b'\n'];
        let spec = FileTransferSpec::new("/srv").with_file("blob", 0o600, content.clone());
        let encoded = spec.encode();
        let header = b"C0600 5 blob\n";
        assert_eq!(&encoded[..header.len()], header);
        assert_eq!(&encoded[header.len()..encoded.len() - 1], content.as_slice());
        assert_eq!(encoded.last(), Some(&END_OF_TRANSFER));
    }

    #[test]
    fn test_default_modes() {
        let spec = FileTransferSpec::new("/srv");
        assert_eq!(spec.subdirectory_mode, DEFAULT_DIRECTORY_MODE);
        assert_eq!(spec.file_mode, DEFAULT_FILE_MODE);
    }

    #[test]
    fn test_receiver_command_quotes_destination() {
        let spec = FileTransferSpec::new("/home/o'brien/in box");
        assert_eq!(
            spec.receiver_command(DEFAULT_SCP_BINARY),
            "/usr/bin/scp -tr '/home/o'\"'\"'brien/in box'"
        );
    }

    #[test]
    fn test_validate() {
        assert!(FileTransferSpec::new("/tmp").validate().is_ok());
        assert!(FileTransferSpec::new("  ").validate().is_err());
        assert!(FileTransferSpec::new("/tmp")
            .with_file("a/b", 0o644, "x")
            .validate()
            .is_err());
        assert!(FileTransferSpec::new("/tmp")
            .with_subdirectory("..", 0o755)
            .validate()
            .is_err());
        assert!(FileTransferSpec::new("/tmp")
            .with_file("ok", 0o17777, "x")
            .validate()
            .is_err());
    }

    #[test]
    fn test_sink_messages() {
        assert_eq!(sink_messages(b"\0\0"), None);
        assert_eq!(
            sink_messages(b"\0\x01scp: /srv/x: Permission denied\n"),
            Some("scp: /srv/x: Permission denied".to_string())
        );
    }

    #[tokio::test]
    async fn test_write_transfer_sends_payload_then_eof() {
        let (writer, mut remote) = tokio::io::duplex(16);
        let spec = FileTransferSpec::new("/tmp").with_file("f", 0o644, "abc");
        let task = tokio::spawn(write_transfer(writer, spec.encode()));

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(received, b"C0644 3 f\nabc\x00");
    }

    #[tokio::test]
    async fn test_join_writer_aborts_stalled_writer() {
        // Nobody reads the other end, so the writer blocks on a full pipe
        let (writer, _remote) = tokio::io::duplex(1);
        let spec = FileTransferSpec::new("/tmp").with_file("big", 0o644, vec![b'x'; 4096]);
        let task = tokio::spawn(write_transfer(writer, spec.encode()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let written = tokio::time::timeout(Duration::from_secs(5), join_writer(task))
            .await
            .expect("join_writer must not wait on a stalled writer");
        assert!(!written);
    }

    #[tokio::test]
    async fn test_join_writer_reports_finished_writer() {
        let (writer, mut remote) = tokio::io::duplex(64);
        let task = tokio::spawn(write_transfer(writer, b"C0644 1 f\nx\x00".to_vec()));

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        while !task.is_finished() {
            tokio::task::yield_now().await;
        }

        assert!(join_writer(task).await);
    }
}
