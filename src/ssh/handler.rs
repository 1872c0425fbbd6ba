//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use tracing::debug;

/// SSH client handler for russh
///
/// Accepts every server key. Host identity is not verified for this
/// internal automation client.
#[derive(Debug, Clone, Default)]
pub struct SshHandler {
    host: String,
}

impl SshHandler {
    /// Create a new SSH handler for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting {} host key from {}",
            server_public_key.algorithm(),
            self.host
        );
        Ok(true)
    }
}
