//! Connection target types
//!
//! Identifies and authenticates one remote endpoint.

use secrecy::{ExposeSecret, SecretString};

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// One remote endpoint plus the credentials used to authenticate to it
#[derive(Debug)]
pub struct ConnectionTarget {
    /// Remote hostname or IP address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub user: String,

    /// Password for password authentication and sudo prompts (may be empty)
    pub password: SecretString,

    /// Private key content (not path!) for key authentication
    pub private_key: Option<SecretString>,
}

impl ConnectionTarget {
    /// Create a new target with minimal required fields
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: user.into(),
            password: SecretString::new(String::new()),
            private_key: None,
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = SecretString::new(password.into());
        self
    }

    /// Set private key authentication (key content, not path)
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(SecretString::new(key.into()));
        self
    }

    /// `host:port` form used in log lines and error messages
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn has_password(&self) -> bool {
        !self.password.expose_secret().is_empty()
    }
}

impl Clone for ConnectionTarget {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: SecretString::new(self.password.expose_secret().clone()),
            private_key: self
                .private_key
                .as_ref()
                .map(|k| SecretString::new(k.expose_secret().clone())),
        }
    }
}
