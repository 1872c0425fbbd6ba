//! SSH transport session
//!
//! One authenticated russh connection per call, raced against a connect
//! deadline and closed exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use russh::Channel;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, info, warn};

use super::config::ConnectionTarget;
use super::handler::SshHandler;
use crate::error::{ExecError, Result};

/// Authentication method, in the order it will be offered
enum AuthMethod {
    PublicKey(Arc<PrivateKey>),
    Password(SecretString),
}

impl AuthMethod {
    fn name(&self) -> &'static str {
        match self {
            AuthMethod::PublicKey(_) => "publickey",
            AuthMethod::Password(_) => "password",
        }
    }
}

/// Why a dial attempt failed
#[derive(Debug)]
enum DialFailure {
    /// Every offered method was rejected by the server
    AuthRejected(String),
    /// Resolve, TCP, handshake or protocol failure
    Unreachable(String),
}

impl From<DialFailure> for ExecError {
    fn from(failure: DialFailure) -> Self {
        match failure {
            DialFailure::AuthRejected(msg) => ExecError::bad_auth(msg),
            DialFailure::Unreachable(msg) => ExecError::bad_address(msg),
        }
    }
}

/// One live, authenticated SSH connection
///
/// Keeps the password it was authenticated with so that sudo prompts seen
/// later on this connection can be answered.
pub struct Session {
    handle: Handle<SshHandler>,
    password: SecretString,
    address: String,
    closed: AtomicBool,
}

impl Session {
    /// Attempt one authenticated connection within `connect_timeout`
    ///
    /// The dial runs on a background task. If the timer fires first the
    /// task is aborted and `ConnectionTimeout` is returned.
    pub async fn connect(target: &ConnectionTarget, connect_timeout: Duration) -> Result<Self> {
        let methods = auth_methods(target);
        let address = target.address();

        info!("Connecting to SSH server {}...", address);

        let mut attempt = tokio::spawn(dial(target.clone(), methods));

        tokio::select! {
            joined = &mut attempt => match joined {
                Ok(Ok(session)) => {
                    info!("Successfully connected to {}@{}", target.user, address);
                    Ok(session)
                }
                Ok(Err(failure)) => {
                    error!("SSH connection to {} failed: {:?}", address, failure);
                    Err(failure.into())
                }
                Err(e) => {
                    error!("SSH connection task for {} failed: {}", address, e);
                    Err(ExecError::bad_address(e.to_string()))
                }
            },
            _ = tokio::time::sleep(connect_timeout) => {
                attempt.abort();
                error!(
                    "SSH connection to {} timed out after {}ms",
                    address,
                    connect_timeout.as_millis()
                );
                Err(ExecError::ConnectionTimeout(connect_timeout.as_millis() as u64))
            }
        }
    }

    /// Open a new session channel
    pub async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::channel(format!("Failed to open channel: {}", e)))
    }

    /// Password this session was authenticated with
    pub(crate) fn password(&self) -> &SecretString {
        &self.password
    }

    /// `host:port` of the remote side
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether `close` has already run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Disconnect from the server
    ///
    /// Only the first call does anything. Disconnect errors are logged and
    /// otherwise ignored.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        match self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
        {
            Ok(()) => info!("SSH connection to {} closed", self.address),
            Err(e) => warn!("Failed to close SSH connection to {}: {}", self.address, e),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Assemble authentication methods: key first (if it parses), then password
fn auth_methods(target: &ConnectionTarget) -> Vec<AuthMethod> {
    let mut methods = Vec::new();

    if let Some(ref key) = target.private_key {
        match russh::keys::decode_secret_key(key.expose_secret(), None) {
            Ok(key) => methods.push(AuthMethod::PublicKey(Arc::new(key))),
            Err(e) => warn!("Failed to parse private key, skipping key auth: {}", e),
        }
    }

    if target.has_password() {
        methods.push(AuthMethod::Password(SecretString::new(
            target.password.expose_secret().clone(),
        )));
    }

    methods
}

async fn dial(
    target: ConnectionTarget,
    methods: Vec<AuthMethod>,
) -> std::result::Result<Session, DialFailure> {
    let config = Arc::new(client::Config::default());
    let address = target.address();

    let mut handle = client::connect(
        config,
        (target.host.as_str(), target.port),
        SshHandler::new(&target.host),
    )
    .await
    .map_err(|e| DialFailure::Unreachable(format!("{}: {}", address, e)))?;

    if methods.is_empty() {
        warn!("No usable password or private key for {}", address);
    }

    for method in methods {
        let name = method.name();
        debug!("Attempting {} authentication for user '{}'", name, target.user);

        let auth_result = match method {
            AuthMethod::PublicKey(key) => {
                handle
                    .authenticate_publickey(
                        target.user.as_str(),
                        PrivateKeyWithHashAlg::new(key, None),
                    )
                    .await
            }
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(target.user.as_str(), password.expose_secret().as_str())
                    .await
            }
        }
        .map_err(|e| DialFailure::Unreachable(format!("{}: {}", address, e)))?;

        if auth_result.success() {
            info!("{} authentication successful", name);
            return Ok(Session {
                handle,
                password: SecretString::new(target.password.expose_secret().clone()),
                address,
                closed: AtomicBool::new(false),
            });
        }

        debug!("{} authentication rejected", name);
    }

    if let Err(e) = handle
        .disconnect(russh::Disconnect::ByApplication, "", "English")
        .await
    {
        debug!("Disconnect after rejected authentication failed: {}", e);
    }

    Err(DialFailure::AuthRejected(format!(
        "unable to authenticate user '{}' on {}",
        target.user, address
    )))
}
