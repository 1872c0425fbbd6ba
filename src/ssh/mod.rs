//! SSH session, command runners and file push protocol
//!
//! Everything here works on one already connected [`Session`]; the
//! deadline handling around a whole call lives in [`crate::executor`].

pub mod command;
pub mod config;
pub mod connection;
pub mod elevation;
pub mod handler;
pub mod sanitize;
pub mod scp;

// Re-exports
pub use command::CommandOutput;
pub use config::ConnectionTarget;
pub use connection::Session;
pub use elevation::PromptWatcher;
pub use handler::SshHandler;
pub use sanitize::{escape_for_shell, join_commands, sanitize_command};
pub use scp::FileTransferSpec;
