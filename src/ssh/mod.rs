//! SSH/SFTP client adapter
//!
//! Connection establishment, command execution and file transfer on top of
//! russh. Nothing above this module touches russh types.

pub mod command;
pub mod config;
pub mod connection;
pub mod handler;
mod sftp;

#[cfg(test)]
pub(crate) mod fake;

// Re-exports
pub use command::CommandOutput;
pub use config::{Credential, Endpoint, ResolvedCredential, SshConfig};
pub use connection::{
    CloseNotifier, ConnectionId, EntryKind, RemoteEntry, RemoteHandle, RemoteReader,
    RemoteWriter, RusshConnector, SshConnector,
};
pub use handler::SshHandler;
