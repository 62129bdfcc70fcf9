//! Error types for the SSH session manager

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the SSH session manager
///
/// Every variant is recoverable at the operation boundary: the front ends turn
/// it into a printed message or an error tool result.
#[derive(Debug, Error)]
pub enum SshManagerError {
    /// Malformed invocation (bad arguments, bad `session:path` address)
    #[error("Usage error: {0}")]
    Usage(String),

    /// The addressed session is not connected
    #[error("No active session: {0}")]
    NoActiveSession(String),

    /// Establishing a connection failed (network, auth, timeout)
    #[error("SSH connection error: {0}")]
    Connect(String),

    /// Key material could not be read or decoded
    #[error("Credential error: {0}")]
    Credential(String),

    /// A local source file does not exist
    #[error("Local file not found: {}", .0.display())]
    LocalFileNotFound(PathBuf),

    /// Remote file or command I/O failed
    #[error("Remote I/O error: {0}")]
    RemotePath(String),

    /// Duplicate session or server definition name
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Server store could not be written
    #[error("Server store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using SshManagerError
pub type Result<T> = std::result::Result<T, SshManagerError>;

impl SshManagerError {
    pub fn usage(msg: impl Into<String>) -> Self {
        SshManagerError::Usage(msg.into())
    }

    pub fn no_session(msg: impl Into<String>) -> Self {
        SshManagerError::NoActiveSession(msg.into())
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        SshManagerError::Connect(msg.into())
    }

    pub fn credential(msg: impl Into<String>) -> Self {
        SshManagerError::Credential(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        SshManagerError::RemotePath(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        SshManagerError::AlreadyExists(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        SshManagerError::Store(msg.into())
    }
}
