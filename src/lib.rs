//! SSH session manager - named SSH/SFTP sessions behind a shell and an MCP server
//!
//! This crate holds any number of named connections to remote servers, routes
//! commands and file transfers to them, and saves connection parameters for
//! later reuse. The SSH transport itself comes from russh and russh-sftp.
//!
//! # Front ends
//!
//! - `shell` - interactive loop; unknown input runs on the active session
//! - `mcp` - MCP tool server on stdio
//!
//! # MCP Tools
//!
//! - `connect` / `disconnect` - open or close a named session
//! - `list_sessions` / `remove_server` - inspect sessions and saved servers
//! - `execute` - run a command and return stdout, stderr and exit code
//! - `upload` / `download` / `transfer` / `list_files` - SFTP file operations
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ssh-manager                       # interactive shell
//! ssh-manager --store ./servers.json mcp
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod router;
pub mod server;
pub mod shell;
pub mod ssh;
pub mod store;
pub mod tools;

// Re-exports for convenience
pub use config::{Args, Config, Mode};
pub use error::{Result, SshManagerError};
pub use registry::{ConnectOutcome, ConnectStep, Session, SessionRegistry};
pub use router::{CommandRouter, DirListing, RemoteAddress, SessionStatus};
pub use server::SshManagerServer;
pub use shell::{Shell, ShellCommand, TerminalPrompt};
pub use ssh::{CommandOutput, Credential, Endpoint, RusshConnector, SshConfig};
pub use store::{ServerDefinition, ServerStore};
