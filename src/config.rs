//! Configuration and CLI argument parsing for the SSH session manager

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::error::{Result, SshManagerError};

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Port used when a server definition or tool call omits one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Store location relative to the user's home directory
const STORE_DIR: &str = ".ssh-manager";
const STORE_FILE: &str = "servers.json";

/// SSH session manager CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-manager")]
#[command(version)]
#[command(about = "Manage named SSH/SFTP sessions from a shell or over MCP")]
pub struct Args {
    /// Path of the saved server definitions file
    #[arg(long, env = "SSH_MANAGER_STORE")]
    pub store: Option<PathBuf>,

    /// Connect timeout in seconds
    #[arg(long, default_value = "30", env = "SSH_MANAGER_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Front end to run (defaults to the interactive shell)
    #[command(subcommand)]
    pub mode: Option<Mode>,
}

/// Front-end selection
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Interactive line-oriented shell
    Shell,
    /// MCP tool server on stdio
    Mcp,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Saved server definitions file
    pub store_path: PathBuf,

    /// Bound on each connect attempt
    pub connect_timeout: Duration,

    /// Selected front end
    pub mode: Mode,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        let mut errors = Vec::new();

        if args.connect_timeout == 0 {
            errors.push("--connect-timeout must be greater than 0".to_string());
        }

        let store_path = match args.store {
            Some(path) => Some(path),
            None => default_store_path(),
        };
        if store_path.is_none() {
            errors.push("Cannot determine home directory; pass --store".to_string());
        }

        match store_path {
            Some(store_path) if errors.is_empty() => Ok(Config {
                store_path,
                connect_timeout: Duration::from_secs(args.connect_timeout),
                mode: args.mode.unwrap_or(Mode::Shell),
            }),
            _ => Err(SshManagerError::usage(format!(
                "Configuration error:\n{}",
                errors.join("\n")
            ))),
        }
    }
}

/// `~/.ssh-manager/servers.json`
pub fn default_store_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STORE_DIR).join(STORE_FILE))
}
