//! SSH configuration types
//!
//! Connection target and credential as handed to the session registry, and
//! the resolved form the client adapter receives.

use std::fmt;
use std::path::PathBuf;

use crate::config::DEFAULT_SSH_PORT;

/// Where a session is connected
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Remote hostname or IP address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub username: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Authentication material as supplied by the user
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password authentication
    Password(String),

    /// Private key read from disk at connect time
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },

    /// Private key content supplied inline
    KeyData {
        data: String,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(..)"),
            Credential::KeyFile { path, .. } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .finish_non_exhaustive(),
            Credential::KeyData { .. } => f.write_str("KeyData { .. }"),
        }
    }
}

/// Credential after key files have been read
#[derive(Clone)]
pub enum ResolvedCredential {
    Password(String),
    PrivateKey {
        data: String,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedCredential::Password(_) => f.write_str("Password(..)"),
            ResolvedCredential::PrivateKey { .. } => f.write_str("PrivateKey { .. }"),
        }
    }
}

/// Everything needed to open one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub endpoint: Endpoint,
    pub credential: Credential,
}

impl SshConfig {
    pub fn new(endpoint: Endpoint, credential: Credential) -> Self {
        Self {
            endpoint,
            credential,
        }
    }

    /// Password config on the default port
    pub fn password(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(
            Endpoint::new(host, DEFAULT_SSH_PORT, username),
            Credential::Password(password.into()),
        )
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.endpoint.port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_builder() {
        let config = SshConfig::password("192.168.1.1", "admin", "secret").with_port(2222);

        assert_eq!(config.endpoint.host, "192.168.1.1");
        assert_eq!(config.endpoint.port, 2222);
        assert_eq!(config.endpoint.username, "admin");
        assert_eq!(config.credential, Credential::Password("secret".to_string()));
        assert_eq!(config.endpoint.to_string(), "admin@192.168.1.1:2222");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = SshConfig::password("h", "u", "topsecret");
        assert!(!format!("{:?}", config).contains("topsecret"));

        let inline = Credential::KeyData {
            data: "PRIVATE".to_string(),
            passphrase: Some("pp".to_string()),
        };
        let shown = format!("{:?}", inline);
        assert!(!shown.contains("PRIVATE"));
        assert!(!shown.contains("pp"));
    }
}
