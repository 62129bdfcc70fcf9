//! Saved server definitions
//!
//! Definitions live in a JSON object keyed by server name. The file is
//! rewritten whole on every change (temp file + rename) and restricted to
//! owner read/write afterwards, since it may hold cleartext passwords.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DEFAULT_SSH_PORT;
use crate::error::{Result, SshManagerError};
use crate::ssh::{Credential, Endpoint, SshConfig};

/// Saved definitions, ordered by name
pub type ServerMap = BTreeMap<String, ServerDefinition>;

/// Persisted connection parameters for one named server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(flatten)]
    pub auth: ServerAuth,
}

/// How a saved server authenticates
///
/// Key material is only ever stored as a path reference.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "authKind", rename_all = "lowercase")]
pub enum ServerAuth {
    Password {
        password: String,
    },
    Key {
        #[serde(rename = "keyPath")]
        key_path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl ServerDefinition {
    pub fn with_password(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth: ServerAuth::Password {
                password: password.into(),
            },
        }
    }

    pub fn with_key(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth: ServerAuth::Key {
                key_path: key_path.into(),
                passphrase,
            },
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.host, self.port, &self.username)
    }

    /// Connection parameters for the registry; key files are read at connect time
    pub fn to_ssh_config(&self) -> SshConfig {
        let credential = match &self.auth {
            ServerAuth::Password { password } => Credential::Password(password.clone()),
            ServerAuth::Key {
                key_path,
                passphrase,
            } => Credential::KeyFile {
                path: key_path.clone(),
                passphrase: passphrase.clone(),
            },
        };
        SshConfig::new(self.endpoint(), credential)
    }

    /// Definition worth saving for a config, or None when the key was given inline
    pub fn from_ssh_config(config: &SshConfig) -> Option<Self> {
        let endpoint = &config.endpoint;
        match &config.credential {
            Credential::Password(password) => Some(Self::with_password(
                &endpoint.host,
                endpoint.port,
                &endpoint.username,
                password,
            )),
            Credential::KeyFile { path, passphrase } => Some(Self::with_key(
                &endpoint.host,
                endpoint.port,
                &endpoint.username,
                path,
                passphrase.clone(),
            )),
            Credential::KeyData { .. } => None,
        }
    }
}

impl fmt::Debug for ServerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auth = match &self.auth {
            ServerAuth::Password { .. } => "password".to_string(),
            ServerAuth::Key { key_path, .. } => format!("key {}", key_path.display()),
        };
        f.debug_struct("ServerDefinition")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth", &auth)
            .finish()
    }
}

impl fmt::Debug for ServerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAuth::Password { .. } => f.write_str("Password { .. }"),
            ServerAuth::Key { key_path, .. } => f
                .debug_struct("Key")
                .field("key_path", key_path)
                .finish_non_exhaustive(),
        }
    }
}

/// File-backed store of server definitions
#[derive(Debug, Clone)]
pub struct ServerStore {
    path: PathBuf,
}

impl ServerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all definitions; a missing or unparsable file reads as empty
    pub fn load(&self) -> ServerMap {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot read server store {}: {}", self.path.display(), e);
                }
                return ServerMap::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(servers) => servers,
            Err(e) => {
                warn!(
                    "Ignoring corrupt server store {}: {}",
                    self.path.display(),
                    e
                );
                ServerMap::new()
            }
        }
    }

    /// Replace the stored definitions
    pub fn save(&self, servers: &ServerMap) -> Result<()> {
        let json = serde_json::to_string_pretty(servers)
            .map_err(|e| SshManagerError::store(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = owner_only_options().open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        restrict_permissions(&self.path)?;

        debug!(
            "Saved {} server definition(s) to {}",
            servers.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ServerDefinition> {
        self.load().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.load().contains_key(name)
    }

    /// Insert or replace one definition
    pub fn upsert(&self, name: &str, definition: ServerDefinition) -> Result<()> {
        let mut servers = self.load();
        servers.insert(name.to_string(), definition);
        self.save(&servers)
    }

    /// Delete one definition; false if it was not there
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut servers = self.load();
        if servers.remove(name).is_none() {
            return Ok(false);
        }
        self.save(&servers)?;
        Ok(true)
    }
}

#[cfg(unix)]
fn owner_only_options() -> fs::OpenOptions {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true).mode(0o600);
    options
}

#[cfg(not(unix))]
fn owner_only_options() -> fs::OpenOptions {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    options
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
