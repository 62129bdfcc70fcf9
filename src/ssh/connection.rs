//! SSH/SFTP client adapter
//!
//! The registry talks to remote hosts only through [`SshConnector`] and
//! [`RemoteHandle`]. [`RusshConnector`] is the real implementation on top of
//! russh and russh-sftp; tests substitute an in-memory one.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh_sftp::client::SftpSession;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, error, info};

use super::command::CommandOutput;
use super::config::{Endpoint, ResolvedCredential};
use super::handler::SshHandler;
use crate::error::{Result, SshManagerError};

/// Identity of one successful connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reports a transport closure when dropped
///
/// The adapter must keep it alive exactly as long as the underlying transport.
#[derive(Debug)]
pub struct CloseNotifier {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ConnectionId>,
}

impl CloseNotifier {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<ConnectionId>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for CloseNotifier {
    fn drop(&mut self) {
        // The receiver is gone once the registry itself is dropped.
        let _ = self.tx.send(self.id);
    }
}

/// Streaming read side of a remote file
pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Streaming write side of a remote file; must be shut down to commit
pub type RemoteWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
            EntryKind::Symlink => "symlink",
        }
    }
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub kind: EntryKind,
    pub size: u64,
    pub name: String,
}

impl RemoteEntry {
    pub fn new(kind: EntryKind, size: u64, name: impl Into<String>) -> Self {
        Self {
            kind,
            size,
            name: name.into(),
        }
    }
}

/// An open connection with command and file-transfer capability
#[async_trait]
pub trait RemoteHandle: Send + Sync {
    /// Run a command and wait for its channel to close
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Open a remote file for reading
    async fn open_read(&self, path: &str) -> Result<RemoteReader>;

    /// Create or truncate a remote file for writing
    async fn open_write(&self, path: &str) -> Result<RemoteWriter>;

    /// Read a remote directory, excluding `.` and `..`
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Close the transport
    async fn close(&self);
}

/// Opens connections
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Connect and authenticate
    ///
    /// On failure nothing may be left open. On success the returned handle
    /// owns `notifier` for the lifetime of the transport.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credential: &ResolvedCredential,
        notifier: CloseNotifier,
    ) -> Result<Arc<dyn RemoteHandle>>;
}

/// Connector backed by russh
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl RusshConnector {
    pub fn new() -> Self {
        Self {
            config: Arc::new(client::Config::default()),
        }
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credential: &ResolvedCredential,
        notifier: CloseNotifier,
    ) -> Result<Arc<dyn RemoteHandle>> {
        // Decode before touching the network so a bad key never opens a socket
        let key = match credential {
            ResolvedCredential::PrivateKey { data, passphrase } => Some(
                russh::keys::decode_secret_key(data, passphrase.as_deref()).map_err(|e| {
                    SshManagerError::credential(format!("Failed to parse private key: {}", e))
                })?,
            ),
            ResolvedCredential::Password(_) => None,
        };

        info!(
            "Connecting to SSH server {}:{}...",
            endpoint.host, endpoint.port
        );

        let id = notifier.id();
        let mut session = client::connect(
            self.config.clone(),
            (endpoint.host.as_str(), endpoint.port),
            SshHandler::new(notifier),
        )
        .await
        .map_err(|e| {
            error!("SSH connection {} to {} failed: {}", id, endpoint, e);
            SshManagerError::connect(e.to_string())
        })?;

        if let Err(e) = authenticate(&mut session, &endpoint.username, credential, key).await {
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
            return Err(e);
        }

        info!("Successfully connected to {} ({})", endpoint, id);

        Ok(Arc::new(RusshConnection {
            session,
            sftp: OnceCell::new(),
        }))
    }
}

/// Authenticate with the SSH server
async fn authenticate(
    session: &mut Handle<SshHandler>,
    username: &str,
    credential: &ResolvedCredential,
    key: Option<russh::keys::PrivateKey>,
) -> Result<()> {
    match (credential, key) {
        (_, Some(key)) => {
            debug!("Attempting key authentication for user '{}'", username);

            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            let auth_result = session
                .authenticate_publickey(username, key_with_alg)
                .await
                .map_err(|e| SshManagerError::connect(e.to_string()))?;

            if auth_result.success() {
                info!("Key authentication successful");
                Ok(())
            } else {
                Err(SshManagerError::connect("Key authentication rejected"))
            }
        }
        (ResolvedCredential::Password(password), None) => {
            debug!("Attempting password authentication for user '{}'", username);

            let auth_result = session
                .authenticate_password(username, password)
                .await
                .map_err(|e| SshManagerError::connect(e.to_string()))?;

            if auth_result.success() {
                info!("Password authentication successful");
                Ok(())
            } else {
                Err(SshManagerError::connect("Password authentication rejected"))
            }
        }
        (ResolvedCredential::PrivateKey { .. }, None) => Err(SshManagerError::credential(
            "Private key was not decoded",
        )),
    }
}

/// A live russh session plus its lazily opened SFTP subsystem
pub struct RusshConnection {
    pub(crate) session: Handle<SshHandler>,
    sftp: OnceCell<SftpSession>,
}

impl RusshConnection {
    /// SFTP session, opened on first use
    pub(crate) async fn sftp(&self) -> Result<&SftpSession> {
        self.sftp
            .get_or_try_init(|| async {
                let channel = self.session.channel_open_session().await.map_err(|e| {
                    SshManagerError::remote(format!("Failed to open SFTP channel: {}", e))
                })?;

                channel
                    .request_subsystem(true, "sftp")
                    .await
                    .map_err(|e| {
                        SshManagerError::remote(format!(
                            "Failed to request SFTP subsystem: {}",
                            e
                        ))
                    })?;

                debug!("SFTP subsystem opened");
                SftpSession::new(channel.into_stream()).await.map_err(|e| {
                    SshManagerError::remote(format!("Failed to initialize SFTP: {}", e))
                })
            })
            .await
    }
}

#[async_trait]
impl RemoteHandle for RusshConnection {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.exec_via_channel(command).await
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader> {
        self.sftp_open_read(path).await
    }

    async fn open_write(&self, path: &str) -> Result<RemoteWriter> {
        self.sftp_open_write(path).await
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.sftp_list_dir(path).await
    }

    async fn close(&self) {
        let _ = self
            .session
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
        info!("SSH connection closed");
    }
}
