//! Session registry
//!
//! Maps session names to live connections. All mutation happens through
//! `&mut self` on the owning task; the only asynchronous input is the stream
//! of transport-closed events, which is queued on a channel and applied by
//! [`SessionRegistry::drain_closed`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::CONNECTION_TIMEOUT_SECS;
use crate::error::{Result, SshManagerError};
use crate::ssh::{
    CloseNotifier, ConnectionId, Credential, Endpoint, RemoteHandle, ResolvedCredential,
    SshConfig, SshConnector,
};

/// A named live connection
#[derive(Clone)]
pub struct Session {
    name: String,
    id: ConnectionId,
    endpoint: Endpoint,
    handle: Arc<dyn RemoteHandle>,
}

impl Session {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn handle(&self) -> &Arc<dyn RemoteHandle> {
        &self.handle
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Result of [`SessionRegistry::begin_connect`]
pub enum ConnectStep {
    /// `name` is already connected to the requested endpoint
    Live(Session),
    /// A connection attempt to run with [`PendingConnect::open`]
    Pending(PendingConnect),
}

/// A connection attempt detached from the registry
pub struct PendingConnect {
    name: String,
    id: ConnectionId,
    config: SshConfig,
    connector: Arc<dyn SshConnector>,
    connect_timeout: Duration,
    notifier: CloseNotifier,
}

impl PendingConnect {
    /// Read key material, connect and authenticate within the timeout
    ///
    /// Nothing is left open on failure; the dropped notifier reports an id
    /// that was never registered and is ignored.
    pub async fn open(self) -> Result<OpenedConnect> {
        let credential = resolve_credential(&self.config.credential).await?;

        let endpoint = &self.config.endpoint;
        let attempt = self.connector.connect(endpoint, &credential, self.notifier);
        let handle = match timeout(self.connect_timeout, attempt).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(
                    "Connection to {} timed out after {}s",
                    endpoint,
                    self.connect_timeout.as_secs()
                );
                return Err(SshManagerError::connect(format!(
                    "Connection timeout after {}s",
                    self.connect_timeout.as_secs()
                )));
            }
        };

        Ok(OpenedConnect {
            session: Session {
                name: self.name,
                id: self.id,
                endpoint: self.config.endpoint,
                handle,
            },
        })
    }
}

/// An authenticated connection waiting to be registered
pub struct OpenedConnect {
    session: Session,
}

/// Whether `connect` opened a new connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AlreadyConnected,
}

pub struct SessionRegistry {
    connector: Arc<dyn SshConnector>,
    sessions: BTreeMap<String, Session>,
    connect_timeout: Duration,
    next_id: u64,
    closed_tx: mpsc::UnboundedSender<ConnectionId>,
    closed_rx: mpsc::UnboundedReceiver<ConnectionId>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn SshConnector>) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            sessions: BTreeMap::new(),
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            next_id: 0,
            closed_tx,
            closed_rx,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Connect `name`, or reuse its live session
    ///
    /// A live session under `name` pointing at a different endpoint is an
    /// `AlreadyExists` error; it has to be disconnected first.
    pub async fn connect(
        &mut self,
        name: &str,
        config: &SshConfig,
    ) -> Result<(Session, ConnectOutcome)> {
        match self.begin_connect(name, config)? {
            ConnectStep::Live(session) => Ok((session, ConnectOutcome::AlreadyConnected)),
            ConnectStep::Pending(pending) => {
                let opened = pending.open().await?;
                self.finish_connect(opened).await
            }
        }
    }

    /// First half of `connect`: reuse a live session or prepare an attempt
    ///
    /// The returned [`PendingConnect`] does its network work without the
    /// registry, so callers sharing the registry behind a lock can release
    /// it while the attempt runs.
    pub fn begin_connect(&mut self, name: &str, config: &SshConfig) -> Result<ConnectStep> {
        self.drain_closed();

        if let Some(existing) = self.sessions.get(name) {
            check_same_endpoint(existing, &config.endpoint)?;
            debug!("Session '{}' already connected", name);
            return Ok(ConnectStep::Live(existing.clone()));
        }

        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        Ok(ConnectStep::Pending(PendingConnect {
            name: name.to_string(),
            id,
            config: config.clone(),
            connector: self.connector.clone(),
            connect_timeout: self.connect_timeout,
            notifier: CloseNotifier::new(id, self.closed_tx.clone()),
        }))
    }

    /// Second half of `connect`: register an opened connection
    ///
    /// If another attempt registered `name` in the meantime, the new
    /// connection is closed and the live one wins.
    pub async fn finish_connect(
        &mut self,
        opened: OpenedConnect,
    ) -> Result<(Session, ConnectOutcome)> {
        self.drain_closed();

        if let Some(existing) = self.sessions.get(&opened.session.name).cloned() {
            opened.session.handle.close().await;
            check_same_endpoint(&existing, &opened.session.endpoint)?;
            debug!(
                "Session '{}' was connected concurrently; closed {}",
                existing.name, opened.session.id
            );
            return Ok((existing, ConnectOutcome::AlreadyConnected));
        }

        let session = opened.session;
        self.sessions.insert(session.name.clone(), session.clone());
        info!("Session '{}' connected to {}", session.name, session.endpoint);

        Ok((session, ConnectOutcome::Connected))
    }

    /// Close and forget `name`; false if it was not connected
    pub async fn disconnect(&mut self, name: &str) -> bool {
        match self.sessions.remove(name) {
            Some(session) => {
                session.handle.close().await;
                info!("Session '{}' disconnected", name);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Live sessions ordered by name
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Apply pending transport-closed events; returns the evicted names
    ///
    /// Events are matched by connection id, so a late event from a connection
    /// that was already disconnected never evicts its replacement.
    pub fn drain_closed(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while let Ok(id) = self.closed_rx.try_recv() {
            let name = self
                .sessions
                .iter()
                .find(|(_, session)| session.id == id)
                .map(|(name, _)| name.clone());

            if let Some(name) = name {
                self.sessions.remove(&name);
                warn!("Session '{}' lost its connection", name);
                evicted.push(name);
            }
        }
        evicted
    }

    /// Disconnect everything
    pub async fn close_all(&mut self) {
        let names: Vec<String> = self.sessions.keys().cloned().collect();
        for name in names {
            self.disconnect(&name).await;
        }
    }
}

fn check_same_endpoint(existing: &Session, endpoint: &Endpoint) -> Result<()> {
    if &existing.endpoint != endpoint {
        return Err(SshManagerError::already_exists(format!(
            "session '{}' is connected to {}; disconnect it first",
            existing.name, existing.endpoint
        )));
    }
    Ok(())
}

/// Read key files so the adapter only ever sees key material
async fn resolve_credential(credential: &Credential) -> Result<ResolvedCredential> {
    match credential {
        Credential::Password(password) => Ok(ResolvedCredential::Password(password.clone())),
        Credential::KeyData { data, passphrase } => Ok(ResolvedCredential::PrivateKey {
            data: data.clone(),
            passphrase: passphrase.clone(),
        }),
        Credential::KeyFile { path, passphrase } => {
            let data = tokio::fs::read_to_string(path).await.map_err(|e| {
                SshManagerError::credential(format!(
                    "Cannot read key file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(ResolvedCredential::PrivateKey {
                data,
                passphrase: passphrase.clone(),
            })
        }
    }
}
