//! Command router
//!
//! Resolves session names (or the active session) to live handles and runs
//! exec and file operations against them. Both front ends drive this type;
//! every remote failure comes back as a [`SshManagerError`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::error::{Result, SshManagerError};
use crate::registry::{ConnectOutcome, ConnectStep, OpenedConnect, SessionRegistry};
use crate::ssh::{
    CommandOutput, Endpoint, RemoteEntry, RemoteHandle, RemoteWriter, SshConfig,
};
use crate::store::{ServerDefinition, ServerStore};

/// `session:path` operand of a two-sided transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    pub session: String,
    pub path: String,
}

impl RemoteAddress {
    /// Split on the first colon; the path may contain more colons
    pub fn parse(input: &str) -> Result<Self> {
        let (session, path) = input.split_once(':').ok_or_else(|| {
            SshManagerError::usage(format!("expected <session>:<path>, got '{}'", input))
        })?;

        if session.is_empty() {
            return Err(SshManagerError::usage(format!(
                "missing session name in '{}'",
                input
            )));
        }
        if path.is_empty() {
            return Err(SshManagerError::usage(format!(
                "missing remote path in '{}'",
                input
            )));
        }

        Ok(Self {
            session: session.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.path)
    }
}

/// Result of listing a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirListing {
    /// The directory exists and has no entries
    Empty,
    /// Entries ordered by name
    Entries(Vec<RemoteEntry>),
}

/// Whether a listed name is live or only saved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Saved,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connected => "connected",
            SessionState::Saved => "saved",
        }
    }
}

/// One row of the session overview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub name: String,
    pub endpoint: Endpoint,
    pub state: SessionState,
    pub active: bool,
}

pub struct CommandRouter {
    registry: SessionRegistry,
    store: ServerStore,
    active: Option<String>,
    lost: BTreeSet<String>,
}

impl CommandRouter {
    pub fn new(registry: SessionRegistry, store: ServerStore) -> Self {
        Self {
            registry,
            store,
            active: None,
            lost: BTreeSet::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ServerStore {
        &self.store
    }

    /// Name of the active session; always a live session when set
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Apply pending transport-closed events
    ///
    /// Evicted names are remembered so the next operation addressing them
    /// reports the loss. Returns the names evicted by this call.
    pub fn reap_closed(&mut self) -> Vec<String> {
        let evicted = self.registry.drain_closed();
        for name in &evicted {
            if self.active.as_deref() == Some(name.as_str()) {
                self.active = None;
            }
            self.lost.insert(name.clone());
        }
        evicted
    }

    /// Connect `name` with explicit parameters
    pub async fn connect(&mut self, name: &str, config: &SshConfig) -> Result<ConnectOutcome> {
        let step = self.plan_connect(name, Some(config))?;
        self.complete_connect(step).await
    }

    /// Connect `name` from its saved definition, reusing a live session
    pub async fn connect_saved(&mut self, name: &str) -> Result<ConnectOutcome> {
        let step = self.plan_connect(name, None)?;
        self.complete_connect(step).await
    }

    /// Decide how to connect `name`
    ///
    /// With no config a live session is reused as-is, otherwise the saved
    /// definition is used. A pending step is opened without the router and
    /// handed back to [`CommandRouter::finish_connect`].
    pub fn plan_connect(&mut self, name: &str, config: Option<&SshConfig>) -> Result<ConnectStep> {
        self.reap_closed();
        let config = match config {
            Some(config) => config.clone(),
            None => {
                if let Some(session) = self.registry.get(name) {
                    return Ok(ConnectStep::Live(session.clone()));
                }
                self.store
                    .get(name)
                    .ok_or_else(|| {
                        SshManagerError::usage(format!(
                            "no saved server named '{}'; add it first or give host and username",
                            name
                        ))
                    })?
                    .to_ssh_config()
            }
        };
        self.registry.begin_connect(name, &config)
    }

    /// Register a connection opened from a pending step
    pub async fn finish_connect(&mut self, opened: OpenedConnect) -> Result<ConnectOutcome> {
        let (session, outcome) = self.registry.finish_connect(opened).await?;
        self.lost.remove(session.name());
        Ok(outcome)
    }

    async fn complete_connect(&mut self, step: ConnectStep) -> Result<ConnectOutcome> {
        match step {
            ConnectStep::Live(session) => {
                self.lost.remove(session.name());
                Ok(ConnectOutcome::AlreadyConnected)
            }
            ConnectStep::Pending(pending) => {
                let opened = pending.open().await?;
                self.finish_connect(opened).await
            }
        }
    }

    /// Make a live session the active one
    pub fn switch(&mut self, name: &str) -> Result<()> {
        self.reap_closed();
        self.take_lost_warning(name)?;
        if !self.registry.contains(name) {
            return Err(SshManagerError::no_session(format!(
                "session '{}' is not connected",
                name
            )));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    /// Disconnect `target`, or the active session when None
    ///
    /// Returns the disconnected name and clears the active pointer if it
    /// named that session.
    pub async fn disconnect(&mut self, target: Option<&str>) -> Result<String> {
        self.reap_closed();
        let name = self.target_name(target)?;

        if self.lost.remove(&name) {
            return Ok(name);
        }
        if !self.registry.disconnect(&name).await {
            return Err(SshManagerError::no_session(format!(
                "session '{}' is not connected",
                name
            )));
        }
        if self.active.as_deref() == Some(name.as_str()) {
            self.active = None;
        }
        Ok(name)
    }

    /// Save a new server definition
    pub fn add_server(&mut self, name: &str, definition: ServerDefinition) -> Result<()> {
        if self.store.contains(name) {
            return Err(SshManagerError::already_exists(format!(
                "a server named '{}' is already saved",
                name
            )));
        }
        self.store.upsert(name, definition)?;
        info!("Saved server '{}'", name);
        Ok(())
    }

    /// Delete a saved server definition; a live session is left running
    pub fn remove_server(&mut self, name: &str) -> Result<()> {
        if !self.store.remove(name)? {
            return Err(SshManagerError::usage(format!(
                "no saved server named '{}'",
                name
            )));
        }
        info!("Removed server '{}'", name);
        Ok(())
    }

    /// Live sessions followed by saved servers that are not connected
    pub fn sessions(&mut self) -> Vec<SessionStatus> {
        self.reap_closed();
        let mut rows: Vec<SessionStatus> = self
            .registry
            .sessions()
            .map(|session| SessionStatus {
                name: session.name().to_string(),
                endpoint: session.endpoint().clone(),
                state: SessionState::Connected,
                active: self.active.as_deref() == Some(session.name()),
            })
            .collect();

        for (name, definition) in self.store.load() {
            if !self.registry.contains(&name) {
                rows.push(SessionStatus {
                    name,
                    endpoint: definition.endpoint(),
                    state: SessionState::Saved,
                    active: false,
                });
            }
        }
        rows
    }

    /// Run a command; bare commands in the shell pass `None`
    pub async fn exec(&mut self, target: Option<&str>, command: &str) -> Result<CommandOutput> {
        let command = command_line(command)?;
        let handle = self.session_handle(target)?;
        debug!("exec on {:?}: {}", target, command);
        run_exec(handle.as_ref(), command).await
    }

    /// Copy a local file to the remote path; returns bytes written
    ///
    /// Remote parent directories are not created.
    pub async fn upload(
        &mut self,
        target: Option<&str>,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<u64> {
        let handle = self.session_handle(target)?;
        run_upload(handle.as_ref(), local_path, remote_path).await
    }

    /// Copy a remote file to a local path, creating local parent directories
    pub async fn download(
        &mut self,
        target: Option<&str>,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<u64> {
        let handle = self.session_handle(target)?;
        run_download(handle.as_ref(), remote_path, local_path).await
    }

    /// Stream a file from one session to another; returns bytes copied
    pub async fn transfer(
        &mut self,
        source: &RemoteAddress,
        destination: &RemoteAddress,
    ) -> Result<u64> {
        let (src, dst) = self.transfer_handles(source, destination)?;
        run_transfer(src.as_ref(), dst.as_ref(), source, destination).await
    }

    /// List a remote directory
    pub async fn list_files(
        &mut self,
        target: Option<&str>,
        remote_path: &str,
    ) -> Result<DirListing> {
        let handle = self.session_handle(target)?;
        run_list_files(handle.as_ref(), remote_path).await
    }

    /// Handle of `target`, or of the active session when None
    ///
    /// The handle stays usable after the router is released; if its
    /// transport drops meanwhile, operations on it fail with a remote error.
    pub fn session_handle(&mut self, target: Option<&str>) -> Result<Arc<dyn RemoteHandle>> {
        self.reap_closed();
        let name = self.target_name(target)?;
        self.resolve_role(&name, "session")
    }

    /// Source and destination handles of a transfer
    pub fn transfer_handles(
        &mut self,
        source: &RemoteAddress,
        destination: &RemoteAddress,
    ) -> Result<(Arc<dyn RemoteHandle>, Arc<dyn RemoteHandle>)> {
        if source == destination {
            return Err(SshManagerError::usage(
                "source and destination are the same file",
            ));
        }

        self.reap_closed();
        let src = self.resolve_role(&source.session, "source")?;
        let dst = self.resolve_role(&destination.session, "destination")?;
        Ok((src, dst))
    }

    /// Disconnect every session
    pub async fn shutdown(&mut self) {
        self.registry.close_all().await;
        self.active = None;
        self.lost.clear();
    }

    fn target_name(&self, target: Option<&str>) -> Result<String> {
        match target {
            Some(name) => Ok(name.to_string()),
            None => self.active.clone().ok_or_else(|| {
                SshManagerError::no_session("no active session; use connect <name> first")
            }),
        }
    }

    /// Report a connection loss once, then forget it
    fn take_lost_warning(&mut self, name: &str) -> Result<()> {
        if self.lost.remove(name) {
            warn!("Reporting lost session '{}'", name);
            return Err(SshManagerError::no_session(format!(
                "connection to '{}' was lost; reconnect with connect {}",
                name, name
            )));
        }
        Ok(())
    }

    fn resolve_role(&mut self, name: &str, role: &str) -> Result<Arc<dyn RemoteHandle>> {
        self.take_lost_warning(name)?;
        self.registry
            .get(name)
            .map(|session| session.handle().clone())
            .ok_or_else(|| {
                SshManagerError::no_session(format!("{} '{}' is not connected", role, name))
            })
    }
}

/// Trimmed command line; empty commands never reach the remote side
pub fn command_line(command: &str) -> Result<&str> {
    let command = command.trim();
    if command.is_empty() {
        return Err(SshManagerError::usage("Command cannot be empty"));
    }
    Ok(command)
}

pub async fn run_exec(handle: &dyn RemoteHandle, command: &str) -> Result<CommandOutput> {
    handle.exec(command_line(command)?).await
}

/// Local file must exist before anything is opened remotely
pub async fn run_upload(
    handle: &dyn RemoteHandle,
    local_path: &Path,
    remote_path: &str,
) -> Result<u64> {
    let is_file = tokio::fs::metadata(local_path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(SshManagerError::LocalFileNotFound(local_path.to_path_buf()));
    }

    let mut local = tokio::fs::File::open(local_path).await?;
    let writer = handle.open_write(remote_path).await?;
    let bytes = pipe(&mut local, writer).await?;

    info!(
        "Uploaded {} ({} bytes) to {}",
        local_path.display(),
        bytes,
        remote_path
    );
    Ok(bytes)
}

pub async fn run_download(
    handle: &dyn RemoteHandle,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64> {
    let mut reader = handle.open_read(remote_path).await?;

    if let Some(parent) = local_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let local = tokio::fs::File::create(local_path).await?;
    let bytes = pipe(&mut reader, Box::pin(BufWriter::new(local))).await?;

    info!(
        "Downloaded {} ({} bytes) to {}",
        remote_path,
        bytes,
        local_path.display()
    );
    Ok(bytes)
}

pub async fn run_transfer(
    src: &dyn RemoteHandle,
    dst: &dyn RemoteHandle,
    source: &RemoteAddress,
    destination: &RemoteAddress,
) -> Result<u64> {
    let mut reader = src.open_read(&source.path).await?;
    let writer = dst.open_write(&destination.path).await?;
    let bytes = pipe(&mut reader, writer).await?;

    info!("Transferred {} bytes from {} to {}", bytes, source, destination);
    Ok(bytes)
}

/// Entries sorted by name, or `Empty`
pub async fn run_list_files(handle: &dyn RemoteHandle, remote_path: &str) -> Result<DirListing> {
    let mut entries = handle.list_dir(remote_path).await?;

    if entries.is_empty() {
        return Ok(DirListing::Empty);
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(DirListing::Entries(entries))
}

/// Copy to end of input and commit the writer
async fn pipe<R>(reader: &mut R, mut writer: RemoteWriter) -> Result<u64>
where
    R: tokio::io::AsyncRead + Unpin + ?Sized,
{
    let bytes = tokio::io::copy(reader, &mut writer)
        .await
        .map_err(|e| SshManagerError::remote(format!("Transfer failed: {}", e)))?;
    writer
        .shutdown()
        .await
        .map_err(|e| SshManagerError::remote(format!("Failed to close file: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::fake::FakeConnector;
    use crate::ssh::EntryKind;

    struct Fixture {
        _dir: tempfile::TempDir,
        local: std::path::PathBuf,
        connector: Arc<FakeConnector>,
        router: CommandRouter,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_path_buf();
        let connector = Arc::new(FakeConnector::new());
        let registry = SessionRegistry::new(connector.clone());
        let store = ServerStore::new(dir.path().join("servers.json"));
        Fixture {
            _dir: dir,
            local,
            connector,
            router: CommandRouter::new(registry, store),
        }
    }

    async fn connect(router: &mut CommandRouter, name: &str, host: &str) {
        router
            .connect(name, &SshConfig::password(host, "root", "pw"))
            .await
            .unwrap();
    }

    #[test]
    fn test_parse_address() {
        let addr = RemoteAddress::parse("prod:/var/log/app.log").unwrap();
        assert_eq!(addr.session, "prod");
        assert_eq!(addr.path, "/var/log/app.log");
    }

    #[test]
    fn test_parse_address_splits_on_first_colon() {
        let addr = RemoteAddress::parse("prod:/a:b.log").unwrap();
        assert_eq!(addr.session, "prod");
        assert_eq!(addr.path, "/a:b.log");
    }

    #[test]
    fn test_parse_address_malformed() {
        for input in ["/var/log/app.log", ":/path", "prod:", ""] {
            let err = RemoteAddress::parse(input).unwrap_err();
            assert!(
                matches!(err, SshManagerError::Usage(_)),
                "{} should be a usage error",
                input
            );
        }
    }

    #[tokio::test]
    async fn test_exec_without_active_session() {
        let mut f = fixture();
        let err = f.router.exec(None, "uptime").await.unwrap_err();
        assert!(matches!(err, SshManagerError::NoActiveSession(_)));
    }

    #[tokio::test]
    async fn test_exec_on_active_session() {
        let mut f = fixture();
        connect(&mut f.router, "prod", "prod-host").await;
        f.router.switch("prod").unwrap();

        let output = f.router.exec(None, "  uptime ").await.unwrap();
        assert_eq!(output.stdout, "ran: uptime\n");
        assert_eq!(output.exit_code(), 0);

        let output = f.router.exec(Some("prod"), "no-status").await.unwrap();
        assert_eq!(output.exit_status, None);
        assert_eq!(output.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_exec_rejects_empty_command() {
        let mut f = fixture();
        connect(&mut f.router, "prod", "prod-host").await;
        let err = f.router.exec(Some("prod"), "   ").await.unwrap_err();
        assert!(matches!(err, SshManagerError::Usage(_)));
        assert_eq!(f.connector.remote("prod-host").calls(), 0);
    }

    #[tokio::test]
    async fn test_transfer_is_byte_identical() {
        let mut f = fixture();
        connect(&mut f.router, "a", "host-a").await;
        connect(&mut f.router, "b", "host-b").await;

        let one_mb: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
        for content in [Vec::new(), vec![0x7f], one_mb] {
            f.connector.remote("host-a").put_file("/x", &content);

            let bytes = f
                .router
                .transfer(
                    &RemoteAddress::parse("a:/x").unwrap(),
                    &RemoteAddress::parse("b:/y").unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(bytes, content.len() as u64);
            assert_eq!(f.connector.remote("host-b").file("/y").unwrap(), content);
        }
    }

    #[tokio::test]
    async fn test_transfer_names_missing_side() {
        let mut f = fixture();
        connect(&mut f.router, "a", "host-a").await;
        f.connector.remote("host-a").put_file("/x", b"data");

        let err = f
            .router
            .transfer(
                &RemoteAddress::parse("a:/x").unwrap(),
                &RemoteAddress::parse("b:/y").unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SshManagerError::NoActiveSession(_)));
        assert!(err.to_string().contains("destination 'b'"));

        let err = f
            .router
            .transfer(
                &RemoteAddress::parse("c:/x").unwrap(),
                &RemoteAddress::parse("a:/y").unwrap(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("source 'c'"));
    }

    #[tokio::test]
    async fn test_download_creates_parent_directories() {
        let mut f = fixture();
        connect(&mut f.router, "prod", "prod-host").await;
        f.connector
            .remote("prod-host")
            .put_file("/etc/app.conf", b"key=value\n");

        let target = f.local.join("deep").join("er").join("app.conf");
        let bytes = f
            .router
            .download(Some("prod"), "/etc/app.conf", &target)
            .await
            .unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read(&target).unwrap(), b"key=value\n");
    }

    #[tokio::test]
    async fn test_download_missing_remote_file() {
        let mut f = fixture();
        connect(&mut f.router, "prod", "prod-host").await;

        let err = f
            .router
            .download(Some("prod"), "/nope", &f.local.join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, SshManagerError::RemotePath(_)));
    }

    #[tokio::test]
    async fn test_upload_missing_local_file_makes_no_remote_call() {
        let mut f = fixture();
        connect(&mut f.router, "prod", "prod-host").await;

        let missing = f.local.join("missing.bin");
        let err = f
            .router
            .upload(Some("prod"), &missing, "/tmp/missing.bin")
            .await
            .unwrap_err();

        assert!(matches!(err, SshManagerError::LocalFileNotFound(_)));
        assert_eq!(f.connector.remote("prod-host").calls(), 0);
        assert!(f.connector.remote("prod-host").file("/tmp/missing.bin").is_none());
    }

    #[tokio::test]
    async fn test_upload() {
        let mut f = fixture();
        connect(&mut f.router, "prod", "prod-host").await;
        let local = f.local.join("payload.txt");
        std::fs::write(&local, b"hello remote").unwrap();

        let bytes = f
            .router
            .upload(Some("prod"), &local, "/srv/payload.txt")
            .await
            .unwrap();

        assert_eq!(bytes, 12);
        assert_eq!(
            f.connector.remote("prod-host").file("/srv/payload.txt").unwrap(),
            b"hello remote"
        );
    }

    #[tokio::test]
    async fn test_disconnect_active_clears_pointer() {
        let mut f = fixture();
        connect(&mut f.router, "a", "host-a").await;
        connect(&mut f.router, "b", "host-b").await;
        f.router.switch("a").unwrap();

        f.router.disconnect(Some("b")).await.unwrap();
        assert_eq!(f.router.active(), Some("a"));

        let name = f.router.disconnect(None).await.unwrap();
        assert_eq!(name, "a");
        assert_eq!(f.router.active(), None);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_session() {
        let mut f = fixture();
        let err = f.router.disconnect(Some("ghost")).await.unwrap_err();
        assert!(matches!(err, SshManagerError::NoActiveSession(_)));
    }

    #[tokio::test]
    async fn test_transport_loss_clears_active_and_warns_once() {
        let mut f = fixture();
        connect(&mut f.router, "prod", "prod-host").await;
        f.router.switch("prod").unwrap();

        f.connector.drop_transport("prod-host");

        let err = f.router.exec(Some("prod"), "uptime").await.unwrap_err();
        assert!(err.to_string().contains("was lost"));
        assert_eq!(f.router.active(), None);

        let err = f.router.exec(Some("prod"), "uptime").await.unwrap_err();
        assert!(err.to_string().contains("is not connected"));
    }

    #[tokio::test]
    async fn test_list_files() {
        let mut f = fixture();
        connect(&mut f.router, "prod", "prod-host").await;
        let remote = f.connector.remote("prod-host");
        remote.put_dir("/empty", Vec::new());
        remote.put_dir(
            "/var",
            vec![
                RemoteEntry::new(EntryKind::Dir, 4096, "log"),
                RemoteEntry::new(EntryKind::Symlink, 9, "lock"),
                RemoteEntry::new(EntryKind::File, 12, "cache.db"),
            ],
        );

        assert_eq!(
            f.router.list_files(Some("prod"), "/empty").await.unwrap(),
            DirListing::Empty
        );

        match f.router.list_files(Some("prod"), "/var").await.unwrap() {
            DirListing::Entries(entries) => {
                let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
                assert_eq!(names, vec!["cache.db", "lock", "log"]);
            }
            DirListing::Empty => panic!("expected entries"),
        }

        let err = f
            .router
            .list_files(Some("prod"), "/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, SshManagerError::RemotePath(_)));
    }

    #[tokio::test]
    async fn test_connect_saved_and_sessions_overview() {
        let mut f = fixture();
        f.router
            .add_server("web", ServerDefinition::with_password("web-host", 22, "www", "pw"))
            .unwrap();
        f.router
            .add_server("db", ServerDefinition::with_password("db-host", 5022, "pg", "pw"))
            .unwrap();

        let err = f
            .router
            .add_server("web", ServerDefinition::with_password("x", 22, "y", "z"))
            .unwrap_err();
        assert!(matches!(err, SshManagerError::AlreadyExists(_)));

        assert_eq!(
            f.router.connect_saved("web").await.unwrap(),
            ConnectOutcome::Connected
        );
        assert_eq!(
            f.router.connect_saved("web").await.unwrap(),
            ConnectOutcome::AlreadyConnected
        );
        f.router.switch("web").unwrap();

        let rows = f.router.sessions();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "web");
        assert_eq!(rows[0].state, SessionState::Connected);
        assert!(rows[0].active);
        assert_eq!(rows[1].name, "db");
        assert_eq!(rows[1].state, SessionState::Saved);
        assert_eq!(rows[1].endpoint.port, 5022);

        let err = f.router.connect_saved("nope").await.unwrap_err();
        assert!(matches!(err, SshManagerError::Usage(_)));
    }

    #[tokio::test]
    async fn test_remove_server_keeps_live_session() {
        let mut f = fixture();
        f.router
            .add_server("web", ServerDefinition::with_password("web-host", 22, "www", "pw"))
            .unwrap();
        f.router.connect_saved("web").await.unwrap();

        f.router.remove_server("web").unwrap();
        assert!(f.router.registry().contains("web"));
        assert!(f.router.store().load().is_empty());
        assert!(f.router.remove_server("web").is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let mut f = fixture();
        connect(&mut f.router, "a", "host-a").await;
        connect(&mut f.router, "b", "host-b").await;
        f.router.switch("b").unwrap();

        f.router.shutdown().await;
        assert!(f.router.registry().is_empty());
        assert_eq!(f.router.active(), None);
    }

    #[tokio::test]
    async fn test_held_handle_fails_after_transport_loss() {
        let mut f = fixture();
        connect(&mut f.router, "a", "host-a").await;
        f.connector.remote("host-a").put_file("/x", b"data");
        let handle = f.router.session_handle(Some("a")).unwrap();

        f.connector.drop_transport("host-a");

        let err = run_exec(handle.as_ref(), "uptime").await.unwrap_err();
        assert!(matches!(err, SshManagerError::RemotePath(_)));
        let err = handle.open_read("/x").await.err().unwrap();
        assert!(matches!(err, SshManagerError::RemotePath(_)));

        let err = f.router.exec(Some("a"), "uptime").await.unwrap_err();
        assert!(matches!(err, SshManagerError::NoActiveSession(_)));
        assert!(err.to_string().contains("was lost"));
    }

    #[tokio::test]
    async fn test_pending_connect_runs_without_router() {
        let mut f = fixture();
        let config = SshConfig::password("host-a", "root", "pw");

        let step = f.router.plan_connect("a", Some(&config)).unwrap();
        let ConnectStep::Pending(pending) = step else {
            panic!("expected a pending connect");
        };
        assert!(!f.router.registry().contains("a"));

        let opened = pending.open().await.unwrap();
        assert_eq!(
            f.router.finish_connect(opened).await.unwrap(),
            ConnectOutcome::Connected
        );

        let step = f.router.plan_connect("a", None).unwrap();
        assert!(matches!(step, ConnectStep::Live(_)));
    }
}
