//! In-memory client adapter for tests
//!
//! Every host gets its own fake file system. Connections can be made to hang
//! or fail, and a live transport can be dropped to simulate a network loss.
//! The command `hang` never completes.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::command::CommandOutput;
use super::config::{Endpoint, ResolvedCredential};
use super::connection::{
    CloseNotifier, RemoteEntry, RemoteHandle, RemoteReader, RemoteWriter, SshConnector,
};
use crate::error::{Result, SshManagerError};

#[derive(Default)]
pub(crate) struct FakeRemote {
    pub files: Mutex<BTreeMap<String, Vec<u8>>>,
    pub dirs: Mutex<BTreeMap<String, Vec<RemoteEntry>>>,
    pub calls: AtomicUsize,
}

impl FakeRemote {
    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn put_dir(&self, path: &str, entries: Vec<RemoteEntry>) {
        self.dirs.lock().unwrap().insert(path.to_string(), entries);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

enum Behavior {
    Succeed,
    Hang,
    Fail(String),
}

pub(crate) struct FakeConnector {
    behavior: Behavior,
    remotes: Mutex<HashMap<String, Arc<FakeRemote>>>,
    handles: Mutex<Vec<(Endpoint, Arc<FakeHandle>)>>,
    credentials: Mutex<Vec<ResolvedCredential>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::with_behavior(Behavior::Succeed)
    }

    pub fn hanging() -> Self {
        Self::with_behavior(Behavior::Hang)
    }

    pub fn failing(msg: &str) -> Self {
        Self::with_behavior(Behavior::Fail(msg.to_string()))
    }

    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            remotes: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            credentials: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    /// File system of a host, created on first use
    pub fn remote(&self, host: &str) -> Arc<FakeRemote> {
        self.remotes
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .clone()
    }

    /// Number of handles ever opened
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_credential(&self) -> Option<ResolvedCredential> {
        self.credentials.lock().unwrap().last().cloned()
    }

    /// Kill the transport of every live handle to `host`
    pub fn drop_transport(&self, host: &str) {
        for (endpoint, handle) in self.handles.lock().unwrap().iter() {
            if endpoint.host == host {
                handle.lose_transport();
            }
        }
    }
}

#[async_trait]
impl SshConnector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credential: &ResolvedCredential,
        notifier: CloseNotifier,
    ) -> Result<Arc<dyn RemoteHandle>> {
        self.credentials.lock().unwrap().push(credential.clone());
        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Fail(msg) => return Err(SshManagerError::connect(msg.clone())),
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(FakeHandle {
            remote: self.remote(&endpoint.host),
            notifier: Mutex::new(Some(notifier)),
            lost: AtomicBool::new(false),
        });
        self.handles
            .lock()
            .unwrap()
            .push((endpoint.clone(), handle.clone()));
        Ok(handle)
    }
}

pub(crate) struct FakeHandle {
    remote: Arc<FakeRemote>,
    notifier: Mutex<Option<CloseNotifier>>,
    lost: AtomicBool,
}

impl FakeHandle {
    fn lose_transport(&self) {
        self.lost.store(true, Ordering::SeqCst);
        self.notifier.lock().unwrap().take();
    }

    fn check(&self) -> Result<()> {
        self.remote.calls.fetch_add(1, Ordering::SeqCst);
        if self.lost.load(Ordering::SeqCst) {
            return Err(SshManagerError::remote("connection lost"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteHandle for FakeHandle {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.check()?;
        let output = match command {
            "hang" => std::future::pending().await,
            "false" => CommandOutput {
                stdout: String::new(),
                stderr: "failed\n".to_string(),
                exit_status: Some(1),
            },
            "no-status" => CommandOutput {
                stdout: "done\n".to_string(),
                stderr: String::new(),
                exit_status: None,
            },
            other => CommandOutput {
                stdout: format!("ran: {}\n", other),
                stderr: String::new(),
                exit_status: Some(0),
            },
        };
        Ok(output)
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader> {
        self.check()?;
        let data = self
            .remote
            .file(path)
            .ok_or_else(|| SshManagerError::remote(format!("No such file: {}", path)))?;
        Ok(Box::pin(io::Cursor::new(data)))
    }

    async fn open_write(&self, path: &str) -> Result<RemoteWriter> {
        self.check()?;
        self.remote.put_file(path, b"");
        Ok(Box::pin(FakeWriter {
            remote: self.remote.clone(),
            path: path.to_string(),
        }))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.check()?;
        self.remote
            .dirs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| SshManagerError::remote(format!("No such directory: {}", path)))
    }

    async fn close(&self) {
        self.notifier.lock().unwrap().take();
    }
}

struct FakeWriter {
    remote: Arc<FakeRemote>,
    path: String,
}

impl AsyncWrite for FakeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.remote
            .files
            .lock()
            .unwrap()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
