//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use tracing::debug;

use super::connection::CloseNotifier;

/// SSH client handler for russh
///
/// russh owns the handler inside the connection's background task and drops
/// it when that task ends, whatever the cause. The handler carries the
/// session's [`CloseNotifier`], so dropping it reports the transport closure
/// to the registry.
#[derive(Debug)]
pub struct SshHandler {
    notifier: CloseNotifier,
}

impl SshHandler {
    /// Create a new SSH handler
    pub fn new(notifier: CloseNotifier) -> Self {
        Self { notifier }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    /// Verify the server's host key
    ///
    /// # Security Note
    /// Accepts all server keys. Host key verification against known_hosts is
    /// not implemented.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("Accepting host key for connection {}", self.notifier.id());
        Ok(true)
    }
}
