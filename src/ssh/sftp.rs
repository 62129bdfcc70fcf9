//! SFTP file operations on a russh connection

use tracing::debug;

use super::connection::{
    EntryKind, RemoteEntry, RemoteReader, RemoteWriter, RusshConnection,
};
use crate::error::{Result, SshManagerError};

impl RusshConnection {
    pub(crate) async fn sftp_open_read(&self, path: &str) -> Result<RemoteReader> {
        let file = self
            .sftp()
            .await?
            .open(path)
            .await
            .map_err(|e| SshManagerError::remote(format!("Cannot open {}: {}", path, e)))?;
        Ok(Box::pin(file))
    }

    pub(crate) async fn sftp_open_write(&self, path: &str) -> Result<RemoteWriter> {
        let file = self
            .sftp()
            .await?
            .create(path)
            .await
            .map_err(|e| SshManagerError::remote(format!("Cannot create {}: {}", path, e)))?;
        Ok(Box::pin(file))
    }

    pub(crate) async fn sftp_list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let read_dir = self
            .sftp()
            .await?
            .read_dir(path)
            .await
            .map_err(|e| SshManagerError::remote(format!("Cannot read {}: {}", path, e)))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }

            let metadata = entry.metadata();
            let kind = if metadata.is_dir() {
                EntryKind::Dir
            } else if metadata.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };

            entries.push(RemoteEntry::new(kind, metadata.size.unwrap_or(0), name));
        }

        debug!("Listed {} entries in {}", entries.len(), path);
        Ok(entries)
    }
}
