//! SFTP session over an authenticated russh connection

use async_trait::async_trait;
use russh::client;
use russh_sftp::client::fs::File;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::client::ClientHandler;
use crate::transport::{
    RemoteEntry, RemoteFileType, RemoteMetadata, RemoteReader, RemoteSession, RemoteWriter,
    TransportError,
};

fn to_metadata(attrs: &FileAttributes) -> RemoteMetadata {
    let file_type = if attrs.is_dir() {
        RemoteFileType::Directory
    } else if attrs.is_symlink() {
        RemoteFileType::Symlink
    } else if attrs.is_regular() {
        RemoteFileType::File
    } else {
        RemoteFileType::Other
    };
    RemoteMetadata {
        file_type,
        size: attrs.size.unwrap_or(0),
        modified: attrs.mtime.map(|t| t as i64),
    }
}

/// One SSH connection carrying one SFTP channel
pub struct RusshSession {
    handle: client::Handle<ClientHandler>,
    sftp: SftpSession,
}

impl RusshSession {
    pub(crate) fn new(handle: client::Handle<ClientHandler>, sftp: SftpSession) -> Self {
        Self { handle, sftp }
    }
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn stat(&self, path: &str) -> Result<RemoteMetadata, TransportError> {
        let attrs = self.sftp.metadata(path).await?;
        Ok(to_metadata(&attrs))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let entries = self
            .sftp
            .read_dir(path)
            .await?
            .map(|entry| RemoteEntry {
                name: entry.file_name(),
                metadata: to_metadata(&entry.metadata()),
            })
            .collect();
        Ok(entries)
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, TransportError> {
        let file = self.sftp.open(path).await?;
        Ok(Box::new(RusshReader { file }))
    }

    async fn open_write(&self, path: &str) -> Result<Box<dyn RemoteWriter>, TransportError> {
        // create if not exists, truncate if exists
        let file = self
            .sftp
            .open_with_flags(path, OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE)
            .await?;
        Ok(Box::new(RusshWriter { file }))
    }

    async fn remove(&self, path: &str) -> Result<(), TransportError> {
        self.sftp.remove_file(path).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        self.sftp.create_dir(path).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.sftp.close().await {
            debug!("SFTP close failed: {}", e);
        }
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            warn!("SSH disconnect failed: {}", e);
        }
    }
}

struct RusshReader {
    file: File,
}

#[async_trait]
impl RemoteReader for RusshReader {
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max];
        let n = self.file.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }
}

struct RusshWriter {
    file: File,
}

#[async_trait]
impl RemoteWriter for RusshWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.file.write_all(data).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        self.file.flush().await?;
        self.file.shutdown().await?;
        Ok(())
    }
}
