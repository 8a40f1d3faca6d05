//! Transport boundary
//!
//! The pool never talks to an SSH library directly. It establishes sessions
//! through a [`Connector`] and drives them through [`RemoteSession`]; the
//! russh implementation lives in `crate::ssh`, an in-memory one in
//! [`memory`].
//!
//! Failures cross this boundary unclassified as [`TransportError`]; the
//! pool's classifier turns them into typed errors exactly once.

pub mod memory;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{MemoryConnector, MemoryFs};

/// Raw failure from the transport layer.
///
/// `type_name` names the source error type (e.g. `russh::Error`) and only
/// ever ends up in error context and logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub type_name: String,
    pub message: String,
}

impl TransportError {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// The remote path does not exist
    pub fn is_not_found(&self) -> bool {
        let msg = self.message.to_lowercase();
        msg.contains("no such file") || msg.contains("not found")
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::new("std::io::Error", err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteFileType {
    File,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub file_type: RemoteFileType,
    pub size: u64,
    /// Modification time (Unix timestamp), when the server reports one
    pub modified: Option<i64>,
}

impl RemoteMetadata {
    pub fn is_dir(&self) -> bool {
        self.file_type == RemoteFileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == RemoteFileType::File
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub metadata: RemoteMetadata,
}

/// Sequential reader over one open remote file
#[async_trait]
pub trait RemoteReader: Send {
    /// Read up to `max` bytes. An empty buffer means end of file.
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, TransportError>;
}

/// Sequential writer over one remote file opened for create+truncate
#[async_trait]
pub trait RemoteWriter: Send {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Flush and close. Data is only guaranteed on the server afterwards.
    async fn finish(&mut self) -> Result<(), TransportError>;
}

/// One established SFTP session
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn stat(&self, path: &str) -> Result<RemoteMetadata, TransportError>;

    /// Entries of a directory, without `.` and `..`
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, TransportError>;

    async fn open_write(&self, path: &str) -> Result<Box<dyn RemoteWriter>, TransportError>;

    async fn remove(&self, path: &str) -> Result<(), TransportError>;

    async fn mkdir(&self, path: &str) -> Result<(), TransportError>;

    /// Best-effort shutdown; never fails
    async fn close(&self);
}

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Secret material for one connection attempt
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    Password {
        password: String,
    },
    KeyFile {
        key_path: PathBuf,
        passphrase: Option<String>,
    },
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Credentials::Password {
            password: password.into(),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Credentials::Password { .. } => "password",
            Credentials::KeyFile { .. } => "publickey",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { .. } => f.write_str("Password(***)"),
            Credentials::KeyFile { key_path, .. } => {
                write!(f, "KeyFile({})", key_path.display())
            }
        }
    }
}

/// Establishes sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn RemoteSession>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(TransportError::new("russh_sftp::Error", "No such file").is_not_found());
        assert!(TransportError::new("x", "path not found").is_not_found());
        assert!(!TransportError::new("x", "Permission denied").is_not_found());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::password("hunter2");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("hunter2"));
        assert_eq!(creds.method(), "password");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err: TransportError = io.into();
        assert_eq!(err.type_name, "std::io::Error");
        assert_eq!(err.message, "connection refused");
    }

    #[test]
    fn test_target_display() {
        let target = ConnectTarget::new("logs.example.com", 22, "deploy");
        assert_eq!(target.to_string(), "deploy@logs.example.com:22");
    }
}
