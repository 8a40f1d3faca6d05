//! SSH Error types
//!
//! Raised inside the russh transport and flattened into a
//! [`TransportError`] before leaving it. Classification happens later, in
//! one place.

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("SFTP subsystem not available: {0}")]
    SubsystemNotAvailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Key error: {0}")]
    KeyError(String),
}

impl SshError {
    /// Source type recorded as `original_error`
    fn type_name(&self) -> &'static str {
        match self {
            SshError::KeyError(_) => "russh::keys::Error",
            SshError::IoError(_) => "std::io::Error",
            SshError::SubsystemNotAvailable(_) => "russh_sftp::client::error::Error",
            _ => "russh::Error",
        }
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(err: russh::keys::Error) -> Self {
        SshError::KeyError(err.to_string())
    }
}

impl From<SshError> for TransportError {
    fn from(err: SshError) -> Self {
        TransportError::new(err.type_name(), err.to_string())
    }
}

impl From<russh::Error> for TransportError {
    fn from(err: russh::Error) -> Self {
        TransportError::new("russh::Error", err.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for TransportError {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        TransportError::new("russh_sftp::client::error::Error", err.to_string())
    }
}
