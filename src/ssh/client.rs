//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use russh_sftp::client::SftpSession;
use tracing::{debug, info};

use super::error::SshError;
use super::session::RusshSession;
use crate::transport::{ConnectTarget, Connector, Credentials, RemoteSession, TransportError};

/// [`Connector`] speaking SSH with the SFTP subsystem
#[derive(Clone)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RusshConnector {
    pub fn new() -> Self {
        // Configure SSH client with keepalive
        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }

    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn establish(
        &self,
        target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<RusshSession, SshError> {
        info!("Connecting to SSH server at {}:{}", target.host, target.port);

        // Resolve address
        let socket_addr = tokio::net::lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let handler = ClientHandler::new(target.host.clone(), target.port);
        let mut handle = client::connect(self.config.clone(), socket_addr, handler).await?;
        debug!("SSH handshake completed");

        // Authenticate
        let authenticated = match credentials {
            Credentials::Password { password } => handle
                .authenticate_password(&target.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            Credentials::KeyFile {
                key_path,
                passphrase,
            } => {
                let key = russh::keys::load_secret_key(key_path, passphrase.as_deref())?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&target.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
            return Err(SshError::AuthenticationFailed(format!(
                "permission denied for {}",
                target
            )));
        }
        debug!("SSH authentication successful for {}", target);

        // Open a channel and request the SFTP subsystem on it
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SshError::SubsystemNotAvailable(e.to_string()))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::SubsystemNotAvailable(e.to_string()))?;

        info!("SFTP subsystem opened for {}", target);
        Ok(RusshSession::new(handle, sftp))
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(
        &self,
        target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn RemoteSession>, TransportError> {
        let session = self.establish(target, credentials).await?;
        Ok(Arc::new(session))
    }
}

/// Client handler for russh callbacks
///
/// Server host keys are accepted and logged with their fingerprint; pooled
/// connections have no interactive user to confirm a new key.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "Accepting host key for {}:{} (fingerprint: {})",
            self.host,
            self.port,
            server_public_key.fingerprint(Default::default())
        );
        Ok(true)
    }
}
