//! Configuration Management Module
//!
//! Global pool settings (environment driven), premium-tier resource limits,
//! and the collaborator traits through which the pool asks for per-tenant
//! limits and server credentials.

pub mod pool;
pub mod servers;
pub mod tiers;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SftpPoolError;
use crate::transport::{ConnectTarget, Credentials};

pub use pool::PoolConfig;
pub use servers::StaticServerCredentials;
pub use tiers::{PremiumTier, StaticTenantConfig, TierLimits, TierTable};

/// Limits the pool applies to one tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantLimits {
    pub max_connections: usize,
    pub max_operations_per_minute: usize,
    pub idle_timeout_secs: u64,
}

/// Source of per-tenant limits
#[async_trait]
pub trait TenantConfigProvider: Send + Sync {
    async fn tenant_limits(&self, tenant_id: &str) -> Result<TenantLimits, SftpPoolError>;
}

/// Connection details for one configured server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCredentials {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default)]
    pub key_passphrase: Option<String>,
}

fn default_port() -> u16 {
    22
}

impl ServerCredentials {
    pub fn target(&self) -> ConnectTarget {
        ConnectTarget::new(self.host.clone(), self.port, self.username.clone())
    }

    /// Key file wins over password when both are configured
    pub fn credentials(&self) -> Result<Credentials, SftpPoolError> {
        if let Some(key_path) = &self.key_path {
            return Ok(Credentials::KeyFile {
                key_path: key_path.clone(),
                passphrase: self.key_passphrase.clone(),
            });
        }
        match &self.password {
            Some(password) => Ok(Credentials::password(password.clone())),
            None => Err(SftpPoolError::configuration(
                format!("No password or key configured for {}", self.host),
                "credentials",
            )),
        }
    }
}

impl fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_path", &self.key_path)
            .finish()
    }
}

/// Source of server credentials, looked up per connection attempt
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn server_credentials(
        &self,
        tenant_id: &str,
        server_id: &str,
    ) -> Result<Option<ServerCredentials>, SftpPoolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_credentials_defaults() {
        let creds: ServerCredentials =
            serde_json::from_str(r#"{"host": "logs.example.com", "password": "pw"}"#).unwrap();
        assert_eq!(creds.port, 22);
        assert_eq!(creds.username, "");
        assert_eq!(creds.credentials().unwrap(), Credentials::password("pw"));
        assert!(!format!("{:?}", creds).contains("pw\""));
    }

    #[test]
    fn test_key_wins_over_password() {
        let creds: ServerCredentials = serde_json::from_str(
            r#"{"host": "h", "password": "pw", "key_path": "/keys/id_ed25519"}"#,
        )
        .unwrap();
        assert!(matches!(
            creds.credentials().unwrap(),
            Credentials::KeyFile { .. }
        ));
    }

    #[test]
    fn test_missing_secret_is_configuration_error() {
        let creds: ServerCredentials = serde_json::from_str(r#"{"host": "h"}"#).unwrap();
        let err = creds.credentials().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
