//! In-process server credentials

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CredentialSource, ServerCredentials};
use crate::error::SftpPoolError;

/// [`CredentialSource`] backed by an in-process (tenant, server) map.
/// Nothing is written anywhere; embedders fill it from their own config.
#[derive(Debug, Default)]
pub struct StaticServerCredentials {
    servers: DashMap<(String, String), ServerCredentials>,
}

impl StaticServerCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: &str, server_id: &str, credentials: ServerCredentials) {
        self.servers
            .insert((tenant_id.to_string(), server_id.to_string()), credentials);
    }

    pub fn remove(&self, tenant_id: &str, server_id: &str) -> Option<ServerCredentials> {
        self.servers
            .remove(&(tenant_id.to_string(), server_id.to_string()))
            .map(|(_, credentials)| credentials)
    }

    pub fn server_ids(&self, tenant_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .servers
            .iter()
            .filter(|entry| entry.key().0 == tenant_id)
            .map(|entry| entry.key().1.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CredentialSource for StaticServerCredentials {
    async fn server_credentials(
        &self,
        tenant_id: &str,
        server_id: &str,
    ) -> Result<Option<ServerCredentials>, SftpPoolError> {
        Ok(self
            .servers
            .get(&(tenant_id.to_string(), server_id.to_string()))
            .map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(host: &str) -> ServerCredentials {
        ServerCredentials {
            host: host.to_string(),
            port: 22,
            username: "bot".to_string(),
            password: Some("pw".to_string()),
            key_path: None,
            key_passphrase: None,
        }
    }

    #[tokio::test]
    async fn test_lookup_is_per_tenant() {
        let servers = StaticServerCredentials::new();
        servers.insert("guild-1", "srv-b", creds("b.example.com"));
        servers.insert("guild-1", "srv-a", creds("a.example.com"));
        servers.insert("guild-2", "srv-c", creds("c.example.com"));

        assert_eq!(servers.server_ids("guild-1"), vec!["srv-a", "srv-b"]);
        let found = servers
            .server_credentials("guild-1", "srv-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.host, "a.example.com");
        assert!(servers
            .server_credentials("guild-2", "srv-a")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_remove() {
        let servers = StaticServerCredentials::new();
        servers.insert("guild-1", "srv", creds("h"));
        assert!(servers.remove("guild-1", "srv").is_some());
        assert!(servers.remove("guild-1", "srv").is_none());
        assert!(servers.server_ids("guild-1").is_empty());
    }
}
