//! Error taxonomy for pooled SFTP work
//!
//! Every failure that leaves the crate is one of a closed set of kinds. Each
//! carries a human-readable message plus a context map (host, port, path,
//! operation, the original transport error type, ...) used both for logs and
//! for building the user-facing text.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

/// Key/value details attached to an error. Ordered so log lines are stable.
pub type ErrorContext = BTreeMap<String, String>;

/// Which resource ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Global connection cap
    Connections,
    /// Per-tenant connection cap
    TenantConnections,
    /// Sliding-window operation rate
    RateLimit,
    /// Transfer would not fit the size limit
    Memory,
    /// Remote disk full
    Disk,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Connections => "connections",
            ResourceKind::TenantConnections => "tenant_connections",
            ResourceKind::RateLimit => "rate_limit",
            ResourceKind::Memory => "memory",
            ResourceKind::Disk => "disk",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of [`SftpPoolError`], handy for matching and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Authentication,
    File,
    Directory,
    Timeout,
    Resource,
    Configuration,
    Other,
}

#[derive(Error, Debug, Clone)]
pub enum SftpPoolError {
    #[error("{message}")]
    Connection { message: String, context: ErrorContext },

    #[error("{message}")]
    Authentication { message: String, context: ErrorContext },

    #[error("{message}")]
    File { message: String, context: ErrorContext },

    #[error("{message}")]
    Directory { message: String, context: ErrorContext },

    #[error("{message}")]
    Timeout { message: String, context: ErrorContext },

    #[error("{message}")]
    Resource {
        resource: ResourceKind,
        message: String,
        retry_after: Option<Duration>,
        context: ErrorContext,
    },

    #[error("{message}")]
    Configuration { message: String, context: ErrorContext },

    /// Failure the classifier could not place; `original_error` in the
    /// context holds the source type name.
    #[error("{message}")]
    Other { message: String, context: ErrorContext },
}

impl SftpPoolError {
    pub fn connection(message: impl Into<String>) -> Self {
        SftpPoolError::Connection {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        SftpPoolError::Authentication {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn file(message: impl Into<String>, path: &str, operation: &str) -> Self {
        SftpPoolError::File {
            message: message.into(),
            context: ErrorContext::new(),
        }
        .with_context("path", path)
        .with_context("operation", operation)
    }

    pub fn directory(message: impl Into<String>, path: &str, operation: &str) -> Self {
        SftpPoolError::Directory {
            message: message.into(),
            context: ErrorContext::new(),
        }
        .with_context("path", path)
        .with_context("operation", operation)
    }

    pub fn timeout(message: impl Into<String>, operation: &str, timeout: Duration) -> Self {
        SftpPoolError::Timeout {
            message: message.into(),
            context: ErrorContext::new(),
        }
        .with_context("operation", operation)
        .with_context("timeout", timeout.as_secs())
    }

    pub fn resource(resource: ResourceKind, message: impl Into<String>) -> Self {
        SftpPoolError::Resource {
            resource,
            message: message.into(),
            retry_after: None,
            context: ErrorContext::new(),
        }
        .with_context("resource_type", resource)
    }

    pub fn rate_limited(tenant_id: &str, retry_after: Duration) -> Self {
        SftpPoolError::Resource {
            resource: ResourceKind::RateLimit,
            message: format!(
                "Rate limit exceeded, retry after {:.1} seconds",
                retry_after.as_secs_f64()
            ),
            retry_after: Some(retry_after),
            context: ErrorContext::new(),
        }
        .with_context("resource_type", ResourceKind::RateLimit)
        .with_context("tenant_id", tenant_id)
        .with_context("retry_after", format!("{:.1}", retry_after.as_secs_f64()))
    }

    pub fn configuration(message: impl Into<String>, config_item: &str) -> Self {
        SftpPoolError::Configuration {
            message: message.into(),
            context: ErrorContext::new(),
        }
        .with_context("config_item", config_item)
    }

    pub fn other(message: impl Into<String>, original_error: &str) -> Self {
        SftpPoolError::Other {
            message: message.into(),
            context: ErrorContext::new(),
        }
        .with_context("original_error", original_error)
    }

    /// Attach one more context value, replacing an existing key
    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context_mut().insert(key.to_string(), value.to_string());
        self
    }

    /// Merge a whole context map; existing keys win
    pub fn with_context_map(mut self, extra: &ErrorContext) -> Self {
        let context = self.context_mut();
        for (key, value) in extra {
            context.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SftpPoolError::Connection { .. } => ErrorKind::Connection,
            SftpPoolError::Authentication { .. } => ErrorKind::Authentication,
            SftpPoolError::File { .. } => ErrorKind::File,
            SftpPoolError::Directory { .. } => ErrorKind::Directory,
            SftpPoolError::Timeout { .. } => ErrorKind::Timeout,
            SftpPoolError::Resource { .. } => ErrorKind::Resource,
            SftpPoolError::Configuration { .. } => ErrorKind::Configuration,
            SftpPoolError::Other { .. } => ErrorKind::Other,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SftpPoolError::Connection { message, .. }
            | SftpPoolError::Authentication { message, .. }
            | SftpPoolError::File { message, .. }
            | SftpPoolError::Directory { message, .. }
            | SftpPoolError::Timeout { message, .. }
            | SftpPoolError::Resource { message, .. }
            | SftpPoolError::Configuration { message, .. }
            | SftpPoolError::Other { message, .. } => message,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            SftpPoolError::Connection { context, .. }
            | SftpPoolError::Authentication { context, .. }
            | SftpPoolError::File { context, .. }
            | SftpPoolError::Directory { context, .. }
            | SftpPoolError::Timeout { context, .. }
            | SftpPoolError::Resource { context, .. }
            | SftpPoolError::Configuration { context, .. }
            | SftpPoolError::Other { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            SftpPoolError::Connection { context, .. }
            | SftpPoolError::Authentication { context, .. }
            | SftpPoolError::File { context, .. }
            | SftpPoolError::Directory { context, .. }
            | SftpPoolError::Timeout { context, .. }
            | SftpPoolError::Resource { context, .. }
            | SftpPoolError::Configuration { context, .. }
            | SftpPoolError::Other { context, .. } => context,
        }
    }

    fn ctx(&self, key: &str, fallback: &'static str) -> String {
        self.context()
            .get(key)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self {
            SftpPoolError::Resource { resource, .. } => Some(*resource),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SftpPoolError::Resource { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether a connection attempt that failed this way is worth repeating.
    ///
    /// Bad credentials and bad configuration fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SftpPoolError::Authentication { .. } | SftpPoolError::Configuration { .. }
        )
    }

    /// Text for end users: what failed, without raw library type names
    pub fn user_message(&self) -> String {
        let message = self.message();
        match self {
            SftpPoolError::Connection { .. } => format!(
                "Could not connect to server at {}:{}: {}",
                self.ctx("host", "unknown"),
                self.ctx("port", "0"),
                message
            ),
            SftpPoolError::Authentication { .. } => format!(
                "Authentication failed for user '{}' on server {}: {}",
                self.ctx("username", "unknown"),
                self.ctx("host", "unknown"),
                message
            ),
            SftpPoolError::File { .. } => format!(
                "File operation '{}' failed for path '{}': {}",
                self.ctx("operation", "unknown"),
                self.ctx("path", "unknown"),
                message
            ),
            SftpPoolError::Directory { .. } => format!(
                "Directory operation '{}' failed for path '{}': {}",
                self.ctx("operation", "unknown"),
                self.ctx("path", "unknown"),
                message
            ),
            SftpPoolError::Timeout { .. } => format!(
                "Operation '{}' timed out after {} seconds: {}",
                self.ctx("operation", "unknown"),
                self.ctx("timeout", "0"),
                message
            ),
            SftpPoolError::Resource { resource, .. } => {
                format!("Resource issue with {}: {}", resource, message)
            }
            SftpPoolError::Configuration { .. } => format!(
                "Configuration error with {}: {}",
                self.ctx("config_item", "unknown"),
                message
            ),
            SftpPoolError::Other { .. } => message.to_string(),
        }
    }

    /// What the user can do about it
    pub fn recovery_suggestion(&self) -> Option<String> {
        let text = match self {
            SftpPoolError::Connection { .. } => "Please check that:\n\
                 1. The server address and port are correct\n\
                 2. The server is online and accepting connections\n\
                 3. Your firewall allows outbound connections to this server\n\
                 4. Your network connection is stable"
                .to_string(),
            SftpPoolError::Authentication { .. } => "Please check that:\n\
                 1. The username is correct\n\
                 2. The password or key is correct\n\
                 3. The account has SFTP access permissions\n\
                 4. The account is not locked or disabled"
                .to_string(),
            SftpPoolError::File { .. } => file_suggestion(&self.ctx("operation", "")),
            SftpPoolError::Directory { .. } => {
                directory_suggestion(&self.ctx("operation", ""))
            }
            SftpPoolError::Timeout { .. } => "Please check that:\n\
                 1. The server is not under heavy load\n\
                 2. Your network connection is stable\n\
                 3. The operation is not too large (e.g., transferring a very large file)\n\
                 You may want to try again later when the server is less busy."
                .to_string(),
            SftpPoolError::Resource {
                resource,
                retry_after,
                ..
            } => resource_suggestion(*resource, *retry_after),
            SftpPoolError::Configuration { .. } => format!(
                "Please check the configuration for '{}' and ensure it is correctly set.",
                self.ctx("config_item", "unknown")
            ),
            SftpPoolError::Other { .. } => return None,
        };
        Some(text)
    }

    /// `user_message` followed by the recovery suggestion, if any
    pub fn format_for_user(&self) -> String {
        match self.recovery_suggestion() {
            Some(suggestion) => format!("{}\n\n{}", self.user_message(), suggestion),
            None => self.user_message(),
        }
    }

    /// Emit at `error` level with the context flattened to `key=value` pairs
    pub fn log(&self) {
        self.log_at(Level::ERROR);
    }

    pub fn log_at(&self, level: Level) {
        let details = self
            .context()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        let kind = self.kind();
        let message = self.message();
        if level == Level::ERROR {
            tracing::error!("{:?}: {} - {}", kind, message, details);
        } else if level == Level::WARN {
            tracing::warn!("{:?}: {} - {}", kind, message, details);
        } else if level == Level::INFO {
            tracing::info!("{:?}: {} - {}", kind, message, details);
        } else {
            tracing::debug!("{:?}: {} - {}", kind, message, details);
        }
    }
}

fn file_suggestion(operation: &str) -> String {
    match operation.to_lowercase().as_str() {
        "read" => "Please check that:\n\
             1. The file exists\n\
             2. You have permission to read this file\n\
             3. The file is not currently locked by another process",
        "write" => "Please check that:\n\
             1. You have permission to write to this location\n\
             2. There is sufficient disk space\n\
             3. The file is not currently locked by another process",
        "delete" => "Please check that:\n\
             1. You have permission to delete this file\n\
             2. The file is not currently locked by another process",
        "list" => "Please check that:\n\
             1. The directory exists\n\
             2. You have permission to access this directory",
        _ => "Please check file permissions and that the path exists",
    }
    .to_string()
}

fn directory_suggestion(operation: &str) -> String {
    match operation.to_lowercase().as_str() {
        "list" => "Please check that:\n\
             1. The directory exists\n\
             2. You have permission to list this directory",
        "create" => "Please check that:\n\
             1. You have permission to create directories in this location\n\
             2. The parent directory exists\n\
             3. There is sufficient disk space",
        "delete" => "Please check that:\n\
             1. You have permission to delete this directory\n\
             2. The directory is empty or you have permission to delete its contents\n\
             3. The directory is not currently in use",
        _ => "Please check directory permissions and that the path exists",
    }
    .to_string()
}

fn resource_suggestion(resource: ResourceKind, retry_after: Option<Duration>) -> String {
    match resource {
        ResourceKind::Connections => "The system has reached the maximum number of SFTP connections.\n\
             Please wait a moment and try again, or close some other connections first."
            .to_string(),
        ResourceKind::TenantConnections => "This server group has reached its SFTP connection limit.\n\
             Wait for running operations to finish, or upgrade to a tier with more connections."
            .to_string(),
        ResourceKind::RateLimit => match retry_after {
            Some(wait) => format!(
                "Too many SFTP operations in the last minute.\n\
                 Please wait {:.1} seconds before trying again.",
                wait.as_secs_f64()
            ),
            None => "Too many SFTP operations in the last minute.\n\
                 Please wait a moment before trying again."
                .to_string(),
        },
        ResourceKind::Memory => "The file is too large to process in one operation.\n\
             Try with a smaller file or raise the transfer size limit."
            .to_string(),
        ResourceKind::Disk => "There is not enough disk space to complete this operation.\n\
             Free up some disk space and try again."
            .to_string(),
    }
}

// Serializable as its display string so command layers can forward it as-is
impl Serialize for SftpPoolError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SftpPoolError>;
