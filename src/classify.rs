//! Failure classification
//!
//! SSH and SFTP libraries report most failures as free-form text. The
//! [`ErrorClassifier`] trait is the single place where that text is turned
//! into a typed [`SftpPoolError`]; [`PatternClassifier`] does it by matching
//! well-known message fragments.

use std::time::Duration;

use crate::error::{ErrorContext, ResourceKind, SftpPoolError};
use crate::transport::{ConnectTarget, TransportError};

/// What was being attempted when a failure happened
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub path: Option<String>,
    pub operation: Option<String>,
    pub timeout: Option<Duration>,
    pub extra: ErrorContext,
}

impl FailureContext {
    /// Context for establishing a connection
    pub fn connect(target: &ConnectTarget) -> Self {
        Self {
            host: Some(target.host.clone()),
            port: Some(target.port),
            username: Some(target.username.clone()),
            operation: Some("connect".to_string()),
            ..Default::default()
        }
    }

    /// Context for an operation on a remote path
    pub fn operation(operation: &str, path: &str) -> Self {
        Self {
            path: Some(path.to_string()),
            operation: Some(operation.to_string()),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, host: &str, port: u16, username: &str) -> Self {
        self.host = Some(host.to_string());
        self.port = Some(port);
        self.username = Some(username.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }

    pub fn to_context(&self) -> ErrorContext {
        let mut context = self.extra.clone();
        if let Some(host) = &self.host {
            context.insert("host".into(), host.clone());
        }
        if let Some(port) = self.port {
            context.insert("port".into(), port.to_string());
        }
        if let Some(username) = &self.username {
            context.insert("username".into(), username.clone());
        }
        if let Some(path) = &self.path {
            context.insert("path".into(), path.clone());
        }
        if let Some(operation) = &self.operation {
            context.insert("operation".into(), operation.clone());
        }
        if let Some(timeout) = self.timeout {
            context.insert("timeout".into(), timeout.as_secs().to_string());
        }
        context
    }

    fn operation_name(&self) -> &str {
        self.operation.as_deref().unwrap_or("unknown")
    }

    fn is_directory_operation(&self) -> bool {
        matches!(
            self.operation_name(),
            "list" | "create" | "mkdir" | "rmdir"
        )
    }
}

/// Maps a raw transport failure to the crate's error taxonomy
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, failure: &TransportError, context: &FailureContext) -> SftpPoolError;
}

const CONNECTION_PATTERNS: &[&str] = &[
    "connection refused",
    "network unreachable",
    "network is unreachable",
    "no route to host",
    "host unreachable",
    "timed out",
    "connection reset",
    "connection closed",
    "connection aborted",
    "broken pipe",
    "failed to resolve",
    "name or service not known",
    "disconnected",
    "session closed",
];

const AUTH_PATTERNS: &[&str] = &["authentication", "auth fail", "password", "publickey"];

const DIRECTORY_PATTERNS: &[&str] = &["directory", "no such directory"];

const FILE_PATTERNS: &[&str] = &["no such file", "not found", "permission denied", "file", "failure"];

/// Message-fragment classifier.
///
/// Checked in order: resource exhaustion, connectivity, credentials, then
/// path-level failures, then timeouts. "permission denied" counts as an
/// authentication failure only when no path is involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn new() -> Self {
        Self
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, failure: &TransportError, context: &FailureContext) -> SftpPoolError {
        let text = failure.message.to_lowercase();
        let type_name = failure.type_name.to_lowercase();
        let details = context.to_context();
        let has_path = context.path.is_some();

        let error = if text.contains("no space left") || text.contains("disk quota") {
            SftpPoolError::resource(ResourceKind::Disk, format!("Insufficient disk space: {}", failure))
        } else if text.contains("out of memory") || text.contains("cannot allocate") {
            SftpPoolError::resource(ResourceKind::Memory, format!("Insufficient memory: {}", failure))
        } else if contains_any(&text, CONNECTION_PATTERNS) {
            SftpPoolError::connection(format!("Connection failed: {}", failure))
        } else if contains_any(&text, AUTH_PATTERNS)
            || type_name.contains("keys")
            || (!has_path && text.contains("permission denied"))
        {
            SftpPoolError::authentication(format!("Authentication failed: {}", failure))
        } else if has_path
            && (context.is_directory_operation() || contains_any(&text, DIRECTORY_PATTERNS))
            && (contains_any(&text, DIRECTORY_PATTERNS) || contains_any(&text, FILE_PATTERNS))
        {
            SftpPoolError::Directory {
                message: format!("Directory operation failed: {}", failure),
                context: ErrorContext::new(),
            }
        } else if has_path && contains_any(&text, FILE_PATTERNS) {
            SftpPoolError::File {
                message: format!("File operation failed: {}", failure),
                context: ErrorContext::new(),
            }
        } else if text.contains("timeout") {
            SftpPoolError::Timeout {
                message: format!("Operation timed out: {}", failure),
                context: ErrorContext::new(),
            }
        } else {
            SftpPoolError::Other {
                message: format!("SFTP operation '{}' failed: {}", context.operation_name(), failure),
                context: ErrorContext::new(),
            }
        };

        error
            .with_context("original_error", &failure.type_name)
            .with_context_map(&details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn connect_ctx() -> FailureContext {
        FailureContext::connect(&ConnectTarget::new("logs.example.com", 22, "deploy"))
    }

    fn classify(message: &str, context: &FailureContext) -> SftpPoolError {
        PatternClassifier::new().classify(&TransportError::new("russh::Error", message), context)
    }

    #[test]
    fn test_connection_patterns() {
        for msg in [
            "Connection refused (os error 111)",
            "Network is unreachable",
            "No route to host",
            "Connection attempt timed out after 30s",
        ] {
            assert_eq!(classify(msg, &connect_ctx()).kind(), ErrorKind::Connection, "{}", msg);
        }
    }

    #[test]
    fn test_authentication_patterns() {
        let err = classify("Authentication failed: permission denied", &connect_ctx());
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.context().get("username").unwrap(), "deploy");
        assert!(!err.is_retryable());

        let key_err = PatternClassifier::new().classify(
            &TransportError::new("russh::keys::Error", "The key is encrypted"),
            &connect_ctx(),
        );
        assert_eq!(key_err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_permission_denied_on_path_is_file_error() {
        let ctx = FailureContext::operation("read", "/logs/a.csv");
        let err = classify("Permission denied", &ctx);
        assert_eq!(err.kind(), ErrorKind::File);
        assert_eq!(err.context().get("path").unwrap(), "/logs/a.csv");
        assert_eq!(err.context().get("operation").unwrap(), "read");
    }

    #[test]
    fn test_directory_operation() {
        let ctx = FailureContext::operation("list", "/logs");
        let err = classify("No such file", &ctx);
        assert_eq!(err.kind(), ErrorKind::Directory);

        let ctx = FailureContext::operation("read", "/logs");
        let err = classify("Not a directory", &ctx);
        assert_eq!(err.kind(), ErrorKind::Directory);
    }

    #[test]
    fn test_resource_patterns() {
        let ctx = FailureContext::operation("write", "/logs/a.csv");
        let err = classify("Failure: No space left on device", &ctx);
        assert_eq!(err.resource_kind(), Some(ResourceKind::Disk));
    }

    #[test]
    fn test_timeout_pattern() {
        let err = classify("keepalive timeout", &FailureContext::default());
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_unknown_keeps_original_type() {
        let err = PatternClassifier::new().classify(
            &TransportError::new("SomethingOdd", "weird state 42"),
            &FailureContext::default(),
        );
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(err.context().get("original_error").unwrap(), "SomethingOdd");
        assert!(err.user_message().contains("weird state 42"));
    }

    #[test]
    fn test_context_is_attached() {
        let ctx = connect_ctx().with_timeout(Duration::from_secs(30)).with("attempt", 2);
        let err = classify("Connection refused", &ctx);
        let context = err.context();
        assert_eq!(context.get("host").unwrap(), "logs.example.com");
        assert_eq!(context.get("port").unwrap(), "22");
        assert_eq!(context.get("timeout").unwrap(), "30");
        assert_eq!(context.get("attempt").unwrap(), "2");
        assert_eq!(context.get("original_error").unwrap(), "russh::Error");
        assert!(err
            .user_message()
            .starts_with("Could not connect to server at logs.example.com:22"));
    }
}
