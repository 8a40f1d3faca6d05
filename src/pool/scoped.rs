//! Scoped checkout of a pooled connection
//!
//! A `ScopedSession` holds only the connection id. The session handle is
//! fetched from the pool for each operation, so the pool stays the single
//! owner of every connection. The checkout ends exactly once: on drop, or
//! through [`ScopedSession::close`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::PoolInner;
use crate::classify::FailureContext;
use crate::error::SftpPoolError;
use crate::transport::{
    ConnectTarget, RemoteEntry, RemoteMetadata, RemoteReader, RemoteSession, RemoteWriter,
    TransportError,
};

pub struct ScopedSession {
    inner: Arc<PoolInner>,
    id: String,
    tenant_id: String,
    target: ConnectTarget,
    /// Set when an operation was interrupted and the wire state is unknown
    broken: AtomicBool,
    released: bool,
}

impl ScopedSession {
    pub(crate) fn new(
        inner: Arc<PoolInner>,
        id: String,
        tenant_id: &str,
        target: ConnectTarget,
    ) -> Self {
        Self {
            inner,
            id,
            tenant_id: tenant_id.to_string(),
            target,
            broken: AtomicBool::new(false),
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    pub fn host(&self) -> &str {
        &self.target.host
    }

    pub fn port(&self) -> u16 {
        self.target.port
    }

    pub fn username(&self) -> &str {
        &self.target.username
    }

    /// Never hand this connection out again. It is discarded instead of
    /// released when the checkout ends.
    pub fn invalidate(&self) {
        self.broken.store(true, Ordering::Relaxed);
    }

    pub fn is_invalidated(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    /// Run `f` against the live session, counting the operation on the record
    pub(crate) async fn run<T, F, Fut>(&self, f: F) -> Result<T, TransportError>
    where
        F: FnOnce(Arc<dyn RemoteSession>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let session = self.inner.session_handle(&self.id)?;
        let result = f(session).await;
        self.inner
            .record_operation(&self.id, result.as_ref().err().map(|e| e.message.as_str()));
        result
    }

    /// Classify a transport failure of `operation` on `path`
    pub(crate) fn classify(&self, error: &TransportError, operation: &str, path: &str) -> SftpPoolError {
        let context = FailureContext::operation(operation, path)
            .with_endpoint(&self.target.host, self.target.port, &self.target.username)
            .with("tenant_id", &self.tenant_id);
        self.inner.classifier.classify(error, &context)
    }

    pub async fn stat(&self, path: &str) -> Result<RemoteMetadata, SftpPoolError> {
        self.run(|s| async move { s.stat(path).await })
            .await
            .map_err(|e| self.classify(&e, "stat", path))
    }

    pub async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, SftpPoolError> {
        self.run(|s| async move { s.read_dir(path).await })
            .await
            .map_err(|e| self.classify(&e, "list", path))
    }

    pub async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, SftpPoolError> {
        self.run(|s| async move { s.open_read(path).await })
            .await
            .map_err(|e| self.classify(&e, "read", path))
    }

    pub async fn open_write(&self, path: &str) -> Result<Box<dyn RemoteWriter>, SftpPoolError> {
        self.run(|s| async move { s.open_write(path).await })
            .await
            .map_err(|e| self.classify(&e, "write", path))
    }

    pub async fn remove(&self, path: &str) -> Result<(), SftpPoolError> {
        self.run(|s| async move { s.remove(path).await })
            .await
            .map_err(|e| self.classify(&e, "delete", path))
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), SftpPoolError> {
        self.run(|s| async move { s.mkdir(path).await })
            .await
            .map_err(|e| self.classify(&e, "create", path))
    }

    /// End the checkout and close the underlying connection
    pub async fn close(mut self) {
        self.released = true;
        let pool = super::ConnectionPool {
            inner: self.inner.clone(),
        };
        pool.close(&self.id).await;
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.is_invalidated() {
            self.inner.discard(&self.id);
        } else {
            debug!("Returning SFTP connection {} to the pool", self.id);
            self.inner.release(&self.id);
        }
    }
}

impl std::fmt::Debug for ScopedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedSession")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("target", &self.target)
            .finish()
    }
}
