//! In-memory SFTP backend
//!
//! A complete non-network implementation of the transport traits. It keeps a
//! small tree of directories and files, and lets tests script connection
//! failures, latency and broken sessions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{
    ConnectTarget, Connector, Credentials, RemoteEntry, RemoteFileType, RemoteMetadata,
    RemoteReader, RemoteSession, RemoteWriter, TransportError,
};
use crate::sftp::path_utils::{file_name, normalize_remote_path, parent_remote_path};

const TYPE_NAME: &str = "MemoryTransport";

#[derive(Debug, Clone)]
enum Node {
    Dir { modified: i64 },
    File { data: Vec<u8>, modified: i64 },
}

impl Node {
    fn metadata(&self) -> RemoteMetadata {
        match self {
            Node::Dir { modified } => RemoteMetadata {
                file_type: RemoteFileType::Directory,
                size: 0,
                modified: Some(*modified),
            },
            Node::File { data, modified } => RemoteMetadata {
                file_type: RemoteFileType::File,
                size: data.len() as u64,
                modified: Some(*modified),
            },
        }
    }
}

fn no_such_file(path: &str) -> TransportError {
    TransportError::new(TYPE_NAME, format!("No such file: {}", path))
}

/// Resolve a path against the session home, which is `/`
fn resolve(path: &str) -> String {
    let normalized = normalize_remote_path(path);
    if normalized == "." {
        "/".to_string()
    } else if normalized.starts_with('/') {
        normalized
    } else {
        format!("/{}", normalized)
    }
}

/// A file tree shared by every session of one [`MemoryConnector`]
pub struct MemoryFs {
    nodes: Mutex<BTreeMap<String, Node>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir { modified: 0 });
        Self {
            nodes: Mutex::new(nodes),
        }
    }

    /// Create a directory and any missing parents
    pub fn add_dir(&self, path: &str) {
        let path = resolve(path);
        let mut nodes = self.nodes.lock();
        Self::ensure_parents(&mut nodes, &path);
        nodes
            .entry(path)
            .or_insert(Node::Dir {
                modified: Utc::now().timestamp(),
            });
    }

    /// Create or replace a file, creating missing parents
    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.add_file_with_mtime(path, data, Utc::now().timestamp());
    }

    pub fn add_file_with_mtime(&self, path: &str, data: impl Into<Vec<u8>>, modified: i64) {
        let path = resolve(path);
        let mut nodes = self.nodes.lock();
        Self::ensure_parents(&mut nodes, &path);
        nodes.insert(
            path,
            Node::File {
                data: data.into(),
                modified,
            },
        );
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().get(&resolve(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.lock().contains_key(&resolve(path))
    }

    fn ensure_parents(nodes: &mut BTreeMap<String, Node>, path: &str) {
        let mut current = parent_remote_path(path);
        while let Some(dir) = current {
            nodes
                .entry(dir.clone())
                .or_insert(Node::Dir { modified: 0 });
            current = parent_remote_path(&dir);
        }
    }

    fn stat(&self, path: &str) -> Result<RemoteMetadata, TransportError> {
        let path = resolve(path);
        self.nodes
            .lock()
            .get(&path)
            .map(Node::metadata)
            .ok_or_else(|| no_such_file(&path))
    }

    fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let path = resolve(path);
        let nodes = self.nodes.lock();
        match nodes.get(&path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(TransportError::new(
                    TYPE_NAME,
                    format!("Not a directory: {}", path),
                ))
            }
            None => return Err(no_such_file(&path)),
        }

        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let entries = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.len() > prefix.len() && !key[prefix.len()..].contains('/'))
            .map(|(key, node)| RemoteEntry {
                name: file_name(key).to_string(),
                metadata: node.metadata(),
            })
            .collect();
        Ok(entries)
    }

    fn remove_file(&self, path: &str) -> Result<(), TransportError> {
        let path = resolve(path);
        let mut nodes = self.nodes.lock();
        match nodes.get(&path) {
            Some(Node::File { .. }) => {
                nodes.remove(&path);
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(TransportError::new(
                TYPE_NAME,
                format!("Failure: {} is a directory", path),
            )),
            None => Err(no_such_file(&path)),
        }
    }

    fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        let path = resolve(path);
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&path) {
            return Err(TransportError::new(
                TYPE_NAME,
                format!("Failure: {} already exists", path),
            ));
        }
        let parent_is_dir = parent_remote_path(&path)
            .map(|parent| matches!(nodes.get(&parent), Some(Node::Dir { .. })))
            .unwrap_or(false);
        if !parent_is_dir {
            return Err(no_such_file(&path));
        }
        nodes.insert(
            path,
            Node::Dir {
                modified: Utc::now().timestamp(),
            },
        );
        Ok(())
    }

    fn check_writable(&self, path: &str) -> Result<(), TransportError> {
        let nodes = self.nodes.lock();
        if let Some(Node::Dir { .. }) = nodes.get(path) {
            return Err(TransportError::new(
                TYPE_NAME,
                format!("Failure: {} is a directory", path),
            ));
        }
        let parent_is_dir = parent_remote_path(path)
            .map(|parent| matches!(nodes.get(&parent), Some(Node::Dir { .. })))
            .unwrap_or(false);
        if parent_is_dir {
            Ok(())
        } else {
            Err(no_such_file(path))
        }
    }
}

#[derive(Default)]
struct Behaviour {
    password: Option<String>,
    connect_failures: VecDeque<TransportError>,
    connect_delay: Option<Duration>,
    stat_delay: Option<Duration>,
    read_delay: Option<Duration>,
    write_delay: Option<Duration>,
}

struct Shared {
    fs: Arc<MemoryFs>,
    behaviour: Mutex<Behaviour>,
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    open_sessions: AtomicUsize,
    chunks_read: AtomicUsize,
    generation: AtomicU64,
    broken_upto: AtomicU64,
}

/// [`Connector`] over a [`MemoryFs`]
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_fs(Arc::new(MemoryFs::new()))
    }

    pub fn with_fs(fs: Arc<MemoryFs>) -> Self {
        Self {
            shared: Arc::new(Shared {
                fs,
                behaviour: Mutex::new(Behaviour::default()),
                connect_attempts: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                open_sessions: AtomicUsize::new(0),
                chunks_read: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                broken_upto: AtomicU64::new(0),
            }),
        }
    }

    pub fn fs(&self) -> &Arc<MemoryFs> {
        &self.shared.fs
    }

    /// Only this password is accepted from now on
    pub fn require_password(&self, password: impl Into<String>) {
        self.shared.behaviour.lock().password = Some(password.into());
    }

    /// The next connect attempt fails with `error`; queued in call order
    pub fn fail_next_connect(&self, error: TransportError) {
        self.shared.behaviour.lock().connect_failures.push_back(error);
    }

    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.shared.behaviour.lock().connect_delay = delay;
    }

    /// Latency added to every `stat`, health checks included
    pub fn set_stat_delay(&self, delay: Option<Duration>) {
        self.shared.behaviour.lock().stat_delay = delay;
    }

    /// Latency added to every chunk read
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.shared.behaviour.lock().read_delay = delay;
    }

    /// Latency added to every chunk write
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.shared.behaviour.lock().write_delay = delay;
    }

    /// Every session established so far fails all further operations
    pub fn break_existing_sessions(&self) {
        let current = self.shared.generation.load(Ordering::SeqCst);
        self.shared.broken_upto.store(current, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Successful connects
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }

    pub fn chunks_read(&self) -> usize {
        self.shared.chunks_read.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn RemoteSession>, TransportError> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.shared.behaviour.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut behaviour = self.shared.behaviour.lock();
            if let Some(err) = behaviour.connect_failures.pop_front() {
                return Err(err);
            }
            if let (Some(expected), Credentials::Password { password }) =
                (&behaviour.password, credentials)
            {
                if expected != password {
                    return Err(TransportError::new(
                        TYPE_NAME,
                        format!(
                            "Authentication failed: permission denied for {}",
                            target
                        ),
                    ));
                }
            }
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemorySession {
            shared: self.shared.clone(),
            generation,
            closed: Mutex::new(false),
        }))
    }
}

struct MemorySession {
    shared: Arc<Shared>,
    generation: u64,
    closed: Mutex<bool>,
}

impl MemorySession {
    fn check_alive(&self) -> Result<(), TransportError> {
        if *self.closed.lock() {
            return Err(TransportError::new(TYPE_NAME, "Session closed"));
        }
        if self.generation <= self.shared.broken_upto.load(Ordering::SeqCst) {
            return Err(TransportError::new(TYPE_NAME, "Connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn stat(&self, path: &str) -> Result<RemoteMetadata, TransportError> {
        self.check_alive()?;
        let delay = self.shared.behaviour.lock().stat_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.fs.stat(path)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        self.check_alive()?;
        self.shared.fs.list(path)
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn RemoteReader>, TransportError> {
        self.check_alive()?;
        let data = match self.shared.fs.stat(path)? {
            meta if meta.is_dir() => {
                return Err(TransportError::new(
                    TYPE_NAME,
                    format!("Failure: {} is a directory", path),
                ))
            }
            _ => self.shared.fs.read(path).unwrap_or_default(),
        };
        let delay = self.shared.behaviour.lock().read_delay;
        Ok(Box::new(MemoryReader {
            shared: self.shared.clone(),
            data,
            pos: 0,
            delay,
        }))
    }

    async fn open_write(&self, path: &str) -> Result<Box<dyn RemoteWriter>, TransportError> {
        self.check_alive()?;
        let path = resolve(path);
        self.shared.fs.check_writable(&path)?;
        // opened with CREATE | TRUNCATE
        self.shared.fs.add_file(&path, Vec::new());
        let delay = self.shared.behaviour.lock().write_delay;
        Ok(Box::new(MemoryWriter {
            fs: self.shared.fs.clone(),
            path,
            buf: Vec::new(),
            delay,
        }))
    }

    async fn remove(&self, path: &str) -> Result<(), TransportError> {
        self.check_alive()?;
        self.shared.fs.remove_file(path)
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        self.check_alive()?;
        self.shared.fs.mkdir(path)
    }

    async fn close(&self) {
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            self.shared.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct MemoryReader {
    shared: Arc<Shared>,
    data: Vec<u8>,
    pos: usize,
    delay: Option<Duration>,
}

#[async_trait]
impl RemoteReader for MemoryReader {
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.chunks_read.fetch_add(1, Ordering::SeqCst);
        let end = (self.pos + max).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(chunk)
    }
}

struct MemoryWriter {
    fs: Arc<MemoryFs>,
    path: String,
    buf: Vec<u8>,
    delay: Option<Duration>,
}

#[async_trait]
impl RemoteWriter for MemoryWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransportError> {
        self.fs
            .add_file(&self.path, std::mem::take(&mut self.buf));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ConnectTarget {
        ConnectTarget::new("memory", 22, "tester")
    }

    #[tokio::test]
    async fn test_list_only_direct_children() {
        let connector = MemoryConnector::new();
        connector.fs().add_file("/logs/a.csv", "a");
        connector.fs().add_file("/logs/sub/b.csv", "bb");
        connector.fs().add_file("/logs2/c.csv", "c");

        let session = connector
            .connect(&target(), &Credentials::password("x"))
            .await
            .unwrap();
        let mut names: Vec<String> = session
            .read_dir("/logs")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.csv", "sub"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_found() {
        let connector = MemoryConnector::new();
        let session = connector
            .connect(&target(), &Credentials::password("x"))
            .await
            .unwrap();
        let err = session.read_dir("/nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let connector = MemoryConnector::new();
        connector.require_password("secret");

        let err = connector
            .connect(&target(), &Credentials::password("wrong"))
            .await
            .err()
            .unwrap();
        assert!(err.message.contains("Authentication failed"));
        assert_eq!(connector.connect_attempts(), 1);
        assert_eq!(connector.connect_count(), 0);

        assert!(connector
            .connect(&target(), &Credentials::password("secret"))
            .await
            .is_ok());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_write_then_read_in_chunks() {
        let connector = MemoryConnector::new();
        connector.fs().add_dir("/out");
        let session = connector
            .connect(&target(), &Credentials::password("x"))
            .await
            .unwrap();

        let mut writer = session.open_write("/out/file.txt").await.unwrap();
        writer.write_chunk(b"hello ").await.unwrap();
        writer.write_chunk(b"world").await.unwrap();
        writer.finish().await.unwrap();

        let mut reader = session.open_read("/out/file.txt").await.unwrap();
        assert_eq!(reader.read_chunk(5).await.unwrap(), b"hello");
        assert_eq!(reader.read_chunk(100).await.unwrap(), b" world");
        assert!(reader.read_chunk(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_write_requires_parent() {
        let connector = MemoryConnector::new();
        let session = connector
            .connect(&target(), &Credentials::password("x"))
            .await
            .unwrap();
        let err = session.open_write("/missing/file.txt").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_broken_and_closed_sessions_fail() {
        let connector = MemoryConnector::new();
        let first = connector
            .connect(&target(), &Credentials::password("x"))
            .await
            .unwrap();
        connector.break_existing_sessions();
        let second = connector
            .connect(&target(), &Credentials::password("x"))
            .await
            .unwrap();

        assert!(first.stat("/").await.is_err());
        assert!(second.stat("/").await.is_ok());

        assert_eq!(connector.open_sessions(), 2);
        second.close().await;
        second.close().await;
        assert_eq!(connector.open_sessions(), 1);
        assert!(second.stat("/").await.is_err());
    }
}
