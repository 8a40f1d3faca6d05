//! File operations over a pooled session
//!
//! Every remote call is bounded by the transfer timeout. A timed-out call
//! leaves the wire state unknown, so the session is invalidated and gets
//! closed instead of returned to the pool.
//!
//! Listings are cached per endpoint for [`CACHE_TTL`](super::cache::CACHE_TTL);
//! every mutation through this type invalidates the listings it affects.

use std::collections::VecDeque;
use std::future::Future;
use std::io::SeekFrom;
use std::time::Duration;

use chrono::Utc;
use glob::{MatchOptions, Pattern};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::cache::{CacheKey, DirectoryCache};
use super::path_utils::{join_remote_path, normalize_remote_path, parent_remote_path, relative_remote_path};
use super::types::{
    EntryType, FileEntry, FindOptions, LatestFilesOptions, ListOptions, TransferLimits,
};
use crate::error::{ResourceKind, SftpPoolError};
use crate::pool::ScopedSession;
use crate::transport::{RemoteMetadata, TransportError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Data for [`FileOperations::write_file`]
pub enum WriteSource {
    Bytes(Vec<u8>),
    Text(String),
    /// Seekable stream; its size is taken by seeking to the end
    Reader(Box<dyn ReadSeek>),
}

pub trait ReadSeek: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncRead + AsyncSeek + Unpin + Send> ReadSeek for T {}

enum Payload {
    Bytes(Vec<u8>),
    Reader(Box<dyn ReadSeek>),
}

impl WriteSource {
    pub fn reader(reader: impl AsyncRead + AsyncSeek + Unpin + Send + 'static) -> Self {
        WriteSource::Reader(Box::new(reader))
    }
}

impl From<Vec<u8>> for WriteSource {
    fn from(data: Vec<u8>) -> Self {
        WriteSource::Bytes(data)
    }
}

impl From<&[u8]> for WriteSource {
    fn from(data: &[u8]) -> Self {
        WriteSource::Bytes(data.to_vec())
    }
}

impl From<String> for WriteSource {
    fn from(text: String) -> Self {
        WriteSource::Text(text)
    }
}

impl From<&str> for WriteSource {
    fn from(text: &str) -> Self {
        WriteSource::Text(text.to_string())
    }
}

fn compile_pattern(pattern: Option<&str>) -> Result<Option<Pattern>, SftpPoolError> {
    pattern
        .map(|p| {
            Pattern::new(p).map_err(|e| {
                SftpPoolError::configuration(format!("Invalid file pattern '{}': {}", p, e), "pattern")
            })
        })
        .transpose()
}

fn too_large(what: &str, size: u64, max: u64, path: &str) -> SftpPoolError {
    SftpPoolError::resource(
        ResourceKind::Memory,
        format!("{}: {} bytes (max: {} bytes)", what, size, max),
    )
    .with_context("path", path)
    .with_context("size", size)
    .with_context("max_size", max)
}

/// Newest first; unknown modification times sort last
fn sort_newest_first(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| b.modified.unwrap_or(0).cmp(&a.modified.unwrap_or(0)));
}

/// Run `fut` with `timeout`. `None` means it timed out; the session has been
/// invalidated by then.
async fn bounded<T, F>(session: &ScopedSession, timeout: Duration, fut: F) -> Option<Result<T, TransportError>>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Some(result),
        Err(_) => {
            session.invalidate();
            None
        }
    }
}

fn timed_out(operation: &str, path: &str, timeout: Duration) -> SftpPoolError {
    SftpPoolError::timeout(
        format!("SFTP {} of '{}' timed out after {}s", operation, path, timeout.as_secs()),
        operation,
        timeout,
    )
    .with_context("path", path)
}

/// Chunk-level timeouts on transfers surface as file errors
fn transfer_timed_out(operation: &str, path: &str, timeout: Duration) -> SftpPoolError {
    SftpPoolError::file(
        format!("{} timed out after {}s", operation_label(operation), timeout.as_secs()),
        path,
        operation,
    )
    .with_context("timeout", timeout.as_secs())
}

fn operation_label(operation: &str) -> &'static str {
    match operation {
        "read" => "Read",
        "write" => "Write",
        _ => "Transfer",
    }
}

/// Directory listing, transfer and search helpers sharing one listing cache
pub struct FileOperations {
    cache: DirectoryCache,
    limits: TransferLimits,
}

impl Default for FileOperations {
    fn default() -> Self {
        Self::new(TransferLimits::default())
    }
}

impl FileOperations {
    pub fn new(limits: TransferLimits) -> Self {
        Self {
            cache: DirectoryCache::default(),
            limits,
        }
    }

    pub fn with_cache(limits: TransferLimits, cache: DirectoryCache) -> Self {
        Self { cache, limits }
    }

    pub fn limits(&self) -> &TransferLimits {
        &self.limits
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    fn invalidate(&self, session: &ScopedSession, path: &str) {
        self.cache
            .invalidate(session.host(), session.port(), &normalize_remote_path(path));
    }

    async fn stat_bounded(
        &self,
        session: &ScopedSession,
        path: &str,
        operation: &str,
    ) -> Result<RemoteMetadata, SftpPoolError> {
        let timeout = self.limits.timeout;
        match bounded(session, timeout, session.run(|s| async move { s.stat(path).await })).await {
            Some(Ok(meta)) => Ok(meta),
            Some(Err(e)) => Err(session.classify(&e, operation, path)),
            None => Err(timed_out(operation, path, timeout)),
        }
    }

    /// List `path`, optionally recursing and filtering by a glob.
    ///
    /// A missing top-level directory yields an empty list. Unreadable
    /// subdirectories are skipped.
    pub async fn list_directory(
        &self,
        session: &ScopedSession,
        path: &str,
        options: &ListOptions,
    ) -> Result<Vec<FileEntry>, SftpPoolError> {
        let root = normalize_remote_path(path);
        let pattern = compile_pattern(options.pattern.as_deref())?;
        let key = CacheKey::new(session.host(), session.port(), &root, options);

        if options.use_cache {
            if let Some(mut entries) = self.cache.get(&key) {
                debug!("Directory cache hit for {}:{}{}", session.host(), session.port(), root);
                if options.sort_by_modified_desc {
                    sort_newest_first(&mut entries);
                }
                return Ok(entries);
            }
        }

        let max_depth = if options.recursive {
            options.max_depth.max(1)
        } else {
            1
        };
        let timeout = self.limits.timeout;
        let mut entries = Vec::new();
        let mut pending: VecDeque<(String, usize)> = VecDeque::from([(root.clone(), 1)]);

        while let Some((dir, depth)) = pending.pop_front() {
            let listing = bounded(
                session,
                timeout,
                session.run(|s| {
                    let dir = dir.clone();
                    async move { s.read_dir(&dir).await }
                }),
            )
            .await;

            let children = match listing {
                Some(Ok(children)) => children,
                Some(Err(e)) if depth == 1 => {
                    if e.is_not_found() {
                        debug!("Directory {} does not exist, returning empty listing", root);
                        return Ok(Vec::new());
                    }
                    return Err(session.classify(&e, "list", &root));
                }
                Some(Err(e)) => {
                    warn!("Skipping unreadable directory {}: {}", dir, e);
                    continue;
                }
                None => return Err(timed_out("list", &dir, timeout)),
            };

            for child in children {
                if child.name == "." || child.name == ".." {
                    continue;
                }
                let Some(file_type) = EntryType::from_remote(child.metadata.file_type) else {
                    continue;
                };
                let full_path = join_remote_path(&dir, &child.name);

                if file_type == EntryType::Directory {
                    if options.include_dirs {
                        entries.push(FileEntry {
                            name: child.name.clone(),
                            relative_path: relative_remote_path(&full_path, &root),
                            full_path: full_path.clone(),
                            file_type,
                            size: 0,
                            modified: child.metadata.modified,
                        });
                    }
                    if depth < max_depth {
                        pending.push_back((full_path, depth + 1));
                    }
                    continue;
                }

                if let Some(pattern) = &pattern {
                    if !pattern.matches_with(&child.name, MATCH_OPTIONS) {
                        continue;
                    }
                }
                entries.push(FileEntry {
                    relative_path: relative_remote_path(&full_path, &root),
                    name: child.name,
                    full_path,
                    file_type,
                    size: child.metadata.size,
                    modified: child.metadata.modified,
                });
            }
        }

        debug!(
            "Listed {} entries under {}:{}{} (depth {})",
            entries.len(),
            session.host(),
            session.port(),
            root,
            max_depth
        );
        if options.use_cache {
            self.cache.insert(key, entries.clone());
        }
        if options.sort_by_modified_desc {
            sort_newest_first(&mut entries);
        }
        Ok(entries)
    }

    /// Read a whole file with the default limits
    pub async fn read_file(&self, session: &ScopedSession, path: &str) -> Result<Vec<u8>, SftpPoolError> {
        self.read_file_with(session, path, &self.limits).await
    }

    /// Read a whole file in chunks. Oversized files are rejected before the
    /// first chunk is read.
    pub async fn read_file_with(
        &self,
        session: &ScopedSession,
        path: &str,
        limits: &TransferLimits,
    ) -> Result<Vec<u8>, SftpPoolError> {
        let meta = self.stat_bounded(session, path, "read").await?;
        if meta.is_dir() {
            return Err(SftpPoolError::file(
                format!("Cannot read '{}': it is a directory", path),
                path,
                "read",
            ));
        }
        if meta.size > limits.max_size {
            return Err(too_large("File is too large", meta.size, limits.max_size, path));
        }

        let timeout = limits.timeout;
        let mut reader =
            match bounded(session, timeout, session.run(|s| async move { s.open_read(path).await })).await {
                Some(Ok(reader)) => reader,
                Some(Err(e)) => return Err(session.classify(&e, "read", path)),
                None => return Err(timed_out("read", path, timeout)),
            };

        let chunk_size = limits.chunk_size.max(1);
        let mut data = Vec::with_capacity(meta.size as usize);
        loop {
            let chunk = match bounded(session, timeout, reader.read_chunk(chunk_size)).await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(session.classify(&e, "read", path)),
                None => {
                    warn!("Read of {} timed out after {} bytes", path, data.len());
                    return Err(transfer_timed_out("read", path, timeout));
                }
            };
            if chunk.is_empty() {
                break;
            }
            if (data.len() + chunk.len()) as u64 > limits.max_size {
                return Err(too_large(
                    "Read size limit exceeded",
                    (data.len() + chunk.len()) as u64,
                    limits.max_size,
                    path,
                ));
            }
            data.extend_from_slice(&chunk);
        }

        debug!("Read {} bytes from {}", data.len(), path);
        Ok(data)
    }

    /// Write `source` to `path` with the default limits
    pub async fn write_file(
        &self,
        session: &ScopedSession,
        path: &str,
        source: impl Into<WriteSource>,
    ) -> Result<u64, SftpPoolError> {
        self.write_file_with(session, path, source.into(), &self.limits)
            .await
    }

    /// Write in chunks, creating missing parent directories. Returns the
    /// number of bytes written.
    pub async fn write_file_with(
        &self,
        session: &ScopedSession,
        path: &str,
        source: WriteSource,
        limits: &TransferLimits,
    ) -> Result<u64, SftpPoolError> {
        let source_error = |e: std::io::Error| {
            SftpPoolError::file(format!("Failed to read source data: {}", e), path, "write")
        };

        let mut payload = match source {
            WriteSource::Bytes(data) => Payload::Bytes(data),
            WriteSource::Text(text) => Payload::Bytes(text.into_bytes()),
            WriteSource::Reader(reader) => Payload::Reader(reader),
        };
        let size = match &mut payload {
            Payload::Bytes(data) => data.len() as u64,
            Payload::Reader(reader) => {
                let size = reader.seek(SeekFrom::End(0)).await.map_err(source_error)?;
                reader.seek(SeekFrom::Start(0)).await.map_err(source_error)?;
                size
            }
        };
        if size > limits.max_size {
            return Err(too_large("Data is too large", size, limits.max_size, path));
        }

        if let Some(parent) = parent_remote_path(path) {
            self.ensure_directory(session, &parent, limits.timeout).await?;
        }

        let timeout = limits.timeout;
        let mut writer =
            match bounded(session, timeout, session.run(|s| async move { s.open_write(path).await })).await {
                Some(Ok(writer)) => writer,
                Some(Err(e)) => return Err(session.classify(&e, "write", path)),
                None => return Err(timed_out("write", path, timeout)),
            };

        let result = async {
            let mut written: u64 = 0;
            match &mut payload {
                Payload::Bytes(data) => {
                    for chunk in data.chunks(limits.chunk_size.max(1)) {
                        match bounded(session, timeout, writer.write_chunk(chunk)).await {
                            Some(Ok(())) => written += chunk.len() as u64,
                            Some(Err(e)) => return Err(session.classify(&e, "write", path)),
                            None => return Err(transfer_timed_out("write", path, timeout)),
                        }
                    }
                }
                Payload::Reader(reader) => {
                    let mut buf = vec![0u8; limits.chunk_size.max(1)];
                    loop {
                        let n = reader.read(&mut buf).await.map_err(source_error)?;
                        if n == 0 {
                            break;
                        }
                        if written + n as u64 > limits.max_size {
                            return Err(too_large(
                                "Data is too large",
                                written + n as u64,
                                limits.max_size,
                                path,
                            ));
                        }
                        match bounded(session, timeout, writer.write_chunk(&buf[..n])).await {
                            Some(Ok(())) => written += n as u64,
                            Some(Err(e)) => return Err(session.classify(&e, "write", path)),
                            None => return Err(transfer_timed_out("write", path, timeout)),
                        }
                    }
                }
            }

            match bounded(session, timeout, writer.finish()).await {
                Some(Ok(())) => {}
                Some(Err(e)) => return Err(session.classify(&e, "write", path)),
                None => return Err(transfer_timed_out("write", path, timeout)),
            }
            Ok::<u64, SftpPoolError>(written)
        }
        .await;

        // the file was created or truncated even if the transfer failed
        self.invalidate(session, path);
        let written = result?;
        info!("Wrote {} bytes to {}", written, path);
        Ok(written)
    }

    pub async fn delete_file(&self, session: &ScopedSession, path: &str) -> Result<(), SftpPoolError> {
        let timeout = self.limits.timeout;
        match bounded(session, timeout, session.run(|s| async move { s.remove(path).await })).await {
            Some(Ok(())) => {
                self.invalidate(session, path);
                info!("Deleted {}", path);
                Ok(())
            }
            Some(Err(e)) => Err(session.classify(&e, "delete", path)),
            None => Err(timed_out("delete", path, timeout)),
        }
    }

    /// Files under `path` matching the options, at most `max_files` of them
    pub async fn find_files(
        &self,
        session: &ScopedSession,
        path: &str,
        options: &FindOptions,
    ) -> Result<Vec<FileEntry>, SftpPoolError> {
        let list_options = ListOptions {
            pattern: options.pattern.clone(),
            recursive: options.recursive,
            max_depth: options.max_depth,
            include_dirs: false,
            sort_by_modified_desc: options.sort_by_modified_desc,
            use_cache: true,
        };
        let mut files = self.list_directory(session, path, &list_options).await?;
        if options.max_files > 0 {
            files.truncate(options.max_files);
        }
        Ok(files)
    }

    /// Most recently modified files, newest first
    pub async fn get_latest_files(
        &self,
        session: &ScopedSession,
        path: &str,
        options: &LatestFilesOptions,
    ) -> Result<Vec<FileEntry>, SftpPoolError> {
        let list_options = ListOptions::default()
            .pattern(options.pattern.clone())
            .recursive(options.max_depth)
            .newest_first();
        let mut files = self.list_directory(session, path, &list_options).await?;

        if options.max_age_hours > 0 {
            let cutoff = Utc::now().timestamp() - (options.max_age_hours as i64) * 3600;
            files.retain(|f| f.modified.map_or(true, |m| m >= cutoff));
        }
        if options.max_files > 0 {
            files.truncate(options.max_files);
        }
        Ok(files)
    }

    pub async fn file_exists(&self, session: &ScopedSession, path: &str) -> bool {
        matches!(self.stat_bounded(session, path, "stat").await, Ok(meta) if meta.is_file())
    }

    pub async fn dir_exists(&self, session: &ScopedSession, path: &str) -> bool {
        matches!(self.stat_bounded(session, path, "stat").await, Ok(meta) if meta.is_dir())
    }

    /// Create `path`; with `parents`, missing ancestors too. An existing
    /// directory is not an error when `parents` is set.
    pub async fn create_directory(
        &self,
        session: &ScopedSession,
        path: &str,
        parents: bool,
    ) -> Result<(), SftpPoolError> {
        let timeout = self.limits.timeout;
        if parents {
            self.ensure_directory(session, path, timeout).await?;
        } else {
            match bounded(session, timeout, session.run(|s| async move { s.mkdir(path).await })).await {
                Some(Ok(())) => {}
                Some(Err(e)) => return Err(session.classify(&e, "create", path)),
                None => return Err(timed_out("create", path, timeout)),
            }
        }
        self.invalidate(session, path);
        Ok(())
    }

    /// `mkdir -p`: walk up to the first existing ancestor, then create
    /// downwards
    async fn ensure_directory(
        &self,
        session: &ScopedSession,
        path: &str,
        timeout: Duration,
    ) -> Result<(), SftpPoolError> {
        let mut missing = Vec::new();
        let mut current = Some(normalize_remote_path(path));

        while let Some(dir) = current {
            if dir == "/" || dir == "." {
                break;
            }
            let probe = bounded(
                session,
                timeout,
                session.run(|s| {
                    let dir = dir.clone();
                    async move { s.stat(&dir).await }
                }),
            )
            .await;
            match probe {
                Some(Ok(meta)) if meta.is_dir() => break,
                Some(Ok(_)) => {
                    return Err(SftpPoolError::directory(
                        format!("'{}' exists and is not a directory", dir),
                        &dir,
                        "create",
                    ))
                }
                Some(Err(e)) if e.is_not_found() => {
                    current = parent_remote_path(&dir);
                    missing.push(dir);
                }
                Some(Err(e)) => return Err(session.classify(&e, "create", &dir)),
                None => return Err(timed_out("create", &dir, timeout)),
            }
        }

        for dir in missing.into_iter().rev() {
            debug!("Creating remote directory {}", dir);
            let created = bounded(
                session,
                timeout,
                session.run(|s| {
                    let dir = dir.clone();
                    async move { s.mkdir(&dir).await }
                }),
            )
            .await;
            match created {
                Some(Ok(())) => self.invalidate(session, &dir),
                Some(Err(e)) => return Err(session.classify(&e, "create", &dir)),
                None => return Err(timed_out("create", &dir, timeout)),
            }
        }
        Ok(())
    }

    /// Round-trip probe. Returns whether it succeeded and, if not, the
    /// user-facing reason.
    pub async fn test_connection(
        &self,
        session: &ScopedSession,
        probe_path: Option<&str>,
    ) -> (bool, Option<String>) {
        let path = probe_path.unwrap_or(".");
        match self.stat_bounded(session, path, "stat").await {
            Ok(_) => (true, None),
            Err(e) => {
                e.log();
                (false, Some(e.format_for_user()))
            }
        }
    }
}
