//! Directory listing cache
//!
//! Entries live for [`CACHE_TTL`] and are keyed by the endpoint plus every
//! parameter that changes the walk. Races between writers are benign: the
//! last insert wins.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::path_utils::is_same_or_within;
use super::types::{FileEntry, ListOptions};

pub const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub host: String,
    pub port: u16,
    /// Normalized directory path
    pub path: String,
    pub pattern: Option<String>,
    pub recursive: bool,
    pub max_depth: usize,
    pub include_dirs: bool,
}

impl CacheKey {
    pub fn new(host: &str, port: u16, path: &str, options: &ListOptions) -> Self {
        Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
            pattern: options.pattern.clone(),
            recursive: options.recursive,
            max_depth: options.max_depth,
            include_dirs: options.include_dirs,
        }
    }
}

struct CacheEntry {
    stored_at: Instant,
    entries: Vec<FileEntry>,
}

pub struct DirectoryCache {
    ttl: Duration,
    entries: DashMap<CacheKey, CacheEntry>,
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new(CACHE_TTL)
    }
}

impl DirectoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<FileEntry>> {
        let hit = self.entries.get(key).and_then(|entry| {
            (entry.stored_at.elapsed() < self.ttl).then(|| entry.entries.clone())
        });
        if hit.is_none() {
            self.entries
                .remove_if(key, |_, entry| entry.stored_at.elapsed() >= self.ttl);
        }
        hit
    }

    pub fn insert(&self, key: CacheKey, entries: Vec<FileEntry>) {
        self.entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                entries,
            },
        );
    }

    /// Drop every listing on `host:port` that `path` lies in, or that lies
    /// in `path`. Matching is by whole path segments.
    pub fn invalidate(&self, host: &str, port: u16, path: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| {
            !(key.host == host
                && key.port == port
                && (is_same_or_within(path, &key.path) || is_same_or_within(&key.path, path)))
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Invalidated {} cached listings for {}:{}{}", removed, host, port, path);
        }
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
