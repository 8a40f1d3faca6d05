//! SFTP data types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::transport::RemoteFileType;

/// Entry type in a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
}

impl EntryType {
    pub(crate) fn from_remote(file_type: RemoteFileType) -> Option<Self> {
        match file_type {
            RemoteFileType::File => Some(EntryType::File),
            RemoteFileType::Directory => Some(EntryType::Directory),
            // links and specials are not followed
            RemoteFileType::Symlink | RemoteFileType::Other => None,
        }
    }
}

/// File entry information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// File name (not full path)
    pub name: String,
    /// Path relative to the listed directory
    pub relative_path: String,
    pub full_path: String,
    pub file_type: EntryType,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (Unix timestamp)
    pub modified: Option<i64>,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.file_type == EntryType::Directory
    }
}

/// Parameters of `list_directory`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListOptions {
    /// Glob matched case-insensitively against file names
    pub pattern: Option<String>,
    pub recursive: bool,
    /// Depth of the walk; 1 lists only the directory itself
    pub max_depth: usize,
    pub include_dirs: bool,
    pub sort_by_modified_desc: bool,
    pub use_cache: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            pattern: None,
            recursive: false,
            max_depth: 3,
            include_dirs: false,
            sort_by_modified_desc: false,
            use_cache: true,
        }
    }
}

impl ListOptions {
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn recursive(mut self, max_depth: usize) -> Self {
        self.recursive = true;
        self.max_depth = max_depth;
        self
    }

    pub fn include_dirs(mut self, include: bool) -> Self {
        self.include_dirs = include;
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.sort_by_modified_desc = true;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Parameters of `find_files`
#[derive(Debug, Clone)]
pub struct FindOptions {
    pub pattern: Option<String>,
    pub recursive: bool,
    pub max_depth: usize,
    /// 0 = unlimited
    pub max_files: usize,
    pub sort_by_modified_desc: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            pattern: None,
            recursive: true,
            max_depth: 3,
            max_files: 0,
            sort_by_modified_desc: true,
        }
    }
}

/// Parameters of `get_latest_files`
#[derive(Debug, Clone)]
pub struct LatestFilesOptions {
    pub pattern: String,
    pub max_depth: usize,
    pub max_files: usize,
    /// Only files modified within this many hours; 0 = unlimited
    pub max_age_hours: u64,
}

impl Default for LatestFilesOptions {
    fn default() -> Self {
        Self {
            pattern: "*.csv".to_string(),
            max_depth: 5,
            max_files: 10,
            max_age_hours: 24,
        }
    }
}

/// Bounds applied to reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    /// Per-chunk timeout
    pub timeout: Duration,
    pub chunk_size: usize,
    pub max_size: u64,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            chunk_size: 64 * 1024,
            max_size: 10 * 1024 * 1024,
        }
    }
}

impl TransferLimits {
    /// Default limits with the pool's operation timeout
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            timeout: config.operation_timeout(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}
