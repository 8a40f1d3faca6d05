//! SFTP file operations module
//!
//! Directory listing with a short-lived cache, size-guarded chunked
//! transfers and file search, all running over a pooled [`ScopedSession`].
//!
//! [`ScopedSession`]: crate::pool::ScopedSession

pub mod cache;
pub mod operations;
pub mod path_utils;
pub mod types;

pub use cache::{CacheKey, DirectoryCache, CACHE_TTL};
pub use operations::{FileOperations, ReadSeek, WriteSource};
pub use types::*;
