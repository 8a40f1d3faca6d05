//! Remote path utilities
//!
//! Remote SFTP paths always use `/` as separator (per SFTP protocol), even
//! when the server runs on Windows. These helpers never touch the local
//! filesystem.

/// Check if a remote SFTP path is absolute.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.is_empty() || base == "." {
        component.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Collapse duplicate separators, `.` segments and `..` segments, and drop
/// any trailing `/`. The root stays `/`; an empty relative path becomes `.`.
pub fn normalize_remote_path(path: &str) -> String {
    let absolute = is_absolute_remote_path(path);
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Parent directory of a remote path, `None` for the root or a bare name.
///
/// - `/logs/a.csv` → `/logs`
/// - `/a.csv` → `/`
/// - `logs/a.csv` → `logs`
pub fn parent_remote_path(path: &str) -> Option<String> {
    let normalized = normalize_remote_path(path);
    if normalized == "/" || normalized == "." {
        return None;
    }
    match normalized.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(normalized[..idx].to_string()),
        None => None,
    }
}

/// Last segment of a remote path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Whether `path` is `dir` itself or lies below it, compared segment by
/// segment: `/logs2/a.csv` is not within `/logs`.
pub fn is_same_or_within(path: &str, dir: &str) -> bool {
    let path = normalize_remote_path(path);
    let dir = normalize_remote_path(dir);

    if path == dir {
        return true;
    }
    if dir == "/" {
        return is_absolute_remote_path(&path);
    }
    if dir == "." {
        return !is_absolute_remote_path(&path);
    }
    path.strip_prefix(dir.as_str())
        .is_some_and(|rest| rest.starts_with('/'))
}

/// `full` expressed relative to `base`; `full` itself when it is not below
/// `base`.
pub fn relative_remote_path(full: &str, base: &str) -> String {
    let full_n = normalize_remote_path(full);
    let base_n = normalize_remote_path(base);

    if base_n == "." && !is_absolute_remote_path(&full_n) {
        return full_n;
    }
    if base_n == "/" {
        return full_n.trim_start_matches('/').to_string();
    }
    match full_n.strip_prefix(base_n.as_str()) {
        Some(rest) if rest.starts_with('/') => rest[1..].to_string(),
        _ => full_n,
    }
}
