//! Path normalization for the virtual filesystem.
//!
//! Every lookup goes through `normalize_path` first, so the tree only ever
//! sees absolute paths with no `.`/`..`/empty segments.

/// Resolve `.` and `..`, collapse repeated separators, force a leading `/`.
/// `..` at the root stays at the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Parent of a normalized path. The root has no parent.
pub fn parent_path(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(i) => Some(path[..i].to_string()),
        None => None,
    }
}

/// Last segment of a normalized path (`""` for the root).
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

pub fn join_path(dir: &str, name: &str) -> String {
    normalize_path(&format!("{dir}/{name}"))
}

/// True when `path` is `dir` or lies beneath it. Both must be normalized.
pub fn is_under(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return true;
    }
    path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}
