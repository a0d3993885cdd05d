//! Request path normalisation and traversal checks.

/// Result of [`validate_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathCheck {
    /// Normalised path, safe to route
    Safe(String),
    /// Rejected, with the reason logged and returned in the 400 body
    Rejected(&'static str),
}

/// Collapse runs of `/` and drop a trailing `/` (the root keeps its slash).
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Why `path` is unsafe to serve, if it is.
pub fn unsafe_reason(path: &str) -> Option<&'static str> {
    if path.is_empty() {
        Some("empty path")
    } else if !path.starts_with('/') {
        Some("path must start with '/'")
    } else if path.contains("/../") || path.ends_with("/..") {
        Some("path traversal")
    } else if path.contains('\\') {
        Some("backslash in path")
    } else if path.contains('\0') {
        Some("null byte in path")
    } else {
        None
    }
}

/// Normalise `path`, then reject traversal and malformed input.
pub fn validate_path(path: &str) -> PathCheck {
    let normalized = normalize_path(path);
    match unsafe_reason(&normalized) {
        Some(reason) => PathCheck::Rejected(reason),
        None => PathCheck::Safe(normalized),
    }
}
