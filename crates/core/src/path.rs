//! Logical path normalisation and prefix matching.
//!
//! Every path stored in metadata or handed to the blob store is a *logical*
//! path: absolute, `/`-separated, cleaned (`/a/../b` resolves to `/b`), with
//! no trailing slash except for the root `/` itself.

/// Clean a logical path: force a leading `/`, collapse `//` and `.`,
/// resolve `..` without escaping the root, and strip trailing slashes.
pub fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Parent directory of a cleaned path. The parent of a top-level entry
/// (and of `/` itself) is `/`.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Final component of a cleaned path (empty for `/`).
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Join a cleaned directory path with a bare leaf name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// The path itself plus every proper ancestor, ending at `/`.
/// `/a/b/c` yields `["/a/b/c", "/a/b", "/a", "/"]`.
pub fn chain(path: &str) -> Vec<String> {
    let cleaned = clean(path);
    let mut out = vec![cleaned.clone()];
    let mut curr = cleaned;
    while curr != "/" {
        curr = parent(&curr);
        out.push(curr.clone());
    }
    out
}

/// Whether `path` equals `prefix` or lies beneath it.
/// A `prefix` of `/` covers everything. Both sides are cleaned first.
pub fn is_within(path: &str, prefix: &str) -> bool {
    let prefix = clean(prefix);
    if prefix == "/" {
        return true;
    }
    let path = clean(path);
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

/// Whether `name` is a valid bare leaf: non-empty, no separator, and not a
/// dot component. Used to validate `rename_to` targets and multipart
/// filenames.
pub fn is_bare_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_normalises_variants() {
        assert_eq!(clean("/a/./b"), "/a/b");
        assert_eq!(clean("/a/b/"), "/a/b");
        assert_eq!(clean("/a//b"), "/a/b");
        assert_eq!(clean("a/b"), "/a/b");
        assert_eq!(clean("/a/../b"), "/b");
        assert_eq!(clean("/../../x"), "/x");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean(""), "/");
    }

    #[test]
    fn chain_walks_to_root() {
        assert_eq!(chain("/a/b/c"), vec!["/a/b/c", "/a/b", "/a", "/"]);
        assert_eq!(chain("/"), vec!["/"]);
    }

    #[test]
    fn is_within_requires_component_boundary() {
        assert!(is_within("/images/a.png", "/images"));
        assert!(is_within("/images", "/images"));
        assert!(!is_within("/images-backup", "/images"));
        assert!(is_within("/anything", "/"));
    }

    #[test]
    fn bare_names() {
        assert!(is_bare_name("file.txt"));
        assert!(!is_bare_name(""));
        assert!(!is_bare_name(".."));
        assert!(!is_bare_name("a/b"));
    }
}
