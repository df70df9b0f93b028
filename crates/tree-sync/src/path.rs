/// Last segment of a slash-separated resource path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent directory of a resource path, or `None` for a root-level path.
pub fn dirname(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// True if `path` lies strictly beneath `prefix`, respecting segment
/// boundaries (`g` contains `g/x` but not `gx`).
pub fn is_under(path: &str, prefix: &str) -> bool {
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == b'/'
}

/// Path of `path` relative to `ancestor`, if it lies beneath it.
pub fn relative<'a>(ancestor: &str, path: &'a str) -> Option<&'a str> {
    if is_under(path, ancestor) {
        Some(&path[ancestor.len() + 1..])
    } else {
        None
    }
}

/// Join two path fragments with a single separator.
pub fn join(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_owned(),
        (_, true) => base.to_owned(),
        _ => format!("{base}/{rest}"),
    }
}

/// Every proper ancestor of `path`, nearest first.
/// `a/b/c` yields `a/b`, then `a`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(dirname(path), |p| dirname(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- basename / dirname --

    #[test]
    fn basename_of_nested_path() {
        assert_eq!(basename("a/b/c"), "c");
    }

    #[test]
    fn basename_of_root_path() {
        assert_eq!(basename("a"), "a");
    }

    #[test]
    fn dirname_of_nested_path() {
        assert_eq!(dirname("a/b/c"), Some("a/b"));
    }

    #[test]
    fn dirname_of_root_path_is_none() {
        assert_eq!(dirname("a"), None);
    }

    // -- is_under / relative --

    #[test]
    fn child_is_under_parent() {
        assert!(is_under("g1/sub/proj", "g1"));
    }

    #[test]
    fn sibling_with_shared_prefix_is_not_under() {
        assert!(!is_under("g10/proj", "g1"));
    }

    #[test]
    fn path_is_not_under_itself() {
        assert!(!is_under("g1", "g1"));
    }

    #[test]
    fn relative_strips_ancestor() {
        assert_eq!(relative("g1", "g1/sub/proj"), Some("sub/proj"));
        assert_eq!(relative("g1", "g2/proj"), None);
    }

    // -- join --

    #[test]
    fn join_inserts_single_separator() {
        assert_eq!(join("d1", "sub/proj"), "d1/sub/proj");
        assert_eq!(join("", "proj"), "proj");
        assert_eq!(join("d1", ""), "d1");
    }

    // -- ancestors --

    #[test]
    fn ancestors_nearest_first() {
        let all: Vec<&str> = ancestors("a/b/c").collect();
        assert_eq!(all, vec!["a/b", "a"]);
    }

    #[test]
    fn root_has_no_ancestors() {
        assert_eq!(ancestors("a").count(), 0);
    }
}
