use camino::{Utf8Path, Utf8PathBuf};
use percent_encoding::percent_decode_str;

const INDEX: &str = "index.html";

/// A request-path prefix served from one directory, ahead of the roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOverride {
    prefix: String,
    dir: Utf8PathBuf,
}

impl RouteOverride {
    pub fn new(prefix: &str, dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            prefix: format!("/{}", prefix.trim_matches('/')),
            dir: dir.into(),
        }
    }

    /// The request path below the prefix, if the prefix matches on a
    /// segment boundary.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.prefix == "/" {
            return Some(path);
        }
        match path.strip_prefix(&self.prefix)? {
            "" => Some(""),
            rest => rest.strip_prefix('/'),
        }
    }
}

/// Layered lookup of request paths on disk.
///
/// Overrides are consulted first, the longest matching prefix wins and a
/// matched prefix never falls through to the roots. Roots are tried in
/// order and the first one holding the file wins. A directory resolves to
/// its `index.html`.
#[derive(Debug, Clone, Default)]
pub struct ServerRoots {
    overrides: Vec<RouteOverride>,
    roots: Vec<Utf8PathBuf>,
}

impl ServerRoots {
    pub fn new(
        roots: impl IntoIterator<Item = Utf8PathBuf>,
        overrides: impl IntoIterator<Item = RouteOverride>,
    ) -> Self {
        let mut overrides: Vec<_> = overrides.into_iter().collect();
        overrides.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Self {
            overrides,
            roots: roots.into_iter().collect(),
        }
    }

    /// Maps a request path (query string allowed) to an existing file.
    pub fn resolve(&self, request: &str) -> Option<Utf8PathBuf> {
        let path = request.split(['?', '#']).next().unwrap_or_default();
        let path = percent_decode_str(path).decode_utf8().ok()?;
        let path = format!("/{}", path.trim_start_matches('/'));

        if let Some(route) = self.overrides.iter().find(|r| r.strip(&path).is_some()) {
            let rel = sanitize(route.strip(&path)?)?;
            return lookup(&route.dir, &rel);
        }

        let rel = sanitize(&path)?;
        self.roots.iter().find_map(|root| lookup(root, &rel))
    }
}

/// Relative file path for a request path; `None` if it tries to leave the
/// root.
fn sanitize(path: &str) -> Option<Utf8PathBuf> {
    let mut rel = Utf8PathBuf::new();

    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains(':') => return None,
            s => rel.push(s),
        }
    }

    Some(rel)
}

fn lookup(dir: &Utf8Path, rel: &Utf8Path) -> Option<Utf8PathBuf> {
    let path = dir.join(rel);

    if path.is_file() {
        return Some(path);
    }

    let index = path.join(INDEX);
    if path.is_dir() && index.is_file() {
        return Some(index);
    }

    None
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    struct Tree {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
    }

    impl Tree {
        fn new(files: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
            for file in files {
                let path = root.join(file);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, file).unwrap();
            }
            Self { _dir: dir, root }
        }
    }

    fn layered(tree: &Tree) -> ServerRoots {
        ServerRoots::new(
            [tree.root.join("a"), tree.root.join("b")],
            [RouteOverride::new("/node_modules", tree.root.join("deps"))],
        )
    }

    #[test]
    fn first_root_wins() {
        let tree = Tree::new(&["a/both.css", "b/both.css", "b/only-b.js"]);
        let roots = layered(&tree);

        assert_eq!(roots.resolve("/both.css"), Some(tree.root.join("a/both.css")));
        assert_eq!(roots.resolve("/only-b.js"), Some(tree.root.join("b/only-b.js")));
        assert_eq!(roots.resolve("/nowhere.js"), None);
    }

    #[test]
    fn override_beats_roots_and_never_falls_through() {
        let tree = Tree::new(&[
            "deps/lib/lib.js",
            "a/node_modules/lib/lib.js",
            "a/node_modules/other.js",
        ]);
        let roots = layered(&tree);

        assert_eq!(
            roots.resolve("/node_modules/lib/lib.js"),
            Some(tree.root.join("deps/lib/lib.js"))
        );
        assert_eq!(roots.resolve("/node_modules/other.js"), None);
    }

    #[test]
    fn override_matches_whole_segments() {
        let tree = Tree::new(&["a/node_modules_extra/x.js", "deps/x.js"]);
        let roots = layered(&tree);

        assert_eq!(
            roots.resolve("/node_modules_extra/x.js"),
            Some(tree.root.join("a/node_modules_extra/x.js"))
        );
    }

    #[test]
    fn directories_fall_back_to_index() {
        let tree = Tree::new(&["a/index.html", "b/docs/index.html", "a/docs/readme.txt"]);
        let roots = layered(&tree);

        assert_eq!(roots.resolve("/"), Some(tree.root.join("a/index.html")));
        assert_eq!(roots.resolve("/docs/"), Some(tree.root.join("b/docs/index.html")));
        assert_eq!(roots.resolve("/docs"), Some(tree.root.join("b/docs/index.html")));
    }

    #[test]
    fn query_and_escapes_are_handled() {
        let tree = Tree::new(&["a/my page.html"]);
        let roots = layered(&tree);

        assert_eq!(
            roots.resolve("/my%20page.html?v=1"),
            Some(tree.root.join("a/my page.html"))
        );
    }

    #[test]
    fn traversal_is_rejected() {
        let tree = Tree::new(&["secret.txt", "a/index.html"]);
        let roots = layered(&tree);

        assert_eq!(roots.resolve("/../secret.txt"), None);
        assert_eq!(roots.resolve("/%2e%2e/secret.txt"), None);
        assert_eq!(roots.resolve("/node_modules/../../secret.txt"), None);
    }
}
