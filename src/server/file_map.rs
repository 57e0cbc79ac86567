//! Shared path → content table backing the virtual server

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::error::Result;
use crate::module_graph::{extension, normalize_url};
use crate::server::mime::{INDEX_FILES, PROBE_EXTENSIONS};

/// In-memory file table.
///
/// Clones share the same table. Paths are normalized to start with `/`.
/// Only the dev server should mutate it once a server is running; see
/// [`DevServer::write_file`](crate::dev_server::DevServer::write_file).
#[derive(Debug, Clone, Default)]
pub struct FileMap {
    files: Rc<RefCell<BTreeMap<String, String>>>,
}

impl FileMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content of `path`, if present
    pub fn get(&self, path: &str) -> Option<String> {
        self.files.borrow().get(&normalize_url(path)).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.borrow().contains_key(&normalize_url(path))
    }

    /// Insert or replace a file; returns true if it already existed
    pub fn insert(&self, path: &str, content: impl Into<String>) -> bool {
        self.files
            .borrow_mut()
            .insert(normalize_url(path), content.into())
            .is_some()
    }

    /// Remove a file; returns its content if it existed
    pub fn remove(&self, path: &str) -> Option<String> {
        self.files.borrow_mut().remove(&normalize_url(path))
    }

    /// All paths, sorted
    pub fn paths(&self) -> Vec<String> {
        self.files.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.files.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.borrow().is_empty()
    }

    /// Resolve a request pathname to a stored path.
    ///
    /// Tries, in order: exact match, appending each probe extension, and
    /// directory index files (for `/dir/` and, failing the rest, `/dir`).
    pub fn resolve(&self, pathname: &str) -> Option<String> {
        let path = normalize_url(pathname);
        let files = self.files.borrow();

        if !path.ends_with('/') && files.contains_key(&path) {
            return Some(path);
        }

        if !path.ends_with('/') && extension(&path).is_none() {
            for ext in PROBE_EXTENSIONS {
                let candidate = format!("{}.{}", path, ext);
                if files.contains_key(&candidate) {
                    return Some(candidate);
                }
            }
        }

        let dir = if path.ends_with('/') { path.clone() } else { format!("{}/", path) };
        INDEX_FILES
            .iter()
            .map(|index| format!("{}{}", dir, index))
            .find(|candidate| files.contains_key(candidate))
    }

    /// Load every UTF-8 file under `root` into a new map
    pub fn load_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let map = FileMap::new();
        let root = root.as_ref();
        let mut stack = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') || name == "node_modules" {
                    continue;
                }
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(content) => {
                        let relative = path.strip_prefix(root).unwrap_or(&path);
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect::<Vec<_>>()
                            .join("/");
                        map.insert(&key, content);
                    }
                    Err(e) => debug!(path = %path.display(), error = %e, "skipping non-text file"),
                }
            }
        }

        Ok(map)
    }
}

impl<P: AsRef<str>, C: Into<String>> FromIterator<(P, C)> for FileMap {
    fn from_iter<T: IntoIterator<Item = (P, C)>>(iter: T) -> Self {
        let map = FileMap::new();
        for (path, content) in iter {
            map.insert(path.as_ref(), content);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_clones_share_storage() {
        let a = FileMap::new();
        let b = a.clone();
        a.insert("src/main.ts", "x");
        assert_eq!(b.get("/src/main.ts").as_deref(), Some("x"));
    }

    #[test]
    fn test_resolve_order() {
        let files = FileMap::from_iter([
            ("/src/app.tsx", "app"),
            ("/src/app.js", "shadowed"),
            ("/src/utils.ts", "utils"),
            ("/src/components/index.tsx", "index"),
            ("/index.html", "<html></html>"),
        ]);

        assert_eq!(files.resolve("/src/utils.ts").as_deref(), Some("/src/utils.ts"));
        // ts before tsx before js
        assert_eq!(files.resolve("/src/utils").as_deref(), Some("/src/utils.ts"));
        assert_eq!(files.resolve("/src/app").as_deref(), Some("/src/app.tsx"));
        assert_eq!(files.resolve("/src/components/").as_deref(), Some("/src/components/index.tsx"));
        assert_eq!(files.resolve("/src/components").as_deref(), Some("/src/components/index.tsx"));
        assert_eq!(files.resolve("/").as_deref(), Some("/index.html"));
        assert_eq!(files.resolve("/missing.ts"), None);
    }

    #[test]
    fn test_load_dir() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let mut file = std::fs::File::create(dir.path().join("src/main.ts")).unwrap();
        writeln!(file, "console.log('hi');").unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "ignored").unwrap();

        let files = FileMap::load_dir(dir.path()).unwrap();
        assert_eq!(files.paths(), vec!["/index.html".to_string(), "/src/main.ts".to_string()]);
    }
}
