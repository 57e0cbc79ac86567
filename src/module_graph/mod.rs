//! Module Graph
//!
//! In-memory directed graph of modules keyed by normalized URL. Tracks
//! import/importer edges and HMR acceptance, and computes the boundary set a
//! file change propagates to.
//!
//! Nodes live in an arena owned by the graph and are addressed by
//! [`ModuleKey`]. Keys are never reused, so a key held across a
//! [`ModuleGraph::clear`] simply stops resolving.
//!
//! # Example
//! ```text
//! // main.ts imports app.tsx; app.tsx self-accepts
//! let main = graph.ensure_entry_from_url("/src/main.ts");
//! let app = graph.ensure_entry_from_url("/src/app.tsx");
//! graph.update_module_info(main, [app], [], false);
//! graph.update_module_info(app, [], [], true);
//!
//! graph.get_hmr_propagation_path("/src/app.tsx"); // Some([app])
//! graph.needs_full_reload("/src/main.ts");        // true: nothing accepts main
//! ```

use std::fmt;

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Handle to a node inside a [`ModuleGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey(u32);

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of module, fixed at creation from the URL's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Script,
    Stylesheet,
    Json,
    Asset,
}

impl ModuleType {
    /// Classify a URL or path by extension
    pub fn from_path(path: &str) -> Self {
        match extension(path) {
            Some("js" | "mjs" | "cjs" | "jsx" | "ts" | "mts" | "cts" | "tsx") => ModuleType::Script,
            Some("css") => ModuleType::Stylesheet,
            Some("json") => ModuleType::Json,
            _ => ModuleType::Asset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Script => "script",
            ModuleType::Stylesheet => "stylesheet",
            ModuleType::Json => "json",
            ModuleType::Asset => "asset",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extension of the last path segment, ignoring query and hash
pub(crate) fn extension(path: &str) -> Option<&str> {
    let path = strip_query(path);
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rfind('.') {
        Some(idx) if idx + 1 < segment.len() => Some(&segment[idx + 1..]),
        _ => None,
    }
}

fn strip_query(url: &str) -> &str {
    let end = url.find(|c: char| c == '?' || c == '#').unwrap_or(url.len());
    &url[..end]
}

/// Normalize a URL for lookup: drop query and hash, collapse duplicate
/// separators, and guarantee a leading `/`.
pub fn normalize_url(url: &str) -> String {
    let path = strip_query(url.trim());
    let mut normalized = String::with_capacity(path.len() + 1);
    normalized.push('/');
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        normalized.push_str(segment);
    }
    if path.len() > 1 && path.ends_with('/') && !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// Cached transform output, stamped with the `last_modified` it was produced at
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedModule {
    pub code: String,
    pub source_map: Option<String>,
    pub produced_at: u64,
}

/// One resolved module
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub key: ModuleKey,
    /// Stable identity: normalized absolute path of the backing file
    pub id: String,
    /// Browser-resolvable URL
    pub url: String,
    pub module_type: ModuleType,
    pub imported_modules: HashSet<ModuleKey>,
    pub importers: HashSet<ModuleKey>,
    pub accepted_hmr_deps: HashSet<ModuleKey>,
    pub is_self_accepting: bool,
    /// Module called `decline()`; any change through it forces a full reload
    pub is_declined: bool,
    pub last_modified: u64,
    transformed: Option<TransformedModule>,
}

impl ModuleNode {
    fn new(key: ModuleKey, url: String, id: String) -> Self {
        let module_type = ModuleType::from_path(&id);
        Self {
            key,
            id,
            url,
            module_type,
            imported_modules: HashSet::default(),
            importers: HashSet::default(),
            accepted_hmr_deps: HashSet::default(),
            is_self_accepting: false,
            is_declined: false,
            last_modified: crate::unix_millis(),
            transformed: None,
        }
    }

    /// Cached transform output, if still current
    pub fn transformed(&self) -> Option<&TransformedModule> {
        self.transformed
            .as_ref()
            .filter(|t| t.produced_at == self.last_modified)
    }

    pub fn transformed_code(&self) -> Option<&str> {
        self.transformed().map(|t| t.code.as_str())
    }

    /// True when a change reaching this module stops here
    pub fn is_hmr_boundary(&self) -> bool {
        !self.is_declined && (self.module_type == ModuleType::Stylesheet || self.is_self_accepting)
    }
}

/// Serializable summary of a node, served by the introspection route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSummary {
    pub id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub is_self_accepting: bool,
}

/// A boundary found while propagating a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HmrBoundary {
    /// Module that absorbs the update
    pub boundary: ModuleKey,
    /// Module whose change reached the boundary
    pub accepted_via: ModuleKey,
}

/// Module graph for tracking dependencies
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: HashMap<ModuleKey, ModuleNode>,
    url_index: HashMap<String, ModuleKey>,
    file_index: HashMap<String, HashSet<ModuleKey>>,
    /// Unprobed import path → modules whose import of it did not resolve
    pending_imports: HashMap<String, HashSet<ModuleKey>>,
    next_key: u32,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node for `url`. The backing file is the URL itself.
    pub fn ensure_entry_from_url(&mut self, url: &str) -> ModuleKey {
        let normalized = normalize_url(url);
        self.ensure_entry(&normalized, &normalized)
    }

    /// Get or create the node for `url` backed by `file`.
    ///
    /// Used when the browser URL differs from the file identity, e.g. for
    /// rewritten dependency namespaces.
    pub fn ensure_entry(&mut self, url: &str, file: &str) -> ModuleKey {
        let url = normalize_url(url);
        if let Some(key) = self.url_index.get(&url) {
            return *key;
        }

        let key = ModuleKey(self.next_key);
        self.next_key += 1;

        let id = normalize_url(file);
        trace!(%key, url = %url, id = %id, "module created");
        self.file_index.entry(id.clone()).or_default().insert(key);
        self.url_index.insert(url.clone(), key);
        self.modules.insert(key, ModuleNode::new(key, url, id));
        key
    }

    /// Get a module
    pub fn get(&self, key: ModuleKey) -> Option<&ModuleNode> {
        self.modules.get(&key)
    }

    /// Look a module up by URL (normalized first)
    pub fn get_by_url(&self, url: &str) -> Option<&ModuleNode> {
        self.url_index
            .get(&normalize_url(url))
            .and_then(|key| self.modules.get(key))
    }

    /// URL of `key`, if it is still in the graph
    pub fn url_of(&self, key: ModuleKey) -> Option<&str> {
        self.modules.get(&key).map(|m| m.url.as_str())
    }

    /// Modules backed by `file`, in creation order
    pub fn get_modules_by_file(&self, file: &str) -> Vec<ModuleKey> {
        let mut keys: Vec<ModuleKey> = self
            .file_index
            .get(&normalize_url(file))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Replace the outgoing edges of `key`.
    ///
    /// Unknown keys in either set are skipped. Returns the modules that were
    /// imported before and are no longer imported.
    pub fn update_module_info<I, A>(
        &mut self,
        key: ModuleKey,
        imported_modules: I,
        accepted_hmr_deps: A,
        is_self_accepting: bool,
    ) -> Vec<ModuleKey>
    where
        I: IntoIterator<Item = ModuleKey>,
        A: IntoIterator<Item = ModuleKey>,
    {
        if !self.modules.contains_key(&key) {
            return Vec::new();
        }

        let next_imports: HashSet<ModuleKey> = imported_modules
            .into_iter()
            .filter(|k| self.modules.contains_key(k))
            .collect();
        let accepted: HashSet<ModuleKey> = accepted_hmr_deps
            .into_iter()
            .filter(|k| self.modules.contains_key(k))
            .collect();

        let previous = match self.modules.get_mut(&key) {
            Some(node) => std::mem::take(&mut node.imported_modules),
            None => return Vec::new(),
        };

        for dep in &previous {
            if let Some(dep_node) = self.modules.get_mut(dep) {
                dep_node.importers.remove(&key);
            }
        }
        for dep in &next_imports {
            if let Some(dep_node) = self.modules.get_mut(dep) {
                dep_node.importers.insert(key);
            }
        }

        let mut no_longer_imported: Vec<ModuleKey> =
            previous.difference(&next_imports).copied().collect();
        no_longer_imported.sort();

        if let Some(node) = self.modules.get_mut(&key) {
            node.imported_modules = next_imports;
            node.accepted_hmr_deps = accepted;
            node.is_self_accepting = is_self_accepting;
        }

        debug_assert!(self.check_edge_symmetry());
        no_longer_imported
    }

    /// Replace the imports of `key` that pointed at missing files
    pub fn set_pending_imports<I>(&mut self, key: ModuleKey, paths: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.forget_pending(key);
        for path in paths {
            self.pending_imports.entry(path).or_default().insert(key);
        }
    }

    /// Take the modules waiting on any pending path `resolves_to_file`
    /// accepts. Those paths stop being pending.
    pub fn take_pending_importers<F>(&mut self, mut resolves_to_file: F) -> Vec<ModuleKey>
    where
        F: FnMut(&str) -> bool,
    {
        let matched: Vec<String> = self
            .pending_imports
            .keys()
            .filter(|path| resolves_to_file(path))
            .cloned()
            .collect();
        let mut keys = Vec::new();
        for path in matched {
            for key in self.pending_imports.remove(&path).unwrap_or_default() {
                if self.modules.contains_key(&key) {
                    push_unique(&mut keys, key);
                }
            }
        }
        keys.sort();
        keys
    }

    fn forget_pending(&mut self, key: ModuleKey) {
        self.pending_imports.retain(|_, waiting| {
            waiting.remove(&key);
            !waiting.is_empty()
        });
    }

    /// Mark a module as having declined HMR
    pub fn set_declined(&mut self, key: ModuleKey, declined: bool) {
        if let Some(node) = self.modules.get_mut(&key) {
            node.is_declined = declined;
        }
    }

    /// Override self-acceptance without touching edges
    pub fn set_self_accepting(&mut self, key: ModuleKey, accepting: bool) {
        if let Some(node) = self.modules.get_mut(&key) {
            node.is_self_accepting = accepting;
        }
    }

    /// Store transform output for the module's current `last_modified`
    pub fn set_transform_result(&mut self, key: ModuleKey, code: String, source_map: Option<String>) {
        if let Some(node) = self.modules.get_mut(&key) {
            node.transformed = Some(TransformedModule {
                code,
                source_map,
                produced_at: node.last_modified,
            });
        }
    }

    /// Clear cached output and bump `last_modified`. Edges are left alone;
    /// the next transform re-establishes them.
    pub fn invalidate_module(&mut self, key: ModuleKey) {
        if let Some(node) = self.modules.get_mut(&key) {
            node.transformed = None;
            node.last_modified = crate::unix_millis().max(node.last_modified + 1);
        }
    }

    /// Invalidate every module backed by `file`; returns them
    pub fn invalidate_file(&mut self, file: &str) -> Vec<ModuleKey> {
        let keys = self.get_modules_by_file(file);
        for key in &keys {
            self.invalidate_module(*key);
        }
        keys
    }

    /// Invalidate every module
    pub fn invalidate_all(&mut self) {
        let keys: Vec<ModuleKey> = self.modules.keys().copied().collect();
        for key in keys {
            self.invalidate_module(key);
        }
    }

    /// Boundary set for a change to `file`.
    ///
    /// Walks importers from each module of `file` until it meets a
    /// self-accepting module, a stylesheet, or an importer that accepts the
    /// module as a dependency. A chain that dead-ends at a module with no
    /// importers contributes that module itself, which callers read as
    /// "needs a full reload".
    pub fn get_modules_affected_by_file(&self, file: &str) -> Vec<ModuleKey> {
        let mut affected = Vec::new();
        let mut visited = HashSet::default();
        for key in self.get_modules_by_file(file) {
            self.collect_affected(key, &mut affected, &mut visited);
        }
        affected
    }

    fn collect_affected(
        &self,
        key: ModuleKey,
        affected: &mut Vec<ModuleKey>,
        visited: &mut HashSet<ModuleKey>,
    ) -> bool {
        if !visited.insert(key) {
            return false;
        }
        let Some(node) = self.modules.get(&key) else {
            return false;
        };

        if node.is_hmr_boundary() {
            push_unique(affected, key);
            return true;
        }
        if node.is_declined || node.importers.is_empty() {
            push_unique(affected, key);
            return false;
        }

        let mut found = false;
        for importer_key in sorted(&node.importers) {
            let Some(importer) = self.modules.get(&importer_key) else {
                continue;
            };
            if importer.accepted_hmr_deps.contains(&key) && !importer.is_declined {
                push_unique(affected, importer_key);
                found = true;
            } else if self.collect_affected(importer_key, affected, visited) {
                found = true;
            }
        }
        found
    }

    /// Strict propagation: `None` as soon as any importer chain of `file`
    /// ends without a boundary, otherwise the boundary modules.
    pub fn get_hmr_propagation_path(&self, file: &str) -> Option<Vec<ModuleKey>> {
        let boundaries = self.propagate_from(&self.get_modules_by_file(file))?;
        let mut keys = Vec::new();
        for b in boundaries {
            push_unique(&mut keys, b.boundary);
        }
        Some(keys)
    }

    /// True iff a change to `file` cannot be absorbed by any boundary
    pub fn needs_full_reload(&self, file: &str) -> bool {
        self.get_hmr_propagation_path(file).is_none()
    }

    /// Strict propagation from an explicit set of changed modules.
    ///
    /// An empty start set yields `Some(vec![])` (nothing to update); a
    /// non-empty set that reaches no boundary at all yields `None`.
    pub fn propagate_from(&self, changed: &[ModuleKey]) -> Option<Vec<HmrBoundary>> {
        self.propagate(changed, None)
    }

    /// Propagation for a module that invalidated itself: its own
    /// self-acceptance is ignored and the change continues to its importers.
    pub fn propagate_invalidation(&self, key: ModuleKey) -> Option<Vec<HmrBoundary>> {
        self.propagate(&[key], Some(key))
    }

    fn propagate(&self, changed: &[ModuleKey], skip_self_accept: Option<ModuleKey>) -> Option<Vec<HmrBoundary>> {
        let mut boundaries = Vec::new();
        for &key in changed {
            let mut visited = HashSet::default();
            if !self.propagate_update(key, key, skip_self_accept, &mut boundaries, &mut visited) {
                trace!(%key, "propagation reached a dead end");
                return None;
            }
        }
        if boundaries.is_empty() && changed.iter().any(|k| self.modules.contains_key(k)) {
            return None;
        }
        Some(boundaries)
    }

    fn propagate_update(
        &self,
        key: ModuleKey,
        changed: ModuleKey,
        skip_self_accept: Option<ModuleKey>,
        boundaries: &mut Vec<HmrBoundary>,
        visited: &mut HashSet<ModuleKey>,
    ) -> bool {
        if !visited.insert(key) {
            return true;
        }
        let Some(node) = self.modules.get(&key) else {
            return true;
        };

        if node.is_declined {
            return false;
        }
        if node.is_hmr_boundary() && skip_self_accept != Some(key) {
            push_unique(boundaries, HmrBoundary { boundary: key, accepted_via: changed });
            return true;
        }
        if node.importers.is_empty() {
            return false;
        }

        for importer_key in sorted(&node.importers) {
            let Some(importer) = self.modules.get(&importer_key) else {
                continue;
            };
            if importer.accepted_hmr_deps.contains(&key) && !importer.is_declined {
                push_unique(boundaries, HmrBoundary { boundary: importer_key, accepted_via: key });
                continue;
            }
            if !self.propagate_update(importer_key, changed, skip_self_accept, boundaries, visited) {
                return false;
            }
        }
        true
    }

    /// Remove a module, pruning edges on both sides
    pub fn remove_module(&mut self, key: ModuleKey) -> Option<ModuleNode> {
        let module = self.modules.remove(&key)?;
        for dep in &module.imported_modules {
            if let Some(dep_node) = self.modules.get_mut(dep) {
                dep_node.importers.remove(&key);
            }
        }
        for importer in &module.importers {
            if let Some(importer_node) = self.modules.get_mut(importer) {
                importer_node.imported_modules.remove(&key);
                importer_node.accepted_hmr_deps.remove(&key);
            }
        }
        self.url_index.remove(&module.url);
        if let Some(set) = self.file_index.get_mut(&module.id) {
            set.remove(&key);
            if set.is_empty() {
                self.file_index.remove(&module.id);
            }
        }
        self.forget_pending(key);
        debug_assert!(self.check_edge_symmetry());
        Some(module)
    }

    /// Drop every module
    pub fn clear(&mut self) {
        self.modules.clear();
        self.url_index.clear();
        self.file_index.clear();
        self.pending_imports.clear();
    }

    /// All modules, in creation order
    pub fn modules(&self) -> Vec<&ModuleNode> {
        let mut nodes: Vec<&ModuleNode> = self.modules.values().collect();
        nodes.sort_by_key(|n| n.key);
        nodes
    }

    /// Summaries for the introspection route
    pub fn summaries(&self) -> Vec<ModuleSummary> {
        self.modules()
            .into_iter()
            .map(|m| ModuleSummary {
                id: m.id.clone(),
                url: m.url.clone(),
                module_type: m.module_type,
                is_self_accepting: m.is_self_accepting,
            })
            .collect()
    }

    /// Get module count
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// `a ∈ b.imported_modules ⇔ b ∈ a.importers` for every pair
    pub fn check_edge_symmetry(&self) -> bool {
        self.modules.values().all(|node| {
            node.imported_modules.iter().all(|dep| {
                self.modules
                    .get(dep)
                    .is_some_and(|d| d.importers.contains(&node.key))
            }) && node.importers.iter().all(|imp| {
                self.modules
                    .get(imp)
                    .is_some_and(|i| i.imported_modules.contains(&node.key))
            })
        })
    }
}

fn sorted(set: &HashSet<ModuleKey>) -> Vec<ModuleKey> {
    let mut keys: Vec<ModuleKey> = set.iter().copied().collect();
    keys.sort();
    keys
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}
