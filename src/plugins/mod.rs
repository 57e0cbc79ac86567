//! Plugin System
//!
//! A plugin implements any subset of three hooks:
//!
//! - `configure_server`: one-time setup when the dev server starts
//!   (routes, middleware, claimed extensions)
//! - `transform`: rewrite a module's code and declare extra dependencies
//! - `handle_hot_update`: narrow or replace the module set a change is
//!   broadcast for
//!
//! # Example
//! ```text
//! struct Banner;
//!
//! impl Plugin for Banner {
//!     fn name(&self) -> &str { "banner" }
//!
//!     fn transform(&self, code: &str, id: &str, _ctx: &TransformContext<'_>)
//!         -> Result<Option<TransformResult>>
//!     {
//!         Ok(Some(TransformResult::new(format!("/* {} */\n{}", id, code))))
//!     }
//! }
//!
//! dev_server.add_plugin(Banner)?;
//! ```

mod component_refresh;
mod scan;
mod stylesheet;

pub use component_refresh::{ComponentRefreshPlugin, REFRESH_RUNTIME_PATH};
pub use scan::{join_import, resolve_import, scan_hot_api, scan_imports, HotApiUsage};
pub use stylesheet::StylesheetPlugin;

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap as HashMap;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::module_graph::{ModuleGraph, ModuleKey, ModuleType};
use crate::server::{FileMap, VirtualServer};

/// Output of a plugin's `transform` hook
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformResult {
    pub code: String,
    /// Extra dependency URLs, added to those found by the import scanner
    pub deps: Vec<String>,
    pub source_map: Option<String>,
    /// Force self-acceptance on or off for this module
    pub self_accepting: Option<bool>,
}

impl TransformResult {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_source_map(mut self, map: impl Into<String>) -> Self {
        self.source_map = Some(map.into());
        self
    }

    pub fn self_accepting(mut self, accepting: bool) -> Self {
        self.self_accepting = Some(accepting);
        self
    }
}

/// What a `transform` hook knows about the module besides its code
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Normalized URL of the module
    pub url: &'a str,
    pub module_type: ModuleType,
    pub files: &'a FileMap,
}

/// Input of a `handle_hot_update` hook
#[derive(Debug, Clone, Copy)]
pub struct HotUpdateContext<'a> {
    /// Changed file
    pub file: &'a str,
    pub timestamp: u64,
    /// Current candidate modules
    pub modules: &'a [ModuleKey],
    pub graph: &'a ModuleGraph,
    /// New content, `None` for a deletion
    pub content: Option<&'a str>,
}

/// A dev server plugin
pub trait Plugin {
    /// Unique name, used in error attribution
    fn name(&self) -> &str;

    fn configure_server(&self, _server: &VirtualServer) -> Result<()> {
        Ok(())
    }

    /// `Ok(None)` passes the code through unchanged
    fn transform(&self, _code: &str, _id: &str, _ctx: &TransformContext<'_>) -> Result<Option<TransformResult>> {
        Ok(None)
    }

    /// `Some` replaces the candidate module set, `None` leaves it alone
    fn handle_hot_update(&self, _ctx: &HotUpdateContext<'_>) -> Option<Vec<ModuleKey>> {
        None
    }
}

/// Result of running every plugin's `transform`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChainOutput {
    pub code: String,
    pub deps: Vec<String>,
    pub source_map: Option<String>,
    pub self_accepting: Option<bool>,
}

/// Registered plugins, in registration order
#[derive(Default)]
pub struct PluginContainer {
    plugins: Vec<Rc<dyn Plugin>>,
    name_index: HashMap<String, usize>,
}

impl fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContainer").field("plugins", &self.names()).finish()
    }
}

impl PluginContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin
    pub fn register(&mut self, plugin: Rc<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_string();
        if self.name_index.contains_key(&name) {
            return Err(Error::Config(format!("Plugin '{}' is already registered", name)));
        }
        debug!(plugin = %name, "plugin registered");
        self.name_index.insert(name, self.plugins.len());
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Rc<dyn Plugin>> {
        self.name_index.get(name).map(|&idx| &self.plugins[idx])
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<dyn Plugin>> {
        self.plugins.iter()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run `configure_server` on every plugin
    pub fn configure_server(&self, server: &VirtualServer) -> Result<()> {
        for plugin in &self.plugins {
            plugin.configure_server(server).map_err(|e| e.with_plugin(plugin.name()))?;
        }
        Ok(())
    }

    /// Thread `code` through every `transform` hook.
    ///
    /// Each plugin sees the previous plugin's output. Declared deps
    /// accumulate; the last source map and self-acceptance override win.
    pub fn transform(&self, code: &str, id: &str, ctx: &TransformContext<'_>) -> Result<ChainOutput> {
        let mut output = ChainOutput {
            code: code.to_string(),
            ..ChainOutput::default()
        };
        for plugin in &self.plugins {
            let result = plugin
                .transform(&output.code, id, ctx)
                .map_err(|e| e.with_plugin(plugin.name()).for_module(id))?;
            let Some(result) = result else {
                continue;
            };
            trace!(plugin = plugin.name(), id, "transformed");
            output.code = result.code;
            output.deps.extend(result.deps);
            if result.source_map.is_some() {
                output.source_map = result.source_map;
            }
            if result.self_accepting.is_some() {
                output.self_accepting = result.self_accepting;
            }
        }
        Ok(output)
    }

    /// Run `handle_hot_update` hooks in order.
    ///
    /// Each hook sees the current set; a `Some` return replaces it for the
    /// hooks after it. Returns `None` when no hook returned anything.
    pub fn handle_hot_update(&self, ctx: &HotUpdateContext<'_>) -> Option<Vec<ModuleKey>> {
        let mut current: Option<Vec<ModuleKey>> = None;
        for plugin in &self.plugins {
            let modules = current.as_deref().unwrap_or(ctx.modules);
            let hook_ctx = HotUpdateContext { modules, ..*ctx };
            if let Some(replacement) = plugin.handle_hot_update(&hook_ctx) {
                debug!(plugin = plugin.name(), file = ctx.file, count = replacement.len(), "hot update narrowed");
                current = Some(replacement);
            }
        }
        current
    }
}
