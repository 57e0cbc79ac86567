//! Dev server orchestration
//!
//! [`DevServer`] owns the file map, the module graph, the virtual server and
//! the HMR server, and is the only thing that mutates them once started.
//!
//! ```text
//! write_file / delete_file / external watcher
//!        │
//!        ▼
//! handle_file_change ─▶ cache eviction ─▶ subscribers ─▶ graph invalidation
//!        ─▶ plugin handle_hot_update (threaded) ─▶ HMR broadcast
//! ```

mod pipeline;
mod watch;

pub use watch::{Subscription, WatchEvent, WatchEventKind};

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet as HashSet;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::DevServerConfig;
use crate::error::{Error, Result};
use crate::hmr::{build_updates, ClientMessage, HmrConnection, HmrPayload, HmrServer};
use crate::module_graph::{HmrBoundary, ModuleGraph, ModuleKey};
use crate::plugins::{HotUpdateContext, Plugin, PluginContainer};
use crate::server::{
    FileMap, Middleware, ServerOptions, TransformOutput, VirtualRequest, VirtualResponse, VirtualServer,
    HMR_CLIENT_PATH,
};

use pipeline::Pipeline;
use watch::Subscribers;

/// Tag injected into served HTML documents
pub const CLIENT_SCRIPT_TAG: &str = "<script type=\"module\" src=\"/@hmr/client\"></script>";

type CustomEventHandler = Rc<dyn Fn(&Value)>;

/// The dev server
pub struct DevServer {
    config: DevServerConfig,
    files: FileMap,
    plugins: Rc<RefCell<PluginContainer>>,
    graph: Rc<RefCell<ModuleGraph>>,
    server: VirtualServer,
    hmr: Rc<HmrServer>,
    subscribers: Rc<RefCell<Subscribers>>,
    custom_handlers: RefCell<Vec<(String, CustomEventHandler)>>,
    listening: bool,
}

impl fmt::Debug for DevServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevServer")
            .field("config", &self.config)
            .field("plugins", &self.plugins.borrow())
            .field("modules", &self.graph.borrow().len())
            .field("listening", &self.listening)
            .finish()
    }
}

impl DevServer {
    /// Create a stopped server over `files`
    pub fn new(files: FileMap, config: DevServerConfig) -> Self {
        let plugins = Rc::new(RefCell::new(PluginContainer::new()));
        let (graph, server, hmr) = Self::build_core(&files, &config, &plugins);
        Self {
            config,
            files,
            plugins,
            graph,
            server,
            hmr,
            subscribers: Rc::new(RefCell::new(Subscribers::default())),
            custom_handlers: RefCell::new(Vec::new()),
            listening: false,
        }
    }

    /// Fresh graph, virtual server and HMR server wired to the transform pipeline
    fn build_core(
        files: &FileMap,
        config: &DevServerConfig,
        plugins: &Rc<RefCell<PluginContainer>>,
    ) -> (Rc<RefCell<ModuleGraph>>, VirtualServer, Rc<HmrServer>) {
        let graph = Rc::new(RefCell::new(ModuleGraph::new()));
        let server = VirtualServer::new(files.clone(), graph.clone(), ServerOptions::from(config));
        let hmr_config = config.hmr_config();
        let hmr_enabled = hmr_config.is_some();
        let hmr = Rc::new(HmrServer::new(hmr_config.unwrap_or_default()));

        let pipeline = Pipeline {
            graph: graph.clone(),
            plugins: plugins.clone(),
            files: files.clone(),
            hmr: hmr.clone(),
            hmr_enabled,
        };
        server.set_transformer(move |code, url| pipeline.run(code, url));

        if hmr_enabled {
            server.use_middleware(Middleware::new("quickdev:hmr-client-injection", |req, next| {
                let mut res = next(req);
                let is_html = res.content_type().is_some_and(|ct| ct.starts_with("text/html"));
                if res.status == 200 && is_html && !res.body.contains(HMR_CLIENT_PATH) {
                    res.body = inject_client_script(&res.body);
                }
                res
            }));
        }

        (graph, server, hmr)
    }

    /// Register a plugin. Its `configure_server` runs now if the server is
    /// already listening, otherwise on the next [`listen`](Self::listen).
    pub fn add_plugin<P: Plugin + 'static>(&mut self, plugin: P) -> Result<()> {
        let plugin: Rc<dyn Plugin> = Rc::new(plugin);
        self.plugins.borrow_mut().register(plugin.clone())?;
        if self.listening {
            plugin
                .configure_server(&self.server)
                .map_err(|e| e.with_plugin(plugin.name()))?;
        }
        Ok(())
    }

    /// Start serving. Calling it again while started does nothing.
    pub fn listen(&mut self) -> Result<()> {
        if self.listening {
            return Ok(());
        }
        self.plugins.borrow().configure_server(&self.server)?;
        if self.config.hmr.is_enabled() {
            self.hmr.listen();
        }
        self.listening = true;
        info!(
            host = %self.config.host,
            port = self.config.port,
            base = %self.config.normalized_base(),
            plugins = self.plugins.borrow().len(),
            open = self.config.open,
            "dev server listening"
        );
        Ok(())
    }

    /// Stop serving: close HMR connections, clear the graph and the cache
    pub fn close(&mut self) {
        if !self.listening {
            return;
        }
        self.hmr.close();
        self.graph.borrow_mut().clear();
        self.server.clear_cache();
        self.listening = false;
        info!("dev server closed");
    }

    /// Close, rebuild every piece of state except plugins and files, listen again
    pub fn restart(&mut self) -> Result<()> {
        self.close();
        let (graph, server, hmr) = Self::build_core(&self.files, &self.config, &self.plugins);
        self.graph = graph;
        self.server = server;
        self.hmr = hmr;
        info!("dev server restarting");
        self.listen()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Whether the embedder should open the preview now. Only true while
    /// listening with `open` configured.
    pub fn open_requested(&self) -> bool {
        self.listening && self.config.open
    }

    pub fn config(&self) -> &DevServerConfig {
        &self.config
    }

    pub fn files(&self) -> &FileMap {
        &self.files
    }

    pub fn graph(&self) -> Ref<'_, ModuleGraph> {
        self.graph.borrow()
    }

    pub fn server(&self) -> &VirtualServer {
        &self.server
    }

    pub fn hmr(&self) -> &HmrServer {
        &self.hmr
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.borrow().names().into_iter().map(str::to_string).collect()
    }

    pub fn handle_request(&self, req: &VirtualRequest) -> VirtualResponse {
        self.server.handle_request(req)
    }

    /// Transformed code for `url`, `None` when nothing backs it
    pub fn transform_request(&self, url: &str) -> Result<Option<TransformOutput>> {
        self.server.transform_request(url)
    }

    /// Transform `entry` and everything it imports, so the graph knows
    /// every importer edge before the first change. Returns how many
    /// modules were transformed.
    pub fn warm_up(&self, entry: &str) -> Result<usize> {
        let mut queue = vec![entry.to_string()];
        let mut seen: HashSet<String> = HashSet::default();
        let mut transformed = 0;
        while let Some(url) = queue.pop() {
            if !seen.insert(url.clone()) || self.transform_request(&url)?.is_none() {
                continue;
            }
            transformed += 1;
            let graph = self.graph.borrow();
            if let Some(node) = graph.get_by_url(&url) {
                queue.extend(
                    node.imported_modules
                        .iter()
                        .filter_map(|key| graph.url_of(*key))
                        .map(str::to_string),
                );
            }
        }
        Ok(transformed)
    }

    /// The HMR client script for the preview document
    pub fn hmr_client_code(&self) -> &str {
        &self.server.options().hmr_client_code
    }

    /// Open an in-memory HMR connection, as the preview's client would
    pub fn connect_hmr(&self) -> Result<HmrConnection> {
        if !self.config.hmr.is_enabled() {
            return Err(Error::Hmr("HMR is disabled".to_string()));
        }
        self.hmr.connect()
    }

    /// Create or overwrite `path` and dispatch the resulting change
    pub fn write_file(&self, path: &str, content: impl Into<String>) -> Result<Vec<HmrPayload>> {
        let existed = self.files.insert(path, content);
        let event = if existed { WatchEvent::change(path) } else { WatchEvent::add(path) };
        self.handle_file_change(&event)
    }

    /// Remove `path` and dispatch an `unlink`. Nothing happens if it did not exist.
    pub fn delete_file(&self, path: &str) -> Result<Vec<HmrPayload>> {
        if self.files.remove(path).is_none() {
            debug!(path, "delete of missing file");
            return Ok(Vec::new());
        }
        self.handle_file_change(&WatchEvent::unlink(path))
    }

    /// Apply one file change and return the HMR payloads broadcast for it
    pub fn handle_file_change(&self, event: &WatchEvent) -> Result<Vec<HmrPayload>> {
        let path = event.path.as_str();
        debug!(kind = ?event.kind, path, "file change");
        self.server.invalidate_cache(path);
        Subscribers::notify(&self.subscribers, event);

        match event.kind {
            WatchEventKind::Add | WatchEventKind::Change => self.hot_update(event),
            WatchEventKind::Unlink => self.prune(path),
        }
    }

    fn hot_update(&self, event: &WatchEvent) -> Result<Vec<HmrPayload>> {
        let path = event.path.as_str();
        let affected = {
            let mut graph = self.graph.borrow_mut();
            graph.invalidate_file(path);
            graph.get_modules_affected_by_file(path)
        };

        let graph = self.graph.borrow();
        let content = self.files.get(path);
        let ctx = HotUpdateContext {
            file: path,
            timestamp: event.timestamp,
            modules: &affected,
            graph: &graph,
            content: content.as_deref(),
        };
        let scope = self.plugins.borrow().handle_hot_update(&ctx);

        let mut sent = Vec::new();
        if self.config.hmr.is_enabled() {
            sent.extend(self.hmr.handle_file_change(&graph, path, scope.as_deref())?);
        }
        drop(graph);

        if event.kind == WatchEventKind::Add {
            sent.extend(self.resume_pending_importers(path)?);
        }
        Ok(sent)
    }

    /// Retransform modules whose import of a then-missing file now resolves
    /// to `path`. Propagation starts at those importers.
    fn resume_pending_importers(&self, path: &str) -> Result<Option<HmrPayload>> {
        let mut graph = self.graph.borrow_mut();
        let waiting = graph.take_pending_importers(|joined| self.files.resolve(joined).as_deref() == Some(path));
        if waiting.is_empty() {
            return Ok(None);
        }
        for &key in &waiting {
            graph.invalidate_module(key);
            if let Some(url) = graph.url_of(key) {
                self.server.invalidate_cache(url);
            }
        }
        info!(path, importers = waiting.len(), "pending imports resolved");

        if !self.config.hmr.is_enabled() {
            return Ok(None);
        }
        let payload = match graph.propagate_from(&waiting) {
            None => HmrPayload::FullReload {
                path: Some(path.to_string()),
            },
            Some(boundaries) if boundaries.is_empty() => return Ok(None),
            Some(boundaries) => HmrPayload::Update {
                updates: build_updates(&graph, &boundaries),
            },
        };
        drop(graph);

        self.hmr.broadcast(&payload)?;
        Ok(Some(payload))
    }

    /// Drop the modules of a deleted file and tell the preview
    fn prune(&self, path: &str) -> Result<Vec<HmrPayload>> {
        let mut graph = self.graph.borrow_mut();
        let removed = graph.get_modules_by_file(path);
        if removed.is_empty() {
            return Ok(Vec::new());
        }

        let mut importers: Vec<ModuleKey> = Vec::new();
        let mut needs_reload = false;
        for key in &removed {
            let Some(node) = graph.get(*key) else {
                continue;
            };
            for importer_key in &node.importers {
                if removed.contains(importer_key) || importers.contains(importer_key) {
                    continue;
                }
                let absorbs = graph
                    .get(*importer_key)
                    .is_some_and(|imp| imp.is_hmr_boundary() || imp.accepted_hmr_deps.contains(key));
                needs_reload |= !absorbs;
                importers.push(*importer_key);
            }
        }
        importers.sort();

        let mut paths = Vec::with_capacity(removed.len());
        for key in removed {
            if let Some(node) = graph.remove_module(key) {
                paths.push(node.url);
            }
        }
        for key in &importers {
            graph.invalidate_module(*key);
            if let Some(url) = graph.url_of(*key) {
                self.server.invalidate_cache(url);
            }
        }
        info!(path, pruned = paths.len(), importers = importers.len(), "modules pruned");

        if !self.config.hmr.is_enabled() {
            return Ok(Vec::new());
        }
        let mut sent = vec![HmrPayload::Prune { paths }];
        if needs_reload {
            sent.push(HmrPayload::FullReload {
                path: Some(path.to_string()),
            });
        } else if !importers.is_empty() {
            let boundaries: Vec<HmrBoundary> = importers
                .iter()
                .map(|&key| HmrBoundary { boundary: key, accepted_via: key })
                .collect();
            sent.push(HmrPayload::Update {
                updates: build_updates(&graph, &boundaries),
            });
        }
        drop(graph);

        for payload in &sent {
            self.hmr.broadcast(payload)?;
        }
        Ok(sent)
    }

    /// Observe every file change. Listeners run before any HMR broadcast.
    pub fn on_file_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&WatchEvent) + 'static,
    {
        Subscribers::subscribe(&self.subscribers, Rc::new(listener))
    }

    pub fn file_change_listener_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Handle `custom` messages with `event` sent by HMR clients
    pub fn on_custom_event<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) + 'static,
    {
        self.custom_handlers
            .borrow_mut()
            .push((event.to_string(), Rc::new(handler)));
    }

    /// Drain client messages and act on them; returns the payloads sent in reply
    pub fn process_client_messages(&self) -> Result<Vec<HmrPayload>> {
        let mut sent = Vec::new();
        for message in self.hmr.poll_client_messages() {
            match message {
                ClientMessage::Connected => debug!("HMR client reported connected"),
                ClientMessage::Invalidate { path, message } => {
                    debug!(path = %path, reason = message.as_deref().unwrap_or(""), "client invalidated module");
                    let graph = self.graph.borrow();
                    if let Some(payload) = self.hmr.handle_invalidate(&graph, &path)? {
                        sent.push(payload);
                    }
                }
                ClientMessage::Custom { event, data } => {
                    let handlers: Vec<CustomEventHandler> = self
                        .custom_handlers
                        .borrow()
                        .iter()
                        .filter(|(name, _)| *name == event)
                        .map(|(_, handler)| handler.clone())
                        .collect();
                    if handlers.is_empty() {
                        debug!(event = %event, "unhandled custom event");
                    }
                    for handler in handlers {
                        handler(&data);
                    }
                }
            }
        }
        Ok(sent)
    }

    /// Push an error to the preview's overlay outside any request
    pub fn report_error(&self, err: &Error) -> Result<usize> {
        if !self.config.hmr.is_enabled() {
            warn!(error = %err, "error not reported, HMR is disabled");
            return Ok(0);
        }
        self.hmr.send_error(err)
    }
}

/// Insert the client tag right after `<head>`, or at the top when there is none
fn inject_client_script(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let insert_at = lower
        .find("<head")
        .and_then(|start| lower[start..].find('>').map(|end| start + end + 1));
    match insert_at {
        Some(at) => format!("{}\n{}{}", &html[..at], CLIENT_SCRIPT_TAG, &html[at..]),
        None => format!("{}\n{}", CLIENT_SCRIPT_TAG, html),
    }
}
