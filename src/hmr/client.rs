//! HMR client runtime model
//!
//! The counterpart of the injected browser script, as one explicitly
//! constructed object owned by the preview document. Modules register
//! [`HotContext`]s by URL; payloads received from the server are applied
//! through a [`PreviewDocument`], which performs the side effects (reload,
//! dynamic import, stylesheet swap, overlay).
//!
//! # Example
//! ```text
//! let mut client = HmrClient::new(document, &HmrConfig::default());
//! client.attach(server.connect()?);
//!
//! let hot = client.create_hot_context("/src/counter.ts");
//! hot.accept_with(|module| render(module));
//! hot.dispose(|data| data.set("count", &count).ok());
//!
//! client.poll()?;
//! ```
//!
//! A hot context moves through:
//!
//! ```text
//! Registered ──update──▶ Updating ──dispose──▶ DisposedPendingReaccept ──import──▶ Active
//!     │                                                                    │
//!     └──decline()──▶ Declined                       Active ──update──▶ Updating ...
//! any ──prune──▶ Pruned
//! ```

use std::fmt;
use std::time::Duration;

use rustc_hash::FxHashMap as HashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::HmrConfig;
use crate::error::{Error, Result};
use crate::hmr::overlay::ErrorOverlay;
use crate::hmr::payload::{ClientMessage, HmrPayload, ModuleUpdate, UpdateType};
use crate::hmr::server::HmrConnection;
use crate::module_graph::{normalize_url, ModuleType};

/// Exports of a re-imported module
pub type ModuleNamespace = Value;

type AcceptCallback = Box<dyn FnMut(&ModuleNamespace)>;
type DepCallback = Box<dyn FnMut(&str, &ModuleNamespace)>;
type DataCallback = Box<dyn FnMut(&mut HotData)>;
type EventCallback = Box<dyn FnMut(&Value)>;

/// Side effects the client needs from the page it runs in
pub trait PreviewDocument {
    /// Reload the whole page
    fn reload(&mut self);

    /// Dynamically import `url` and return its namespace
    fn import_module(&mut self, url: &str) -> Result<ModuleNamespace>;

    /// Point the `<link rel=stylesheet>` (or tracked `<style>`) for `path`
    /// at `busted_url`. Returns false when the page has no such element.
    fn update_stylesheet(&mut self, path: &str, busted_url: &str) -> bool;

    fn show_overlay(&mut self, overlay: &ErrorOverlay);

    fn hide_overlay(&mut self);
}

/// State handed from a module's dispose callback to its next instance
#[derive(Debug, Clone, Default)]
pub struct HotData {
    data: HashMap<String, Vec<u8>>,
}

impl HotData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value).map_err(|e| Error::Hmr(format!("hot data '{}': {}", key, e)))?;
        self.data.insert(key.to_string(), bytes);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.data.get(key) {
            Some(bytes) => bincode::deserialize(bytes)
                .map(Some)
                .map_err(|e| Error::Hmr(format!("hot data '{}': {}", key, e))),
            None => Ok(None),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Lifecycle state of a hot context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotState {
    /// Evaluated once, never swapped
    Registered,
    /// An update is being applied; dispose is about to run
    Updating,
    /// Dispose ran; `data` waits for the next instance
    DisposedPendingReaccept,
    /// Re-imported after at least one swap
    Active,
    /// Called `decline()`; every update reloads the page
    Declined,
    /// Removed from the page
    Pruned,
}

/// Per-module hot API (`import.meta.hot`)
pub struct HotContext {
    url: String,
    state: HotState,
    self_accepting: bool,
    accept_callback: Option<AcceptCallback>,
    dep_callbacks: Vec<(Vec<String>, DepCallback)>,
    dispose_callback: Option<DataCallback>,
    prune_callback: Option<DataCallback>,
    listeners: HashMap<String, Vec<EventCallback>>,
    pending_invalidation: Option<Option<String>>,
    /// Survives one dispose → re-accept cycle
    pub data: HotData,
}

impl fmt::Debug for HotContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotContext")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("self_accepting", &self.self_accepting)
            .field("accepted_deps", &self.dep_callbacks.iter().map(|(d, _)| d).collect::<Vec<_>>())
            .finish()
    }
}

impl HotContext {
    pub fn new(url: &str) -> Self {
        Self {
            url: normalize_url(url),
            state: HotState::Registered,
            self_accepting: false,
            accept_callback: None,
            dep_callbacks: Vec::new(),
            dispose_callback: None,
            prune_callback: None,
            listeners: HashMap::default(),
            pending_invalidation: None,
            data: HotData::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> HotState {
        self.state
    }

    pub fn is_self_accepting(&self) -> bool {
        self.self_accepting
    }

    pub fn is_declined(&self) -> bool {
        self.state == HotState::Declined
    }

    /// True when an `accept_deps` registration names `url`
    pub fn accepts_dep(&self, url: &str) -> bool {
        let url = normalize_url(url);
        self.dep_callbacks.iter().any(|(deps, _)| deps.contains(&url))
    }

    /// Self-accept without a callback
    pub fn accept(&mut self) {
        self.self_accepting = true;
    }

    /// Self-accept; `callback` receives the new module namespace
    pub fn accept_with<F>(&mut self, callback: F)
    where
        F: FnMut(&ModuleNamespace) + 'static,
    {
        self.self_accepting = true;
        self.accept_callback = Some(Box::new(callback));
    }

    /// Accept updates of the given dependency URLs
    pub fn accept_deps<I, S, F>(&mut self, deps: I, callback: F)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(&str, &ModuleNamespace) + 'static,
    {
        let deps = deps.into_iter().map(|d| normalize_url(d.as_ref())).collect();
        self.dep_callbacks.push((deps, Box::new(callback)));
    }

    /// Run before the module is replaced
    pub fn dispose<F>(&mut self, callback: F)
    where
        F: FnMut(&mut HotData) + 'static,
    {
        self.dispose_callback = Some(Box::new(callback));
    }

    /// Run when the module is removed from the page
    pub fn prune<F>(&mut self, callback: F)
    where
        F: FnMut(&mut HotData) + 'static,
    {
        self.prune_callback = Some(Box::new(callback));
    }

    /// Refuse hot updates from now on
    pub fn decline(&mut self) {
        self.state = HotState::Declined;
    }

    /// Ask the server to propagate this update to the importers instead
    pub fn invalidate(&mut self, message: Option<&str>) {
        self.pending_invalidation = Some(message.map(str::to_string));
    }

    /// Listen for a custom server event
    pub fn on<F>(&mut self, event: &str, callback: F)
    where
        F: FnMut(&Value) + 'static,
    {
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(Box::new(callback));
    }

    fn begin_update(&mut self) {
        if self.state == HotState::Declined {
            return;
        }
        self.state = HotState::Updating;
        if let Some(dispose) = self.dispose_callback.as_mut() {
            dispose(&mut self.data);
        }
        self.state = HotState::DisposedPendingReaccept;
    }

    fn finish_update(&mut self) {
        if self.state == HotState::DisposedPendingReaccept {
            self.state = HotState::Active;
        }
    }

    fn run_prune(&mut self) {
        if let Some(prune) = self.prune_callback.as_mut() {
            prune(&mut self.data);
        }
        self.state = HotState::Pruned;
    }

    fn call_accept(&mut self, module: &ModuleNamespace) {
        if let Some(accept) = self.accept_callback.as_mut() {
            accept(module);
        }
    }

    fn call_dep_accept(&mut self, dep: &str, module: &ModuleNamespace) {
        for (deps, callback) in self.dep_callbacks.iter_mut() {
            if deps.iter().any(|d| d == dep) {
                callback(dep, module);
            }
        }
    }

    fn emit(&mut self, event: &str, data: &Value) {
        if let Some(listeners) = self.listeners.get_mut(event) {
            for listener in listeners.iter_mut() {
                listener(data);
            }
        }
    }
}

/// Exponential backoff for reconnecting the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            factor: 2,
            max_delay: Duration::from_millis(5000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Every delay, in attempt order
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(|attempt| self.delay_for(attempt))
    }
}

/// Transport state seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Reconnecting,
    /// Backoff exhausted; the page keeps working without live updates
    GaveUp,
}

/// The HMR runtime of one preview document
pub struct HmrClient<D: PreviewDocument> {
    document: D,
    contexts: HashMap<String, HotContext>,
    connection: Option<HmrConnection>,
    status: ConnectionStatus,
    overlay: Option<ErrorOverlay>,
    overlay_enabled: bool,
    policy: ReconnectPolicy,
}

impl<D: PreviewDocument> HmrClient<D> {
    pub fn new(document: D, config: &HmrConfig) -> Self {
        Self {
            document,
            contexts: HashMap::default(),
            connection: None,
            status: ConnectionStatus::Disconnected,
            overlay: None,
            overlay_enabled: config.overlay,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// The overlay currently shown, if any
    pub fn overlay(&self) -> Option<&ErrorOverlay> {
        self.overlay.as_ref()
    }

    /// Register (or re-register after a swap) the hot context for `url`
    pub fn create_hot_context(&mut self, url: &str) -> &mut HotContext {
        let url = normalize_url(url);
        let stale = self
            .contexts
            .get(&url)
            .is_some_and(|ctx| ctx.state == HotState::Pruned);
        if stale {
            self.contexts.remove(&url);
        }
        self.contexts
            .entry(url.clone())
            .or_insert_with(|| HotContext::new(&url))
    }

    pub fn hot_context(&self, url: &str) -> Option<&HotContext> {
        self.contexts.get(&normalize_url(url))
    }

    pub fn hot_context_mut(&mut self, url: &str) -> Option<&mut HotContext> {
        self.contexts.get_mut(&normalize_url(url))
    }

    /// Use `connection` as the transport
    pub fn attach(&mut self, connection: HmrConnection) {
        self.connection = Some(connection);
        self.status = ConnectionStatus::Connected;
    }

    /// Apply every payload waiting on the transport; returns how many
    pub fn poll(&mut self) -> Result<usize> {
        let Some(connection) = self.connection.clone() else {
            return Ok(0);
        };
        let mut handled = 0;
        while let Some(payload) = connection.recv() {
            self.handle_payload(payload)?;
            handled += 1;
        }
        if !connection.is_open() {
            self.status = ConnectionStatus::Disconnected;
        }
        self.flush_invalidations()?;
        Ok(handled)
    }

    pub fn handle_payload(&mut self, payload: HmrPayload) -> Result<()> {
        match payload {
            HmrPayload::Connected => {
                info!("[hmr] connected");
                self.status = ConnectionStatus::Connected;
                self.dismiss_overlay();
            }
            HmrPayload::Update { updates } => {
                for update in &updates {
                    self.apply_update(update)?;
                }
                self.dismiss_overlay();
            }
            HmrPayload::FullReload { path } => {
                debug!(path = ?path, "[hmr] full reload");
                self.document.reload();
            }
            HmrPayload::Prune { paths } => {
                for path in paths {
                    if let Some(mut ctx) = self.contexts.remove(&normalize_url(&path)) {
                        ctx.run_prune();
                    }
                }
            }
            HmrPayload::Error { error } => {
                warn!(message = %error.message, "[hmr] build error");
                if self.overlay_enabled {
                    let overlay = ErrorOverlay::from_payload(&error);
                    self.document.show_overlay(&overlay);
                    self.overlay = Some(overlay);
                }
            }
            HmrPayload::Custom { event, data } => {
                for ctx in self.contexts.values_mut() {
                    ctx.emit(&event, &data);
                }
            }
        }
        Ok(())
    }

    /// Hide the overlay (user dismissal, reconnect, or a successful update)
    pub fn dismiss_overlay(&mut self) {
        if self.overlay.take().is_some() {
            self.document.hide_overlay();
        }
    }

    fn apply_update(&mut self, update: &ModuleUpdate) -> Result<()> {
        if update.update_type == UpdateType::StylesheetUpdate {
            let busted = busted_url(&update.path, update.timestamp, false);
            if self.document.update_stylesheet(&update.path, &busted) {
                return Ok(());
            }
            if !self.contexts.contains_key(&normalize_url(&update.accepted_path)) {
                debug!(path = %update.path, "[hmr] stylesheet not on the page");
                return Ok(());
            }
        }
        self.apply_script_update(update)
    }

    fn apply_script_update(&mut self, update: &ModuleUpdate) -> Result<()> {
        let path = normalize_url(&update.path);
        let accepted = normalize_url(&update.accepted_path);

        let Some(boundary) = self.contexts.get(&accepted) else {
            info!(url = %accepted, "[hmr] module not registered, reloading");
            self.document.reload();
            return Ok(());
        };
        let via_dep = path != accepted && boundary.accepts_dep(&path);
        if boundary.is_declined() || !(via_dep || boundary.is_self_accepting()) {
            info!(url = %accepted, "[hmr] module cannot accept the update, reloading");
            self.document.reload();
            return Ok(());
        }

        let replaced = if via_dep { path.clone() } else { accepted.clone() };
        if let Some(ctx) = self.contexts.get_mut(&replaced) {
            ctx.begin_update();
        }

        let is_style = ModuleType::from_path(&replaced) == ModuleType::Stylesheet;
        let module = match self.document.import_module(&busted_url(&replaced, update.timestamp, is_style)) {
            Ok(module) => module,
            Err(e) => {
                warn!(url = %replaced, error = %e, "[hmr] failed to re-import");
                return Err(e);
            }
        };

        if let Some(ctx) = self.contexts.get_mut(&replaced) {
            ctx.finish_update();
        }
        if let Some(boundary) = self.contexts.get_mut(&accepted) {
            if via_dep {
                boundary.call_dep_accept(&path, &module);
            } else {
                boundary.call_accept(&module);
            }
        }
        debug!(path = %path, accepted = %accepted, "[hmr] updated");
        Ok(())
    }

    /// Send `invalidate` for every context that asked for it
    pub fn flush_invalidations(&mut self) -> Result<usize> {
        let mut pending: Vec<(String, Option<String>)> = self
            .contexts
            .values_mut()
            .filter_map(|ctx| ctx.pending_invalidation.take().map(|msg| (ctx.url.clone(), msg)))
            .collect();
        pending.sort();

        for (path, message) in &pending {
            self.send(&ClientMessage::Invalidate {
                path: path.clone(),
                message: message.clone(),
            })?;
        }
        Ok(pending.len())
    }

    /// Send a custom event to the server
    pub fn send_custom(&mut self, event: &str, data: Value) -> Result<()> {
        self.send(&ClientMessage::Custom {
            event: event.to_string(),
            data,
        })
    }

    fn send(&mut self, message: &ClientMessage) -> Result<()> {
        match &self.connection {
            Some(connection) => connection.send(message),
            None => Err(Error::Hmr("not connected".to_string())),
        }
    }

    /// Reconnect with exponential backoff.
    ///
    /// `connect` opens a transport; `wait` sleeps for the given delay. After
    /// the policy's last attempt the client stays disconnected.
    pub fn reconnect<C, W>(&mut self, mut connect: C, mut wait: W) -> Result<()>
    where
        C: FnMut() -> Result<HmrConnection>,
        W: FnMut(Duration),
    {
        let policy = self.policy;
        self.status = ConnectionStatus::Reconnecting;
        self.connection = None;

        for (attempt, delay) in policy.delays().enumerate() {
            wait(delay);
            match connect() {
                Ok(connection) => {
                    info!(attempt = attempt + 1, "[hmr] reconnected");
                    self.attach(connection);
                    return Ok(());
                }
                Err(e) => debug!(attempt = attempt + 1, error = %e, "[hmr] reconnect failed"),
            }
        }

        warn!(attempts = policy.max_attempts, "[hmr] giving up on reconnecting");
        self.status = ConnectionStatus::GaveUp;
        Err(Error::Hmr(format!(
            "gave up after {} reconnect attempts",
            policy.max_attempts
        )))
    }
}

/// `url` with a cache-busting timestamp (and `import` for stylesheet modules)
pub fn busted_url(url: &str, timestamp: u64, as_import: bool) -> String {
    let path = normalize_url(url);
    if as_import {
        format!("{}?import&t={}", path, timestamp)
    } else {
        format!("{}?t={}", path, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmr::payload::ErrorPayload;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeDocument {
        reloads: usize,
        imports: Vec<String>,
        stylesheets: Vec<String>,
        linked_styles: Vec<String>,
        overlay_visible: bool,
        fail_imports: bool,
    }

    impl PreviewDocument for FakeDocument {
        fn reload(&mut self) {
            self.reloads += 1;
        }

        fn import_module(&mut self, url: &str) -> Result<ModuleNamespace> {
            if self.fail_imports {
                return Err(Error::Hmr(format!("failed to fetch {}", url)));
            }
            self.imports.push(url.to_string());
            Ok(serde_json::json!({ "url": url }))
        }

        fn update_stylesheet(&mut self, path: &str, busted_url: &str) -> bool {
            if self.linked_styles.iter().any(|s| s == path) {
                self.stylesheets.push(busted_url.to_string());
                return true;
            }
            false
        }

        fn show_overlay(&mut self, _overlay: &ErrorOverlay) {
            self.overlay_visible = true;
        }

        fn hide_overlay(&mut self) {
            self.overlay_visible = false;
        }
    }

    fn client() -> HmrClient<FakeDocument> {
        HmrClient::new(FakeDocument::default(), &HmrConfig::default())
    }

    fn script_update(path: &str, accepted: &str) -> HmrPayload {
        HmrPayload::Update {
            updates: vec![ModuleUpdate {
                update_type: UpdateType::ScriptUpdate,
                path: path.to_string(),
                accepted_path: accepted.to_string(),
                timestamp: 7,
            }],
        }
    }

    #[test]
    fn test_self_accept_carries_data_across_swap() {
        let mut client = client();
        let accepted = Rc::new(RefCell::new(Vec::new()));

        let seen = accepted.clone();
        let hot = client.create_hot_context("/src/counter.ts");
        hot.accept_with(move |module| seen.borrow_mut().push(module["url"].as_str().unwrap_or("").to_string()));
        hot.dispose(|data| {
            data.set("count", &3u32).unwrap();
        });
        assert_eq!(hot.state(), HotState::Registered);

        client.handle_payload(script_update("/src/counter.ts", "/src/counter.ts")).unwrap();

        let hot = client.hot_context("/src/counter.ts").unwrap();
        assert_eq!(hot.state(), HotState::Active);
        assert_eq!(hot.data.get::<u32>("count").unwrap(), Some(3));
        assert_eq!(*accepted.borrow(), vec!["/src/counter.ts?t=7".to_string()]);
        assert_eq!(client.document().reloads, 0);
    }

    #[test]
    fn test_unregistered_or_declined_reloads() {
        let mut client = client();
        client.handle_payload(script_update("/src/a.ts", "/src/a.ts")).unwrap();
        assert_eq!(client.document().reloads, 1);

        let hot = client.create_hot_context("/src/b.ts");
        hot.accept();
        hot.decline();
        client.handle_payload(script_update("/src/b.ts", "/src/b.ts")).unwrap();
        assert_eq!(client.document().reloads, 2);
        assert!(client.document().imports.is_empty());
    }

    #[test]
    fn test_dep_accept_calls_dep_callback() {
        let mut client = client();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = calls.clone();
        client
            .create_hot_context("/src/app.tsx")
            .accept_deps(["/src/utils.ts"], move |dep, _| seen.borrow_mut().push(dep.to_string()));

        client.handle_payload(script_update("/src/utils.ts", "/src/app.tsx")).unwrap();
        assert_eq!(*calls.borrow(), vec!["/src/utils.ts".to_string()]);
        assert_eq!(client.document().imports, vec!["/src/utils.ts?t=7".to_string()]);
    }

    #[test]
    fn test_stylesheet_update_swaps_link() {
        let mut client = client();
        client.document_mut().linked_styles.push("/src/style.css".to_string());
        client
            .handle_payload(HmrPayload::Update {
                updates: vec![ModuleUpdate {
                    update_type: UpdateType::StylesheetUpdate,
                    path: "/src/style.css".to_string(),
                    accepted_path: "/src/style.css".to_string(),
                    timestamp: 9,
                }],
            })
            .unwrap();
        assert_eq!(client.document().stylesheets, vec!["/src/style.css?t=9".to_string()]);
        assert_eq!(client.document().reloads, 0);
    }

    #[test]
    fn test_overlay_shown_then_cleared() {
        let mut client = client();
        client.create_hot_context("/src/a.ts").accept();
        client
            .handle_payload(HmrPayload::Error {
                error: ErrorPayload::new("boom"),
            })
            .unwrap();
        assert!(client.document().overlay_visible);
        assert_eq!(client.overlay().unwrap().message, "boom");

        client.handle_payload(script_update("/src/a.ts", "/src/a.ts")).unwrap();
        assert!(!client.document().overlay_visible);
        assert!(client.overlay().is_none());
    }

    #[test]
    fn test_overlay_disabled() {
        let config = HmrConfig {
            overlay: false,
            ..HmrConfig::default()
        };
        let mut client = HmrClient::new(FakeDocument::default(), &config);
        client
            .handle_payload(HmrPayload::Error {
                error: ErrorPayload::new("boom"),
            })
            .unwrap();
        assert!(!client.document().overlay_visible);
    }

    #[test]
    fn test_prune_runs_callback_and_forgets_context() {
        let mut client = client();
        let pruned = Rc::new(RefCell::new(false));
        let flag = pruned.clone();
        client.create_hot_context("/src/old.ts").prune(move |_| *flag.borrow_mut() = true);

        client
            .handle_payload(HmrPayload::Prune {
                paths: vec!["/src/old.ts".to_string()],
            })
            .unwrap();
        assert!(*pruned.borrow());
        assert!(client.hot_context("/src/old.ts").is_none());
    }

    #[test]
    fn test_failed_import_is_reported() {
        let mut client = client();
        client.document_mut().fail_imports = true;
        client.create_hot_context("/src/a.ts").accept();
        assert!(client.handle_payload(script_update("/src/a.ts", "/src/a.ts")).is_err());
        assert_eq!(
            client.hot_context("/src/a.ts").unwrap().state(),
            HotState::DisposedPendingReaccept
        );
    }

    #[test]
    fn test_custom_event_reaches_listeners() {
        let mut client = client();
        let got = Rc::new(RefCell::new(Value::Null));
        let sink = got.clone();
        client
            .create_hot_context("/src/a.ts")
            .on("theme", move |data| *sink.borrow_mut() = data.clone());
        client
            .handle_payload(HmrPayload::Custom {
                event: "theme".to_string(),
                data: serde_json::json!("dark"),
            })
            .unwrap();
        assert_eq!(*got.borrow(), serde_json::json!("dark"));
    }

    #[test]
    fn test_reconnect_backoff_gives_up() {
        let mut client = client();
        let mut waits = Vec::new();
        let result = client.reconnect(
            || Err(Error::Hmr("refused".to_string())),
            |delay| waits.push(delay.as_millis() as u64),
        );
        assert!(result.is_err());
        assert_eq!(client.status(), ConnectionStatus::GaveUp);
        assert_eq!(waits, vec![100, 200, 400, 800, 1600, 3200, 5000, 5000, 5000, 5000]);
    }

    #[test]
    fn test_reconnect_succeeds() {
        let server = crate::hmr::HmrServer::new(HmrConfig::default());
        server.listen();
        let mut client = client();
        let mut attempts = 0;
        client
            .reconnect(
                || {
                    attempts += 1;
                    if attempts < 3 {
                        Err(Error::Hmr("refused".to_string()))
                    } else {
                        server.connect()
                    }
                },
                |_| {},
            )
            .unwrap();
        assert_eq!(client.status(), ConnectionStatus::Connected);
        assert_eq!(client.poll().unwrap(), 1);
    }

    #[test]
    fn test_invalidate_is_sent_to_server() {
        let server = crate::hmr::HmrServer::new(HmrConfig::default());
        server.listen();
        let mut client = client();
        client.attach(server.connect().unwrap());
        client
            .create_hot_context("/src/a.ts")
            .invalidate(Some("cannot swap"));
        client.poll().unwrap();

        assert_eq!(
            server.poll_client_messages(),
            vec![ClientMessage::Invalidate {
                path: "/src/a.ts".to_string(),
                message: Some("cannot swap".to_string())
            }]
        );
    }
}
