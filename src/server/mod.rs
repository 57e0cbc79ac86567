//! Virtual HTTP Server
//!
//! Answers [`VirtualRequest`]s against a [`FileMap`] without sockets.
//! Requests pass through the middleware chain into the built-in router:
//! exact file match → extension probing → directory index → diagnostic
//! routes → custom routes → 404. Script modules (and claimed extensions
//! requested with `?import`) go through the installed transformer, whose
//! output is cached per URL until invalidated.
//!
//! # Example
//! ```text
//! let server = VirtualServer::new(files, graph, ServerOptions::default());
//! server.set_transformer(|code, url| Ok(TransformOutput::code(code)));
//! server.add_route(Method::Get, "/api/health", |_| VirtualResponse::text(200, "ok"));
//!
//! let res = server.handle_request(&VirtualRequest::get("/src/app"));
//! ```

mod file_map;
mod middleware;
mod mime;
mod request;

pub use file_map::FileMap;
pub use middleware::{run_chain, Middleware, Next};
pub use mime::{content_type_for, is_script_extension, INDEX_FILES, PROBE_EXTENSIONS};
pub use request::{reason_phrase, Method, VirtualRequest, VirtualResponse};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet, FxHasher};
use tracing::{debug, warn};

use crate::config::{DevServerConfig, HmrConfig};
use crate::error::{Error, Result};
use crate::module_graph::{extension, normalize_url, ModuleGraph};

/// Liveness probe
pub const PING_PATH: &str = "/__ping";
/// HMR client bootstrap script
pub const HMR_CLIENT_PATH: &str = "/@hmr/client";
/// Module graph introspection
pub const MODULES_PATH: &str = "/__modules";

const JS_CONTENT_TYPE: &str = "application/javascript; charset=utf-8";

/// Output of the transformer for one module
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub code: String,
    pub source_map: Option<String>,
}

impl TransformOutput {
    /// Output without a source map
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            source_map: None,
        }
    }
}

/// The single transform function: `(source, url) -> output`
pub type Transformer = Rc<dyn Fn(&str, &str) -> Result<TransformOutput>>;

/// Request-independent server settings
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub cors: bool,
    /// Base path, normalized to start and end with `/`
    pub base: String,
    pub headers: BTreeMap<String, String>,
    /// Script served at [`HMR_CLIENT_PATH`]
    pub hmr_client_code: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            cors: true,
            base: "/".to_string(),
            headers: BTreeMap::new(),
            hmr_client_code: crate::hmr::client_code(&HmrConfig::default()),
        }
    }
}

impl From<&DevServerConfig> for ServerOptions {
    fn from(config: &DevServerConfig) -> Self {
        Self {
            cors: config.cors,
            base: config.normalized_base(),
            headers: config.headers.clone(),
            hmr_client_code: crate::hmr::client_code(&config.hmr_config().unwrap_or_default()),
        }
    }
}

/// A route registered by the embedder or a plugin
#[derive(Clone)]
struct CustomRoute {
    method: Method,
    path: String,
    handler: Rc<dyn Fn(&VirtualRequest) -> VirtualResponse>,
}

#[derive(Debug, Clone)]
struct CachedTransform {
    output: TransformOutput,
    etag: String,
}

/// In-memory HTTP server over a file map
pub struct VirtualServer {
    files: FileMap,
    graph: Rc<RefCell<ModuleGraph>>,
    options: ServerOptions,
    transformer: RefCell<Option<Transformer>>,
    middleware: RefCell<Vec<Middleware>>,
    routes: RefCell<Vec<CustomRoute>>,
    claimed_extensions: RefCell<HashSet<String>>,
    cache: RefCell<HashMap<String, CachedTransform>>,
    in_flight: RefCell<HashSet<String>>,
}

impl fmt::Debug for VirtualServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualServer")
            .field("files", &self.files.len())
            .field("options", &self.options)
            .field("middleware", &self.middleware.borrow())
            .field("routes", &self.routes.borrow().len())
            .field("cached", &self.cache.borrow().len())
            .finish()
    }
}

impl VirtualServer {
    pub fn new(files: FileMap, graph: Rc<RefCell<ModuleGraph>>, options: ServerOptions) -> Self {
        Self {
            files,
            graph,
            options,
            transformer: RefCell::new(None),
            middleware: RefCell::new(Vec::new()),
            routes: RefCell::new(Vec::new()),
            claimed_extensions: RefCell::new(HashSet::default()),
            cache: RefCell::new(HashMap::default()),
            in_flight: RefCell::new(HashSet::default()),
        }
    }

    /// Install the transform function for script modules
    pub fn set_transformer<F>(&self, transformer: F)
    where
        F: Fn(&str, &str) -> Result<TransformOutput> + 'static,
    {
        *self.transformer.borrow_mut() = Some(Rc::new(transformer));
        self.clear_cache();
    }

    /// Append a middleware; earlier middleware wraps later ones
    pub fn use_middleware(&self, middleware: Middleware) {
        debug!(name = %middleware.name, "middleware registered");
        self.middleware.borrow_mut().push(middleware);
    }

    /// Register a route answered after file lookup and the built-in routes
    pub fn add_route<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&VirtualRequest) -> VirtualResponse + 'static,
    {
        self.routes.borrow_mut().push(CustomRoute {
            method,
            path: normalize_url(path),
            handler: Rc::new(handler),
        });
    }

    /// Route `ext` files requested with `?import` through the transformer
    pub fn claim_extension(&self, ext: &str) {
        self.claimed_extensions
            .borrow_mut()
            .insert(ext.trim_start_matches('.').to_string());
    }

    pub fn files(&self) -> &FileMap {
        &self.files
    }

    pub fn graph(&self) -> &Rc<RefCell<ModuleGraph>> {
        &self.graph
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Answer one request
    pub fn handle_request(&self, req: &VirtualRequest) -> VirtualResponse {
        let mut res = if req.method == Method::Options {
            VirtualResponse::no_content()
        } else {
            let chain = self.middleware.borrow().clone();
            run_chain(&chain, req, &|r: &VirtualRequest| self.route(r))
        };

        self.finalize(&mut res);
        if req.method == Method::Head {
            res.body.clear();
        }
        debug!(method = %req.method, url = %req.url, status = res.status, "request");
        res
    }

    fn route(&self, req: &VirtualRequest) -> VirtualResponse {
        let stripped = self.strip_base(&req.pathname);

        if let Some(pathname) = stripped.as_deref() {
            if matches!(req.method, Method::Get | Method::Head) {
                if let Some(path) = self.files.resolve(pathname) {
                    return self.serve_file(req, &path);
                }
            }
        }

        let pathname = stripped.unwrap_or_else(|| req.pathname.clone());
        if let Some(res) = self.builtin_route(req, &pathname) {
            return res;
        }

        let route = self
            .routes
            .borrow()
            .iter()
            .find(|r| r.path == pathname && r.method.matches(&req.method))
            .cloned();
        if let Some(route) = route {
            return (route.handler)(req);
        }

        VirtualResponse::not_found(&req.pathname)
    }

    fn strip_base(&self, pathname: &str) -> Option<String> {
        let base = &self.options.base;
        if base == "/" {
            return Some(pathname.to_string());
        }
        if let Some(rest) = pathname.strip_prefix(base.as_str()) {
            return Some(format!("/{}", rest));
        }
        if pathname == base.trim_end_matches('/') {
            return Some("/".to_string());
        }
        None
    }

    fn builtin_route(&self, req: &VirtualRequest, pathname: &str) -> Option<VirtualResponse> {
        if !matches!(req.method, Method::Get | Method::Head) {
            return None;
        }
        match pathname {
            PING_PATH => Some(VirtualResponse::text(200, "pong")),
            HMR_CLIENT_PATH => Some(
                VirtualResponse::ok(self.options.hmr_client_code.clone(), JS_CONTENT_TYPE)
                    .with_header("Cache-Control", "no-cache"),
            ),
            MODULES_PATH => {
                let summaries = self.graph.borrow().summaries();
                Some(match serde_json::to_string(&summaries) {
                    Ok(body) => VirtualResponse::json(body),
                    Err(e) => VirtualResponse::internal_error(e.to_string()),
                })
            }
            _ => None,
        }
    }

    fn serve_file(&self, req: &VirtualRequest, path: &str) -> VirtualResponse {
        self.graph.borrow_mut().ensure_entry_from_url(path);

        if self.should_transform(req, path) {
            return match self.transform_path(path) {
                Ok(cached) => {
                    if req.header("if-none-match") == Some(cached.etag.as_str()) {
                        return VirtualResponse::new(304).with_header("ETag", &cached.etag);
                    }
                    VirtualResponse::ok(cached.output.code, JS_CONTENT_TYPE)
                        .with_header("Cache-Control", "no-cache")
                        .with_header("ETag", &cached.etag)
                }
                Err(e) => {
                    warn!(path, error = %e, "transform failed");
                    VirtualResponse::internal_error(e.to_string())
                }
            };
        }

        match self.files.get(path) {
            Some(content) => VirtualResponse::ok(content, content_type_for(path)),
            None => VirtualResponse::not_found(path),
        }
    }

    fn should_transform(&self, req: &VirtualRequest, path: &str) -> bool {
        if self.transformer.borrow().is_none() {
            return false;
        }
        match extension(path) {
            Some(ext) if is_script_extension(ext) => true,
            Some(ext) => req.has_query("import") && self.claimed_extensions.borrow().contains(ext),
            None => false,
        }
    }

    /// Transform the module at `url` (resolved like a request), using the cache.
    ///
    /// Returns `Ok(None)` when no file backs the URL. Without a transformer
    /// the raw source is returned.
    pub fn transform_request(&self, url: &str) -> Result<Option<TransformOutput>> {
        let (pathname, _) = VirtualRequest::parse_url(url);
        let Some(path) = self.files.resolve(&pathname) else {
            return Ok(None);
        };
        self.graph.borrow_mut().ensure_entry_from_url(&path);

        if self.transformer.borrow().is_none() {
            return Ok(self.files.get(&path).map(TransformOutput::code));
        }
        self.transform_path(&path).map(|cached| Some(cached.output))
    }

    fn transform_path(&self, path: &str) -> Result<CachedTransform> {
        let key = normalize_url(path);
        if let Some(hit) = self.cache.borrow().get(&key) {
            debug!(url = %key, "transform cache hit");
            return Ok(hit.clone());
        }

        if !self.in_flight.borrow_mut().insert(key.clone()) {
            return Err(Error::ReentrantTransform(key));
        }
        let result = self.run_transformer(&key);
        self.in_flight.borrow_mut().remove(&key);
        let output = result?;

        let last_modified = self
            .graph
            .borrow()
            .get_by_url(&key)
            .map(|m| m.last_modified)
            .unwrap_or_default();
        let etag = etag_for(last_modified, &output.code);
        let cached = CachedTransform { output, etag };
        self.cache.borrow_mut().insert(key, cached.clone());
        Ok(cached)
    }

    fn run_transformer(&self, path: &str) -> Result<TransformOutput> {
        let code = self
            .files
            .get(path)
            .ok_or_else(|| Error::Resolution(path.to_string()))?;
        let transformer = self.transformer.borrow().clone();
        match transformer {
            Some(transform) => {
                debug!(url = %path, "transforming");
                transform(&code, path).map_err(|e| e.for_module(path))
            }
            None => Ok(TransformOutput::code(code)),
        }
    }

    /// Evict the cached transform for `url`. The next transform gets a fresh
    /// ETag whenever its code differs.
    pub fn invalidate_cache(&self, url: &str) {
        let key = normalize_url(url);
        let mut cache = self.cache.borrow_mut();
        cache.remove(&key);
        if let Some(resolved) = self.files.resolve(&key) {
            cache.remove(&resolved);
        }
    }

    /// Evict every cached transform
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Number of cached transforms
    pub fn cached_count(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.cache.borrow().contains_key(&normalize_url(url))
    }

    fn finalize(&self, res: &mut VirtualResponse) {
        if self.options.cors {
            res.set_header("Access-Control-Allow-Origin", "*");
            res.set_header("Access-Control-Allow-Methods", "GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS");
            res.set_header("Access-Control-Allow-Headers", "*");
        }
        for (name, value) in &self.options.headers {
            res.set_header(name, value);
        }
        let length = res.body.len().to_string();
        res.set_header("Content-Length", &length);
    }
}

/// Weak validator over the module's `last_modified` and the served code
fn etag_for(last_modified: u64, code: &str) -> String {
    let mut hasher = FxHasher::default();
    code.hash(&mut hasher);
    format!("W/\"{}-{:x}\"", last_modified, hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn server_with(files: &[(&str, &str)]) -> VirtualServer {
        VirtualServer::new(
            FileMap::from_iter(files.iter().copied()),
            Rc::new(RefCell::new(ModuleGraph::new())),
            ServerOptions::default(),
        )
    }

    fn counting_transformer(server: &VirtualServer) -> Rc<Cell<usize>> {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        server.set_transformer(move |code, _url| {
            counter.set(counter.get() + 1);
            Ok(TransformOutput::code(format!("/* t */{}", code)))
        });
        calls
    }

    #[test]
    fn test_serves_html_verbatim() {
        let server = server_with(&[("/index.html", "<h1>hi</h1>")]);
        let res = server.handle_request(&VirtualRequest::get("/index.html"));
        assert_eq!(res.status, 200);
        assert_eq!(res.body, "<h1>hi</h1>");
        assert!(res.content_type().unwrap().starts_with("text/html"));
        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
        assert_eq!(res.header("content-length"), Some("11"));
    }

    #[test]
    fn test_options_preflight() {
        let server = server_with(&[]);
        let res = server.handle_request(&VirtualRequest::new(Method::Options, "/anything"));
        assert_eq!(res.status, 204);
        assert_eq!(res.header("Access-Control-Allow-Origin"), Some("*"));
    }

    #[test]
    fn test_cache_hit_skips_transformer() {
        let server = server_with(&[("/src/main.ts", "let a = 1;")]);
        let calls = counting_transformer(&server);

        for _ in 0..3 {
            let res = server.handle_request(&VirtualRequest::get("/src/main.ts"));
            assert_eq!(res.body, "/* t */let a = 1;");
        }
        assert_eq!(calls.get(), 1);

        server.invalidate_cache("/src/main.ts");
        server.handle_request(&VirtualRequest::get("/src/main.ts?t=2"));
        assert_eq!(calls.get(), 2);

        server.clear_cache();
        server.handle_request(&VirtualRequest::get("/src/main"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_css_served_verbatim_unless_claimed_import() {
        let server = server_with(&[("/style.css", "body{}")]);
        let calls = counting_transformer(&server);

        let plain = server.handle_request(&VirtualRequest::get("/style.css?import"));
        assert_eq!(plain.body, "body{}");
        assert_eq!(calls.get(), 0);

        server.claim_extension("css");
        let plain = server.handle_request(&VirtualRequest::get("/style.css"));
        assert_eq!(plain.body, "body{}");
        let imported = server.handle_request(&VirtualRequest::get("/style.css?import"));
        assert_eq!(imported.body, "/* t */body{}");
        assert!(imported.content_type().unwrap().starts_with("application/javascript"));
    }

    #[test]
    fn test_transform_error_is_500() {
        let server = server_with(&[("/src/bad.ts", "oops")]);
        server.set_transformer(|_, _| Err(Error::transform("", "Unexpected token")));
        let res = server.handle_request(&VirtualRequest::get("/src/bad.ts"));
        assert_eq!(res.status, 500);
        assert!(res.body.contains("Unexpected token"));
        assert_eq!(server.cached_count(), 0);
    }

    #[test]
    fn test_builtin_routes() {
        let server = server_with(&[("/a.ts", "")]);
        assert_eq!(server.handle_request(&VirtualRequest::get(PING_PATH)).body, "pong");

        let client = server.handle_request(&VirtualRequest::get(HMR_CLIENT_PATH));
        assert!(client.content_type().unwrap().starts_with("application/javascript"));
        assert!(client.body.contains("__QUICKDEV_HMR__"));

        server.handle_request(&VirtualRequest::get("/a.ts"));
        let modules = server.handle_request(&VirtualRequest::get(MODULES_PATH));
        let parsed: serde_json::Value = serde_json::from_str(&modules.body).unwrap();
        assert_eq!(parsed[0]["url"], "/a.ts");
        assert_eq!(parsed[0]["type"], "script");
        assert_eq!(parsed[0]["isSelfAccepting"], false);
    }

    #[test]
    fn test_custom_route_after_files() {
        let server = server_with(&[("/api/data", "from file")]);
        server.add_route(Method::Get, "/api/data", |_| VirtualResponse::text(200, "from route"));
        server.add_route(Method::Post, "/api/echo", |req| {
            VirtualResponse::text(200, req.body.clone().unwrap_or_default())
        });

        assert_eq!(server.handle_request(&VirtualRequest::get("/api/data")).body, "from file");
        let echo = server.handle_request(
            &VirtualRequest::new(Method::Post, "/api/echo").with_body("hello"),
        );
        assert_eq!(echo.body, "hello");
    }

    #[test]
    fn test_not_found() {
        let server = server_with(&[]);
        let res = server.handle_request(&VirtualRequest::get("/nope.js"));
        assert_eq!(res.status, 404);
        assert_eq!(res.status_text, "Not Found");
    }

    #[test]
    fn test_base_path_is_stripped() {
        let server = VirtualServer::new(
            FileMap::from_iter([("/index.html", "home")]),
            Rc::new(RefCell::new(ModuleGraph::new())),
            ServerOptions {
                base: "/app/".to_string(),
                ..ServerOptions::default()
            },
        );
        assert_eq!(server.handle_request(&VirtualRequest::get("/app/index.html")).body, "home");
        assert_eq!(server.handle_request(&VirtualRequest::get("/app")).body, "home");
        assert_eq!(server.handle_request(&VirtualRequest::get("/index.html")).status, 404);
        assert_eq!(server.handle_request(&VirtualRequest::get(PING_PATH)).status, 200);
    }

    #[test]
    fn test_etag_round_trip() {
        let server = server_with(&[("/a.ts", "x")]);
        counting_transformer(&server);
        let first = server.handle_request(&VirtualRequest::get("/a.ts"));
        let etag = first.header("etag").unwrap().to_string();
        let second = server.handle_request(&VirtualRequest::get("/a.ts").with_header("If-None-Match", &etag));
        assert_eq!(second.status, 304);
        assert!(second.body.is_empty());
    }

    #[test]
    fn test_etag_follows_content_after_eviction() {
        let server = server_with(&[("/a.ts", "x")]);
        counting_transformer(&server);
        let etag = server
            .handle_request(&VirtualRequest::get("/a.ts"))
            .header("etag")
            .unwrap()
            .to_string();

        server.files().insert("/a.ts", "y");
        server.invalidate_cache("/a.ts");
        let res = server.handle_request(&VirtualRequest::get("/a.ts").with_header("If-None-Match", &etag));
        assert_eq!(res.status, 200);
        assert_eq!(res.body, "/* t */y");
        assert_ne!(res.header("etag"), Some(etag.as_str()));
    }

    #[test]
    fn test_reentrant_transform_is_rejected() {
        let server = Rc::new(server_with(&[("/a.ts", "x")]));
        let weak = Rc::downgrade(&server);
        server.set_transformer(move |code, url| {
            if let Some(server) = weak.upgrade() {
                // a plugin asking for its own module mid-transform
                server.transform_request(url)?;
            }
            Ok(TransformOutput::code(code))
        });
        let err = server.transform_request("/a.ts").unwrap_err();
        assert!(matches!(err, Error::ReentrantTransform(ref url) if url == "/a.ts"));
        assert!(server.transform_request("/missing.ts").unwrap().is_none());
    }

    #[test]
    fn test_custom_headers_and_cors_off() {
        let mut headers = BTreeMap::new();
        headers.insert("X-Preview".to_string(), "1".to_string());
        let server = VirtualServer::new(
            FileMap::from_iter([("/a.txt", "a")]),
            Rc::new(RefCell::new(ModuleGraph::new())),
            ServerOptions {
                cors: false,
                headers,
                ..ServerOptions::default()
            },
        );
        let res = server.handle_request(&VirtualRequest::get("/a.txt"));
        assert_eq!(res.header("x-preview"), Some("1"));
        assert!(res.header("access-control-allow-origin").is_none());
    }
}
