//! Onion-style middleware around the built-in router
//!
//! # Example
//! ```text
//! server.use_middleware(Middleware::new("timing", |req, next| {
//!     let started = Instant::now();
//!     let mut res = next(req);
//!     res.set_header("Server-Timing", &format!("total;dur={}", started.elapsed().as_millis()));
//!     res
//! }));
//! ```

use std::fmt;
use std::rc::Rc;

use crate::server::request::{VirtualRequest, VirtualResponse};

/// The continuation a middleware calls to reach the next layer
pub type Next<'a> = &'a dyn Fn(&VirtualRequest) -> VirtualResponse;

/// Middleware that wraps request handling
#[derive(Clone)]
pub struct Middleware {
    /// Middleware name
    pub name: String,
    handler: Rc<dyn Fn(&VirtualRequest, Next<'_>) -> VirtualResponse>,
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware").field("name", &self.name).finish()
    }
}

impl Middleware {
    /// Create a new middleware
    pub fn new<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&VirtualRequest, Next<'_>) -> VirtualResponse + 'static,
    {
        Self {
            name: name.to_string(),
            handler: Rc::new(handler),
        }
    }

    /// Execute this middleware
    pub fn execute(&self, req: &VirtualRequest, next: Next<'_>) -> VirtualResponse {
        (self.handler)(req, next)
    }
}

/// Run `chain` around `endpoint`; the first middleware is the outermost layer
pub fn run_chain(
    chain: &[Middleware],
    req: &VirtualRequest,
    endpoint: &dyn Fn(&VirtualRequest) -> VirtualResponse,
) -> VirtualResponse {
    match chain.split_first() {
        Some((outer, rest)) => outer.execute(req, &|r: &VirtualRequest| run_chain(rest, r, endpoint)),
        None => endpoint(req),
    }
}
