//! Quickdev: an in-memory development server with hot module replacement
//!
//! Quickdev emulates a bundler dev server without a real filesystem, sockets,
//! or OS process. Files live in a [`FileMap`](server::FileMap), requests are
//! answered by a [`VirtualServer`](server::VirtualServer), and edits flow
//! through a [`ModuleGraph`](module_graph::ModuleGraph) into HMR payloads that
//! a preview page applies without reloading.
//!
//! # Quick Start
//!
//! ```no_run
//! use quickdev::prelude::*;
//!
//! fn main() -> quickdev::Result<()> {
//!     let files = FileMap::from_iter([
//!         ("/index.html", "<html><head></head><body></body></html>"),
//!         ("/src/app.tsx", "export const App = () => null;"),
//!     ]);
//!     let mut server = DevServer::new(files, DevServerConfig::default());
//!     server.listen()?;
//!
//!     let response = server.handle_request(&VirtualRequest::get("/src/app"));
//!     assert_eq!(response.status, 200);
//!
//!     server.write_file("/src/app.tsx", "export const App = () => 1;")?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! File mutations flow: [`dev_server`] → [`module_graph`] → [`hmr`] → preview client.
//! Requests flow: [`server`] → [`plugins`] transform chain → [`module_graph`] → response.
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`module_graph`], [`server`], [`hmr`] |
//! | **Orchestration** | [`dev_server`], [`plugins`], [`config`] |
//! | **Support** | [`error`](Error), [`prelude`] |
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod dev_server;
pub mod hmr;
pub mod module_graph;
pub mod plugins;
pub mod prelude;
pub mod server;

mod error;

pub use error::{format_code_frame, Error, Result, SourceLocation};

/// Quickdev version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Milliseconds since the Unix epoch, used for HMR timestamps and cache busting.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
