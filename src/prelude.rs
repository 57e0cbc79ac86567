//! Prelude module for convenient imports
//!
//! ```no_run
//! use quickdev::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let mut server = DevServer::new(FileMap::new(), DevServerConfig::default());
//!     server.add_plugin(StylesheetPlugin::new())?;
//!     server.listen()?;
//!     println!("{}", server.handle_request(&VirtualRequest::get("/__ping")).body);
//!     Ok(())
//! }
//! ```

// Orchestration
pub use crate::dev_server::{DevServer, Subscription, WatchEvent, WatchEventKind};

// Configuration
pub use crate::config::{DevServerConfig, HmrConfig, HmrOptions};

// Error handling
pub use crate::error::{Error, Result, SourceLocation};

// Virtual server
pub use crate::server::{FileMap, Method, Middleware, VirtualRequest, VirtualResponse, VirtualServer};

// Module graph
pub use crate::module_graph::{ModuleGraph, ModuleKey, ModuleNode, ModuleType};

// Hot module replacement
pub use crate::hmr::{
    ClientMessage, HmrClient, HmrConnection, HmrPayload, HotContext, ModuleUpdate, PreviewDocument, UpdateType,
};

// Plugins
pub use crate::plugins::{
    ComponentRefreshPlugin, HotUpdateContext, Plugin, StylesheetPlugin, TransformContext, TransformResult,
};
