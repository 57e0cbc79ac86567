//! Hot Module Replacement
//!
//! Server side: [`HmrServer`] turns a file change into the smallest correct
//! payload (see [`compute_update`]) and broadcasts it. Client side:
//! [`HmrClient`] models the runtime injected into the preview, and
//! [`client_code`] renders the browser script itself.
//!
//! # Wire format
//! ```text
//! {"type":"connected"}
//! {"type":"update","updates":[{"type":"script-update","path":"/src/utils.ts",
//!                              "acceptedPath":"/src/app.tsx","timestamp":1700000000000}]}
//! {"type":"full-reload","path":"/src/main.ts"}
//! {"type":"prune","paths":["/src/old.ts"]}
//! {"type":"error","error":{"message":"Unexpected token","file":"/src/app.tsx","line":3}}
//! {"type":"custom","event":"theme","data":"dark"}
//! ```

mod client;
mod overlay;
mod payload;
mod server;

pub use client::{
    busted_url, ConnectionStatus, HmrClient, HotContext, HotData, HotState, ModuleNamespace, PreviewDocument,
    ReconnectPolicy,
};
pub use overlay::{ErrorOverlay, FrameLine, MAX_STACK_LINES};
pub use payload::{ClientMessage, ErrorPayload, HmrPayload, ModuleUpdate, UpdateType};
pub use server::{compute_update, HmrConnection, HmrServer};

pub(crate) use server::build_updates;

use crate::config::HmrConfig;

/// Global installed by the client script
pub const CLIENT_GLOBAL: &str = "__QUICKDEV_HMR__";

/// Present in every module that registers a hot context
pub const HOT_CONTEXT_MARKER: &str = "__QUICKDEV_HMR__.createHotContext(";

const CLIENT_TEMPLATE: &str = include_str!("client.js");
const CONFIG_PLACEHOLDER: &str = "__QUICKDEV_HMR_CONFIG__";

/// The self-contained client script, configured for `config`
pub fn client_code(config: &HmrConfig) -> String {
    let json = serde_json::to_string(config).unwrap_or_else(|_| "{}".to_string());
    CLIENT_TEMPLATE.replace(CONFIG_PLACEHOLDER, &json)
}

/// Preamble registering `url` as a self-accepting hot module
pub fn hot_preamble(url: &str) -> String {
    format!("{}import.meta.hot.accept();\n", hot_registration(url))
}

/// Preamble that only creates the hot context for `url`
pub fn hot_registration(url: &str) -> String {
    let url = serde_json::to_string(url).unwrap_or_else(|_| "\"\"".to_string());
    format!("import.meta.hot = window.{}{});\n", HOT_CONTEXT_MARKER, url)
}
