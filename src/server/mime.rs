//! Content-Type selection by extension

use crate::module_graph::extension;

/// Extensions probed, in order, for extension-less requests
pub const PROBE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs"];

/// Directory index candidates, in order
pub const INDEX_FILES: &[&str] = &["index.html", "index.ts", "index.tsx", "index.js", "index.jsx"];

/// Extensions routed through the transformer
pub fn is_script_extension(ext: &str) -> bool {
    matches!(ext, "js" | "mjs" | "cjs" | "jsx" | "ts" | "mts" | "cts" | "tsx")
}

/// Content-Type for a resolved path
pub fn content_type_for(path: &str) -> &'static str {
    match extension(path) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json" | "map") => "application/json; charset=utf-8",
        Some(ext) if is_script_extension(ext) => "application/javascript; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("txt" | "md") => "text/plain; charset=utf-8",
        Some("wasm") => "application/wasm",
        None => "application/javascript; charset=utf-8",
        Some(_) => "application/octet-stream",
    }
}
