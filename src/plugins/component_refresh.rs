//! Component refresh for JSX/TSX modules
//!
//! A module whose exports are all components (capitalized names) registers
//! them with the refresh runtime and self-accepts; the accept callback
//! re-renders from the registry. Modules that also export plain values
//! cannot be swapped in isolation and are marked non-self-accepting so the
//! change propagates to their importers.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::hmr::HOT_CONTEXT_MARKER;
use crate::module_graph::extension;
use crate::plugins::{Plugin, TransformContext, TransformResult};
use crate::server::{Method, VirtualResponse, VirtualServer};

/// Route serving the refresh runtime
pub const REFRESH_RUNTIME_PATH: &str = "/@quickdev/refresh-runtime";

const REFRESH_RUNTIME: &str = r#"const registry = new Map();
const listeners = new Set();
export function register(component, id) { registry.set(id, component); }
export function getComponent(id) { return registry.get(id); }
export function subscribe(listener) { listeners.add(listener); return () => listeners.delete(listener); }
export function performRefresh() { listeners.forEach((listener) => listener(registry)); }
"#;

static EXPORTED_BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^export\s+(?:default\s+)?(?:async\s+)?(?:function\*?|class|const|let|var)\s+([A-Za-z_$][\w$]*)")
        .expect("export pattern")
});

#[derive(Debug, Default)]
pub struct ComponentRefreshPlugin;

impl ComponentRefreshPlugin {
    pub fn new() -> Self {
        Self
    }
}

fn is_component_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

impl Plugin for ComponentRefreshPlugin {
    fn name(&self) -> &str {
        "quickdev:component-refresh"
    }

    fn configure_server(&self, server: &VirtualServer) -> Result<()> {
        server.add_route(Method::Get, REFRESH_RUNTIME_PATH, |_| {
            VirtualResponse::ok(REFRESH_RUNTIME, "application/javascript; charset=utf-8")
        });
        Ok(())
    }

    fn transform(&self, code: &str, _id: &str, ctx: &TransformContext<'_>) -> Result<Option<TransformResult>> {
        if !matches!(extension(ctx.url), Some("jsx" | "tsx")) {
            return Ok(None);
        }
        let exports: Vec<&str> = EXPORTED_BINDING
            .captures_iter(code)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        if exports.is_empty() {
            return Ok(None);
        }
        if !exports.iter().all(|name| is_component_name(name)) {
            return Ok(Some(TransformResult::new(code).self_accepting(false)));
        }

        let url = serde_json::to_string(ctx.url)?;
        let mut out = String::with_capacity(code.len() + 256);
        out.push_str(&format!("import * as __quickdev_refresh from \"{}\";\n", REFRESH_RUNTIME_PATH));
        if !code.contains(HOT_CONTEXT_MARKER) {
            out.push_str(&format!("import.meta.hot = window.{}{});\n", HOT_CONTEXT_MARKER, url));
        }
        out.push_str(code);
        if !code.ends_with('\n') {
            out.push('\n');
        }
        for name in &exports {
            out.push_str(&format!(
                "__quickdev_refresh.register({}, {} + \" {}\");\n",
                name, url, name
            ));
        }
        out.push_str("import.meta.hot.accept(() => __quickdev_refresh.performRefresh());\n");

        Ok(Some(TransformResult::new(out).self_accepting(true)))
    }
}
