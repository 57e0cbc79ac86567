//! Stylesheet hot replacement
//!
//! CSS imported from a script is requested as `/x.css?import` and served as
//! a small JS module that injects the rules through the client runtime and
//! self-accepts, so a change swaps the `<style>` tag in place.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::hmr::{hot_preamble, CLIENT_GLOBAL};
use crate::module_graph::{ModuleKey, ModuleType};
use crate::plugins::{HotUpdateContext, Plugin, TransformContext, TransformResult};
use crate::server::VirtualServer;

static CSS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(import\s+(?:[\w*{}\s,$]+?\s+from\s+)?|import\s*\(\s*)(["'])([^"'\n?]+\.css)(["'])"#)
        .expect("css import pattern")
});

#[derive(Debug, Default)]
pub struct StylesheetPlugin;

impl StylesheetPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for StylesheetPlugin {
    fn name(&self) -> &str {
        "quickdev:stylesheet"
    }

    fn configure_server(&self, server: &VirtualServer) -> Result<()> {
        server.claim_extension("css");
        Ok(())
    }

    fn transform(&self, code: &str, _id: &str, ctx: &TransformContext<'_>) -> Result<Option<TransformResult>> {
        match ctx.module_type {
            ModuleType::Stylesheet => {
                let module = stylesheet_module(ctx.url, code)?;
                Ok(Some(TransformResult::new(module).self_accepting(true)))
            }
            ModuleType::Script if CSS_IMPORT.is_match(code) => {
                let rewritten = CSS_IMPORT.replace_all(code, "${1}${2}${3}?import${4}");
                Ok(Some(TransformResult::new(rewritten.into_owned())))
            }
            _ => Ok(None),
        }
    }

    /// Changes to a stylesheet only ever update stylesheet modules
    fn handle_hot_update(&self, ctx: &HotUpdateContext<'_>) -> Option<Vec<ModuleKey>> {
        if ModuleType::from_path(ctx.file) != ModuleType::Stylesheet {
            return None;
        }
        Some(
            ctx.modules
                .iter()
                .copied()
                .filter(|key| {
                    ctx.graph
                        .get(*key)
                        .is_some_and(|m| m.module_type == ModuleType::Stylesheet)
                })
                .collect(),
        )
    }
}

fn stylesheet_module(url: &str, css: &str) -> Result<String> {
    let id = serde_json::to_string(url)?;
    let css = serde_json::to_string(css)?;
    let mut module = hot_preamble(url);
    module.push_str(&format!("const __id = {};\n", id));
    module.push_str(&format!("const __css = {};\n", css));
    module.push_str(&format!("window.{}.updateStyle(__id, __css);\n", CLIENT_GLOBAL));
    module.push_str(&format!(
        "import.meta.hot.prune(() => window.{}.removeStyle(__id));\n",
        CLIENT_GLOBAL
    ));
    module.push_str("export default __css;\n");
    Ok(module)
}
