//! Transform pipeline installed in the virtual server's transformer slot
//!
//! ```text
//! source ─▶ plugin transforms (in order) ─▶ import + hot API scan
//!        ─▶ HMR preamble (scripts without the marker) ─▶ graph edges ─▶ response
//! ```
//!
//! Graph edges are replaced only once the whole chain has succeeded.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::hmr::{hot_preamble, hot_registration, HmrServer, HOT_CONTEXT_MARKER};
use crate::module_graph::{normalize_url, ModuleGraph, ModuleKey, ModuleType};
use crate::plugins::{join_import, resolve_import, scan_hot_api, scan_imports, PluginContainer, TransformContext};
use crate::server::{FileMap, TransformOutput};

pub(crate) struct Pipeline {
    pub(crate) graph: Rc<RefCell<ModuleGraph>>,
    pub(crate) plugins: Rc<RefCell<PluginContainer>>,
    pub(crate) files: FileMap,
    pub(crate) hmr: Rc<HmrServer>,
    pub(crate) hmr_enabled: bool,
}

impl Pipeline {
    pub(crate) fn run(&self, code: &str, url: &str) -> Result<TransformOutput> {
        let url = normalize_url(url);
        let module_type = ModuleType::from_path(&url);
        let ctx = TransformContext {
            url: &url,
            module_type,
            files: &self.files,
        };

        let chained = self.plugins.borrow().transform(code, &url, &ctx);
        let output = match chained {
            Ok(output) => output,
            Err(e) => {
                if self.hmr_enabled {
                    if let Err(send_err) = self.hmr.send_error(&e) {
                        warn!(error = %send_err, "failed to push build error");
                    }
                }
                return Err(e);
            }
        };

        let mut code = output.code;
        let imports = scan_imports(&code);
        let hot = scan_hot_api(&code);

        let mut dep_urls: Vec<String> = Vec::with_capacity(imports.len());
        let mut pending: Vec<String> = Vec::new();
        for spec in &imports {
            match resolve_import(spec, &url, &self.files) {
                Some(dep) => dep_urls.push(dep),
                None => pending.extend(join_import(spec, &url)),
            }
        }
        dep_urls.extend(
            output
                .deps
                .iter()
                .map(|dep| resolve_import(dep, &url, &self.files).unwrap_or_else(|| normalize_url(dep))),
        );
        let accepted_urls: Vec<String> = hot
            .accepted_deps
            .iter()
            .filter_map(|spec| resolve_import(spec, &url, &self.files))
            .collect();

        let injected = self.hmr_enabled && module_type == ModuleType::Script && !code.contains(HOT_CONTEXT_MARKER);
        let self_accepting = output
            .self_accepting
            .unwrap_or(!hot.declines && (injected || hot.self_accepts));
        if injected {
            // the served module must agree with the graph about acceptance
            let preamble = if self_accepting {
                hot_preamble(&url)
            } else {
                hot_registration(&url)
            };
            code.insert_str(0, &preamble);
        }

        let mut graph = self.graph.borrow_mut();
        let key = graph.ensure_entry_from_url(&url);
        let imported: Vec<ModuleKey> = dep_urls.iter().map(|dep| graph.ensure_entry_from_url(dep)).collect();
        let accepted: Vec<ModuleKey> = accepted_urls.iter().map(|dep| graph.ensure_entry_from_url(dep)).collect();

        let dropped = graph.update_module_info(key, imported, accepted, self_accepting);
        if !dropped.is_empty() {
            debug!(url = %url, dropped = dropped.len(), "imports removed");
        }
        graph.set_pending_imports(key, pending);
        graph.set_declined(key, hot.declines);
        graph.set_transform_result(key, code.clone(), output.source_map.clone());

        Ok(TransformOutput {
            code,
            source_map: output.source_map,
        })
    }
}
