//! Shared test helpers for integration tests

use quickdev::hmr::{ErrorOverlay, ModuleNamespace, PreviewDocument};
use quickdev::prelude::*;

#[allow(dead_code)]
pub const INDEX_HTML: &str = "<!doctype html>\n<html><head><title>Preview</title></head>\n<body><div id=\"root\"></div><script type=\"module\" src=\"/src/main.tsx\"></script></body></html>";

/// A small React-style project
pub fn project() -> FileMap {
    FileMap::from_iter([
        ("/index.html", INDEX_HTML),
        (
            "/src/main.tsx",
            "import { App } from './app';\nimport './style.css';\nimport { createRoot } from 'react-dom/client';\ncreateRoot(document.getElementById('root')).render(App());\nimport.meta.hot.decline();\n",
        ),
        (
            "/src/app.tsx",
            "import { greet } from './utils';\nexport function App() { return greet('world'); }\n",
        ),
        ("/src/utils.ts", "export const greet = (name: string) => `hello ${name}`;\n"),
        ("/src/style.css", "body { margin: 0; }\n"),
    ])
}

/// A listening server over `files` with the built-in plugins
pub fn started(files: FileMap) -> DevServer {
    started_with(files, DevServerConfig::default())
}

#[allow(dead_code)]
pub fn started_with(files: FileMap, config: DevServerConfig) -> DevServer {
    let mut server = DevServer::new(files, config);
    server.add_plugin(StylesheetPlugin::new()).unwrap();
    server.add_plugin(ComponentRefreshPlugin::new()).unwrap();
    server.listen().unwrap();
    server
}

/// Preview document that records what the client asked of it
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct RecordingDocument {
    pub reloads: usize,
    pub imports: Vec<String>,
    pub linked_styles: Vec<String>,
    pub swapped_styles: Vec<String>,
    pub overlay: Option<String>,
}

impl PreviewDocument for RecordingDocument {
    fn reload(&mut self) {
        self.reloads += 1;
    }

    fn import_module(&mut self, url: &str) -> quickdev::Result<ModuleNamespace> {
        self.imports.push(url.to_string());
        Ok(serde_json::json!({ "url": url }))
    }

    fn update_stylesheet(&mut self, path: &str, busted_url: &str) -> bool {
        if self.linked_styles.iter().any(|s| s == path) {
            self.swapped_styles.push(busted_url.to_string());
            return true;
        }
        false
    }

    fn show_overlay(&mut self, overlay: &ErrorOverlay) {
        self.overlay = Some(overlay.message.clone());
    }

    fn hide_overlay(&mut self) {
        self.overlay = None;
    }
}
