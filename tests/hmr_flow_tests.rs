//! HMR round trips: dev server → in-memory transport → client runtime model

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use quickdev::hmr::{ConnectionStatus, HotState, ReconnectPolicy};
use quickdev::prelude::*;

use common::{project, started, RecordingDocument};

fn connected_client(server: &DevServer) -> HmrClient<RecordingDocument> {
    let mut client = HmrClient::new(RecordingDocument::default(), &HmrConfig::default());
    client.attach(server.connect_hmr().unwrap());
    assert_eq!(client.poll().unwrap(), 1);
    client
}

mod updates {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_component_edit_swaps_in_place() {
        let server = started(project());
        server.warm_up("/src/main.tsx").unwrap();
        let mut client = connected_client(&server);

        let accepted = Rc::new(RefCell::new(Vec::new()));
        let seen = accepted.clone();
        let hot = client.create_hot_context("/src/app.tsx");
        hot.accept_with(move |module| seen.borrow_mut().push(module["url"].as_str().unwrap_or("").to_string()));
        hot.dispose(|data| {
            data.set("clicks", &4u32).unwrap();
        });

        server
            .write_file("/src/app.tsx", "import { greet } from './utils';\nexport function App() { return greet('hmr'); }\n")
            .unwrap();
        assert_eq!(client.poll().unwrap(), 1);

        let doc = client.document();
        assert_eq!(doc.reloads, 0);
        assert_eq!(doc.imports.len(), 1);
        assert!(doc.imports[0].starts_with("/src/app.tsx?t="));
        assert_eq!(accepted.borrow().as_slice(), doc.imports.as_slice());

        let hot = client.hot_context("/src/app.tsx").unwrap();
        assert_eq!(hot.state(), HotState::Active);
        assert_eq!(hot.data.get::<u32>("clicks").unwrap(), Some(4));
    }

    #[test]
    fn test_declined_entry_forces_reload() {
        let server = started(project());
        server.warm_up("/src/main.tsx").unwrap();
        let mut client = connected_client(&server);

        let sent = server.write_file("/src/main.tsx", "import.meta.hot.decline();\n").unwrap();
        assert_eq!(
            sent,
            vec![HmrPayload::FullReload {
                path: Some("/src/main.tsx".to_string())
            }]
        );
        client.poll().unwrap();
        assert_eq!(client.document().reloads, 1);
    }

    #[test]
    fn test_stylesheet_change_is_a_stylesheet_update() {
        let server = started(project());
        server.warm_up("/src/main.tsx").unwrap();
        let mut client = connected_client(&server);
        client.document_mut().linked_styles.push("/src/style.css".to_string());

        let sent = server.write_file("/src/style.css", "body { margin: 4px; }\n").unwrap();
        match &sent[..] {
            [HmrPayload::Update { updates }] => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].update_type, UpdateType::StylesheetUpdate);
                assert_eq!(updates[0].path, "/src/style.css");
                assert_eq!(updates[0].accepted_path, "/src/style.css");
            }
            other => panic!("expected one update, got {:?}", other),
        }

        client.poll().unwrap();
        let doc = client.document();
        assert_eq!(doc.reloads, 0);
        assert_eq!(doc.swapped_styles.len(), 1);
        assert!(doc.swapped_styles[0].starts_with("/src/style.css?t="));
    }

    #[test]
    fn test_injected_stylesheet_module_is_reimported() {
        let server = started(project());
        server.warm_up("/src/main.tsx").unwrap();
        let mut client = connected_client(&server);
        client.create_hot_context("/src/style.css").accept();

        server.write_file("/src/style.css", "body { margin: 8px; }\n").unwrap();
        client.poll().unwrap();

        let doc = client.document();
        assert_eq!(doc.imports.len(), 1);
        assert!(doc.imports[0].starts_with("/src/style.css?import&t="));
    }

    #[test]
    fn test_importer_written_before_its_dependency() {
        let server = started(FileMap::from_iter([(
            "/src/main.ts",
            "import { u } from './utils';\nconsole.log(u);\n",
        )]));
        server.warm_up("/src/main.ts").unwrap();
        let mut client = connected_client(&server);
        client.create_hot_context("/src/main.ts").accept();

        let sent = server.write_file("/src/utils.ts", "export const u = 1;\n").unwrap();
        match &sent[..] {
            [HmrPayload::Update { updates }] => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].accepted_path, "/src/main.ts");
            }
            other => panic!("expected one update, got {:?}", other),
        }
        client.poll().unwrap();
        assert!(client.document().imports[0].starts_with("/src/main.ts?t="));

        // the re-import picks up the new edge
        assert_eq!(server.handle_request(&VirtualRequest::get("/src/main.ts")).status, 200);
        let graph = server.graph();
        let main = graph.get_by_url("/src/main.ts").unwrap();
        let utils = graph.get_by_url("/src/utils.ts").unwrap();
        assert!(main.imported_modules.contains(&utils.key));
    }

    #[test]
    fn test_declined_importer_of_new_file_reloads() {
        let server = started(FileMap::from_iter([(
            "/src/main.ts",
            "import './setup';\nimport.meta.hot.decline();\n",
        )]));
        server.warm_up("/src/main.ts").unwrap();

        let sent = server.write_file("/src/setup.ts", "export {};\n").unwrap();
        assert_eq!(
            sent,
            vec![HmrPayload::FullReload {
                path: Some("/src/setup.ts".to_string())
            }]
        );
        // already resolved, a second write is an ordinary change
        assert!(server.write_file("/src/setup.ts", "export {};\n").unwrap().is_empty());
    }

    #[test]
    fn test_change_outside_graph_sends_nothing() {
        let server = started(project());
        let mut client = connected_client(&server);
        assert!(server.write_file("/notes.txt", "todo").unwrap().is_empty());
        assert_eq!(client.poll().unwrap(), 0);
    }
}

mod pruning {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deleted_module_is_pruned_on_the_client() {
        let server = started(project());
        server.warm_up("/src/main.tsx").unwrap();
        let mut client = connected_client(&server);

        let pruned = Rc::new(RefCell::new(false));
        let flag = pruned.clone();
        client.create_hot_context("/src/utils.ts").prune(move |_| *flag.borrow_mut() = true);
        client.create_hot_context("/src/app.tsx").accept();

        let sent = server.delete_file("/src/utils.ts").unwrap();
        let kinds: Vec<&str> = sent.iter().map(HmrPayload::kind).collect();
        assert_eq!(kinds, vec!["prune", "update"]);

        assert_eq!(client.poll().unwrap(), 2);
        assert!(*pruned.borrow());
        assert!(client.hot_context("/src/utils.ts").is_none());
        assert_eq!(client.document().reloads, 0);
        assert!(client.document().imports[0].starts_with("/src/app.tsx?t="));
    }
}

mod invalidation {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_invalidate_bubbles_to_importer() {
        let server = started(project());
        server.warm_up("/src/main.tsx").unwrap();
        let mut client = connected_client(&server);

        client
            .create_hot_context("/src/utils.ts")
            .accept_with(|_| {});
        client.create_hot_context("/src/app.tsx").accept();

        server
            .write_file("/src/utils.ts", "export const greet = (n: string) => n;\n")
            .unwrap();
        // the module decides at accept time that it cannot take the update
        client
            .hot_context_mut("/src/utils.ts")
            .unwrap()
            .invalidate(Some("signature changed"));
        client.poll().unwrap();

        let replies = server.process_client_messages().unwrap();
        match &replies[..] {
            [HmrPayload::Update { updates }] => {
                assert_eq!(updates[0].path, "/src/utils.ts");
                assert_eq!(updates[0].accepted_path, "/src/app.tsx");
            }
            other => panic!("expected one update, got {:?}", other),
        }

        client.poll().unwrap();
        let imports = &client.document().imports;
        assert_eq!(imports.len(), 2);
        assert!(imports[1].starts_with("/src/app.tsx?t="));
    }

    #[test]
    fn test_invalidate_without_boundary_reloads() {
        let server = started(project());
        server.warm_up("/src/main.tsx").unwrap();
        let mut client = connected_client(&server);

        client.create_hot_context("/src/app.tsx").invalidate(None);
        client.poll().unwrap();
        let replies = server.process_client_messages().unwrap();
        assert_eq!(
            replies,
            vec![HmrPayload::FullReload {
                path: Some("/src/app.tsx".to_string())
            }]
        );
        client.poll().unwrap();
        assert_eq!(client.document().reloads, 1);
    }
}

mod errors {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Strict;

    impl Plugin for Strict {
        fn name(&self) -> &str {
            "strict"
        }

        fn transform(&self, code: &str, id: &str, _ctx: &TransformContext<'_>) -> quickdev::Result<Option<TransformResult>> {
            match code.find("var ") {
                Some(offset) => {
                    let line = code[..offset].matches('\n').count() as u32 + 1;
                    Err(Error::transform_with_frame(
                        id,
                        "'var' is not allowed",
                        SourceLocation::new(line, 1),
                        code,
                    ))
                }
                None => Ok(None),
            }
        }
    }

    #[test]
    fn test_overlay_follows_build_errors() {
        let mut server = started(project());
        server.add_plugin(Strict).unwrap();
        let mut client = connected_client(&server);

        server.write_file("/src/utils.ts", "export const a = 1;\nvar b = 2;\n").unwrap();
        let res = server.handle_request(&VirtualRequest::get("/src/utils.ts"));
        assert_eq!(res.status, 500);

        client.poll().unwrap();
        let overlay = client.overlay().unwrap();
        assert_eq!(overlay.message, "'var' is not allowed");
        assert_eq!(overlay.plugin.as_deref(), Some("strict"));
        assert_eq!(overlay.location.as_deref(), Some("/src/utils.ts:2:1"));
        assert!(overlay.frame.iter().any(|line| line.highlighted));
        assert_eq!(client.document().overlay.as_deref(), Some("'var' is not allowed"));

        client.create_hot_context("/src/utils.ts").accept();
        server.write_file("/src/utils.ts", "export const a = 1;\nexport const b = 2;\n").unwrap();
        assert_eq!(server.handle_request(&VirtualRequest::get("/src/utils.ts")).status, 200);
        server.write_file("/src/utils.ts", "export const a = 1;\nexport const b = 3;\n").unwrap();
        client.poll().unwrap();

        assert!(client.overlay().is_none());
        assert_eq!(client.document().overlay, None);
    }

    #[test]
    fn test_report_error_reaches_client() {
        let server = started(project());
        let mut client = connected_client(&server);
        assert_eq!(server.report_error(&Error::Hmr("runtime crashed".to_string())).unwrap(), 1);
        client.poll().unwrap();
        assert!(client.overlay().unwrap().message.contains("runtime crashed"));
    }
}

mod transport {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reconnect_after_restart() {
        let mut server = started(project());
        let mut client = connected_client(&server);

        server.restart().unwrap();
        client.poll().unwrap();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);

        let mut waits = Vec::new();
        client
            .reconnect(|| server.connect_hmr(), |delay| waits.push(delay))
            .unwrap();
        assert_eq!(client.status(), ConnectionStatus::Connected);
        assert_eq!(waits, vec![Duration::from_millis(100)]);
        assert_eq!(client.poll().unwrap(), 1);
    }

    #[test]
    fn test_gives_up_while_server_is_down() {
        let mut server = started(project());
        let mut client = connected_client(&server).with_reconnect_policy(ReconnectPolicy {
            max_attempts: 3,
            ..ReconnectPolicy::default()
        });
        server.close();

        let mut waits = Vec::new();
        assert!(client.reconnect(|| server.connect_hmr(), |delay| waits.push(delay)).is_err());
        assert_eq!(client.status(), ConnectionStatus::GaveUp);
        assert_eq!(
            waits,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[test]
    fn test_custom_events_both_ways() {
        let server = started(project());
        let mut client = connected_client(&server);

        let theme = Rc::new(RefCell::new(None));
        let sink = theme.clone();
        client
            .create_hot_context("/src/app.tsx")
            .on("theme", move |data| *sink.borrow_mut() = data.as_str().map(str::to_string));
        server.hmr().send_custom("theme", serde_json::json!("dark")).unwrap();
        client.poll().unwrap();
        assert_eq!(theme.borrow().as_deref(), Some("dark"));

        let clicks = Rc::new(RefCell::new(0));
        let counter = clicks.clone();
        server.on_custom_event("click", move |_| *counter.borrow_mut() += 1);
        client.send_custom("click", serde_json::Value::Null).unwrap();
        server.process_client_messages().unwrap();
        assert_eq!(*clicks.borrow(), 1);
    }
}
