//! HMR server: turns file changes into scoped payloads and broadcasts them
//!
//! Connections are in-memory channels. The embedder bridges them to the
//! real transport (a socket, `postMessage`, ...) by draining the payloads
//! queued on each [`HmrConnection`] and pushing client messages back.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::HmrConfig;
use crate::error::{Error, Result};
use crate::hmr::payload::{ClientMessage, ErrorPayload, HmrPayload, ModuleUpdate, UpdateType};
use crate::module_graph::{HmrBoundary, ModuleGraph, ModuleKey, ModuleType};

#[derive(Debug, Default)]
struct Channel {
    /// Serialized payloads waiting for the client
    to_client: VecDeque<String>,
    /// Serialized messages waiting for the server
    to_server: VecDeque<String>,
    open: bool,
}

/// One client's end of an in-memory HMR channel.
///
/// Clones refer to the same channel.
#[derive(Debug, Clone)]
pub struct HmrConnection {
    id: u64,
    channel: Rc<RefCell<Channel>>,
}

impl HmrConnection {
    fn new(id: u64) -> Self {
        Self {
            id,
            channel: Rc::new(RefCell::new(Channel {
                open: true,
                ..Channel::default()
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.channel.borrow().open
    }

    /// Next raw payload sent by the server
    pub fn recv_raw(&self) -> Option<String> {
        self.channel.borrow_mut().to_client.pop_front()
    }

    /// Next payload sent by the server; undecodable frames are skipped
    pub fn recv(&self) -> Option<HmrPayload> {
        while let Some(raw) = self.recv_raw() {
            match HmrPayload::from_json(&raw) {
                Ok(payload) => return Some(payload),
                Err(e) => warn!(error = %e, "dropping malformed HMR payload"),
            }
        }
        None
    }

    /// Every queued payload
    pub fn drain(&self) -> Vec<HmrPayload> {
        std::iter::from_fn(|| self.recv()).collect()
    }

    /// Send a message to the server
    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        let json = message.to_json()?;
        self.send_raw(json)
    }

    pub fn send_raw(&self, json: String) -> Result<()> {
        let mut channel = self.channel.borrow_mut();
        if !channel.open {
            return Err(Error::Hmr(format!("connection {} is closed", self.id)));
        }
        channel.to_server.push_back(json);
        Ok(())
    }

    /// Close from either side; queued payloads stay readable
    pub fn close(&self) {
        self.channel.borrow_mut().open = false;
    }

    fn deliver(&self, json: &str) -> bool {
        let mut channel = self.channel.borrow_mut();
        if !channel.open {
            return false;
        }
        channel.to_client.push_back(json.to_string());
        true
    }

    fn take_incoming(&self) -> Vec<String> {
        self.channel.borrow_mut().to_server.drain(..).collect()
    }
}

/// Broadcasts HMR payloads to every connected client
#[derive(Debug)]
pub struct HmrServer {
    config: HmrConfig,
    listening: Cell<bool>,
    connections: RefCell<Vec<HmrConnection>>,
    next_id: Cell<u64>,
}

impl HmrServer {
    pub fn new(config: HmrConfig) -> Self {
        Self {
            config,
            listening: Cell::new(false),
            connections: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn config(&self) -> &HmrConfig {
        &self.config
    }

    pub fn listen(&self) {
        if !self.listening.replace(true) {
            info!(path = %self.config.path, protocol = %self.config.protocol, "HMR server listening");
        }
    }

    /// Close every connection and stop accepting new ones
    pub fn close(&self) {
        if self.listening.replace(false) {
            for conn in self.connections.borrow_mut().drain(..) {
                conn.close();
            }
            info!("HMR server closed");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.get()
    }

    /// Accept a new client. It immediately receives a `connected` payload.
    pub fn connect(&self) -> Result<HmrConnection> {
        if !self.is_listening() {
            return Err(Error::Hmr("HMR server is not listening".to_string()));
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let conn = HmrConnection::new(id);
        conn.deliver(&HmrPayload::Connected.to_json()?);
        self.connections.borrow_mut().push(conn.clone());
        debug!(id, "HMR client connected");
        Ok(conn)
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.borrow().iter().filter(|c| c.is_open()).count()
    }

    /// Send `payload` to every open connection; returns how many received it
    pub fn broadcast(&self, payload: &HmrPayload) -> Result<usize> {
        let json = payload.to_json()?;
        let mut connections = self.connections.borrow_mut();
        connections.retain(HmrConnection::is_open);
        let delivered = connections.iter().filter(|c| c.deliver(&json)).count();
        debug!(kind = payload.kind(), delivered, "HMR broadcast");
        Ok(delivered)
    }

    /// Push a build error to the clients, outside any file change
    pub fn send_error(&self, err: &Error) -> Result<usize> {
        warn!(error = %err, "build error");
        self.broadcast(&HmrPayload::Error {
            error: ErrorPayload::from(err),
        })
    }

    /// Push a named event with arbitrary data
    pub fn send_custom(&self, event: &str, data: Value) -> Result<usize> {
        self.broadcast(&HmrPayload::Custom {
            event: event.to_string(),
            data,
        })
    }

    /// Compute and broadcast the payload for a change to `file`.
    ///
    /// `scope` restricts the update to the given boundary modules (the
    /// result of the plugins' `handle_hot_update` hooks). Returns the
    /// payload sent, or `None` when there was nothing to send.
    pub fn handle_file_change(
        &self,
        graph: &ModuleGraph,
        file: &str,
        scope: Option<&[ModuleKey]>,
    ) -> Result<Option<HmrPayload>> {
        let payload = compute_update(graph, file, scope);
        self.send_optional(payload)
    }

    /// Handle a client's `invalidate`: propagate past the module's own acceptance
    pub fn handle_invalidate(&self, graph: &ModuleGraph, url: &str) -> Result<Option<HmrPayload>> {
        let Some(module) = graph.get_by_url(url) else {
            debug!(url, "invalidate for unknown module");
            return Ok(None);
        };
        let payload = match graph.propagate_invalidation(module.key) {
            None => HmrPayload::FullReload {
                path: Some(module.url.clone()),
            },
            Some(boundaries) if boundaries.is_empty() => return Ok(None),
            Some(boundaries) => HmrPayload::Update {
                updates: build_updates(graph, &boundaries),
            },
        };
        self.send_optional(Some(payload))
    }

    fn send_optional(&self, payload: Option<HmrPayload>) -> Result<Option<HmrPayload>> {
        if let Some(payload) = &payload {
            self.broadcast(payload)?;
        }
        Ok(payload)
    }

    /// Drain and decode messages sent by clients
    pub fn poll_client_messages(&self) -> Vec<ClientMessage> {
        let connections = self.connections.borrow();
        let mut messages = Vec::new();
        for conn in connections.iter() {
            for raw in conn.take_incoming() {
                match ClientMessage::from_json(&raw) {
                    Ok(message) => messages.push(message),
                    Err(e) => warn!(connection = conn.id(), error = %e, "dropping malformed client message"),
                }
            }
        }
        messages
    }
}

/// Payload for a change to `file`, without broadcasting it.
///
/// `None` when no module is backed by `file` or when `scope` leaves no
/// boundary to update. A change that reaches no boundary yields
/// `full-reload` regardless of `scope`.
pub fn compute_update(graph: &ModuleGraph, file: &str, scope: Option<&[ModuleKey]>) -> Option<HmrPayload> {
    let changed = graph.get_modules_by_file(file);
    if changed.is_empty() {
        debug!(file, "change to a file outside the module graph");
        return None;
    }

    let Some(mut boundaries) = graph.propagate_from(&changed) else {
        debug!(file, "no HMR boundary, full reload");
        return Some(HmrPayload::FullReload {
            path: Some(file.to_string()),
        });
    };

    if let Some(scope) = scope {
        boundaries.retain(|b| scope.contains(&b.boundary));
    }
    if boundaries.is_empty() {
        return None;
    }
    Some(HmrPayload::Update {
        updates: build_updates(graph, &boundaries),
    })
}

/// One update entry per boundary, typed by the boundary's module type
pub(crate) fn build_updates(graph: &ModuleGraph, boundaries: &[HmrBoundary]) -> Vec<ModuleUpdate> {
    let timestamp = crate::unix_millis();
    boundaries
        .iter()
        .filter_map(|b| {
            let boundary = graph.get(b.boundary)?;
            let via = graph.get(b.accepted_via)?;
            let update_type = match boundary.module_type {
                ModuleType::Stylesheet => UpdateType::StylesheetUpdate,
                _ => UpdateType::ScriptUpdate,
            };
            Some(ModuleUpdate {
                update_type,
                path: via.url.clone(),
                accepted_path: boundary.url.clone(),
                timestamp,
            })
        })
        .collect()
}
