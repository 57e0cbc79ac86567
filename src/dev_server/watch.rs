//! File watch events and change subscriptions

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::module_graph::normalize_url;

/// Kind of file change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Add,
    Change,
    Unlink,
}

/// A file change, from an external watcher or from the dev server's own writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: WatchEventKind,
    pub path: String,
    pub timestamp: u64,
}

impl WatchEvent {
    /// Event for `path`, stamped now
    pub fn new(kind: WatchEventKind, path: &str) -> Self {
        Self {
            kind,
            path: normalize_url(path),
            timestamp: crate::unix_millis(),
        }
    }

    pub fn add(path: &str) -> Self {
        Self::new(WatchEventKind::Add, path)
    }

    pub fn change(path: &str) -> Self {
        Self::new(WatchEventKind::Change, path)
    }

    pub fn unlink(path: &str) -> Self {
        Self::new(WatchEventKind::Unlink, path)
    }
}

type Listener = Rc<dyn Fn(&WatchEvent)>;

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers").field("count", &self.listeners.len()).finish()
    }
}

impl Subscribers {
    pub(crate) fn subscribe(this: &Rc<RefCell<Self>>, listener: Listener) -> Subscription {
        let mut subscribers = this.borrow_mut();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.listeners.push((id, listener));
        Subscription {
            id,
            subscribers: Rc::downgrade(this),
            active: Cell::new(true),
        }
    }

    /// Call every listener; listeners may unsubscribe while being notified
    pub(crate) fn notify(this: &Rc<RefCell<Self>>, event: &WatchEvent) {
        let listeners: Vec<Listener> = this.borrow().listeners.iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}

/// Handle returned by [`DevServer::on_file_change`](crate::dev_server::DevServer::on_file_change)
pub struct Subscription {
    id: u64,
    subscribers: Weak<RefCell<Subscribers>>,
    active: Cell<bool>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active.get())
            .finish()
    }
}

impl Subscription {
    /// Stop receiving events. Returns false if already unsubscribed.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.replace(false) {
            return false;
        }
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.borrow_mut().listeners.retain(|(id, _)| *id != self.id);
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}
