//! Hosts, their tabs and the per-tab session state.
//!
//! The registry is a plain owned struct; the client actor is its only user.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::browser::DirectoryListing;
use crate::connection::Lifecycle;
use crate::input::InputQueue;
use crate::output::OutputQueue;
use crate::protocol::{HostId, TabId, TabKey};
use crate::sink::{RenderSink, SinkFactory};

/// Everything the client keeps for one open tab.
pub struct TabSession {
    pub sink: Arc<dyn RenderSink>,
    pub output: OutputQueue,
    pub input: InputQueue,
    pub lifecycle: Lifecycle,
}

struct HostSession {
    tab_order: Vec<TabId>,
    names: HashMap<TabId, String>,
    active_tab: TabId,
    next_tab_id: u32,
}

impl HostSession {
    fn new() -> Self {
        Self {
            tab_order: Vec::new(),
            names: HashMap::new(),
            active_tab: TabId::FIRST,
            next_tab_id: 1,
        }
    }
}

/// Renderer-facing snapshot of one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TabId,
    pub name: String,
    pub active: bool,
}

/// Result of closing a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed {
    /// The closed tab was the globally active one.
    pub was_active: bool,
    /// The tab that took its place within the host.
    pub replacement: TabKey,
}

pub struct Registry {
    sinks: Arc<dyn SinkFactory>,
    hosts: HashMap<HostId, HostSession>,
    tabs: HashMap<TabKey, TabSession>,
    listings: HashMap<HostId, DirectoryListing>,
    active: Option<TabKey>,
}

impl Registry {
    pub fn new(sinks: Arc<dyn SinkFactory>) -> Self {
        Self {
            sinks,
            hosts: HashMap::new(),
            tabs: HashMap::new(),
            listings: HashMap::new(),
            active: None,
        }
    }

    /// Existing or lazily created tab. `None` means the host's active tab.
    pub fn ensure_tab(&mut self, host: HostId, tab: Option<TabId>) -> TabKey {
        let session = self.hosts.entry(host).or_insert_with(HostSession::new);
        let tab = tab.unwrap_or(session.active_tab);
        let key = TabKey::new(host, tab);
        if !self.tabs.contains_key(&key) {
            self.create_tab(key);
        }
        key
    }

    fn create_tab(&mut self, key: TabKey) {
        let session = self.hosts.entry(key.host).or_insert_with(HostSession::new);
        session.tab_order.push(key.tab);
        session.names.insert(key.tab, key.tab.to_string());
        session.next_tab_id = session.next_tab_id.max(key.tab.0 + 1);

        let sink = self.sinks.create(key);
        sink.set_visible(false);
        debug!("created {}", key);
        self.tabs.insert(
            key,
            TabSession {
                sink,
                output: OutputQueue::new(),
                input: InputQueue::new(),
                lifecycle: Lifecycle::new(),
            },
        );
    }

    /// Show exactly one sink. Returns false if nothing changed.
    pub fn activate(&mut self, key: Option<TabKey>) -> bool {
        let key = key.filter(|k| self.tabs.contains_key(k));
        if key == self.active {
            return false;
        }
        if let Some(previous) = self.active.and_then(|k| self.tabs.get(&k)) {
            previous.sink.set_visible(false);
        }
        if let Some(next) = key {
            if let Some(tab) = self.tabs.get(&next) {
                tab.sink.set_visible(true);
            }
            if let Some(host) = self.hosts.get_mut(&next.host) {
                host.active_tab = next.tab;
            }
        }
        self.active = key;
        true
    }

    /// Open a new tab on `host` and make it active.
    pub fn add_tab(&mut self, host: HostId) -> TabKey {
        let session = self.hosts.entry(host).or_insert_with(HostSession::new);
        let key = TabKey::new(host, TabId(session.next_tab_id));
        self.create_tab(key);
        self.activate(Some(key));
        key
    }

    /// Close a tab. Refuses (returns `None`) for unknown tabs and for the
    /// last tab of a host.
    pub fn close_tab(&mut self, key: TabKey) -> Option<Closed> {
        let session = self.hosts.get_mut(&key.host)?;
        let index = session.tab_order.iter().position(|t| *t == key.tab)?;
        if session.tab_order.len() <= 1 {
            return None;
        }
        session.tab_order.remove(index);
        session.names.remove(&key.tab);
        let replacement_tab = session.tab_order[index.min(session.tab_order.len() - 1)];
        if session.active_tab == key.tab {
            session.active_tab = replacement_tab;
        }
        let replacement = TabKey::new(key.host, replacement_tab);

        if let Some(tab) = self.tabs.remove(&key) {
            tab.sink.release();
        }

        let was_active = self.active == Some(key);
        if was_active {
            self.active = None;
            self.activate(Some(replacement));
        }
        Some(Closed {
            was_active,
            replacement,
        })
    }

    pub fn rename_tab(&mut self, key: TabKey, name: String) -> bool {
        match self.hosts.get_mut(&key.host) {
            Some(session) if session.tab_order.contains(&key.tab) => {
                session.names.insert(key.tab, name);
                true
            }
            _ => false,
        }
    }

    /// Forget every host, tab and listing, releasing all sinks.
    pub fn reset(&mut self) -> Vec<TabKey> {
        let keys: Vec<TabKey> = self.tabs.keys().copied().collect();
        for (_, tab) in self.tabs.drain() {
            tab.sink.release();
        }
        self.hosts.clear();
        self.listings.clear();
        self.active = None;
        keys
    }

    pub fn tabs(&self, host: HostId) -> Vec<TabInfo> {
        let Some(session) = self.hosts.get(&host) else {
            return Vec::new();
        };
        session
            .tab_order
            .iter()
            .map(|id| TabInfo {
                id: *id,
                name: session.names.get(id).cloned().unwrap_or_default(),
                active: self.active == Some(TabKey::new(host, *id)),
            })
            .collect()
    }

    pub fn active(&self) -> Option<TabKey> {
        self.active
    }

    pub fn tab(&self, key: &TabKey) -> Option<&TabSession> {
        self.tabs.get(key)
    }

    pub fn tab_mut(&mut self, key: &TabKey) -> Option<&mut TabSession> {
        self.tabs.get_mut(key)
    }

    pub fn contains(&self, key: &TabKey) -> bool {
        self.tabs.contains_key(key)
    }

    pub fn listing(&self, host: HostId) -> Option<&DirectoryListing> {
        self.listings.get(&host)
    }

    pub fn listing_mut(&mut self, host: HostId) -> &mut DirectoryListing {
        self.listings.entry(host).or_default()
    }
}
