//! Single-flight gating for user prompts.
//!
//! A trust dialog or password prompt for a host is represented by one shared
//! future. Anything that needs the same answer while the prompt is open
//! awaits that future instead of opening a second prompt.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::debug;

use crate::protocol::HostId;

/// One in-flight future per key; later callers join it.
pub struct InteractionGate<K, T>
where
    T: Clone,
{
    pending: Mutex<HashMap<K, Shared<BoxFuture<'static, T>>>>,
}

impl<K, T> Default for InteractionGate<K, T>
where
    T: Clone,
{
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> InteractionGate<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start` for `key` unless a future for it is already pending, in
    /// which case wait for that one. Returns the output and whether this call
    /// started the future.
    pub async fn run<F>(&self, key: K, start: F) -> (T, bool)
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let (fut, started) = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let fut = start().shared();
                    pending.insert(key.clone(), fut.clone());
                    (fut, true)
                }
            }
        };

        let output = fut.clone().await;

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(&key).is_some_and(|current| current.ptr_eq(&fut)) {
            pending.remove(&key);
        }
        (output, started)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Trust,
    Password,
}

/// How a prompt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Declined,
    Failed(String),
}

/// Result of asking through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: Outcome,
    /// False when this caller joined a prompt someone else opened.
    pub originator: bool,
}

/// Per-host prompt gates plus the set of prompts the user declined.
#[derive(Default)]
pub struct Interactions {
    pub(crate) trust: InteractionGate<HostId, Outcome>,
    pub(crate) password: InteractionGate<HostId, Outcome>,
    suppressed: Mutex<HashSet<(PromptKind, HostId)>>,
}

impl Interactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suppressed(&self, kind: PromptKind, host: HostId) -> bool {
        self.suppressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(kind, host))
    }

    pub fn suppress(&self, kind: PromptKind, host: HostId) {
        debug!(host = %host, ?kind, "suppressing prompt until next connect");
        self.suppressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((kind, host));
    }

    /// A deliberate connect re-enables prompts for the host.
    pub fn clear_suppression(&self, host: HostId) {
        self.suppressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(_, h)| *h != host);
    }

    pub fn clear_all(&self) {
        self.suppressed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
