//! The configuration notifier.
//!
//! A PID-keyed subscriber table between Configuration Admin and the
//! component runtime.  Tokens are handed out from a monotonic counter and
//! never reused; empty per-PID tables are garbage-collected on
//! unregistration.
//!
//! Delivery takes a snapshot of the PID's subscribers under the lock and
//! invokes them outside it: a listener unregistered before the snapshot is
//! never invoked, one unregistered after it may still see the in-flight
//! event exactly once.  A failing listener is logged and skipped.
//!
//! Factory configurations use PIDs of the form `<factoryPid>~<instance>`;
//! listeners registered under the bare factory PID also receive those
//! events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error};

use solder_core::Properties;

/// What happened to a configuration object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationEventKind {
    /// The configuration received new properties.
    Updated,
    /// The configuration was removed.
    Removed,
}

/// A configuration change, as delivered to subscribers.
#[derive(Clone)]
pub struct ConfigurationEvent {
    /// The configuration's PID (for factory instances, the full
    /// `factory~instance` PID).
    pub pid: String,
    /// Update or removal.
    pub kind: ConfigurationEventKind,
    /// The new property snapshot; `None` on removal.
    pub properties: Option<Arc<Properties>>,
}

/// Callback invoked with configuration changes.
pub type ConfigurationListener = Arc<dyn Fn(&ConfigurationEvent) + Send + Sync>;

type TokenMap = HashMap<u64, ConfigurationListener>;

/// PID-keyed fan-out of configuration events.
#[derive(Default)]
pub struct ConfigurationNotifier {
    listeners: Mutex<HashMap<String, TokenMap>>,
    next_token: AtomicU64,
}

/// Splits a factory-instance PID into its factory part.
fn factory_pid(pid: &str) -> Option<&str> {
    pid.split_once('~').map(|(factory, _)| factory)
}

impl ConfigurationNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener` to `pid`; the returned token is unique for the
    /// lifetime of the notifier.
    pub fn register_listener(&self, pid: &str, listener: ConfigurationListener) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(pid.to_string())
            .or_default()
            .insert(token, listener);
        token
    }

    /// Removes one subscription; the PID's table is dropped once empty.
    pub fn unregister_listener(&self, pid: &str, token: u64) {
        let mut listeners = self.listeners.lock();
        let now_empty = listeners.get_mut(pid).map(|tokens| {
            tokens.remove(&token);
            tokens.is_empty()
        });
        if now_empty == Some(true) {
            listeners.remove(pid);
        }
    }

    /// Whether anyone listens to `pid` (directly, or via its factory PID).
    pub fn any_listeners_for_pid(&self, pid: &str) -> bool {
        let listeners = self.listeners.lock();
        listeners.contains_key(pid)
            || factory_pid(pid).is_some_and(|factory| listeners.contains_key(factory))
    }

    /// Delivers one event to every subscriber of `pid` (and, for factory
    /// instances, of the factory PID).
    ///
    /// Each subscriber is invoked at most once per call; a panicking
    /// subscriber never prevents the others from running.
    pub fn notify_all_listeners(
        &self,
        pid: &str,
        kind: ConfigurationEventKind,
        properties: Option<Arc<Properties>>,
    ) {
        let snapshot: Vec<ConfigurationListener> = {
            let listeners = self.listeners.lock();
            let direct = listeners.get(pid).into_iter().flat_map(TokenMap::values);
            let via_factory = factory_pid(pid)
                .and_then(|factory| listeners.get(factory))
                .into_iter()
                .flat_map(TokenMap::values);
            direct.chain(via_factory).map(Arc::clone).collect()
        };
        if snapshot.is_empty() {
            return;
        }

        debug!(pid, ?kind, subscribers = snapshot.len(), "Notifying configuration listeners");
        let event = ConfigurationEvent {
            pid: pid.to_string(),
            kind,
            properties,
        };
        for listener in snapshot {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(&event);
            }));
            if result.is_err() {
                error!(pid, "configuration listener panicked");
            }
        }
    }
}
