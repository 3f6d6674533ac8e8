//! Configuration Admin.
//!
//! Owns the configuration objects the component runtime consumes.  Storage
//! is in-memory only; what matters here is the eventing contract:
//!
//! - `update` always emits `Updated` and returns a future that completes
//!   once every subscriber has been invoked;
//! - `update_if_different` only emits when the properties differ under
//!   strict key-and-typed-value comparison;
//! - `remove` emits `Removed` and forgets the PID.
//!
//! Fan-out runs on the async work service, so configuration producers are
//! never blocked on component callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use solder_core::{Properties, ServiceError, ServiceResult};
use solder_framework::{AsyncWorkService, Completion, channel};

use crate::notifier::{ConfigurationEventKind, ConfigurationNotifier};

struct CmShared {
    configs: Mutex<HashMap<String, Arc<Configuration>>>,
    notifier: Arc<ConfigurationNotifier>,
    work: Arc<AsyncWorkService>,
}

/// Handle to the in-process Configuration Admin.  Cheap to clone.
#[derive(Clone)]
pub struct ConfigurationAdmin {
    shared: Arc<CmShared>,
}

impl ConfigurationAdmin {
    /// Creates a Configuration Admin fanning out through `notifier` on
    /// `work`.
    pub fn new(notifier: Arc<ConfigurationNotifier>, work: Arc<AsyncWorkService>) -> Self {
        Self {
            shared: Arc::new(CmShared {
                configs: Mutex::new(HashMap::new()),
                notifier,
                work,
            }),
        }
    }

    /// Returns the configuration for `pid`, creating an empty one when
    /// missing.  A freshly created configuration has no properties until its
    /// first `update`.
    pub fn get_configuration(&self, pid: &str) -> Arc<Configuration> {
        let mut configs = self.shared.configs.lock();
        configs
            .entry(pid.to_string())
            .or_insert_with(|| {
                debug!(pid, "Configuration created");
                Arc::new(Configuration {
                    pid: pid.to_string(),
                    props: Mutex::new(None),
                    removed: AtomicBool::new(false),
                    cm: Arc::downgrade(&self.shared),
                })
            })
            .clone()
    }

    /// Returns the factory-instance configuration `factory_pid~instance`.
    pub fn get_factory_configuration(
        &self,
        factory_pid: &str,
        instance: &str,
    ) -> Arc<Configuration> {
        self.get_configuration(&format!("{factory_pid}~{instance}"))
    }

    /// The current properties of `pid`, when the configuration exists and
    /// has been updated at least once.
    pub fn properties(&self, pid: &str) -> Option<Arc<Properties>> {
        self.shared
            .configs
            .lock()
            .get(pid)
            .and_then(|config| config.properties())
    }

    /// PIDs with at least one update, in unspecified order.
    pub fn pids(&self) -> Vec<String> {
        self.shared
            .configs
            .lock()
            .iter()
            .filter(|(_, c)| c.properties().is_some())
            .map(|(pid, _)| pid.clone())
            .collect()
    }
}

/// One configuration object, identified by PID.
pub struct Configuration {
    pid: String,
    props: Mutex<Option<Arc<Properties>>>,
    removed: AtomicBool,
    cm: Weak<CmShared>,
}

impl Configuration {
    /// The configuration's PID.
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// The last updated property snapshot, if any.
    pub fn properties(&self) -> Option<Arc<Properties>> {
        self.props.lock().clone()
    }

    /// Replaces the properties and emits `Updated`.
    ///
    /// The returned future completes once every subscriber of this PID has
    /// been invoked.
    pub fn update(&self, properties: Properties) -> Completion<()> {
        if self.removed.load(Ordering::Acquire) {
            return Completion::ready(Err(ServiceError::illegal_state(format!(
                "configuration '{}' has been removed",
                self.pid
            ))));
        }
        let Some(cm) = self.cm.upgrade() else {
            return Completion::ready(Err(ServiceError::illegal_state(
                "configuration admin is gone",
            )));
        };

        let snapshot = Arc::new(properties);
        *self.props.lock() = Some(Arc::clone(&snapshot));

        let (promise, completion) = channel();
        let notifier = Arc::clone(&cm.notifier);
        let pid = self.pid.clone();
        cm.work.post(Box::new(move || {
            notifier.notify_all_listeners(&pid, ConfigurationEventKind::Updated, Some(snapshot));
            promise.complete(());
        }));
        completion
    }

    /// Updates only when `properties` differ from the current snapshot under
    /// strict key-and-typed-value comparison (`1` and `1.0` differ).
    ///
    /// Returns whether an update was emitted, plus the completion future —
    /// already settled when nothing changed.
    pub fn update_if_different(&self, properties: Properties) -> (bool, Completion<()>) {
        let unchanged = self
            .props
            .lock()
            .as_ref()
            .is_some_and(|current| current.as_ref() == &properties);
        if unchanged {
            return (false, Completion::ready(Ok(())));
        }
        (true, self.update(properties))
    }

    /// Removes the configuration and emits `Removed`.  Idempotent; the
    /// second call returns an already-settled future.
    pub fn remove(&self) -> Completion<()> {
        if self.removed.swap(true, Ordering::AcqRel) {
            return Completion::ready(Ok(()));
        }
        let Some(cm) = self.cm.upgrade() else {
            return Completion::ready(Ok(()));
        };

        cm.configs.lock().remove(&self.pid);
        *self.props.lock() = None;

        let (promise, completion) = channel();
        let notifier = Arc::clone(&cm.notifier);
        let pid = self.pid.clone();
        cm.work.post(Box::new(move || {
            notifier.notify_all_listeners(&pid, ConfigurationEventKind::Removed, None);
            promise.complete(());
        }));
        completion
    }
}
