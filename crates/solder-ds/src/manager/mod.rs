//! Component managers.
//!
//! One [`ComponentManager`] exists per component description.  It drives
//! enable/disable at the coarse grain — both return a future that completes
//! when the asynchronous work has run — and owns the component's
//! [`ComponentConfiguration`]s: one for a singleton component, plus one per
//! factory-configuration instance (`<pid>~<instance>`) observed through the
//! configuration notifier.

pub(crate) mod configuration;
pub(crate) mod reference;

pub use configuration::ComponentState;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use solder_core::metadata::ConfigurationPolicy;
use solder_core::{ComponentMetadata, ServiceError};
use solder_framework::{Bundle, Completion, Framework, channel};

use crate::cm::ConfigurationAdmin;
use crate::component::ComponentFactory;
use crate::notifier::{ConfigurationEvent, ConfigurationEventKind, ConfigurationNotifier};
use configuration::ComponentConfiguration;

/// Everything a component manager needs from the runtime, cheap to clone.
#[derive(Clone)]
pub(crate) struct DsDeps {
    pub(crate) framework: Framework,
    pub(crate) notifier: Arc<ConfigurationNotifier>,
    pub(crate) admin: ConfigurationAdmin,
    pub(crate) factories: Arc<RwLock<HashMap<String, Arc<dyn ComponentFactory>>>>,
    pub(crate) next_component_id: Arc<AtomicU64>,
}

/// Coarse-grained lifecycle driver for one component description.
pub struct ComponentManager {
    metadata: Arc<ComponentMetadata>,
    bundle: Arc<Bundle>,
    deps: DsDeps,
    enabled: AtomicBool,
    configurations: Mutex<Vec<Arc<ComponentConfiguration>>>,
    factory_tokens: Mutex<Vec<(String, u64)>>,
}

impl ComponentManager {
    pub(crate) fn new(
        metadata: Arc<ComponentMetadata>,
        bundle: Arc<Bundle>,
        deps: DsDeps,
    ) -> Arc<Self> {
        Arc::new(Self {
            metadata,
            bundle,
            deps,
            enabled: AtomicBool::new(false),
            configurations: Mutex::new(Vec::new()),
            factory_tokens: Mutex::new(Vec::new()),
        })
    }

    /// The component name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The owning bundle.
    pub fn bundle(&self) -> &Arc<Bundle> {
        &self.bundle
    }

    /// The parsed description.
    pub fn metadata(&self) -> &Arc<ComponentMetadata> {
        &self.metadata
    }

    /// Whether the component is enabled and not disabled by a failure.
    pub fn is_enabled(&self) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }
        let configurations = self.configurations.lock();
        configurations.is_empty()
            || configurations
                .iter()
                .any(|c| c.state() != ComponentState::Disabled)
    }

    pub(crate) fn configurations(&self) -> Vec<Arc<ComponentConfiguration>> {
        self.configurations.lock().clone()
    }

    /// Enables the component; the future completes when activation work has
    /// run, exceptionally when an eager activation failed.
    pub fn enable(self: &Arc<Self>) -> Completion<()> {
        if self.deps.framework.is_stopping() {
            return Completion::ready(Err(ServiceError::Cancelled));
        }
        if self.enabled.swap(true, Ordering::AcqRel) {
            return Completion::ready(Ok(()));
        }
        info!(component = %self.metadata.name, "Enabling component");

        let (promise, completion) = channel();
        let manager = Arc::clone(self);
        self.deps.framework.work().post(Box::new(move || {
            promise.settle(manager.run_enable());
        }));
        completion
    }

    /// Disables the component: every configuration is disposed.  Calling it
    /// twice is a no-op.
    pub fn disable(self: &Arc<Self>) -> Completion<()> {
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return Completion::ready(Ok(()));
        }
        info!(component = %self.metadata.name, "Disabling component");

        let (promise, completion) = channel();
        let manager = Arc::clone(self);
        self.deps.framework.work().post(Box::new(move || {
            manager.teardown();
            promise.complete(());
        }));
        completion
    }

    /// Synchronous teardown used on bundle stop.
    pub(crate) fn dispose(&self) {
        self.enabled.store(false, Ordering::Release);
        self.teardown();
    }

    fn teardown(&self) {
        for (pid, token) in self.factory_tokens.lock().drain(..) {
            self.deps.notifier.unregister_listener(&pid, token);
        }
        let configurations: Vec<_> = self.configurations.lock().drain(..).collect();
        for configuration in configurations {
            configuration.dispose();
        }
    }

    fn run_enable(self: &Arc<Self>) -> Result<(), ServiceError> {
        // Factory-instance tracking: listeners under the bare PIDs receive
        // `pid~instance` events through the notifier's factory routing.
        if self.metadata.configuration_policy != ConfigurationPolicy::Ignore {
            for pid in self.metadata.effective_pids() {
                let weak = Arc::downgrade(self);
                let token = self.deps.notifier.register_listener(
                    &pid,
                    Arc::new(move |event| {
                        if let Some(manager) = weak.upgrade() {
                            manager.on_factory_event(event);
                        }
                    }),
                );
                self.factory_tokens.lock().push((pid, token));
            }
        }

        // The singleton configuration always exists.
        let singleton = self.spawn_configuration(self.metadata.effective_pids());
        let result = singleton.enable();

        // Factory instances that already exist get their configurations now.
        if self.metadata.configuration_policy != ConfigurationPolicy::Ignore {
            for pid in self.deps.admin.pids() {
                if self.is_factory_instance_pid(&pid) {
                    let instance = self.spawn_configuration(vec![pid]);
                    let _ = instance.enable();
                }
            }
        }
        result
    }

    fn is_factory_instance_pid(&self, pid: &str) -> bool {
        pid.split_once('~').is_some_and(|(factory, _)| {
            self.metadata.effective_pids().iter().any(|p| p == factory)
        }) && !self.has_configuration_for(pid)
    }

    fn has_configuration_for(&self, pid: &str) -> bool {
        self.configurations
            .lock()
            .iter()
            .any(|c| c.is_for_single_pid(pid))
    }

    fn spawn_configuration(&self, pids: Vec<String>) -> Arc<ComponentConfiguration> {
        let id = self.deps.next_component_id.fetch_add(1, Ordering::Relaxed);
        let configuration = ComponentConfiguration::new(
            id,
            Arc::clone(&self.metadata),
            Arc::clone(&self.bundle),
            self.deps.clone(),
            pids,
        );
        self.configurations.lock().push(Arc::clone(&configuration));
        configuration
    }

    fn on_factory_event(self: &Arc<Self>, event: &ConfigurationEvent) {
        // Only factory-instance PIDs are the manager's business; plain PID
        // events are handled by the configurations themselves.
        let Some((_factory, _instance)) = event.pid.split_once('~') else {
            return;
        };
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        match event.kind {
            ConfigurationEventKind::Updated => {
                if !self.has_configuration_for(&event.pid) {
                    debug!(
                        component = %self.metadata.name,
                        pid = %event.pid,
                        "Creating factory-instance configuration"
                    );
                    let configuration = self.spawn_configuration(vec![event.pid.clone()]);
                    let _ = configuration.enable();
                }
            }
            ConfigurationEventKind::Removed => {
                let removed = {
                    let mut configurations = self.configurations.lock();
                    let position = configurations
                        .iter()
                        .position(|c| c.is_for_single_pid(&event.pid));
                    position.map(|p| configurations.remove(p))
                };
                if let Some(configuration) = removed {
                    debug!(
                        component = %self.metadata.name,
                        pid = %event.pid,
                        "Disposing factory-instance configuration"
                    );
                    configuration.dispose();
                }
            }
        }
    }
}
