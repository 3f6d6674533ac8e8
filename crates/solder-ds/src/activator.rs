//! The Declarative Services activator.
//!
//! [`DsRuntime::attach`] wires the runtime into a framework: it tracks
//! bundle lifecycle events, turns each started bundle's manifest into
//! component managers, and tears them down when the bundle stops.  Keep the
//! returned handle alive — dropping it detaches the runtime.
//!
//! ```rust,ignore
//! let framework = Framework::builder().build();
//! let ds = DsRuntime::attach(&framework);
//! ds.register_factory("demo::Greeter", Arc::new(GreeterFactory));
//!
//! let bundle = framework.install_bundle("demo", Some(manifest))?;
//! framework.start_bundle(&bundle)?;   // components come alive here
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use solder_framework::{Bundle, BundleEventKind, Framework};

use crate::cm::ConfigurationAdmin;
use crate::component::ComponentFactory;
use crate::manager::{ComponentManager, DsDeps};
use crate::notifier::ConfigurationNotifier;
use crate::registry::ComponentRegistry;
use crate::runtime::ServiceComponentRuntime;

pub(crate) struct DsShared {
    pub(crate) deps: DsDeps,
    pub(crate) components: ComponentRegistry,
}

impl DsShared {
    fn on_bundle_started(&self, bundle: &Arc<Bundle>) {
        let Some(manifest) = bundle.manifest() else {
            return;
        };
        info!(
            bundle = %bundle.symbolic_name(),
            components = manifest.components.len(),
            "Loading declarative components"
        );
        for metadata in &manifest.components {
            let manager = ComponentManager::new(
                Arc::new(metadata.clone()),
                Arc::clone(bundle),
                self.deps.clone(),
            );
            self.components.insert(Arc::clone(&manager));
            if metadata.enabled {
                // The completion is intentionally dropped; the enable work
                // runs regardless and failures surface as framework events.
                let _ = manager.enable();
            }
        }
    }

    fn on_bundle_stopping(&self, bundle: &Arc<Bundle>) {
        let managers = self.components.remove_bundle(bundle.id());
        if managers.is_empty() {
            return;
        }
        info!(
            bundle = %bundle.symbolic_name(),
            components = managers.len(),
            "Disposing declarative components"
        );
        for manager in managers {
            manager.dispose();
        }
    }
}

/// Handle to one framework's Declarative Services runtime.
pub struct DsRuntime {
    shared: Arc<DsShared>,
    framework: Framework,
    listener_token: Mutex<Option<u64>>,
}

impl DsRuntime {
    /// Attaches a fresh DS runtime to `framework`.
    pub fn attach(framework: &Framework) -> Self {
        let notifier = Arc::new(ConfigurationNotifier::new());
        let admin = ConfigurationAdmin::new(Arc::clone(&notifier), Arc::clone(framework.work()));
        let shared = Arc::new(DsShared {
            deps: DsDeps {
                framework: framework.clone(),
                notifier,
                admin,
                factories: Arc::new(RwLock::new(HashMap::new())),
                next_component_id: Arc::new(AtomicU64::new(1)),
            },
            components: ComponentRegistry::new(),
        });

        let tracker = Arc::downgrade(&shared);
        let token = framework.add_bundle_listener(Arc::new(move |event| {
            let Some(shared) = tracker.upgrade() else {
                return;
            };
            match event.kind {
                BundleEventKind::Started => shared.on_bundle_started(&event.bundle),
                BundleEventKind::Stopping => shared.on_bundle_stopping(&event.bundle),
                BundleEventKind::Installed | BundleEventKind::Stopped => {}
            }
        }));

        Self {
            shared,
            framework: framework.clone(),
            listener_token: Mutex::new(Some(token)),
        }
    }

    /// Registers the implementation factory for `implementation` — the
    /// stand-in for the class a bundle's library would export.  Components
    /// whose factory is missing stay unsatisfied.
    pub fn register_factory(&self, implementation: &str, factory: Arc<dyn ComponentFactory>) {
        self.shared
            .deps
            .factories
            .write()
            .insert(implementation.to_string(), factory);
    }

    /// The Configuration Admin driving this runtime.
    pub fn configuration_admin(&self) -> &ConfigurationAdmin {
        &self.shared.deps.admin
    }

    /// The PID-keyed notifier, for collaborators that produce configuration
    /// events themselves.
    pub fn notifier(&self) -> &Arc<ConfigurationNotifier> {
        &self.shared.deps.notifier
    }

    /// The introspection and control surface.
    pub fn service_component_runtime(&self) -> ServiceComponentRuntime {
        ServiceComponentRuntime::new(Arc::clone(&self.shared))
    }
}

impl Drop for DsRuntime {
    fn drop(&mut self) {
        if let Some(token) = self.listener_token.lock().take() {
            self.framework.remove_bundle_listener(token);
        }
    }
}
