//! The framework handle.
//!
//! A [`Framework`] instance is one independent service platform: it owns the
//! registry, the async work service, the installed bundles, and the event
//! hub.  Several frameworks can coexist in one process — every counter and
//! cache lives inside the instance, nothing is process-global.
//!
//! # Construction
//!
//! ```rust,ignore
//! let framework = Framework::builder()
//!     .with_property("deployment", json!("test"))
//!     .with_validation(|bundle| bundle.symbolic_name() != "evil.bundle")
//!     .build();
//! ```
//!
//! Unknown properties are tolerated and readable back via
//! [`Framework::property`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info, warn};

use solder_core::constants::FRAMEWORK_BUNDLE_VALIDATION_FUNC;
use solder_core::{BundleManifest, Properties, ServiceError, ServiceResult};

use crate::bundle::{Bundle, BundleState};
use crate::context::BundleContext;
use crate::event::{BundleEvent, BundleEventKind, BundleListener, EventHub};
use crate::executor::AsyncWorkService;
use crate::logging::{self, LoggingConfig};
use crate::registry::ServiceRegistry;

/// The bundle validation predicate consulted before a bundle's code runs.
pub type ValidationFn = Arc<dyn Fn(&Bundle) -> bool + Send + Sync>;

pub(crate) struct FrameworkShared {
    pub(crate) registry: ServiceRegistry,
    hub: Arc<EventHub>,
    work: Arc<AsyncWorkService>,
    /// The framework's own bundle, used as the origin for internal lookups.
    host: Arc<Bundle>,
    /// Install order; stop walks it in reverse.
    bundles: RwLock<Vec<Arc<Bundle>>>,
    next_bundle_id: AtomicU64,
    bundle_listeners: RwLock<Vec<(u64, BundleListener)>>,
    next_listener_token: AtomicU64,
    validation: Option<ValidationFn>,
    properties: Properties,
    stopping: AtomicBool,
    stop_flag: Mutex<bool>,
    stop_cv: Condvar,
}

/// Handle to one framework instance.  Cheap to clone.
#[derive(Clone)]
pub struct Framework {
    shared: Arc<FrameworkShared>,
}

impl Framework {
    /// Starts building a framework.
    pub fn builder() -> FrameworkBuilder {
        FrameworkBuilder::default()
    }

    /// The service registry.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.shared.registry
    }

    /// The async work service.
    pub fn work(&self) -> &Arc<AsyncWorkService> {
        &self.shared.work
    }

    /// The framework event hub (error/warning/info fan-out).
    pub fn event_hub(&self) -> &Arc<EventHub> {
        &self.shared.hub
    }

    /// The framework's own bundle.
    pub fn host_bundle(&self) -> &Arc<Bundle> {
        &self.shared.host
    }

    /// A construction property, including unknown vendor keys.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.shared.properties.get(key)
    }

    /// A context acting on behalf of `bundle`.
    pub fn context(&self, bundle: &Arc<Bundle>) -> BundleContext {
        BundleContext::new(Arc::clone(bundle), Arc::downgrade(&self.shared))
    }

    // ─── Bundle lifecycle ────────────────────────────────────────────────────

    /// Installs a bundle; the external loader has already resolved its code,
    /// so the bundle lands in `Resolved` immediately.
    pub fn install_bundle(
        &self,
        symbolic_name: &str,
        manifest: Option<BundleManifest>,
    ) -> ServiceResult<Arc<Bundle>> {
        if self.is_stopping() {
            return Err(ServiceError::Cancelled);
        }
        if symbolic_name.is_empty() {
            return Err(ServiceError::invalid("bundle symbolic name must not be empty"));
        }
        let id = self.shared.next_bundle_id.fetch_add(1, Ordering::Relaxed);
        let bundle = Arc::new(Bundle::new(id, symbolic_name.to_string(), manifest));
        bundle.set_state(BundleState::Resolved);
        self.shared.bundles.write().push(Arc::clone(&bundle));

        info!(bundle = symbolic_name, id, "Bundle installed");
        self.post_bundle_event(BundleEventKind::Installed, &bundle);
        Ok(bundle)
    }

    /// Starts a resolved bundle.  Starting an active bundle is a no-op.
    pub fn start_bundle(&self, bundle: &Arc<Bundle>) -> ServiceResult<()> {
        match bundle.state() {
            BundleState::Active => return Ok(()),
            BundleState::Resolved => {}
            other => {
                return Err(ServiceError::illegal_state(format!(
                    "cannot start bundle '{}' from state {other:?}",
                    bundle.symbolic_name()
                )));
            }
        }
        bundle.set_state(BundleState::Starting);
        bundle.set_state(BundleState::Active);
        info!(bundle = %bundle.symbolic_name(), "Bundle started");
        self.post_bundle_event(BundleEventKind::Started, bundle);
        Ok(())
    }

    /// Stops an active bundle: notifies listeners (components tear down
    /// here), then evicts the bundle's service listeners and unregisters its
    /// remaining registrations.  Stopping a non-active bundle is a no-op.
    pub fn stop_bundle(&self, bundle: &Arc<Bundle>) -> ServiceResult<()> {
        if bundle.state() != BundleState::Active {
            return Ok(());
        }
        bundle.set_state(BundleState::Stopping);
        self.post_bundle_event(BundleEventKind::Stopping, bundle);
        self.shared.registry.remove_bundle(bundle);
        bundle.set_state(BundleState::Resolved);
        info!(bundle = %bundle.symbolic_name(), "Bundle stopped");
        self.post_bundle_event(BundleEventKind::Stopped, bundle);
        Ok(())
    }

    /// Snapshot of the installed bundles in install order.
    pub fn bundles(&self) -> Vec<Arc<Bundle>> {
        self.shared.bundles.read().clone()
    }

    /// Looks a bundle up by id.
    pub fn bundle(&self, id: u64) -> Option<Arc<Bundle>> {
        self.shared.bundles.read().iter().find(|b| b.id() == id).cloned()
    }

    // ─── Bundle listeners ────────────────────────────────────────────────────

    /// Subscribes to bundle lifecycle events; returns the removal token.
    pub fn add_bundle_listener(&self, listener: BundleListener) -> u64 {
        let token = self.shared.next_listener_token.fetch_add(1, Ordering::Relaxed);
        self.shared.bundle_listeners.write().push((token, listener));
        token
    }

    /// Removes a bundle listener.
    pub fn remove_bundle_listener(&self, token: u64) {
        self.shared
            .bundle_listeners
            .write()
            .retain(|(t, _)| *t != token);
    }

    fn post_bundle_event(&self, kind: BundleEventKind, bundle: &Arc<Bundle>) {
        let event = BundleEvent {
            kind,
            bundle: Arc::clone(bundle),
        };
        let snapshot: Vec<BundleListener> = self
            .shared
            .bundle_listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(&event);
            }));
            if result.is_err() {
                self.shared.hub.post_error(
                    Some(Arc::clone(bundle)),
                    "bundle listener panicked",
                    ServiceError::illegal_state("listener panicked"),
                );
            }
        }
    }

    // ─── Validation ──────────────────────────────────────────────────────────

    /// Consults the validation predicate for `bundle`.
    ///
    /// `Ok` without a predicate; [`ServiceError::Security`] when the
    /// predicate rejects.  A panicking predicate is reported as a framework
    /// error event and also rejects.
    pub fn validate_bundle(&self, bundle: &Arc<Bundle>) -> ServiceResult<()> {
        let Some(predicate) = &self.shared.validation else {
            return Ok(());
        };
        let verdict = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            predicate(bundle)
        }));
        match verdict {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(bundle = %bundle.symbolic_name(), "Bundle validation rejected");
                Err(ServiceError::Security(bundle.symbolic_name().to_string()))
            }
            Err(_) => {
                let error = ServiceError::Security(bundle.symbolic_name().to_string());
                self.shared.hub.post_error(
                    Some(Arc::clone(bundle)),
                    "bundle validation predicate panicked",
                    error.clone(),
                );
                Err(error)
            }
        }
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Whether shutdown has begun.
    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    /// Stops every active bundle in reverse install order, then releases
    /// [`wait_for_stop`](Self::wait_for_stop) waiters.  Idempotent.
    pub fn stop(&self) {
        if self
            .shared
            .stopping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!("Framework stopping");
        let bundles = self.bundles();
        for bundle in bundles.iter().rev() {
            if let Err(error) = self.stop_bundle(bundle) {
                debug!(bundle = %bundle.symbolic_name(), %error, "Error stopping bundle");
            }
        }
        let mut stopped = self.shared.stop_flag.lock();
        *stopped = true;
        self.shared.stop_cv.notify_all();
        info!("Framework stopped");
    }

    /// Blocks until the framework has stopped.  A zero `timeout` waits
    /// forever; otherwise returns whether the stop happened in time.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let mut stopped = self.shared.stop_flag.lock();
        if timeout.is_zero() {
            while !*stopped {
                self.shared.stop_cv.wait(&mut stopped);
            }
            true
        } else {
            if !*stopped {
                self.shared.stop_cv.wait_for(&mut stopped, timeout);
            }
            *stopped
        }
    }
}

// ─── FrameworkBuilder ─────────────────────────────────────────────────────────

/// Builder collecting framework construction options.
#[derive(Default)]
pub struct FrameworkBuilder {
    properties: Properties,
    validation: Option<ValidationFn>,
    logging: Option<LoggingConfig>,
}

impl FrameworkBuilder {
    /// Adds a construction property.  Unknown keys are kept and exposed via
    /// [`Framework::property`].
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Installs the bundle validation predicate
    /// (`framework.bundle.validation.func`).
    pub fn with_validation<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Bundle) -> bool + Send + Sync + 'static,
    {
        self.validation = Some(Arc::new(predicate));
        self
    }

    /// Initialises logging during [`build`](Self::build).
    pub fn with_logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Builds the framework.
    pub fn build(mut self) -> Framework {
        if let Some(config) = &self.logging {
            logging::init_from_config(config);
        }
        // Record that a predicate was supplied, without serialising it.
        if self.validation.is_some() {
            self.properties
                .insert(FRAMEWORK_BUNDLE_VALIDATION_FUNC, Value::Bool(true));
        }

        let hub = Arc::new(EventHub::new());
        let registry = ServiceRegistry::new(Arc::clone(&hub));
        let host = Arc::new(Bundle::new(0, "solder.framework".to_string(), None));
        host.set_state(BundleState::Active);
        let work = Arc::new(AsyncWorkService::new(registry.clone(), Arc::clone(&host)));

        let shared = Arc::new(FrameworkShared {
            registry,
            hub,
            work,
            host,
            bundles: RwLock::new(Vec::new()),
            next_bundle_id: AtomicU64::new(1),
            bundle_listeners: RwLock::new(Vec::new()),
            next_listener_token: AtomicU64::new(1),
            validation: self.validation,
            properties: self.properties,
            stopping: AtomicBool::new(false),
            stop_flag: Mutex::new(false),
            stop_cv: Condvar::new(),
        });
        debug!("Framework built");
        Framework { shared }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn unknown_properties_are_tolerated_and_readable() {
        let framework = Framework::builder()
            .with_property("vendor.key", json!("anything"))
            .build();
        assert_eq!(framework.property("vendor.key"), Some(&json!("anything")));
        assert_eq!(framework.property("missing"), None);
    }

    #[test]
    fn bundle_lifecycle_events_fire_in_order() {
        let framework = Framework::builder().build();
        let seen: Arc<parking_lot::Mutex<Vec<BundleEventKind>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let probe = Arc::clone(&seen);
        framework.add_bundle_listener(Arc::new(move |event| {
            probe.lock().push(event.kind);
        }));

        let bundle = framework.install_bundle("b1", None).unwrap();
        framework.start_bundle(&bundle).unwrap();
        framework.stop_bundle(&bundle).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                BundleEventKind::Installed,
                BundleEventKind::Started,
                BundleEventKind::Stopping,
                BundleEventKind::Stopped,
            ]
        );
        assert_eq!(bundle.state(), BundleState::Resolved);
    }

    #[test]
    fn stopping_a_bundle_evicts_its_registrations_and_listeners() {
        let framework = Framework::builder().build();
        let bundle = framework.install_bundle("b1", None).unwrap();
        framework.start_bundle(&bundle).unwrap();

        let context = framework.context(&bundle);
        context
            .register_singleton("I", Arc::new(()), Properties::new())
            .unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&fired);
        context
            .add_service_listener(
                None,
                Arc::new(move |_| {
                    probe.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        framework.stop_bundle(&bundle).unwrap();
        assert!(framework.registry().get_reference("I").is_none());

        // Listener is gone: a new registration does not reach it.
        let other = framework.install_bundle("b2", None).unwrap();
        framework.start_bundle(&other).unwrap();
        framework
            .context(&other)
            .register_singleton("J", Arc::new(()), Properties::new())
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn validation_rejects_and_panics_are_security_errors() {
        let framework = Framework::builder()
            .with_validation(|bundle| {
                if bundle.symbolic_name() == "panics" {
                    panic!("predicate bug");
                }
                bundle.symbolic_name() != "rejected"
            })
            .build();

        let ok = framework.install_bundle("fine", None).unwrap();
        let rejected = framework.install_bundle("rejected", None).unwrap();
        let panics = framework.install_bundle("panics", None).unwrap();

        assert!(framework.validate_bundle(&ok).is_ok());
        assert!(matches!(
            framework.validate_bundle(&rejected),
            Err(ServiceError::Security(_))
        ));
        assert!(matches!(
            framework.validate_bundle(&panics),
            Err(ServiceError::Security(_))
        ));
    }

    #[test]
    fn wait_for_stop_zero_means_infinite() {
        let framework = Framework::builder().build();
        let waiter = framework.clone();
        let handle = std::thread::spawn(move || waiter.wait_for_stop(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(20));
        framework.stop();
        assert!(handle.join().unwrap());

        // Already stopped: bounded wait returns immediately.
        assert!(framework.wait_for_stop(Duration::from_millis(1)));
        assert!(framework.install_bundle("late", None).is_err());
    }

    #[test]
    fn stop_is_idempotent() {
        let framework = Framework::builder().build();
        framework.stop();
        framework.stop();
        assert!(framework.is_stopping());
    }
}
