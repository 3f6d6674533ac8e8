//! Scope-aware service resolution.
//!
//! - **singleton**: the registered object itself, with per-bundle use counts;
//! - **bundle**: one factory-produced instance per consuming bundle, cached
//!   until the bundle's use count drops to zero;
//! - **prototype**: a fresh factory-produced instance per `get_service`,
//!   released by handing back the exact object.
//!
//! Factories are user code and therefore always run outside every registry
//! and registration lock; a concurrent first-get race is resolved by keeping
//! the winner's instance and handing the loser's straight back to the
//! factory.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use solder_core::{ServiceError, ServiceResult, ServiceScope};

use crate::bundle::Bundle;
use crate::registry::RegistryShared;
use crate::registry::registration::{
    InterfaceMap, RegistrationEntry, ScopeCaches, ServiceFactory, ServiceObject, ServiceReference,
    ServiceSource,
};

/// Removes the prototype instance whose `interface` object is exactly
/// `object`.  Returns the instance so the factory can release it.
fn take_prototype(
    caches: &mut ScopeCaches,
    bundle_id: u64,
    interface: &str,
    object: &ServiceObject,
) -> Option<InterfaceMap> {
    let (instance, now_empty) = {
        let slot = caches.prototype_instances.get_mut(&bundle_id)?;
        let position = slot
            .1
            .iter()
            .position(|map| map.get(interface).is_some_and(|o| Arc::ptr_eq(o, object)))?;
        let instance = slot.1.remove(position);
        (instance, slot.1.is_empty())
    };
    if now_empty {
        caches.prototype_instances.remove(&bundle_id);
    }
    Some(instance)
}

impl RegistryShared {
    pub(crate) fn get_service(
        &self,
        reference: &ServiceReference,
        bundle: &Arc<Bundle>,
    ) -> ServiceResult<ServiceObject> {
        let entry = reference.entry.upgrade().ok_or(ServiceError::Unregistered)?;
        if !entry.available.load(Ordering::Acquire) {
            return Err(ServiceError::Unregistered);
        }
        let interface = reference.interface();

        match (&entry.source, entry.scope) {
            (ServiceSource::Object(map), _) => {
                let object = map.get(interface).cloned().ok_or_else(|| {
                    ServiceError::illegal_state(format!(
                        "registration does not serve interface '{interface}'"
                    ))
                })?;
                *entry.caches.lock().use_counts.entry(bundle.id()).or_insert(0) += 1;
                Ok(object)
            }
            (ServiceSource::Factory(factory), ServiceScope::Bundle) => {
                self.get_bundle_scoped(factory, bundle, &entry, interface)
            }
            (ServiceSource::Factory(factory), ServiceScope::Prototype) => {
                self.get_prototype_scoped(factory, bundle, &entry, interface)
            }
            (ServiceSource::Factory(_), ServiceScope::Singleton) => Err(
                ServiceError::illegal_state("factory registrations are never singleton scoped"),
            ),
        }
    }

    fn get_bundle_scoped(
        &self,
        factory: &Arc<dyn ServiceFactory>,
        bundle: &Arc<Bundle>,
        entry: &Arc<RegistrationEntry>,
        interface: &str,
    ) -> ServiceResult<ServiceObject> {
        // Fast path: the bundle already has its instance.
        {
            let mut caches = entry.caches.lock();
            if let Some((_, cached)) = caches.bundle_instances.get(&bundle.id()) {
                let object = cached.get(interface).cloned();
                if let Some(object) = object {
                    *caches.use_counts.entry(bundle.id()).or_insert(0) += 1;
                    return Ok(object);
                }
            }
        }

        // Miss: run the factory outside all locks, then publish or discard.
        let produced = self.produce(factory, bundle, entry)?;
        let mut surplus = None;
        let object = {
            let mut caches = entry.caches.lock();
            let object = match caches.bundle_instances.get(&bundle.id()) {
                Some((_, winner)) => {
                    // Lost a first-get race: serve the winner's instance.
                    surplus = Some(produced);
                    winner.get(interface).cloned()
                }
                None => {
                    let object = produced.get(interface).cloned();
                    caches
                        .bundle_instances
                        .insert(bundle.id(), (Arc::downgrade(bundle), produced));
                    object
                }
            };
            if object.is_some() {
                *caches.use_counts.entry(bundle.id()).or_insert(0) += 1;
            }
            object
        };
        if let Some(extra) = surplus {
            self.release(factory, bundle, entry, extra);
        }

        // The registration may have started unregistering while the factory
        // ran; its drain can miss our insert, so release it here.
        if entry.unregistering.load(Ordering::Acquire) {
            let leaked = entry
                .caches
                .lock()
                .bundle_instances
                .remove(&bundle.id())
                .map(|(_, instance)| instance);
            if let Some(instance) = leaked {
                self.release(factory, bundle, entry, instance);
            }
            return Err(ServiceError::Unregistered);
        }

        object.ok_or_else(|| {
            ServiceError::factory(format!("factory result does not present '{interface}'"))
        })
    }

    fn get_prototype_scoped(
        &self,
        factory: &Arc<dyn ServiceFactory>,
        bundle: &Arc<Bundle>,
        entry: &Arc<RegistrationEntry>,
        interface: &str,
    ) -> ServiceResult<ServiceObject> {
        let produced = self.produce(factory, bundle, entry)?;
        let object = produced.get(interface).cloned().ok_or_else(|| {
            ServiceError::factory(format!("factory result does not present '{interface}'"))
        })?;
        {
            let mut caches = entry.caches.lock();
            caches
                .prototype_instances
                .entry(bundle.id())
                .or_insert_with(|| (Arc::downgrade(bundle), Vec::new()))
                .1
                .push(produced);
        }

        if entry.unregistering.load(Ordering::Acquire) {
            let leaked = take_prototype(&mut entry.caches.lock(), bundle.id(), interface, &object);
            if let Some(instance) = leaked {
                self.release(factory, bundle, entry, instance);
            }
            return Err(ServiceError::Unregistered);
        }
        Ok(object)
    }

    pub(crate) fn unget_service(
        &self,
        reference: &ServiceReference,
        bundle: &Arc<Bundle>,
        instance: Option<&ServiceObject>,
    ) -> bool {
        let Some(entry) = reference.entry.upgrade() else {
            return false;
        };
        let interface = reference.interface();

        match (&entry.source, entry.scope) {
            (ServiceSource::Object(_), _) => {
                let mut caches = entry.caches.lock();
                let remaining = caches.use_counts.get_mut(&bundle.id()).map(|count| {
                    *count = count.saturating_sub(1);
                    *count
                });
                match remaining {
                    Some(0) => {
                        caches.use_counts.remove(&bundle.id());
                        true
                    }
                    Some(_) => true,
                    None => false,
                }
            }
            (ServiceSource::Factory(factory), ServiceScope::Bundle) => {
                let released = {
                    let mut caches = entry.caches.lock();
                    let remaining = caches.use_counts.get_mut(&bundle.id()).map(|count| {
                        *count = count.saturating_sub(1);
                        *count
                    });
                    match remaining {
                        Some(0) => {
                            caches.use_counts.remove(&bundle.id());
                            caches
                                .bundle_instances
                                .remove(&bundle.id())
                                .map(|(_, instance)| instance)
                        }
                        Some(_) => None,
                        None => return false,
                    }
                };
                if let Some(instance) = released {
                    self.release(factory, bundle, &entry, instance);
                }
                true
            }
            (ServiceSource::Factory(factory), ServiceScope::Prototype) => {
                let Some(object) = instance else {
                    return false;
                };
                let removed =
                    take_prototype(&mut entry.caches.lock(), bundle.id(), interface, object);
                match removed {
                    Some(instance) => {
                        self.release(factory, bundle, &entry, instance);
                        true
                    }
                    None => false,
                }
            }
            (ServiceSource::Factory(_), ServiceScope::Singleton) => false,
        }
    }

    /// Hands every cached instance back to the factory after unregistration,
    /// iterating a lock-free copy of the caches.
    pub(crate) fn release_cached_instances(&self, entry: &Arc<RegistrationEntry>) {
        let (bundles, prototypes) = {
            let mut caches = entry.caches.lock();
            caches.use_counts.clear();
            (
                std::mem::take(&mut caches.bundle_instances),
                std::mem::take(&mut caches.prototype_instances),
            )
        };
        let ServiceSource::Factory(factory) = &entry.source else {
            return;
        };
        for (_, (bundle, instance)) in bundles {
            if let Some(bundle) = bundle.upgrade() {
                self.release(factory, &bundle, entry, instance);
            }
        }
        for (_, (bundle, instances)) in prototypes {
            if let Some(bundle) = bundle.upgrade() {
                for instance in instances {
                    self.release(factory, &bundle, entry, instance);
                }
            }
        }
    }

    /// Runs the factory's `get_service` outside all locks and verifies the
    /// result presents every declared interface.
    fn produce(
        &self,
        factory: &Arc<dyn ServiceFactory>,
        bundle: &Arc<Bundle>,
        entry: &Arc<RegistrationEntry>,
    ) -> ServiceResult<InterfaceMap> {
        let registration = self.handle(entry);
        let map = match catch_unwind(AssertUnwindSafe(|| factory.get_service(bundle, &registration)))
        {
            Ok(Ok(map)) => map,
            // Security verdicts pass through untouched so consumers can tell
            // a rejected bundle from a broken factory.
            Ok(Err(error @ ServiceError::Security(_))) => return Err(error),
            Ok(Err(error)) => {
                return Err(ServiceError::factory(format!("factory failed: {error}")));
            }
            Err(_) => {
                self.hub.post_error(
                    entry.bundle.upgrade(),
                    "service factory panicked in get_service",
                    ServiceError::factory("factory panicked"),
                );
                return Err(ServiceError::factory("service factory panicked"));
            }
        };
        if let Some(missing) = entry.interfaces.iter().find(|i| !map.contains_key(*i)) {
            let message =
                format!("factory result does not present interface '{missing}'");
            self.release(factory, bundle, entry, map);
            return Err(ServiceError::factory(message));
        }
        Ok(map)
    }

    /// Hands an instance back to the factory, containing factory panics.
    fn release(
        &self,
        factory: &Arc<dyn ServiceFactory>,
        bundle: &Arc<Bundle>,
        entry: &Arc<RegistrationEntry>,
        instance: InterfaceMap,
    ) {
        let registration = self.handle(entry);
        let result = catch_unwind(AssertUnwindSafe(|| {
            factory.unget_service(bundle, &registration, instance);
        }));
        if result.is_err() {
            self.hub.post_error(
                entry.bundle.upgrade(),
                "service factory panicked in unget_service",
                ServiceError::factory("factory panicked during release"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleState;
    use crate::event::EventHub;
    use crate::registry::{ServiceRegistry, ServiceRegistration};
    use serde_json::json;
    use solder_core::Properties;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(EventHub::new()))
    }

    fn bundle(id: u64) -> Arc<Bundle> {
        let b = Arc::new(Bundle::new(id, format!("bundle.{id}"), None));
        b.set_state(BundleState::Active);
        b
    }

    /// Counts produced and released instances; each instance is a fresh
    /// `Arc<AtomicUsize>` so identity can be asserted.
    struct CountingFactory {
        produced: AtomicUsize,
        released: AtomicUsize,
    }

    impl CountingFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                produced: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            })
        }
    }

    impl ServiceFactory for CountingFactory {
        fn get_service(
            &self,
            _bundle: &Arc<Bundle>,
            _registration: &ServiceRegistration,
        ) -> ServiceResult<InterfaceMap> {
            self.produced.fetch_add(1, Ordering::SeqCst);
            let mut map = InterfaceMap::new();
            map.insert("I".to_string(), Arc::new(AtomicUsize::new(0)) as ServiceObject);
            Ok(map)
        }

        fn unget_service(
            &self,
            _bundle: &Arc<Bundle>,
            _registration: &ServiceRegistration,
            _instance: InterfaceMap,
        ) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn bundle_scope_caches_one_instance_per_bundle() {
        let reg = registry();
        let owner = bundle(1);
        let factory = CountingFactory::new();
        let registration = reg
            .register(
                &owner,
                &["I"],
                ServiceSource::Factory(factory.clone()),
                Properties::new(),
            )
            .unwrap();
        assert_eq!(registration.properties().get_str("service.scope").unwrap(), "bundle");

        let consumer_a = bundle(2);
        let consumer_b = bundle(3);
        let reference = reg.get_reference("I").unwrap();

        let a1 = reg.get_service(&reference, &consumer_a).unwrap();
        let a2 = reg.get_service(&reference, &consumer_a).unwrap();
        let b1 = reg.get_service(&reference, &consumer_b).unwrap();

        assert!(Arc::ptr_eq(&a1, &a2), "same bundle shares the instance");
        assert!(!Arc::ptr_eq(&a1, &b1), "bundles get distinct instances");
        assert_eq!(factory.produced.load(Ordering::SeqCst), 2);

        // The cache survives until the last unget.
        assert!(reg.unget_service(&reference, &consumer_a, None));
        assert_eq!(factory.released.load(Ordering::SeqCst), 0);
        assert!(reg.unget_service(&reference, &consumer_a, None));
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prototype_scope_produces_fresh_instances() {
        let reg = registry();
        let owner = bundle(1);
        let factory = CountingFactory::new();
        let props = Properties::from_json(json!({"service.scope": "prototype"})).unwrap();
        reg.register(&owner, &["I"], ServiceSource::Factory(factory.clone()), props)
            .unwrap();

        let consumer = bundle(2);
        let reference = reg.get_reference("I").unwrap();
        let first = reg.get_service(&reference, &consumer).unwrap();
        let second = reg.get_service(&reference, &consumer).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.produced.load(Ordering::SeqCst), 2);

        // Unget must present the exact instance.
        let stranger: ServiceObject = Arc::new(AtomicUsize::new(0));
        assert!(!reg.unget_service(&reference, &consumer, Some(&stranger)));
        assert!(reg.unget_service(&reference, &consumer, Some(&first)));
        assert!(!reg.unget_service(&reference, &consumer, Some(&first)), "already returned");
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_releases_cached_instances() {
        let reg = registry();
        let owner = bundle(1);
        let factory = CountingFactory::new();
        let registration = reg
            .register(
                &owner,
                &["I"],
                ServiceSource::Factory(factory.clone()),
                Properties::new(),
            )
            .unwrap();

        let consumer = bundle(2);
        let reference = reg.get_reference("I").unwrap();
        let _ = reg.get_service(&reference, &consumer).unwrap();

        registration.unregister();
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);
        assert!(matches!(
            reg.get_service(&reference, &consumer),
            Err(ServiceError::Unregistered)
        ));
    }

    struct FailingFactory;

    impl ServiceFactory for FailingFactory {
        fn get_service(
            &self,
            _bundle: &Arc<Bundle>,
            _registration: &ServiceRegistration,
        ) -> ServiceResult<InterfaceMap> {
            Err(ServiceError::factory("nothing today"))
        }

        fn unget_service(
            &self,
            _bundle: &Arc<Bundle>,
            _registration: &ServiceRegistration,
            _instance: InterfaceMap,
        ) {
        }
    }

    #[test]
    fn factory_failure_surfaces_as_factory_error() {
        let reg = registry();
        let owner = bundle(1);
        reg.register(
            &owner,
            &["I"],
            ServiceSource::Factory(Arc::new(FailingFactory)),
            Properties::new(),
        )
        .unwrap();

        let consumer = bundle(2);
        let reference = reg.get_reference("I").unwrap();
        assert!(matches!(
            reg.get_service(&reference, &consumer),
            Err(ServiceError::Factory(_))
        ));
    }

    struct PanickingFactory;

    impl ServiceFactory for PanickingFactory {
        fn get_service(
            &self,
            _bundle: &Arc<Bundle>,
            _registration: &ServiceRegistration,
        ) -> ServiceResult<InterfaceMap> {
            panic!("factory bug");
        }

        fn unget_service(
            &self,
            _bundle: &Arc<Bundle>,
            _registration: &ServiceRegistration,
            _instance: InterfaceMap,
        ) {
        }
    }

    #[test]
    fn factory_panic_is_contained_and_reported() {
        let hub = Arc::new(EventHub::new());
        let errors = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&errors);
        hub.add_listener(Arc::new(move |_| {
            probe.fetch_add(1, Ordering::SeqCst);
        }));

        let reg = ServiceRegistry::new(hub);
        let owner = bundle(1);
        reg.register(
            &owner,
            &["I"],
            ServiceSource::Factory(Arc::new(PanickingFactory)),
            Properties::new(),
        )
        .unwrap();

        let consumer = bundle(2);
        let reference = reg.get_reference("I").unwrap();
        assert!(matches!(
            reg.get_service(&reference, &consumer),
            Err(ServiceError::Factory(_))
        ));
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        // The registry is still consistent afterwards.
        assert_eq!(reg.get_references("I", None).len(), 1);
    }
}
