//! The service registry.
//!
//! A thread-safe, ranked, event-emitting map from interface ids to live
//! registrations.  One registry-wide lock guards the bucket structure;
//! per-registration locks guard property and cache mutation; and event
//! dispatch always happens outside every internal lock — a snapshot of the
//! matching listeners is taken under the lock and then iterated lock-free,
//! so user callbacks can re-enter the registry freely.

mod listeners;
mod registration;
mod scope;

pub use registration::{
    InterfaceMap, ServiceFactory, ServiceObject, ServiceReference, ServiceRegistration,
    ServiceSource, downcast_service,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::json;
use tracing::debug;

use solder_core::constants::{OBJECT_CLASS, SCOPE_PROTOTYPE, SERVICE_ID, SERVICE_SCOPE};
use solder_core::{Filter, Properties, ServiceError, ServiceResult, ServiceScope};

use crate::bundle::Bundle;
use crate::event::{EventHub, ServiceEvent, ServiceEventKind, ServiceListener};
use listeners::{ListenerEntry, ListenerSet};
use registration::{RegistrationEntry, ScopeCaches};

#[derive(Default)]
struct Buckets {
    /// Kept in rank order: ranking descending, id ascending.
    by_interface: HashMap<String, Vec<Arc<RegistrationEntry>>>,
    by_bundle: HashMap<u64, Vec<Arc<RegistrationEntry>>>,
}

pub(crate) struct RegistryShared {
    self_weak: Weak<RegistryShared>,
    /// The registry-wide lock: guards bucket structure only.
    buckets: Mutex<Buckets>,
    listeners: ListenerSet,
    next_id: AtomicU64,
    hub: Arc<EventHub>,
}

/// Cheap-to-clone handle to one framework's service registry.
#[derive(Clone)]
pub struct ServiceRegistry {
    pub(crate) shared: Arc<RegistryShared>,
}

impl ServiceRegistry {
    /// Creates an empty registry reporting user-callback failures to `hub`.
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self {
            shared: Arc::new_cyclic(|self_weak| RegistryShared {
                self_weak: self_weak.clone(),
                buckets: Mutex::new(Buckets::default()),
                listeners: ListenerSet::default(),
                next_id: AtomicU64::new(1),
                hub,
            }),
        }
    }

    /// Publishes a service under every name in `interfaces`.
    ///
    /// Assigns the service id, sets `objectClass`, normalises
    /// `service.scope`, inserts into each interface bucket in rank order, and
    /// emits `Registered`.  Fails when `interfaces` is empty or a plain
    /// object source does not present every named interface.
    pub fn register(
        &self,
        bundle: &Arc<Bundle>,
        interfaces: &[&str],
        source: ServiceSource,
        properties: Properties,
    ) -> ServiceResult<ServiceRegistration> {
        self.shared.register(bundle, interfaces, source, properties)
    }

    /// All available registrations for `interface` whose properties satisfy
    /// `filter`, in rank order.  Unavailable registrations are skipped
    /// atomically.
    pub fn get_references(
        &self,
        interface: &str,
        filter: Option<&Filter>,
    ) -> Vec<ServiceReference> {
        self.shared.get_references(interface, filter)
    }

    /// The best available registration for `interface`.
    pub fn get_reference(&self, interface: &str) -> Option<ServiceReference> {
        self.get_references(interface, None).into_iter().next()
    }

    /// Resolves `reference` for `bundle` according to the service's scope.
    pub fn get_service(
        &self,
        reference: &ServiceReference,
        bundle: &Arc<Bundle>,
    ) -> ServiceResult<ServiceObject> {
        self.shared.get_service(reference, bundle)
    }

    /// Releases one use of `reference` by `bundle`.
    ///
    /// Prototype scope requires the exact `instance` to remove; the other
    /// scopes decrement the bundle's use count.  Returns whether anything was
    /// released.
    pub fn unget_service(
        &self,
        reference: &ServiceReference,
        bundle: &Arc<Bundle>,
        instance: Option<&ServiceObject>,
    ) -> bool {
        self.shared.unget_service(reference, bundle, instance)
    }

    /// Subscribes a service listener owned by `bundle`; returns its token.
    pub fn add_listener(
        &self,
        bundle: &Arc<Bundle>,
        filter: Option<Filter>,
        listener: ServiceListener,
    ) -> u64 {
        self.shared.listeners.add(bundle, filter, listener)
    }

    /// Removes a listener by token.
    pub fn remove_listener(&self, token: u64) -> bool {
        self.shared.listeners.remove(token)
    }

    /// Tears down everything a bundle left behind: its listeners first, then
    /// its remaining registrations.
    pub fn remove_bundle(&self, bundle: &Arc<Bundle>) {
        self.shared.listeners.remove_bundle(bundle.id());
        let leftovers: Vec<Arc<RegistrationEntry>> = {
            let buckets = self.shared.buckets.lock();
            buckets
                .by_bundle
                .get(&bundle.id())
                .map(|entries| entries.clone())
                .unwrap_or_default()
        };
        for entry in leftovers {
            self.shared.unregister(&entry);
        }
    }
}

impl RegistryShared {
    fn handle(&self, entry: &Arc<RegistrationEntry>) -> ServiceRegistration {
        ServiceRegistration {
            entry: Arc::clone(entry),
            registry: self.self_weak.clone(),
        }
    }

    fn register(
        &self,
        bundle: &Arc<Bundle>,
        interfaces: &[&str],
        source: ServiceSource,
        mut properties: Properties,
    ) -> ServiceResult<ServiceRegistration> {
        if interfaces.is_empty() {
            return Err(ServiceError::invalid(
                "a service must be registered under at least one interface",
            ));
        }
        if let ServiceSource::Object(map) = &source {
            for interface in interfaces {
                if !map.contains_key(*interface) {
                    return Err(ServiceError::invalid(format!(
                        "implementation does not present interface '{interface}'"
                    )));
                }
            }
        }

        // Scope normalisation: plain objects are singletons; factories serve
        // bundle scope unless prototype was requested.
        let scope = match &source {
            ServiceSource::Object(_) => ServiceScope::Singleton,
            ServiceSource::Factory(_) => {
                match properties.get_str(SERVICE_SCOPE) {
                    Ok(SCOPE_PROTOTYPE) => ServiceScope::Prototype,
                    _ => ServiceScope::Bundle,
                }
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        properties.insert(SERVICE_ID, json!(id));
        properties.insert(OBJECT_CLASS, json!(interfaces));
        properties.insert(SERVICE_SCOPE, json!(scope.as_str()));

        let entry = Arc::new(RegistrationEntry {
            id,
            bundle: Arc::downgrade(bundle),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            source,
            scope,
            props: parking_lot::RwLock::new(Arc::new(properties)),
            caches: Mutex::new(ScopeCaches::default()),
            available: AtomicBool::new(true),
            unregistering: AtomicBool::new(false),
        });

        {
            let mut buckets = self.buckets.lock();
            for interface in &entry.interfaces {
                let bucket = buckets.by_interface.entry(interface.clone()).or_default();
                let position = bucket
                    .binary_search_by(|existing| existing.rank_cmp(&entry))
                    .unwrap_or_else(|p| p);
                bucket.insert(position, Arc::clone(&entry));
            }
            buckets.by_bundle.entry(bundle.id()).or_default().push(Arc::clone(&entry));
        }

        debug!(
            bundle = %bundle.symbolic_name(),
            service_id = id,
            interfaces = ?entry.interfaces,
            scope = scope.as_str(),
            "Service registered"
        );

        let props = entry.properties();
        let snapshot = self.listeners.matching(&props);
        self.deliver(
            &snapshot,
            &ServiceEvent {
                kind: ServiceEventKind::Registered,
                reference: self.handle(&entry).reference(),
            },
        );

        Ok(self.handle(&entry))
    }

    fn get_references(&self, interface: &str, filter: Option<&Filter>) -> Vec<ServiceReference> {
        let buckets = self.buckets.lock();
        let Some(bucket) = buckets.by_interface.get(interface) else {
            return Vec::new();
        };
        bucket
            .iter()
            .filter(|entry| entry.available.load(Ordering::Acquire))
            .filter(|entry| filter.is_none_or(|f| f.matches(&entry.properties())))
            .filter_map(|entry| self.handle(entry).reference_for(interface))
            .collect()
    }

    pub(crate) fn set_properties(
        &self,
        entry: &Arc<RegistrationEntry>,
        mut properties: Properties,
    ) -> ServiceResult<()> {
        if entry.unregistering.load(Ordering::Acquire) {
            return Err(ServiceError::illegal_state(
                "cannot set properties on an unregistered service",
            ));
        }

        // Swap the snapshot, preserving the registry-owned keys verbatim.
        let before = entry.properties();
        for key in [SERVICE_ID, OBJECT_CLASS, SERVICE_SCOPE] {
            match before.get(key) {
                Some(value) => {
                    properties.insert(key, value.clone());
                }
                None => {
                    properties.remove(key);
                }
            }
        }
        let after = Arc::new(properties);
        let ranking_changed = {
            let mut guard = entry.props.write();
            let changed = before.get_int(solder_core::constants::SERVICE_RANKING)
                != after.get_int(solder_core::constants::SERVICE_RANKING);
            *guard = Arc::clone(&after);
            changed
        };

        if ranking_changed {
            let mut buckets = self.buckets.lock();
            for interface in &entry.interfaces {
                if let Some(bucket) = buckets.by_interface.get_mut(interface) {
                    bucket.sort_by(|a, b| a.rank_cmp(b));
                }
            }
        }

        let reference = self.handle(entry).reference();
        let modified = self.listeners.matching(&after);
        self.deliver(
            &modified,
            &ServiceEvent {
                kind: ServiceEventKind::Modified,
                reference: reference.clone(),
            },
        );
        let endmatch = self.listeners.matching_endmatch(&before, &after);
        self.deliver(
            &endmatch,
            &ServiceEvent {
                kind: ServiceEventKind::ModifiedEndmatch,
                reference,
            },
        );
        Ok(())
    }

    pub(crate) fn unregister(&self, entry: &Arc<RegistrationEntry>) {
        // One-shot latch: the thread that wins the swap performs teardown,
        // every other caller returns silently.
        if entry
            .unregistering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        entry.available.store(false, Ordering::Release);

        {
            let mut buckets = self.buckets.lock();
            for interface in &entry.interfaces {
                let now_empty = buckets.by_interface.get_mut(interface).map(|bucket| {
                    bucket.retain(|e| e.id != entry.id);
                    bucket.is_empty()
                });
                if now_empty == Some(true) {
                    buckets.by_interface.remove(interface);
                }
            }
            if let Some(owner) = entry.bundle.upgrade() {
                let now_empty = buckets.by_bundle.get_mut(&owner.id()).map(|owned| {
                    owned.retain(|e| e.id != entry.id);
                    owned.is_empty()
                });
                if now_empty == Some(true) {
                    buckets.by_bundle.remove(&owner.id());
                }
            }
        }

        debug!(service_id = entry.id, interfaces = ?entry.interfaces, "Service unregistering");

        let props = entry.properties();
        let snapshot = self.listeners.matching(&props);
        self.deliver(
            &snapshot,
            &ServiceEvent {
                kind: ServiceEventKind::Unregistering,
                reference: self.handle(entry).reference(),
            },
        );

        self.release_cached_instances(entry);
    }

    /// Invokes `snapshot` outside every registry lock; a panicking listener
    /// becomes a framework error event attributed to its bundle.
    fn deliver(&self, snapshot: &[Arc<ListenerEntry>], event: &ServiceEvent) {
        for entry in snapshot {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (entry.listener)(event);
            }));
            if result.is_err() {
                self.hub.post_error(
                    entry.bundle.upgrade(),
                    "service listener panicked during event dispatch",
                    ServiceError::illegal_state("listener panicked"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solder_core::constants::SERVICE_RANKING;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(EventHub::new()))
    }

    fn bundle(id: u64) -> Arc<Bundle> {
        let b = Arc::new(Bundle::new(id, format!("bundle.{id}"), None));
        b.set_state(crate::bundle::BundleState::Active);
        b
    }

    fn object_for(interfaces: &[&str]) -> ServiceSource {
        let mut map = InterfaceMap::new();
        for i in interfaces {
            map.insert(i.to_string(), Arc::new(()) as ServiceObject);
        }
        ServiceSource::Object(map)
    }

    fn ranked(rank: i64) -> Properties {
        Properties::from_json(json!({SERVICE_RANKING: rank})).unwrap()
    }

    #[test]
    fn register_requires_interfaces_and_presence() {
        let reg = registry();
        let owner = bundle(1);

        assert!(matches!(
            reg.register(&owner, &[], object_for(&["a"]), Properties::new()),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.register(&owner, &["a", "b"], object_for(&["a"]), Properties::new()),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn registry_owned_properties_are_assigned() {
        let reg = registry();
        let owner = bundle(1);
        let registration = reg
            .register(&owner, &["i.A", "i.B"], object_for(&["i.A", "i.B"]), Properties::new())
            .unwrap();

        let props = registration.properties();
        assert_eq!(props.get_int(SERVICE_ID).unwrap() as u64, registration.id());
        assert_eq!(props.get_str(SERVICE_SCOPE).unwrap(), "singleton");
        let classes = props.get_vec(OBJECT_CLASS).unwrap();
        assert_eq!(classes.len(), 2);
    }

    #[test]
    fn ranked_lookup_orders_by_rank_then_id() {
        let reg = registry();
        let owner = bundle(1);
        let s1 = reg.register(&owner, &["I"], object_for(&["I"]), ranked(0)).unwrap();
        let s2 = reg.register(&owner, &["I"], object_for(&["I"]), ranked(10)).unwrap();
        let s3 = reg.register(&owner, &["I"], object_for(&["I"]), ranked(10)).unwrap();

        let ids: Vec<u64> = reg
            .get_references("I", None)
            .iter()
            .map(ServiceReference::service_id)
            .collect();
        assert_eq!(ids, vec![s2.id(), s3.id(), s1.id()]);

        // Re-ranking S1 to the top reorders the bucket.
        s1.set_properties(ranked(20)).unwrap();
        let ids: Vec<u64> = reg
            .get_references("I", None)
            .iter()
            .map(ServiceReference::service_id)
            .collect();
        assert_eq!(ids, vec![s1.id(), s2.id(), s3.id()]);
    }

    #[test]
    fn set_properties_preserves_registry_keys() {
        let reg = registry();
        let owner = bundle(1);
        let registration = reg
            .register(&owner, &["I"], object_for(&["I"]), Properties::new())
            .unwrap();
        let id_before = registration.properties().get_int(SERVICE_ID).unwrap();

        registration
            .set_properties(
                Properties::from_json(json!({
                    "service.id": 9999,
                    "objectClass": ["fake"],
                    "service.scope": "prototype",
                    "user.key": "kept"
                }))
                .unwrap(),
            )
            .unwrap();

        let props = registration.properties();
        assert_eq!(props.get_int(SERVICE_ID).unwrap(), id_before);
        assert_eq!(props.get_str(SERVICE_SCOPE).unwrap(), "singleton");
        assert_eq!(props.get_vec(OBJECT_CLASS).unwrap()[0], json!("I"));
        assert_eq!(props.get_str("user.key").unwrap(), "kept");
    }

    #[test]
    fn modified_and_endmatch_events() {
        let reg = registry();
        let owner = bundle(1);
        let modified = Arc::new(AtomicUsize::new(0));
        let endmatch = Arc::new(AtomicUsize::new(0));

        let m = Arc::clone(&modified);
        let e = Arc::clone(&endmatch);
        reg.add_listener(
            &owner,
            Some(Filter::parse("(&(objectClass=I)(color=red))").unwrap()),
            Arc::new(move |event| match event.kind {
                ServiceEventKind::Modified => {
                    m.fetch_add(1, Ordering::SeqCst);
                }
                ServiceEventKind::ModifiedEndmatch => {
                    e.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }),
        );

        let registration = reg
            .register(
                &owner,
                &["I"],
                object_for(&["I"]),
                Properties::from_json(json!({"color": "red"})).unwrap(),
            )
            .unwrap();

        // Still matching: Modified only.
        registration
            .set_properties(Properties::from_json(json!({"color": "red", "x": 1})).unwrap())
            .unwrap();
        assert_eq!(modified.load(Ordering::SeqCst), 1);
        assert_eq!(endmatch.load(Ordering::SeqCst), 0);

        // No longer matching: Endmatch only.
        registration
            .set_properties(Properties::from_json(json!({"color": "blue"})).unwrap())
            .unwrap();
        assert_eq!(modified.load(Ordering::SeqCst), 1);
        assert_eq!(endmatch.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_is_idempotent_and_hides_the_service() {
        let reg = registry();
        let owner = bundle(1);
        let events = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&events);
        reg.add_listener(
            &owner,
            Some(Filter::parse("(objectClass=I)").unwrap()),
            Arc::new(move |event| {
                if event.kind == ServiceEventKind::Unregistering {
                    probe.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        let registration = reg
            .register(&owner, &["I"], object_for(&["I"]), Properties::new())
            .unwrap();
        registration.unregister();
        registration.unregister();

        assert!(reg.get_references("I", None).is_empty());
        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert!(matches!(
            registration.set_properties(Properties::new()),
            Err(ServiceError::IllegalState(_))
        ));
    }

    #[test]
    fn filtered_lookup() {
        let reg = registry();
        let owner = bundle(1);
        reg.register(
            &owner,
            &["I"],
            object_for(&["I"]),
            Properties::from_json(json!({"vendor": "acme"})).unwrap(),
        )
        .unwrap();
        reg.register(
            &owner,
            &["I"],
            object_for(&["I"]),
            Properties::from_json(json!({"vendor": "other"})).unwrap(),
        )
        .unwrap();

        let filter = Filter::parse("(vendor=acme)").unwrap();
        assert_eq!(reg.get_references("I", Some(&filter)).len(), 1);
        assert_eq!(reg.get_references("I", None).len(), 2);
    }

    #[test]
    fn remove_bundle_unregisters_leftovers() {
        let reg = registry();
        let owner = bundle(7);
        let registration = reg
            .register(&owner, &["I"], object_for(&["I"]), Properties::new())
            .unwrap();

        reg.remove_bundle(&owner);
        assert!(reg.get_references("I", None).is_empty());
        assert!(!registration.is_available());
    }

    #[test]
    fn concurrent_registers_get_distinct_ids_and_deterministic_order() {
        let reg = registry();
        let owner = bundle(1);
        let mut threads = Vec::new();
        for _ in 0..8 {
            let reg = reg.clone();
            let owner = Arc::clone(&owner);
            threads.push(std::thread::spawn(move || {
                reg.register(&owner, &["I"], object_for(&["I"]), Properties::new())
                    .unwrap()
                    .id()
            }));
        }
        let mut ids: Vec<u64> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8, "ids must be distinct");

        let listed: Vec<u64> = reg
            .get_references("I", None)
            .iter()
            .map(ServiceReference::service_id)
            .collect();
        assert_eq!(listed, ids, "equal ranks order by ascending id");
    }
}
