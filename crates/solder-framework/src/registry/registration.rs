//! Registration records and the handles that point at them.
//!
//! The registry is the sole strong owner of [`RegistrationEntry`] records;
//! everything user code holds — [`ServiceRegistration`] aside — is a weak
//! edge, so a vanished registration degrades into `Unregistered` errors
//! instead of keeping dead services alive.

use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use solder_core::constants::SERVICE_RANKING;
use solder_core::{Properties, ServiceResult, ServiceScope};

use crate::bundle::Bundle;
use crate::registry::RegistryShared;

/// An opaque service instance: `Arc<dyn Any>` upcast from whatever concrete
/// type the provider registered.  Consumers downcast it back.
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// One implementation object per interface name a registration satisfies.
pub type InterfaceMap = HashMap<String, ServiceObject>;

/// User-supplied producer for bundle- and prototype-scoped services.
///
/// `get_service` must return a map presenting every interface the service was
/// registered under; the registry verifies this and reports a missing
/// interface as a factory error.  Factory failures never corrupt registry
/// state — they surface to the requesting caller and as framework error
/// events.
pub trait ServiceFactory: Send + Sync {
    /// Materialises an instance for `bundle`.
    fn get_service(
        &self,
        bundle: &Arc<Bundle>,
        registration: &ServiceRegistration,
    ) -> ServiceResult<InterfaceMap>;

    /// Releases an instance previously produced for `bundle`.
    fn unget_service(
        &self,
        bundle: &Arc<Bundle>,
        registration: &ServiceRegistration,
        instance: InterfaceMap,
    );
}

/// What a registration serves from: a fixed object or a factory.
pub enum ServiceSource {
    /// A singleton object shared by every consumer.
    Object(InterfaceMap),
    /// A factory producing per-bundle or per-prototype instances.
    Factory(Arc<dyn ServiceFactory>),
}

impl fmt::Debug for ServiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(map) => f.debug_tuple("Object").field(&map.keys()).finish(),
            Self::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// Per-scope instance caches and use counts, guarded by the registration
/// lock.  Bundles are kept as weak edges; a dead bundle simply drops out of
/// the unget path.
#[derive(Default)]
pub(crate) struct ScopeCaches {
    /// Per consuming bundle.
    pub(crate) use_counts: HashMap<u64, usize>,
    /// Bundle scope: the one instance per consuming bundle.
    pub(crate) bundle_instances: HashMap<u64, (Weak<Bundle>, InterfaceMap)>,
    /// Prototype scope: every live instance per consuming bundle.
    pub(crate) prototype_instances: HashMap<u64, (Weak<Bundle>, Vec<InterfaceMap>)>,
}

/// The canonical record for one published service.
pub(crate) struct RegistrationEntry {
    pub(crate) id: u64,
    pub(crate) bundle: Weak<Bundle>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) source: ServiceSource,
    pub(crate) scope: ServiceScope,
    /// Immutable-by-swap property snapshot.
    pub(crate) props: RwLock<Arc<Properties>>,
    /// Per-registration lock around caches and use counts.
    pub(crate) caches: Mutex<ScopeCaches>,
    /// Cleared before the record leaves the buckets; `get_service` refuses
    /// once false while already-fetched instances keep resolving.
    pub(crate) available: AtomicBool,
    /// One-shot latch; the thread that flips it performs the teardown.
    pub(crate) unregistering: AtomicBool,
}

impl RegistrationEntry {
    pub(crate) fn properties(&self) -> Arc<Properties> {
        Arc::clone(&self.props.read())
    }

    pub(crate) fn ranking(&self) -> i64 {
        self.props.read().get_int(SERVICE_RANKING).unwrap_or(0)
    }

    /// Rank order inside a bucket: ranking descending, then id ascending.
    pub(crate) fn rank_cmp(&self, other: &Self) -> CmpOrdering {
        other
            .ranking()
            .cmp(&self.ranking())
            .then(self.id.cmp(&other.id))
    }
}

// ─── ServiceRegistration ──────────────────────────────────────────────────────

/// The owner-side handle to a published service.
///
/// Held by the registering bundle (and by component configurations for the
/// services they publish).  Cloning is cheap; all clones address the same
/// record.
#[derive(Clone)]
pub struct ServiceRegistration {
    pub(crate) entry: Arc<RegistrationEntry>,
    pub(crate) registry: Weak<RegistryShared>,
}

impl ServiceRegistration {
    /// The registration's unique service id.
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    /// Current property snapshot.
    pub fn properties(&self) -> Arc<Properties> {
        self.entry.properties()
    }

    /// Whether `get_service` can still succeed against this registration.
    pub fn is_available(&self) -> bool {
        self.entry.available.load(Ordering::Acquire)
    }

    /// A reference through the first declared interface.
    pub fn reference(&self) -> ServiceReference {
        ServiceReference {
            entry: Arc::downgrade(&self.entry),
            interface: self.entry.interfaces[0].clone(),
            id: self.entry.id,
        }
    }

    /// A reference through `interface`, when the registration declares it.
    pub fn reference_for(&self, interface: &str) -> Option<ServiceReference> {
        self.entry
            .interfaces
            .iter()
            .any(|i| i == interface)
            .then(|| ServiceReference {
                entry: Arc::downgrade(&self.entry),
                interface: interface.to_string(),
                id: self.entry.id,
            })
    }

    /// References through every declared interface.
    pub fn references(&self) -> Vec<ServiceReference> {
        self.entry
            .interfaces
            .iter()
            .map(|interface| ServiceReference {
                entry: Arc::downgrade(&self.entry),
                interface: interface.clone(),
                id: self.entry.id,
            })
            .collect()
    }

    /// Atomically replaces the mutable properties.
    ///
    /// `service.id`, `objectClass`, and `service.scope` are preserved
    /// verbatim; rank order is recomputed when the ranking changed, and
    /// `Modified` / `ModifiedEndmatch` events are dispatched.
    pub fn set_properties(&self, properties: Properties) -> ServiceResult<()> {
        match self.registry.upgrade() {
            Some(shared) => shared.set_properties(&self.entry, properties),
            None => Err(solder_core::ServiceError::illegal_state(
                "registry is gone",
            )),
        }
    }

    /// Withdraws the registration.
    ///
    /// Exactly one caller performs the teardown; concurrent and repeated
    /// calls return silently.
    pub fn unregister(&self) {
        if let Some(shared) = self.registry.upgrade() {
            shared.unregister(&self.entry);
        }
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("id", &self.entry.id)
            .field("interfaces", &self.entry.interfaces)
            .field("scope", &self.entry.scope)
            .field("available", &self.is_available())
            .finish()
    }
}

// ─── ServiceReference ─────────────────────────────────────────────────────────

/// A weak, consumer-side handle to a registration through one interface.
///
/// Total order: ranking descending, then service id ascending — the first
/// reference in a sorted sequence is the one `get_service` should prefer.
#[derive(Clone)]
pub struct ServiceReference {
    pub(crate) entry: Weak<RegistrationEntry>,
    interface: String,
    id: u64,
}

impl ServiceReference {
    /// The interface this reference resolves through.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// The referenced registration's service id.
    pub fn service_id(&self) -> u64 {
        self.id
    }

    /// Current ranking; a vanished registration ranks as `0`.
    pub fn ranking(&self) -> i64 {
        self.entry.upgrade().map_or(0, |e| e.ranking())
    }

    /// Current property snapshot, while the registration lives.
    pub fn properties(&self) -> Option<Arc<Properties>> {
        self.entry.upgrade().map(|e| e.properties())
    }

    /// Copy of one property value.
    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties().and_then(|p| p.get(key).cloned())
    }

    /// The owning bundle, while both it and the registration live.
    pub fn bundle(&self) -> Option<Arc<Bundle>> {
        self.entry.upgrade().and_then(|e| e.bundle.upgrade())
    }

    /// Whether the registration still accepts `get_service`.
    pub fn is_available(&self) -> bool {
        self.entry
            .upgrade()
            .is_some_and(|e| e.available.load(Ordering::Acquire))
    }

    /// Retargets this reference through another interface of the same
    /// registration, when declared.
    pub fn for_interface(&self, interface: &str) -> Option<ServiceReference> {
        let entry = self.entry.upgrade()?;
        entry.interfaces.iter().any(|i| i == interface).then(|| {
            ServiceReference {
                entry: self.entry.clone(),
                interface: interface.to_string(),
                id: self.id,
            }
        })
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.interface == other.interface
    }
}

impl Eq for ServiceReference {}

impl std::hash::Hash for ServiceReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.interface.hash(state);
    }
}

impl PartialOrd for ServiceReference {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceReference {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .ranking()
            .cmp(&self.ranking())
            .then(self.id.cmp(&other.id))
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("interface", &self.interface)
            .field("service_id", &self.id)
            .field("available", &self.is_available())
            .finish()
    }
}

/// Downcasts a [`ServiceObject`] to a concrete service type.
pub fn downcast_service<T: Send + Sync + 'static>(object: ServiceObject) -> Option<Arc<T>> {
    object.downcast::<T>().ok()
}
