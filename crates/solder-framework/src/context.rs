//! Per-bundle façade over the registry.
//!
//! A [`BundleContext`] ties every registry operation to its originating
//! bundle: registrations are owned by it, service use counts are kept per
//! bundle, and listener entries are evicted when the bundle stops.  The
//! context refuses to operate once its bundle has left the
//! starting/active/stopping window.

use std::sync::{Arc, Weak};

use solder_core::{Filter, Properties, ServiceError, ServiceResult};

use crate::bundle::Bundle;
use crate::event::ServiceListener;
use crate::framework::FrameworkShared;
use crate::registry::{
    InterfaceMap, ServiceObject, ServiceReference, ServiceRegistration, ServiceSource,
};

/// The per-bundle gateway to the framework.
#[derive(Clone)]
pub struct BundleContext {
    bundle: Arc<Bundle>,
    framework: Weak<FrameworkShared>,
}

impl BundleContext {
    pub(crate) fn new(bundle: Arc<Bundle>, framework: Weak<FrameworkShared>) -> Self {
        Self { bundle, framework }
    }

    /// The bundle this context belongs to.
    pub fn bundle(&self) -> &Arc<Bundle> {
        &self.bundle
    }

    fn shared(&self) -> ServiceResult<Arc<FrameworkShared>> {
        self.framework
            .upgrade()
            .ok_or_else(|| ServiceError::illegal_state("framework is gone"))
    }

    fn check_usable(&self) -> ServiceResult<()> {
        if self.bundle.is_usable() {
            Ok(())
        } else {
            Err(ServiceError::illegal_state(format!(
                "bundle '{}' is not started",
                self.bundle.symbolic_name()
            )))
        }
    }

    /// Publishes a service owned by this bundle.
    pub fn register_service(
        &self,
        interfaces: &[&str],
        source: ServiceSource,
        properties: Properties,
    ) -> ServiceResult<ServiceRegistration> {
        self.check_usable()?;
        let shared = self.shared()?;
        shared
            .registry
            .register(&self.bundle, interfaces, source, properties)
    }

    /// Publishes a single object under one interface — the common case.
    pub fn register_singleton(
        &self,
        interface: &str,
        object: ServiceObject,
        properties: Properties,
    ) -> ServiceResult<ServiceRegistration> {
        let mut map = InterfaceMap::new();
        map.insert(interface.to_string(), object);
        self.register_service(&[interface], ServiceSource::Object(map), properties)
    }

    /// All available references for `interface` matching `filter`, in rank
    /// order.
    pub fn get_service_references(
        &self,
        interface: &str,
        filter: Option<&str>,
    ) -> ServiceResult<Vec<ServiceReference>> {
        let shared = self.shared()?;
        let compiled = filter.map(Filter::parse).transpose()?;
        Ok(shared.registry.get_references(interface, compiled.as_ref()))
    }

    /// The best available reference for `interface`.
    pub fn get_service_reference(&self, interface: &str) -> Option<ServiceReference> {
        self.shared()
            .ok()
            .and_then(|shared| shared.registry.get_reference(interface))
    }

    /// Resolves `reference` on behalf of this bundle.
    pub fn get_service(&self, reference: &ServiceReference) -> ServiceResult<ServiceObject> {
        self.check_usable()?;
        let shared = self.shared()?;
        shared.registry.get_service(reference, &self.bundle)
    }

    /// Releases one use of `reference`; prototype scope needs the exact
    /// `instance`.
    pub fn unget_service(
        &self,
        reference: &ServiceReference,
        instance: Option<&ServiceObject>,
    ) -> bool {
        match self.shared() {
            Ok(shared) => shared
                .registry
                .unget_service(reference, &self.bundle, instance),
            Err(_) => false,
        }
    }

    /// Subscribes a service listener owned by this bundle.
    ///
    /// The filter string is compiled up front; a malformed expression fails
    /// here, not at dispatch time.
    pub fn add_service_listener(
        &self,
        filter: Option<&str>,
        listener: ServiceListener,
    ) -> ServiceResult<u64> {
        self.check_usable()?;
        let shared = self.shared()?;
        let compiled = filter.map(Filter::parse).transpose()?;
        Ok(shared.registry.add_listener(&self.bundle, compiled, listener))
    }

    /// Removes a listener by token.
    pub fn remove_service_listener(&self, token: u64) -> bool {
        self.shared()
            .map(|shared| shared.registry.remove_listener(token))
            .unwrap_or(false)
    }

    /// A consumer handle for prototype-scoped services.
    pub fn service_objects(&self, reference: ServiceReference) -> ServiceObjects {
        ServiceObjects {
            context: self.clone(),
            reference,
        }
    }
}

/// Consumer-side handle for a prototype-scoped service: every [`get`] yields
/// a fresh instance, every [`unget`] returns the exact instance.
///
/// [`get`]: ServiceObjects::get
/// [`unget`]: ServiceObjects::unget
pub struct ServiceObjects {
    context: BundleContext,
    reference: ServiceReference,
}

impl ServiceObjects {
    /// The underlying reference.
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Materialises a fresh instance.
    pub fn get(&self) -> ServiceResult<ServiceObject> {
        self.context.get_service(&self.reference)
    }

    /// Returns an instance previously obtained from [`get`](Self::get).
    pub fn unget(&self, instance: &ServiceObject) -> bool {
        self.context.unget_service(&self.reference, Some(instance))
    }
}
