//! The component implementation surface.
//!
//! A bundle's shared library would normally export its component classes; in
//! this platform the loader is external, so implementations are supplied as
//! [`ComponentFactory`] objects registered with the runtime under the
//! manifest's implementation id.  The runtime calls
//! [`create`](ComponentFactory::create) when a satisfied component needs an
//! instance and drives the instance through its lifecycle callbacks.
//!
//! ```rust,ignore
//! struct GreeterFactory;
//!
//! impl ComponentFactory for GreeterFactory {
//!     fn create(&self) -> Option<Arc<dyn ComponentInstance>> {
//!         Some(Arc::new(Greeter::default()))
//!     }
//! }
//!
//! runtime.register_factory("demo::Greeter", Arc::new(GreeterFactory));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use solder_core::{Properties, ServiceResult};
use solder_framework::{Bundle, BundleContext, ServiceObject, ServiceReference};

/// One live component implementation object.
///
/// All callbacks run outside the platform's internal locks but under the
/// owning component configuration's transition lock — keep them brief and do
/// not resolve the component's own service from inside them.
pub trait ComponentInstance: Send + Sync {
    /// Called when the component enters `Active`.  Returning an error (or
    /// panicking) abandons the activation.
    fn activate(&self, _context: &ComponentContext) -> ServiceResult<()> {
        Ok(())
    }

    /// Called when the component leaves `Active`.
    fn deactivate(&self, _context: &ComponentContext) {}

    /// Called with the merged properties after a configuration update, when
    /// the component declares a `modified` callback.
    fn modified(&self, _context: &ComponentContext) -> ServiceResult<()> {
        Ok(())
    }

    /// Called when a dynamic reference binds a target.
    fn bind(&self, _reference: &str, _target: &ServiceReference) {}

    /// Called when a dynamic reference unbinds a target.
    fn unbind(&self, _reference: &str, _target: &ServiceReference) {}

    /// The object published under `interface` when this component provides a
    /// service.  Returning `None` for a declared interface fails the
    /// materialisation.
    fn service_object(&self, interface: &str) -> Option<ServiceObject>;
}

/// Produces [`ComponentInstance`]s; the stand-in for loading the
/// implementation class out of the bundle's library.
pub trait ComponentFactory: Send + Sync {
    /// Creates a fresh instance, or `None` when the implementation is
    /// unavailable.
    fn create(&self) -> Option<Arc<dyn ComponentInstance>>;
}

/// What an instance sees of its component during callbacks.
pub struct ComponentContext {
    properties: Arc<Properties>,
    bundle_context: BundleContext,
    bound: HashMap<String, Vec<ServiceReference>>,
}

impl ComponentContext {
    pub(crate) fn new(
        properties: Arc<Properties>,
        bundle_context: BundleContext,
        bound: HashMap<String, Vec<ServiceReference>>,
    ) -> Self {
        Self {
            properties,
            bundle_context,
            bound,
        }
    }

    /// The merged component properties: metadata defaults, configuration
    /// properties, `component.name` and `component.id`.
    pub fn properties(&self) -> &Arc<Properties> {
        &self.properties
    }

    /// The owning bundle.
    pub fn bundle(&self) -> &Arc<Bundle> {
        self.bundle_context.bundle()
    }

    /// The bound targets of a declared reference, best-ranked first.
    pub fn bound_references(&self, reference: &str) -> &[ServiceReference] {
        self.bound.get(reference).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolves the best bound target of `reference` to a service object.
    pub fn locate_service(&self, reference: &str) -> Option<ServiceObject> {
        let target = self.bound_references(reference).first()?;
        self.bundle_context.get_service(target).ok()
    }
}
