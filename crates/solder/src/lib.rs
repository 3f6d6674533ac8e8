//! # Solder
//!
//! A dynamic in-process service platform: independently installable bundles
//! publish and consume ranked services at runtime, and declaratively
//! described components are wired to their dependencies, activated when
//! satisfied, and withdrawn when their world changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐      ┌──────────────────┐      ┌──────────────────────┐
//! │ Framework │─────▶│  ServiceRegistry │◀─────│  DsRuntime           │
//! │ (bundles) │      │  ranked buckets, │      │  component managers, │
//! └───────────┘      │  listener set,   │      │  reference wiring,   │
//!                    │  scope caches    │      │  Configuration Admin │
//!                    └──────────────────┘      └──────────────────────┘
//! ```
//!
//! - **solder-core** — properties, filters, metadata, errors
//! - **solder-framework** — bundles, registry, work service, framework handle
//! - **solder-ds** — the declarative component runtime
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use solder::prelude::*;
//!
//! let framework = Framework::builder().build();
//! let ds = DsRuntime::attach(&framework);
//! ds.register_factory("demo::Greeter", Arc::new(GreeterFactory));
//!
//! let manifest = BundleManifest::from_value(manifest_json)?;
//! let bundle = framework.install_bundle("demo", Some(manifest))?;
//! framework.start_bundle(&bundle)?;
//!
//! let reference = framework.registry().get_reference("demo.Greeter").unwrap();
//! let service = framework.registry().get_service(&reference, &bundle)?;
//! ```

pub use solder_core as core;
pub use solder_ds as ds;
pub use solder_framework as framework;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use solder::prelude::*;
/// ```
pub mod prelude {
    // Framework - main entry point
    pub use solder_framework::{
        Bundle, BundleContext, BundleState, Framework, ServiceReference, ServiceRegistration,
        ServiceRegistry, ServiceSource,
    };

    // Futures returned by component and configuration operations
    pub use solder_framework::{Completion, Promise};

    // Declarative services runtime
    pub use solder_ds::{
        ComponentContext, ComponentFactory, ComponentInstance, ComponentState,
        ConfigurationAdmin, DsRuntime, ServiceComponentRuntime,
    };

    // Foundation types
    pub use solder_core::{
        BundleManifest, Filter, Properties, ServiceError, ServiceResult, ServiceScope,
    };
}
