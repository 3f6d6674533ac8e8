//! # solder-ds
//!
//! The Declarative Services runtime for the Solder platform.  Components are
//! described by parsed bundle manifests, wired to their service dependencies
//! through per-reference managers, driven through a five-state lifecycle,
//! and published back into the registry when satisfied.  Configuration Admin
//! feeds the runtime through a PID-keyed notifier.
//!
//! ```text
//! bundle start ─► manifests ─► ComponentManager ─► ComponentConfiguration
//!                                                   │  reference managers
//!     ConfigurationAdmin ─► ConfigurationNotifier ──┤  state machine
//!                                                   ▼
//!                                        ServiceRegistry (publish/resolve)
//! ```

pub mod activator;
pub mod cm;
pub mod component;
pub mod dto;
pub mod manager;
pub mod notifier;
pub mod registry;
pub mod runtime;

pub use activator::DsRuntime;
pub use cm::{Configuration, ConfigurationAdmin};
pub use component::{ComponentContext, ComponentFactory, ComponentInstance};
pub use dto::{ComponentConfigurationDto, ComponentDescriptionDto, ReferenceDto};
pub use manager::{ComponentManager, ComponentState};
pub use notifier::{
    ConfigurationEvent, ConfigurationEventKind, ConfigurationListener, ConfigurationNotifier,
};
pub use registry::ComponentRegistry;
pub use runtime::ServiceComponentRuntime;
