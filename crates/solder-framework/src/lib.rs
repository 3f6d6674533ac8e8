//! # solder-framework
//!
//! The live core of the Solder service platform: the ranked, event-emitting
//! [`registry`], the [`bundle`] model with its per-bundle [`context`], the
//! pluggable async work service in [`executor`], the promise/future pair in
//! [`future`], and the [`framework`] handle tying one platform instance
//! together.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   install/start    ┌──────────────────┐
//! │ Framework │ ─────────────────► │     Bundles      │
//! └─────┬─────┘                    └────────┬─────────┘
//!       │ owns                              │ BundleContext
//!       ▼                                   ▼
//! ┌───────────────────────────────────────────────────┐
//! │ ServiceRegistry — ranked buckets, listener set,   │
//! │ singleton/bundle/prototype scope caches           │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Event dispatch is always snapshot-then-invoke: user callbacks never run
//! under an internal lock.

pub mod bundle;
pub mod context;
pub mod event;
pub mod executor;
pub mod framework;
pub mod future;
pub mod logging;
pub mod registry;

pub use bundle::{Bundle, BundleState};
pub use context::{BundleContext, ServiceObjects};
pub use event::{
    BundleEvent, BundleEventKind, BundleListener, EventHub, FrameworkEvent, FrameworkEventKind,
    FrameworkListener, ServiceEvent, ServiceEventKind, ServiceListener,
};
pub use executor::{AsyncWorkService, ExecutorHandle, ThreadExecutor, WorkExecutor, WorkItem};
pub use framework::{Framework, FrameworkBuilder, ValidationFn};
pub use future::{Completion, Promise, channel};
pub use registry::{
    InterfaceMap, ServiceFactory, ServiceObject, ServiceReference, ServiceRegistration,
    ServiceRegistry, ServiceSource, downcast_service,
};
