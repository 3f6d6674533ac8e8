//! Well-known property keys and values.
//!
//! Property lookups are case-insensitive, so the casing here is only the
//! canonical spelling used when the framework itself sets a property.

/// Interface names a registration was published under. Set by the registry;
/// read-only for user code.
pub const OBJECT_CLASS: &str = "objectClass";

/// The unique id of a registration. Set by the registry; read-only for user
/// code.
pub const SERVICE_ID: &str = "service.id";

/// Signed integer ranking; higher ranks sort earlier. Defaults to `0`.
pub const SERVICE_RANKING: &str = "service.ranking";

/// One of [`SCOPE_SINGLETON`], [`SCOPE_BUNDLE`], [`SCOPE_PROTOTYPE`]. Set by
/// the registry; read-only for user code.
pub const SERVICE_SCOPE: &str = "service.scope";

/// Persistent identifier binding a service to its configuration.
pub const SERVICE_PID: &str = "service.pid";

/// The registered object itself is handed to every consumer.
pub const SCOPE_SINGLETON: &str = "singleton";

/// One instance is materialised per consuming bundle.
pub const SCOPE_BUNDLE: &str = "bundle";

/// A fresh instance is materialised per `get_service` call.
pub const SCOPE_PROTOTYPE: &str = "prototype";

/// Name of the declarative component a service was published by.
pub const COMPONENT_NAME: &str = "component.name";

/// Id of the component configuration a service was published by.
pub const COMPONENT_ID: &str = "component.id";

/// Framework construction option carrying the bundle validation predicate.
pub const FRAMEWORK_BUNDLE_VALIDATION_FUNC: &str = "framework.bundle.validation.func";

/// Interface name under which user work executors are registered.
pub const WORK_EXECUTOR_INTERFACE: &str = "solder.executor.WorkExecutor";
