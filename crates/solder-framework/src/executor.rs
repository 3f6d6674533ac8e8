//! The async work service.
//!
//! Deferred work — component activation, configuration fan-out — is posted
//! here as nullary work items.  Two executors are always reachable: a
//! fallback that runs each item on its own thread, and any user executor
//! registered in the service registry under
//! [`WORK_EXECUTOR_INTERFACE`](solder_core::constants::WORK_EXECUTOR_INTERFACE).
//!
//! The choice is re-evaluated on **every** post — there is no cached
//! executor.  Unregistering the user executor therefore diverts the very
//! next post to the fallback, even in the middle of concurrent bundle
//! operations.

use std::sync::Arc;

use tracing::debug;

use solder_core::constants::WORK_EXECUTOR_INTERFACE;

use crate::bundle::Bundle;
use crate::registry::{ServiceRegistry, ServiceSource};

/// A unit of deferred work.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// Something that can schedule work items.
pub trait WorkExecutor: Send + Sync {
    /// Accepts `task` and schedules it for execution.
    fn post(&self, task: WorkItem);
}

/// The concrete object a user registers to take over work scheduling.
///
/// Registered as a plain service under `WORK_EXECUTOR_INTERFACE`; the work
/// service downcasts to this type when delegating.
pub struct ExecutorHandle(pub Arc<dyn WorkExecutor>);

impl ExecutorHandle {
    /// Wraps an executor into its registerable service form.
    pub fn into_source(executor: Arc<dyn WorkExecutor>) -> ServiceSource {
        let mut map = crate::registry::InterfaceMap::new();
        map.insert(
            WORK_EXECUTOR_INTERFACE.to_string(),
            Arc::new(ExecutorHandle(executor)) as crate::registry::ServiceObject,
        );
        ServiceSource::Object(map)
    }
}

/// Fallback executor: one detached thread per task.
#[derive(Default)]
pub struct ThreadExecutor;

impl WorkExecutor for ThreadExecutor {
    fn post(&self, task: WorkItem) {
        let result = std::thread::Builder::new()
            .name("solder-work".into())
            .spawn(task);
        if let Err(error) = result {
            debug!(%error, "failed to spawn work thread, task dropped");
        }
    }
}

/// Posting surface used throughout the platform.
pub struct AsyncWorkService {
    registry: ServiceRegistry,
    host: Arc<Bundle>,
    fallback: ThreadExecutor,
}

impl AsyncWorkService {
    /// Creates the service; `host` is the framework bundle used when
    /// resolving a user executor from the registry.
    pub fn new(registry: ServiceRegistry, host: Arc<Bundle>) -> Self {
        Self {
            registry,
            host,
            fallback: ThreadExecutor,
        }
    }

    /// Schedules `task` on the current highest-ranked user executor, or on
    /// the fallback when none is registered (or the registered service is
    /// not an [`ExecutorHandle`]).
    pub fn post(&self, task: WorkItem) {
        if let Some(reference) = self.registry.get_reference(WORK_EXECUTOR_INTERFACE) {
            if let Ok(object) = self.registry.get_service(&reference, &self.host) {
                let delegated = object
                    .downcast_ref::<ExecutorHandle>()
                    .map(|handle| Arc::clone(&handle.0));
                self.registry.unget_service(&reference, &self.host, None);
                if let Some(executor) = delegated {
                    executor.post(task);
                    return;
                }
            }
        }
        self.fallback.post(task);
    }
}
