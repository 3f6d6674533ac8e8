//! The component registry: bundle → component managers.
//!
//! Enumeration is snapshot-based so concurrent enable/disable (and bundle
//! teardown) never invalidate an in-flight iteration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::manager::ComponentManager;

/// Maps owning bundles to their component managers.
#[derive(Default)]
pub struct ComponentRegistry {
    managers: RwLock<HashMap<u64, Vec<Arc<ComponentManager>>>>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `manager` under its bundle.
    pub(crate) fn insert(&self, manager: Arc<ComponentManager>) {
        self.managers
            .write()
            .entry(manager.bundle().id())
            .or_default()
            .push(manager);
    }

    /// Removes and returns everything a bundle owned.
    pub(crate) fn remove_bundle(&self, bundle_id: u64) -> Vec<Arc<ComponentManager>> {
        self.managers.write().remove(&bundle_id).unwrap_or_default()
    }

    /// Snapshot of the managers, optionally narrowed to one bundle.
    pub fn snapshot(&self, bundle_id: Option<u64>) -> Vec<Arc<ComponentManager>> {
        let managers = self.managers.read();
        match bundle_id {
            Some(id) => managers.get(&id).cloned().unwrap_or_default(),
            None => managers.values().flatten().cloned().collect(),
        }
    }

    /// Finds one manager by bundle and component name.
    pub fn find(&self, bundle_id: u64, name: &str) -> Option<Arc<ComponentManager>> {
        self.managers
            .read()
            .get(&bundle_id)?
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }
}
