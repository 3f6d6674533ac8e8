//! The `ServiceComponentRuntime` surface.
//!
//! Introspection and coarse control over the components a framework hosts:
//! description DTOs, live configuration DTOs, and enable/disable returning
//! completion futures.

use std::sync::Arc;

use solder_core::ServiceError;
use solder_framework::{Bundle, Completion};

use crate::activator::DsShared;
use crate::dto::{ComponentConfigurationDto, ComponentDescriptionDto};
use crate::manager::ComponentManager;

/// Introspection and control over declarative components.
#[derive(Clone)]
pub struct ServiceComponentRuntime {
    shared: Arc<DsShared>,
}

impl ServiceComponentRuntime {
    pub(crate) fn new(shared: Arc<DsShared>) -> Self {
        Self { shared }
    }

    fn find(&self, description: &ComponentDescriptionDto) -> Option<Arc<ComponentManager>> {
        self.shared
            .components
            .find(description.bundle_id, &description.name)
    }

    /// Descriptions of every known component, optionally narrowed to one
    /// bundle.
    pub fn get_component_description_dtos(
        &self,
        bundle: Option<&Arc<Bundle>>,
    ) -> Vec<ComponentDescriptionDto> {
        self.shared
            .components
            .snapshot(bundle.map(|b| b.id()))
            .iter()
            .map(|manager| {
                ComponentDescriptionDto::from_metadata(manager.metadata(), manager.bundle().id())
            })
            .collect()
    }

    /// Live configuration snapshots for one description.
    pub fn get_component_configuration_dtos(
        &self,
        description: &ComponentDescriptionDto,
    ) -> Vec<ComponentConfigurationDto> {
        let Some(manager) = self.find(description) else {
            return Vec::new();
        };
        manager
            .configurations()
            .iter()
            .map(|configuration| ComponentConfigurationDto {
                id: configuration.id(),
                state: configuration.state(),
                properties: configuration.current_properties(),
                service_id: configuration.service_id(),
            })
            .collect()
    }

    /// Whether the component is enabled (and not knocked out by a failed
    /// activation).
    pub fn is_component_enabled(&self, description: &ComponentDescriptionDto) -> bool {
        self.find(description).is_some_and(|m| m.is_enabled())
    }

    /// Enables the component; completes when the activation work has run.
    pub fn enable_component(&self, description: &ComponentDescriptionDto) -> Completion<()> {
        match self.find(description) {
            Some(manager) => manager.enable(),
            None => Completion::ready(Err(ServiceError::invalid(format!(
                "unknown component '{}'",
                description.name
            )))),
        }
    }

    /// Disables the component; completes when every configuration has been
    /// disposed.
    pub fn disable_component(&self, description: &ComponentDescriptionDto) -> Completion<()> {
        match self.find(description) {
            Some(manager) => manager.disable(),
            None => Completion::ready(Err(ServiceError::invalid(format!(
                "unknown component '{}'",
                description.name
            )))),
        }
    }
}
