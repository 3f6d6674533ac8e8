//! Introspection snapshots exposed by the runtime surface.

use serde::Serialize;

use solder_core::metadata::{
    ComponentMetadata, ConfigurationPolicy, PolicyOption, ReferenceCardinality, ReferencePolicy,
};
use solder_core::Properties;

use crate::manager::ComponentState;

/// Static description of one component, as declared by its bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentDescriptionDto {
    /// Component name.
    pub name: String,
    /// Owning bundle id.
    pub bundle_id: u64,
    /// Implementation id.
    pub implementation: String,
    /// Interfaces published when satisfied; empty for service-less
    /// components.
    pub service_interfaces: Vec<String>,
    /// Scope of the published service, when one exists.
    pub scope: Option<String>,
    /// Eager activation.
    pub immediate: bool,
    /// Relationship with Configuration Admin.
    pub configuration_policy: ConfigurationPolicy,
    /// Consumed PIDs.
    pub configuration_pids: Vec<String>,
    /// Declared dependencies.
    pub references: Vec<ReferenceDto>,
}

/// Static description of one declared reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceDto {
    /// Reference name.
    pub name: String,
    /// Target interface.
    pub interface: String,
    /// Target filter, when declared.
    pub target: Option<String>,
    /// Cardinality.
    pub cardinality: ReferenceCardinality,
    /// Static or dynamic.
    pub policy: ReferencePolicy,
    /// Reluctant or greedy.
    pub policy_option: PolicyOption,
}

impl ComponentDescriptionDto {
    pub(crate) fn from_metadata(metadata: &ComponentMetadata, bundle_id: u64) -> Self {
        Self {
            name: metadata.name.clone(),
            bundle_id,
            implementation: metadata.implementation.clone(),
            service_interfaces: metadata
                .service
                .as_ref()
                .map(|s| s.interfaces.clone())
                .unwrap_or_default(),
            scope: metadata.service.as_ref().map(|s| s.scope.as_str().to_string()),
            immediate: metadata.is_immediate(),
            configuration_policy: metadata.configuration_policy,
            configuration_pids: metadata.effective_pids(),
            references: metadata
                .references
                .iter()
                .map(|r| ReferenceDto {
                    name: r.name.clone(),
                    interface: r.interface.clone(),
                    target: r.target.clone(),
                    cardinality: r.cardinality,
                    policy: r.policy,
                    policy_option: r.policy_option,
                })
                .collect(),
        }
    }
}

/// Snapshot of one live component configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentConfigurationDto {
    /// Configuration id, unique within the runtime.
    pub id: u64,
    /// Current state.
    pub state: ComponentState,
    /// Merged component properties.
    pub properties: Properties,
    /// Service id of the published registration, when published.
    pub service_id: Option<u64>,
}
