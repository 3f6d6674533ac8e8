//! Parsed component metadata.
//!
//! The manifest parser proper lives outside the platform; what arrives here is
//! a JSON tree.  [`BundleManifest::from_value`] deserialises and validates it
//! into the typed description the Declarative Services runtime consumes.
//!
//! ```json
//! {
//!   "symbolic_name": "sample.bundle",
//!   "version": 1,
//!   "components": [{
//!     "name": "sample.component",
//!     "implementation": "sample::Impl",
//!     "service": { "interfaces": ["sample.Api"], "scope": "singleton" },
//!     "references": [{
//!       "name": "log", "interface": "sample.Log",
//!       "cardinality": "1..1", "policy": "dynamic", "policy-option": "greedy"
//!     }],
//!     "configuration-policy": "require",
//!     "configuration-pid": ["sample.pid"]
//!   }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ServiceError, ServiceResult};
use crate::filter::Filter;

/// The only manifest version this runtime understands.
pub const MANIFEST_VERSION: u32 = 1;

// ─── Enumerations ─────────────────────────────────────────────────────────────

/// How many instances a registration yields to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
    /// The registered object itself is shared by every consumer.
    #[default]
    Singleton,
    /// One instance per consuming bundle, produced by the factory.
    Bundle,
    /// A fresh instance per `get_service` call.
    Prototype,
}

impl ServiceScope {
    /// Canonical property value for this scope.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Singleton => crate::constants::SCOPE_SINGLETON,
            Self::Bundle => crate::constants::SCOPE_BUNDLE,
            Self::Prototype => crate::constants::SCOPE_PROTOTYPE,
        }
    }
}

/// How many target services a reference needs and accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceCardinality {
    /// At most one target; the component works without any.
    #[serde(rename = "0..1")]
    OptionalUnary,
    /// Exactly one target is required.
    #[default]
    #[serde(rename = "1..1")]
    MandatoryUnary,
    /// Every matching target is bound; none are required.
    #[serde(rename = "0..n")]
    OptionalMultiple,
    /// Every matching target is bound; at least one is required.
    #[serde(rename = "1..n")]
    MandatoryMultiple,
}

impl ReferenceCardinality {
    /// Minimum number of bound targets for the reference to be satisfied.
    pub fn min(self) -> usize {
        match self {
            Self::OptionalUnary | Self::OptionalMultiple => 0,
            Self::MandatoryUnary | Self::MandatoryMultiple => 1,
        }
    }

    /// Whether every matching target is bound rather than just the best one.
    pub fn is_multiple(self) -> bool {
        matches!(self, Self::OptionalMultiple | Self::MandatoryMultiple)
    }
}

/// Whether binding changes restart the component or flow through callbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
    /// Any binding change deactivates and reactivates the component.
    #[default]
    Static,
    /// Bind/unbind callbacks run while the component stays active.
    Dynamic,
}

/// Whether a better-ranked candidate displaces the current binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyOption {
    /// Keep the current binding until it goes away.
    #[default]
    Reluctant,
    /// Rebind whenever a higher-ranked candidate appears.
    Greedy,
}

/// How a component relates to Configuration Admin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationPolicy {
    /// Configuration objects are not consulted at all.
    #[default]
    Ignore,
    /// Configuration properties are merged in when present.
    Optional,
    /// The component stays unsatisfied until a configuration exists.
    Require,
}

// ─── Structures ───────────────────────────────────────────────────────────────

/// One declared dependency of a component on a service interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMetadata {
    /// Reference name, unique within the component.
    pub name: String,
    /// Target interface id.
    pub interface: String,
    /// Optional LDAP target filter narrowing the candidates.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    /// How many targets are needed and accepted.
    pub cardinality: ReferenceCardinality,
    #[serde(default)]
    /// Static or dynamic rebinding.
    pub policy: ReferencePolicy,
    #[serde(default, rename = "policy-option")]
    /// Reluctant or greedy candidate selection.
    pub policy_option: PolicyOption,
    /// Bind callback name, when the implementation wants one.
    #[serde(default)]
    pub bind: Option<String>,
    /// Unbind callback name.
    #[serde(default)]
    pub unbind: Option<String>,
}

/// The service a component publishes once satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    /// Interface ids the component is published under.
    pub interfaces: Vec<String>,
    /// Instance scope of the published service.
    #[serde(default)]
    pub scope: ServiceScope,
}

/// Parsed declarative description of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    /// Component name, unique within the bundle.
    pub name: String,
    /// Implementation id, resolved against the bundle's factories.
    pub implementation: String,
    /// Whether the component starts enabled. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Eager activation as soon as the component is satisfied.
    #[serde(default)]
    pub immediate: bool,
    /// Published service, when the component provides one.
    #[serde(default)]
    pub service: Option<ServiceMetadata>,
    /// Declared dependencies.
    #[serde(default)]
    pub references: Vec<ReferenceMetadata>,
    /// Activate callback name.
    #[serde(default)]
    pub activate: Option<String>,
    /// Deactivate callback name.
    #[serde(default)]
    pub deactivate: Option<String>,
    /// Modified callback name; its presence means configuration updates do
    /// not restart an active component.
    #[serde(default)]
    pub modified: Option<String>,
    /// Relationship with Configuration Admin.
    #[serde(default, rename = "configuration-policy")]
    pub configuration_policy: ConfigurationPolicy,
    /// PIDs this component listens to. Empty means the component name.
    #[serde(default, rename = "configuration-pid")]
    pub configuration_pids: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl ComponentMetadata {
    /// Whether the component publishes a service when satisfied.
    pub fn provides_service(&self) -> bool {
        self.service.is_some()
    }

    /// Activation policy: components without a service are always immediate.
    pub fn is_immediate(&self) -> bool {
        self.immediate || self.service.is_none()
    }

    /// PIDs to subscribe to, defaulting to the component name.
    pub fn effective_pids(&self) -> Vec<String> {
        if self.configuration_pids.is_empty() {
            vec![self.name.clone()]
        } else {
            self.configuration_pids.clone()
        }
    }

    fn validate(&self) -> ServiceResult<()> {
        if self.name.is_empty() {
            return Err(ServiceError::parser("component name must not be empty"));
        }
        if self.implementation.is_empty() {
            return Err(ServiceError::parser(format!(
                "component '{}' has no implementation id",
                self.name
            )));
        }
        if let Some(service) = &self.service
            && service.interfaces.is_empty()
        {
            return Err(ServiceError::parser(format!(
                "component '{}' declares a service with no interfaces",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for reference in &self.references {
            if reference.name.is_empty() || reference.interface.is_empty() {
                return Err(ServiceError::parser(format!(
                    "component '{}' has a reference without name or interface",
                    self.name
                )));
            }
            if !seen.insert(reference.name.as_str()) {
                return Err(ServiceError::parser(format!(
                    "component '{}' declares reference '{}' twice",
                    self.name, reference.name
                )));
            }
            if let Some(target) = &reference.target {
                Filter::parse(target).map_err(|e| {
                    ServiceError::parser(format!(
                        "component '{}' reference '{}': {e}",
                        self.name, reference.name
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Parsed metadata of one bundle: its identity plus component descriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Bundle symbolic name.
    pub symbolic_name: String,
    /// Manifest schema version; must be [`MANIFEST_VERSION`].
    #[serde(rename = "version")]
    pub manifest_version: u32,
    /// Component descriptions carried by the bundle.
    #[serde(default)]
    pub components: Vec<ComponentMetadata>,
}

impl BundleManifest {
    /// Deserialises and validates a manifest from its JSON form.
    pub fn from_value(value: Value) -> ServiceResult<Self> {
        let manifest: Self = serde_json::from_value(value)
            .map_err(|e| ServiceError::parser(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> ServiceResult<()> {
        if self.manifest_version != MANIFEST_VERSION {
            return Err(ServiceError::parser(format!(
                "unknown manifest version {} (supported: {MANIFEST_VERSION})",
                self.manifest_version
            )));
        }
        if self.symbolic_name.is_empty() {
            return Err(ServiceError::parser("bundle symbolic name must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for component in &self.components {
            component.validate()?;
            if !seen.insert(component.name.as_str()) {
                return Err(ServiceError::parser(format!(
                    "duplicate component name '{}'",
                    component.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(components: Value) -> Value {
        json!({"symbolic_name": "test.bundle", "version": 1, "components": components})
    }

    #[test]
    fn parses_full_component() {
        let parsed = BundleManifest::from_value(manifest(json!([{
            "name": "c1",
            "implementation": "impl::C1",
            "immediate": true,
            "service": {"interfaces": ["I1", "I2"], "scope": "prototype"},
            "references": [{
                "name": "log",
                "interface": "I.Log",
                "target": "(vendor=acme)",
                "cardinality": "0..n",
                "policy": "dynamic",
                "policy-option": "greedy"
            }],
            "configuration-policy": "require",
            "configuration-pid": ["pid.a", "pid.b"]
        }])))
        .unwrap();

        let component = &parsed.components[0];
        assert!(component.is_immediate());
        assert_eq!(component.service.as_ref().unwrap().scope, ServiceScope::Prototype);
        let reference = &component.references[0];
        assert_eq!(reference.cardinality, ReferenceCardinality::OptionalMultiple);
        assert_eq!(reference.cardinality.min(), 0);
        assert!(reference.cardinality.is_multiple());
        assert_eq!(reference.policy, ReferencePolicy::Dynamic);
        assert_eq!(reference.policy_option, PolicyOption::Greedy);
        assert_eq!(component.effective_pids(), vec!["pid.a", "pid.b"]);
    }

    #[test]
    fn defaults_match_declarative_services() {
        let parsed = BundleManifest::from_value(manifest(json!([{
            "name": "c1",
            "implementation": "impl::C1",
            "references": [{"name": "r", "interface": "I"}]
        }])))
        .unwrap();

        let component = &parsed.components[0];
        assert!(component.enabled);
        assert!(component.is_immediate(), "no service means immediate");
        assert_eq!(component.configuration_policy, ConfigurationPolicy::Ignore);
        assert_eq!(component.effective_pids(), vec!["c1"]);
        let reference = &component.references[0];
        assert_eq!(reference.cardinality, ReferenceCardinality::MandatoryUnary);
        assert_eq!(reference.policy, ReferencePolicy::Static);
        assert_eq!(reference.policy_option, PolicyOption::Reluctant);
    }

    #[test]
    fn unknown_version_is_a_parser_error() {
        let err = BundleManifest::from_value(
            json!({"symbolic_name": "b", "version": 2, "components": []}),
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::Parser(_)));
    }

    #[test]
    fn bad_target_filter_is_a_parser_error() {
        let err = BundleManifest::from_value(manifest(json!([{
            "name": "c1",
            "implementation": "impl::C1",
            "references": [{"name": "r", "interface": "I", "target": "(broken"}]
        }])))
        .unwrap_err();
        assert!(matches!(err, ServiceError::Parser(_)));
    }

    #[test]
    fn duplicate_reference_names_rejected() {
        let err = BundleManifest::from_value(manifest(json!([{
            "name": "c1",
            "implementation": "impl::C1",
            "references": [
                {"name": "r", "interface": "I"},
                {"name": "r", "interface": "J"}
            ]
        }])))
        .unwrap_err();
        assert!(matches!(err, ServiceError::Parser(_)));
    }
}
