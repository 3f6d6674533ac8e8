//! # solder-core
//!
//! Foundation types for the Solder service platform: the case-variant
//! [`Properties`] map, compiled LDAP [`Filter`] expressions, the parsed
//! component [`metadata`] model, the platform-wide [`ServiceError`], and the
//! well-known property [`constants`].
//!
//! Everything here is passive data — the live machinery (registry, bundles,
//! component runtime) lives in `solder-framework` and `solder-ds`.

pub mod constants;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod properties;

pub use error::{ServiceError, ServiceResult};
pub use filter::Filter;
pub use metadata::{
    BundleManifest, ComponentMetadata, ConfigurationPolicy, PolicyOption, ReferenceCardinality,
    ReferenceMetadata, ReferencePolicy, ServiceMetadata, ServiceScope,
};
pub use properties::Properties;
