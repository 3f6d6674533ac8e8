//! Unified error types for the Solder platform.
//!
//! Every layer of the platform reports failures through [`ServiceError`]; the
//! variants correspond one-to-one to the failure classes a caller can
//! meaningfully distinguish.  Errors raised by *user code* (factories,
//! listeners, lifecycle callbacks) are never allowed to escape to unrelated
//! callers — the framework converts them into error events and, where a caller
//! is waiting, into [`ServiceError::Factory`] / [`ServiceError::Security`].

use thiserror::Error;

/// Errors that can occur across the service registry and the component runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// A caller passed an argument the operation cannot work with — an empty
    /// interface list, a malformed filter expression, a missing property.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was invoked on an object in the wrong lifecycle state,
    /// e.g. a second `unregister` or a call on a disposed component.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The service reference points at a registration that is no longer
    /// available.
    #[error("service has been unregistered")]
    Unregistered,

    /// A user-supplied service factory returned nothing or failed.
    #[error("service factory error: {0}")]
    Factory(String),

    /// The bundle validation predicate rejected the bundle, or itself failed.
    #[error("bundle validation failed for '{0}'")]
    Security(String),

    /// Component metadata could not be parsed into a usable description.
    #[error("invalid component metadata: {0}")]
    Parser(String),

    /// The framework is stopping; the operation was abandoned.
    #[error("operation cancelled: framework is stopping")]
    Cancelled,
}

impl ServiceError {
    /// Creates an [`ServiceError::InvalidArgument`] from any message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates an [`ServiceError::IllegalState`] from any message.
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Creates a [`ServiceError::Factory`] from any message.
    pub fn factory(msg: impl Into<String>) -> Self {
        Self::Factory(msg.into())
    }

    /// Creates a [`ServiceError::Parser`] from any message.
    pub fn parser(msg: impl Into<String>) -> Self {
        Self::Parser(msg.into())
    }
}

/// Result type used throughout the platform.
pub type ServiceResult<T> = Result<T, ServiceError>;
