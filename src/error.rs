//! Error types for service resolution, planning and code generation

use crate::ServiceType;
use crate::validation::ValidationReport;
use thiserror::Error;

/// Errors that can occur while planning, compiling or resolving services
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// No registration exists or can be derived for the service type
    #[error("No service registrations exist or can be derived for {service_type}")]
    NotFound { service_type: ServiceType },

    /// The family exists but has no instance with the requested name
    #[error("No instance named '{name}' is registered for {service_type}")]
    NamedNotFound {
        service_type: ServiceType,
        name: String,
    },

    /// The family could not be satisfied (see the family diagnostic message)
    #[error("Cannot build {service_type}: {message}")]
    Unresolvable {
        service_type: ServiceType,
        message: String,
    },

    /// Circular dependency detected while planning
    #[error("Bi-directional dependency relationship detected: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// A singleton would capture a shorter-lived dependency
    #[error("Singleton {singleton} cannot depend on scoped service {dependency}")]
    CaptiveDependency {
        singleton: String,
        dependency: String,
    },

    /// Factory or constructor failed to create service
    #[error("Failed to create service {service_type}: {reason}")]
    CreationFailed {
        service_type: String,
        reason: String,
    },

    /// Operation attempted on a scope that was already disposed
    #[error("Scope {scope} has been disposed")]
    ScopeDisposed { scope: u64 },

    /// Static type loading could not find the pre-built type
    #[error("Expected pre-built type '{type_name}' is missing from the application assembly")]
    ExpectedTypeMissing { type_name: String },

    /// Generated code could not be arranged or compiled
    #[error("Failed to compile generated type '{type_name}': {message}\n{source_code}")]
    CodeGeneration {
        type_name: String,
        message: String,
        source_code: String,
    },

    /// Aggregated configuration problems
    #[error("{0}")]
    InvalidConfiguration(ValidationReport),

    /// The build plan contains asynchronous steps
    #[error("{service_type} requires asynchronous construction, use the async resolution API")]
    AsyncResolutionRequired { service_type: ServiceType },

    /// No value was injected into the scope for an injectable service
    #[error("No value has been injected into this scope for {service_type}")]
    NotInjected { service_type: ServiceType },

    /// A value did not have the expected concrete type
    #[error("Expected a value of type {expected}")]
    TypeMismatch { expected: &'static str },

    /// Generated source could not be persisted
    #[error("Unable to write generated source to {path}: {reason}")]
    SourceWrite { path: String, reason: String },

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

impl DiError {
    /// Create a NotFound error for a service type
    #[inline]
    pub fn not_found(service_type: &ServiceType) -> Self {
        Self::NotFound {
            service_type: service_type.clone(),
        }
    }

    /// Create a CreationFailed error
    #[inline]
    pub fn creation_failed(service_type: impl ToString, reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            service_type: service_type.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a TypeMismatch error for a Rust type
    #[inline]
    pub fn type_mismatch<T: ?Sized + 'static>() -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a CircularDependency error from the members of the cycle
    #[inline]
    pub fn circular(cycle: Vec<String>) -> Self {
        Self::CircularDependency { cycle }
    }

    /// Whether this error only signals a missing registration
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NamedNotFound { .. })
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
