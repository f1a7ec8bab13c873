//! # Lamar - Service Location and Dependency Injection for Rust
//!
//! A dependency injection container that turns registrations into a service
//! graph and compiles a resolver for every service it builds.
//!
//! ## Features
//!
//! - **Service graph** - Registrations are grouped into families, one per service type
//! - **Family policies** - Concrete types, arrays, lazies, funcs and closed generics
//!   resolve without explicit registration
//! - **Compiled resolvers** - Every instance gets a generated type whose source can be
//!   inspected, plus a closure pipeline that runs it
//! - **Lifetimes** - Singleton, scoped and transient, with captive dependency checks
//! - **Scopes** - Per-scope caches and reverse-order disposal
//! - **Diagnostics** - `what_do_i_have`, `how_do_i_build` and configuration validation
//! - **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use lamar::{Container, Service, ServiceRegistry};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! impl Service for Database {
//!     type Dependencies = ();
//!
//!     fn create(_: ()) -> Self {
//!         Database { url: "postgres://localhost".into() }
//!     }
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! impl Service for UserService {
//!     type Dependencies = (Arc<Database>,);
//!
//!     fn create((db,): Self::Dependencies) -> Self {
//!         UserService { db }
//!     }
//! }
//!
//! let mut registry = ServiceRegistry::new();
//! registry.for_service::<Database>().use_type(Database::descriptor()).singleton();
//! registry.for_service::<UserService>().use_type(UserService::descriptor());
//!
//! let container = Container::new(registry);
//! let users = container.get::<UserService>().unwrap();
//! let db = container.get::<Database>().unwrap();
//!
//! // Singletons are shared with every consumer
//! assert!(Arc::ptr_eq(&users.db, &db));
//! assert_eq!(db.url, "postgres://localhost");
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use lamar::{Container, ServiceRegistry};
//! use std::sync::Arc;
//!
//! struct RequestContext;
//!
//! let mut registry = ServiceRegistry::new();
//! registry.for_type("IRequest").use_value(RequestContext).scoped();
//!
//! let container = Container::new(registry);
//! let request = container.create_scope().unwrap();
//!
//! let a = request.get_instance(&"IRequest".into()).unwrap();
//! let b = request.get_instance(&"IRequest".into()).unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//!
//! request.dispose();
//! ```

pub mod codegen;
mod container;
mod descriptor;
mod error;
mod factory;
mod frames;
mod graph;
pub mod instance;
#[cfg(feature = "logging")]
pub mod logging;
mod model;
mod planning;
mod policies;
mod provider;
mod registry;
mod resolver;
mod scope;
mod storage;
mod validation;

pub use codegen::{GenerationRules, PrebuiltAssembly, PrebuiltBuild, TypeLoadMode};
pub use container::Container;
pub use descriptor::{
    Arguments, ConstructFn, Constructed, ConstructorDescriptor, Dependency, DependencyList,
    DisposeFn, GenericTemplate, Inject, Many, Parameter, Service, SetterDescriptor, SetterFn,
    TemplateFn, TypeDescriptor,
};
pub use error::{DiError, Result};
pub use factory::{
    AsyncFactoryFn, BoxFuture, DeferredKind, FactoryFn, LazyService, ServiceFunc, async_factory,
    factory,
};
pub use graph::{FamilySource, ServiceFamily, ServiceGraph};
pub use instance::{EnumerableKind, Instance, InstanceId, InstanceKind, InstancePlan};
pub use model::{ContainerModel, FamilyModel, InstanceRef};
pub use policies::{
    CloseGenericFamilyPolicy, ConcreteTypePolicy, DeferredPolicy, EmptyFamilyPolicy,
    EnumerablePolicy, FamilyPolicy,
};
pub use provider::{
    Dispose, GenericKey, Injectable, Lifetime, Object, ServiceType, downcast, object,
};
pub use registry::{
    DecoratorPolicy, GenericExpression, GenericRegistration, ImplementationSource,
    InlineDependency, OpenGenericDescriptor, Registration, ServiceDescriptor, ServiceExpression,
    ServiceRegistry, SetterPolicy, TypeCatalog,
};
pub use resolver::{Resolver, ResolverStrategy};
pub use scope::{Scope, WeakScope};
pub use storage::{DisposalTracker, InstanceCache};
pub use validation::{ConfigurationProblem, ValidationReport};

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Container, DiError, Inject, Injectable, Lifetime, Many, Object, Result, Scope, Service,
        ServiceRegistry, ServiceType, TypeDescriptor, async_factory, factory,
    };
    pub use std::sync::Arc;
}
