//! Factory types for user-supplied construction logic
//!
//! Factories are opaque to the planner: a factory registration is built by
//! invoking the callable, never by inspecting what it does. This module also
//! holds the runtime values behind `Lazy<T>` and `Func<T>` dependencies.

use crate::provider::{Injectable, Object, ServiceType};
use crate::scope::{Scope, WeakScope};
use crate::Result;
use once_cell::sync::OnceCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Boxed future returned by asynchronous factories
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased synchronous factory
pub type FactoryFn = Arc<dyn Fn(&Scope) -> Result<Object> + Send + Sync>;

/// Type-erased asynchronous factory
pub type AsyncFactoryFn = Arc<dyn Fn(Scope) -> BoxFuture<'static, Result<Object>> + Send + Sync>;

/// Erase a typed factory.
pub fn factory<T, F>(f: F) -> FactoryFn
where
    T: Injectable,
    F: Fn(&Scope) -> Result<T> + Send + Sync + 'static,
{
    Arc::new(move |scope: &Scope| f(scope).map(|value| Arc::new(value) as Object))
}

/// Erase a typed asynchronous factory.
pub fn async_factory<T, F, Fut>(f: F) -> AsyncFactoryFn
where
    T: Injectable,
    F: Fn(Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move |scope: Scope| {
        let fut = f(scope);
        Box::pin(async move { fut.await.map(|value| Arc::new(value) as Object) })
            as BoxFuture<'static, Result<Object>>
    })
}

// =============================================================================
// Deferred wrappers
// =============================================================================

/// Runtime value behind a `Lazy<T>` dependency.
///
/// The target is resolved on first access against the scope that created the
/// wrapper, then cached. Only a weak handle to the scope is kept, so a lazy
/// value never keeps a scope alive.
pub struct LazyService {
    scope: WeakScope,
    target: ServiceType,
    instance: OnceCell<Object>,
}

impl LazyService {
    pub(crate) fn new(scope: &Scope, target: ServiceType) -> Self {
        Self {
            scope: scope.downgrade(),
            target,
            instance: OnceCell::new(),
        }
    }

    /// The target service type.
    pub fn target(&self) -> &ServiceType {
        &self.target
    }

    /// Whether the target has been resolved.
    pub fn is_value_created(&self) -> bool {
        self.instance.get().is_some()
    }

    /// Resolve the target, creating it on first access.
    pub fn value(&self) -> Result<Object> {
        self.instance
            .get_or_try_init(|| {
                #[cfg(feature = "logging")]
                trace!(
                    target: "lamar",
                    service = %self.target,
                    "Lazy dependency resolving on first access"
                );

                self.scope.upgrade()?.get_instance(&self.target)
            })
            .cloned()
    }
}

/// Runtime value behind a `Func<T>` dependency.
///
/// Every call resolves the target again, honoring its lifetime.
pub struct ServiceFunc {
    scope: WeakScope,
    target: ServiceType,
}

impl ServiceFunc {
    pub(crate) fn new(scope: &Scope, target: ServiceType) -> Self {
        Self {
            scope: scope.downgrade(),
            target,
        }
    }

    pub fn target(&self) -> &ServiceType {
        &self.target
    }

    /// Resolve the target.
    pub fn call(&self) -> Result<Object> {
        self.scope.upgrade()?.get_instance(&self.target)
    }
}

/// Which deferred wrapper a dependency asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredKind {
    Lazy,
    Func,
}

impl DeferredKind {
    /// Classify a `Lazy<T>`/`Func<T>` service type.
    pub fn of(service_type: &ServiceType) -> Option<(DeferredKind, &ServiceType)> {
        match service_type {
            ServiceType::Lazy(target) => Some((DeferredKind::Lazy, target)),
            ServiceType::Func(target) => Some((DeferredKind::Func, target)),
            _ => None,
        }
    }

    /// Create the wrapper value for `target` bound to `scope`.
    pub(crate) fn wrap(&self, scope: &Scope, target: &ServiceType) -> Object {
        match self {
            DeferredKind::Lazy => Arc::new(LazyService::new(scope, target.clone())),
            DeferredKind::Func => Arc::new(ServiceFunc::new(scope, target.clone())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeferredKind::Lazy => "Lazy",
            DeferredKind::Func => "Func",
        }
    }
}
