//! Scopes
//!
//! A [`Scope`] is a resolution context. The root scope belongs to the
//! container and caches singletons; every nested scope caches its own scoped
//! instances and tracks what it must dispose, while sharing the root's
//! singletons.
//!
//! Scopes move one way, from active to disposed. Once disposed, every
//! resolution against the scope fails with [`DiError::ScopeDisposed`].

use crate::codegen::GenerationRules;
use crate::descriptor::DisposeFn;
use crate::graph::ServiceGraph;
use crate::instance::{Instance, InstanceId};
use crate::provider::{Injectable, Object, ServiceType, downcast};
use crate::registry::ServiceRegistry;
use crate::resolver;
use crate::storage::{DisposalTracker, InstanceCache};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Configuration shared by every scope of one container.
pub(crate) struct ContainerState {
    graph: RwLock<Arc<ServiceGraph>>,
    registry: Mutex<ServiceRegistry>,
    rules: GenerationRules,
}

impl ContainerState {
    pub(crate) fn new(registry: ServiceRegistry, rules: GenerationRules) -> Self {
        let graph = ServiceGraph::build(registry.clone(), rules.clone());
        Self {
            graph: RwLock::new(Arc::new(graph)),
            registry: Mutex::new(registry),
            rules,
        }
    }

    /// The current graph. The lock is released before returning.
    #[inline]
    pub(crate) fn graph(&self) -> Arc<ServiceGraph> {
        Arc::clone(&self.graph.read())
    }

    pub(crate) fn rules(&self) -> &GenerationRules {
        &self.rules
    }

    /// Amend the registrations and swap in a graph built from them.
    ///
    /// Readers keep whichever graph they already hold.
    pub(crate) fn reconfigure<F>(&self, configure: F) -> Arc<ServiceGraph>
    where
        F: FnOnce(&mut ServiceRegistry),
    {
        let mut registry = self.registry.lock();
        configure(&mut registry);
        let graph = Arc::new(ServiceGraph::build(registry.clone(), self.rules.clone()));
        *self.graph.write() = Arc::clone(&graph);
        graph
    }
}

pub(crate) struct ScopeInner {
    id: u64,
    state: Arc<ContainerState>,
    root: Option<Scope>,
    parent: Option<WeakScope>,
    depth: u32,
    cache: InstanceCache,
    disposables: DisposalTracker,
    injected: DashMap<ServiceType, Object, RandomState>,
    disposed: AtomicBool,
}

impl ScopeInner {
    fn new(state: Arc<ContainerState>, root: Option<Scope>, parent: Option<WeakScope>, depth: u32) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            state,
            root,
            parent,
            depth,
            cache: InstanceCache::new(),
            disposables: DisposalTracker::new(),
            injected: DashMap::with_hasher_and_shard_amount(RandomState::new(), 8),
            disposed: AtomicBool::new(false),
        }
    }

    fn dispose(&self) -> usize {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let count = self.disposables.dispose_all();
        self.cache.clear();
        self.injected.clear();

        #[cfg(feature = "logging")]
        debug!(
            target: "lamar",
            scope_id = self.id,
            depth = self.depth,
            disposed = count,
            "Disposed scope"
        );

        count
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A resolution context with its own scoped cache and disposal list.
///
/// Cloning a scope yields another handle to the same context.
///
/// # Examples
///
/// ```rust
/// use lamar::{Container, ServiceRegistry, TypeDescriptor};
///
/// struct Session;
///
/// let mut registry = ServiceRegistry::new();
/// registry
///     .for_type("Session")
///     .use_type(TypeDescriptor::concrete("Session".into()).constructor(vec![], |_| Ok(Session)))
///     .scoped();
///
/// let container = Container::new(registry);
/// let request = container.create_scope().unwrap();
///
/// let a = request.get_instance(&"Session".into()).unwrap();
/// let b = request.get_instance(&"Session".into()).unwrap();
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
///
/// let root = container.get_instance(&"Session".into()).unwrap();
/// assert!(!std::sync::Arc::ptr_eq(&a, &root));
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new_root(state: Arc<ContainerState>) -> Self {
        let scope = Self {
            inner: Arc::new(ScopeInner::new(state, None, None, 0)),
        };

        #[cfg(feature = "logging")]
        debug!(target: "lamar", scope_id = scope.id(), "Created root scope");

        scope
    }

    /// A root scope over an empty registry.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::new_root(Arc::new(ContainerState::new(
            ServiceRegistry::new(),
            GenerationRules::default(),
        )))
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Nesting depth, 0 for the root.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.inner.root.is_none()
    }

    /// The root scope, which caches singletons.
    #[inline]
    pub fn root(&self) -> Scope {
        self.inner.root.clone().unwrap_or_else(|| self.clone())
    }

    /// The scope this one was created from, while it is still alive.
    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.as_ref().and_then(WeakScope::try_upgrade)
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope {
            inner: Arc::downgrade(&self.inner),
            id: self.inner.id,
        }
    }

    /// The service graph currently in effect.
    #[inline]
    pub fn graph(&self) -> Arc<ServiceGraph> {
        self.inner.state.graph()
    }

    pub(crate) fn state(&self) -> &Arc<ContainerState> {
        &self.inner.state
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(DiError::ScopeDisposed { scope: self.id() });
        }
        Ok(())
    }

    /// Fail when the scope was disposed while a value was being built for
    /// it. Anything cached in the meantime is dropped; tracked values were
    /// already disposed by the closed tracker.
    pub(crate) fn ensure_still_active(&self) -> Result<()> {
        if self.is_disposed() {
            self.inner.cache.clear();
            return Err(DiError::ScopeDisposed { scope: self.id() });
        }
        Ok(())
    }

    /// Create a nested scope sharing this scope's root.
    pub fn create_scope(&self) -> Result<Scope> {
        self.ensure_active()?;
        let scope = Self {
            inner: Arc::new(ScopeInner::new(
                Arc::clone(&self.inner.state),
                Some(self.root()),
                Some(self.downgrade()),
                self.inner.depth + 1,
            )),
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "lamar",
            scope_id = scope.id(),
            parent_scope_id = self.id(),
            depth = scope.depth(),
            "Created nested scope"
        );

        Ok(scope)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    fn default_instance(&self, graph: &ServiceGraph, service_type: &ServiceType) -> Result<Arc<Instance>> {
        let family = graph.resolve_family(service_type);
        family
            .default_instance()
            .cloned()
            .ok_or_else(|| family.missing_error())
    }

    /// Resolve the default instance of `service_type`.
    pub fn get_instance(&self, service_type: &ServiceType) -> Result<Object> {
        self.ensure_active()?;

        #[cfg(feature = "logging")]
        trace!(target: "lamar", service = %service_type, scope_id = self.id(), "Resolving service");

        let graph = self.graph();
        let instance = self.default_instance(&graph, service_type)?;
        graph.resolver_for(&instance)?.resolve(self)
    }

    /// Resolve the instance of `service_type` registered under `name`.
    pub fn get_named(&self, service_type: &ServiceType, name: &str) -> Result<Object> {
        self.ensure_active()?;
        let graph = self.graph();
        let family = graph.resolve_family(service_type);
        if family.is_empty() {
            return Err(family.missing_error());
        }
        let instance = family.find_named(name).cloned().ok_or_else(|| DiError::NamedNotFound {
            service_type: service_type.clone(),
            name: name.to_string(),
        })?;
        graph.resolver_for(&instance)?.resolve(self)
    }

    /// Like [`get_instance`](Self::get_instance), `None` when nothing is
    /// registered or derivable.
    pub fn try_get_instance(&self, service_type: &ServiceType) -> Result<Option<Object>> {
        self.ensure_active()?;
        let graph = self.graph();
        let family = graph.resolve_family(service_type);
        match family.default_instance() {
            Some(instance) => graph.resolver_for(instance)?.resolve(self).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve every instance of `service_type` in registration order.
    pub fn get_all_instances(&self, service_type: &ServiceType) -> Result<Vec<Object>> {
        self.ensure_active()?;
        let graph = self.graph();
        graph
            .find_all(service_type)
            .iter()
            .map(|instance| graph.resolver_for(instance)?.resolve(self))
            .collect()
    }

    /// Resolve the default instance, awaiting asynchronous factories.
    pub async fn get_instance_async(&self, service_type: &ServiceType) -> Result<Object> {
        self.ensure_active()?;
        let graph = self.graph();
        let instance = self.default_instance(&graph, service_type)?;
        let resolver = graph.resolver_for(&instance)?;
        drop(graph);
        resolver.resolve_async(self).await
    }

    /// Resolve the Rust type `T` registered under [`ServiceType::of`].
    pub fn get<T: Injectable>(&self) -> Result<Arc<T>> {
        downcast(self.get_instance(&ServiceType::of::<T>())?)
    }

    /// Resolve `service_type` and downcast the value to `T`.
    pub fn get_as<T: Injectable>(&self, service_type: &ServiceType) -> Result<Arc<T>> {
        downcast(self.get_instance(service_type)?)
    }

    /// Asynchronous [`get_as`](Self::get_as).
    pub async fn get_as_async<T: Injectable>(&self, service_type: &ServiceType) -> Result<Arc<T>> {
        downcast(self.get_instance_async(service_type).await?)
    }

    /// Resolve one specific instance by identity.
    pub fn resolve_instance(&self, id: &InstanceId) -> Result<Object> {
        self.ensure_active()?;
        let graph = self.graph();
        let instance = graph
            .instance(id)
            .ok_or_else(|| DiError::Internal(format!("unknown instance '{}'", id)))?;
        graph.resolver_for(&instance)?.resolve(self)
    }

    /// Asynchronous [`resolve_instance`](Self::resolve_instance).
    pub async fn resolve_instance_async(&self, id: &InstanceId) -> Result<Object> {
        self.ensure_active()?;
        let graph = self.graph();
        let instance = graph
            .instance(id)
            .ok_or_else(|| DiError::Internal(format!("unknown instance '{}'", id)))?;
        let resolver = graph.resolver_for(&instance)?;
        drop(graph);
        resolver.resolve_async(self).await
    }

    /// Build the default instance by walking its plan directly, without
    /// compiling a resolver. Lifetime caching is shared with compiled
    /// resolvers.
    pub fn quick_resolve(&self, service_type: &ServiceType) -> Result<Object> {
        self.ensure_active()?;
        let graph = self.graph();
        let instance = self.default_instance(&graph, service_type)?;
        resolver::interpret(&graph, &instance, self)
    }

    // =========================================================================
    // Injected services
    // =========================================================================

    /// Supply the value of an injectable service for this scope.
    pub fn inject_object(&self, service_type: ServiceType, value: Object) -> Result<()> {
        self.ensure_active()?;

        #[cfg(feature = "logging")]
        trace!(target: "lamar", service = %service_type, scope_id = self.id(), "Injected value into scope");

        self.inner.injected.insert(service_type, value);
        Ok(())
    }

    /// Supply `value` for the service type of `T`.
    pub fn inject<T: Injectable>(&self, value: T) -> Result<()> {
        self.inject_object(ServiceType::of::<T>(), Arc::new(value))
    }

    pub(crate) fn injected_value(&self, service_type: &ServiceType) -> Result<Object> {
        self.inner
            .injected
            .get(service_type)
            .map(|value| Arc::clone(value.value()))
            .ok_or_else(|| DiError::NotInjected {
                service_type: service_type.clone(),
            })
    }

    // =========================================================================
    // Caching and disposal
    // =========================================================================

    #[inline]
    pub(crate) fn cache(&self) -> &InstanceCache {
        &self.inner.cache
    }

    /// Number of instances cached by this scope.
    pub fn cached_count(&self) -> usize {
        self.inner.cache.len()
    }

    /// Number of values awaiting disposal.
    pub fn disposable_count(&self) -> usize {
        self.inner.disposables.len()
    }

    #[inline]
    pub(crate) fn track(&self, value: Object, dispose: DisposeFn) {
        self.inner.disposables.track(value, dispose);
    }

    /// Track `value` when `instance` is owned and disposable.
    #[inline]
    pub(crate) fn track_instance(&self, instance: &Instance, value: &Object) {
        if let Some(dispose) = instance.dispose_fn() {
            self.track(Arc::clone(value), Arc::clone(dispose));
        }
    }

    /// Dispose every tracked value in reverse construction order and drop
    /// the cache. Later calls do nothing.
    ///
    /// Returns the number of values disposed.
    pub fn dispose(&self) -> usize {
        self.inner.dispose()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("depth", &self.inner.depth)
            .field("cached", &self.inner.cache.len())
            .field("disposables", &self.inner.disposables.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.inner.id)
    }
}

/// A non-owning scope handle.
#[derive(Clone)]
pub struct WeakScope {
    inner: Weak<ScopeInner>,
    id: u64,
}

impl WeakScope {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The scope, if it is still alive and active.
    pub fn try_upgrade(&self) -> Option<Scope> {
        self.inner
            .upgrade()
            .map(|inner| Scope { inner })
            .filter(|scope| !scope.is_disposed())
    }

    /// Upgrade or report the scope as disposed.
    pub(crate) fn upgrade(&self) -> Result<Scope> {
        self.try_upgrade().ok_or(DiError::ScopeDisposed { scope: self.id })
    }
}

impl std::fmt::Debug for WeakScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeakScope(scope-{})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TypeDescriptor;
    use crate::provider::{Dispose, Lifetime};
    use std::sync::Mutex as StdMutex;

    struct Widget;

    struct Tracked {
        name: &'static str,
        log: Arc<StdMutex<Vec<&'static str>>>,
    }

    impl Dispose for Tracked {
        fn dispose(&self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    fn widget_scope(lifetime: Lifetime) -> Scope {
        let mut registry = ServiceRegistry::new();
        registry
            .for_type("IWidget")
            .use_type(TypeDescriptor::concrete("AWidget".into()).constructor(vec![], |_| Ok(Widget)))
            .lifetime(lifetime);
        Scope::new_root(Arc::new(ContainerState::new(registry, GenerationRules::default())))
    }

    #[test]
    fn test_scope_ids_unique() {
        let a = Scope::detached();
        let b = Scope::detached();
        assert_ne!(a.id(), b.id());
        assert!(a.to_string().starts_with("scope-"));
    }

    #[test]
    fn test_nested_scope_shares_root() {
        let root = Scope::detached();
        let child = root.create_scope().unwrap();
        let grandchild = child.create_scope().unwrap();

        assert!(root.is_root());
        assert!(!child.is_root());
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.root().id(), root.id());
        assert_eq!(grandchild.parent().map(|p| p.id()), Some(child.id()));
    }

    #[test]
    fn test_scoped_instances_are_per_scope() {
        let root = widget_scope(Lifetime::Scoped);
        let child = root.create_scope().unwrap();
        let ty = ServiceType::named("IWidget");

        let a = root.get_instance(&ty).unwrap();
        let b = root.get_instance(&ty).unwrap();
        let c = child.get_instance(&ty).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_disposed_scope_rejects_resolution() {
        let root = widget_scope(Lifetime::Scoped);
        let child = root.create_scope().unwrap();
        let ty = ServiceType::named("IWidget");
        child.get_instance(&ty).unwrap();

        child.dispose();
        assert!(child.is_disposed());
        assert_eq!(child.cached_count(), 0);
        assert!(matches!(child.get_instance(&ty), Err(DiError::ScopeDisposed { .. })));
        assert!(child.create_scope().is_err());
        assert!(root.get_instance(&ty).is_ok());
    }

    #[test]
    fn test_disposal_runs_in_reverse_order_once() {
        let scope = Scope::detached();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let hook: DisposeFn = crate::descriptor::dispose_hook::<Tracked>();

        for name in ["first", "second", "third"] {
            let value: Object = Arc::new(Tracked {
                name,
                log: Arc::clone(&log),
            });
            scope.track(value, Arc::clone(&hook));
        }

        assert_eq!(scope.disposable_count(), 3);
        assert_eq!(scope.dispose(), 3);
        assert_eq!(scope.dispose(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_injected_values_are_per_scope() {
        let root = Scope::detached();
        let child = root.create_scope().unwrap();
        child.inject(42u32).unwrap();

        let ty = ServiceType::of::<u32>();
        assert!(child.injected_value(&ty).is_ok());
        assert!(matches!(root.injected_value(&ty), Err(DiError::NotInjected { .. })));
    }

    #[test]
    fn test_weak_scope_does_not_keep_scope_alive() {
        let scope = Scope::detached();
        let weak = scope.downgrade();
        assert!(weak.try_upgrade().is_some());

        drop(scope);
        assert!(weak.try_upgrade().is_none());
        assert!(matches!(weak.upgrade(), Err(DiError::ScopeDisposed { .. })));
    }
}
