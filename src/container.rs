//! The container
//!
//! A [`Container`] owns the service graph built from a [`ServiceRegistry`]
//! and the root [`Scope`]. Resolution calls on the container go to the root
//! scope; nested scopes come from [`Container::create_scope`].

use crate::codegen::GenerationRules;
use crate::instance::{Instance, InstanceId, InstanceKind};
use crate::model::ContainerModel;
use crate::provider::{Injectable, Lifetime, Object, ServiceType, downcast};
use crate::registry::ServiceRegistry;
use crate::resolver;
use crate::scope::{ContainerState, Scope};
use crate::validation::{self, ValidationReport};
use crate::{DiError, Result};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, info};

/// Dependency injection container.
///
/// Cloning is cheap; clones share the graph and the root scope.
///
/// # Examples
///
/// ```rust
/// use lamar::{Container, ServiceRegistry, TypeDescriptor};
/// use std::sync::Arc;
///
/// struct AWidget;
///
/// let mut registry = ServiceRegistry::new();
/// registry
///     .for_type("IWidget")
///     .use_type(TypeDescriptor::concrete("AWidget".into()).constructor(vec![], |_| Ok(AWidget)))
///     .singleton();
///
/// let container = Container::new(registry);
/// let first = container.get_instance(&"IWidget".into()).unwrap();
/// let second = container.get_instance(&"IWidget".into()).unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
#[derive(Clone)]
pub struct Container {
    state: Arc<ContainerState>,
    root: Scope,
}

impl Container {
    /// Build a container with default [`GenerationRules`].
    pub fn new(registry: ServiceRegistry) -> Self {
        Self::with_rules(registry, GenerationRules::default())
    }

    pub fn with_rules(registry: ServiceRegistry, rules: GenerationRules) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "lamar",
            registrations = registry.len(),
            type_load_mode = rules.type_load_mode().as_str(),
            "Creating container"
        );

        let state = Arc::new(ContainerState::new(registry, rules));
        let root = Scope::new_root(Arc::clone(&state));
        Self { state, root }
    }

    /// The root scope; it caches every singleton.
    #[inline]
    pub fn root(&self) -> &Scope {
        &self.root
    }

    pub fn rules(&self) -> &GenerationRules {
        self.state.rules()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve the default instance of `service_type` from the root scope.
    #[inline]
    pub fn get_instance(&self, service_type: &ServiceType) -> Result<Object> {
        self.root.get_instance(service_type)
    }

    pub fn get_named(&self, service_type: &ServiceType, name: &str) -> Result<Object> {
        self.root.get_named(service_type, name)
    }

    pub fn try_get_instance(&self, service_type: &ServiceType) -> Result<Option<Object>> {
        self.root.try_get_instance(service_type)
    }

    pub fn get_all_instances(&self, service_type: &ServiceType) -> Result<Vec<Object>> {
        self.root.get_all_instances(service_type)
    }

    pub async fn get_instance_async(&self, service_type: &ServiceType) -> Result<Object> {
        self.root.get_instance_async(service_type).await
    }

    /// Resolve the Rust type `T`.
    #[inline]
    pub fn get<T: Injectable>(&self) -> Result<Arc<T>> {
        self.root.get::<T>()
    }

    pub fn get_as<T: Injectable>(&self, service_type: &ServiceType) -> Result<Arc<T>> {
        self.root.get_as::<T>(service_type)
    }

    pub async fn get_as_async<T: Injectable>(&self, service_type: &ServiceType) -> Result<Arc<T>> {
        self.root.get_as_async::<T>(service_type).await
    }

    /// Resolve without compiling a resolver.
    pub fn quick_resolve(&self, service_type: &ServiceType) -> Result<Object> {
        self.root.quick_resolve(service_type)
    }

    /// Build a fresh value of a concrete type from the type catalog,
    /// whether or not it is registered. Dependencies resolve normally.
    pub fn quick_build(&self, service_type: &ServiceType) -> Result<Object> {
        self.root.ensure_active()?;
        let graph = self.root.graph();
        let descriptor = graph
            .registry()
            .catalog()
            .get(service_type)
            .filter(|d| d.is_concrete())
            .cloned()
            .ok_or_else(|| DiError::not_found(service_type))?;

        let instance = Arc::new(Instance::new(
            InstanceId::new(format!("quick:{}", service_type)),
            service_type.clone(),
            service_type.clone(),
            Lifetime::Transient,
            InstanceKind::Constructor {
                descriptor,
                inline: Vec::new(),
            },
        ));
        resolver::interpret(&graph, &instance, &self.root)
    }

    /// Resolve `T` built by [`quick_build`](Self::quick_build).
    pub fn quick_build_as<T: Injectable>(&self, service_type: &ServiceType) -> Result<Arc<T>> {
        downcast(self.quick_build(service_type)?)
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    /// Create a nested scope under the root.
    pub fn create_scope(&self) -> Result<Scope> {
        self.root.create_scope()
    }

    /// Dispose the root scope and with it every singleton.
    pub fn dispose(&self) -> usize {
        #[cfg(feature = "logging")]
        debug!(target: "lamar", "Disposing container");

        self.root.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.root.is_disposed()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Amend the registrations at runtime.
    ///
    /// A new graph is built and swapped in atomically; resolutions already in
    /// flight finish against the graph they started with. Cached singletons
    /// stay cached.
    pub fn configure<F>(&self, configure: F) -> Result<()>
    where
        F: FnOnce(&mut ServiceRegistry),
    {
        self.root.ensure_active()?;
        let _graph = self.state.reconfigure(configure);

        #[cfg(feature = "logging")]
        info!(
            target: "lamar",
            service_types = _graph.registered_types().len(),
            "Reconfigured container"
        );

        Ok(())
    }

    /// Compile resolvers for every registered instance in one batch.
    pub fn compile_all(&self) -> Result<usize> {
        self.root.graph().compile_all()
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Query model over the current graph.
    pub fn model(&self) -> ContainerModel {
        ContainerModel::new(self.root.graph())
    }

    /// Text report of every registration.
    pub fn what_do_i_have(&self) -> String {
        self.model().what_do_i_have()
    }

    /// Generated source for the default instance of `service_type`, or a
    /// description of how it is built when no type is generated for it.
    pub fn how_do_i_build(&self, service_type: &ServiceType) -> Result<String> {
        let graph = self.root.graph();
        let family = graph.resolve_family(service_type);
        let instance = family.default_instance().cloned().ok_or_else(|| family.missing_error())?;
        let resolver = graph.resolver_for(&instance)?;

        Ok(match (resolver.type_name(), resolver.source_code()) {
            (_, Some(source)) => source.to_string(),
            (Some(type_name), None) => format!(
                "{} ({}) is built by the prebuilt type {}\n",
                instance.description(),
                instance.id(),
                type_name
            ),
            (None, None) => format!(
                "{} ({}) is built by the {} strategy\n",
                instance.description(),
                instance.id(),
                resolver.strategy()
            ),
        })
    }

    /// Source of every generated resolver type, compiling everything first.
    ///
    /// Registrations that cannot be built are left out; [`validate`](Self::validate)
    /// reports them.
    pub fn generated_source(&self) -> Result<String> {
        let graph = self.root.graph();
        match graph.compile_all() {
            Ok(_) | Err(DiError::InvalidConfiguration(_)) => {}
            Err(e) => return Err(e),
        }
        let sources: Vec<String> = graph
            .resolvers()
            .iter()
            .filter_map(|r| r.source_code().map(str::to_string))
            .collect();
        Ok(sources.join("\n"))
    }

    /// Try to build a resolver for every registration and report every failure.
    pub fn validate(&self) -> ValidationReport {
        validation::validate(&self.root.graph())
    }

    /// Fail with every configuration problem at once.
    pub fn assert_configuration_is_valid(&self) -> Result<()> {
        let report = self.validate();
        if report.is_valid() {
            Ok(())
        } else {
            Err(DiError::InvalidConfiguration(report))
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new(ServiceRegistry::new())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("root", &self.root)
            .field("service_types", &self.root.graph().registered_types().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Parameter, TypeDescriptor};
    use crate::factory::factory;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AWidget;

    struct Engine {
        id: u32,
    }

    struct Car {
        engine: Arc<Engine>,
    }

    fn widget() -> TypeDescriptor {
        TypeDescriptor::concrete("AWidget".into()).constructor(vec![], |_| Ok(AWidget))
    }

    #[test]
    fn test_singleton_is_shared_with_nested_scopes() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget()).singleton();
        let container = Container::new(registry);

        let a = container.get_instance(&"IWidget".into()).unwrap();
        let b = container.get_instance(&"IWidget".into()).unwrap();
        let nested = container.create_scope().unwrap().get_instance(&"IWidget".into()).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &nested));
    }

    #[test]
    fn test_scoped_differs_between_scopes() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget()).scoped();
        let container = Container::new(registry);

        let a = container.get_instance(&"IWidget".into()).unwrap();
        let b = container.get_instance(&"IWidget".into()).unwrap();
        let nested = container.create_scope().unwrap().get_instance(&"IWidget".into()).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &nested));
    }

    #[test]
    fn test_transient_is_fresh() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget());
        let container = Container::new(registry);

        let a = container.get_instance(&"IWidget".into()).unwrap();
        let b = container.get_instance(&"IWidget".into()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_constructor_receives_dependencies() {
        static ENGINES: AtomicU32 = AtomicU32::new(0);

        let mut registry = ServiceRegistry::new();
        registry
            .for_type("Engine")
            .use_factory(factory(|_| Ok(Engine { id: ENGINES.fetch_add(1, Ordering::SeqCst) })))
            .singleton();
        registry.for_type("Car").use_type(
            TypeDescriptor::concrete("Car".into()).constructor(vec![Parameter::new("engine", "Engine".into())], |args| {
                Ok(Car {
                    engine: args.get::<Engine>(0)?,
                })
            }),
        );
        let container = Container::new(registry);

        let car = container.get_as::<Car>(&"Car".into()).unwrap();
        let engine = container.get_as::<Engine>(&"Engine".into()).unwrap();
        assert!(Arc::ptr_eq(&car.engine, &engine));
        assert_eq!(engine.id, car.engine.id);
    }

    #[test]
    fn test_quick_resolve_shares_singletons_with_compiled_resolver() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget()).singleton();
        let container = Container::new(registry);

        let quick = container.quick_resolve(&"IWidget".into()).unwrap();
        let compiled = container.get_instance(&"IWidget".into()).unwrap();
        assert!(Arc::ptr_eq(&quick, &compiled));
    }

    #[test]
    fn test_quick_build_ignores_registered_lifetime() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("AWidget").use_type(widget()).singleton();
        let container = Container::new(registry);

        let a = container.quick_build(&"AWidget".into()).unwrap();
        let b = container.quick_build(&"AWidget".into()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(container.quick_build(&"Unknown".into()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_configure_adds_registrations() {
        let container = Container::default();
        assert!(container.get_instance(&"IWidget".into()).unwrap_err().is_not_found());

        container
            .configure(|registry| {
                registry.for_type("IWidget").use_type(widget());
            })
            .unwrap();
        assert!(container.get_instance(&"IWidget".into()).is_ok());
        assert!(container.model().has_registration_for(&"IWidget".into()));
    }

    #[test]
    fn test_how_do_i_build_returns_generated_source() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget());
        registry.for_type("Name").use_value("lamar".to_string());
        let container = Container::new(registry);

        let source = container.how_do_i_build(&"IWidget".into()).unwrap();
        assert!(source.contains("pub struct AWidget_r1"));
        assert!(source.contains("let awidget = AWidget::new()?;"));

        let direct = container.how_do_i_build(&"Name".into()).unwrap();
        assert_eq!(direct, "Name (r2) is built by the direct strategy\n");
    }

    #[test]
    fn test_generated_source_is_deterministic() {
        let build = || {
            let mut registry = ServiceRegistry::new();
            registry.for_type("IWidget").use_type(widget());
            registry.for_type("IOther").use_type(widget()).singleton();
            Container::new(registry).generated_source().unwrap()
        };
        let first = build();
        assert_eq!(first, build());
        assert!(first.contains("AWidget_r1"));
        assert!(first.contains("AWidget_r2"));
    }

    #[test]
    fn test_generated_source_skips_broken_registrations() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget());
        registry.for_type("IBroken").use_type(
            TypeDescriptor::concrete("Broken".into())
                .constructor(vec![Parameter::new("missing", "IMissing".into())], |_| Ok(AWidget)),
        );
        let container = Container::new(registry);

        let source = container.generated_source().unwrap();
        assert!(source.contains("AWidget_r1"));
        assert!(!source.contains("Broken_r2"));
        assert!(matches!(container.compile_all(), Err(DiError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_assert_configuration_is_valid() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget());
        assert!(Container::new(registry).assert_configuration_is_valid().is_ok());

        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(
            TypeDescriptor::concrete("AWidget".into())
                .constructor(vec![Parameter::new("missing", "IMissing".into())], |_| Ok(AWidget)),
        );
        match Container::new(registry).assert_configuration_is_valid() {
            Err(DiError::InvalidConfiguration(report)) => assert_eq!(report.len(), 1),
            other => panic!("expected an invalid configuration, got {:?}", other),
        }
    }

    #[test]
    fn test_disposed_container_rejects_resolution() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget());
        let container = Container::new(registry);

        container.dispose();
        assert!(container.is_disposed());
        assert!(matches!(
            container.get_instance(&"IWidget".into()),
            Err(DiError::ScopeDisposed { .. })
        ));
    }
}
