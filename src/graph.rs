//! Service graph
//!
//! The [`ServiceGraph`] turns the flat registration list into one
//! [`ServiceFamily`] per service type. Families for registered types are
//! built eagerly; everything else (concrete types, arrays and lists, lazy
//! wrappers, closed generics) is synthesized on first request by the family
//! policy chain and cached.
//!
//! A graph is immutable once built apart from these caches. Reconfiguring a
//! container builds a new graph and swaps it in.

use crate::codegen::GenerationRules;
use crate::descriptor::{SetterDescriptor, TypeDescriptor};
use crate::instance::{InlineArgument, Instance, InstanceId, InstanceKind};
use crate::policies::{self, FamilyPolicy};
use crate::provider::{GenericKey, ServiceType};
use crate::registry::{
    DecoratorPolicy, ImplementationSource, InlineDependency, OpenGenericDescriptor, ServiceDescriptor,
    ServiceRegistry,
};
use crate::resolver::{self, Resolver};
use crate::validation::{ConfigurationProblem, ValidationReport};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// How a family came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilySource {
    /// Built from explicit registrations
    Registered,
    /// A concrete type built without registration
    ConcreteType,
    /// An array or list over every registration of the element type
    Enumerable,
    /// A `Lazy<T>` or `Func<T>` wrapper
    Deferred,
    /// Closed from an open generic registration
    ClosedGeneric,
    /// Nothing is registered or derivable
    Empty,
    /// Something matches, but it cannot be built
    Unsatisfiable,
}

/// Every instance registered or derived for one service type.
pub struct ServiceFamily {
    service_type: ServiceType,
    instances: Vec<Arc<Instance>>,
    default: Option<Arc<Instance>>,
    message: Option<String>,
    source: FamilySource,
}

impl ServiceFamily {
    pub(crate) fn new(service_type: ServiceType, instances: Vec<Arc<Instance>>, source: FamilySource) -> Self {
        // Explicit default, then the last plain registration, then the last of any kind
        let default = instances
            .iter()
            .rev()
            .find(|i| i.is_default())
            .or_else(|| instances.iter().rev().find(|i| !i.is_fallback()))
            .or_else(|| instances.last())
            .cloned();

        Self {
            service_type,
            instances,
            default,
            message: None,
            source,
        }
    }

    pub(crate) fn empty(service_type: ServiceType, source: FamilySource, message: String) -> Self {
        Self {
            message: Some(message),
            ..Self::new(service_type, Vec::new(), source)
        }
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    /// Instances in registration order.
    pub fn instances(&self) -> &[Arc<Instance>] {
        &self.instances
    }

    pub fn default_instance(&self) -> Option<&Arc<Instance>> {
        self.default.as_ref()
    }

    /// Diagnostic explaining why the family has no instances.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn source(&self) -> FamilySource {
        self.source
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn find_named(&self, name: &str) -> Option<&Arc<Instance>> {
        self.instances.iter().rev().find(|i| i.name() == Some(name))
    }

    /// The error to raise when this family is asked for a value.
    pub(crate) fn missing_error(&self) -> DiError {
        match (&self.source, &self.message) {
            (FamilySource::Unsatisfiable, Some(message)) => DiError::Unresolvable {
                service_type: self.service_type.clone(),
                message: message.clone(),
            },
            _ => DiError::not_found(&self.service_type),
        }
    }
}

impl std::fmt::Debug for ServiceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFamily")
            .field("service_type", &self.service_type)
            .field("instances", &self.instances.len())
            .field("source", &self.source)
            .field("message", &self.message)
            .finish()
    }
}

// =============================================================================
// ServiceGraph
// =============================================================================

/// Families, instances and resolvers for one container configuration.
pub struct ServiceGraph {
    registry: ServiceRegistry,
    rules: GenerationRules,
    registered: Vec<ServiceType>,
    families: DashMap<ServiceType, Arc<ServiceFamily>, RandomState>,
    generics: HashMap<GenericKey, Vec<OpenGenericDescriptor>, RandomState>,
    instances: DashMap<InstanceId, Arc<Instance>, RandomState>,
    resolvers: DashMap<InstanceId, Arc<Resolver>, RandomState>,
    policies: Vec<Box<dyn FamilyPolicy>>,
    compile_lock: Mutex<()>,
}

impl ServiceGraph {
    /// Build the graph for `registry`.
    pub fn build(registry: ServiceRegistry, rules: GenerationRules) -> Self {
        let mut generics: HashMap<GenericKey, Vec<OpenGenericDescriptor>, RandomState> = HashMap::default();
        for generic in registry.generics() {
            generics.entry(generic.key().clone()).or_default().push(generic.clone());
        }

        let graph = Self {
            registered: Vec::new(),
            families: DashMap::with_capacity_and_hasher_and_shard_amount(
                registry.descriptors().len(),
                RandomState::new(),
                8,
            ),
            generics,
            instances: DashMap::with_hasher_and_shard_amount(RandomState::new(), 8),
            resolvers: DashMap::with_hasher_and_shard_amount(RandomState::new(), 8),
            policies: policies::default_policies(),
            compile_lock: Mutex::new(()),
            rules,
            registry,
        };
        graph.build_registered()
    }

    fn build_registered(mut self) -> Self {
        let mut order: Vec<ServiceType> = Vec::new();
        let mut grouped: HashMap<ServiceType, Vec<Arc<Instance>>, RandomState> = HashMap::default();

        for descriptor in self.registry.descriptors() {
            let id = InstanceId::registered(descriptor.sequence());
            let instance = self.decorate(Arc::new(Self::instance_for(descriptor, id, None)));
            let ty = descriptor.service_type().clone();
            if !grouped.contains_key(&ty) {
                order.push(ty.clone());
            }
            grouped.entry(ty).or_default().push(instance);
        }

        for ty in &order {
            let instances = grouped.remove(ty).unwrap_or_default();
            let family = Arc::new(ServiceFamily::new(ty.clone(), instances, FamilySource::Registered));
            self.register_instances(&family);
            self.families.insert(ty.clone(), family);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "lamar",
            families = order.len(),
            registrations = self.registry.descriptors().len(),
            open_generics = self.generics.len(),
            "Built service graph"
        );

        self.registered = order;
        self
    }

    /// Turn a registration into an instance node, including its inline children.
    pub(crate) fn instance_for(descriptor: &ServiceDescriptor, id: InstanceId, parent: Option<&InstanceId>) -> Instance {
        let kind = match descriptor.source() {
            ImplementationSource::Type(ty) => {
                let inline = descriptor
                    .inline_dependencies()
                    .iter()
                    .map(|dep| match dep {
                        InlineDependency::Value { parameter, value } => {
                            (Arc::clone(parameter), InlineArgument::Value(Arc::clone(value)))
                        }
                        InlineDependency::Registration { parameter, descriptor } => {
                            let child = Self::instance_for(descriptor, id.child(parameter), Some(&id));
                            (Arc::clone(parameter), InlineArgument::Instance(Arc::new(child)))
                        }
                    })
                    .collect();
                InstanceKind::Constructor {
                    descriptor: ty.clone(),
                    inline,
                }
            }
            ImplementationSource::Factory(factory) => InstanceKind::Factory(Arc::clone(factory)),
            ImplementationSource::AsyncFactory(factory) => InstanceKind::AsyncFactory(Arc::clone(factory)),
            ImplementationSource::Object(value) => InstanceKind::Object(Arc::clone(value)),
            ImplementationSource::Injected => InstanceKind::Injected,
        };

        let mut instance = Instance::new(
            id,
            descriptor.service_type().clone(),
            descriptor.implementation_type(),
            descriptor.lifetime(),
            kind,
        )
        .with_name(descriptor.name().map(Arc::from))
        .with_default(descriptor.is_default(), descriptor.is_fallback())
        .with_ownership(descriptor.is_owned(), descriptor.allows_captive())
        .with_dispose(descriptor.dispose_fn().cloned());

        if let Some(parent) = parent {
            instance = instance.with_parent(parent.clone());
        }
        instance
    }

    /// Wrap `instance` in every decorator registered for its service type.
    /// The first registered decorator ends up outermost.
    pub(crate) fn decorate(&self, instance: Arc<Instance>) -> Arc<Instance> {
        let decorators: Vec<&DecoratorPolicy> = self
            .registry
            .decorators()
            .iter()
            .filter(|d| d.service_type() == instance.service_type())
            .collect();

        decorators.into_iter().rev().fold(instance, |inner, policy| {
            let decorator = policy.decorator();
            let id = InstanceId::new(format!("{}~{}", inner.id(), decorator.service_type().short_name()));

            let mut decorated = Instance::new(
                id,
                inner.service_type().clone(),
                decorator.service_type().clone(),
                inner.lifetime(),
                InstanceKind::Decorated {
                    decorator: decorator.clone(),
                    inner: Arc::clone(&inner),
                },
            )
            .with_name(inner.name().map(Arc::from))
            .with_default(inner.is_default(), inner.is_fallback())
            .with_ownership(inner.is_owned(), inner.allows_captive());
            if inner.is_closed_from_template() {
                decorated = decorated.closed_from_template();
            }
            Arc::new(decorated)
        })
    }

    fn register_instances(&self, family: &ServiceFamily) {
        let mut pending: Vec<Arc<Instance>> = family.instances().to_vec();
        while let Some(instance) = pending.pop() {
            match instance.kind() {
                InstanceKind::Decorated { inner, .. } => pending.push(Arc::clone(inner)),
                InstanceKind::Constructor { inline, .. } => {
                    for (_, arg) in inline {
                        if let InlineArgument::Instance(child) = arg {
                            pending.push(Arc::clone(child));
                        }
                    }
                }
                _ => {}
            }
            self.instances
                .entry(instance.id().clone())
                .or_insert(instance);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The family for `service_type`, synthesized by the policy chain when it
    /// is not registered.
    pub fn resolve_family(&self, service_type: &ServiceType) -> Arc<ServiceFamily> {
        if let Some(family) = self.families.get(service_type) {
            return Arc::clone(family.value());
        }

        // No map guard is held while policies run; they may recurse
        let family = self
            .policies
            .iter()
            .find_map(|policy| {
                let family = policy.build(service_type, self)?;

                #[cfg(feature = "logging")]
                trace!(
                    target: "lamar",
                    service = %service_type,
                    policy = policy.name(),
                    instances = family.instances().len(),
                    "Synthesized service family"
                );

                Some(family)
            })
            .unwrap_or_else(|| {
                ServiceFamily::empty(
                    service_type.clone(),
                    FamilySource::Empty,
                    format!("No service registrations exist or can be derived for {}", service_type),
                )
            });

        let family = Arc::clone(
            self.families
                .entry(service_type.clone())
                .or_insert_with(|| Arc::new(family))
                .value(),
        );
        self.register_instances(&family);
        family
    }

    /// The default instance, `None` when the family is empty.
    pub fn find_default(&self, service_type: &ServiceType) -> Option<Arc<Instance>> {
        self.resolve_family(service_type).default_instance().cloned()
    }

    /// Every instance in registration order.
    pub fn find_all(&self, service_type: &ServiceType) -> Vec<Arc<Instance>> {
        self.resolve_family(service_type).instances().to_vec()
    }

    pub fn find_named(&self, service_type: &ServiceType, name: &str) -> Option<Arc<Instance>> {
        self.resolve_family(service_type).find_named(name).cloned()
    }

    /// Look an instance up by identity.
    pub fn instance(&self, id: &InstanceId) -> Option<Arc<Instance>> {
        self.instances.get(id).map(|i| Arc::clone(i.value()))
    }

    /// Service types with explicit registrations, in registration order.
    pub fn registered_types(&self) -> &[ServiceType] {
        &self.registered
    }

    /// Every family built so far, registered families first.
    pub fn families(&self) -> Vec<Arc<ServiceFamily>> {
        let mut families: Vec<Arc<ServiceFamily>> = self
            .registered
            .iter()
            .filter_map(|ty| self.families.get(ty).map(|f| Arc::clone(f.value())))
            .collect();
        let mut synthesized: Vec<Arc<ServiceFamily>> = self
            .families
            .iter()
            .filter(|f| f.source() != FamilySource::Registered)
            .map(|f| Arc::clone(f.value()))
            .collect();
        synthesized.sort_by(|a, b| a.service_type().cmp(b.service_type()));
        families.extend(synthesized);
        families
    }

    /// Top-level instances of every registered family, in registration order.
    pub fn registered_instances(&self) -> Vec<Arc<Instance>> {
        self.registered
            .iter()
            .filter_map(|ty| self.families.get(ty).map(|f| f.instances().to_vec()))
            .flatten()
            .collect()
    }

    pub fn rules(&self) -> &GenerationRules {
        &self.rules
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub(crate) fn generic_templates(&self, key: &GenericKey) -> &[OpenGenericDescriptor] {
        self.generics.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn setter_selected(&self, descriptor: &TypeDescriptor, setter: &SetterDescriptor) -> bool {
        self.registry
            .setter_policies()
            .iter()
            .any(|policy| policy(descriptor, setter))
    }

    /// Cheap check used by the concrete-type policy: can a parameter of this
    /// type possibly be resolved? Never synthesizes families.
    pub(crate) fn can_supply(&self, service_type: &ServiceType) -> bool {
        if let Some(family) = self.families.get(service_type) {
            return !family.is_empty();
        }
        match service_type {
            ServiceType::Array(_) | ServiceType::List(_) | ServiceType::Lazy(_) | ServiceType::Func(_) => true,
            ServiceType::Named { .. } => {
                let catalog = self.registry.catalog();
                catalog.get(service_type).is_some_and(|d| d.is_concrete())
                    || service_type
                        .generic_definition()
                        .is_some_and(|key| self.generics.contains_key(&key))
            }
        }
    }

    // =========================================================================
    // Resolvers
    // =========================================================================

    /// The resolver for `instance`, compiled on first request.
    pub fn resolver_for(&self, instance: &Arc<Instance>) -> Result<Arc<Resolver>> {
        if let Some(resolver) = self.resolvers.get(instance.id()) {
            return Ok(Arc::clone(resolver.value()));
        }

        let _guard = self.compile_lock.lock();
        if let Some(resolver) = self.resolvers.get(instance.id()) {
            return Ok(Arc::clone(resolver.value()));
        }

        let built = resolver::build_resolvers(self, std::slice::from_ref(instance))?;
        let mut found = None;
        for resolver in built {
            if resolver.instance().id() == instance.id() {
                found = Some(Arc::clone(&resolver));
            }
            self.resolvers.insert(resolver.instance().id().clone(), resolver);
        }
        found.ok_or_else(|| DiError::Internal(format!("no resolver was built for {}", instance.id())))
    }

    /// Compile resolvers for every registered instance in one batch.
    ///
    /// Instances that cannot be built are left out of the batch; the rest are
    /// compiled and kept, then every broken instance is reported at once as
    /// [`DiError::InvalidConfiguration`]. Returns the number of resolvers
    /// built.
    pub fn compile_all(&self) -> Result<usize> {
        let _guard = self.compile_lock.lock();
        let mut pending = Vec::new();
        let mut problems = Vec::new();
        for instance in self.registered_instances() {
            if self.resolvers.contains_key(instance.id()) {
                continue;
            }
            match resolver::check_buildable(self, &instance) {
                Ok(()) => pending.push(instance),
                Err(e) => problems.push(ConfigurationProblem::for_instance(instance.service_type(), &instance, &e)),
            }
        }

        let built = match resolver::build_resolvers(self, &pending) {
            Ok(built) => built,
            // A dependency failed inside the batch; compile one at a time
            Err(_) => {
                let mut built = Vec::with_capacity(pending.len());
                for instance in &pending {
                    match resolver::build_resolvers(self, std::slice::from_ref(instance)) {
                        Ok(resolvers) => built.extend(resolvers),
                        Err(e) => problems.push(ConfigurationProblem::for_instance(instance.service_type(), instance, &e)),
                    }
                }
                built
            }
        };
        let count = built.len();
        for resolver in built {
            self.resolvers.insert(resolver.instance().id().clone(), resolver);
        }

        #[cfg(feature = "logging")]
        debug!(target: "lamar", resolvers = count, broken = problems.len(), "Compiled resolvers");

        if problems.is_empty() {
            Ok(count)
        } else {
            Err(DiError::InvalidConfiguration(ValidationReport::new(problems)))
        }
    }

    /// Resolvers compiled so far, ordered by instance identity.
    pub fn resolvers(&self) -> Vec<Arc<Resolver>> {
        let mut resolvers: Vec<Arc<Resolver>> = self.resolvers.iter().map(|r| Arc::clone(r.value())).collect();
        resolvers.sort_by(|a, b| a.instance().id().cmp(b.instance().id()));
        resolvers
    }
}

impl std::fmt::Debug for ServiceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceGraph")
            .field("registered", &self.registered.len())
            .field("families", &self.families.len())
            .field("instances", &self.instances.len())
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Parameter;
    use crate::provider::object;

    struct AWidget;
    struct BWidget;

    fn widget(name: &str) -> TypeDescriptor {
        TypeDescriptor::concrete(ServiceType::named(name))
            .implements("IWidget".into())
            .constructor(vec![], |_| Ok(AWidget))
    }

    fn build(registry: ServiceRegistry) -> ServiceGraph {
        ServiceGraph::build(registry, GenerationRules::default())
    }

    #[test]
    fn test_last_registered_is_default() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget("AWidget"));
        registry.for_type("IWidget").use_type(widget("BWidget"));
        let graph = build(registry);

        let default = graph.find_default(&"IWidget".into()).unwrap();
        assert_eq!(default.implementation_type().to_string(), "BWidget");
        assert_eq!(graph.find_all(&"IWidget".into()).len(), 2);
    }

    #[test]
    fn test_explicit_default_overrides_order() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget("AWidget")).is_default();
        registry.for_type("IWidget").use_type(widget("BWidget"));
        let graph = build(registry);

        let default = graph.find_default(&"IWidget".into()).unwrap();
        assert_eq!(default.implementation_type().to_string(), "AWidget");
    }

    #[test]
    fn test_fallback_registration_loses_default_slot() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget("AWidget"));
        registry.for_type("IWidget").add_type(widget("BWidget"));
        let graph = build(registry);

        let default = graph.find_default(&"IWidget".into()).unwrap();
        assert_eq!(default.implementation_type().to_string(), "AWidget");
    }

    #[test]
    fn test_missing_family_is_empty_not_absent() {
        let graph = build(ServiceRegistry::new());
        let family = graph.resolve_family(&"IWidget".into());

        assert!(family.is_empty());
        assert_eq!(family.source(), FamilySource::Empty);
        assert!(family.message().is_some());
        assert!(graph.find_default(&"IWidget".into()).is_none());
    }

    #[test]
    fn test_named_lookup() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget("AWidget")).named("a");
        registry.for_type("IWidget").use_type(widget("BWidget")).named("b");
        let graph = build(registry);

        let a = graph.find_named(&"IWidget".into(), "a").unwrap();
        assert_eq!(a.implementation_type().to_string(), "AWidget");
        assert!(graph.find_named(&"IWidget".into(), "c").is_none());
    }

    #[test]
    fn test_decorators_first_registered_is_outermost() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget("AWidget"));
        registry.decorate(
            "IWidget",
            TypeDescriptor::concrete("Outer".into())
                .constructor(vec![Parameter::new("inner", "IWidget".into())], |_| Ok(BWidget)),
        );
        registry.decorate(
            "IWidget",
            TypeDescriptor::concrete("Inner".into())
                .constructor(vec![Parameter::new("inner", "IWidget".into())], |_| Ok(BWidget)),
        );
        let graph = build(registry);

        let outer = graph.find_default(&"IWidget".into()).unwrap();
        assert_eq!(outer.implementation_type().to_string(), "Outer");
        let InstanceKind::Decorated { inner, .. } = outer.kind() else {
            panic!("expected a decorated instance");
        };
        assert_eq!(inner.implementation_type().to_string(), "Inner");
        let InstanceKind::Decorated { inner, .. } = inner.kind() else {
            panic!("expected a decorated instance");
        };
        assert_eq!(inner.implementation_type().to_string(), "AWidget");
        assert!(graph.instance(inner.id()).is_some());
    }

    #[test]
    fn test_compile_all_keeps_valid_resolvers_and_reports_broken() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget("AWidget"));
        registry.for_type("IBroken").use_type(
            TypeDescriptor::concrete("Broken".into())
                .constructor(vec![Parameter::new("missing", "IMissing".into())], |_| Ok(BWidget)),
        );
        let graph = build(registry);

        let Err(DiError::InvalidConfiguration(report)) = graph.compile_all() else {
            panic!("expected the broken registration to be reported");
        };
        assert_eq!(report.len(), 1);
        assert!(!report.messages_for(&"IBroken".into()).is_empty());

        let resolvers = graph.resolvers();
        assert_eq!(resolvers.len(), 1);
        assert_eq!(resolvers[0].service_type(), &ServiceType::from("IWidget"));
    }

    #[test]
    fn test_inline_registration_is_owned_by_parent() {
        let mut registry = ServiceRegistry::new();
        registry
            .for_type("IWidget")
            .use_type(widget("AWidget"))
            .ctor_dependency("dep", ServiceDescriptor::object("Dep".into(), object(1u8)));
        let graph = build(registry);

        let parent = graph.find_default(&"IWidget".into()).unwrap();
        let InstanceKind::Constructor { inline, .. } = parent.kind() else {
            panic!("expected a constructor instance");
        };
        let InlineArgument::Instance(child) = &inline[0].1 else {
            panic!("expected an inline instance");
        };
        assert_eq!(child.parent(), Some(parent.id()));
        assert!(graph.instance(child.id()).is_some());
    }
}
