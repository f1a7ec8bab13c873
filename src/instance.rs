//! Instance plan nodes
//!
//! An [`Instance`] is one concrete way to satisfy a service type. Its
//! [`InstanceKind`] says how the value is obtained; constructor-backed kinds
//! additionally carry an [`InstancePlan`], computed on first use, that picks
//! the constructor and names the dependency for every parameter.

use crate::descriptor::{DisposeFn, SetterDescriptor, TypeDescriptor};
use crate::factory::{AsyncFactoryFn, DeferredKind, FactoryFn};
use crate::graph::ServiceGraph;
use crate::provider::{Lifetime, Object, ServiceType};
use crate::{DiError, Result};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Identity of an instance, stable across graph rebuilds.
///
/// Registered instances are keyed by registration order (`r3`), closed
/// generics by the template registration and the type arguments
/// (`r5<User>`), synthesized instances by the policy and the service type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Arc<str>);

impl InstanceId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub(crate) fn registered(sequence: u64) -> Self {
        Self::new(format!("r{}", sequence))
    }

    /// Identity of a child owned by this instance.
    pub(crate) fn child(&self, segment: &str) -> Self {
        Self::new(format!("{}.{}", self.0, segment))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregate shape of an enumerable instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerableKind {
    Array,
    List,
}

/// An explicit constructor argument owned by a constructor instance.
#[derive(Clone)]
pub enum InlineArgument {
    Value(Object),
    Instance(Arc<Instance>),
}

/// How an instance obtains its value.
#[derive(Clone)]
pub enum InstanceKind {
    /// Call one of the constructors of a concrete type
    Constructor {
        descriptor: TypeDescriptor,
        inline: Vec<(Arc<str>, InlineArgument)>,
    },
    /// Invoke an opaque factory
    Factory(FactoryFn),
    /// Invoke an opaque asynchronous factory
    AsyncFactory(AsyncFactoryFn),
    /// Hand out a pre-built value
    Object(Object),
    /// Build every element and assemble an array or list
    Enumerable {
        kind: EnumerableKind,
        element_type: ServiceType,
        elements: Vec<Arc<Instance>>,
    },
    /// Build `inner`, then pass it to the decorator's constructor
    Decorated {
        decorator: TypeDescriptor,
        inner: Arc<Instance>,
    },
    /// Hand out a `Lazy<T>`/`Func<T>` wrapper bound to the resolving scope
    Deferred {
        kind: DeferredKind,
        target: ServiceType,
    },
    /// Read the value injected into the resolving scope
    Injected,
}

impl InstanceKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstanceKind::Constructor { .. } => "constructor",
            InstanceKind::Factory(_) => "factory",
            InstanceKind::AsyncFactory(_) => "async factory",
            InstanceKind::Object(_) => "object",
            InstanceKind::Enumerable { kind: EnumerableKind::Array, .. } => "array",
            InstanceKind::Enumerable { kind: EnumerableKind::List, .. } => "list",
            InstanceKind::Decorated { .. } => "decorated",
            InstanceKind::Deferred { kind: DeferredKind::Lazy, .. } => "lazy",
            InstanceKind::Deferred { kind: DeferredKind::Func, .. } => "func",
            InstanceKind::Injected => "injected",
        }
    }
}

// =============================================================================
// Plans
// =============================================================================

/// Where a constructor argument or setter value comes from.
#[derive(Clone)]
pub enum Dependency {
    /// Build or fetch another instance
    Instance(Arc<Instance>),
    /// A literal value
    Value(Object),
    /// Look the service type up through the resolving scope at runtime
    Lookup(ServiceType),
}

impl Dependency {
    pub fn instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Dependency::Instance(instance) => Some(instance),
            _ => None,
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Instance(instance) => write!(f, "Instance({})", instance.id()),
            Dependency::Value(_) => f.write_str("Value"),
            Dependency::Lookup(ty) => write!(f, "Lookup({})", ty),
        }
    }
}

/// A constructor argument.
#[derive(Debug, Clone)]
pub struct PlannedArgument {
    pub parameter: Arc<str>,
    pub service_type: ServiceType,
    pub dependency: Dependency,
}

/// A setter to apply after construction.
#[derive(Debug, Clone)]
pub struct PlannedSetter {
    pub setter: SetterDescriptor,
    pub dependency: Dependency,
}

/// The chosen constructor and the source of every argument.
#[derive(Debug, Clone)]
pub struct InstancePlan {
    pub constructor: usize,
    pub arguments: Vec<PlannedArgument>,
    pub setters: Vec<PlannedSetter>,
}

impl InstancePlan {
    /// Every dependency of the plan, arguments first.
    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.arguments
            .iter()
            .map(|a| &a.dependency)
            .chain(self.setters.iter().map(|s| &s.dependency))
    }
}

// =============================================================================
// Instance
// =============================================================================

/// One buildable node of the service graph.
pub struct Instance {
    id: InstanceId,
    service_type: ServiceType,
    implementation_type: ServiceType,
    lifetime: Lifetime,
    name: Option<Arc<str>>,
    parent: Option<InstanceId>,
    is_default: bool,
    fallback: bool,
    owned: bool,
    allow_captive: bool,
    closed_from_template: bool,
    dispose: Option<DisposeFn>,
    kind: InstanceKind,
    plan: OnceCell<Arc<InstancePlan>>,
    requires_async: OnceCell<bool>,
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        service_type: ServiceType,
        implementation_type: ServiceType,
        lifetime: Lifetime,
        kind: InstanceKind,
    ) -> Self {
        let dispose = match &kind {
            InstanceKind::Constructor { descriptor, .. } => descriptor.dispose_fn().cloned(),
            InstanceKind::Decorated { decorator, .. } => decorator.dispose_fn().cloned(),
            _ => None,
        };
        Self {
            id,
            service_type,
            implementation_type,
            lifetime,
            name: None,
            parent: None,
            is_default: false,
            fallback: false,
            owned: !matches!(kind, InstanceKind::Injected),
            allow_captive: false,
            closed_from_template: false,
            dispose,
            kind,
            plan: OnceCell::new(),
            requires_async: OnceCell::new(),
        }
    }

    pub(crate) fn with_name(mut self, name: Option<Arc<str>>) -> Self {
        self.name = name;
        self
    }

    pub(crate) fn with_parent(mut self, parent: InstanceId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub(crate) fn with_default(mut self, is_default: bool, fallback: bool) -> Self {
        self.is_default = is_default;
        self.fallback = fallback;
        self
    }

    pub(crate) fn with_ownership(mut self, owned: bool, allow_captive: bool) -> Self {
        self.owned = owned;
        self.allow_captive = allow_captive;
        self
    }

    pub(crate) fn with_dispose(mut self, dispose: Option<DisposeFn>) -> Self {
        if dispose.is_some() {
            self.dispose = dispose;
        }
        self
    }

    pub(crate) fn closed_from_template(mut self) -> Self {
        self.closed_from_template = true;
        self
    }

    #[inline]
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    #[inline]
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    #[inline]
    pub fn implementation_type(&self) -> &ServiceType {
        &self.implementation_type
    }

    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The instance owning this one as an inline dependency.
    pub fn parent(&self) -> Option<&InstanceId> {
        self.parent.as_ref()
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub(crate) fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn allows_captive(&self) -> bool {
        self.allow_captive
    }

    pub fn is_closed_from_template(&self) -> bool {
        self.closed_from_template
    }

    #[inline]
    pub fn kind(&self) -> &InstanceKind {
        &self.kind
    }

    pub(crate) fn dispose_fn(&self) -> Option<&DisposeFn> {
        if self.owned { self.dispose.as_ref() } else { None }
    }

    pub(crate) fn requires_async_cell(&self) -> &OnceCell<bool> {
        &self.requires_async
    }

    /// Whether consumers must look this instance up at runtime instead of
    /// building it inline: its type cannot be named statically, or its value
    /// only exists inside a scope.
    pub fn requires_service_provider(&self) -> bool {
        self.closed_from_template || matches!(self.kind, InstanceKind::Injected)
    }

    /// Whether the constructor receives literal values supplied at registration.
    pub fn has_inline_values(&self) -> bool {
        match &self.kind {
            InstanceKind::Constructor { inline, .. } => inline
                .iter()
                .any(|(_, arg)| matches!(arg, InlineArgument::Value(_))),
            _ => false,
        }
    }

    /// Human readable `service -> implementation` description.
    pub fn description(&self) -> String {
        let mut out = if self.service_type == self.implementation_type {
            self.service_type.to_string()
        } else {
            format!("{} -> {}", self.service_type, self.implementation_type)
        };
        if let Some(name) = &self.name {
            out.push_str(&format!(" ('{}')", name));
        }
        out
    }

    /// The build plan, computed on first use.
    ///
    /// Only constructor and decorated instances have one.
    pub fn plan(&self, graph: &ServiceGraph) -> Result<Option<Arc<InstancePlan>>> {
        let (descriptor, inner) = match &self.kind {
            InstanceKind::Constructor { descriptor, .. } => (descriptor, None),
            InstanceKind::Decorated { decorator, inner } => (decorator, Some(inner)),
            _ => return Ok(None),
        };

        self.plan
            .get_or_try_init(|| {
                #[cfg(feature = "logging")]
                trace!(
                    target: "lamar",
                    instance = %self.id,
                    implementation = %self.implementation_type,
                    "Planning constructor"
                );

                self.build_plan(descriptor, inner, graph).map(Arc::new)
            })
            .map(|plan| Some(Arc::clone(plan)))
    }

    fn build_plan(
        &self,
        descriptor: &TypeDescriptor,
        inner: Option<&Arc<Instance>>,
        graph: &ServiceGraph,
    ) -> Result<InstancePlan> {
        if descriptor.constructors().is_empty() {
            return Err(self.unresolvable(format!(
                "{} has no constructor",
                descriptor.service_type()
            )));
        }

        // Greediest satisfiable constructor, ties go to the first declared
        let mut chosen: Option<(usize, Vec<PlannedArgument>)> = None;
        let mut first_failure = None;
        for (index, ctor) in descriptor.constructors().iter().enumerate() {
            let mut arguments = Vec::with_capacity(ctor.parameters().len());
            let mut failure = None;
            let mut inner_used = false;
            for parameter in ctor.parameters() {
                match self.satisfy(parameter.name(), parameter.service_type(), parameter.default_value(), inner, &mut inner_used, graph) {
                    Some(dependency) => arguments.push(PlannedArgument {
                        parameter: Arc::from(parameter.name()),
                        service_type: parameter.service_type().clone(),
                        dependency,
                    }),
                    None => {
                        failure = Some(format!(
                            "cannot resolve parameter '{}' of type {}",
                            parameter.name(),
                            parameter.service_type()
                        ));
                        break;
                    }
                }
            }

            match failure {
                Some(message) => {
                    first_failure.get_or_insert(message);
                }
                None => {
                    let greedier = chosen
                        .as_ref()
                        .is_none_or(|(_, best)| arguments.len() > best.len());
                    if greedier {
                        chosen = Some((index, arguments));
                    }
                }
            }
        }

        let (constructor, arguments) = match chosen {
            Some(chosen) => chosen,
            None => {
                return Err(self.unresolvable(format!(
                    "no constructor of {} can be satisfied: {}",
                    descriptor.service_type(),
                    first_failure.unwrap_or_default()
                )));
            }
        };

        let mut setters = Vec::new();
        for setter in descriptor.setters() {
            if !setter.is_required() && !graph.setter_selected(descriptor, setter) {
                continue;
            }
            match graph.find_default(setter.service_type()) {
                Some(target) => setters.push(PlannedSetter {
                    setter: setter.clone(),
                    dependency: Self::dependency_on(target),
                }),
                None if setter.is_required() => {
                    return Err(self.unresolvable(format!(
                        "cannot resolve required setter '{}' of type {}",
                        setter.name(),
                        setter.service_type()
                    )));
                }
                None => {}
            }
        }

        Ok(InstancePlan {
            constructor,
            arguments,
            setters,
        })
    }

    fn satisfy(
        &self,
        name: &str,
        service_type: &ServiceType,
        default: Option<&Object>,
        inner: Option<&Arc<Instance>>,
        inner_used: &mut bool,
        graph: &ServiceGraph,
    ) -> Option<Dependency> {
        if let InstanceKind::Constructor { inline, .. } = &self.kind {
            if let Some((_, arg)) = inline.iter().find(|(parameter, _)| &**parameter == name) {
                return Some(match arg {
                    InlineArgument::Value(value) => Dependency::Value(Arc::clone(value)),
                    InlineArgument::Instance(child) => Dependency::Instance(Arc::clone(child)),
                });
            }
        }

        if let Some(inner) = inner {
            if !*inner_used && service_type == inner.service_type() {
                *inner_used = true;
                return Some(Dependency::Instance(Arc::clone(inner)));
            }
        }

        if let Some(target) = graph.find_default(service_type) {
            return Some(Self::dependency_on(target));
        }

        default.map(|value| Dependency::Value(Arc::clone(value)))
    }

    fn dependency_on(target: Arc<Instance>) -> Dependency {
        if target.requires_service_provider() {
            Dependency::Lookup(target.service_type().clone())
        } else {
            Dependency::Instance(target)
        }
    }

    fn unresolvable(&self, message: String) -> DiError {
        DiError::Unresolvable {
            service_type: self.service_type.clone(),
            message,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("service_type", &self.service_type)
            .field("implementation_type", &self.implementation_type)
            .field("lifetime", &self.lifetime)
            .field("kind", &self.kind.name())
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Parameter;
    use crate::provider::object;
    use crate::registry::ServiceRegistry;
    use crate::GenerationRules;

    struct Widget;

    fn graph(registry: ServiceRegistry) -> ServiceGraph {
        ServiceGraph::build(registry, GenerationRules::default())
    }

    #[test]
    fn test_greediest_satisfiable_constructor_wins() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("Dep").use_value(1u8);
        registry.for_type("IWidget").use_type(
            TypeDescriptor::concrete("Widget".into())
                .constructor(vec![], |_| Ok(Widget))
                .constructor(vec![Parameter::new("dep", "Dep".into())], |_| Ok(Widget))
                .constructor(
                    vec![
                        Parameter::new("dep", "Dep".into()),
                        Parameter::new("missing", "Missing".into()),
                    ],
                    |_| Ok(Widget),
                ),
        );
        let graph = graph(registry);

        let instance = graph.find_default(&"IWidget".into()).unwrap();
        let plan = instance.plan(&graph).unwrap().unwrap();
        assert_eq!(plan.constructor, 1);
        assert_eq!(plan.arguments.len(), 1);
    }

    #[test]
    fn test_ties_go_to_first_declared_constructor() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("A").use_value(1u8);
        registry.for_type("B").use_value(2u8);
        registry.for_type("IWidget").use_type(
            TypeDescriptor::concrete("Widget".into())
                .constructor(vec![Parameter::new("a", "A".into())], |_| Ok(Widget))
                .constructor(vec![Parameter::new("b", "B".into())], |_| Ok(Widget)),
        );
        let graph = graph(registry);

        let plan = graph
            .find_default(&"IWidget".into())
            .unwrap()
            .plan(&graph)
            .unwrap()
            .unwrap();
        assert_eq!(plan.constructor, 0);
    }

    #[test]
    fn test_inline_value_and_parameter_default() {
        let mut registry = ServiceRegistry::new();
        registry
            .for_type("IWidget")
            .use_type(TypeDescriptor::concrete("Widget".into()).constructor(
                vec![
                    Parameter::new("size", ServiceType::of::<u32>()),
                    Parameter::new("color", ServiceType::of::<String>()).with_default(object("red".to_string())),
                ],
                |_| Ok(Widget),
            ))
            .ctor_value("size", object(4u32));
        let graph = graph(registry);

        let instance = graph.find_default(&"IWidget".into()).unwrap();
        assert!(instance.has_inline_values());

        let plan = instance.plan(&graph).unwrap().unwrap();
        assert!(plan.arguments.iter().all(|a| matches!(a.dependency, Dependency::Value(_))));
    }

    #[test]
    fn test_missing_parameter_is_unresolvable() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(
            TypeDescriptor::concrete("Widget".into())
                .constructor(vec![Parameter::new("dep", "Missing".into())], |_| Ok(Widget)),
        );
        let graph = graph(registry);

        let err = graph
            .find_default(&"IWidget".into())
            .unwrap()
            .plan(&graph)
            .unwrap_err();
        assert!(err.to_string().contains("cannot resolve parameter 'dep' of type Missing"));
    }

    #[test]
    fn test_description_includes_name() {
        let instance = Instance::new(
            InstanceId::new("r1"),
            "IWidget".into(),
            "AWidget".into(),
            Lifetime::Singleton,
            InstanceKind::Object(object(Widget)),
        )
        .with_name(Some("primary".into()));

        assert_eq!(instance.description(), "IWidget -> AWidget ('primary')");
    }
}
