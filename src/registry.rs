//! Registration model
//!
//! A [`ServiceRegistry`] is the ordered, append-only list of registrations the
//! service graph is built from. User code fills it through the fluent
//! expressions below; a scanning collaborator can push finished
//! [`ServiceDescriptor`]s through [`ServiceRegistry::add`].
//!
//! # Example
//!
//! ```rust
//! use lamar::{Lifetime, ServiceRegistry, ServiceType, TypeDescriptor};
//!
//! struct AWidget;
//!
//! let mut registry = ServiceRegistry::new();
//! registry
//!     .for_type("IWidget")
//!     .use_type(
//!         TypeDescriptor::of::<AWidget>()
//!             .implements("IWidget".into())
//!             .constructor(vec![], |_| Ok(AWidget)),
//!     )
//!     .singleton();
//!
//! assert_eq!(registry.len(), 1);
//! assert_eq!(registry.descriptors()[0].lifetime(), Lifetime::Singleton);
//! ```

use crate::descriptor::{DisposeFn, GenericTemplate, SetterDescriptor, TypeDescriptor, dispose_hook};
use crate::factory::{AsyncFactoryFn, FactoryFn};
use crate::provider::{Dispose, GenericKey, Injectable, Lifetime, Object, ServiceType};
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

/// Predicate choosing which optional setters get injected
pub type SetterPolicy = Arc<dyn Fn(&TypeDescriptor, &SetterDescriptor) -> bool + Send + Sync>;

// =============================================================================
// ServiceDescriptor
// =============================================================================

/// Where the value of a registration comes from.
#[derive(Clone)]
pub enum ImplementationSource {
    /// Construct a concrete type through one of its constructors
    Type(TypeDescriptor),
    /// Invoke an opaque factory
    Factory(FactoryFn),
    /// Invoke an opaque asynchronous factory
    AsyncFactory(AsyncFactoryFn),
    /// A pre-built value
    Object(Object),
    /// A value injected into each scope at runtime
    Injected,
}

impl ImplementationSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ImplementationSource::Type(_) => "constructor",
            ImplementationSource::Factory(_) => "factory",
            ImplementationSource::AsyncFactory(_) => "async factory",
            ImplementationSource::Object(_) => "object",
            ImplementationSource::Injected => "injected",
        }
    }
}

/// An explicit constructor argument owned by its parent registration.
#[derive(Clone)]
pub enum InlineDependency {
    /// A literal value for the named parameter
    Value { parameter: Arc<str>, value: Object },
    /// A dedicated registration built for the named parameter only
    Registration {
        parameter: Arc<str>,
        descriptor: Box<ServiceDescriptor>,
    },
}

impl InlineDependency {
    pub fn parameter(&self) -> &str {
        match self {
            InlineDependency::Value { parameter, .. }
            | InlineDependency::Registration { parameter, .. } => parameter,
        }
    }
}

/// One registration: service type, implementation source, lifetime and an
/// optional name.
///
/// Immutable once accepted into a registry.
#[derive(Clone)]
pub struct ServiceDescriptor {
    sequence: u64,
    service_type: ServiceType,
    source: ImplementationSource,
    lifetime: Lifetime,
    name: Option<Arc<str>>,
    is_default: bool,
    fallback: bool,
    inline: Vec<InlineDependency>,
    owned: bool,
    allow_captive: bool,
    dispose: Option<DisposeFn>,
}

impl ServiceDescriptor {
    pub fn new(service_type: ServiceType, source: ImplementationSource) -> Self {
        let lifetime = match source {
            ImplementationSource::Object(_) => Lifetime::Singleton,
            ImplementationSource::Injected => Lifetime::Scoped,
            _ => Lifetime::Transient,
        };
        let dispose = match &source {
            ImplementationSource::Type(descriptor) => descriptor.dispose_fn().cloned(),
            _ => None,
        };
        let owned = !matches!(source, ImplementationSource::Injected);

        Self {
            sequence: 0,
            service_type,
            source,
            lifetime,
            name: None,
            is_default: false,
            fallback: false,
            inline: Vec::new(),
            owned,
            allow_captive: false,
            dispose,
        }
    }

    /// Construct `descriptor` to satisfy `service_type`.
    pub fn for_type(service_type: ServiceType, descriptor: TypeDescriptor) -> Self {
        Self::new(service_type, ImplementationSource::Type(descriptor))
    }

    pub fn factory(service_type: ServiceType, factory: FactoryFn) -> Self {
        Self::new(service_type, ImplementationSource::Factory(factory))
    }

    pub fn object(service_type: ServiceType, value: Object) -> Self {
        Self::new(service_type, ImplementationSource::Object(value))
    }

    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn source(&self) -> &ImplementationSource {
        &self.source
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Added through `add_type`; loses the default slot to plain registrations.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn inline_dependencies(&self) -> &[InlineDependency] {
        &self.inline
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn allows_captive(&self) -> bool {
        self.allow_captive
    }

    pub(crate) fn dispose_fn(&self) -> Option<&DisposeFn> {
        self.dispose.as_ref()
    }

    /// The type a value of this registration actually has.
    pub fn implementation_type(&self) -> ServiceType {
        match &self.source {
            ImplementationSource::Type(descriptor) => descriptor.service_type().clone(),
            _ => self.service_type.clone(),
        }
    }
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("sequence", &self.sequence)
            .field("service_type", &self.service_type)
            .field("source", &self.source.kind())
            .field("lifetime", &self.lifetime)
            .field("name", &self.name)
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// An open generic registration such as `IRepository<> -> Repository<>`.
#[derive(Clone, Debug)]
pub struct OpenGenericDescriptor {
    sequence: u64,
    key: GenericKey,
    template: GenericTemplate,
    lifetime: Lifetime,
    name: Option<Arc<str>>,
    is_default: bool,
}

impl OpenGenericDescriptor {
    pub fn key(&self) -> &GenericKey {
        &self.key
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn template(&self) -> &GenericTemplate {
        &self.template
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }
}

/// Wrap every instance of `service_type` in `decorator`.
#[derive(Clone, Debug)]
pub struct DecoratorPolicy {
    service_type: ServiceType,
    decorator: TypeDescriptor,
}

impl DecoratorPolicy {
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn decorator(&self) -> &TypeDescriptor {
        &self.decorator
    }
}

// =============================================================================
// TypeCatalog
// =============================================================================

/// The set of known type descriptors.
///
/// Consulted when a concrete type is requested without a registration and
/// when a closed generic has to be connected to an implementation by
/// structural match.
#[derive(Clone, Default)]
pub struct TypeCatalog {
    order: Vec<ServiceType>,
    types: HashMap<ServiceType, TypeDescriptor, RandomState>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor. The first description of a type is kept.
    pub fn insert(&mut self, descriptor: TypeDescriptor) {
        let key = descriptor.service_type().clone();
        if !self.types.contains_key(&key) {
            self.order.push(key.clone());
            self.types.insert(key, descriptor);
        }
    }

    pub fn get(&self, service_type: &ServiceType) -> Option<&TypeDescriptor> {
        self.types.get(service_type)
    }

    /// Concrete types that can be cast to `service_type`, in catalog order.
    pub fn implementors_of(&self, service_type: &ServiceType) -> Vec<&TypeDescriptor> {
        self.iter()
            .filter(|d| d.is_concrete() && d.can_be_cast_to(service_type))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.order.iter().filter_map(|ty| self.types.get(ty))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for TypeCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCatalog")
            .field("count", &self.len())
            .finish()
    }
}

// =============================================================================
// ServiceRegistry
// =============================================================================

/// Ordered, append-only list of registrations.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    descriptors: Vec<ServiceDescriptor>,
    generics: Vec<OpenGenericDescriptor>,
    decorators: Vec<DecoratorPolicy>,
    catalog: TypeCatalog,
    setter_policies: Vec<SetterPolicy>,
    next_sequence: u64,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Accept a finished descriptor.
    pub fn add(&mut self, mut descriptor: ServiceDescriptor) -> &mut Self {
        descriptor.sequence = self.allocate_sequence();
        if let ImplementationSource::Type(ty) = &descriptor.source {
            self.catalog.insert(ty.clone());
        }
        self.descriptors.push(descriptor);
        self
    }

    /// Start a registration for `service_type`.
    pub fn for_type(&mut self, service_type: impl Into<ServiceType>) -> ServiceExpression<'_> {
        ServiceExpression {
            registry: self,
            service_type: service_type.into(),
        }
    }

    /// Start a registration for the Rust type `T` (or trait object).
    pub fn for_service<T: ?Sized + 'static>(&mut self) -> ServiceExpression<'_> {
        self.for_type(ServiceType::of::<T>())
    }

    /// Start an open generic registration.
    pub fn for_generic(&mut self, name: impl Into<Arc<str>>, arity: usize) -> GenericExpression<'_> {
        GenericExpression {
            registry: self,
            key: GenericKey::new(name, arity),
        }
    }

    /// Decorate every instance of `service_type` with `decorator`.
    ///
    /// The decorator receives the inner instance through its constructor
    /// parameter typed `service_type`. Decorators added first end up
    /// outermost.
    pub fn decorate(&mut self, service_type: impl Into<ServiceType>, decorator: TypeDescriptor) -> &mut Self {
        self.decorators.push(DecoratorPolicy {
            service_type: service_type.into(),
            decorator,
        });
        self
    }

    /// Make a type known to the catalog without registering it.
    pub fn describe(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        self.catalog.insert(descriptor);
        self
    }

    /// Declare a service whose value is injected into each scope at runtime.
    pub fn injectable(&mut self, service_type: impl Into<ServiceType>) -> Registration<'_> {
        let descriptor = ServiceDescriptor::new(service_type.into(), ImplementationSource::Injected);
        self.push(descriptor)
    }

    /// Inject optional setters matching `policy`.
    pub fn setter_policy<F>(&mut self, policy: F) -> &mut Self
    where
        F: Fn(&TypeDescriptor, &SetterDescriptor) -> bool + Send + Sync + 'static,
    {
        self.setter_policies.push(Arc::new(policy));
        self
    }

    /// Append every registration of `other`.
    pub fn include(&mut self, other: ServiceRegistry) -> &mut Self {
        for descriptor in other.descriptors {
            self.add(descriptor);
        }
        for mut generic in other.generics {
            generic.sequence = self.allocate_sequence();
            self.generics.push(generic);
        }
        self.decorators.extend(other.decorators);
        for ty in other.catalog.iter() {
            self.catalog.insert(ty.clone());
        }
        self.setter_policies.extend(other.setter_policies);
        self
    }

    fn push(&mut self, descriptor: ServiceDescriptor) -> Registration<'_> {
        self.add(descriptor);
        let index = self.descriptors.len() - 1;
        Registration {
            registry: self,
            index,
        }
    }

    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    pub fn generics(&self) -> &[OpenGenericDescriptor] {
        &self.generics
    }

    pub fn decorators(&self) -> &[DecoratorPolicy] {
        &self.decorators
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub(crate) fn setter_policies(&self) -> &[SetterPolicy] {
        &self.setter_policies
    }

    pub fn len(&self) -> usize {
        self.descriptors.len() + self.generics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("descriptors", &self.descriptors.len())
            .field("generics", &self.generics.len())
            .field("decorators", &self.decorators.len())
            .field("catalog", &self.catalog)
            .finish()
    }
}

// =============================================================================
// Fluent expressions
// =============================================================================

/// First half of a registration: the service type is known, the
/// implementation is not.
pub struct ServiceExpression<'a> {
    registry: &'a mut ServiceRegistry,
    service_type: ServiceType,
}

impl<'a> ServiceExpression<'a> {
    /// Construct `descriptor` for this service type.
    pub fn use_type(self, descriptor: TypeDescriptor) -> Registration<'a> {
        let descriptor = ServiceDescriptor::for_type(self.service_type, descriptor);
        self.registry.push(descriptor)
    }

    /// Add `descriptor` as an additional implementation that only becomes
    /// the default when no other registration exists.
    pub fn add_type(self, descriptor: TypeDescriptor) -> Registration<'a> {
        let mut descriptor = ServiceDescriptor::for_type(self.service_type, descriptor);
        descriptor.fallback = true;
        self.registry.push(descriptor)
    }

    /// Build with `factory`; the container treats it as opaque.
    pub fn use_factory(self, factory: FactoryFn) -> Registration<'a> {
        let descriptor = ServiceDescriptor::factory(self.service_type, factory);
        self.registry.push(descriptor)
    }

    /// Build with an asynchronous factory. Resolving it requires the async API.
    pub fn use_async_factory(self, factory: AsyncFactoryFn) -> Registration<'a> {
        let descriptor = ServiceDescriptor::new(
            self.service_type,
            ImplementationSource::AsyncFactory(factory),
        );
        self.registry.push(descriptor)
    }

    /// Use a pre-built value as a singleton.
    pub fn use_object(self, value: Object) -> Registration<'a> {
        let descriptor = ServiceDescriptor::object(self.service_type, value);
        self.registry.push(descriptor)
    }

    /// Shorthand for `use_object(Arc::new(value))`.
    pub fn use_value<T: Injectable>(self, value: T) -> Registration<'a> {
        self.use_object(Arc::new(value))
    }
}

/// A registration in progress; every modifier applies to the last added
/// descriptor.
pub struct Registration<'a> {
    registry: &'a mut ServiceRegistry,
    index: usize,
}

impl<'a> Registration<'a> {
    fn descriptor_mut(&mut self) -> &mut ServiceDescriptor {
        &mut self.registry.descriptors[self.index]
    }

    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.descriptor_mut().name = Some(name.into());
        self
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.descriptor_mut().lifetime = lifetime;
        self
    }

    pub fn singleton(self) -> Self {
        self.lifetime(Lifetime::Singleton)
    }

    pub fn scoped(self) -> Self {
        self.lifetime(Lifetime::Scoped)
    }

    pub fn transient(self) -> Self {
        self.lifetime(Lifetime::Transient)
    }

    /// Make this registration the family default regardless of order.
    pub fn is_default(mut self) -> Self {
        self.descriptor_mut().is_default = true;
        self
    }

    /// Supply a literal value for the constructor parameter `parameter`.
    pub fn ctor_value(mut self, parameter: impl Into<Arc<str>>, value: Object) -> Self {
        self.descriptor_mut().inline.push(InlineDependency::Value {
            parameter: parameter.into(),
            value,
        });
        self
    }

    /// Build the constructor parameter `parameter` from a dedicated registration.
    pub fn ctor_dependency(mut self, parameter: impl Into<Arc<str>>, descriptor: ServiceDescriptor) -> Self {
        self.descriptor_mut().inline.push(InlineDependency::Registration {
            parameter: parameter.into(),
            descriptor: Box::new(descriptor),
        });
        self
    }

    /// Never dispose values built by this registration.
    pub fn not_owned(mut self) -> Self {
        self.descriptor_mut().owned = false;
        self
    }

    /// Permit a singleton built here to capture scoped dependencies.
    pub fn allow_captive(mut self) -> Self {
        self.descriptor_mut().allow_captive = true;
        self
    }

    /// Dispose values through `T`'s [`Dispose`] implementation.
    pub fn dispose_with<T: Dispose>(mut self) -> Self {
        self.descriptor_mut().dispose = Some(dispose_hook::<T>());
        self
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.registry.descriptors[self.index]
    }
}

/// An open generic registration in progress.
pub struct GenericExpression<'a> {
    registry: &'a mut ServiceRegistry,
    key: GenericKey,
}

impl<'a> GenericExpression<'a> {
    pub fn use_template(self, template: GenericTemplate) -> GenericRegistration<'a> {
        let sequence = self.registry.allocate_sequence();
        self.registry.generics.push(OpenGenericDescriptor {
            sequence,
            key: self.key,
            template,
            lifetime: Lifetime::Transient,
            name: None,
            is_default: false,
        });
        let index = self.registry.generics.len() - 1;
        GenericRegistration {
            registry: self.registry,
            index,
        }
    }
}

pub struct GenericRegistration<'a> {
    registry: &'a mut ServiceRegistry,
    index: usize,
}

impl<'a> GenericRegistration<'a> {
    fn descriptor_mut(&mut self) -> &mut OpenGenericDescriptor {
        &mut self.registry.generics[self.index]
    }

    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.descriptor_mut().name = Some(name.into());
        self
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.descriptor_mut().lifetime = lifetime;
        self
    }

    pub fn singleton(self) -> Self {
        self.lifetime(Lifetime::Singleton)
    }

    pub fn scoped(self) -> Self {
        self.lifetime(Lifetime::Scoped)
    }

    pub fn transient(self) -> Self {
        self.lifetime(Lifetime::Transient)
    }

    pub fn is_default(mut self) -> Self {
        self.descriptor_mut().is_default = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::object;

    struct AWidget;
    struct BWidget;

    fn widget(name: &str) -> TypeDescriptor {
        TypeDescriptor::concrete(ServiceType::named(name)).implements("IWidget".into())
    }

    #[test]
    fn test_sequences_are_assigned_in_order() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget("AWidget"));
        registry.for_type("IWidget").use_type(widget("BWidget"));

        let seqs: Vec<_> = registry.descriptors().iter().map(|d| d.sequence()).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(registry.catalog().len(), 2);
    }

    #[test]
    fn test_registration_modifiers() {
        let mut registry = ServiceRegistry::new();
        registry
            .for_service::<AWidget>()
            .use_type(TypeDescriptor::of::<AWidget>().constructor(vec![], |_| Ok(AWidget)))
            .named("primary")
            .scoped()
            .is_default()
            .ctor_value("size", object(3u32))
            .not_owned();

        let d = &registry.descriptors()[0];
        assert_eq!(d.name(), Some("primary"));
        assert_eq!(d.lifetime(), Lifetime::Scoped);
        assert!(d.is_default());
        assert!(!d.is_owned());
        assert_eq!(d.inline_dependencies()[0].parameter(), "size");
    }

    #[test]
    fn test_object_defaults_to_singleton() {
        let mut registry = ServiceRegistry::new();
        registry.for_service::<BWidget>().use_value(BWidget);

        assert_eq!(registry.descriptors()[0].lifetime(), Lifetime::Singleton);
    }

    #[test]
    fn test_add_type_is_marked_fallback() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("IWidget").use_type(widget("AWidget"));
        registry.for_type("IWidget").add_type(widget("BWidget"));

        let fallbacks: Vec<_> = registry.descriptors().iter().map(|d| d.is_fallback()).collect();
        assert_eq!(fallbacks, vec![false, true]);
    }

    #[test]
    fn test_injectable_is_scoped_and_not_owned() {
        let mut registry = ServiceRegistry::new();
        registry.injectable("RequestContext");

        let d = &registry.descriptors()[0];
        assert_eq!(d.lifetime(), Lifetime::Scoped);
        assert!(!d.is_owned());
        assert_eq!(d.source().kind(), "injected");
    }

    #[test]
    fn test_catalog_keeps_first_description() {
        let mut catalog = TypeCatalog::new();
        catalog.insert(widget("AWidget"));
        catalog.insert(TypeDescriptor::abstract_type("AWidget".into()));

        assert!(catalog.get(&"AWidget".into()).unwrap().is_concrete());
        assert_eq!(catalog.implementors_of(&"IWidget".into()).len(), 1);
    }
}
