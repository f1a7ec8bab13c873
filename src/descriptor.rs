//! Type descriptors
//!
//! The container never reflects over live types. Everything it needs to know
//! about a concrete type (which services it satisfies, its constructors, its
//! settable properties and whether it can be disposed) is supplied through a
//! [`TypeDescriptor`], either by hand, by a scanning collaborator, or through
//! the [`Service`] trait.
//!
//! # Example
//!
//! ```rust
//! use lamar::{Service, ServiceType, TypeDescriptor};
//! use std::sync::Arc;
//!
//! struct Database;
//!
//! impl Service for Database {
//!     type Dependencies = ();
//!
//!     fn create(_: ()) -> Self {
//!         Database
//!     }
//! }
//!
//! struct UserRepository {
//!     db: Arc<Database>,
//! }
//!
//! impl Service for UserRepository {
//!     type Dependencies = (Arc<Database>,);
//!
//!     fn create((db,): Self::Dependencies) -> Self {
//!         UserRepository { db }
//!     }
//! }
//!
//! let descriptor: TypeDescriptor = UserRepository::descriptor();
//! assert_eq!(descriptor.constructors()[0].parameters().len(), 1);
//! assert_eq!(
//!     descriptor.constructors()[0].parameters()[0].service_type(),
//!     &ServiceType::of::<Database>()
//! );
//! ```

use crate::provider::{Dispose, Injectable, Object, ServiceType, downcast};
use crate::{DiError, Result};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// A constructed value before it is frozen into an [`Object`]; setters
/// mutate it in place.
pub type Constructed = Box<dyn Any + Send + Sync>;

/// Type-erased constructor invocation
pub type ConstructFn = Arc<dyn Fn(&Arguments) -> Result<Constructed> + Send + Sync>;

/// Type-erased property setter
pub type SetterFn = Arc<dyn Fn(&mut Constructed, Object) -> Result<()> + Send + Sync>;

/// Type-erased disposal hook
pub type DisposeFn = Arc<dyn Fn(&Object) + Send + Sync>;

/// Builds a closed descriptor from generic type arguments
pub type TemplateFn = Arc<dyn Fn(&[ServiceType]) -> Option<TypeDescriptor> + Send + Sync>;

// =============================================================================
// Parameters and arguments
// =============================================================================

/// A constructor parameter.
#[derive(Clone)]
pub struct Parameter {
    name: Arc<str>,
    service_type: ServiceType,
    default: Option<Object>,
}

impl Parameter {
    pub fn new(name: impl Into<Arc<str>>, service_type: ServiceType) -> Self {
        Self {
            name: name.into(),
            service_type,
            default: None,
        }
    }

    /// Attach a default value used when the parameter type cannot be resolved.
    pub fn with_default(mut self, value: Object) -> Self {
        self.default = Some(value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn default_value(&self) -> Option<&Object> {
        self.default.as_ref()
    }
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("service_type", &self.service_type)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Resolved constructor arguments, in parameter declaration order.
pub struct Arguments {
    values: Vec<Object>,
}

impl Arguments {
    pub(crate) fn new(values: Vec<Object>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw argument at `index`.
    pub fn object(&self, index: usize) -> Result<Object> {
        self.values.get(index).cloned().ok_or_else(|| {
            DiError::Internal(format!(
                "constructor argument {} requested but only {} supplied",
                index,
                self.values.len()
            ))
        })
    }

    /// The argument at `index`, downcast to `T`.
    pub fn get<T: Injectable>(&self, index: usize) -> Result<Arc<T>> {
        downcast(self.object(index)?)
    }

    /// A copy of a value argument, typically an inline literal.
    pub fn value<T: Injectable + Clone>(&self, index: usize) -> Result<T> {
        self.get::<T>(index).map(|v| (*v).clone())
    }

    /// The elements of an array or list argument.
    pub fn many(&self, index: usize) -> Result<Vec<Object>> {
        let arg = self.object(index)?;
        if let Some(array) = arg.downcast_ref::<Box<[Object]>>() {
            return Ok(array.to_vec());
        }
        if let Some(list) = arg.downcast_ref::<Vec<Object>>() {
            return Ok(list.clone());
        }
        Err(DiError::type_mismatch::<Box<[Object]>>())
    }
}

// =============================================================================
// Constructors and setters
// =============================================================================

/// One way of constructing a concrete type.
#[derive(Clone)]
pub struct ConstructorDescriptor {
    parameters: Arc<[Parameter]>,
    invoke: ConstructFn,
}

impl ConstructorDescriptor {
    /// Describe a constructor from its parameters and a typed body.
    pub fn new<T, F>(parameters: Vec<Parameter>, body: F) -> Self
    where
        T: Injectable,
        F: Fn(&Arguments) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            parameters: parameters.into(),
            invoke: Arc::new(move |args: &Arguments| body(args).map(|v| Box::new(v) as Constructed)),
        }
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub(crate) fn construct(&self, args: &Arguments) -> Result<Constructed> {
        (self.invoke)(args)
    }
}

impl std::fmt::Debug for ConstructorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructorDescriptor")
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// A settable property that may be filled after construction.
#[derive(Clone)]
pub struct SetterDescriptor {
    name: Arc<str>,
    service_type: ServiceType,
    required: bool,
    apply: SetterFn,
}

impl SetterDescriptor {
    /// Describe a setter on `T` receiving a resolved dependency.
    pub fn new<T, F>(name: impl Into<Arc<str>>, service_type: ServiceType, setter: F) -> Self
    where
        T: Injectable,
        F: Fn(&mut T, Object) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            service_type,
            required: false,
            apply: Arc::new(move |target: &mut Constructed, value: Object| {
                let target = (**target)
                    .downcast_mut::<T>()
                    .ok_or_else(DiError::type_mismatch::<T>)?;
                setter(target, value)
            }),
        }
    }

    /// Always inject this setter, failing the plan when it cannot be resolved.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub(crate) fn apply(&self, target: &mut Constructed, value: Object) -> Result<()> {
        (self.apply)(target, value)
    }
}

impl std::fmt::Debug for SetterDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetterDescriptor")
            .field("name", &self.name)
            .field("service_type", &self.service_type)
            .field("required", &self.required)
            .finish()
    }
}

// =============================================================================
// TypeDescriptor
// =============================================================================

/// Everything the container knows about a type.
#[derive(Clone)]
pub struct TypeDescriptor {
    service_type: ServiceType,
    concrete: bool,
    implements: Vec<ServiceType>,
    constructors: Vec<ConstructorDescriptor>,
    setters: Vec<SetterDescriptor>,
    dispose: Option<DisposeFn>,
}

impl TypeDescriptor {
    /// A concrete type that can be constructed.
    pub fn concrete(service_type: ServiceType) -> Self {
        Self {
            service_type,
            concrete: true,
            implements: Vec::new(),
            constructors: Vec::new(),
            setters: Vec::new(),
            dispose: None,
        }
    }

    /// A concrete descriptor for the Rust type `T`.
    pub fn of<T: Injectable>() -> Self {
        Self::concrete(ServiceType::of::<T>())
    }

    /// An abstract type (interface); it can only be satisfied by registrations.
    pub fn abstract_type(service_type: ServiceType) -> Self {
        Self {
            concrete: false,
            ..Self::concrete(service_type)
        }
    }

    /// Declare a service type this type can be used as.
    pub fn implements(mut self, service_type: ServiceType) -> Self {
        if !self.implements.contains(&service_type) {
            self.implements.push(service_type);
        }
        self
    }

    pub fn with_constructor(mut self, constructor: ConstructorDescriptor) -> Self {
        self.constructors.push(constructor);
        self
    }

    /// Shorthand for `with_constructor(ConstructorDescriptor::new(..))`.
    pub fn constructor<T, F>(self, parameters: Vec<Parameter>, body: F) -> Self
    where
        T: Injectable,
        F: Fn(&Arguments) -> Result<T> + Send + Sync + 'static,
    {
        self.with_constructor(ConstructorDescriptor::new(parameters, body))
    }

    pub fn with_setter(mut self, setter: SetterDescriptor) -> Self {
        self.setters.push(setter);
        self
    }

    /// Mark values of this type as disposable through [`Dispose`].
    pub fn disposable<T: Dispose>(mut self) -> Self {
        self.dispose = Some(dispose_hook::<T>());
        self
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn is_concrete(&self) -> bool {
        self.concrete
    }

    pub fn interfaces(&self) -> &[ServiceType] {
        &self.implements
    }

    pub fn constructors(&self) -> &[ConstructorDescriptor] {
        &self.constructors
    }

    pub fn setters(&self) -> &[SetterDescriptor] {
        &self.setters
    }

    pub(crate) fn dispose_fn(&self) -> Option<&DisposeFn> {
        self.dispose.as_ref()
    }

    /// Whether a value of this type can satisfy `service_type`.
    pub fn can_be_cast_to(&self, service_type: &ServiceType) -> bool {
        &self.service_type == service_type || self.implements.contains(service_type)
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("service_type", &self.service_type)
            .field("concrete", &self.concrete)
            .field("implements", &self.implements)
            .field("constructors", &self.constructors.len())
            .field("setters", &self.setters.len())
            .field("disposable", &self.dispose.is_some())
            .finish()
    }
}

/// Build a disposal hook for `T`.
pub(crate) fn dispose_hook<T: Dispose>() -> DisposeFn {
    Arc::new(|object: &Object| {
        if let Some(value) = object.downcast_ref::<T>() {
            value.dispose();
        }
    })
}

// =============================================================================
// Generic templates
// =============================================================================

/// An open generic type: a builder parameterized by a type-argument list that
/// produces the closed descriptor on first request.
#[derive(Clone)]
pub struct GenericTemplate {
    name: Arc<str>,
    arity: usize,
    build: TemplateFn,
}

impl GenericTemplate {
    pub fn new<F>(name: impl Into<Arc<str>>, arity: usize, build: F) -> Self
    where
        F: Fn(&[ServiceType]) -> Option<TypeDescriptor> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            build: Arc::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Close the template over `args`; `None` when the arguments do not fit.
    pub fn close(&self, args: &[ServiceType]) -> Option<TypeDescriptor> {
        if args.len() != self.arity {
            return None;
        }
        (self.build)(args)
    }
}

impl std::fmt::Debug for GenericTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GenericTemplate({}/{})", self.name, self.arity)
    }
}

// =============================================================================
// Service trait - typed descriptors
// =============================================================================

/// A service that declares its dependencies at compile time.
///
/// The `Dependencies` associated type lists what the service needs; the
/// derived [`descriptor`](Service::descriptor) exposes them as constructor
/// parameters.
///
/// # Supported Dependency Types
///
/// - `()` - No dependencies
/// - `Arc<T>` - A concrete service, downcast on injection
/// - `Inject<T>` - Any service type (including trait objects), kept erased
/// - `Many<T>` - Every registration of `T`
/// - `Option<Arc<T>>` - `None` when `T` cannot be resolved
/// - Tuples of the above (up to 8 elements)
pub trait Service: Injectable + Sized {
    /// The dependencies required to create this service.
    type Dependencies: DependencyList;

    /// Create a new instance given the resolved dependencies.
    fn create(deps: Self::Dependencies) -> Self;

    /// Descriptor with a single constructor taking `Dependencies`.
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>().constructor(Self::Dependencies::parameters(), |args| {
            Ok(Self::create(Self::Dependencies::extract(args)?))
        })
    }
}

/// A list of dependencies extracted from constructor [`Arguments`].
pub trait DependencyList: Sized {
    fn parameters() -> Vec<Parameter>;
    fn extract(args: &Arguments) -> Result<Self>;
}

/// A single dependency slot.
pub trait Dependency: Sized {
    fn service_type() -> ServiceType;
    fn extract(args: &Arguments, index: usize) -> Result<Self>;

    /// Value used when the dependency cannot be resolved.
    fn default_value() -> Option<Object> {
        None
    }
}

/// Placeholder default for optional dependencies that could not be resolved.
struct Absent;

/// An erased dependency on any service type, including trait objects.
pub struct Inject<T: ?Sized> {
    object: Object,
    _marker: PhantomData<fn() -> *const T>,
}

impl<T: ?Sized> Inject<T> {
    pub fn object(&self) -> &Object {
        &self.object
    }

    pub fn into_object(self) -> Object {
        self.object
    }

    /// Downcast to the concrete implementation.
    pub fn downcast<U: Injectable>(&self) -> Result<Arc<U>> {
        downcast(Arc::clone(&self.object))
    }
}

/// Every registration of `T`, in registration order.
pub struct Many<T: ?Sized> {
    items: Vec<Object>,
    _marker: PhantomData<fn() -> *const T>,
}

impl<T: ?Sized> Many<T> {
    pub fn items(&self) -> &[Object] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Injectable> Dependency for Arc<T> {
    fn service_type() -> ServiceType {
        ServiceType::of::<T>()
    }

    fn extract(args: &Arguments, index: usize) -> Result<Self> {
        args.get::<T>(index)
    }
}

impl<T: Injectable> Dependency for Option<Arc<T>> {
    fn service_type() -> ServiceType {
        ServiceType::of::<T>()
    }

    fn extract(args: &Arguments, index: usize) -> Result<Self> {
        let arg = args.object(index)?;
        if arg.is::<Absent>() {
            return Ok(None);
        }
        downcast(arg).map(Some)
    }

    fn default_value() -> Option<Object> {
        Some(Arc::new(Absent))
    }
}

impl<T: ?Sized + 'static> Dependency for Inject<T> {
    fn service_type() -> ServiceType {
        ServiceType::of::<T>()
    }

    fn extract(args: &Arguments, index: usize) -> Result<Self> {
        Ok(Inject {
            object: args.object(index)?,
            _marker: PhantomData,
        })
    }
}

impl<T: ?Sized + 'static> Dependency for Many<T> {
    fn service_type() -> ServiceType {
        ServiceType::array_of(ServiceType::of::<T>())
    }

    fn extract(args: &Arguments, index: usize) -> Result<Self> {
        Ok(Many {
            items: args.many(index)?,
            _marker: PhantomData,
        })
    }
}

impl DependencyList for () {
    fn parameters() -> Vec<Parameter> {
        Vec::new()
    }

    fn extract(_args: &Arguments) -> Result<Self> {
        Ok(())
    }
}

// Tuple implementations (1-8 elements)
macro_rules! impl_dependency_list_tuple {
    ($($T:ident => $idx:tt),+) => {
        impl<$($T: Dependency),+> DependencyList for ($($T,)+) {
            fn parameters() -> Vec<Parameter> {
                vec![$({
                    let ty = $T::service_type();
                    let parameter = Parameter::new(ty.variable_name(), ty);
                    match $T::default_value() {
                        Some(value) => parameter.with_default(value),
                        None => parameter,
                    }
                }),+]
            }

            fn extract(args: &Arguments) -> Result<Self> {
                Ok(($($T::extract(args, $idx)?,)+))
            }
        }
    };
}

impl_dependency_list_tuple!(A => 0);
impl_dependency_list_tuple!(A => 0, B => 1);
impl_dependency_list_tuple!(A => 0, B => 1, C => 2);
impl_dependency_list_tuple!(A => 0, B => 1, C => 2, D => 3);
impl_dependency_list_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_dependency_list_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_dependency_list_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
impl_dependency_list_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::object;

    #[derive(Debug)]
    struct Config {
        level: u32,
    }

    struct Logger {
        config: Arc<Config>,
        name: String,
    }

    impl Service for Config {
        type Dependencies = ();

        fn create(_: ()) -> Self {
            Config { level: 3 }
        }
    }

    impl Service for Logger {
        type Dependencies = (Arc<Config>,);

        fn create((config,): Self::Dependencies) -> Self {
            Logger {
                config,
                name: String::new(),
            }
        }
    }

    #[test]
    fn test_service_descriptor_parameters() {
        let descriptor = Logger::descriptor();
        let ctor = &descriptor.constructors()[0];

        assert!(descriptor.is_concrete());
        assert_eq!(ctor.parameters().len(), 1);
        assert_eq!(ctor.parameters()[0].service_type(), &ServiceType::of::<Config>());
    }

    #[test]
    fn test_constructor_invocation() {
        let descriptor = Logger::descriptor();
        let args = Arguments::new(vec![object(Config { level: 7 })]);

        let built = descriptor.constructors()[0].construct(&args).unwrap();
        let logger = built.downcast::<Logger>().ok().unwrap();
        assert_eq!(logger.config.level, 7);
    }

    #[test]
    fn test_setter_applies_to_constructed_value() {
        let setter = SetterDescriptor::new::<Logger, _>(
            "name",
            ServiceType::of::<String>(),
            |logger, value| {
                logger.name = (*downcast::<String>(value)?).clone();
                Ok(())
            },
        );

        let mut built: Constructed = Box::new(Logger::create((Arc::new(Config::create(())),)));
        setter.apply(&mut built, object("audit".to_string())).unwrap();

        let logger = built.downcast::<Logger>().ok().unwrap();
        assert_eq!(logger.name, "audit");
    }

    #[test]
    fn test_optional_dependency_defaults_to_none() {
        let parameters = <(Option<Arc<Config>>,)>::parameters();
        let absent = parameters[0].default_value().cloned().unwrap();

        let (config,) = <(Option<Arc<Config>>,)>::extract(&Arguments::new(vec![absent])).unwrap();
        assert!(config.is_none());

        let (config,) =
            <(Option<Arc<Config>>,)>::extract(&Arguments::new(vec![object(Config { level: 1 })]))
                .unwrap();
        assert_eq!(config.unwrap().level, 1);
    }

    #[test]
    fn test_arguments_type_mismatch() {
        let args = Arguments::new(vec![object(1u8)]);
        assert!(matches!(args.get::<Config>(0), Err(DiError::TypeMismatch { .. })));
        assert!(args.object(3).is_err());
    }

    #[test]
    fn test_generic_template_arity() {
        let template = GenericTemplate::new("Repository", 1, |args| {
            Some(TypeDescriptor::concrete(ServiceType::generic(
                "Repository",
                args.iter().cloned(),
            )))
        });

        assert!(template.close(&[ServiceType::named("User")]).is_some());
        assert!(template.close(&[]).is_none());
    }
}
