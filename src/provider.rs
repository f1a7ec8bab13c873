//! Core vocabulary for the container: lifetimes, structural service type
//! identities and type-erased values.

use crate::{DiError, Result};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A type-erased service value.
///
/// Every resolved service is handed out as an `Object`. Arrays resolve to
/// `Box<[Object]>`, lists to `Vec<Object>`.
pub type Object = Arc<dyn Any + Send + Sync>;

/// Marker trait for types that can be stored in the container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
pub trait Injectable: Send + Sync + 'static {}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// Wrap a value into an [`Object`].
#[inline]
pub fn object<T: Injectable>(value: T) -> Object {
    Arc::new(value)
}

/// Downcast an [`Object`] to a concrete `Arc<T>`.
#[inline]
pub fn downcast<T: Injectable>(object: Object) -> Result<Arc<T>> {
    object
        .downcast::<T>()
        .map_err(|_| DiError::type_mismatch::<T>())
}

/// Synchronous disposal capability.
///
/// Services implementing this trait are disposed in reverse construction
/// order when the scope that tracked them is disposed.
pub trait Dispose: Send + Sync + 'static {
    /// Release any resources held by the service.
    fn dispose(&self);
}

/// Service lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Lifetime {
    /// New instance created on every resolve
    #[default]
    Transient,

    /// One instance per scope
    Scoped,

    /// Single instance shared by the root and every nested scope
    Singleton,
}

impl Lifetime {
    /// Lower-case name used in diagnostics and generated code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifetime::Transient => "transient",
            Lifetime::Scoped => "scoped",
            Lifetime::Singleton => "singleton",
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of an open generic definition: the generic name and its arity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenericKey {
    name: Arc<str>,
    arity: usize,
}

impl GenericKey {
    pub fn new(name: impl Into<Arc<str>>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl fmt::Display for GenericKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.name, ",".repeat(self.arity.saturating_sub(1)))
    }
}

/// Structural identity of a requested service.
///
/// The container never inspects live Rust types; everything it knows about a
/// type is keyed by a `ServiceType` and described by a
/// [`TypeDescriptor`](crate::TypeDescriptor).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceType {
    /// A plain or closed generic type (`args` is empty for non-generic types)
    Named {
        name: Arc<str>,
        args: Arc<[ServiceType]>,
    },
    /// `T[]` - every registration of `T`, as a fixed array
    Array(Arc<ServiceType>),
    /// `List<T>` - every registration of `T`, as a growable list
    List(Arc<ServiceType>),
    /// `Lazy<T>` - resolves `T` on first access
    Lazy(Arc<ServiceType>),
    /// `Func<T>` - resolves `T` every time it is called
    Func(Arc<ServiceType>),
}

impl ServiceType {
    /// A non-generic named type.
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        ServiceType::Named {
            name: name.into(),
            args: Arc::from(Vec::new()),
        }
    }

    /// A closed generic type such as `IRepository<User>`.
    pub fn generic(name: impl Into<Arc<str>>, args: impl IntoIterator<Item = ServiceType>) -> Self {
        ServiceType::Named {
            name: name.into(),
            args: args.into_iter().collect::<Vec<_>>().into(),
        }
    }

    /// The named type for a Rust type, keyed by `std::any::type_name`.
    ///
    /// Works for trait objects as well: `ServiceType::of::<dyn Widget>()`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::named(std::any::type_name::<T>())
    }

    pub fn array_of(element: ServiceType) -> Self {
        ServiceType::Array(Arc::new(element))
    }

    pub fn list_of(element: ServiceType) -> Self {
        ServiceType::List(Arc::new(element))
    }

    pub fn lazy_of(target: ServiceType) -> Self {
        ServiceType::Lazy(Arc::new(target))
    }

    pub fn func_of(target: ServiceType) -> Self {
        ServiceType::Func(Arc::new(target))
    }

    /// Generic arguments of a closed generic type (empty otherwise).
    pub fn args(&self) -> &[ServiceType] {
        match self {
            ServiceType::Named { args, .. } => args,
            _ => &[],
        }
    }

    pub fn is_generic(&self) -> bool {
        !self.args().is_empty()
    }

    /// The open generic definition this type closes, if any.
    pub fn generic_definition(&self) -> Option<GenericKey> {
        match self {
            ServiceType::Named { name, args } if !args.is_empty() => {
                Some(GenericKey::new(Arc::clone(name), args.len()))
            }
            _ => None,
        }
    }

    /// Element type of an array or list type.
    pub fn element_type(&self) -> Option<&ServiceType> {
        match self {
            ServiceType::Array(inner) | ServiceType::List(inner) => Some(inner),
            _ => None,
        }
    }

    /// Target type of a `Lazy<T>` or `Func<T>`.
    pub fn deferred_target(&self) -> Option<&ServiceType> {
        match self {
            ServiceType::Lazy(inner) | ServiceType::Func(inner) => Some(inner),
            _ => None,
        }
    }

    /// Identifier-safe short name: module paths are dropped and generic
    /// arguments are folded into the name (`IRepository<a::User>` becomes
    /// `IRepository_User`).
    pub fn short_name(&self) -> String {
        match self {
            ServiceType::Named { name, args } => {
                let mut out = sanitize_identifier(last_segment(name));
                for arg in args.iter() {
                    out.push('_');
                    out.push_str(&arg.short_name());
                }
                out
            }
            ServiceType::Array(inner) => format!("{}_array", inner.short_name()),
            ServiceType::List(inner) => format!("{}_list", inner.short_name()),
            ServiceType::Lazy(inner) => format!("lazy_{}", inner.short_name()),
            ServiceType::Func(inner) => format!("func_{}", inner.short_name()),
        }
    }

    /// Snake-case variable name derived from the short name.
    pub fn variable_name(&self) -> String {
        to_snake_case(&self.short_name())
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Named { name, args } => {
                f.write_str(name)?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
            ServiceType::Array(inner) => write!(f, "{}[]", inner),
            ServiceType::List(inner) => write!(f, "List<{}>", inner),
            ServiceType::Lazy(inner) => write!(f, "Lazy<{}>", inner),
            ServiceType::Func(inner) => write!(f, "Func<{}>", inner),
        }
    }
}

impl From<&str> for ServiceType {
    fn from(name: &str) -> Self {
        ServiceType::named(name)
    }
}

/// Last path segment of a Rust type name, without any `dyn ` prefix or
/// generic suffix.
fn last_segment(name: &str) -> &str {
    let name = name.strip_prefix("dyn ").unwrap_or(name);
    let head = name.split('<').next().unwrap_or(name);
    head.rsplit("::").next().unwrap_or(head)
}

/// Replace every character that cannot appear in an identifier.
pub(crate) fn sanitize_identifier(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn to_snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Widget {}
    struct AWidget;

    #[test]
    fn test_display_of_composite_types() {
        let user = ServiceType::named("User");
        let repo = ServiceType::generic("IRepository", [user.clone()]);

        assert_eq!(repo.to_string(), "IRepository<User>");
        assert_eq!(ServiceType::array_of(user.clone()).to_string(), "User[]");
        assert_eq!(ServiceType::list_of(user.clone()).to_string(), "List<User>");
        assert_eq!(ServiceType::lazy_of(user).to_string(), "Lazy<User>");
    }

    #[test]
    fn test_generic_definition() {
        let repo = ServiceType::generic("IRepository", [ServiceType::named("User")]);
        let key = repo.generic_definition().unwrap();

        assert_eq!(key.name(), "IRepository");
        assert_eq!(key.arity(), 1);
        assert!(ServiceType::named("User").generic_definition().is_none());
    }

    #[test]
    fn test_short_and_variable_names() {
        assert_eq!(ServiceType::of::<AWidget>().short_name(), "AWidget");
        assert_eq!(ServiceType::of::<dyn Widget>().short_name(), "Widget");
        assert_eq!(ServiceType::of::<AWidget>().variable_name(), "awidget");

        let repo = ServiceType::generic("IRepository", [ServiceType::named("my::User")]);
        assert_eq!(repo.short_name(), "IRepository_User");
        assert_eq!(ServiceType::named("ConsoleLogger").variable_name(), "console_logger");
    }

    #[test]
    fn test_downcast_mismatch() {
        let value = object(42u32);
        assert!(downcast::<String>(value.clone()).is_err());
        assert_eq!(*downcast::<u32>(value).unwrap(), 42);
    }
}
