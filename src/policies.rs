//! Family policies
//!
//! When a service type has no registered family, the graph asks each policy
//! in turn to synthesize one. The first policy returning a family wins; the
//! chain ends with a policy that always answers, so "nothing registered" is
//! an explicit empty family rather than an absence.
//!
//! Order: concrete type, enumerable, deferred wrapper, closed generic, empty.

use crate::factory::DeferredKind;
use crate::graph::{FamilySource, ServiceFamily, ServiceGraph};
use crate::instance::{EnumerableKind, Instance, InstanceId, InstanceKind};
use crate::provider::{Lifetime, ServiceType};
use std::sync::Arc;

/// One link of the family policy chain.
///
/// Policies must be pure functions of the requested type and the graph.
pub trait FamilyPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Synthesize a family for `service_type`, or pass.
    fn build(&self, service_type: &ServiceType, graph: &ServiceGraph) -> Option<ServiceFamily>;
}

/// The policy chain in evaluation order.
pub(crate) fn default_policies() -> Vec<Box<dyn FamilyPolicy>> {
    vec![
        Box::new(ConcreteTypePolicy),
        Box::new(EnumerablePolicy),
        Box::new(DeferredPolicy),
        Box::new(CloseGenericFamilyPolicy),
        Box::new(EmptyFamilyPolicy),
    ]
}

// =============================================================================
// Concrete types
// =============================================================================

/// A concrete type with a constructor whose parameters can all be supplied
/// becomes a single transient instance.
pub struct ConcreteTypePolicy;

impl ConcreteTypePolicy {
    /// Whether some constructor of `ty` has every parameter within reach.
    fn has_satisfiable_constructor(ty: &crate::TypeDescriptor, graph: &ServiceGraph) -> bool {
        ty.constructors().iter().any(|ctor| {
            ctor.parameters()
                .iter()
                .all(|p| p.default_value().is_some() || graph.can_supply(p.service_type()))
        })
    }
}

impl FamilyPolicy for ConcreteTypePolicy {
    fn name(&self) -> &'static str {
        "concrete-type"
    }

    fn build(&self, service_type: &ServiceType, graph: &ServiceGraph) -> Option<ServiceFamily> {
        let descriptor = graph.registry().catalog().get(service_type)?;
        if !descriptor.is_concrete() || !Self::has_satisfiable_constructor(descriptor, graph) {
            return None;
        }

        let instance = Instance::new(
            InstanceId::new(format!("concrete:{}", service_type)),
            service_type.clone(),
            service_type.clone(),
            Lifetime::Transient,
            InstanceKind::Constructor {
                descriptor: descriptor.clone(),
                inline: Vec::new(),
            },
        );
        let instance = graph.decorate(Arc::new(instance));
        Some(ServiceFamily::new(
            service_type.clone(),
            vec![instance],
            FamilySource::ConcreteType,
        ))
    }
}

// =============================================================================
// Arrays and lists
// =============================================================================

/// `T[]` and `List<T>` aggregate every instance of `T`.
///
/// The element list is a snapshot taken when the family is synthesized.
pub struct EnumerablePolicy;

impl FamilyPolicy for EnumerablePolicy {
    fn name(&self) -> &'static str {
        "enumerable"
    }

    fn build(&self, service_type: &ServiceType, graph: &ServiceGraph) -> Option<ServiceFamily> {
        let (kind, element_type, prefix) = match service_type {
            ServiceType::Array(element) => (EnumerableKind::Array, element, "array"),
            ServiceType::List(element) => (EnumerableKind::List, element, "list"),
            _ => return None,
        };

        let elements = graph.find_all(element_type);
        let instance = Instance::new(
            InstanceId::new(format!("{}:{}", prefix, element_type)),
            service_type.clone(),
            service_type.clone(),
            Lifetime::Transient,
            InstanceKind::Enumerable {
                kind,
                element_type: (**element_type).clone(),
                elements,
            },
        )
        .with_ownership(false, false);

        Some(ServiceFamily::new(
            service_type.clone(),
            vec![Arc::new(instance)],
            FamilySource::Enumerable,
        ))
    }
}

// =============================================================================
// Lazy / Func
// =============================================================================

/// `Lazy<T>` and `Func<T>` wrap the default instance of `T`, resolved when
/// the wrapper is used rather than when it is built.
pub struct DeferredPolicy;

impl FamilyPolicy for DeferredPolicy {
    fn name(&self) -> &'static str {
        "deferred"
    }

    fn build(&self, service_type: &ServiceType, _graph: &ServiceGraph) -> Option<ServiceFamily> {
        let (kind, target) = DeferredKind::of(service_type)?;
        let instance = Instance::new(
            InstanceId::new(format!("{}:{}", kind.as_str().to_lowercase(), target)),
            service_type.clone(),
            service_type.clone(),
            Lifetime::Transient,
            InstanceKind::Deferred {
                kind,
                target: target.clone(),
            },
        )
        .with_ownership(false, false);

        Some(ServiceFamily::new(
            service_type.clone(),
            vec![Arc::new(instance)],
            FamilySource::Deferred,
        ))
    }
}

// =============================================================================
// Closed generics
// =============================================================================

/// Close open generic registrations over the requested type arguments.
///
/// When no template accepts the arguments, fall back to the single catalog
/// type that structurally implements the closed type.
pub struct CloseGenericFamilyPolicy;

impl CloseGenericFamilyPolicy {
    fn connect_structurally(service_type: &ServiceType, graph: &ServiceGraph) -> Option<ServiceFamily> {
        let candidates = graph.registry().catalog().implementors_of(service_type);
        let [descriptor] = candidates.as_slice() else {
            return None;
        };

        let instance = Instance::new(
            InstanceId::new(format!("connected:{}", service_type)),
            service_type.clone(),
            descriptor.service_type().clone(),
            Lifetime::Transient,
            InstanceKind::Constructor {
                descriptor: (*descriptor).clone(),
                inline: Vec::new(),
            },
        )
        .closed_from_template();

        Some(ServiceFamily::new(
            service_type.clone(),
            vec![graph.decorate(Arc::new(instance))],
            FamilySource::ClosedGeneric,
        ))
    }
}

impl FamilyPolicy for CloseGenericFamilyPolicy {
    fn name(&self) -> &'static str {
        "close-generic"
    }

    fn build(&self, service_type: &ServiceType, graph: &ServiceGraph) -> Option<ServiceFamily> {
        let key = service_type.generic_definition()?;
        let templates = graph.generic_templates(&key);
        if templates.is_empty() {
            return None;
        }

        let args = service_type.args();
        let arg_list = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        let instances: Vec<Arc<Instance>> = templates
            .iter()
            .filter_map(|open| {
                let closed = open.template().close(args)?;
                let instance = Instance::new(
                    InstanceId::new(format!("r{}<{}>", open.sequence(), arg_list)),
                    service_type.clone(),
                    closed.service_type().clone(),
                    open.lifetime(),
                    InstanceKind::Constructor {
                        descriptor: closed,
                        inline: Vec::new(),
                    },
                )
                .with_name(open.name().map(Arc::from))
                .with_default(open.is_default(), false)
                .closed_from_template();
                Some(graph.decorate(Arc::new(instance)))
            })
            .collect();

        if instances.is_empty() {
            return Self::connect_structurally(service_type, graph);
        }

        Some(ServiceFamily::new(
            service_type.clone(),
            instances,
            FamilySource::ClosedGeneric,
        ))
    }
}

// =============================================================================
// Empty
// =============================================================================

/// Terminal policy: an empty family carrying the reason nothing matched.
pub struct EmptyFamilyPolicy;

impl FamilyPolicy for EmptyFamilyPolicy {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn build(&self, service_type: &ServiceType, graph: &ServiceGraph) -> Option<ServiceFamily> {
        let catalog = graph.registry().catalog();

        if let Some(descriptor) = catalog.get(service_type).filter(|d| d.is_concrete()) {
            let reason = descriptor
                .constructors()
                .iter()
                .flat_map(|ctor| ctor.parameters())
                .find(|p| p.default_value().is_none() && !graph.can_supply(p.service_type()))
                .map(|p| {
                    format!(
                        "cannot resolve parameter '{}' of type {}",
                        p.name(),
                        p.service_type()
                    )
                })
                .unwrap_or_else(|| "it has no constructor".to_string());
            return Some(ServiceFamily::empty(
                service_type.clone(),
                FamilySource::Unsatisfiable,
                format!("Concrete type {} cannot be built: {}", service_type, reason),
            ));
        }

        if service_type.is_generic() {
            let candidates = catalog.implementors_of(service_type);
            if candidates.len() > 1 {
                let names: Vec<String> = candidates.iter().map(|d| d.service_type().to_string()).collect();
                return Some(ServiceFamily::empty(
                    service_type.clone(),
                    FamilySource::Unsatisfiable,
                    format!(
                        "Ambiguous generic closure for {}, candidates: {}",
                        service_type,
                        names.join(", ")
                    ),
                ));
            }
        }

        Some(ServiceFamily::empty(
            service_type.clone(),
            FamilySource::Empty,
            format!("No service registrations exist or can be derived for {}", service_type),
        ))
    }
}
