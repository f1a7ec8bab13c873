//! Dependency walks over instance plans: cycle detection, async detection
//! and the captive-dependency rule.

use crate::graph::ServiceGraph;
use crate::instance::{Dependency, Instance, InstanceId, InstanceKind};
use crate::provider::Lifetime;
use crate::{DiError, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// A dependency edge between two instances.
pub(crate) struct Edge {
    pub target: Arc<Instance>,
    /// Resolved on demand through a `Lazy<T>`/`Func<T>` wrapper
    pub deferred: bool,
}

/// Direct dependencies of `instance`.
pub(crate) fn edges(instance: &Instance, graph: &ServiceGraph) -> Result<Vec<Edge>> {
    let edge = |target: Arc<Instance>| Edge {
        target,
        deferred: false,
    };

    Ok(match instance.kind() {
        InstanceKind::Constructor { .. } | InstanceKind::Decorated { .. } => {
            let Some(plan) = instance.plan(graph)? else {
                return Ok(Vec::new());
            };
            plan.dependencies()
                .filter_map(|dependency| match dependency {
                    Dependency::Instance(target) => Some(edge(Arc::clone(target))),
                    Dependency::Lookup(ty) => graph.find_default(ty).map(&edge),
                    Dependency::Value(_) => None,
                })
                .collect()
        }
        InstanceKind::Enumerable { elements, .. } => elements.iter().cloned().map(&edge).collect(),
        InstanceKind::Deferred { target, .. } => graph
            .find_default(target)
            .map(|target| Edge {
                target,
                deferred: true,
            })
            .into_iter()
            .collect(),
        InstanceKind::Factory(_)
        | InstanceKind::AsyncFactory(_)
        | InstanceKind::Object(_)
        | InstanceKind::Injected => Vec::new(),
    })
}

fn cycle_member(instance: &Instance) -> String {
    instance.implementation_type().to_string()
}

fn find_cycle(
    instance: &Arc<Instance>,
    graph: &ServiceGraph,
    follow_deferred: bool,
    path: &mut Vec<Arc<Instance>>,
    done: &mut HashSet<InstanceId>,
) -> Result<Option<Vec<String>>> {
    if done.contains(instance.id()) {
        return Ok(None);
    }
    if let Some(start) = path.iter().position(|p| p.id() == instance.id()) {
        let mut cycle: Vec<String> = path[start..].iter().map(|p| cycle_member(p)).collect();
        cycle.push(cycle_member(instance));
        return Ok(Some(cycle));
    }

    path.push(Arc::clone(instance));
    for edge in edges(instance, graph)? {
        if edge.deferred && !follow_deferred {
            continue;
        }
        if let Some(cycle) = find_cycle(&edge.target, graph, follow_deferred, path, done)? {
            return Ok(Some(cycle));
        }
    }
    path.pop();
    done.insert(instance.id().clone());
    Ok(None)
}

/// Fail with a cycle error naming the members when `instance` depends on
/// itself through eagerly built dependencies.
pub fn assert_no_cycles(instance: &Arc<Instance>, graph: &ServiceGraph) -> Result<()> {
    match find_cycle(instance, graph, false, &mut Vec::new(), &mut HashSet::new())? {
        Some(cycle) => Err(DiError::circular(cycle)),
        None => Ok(()),
    }
}

/// Whether `instance` reaches itself once `Lazy`/`Func` edges are followed.
///
/// Only meaningful after [`assert_no_cycles`] succeeded; any cycle found here
/// passes through a deferred edge.
pub fn has_deferred_cycle(instance: &Arc<Instance>, graph: &ServiceGraph) -> Result<bool> {
    Ok(find_cycle(instance, graph, true, &mut Vec::new(), &mut HashSet::new())?.is_some())
}

/// Whether building `instance` awaits an asynchronous factory anywhere in
/// its eagerly built dependency chain.
///
/// Requires an acyclic chain.
pub fn requires_async(instance: &Instance, graph: &ServiceGraph) -> Result<bool> {
    instance
        .requires_async_cell()
        .get_or_try_init(|| {
            if matches!(instance.kind(), InstanceKind::AsyncFactory(_)) {
                return Ok(true);
            }
            for edge in edges(instance, graph)? {
                if !edge.deferred && requires_async(&edge.target, graph)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .copied()
}

/// A singleton must not hold on to a scoped instance, directly or through
/// transients, unless the registration allows it.
pub fn check_captive(instance: &Arc<Instance>, graph: &ServiceGraph) -> Result<()> {
    if instance.lifetime() != Lifetime::Singleton || instance.allows_captive() {
        return Ok(());
    }

    let mut seen = HashSet::new();
    let mut pending = vec![Arc::clone(instance)];
    while let Some(current) = pending.pop() {
        for edge in edges(&current, graph)? {
            if edge.deferred || !seen.insert(edge.target.id().clone()) {
                continue;
            }
            match edge.target.lifetime() {
                Lifetime::Scoped => {
                    return Err(DiError::CaptiveDependency {
                        singleton: instance.description(),
                        dependency: edge.target.description(),
                    });
                }
                Lifetime::Transient => pending.push(edge.target),
                Lifetime::Singleton => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::GenerationRules;
    use crate::descriptor::{Parameter, TypeDescriptor};
    use crate::factory::async_factory;
    use crate::provider::ServiceType;
    use crate::registry::ServiceRegistry;

    struct Thing;

    fn ty(name: &str) -> ServiceType {
        match name.strip_prefix("Lazy<").and_then(|n| n.strip_suffix('>')) {
            Some(target) => ServiceType::lazy_of(target.into()),
            None => name.into(),
        }
    }

    fn needs(name: &str, deps: &[&str]) -> TypeDescriptor {
        let parameters = deps
            .iter()
            .map(|d| Parameter::new(d.to_lowercase(), ty(d)))
            .collect();
        TypeDescriptor::concrete(name.into()).constructor(parameters, |_| Ok(Thing))
    }

    fn build(registry: ServiceRegistry) -> ServiceGraph {
        ServiceGraph::build(registry, GenerationRules::default())
    }

    #[test]
    fn test_cycle_is_reported_with_members() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("A").use_type(needs("A", &["B"]));
        registry.for_type("B").use_type(needs("B", &["A"]));
        let graph = build(registry);

        let a = graph.find_default(&"A".into()).unwrap();
        let err = assert_no_cycles(&a, &graph).unwrap_err();
        let DiError::CircularDependency { cycle } = err else {
            panic!("expected a cycle error");
        };
        assert_eq!(cycle, vec!["A", "B", "A"]);
    }

    #[test]
    fn test_lazy_edge_breaks_cycle() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("A").use_type(needs("A", &["B"]));
        registry.for_type("B").use_type(needs("B", &["Lazy<A>"]));
        let graph = build(registry);

        let a = graph.find_default(&"A".into()).unwrap();
        assert!(assert_no_cycles(&a, &graph).is_ok());
        assert!(has_deferred_cycle(&a, &graph).unwrap());
    }

    #[test]
    fn test_requires_async_propagates() {
        let mut registry = ServiceRegistry::new();
        registry
            .for_type("Conn")
            .use_async_factory(async_factory(|_| async { Ok(Thing) }));
        registry.for_type("Repo").use_type(needs("Repo", &["Conn"]));
        registry.for_type("Plain").use_type(needs("Plain", &[]));
        let graph = build(registry);

        let repo = graph.find_default(&"Repo".into()).unwrap();
        let plain = graph.find_default(&"Plain".into()).unwrap();
        assert!(requires_async(&repo, &graph).unwrap());
        assert!(!requires_async(&plain, &graph).unwrap());
    }

    #[test]
    fn test_singleton_capturing_scoped_through_transient() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("Session").use_type(needs("Session", &[])).scoped();
        registry.for_type("Helper").use_type(needs("Helper", &["Session"]));
        registry.for_type("Cache").use_type(needs("Cache", &["Helper"])).singleton();
        registry
            .for_type("Tolerant")
            .use_type(needs("Tolerant", &["Session"]))
            .singleton()
            .allow_captive();
        let graph = build(registry);

        let cache = graph.find_default(&"Cache".into()).unwrap();
        assert!(matches!(
            check_captive(&cache, &graph),
            Err(DiError::CaptiveDependency { .. })
        ));

        let tolerant = graph.find_default(&"Tolerant".into()).unwrap();
        assert!(check_captive(&tolerant, &graph).is_ok());
    }

    #[test]
    fn test_singleton_may_capture_transient() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("Helper").use_type(needs("Helper", &[]));
        registry.for_type("Cache").use_type(needs("Cache", &["Helper"])).singleton();
        let graph = build(registry);

        let cache = graph.find_default(&"Cache".into()).unwrap();
        assert!(check_captive(&cache, &graph).is_ok());
    }
}
