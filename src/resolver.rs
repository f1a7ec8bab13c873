//! Resolvers
//!
//! A [`Resolver`] builds the value of one instance and applies its lifetime:
//! singletons are cached in the root scope, scoped instances in the
//! resolving scope, transients are built on every call. How the value is
//! built depends on the [`ResolverStrategy`] picked for the instance.

use crate::codegen::{CompiledMethod, GeneratedAssembly, PrebuiltBuild, TypeLoadMode};
use crate::descriptor::Arguments;
use crate::factory::BoxFuture;
use crate::frames::{self, BUILD_METHOD, RESOLVER_BASE, ResolverVariables};
use crate::graph::ServiceGraph;
use crate::instance::{Dependency, Instance, InstanceId, InstanceKind};
use crate::planning;
use crate::provider::{Lifetime, Object, ServiceType, sanitize_identifier};
use crate::scope::Scope;
use crate::{DiError, Result};
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// How a resolver builds its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolverStrategy {
    /// Hand out a pre-built or injected value
    Direct,
    /// Generated code that looks plain dependencies up through the scope
    ServiceLookup,
    /// Generated code building the whole dependency chain inline
    Generated,
    /// Composed closures; used where a `Lazy`/`Func` edge closes a cycle
    ExpressionTree,
    /// Walk the plan on every call without compiling
    Interpreted,
}

impl ResolverStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolverStrategy::Direct => "direct",
            ResolverStrategy::ServiceLookup => "service lookup",
            ResolverStrategy::Generated => "generated",
            ResolverStrategy::ExpressionTree => "expression tree",
            ResolverStrategy::Interpreted => "interpreted",
        }
    }

    /// Whether the strategy is backed by a generated type.
    pub fn generates_type(&self) -> bool {
        matches!(self, ResolverStrategy::Generated | ResolverStrategy::ServiceLookup)
    }
}

impl fmt::Display for ResolverStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values built so far in one expression tree call, keyed by instance.
type Memo = HashMap<InstanceId, Object, RandomState>;

type BuildFn = Arc<dyn Fn(&Scope, &mut Memo) -> Result<Object> + Send + Sync>;

enum Body {
    Direct,
    Compiled(Arc<CompiledMethod>),
    Prebuilt(PrebuiltBuild),
    Expression(BuildFn),
}

/// Builds and caches the value of one instance.
pub struct Resolver {
    instance: Arc<Instance>,
    strategy: ResolverStrategy,
    type_name: Option<String>,
    source_code: Option<String>,
    body: Body,
    requires_async: bool,
}

impl Resolver {
    fn new(instance: &Arc<Instance>, strategy: ResolverStrategy, body: Body, requires_async: bool) -> Self {
        Self {
            instance: Arc::clone(instance),
            strategy,
            type_name: None,
            source_code: None,
            body,
            requires_async,
        }
    }

    fn with_type(mut self, type_name: String, source_code: Option<String>) -> Self {
        self.type_name = Some(type_name);
        self.source_code = source_code;
        self
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn service_type(&self) -> &ServiceType {
        self.instance.service_type()
    }

    pub fn strategy(&self) -> ResolverStrategy {
        self.strategy
    }

    /// Name of the generated or prebuilt type behind this resolver.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Source of the generated type, absent for prebuilt types.
    pub fn source_code(&self) -> Option<&str> {
        self.source_code.as_deref()
    }

    /// Whether resolution must go through [`resolve_async`](Self::resolve_async).
    pub fn requires_async(&self) -> bool {
        self.requires_async
    }

    /// Resolve the value within `scope`, honoring the instance's lifetime.
    pub fn resolve(&self, scope: &Scope) -> Result<Object> {
        if matches!(self.instance.kind(), InstanceKind::Injected) {
            return scope.injected_value(self.instance.service_type());
        }
        if self.requires_async {
            return Err(DiError::AsyncResolutionRequired {
                service_type: self.instance.service_type().clone(),
            });
        }

        match cache_owner(&self.instance, scope)? {
            Some(owner) => {
                let (value, created) = owner
                    .cache()
                    .get_or_try_init(self.instance.id(), || self.build(&owner))?;
                if created {
                    owner.track_instance(&self.instance, &value);
                }
                owner.ensure_still_active()?;
                Ok(value)
            }
            None => {
                let value = self.build(scope)?;
                scope.track_instance(&self.instance, &value);
                scope.ensure_still_active()?;
                Ok(value)
            }
        }
    }

    /// Resolve the value, awaiting asynchronous factories along the way.
    pub async fn resolve_async(self: Arc<Self>, scope: &Scope) -> Result<Object> {
        if !self.requires_async {
            return self.resolve(scope);
        }

        #[cfg(feature = "logging")]
        trace!(target: "lamar", instance = %self.instance.id(), "Resolving asynchronously");

        match cache_owner(&self.instance, scope)? {
            Some(owner) => {
                let resolver = Arc::clone(&self);
                let build_scope = owner.clone();
                let (value, created) = owner
                    .cache()
                    .get_or_try_init_async(self.instance.id(), move || {
                        Box::pin(async move { resolver.build_async(&build_scope).await })
                            as BoxFuture<'static, Result<Object>>
                    })
                    .await?;
                if created {
                    owner.track_instance(&self.instance, &value);
                }
                owner.ensure_still_active()?;
                Ok(value)
            }
            None => {
                let value = self.build_async(scope).await?;
                scope.track_instance(&self.instance, &value);
                scope.ensure_still_active()?;
                Ok(value)
            }
        }
    }

    fn build(&self, scope: &Scope) -> Result<Object> {
        match &self.body {
            Body::Direct => direct_value(&self.instance, scope),
            Body::Compiled(method) => method.invoke(scope),
            Body::Prebuilt(build) => build(scope),
            Body::Expression(build) => build(scope, &mut Memo::default()),
        }
    }

    async fn build_async(&self, scope: &Scope) -> Result<Object> {
        match &self.body {
            Body::Compiled(method) => method.invoke_async(scope).await,
            _ => self.build(scope),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("instance", self.instance.id())
            .field("strategy", &self.strategy)
            .field("type_name", &self.type_name)
            .field("requires_async", &self.requires_async)
            .finish()
    }
}

/// The scope caching `instance`, `None` for transients.
///
/// Singletons and objects live in the root scope, scoped instances in the
/// resolving one.
fn cache_owner(instance: &Instance, scope: &Scope) -> Result<Option<Scope>> {
    if matches!(instance.kind(), InstanceKind::Object(_)) || instance.lifetime() == Lifetime::Singleton {
        let root = scope.root();
        root.ensure_active()?;
        return Ok(Some(root));
    }
    Ok(match instance.lifetime() {
        Lifetime::Scoped => Some(scope.clone()),
        _ => None,
    })
}

fn direct_value(instance: &Instance, scope: &Scope) -> Result<Object> {
    match instance.kind() {
        InstanceKind::Object(value) => Ok(Arc::clone(value)),
        InstanceKind::Injected => scope.injected_value(instance.service_type()),
        _ => Err(DiError::Internal(format!("{} has no direct value", instance.id()))),
    }
}

/// Name of the type generated for `instance`.
pub(crate) fn type_name_for(instance: &Instance) -> String {
    format!(
        "{}_{}",
        instance.implementation_type().short_name(),
        sanitize_identifier(instance.id().as_str())
    )
}

/// Pick the strategy for `instance`; see [`ResolverStrategy`].
pub(crate) fn choose_strategy(instance: &Arc<Instance>, graph: &ServiceGraph) -> Result<ResolverStrategy> {
    if matches!(instance.kind(), InstanceKind::Object(_) | InstanceKind::Injected) {
        return Ok(ResolverStrategy::Direct);
    }
    if planning::requires_async(instance, graph)? {
        return Ok(ResolverStrategy::Generated);
    }
    if instance.has_inline_values() || instance.is_closed_from_template() {
        return Ok(ResolverStrategy::ServiceLookup);
    }
    if planning::has_deferred_cycle(instance, graph)? {
        return Ok(ResolverStrategy::ExpressionTree);
    }
    Ok(ResolverStrategy::Generated)
}

struct PendingType {
    instance: Arc<Instance>,
    strategy: ResolverStrategy,
    requires_async: bool,
}

/// Fail when no resolver can be built for `instance`: a cycle, a captive
/// dependency, an unsatisfiable constructor or, in static load mode, a
/// missing prebuilt type.
pub(crate) fn check_buildable(graph: &ServiceGraph, instance: &Arc<Instance>) -> Result<()> {
    planning::assert_no_cycles(instance, graph)?;
    planning::check_captive(instance, graph)?;
    instance.plan(graph)?;

    let rules = graph.rules();
    if rules.type_load_mode() == TypeLoadMode::Static && choose_strategy(instance, graph)?.generates_type() {
        let type_name = type_name_for(instance);
        if rules.prebuilt(&type_name).is_none() {
            return Err(DiError::ExpectedTypeMissing { type_name });
        }
    }
    Ok(())
}

/// Build resolvers for `instances`.
///
/// Every instance is checked first with [`check_buildable`]; one failure
/// fails the whole batch. Types for the generating strategies are compiled
/// together in one assembly.
pub(crate) fn build_resolvers(graph: &ServiceGraph, instances: &[Arc<Instance>]) -> Result<Vec<Arc<Resolver>>> {
    let rules = graph.rules();
    let mut assembly = GeneratedAssembly::for_rules(rules);
    let mut pending = Vec::new();
    let mut resolvers = Vec::with_capacity(instances.len());

    for instance in instances {
        check_buildable(graph, instance)?;

        let requires_async = planning::requires_async(instance, graph)?;
        let strategy = choose_strategy(instance, graph)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "lamar",
            instance = %instance.id(),
            service = %instance.service_type(),
            strategy = %strategy,
            "Building resolver"
        );

        match strategy {
            ResolverStrategy::Direct => {
                resolvers.push(Arc::new(Resolver::new(instance, strategy, Body::Direct, false)));
            }
            ResolverStrategy::ExpressionTree | ResolverStrategy::Interpreted => {
                let build = expression(graph, instance)?;
                resolvers.push(Arc::new(Resolver::new(
                    instance,
                    ResolverStrategy::ExpressionTree,
                    Body::Expression(build),
                    requires_async,
                )));
            }
            ResolverStrategy::Generated | ResolverStrategy::ServiceLookup => {
                let type_name = type_name_for(instance);
                let prebuilt = match rules.type_load_mode() {
                    TypeLoadMode::Dynamic => None,
                    TypeLoadMode::Auto => rules.prebuilt(&type_name),
                    TypeLoadMode::Static => Some(
                        rules
                            .prebuilt(&type_name)
                            .ok_or_else(|| DiError::ExpectedTypeMissing {
                                type_name: type_name.clone(),
                            })?,
                    ),
                };

                match prebuilt {
                    // Prebuilt types construct synchronously
                    Some(build) => resolvers.push(Arc::new(
                        Resolver::new(instance, strategy, Body::Prebuilt(build), false).with_type(type_name, None),
                    )),
                    None => {
                        let generated = assembly.add_type(type_name, RESOLVER_BASE);
                        ResolverVariables::new(graph, generated, instance.service_type().clone())
                            .force_lookup(strategy == ResolverStrategy::ServiceLookup)
                            .build_method(instance)?;
                        pending.push(PendingType {
                            instance: Arc::clone(instance),
                            strategy,
                            requires_async,
                        });
                    }
                }
            }
        }
    }

    if !pending.is_empty() {
        let compiled = assembly.compile(rules)?;
        for (pending, ty) in pending.into_iter().zip(compiled) {
            let method = ty
                .method(BUILD_METHOD)
                .cloned()
                .ok_or_else(|| DiError::Internal(format!("{} has no build method", ty.name())))?;
            let resolver = Resolver::new(
                &pending.instance,
                pending.strategy,
                Body::Compiled(method),
                pending.requires_async,
            )
            .with_type(ty.name().to_string(), Some(ty.source_code().to_string()));
            resolvers.push(Arc::new(resolver));
        }
    }

    Ok(resolvers)
}

// =============================================================================
// Expression trees
// =============================================================================

/// Compose closures building `instance` in place.
fn expression(graph: &ServiceGraph, instance: &Arc<Instance>) -> Result<BuildFn> {
    Ok(match instance.kind() {
        InstanceKind::Constructor { descriptor, .. } | InstanceKind::Decorated { decorator: descriptor, .. } => {
            let plan = instance
                .plan(graph)?
                .ok_or_else(|| DiError::Internal(format!("no plan for {}", instance.id())))?;
            let constructor = descriptor
                .constructors()
                .get(plan.constructor)
                .cloned()
                .ok_or_else(|| DiError::Internal(format!("constructor {} of {} is missing", plan.constructor, instance.id())))?;
            let arguments = plan
                .arguments
                .iter()
                .map(|a| dependency_expression(graph, &a.dependency))
                .collect::<Result<Vec<_>>>()?;
            let setters = plan
                .setters
                .iter()
                .map(|s| Ok((s.setter.clone(), dependency_expression(graph, &s.dependency)?)))
                .collect::<Result<Vec<_>>>()?;

            Arc::new(move |scope: &Scope, memo: &mut Memo| {
                let args = arguments.iter().map(|a| a(scope, memo)).collect::<Result<Vec<_>>>()?;
                let mut value = constructor.construct(&Arguments::new(args))?;
                for (setter, argument) in &setters {
                    setter.apply(&mut value, argument(scope, memo)?)?;
                }
                let value: Object = Arc::from(value);
                Ok(value)
            })
        }
        InstanceKind::Factory(factory) => {
            let factory = Arc::clone(factory);
            Arc::new(move |scope: &Scope, _: &mut Memo| factory(scope))
        }
        InstanceKind::AsyncFactory(_) => {
            let service_type = instance.service_type().clone();
            Arc::new(move |_: &Scope, _: &mut Memo| {
                Err(DiError::AsyncResolutionRequired {
                    service_type: service_type.clone(),
                })
            })
        }
        InstanceKind::Object(value) => {
            let value = Arc::clone(value);
            Arc::new(move |_: &Scope, _: &mut Memo| Ok(Arc::clone(&value)))
        }
        InstanceKind::Enumerable { kind, elements, .. } => {
            let kind = *kind;
            let elements = elements
                .iter()
                .map(|e| instance_expression(graph, e))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(move |scope: &Scope, memo: &mut Memo| {
                let values = elements.iter().map(|e| e(scope, memo)).collect::<Result<Vec<_>>>()?;
                Ok(frames::collect(kind, values))
            })
        }
        InstanceKind::Deferred { kind, target } => {
            let kind = *kind;
            let target = target.clone();
            Arc::new(move |scope: &Scope, _: &mut Memo| Ok(kind.wrap(scope, &target)))
        }
        InstanceKind::Injected => {
            let service_type = instance.service_type().clone();
            Arc::new(move |scope: &Scope, _: &mut Memo| scope.injected_value(&service_type))
        }
    })
}

fn dependency_expression(graph: &ServiceGraph, dependency: &Dependency) -> Result<BuildFn> {
    Ok(match dependency {
        Dependency::Instance(target) => instance_expression(graph, target)?,
        Dependency::Value(value) => {
            let value = Arc::clone(value);
            Arc::new(move |_: &Scope, _: &mut Memo| Ok(Arc::clone(&value)))
        }
        Dependency::Lookup(service_type) => {
            let service_type = service_type.clone();
            Arc::new(move |scope: &Scope, _: &mut Memo| scope.get_instance(&service_type))
        }
    })
}

/// A dependency on `target`: cached lifetimes go through the scope, transients
/// are built in place and tracked for disposal. Either way a target shared
/// within one call is built once.
fn instance_expression(graph: &ServiceGraph, target: &Arc<Instance>) -> Result<BuildFn> {
    let id = target.id().clone();
    if target.lifetime() != Lifetime::Transient
        || target.requires_service_provider()
        || matches!(target.kind(), InstanceKind::Object(_))
    {
        return Ok(Arc::new(move |scope: &Scope, memo: &mut Memo| {
            if let Some(value) = memo.get(&id) {
                return Ok(Arc::clone(value));
            }
            let value = scope.resolve_instance(&id)?;
            memo.insert(id.clone(), Arc::clone(&value));
            Ok(value)
        }));
    }

    let build = expression(graph, target)?;
    let dispose = target.dispose_fn().cloned();
    Ok(Arc::new(move |scope: &Scope, memo: &mut Memo| {
        if let Some(value) = memo.get(&id) {
            return Ok(Arc::clone(value));
        }
        let value = build(scope, memo)?;
        if let Some(dispose) = &dispose {
            scope.track(Arc::clone(&value), Arc::clone(dispose));
        }
        memo.insert(id.clone(), Arc::clone(&value));
        Ok(value)
    }))
}

// =============================================================================
// Interpreter
// =============================================================================

/// Build `instance` by walking its plan, without compiling a resolver.
///
/// Instances shared within one call are built once; singleton and scoped
/// values use the same caches as compiled resolvers.
pub(crate) fn interpret(graph: &ServiceGraph, instance: &Arc<Instance>, scope: &Scope) -> Result<Object> {
    planning::assert_no_cycles(instance, graph)?;

    #[cfg(feature = "logging")]
    trace!(
        target: "lamar",
        instance = %instance.id(),
        strategy = %ResolverStrategy::Interpreted,
        "Quick resolving"
    );

    Interpreter {
        graph,
        memo: Memo::default(),
    }
    .resolve(instance, scope)
}

struct Interpreter<'a> {
    graph: &'a ServiceGraph,
    memo: Memo,
}

impl Interpreter<'_> {
    fn resolve(&mut self, instance: &Arc<Instance>, scope: &Scope) -> Result<Object> {
        if let Some(value) = self.memo.get(instance.id()) {
            return Ok(Arc::clone(value));
        }
        if matches!(instance.kind(), InstanceKind::Injected) {
            return scope.injected_value(instance.service_type());
        }
        if planning::requires_async(instance, self.graph)? {
            return Err(DiError::AsyncResolutionRequired {
                service_type: instance.service_type().clone(),
            });
        }

        let value = match cache_owner(instance, scope)? {
            Some(owner) => {
                let (value, created) = owner
                    .cache()
                    .get_or_try_init(instance.id(), || self.build(instance, &owner))?;
                if created {
                    owner.track_instance(instance, &value);
                }
                owner.ensure_still_active()?;
                value
            }
            None => {
                let value = self.build(instance, scope)?;
                scope.track_instance(instance, &value);
                scope.ensure_still_active()?;
                value
            }
        };
        self.memo.insert(instance.id().clone(), Arc::clone(&value));
        Ok(value)
    }

    fn build(&mut self, instance: &Arc<Instance>, scope: &Scope) -> Result<Object> {
        match instance.kind() {
            InstanceKind::Constructor { descriptor, .. } | InstanceKind::Decorated { decorator: descriptor, .. } => {
                let plan = instance
                    .plan(self.graph)?
                    .ok_or_else(|| DiError::Internal(format!("no plan for {}", instance.id())))?;
                let constructor = descriptor
                    .constructors()
                    .get(plan.constructor)
                    .ok_or_else(|| DiError::Internal(format!("constructor {} of {} is missing", plan.constructor, instance.id())))?;

                let mut args = Vec::with_capacity(plan.arguments.len());
                for argument in &plan.arguments {
                    args.push(self.dependency(&argument.dependency, scope)?);
                }
                let mut value = constructor.construct(&Arguments::new(args))?;
                for setter in &plan.setters {
                    let argument = self.dependency(&setter.dependency, scope)?;
                    setter.setter.apply(&mut value, argument)?;
                }
                Ok(Arc::from(value))
            }
            InstanceKind::Factory(factory) => factory(scope),
            InstanceKind::Enumerable { kind, elements, .. } => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.resolve(element, scope)?);
                }
                Ok(frames::collect(*kind, values))
            }
            InstanceKind::Deferred { kind, target } => Ok(kind.wrap(scope, target)),
            InstanceKind::Object(_) | InstanceKind::Injected => direct_value(instance, scope),
            InstanceKind::AsyncFactory(_) => Err(DiError::AsyncResolutionRequired {
                service_type: instance.service_type().clone(),
            }),
        }
    }

    fn dependency(&mut self, dependency: &Dependency, scope: &Scope) -> Result<Object> {
        match dependency {
            Dependency::Instance(target) => self.resolve(target, scope),
            Dependency::Value(value) => Ok(Arc::clone(value)),
            Dependency::Lookup(service_type) => scope.get_instance(service_type),
        }
    }
}
