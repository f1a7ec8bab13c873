//! Build frames for service instances
//!
//! [`ResolverVariables`] walks an instance's plan and emits one frame per
//! construction step into the `build` method of a generated resolver type.
//! Every instance is built at most once per method; a second consumer of the
//! same instance reuses the first variable.

use crate::codegen::{Frame, GeneratedMethod, GeneratedType, InjectedField, ReturnFrame, Step, VarId, VariableTable};
use crate::codegen::SourceWriter;
use crate::descriptor::{Arguments, ConstructorDescriptor, DisposeFn, SetterDescriptor, TypeDescriptor};
use crate::factory::{AsyncFactoryFn, BoxFuture, DeferredKind, FactoryFn};
use crate::graph::ServiceGraph;
use crate::instance::{Dependency, EnumerableKind, Instance, InstanceId, InstanceKind};
use crate::planning;
use crate::provider::{Lifetime, Object, ServiceType};
use crate::scope::Scope;
use crate::{DiError, Result};
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the method every resolver type implements.
pub const BUILD_METHOD: &str = "build";

/// Base trait of generated resolver types.
pub const RESOLVER_BASE: &str = "Resolver";

fn names(variables: &VariableTable, vars: &[VarId]) -> String {
    vars.iter()
        .map(|v| variables.name(*v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn suffix(is_async: bool) -> &'static str {
    if is_async { ".await?" } else { "?" }
}

// =============================================================================
// Frames
// =============================================================================

/// Call a constructor, then apply setters.
pub struct ConstructorFrame {
    implementation: ServiceType,
    constructor: ConstructorDescriptor,
    index: usize,
    arguments: Vec<VarId>,
    setters: Vec<(SetterDescriptor, VarId)>,
    output: VarId,
}

impl Frame for ConstructorFrame {
    fn description(&self) -> String {
        format!("construct {}", self.implementation)
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn uses(&self) -> Vec<VarId> {
        self.arguments
            .iter()
            .copied()
            .chain(self.setters.iter().map(|(_, var)| *var))
            .collect()
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        let output = variables.name(self.output);
        let binding = if self.setters.is_empty() { "" } else { "mut " };
        let constructor = match self.index {
            0 => "new".to_string(),
            index => format!("new_{}", index),
        };
        writer.write(&format!(
            "let {}{} = {}::{}({})?;",
            binding,
            output,
            self.implementation.short_name(),
            constructor,
            names(variables, &self.arguments)
        ));
        for (setter, var) in &self.setters {
            writer.write(&format!(
                "{}.set_{}({})?;",
                output,
                setter.name(),
                variables.name(*var)
            ));
        }
    }

    fn compile(&self) -> Result<Option<Step>> {
        let constructor = self.constructor.clone();
        let setters: Vec<SetterDescriptor> = self.setters.iter().map(|(s, _)| s.clone()).collect();
        let arity = self.arguments.len();
        Ok(Some(Step::sync(self.uses(), self.output, move |_, args: &[Object]| {
            let (ctor_args, setter_args) = args.split_at(arity.min(args.len()));
            let mut value = constructor.construct(&Arguments::new(ctor_args.to_vec()))?;
            for (setter, arg) in setters.iter().zip(setter_args) {
                setter.apply(&mut value, Arc::clone(arg))?;
            }
            let value: Object = Arc::from(value);
            Ok(value)
        })))
    }
}

/// Invoke a synchronous factory.
pub struct FactoryFrame {
    instance: InstanceId,
    implementation: ServiceType,
    factory: FactoryFn,
    output: VarId,
}

impl Frame for FactoryFrame {
    fn description(&self) -> String {
        format!("factory for {}", self.instance)
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        writer.write(&format!(
            "let {} = factory::<{}>(\"{}\")(scope)?;",
            variables.name(self.output),
            self.implementation.short_name(),
            self.instance
        ));
    }

    fn compile(&self) -> Result<Option<Step>> {
        let factory = Arc::clone(&self.factory);
        Ok(Some(Step::sync(Vec::new(), self.output, move |scope, _| factory(scope))))
    }
}

/// Await an asynchronous factory.
pub struct AsyncFactoryFrame {
    instance: InstanceId,
    implementation: ServiceType,
    factory: AsyncFactoryFn,
    output: VarId,
}

impl Frame for AsyncFactoryFrame {
    fn description(&self) -> String {
        format!("async factory for {}", self.instance)
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn is_async(&self) -> bool {
        true
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        writer.write(&format!(
            "let {} = async_factory::<{}>(\"{}\")(scope.clone()).await?;",
            variables.name(self.output),
            self.implementation.short_name(),
            self.instance
        ));
    }

    fn compile(&self) -> Result<Option<Step>> {
        let factory = Arc::clone(&self.factory);
        Ok(Some(Step::deferred(Vec::new(), self.output, move |scope: Scope, _: Vec<Object>| {
            factory(scope)
        })))
    }
}

/// A literal value supplied at registration.
pub struct ValueFrame {
    label: String,
    service_type: ServiceType,
    value: Object,
    output: VarId,
}

impl Frame for ValueFrame {
    fn description(&self) -> String {
        format!("value '{}'", self.label)
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        writer.write(&format!(
            "let {} = inline_value::<{}>(\"{}\");",
            variables.name(self.output),
            self.service_type.short_name(),
            self.label
        ));
    }

    fn compile(&self) -> Result<Option<Step>> {
        let value = Arc::clone(&self.value);
        Ok(Some(Step::sync(Vec::new(), self.output, move |_, _| Ok(Arc::clone(&value)))))
    }
}

/// Read a singleton through a field of the generated type.
pub struct SingletonFieldFrame {
    field: Arc<InjectedField>,
    output: VarId,
}

impl Frame for SingletonFieldFrame {
    fn description(&self) -> String {
        format!("field {}", self.field.name())
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        writer.write(&format!(
            "let {} = self.{}.clone();",
            variables.name(self.output),
            self.field.name()
        ));
    }

    fn compile(&self) -> Result<Option<Step>> {
        let field = Arc::clone(&self.field);
        Ok(Some(Step::sync(Vec::new(), self.output, move |scope, _| field.get_or_resolve(scope))))
    }
}

/// Resolve another instance through the scope by identity, honoring its
/// lifetime cache.
pub struct ResolveInstanceFrame {
    instance: InstanceId,
    is_async: bool,
    output: VarId,
}

impl Frame for ResolveInstanceFrame {
    fn description(&self) -> String {
        format!("resolve {}", self.instance)
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn is_async(&self) -> bool {
        self.is_async
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        let call = if self.is_async { "resolve_instance_async" } else { "resolve_instance" };
        writer.write(&format!(
            "let {} = scope.{}(\"{}\"){};",
            variables.name(self.output),
            call,
            self.instance,
            suffix(self.is_async)
        ));
    }

    fn compile(&self) -> Result<Option<Step>> {
        let id = self.instance.clone();
        Ok(Some(if self.is_async {
            Step::deferred(Vec::new(), self.output, move |scope: Scope, _: Vec<Object>| {
                let id = id.clone();
                Box::pin(async move { scope.resolve_instance_async(&id).await }) as BoxFuture<'static, Result<Object>>
            })
        } else {
            Step::sync(Vec::new(), self.output, move |scope, _| scope.resolve_instance(&id))
        }))
    }
}

/// Look the default instance of a service type up at runtime.
pub struct GetInstanceFrame {
    service_type: ServiceType,
    is_async: bool,
    output: VarId,
}

impl Frame for GetInstanceFrame {
    fn description(&self) -> String {
        format!("lookup {}", self.service_type)
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn is_async(&self) -> bool {
        self.is_async
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        let call = if self.is_async { "get_instance_async" } else { "get_instance" };
        writer.write(&format!(
            "let {} = scope.{}(\"{}\"){};",
            variables.name(self.output),
            call,
            self.service_type,
            suffix(self.is_async)
        ));
    }

    fn compile(&self) -> Result<Option<Step>> {
        let ty = self.service_type.clone();
        Ok(Some(if self.is_async {
            Step::deferred(Vec::new(), self.output, move |scope: Scope, _: Vec<Object>| {
                let ty = ty.clone();
                Box::pin(async move { scope.get_instance_async(&ty).await }) as BoxFuture<'static, Result<Object>>
            })
        } else {
            Step::sync(Vec::new(), self.output, move |scope, _| scope.get_instance(&ty))
        }))
    }
}

/// Create a `Lazy<T>` or `Func<T>` wrapper bound to the resolving scope.
pub struct DeferredFrame {
    kind: DeferredKind,
    target: ServiceType,
    output: VarId,
}

impl Frame for DeferredFrame {
    fn description(&self) -> String {
        format!("{}<{}>", self.kind.as_str(), self.target)
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        writer.write(&format!(
            "let {} = {}::new(scope, \"{}\");",
            variables.name(self.output),
            self.kind.as_str(),
            self.target
        ));
    }

    fn compile(&self) -> Result<Option<Step>> {
        let kind = self.kind;
        let target = self.target.clone();
        Ok(Some(Step::sync(Vec::new(), self.output, move |scope, _| Ok(kind.wrap(scope, &target)))))
    }
}

/// Collect element values into an array or list.
pub struct EnumerableFrame {
    kind: EnumerableKind,
    elements: Vec<VarId>,
    output: VarId,
}

impl Frame for EnumerableFrame {
    fn description(&self) -> String {
        format!("collect {} elements", self.elements.len())
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn uses(&self) -> Vec<VarId> {
        self.elements.clone()
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        let output = variables.name(self.output);
        let elements = names(variables, &self.elements);
        match self.kind {
            EnumerableKind::Array => {
                writer.write(&format!("let {}: Box<[Object]> = Box::new([{}]);", output, elements))
            }
            EnumerableKind::List => writer.write(&format!("let {}: Vec<Object> = vec![{}];", output, elements)),
        }
    }

    fn compile(&self) -> Result<Option<Step>> {
        let kind = self.kind;
        Ok(Some(Step::sync(self.elements.clone(), self.output, move |_, args: &[Object]| {
            Ok(collect(kind, args.to_vec()))
        })))
    }
}

/// Assemble element values into the runtime value of an array or list.
pub(crate) fn collect(kind: EnumerableKind, elements: Vec<Object>) -> Object {
    match kind {
        EnumerableKind::Array => Arc::new(elements.into_boxed_slice()),
        EnumerableKind::List => Arc::new(elements),
    }
}

/// Read the value injected into the resolving scope.
pub struct InjectedFrame {
    service_type: ServiceType,
    output: VarId,
}

impl Frame for InjectedFrame {
    fn description(&self) -> String {
        format!("injected {}", self.service_type)
    }

    fn creates(&self) -> Vec<VarId> {
        vec![self.output]
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        writer.write(&format!(
            "let {} = scope.injected(\"{}\")?;",
            variables.name(self.output),
            self.service_type
        ));
    }

    fn compile(&self) -> Result<Option<Step>> {
        let ty = self.service_type.clone();
        Ok(Some(Step::sync(Vec::new(), self.output, move |scope, _| scope.injected_value(&ty))))
    }
}

/// Register an inline-built transient with the scope's disposal list.
pub struct TrackDisposableFrame {
    var: VarId,
    dispose: DisposeFn,
}

impl Frame for TrackDisposableFrame {
    fn description(&self) -> String {
        format!("track {}", self.var.index())
    }

    fn uses(&self) -> Vec<VarId> {
        vec![self.var]
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        writer.write(&format!("scope.track_disposable(&{});", variables.name(self.var)));
    }

    fn compile(&self) -> Result<Option<Step>> {
        let dispose = Arc::clone(&self.dispose);
        Ok(Some(Step::effect(vec![self.var], move |scope, args: &[Object]| {
            if let Some(value) = args.first() {
                scope.track(Arc::clone(value), Arc::clone(&dispose));
            }
            Ok(())
        })))
    }
}

// =============================================================================
// ResolverVariables
// =============================================================================

/// How an instance is pulled into the method being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// The instance the method returns; always built in place
    Build,
    /// A dependency of another instance in the method
    Dependency,
    /// An inline dependency owned by its parent; never looked up
    Inline,
}

/// Emits frames for instances into one generated method.
pub(crate) struct ResolverVariables<'a> {
    graph: &'a ServiceGraph,
    generated: &'a mut GeneratedType,
    return_type: ServiceType,
    built: HashMap<InstanceId, VarId, RandomState>,
    force_lookup: bool,
}

impl<'a> ResolverVariables<'a> {
    pub(crate) fn new(graph: &'a ServiceGraph, generated: &'a mut GeneratedType, return_type: ServiceType) -> Self {
        Self {
            graph,
            generated,
            return_type,
            built: HashMap::default(),
            force_lookup: false,
        }
    }

    /// Resolve plain dependencies through the scope instead of building them.
    pub(crate) fn force_lookup(mut self, force: bool) -> Self {
        self.force_lookup = force;
        self
    }

    fn method(&mut self) -> &mut GeneratedMethod {
        self.generated.method_for(BUILD_METHOD, &self.return_type)
    }

    fn declare(&mut self, ty: &ServiceType) -> VarId {
        self.method().variables_mut().declare_typed(ty)
    }

    fn add(&mut self, frame: impl Frame + 'static) {
        self.method().add_frame(frame);
    }

    /// Emit the top-level build of `instance` and return it.
    pub(crate) fn build_method(mut self, instance: &Arc<Instance>) -> Result<()> {
        let var = self.resolve(instance, BuildMode::Build)?;
        let ty = instance.service_type().clone();
        self.add(ReturnFrame::of_var(ty, var));
        Ok(())
    }

    /// The variable holding `instance`, emitting frames on first use.
    pub(crate) fn resolve(&mut self, instance: &Arc<Instance>, mode: BuildMode) -> Result<VarId> {
        if let Some(var) = self.built.get(instance.id()) {
            return Ok(*var);
        }
        let var = match mode {
            BuildMode::Build => self.build(instance)?,
            BuildMode::Dependency | BuildMode::Inline => self.dependency(instance, mode)?,
        };
        self.built.insert(instance.id().clone(), var);
        Ok(var)
    }

    fn dependency(&mut self, instance: &Arc<Instance>, mode: BuildMode) -> Result<VarId> {
        if matches!(instance.kind(), InstanceKind::Injected) {
            return self.build(instance);
        }

        let is_async = planning::requires_async(instance, self.graph)?;
        let singleton = instance.lifetime() == Lifetime::Singleton || matches!(instance.kind(), InstanceKind::Object(_));

        if singleton && !is_async {
            let field = self.generated.field_for(instance.service_type(), instance.id());
            let output = self.declare(instance.service_type());
            self.add(SingletonFieldFrame { field, output });
            return Ok(output);
        }

        let lookup = singleton
            || instance.lifetime() == Lifetime::Scoped
            || instance.requires_service_provider()
            || (self.force_lookup && mode == BuildMode::Dependency);
        if lookup {
            let output = self.declare(instance.service_type());
            self.add(ResolveInstanceFrame {
                instance: instance.id().clone(),
                is_async,
                output,
            });
            return Ok(output);
        }

        let output = self.build(instance)?;
        if let Some(dispose) = instance.dispose_fn() {
            self.add(TrackDisposableFrame {
                var: output,
                dispose: Arc::clone(dispose),
            });
        }
        Ok(output)
    }

    fn build(&mut self, instance: &Arc<Instance>) -> Result<VarId> {
        match instance.kind() {
            InstanceKind::Constructor { descriptor, .. } => self.construct(instance, descriptor),
            InstanceKind::Decorated { decorator, .. } => self.construct(instance, decorator),
            InstanceKind::Factory(factory) => {
                let output = self.declare(instance.implementation_type());
                self.add(FactoryFrame {
                    instance: instance.id().clone(),
                    implementation: instance.implementation_type().clone(),
                    factory: Arc::clone(factory),
                    output,
                });
                Ok(output)
            }
            InstanceKind::AsyncFactory(factory) => {
                let output = self.declare(instance.implementation_type());
                self.add(AsyncFactoryFrame {
                    instance: instance.id().clone(),
                    implementation: instance.implementation_type().clone(),
                    factory: Arc::clone(factory),
                    output,
                });
                Ok(output)
            }
            InstanceKind::Object(value) => {
                let output = self.declare(instance.implementation_type());
                self.add(ValueFrame {
                    label: instance.id().to_string(),
                    service_type: instance.implementation_type().clone(),
                    value: Arc::clone(value),
                    output,
                });
                Ok(output)
            }
            InstanceKind::Enumerable { kind, elements, .. } => {
                let mut vars = Vec::with_capacity(elements.len());
                for element in elements {
                    vars.push(self.resolve(element, BuildMode::Dependency)?);
                }
                let output = self.declare(instance.service_type());
                self.add(EnumerableFrame {
                    kind: *kind,
                    elements: vars,
                    output,
                });
                Ok(output)
            }
            InstanceKind::Deferred { kind, target } => {
                let output = self.declare(instance.service_type());
                self.add(DeferredFrame {
                    kind: *kind,
                    target: target.clone(),
                    output,
                });
                Ok(output)
            }
            InstanceKind::Injected => {
                let output = self.declare(instance.service_type());
                self.add(InjectedFrame {
                    service_type: instance.service_type().clone(),
                    output,
                });
                Ok(output)
            }
        }
    }

    fn construct(&mut self, instance: &Arc<Instance>, descriptor: &TypeDescriptor) -> Result<VarId> {
        let plan = instance
            .plan(self.graph)?
            .ok_or_else(|| DiError::Internal(format!("no plan for {}", instance.id())))?;
        let constructor = descriptor
            .constructors()
            .get(plan.constructor)
            .cloned()
            .ok_or_else(|| DiError::Internal(format!("constructor {} of {} is missing", plan.constructor, instance.id())))?;

        let mut arguments = Vec::with_capacity(plan.arguments.len());
        for argument in &plan.arguments {
            arguments.push(self.dependency_var(instance, &argument.parameter, &argument.dependency)?);
        }
        let mut setters = Vec::with_capacity(plan.setters.len());
        for setter in &plan.setters {
            let var = self.dependency_var(instance, setter.setter.name(), &setter.dependency)?;
            setters.push((setter.setter.clone(), var));
        }

        let output = self.declare(instance.implementation_type());
        self.add(ConstructorFrame {
            implementation: descriptor.service_type().clone(),
            constructor,
            index: plan.constructor,
            arguments,
            setters,
            output,
        });
        Ok(output)
    }

    fn dependency_var(&mut self, owner: &Instance, parameter: &str, dependency: &Dependency) -> Result<VarId> {
        match dependency {
            Dependency::Instance(target) => {
                let mode = if target.parent() == Some(owner.id()) {
                    BuildMode::Inline
                } else {
                    BuildMode::Dependency
                };
                self.resolve(target, mode)
            }
            Dependency::Value(value) => {
                let ty = ServiceType::named(parameter);
                let output = self.method().variables_mut().declare(parameter);
                self.add(ValueFrame {
                    label: parameter.to_string(),
                    service_type: ty,
                    value: Arc::clone(value),
                    output,
                });
                Ok(output)
            }
            Dependency::Lookup(service_type) => {
                let is_async = match self.graph.find_default(service_type) {
                    Some(target) => planning::requires_async(&target, self.graph)?,
                    None => false,
                };
                let output = self.declare(service_type);
                self.add(GetInstanceFrame {
                    service_type: service_type.clone(),
                    is_async,
                    output,
                });
                Ok(output)
            }
        }
    }
}
