//! End-to-end tests against the public API

use lamar::{
    Container, DiError, GenerationRules, GenericTemplate, Inject, Lifetime, Many, Object, Parameter, Service,
    ServiceRegistry, ServiceType, SetterDescriptor, TypeDescriptor, downcast,
};
use std::sync::Arc;

struct Clock;

impl Service for Clock {
    type Dependencies = ();

    fn create(_: ()) -> Self {
        Clock
    }
}

struct Audit {
    clock: Arc<Clock>,
    sinks: Many<dyn Sink>,
}

trait Sink: Send + Sync {}

impl Service for Audit {
    type Dependencies = (Arc<Clock>, Many<dyn Sink>);

    fn create((clock, sinks): Self::Dependencies) -> Self {
        Audit { clock, sinks }
    }
}

struct Reporter {
    clock: Option<Arc<Clock>>,
}

impl Service for Reporter {
    type Dependencies = (Option<Arc<Clock>>,);

    fn create((clock,): Self::Dependencies) -> Self {
        Reporter { clock }
    }
}

struct ConsoleSink;
struct FileSink;

struct Greeter {
    greeting: Option<Object>,
}

struct Repository;

struct UserService {
    repository: Inject<Repository>,
}

impl Service for UserService {
    type Dependencies = (Inject<Repository>,);

    fn create((repository,): Self::Dependencies) -> Self {
        UserService { repository }
    }
}

#[test]
fn test_service_trait_wires_typed_dependencies() {
    let mut registry = ServiceRegistry::new();
    registry.for_service::<Clock>().use_type(Clock::descriptor()).singleton();
    registry.for_service::<dyn Sink>().use_value(ConsoleSink);
    registry.for_service::<dyn Sink>().use_value(FileSink);
    registry.for_service::<Audit>().use_type(Audit::descriptor());
    let container = Container::new(registry);

    let audit = container.get::<Audit>().unwrap();
    let clock = container.get::<Clock>().unwrap();
    assert!(Arc::ptr_eq(&audit.clock, &clock));
    assert_eq!(audit.sinks.len(), 2);
    assert!(audit.sinks.items()[0].is::<ConsoleSink>());
    assert!(audit.sinks.items()[1].is::<FileSink>());
}

#[test]
fn test_optional_dependency_defaults_to_none() {
    let mut registry = ServiceRegistry::new();
    registry.for_service::<Reporter>().use_type(Reporter::descriptor());
    let container = Container::new(registry);
    assert!(container.get::<Reporter>().unwrap().clock.is_none());

    let mut registry = ServiceRegistry::new();
    registry.for_service::<Clock>().use_type(Clock::descriptor());
    registry.for_service::<Reporter>().use_type(Reporter::descriptor());
    let container = Container::new(registry);
    assert!(container.get::<Reporter>().unwrap().clock.is_some());
}

#[test]
fn test_inject_keeps_value_erased() {
    let mut registry = ServiceRegistry::new();
    registry.for_service::<Repository>().use_value(Repository);
    registry.for_service::<UserService>().use_type(UserService::descriptor());
    let container = Container::new(registry);

    let service = container.get::<UserService>().unwrap();
    assert!(service.repository.downcast::<Repository>().is_ok());
}

#[test]
fn test_widget_lifetimes_end_to_end() {
    let widget = || {
        TypeDescriptor::concrete("AWidget".into())
            .implements("IWidget".into())
            .constructor(vec![], |_| Ok(Clock))
    };

    let mut registry = ServiceRegistry::new();
    registry.for_type("IWidget").use_type(widget()).singleton();
    let container = Container::new(registry);
    let a = container.get_instance(&"IWidget".into()).unwrap();
    let b = container.get_instance(&"IWidget".into()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let mut registry = ServiceRegistry::new();
    registry.for_type("IWidget").use_type(widget()).scoped();
    let container = Container::new(registry);
    let a = container.get_instance(&"IWidget".into()).unwrap();
    let b = container.get_instance(&"IWidget".into()).unwrap();
    let nested = container.create_scope().unwrap();
    let c = nested.get_instance(&"IWidget".into()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));

    nested.dispose();
    assert!(matches!(
        nested.get_instance(&"IWidget".into()),
        Err(DiError::ScopeDisposed { .. })
    ));
}

#[test]
fn test_open_generic_closes_per_argument() {
    let mut registry = ServiceRegistry::new();
    registry
        .for_generic("IRepository", 1)
        .use_template(GenericTemplate::new("Repository", 1, |args| {
            Some(
                TypeDescriptor::concrete(ServiceType::generic("Repository", args.iter().cloned()))
                    .implements(ServiceType::generic("IRepository", args.iter().cloned()))
                    .constructor(vec![], |_| Ok(Repository)),
            )
        }))
        .singleton();
    let container = Container::new(registry);

    let users = ServiceType::generic("IRepository", [ServiceType::named("User")]);
    let orders = ServiceType::generic("IRepository", [ServiceType::named("Order")]);

    let a = container.get_instance(&users).unwrap();
    let b = container.get_instance(&users).unwrap();
    let c = container.get_instance(&orders).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
}

#[test]
fn test_setter_policy_fills_optional_properties() {
    let greeter = || {
        TypeDescriptor::concrete("Greeter".into())
            .constructor(vec![], |_| Ok(Greeter { greeting: None }))
            .with_setter(SetterDescriptor::new("greeting", "Greeting".into(), |g: &mut Greeter, value| {
                g.greeting = Some(value);
                Ok(())
            }))
    };

    let mut registry = ServiceRegistry::new();
    registry.for_type("Greeting").use_value("hello".to_string());
    registry.for_type("Greeter").use_type(greeter());
    let container = Container::new(registry);
    assert!(container.get_as::<Greeter>(&"Greeter".into()).unwrap().greeting.is_none());

    let mut registry = ServiceRegistry::new();
    registry.for_type("Greeting").use_value("hello".to_string());
    registry.for_type("Greeter").use_type(greeter());
    registry.setter_policy(|_, setter| setter.name() == "greeting");
    let container = Container::new(registry);

    let greeter = container.get_as::<Greeter>(&"Greeter".into()).unwrap();
    let greeting = downcast::<String>(greeter.greeting.clone().unwrap()).unwrap();
    assert_eq!(greeting.as_str(), "hello");
}

#[test]
fn test_inline_constructor_values() {
    struct Retry {
        attempts: u32,
    }

    let mut registry = ServiceRegistry::new();
    registry
        .for_type("IRetry")
        .use_type(TypeDescriptor::concrete("Retry".into()).constructor(
            vec![Parameter::new("attempts", ServiceType::of::<u32>())],
            |args| Ok(Retry { attempts: args.value(0)? }),
        ))
        .ctor_value("attempts", Arc::new(3u32));
    let container = Container::new(registry);

    assert_eq!(container.get_as::<Retry>(&"IRetry".into()).unwrap().attempts, 3);
}

#[test]
fn test_generated_source_is_written_when_enabled() {
    let directory = std::env::temp_dir().join(format!("lamar-generated-{}", std::process::id()));
    let rules = GenerationRules::default()
        .with_output_path(&directory)
        .write_source_code(true);

    let mut registry = ServiceRegistry::new();
    registry
        .for_type("IWidget")
        .use_type(TypeDescriptor::concrete("AWidget".into()).constructor(vec![], |_| Ok(Clock)));
    let container = Container::with_rules(registry, rules);
    container.compile_all().unwrap();

    let written = std::fs::read_to_string(directory.join("AWidget_r1.rs")).unwrap();
    assert_eq!(written, container.how_do_i_build(&"IWidget".into()).unwrap());
    let _ = std::fs::remove_dir_all(&directory);
}

#[test]
fn test_configuration_report_lists_every_problem() {
    let broken = |name: &str| {
        TypeDescriptor::concrete(ServiceType::named(name))
            .constructor(vec![Parameter::new("missing", "IMissing".into())], |_| Ok(Clock))
    };

    let mut registry = ServiceRegistry::new();
    registry.for_type("IFirst").use_type(broken("First"));
    registry.for_type("ISecond").use_type(broken("Second")).lifetime(Lifetime::Scoped);
    let container = Container::new(registry);

    let Err(DiError::InvalidConfiguration(report)) = container.assert_configuration_is_valid() else {
        panic!("expected an invalid configuration");
    };
    assert_eq!(report.len(), 2);
    let text = report.to_string();
    assert!(text.starts_with("2 configuration problem(s):"));
    assert!(text.contains("IFirst"));
    assert!(text.contains("ISecond"));
}

#[test]
fn test_what_do_i_have_reports_registrations() {
    let mut registry = ServiceRegistry::new();
    registry.for_type("IClock").use_value(Clock);
    let container = Container::new(registry);

    let report = container.what_do_i_have();
    assert!(report.starts_with("1 registered service type(s)\n"));
    assert!(report.contains("  * r1 IClock (singleton, object)"));
}
