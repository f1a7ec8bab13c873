//! Benchmarks for the container

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use lamar::{Container, GenerationRules, Parameter, ServiceRegistry, ServiceType, TypeDescriptor};
use std::hint::black_box;
use std::sync::Arc;

#[allow(dead_code)]
struct Clock {
    ticks: u64,
}

#[allow(dead_code)]
struct Repository {
    clock: Arc<Clock>,
}

#[allow(dead_code)]
struct Handler {
    repository: Arc<Repository>,
    clock: Arc<Clock>,
}

fn registry() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry
        .for_type("IClock")
        .use_type(TypeDescriptor::concrete("Clock".into()).constructor(vec![], |_| Ok(Clock { ticks: 0 })))
        .singleton();
    registry
        .for_type("IRepository")
        .use_type(
            TypeDescriptor::concrete("Repository".into())
                .constructor(vec![Parameter::new("clock", "IClock".into())], |args| {
                    Ok(Repository { clock: args.get(0)? })
                }),
        )
        .scoped();
    registry.for_type("IHandler").use_type(TypeDescriptor::concrete("Handler".into()).constructor(
        vec![
            Parameter::new("repository", "IRepository".into()),
            Parameter::new("clock", "IClock".into()),
        ],
        |args| {
            Ok(Handler {
                repository: args.get(0)?,
                clock: args.get(1)?,
            })
        },
    ));
    registry
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");

    group.bench_function("build_container", |b| b.iter(|| black_box(Container::new(registry()))));

    group.bench_function("compile_all", |b| {
        b.iter(|| {
            let container = Container::new(registry());
            black_box(container.compile_all().unwrap())
        })
    });

    group.bench_function("validate", |b| {
        b.iter(|| {
            let container = Container::with_rules(registry(), GenerationRules::default());
            black_box(container.validate())
        })
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    let container = Container::new(registry());
    let clock: ServiceType = "IClock".into();
    let handler: ServiceType = "IHandler".into();
    container.get_instance(&clock).unwrap();

    group.bench_function("singleton", |b| b.iter(|| black_box(container.get_instance(&clock).unwrap())));

    group.bench_function("transient_with_dependencies", |b| {
        let scope = container.create_scope().unwrap();
        b.iter(|| black_box(scope.get_instance(&handler).unwrap()))
    });

    group.bench_function("quick_resolve", |b| {
        b.iter(|| black_box(container.quick_resolve(&handler).unwrap()))
    });

    group.finish();
}

fn bench_scopes(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoped");
    let container = Container::new(registry());
    let repository: ServiceType = "IRepository".into();

    group.bench_function("create_scope", |b| b.iter(|| black_box(container.create_scope().unwrap())));

    group.bench_function("create_resolve_dispose", |b| {
        b.iter(|| {
            let scope = container.create_scope().unwrap();
            black_box(scope.get_instance(&repository).unwrap());
            scope.dispose()
        })
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    let container = Container::new(registry());
    let handler: ServiceType = "IHandler".into();
    container.get_instance(&handler).unwrap();

    group.bench_function("4_threads_resolve", |b| {
        b.iter(|| {
            thread::scope(|s| {
                for _ in 0..4 {
                    s.spawn(|| {
                        for _ in 0..100 {
                            black_box(container.get_instance(&handler).unwrap());
                        }
                    });
                }
            })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_graph, bench_resolution, bench_scopes, bench_concurrent);
criterion_main!(benches);
