//! Benchmarks for interpreted and compiled resolution

use criterion::{Criterion, criterion_group, criterion_main};
use dependency_weaver::{
    Args, BindingDirective, CompileRequest, CompiledContainer, Compiler, Method, Parameter,
    ProviderRef, Resolver, StaticMetadata, TypeDescriptor, TypeRegistry, Value,
};
use std::hint::black_box;
use std::sync::Arc;

fn injecting(params: &[(&str, &str)]) -> Method {
    params
        .iter()
        .fold(Method::constructor().injectable(), |m, (name, ty)| {
            m.param(Parameter::typed(*name, *ty))
        })
}

/// Car -> Engine -> Fuel (singleton), Car -> Wheels, plus a provided Database.
fn graph() -> (Arc<TypeRegistry>, Arc<StaticMetadata>) {
    let types = TypeRegistry::new();
    types
        .register(TypeDescriptor::class("Fuel").singleton())
        .register(TypeDescriptor::class("Engine").with_constructor(injecting(&[("fuel", "Fuel")])))
        .register(TypeDescriptor::class("Wheels"))
        .register(
            TypeDescriptor::class("Car")
                .with_constructor(injecting(&[("engine", "Engine"), ("wheels", "Wheels")])),
        )
        .register(TypeDescriptor::interface("Database"))
        .register(
            TypeDescriptor::class("DatabaseProvider")
                .with_constructor(Method::constructor().param(Parameter::new("dsn")))
                .provider(|this| {
                    Ok(Value::Object(dependency_weaver::Object::with_fields(
                        "Database",
                        [("dsn", this.get("dsn").unwrap_or_default())],
                    )))
                }),
        );

    let metadata = StaticMetadata::new();
    metadata.bind(
        "Database",
        BindingDirective::new().with_provider(
            ProviderRef::new("DatabaseProvider").with_params(Args::new().with("dsn", "sqlite::memory:")),
        ),
    );
    (Arc::new(types), Arc::new(metadata))
}

fn bench_resolution(c: &mut Criterion) {
    let (types, metadata) = graph();
    let resolver = Resolver::from_shared(types.clone(), metadata.clone());
    let units = Compiler::from_shared(types, metadata)
        .compile(&[CompileRequest::new("Car"), CompileRequest::new("Database")])
        .unwrap();
    let compiled = CompiledContainer::load(units).unwrap();

    let mut group = c.benchmark_group("resolve");

    group.bench_function("interpreted_singleton", |b| {
        b.iter(|| black_box(resolver.resolve("Fuel").unwrap()))
    });

    group.bench_function("compiled_singleton", |b| {
        b.iter(|| black_box(compiled.get_instance("Fuel").unwrap()))
    });

    group.bench_function("interpreted_graph", |b| {
        b.iter(|| black_box(resolver.resolve("Car").unwrap()))
    });

    group.bench_function("compiled_graph", |b| {
        b.iter(|| black_box(compiled.get_instance("Car").unwrap()))
    });

    group.bench_function("interpreted_provider", |b| {
        b.iter(|| black_box(resolver.resolve("Database").unwrap()))
    });

    group.bench_function("compiled_provider", |b| {
        b.iter(|| black_box(compiled.get_instance("Database").unwrap()))
    });

    group.bench_function("with_args", |b| {
        let args = Args::new().with("size", 8).with("name", "pool");
        b.iter(|| black_box(resolver.resolve_with("Wheels", None, &args).unwrap()))
    });

    group.finish();
}

fn bench_compilation(c: &mut Criterion) {
    let (types, metadata) = graph();
    let compiler = Compiler::from_shared(types, metadata);
    let roots = [CompileRequest::new("Car"), CompileRequest::new("Database")];

    let mut group = c.benchmark_group("compile");
    group.bench_function("compile", |b| b.iter(|| black_box(compiler.compile(&roots).unwrap())));

    let units = compiler.compile(&roots).unwrap();
    group.bench_function("render", |b| {
        b.iter(|| black_box(dependency_weaver::emit::render(&units).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_resolution, bench_compilation);
criterion_main!(benches);
