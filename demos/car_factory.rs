//! The car factory: resolve a graph at run time, compile it, and write the
//! generated factory sources.
//!
//! ```bash
//! cargo run --example car_factory -- target/generated
//! ```

use dependency_weaver::{
    AspectDescriptor, BindingDirective, CompileRequest, CompiledContainer, Compiler, Method,
    Parameter, Property, Resolver, StaticMetadata, TypeDescriptor, TypeRegistry, Value,
};
use std::sync::Arc;

fn main() -> dependency_weaver::Result<()> {
    #[cfg(feature = "logging")]
    dependency_weaver::logging::init();

    let types = TypeRegistry::new();
    types
        .register(TypeDescriptor::class("Fuel").with_doc("/** @singleton */"))
        .register(
            TypeDescriptor::class("Engine").with_constructor(
                Method::constructor()
                    .injectable()
                    .param(Parameter::typed("fuel", "Fuel")),
            ),
        )
        .register(TypeDescriptor::class("Radio"))
        .register(
            TypeDescriptor::class("Car")
                .with_constructor(
                    Method::constructor()
                        .injectable()
                        .param(Parameter::typed("engine", "Engine"))
                        .aspect(AspectDescriptor::after("Inspection")),
                )
                .with_property(Property::new("radio").with_doc("@inject\n@var Radio")),
        )
        .register(TypeDescriptor::class("Inspection").after_aspect(|_, jp, result| {
            if let Some(car) = result.as_object() {
                car.set("inspected_by", format!("{}::{}", jp.owner, jp.method));
            }
            Ok(result)
        }))
        .register(TypeDescriptor::interface("Logger"))
        .register(TypeDescriptor::class("FileLogger"))
        .register(TypeDescriptor::class("AuditLogger"));

    let metadata = StaticMetadata::new();
    metadata.bind(
        "Logger",
        BindingDirective::new()
            .with_concrete_type("FileLogger")
            .with_named("audit", "AuditLogger"),
    );

    let types = Arc::new(types);
    let metadata = Arc::new(metadata);

    // Interpreted
    let resolver = Resolver::from_shared(types.clone(), metadata.clone());
    let a = resolver.resolve("Car")?;
    let b = resolver.resolve("Car")?;
    println!("cars: #{} and #{}", a.id(), b.id());
    println!(
        "shared fuel: {}",
        a.get_object("engine").and_then(|e| e.get_object("fuel")).map(|f| f.id())
            == b.get_object("engine").and_then(|e| e.get_object("fuel")).map(|f| f.id())
    );
    println!("inspected by: {:?}", a.get("inspected_by").unwrap_or(Value::Null));
    println!("audit logger: {}", resolver.resolve_named("Logger", "audit")?.class());

    // Compiled
    let units = Compiler::from_shared(types, metadata).compile(&[
        CompileRequest::new("Car"),
        CompileRequest::new("Logger"),
        CompileRequest::named("Logger", "audit"),
    ])?;
    if let Some(dir) = std::env::args().nth(1) {
        for path in dependency_weaver::emit::write_all(&units, &dir)? {
            println!("wrote {}", path.display());
        }
    }

    let container = CompiledContainer::load(units)?;
    let car = container.get_instance("Car")?;
    println!("compiled car: #{} with radio {}", car.id(), car.get_object("radio").is_some());
    println!("compiled logger: {}", container.get_instance("Logger")?.class());

    Ok(())
}
