//! The binding graph compiled by the build script and resolved by the tests

use dependency_weaver::{
    AspectDescriptor, Args, Argument, BindingDirective, CompileRequest, Method, MetadataProvider,
    Object, Parameter, Property, ProviderRef, StaticMetadata, TypeDescriptor, TypeRegistry,
    TypeSource, Value,
};
use std::sync::Arc;

pub struct World {
    pub types: Arc<dyn TypeSource>,
    pub metadata: Arc<dyn MetadataProvider>,
}

fn injecting(params: &[(&str, &str)]) -> Method {
    params
        .iter()
        .fold(Method::constructor().injectable(), |m, (name, ty)| {
            m.param(Parameter::typed(*name, *ty))
        })
}

pub fn world() -> World {
    let types = TypeRegistry::new();
    let metadata = StaticMetadata::new();

    // Car -> Engine -> Fuel (singleton); Car.radio injected; Car inspected after construction
    types
        .register(TypeDescriptor::class("Fuel").with_doc("@singleton"))
        .register(TypeDescriptor::class("Engine").with_constructor(injecting(&[("fuel", "Fuel")])))
        .register(TypeDescriptor::class("Radio"))
        .register(
            TypeDescriptor::class("Car")
                .with_constructor(
                    injecting(&[("engine", "Engine")]).aspect(AspectDescriptor::after("Inspection")),
                )
                .with_property(Property::new("radio").with_doc("@inject\n@var Radio")),
        )
        .register(TypeDescriptor::class("Inspection").after_aspect(|_, _, result| {
            if let Some(car) = result.as_object() {
                car.set("inspected", true);
            }
            Ok(result)
        }));

    // Connection comes from a provider, one binding per qualifier
    types
        .register(TypeDescriptor::class("Clock"))
        .register(TypeDescriptor::class("Connection"))
        .register(
            TypeDescriptor::class("ConnectionProvider")
                .with_constructor(
                    Method::constructor()
                        .injectable()
                        .param(Parameter::new("dsn"))
                        .param(Parameter::typed("clock", "Clock")),
                )
                .provider(|this| {
                    Ok(Object::with_fields(
                        "Connection",
                        [
                            ("dsn", this.get("dsn").unwrap_or_default()),
                            ("clock", this.get("clock").unwrap_or_default()),
                        ],
                    )
                    .into())
                }),
        );
    metadata.bind(
        "Connection",
        BindingDirective::new()
            .with_singleton(true)
            .with_provider(
                ProviderRef::new("ConnectionProvider").with_params(Args::new().with("dsn", "primary")),
            )
            .with_named_provider(
                "replica",
                ProviderRef::new("ConnectionProvider").with_params(Args::new().with("dsn", "replica")),
            ),
    );

    // Directive defaults
    types
        .register(TypeDescriptor::interface("Transport"))
        .register(TypeDescriptor::class("SmtpTransport"))
        .register(
            TypeDescriptor::class("Mailer").with_constructor(
                Method::constructor()
                    .injectable()
                    .param(Parameter::new("host"))
                    .param(Parameter::typed("transport", "Transport"))
                    .param(Parameter::new("retries").optional(3)),
            ),
        );
    metadata.bind(
        "Mailer",
        BindingDirective::new()
            .with_param("host", Value::from("smtp.local"))
            .with_param("transport", Argument::bind("SmtpTransport")),
    );

    // Qualified redirects and a qualified provider wrapping the plain type
    types
        .register(TypeDescriptor::interface("Logger"))
        .register(TypeDescriptor::class("FileLogger"))
        .register(TypeDescriptor::class("AuditLogger").with_doc("@singleton"))
        .register(TypeDescriptor::class("Catalog"))
        .register(
            TypeDescriptor::class("CachingCatalog")
                .with_constructor(injecting(&[("inner", "Catalog")]))
                .provider(|this| {
                    Ok(Object::with_fields(
                        "Catalog",
                        [
                            ("inner", this.get("inner").unwrap_or_default()),
                            ("cached", Value::Bool(true)),
                        ],
                    )
                    .into())
                }),
        );
    metadata
        .bind(
            "Logger",
            BindingDirective::new()
                .with_concrete_type("FileLogger")
                .with_named("audit", "AuditLogger"),
        )
        .bind(
            "Catalog",
            BindingDirective::new().with_named_provider("cached", ProviderRef::new("CachingCatalog")),
        );

    World {
        types: Arc::new(types),
        metadata: Arc::new(metadata),
    }
}

/// Requests compiled into the generated module
pub fn requests() -> Vec<CompileRequest> {
    vec![
        CompileRequest::new("Car"),
        CompileRequest::new("Fuel"),
        CompileRequest::new("Connection"),
        CompileRequest::named("Connection", "replica"),
        CompileRequest::new("Mailer"),
        CompileRequest::new("Logger"),
        CompileRequest::named("Logger", "audit"),
        CompileRequest::named("Catalog", "cached"),
    ]
}
