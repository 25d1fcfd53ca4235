//! Shared fixtures for unit tests

use crate::aspect::AspectDescriptor;
use crate::descriptor::{
    Method, Parameter, Property, TypeDescriptor, TypeRegistry, Visibility,
};
use crate::directive::{BindingDirective, ProviderRef, StaticMetadata};
use crate::resolver::RESOLVER_TYPE;
use crate::value::{Args, Argument, Arguments, Object, ObjectRef, Value};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Side-effect counters keyed by type or `Type::method`
#[derive(Clone, Default)]
pub(crate) struct Counters(Arc<Mutex<BTreeMap<String, usize>>>);

impl Counters {
    pub(crate) fn bump(&self, name: &str) {
        *self.0.lock().unwrap().entry(name.to_string()).or_default() += 1;
    }

    pub(crate) fn get(&self, name: &str) -> usize {
        self.0.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

pub(crate) struct Fixture {
    pub types: Arc<TypeRegistry>,
    pub metadata: Arc<StaticMetadata>,
    pub counters: Counters,
}

/// Constructor body that counts its runs and assigns every argument to a field.
fn counting(
    counters: &Counters,
    name: &'static str,
) -> impl Fn(Option<&ObjectRef>, &Arguments) -> Result<Value> + Send + Sync + 'static {
    let counters = counters.clone();
    move |this: Option<&ObjectRef>, args: &Arguments| {
        counters.bump(name);
        if let Some(this) = this {
            for (field, value) in args.iter() {
                this.set(field.clone(), value.clone());
            }
        }
        Ok(Value::Null)
    }
}

fn injecting(params: &[(&str, &str)]) -> Method {
    params
        .iter()
        .fold(Method::constructor().injectable(), |m, (name, ty)| {
            m.param(Parameter::typed(*name, *ty))
        })
}

/// The type world shared by resolver, compiler and emitter tests.
pub(crate) fn world() -> Fixture {
    let counters = Counters::default();
    let types = TypeRegistry::new();
    let metadata = StaticMetadata::new();

    // Car -> Engine -> Fuel (singleton), Car.radio injected
    types
        .register(
            TypeDescriptor::class("Fuel")
                .with_doc("@singleton")
                .with_constructor(Method::constructor().with_body(counting(&counters, "Fuel"))),
        )
        .register(
            TypeDescriptor::class("Engine").with_constructor(
                injecting(&[("fuel", "Fuel")]).with_body(counting(&counters, "Engine")),
            ),
        )
        .register(
            TypeDescriptor::class("Car")
                .with_constructor(
                    injecting(&[("engine", "Engine")]).with_body(counting(&counters, "Car")),
                )
                .with_property(Property::new("radio").with_doc("@inject\n@var Radio")),
        )
        .register(TypeDescriptor::class("Radio"));

    // Logger with qualifier map and named implementation tags
    types
        .register(TypeDescriptor::class("Logger").with_doc(
            "@singleton\n@implementedBy audit LegacyAuditLogger\n@implementedBy legacy LegacyAuditLogger",
        ))
        .register(TypeDescriptor::class("AuditLogger"))
        .register(TypeDescriptor::class("LegacyAuditLogger"))
        .register(
            TypeDescriptor::class("Billing").with_constructor(
                injecting(&[("logger", "Logger"), ("audit", "Logger")])
                    .with_doc("@named audit $audit"),
            ),
        );
    metadata.bind(
        "Logger",
        BindingDirective::new().with_named("audit", "AuditLogger"),
    );

    // Providers
    types
        .register(TypeDescriptor::class("Clock"))
        .register(
            TypeDescriptor::class("Connection")
                .with_constructor(Method::constructor().with_body(counting(&counters, "Connection"))),
        )
        .register(
            TypeDescriptor::class("ConnectionProvider")
                .with_constructor(
                    Method::constructor()
                        .injectable()
                        .param(Parameter::new("dsn"))
                        .param(Parameter::typed("clock", "Clock"))
                        .with_body(counting(&counters, "ConnectionProvider")),
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
        )
        .register(TypeDescriptor::class("Broken"));
    metadata
        .bind(
            "Connection",
            BindingDirective::new()
                .with_provider(
                    ProviderRef::new("ConnectionProvider")
                        .with_params(Args::new().with("dsn", "sqlite::memory:")),
                )
                .with_named_provider(
                    "replica",
                    ProviderRef::new("ConnectionProvider").with_params(Args::new().with("dsn", "replica")),
                ),
        )
        .bind(
            "Broken",
            BindingDirective::new().with_provider(ProviderRef::new("Clock")),
        );

    // ProviderX requires X, X is provided by ProviderX
    types
        .register(TypeDescriptor::class("X"))
        .register(
            TypeDescriptor::class("ProviderX")
                .with_constructor(injecting(&[("x", "X")]))
                .provider(|_| Ok(Object::new("X").into())),
        );
    metadata.bind(
        "X",
        BindingDirective::new().with_provider(ProviderRef::new("ProviderX")),
    );

    // Catalog#cached wraps a plain Catalog; Catalog#looped needs itself
    types
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
        )
        .register(
            TypeDescriptor::class("LoopingCatalog")
                .with_constructor(injecting(&[("inner", "Catalog")]).with_doc("@named looped $inner"))
                .provider(|_| Ok(Object::new("Catalog").into())),
        )
        .register(TypeDescriptor::interface("Store"))
        .register(TypeDescriptor::class("DiskStore"))
        .register(TypeDescriptor::class("MirrorStore").with_constructor(injecting(&[("primary", "Store")])));
    metadata
        .bind(
            "Catalog",
            BindingDirective::new()
                .with_named_provider("cached", ProviderRef::new("CachingCatalog"))
                .with_named_provider("looped", ProviderRef::new("LoopingCatalog")),
        )
        .bind(
            "Store",
            BindingDirective::new()
                .with_concrete_type("DiskStore")
                .with_named("mirrored", "MirrorStore"),
        );

    // Overrides, interfaces, loops
    types
        .register(TypeDescriptor::interface("Storage").with_doc("@implementedBy DiskStorage"))
        .register(TypeDescriptor::class("DiskStorage"))
        .register(TypeDescriptor::class("MemoryStorage"))
        .register(TypeDescriptor::interface("Cache"))
        .register(TypeDescriptor::class("Ping"))
        .register(TypeDescriptor::class("Pong"))
        .register(TypeDescriptor::class("Chicken").with_constructor(injecting(&[("egg", "Egg")])))
        .register(TypeDescriptor::class("Egg").with_constructor(injecting(&[("chicken", "Chicken")])));
    metadata
        .bind("Ping", BindingDirective::new().with_concrete_type("Pong"))
        .bind("Pong", BindingDirective::new().with_concrete_type("Ping"));

    // Parameters and defaults
    types
        .register(
            TypeDescriptor::class("Paint")
                .with_constructor(Method::constructor().injectable().param(Parameter::new("color"))),
        )
        .register(
            TypeDescriptor::class("Pool").singleton().with_constructor(
                Method::constructor()
                    .param(Parameter::new("size"))
                    .param(Parameter::new("name"))
                    .with_body(counting(&counters, "Pool")),
            ),
        )
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
        )
        .register(
            TypeDescriptor::class("Vault")
                .with_constructor(Method::constructor().with_body(counting(&counters, "Vault")))
                .with_property(
                    Property::new("secret")
                        .injectable()
                        .typed("Clock")
                        .with_visibility(Visibility::Private),
                ),
        )
        .register(
            TypeDescriptor::class("ServiceLocator")
                .with_constructor(injecting(&[("resolver", RESOLVER_TYPE)])),
        );
    metadata.bind(
        "Mailer",
        BindingDirective::new()
            .with_param("host", Value::from("smtp.local"))
            .with_param("transport", Argument::bind("SmtpTransport")),
    );

    // Static accessor
    let accessor_counters = counters.clone();
    types.register(
        TypeDescriptor::class("SystemClock").with_static_accessor(Method::new("instance").with_body(
            move |_, _| {
                accessor_counters.bump("SystemClock");
                Ok(Object::with_fields("SystemClock", [("zone", Value::from("UTC"))]).into())
            },
        )),
    );

    // Aspects
    types
        .register(TypeDescriptor::class("TrailAspect").before_aspect(|_, jp, mut args| {
            let trail = args.get("trail").and_then(Value::as_str).unwrap_or_default();
            let mark = jp.aspect_args.get("mark").map(String::as_str).unwrap_or("?");
            let next = format!("{trail}{mark}");
            args.insert("trail", next);
            Ok(args)
        }))
        .register(TypeDescriptor::class("StampAspect").after_aspect(|_, _, result| {
            if let Some(object) = result.as_object() {
                object.set("stamped", true);
            }
            Ok(result)
        }))
        .register(TypeDescriptor::class("SnapshotCache").intercept_aspect(|_, _, _, _| {
            Ok(Some(
                Object::with_fields("Snapshot", [("cached", Value::Bool(true))]).into(),
            ))
        }))
        .register(TypeDescriptor::class("CacheAspect").intercept_aspect(|_, jp, args, prior| {
            let hit = jp.aspect_args.get("hit").and_then(|h| h.parse::<i64>().ok());
            match args.get("id").and_then(Value::as_int) {
                Some(id) if Some(id) == hit => Ok(Some(Value::from(format!("cached-{id}")))),
                _ => Ok(prior),
            }
        }))
        .register(
            TypeDescriptor::class("Report").with_constructor(
                Method::constructor()
                    .param(Parameter::new("trail").optional(""))
                    .aspect(AspectDescriptor::before("TrailAspect").arg("mark", "A"))
                    .aspect(AspectDescriptor::after("StampAspect"))
                    .aspect(AspectDescriptor::before("TrailAspect").arg("mark", "B")),
            ),
        )
        .register(
            TypeDescriptor::class("Snapshot").singleton().with_constructor(
                Method::constructor()
                    .with_doc("@intercept SnapshotCache")
                    .with_body(counting(&counters, "Snapshot")),
            ),
        );

    // Methods
    let find_counters = counters.clone();
    types.register(
        TypeDescriptor::class("Repository")
            .with_method(
                Method::new("find")
                    .param(Parameter::new("id"))
                    .with_doc("@intercept CacheAspect hit=42")
                    .with_body(move |_, args| {
                        find_counters.bump("Repository::find");
                        let id = args.get("id").and_then(Value::as_int).unwrap_or_default();
                        Ok(Value::from(format!("row-{id}")))
                    }),
            )
            .with_method(
                Method::new("count")
                    .injectable()
                    .param(Parameter::typed("clock", "Clock"))
                    .with_body(|_, args| {
                        Ok(Value::from(args.get_object("clock").is_some()))
                    }),
            )
            .with_method(
                Method::static_accessor("create")
                    .with_body(|_, _| Ok(Object::new("Repository").into())),
            )
            .with_method(
                Method::new("purge")
                    .with_visibility(Visibility::Protected)
                    .with_body(|_, _| Ok(Value::Null)),
            )
            .with_method(
                Method::new("migrate")
                    .allowed_context("cli")
                    .with_body(|_, _| Ok(Value::Null)),
            )
            .with_method(Method::new("broken")),
    );

    Fixture {
        types: Arc::new(types),
        metadata: Arc::new(metadata),
        counters,
    }
}

