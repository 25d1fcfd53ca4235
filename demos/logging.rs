//! Resolution with logging enabled
//!
//! ```bash
//! cargo run --example logging --features logging-pretty
//! DEPENDENCY_WEAVER_LOG=dependency_weaver=trace cargo run --example logging --features logging-json
//! ```

use dependency_weaver::{Method, Parameter, Resolver, StaticMetadata, TypeDescriptor, TypeRegistry};

fn main() {
    dependency_weaver::logging::builder().debug().weaver_only().pretty().init();

    let types = TypeRegistry::new();
    types
        .register(TypeDescriptor::class("Database").singleton())
        .register(
            TypeDescriptor::class("UserService").with_constructor(
                Method::constructor()
                    .injectable()
                    .param(Parameter::typed("db", "Database")),
            ),
        );

    let resolver = Resolver::new(types, StaticMetadata::new());

    // logs: "Resolving type", "Constructing instance", "Singleton created and cached"
    let _users = resolver.resolve("UserService").unwrap();
    // logs: "Singleton cache hit"
    let _again = resolver.resolve("UserService").unwrap();

    // logs nothing: the failure is returned to the caller
    let missing = resolver.resolve("Mailer");
    assert!(missing.is_err());
    println!("missing type: {}", missing.unwrap_err());
}
