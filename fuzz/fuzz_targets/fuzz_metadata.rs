#![no_main]

//! Fuzz target for JSON binding configuration
//!
//! Malformed documents must be rejected with an error, never a panic, and any
//! accepted document must be resolvable without panicking.

use dependency_weaver::{Resolver, StaticMetadata, TypeDescriptor, TypeRegistry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(metadata) = StaticMetadata::from_json_str(json) else {
        return;
    };

    let types = TypeRegistry::new();
    types
        .register(TypeDescriptor::class("A"))
        .register(TypeDescriptor::class("B"))
        .register(TypeDescriptor::interface("C"));

    let resolver = Resolver::new(types, metadata);
    for name in ["A", "B", "C"] {
        let _ = resolver.resolve(name);
        let _ = resolver.resolve_named(name, "default");
    }
});
