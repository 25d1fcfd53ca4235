//! # dependency-weaver - Dependency Injection with Aspect Weaving
//!
//! An injection engine for a dynamic object model. Types are described by
//! [`TypeDescriptor`]s (constructor, properties, methods, doc-comment tags)
//! and wired according to [`BindingDirective`]s. The same binding graph can be
//! resolved at run time by the [`Resolver`] or compiled ahead of time into
//! [`FactoryUnit`]s and executed by a [`CompiledContainer`], with identical
//! results.
//!
//! ## Features
//!
//! - **Binding precedence** - bound instance, provider, concrete override, self-construction
//! - **Qualifiers** - `@implementedBy name Type`, `@named name $param`, per-directive maps
//! - **Singletons** - keyed by type, qualifier and an argument fingerprint; built once under concurrency
//! - **Providers** - factory objects with their own injected dependencies
//! - **Aspects** - before, intercept and after advice on constructors and methods
//! - **Ahead-of-time compilation** - factory units, injection proxies and generated Rust source
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use dependency_weaver::{
//!     BindingDirective, Method, Parameter, Resolver, StaticMetadata, TypeDescriptor, TypeRegistry,
//! };
//!
//! let types = TypeRegistry::new();
//! types
//!     .register(TypeDescriptor::class("Fuel").with_doc("@singleton"))
//!     .register(
//!         TypeDescriptor::class("Engine")
//!             .with_constructor(Method::constructor().injectable().param(Parameter::typed("fuel", "Fuel"))),
//!     )
//!     .register(TypeDescriptor::interface("Logger"))
//!     .register(TypeDescriptor::class("FileLogger"));
//!
//! let metadata = StaticMetadata::new();
//! metadata.bind("Logger", BindingDirective::new().with_concrete_type("FileLogger"));
//!
//! let resolver = Resolver::new(types, metadata);
//! let engine = resolver.resolve("Engine").unwrap();
//! assert_eq!(engine.get_object("fuel").unwrap().class(), "Fuel");
//! assert_eq!(resolver.resolve("Logger").unwrap().class(), "FileLogger");
//! ```
//!
//! ## Compiling the Graph
//!
//! ```rust
//! use dependency_weaver::{CompileRequest, CompiledContainer, Compiler, StaticMetadata, TypeDescriptor, TypeRegistry};
//!
//! let types = TypeRegistry::new();
//! types.register(TypeDescriptor::class("Clock").singleton());
//!
//! let units = Compiler::new(types, StaticMetadata::new())
//!     .compile(&[CompileRequest::new("Clock")])
//!     .unwrap();
//! let sources = dependency_weaver::emit::render(&units).unwrap();
//! assert_eq!(sources.len(), 2);
//!
//! let container = CompiledContainer::load(units).unwrap();
//! let a = container.get_instance("Clock").unwrap();
//! let b = container.get_instance("Clock").unwrap();
//! assert_eq!(a.id(), b.id());
//! ```

mod aspect;
mod compiled;
mod compiler;
mod descriptor;
mod directive;
pub mod emit;
mod error;
#[cfg(feature = "logging")]
pub mod logging;
mod registry;
mod resolver;
pub mod tags;
mod unit;
mod value;

#[cfg(test)]
mod testing;

pub use aspect::*;
pub use compiled::*;
pub use compiler::*;
pub use descriptor::*;
pub use directive::*;
pub use error::*;
pub use registry::*;
pub use resolver::{Resolver, ResolverHandle, RESOLVER_TYPE};
pub use tags::{MemberTags, TypeTags, DEFAULT_QUALIFIER};
pub use unit::*;
pub use value::*;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Args, Argument, BindingDirective, CompileRequest, CompiledContainer, Compiler, DiError,
        Method, MetadataProvider, Object, ObjectRef, Parameter, Property, ProviderRef, Resolver,
        Result, StaticMetadata, TypeDescriptor, TypeRegistry, TypeSource, Value,
    };
    pub use std::sync::Arc;
}
