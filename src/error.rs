//! Error types for resolution and compilation

use crate::descriptor::TypeKind;
use thiserror::Error;

/// Configuration defects found while wiring a type.
///
/// The same causes are reported by the resolver at run time and, wrapped in
/// [`CompilationError::Unresolvable`], by the compiler at build time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// No mapping for a qualifier in the directive or in `@implementedBy` tags
    #[error("no binding for qualifier `{qualifier}` of {type_name}")]
    MissingQualifier {
        type_name: String,
        qualifier: String,
    },

    /// A required parameter has no explicit value, default or injectable type
    #[error("parameter `{parameter}` of {type_name}::{method} is not injectable")]
    ParameterNotInjectable {
        type_name: String,
        method: String,
        parameter: String,
    },

    /// Property injection into a private property
    #[error("property `{property}` of {type_name} must not be private for property injection")]
    NonPublicProperty { type_name: String, property: String },

    /// Injectable property declares conflicting types
    #[error("property `{property}` of {type_name} declares conflicting types: {}", types.join(", "))]
    AmbiguousPropertyType {
        type_name: String,
        property: String,
        types: Vec<String>,
    },

    /// Injectable property without a declared type
    #[error("property `{property}` of {type_name} has no declared type")]
    MissingPropertyType { type_name: String, property: String },

    /// Abstract or interface target with no concrete mapping
    #[error("cannot instantiate {kind} {type_name}")]
    NotInstantiable { type_name: String, kind: TypeKind },

    /// Provider type does not expose the provider capability
    #[error("provider {provider} bound for {target} does not implement the provider contract")]
    InvalidProvider { provider: String, target: String },

    /// A provider or interceptor produced something other than an object
    #[error("{source_type} produced a non-object value for {target}")]
    InvalidProduct { source_type: String, target: String },

    /// Aspect type lacks the capability for its declared phase
    #[error("aspect {aspect} attached to {owner}::{method} does not implement `{phase}`")]
    InvalidAspect {
        aspect: String,
        owner: String,
        method: String,
        phase: &'static str,
    },

    /// Concrete-type overrides loop back on themselves
    #[error("implementation redirect loop: {}", chain.join(" -> "))]
    RedirectCycle { chain: Vec<String> },

    /// Method not declared on the type
    #[error("method {method} not found in {type_name}")]
    MethodNotFound { type_name: String, method: String },

    /// Method exists but may not be invoked through the engine
    #[error("method {method} of {type_name} cannot be called: {reason}")]
    MethodNotCallable {
        type_name: String,
        method: String,
        reason: &'static str,
    },

    /// `@allowedContext` does not match the caller's context
    #[error("invalid invocation context `{actual}` for {type_name}::{method}(), `{expected}` expected")]
    DisallowedContext {
        type_name: String,
        method: String,
        expected: String,
        actual: String,
    },
}

/// Build-time failures of the ahead-of-time compiler.
///
/// Compilation is all-or-nothing: the first error aborts the invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompilationError {
    /// A resolution defect found while walking the graph
    #[error("cannot compile {root}: {source}")]
    Unresolvable {
        root: String,
        #[source]
        source: ResolutionError,
    },

    /// A type referenced from the graph cannot be described
    #[error("cannot compile {root}: type not found: {type_name}")]
    TypeNotFound { root: String, type_name: String },

    /// A provider whose dependency graph requires itself
    #[error("provider cycle while compiling {root}: {}", chain.join(" -> "))]
    ProviderCycle { root: String, chain: Vec<String> },

    /// Any other cycle in the construction graph
    #[error("dependency cycle while compiling {root}: {}", chain.join(" -> "))]
    DependencyCycle { root: String, chain: Vec<String> },

    /// A unit references a unit that is not part of the set
    #[error("unit {unit} references missing unit {missing}")]
    MissingUnit { unit: String, missing: String },

    /// Two types map to the same generated module name
    #[error("types {first} and {second} both map to generated module `{module}`")]
    NameCollision {
        first: String,
        second: String,
        module: String,
    },

    /// Emitted tokens did not parse back as a Rust file
    #[error("generated source for {type_name} is not valid Rust: {reason}")]
    InvalidOutput { type_name: String, reason: String },
}

/// Errors that can occur while resolving, compiling or invoking
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// Configuration defect found at run time
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The type source does not know the type
    #[error("type not found: {type_name}")]
    TypeNotFound { type_name: String },

    /// Build-time failure
    #[error(transparent)]
    Compilation(#[from] CompilationError),

    /// Construction re-entered a type already being built on this thread
    #[error("circular dependency detected while resolving: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    /// Host code (constructor, method body, capability) failed
    #[error("{type_name}::{method} failed: {reason}")]
    Invocation {
        type_name: String,
        method: String,
        reason: String,
    },

    /// The compiled container has no unit or entry for a request
    #[error("{type_name} was not compiled into this unit set")]
    NotCompiled { type_name: String },

    /// Metadata configuration could not be loaded
    #[error("invalid metadata configuration: {0}")]
    Config(String),

    /// Writing generated artifacts failed
    #[error("i/o error on {path}: {reason}")]
    Io { path: String, reason: String },
}

impl DiError {
    /// Create a TypeNotFound error
    #[inline]
    pub fn type_not_found(type_name: impl Into<String>) -> Self {
        Self::TypeNotFound {
            type_name: type_name.into(),
        }
    }

    /// Create an Invocation error, for use inside host bodies
    #[inline]
    pub fn invocation(
        type_name: impl Into<String>,
        method: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invocation {
            type_name: type_name.into(),
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Create an Io error
    pub(crate) fn io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    /// Convert a failure met while compiling `root` into a compilation error.
    ///
    /// Errors that have no build-time meaning (host invocation, i/o) are kept
    /// as they are.
    pub(crate) fn into_compilation(self, root: &str) -> DiError {
        match self {
            DiError::Resolution(source) => CompilationError::Unresolvable {
                root: root.to_string(),
                source,
            }
            .into(),
            DiError::TypeNotFound { type_name } => CompilationError::TypeNotFound {
                root: root.to_string(),
                type_name,
            }
            .into(),
            other => other,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_message() {
        let err: DiError = ResolutionError::ParameterNotInjectable {
            type_name: "Car".into(),
            method: "constructor".into(),
            parameter: "engine".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "parameter `engine` of Car::constructor is not injectable"
        );
    }

    #[test]
    fn test_into_compilation_wraps_resolution_errors() {
        let err = DiError::from(ResolutionError::MissingQualifier {
            type_name: "Logger".into(),
            qualifier: "audit".into(),
        })
        .into_compilation("App");

        match err {
            DiError::Compilation(CompilationError::Unresolvable { root, source }) => {
                assert_eq!(root, "App");
                assert!(matches!(source, ResolutionError::MissingQualifier { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = DiError::type_not_found("Ghost").into_compilation("App");
        assert!(matches!(
            err,
            DiError::Compilation(CompilationError::TypeNotFound { .. })
        ));
    }

    #[test]
    fn test_cycle_message_lists_chain() {
        let err = CompilationError::ProviderCycle {
            root: "X".into(),
            chain: vec!["X".into(), "ProviderX".into(), "X".into()],
        };
        assert_eq!(
            err.to_string(),
            "provider cycle while compiling X: X -> ProviderX -> X"
        );
    }
}
