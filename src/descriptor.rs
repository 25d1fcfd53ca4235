//! Type descriptors: the structural facts the engine needs about a type
//!
//! A [`TypeDescriptor`] is what the host runtime's introspection facility
//! reports for a type: its kind, constructor (or static singleton accessor),
//! properties, methods and attached tags. It also carries the host code the
//! engine calls: constructor and method bodies, and the provider and aspect
//! capabilities.
//!
//! Descriptors come from a [`TypeSource`]. [`TypeRegistry`] is the in-memory
//! source used by tests and embedders that declare their types up front.

use crate::aspect::{AspectDescriptor, AspectPhase, JoinPoint};
use crate::directive::ProviderRef;
use crate::tags::{self, MemberTags, TypeTags};
use crate::value::{Arguments, ObjectRef, Value};
use crate::{DiError, ResolutionError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Name of the constructor method in descriptors and join points.
pub const CONSTRUCTOR: &str = "constructor";

/// Instantiability of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TypeKind {
    #[default]
    Concrete,
    Abstract,
    Interface,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeKind::Concrete => "class",
            TypeKind::Abstract => "abstract class",
            TypeKind::Interface => "interface",
        })
    }
}

/// How instances of a type come into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConstructionMode {
    /// Allocate, then run the constructor body on the new instance
    #[default]
    DirectConstructor,
    /// Call a static accessor that returns the instance
    StaticAccessor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// Host code for a constructor, accessor or method.
///
/// Constructors receive the freshly allocated instance, static accessors
/// receive `None` and return the instance, methods receive their receiver.
pub type MethodBody = Arc<dyn Fn(Option<&ObjectRef>, &Arguments) -> Result<Value> + Send + Sync>;

/// Provider capability: `get()` on a resolved provider instance.
pub type ProviderFn = Arc<dyn Fn(&ObjectRef) -> Result<Value> + Send + Sync>;

/// Before-aspect capability; returns the (possibly rewritten) arguments.
pub type BeforeFn =
    Arc<dyn Fn(&ObjectRef, &JoinPoint<'_>, Arguments) -> Result<Arguments> + Send + Sync>;

/// Intercept-aspect capability; `None` is the "no result" sentinel.
pub type InterceptFn = Arc<
    dyn Fn(&ObjectRef, &JoinPoint<'_>, &Arguments, Option<Value>) -> Result<Option<Value>>
        + Send
        + Sync,
>;

/// After-aspect capability; returns the (possibly replaced) result.
pub type AfterFn = Arc<dyn Fn(&ObjectRef, &JoinPoint<'_>, Value) -> Result<Value> + Send + Sync>;

/// Provider and aspect contracts a type implements.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub provider: Option<ProviderFn>,
    pub before: Option<BeforeFn>,
    pub intercept: Option<InterceptFn>,
    pub after: Option<AfterFn>,
}

impl Capabilities {
    pub fn implements(&self, phase: AspectPhase) -> bool {
        match phase {
            AspectPhase::Before => self.before.is_some(),
            AspectPhase::Intercept => self.intercept.is_some(),
            AspectPhase::After => self.after.is_some(),
        }
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("provider", &self.provider.is_some())
            .field("before", &self.before.is_some())
            .field("intercept", &self.intercept.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// A constructor or method parameter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameter {
    pub name: String,
    /// Dependency type; untyped parameters need an explicit value or a default
    pub declared_type: Option<String>,
    pub optional: bool,
    pub default: Option<Value>,
    /// `@named` qualifier attached to this parameter
    pub qualifier: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn typed(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            declared_type: Some(declared_type.into()),
            ..Self::new(name)
        }
    }

    /// Mark optional with a default literal.
    pub fn optional(mut self, default: impl Into<Value>) -> Self {
        self.optional = true;
        self.default = Some(default.into());
        self
    }

    pub fn named(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }
}

/// A declared property
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Property {
    pub name: String,
    /// Every declared type tag; injection requires exactly one distinct type
    pub declared_types: Vec<String>,
    pub visibility: Visibility,
    pub injectable: bool,
    pub qualifier: Option<String>,
}

impl Property {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn typed(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_types.push(declared_type.into());
        self
    }

    pub fn injectable(mut self) -> Self {
        self.injectable = true;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn named(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Apply `@inject`, `@var` and `@named` tags from a doc blob.
    pub fn with_doc(mut self, doc: &str) -> Self {
        let parsed = tags::parse_property_tags(doc);
        self.injectable |= parsed.injectable;
        self.declared_types.extend(parsed.declared_types);
        if parsed.qualifier.is_some() {
            self.qualifier = parsed.qualifier;
        }
        self
    }

    /// The single dependency type this property is injected with.
    pub(crate) fn injection_type(&self, owner: &str) -> std::result::Result<&str, ResolutionError> {
        if self.visibility == Visibility::Private {
            return Err(ResolutionError::NonPublicProperty {
                type_name: owner.to_string(),
                property: self.name.clone(),
            });
        }
        let mut distinct: Vec<&String> = Vec::new();
        for ty in &self.declared_types {
            if !distinct.contains(&ty) {
                distinct.push(ty);
            }
        }
        match distinct.as_slice() {
            [] => Err(ResolutionError::MissingPropertyType {
                type_name: owner.to_string(),
                property: self.name.clone(),
            }),
            [single] => Ok(single.as_str()),
            _ => Err(ResolutionError::AmbiguousPropertyType {
                type_name: owner.to_string(),
                property: self.name.clone(),
                types: distinct.into_iter().cloned().collect(),
            }),
        }
    }
}

/// A constructor, static accessor or instance method
#[derive(Clone, Default)]
pub struct Method {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub params: Vec<Parameter>,
    pub tags: MemberTags,
    pub body: Option<MethodBody>,
}

impl Method {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn constructor() -> Self {
        Self::new(CONSTRUCTOR)
    }

    /// A public static method returning the singleton instance.
    pub fn static_accessor(name: impl Into<String>) -> Self {
        Self {
            is_static: true,
            ..Self::new(name)
        }
    }

    pub fn param(mut self, param: Parameter) -> Self {
        self.params.push(param);
        self
    }

    /// Mark as `@inject`: typed parameters are resolved from the engine.
    pub fn injectable(mut self) -> Self {
        self.tags.injectable = true;
        self
    }

    pub fn aspect(mut self, aspect: AspectDescriptor) -> Self {
        self.tags.aspects.push(aspect);
        self
    }

    pub fn allowed_context(mut self, context: impl Into<String>) -> Self {
        self.tags.allowed_context = Some(context.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_body<F>(mut self, body: F) -> Self
    where
        F: Fn(Option<&ObjectRef>, &Arguments) -> Result<Value> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    /// Apply tags from a doc blob: `@inject`, aspects, `@named q $param`,
    /// `@allowedContext`.
    pub fn with_doc(mut self, doc: &str) -> Self {
        let parsed = tags::parse_method_tags(doc);
        self.tags.injectable |= parsed.tags.injectable;
        self.tags.aspects.extend(parsed.tags.aspects);
        if parsed.tags.allowed_context.is_some() {
            self.tags.allowed_context = parsed.tags.allowed_context;
        }
        for param in &mut self.params {
            if let Some(q) = parsed.param_qualifiers.get(&param.name) {
                param.qualifier = Some(q.clone());
            }
        }
        self
    }

    pub fn aspects(&self, phase: AspectPhase) -> impl Iterator<Item = &AspectDescriptor> {
        self.tags.aspects.iter().filter(move |a| a.phase == phase)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("visibility", &self.visibility)
            .field("is_static", &self.is_static)
            .field("params", &self.params)
            .field("tags", &self.tags)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Structural description of one type
#[derive(Clone, Debug, Default)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    pub construction: ConstructionMode,
    /// Constructor, or the static accessor in `StaticAccessor` mode
    pub constructor: Option<Method>,
    pub properties: Vec<Property>,
    pub methods: Vec<Method>,
    pub tags: TypeTags,
    /// Raw doc blob the type tags were parsed from
    pub doc_tags: String,
    pub capabilities: Capabilities,
}

impl TypeDescriptor {
    fn of_kind(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::of_kind(name, TypeKind::Concrete)
    }

    pub fn abstract_class(name: impl Into<String>) -> Self {
        Self::of_kind(name, TypeKind::Abstract)
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::of_kind(name, TypeKind::Interface)
    }

    pub fn with_constructor(mut self, constructor: Method) -> Self {
        self.construction = ConstructionMode::DirectConstructor;
        self.constructor = Some(constructor);
        self
    }

    /// Build instances through a static singleton accessor.
    pub fn with_static_accessor(mut self, accessor: Method) -> Self {
        self.construction = ConstructionMode::StaticAccessor;
        self.constructor = Some(Method {
            is_static: true,
            ..accessor
        });
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    /// Parse a doc blob into type tags (merged with tags already set).
    pub fn with_doc(mut self, doc: &str) -> Self {
        self.tags.merge(tags::parse_type_tags(doc));
        self.doc_tags.push_str(doc);
        self
    }

    pub fn singleton(mut self) -> Self {
        self.tags.singleton = true;
        self
    }

    /// `@implementedBy default`
    pub fn implemented_by(mut self, type_name: impl Into<String>) -> Self {
        self.tags.implemented_by = Some(type_name.into());
        self
    }

    /// `@implementedBy <qualifier>`
    pub fn implemented_by_named(
        mut self,
        qualifier: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        self.tags
            .named_implementations
            .insert(qualifier.into(), type_name.into());
        self
    }

    /// `@providedBy default`
    pub fn provided_by(mut self, provider: ProviderRef) -> Self {
        self.tags.provided_by = Some(provider);
        self
    }

    /// `@providedBy <qualifier>`
    pub fn provided_by_named(mut self, qualifier: impl Into<String>, provider: ProviderRef) -> Self {
        self.tags.named_providers.insert(qualifier.into(), provider);
        self
    }

    /// Implement the provider contract.
    pub fn provider<F>(mut self, get: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<Value> + Send + Sync + 'static,
    {
        self.capabilities.provider = Some(Arc::new(get));
        self
    }

    pub fn before_aspect<F>(mut self, before: F) -> Self
    where
        F: Fn(&ObjectRef, &JoinPoint<'_>, Arguments) -> Result<Arguments> + Send + Sync + 'static,
    {
        self.capabilities.before = Some(Arc::new(before));
        self
    }

    pub fn intercept_aspect<F>(mut self, intercept: F) -> Self
    where
        F: Fn(&ObjectRef, &JoinPoint<'_>, &Arguments, Option<Value>) -> Result<Option<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.capabilities.intercept = Some(Arc::new(intercept));
        self
    }

    pub fn after_aspect<F>(mut self, after: F) -> Self
    where
        F: Fn(&ObjectRef, &JoinPoint<'_>, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.capabilities.after = Some(Arc::new(after));
        self
    }

    #[inline]
    pub fn has_static_singleton_accessor(&self) -> bool {
        self.construction == ConstructionMode::StaticAccessor && self.constructor.is_some()
    }

    #[inline]
    pub fn is_instantiable(&self) -> bool {
        self.kind == TypeKind::Concrete
    }

    pub fn ensure_instantiable(&self) -> std::result::Result<(), ResolutionError> {
        if self.is_instantiable() {
            Ok(())
        } else {
            Err(ResolutionError::NotInstantiable {
                type_name: self.name.clone(),
                kind: self.kind,
            })
        }
    }

    /// Name used for the construction join point.
    pub fn construction_method_name(&self) -> &str {
        self.constructor
            .as_ref()
            .map(|m| m.name.as_str())
            .unwrap_or(CONSTRUCTOR)
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn injectable_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.injectable)
    }
}

/// Source of type descriptors (the host's introspection facility).
pub trait TypeSource: Send + Sync {
    /// Describe a type, or fail with `DiError::TypeNotFound`.
    fn describe(&self, type_name: &str) -> Result<Arc<TypeDescriptor>>;
}

impl<T: TypeSource + ?Sized> TypeSource for Arc<T> {
    fn describe(&self, type_name: &str) -> Result<Arc<TypeDescriptor>> {
        (**self).describe(type_name)
    }
}

/// In-memory type source
#[derive(Default)]
pub struct TypeRegistry {
    types: DashMap<String, Arc<TypeDescriptor>, RandomState>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a descriptor.
    pub fn register(&self, descriptor: TypeDescriptor) -> &Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_weaver",
            type_name = descriptor.name.as_str(),
            kind = %descriptor.kind,
            "Registering type descriptor"
        );

        self.types
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        self
    }

    #[inline]
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

impl TypeSource for TypeRegistry {
    fn describe(&self, type_name: &str) -> Result<Arc<TypeDescriptor>> {
        self.types
            .get(type_name)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| DiError::type_not_found(type_name))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("count", &self.len())
            .finish()
    }
}
