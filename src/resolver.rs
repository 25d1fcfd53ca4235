//! Interpreted binding resolution
//!
//! [`Resolver`] wires instances at run time from a [`TypeSource`] and a
//! [`MetadataProvider`]. For every request it applies the binding precedence
//! (bound instance, provider, concrete override, self-construction), honours
//! the singleton policy through its [`SingletonRegistry`], resolves
//! constructor arguments and injectable properties, and weaves constructor
//! and method aspects.
//!
//! # Example
//!
//! ```rust
//! use dependency_weaver::{Method, Parameter, Resolver, StaticMetadata, TypeDescriptor, TypeRegistry};
//!
//! let types = TypeRegistry::new();
//! types
//!     .register(TypeDescriptor::class("Fuel").singleton())
//!     .register(
//!         TypeDescriptor::class("Engine")
//!             .with_constructor(Method::constructor().injectable().param(Parameter::typed("fuel", "Fuel"))),
//!     );
//!
//! let resolver = Resolver::new(types, StaticMetadata::new());
//! let a = resolver.resolve("Engine").unwrap();
//! let b = resolver.resolve("Engine").unwrap();
//! assert_ne!(a.id(), b.id());
//! assert_eq!(a.get_object("fuel").unwrap().id(), b.get_object("fuel").unwrap().id());
//! ```

use crate::aspect::{self, AspectInstances, Weaved, Woven};
use crate::descriptor::{
    Capabilities, ConstructionMode, Method, MethodBody, Parameter, Property, ProviderFn,
    TypeDescriptor, TypeSource, Visibility, CONSTRUCTOR,
};
use crate::directive::{
    self, Binding, BindingDirective, MetadataProvider, ProviderRef, RedirectChain, SingletonPolicy,
};
use crate::registry::{Creation, SingletonKey, SingletonRegistry};
use crate::value::{Args, Argument, Arguments, Object, ObjectRef, Value};
use crate::{DiError, ResolutionError, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Type name under which every resolver registers itself.
pub const RESOLVER_TYPE: &str = "dependency_weaver::Resolver";

// =============================================================================
// Construction guard
// =============================================================================

thread_local! {
    /// Requests under construction on this thread, outermost first
    static CONSTRUCTING: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Label of a request on a construction path: `Type` or `Type#qualifier`.
pub(crate) fn request_label(type_name: &str, qualifier: Option<&str>) -> String {
    match qualifier {
        Some(q) => format!("{type_name}#{q}"),
        None => type_name.to_string(),
    }
}

/// Marks a request as under construction for the current thread.
///
/// Constructions enter unqualified, since building a type does not depend on
/// how it was requested. Provider calls enter with the request's qualifier:
/// `A#cached` may be provided by something that needs plain `A`.
pub(crate) struct ConstructionGuard;

impl ConstructionGuard {
    pub(crate) fn enter(type_name: &str, qualifier: Option<&str>) -> Result<Self> {
        let label = request_label(type_name, qualifier);
        CONSTRUCTING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&label) {
                let mut chain = stack.clone();
                chain.push(label);
                return Err(DiError::CircularDependency { chain });
            }
            stack.push(label);
            Ok(ConstructionGuard)
        })
    }
}

impl Drop for ConstructionGuard {
    fn drop(&mut self) {
        CONSTRUCTING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Native payload of the resolver's self-registered object
#[derive(Debug, Clone)]
pub struct ResolverHandle(Weak<ResolverInner>);

impl ResolverHandle {
    pub fn upgrade(&self) -> Option<Resolver> {
        self.0.upgrade().map(|inner| Resolver { inner })
    }
}

struct ResolverInner {
    types: Arc<dyn TypeSource>,
    metadata: Arc<dyn MetadataProvider>,
    registry: SingletonRegistry,
    handle: ObjectRef,
}

impl fmt::Debug for ResolverInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverInner")
            .field("registry", &self.registry)
            .finish()
    }
}

/// Run-time binding resolver
///
/// Cloning is cheap and yields a handle to the same resolver state.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
}

/// What a construction run produced
enum Built {
    Constructed(ObjectRef),
    Intercepted(ObjectRef),
}

impl Built {
    fn into_creation(self) -> Creation {
        match self {
            Built::Constructed(o) => Creation::Store(o),
            Built::Intercepted(o) => Creation::Skip(o),
        }
    }

    fn into_object(self) -> ObjectRef {
        match self {
            Built::Constructed(o) | Built::Intercepted(o) => o,
        }
    }
}

impl Resolver {
    /// Create a resolver and register it as its own singleton.
    pub fn new<T, M>(types: T, metadata: M) -> Self
    where
        T: TypeSource + 'static,
        M: MetadataProvider + 'static,
    {
        Self::from_shared(Arc::new(types), Arc::new(metadata))
    }

    /// Create a resolver over shared sources.
    pub fn from_shared(types: Arc<dyn TypeSource>, metadata: Arc<dyn MetadataProvider>) -> Self {
        #[cfg(feature = "logging")]
        debug!(target: "dependency_weaver", "Creating resolver");

        let inner = Arc::new_cyclic(|weak| {
            let handle = Object::with_native(RESOLVER_TYPE, ResolverHandle(weak.clone()));
            let registry = SingletonRegistry::new();
            registry.insert(SingletonKey::plain(RESOLVER_TYPE), Arc::clone(&handle));
            ResolverInner {
                types,
                metadata,
                registry,
                handle,
            }
        });
        Self { inner }
    }

    /// Recover the resolver behind its self-registered object.
    pub fn from_object(object: &ObjectRef) -> Option<Resolver> {
        object.native::<ResolverHandle>()?.upgrade()
    }

    /// The object this resolver is registered as.
    #[inline]
    pub fn handle(&self) -> ObjectRef {
        Arc::clone(&self.inner.handle)
    }

    #[inline]
    pub fn registry(&self) -> &SingletonRegistry {
        &self.inner.registry
    }

    #[inline]
    pub fn types(&self) -> &Arc<dyn TypeSource> {
        &self.inner.types
    }

    #[inline]
    pub fn metadata(&self) -> &Arc<dyn MetadataProvider> {
        &self.inner.metadata
    }

    /// Resolve an unqualified instance without explicit arguments.
    #[inline]
    pub fn resolve(&self, type_name: &str) -> Result<ObjectRef> {
        self.resolve_with(type_name, None, &Args::new())
    }

    /// Resolve the `qualifier` binding of `type_name`.
    #[inline]
    pub fn resolve_named(&self, type_name: &str, qualifier: &str) -> Result<ObjectRef> {
        self.resolve_with(type_name, Some(qualifier), &Args::new())
    }

    /// Resolve with an optional qualifier and explicit arguments.
    pub fn resolve_with(
        &self,
        type_name: &str,
        qualifier: Option<&str>,
        args: &Args,
    ) -> Result<ObjectRef> {
        if type_name == RESOLVER_TYPE {
            return Ok(self.handle());
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "dependency_weaver",
            type_name,
            qualifier = ?qualifier,
            explicit_args = args.len(),
            "Resolving type"
        );

        let mut policy = SingletonPolicy::default();
        let mut chain = RedirectChain::default();
        let mut current = type_name.to_string();
        let mut lookup = qualifier;

        loop {
            chain.visit(&current)?;
            let directive = self.inner.metadata.directive(&current);
            let descriptor = self.inner.types.describe(&current)?;
            policy.observe(&directive, &descriptor.tags);

            match directive::select(&current, lookup, &directive, &descriptor.tags)? {
                Binding::Instance(instance) => return Ok(Arc::clone(instance)),
                Binding::Provider(provider) => {
                    let key = SingletonKey::new(&current, qualifier, args.fingerprint());
                    return self.provide(provider, key, policy.is_singleton());
                }
                Binding::Redirect(next) => {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "dependency_weaver",
                        from = current.as_str(),
                        to = next,
                        "Following implementation redirect"
                    );

                    current = next.to_string();
                    lookup = None;
                }
                Binding::Construct => {
                    let key = SingletonKey::new(&current, qualifier, args.fingerprint());
                    return self.construct(&descriptor, &directive, args, key, policy.is_singleton());
                }
            }
        }
    }

    fn provide(&self, provider: &ProviderRef, key: SingletonKey, singleton: bool) -> Result<ObjectRef> {
        // A provider that needs its own product re-enters here
        let _guard = ConstructionGuard::enter(&key.type_name, key.qualifier.as_deref())?;
        let target = key.type_name.as_str();
        let produce = || -> Result<ObjectRef> {
            #[cfg(feature = "logging")]
            debug!(
                target: "dependency_weaver",
                target_type = target,
                provider = provider.type_name.as_str(),
                "Resolving through provider"
            );

            let instance = self.resolve_with(&provider.type_name, None, &provider.params)?;
            let descriptor = self.inner.types.describe(instance.class())?;
            invoke_provider(
                &provider.type_name,
                target,
                descriptor.capabilities.provider.as_ref(),
                &instance,
            )
        };

        if singleton {
            self.inner
                .registry
                .get_or_create(&key, || produce().map(Creation::Store))
        } else {
            produce()
        }
    }

    fn construct(
        &self,
        descriptor: &TypeDescriptor,
        directive: &BindingDirective,
        args: &Args,
        key: SingletonKey,
        singleton: bool,
    ) -> Result<ObjectRef> {
        descriptor.ensure_instantiable()?;
        let _guard = ConstructionGuard::enter(&descriptor.name, None)?;

        if !singleton {
            return self.build(descriptor, directive, args).map(Built::into_object);
        }
        self.inner.registry.get_or_create(&key, || {
            self.build(descriptor, directive, args)
                .map(Built::into_creation)
        })
    }

    fn build(
        &self,
        descriptor: &TypeDescriptor,
        directive: &BindingDirective,
        args: &Args,
    ) -> Result<Built> {
        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_weaver",
            type_name = descriptor.name.as_str(),
            mode = ?descriptor.construction,
            "Constructing instance"
        );

        // Property configuration errors surface before any host code runs
        let injections: Vec<(&Property, &str)> = descriptor
            .injectable_properties()
            .map(|p| p.injection_type(&descriptor.name).map(|ty| (p, ty)))
            .collect::<std::result::Result<Vec<_>, ResolutionError>>()?;

        let constructor = descriptor.constructor.as_ref();
        let method_name = descriptor.construction_method_name();
        let arguments = match constructor {
            Some(m) => self.resolve_arguments(&descriptor.name, m, args, Some(&directive.params))?,
            None => Arguments::new(),
        };
        let aspects = constructor.map(|m| m.tags.aspects.as_slice()).unwrap_or(&[]);
        let woven = Woven::new(&descriptor.name, method_name, aspects);

        let body = constructor.and_then(|m| m.body.as_ref());
        let weaved = aspect::weave(&woven, self, arguments, |arguments| {
            let object = instantiate(
                &descriptor.name,
                descriptor.construction,
                method_name,
                body,
                &arguments,
            )?;
            for (property, ty) in &injections {
                let dependency = self.resolve_with(ty, property.qualifier.as_deref(), &Args::new())?;
                object.set(property.name.clone(), dependency);
            }
            Ok(Value::Object(object))
        })?;

        Ok(match weaved {
            Weaved::Completed(v) => Built::Constructed(product(&descriptor.name, method_name, v)?),
            Weaved::Intercepted(v) => Built::Intercepted(product(&descriptor.name, method_name, v)?),
        })
    }

    /// Resolve method arguments in declared order.
    pub(crate) fn resolve_arguments(
        &self,
        owner: &str,
        method: &Method,
        args: &Args,
        defaults: Option<&BTreeMap<String, Argument>>,
    ) -> Result<Arguments> {
        let mut arguments = Arguments::new();
        for param in &method.params {
            let value = if let Some(argument) = args.get(&param.name) {
                self.argument(argument)?
            } else if let Some(argument) = defaults.and_then(|d| d.get(&param.name)) {
                self.argument(argument)?
            } else if let Some(ty) = injectable_type(method, param) {
                Value::Object(self.resolve_with(ty, param.qualifier.as_deref(), &Args::new())?)
            } else if param.optional {
                param.default.clone().unwrap_or_default()
            } else {
                return Err(ResolutionError::ParameterNotInjectable {
                    type_name: owner.to_string(),
                    method: method.name.clone(),
                    parameter: param.name.clone(),
                }
                .into());
            };
            arguments.insert(param.name.clone(), value);
        }
        Ok(arguments)
    }

    fn argument(&self, argument: &Argument) -> Result<Value> {
        match argument {
            Argument::Value(v) => Ok(v.clone()),
            Argument::Bind {
                type_name,
                qualifier,
            } => self
                .resolve_with(type_name, qualifier.as_deref(), &Args::new())
                .map(Value::Object),
        }
    }

    /// Invoke a public instance method with injected arguments and aspects.
    #[inline]
    pub fn call_method(&self, object: &ObjectRef, method: &str, args: &Args) -> Result<Value> {
        self.call_method_in(None, object, method, args)
    }

    /// Like [`call_method`](Self::call_method), checking `@allowedContext`
    /// against `context` when one is given.
    pub fn call_method_in(
        &self,
        context: Option<&str>,
        object: &ObjectRef,
        method: &str,
        args: &Args,
    ) -> Result<Value> {
        let descriptor = self.inner.types.describe(object.class())?;
        let target = descriptor.method(method);
        check_callable(
            &descriptor.name,
            descriptor.construction_method_name(),
            method,
            target.map(MethodAccess::of),
            context,
        )?;
        let target = target.ok_or_else(|| ResolutionError::MethodNotFound {
            type_name: descriptor.name.clone(),
            method: method.to_string(),
        })?;

        #[cfg(feature = "logging")]
        trace!(
            target: "dependency_weaver",
            type_name = descriptor.name.as_str(),
            method,
            "Calling method"
        );

        let arguments = self.resolve_arguments(&descriptor.name, target, args, None)?;
        let body = target.body.as_ref().ok_or_else(|| {
            DiError::invocation(&descriptor.name, &target.name, "method has no body")
        })?;
        let woven = Woven::new(&descriptor.name, &target.name, &target.tags.aspects);
        aspect::weave(&woven, self, arguments, |arguments| body(Some(object), &arguments))
            .map(Weaved::into_value)
    }
}

impl AspectInstances for Resolver {
    fn aspect_instance(&self, aspect_type: &str) -> Result<(ObjectRef, Capabilities)> {
        let instance = self.resolve(aspect_type)?;
        let descriptor = self.inner.types.describe(instance.class())?;
        Ok((instance, descriptor.capabilities.clone()))
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("singletons", &self.inner.registry.len())
            .finish()
    }
}

/// The dependency type of a parameter, when the engine may inject it.
pub(crate) fn injectable_type<'a>(method: &Method, param: &'a Parameter) -> Option<&'a str> {
    if method.tags.injectable {
        param.declared_type.as_deref()
    } else {
        None
    }
}

/// Allocate and initialize an instance from resolved constructor arguments.
///
/// A direct constructor without a body assigns each argument to the field of
/// the same name. A static accessor must have a body returning the instance.
pub(crate) fn instantiate(
    type_name: &str,
    mode: ConstructionMode,
    method_name: &str,
    body: Option<&MethodBody>,
    arguments: &Arguments,
) -> Result<ObjectRef> {
    match mode {
        ConstructionMode::DirectConstructor => {
            let object = Object::new(type_name);
            match body {
                Some(body) => {
                    body(Some(&object), arguments)?;
                }
                None => {
                    for (name, value) in arguments.iter() {
                        object.set(name.clone(), value.clone());
                    }
                }
            }
            Ok(object)
        }
        ConstructionMode::StaticAccessor => {
            let body = body.ok_or_else(|| {
                DiError::invocation(type_name, method_name, "static accessor has no body")
            })?;
            product(type_name, method_name, body(None, arguments)?)
        }
    }
}

/// Require a construction result to be an object.
pub(crate) fn product(type_name: &str, method_name: &str, value: Value) -> Result<ObjectRef> {
    value.into_object().ok_or_else(|| {
        ResolutionError::InvalidProduct {
            source_type: format!("{type_name}::{method_name}"),
            target: type_name.to_string(),
        }
        .into()
    })
}

/// Call a provider's `get` capability and check its product.
pub(crate) fn invoke_provider(
    provider_type: &str,
    target: &str,
    get: Option<&ProviderFn>,
    instance: &ObjectRef,
) -> Result<ObjectRef> {
    let get = get.ok_or_else(|| ResolutionError::InvalidProvider {
        provider: provider_type.to_string(),
        target: target.to_string(),
    })?;
    get(instance)?.into_object().ok_or_else(|| {
        ResolutionError::InvalidProduct {
            source_type: provider_type.to_string(),
            target: target.to_string(),
        }
        .into()
    })
}

/// The parts of a method declaration that decide whether it may be called.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MethodAccess<'a> {
    pub is_static: bool,
    pub visibility: Visibility,
    pub allowed_context: Option<&'a str>,
}

impl<'a> MethodAccess<'a> {
    pub(crate) fn of(method: &'a Method) -> Self {
        Self {
            is_static: method.is_static,
            visibility: method.visibility,
            allowed_context: method.tags.allowed_context.as_deref(),
        }
    }
}

/// Reject methods that may not be invoked through the engine.
///
/// `access` is `None` when the type declares no such method.
pub(crate) fn check_callable(
    type_name: &str,
    constructor_name: &str,
    method: &str,
    access: Option<MethodAccess<'_>>,
    context: Option<&str>,
) -> std::result::Result<(), ResolutionError> {
    let not_callable = |reason| ResolutionError::MethodNotCallable {
        type_name: type_name.to_string(),
        method: method.to_string(),
        reason,
    };

    if method.starts_with("__") {
        return Err(not_callable("reserved method name"));
    }
    if method == CONSTRUCTOR || method == constructor_name {
        return Err(not_callable("constructors are invoked through resolution"));
    }
    let access = access.ok_or_else(|| ResolutionError::MethodNotFound {
        type_name: type_name.to_string(),
        method: method.to_string(),
    })?;
    if access.is_static {
        return Err(not_callable("static method"));
    }
    if access.visibility != Visibility::Public {
        return Err(not_callable("method is not public"));
    }
    if let (Some(expected), Some(actual)) = (access.allowed_context, context) {
        if !expected.eq_ignore_ascii_case(actual) {
            return Err(ResolutionError::DisallowedContext {
                type_name: type_name.to_string(),
                method: method.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TypeRegistry;
    use crate::directive::StaticMetadata;
    use crate::testing::{self, Counters};
    use std::sync::Barrier;

    fn resolver() -> (Resolver, Counters) {
        let fixture = testing::world();
        (
            Resolver::new(fixture.types, fixture.metadata),
            fixture.counters,
        )
    }

    #[test]
    fn test_non_singletons_are_distinct() {
        let (resolver, _) = resolver();
        let a = resolver.resolve("Engine").unwrap();
        let b = resolver.resolve("Engine").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        let args = Args::new().with("color", "red");
        let a = resolver.resolve_with("Paint", None, &args).unwrap();
        let b = resolver.resolve_with("Paint", None, &args).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_cars_share_fuel() {
        let (resolver, counters) = resolver();
        let first = resolver.resolve("Car").unwrap();
        let second = resolver.resolve("Car").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        let fuel = |car: &ObjectRef| car.get_object("engine").unwrap().get_object("fuel").unwrap();
        assert!(Arc::ptr_eq(&fuel(&first), &fuel(&second)));
        assert_eq!(counters.get("Fuel"), 1);
        assert_eq!(counters.get("Engine"), 2);
        assert_eq!(counters.get("Car"), 2);
    }

    #[test]
    fn test_singleton_identity_by_fingerprint() {
        let (resolver, counters) = resolver();
        let a = resolver
            .resolve_with("Pool", None, &Args::new().with("size", 4).with("name", "db"))
            .unwrap();
        let b = resolver
            .resolve_with("Pool", None, &Args::new().with("name", "db").with("size", 4))
            .unwrap();
        let c = resolver
            .resolve_with("Pool", None, &Args::new().with("name", "db").with("size", 8))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(counters.get("Pool"), 2);
    }

    #[test]
    fn test_resolver_registers_itself() {
        let (resolver, _) = resolver();
        let a = resolver.resolve(RESOLVER_TYPE).unwrap();
        let b = resolver.resolve(RESOLVER_TYPE).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(resolver.registry().contains(&SingletonKey::plain(RESOLVER_TYPE)));

        let recovered = Resolver::from_object(&a).unwrap();
        assert!(Arc::ptr_eq(&recovered.handle(), &a));
    }

    #[test]
    fn test_resolver_is_injectable() {
        let (resolver, _) = resolver();
        let locator = resolver.resolve("ServiceLocator").unwrap();
        let injected = locator.get_object("resolver").unwrap();
        assert!(Arc::ptr_eq(&injected, &resolver.handle()));
    }

    #[test]
    fn test_logger_qualifiers() {
        let (resolver, _) = resolver();
        let audit_a = resolver.resolve_named("Logger", "audit").unwrap();
        let audit_b = resolver.resolve_named("Logger", "audit").unwrap();
        let plain = resolver.resolve("Logger").unwrap();

        assert_eq!(audit_a.class(), "AuditLogger");
        assert!(Arc::ptr_eq(&audit_a, &audit_b));
        assert_eq!(plain.class(), "Logger");
        assert!(!Arc::ptr_eq(&plain, &audit_a));
        assert!(Arc::ptr_eq(&plain, &resolver.resolve("Logger").unwrap()));
    }

    #[test]
    fn test_qualifier_map_wins_over_named_implementation_tag() {
        let (resolver, _) = resolver();
        // Logger's directive maps "audit" while the type tag maps it to LegacyAuditLogger
        assert_eq!(resolver.resolve_named("Logger", "audit").unwrap().class(), "AuditLogger");
        // Without a directive entry the tag applies
        assert_eq!(resolver.resolve_named("Logger", "legacy").unwrap().class(), "LegacyAuditLogger");
    }

    #[test]
    fn test_missing_qualifier() {
        let (resolver, _) = resolver();
        let err = resolver.resolve_named("Logger", "nope").unwrap_err();
        assert!(matches!(
            err,
            DiError::Resolution(ResolutionError::MissingQualifier { ref qualifier, .. }) if qualifier == "nope"
        ));
    }

    #[test]
    fn test_qualified_parameter_injection() {
        let (resolver, _) = resolver();
        let service = resolver.resolve("Billing").unwrap();
        assert_eq!(service.get_object("audit").unwrap().class(), "AuditLogger");
        assert_eq!(service.get_object("logger").unwrap().class(), "Logger");
    }

    #[test]
    fn test_provider_precedence_and_injection() {
        let (resolver, counters) = resolver();
        let conn = resolver.resolve("Connection").unwrap();

        assert_eq!(conn.class(), "Connection");
        assert_eq!(conn.get("dsn"), Some(Value::from("sqlite::memory:")));
        // The provider's own dependency was injected
        assert_eq!(conn.get_object("clock").unwrap().class(), "Clock");
        assert_eq!(counters.get("Connection"), 0);
        assert_eq!(counters.get("ConnectionProvider"), 1);
    }

    #[test]
    fn test_named_provider() {
        let (resolver, _) = resolver();
        let replica = resolver.resolve_named("Connection", "replica").unwrap();
        assert_eq!(replica.get("dsn"), Some(Value::from("replica")));
    }

    #[test]
    fn test_provider_without_capability() {
        let (resolver, _) = resolver();
        let err = resolver.resolve("Broken").unwrap_err();
        assert!(matches!(
            err,
            DiError::Resolution(ResolutionError::InvalidProvider { .. })
        ));
    }

    #[test]
    fn test_bound_instance_is_returned_as_is() {
        let fixture = testing::world();
        let config = Object::new("Config");
        fixture.metadata.bind(
            "Config",
            BindingDirective::new().with_instance(Arc::clone(&config)),
        );
        let resolver = Resolver::new(fixture.types, fixture.metadata);
        assert!(Arc::ptr_eq(&resolver.resolve("Config").unwrap(), &config));
    }

    #[test]
    fn test_concrete_override_beats_implemented_by_tag() {
        let fixture = testing::world();
        let resolver = Resolver::new(Arc::clone(&fixture.types), Arc::clone(&fixture.metadata));
        assert_eq!(resolver.resolve("Storage").unwrap().class(), "DiskStorage");

        fixture.metadata.bind(
            "Storage",
            BindingDirective::new().with_concrete_type("MemoryStorage"),
        );
        assert_eq!(resolver.resolve("Storage").unwrap().class(), "MemoryStorage");
    }

    #[test]
    fn test_interface_without_binding() {
        let (resolver, _) = resolver();
        let err = resolver.resolve("Cache").unwrap_err();
        assert!(matches!(
            err,
            DiError::Resolution(ResolutionError::NotInstantiable { .. })
        ));
    }

    #[test]
    fn test_redirect_cycle() {
        let (resolver, _) = resolver();
        let err = resolver.resolve("Ping").unwrap_err();
        assert!(matches!(
            err,
            DiError::Resolution(ResolutionError::RedirectCycle { .. })
        ));
    }

    #[test]
    fn test_parameter_not_injectable() {
        let (resolver, _) = resolver();
        let err = resolver.resolve("Paint").unwrap_err();
        assert!(matches!(
            err,
            DiError::Resolution(ResolutionError::ParameterNotInjectable { ref parameter, .. }) if parameter == "color"
        ));
    }

    #[test]
    fn test_optional_and_directive_defaults() {
        let (resolver, _) = resolver();
        let mailer = resolver.resolve("Mailer").unwrap();
        assert_eq!(mailer.get("retries"), Some(Value::Int(3)));
        assert_eq!(mailer.get("host"), Some(Value::from("smtp.local")));
        assert_eq!(mailer.get_object("transport").unwrap().class(), "SmtpTransport");

        let mailer = resolver
            .resolve_with("Mailer", None, &Args::new().with("host", "mx.example"))
            .unwrap();
        assert_eq!(mailer.get("host"), Some(Value::from("mx.example")));
    }

    #[test]
    fn test_property_injection() {
        let (resolver, _) = resolver();
        let car = resolver.resolve("Car").unwrap();
        assert_eq!(car.get_object("radio").unwrap().class(), "Radio");
    }

    #[test]
    fn test_private_property_rejected_before_construction() {
        let (resolver, counters) = resolver();
        let err = resolver.resolve("Vault").unwrap_err();
        assert!(matches!(
            err,
            DiError::Resolution(ResolutionError::NonPublicProperty { .. })
        ));
        assert_eq!(counters.get("Vault"), 0);
    }

    #[test]
    fn test_static_accessor_construction() {
        let (resolver, counters) = resolver();
        let clock = resolver.resolve("SystemClock").unwrap();
        assert_eq!(clock.class(), "SystemClock");
        assert_eq!(clock.get("zone"), Some(Value::from("UTC")));
        assert_eq!(counters.get("SystemClock"), 1);
    }

    #[test]
    fn test_constructor_aspects_order_and_effect() {
        let (resolver, _) = resolver();
        let report = resolver.resolve("Report").unwrap();
        // before-aspects ran A then B; after-aspect stamped the instance
        assert_eq!(report.get("trail"), Some(Value::from("AB")));
        assert_eq!(report.get("stamped"), Some(Value::Bool(true)));
    }

    #[test]
    fn test_intercepted_construction_is_not_cached() {
        let (resolver, counters) = resolver();
        let a = resolver.resolve("Snapshot").unwrap();
        let b = resolver.resolve("Snapshot").unwrap();

        assert_eq!(a.class(), "Snapshot");
        assert_eq!(a.get("cached"), Some(Value::Bool(true)));
        assert_eq!(counters.get("Snapshot"), 0);
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(resolver.registry().get(&SingletonKey::plain("Snapshot")).is_none());
    }

    #[test]
    fn test_call_method_weaves_aspects_and_injects() {
        let (resolver, counters) = resolver();
        let repo = resolver.resolve("Repository").unwrap();

        let found = resolver
            .call_method(&repo, "find", &Args::new().with("id", 7))
            .unwrap();
        assert_eq!(found, Value::from("row-7"));

        let hit = resolver
            .call_method(&repo, "find", &Args::new().with("id", 42))
            .unwrap();
        assert_eq!(hit, Value::from("cached-42"));
        assert_eq!(counters.get("Repository::find"), 1);
    }

    #[test]
    fn test_call_method_rejections() {
        let (resolver, _) = resolver();
        let repo = resolver.resolve("Repository").unwrap();

        let cases = [
            ("__destruct", "reserved"),
            ("constructor", "constructor"),
            ("create", "static"),
            ("purge", "public"),
        ];
        for (method, reason_part) in cases {
            match resolver.call_method(&repo, method, &Args::new()) {
                Err(DiError::Resolution(ResolutionError::MethodNotCallable { reason, .. })) => {
                    assert!(reason.contains(reason_part), "{method}: {reason}")
                }
                other => panic!("{method}: unexpected {other:?}"),
            }
        }
        assert!(matches!(
            resolver.call_method(&repo, "missing", &Args::new()),
            Err(DiError::Resolution(ResolutionError::MethodNotFound { .. }))
        ));
    }

    #[test]
    fn test_allowed_context() {
        let (resolver, _) = resolver();
        let repo = resolver.resolve("Repository").unwrap();

        assert!(resolver.call_method_in(Some("CLI"), &repo, "migrate", &Args::new()).is_ok());
        assert!(resolver.call_method(&repo, "migrate", &Args::new()).is_ok());
        assert!(matches!(
            resolver.call_method_in(Some("web"), &repo, "migrate", &Args::new()),
            Err(DiError::Resolution(ResolutionError::DisallowedContext { .. }))
        ));
    }

    #[test]
    fn test_circular_dependency_is_reported() {
        let (resolver, _) = resolver();
        let err = resolver.resolve("Chicken").unwrap_err();
        match err {
            DiError::CircularDependency { chain } => {
                assert_eq!(chain.first().map(String::as_str), Some("Chicken"));
                assert_eq!(chain.last().map(String::as_str), Some("Chicken"));
            }
            other => panic!("unexpected {other:?}"),
        }
        // The guard unwound; unrelated resolution still works
        assert!(resolver.resolve("Engine").is_ok());
    }

    #[test]
    fn test_provider_cycle_fails_at_run_time() {
        let (resolver, _) = resolver();
        match resolver.resolve("X") {
            Err(DiError::CircularDependency { chain }) => {
                assert_eq!(chain, vec!["X", "ProviderX", "X"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let types = TypeRegistry::new();
        types.register(TypeDescriptor::class("Selfish").provider(|this| Ok(Value::Object(Arc::clone(this)))));
        let metadata = StaticMetadata::new();
        metadata.bind(
            "Selfish",
            BindingDirective::new().with_provider(ProviderRef::new("Selfish")),
        );
        let resolver = Resolver::new(types, metadata);
        assert!(matches!(
            resolver.resolve("Selfish"),
            Err(DiError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_qualified_request_may_depend_on_plain_type() {
        let (resolver, _) = resolver();

        let cached = resolver.resolve_named("Catalog", "cached").unwrap();
        assert_eq!(cached.class(), "Catalog");
        assert_eq!(cached.get("cached"), Some(Value::Bool(true)));
        let inner = cached.get_object("inner").unwrap();
        assert_eq!(inner.class(), "Catalog");
        assert!(!Arc::ptr_eq(&inner, &cached));
        assert!(inner.get("cached").is_none());

        let mirror = resolver.resolve_named("Store", "mirrored").unwrap();
        assert_eq!(mirror.class(), "MirrorStore");
        assert_eq!(mirror.get_object("primary").unwrap().class(), "DiskStore");
    }

    #[test]
    fn test_qualified_provider_cycle() {
        let (resolver, _) = resolver();
        match resolver.resolve_named("Catalog", "looped") {
            Err(DiError::CircularDependency { chain }) => {
                assert_eq!(chain, vec!["Catalog#looped", "LoopingCatalog", "Catalog#looped"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(resolver.resolve_named("Catalog", "cached").is_ok());
    }

    #[test]
    fn test_unknown_type() {
        let resolver = Resolver::new(TypeRegistry::new(), StaticMetadata::new());
        assert!(matches!(
            resolver.resolve("Nope"),
            Err(DiError::TypeNotFound { .. })
        ));
    }

    #[test]
    fn test_concurrent_singleton_resolution() {
        let (resolver, counters) = resolver();
        let barrier = Barrier::new(8);

        let fuels: Vec<ObjectRef> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        resolver.resolve("Fuel").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(counters.get("Fuel"), 1);
        assert!(fuels.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
