//! Compiled container
//!
//! [`CompiledContainer`] executes a [`CompiledUnits`] set. It makes no
//! binding decisions of its own: every request is looked up in the entry
//! table and built from the unit's plans, with the same singleton keys, the
//! same aspect weaving and the same construction order as the
//! [`Resolver`](crate::Resolver). The public helpers at the bottom of the impl
//! are what emitted factory modules call into.

use crate::aspect::{self, AspectInstances, Weaved, Woven};
use crate::descriptor::Capabilities;
use crate::registry::{Creation, SingletonKey, SingletonRegistry};
use crate::resolver::{
    check_callable, instantiate, invoke_provider, product, ConstructionGuard, MethodAccess,
    RESOLVER_TYPE,
};
use crate::unit::{
    ClassBindings, CompiledUnits, FactoryUnit, InjectionProxy, ParamPlan, ParamSource, Target,
};
use crate::value::{Args, Argument, Arguments, Object, ObjectRef, Value};
use crate::{CompilationError, DiError, ResolutionError, Result};
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Native payload of the container's self-registered object
#[derive(Debug, Clone)]
pub struct CompiledHandle(Weak<CompiledInner>);

impl CompiledHandle {
    pub fn upgrade(&self) -> Option<CompiledContainer> {
        self.0.upgrade().map(|inner| CompiledContainer { inner })
    }
}

struct CompiledInner {
    units: CompiledUnits,
    singletons: SingletonRegistry,
    handle: ObjectRef,
}

impl fmt::Debug for CompiledInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledInner")
            .field("units", &self.units.len())
            .field("singletons", &self.singletons)
            .finish()
    }
}

/// Runs compiled factory units
///
/// Cloning is cheap and yields a handle to the same container state.
#[derive(Clone)]
pub struct CompiledContainer {
    inner: Arc<CompiledInner>,
}

impl CompiledContainer {
    /// Load a unit set, checking that every unit it references is present.
    pub fn load(units: CompiledUnits) -> Result<Self> {
        check_complete(&units)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_weaver",
            units = units.len(),
            entries = units.entries.len(),
            "Loading compiled units"
        );

        let inner = Arc::new_cyclic(|weak| {
            let handle = Object::with_native(RESOLVER_TYPE, CompiledHandle(weak.clone()));
            let singletons = SingletonRegistry::with_capacity(units.len());
            singletons.insert(SingletonKey::plain(RESOLVER_TYPE), Arc::clone(&handle));
            CompiledInner {
                units,
                singletons,
                handle,
            }
        });
        Ok(Self { inner })
    }

    /// Recover the container behind its self-registered object.
    pub fn from_object(object: &ObjectRef) -> Option<CompiledContainer> {
        object.native::<CompiledHandle>()?.upgrade()
    }

    #[inline]
    pub fn units(&self) -> &CompiledUnits {
        &self.inner.units
    }

    #[inline]
    pub fn registry(&self) -> &SingletonRegistry {
        &self.inner.singletons
    }

    #[inline]
    pub fn get_instance(&self, type_name: &str) -> Result<ObjectRef> {
        self.get_instance_with(type_name, None, &Args::new())
    }

    #[inline]
    pub fn get_named(&self, type_name: &str, qualifier: &str) -> Result<ObjectRef> {
        self.get_instance_with(type_name, Some(qualifier), &Args::new())
    }

    /// Resolve a compiled request with explicit arguments.
    pub fn get_instance_with(
        &self,
        type_name: &str,
        qualifier: Option<&str>,
        args: &Args,
    ) -> Result<ObjectRef> {
        if type_name == RESOLVER_TYPE {
            return Ok(self.handle());
        }
        let target = self
            .inner
            .units
            .entry(type_name, qualifier)
            .ok_or_else(|| DiError::NotCompiled {
                type_name: type_name.to_string(),
            })?;

        #[cfg(feature = "logging")]
        trace!(
            target: "dependency_weaver",
            type_name,
            qualifier = ?qualifier,
            plan = %target,
            "Resolving compiled request"
        );

        self.realize(target, args)
    }

    fn realize(&self, target: &Target, args: &Args) -> Result<ObjectRef> {
        match target {
            Target::Engine => Ok(self.handle()),
            Target::Instance { instance, .. } => Ok(Arc::clone(instance)),
            Target::Provided {
                for_type,
                qualifier,
                singleton,
                provider,
                params,
            } => self.provide(for_type, qualifier.as_deref(), *singleton, args, || {
                self.realize(provider, params)
            }),
            Target::Unit {
                type_name,
                qualifier,
                singleton,
            } => self.unit_instance(type_name, qualifier.as_deref(), *singleton, args),
        }
    }

    fn unit(&self, type_name: &str) -> Result<&FactoryUnit> {
        self.inner
            .units
            .unit(type_name)
            .ok_or_else(|| DiError::NotCompiled {
                type_name: type_name.to_string(),
            })
    }

    fn class(&self, class: &str) -> Result<&ClassBindings> {
        self.inner
            .units
            .bindings
            .get(class)
            .ok_or_else(|| DiError::NotCompiled {
                type_name: class.to_string(),
            })
    }

    fn arguments(
        &self,
        owner: &str,
        method: &str,
        params: &[ParamPlan],
        args: &Args,
    ) -> Result<Arguments> {
        let mut arguments = Arguments::new();
        for plan in params {
            let value = match self.explicit(args, &plan.name)? {
                Some(value) => value,
                None => match &plan.source {
                    ParamSource::Literal(v) | ParamSource::Default(v) => v.clone(),
                    ParamSource::Request(target) | ParamSource::Dependency(target) => {
                        Value::Object(self.realize(target, &Args::new())?)
                    }
                    ParamSource::Required => {
                        return Err(missing_argument(owner, method, &plan.name));
                    }
                },
            };
            arguments.insert(plan.name.clone(), value);
        }
        Ok(arguments)
    }

    /// Assign a unit's injectable properties.
    fn inject(&self, proxy: &InjectionProxy, object: &ObjectRef) -> Result<()> {
        for property in &proxy.properties {
            let dependency = self.realize(&property.target, &Args::new())?;
            object.set(property.name.clone(), dependency);
        }
        Ok(())
    }

    /// Invoke a public instance method with planned arguments and aspects.
    #[inline]
    pub fn call_method(&self, object: &ObjectRef, method: &str, args: &Args) -> Result<Value> {
        self.call_method_in(None, object, method, args)
    }

    pub fn call_method_in(
        &self,
        context: Option<&str>,
        object: &ObjectRef,
        method: &str,
        args: &Args,
    ) -> Result<Value> {
        let unit = self.unit(object.class())?;
        let plan = unit.method(method);
        check_callable(
            &unit.type_name,
            &unit.constructor,
            method,
            plan.map(|p| MethodAccess {
                is_static: p.is_static,
                visibility: p.visibility,
                allowed_context: p.allowed_context.as_deref(),
            }),
            context,
        )?;
        let plan = plan.ok_or_else(|| ResolutionError::MethodNotFound {
            type_name: unit.type_name.clone(),
            method: method.to_string(),
        })?;

        let arguments = self.arguments(&unit.type_name, &plan.name, &plan.params, args)?;
        let body = self
            .class(&unit.type_name)?
            .methods
            .get(&plan.name)
            .ok_or_else(|| DiError::invocation(&unit.type_name, &plan.name, "method has no body"))?;
        let woven = Woven::new(&unit.type_name, &plan.name, &plan.aspects);
        aspect::weave(&woven, self, arguments, |arguments| body(Some(object), &arguments))
            .map(Weaved::into_value)
    }

    // ===== Helpers for emitted factory modules =====

    /// The object this container is registered as.
    #[inline]
    pub fn handle(&self) -> ObjectRef {
        Arc::clone(&self.inner.handle)
    }

    /// The instance a directive binds to `type_name`.
    pub fn bound_instance(&self, type_name: &str) -> Result<ObjectRef> {
        self.inner
            .units
            .entries
            .values()
            .find_map(|target| match target {
                Target::Instance {
                    type_name: bound,
                    instance,
                } if bound == type_name => Some(Arc::clone(instance)),
                _ => None,
            })
            .ok_or_else(|| DiError::NotCompiled {
                type_name: type_name.to_string(),
            })
    }

    /// Run a unit from its in-memory plans.
    ///
    /// Emitted modules use this for units excluded from generation.
    pub fn unit_instance(
        &self,
        type_name: &str,
        qualifier: Option<&str>,
        singleton: bool,
        args: &Args,
    ) -> Result<ObjectRef> {
        let unit = self.unit(type_name)?;
        self.singleton(type_name, qualifier, singleton, args, |args| {
            let arguments = self.arguments(&unit.type_name, &unit.constructor, &unit.params, args)?;
            self.construct(&unit.type_name, arguments, |object| match &unit.proxy {
                Some(proxy) => self.inject(proxy, object),
                None => Ok(()),
            })
        })
    }

    /// The caller's explicit value for `name`, resolving binding requests.
    pub fn explicit(&self, args: &Args, name: &str) -> Result<Option<Value>> {
        match args.get(name) {
            None => Ok(None),
            Some(Argument::Value(v)) => Ok(Some(v.clone())),
            Some(Argument::Bind {
                type_name,
                qualifier,
            }) => self
                .get_instance_with(type_name, qualifier.as_deref(), &Args::new())
                .map(|o| Some(Value::Object(o))),
        }
    }

    /// Run `build` under the construction guard, caching its result when
    /// `singleton` is set.
    pub fn singleton<F>(
        &self,
        type_name: &str,
        qualifier: Option<&str>,
        singleton: bool,
        args: &Args,
        build: F,
    ) -> Result<ObjectRef>
    where
        F: FnOnce(&Args) -> Result<Creation>,
    {
        let _guard = ConstructionGuard::enter(type_name, None)?;
        if !singleton {
            return build(args).map(Creation::into_object);
        }
        let key = SingletonKey::new(type_name, qualifier, args.fingerprint());
        self.inner.singletons.get_or_create(&key, || build(args))
    }

    /// Construct an instance of a compiled unit from resolved arguments,
    /// weaving its constructor aspects. `inject` assigns properties.
    pub fn construct<F>(&self, type_name: &str, arguments: Arguments, inject: F) -> Result<Creation>
    where
        F: FnOnce(&ObjectRef) -> Result<()>,
    {
        let unit = self.unit(type_name)?;
        let class = self.class(type_name)?;
        let method = unit.constructor.as_str();

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_weaver",
            type_name,
            mode = ?unit.construction,
            "Constructing compiled instance"
        );

        let woven = Woven::new(type_name, method, &unit.aspects);
        let weaved = aspect::weave(&woven, self, arguments, |arguments| {
            let object = instantiate(
                type_name,
                unit.construction,
                method,
                class.constructor.as_ref(),
                &arguments,
            )?;
            inject(&object)?;
            Ok(Value::Object(object))
        })?;

        Ok(match weaved {
            Weaved::Completed(v) => Creation::Store(product(type_name, method, v)?),
            Weaved::Intercepted(v) => Creation::Skip(product(type_name, method, v)?),
        })
    }

    /// Obtain a provider through `provider` and call its `get` capability.
    pub fn provide<F>(
        &self,
        for_type: &str,
        qualifier: Option<&str>,
        singleton: bool,
        args: &Args,
        provider: F,
    ) -> Result<ObjectRef>
    where
        F: FnOnce() -> Result<ObjectRef>,
    {
        let _guard = ConstructionGuard::enter(for_type, qualifier)?;
        let produce = || -> Result<ObjectRef> {
            let instance = provider()?;
            let get = self.class(instance.class())?.capabilities.provider.clone();
            invoke_provider(instance.class(), for_type, get.as_ref(), &instance)
        };
        if !singleton {
            return produce();
        }
        let key = SingletonKey::new(for_type, qualifier, args.fingerprint());
        self.inner
            .singletons
            .get_or_create(&key, || produce().map(Creation::Store))
    }
}

/// Error for a required parameter no one supplied.
pub fn missing_argument(type_name: &str, method: &str, parameter: &str) -> DiError {
    ResolutionError::ParameterNotInjectable {
        type_name: type_name.to_string(),
        method: method.to_string(),
        parameter: parameter.to_string(),
    }
    .into()
}

impl AspectInstances for CompiledContainer {
    fn aspect_instance(&self, aspect_type: &str) -> Result<(ObjectRef, Capabilities)> {
        let instance = self.get_instance(aspect_type)?;
        let capabilities = self.class(instance.class())?.capabilities.clone();
        Ok((instance, capabilities))
    }
}

impl fmt::Debug for CompiledContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledContainer")
            .field("units", &self.inner.units.len())
            .field("singletons", &self.inner.singletons.len())
            .finish()
    }
}

/// Every unit referenced from the set must be in the set.
fn check_complete(units: &CompiledUnits) -> Result<()> {
    let missing = |unit: &str, missing: &str| -> DiError {
        CompilationError::MissingUnit {
            unit: unit.to_string(),
            missing: missing.to_string(),
        }
        .into()
    };

    for unit in units.units.values() {
        if !units.bindings.contains(&unit.type_name) {
            return Err(missing(&unit.type_name, &unit.type_name));
        }
        if let Some(dep) = unit.depends_on.iter().find(|d| units.unit(d).is_none()) {
            return Err(missing(&unit.type_name, dep));
        }
        if let Some(aspect) = unit
            .aspect_types()
            .into_iter()
            .find(|a| units.entry(a, None).is_none())
        {
            return Err(missing(&unit.type_name, aspect));
        }
    }
    for ((type_name, _), target) in &units.entries {
        let mut referenced = Default::default();
        target.units(&mut referenced);
        if let Some(dep) = referenced.iter().find(|d| units.unit(d).is_none()) {
            return Err(missing(type_name, dep));
        }
    }
    Ok(())
}
