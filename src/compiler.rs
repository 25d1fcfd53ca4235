//! Ahead-of-time compilation of the binding graph
//!
//! [`Compiler`] walks the graph from a set of root requests exactly as the
//! [`Resolver`](crate::Resolver) would, but instead of building instances it
//! records every decision in [`FactoryUnit`]s. Configuration defects that the
//! resolver reports at run time are reported here as
//! [`CompilationError`]s, and compilation is all-or-nothing.
//!
//! ```rust
//! use dependency_weaver::{CompileRequest, CompiledContainer, Compiler, Method, Parameter,
//!     StaticMetadata, TypeDescriptor, TypeRegistry};
//!
//! let types = TypeRegistry::new();
//! types
//!     .register(TypeDescriptor::class("Fuel").singleton())
//!     .register(
//!         TypeDescriptor::class("Engine")
//!             .with_constructor(Method::constructor().injectable().param(Parameter::typed("fuel", "Fuel"))),
//!     );
//!
//! let compiler = Compiler::new(types, StaticMetadata::new());
//! let units = compiler.compile(&[CompileRequest::new("Engine")]).unwrap();
//! assert_eq!(units.len(), 2);
//!
//! let container = CompiledContainer::load(units).unwrap();
//! let engine = container.get_instance("Engine").unwrap();
//! assert!(engine.get_object("fuel").is_some());
//! ```

use crate::aspect::AspectDescriptor;
use crate::descriptor::{
    Method, TypeDescriptor, TypeSource, Visibility, CONSTRUCTOR,
};
use crate::directive::{
    Binding, BindingDirective, MetadataProvider, ProviderRef, RedirectChain, SingletonPolicy,
    select,
};
use crate::resolver::{injectable_type, request_label, RESOLVER_TYPE};
use crate::unit::{
    module_name, CompileRequest, CompiledUnits, FactoryUnit, InjectionProxy, MethodPlan,
    ParamPlan, ParamSource, PropertyPlan, Target,
};
use crate::value::{Args, Argument};
use crate::{CompilationError, ResolutionError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, info, trace};

/// Compiler switches
#[derive(Debug, Clone, Copy)]
pub struct CompilerOptions {
    /// Plan public instance methods so the compiled container can invoke them
    pub methods: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { methods: true }
    }
}

/// Builds [`CompiledUnits`] from type descriptors and binding directives.
pub struct Compiler {
    types: Arc<dyn TypeSource>,
    metadata: Arc<dyn MetadataProvider>,
    options: CompilerOptions,
}

impl Compiler {
    pub fn new<T, M>(types: T, metadata: M) -> Self
    where
        T: TypeSource + 'static,
        M: MetadataProvider + 'static,
    {
        Self::from_shared(Arc::new(types), Arc::new(metadata))
    }

    pub fn from_shared(types: Arc<dyn TypeSource>, metadata: Arc<dyn MetadataProvider>) -> Self {
        Self {
            types,
            metadata,
            options: CompilerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Compile every request into one unit set.
    ///
    /// Fails with the first defect found; no partial set is returned.
    pub fn compile(&self, requests: &[CompileRequest]) -> Result<CompiledUnits> {
        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_weaver",
            roots = requests.len(),
            "Compiling binding graph"
        );

        let mut walk = Walk {
            types: self.types.as_ref(),
            metadata: self.metadata.as_ref(),
            options: self.options,
            out: CompiledUnits::default(),
            stack: Vec::new(),
            root: String::new(),
        };

        for request in requests {
            walk.root = request.type_name.clone();
            walk.compile_root(request)
                .map_err(|e| e.into_compilation(&request.type_name))?;
        }
        walk.out.roots = requests.to_vec();
        check_module_names(&walk.out)?;

        #[cfg(feature = "logging")]
        info!(
            target: "dependency_weaver",
            units = walk.out.units.len(),
            entries = walk.out.entries.len(),
            "Compilation finished"
        );

        Ok(walk.out)
    }
}

/// Two types whose module names collide cannot both be emitted.
fn check_module_names(units: &CompiledUnits) -> Result<()> {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for unit in units.units.values().filter(|u| !u.generator_ignore) {
        if let Some(first) = seen.insert(&unit.module, &unit.type_name) {
            return Err(CompilationError::NameCollision {
                first: first.to_string(),
                second: unit.type_name.clone(),
                module: unit.module.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// One node on the current walk path
#[derive(Debug)]
struct Frame {
    /// `Type`, or `Type#qualifier` for a qualified provider request
    label: String,
    /// Entered to obtain the type's provider
    provider: bool,
}

struct Walk<'a> {
    types: &'a dyn TypeSource,
    metadata: &'a dyn MetadataProvider,
    options: CompilerOptions,
    out: CompiledUnits,
    stack: Vec<Frame>,
    root: String,
}

impl Walk<'_> {
    fn compile_root(&mut self, request: &CompileRequest) -> Result<()> {
        self.request(
            &request.type_name,
            request.qualifier.as_deref(),
            &request.args,
            true,
        )?;
        self.bound_arguments(&request.args)
    }

    /// Compile the binding requests among explicit arguments.
    fn bound_arguments(&mut self, args: &Args) -> Result<()> {
        for (_, argument) in args.iter() {
            if let Argument::Bind {
                type_name,
                qualifier,
            } = argument
            {
                self.request(type_name, qualifier.as_deref(), &Args::new(), false)?;
            }
        }
        Ok(())
    }

    /// Units enter unqualified; provider requests enter with their qualifier,
    /// matching the run-time construction guard.
    fn enter(&mut self, type_name: &str, qualifier: Option<&str>, provider: bool) -> Result<()> {
        let label = request_label(type_name, qualifier);
        if let Some(pos) = self.stack.iter().position(|f| f.label == label) {
            let cycle = &self.stack[pos..];
            let through_provider = provider || cycle.iter().any(|f| f.provider);
            let mut chain: Vec<String> = cycle.iter().map(|f| f.label.clone()).collect();
            chain.push(label);
            let root = self.root.clone();
            return Err(if through_provider {
                CompilationError::ProviderCycle { root, chain }
            } else {
                CompilationError::DependencyCycle { root, chain }
            }
            .into());
        }
        self.stack.push(Frame { label, provider });
        Ok(())
    }

    /// Plan how `type_name` requested with `qualifier` is satisfied.
    fn request(
        &mut self,
        type_name: &str,
        qualifier: Option<&str>,
        args: &Args,
        root: bool,
    ) -> Result<Target> {
        let key = (type_name.to_string(), qualifier.map(str::to_string));
        let target = match self.out.entries.get(&key) {
            Some(target) => target.clone(),
            None => {
                let target = self.plan(type_name, qualifier)?;
                self.out.entries.insert(key, target.clone());
                target
            }
        };
        if !root {
            self.check_required(&target, args)?;
        }
        Ok(target)
    }

    fn plan(&mut self, type_name: &str, qualifier: Option<&str>) -> Result<Target> {
        if type_name == RESOLVER_TYPE {
            return Ok(Target::Engine);
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "dependency_weaver",
            type_name,
            qualifier = ?qualifier,
            "Planning request"
        );

        let mut policy = SingletonPolicy::default();
        let mut chain = RedirectChain::default();
        let mut current = type_name.to_string();
        let mut lookup = qualifier;

        loop {
            chain.visit(&current)?;
            let directive = self.metadata.directive(&current);
            let descriptor = self.types.describe(&current)?;
            policy.observe(&directive, &descriptor.tags);

            match select(&current, lookup, &directive, &descriptor.tags)? {
                Binding::Instance(instance) => {
                    if let Ok(class) = self.types.describe(instance.class()) {
                        self.out.bindings.insert(&class);
                    }
                    return Ok(Target::Instance {
                        type_name: current,
                        instance: Arc::clone(instance),
                    });
                }
                Binding::Provider(provider) => {
                    let provider = provider.clone();
                    self.enter(&current, qualifier, true)?;
                    let planned = self.provider(&current, &provider);
                    self.stack.pop();
                    return Ok(Target::Provided {
                        for_type: current,
                        qualifier: qualifier.map(str::to_string),
                        singleton: policy.is_singleton(),
                        provider: Box::new(planned?),
                        params: provider.params,
                    });
                }
                Binding::Redirect(next) => {
                    current = next.to_string();
                    lookup = None;
                }
                Binding::Construct => {
                    descriptor.ensure_instantiable()?;
                    self.unit(&descriptor, &directive)?;
                    return Ok(Target::Unit {
                        type_name: current,
                        qualifier: qualifier.map(str::to_string),
                        singleton: policy.is_singleton(),
                    });
                }
            }
        }
    }

    fn provider(&mut self, target: &str, provider: &ProviderRef) -> Result<Target> {
        let planned = self.request(&provider.type_name, None, &provider.params, false)?;
        self.bound_arguments(&provider.params)?;

        if let Some(class) = concrete_class(&planned) {
            let descriptor = self.types.describe(class)?;
            if descriptor.capabilities.provider.is_none() {
                return Err(ResolutionError::InvalidProvider {
                    provider: provider.type_name.clone(),
                    target: target.to_string(),
                }
                .into());
            }
            self.out.bindings.insert(&descriptor);
        }
        Ok(planned)
    }

    /// Compiled units must reject what the resolver would reject for a
    /// dependency: a required parameter nobody supplies.
    fn check_required(&self, target: &Target, args: &Args) -> Result<()> {
        let Target::Unit { type_name, .. } = target else {
            return Ok(());
        };
        let Some(unit) = self.out.units.get(type_name) else {
            return Ok(());
        };
        let missing = unit
            .params
            .iter()
            .find(|p| matches!(p.source, ParamSource::Required) && args.get(&p.name).is_none());
        match missing {
            Some(param) => Err(ResolutionError::ParameterNotInjectable {
                type_name: type_name.clone(),
                method: unit.constructor.clone(),
                parameter: param.name.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn unit(&mut self, descriptor: &TypeDescriptor, directive: &BindingDirective) -> Result<()> {
        if self.out.units.contains_key(&descriptor.name) {
            return Ok(());
        }

        self.enter(&descriptor.name, None, false)?;
        let planned = self.plan_unit(descriptor, directive);
        self.stack.pop();
        let unit = planned?;

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_weaver",
            type_name = unit.type_name.as_str(),
            module = unit.module.as_str(),
            params = unit.params.len(),
            "Planned factory unit"
        );

        self.out.bindings.insert(descriptor);
        self.out.units.insert(descriptor.name.clone(), unit);

        // Methods run on a built instance, so they may depend on the type
        // itself; they are planned once the unit is in place.
        let methods = if self.options.methods {
            self.plan_methods(descriptor)?
        } else {
            Vec::new()
        };
        if let Some(unit) = self.out.units.get_mut(&descriptor.name) {
            unit.methods = methods;
            unit.collect_dependencies();
        }
        Ok(())
    }

    fn plan_unit(
        &mut self,
        descriptor: &TypeDescriptor,
        directive: &BindingDirective,
    ) -> Result<FactoryUnit> {
        let injections = descriptor
            .injectable_properties()
            .map(|p| p.injection_type(&descriptor.name).map(|ty| (p, ty.to_string())))
            .collect::<std::result::Result<Vec<_>, ResolutionError>>()?;

        let constructor_name = descriptor.construction_method_name().to_string();
        let (params, aspects) = match &descriptor.constructor {
            Some(method) => (
                self.plan_params(method, Some(&directive.params))?,
                method.tags.aspects.clone(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        for aspect in &aspects {
            self.aspect(&descriptor.name, &constructor_name, aspect)?;
        }

        let proxy = if injections.is_empty() {
            None
        } else {
            let mut properties = Vec::with_capacity(injections.len());
            for (property, ty) in injections {
                let target = self.request(&ty, property.qualifier.as_deref(), &Args::new(), false)?;
                properties.push(PropertyPlan {
                    name: property.name.clone(),
                    visibility: property.visibility,
                    target,
                });
            }
            Some(InjectionProxy {
                name: InjectionProxy::name_for(&descriptor.name),
                target_type: descriptor.name.clone(),
                properties,
            })
        };

        Ok(FactoryUnit {
            type_name: descriptor.name.clone(),
            module: module_name(&descriptor.name),
            construction: descriptor.construction,
            constructor: constructor_name,
            params,
            aspects,
            proxy,
            methods: Vec::new(),
            depends_on: Default::default(),
            generator_ignore: descriptor.tags.generator_ignore,
        })
    }

    fn plan_methods(&mut self, descriptor: &TypeDescriptor) -> Result<Vec<MethodPlan>> {
        let mut plans = Vec::with_capacity(descriptor.methods.len());
        for method in &descriptor.methods {
            let callable = !method.is_static
                && method.visibility == Visibility::Public
                && !method.name.starts_with("__")
                && method.name != CONSTRUCTOR
                && method.name != descriptor.construction_method_name();
            let params = if callable {
                for aspect in &method.tags.aspects {
                    self.aspect(&descriptor.name, &method.name, aspect)?;
                }
                self.plan_params(method, None)?
            } else {
                Vec::new()
            };
            plans.push(MethodPlan {
                name: method.name.clone(),
                is_static: method.is_static,
                visibility: method.visibility,
                allowed_context: method.tags.allowed_context.clone(),
                params,
                aspects: method.tags.aspects.clone(),
            });
        }
        Ok(plans)
    }

    fn plan_params(
        &mut self,
        method: &Method,
        defaults: Option<&BTreeMap<String, Argument>>,
    ) -> Result<Vec<ParamPlan>> {
        let mut plans = Vec::with_capacity(method.params.len());
        for param in &method.params {
            let source = if let Some(argument) = defaults.and_then(|d| d.get(&param.name)) {
                match argument {
                    Argument::Value(v) => ParamSource::Literal(v.clone()),
                    Argument::Bind {
                        type_name,
                        qualifier,
                    } => ParamSource::Request(self.request(
                        type_name,
                        qualifier.as_deref(),
                        &Args::new(),
                        false,
                    )?),
                }
            } else if let Some(ty) = injectable_type(method, param) {
                ParamSource::Dependency(self.request(
                    ty,
                    param.qualifier.as_deref(),
                    &Args::new(),
                    false,
                )?)
            } else if param.optional {
                ParamSource::Default(param.default.clone().unwrap_or_default())
            } else {
                ParamSource::Required
            };
            plans.push(ParamPlan {
                name: param.name.clone(),
                source,
            });
        }
        Ok(plans)
    }

    /// Compile an aspect's type and check it implements its phase.
    fn aspect(&mut self, owner: &str, method: &str, aspect: &AspectDescriptor) -> Result<()> {
        let planned = self.request(&aspect.aspect_type, None, &Args::new(), false)?;
        let Some(class) = concrete_class(&planned) else {
            return Ok(());
        };
        let descriptor = self.types.describe(class)?;
        if !descriptor.capabilities.implements(aspect.phase) {
            return Err(ResolutionError::InvalidAspect {
                aspect: aspect.aspect_type.clone(),
                owner: owner.to_string(),
                method: method.to_string(),
                phase: aspect.phase.as_str(),
            }
            .into());
        }
        self.out.bindings.insert(&descriptor);
        Ok(())
    }
}

/// Class of the instance a target yields, when known at compile time.
fn concrete_class(target: &Target) -> Option<&str> {
    match target {
        Target::Unit { type_name, .. } => Some(type_name),
        Target::Instance { instance, .. } => Some(instance.class()),
        Target::Engine | Target::Provided { .. } => None,
    }
}
