//! Compiled construction plans
//!
//! The [`Compiler`](crate::Compiler) turns the binding graph into
//! [`FactoryUnit`]s: one per concrete type, holding every decision the
//! resolver would otherwise take per call. A [`CompiledUnits`] set is loaded
//! into a [`CompiledContainer`](crate::CompiledContainer) or rendered to Rust
//! source by [`emit`](crate::emit).

use crate::aspect::AspectDescriptor;
use crate::descriptor::{
    Capabilities, ConstructionMode, MethodBody, TypeDescriptor, Visibility,
};
use crate::value::{Args, ObjectRef, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// How one request is satisfied
#[derive(Clone, Debug)]
pub enum Target {
    /// The engine's own handle
    Engine,
    /// A directive-bound instance, returned as is
    Instance {
        type_name: String,
        instance: ObjectRef,
    },
    /// The product of a provider
    Provided {
        /// Type the provider was bound on (the singleton key type)
        for_type: String,
        qualifier: Option<String>,
        singleton: bool,
        provider: Box<Target>,
        /// Explicit arguments the provider is resolved with
        params: Args,
    },
    /// A factory unit invocation
    Unit {
        type_name: String,
        qualifier: Option<String>,
        singleton: bool,
    },
}

impl Target {
    /// Units this target invokes, directly or through a provider.
    pub fn units(&self, out: &mut BTreeSet<String>) {
        match self {
            Target::Engine | Target::Instance { .. } => {}
            Target::Provided { provider, .. } => provider.units(out),
            Target::Unit { type_name, .. } => {
                out.insert(type_name.clone());
            }
        }
    }

    pub fn is_singleton(&self) -> bool {
        match self {
            Target::Engine | Target::Instance { .. } => true,
            Target::Provided { singleton, .. } | Target::Unit { singleton, .. } => *singleton,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Engine => f.write_str("engine"),
            Target::Instance { type_name, .. } => write!(f, "instance of {type_name}"),
            Target::Provided {
                for_type, provider, ..
            } => write!(f, "{for_type} via {provider}"),
            Target::Unit {
                type_name,
                qualifier,
                singleton,
            } => {
                f.write_str(type_name)?;
                if let Some(q) = qualifier {
                    write!(f, "#{q}")?;
                }
                if *singleton {
                    f.write_str(" (singleton)")?;
                }
                Ok(())
            }
        }
    }
}

/// Where a parameter's value comes from when no explicit argument is given
#[derive(Clone, Debug)]
pub enum ParamSource {
    /// Literal default from the directive
    Literal(Value),
    /// Binding request default from the directive
    Request(Target),
    /// Injected dependency
    Dependency(Target),
    /// Optional parameter default
    Default(Value),
    /// Must be supplied by the caller
    Required,
}

#[derive(Clone, Debug)]
pub struct ParamPlan {
    pub name: String,
    pub source: ParamSource,
}

/// One injected property
#[derive(Clone, Debug)]
pub struct PropertyPlan {
    pub name: String,
    pub visibility: Visibility,
    pub target: Target,
}

/// Companion that assigns injectable properties during construction.
///
/// Present only for types that declare injectable properties.
#[derive(Clone, Debug)]
pub struct InjectionProxy {
    /// Generated proxy name
    pub name: String,
    pub target_type: String,
    pub properties: Vec<PropertyPlan>,
}

impl InjectionProxy {
    pub fn name_for(type_name: &str) -> String {
        format!("{}InjectionProxy", type_name.replace(['\\', ':', '.'], "_"))
    }
}

/// A declared instance method and how to invoke it
#[derive(Clone, Debug)]
pub struct MethodPlan {
    pub name: String,
    pub is_static: bool,
    pub visibility: Visibility,
    pub allowed_context: Option<String>,
    /// Empty for methods that may not be called through the engine
    pub params: Vec<ParamPlan>,
    pub aspects: Vec<AspectDescriptor>,
}

impl MethodPlan {
    pub fn is_callable(&self) -> bool {
        !self.is_static && self.visibility == Visibility::Public && !self.name.starts_with("__")
    }
}

/// Generated factory for one concrete type
#[derive(Clone, Debug)]
pub struct FactoryUnit {
    pub type_name: String,
    /// Module name of the emitted artifact
    pub module: String,
    pub construction: ConstructionMode,
    /// Constructor or static accessor name
    pub constructor: String,
    pub params: Vec<ParamPlan>,
    pub aspects: Vec<AspectDescriptor>,
    pub proxy: Option<InjectionProxy>,
    pub methods: Vec<MethodPlan>,
    /// Units this unit invokes
    pub depends_on: BTreeSet<String>,
    /// Resolvable, but excluded from emitted source
    pub generator_ignore: bool,
}

impl FactoryUnit {
    pub fn method(&self, name: &str) -> Option<&MethodPlan> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Recompute `depends_on` from every plan in the unit.
    pub(crate) fn collect_dependencies(&mut self) {
        let mut deps = BTreeSet::new();
        let params = self
            .params
            .iter()
            .chain(self.methods.iter().flat_map(|m| m.params.iter()));
        for plan in params {
            if let ParamSource::Request(t) | ParamSource::Dependency(t) = &plan.source {
                t.units(&mut deps);
            }
        }
        if let Some(proxy) = &self.proxy {
            for property in &proxy.properties {
                property.target.units(&mut deps);
            }
        }
        self.depends_on = deps;
    }

    /// Aspect types referenced by the constructor and the methods.
    pub fn aspect_types(&self) -> BTreeSet<&str> {
        self.aspects
            .iter()
            .chain(self.methods.iter().flat_map(|m| m.aspects.iter()))
            .map(|a| a.aspect_type.as_str())
            .collect()
    }
}

/// Host code captured for one class
#[derive(Clone, Default)]
pub struct ClassBindings {
    pub construction: ConstructionMode,
    pub constructor: Option<MethodBody>,
    pub methods: BTreeMap<String, MethodBody>,
    pub capabilities: Capabilities,
}

impl ClassBindings {
    pub fn capture(descriptor: &TypeDescriptor) -> Self {
        Self {
            construction: descriptor.construction,
            constructor: descriptor.constructor.as_ref().and_then(|m| m.body.clone()),
            methods: descriptor
                .methods
                .iter()
                .filter_map(|m| Some((m.name.clone(), m.body.clone()?)))
                .collect(),
            capabilities: descriptor.capabilities.clone(),
        }
    }
}

impl fmt::Debug for ClassBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBindings")
            .field("construction", &self.construction)
            .field("constructor", &self.constructor.is_some())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Constructor, method and capability code per class, captured at compile time
#[derive(Clone, Debug, Default)]
pub struct HostBindings {
    classes: BTreeMap<String, ClassBindings>,
}

impl HostBindings {
    pub fn insert(&mut self, descriptor: &TypeDescriptor) {
        self.classes
            .entry(descriptor.name.clone())
            .or_insert_with(|| ClassBindings::capture(descriptor));
    }

    #[inline]
    pub fn get(&self, class: &str) -> Option<&ClassBindings> {
        self.classes.get(class)
    }

    #[inline]
    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }
}

/// A compile request
#[derive(Clone, Debug, Default)]
pub struct CompileRequest {
    pub type_name: String,
    pub qualifier: Option<String>,
    /// Explicit arguments known at compile time; binding requests among them
    /// are compiled too
    pub args: Args,
}

impl CompileRequest {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn named(type_name: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            ..Self::new(type_name)
        }
    }

    pub fn with_args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }
}

impl From<&str> for CompileRequest {
    fn from(type_name: &str) -> Self {
        Self::new(type_name)
    }
}

/// Entry-table key: requested type and qualifier
pub type EntryKey = (String, Option<String>);

/// Output of one compiler invocation
#[derive(Clone, Debug, Default)]
pub struct CompiledUnits {
    /// Units keyed by concrete type name
    pub units: BTreeMap<String, FactoryUnit>,
    /// How every request met during the walk is satisfied
    pub entries: BTreeMap<EntryKey, Target>,
    pub bindings: HostBindings,
    pub roots: Vec<CompileRequest>,
}

impl CompiledUnits {
    #[inline]
    pub fn unit(&self, type_name: &str) -> Option<&FactoryUnit> {
        self.units.get(type_name)
    }

    pub fn entry(&self, type_name: &str, qualifier: Option<&str>) -> Option<&Target> {
        self.entries
            .get(&(type_name.to_string(), qualifier.map(str::to_string)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }
}

/// Module name for a type: `FooBar` -> `foo_bar`, namespaces flattened.
pub fn module_name(type_name: &str) -> String {
    let mut out = String::with_capacity(type_name.len() + 4);
    let mut prev_lower = false;
    for ch in type_name.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() {
                if prev_lower {
                    out.push('_');
                }
                out.push(ch.to_ascii_lowercase());
                prev_lower = false;
            } else {
                out.push(ch);
                prev_lower = true;
            }
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
            prev_lower = false;
        }
    }
    let out = out.trim_end_matches('_').to_string();
    match out.chars().next() {
        None => "unit".to_string(),
        Some(c) if c.is_ascii_digit() => format!("t_{out}"),
        Some(_) => out,
    }
}
