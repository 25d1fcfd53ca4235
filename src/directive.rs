//! Binding directives and metadata providers
//!
//! A [`BindingDirective`] is the configured wiring for one type: a bound
//! instance, providers, concrete overrides, qualifier maps, default parameters
//! and the singleton flag. Directives are looked up through a
//! [`MetadataProvider`] and never mutated by the engine.
//!
//! The precedence shared by the resolver and the compiler lives here as well,
//! so both paths make the same decision for the same request.

use crate::tags::TypeTags;
use crate::value::{Args, Argument, ObjectRef, Value};
use crate::{DiError, ResolutionError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, info};

/// A provider type plus the explicit arguments it is resolved with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderRef {
    pub type_name: String,
    pub params: Args,
}

impl ProviderRef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            params: Args::new(),
        }
    }

    pub fn with_params(mut self, params: Args) -> Self {
        self.params = params;
        self
    }
}

/// Configured wiring for one type
#[derive(Debug, Clone, Default)]
pub struct BindingDirective {
    /// `Some` overrides the `@singleton` tag either way
    pub singleton: Option<bool>,
    pub concrete_type: Option<String>,
    /// qualifier -> concrete type
    pub named: BTreeMap<String, String>,
    pub provider: Option<ProviderRef>,
    pub named_providers: BTreeMap<String, ProviderRef>,
    /// Default constructor arguments
    pub params: BTreeMap<String, Argument>,
    pub instance: Option<ObjectRef>,
}

impl BindingDirective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_singleton(mut self, singleton: bool) -> Self {
        self.singleton = Some(singleton);
        self
    }

    pub fn with_concrete_type(mut self, type_name: impl Into<String>) -> Self {
        self.concrete_type = Some(type_name.into());
        self
    }

    pub fn with_named(mut self, qualifier: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.named.insert(qualifier.into(), type_name.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderRef) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_named_provider(mut self, qualifier: impl Into<String>, provider: ProviderRef) -> Self {
        self.named_providers.insert(qualifier.into(), provider);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, argument: impl Into<Argument>) -> Self {
        self.params.insert(name.into(), argument.into());
        self
    }

    pub fn with_instance(mut self, instance: ObjectRef) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.singleton.is_none()
            && self.concrete_type.is_none()
            && self.named.is_empty()
            && self.provider.is_none()
            && self.named_providers.is_empty()
            && self.params.is_empty()
            && self.instance.is_none()
    }
}

/// Source of binding directives
pub trait MetadataProvider: Send + Sync {
    /// Directive for `type_name`; an empty directive when none is configured.
    fn directive(&self, type_name: &str) -> Arc<BindingDirective>;
}

impl<T: MetadataProvider + ?Sized> MetadataProvider for Arc<T> {
    fn directive(&self, type_name: &str) -> Arc<BindingDirective> {
        (**self).directive(type_name)
    }
}

/// In-memory directive table
///
/// Populated programmatically with [`bind`](Self::bind) or loaded from a JSON
/// document keyed by type name:
///
/// ```json
/// {
///   "Logger": { "singleton": true, "class": "FileLogger", "named": { "audit": "AuditLogger" } },
///   "Database": { "provider": { "class": "DatabaseProvider", "params": { "dsn": "sqlite::memory:" } } },
///   "Mailer": { "params": { "transport": { "class": "SmtpTransport" }, "retries": 3 } }
/// }
/// ```
///
/// A parameter value of the form `{"class": T}` (optionally with `"name": q`)
/// is a binding request; `{"value": v}` forces a literal; anything else is a
/// literal.
pub struct StaticMetadata {
    directives: DashMap<String, Arc<BindingDirective>, RandomState>,
    empty: Arc<BindingDirective>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self {
            directives: DashMap::with_hasher(RandomState::new()),
            empty: Arc::new(BindingDirective::default()),
        }
    }

    /// Set the directive for a type, replacing any previous one.
    pub fn bind(&self, type_name: impl Into<String>, directive: BindingDirective) -> &Self {
        let type_name = type_name.into();

        #[cfg(feature = "logging")]
        debug!(
            target: "dependency_weaver",
            type_name = type_name.as_str(),
            singleton = ?directive.singleton,
            "Binding directive"
        );

        self.directives.insert(type_name, Arc::new(directive));
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BTreeMap<String, DirectiveConfig> =
            serde_json::from_str(json).map_err(|e| DiError::Config(e.to_string()))?;
        let metadata = Self::new();
        for (type_name, directive) in config {
            metadata.bind(type_name, directive.into_directive());
        }

        #[cfg(feature = "logging")]
        info!(
            target: "dependency_weaver",
            directives = metadata.len(),
            "Loaded metadata configuration"
        );

        Ok(metadata)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| DiError::io(path, e))?;
        Self::from_json_str(&json)
    }
}

impl Default for StaticMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataProvider for StaticMetadata {
    fn directive(&self, type_name: &str) -> Arc<BindingDirective> {
        self.directives
            .get(type_name)
            .map(|d| Arc::clone(d.value()))
            .unwrap_or_else(|| Arc::clone(&self.empty))
    }
}

impl fmt::Debug for StaticMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticMetadata")
            .field("directives", &self.len())
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DirectiveConfig {
    singleton: Option<bool>,
    #[serde(rename = "class")]
    concrete_type: Option<String>,
    #[serde(default)]
    named: BTreeMap<String, String>,
    provider: Option<ProviderConfig>,
    #[serde(default)]
    named_providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    params: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProviderConfig {
    Name(String),
    Full {
        class: String,
        #[serde(default, alias = "parameters")]
        params: BTreeMap<String, serde_json::Value>,
    },
}

impl ProviderConfig {
    fn into_provider(self) -> ProviderRef {
        match self {
            ProviderConfig::Name(type_name) => ProviderRef::new(type_name),
            ProviderConfig::Full { class, params } => ProviderRef {
                type_name: class,
                params: params
                    .into_iter()
                    .map(|(k, v)| (k, argument_from_json(v)))
                    .collect(),
            },
        }
    }
}

impl DirectiveConfig {
    fn into_directive(self) -> BindingDirective {
        BindingDirective {
            singleton: self.singleton,
            concrete_type: self.concrete_type,
            named: self.named,
            provider: self.provider.map(ProviderConfig::into_provider),
            named_providers: self
                .named_providers
                .into_iter()
                .map(|(q, p)| (q, p.into_provider()))
                .collect(),
            params: self
                .params
                .into_iter()
                .map(|(k, v)| (k, argument_from_json(v)))
                .collect(),
            instance: None,
        }
    }
}

/// Interpret a configured parameter value.
pub(crate) fn argument_from_json(json: serde_json::Value) -> Argument {
    if let serde_json::Value::Object(map) = &json {
        match (map.get("class"), map.get("name"), map.get("value"), map.len()) {
            (Some(serde_json::Value::String(ty)), None, None, 1) => return Argument::bind(ty),
            (Some(serde_json::Value::String(ty)), Some(serde_json::Value::String(q)), None, 2) => {
                return Argument::bind_named(ty, q);
            }
            (None, None, Some(inner), 1) => return Argument::Value(Value::from(inner.clone())),
            _ => {}
        }
    }
    Argument::Value(Value::from(json))
}

/// The binding chosen for one step of a resolution.
#[derive(Debug, Clone)]
pub(crate) enum Binding<'a> {
    Instance(&'a ObjectRef),
    Provider(&'a ProviderRef),
    Redirect(&'a str),
    Construct,
}

/// Apply the binding precedence for `type_name` requested with `qualifier`:
/// bound instance, provider, concrete override (qualifier map when
/// qualified), self-construction.
pub(crate) fn select<'a>(
    type_name: &str,
    qualifier: Option<&str>,
    directive: &'a BindingDirective,
    tags: &'a TypeTags,
) -> std::result::Result<Binding<'a>, ResolutionError> {
    if let Some(instance) = &directive.instance {
        return Ok(Binding::Instance(instance));
    }

    let provider = qualifier
        .and_then(|q| directive.named_providers.get(q))
        .or(directive.provider.as_ref())
        .or_else(|| tags.provider(qualifier));
    if let Some(provider) = provider {
        return Ok(Binding::Provider(provider));
    }

    let redirect = match qualifier {
        Some(q) => Some(
            directive
                .named
                .get(q)
                .map(String::as_str)
                .or_else(|| tags.implementation(Some(q)))
                .ok_or_else(|| ResolutionError::MissingQualifier {
                    type_name: type_name.to_string(),
                    qualifier: q.to_string(),
                })?,
        ),
        None => directive
            .concrete_type
            .as_deref()
            .or_else(|| tags.implementation(None)),
    };

    Ok(match redirect {
        Some(target) if target != type_name => Binding::Redirect(target),
        _ => Binding::Construct,
    })
}

/// Singleton decision accumulated along a redirect chain.
///
/// The first directive that sets the flag decides; otherwise any
/// `@singleton` tag on the chain makes the result a singleton.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SingletonPolicy {
    configured: Option<bool>,
    tagged: bool,
}

impl SingletonPolicy {
    pub(crate) fn observe(&mut self, directive: &BindingDirective, tags: &TypeTags) {
        if self.configured.is_none() {
            self.configured = directive.singleton;
        }
        self.tagged |= tags.singleton;
    }

    pub(crate) fn is_singleton(&self) -> bool {
        self.configured.unwrap_or(self.tagged)
    }
}

/// Track a redirect chain and reject loops.
#[derive(Debug, Default)]
pub(crate) struct RedirectChain(Vec<String>);

impl RedirectChain {
    pub(crate) fn visit(&mut self, type_name: &str) -> std::result::Result<(), ResolutionError> {
        let seen = self.0.iter().any(|t| t == type_name);
        self.0.push(type_name.to_string());
        if seen {
            return Err(ResolutionError::RedirectCycle {
                chain: std::mem::take(&mut self.0),
            });
        }
        Ok(())
    }
}
