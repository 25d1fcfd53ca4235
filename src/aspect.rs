//! Aspect weaving
//!
//! Every method (constructor included) carries an ordered list of aspect
//! declarations. The weaver runs them phase by phase, in declaration order:
//!
//! 1. `before` aspects rewrite the argument map, each seeing the previous output
//! 2. `intercept` aspects thread a result, starting from "no result"; a final
//!    `Some` skips the body entirely
//! 3. `after` aspects map the real return value
//!
//! Aspect instances are obtained from the calling engine on every run, so they
//! are wired like any other type.

use crate::descriptor::Capabilities;
use crate::value::{Arguments, ObjectRef, Value};
use crate::{ResolutionError, Result};
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "logging")]
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AspectPhase {
    Before,
    Intercept,
    After,
}

impl AspectPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectPhase::Before => "before",
            AspectPhase::Intercept => "intercept",
            AspectPhase::After => "after",
        }
    }
}

impl fmt::Display for AspectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aspect attachment on a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectDescriptor {
    pub phase: AspectPhase,
    pub aspect_type: String,
    /// Static `k=v` arguments, passed unchanged on every run
    pub arguments: BTreeMap<String, String>,
}

impl AspectDescriptor {
    pub fn new(phase: AspectPhase, aspect_type: impl Into<String>) -> Self {
        Self {
            phase,
            aspect_type: aspect_type.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn before(aspect_type: impl Into<String>) -> Self {
        Self::new(AspectPhase::Before, aspect_type)
    }

    pub fn intercept(aspect_type: impl Into<String>) -> Self {
        Self::new(AspectPhase::Intercept, aspect_type)
    }

    pub fn after(aspect_type: impl Into<String>) -> Self {
        Self::new(AspectPhase::After, aspect_type)
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

/// What an aspect sees about the invocation it wraps
#[derive(Debug, Clone, Copy)]
pub struct JoinPoint<'a> {
    pub owner: &'a str,
    pub method: &'a str,
    pub aspect_args: &'a BTreeMap<String, String>,
}

/// Source of aspect instances for the weaver.
///
/// Implemented by the interpreted [`Resolver`](crate::Resolver) and by the
/// [`CompiledContainer`](crate::CompiledContainer).
pub trait AspectInstances {
    /// Produce an instance of `aspect_type` together with its capabilities.
    fn aspect_instance(&self, aspect_type: &str) -> Result<(ObjectRef, Capabilities)>;
}

/// The method an aspect chain wraps
#[derive(Debug, Clone, Copy)]
pub struct Woven<'a> {
    pub owner: &'a str,
    pub method: &'a str,
    pub aspects: &'a [AspectDescriptor],
}

impl<'a> Woven<'a> {
    pub fn new(owner: &'a str, method: &'a str, aspects: &'a [AspectDescriptor]) -> Self {
        Self {
            owner,
            method,
            aspects,
        }
    }

    fn phase(&self, phase: AspectPhase) -> impl Iterator<Item = &'a AspectDescriptor> {
        self.aspects.iter().filter(move |a| a.phase == phase)
    }

    fn join_point(&self, aspect: &'a AspectDescriptor) -> JoinPoint<'a> {
        JoinPoint {
            owner: self.owner,
            method: self.method,
            aspect_args: &aspect.arguments,
        }
    }

    fn invalid(&self, aspect: &AspectDescriptor) -> ResolutionError {
        ResolutionError::InvalidAspect {
            aspect: aspect.aspect_type.clone(),
            owner: self.owner.to_string(),
            method: self.method.to_string(),
            phase: aspect.phase.as_str(),
        }
    }

    pub fn has_aspects(&self) -> bool {
        !self.aspects.is_empty()
    }

    /// Run `before` aspects, chaining the argument map.
    pub fn before<E: AspectInstances + ?Sized>(
        &self,
        engine: &E,
        mut args: Arguments,
    ) -> Result<Arguments> {
        for aspect in self.phase(AspectPhase::Before) {
            let (instance, caps) = engine.aspect_instance(&aspect.aspect_type)?;
            let before = caps.before.ok_or_else(|| self.invalid(aspect))?;

            #[cfg(feature = "logging")]
            trace!(
                target: "dependency_weaver",
                owner = self.owner,
                method = self.method,
                aspect = aspect.aspect_type.as_str(),
                "Running before aspect"
            );

            args = before(&instance, &self.join_point(aspect), args)?;
        }
        Ok(args)
    }

    /// Run `intercept` aspects; `Some` means the body must be skipped.
    pub fn intercept<E: AspectInstances + ?Sized>(
        &self,
        engine: &E,
        args: &Arguments,
    ) -> Result<Option<Value>> {
        let mut result = None;
        for aspect in self.phase(AspectPhase::Intercept) {
            let (instance, caps) = engine.aspect_instance(&aspect.aspect_type)?;
            let intercept = caps.intercept.ok_or_else(|| self.invalid(aspect))?;
            result = intercept(&instance, &self.join_point(aspect), args, result)?;
        }

        #[cfg(feature = "logging")]
        if result.is_some() {
            trace!(
                target: "dependency_weaver",
                owner = self.owner,
                method = self.method,
                "Invocation intercepted"
            );
        }

        Ok(result)
    }

    /// Run `after` aspects over the real return value.
    pub fn after<E: AspectInstances + ?Sized>(&self, engine: &E, mut result: Value) -> Result<Value> {
        for aspect in self.phase(AspectPhase::After) {
            let (instance, caps) = engine.aspect_instance(&aspect.aspect_type)?;
            let after = caps.after.ok_or_else(|| self.invalid(aspect))?;
            result = after(&instance, &self.join_point(aspect), result)?;
        }
        Ok(result)
    }
}

/// Outcome of weaving a method invocation
#[derive(Debug, Clone)]
pub enum Weaved {
    /// The body ran and after-aspects were applied
    Completed(Value),
    /// An intercept aspect produced the result; the body never ran
    Intercepted(Value),
}

impl Weaved {
    pub fn into_value(self) -> Value {
        match self {
            Weaved::Completed(v) | Weaved::Intercepted(v) => v,
        }
    }
}

/// Weave a full invocation: before, intercept, body, after.
pub fn weave<E, F>(woven: &Woven<'_>, engine: &E, args: Arguments, body: F) -> Result<Weaved>
where
    E: AspectInstances + ?Sized,
    F: FnOnce(Arguments) -> Result<Value>,
{
    if !woven.has_aspects() {
        return body(args).map(Weaved::Completed);
    }
    let args = woven.before(engine, args)?;
    if let Some(result) = woven.intercept(engine, &args)? {
        return Ok(Weaved::Intercepted(result));
    }
    let result = body(args)?;
    woven.after(engine, result).map(Weaved::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TypeDescriptor;
    use crate::value::Object;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Aspects(HashMap<&'static str, Capabilities>);

    impl AspectInstances for Aspects {
        fn aspect_instance(&self, aspect_type: &str) -> Result<(ObjectRef, Capabilities)> {
            let caps = self
                .0
                .get(aspect_type)
                .cloned()
                .ok_or_else(|| crate::DiError::type_not_found(aspect_type))?;
            Ok((Object::new(aspect_type), caps))
        }
    }

    fn caps(build: impl FnOnce(TypeDescriptor) -> TypeDescriptor) -> Capabilities {
        build(TypeDescriptor::class("Aspect")).capabilities
    }

    fn appender(suffix: &'static str) -> Capabilities {
        caps(|d| {
            d.before_aspect(move |_, _, mut args| {
                let seen = args
                    .get("trail")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                args.insert("trail", format!("{seen}{suffix}"));
                Ok(args)
            })
        })
    }

    #[test]
    fn test_before_aspects_chain_in_order() {
        let engine = Aspects(HashMap::from([("A", appender("a")), ("B", appender("b"))]));
        let aspects = vec![AspectDescriptor::before("A"), AspectDescriptor::before("B")];
        let woven = Woven::new("Car", "constructor", &aspects);

        let mut args = Arguments::new();
        args.insert("trail", "");
        let args = woven.before(&engine, args).unwrap();
        assert_eq!(args.get("trail"), Some(&Value::from("ab")));
    }

    #[test]
    fn test_intercept_short_circuits_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = caps(|d| {
            d.intercept_aspect(|_, jp, _, prior| {
                assert!(prior.is_none());
                Ok(Some(Value::from(jp.aspect_args["hit"].clone())))
            })
        });
        let engine = Aspects(HashMap::from([("Cache", cache)]));
        let aspects = vec![AspectDescriptor::intercept("Cache").arg("hit", "cached")];
        let woven = Woven::new("Repo", "find", &aspects);

        let counter = Arc::clone(&calls);
        let outcome = weave(&woven, &engine, Arguments::new(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from("fresh"))
        })
        .unwrap();

        assert!(matches!(outcome, Weaved::Intercepted(Value::Str(ref s)) if s == "cached"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_intercept_receives_prior_result() {
        let pass = caps(|d| d.intercept_aspect(|_, _, _, prior| Ok(prior)));
        let set = caps(|d| d.intercept_aspect(|_, _, _, _| Ok(Some(Value::Int(1)))));
        let clear = caps(|d| {
            d.intercept_aspect(|_, _, _, prior| {
                assert_eq!(prior, Some(Value::Int(1)));
                Ok(None)
            })
        });
        let engine = Aspects(HashMap::from([("Pass", pass), ("Set", set), ("Clear", clear)]));
        let aspects = vec![
            AspectDescriptor::intercept("Pass"),
            AspectDescriptor::intercept("Set"),
            AspectDescriptor::intercept("Clear"),
        ];
        let woven = Woven::new("Repo", "find", &aspects);

        let outcome = weave(&woven, &engine, Arguments::new(), |_| Ok(Value::from("body"))).unwrap();
        assert!(matches!(outcome, Weaved::Completed(Value::Str(ref s)) if s == "body"));
    }

    #[test]
    fn test_after_aspects_map_result() {
        let double = caps(|d| d.after_aspect(|_, _, result| Ok(Value::Int(result.as_int().unwrap_or(0) * 2))));
        let engine = Aspects(HashMap::from([("Double", double)]));
        let aspects = vec![AspectDescriptor::after("Double"), AspectDescriptor::after("Double")];
        let woven = Woven::new("Calc", "value", &aspects);

        let outcome = weave(&woven, &engine, Arguments::new(), |_| Ok(Value::Int(3))).unwrap();
        assert_eq!(outcome.into_value(), Value::Int(12));
    }

    #[test]
    fn test_missing_capability_is_invalid_aspect() {
        let engine = Aspects(HashMap::from([("A", appender("a"))]));
        let aspects = vec![AspectDescriptor::after("A")];
        let woven = Woven::new("Car", "drive", &aspects);

        let err = weave(&woven, &engine, Arguments::new(), |_| Ok(Value::Null)).unwrap_err();
        assert!(matches!(
            err,
            crate::DiError::Resolution(ResolutionError::InvalidAspect { phase: "after", .. })
        ));
    }
}
