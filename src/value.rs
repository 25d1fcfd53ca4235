//! Runtime values of the object model
//!
//! The engine wires instances of a dynamic object runtime. An [`Object`] is a
//! class name, a process-unique id and a field map; everything handed to
//! constructors, method bodies and aspects is a [`Value`].
//!
//! Callers pass explicit arguments as [`Args`] (literals or binding requests);
//! the engine hands resolved [`Arguments`] to host code. The [`Fingerprint`] of
//! an `Args` map is the structural part of a singleton key.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Shared handle to a runtime object. Identity is `Arc::ptr_eq`.
pub type ObjectRef = Arc<Object>;

/// An instance in the object runtime.
pub struct Object {
    id: u64,
    class: String,
    fields: RwLock<BTreeMap<String, Value>>,
    native: Option<Arc<dyn Any + Send + Sync>>,
}

impl Object {
    fn next_id() -> u64 {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate an empty instance of `class`.
    pub fn new(class: impl Into<String>) -> ObjectRef {
        Self::with_fields(class, std::iter::empty::<(String, Value)>())
    }

    /// Allocate an instance with pre-assigned fields.
    pub fn with_fields<K, I>(class: impl Into<String>, fields: I) -> ObjectRef
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Arc::new(Self {
            id: Self::next_id(),
            class: class.into(),
            fields: RwLock::new(fields.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            native: None,
        })
    }

    /// Allocate an instance carrying a native Rust payload.
    pub fn with_native<T: Any + Send + Sync>(class: impl Into<String>, native: T) -> ObjectRef {
        Arc::new(Self {
            id: Self::next_id(),
            class: class.into(),
            fields: RwLock::new(BTreeMap::new()),
            native: Some(Arc::new(native)),
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Read a field (cloned).
    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(field)
            .cloned()
    }

    /// Read a field holding an object.
    pub fn get_object(&self, field: &str) -> Option<ObjectRef> {
        self.get(field).and_then(Value::into_object)
    }

    /// Assign a field.
    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(field.into(), value.into());
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Borrow the native payload as `T`.
    pub fn native<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.native.as_ref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("fields", &self.field_names())
            .field("native", &self.native.is_some())
            .finish()
    }
}

/// A value in the object runtime.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(ObjectRef),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Value::Object(o) => write!(f, "Object({}#{})", o.class(), o.id()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                #[inline]
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    String => Str,
    &str => Str,
    ObjectRef => Object,
    Vec<Value> => List,
    BTreeMap<String, Value> => Map,
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// An explicit argument: a literal or a request to resolve a binding.
#[derive(Clone, Debug, PartialEq)]
pub enum Argument {
    Value(Value),
    Bind {
        type_name: String,
        qualifier: Option<String>,
    },
}

impl Argument {
    /// Request an instance of `type_name`.
    pub fn bind(type_name: impl Into<String>) -> Self {
        Argument::Bind {
            type_name: type_name.into(),
            qualifier: None,
        }
    }

    /// Request the `qualifier` binding of `type_name`.
    pub fn bind_named(type_name: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Argument::Bind {
            type_name: type_name.into(),
            qualifier: Some(qualifier.into()),
        }
    }
}

impl From<Value> for Argument {
    fn from(v: Value) -> Self {
        Argument::Value(v)
    }
}

/// Explicit arguments supplied by a caller or a directive, keyed by parameter name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args(BTreeMap<String, Argument>);

impl Args {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a literal argument.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), Argument::Value(value.into()));
        self
    }

    /// Add a binding request.
    pub fn bind(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.0.insert(name.into(), Argument::bind(type_name));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, argument: Argument) {
        self.0.insert(name.into(), argument);
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.0.get(name)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Argument)> {
        self.0.iter()
    }

    /// Structural, order-independent encoding used in singleton keys.
    pub fn fingerprint(&self) -> Fingerprint {
        if self.0.is_empty() {
            return Fingerprint::empty();
        }
        let mut out = String::from("{");
        for (name, argument) in &self.0 {
            encode_str(&mut out, name);
            out.push('=');
            match argument {
                Argument::Value(v) => encode_value(&mut out, v),
                Argument::Bind {
                    type_name,
                    qualifier,
                } => {
                    out.push_str("t:");
                    encode_str(&mut out, type_name);
                    if let Some(q) = qualifier {
                        out.push('/');
                        encode_str(&mut out, q);
                    }
                }
            }
            out.push(';');
        }
        out.push('}');
        Fingerprint(out)
    }
}

impl<K: Into<String>> FromIterator<(K, Argument)> for Args {
    fn from_iter<I: IntoIterator<Item = (K, Argument)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Resolved arguments handed to constructors, methods and aspects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments(BTreeMap<String, Value>);

impl Arguments {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_object(&self, name: &str) -> Option<&ObjectRef> {
        self.0.get(name).and_then(Value::as_object)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Canonical encoding of an explicit argument map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of an empty argument map.
    #[inline]
    pub fn empty() -> Self {
        Self(String::new())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Length-prefixed so no escaping is needed.
fn encode_str(out: &mut String, s: &str) {
    let _ = write!(out, "{}:{}", s.len(), s);
}

fn encode_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push('n'),
        Value::Bool(b) => {
            let _ = write!(out, "b:{b}");
        }
        Value::Int(i) => {
            let _ = write!(out, "i:{i}");
        }
        Value::Float(x) => {
            let _ = write!(out, "f:{:x}", x.to_bits());
        }
        Value::Str(s) => {
            out.push_str("s:");
            encode_str(out, s);
        }
        Value::List(items) => {
            out.push('[');
            for item in items {
                encode_value(out, item);
                out.push(',');
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            for (k, v) in map {
                encode_str(out, k);
                out.push('=');
                encode_value(out, v);
                out.push(';');
            }
            out.push('}');
        }
        Value::Object(o) => {
            out.push_str("o:");
            encode_str(out, o.class());
            let _ = write!(out, "#{}", o.id());
        }
    }
}
