/// JSONata runtime value representation.
///
/// `Undefined` (absent) is distinct from JSON `null`. `Object` uses
/// `Vec<(String, Value)>` to preserve key insertion order, which JSONata
/// makes observable through serialization and `$each`/`$keys`. Arrays and
/// objects are `Rc`-shared so path evaluation can clone values cheaply.
use std::rc::Rc;

use crate::expr::builtins::BuiltinDef;
use crate::expr::functions::{LambdaDef, TailCall, TransformDef};

/// Marker bits carried by array values.
///
/// A `SEQUENCE` array was produced by path machinery and flattens one level
/// when concatenated into an enclosing step result; a `CONS` array came from
/// an array constructor and stays nested. `KEEP_SINGLETON` disables the
/// collapse of a one-element sequence to its element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrayFlags(u8);

impl ArrayFlags {
    pub const NONE: ArrayFlags = ArrayFlags(0);
    pub const SEQUENCE: ArrayFlags = ArrayFlags(1);
    pub const CONS: ArrayFlags = ArrayFlags(2);
    pub const KEEP_SINGLETON: ArrayFlags = ArrayFlags(4);

    pub fn has(self, other: ArrayFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn with(self, other: ArrayFlags) -> ArrayFlags {
        ArrayFlags(self.0 | other.0)
    }
}

/// A context-bound value: an intermediate path result carrying the bindings
/// and parent references it was produced under. Invisible outside path
/// steps and predicate scopes — every operator and function boundary
/// unwraps it.
#[derive(Debug, Clone)]
pub struct BoundValue {
    pub value: Value,
    /// The focus the value was produced from (`@` rewinds to this).
    pub parent: Value,
    /// The enclosing object, for the `%` operator.
    pub parent_object: Value,
    /// Variable bindings inherited by item scopes downstream.
    pub bindings: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Rc<Vec<Value>>, ArrayFlags),
    Object(Rc<Vec<(String, Value)>>),
    Lambda(Rc<LambdaDef>),
    Builtin(Rc<BuiltinDef>),
    Transform(Rc<TransformDef>),
    Regex(Rc<regex::Regex>),
    Bound(Rc<BoundValue>),
    /// Trampoline thunk for a tail call. Never escapes the lambda runtime.
    Thunk(Rc<TailCall>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(items), ArrayFlags::NONE)
    }

    pub fn sequence(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(items), ArrayFlags::SEQUENCE)
    }

    pub fn object(pairs: Vec<(String, Value)>) -> Value {
        Value::Object(Rc::new(pairs))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Lambda(_) | Value::Builtin(_) | Value::Transform(_) | Value::Regex(_)
        )
    }

    /// The JSONata type name, as reported by `$type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(..) => "array",
            Value::Object(_) => "object",
            Value::Lambda(_) | Value::Builtin(_) | Value::Transform(_) | Value::Regex(_) => {
                "function"
            }
            Value::Bound(b) => b.value.type_name(),
            Value::Thunk(_) => "function",
        }
    }

    /// JSONata truthiness: absent, null, false, 0, "" and [] are falsy;
    /// an array is truthy iff some element is recursively truthy; a
    /// non-empty object is truthy; functions are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null | Value::Bool(false) => false,
            Value::Bool(true) => true,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(items, _) => items.iter().any(Value::is_truthy),
            Value::Object(pairs) => !pairs.is_empty(),
            Value::Bound(b) => b.value.is_truthy(),
            _ => false,
        }
    }

    /// Strip context-bound wrappers from the top of the value.
    pub fn unbound(&self) -> &Value {
        let mut v = self;
        while let Value::Bound(b) = v {
            v = &b.value;
        }
        v
    }

    /// Strip context-bound wrappers everywhere in the value. Used at every
    /// operator/function boundary and at the outermost return.
    pub fn deep_unbound(&self) -> Value {
        match self.unbound() {
            Value::Array(items, flags) => {
                if items.iter().any(Value::contains_bound) {
                    Value::Array(
                        Rc::new(items.iter().map(Value::deep_unbound).collect()),
                        *flags,
                    )
                } else {
                    Value::Array(Rc::clone(items), *flags)
                }
            }
            Value::Object(pairs) => {
                if pairs.iter().any(|(_, v)| v.contains_bound()) {
                    Value::Object(Rc::new(
                        pairs
                            .iter()
                            .map(|(k, v)| (k.clone(), v.deep_unbound()))
                            .collect(),
                    ))
                } else {
                    Value::Object(Rc::clone(pairs))
                }
            }
            other => other.clone(),
        }
    }

    fn contains_bound(&self) -> bool {
        match self {
            Value::Bound(_) => true,
            Value::Array(items, _) => items.iter().any(Value::contains_bound),
            Value::Object(pairs) => pairs.iter().any(|(_, v)| v.contains_bound()),
            _ => false,
        }
    }

    /// Look up a key in an object value.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        match self.unbound() {
            Value::Object(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Finite integral numbers usable as array indices or range bounds.
    pub fn as_integer(&self) -> Option<i64> {
        match self.unbound() {
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.unbound() {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unbound() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a parsed JSON document into a runtime value.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back to a JSON document. `Undefined` maps to `None`
    /// (value absent); functions have no JSON representation and also
    /// disappear.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self.unbound() {
            Value::Undefined => None,
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Value::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
            Value::String(s) => Some(serde_json::Value::String(s.clone())),
            Value::Array(items, _) => Some(serde_json::Value::Array(
                items.iter().filter_map(Value::to_json).collect(),
            )),
            Value::Object(pairs) => {
                let mut map = serde_json::Map::new();
                for (k, v) in pairs.iter() {
                    if let Some(j) = v.to_json() {
                        map.insert(k.clone(), j);
                    }
                }
                Some(serde_json::Value::Object(map))
            }
            _ => None,
        }
    }
}

/// Deep structural equality. Context-bound wrappers and array flags are
/// invisible; functions never compare equal.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self.unbound(), other.unbound()) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a, _), Value::Array(b, _)) => a.as_slice() == b.as_slice(),
            // Objects are unordered mappings: only the key set and the
            // values matter, not insertion order.
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter()
                            .find(|(bk, _)| bk == k)
                            .is_some_and(|(_, bv)| bv == v)
                    })
            }
            _ => false,
        }
    }
}
