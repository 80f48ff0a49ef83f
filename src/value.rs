//! Value Model
//!
//! Tagged-variant runtime values with deep-copy and cross-boundary
//! semantics (`spec.md` §3, §4.A).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use crate::ast::{Block, Param, Position};
use crate::env::Env;
use crate::interpreter::error::Flow;
use crate::interpreter::evaluator::Evaluator;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A builtin. Takes the call position so it can stamp any [`Flow::Error`]
/// it raises with accurate source location (`spec.md` §7 propagation).
pub type NativeFn = Arc<
    dyn for<'a> Fn(&'a mut Evaluator, NamedArgs, Position) -> BoxFuture<'a, Result<Value, Flow>>
        + Send
        + Sync,
>;

/// A script-defined closure: parameters with optional default expressions,
/// a body, and a captured defining environment.
#[derive(Clone)]
pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Block,
    pub env: Env,
}

/// Runtime handle kinds. Never deep-copied: only their logical names cross
/// a spawn/task boundary (`spec.md` §3 "Process handle"). Spawned child
/// processes are addressed by plain pid `Number`, not a `Handle` variant,
/// matching §9's "handles transfer by logical name... pid integer."
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleKind {
    Datastore(String),
    HttpServer(String),
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Number(f64),
    Bool(bool),
    Str(Arc<str>),
    Array(Arc<RwLock<Vec<Value>>>),
    Object(Arc<RwLock<IndexMap<String, Value>>>),
    Function(Arc<Closure>),
    Native(NativeFn),
    Handle(HandleKind),
}

/// The unified calling-convention mapping: `{"0": arg0, "1": arg1, ...,
/// "name": named_arg}` (`spec.md` §4.C / §9 "Named vs positional arguments").
#[derive(Debug, Clone, Default)]
pub struct NamedArgs {
    pub positional: Vec<Value>,
    pub named: HashMap<String, Value>,
}

impl NamedArgs {
    pub fn positional_only(args: Vec<Value>) -> Self {
        Self { positional: args, named: HashMap::new() }
    }

    pub fn get_positional(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// Looks up by position first, falling back to a named argument —
    /// the convention builtins use to accept either calling style.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.get_positional(index).or_else(|| self.get_named(name))
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

static ANON_ID: AtomicU64 = AtomicU64::new(1);

impl Value {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn object(entries: IndexMap<String, Value>) -> Self {
        Value::Object(Arc::new(RwLock::new(entries)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Handle(_) => "handle",
        }
    }

    /// Truthiness per `spec.md` §4.A: nil/0/""/empty array/object are falsy.
    pub async fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.read().await.is_empty(),
            Value::Object(o) => !o.read().await.is_empty(),
            Value::Function(_) | Value::Native(_) | Value::Handle(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Nil => 0.0,
            Value::Bool(b) => if *b { 1.0 } else { 0.0 },
            Value::Number(n) => *n,
            Value::Str(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// Coerce to number, surfacing NaN as 0.0 with the spec's "notice"
    /// contract (callers that need strict numeric validation should check
    /// `to_number` directly before coercing).
    pub fn to_number_lenient(&self) -> f64 {
        let n = self.to_number();
        if n.is_nan() {
            tracing::warn!(value = %self.type_name(), "tonumber() coercion failed, surfacing as 0.0");
            0.0
        } else {
            n
        }
    }

    pub async fn to_display_string(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(_) | Value::Object(_) => self.to_json_string().await,
            Value::Function(c) => format!("<function {}>", c.name.clone().unwrap_or_else(|| "anonymous".into())),
            Value::Native(_) => "<native function>".to_string(),
            Value::Handle(h) => format!("<handle {:?}>", h),
        }
    }

    pub async fn to_json_string(&self) -> String {
        let v = self.to_json().await;
        serde_json::to_string(&v).unwrap_or_else(|_| "null".to_string())
    }

    pub fn to_json<'a>(&'a self) -> std::pin::Pin<Box<dyn std::future::Future<Output = JsonValue> + Send + 'a>> {
        Box::pin(async move {
            match self {
                Value::Nil => JsonValue::Null,
                Value::Bool(b) => JsonValue::Bool(*b),
                Value::Number(n) => serde_json::Number::from_f64(*n)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null),
                Value::Str(s) => JsonValue::String(s.to_string()),
                Value::Array(arr) => {
                    let guard = arr.read().await;
                    let mut out = Vec::with_capacity(guard.len());
                    for item in guard.iter() {
                        out.push(item.to_json().await);
                    }
                    JsonValue::Array(out)
                }
                Value::Object(obj) => {
                    let guard = obj.read().await;
                    let mut map = serde_json::Map::new();
                    for (k, v) in guard.iter() {
                        map.insert(k.clone(), v.to_json().await);
                    }
                    JsonValue::Object(map)
                }
                Value::Function(_) | Value::Native(_) => JsonValue::Null,
                Value::Handle(_) => JsonValue::Null,
            }
        })
    }

    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Nil,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::string(s.clone()),
            JsonValue::Array(arr) => Value::array(arr.iter().map(Value::from_json).collect()),
            JsonValue::Object(obj) => {
                let mut map = IndexMap::new();
                for (k, v) in obj {
                    map.insert(k.clone(), Value::from_json(v));
                }
                Value::object(map)
            }
        }
    }

    /// Deep copy across task/datastore boundaries (`spec.md` §3 invariant 2,
    /// §5, §9 "Deep copy across task boundaries"). Scalars copy trivially;
    /// arrays/objects recreate their containers; closures clone; handles
    /// keep their logical name/id only.
    pub fn deep_copy<'a>(&'a self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Value> + Send + 'a>> {
        Box::pin(async move {
            match self {
                Value::Nil => Value::Nil,
                Value::Bool(b) => Value::Bool(*b),
                Value::Number(n) => Value::Number(*n),
                Value::Str(s) => Value::Str(s.clone()),
                Value::Array(arr) => {
                    let guard = arr.read().await;
                    let mut copies = Vec::with_capacity(guard.len());
                    for item in guard.iter() {
                        copies.push(item.deep_copy().await);
                    }
                    Value::array(copies)
                }
                Value::Object(obj) => {
                    let guard = obj.read().await;
                    let mut map = IndexMap::new();
                    for (k, v) in guard.iter() {
                        map.insert(k.clone(), v.deep_copy().await);
                    }
                    Value::object(map)
                }
                Value::Function(c) => Value::Function(c.clone()),
                Value::Native(f) => Value::Native(f.clone()),
                Value::Handle(h) => Value::Handle(h.clone()),
            }
        })
    }

    /// Structural equality. NaN is unequal to itself; other orderings over
    /// incomparable types are simply `false` here (ordering errors are
    /// raised separately by `compare`).
    pub fn structural_eq<'a>(&'a self, other: &'a Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match (self, other) {
                (Value::Nil, Value::Nil) => true,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::Number(a), Value::Number(b)) => a == b, // NaN != NaN falls out naturally
                (Value::Str(a), Value::Str(b)) => a == b,
                (Value::Array(a), Value::Array(b)) => {
                    if Arc::ptr_eq(a, b) {
                        return true;
                    }
                    let (ga, gb) = (a.read().await, b.read().await);
                    if ga.len() != gb.len() {
                        return false;
                    }
                    for (x, y) in ga.iter().zip(gb.iter()) {
                        if !x.structural_eq(y).await {
                            return false;
                        }
                    }
                    true
                }
                (Value::Object(a), Value::Object(b)) => {
                    if Arc::ptr_eq(a, b) {
                        return true;
                    }
                    let (ga, gb) = (a.read().await, b.read().await);
                    if ga.len() != gb.len() {
                        return false;
                    }
                    for (k, v) in ga.iter() {
                        match gb.get(k) {
                            Some(other_v) if v.structural_eq(other_v).await => {}
                            _ => return false,
                        }
                    }
                    true
                }
                (Value::Handle(a), Value::Handle(b)) => a == b,
                _ => false,
            }
        })
    }

    pub fn anonymous_function_id() -> u64 {
        ANON_ID.fetch_add(1, Ordering::Relaxed)
    }
}

/// Canonical decimal rendering matching the teacher's bias toward compact,
/// script-friendly number formatting (no trailing `.0` for integers).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    /// Best-effort synchronous rendering for error messages. Full
    /// printable forms (array/object JSON rendering) go through
    /// [`Value::to_display_string`], which needs to lock containers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(_) => write!(f, "<array>"),
            Value::Object(_) => write!(f, "<object>"),
            Value::Function(c) => write!(f, "<function {}>", c.name.clone().unwrap_or_else(|| "anonymous".into())),
            Value::Native(_) => write!(f, "<native function>"),
            Value::Handle(h) => write!(f, "<handle {:?}>", h),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(_) => write!(f, "<array>"),
            Value::Object(_) => write!(f, "<object>"),
            Value::Function(c) => write!(f, "<function {:?}>", c.name),
            Value::Native(_) => write!(f, "<native>"),
            Value::Handle(h) => write!(f, "<handle {:?}>", h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn truthiness_matches_spec() {
        assert!(!Value::Nil.is_truthy().await);
        assert!(!Value::Number(0.0).is_truthy().await);
        assert!(!Value::string("").is_truthy().await);
        assert!(!Value::array(vec![]).is_truthy().await);
        assert!(Value::Number(1.0).is_truthy().await);
        assert!(Value::string("x").is_truthy().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deep_copy_is_independent() {
        let original = Value::array(vec![Value::Number(1.0)]);
        let copy = original.deep_copy().await;
        if let (Value::Array(a), Value::Array(b)) = (&original, &copy) {
            b.write().await.push(Value::Number(2.0));
            assert_eq!(a.read().await.len(), 1);
            assert_eq!(b.read().await.len(), 2);
        } else {
            panic!("expected arrays");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nan_is_not_equal_to_itself() {
        let nan = Value::Number(f64::NAN);
        assert!(!nan.structural_eq(&nan).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn structural_eq_is_recursive_for_arrays() {
        let a = Value::array(vec![Value::Number(1.0), Value::string("x")]);
        let b = Value::array(vec![Value::Number(1.0), Value::string("x")]);
        assert!(a.structural_eq(&b).await);
    }

    #[test]
    fn number_formatting_drops_trailing_zero() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(3.5), "3.5");
    }
}
