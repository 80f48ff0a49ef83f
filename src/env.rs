//! Environment
//!
//! Lexically scoped variable bindings (`spec.md` §3 "Environment", §4.B).
//!
//! Scopes are `Arc<tokio::sync::RwLock<Scope>>` chained by parent pointers
//! rather than the `Rc<RefCell<_>>` chain a single-threaded tree-walker
//! would normally reach for, because each spawned/HTTP-handled script runs
//! its own evaluator inside a `tokio::spawn`ed task (`spec.md` §5): the
//! `Value` type that closures carry must stay `Send + Sync`. Function
//! values captured inside their own defining scope form a reference cycle
//! (leak, not a correctness bug) — see `DESIGN.md` for why that tradeoff
//! was accepted over the spec's optional weak-back-reference scheme.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::value::Value;

#[derive(Default)]
struct Scope {
    vars: HashMap<String, Value>,
}

#[derive(Clone)]
pub struct Env {
    inner: Arc<RwLock<Scope>>,
    parent: Option<Box<Env>>,
}

impl Env {
    pub fn root() -> Self {
        Self { inner: Arc::new(RwLock::new(Scope::default())), parent: None }
    }

    /// Creates a new scope chained to this one — used for closure
    /// invocation and block entry (`spec.md` §4.B `child()`).
    pub fn child(&self) -> Self {
        Self { inner: Arc::new(RwLock::new(Scope::default())), parent: Some(Box::new(self.clone())) }
    }

    /// Walks outward through the scope chain looking up `name`.
    pub async fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.inner.read().await.vars.get(name) {
            return Some(v.clone());
        }
        if let Some(parent) = &self.parent {
            return Box::pin(parent.get(name)).await;
        }
        None
    }

    /// Creates a cell in the current scope, shadowing any outer cell of
    /// the same name (`spec.md` §4.B `define()` / `var`).
    pub async fn define(&self, name: impl Into<String>, value: Value) {
        self.inner.write().await.vars.insert(name.into(), value);
    }

    /// Updates the innermost enclosing cell. Returns `false` if `name` is
    /// not bound anywhere in the chain (caller turns that into an
    /// undefined-variable error per `spec.md` §4.B).
    pub async fn set(&self, name: &str, value: Value) -> bool {
        {
            let mut guard = self.inner.write().await;
            if guard.vars.contains_key(name) {
                guard.vars.insert(name.to_string(), value);
                return true;
            }
        }
        if let Some(parent) = &self.parent {
            return Box::pin(parent.set(name, value)).await;
        }
        false
    }

    /// True if `name` is bound anywhere in the chain.
    pub async fn contains(&self, name: &str) -> bool {
        self.get(name).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn child_scope_shadows_parent() {
        let root = Env::root();
        root.define("x", Value::Number(1.0)).await;
        let child = root.child();
        child.define("x", Value::Number(2.0)).await;
        assert_eq!(child.get("x").await.unwrap().to_number(), 2.0);
        assert_eq!(root.get("x").await.unwrap().to_number(), 1.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_updates_innermost_enclosing_cell() {
        let root = Env::root();
        root.define("x", Value::Number(1.0)).await;
        let child = root.child();
        assert!(child.set("x", Value::Number(5.0)).await);
        assert_eq!(root.get("x").await.unwrap().to_number(), 5.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_unknown_name_fails() {
        let root = Env::root();
        assert!(!root.set("missing", Value::Nil).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lookup_walks_outward() {
        let root = Env::root();
        root.define("g", Value::Number(9.0)).await;
        let child = root.child().child();
        assert_eq!(child.get("g").await.unwrap().to_number(), 9.0);
    }
}
