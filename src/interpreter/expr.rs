//! Expression evaluation (`spec.md` §4.C "Expression evaluation").

use indexmap::IndexMap;

use crate::ast::{Arg, BinaryOp, Expr, ExprKind, LogicalOp, Position, UnaryOp};
use crate::env::Env;
use crate::interpreter::error::{DuError, EvalResult};
use crate::interpreter::evaluator::Evaluator;
use crate::value::{Closure, HandleKind, NamedArgs, Value};

impl Evaluator {
    pub(crate) fn eval_expr<'a>(
        &'a mut self,
        env: &'a Env,
        expr: &'a Expr,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = EvalResult<Value>> + Send + 'a>> {
        Box::pin(async move {
            match &expr.kind {
                ExprKind::Nil => Ok(Value::Nil),
                ExprKind::Bool(b) => Ok(Value::Bool(*b)),
                ExprKind::Number(n) => Ok(Value::Number(*n)),
                ExprKind::Str(s) => Ok(Value::string(s.clone())),
                ExprKind::Identifier(name) => env
                    .get(name)
                    .await
                    .ok_or_else(|| self.data_err(DuError::Undefined(name.clone()), expr.pos)),
                ExprKind::ArrayLit(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval_expr(env, item).await?);
                    }
                    Ok(Value::array(values))
                }
                ExprKind::ObjectLit(entries) => {
                    let mut map = IndexMap::new();
                    for (key, value_expr) in entries {
                        let value = self.eval_expr(env, value_expr).await?;
                        map.insert(key.clone(), value);
                    }
                    Ok(Value::object(map))
                }
                ExprKind::FunctionLit { params, body } => Ok(Value::Function(std::sync::Arc::new(Closure {
                    name: None,
                    params: params.clone(),
                    body: body.clone(),
                    env: env.clone(),
                }))),
                ExprKind::Unary { op, operand } => self.eval_unary(env, *op, operand).await,
                ExprKind::Binary { op, left, right } => self.eval_binary(env, *op, left, right, expr.pos).await,
                ExprKind::Logical { op, left, right } => self.eval_logical(env, *op, left, right).await,
                ExprKind::Ternary { cond, then_branch, else_branch } => {
                    let c = self.eval_expr(env, cond).await?;
                    if c.is_truthy().await {
                        self.eval_expr(env, then_branch).await
                    } else {
                        self.eval_expr(env, else_branch).await
                    }
                }
                ExprKind::Call { callee, args } => self.eval_call(env, callee, args, expr.pos).await,
                ExprKind::Index { target, index } => self.eval_index(env, target, index, expr.pos).await,
                ExprKind::Member { target, name } => self.eval_member(env, target, name, expr.pos).await,
            }
        })
    }

    async fn eval_unary(&mut self, env: &Env, op: UnaryOp, operand: &Expr) -> EvalResult<Value> {
        let v = self.eval_expr(env, operand).await?;
        match op {
            UnaryOp::Not => Ok(Value::Bool(!v.is_truthy().await)),
            UnaryOp::Neg => match v {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(self.data_err(
                    DuError::Type(format!("cannot negate {}", other.type_name())),
                    operand.pos,
                )),
            },
        }
    }

    async fn eval_logical(&mut self, env: &Env, op: LogicalOp, left: &Expr, right: &Expr) -> EvalResult<Value> {
        let l = self.eval_expr(env, left).await?;
        match op {
            LogicalOp::And => {
                if !l.is_truthy().await {
                    Ok(l)
                } else {
                    self.eval_expr(env, right).await
                }
            }
            LogicalOp::Or => {
                if l.is_truthy().await {
                    Ok(l)
                } else {
                    self.eval_expr(env, right).await
                }
            }
        }
    }

    async fn eval_binary(
        &mut self,
        env: &Env,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        pos: Position,
    ) -> EvalResult<Value> {
        let l = self.eval_expr(env, left).await?;
        let r = self.eval_expr(env, right).await?;
        match op {
            BinaryOp::Add => self.value_add(l, r, pos).await,
            BinaryOp::Sub => self.numeric_op(l, r, pos, |a, b| Ok(a - b)).await,
            BinaryOp::Mul => self.numeric_op(l, r, pos, |a, b| Ok(a * b)).await,
            BinaryOp::Div => {
                self.numeric_op(l, r, pos, |a, b| {
                    if b == 0.0 {
                        Err(DuError::Arithmetic("division by zero".into()))
                    } else {
                        Ok(a / b)
                    }
                })
                .await
            }
            BinaryOp::Mod => {
                self.numeric_op(l, r, pos, |a, b| {
                    if b == 0.0 {
                        Err(DuError::Arithmetic("modulo by zero".into()))
                    } else {
                        Ok(a % b)
                    }
                })
                .await
            }
            BinaryOp::Pow => self.numeric_op(l, r, pos, |a, b| Ok(a.powf(b))).await,
            BinaryOp::Eq => Ok(Value::Bool(l.structural_eq(&r).await)),
            BinaryOp::Ne => Ok(Value::Bool(!l.structural_eq(&r).await)),
            BinaryOp::Lt => self.compare(l, r, pos, |o| o.is_lt()).await,
            BinaryOp::Le => self.compare(l, r, pos, |o| o.is_le()).await,
            BinaryOp::Gt => self.compare(l, r, pos, |o| o.is_gt()).await,
            BinaryOp::Ge => self.compare(l, r, pos, |o| o.is_ge()).await,
        }
    }

    /// `+` on strings concatenates; on numbers adds; a string with any
    /// other operand coerces the other side to string (`spec.md` §4.A).
    pub(crate) async fn value_add(&mut self, l: Value, r: Value, pos: Position) -> EvalResult<Value> {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                let a = l.to_display_string().await;
                let b = r.to_display_string().await;
                Ok(Value::string(format!("{}{}", a, b)))
            }
            _ => Err(self.data_err(
                DuError::Type(format!("cannot add {} and {}", l.type_name(), r.type_name())),
                pos,
            )),
        }
    }

    async fn numeric_op(
        &mut self,
        l: Value,
        r: Value,
        pos: Position,
        f: impl Fn(f64, f64) -> Result<f64, DuError>,
    ) -> EvalResult<Value> {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => f(*a, *b).map(Value::Number).map_err(|e| self.data_err(e, pos)),
            _ => Err(self.data_err(
                DuError::Type(format!("expected numbers, got {} and {}", l.type_name(), r.type_name())),
                pos,
            )),
        }
    }

    /// Comparisons require numerics or strings on both sides; strings
    /// compare lexicographically (`spec.md` §4.A).
    async fn compare(
        &mut self,
        l: Value,
        r: Value,
        pos: Position,
        f: impl Fn(std::cmp::Ordering) -> bool,
    ) -> EvalResult<Value> {
        let ordering = match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.as_ref().cmp(b.as_ref())),
            _ => None,
        };
        match ordering {
            Some(o) => Ok(Value::Bool(f(o))),
            None => Err(self.data_err(
                DuError::Type(format!("cannot compare {} and {}", l.type_name(), r.type_name())),
                pos,
            )),
        }
    }

    async fn eval_call(&mut self, env: &Env, callee: &Expr, args: &[Arg], pos: Position) -> EvalResult<Value> {
        let func = self.eval_expr(env, callee).await?;
        let mut named_args = NamedArgs::default();
        for arg in args {
            let value = self.eval_expr(env, &arg.value).await?;
            match &arg.name {
                Some(name) => {
                    named_args.named.insert(name.clone(), value);
                }
                None => named_args.positional.push(value),
            }
        }
        self.call_value(&func, named_args, pos).await
    }

    async fn eval_index(&mut self, env: &Env, target: &Expr, index: &Expr, pos: Position) -> EvalResult<Value> {
        let target_value = self.eval_expr(env, target).await?;
        let index_value = self.eval_expr(env, index).await?;
        match &target_value {
            Value::Array(arr) => {
                let i = index_value.to_number();
                if i.is_nan() || i < 0.0 {
                    return Err(self.data_err(DuError::Index(format!("negative or invalid index {}", i)), pos));
                }
                let guard = arr.read().await;
                guard
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| self.data_err(DuError::Index(format!("index {} out of range", i as usize)), pos))
            }
            Value::Object(obj) => match &index_value {
                Value::Str(key) => Ok(obj.read().await.get(key.as_ref()).cloned().unwrap_or(Value::Nil)),
                other => Err(self.data_err(
                    DuError::Type(format!("object keys must be strings, got {}", other.type_name())),
                    pos,
                )),
            },
            other => Err(self.data_err(
                DuError::Type(format!("cannot index into {}", other.type_name())),
                pos,
            )),
        }
    }

    async fn eval_member(&mut self, env: &Env, target: &Expr, name: &str, pos: Position) -> EvalResult<Value> {
        let target_value = self.eval_expr(env, target).await?;
        match &target_value {
            Value::Object(obj) => Ok(obj.read().await.get(name).cloned().unwrap_or(Value::Nil)),
            Value::Handle(handle) => {
                let bound = crate::runtime::dispatch::bind_handle_method(handle.clone(), name.to_string());
                bound.ok_or_else(|| {
                    self.data_err(DuError::Undefined(format!("no such method '{}' on handle", name)), pos)
                })
            }
            other => Err(self.data_err(
                DuError::Type(format!("cannot access member '{}' of {}", name, other.type_name())),
                pos,
            )),
        }
    }
}

impl From<HandleKind> for Value {
    fn from(h: HandleKind) -> Self {
        Value::Handle(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::DatastoreRegistry;
    use crate::runtime::process::ProcessRegistry;
    use std::sync::Arc;

    async fn new_eval() -> Evaluator {
        Evaluator::new("test.du", Arc::new(DatastoreRegistry::new()), Arc::new(ProcessRegistry::new())).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn string_plus_number_coerces() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute(r#"print("v=" + 3)"#).await;
        assert!(err.is_none());
        assert_eq!(out, "v=3\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn division_by_zero_is_catchable() {
        let mut ev = new_eval().await;
        let (out, err) = ev.execute("try var x = 1 / 0 catch e print(e) end").await;
        assert!(err.is_none());
        assert!(out.contains("division by zero"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn negative_array_index_errors() {
        let mut ev = new_eval().await;
        let (_, err) = ev.execute("var a = [1,2,3]\na[-1]").await;
        assert!(err.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ternary_short_circuits() {
        let mut ev = new_eval().await;
        let (out, _) = ev.execute(r#"print(true ? "yes" : "no")"#).await;
        assert_eq!(out, "yes\n");
    }
}
